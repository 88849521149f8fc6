//! Topology validation and peer-matrix construction.
//!
//! Links are declared per machine and only materialize when both ends agree.
//! There is no graph store: every check compares the declaring machine with
//! the peer it names, so the whole fleet is re-validated on every build.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use ipnet::Ipv4Net;
use tracing::{debug, warn};

use crate::address::allocate;
use crate::error::{Result, WgLinksError};
use crate::fleet::{Endpoint, Fleet, KeypairResource, NO_WG_SUFFIX, WG_SUFFIX};
use crate::physical::{EndpointConfig, HostAliasTable, InterfaceBlock, PeerRecord, PhysicalSpec};
use crate::provision::ProvisionerConfig;

/// Prefix length of the local tunnel address.
pub const INTERFACE_PREFIX_LEN: u8 = 24;

const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

fn tunnel_address(endpoint: &Endpoint, keypair: &KeypairResource) -> Result<Ipv4Addr> {
    let index = endpoint.index.ok_or_else(|| WgLinksError::MissingIndex {
        endpoint: endpoint.name.clone(),
    })?;
    allocate(&endpoint.name, keypair.material.options.base_ipv4, index)
}

fn host_net(endpoint: &str, address: Ipv4Addr, prefix_len: u8) -> Result<Ipv4Net> {
    Ipv4Net::new(address, prefix_len)
        .map_err(|e| WgLinksError::invalid_address(endpoint, address.to_string(), e.to_string()))
}

/// Replaces `<name>-wg` entries naming a fleet key pair with that machine's
/// tunnel address.
fn substitute_dns(fleet: &Fleet, dns: &[String]) -> Result<Vec<String>> {
    dns.iter()
        .map(|entry| {
            let target = entry
                .strip_suffix(WG_SUFFIX)
                .and_then(|name| Some((fleet.machine(name)?, fleet.keypair(name)?)));
            match target {
                Some((machine, keypair)) => Ok(tunnel_address(machine, keypair)?.to_string()),
                None => Ok(entry.clone()),
            }
        })
        .collect()
}

/// Builds the configuration of every endpoint that is ready to join the mesh.
///
/// Endpoints that are down, excluded or still waiting for key material are
/// left out. Links to peers that are not ready yet are deferred to a later
/// pass. Any invalid link aborts the whole build.
///
/// # Errors
///
/// Returns the first validation failure in name order: an unknown peer, a
/// self link, a missing index, a one-sided link, disagreement on the
/// preshared key, an address collision or an invalid tunnel address.
pub fn build(fleet: &Fleet, config: &ProvisionerConfig) -> Result<PhysicalSpec> {
    let mut spec = PhysicalSpec::new();
    for machine in fleet.machines() {
        let Some(keypair) = fleet.keypair(&machine.name) else {
            continue;
        };
        if !machine.is_live() || !machine.configured || !keypair.is_ready() {
            debug!(endpoint = %machine.name, state = %machine.state, "endpoint not ready for wg links");
            continue;
        }
        let endpoint_config = build_endpoint(fleet, config, machine, keypair)?;
        spec.insert(machine.name.clone(), endpoint_config);
    }
    debug!(endpoints = spec.len(), "built peer matrix");
    Ok(spec)
}

fn build_endpoint(
    fleet: &Fleet,
    config: &ProvisionerConfig,
    machine: &Endpoint,
    keypair: &KeypairResource,
) -> Result<EndpointConfig> {
    let options = &keypair.material.options;
    let local = tunnel_address(machine, keypair)?;
    let mut hosts = HostAliasTable::new();

    if options.add_no_wg_hosts {
        for other in fleet.machines().filter(|o| o.name != machine.name) {
            if let Some(direct) = other.direct_address {
                hosts.add(direct, format!("{}{NO_WG_SUFFIX}", other.name));
            }
        }
    }

    let mut peers = Vec::new();
    for peer_name in &machine.links {
        let peer = fleet.machine(peer_name).ok_or_else(|| WgLinksError::UnknownPeer {
            endpoint: machine.name.clone(),
            peer: peer_name.clone(),
        })?;
        if peer.name == machine.name {
            return Err(WgLinksError::SelfLink {
                endpoint: machine.name.clone(),
            });
        }
        let peer_index = peer.index.ok_or_else(|| WgLinksError::MissingIndex {
            endpoint: peer.name.clone(),
        })?;
        if !peer.links_to(&machine.name) {
            return Err(WgLinksError::NonReciprocalLink {
                endpoint: machine.name.clone(),
                peer: peer.name.clone(),
            });
        }

        let Some(peer_keypair) = fleet.keypair(&peer.name) else {
            warn!(endpoint = %machine.name, peer = %peer.name, "peer has no wireguard key pair, deferring link");
            continue;
        };
        let peer_options = &peer_keypair.material.options;

        if options.use_preshared_key != peer_options.use_preshared_key {
            return Err(WgLinksError::PskPolicyMismatch {
                endpoint: machine.name.clone(),
                endpoint_uses_psk: options.use_preshared_key,
                peer: peer.name.clone(),
                peer_uses_psk: peer_options.use_preshared_key,
            });
        }
        if options.use_preshared_key
            && keypair
                .material
                .psk()
                .zip(peer_keypair.material.psk())
                .is_some_and(|(ours, theirs)| ours != theirs)
        {
            return Err(WgLinksError::PskValueMismatch {
                endpoint: machine.name.clone(),
                peer: peer.name.clone(),
            });
        }

        let remote = allocate(&peer.name, peer_options.base_ipv4, peer_index)?;
        if remote == local {
            return Err(WgLinksError::AddressCollision {
                endpoint: machine.name.clone(),
                peer: peer.name.clone(),
                address: local,
            });
        }

        let (Some(public_key), Some(public_address)) = (
            peer_keypair.material.public.clone().filter(|_| peer_keypair.is_ready()),
            peer.public_address,
        ) else {
            warn!(endpoint = %machine.name, peer = %peer.name, "peer not ready yet, deferring link");
            continue;
        };

        peers.push(PeerRecord {
            public_key,
            allowed_ips: vec![host_net(&peer.name, remote, 32)?],
            endpoint: SocketAddr::new(public_address, peer_options.listen_port).to_string(),
            persistent_keepalive: options
                .persistent_keepalive
                .and_then(|k| u16::try_from(k).ok())
                .filter(|k| *k >= 1),
            preshared_key_file: options
                .use_preshared_key
                .then(|| config.psk_file().display().to_string()),
        });
        hosts.add(IpAddr::V4(remote), format!("{}{WG_SUFFIX}", peer.name));
    }

    hosts.add(LOOPBACK, machine.name.clone());
    hosts.add(IpAddr::V4(local), format!("{}{WG_SUFFIX}", machine.name));

    debug!(endpoint = %machine.name, address = %local, peers = peers.len(), "built wg interface");

    Ok(EndpointConfig {
        hosts,
        allowed_udp_ports: vec![options.listen_port],
        interface_name: options.interface_name.clone(),
        interface: InterfaceBlock {
            address: vec![host_net(&machine.name, local, INTERFACE_PREFIX_LEN)?],
            listen_port: options.listen_port,
            private_key_file: config.private_key_file().display().to_string(),
            dns: substitute_dns(fleet, &options.dns)?,
            mtu: options.mtu.filter(|m| *m >= 1),
            pre_up: options.pre_up.clone(),
            pre_down: options.pre_down.clone(),
            post_up: options.post_up.clone(),
            post_down: options.post_down.clone(),
            table: options.table.clone(),
            peers,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::BaseIpv4;
    use crate::fleet::{KeyMaterial, KeypairOptions, MachineState};

    fn material(name: &str, options: KeypairOptions) -> KeyMaterial {
        KeyMaterial {
            private: Some(format!("{name}-private")),
            public: Some(format!("{name}-public")),
            psk: Some("shared-psk".into()),
            options,
        }
    }

    fn public_ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(203, 0, 113, last))
    }

    struct FleetBuilder {
        fleet: Fleet,
    }

    impl FleetBuilder {
        fn new() -> Self {
            Self { fleet: Fleet::new() }
        }

        fn ready(self, name: &str, index: u32, links: &[&str]) -> Self {
            self.ready_with(name, index, links, KeypairOptions::default())
        }

        fn ready_with(self, name: &str, index: u32, links: &[&str], options: KeypairOptions) -> Self {
            let octet = u8::try_from(index).expect("small index");
            let mut endpoint = Endpoint::new(name)
                .with_index(index)
                .with_public_address(public_ip(octet))
                .with_direct_address(IpAddr::V4(Ipv4Addr::new(192, 168, 1, octet)));
            for link in links {
                endpoint = endpoint.with_link(*link);
            }
            self.with_keys(endpoint, options)
        }

        /// Adds `endpoint` as is, with complete key material.
        fn with_keys(mut self, endpoint: Endpoint, options: KeypairOptions) -> Self {
            let name = endpoint.name.clone();
            self.fleet.add_machine(endpoint).expect("machine");
            self.fleet.add_keypair(&name, options.clone()).expect("keypair");
            self.fleet.keypair_mut(&name).expect("keypair").material = material(&name, options);
            self
        }

        fn machine(mut self, endpoint: Endpoint) -> Self {
            self.fleet.add_machine(endpoint).expect("machine");
            self
        }

        fn build(self) -> Result<PhysicalSpec> {
            build(&self.fleet, &ProvisionerConfig::default())
        }
    }

    #[test]
    fn reciprocal_pair_produces_symmetric_peers() {
        let spec = FleetBuilder::new()
            .ready("alpha", 1, &["beta"])
            .ready("beta", 2, &["alpha"])
            .build()
            .expect("build");

        let alpha = &spec["alpha"];
        assert_eq!(alpha.tunnel_address(), Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(alpha.interface.address[0].to_string(), "10.0.0.1/24");
        assert_eq!(alpha.allowed_udp_ports, vec![51820]);
        assert_eq!(alpha.interface.private_key_file, "/etc/wglinks/wireguard.private");

        let peer = &alpha.interface.peers[0];
        assert_eq!(peer.public_key, "beta-public");
        assert_eq!(peer.allowed_ips[0].to_string(), "10.0.0.2/32");
        assert_eq!(peer.endpoint, "203.0.113.2:51820");
        assert_eq!(peer.persistent_keepalive, None);
        assert_eq!(peer.preshared_key_file.as_deref(), Some("/etc/wglinks/wireguard.psk"));

        assert_eq!(spec["beta"].interface.peers[0].public_key, "alpha-public");
    }

    #[test]
    fn one_sided_link_fails() {
        let err = FleetBuilder::new()
            .ready("a", 1, &["b"])
            .ready("b", 2, &[])
            .build()
            .expect_err("non reciprocal");
        assert!(matches!(
            err,
            WgLinksError::NonReciprocalLink { ref endpoint, ref peer } if endpoint == "a" && peer == "b"
        ));
    }

    #[test]
    fn self_link_fails() {
        let err = FleetBuilder::new()
            .ready("a", 1, &["a"])
            .build()
            .expect_err("self link");
        assert!(matches!(err, WgLinksError::SelfLink { ref endpoint } if endpoint == "a"));
    }

    #[test]
    fn unknown_peer_fails() {
        let err = FleetBuilder::new()
            .ready("a", 1, &["ghost"])
            .build()
            .expect_err("unknown");
        assert!(matches!(err, WgLinksError::UnknownPeer { ref peer, .. } if peer == "ghost"));
    }

    #[test]
    fn peer_without_index_fails() {
        let err = FleetBuilder::new()
            .ready("a", 1, &["b"])
            .machine(Endpoint::new("b").with_link("a"))
            .build()
            .expect_err("missing index");
        assert!(matches!(err, WgLinksError::MissingIndex { ref endpoint } if endpoint == "b"));
    }

    #[test]
    fn declaring_endpoint_without_index_fails() {
        let err = FleetBuilder::new()
            .ready("a", 1, &[])
            .with_keys(
                Endpoint::new("b").with_public_address(public_ip(2)),
                KeypairOptions::default(),
            )
            .build()
            .expect_err("missing index");
        assert!(matches!(err, WgLinksError::MissingIndex { ref endpoint } if endpoint == "b"));
    }

    #[test]
    fn excluded_endpoint_gets_no_config() {
        let spec = FleetBuilder::new()
            .ready("a", 1, &["b"])
            .ready("b", 2, &["a"])
            .with_keys(
                Endpoint::new("c")
                    .with_index(3)
                    .with_public_address(public_ip(3))
                    .unconfigured(),
                KeypairOptions::default(),
            )
            .build()
            .expect("build");
        assert_eq!(spec.keys().map(String::as_str).collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn address_leaving_private_range_aborts_build() {
        let err = FleetBuilder::new()
            .ready("a", 1, &[])
            .ready_with(
                "z",
                1,
                &[],
                KeypairOptions {
                    base_ipv4: BaseIpv4::new(10, 255, 255, 255),
                    ..KeypairOptions::default()
                },
            )
            .build()
            .expect_err("public address");
        assert!(matches!(
            err,
            WgLinksError::InvalidAddress { ref endpoint, ref address, .. }
                if endpoint == "z" && address == "11.0.0.0"
        ));
    }

    #[test]
    fn different_bases_colliding_fail() {
        let err = FleetBuilder::new()
            .ready_with(
                "a",
                1,
                &["b"],
                KeypairOptions {
                    base_ipv4: BaseIpv4::new(10, 0, 0, 5),
                    ..KeypairOptions::default()
                },
            )
            .ready_with(
                "b",
                2,
                &["a"],
                KeypairOptions {
                    base_ipv4: BaseIpv4::new(10, 0, 0, 4),
                    ..KeypairOptions::default()
                },
            )
            .build()
            .expect_err("collision");
        assert!(matches!(
            err,
            WgLinksError::AddressCollision { address, .. } if address == Ipv4Addr::new(10, 0, 0, 6)
        ));
    }

    #[test]
    fn psk_policy_disagreement_fails() {
        let err = FleetBuilder::new()
            .ready("a", 1, &["b"])
            .ready_with(
                "b",
                2,
                &["a"],
                KeypairOptions {
                    use_preshared_key: false,
                    ..KeypairOptions::default()
                },
            )
            .build()
            .expect_err("policy");
        assert!(matches!(
            err,
            WgLinksError::PskPolicyMismatch {
                endpoint_uses_psk: true,
                peer_uses_psk: false,
                ..
            }
        ));
    }

    #[test]
    fn psk_value_disagreement_fails() {
        let mut builder = FleetBuilder::new()
            .ready("a", 1, &["b"])
            .ready("b", 2, &["a"]);
        builder.fleet.keypair_mut("b").expect("b").material.psk = Some("other".into());
        let err = builder.build().expect_err("psk value");
        assert!(matches!(err, WgLinksError::PskValueMismatch { .. }));
    }

    #[test]
    fn psk_values_are_ignored_without_psk() {
        let no_psk = KeypairOptions {
            use_preshared_key: false,
            persistent_keepalive: Some(25),
            ..KeypairOptions::default()
        };
        let mut builder = FleetBuilder::new()
            .ready_with("a", 1, &["b"], no_psk.clone())
            .ready_with("b", 2, &["a"], no_psk);
        builder.fleet.keypair_mut("b").expect("b").material.psk = Some("other".into());

        let spec = builder.build().expect("build");
        let peer = &spec["a"].interface.peers[0];
        assert_eq!(peer.preshared_key_file, None);
        assert_eq!(peer.persistent_keepalive, Some(25));
    }

    #[test]
    fn unready_peer_is_deferred() {
        let mut builder = FleetBuilder::new()
            .ready("a", 1, &["b"])
            .ready("b", 2, &["a"]);
        builder.fleet.keypair_mut("b").expect("b").material.private = None;

        let spec = builder.build().expect("build");
        assert!(spec["a"].interface.peers.is_empty());
        assert!(!spec.contains_key("b"));
    }

    #[test]
    fn down_endpoint_gets_no_config_but_stays_a_peer() {
        let mut builder = FleetBuilder::new().ready("a", 1, &["b"]).machine(
            Endpoint::new("b")
                .with_index(2)
                .with_public_address(public_ip(2))
                .with_link("a")
                .with_state(MachineState::Down),
        );
        builder.fleet.add_keypair("b", KeypairOptions::default()).expect("keypair");
        builder.fleet.keypair_mut("b").expect("b").material = material("b", KeypairOptions::default());

        let spec = builder.build().expect("build");
        assert!(!spec.contains_key("b"));
        assert_eq!(spec["a"].interface.peers.len(), 1);
    }

    #[test]
    fn hosts_are_sorted_by_canonical_alias() {
        let spec = FleetBuilder::new()
            .ready("mike", 1, &["alpha", "zulu"])
            .ready("alpha", 2, &["mike"])
            .ready("zulu", 3, &["mike"])
            .build()
            .expect("build");

        let canonical: Vec<String> = spec["mike"]
            .hosts
            .sorted()
            .iter()
            .map(|(_, names)| names[0].clone())
            .collect();
        assert_eq!(
            canonical,
            vec!["alpha-nowg", "alpha-wg", "mike", "mike-wg", "zulu-nowg", "zulu-wg"]
        );
        assert_eq!(
            spec["mike"].hosts.get(&LOOPBACK),
            Some(&["mike".to_string()][..])
        );
    }

    #[test]
    fn no_wg_hosts_can_be_disabled() {
        let spec = FleetBuilder::new()
            .ready_with(
                "a",
                1,
                &["b"],
                KeypairOptions {
                    add_no_wg_hosts: false,
                    ..KeypairOptions::default()
                },
            )
            .ready("b", 2, &["a"])
            .build()
            .expect("build");
        assert_eq!(spec["a"].hosts.len(), 3);
        assert_eq!(spec["b"].hosts.len(), 4);
    }

    #[test]
    fn dns_names_resolve_to_tunnel_addresses() {
        let spec = FleetBuilder::new()
            .ready_with(
                "a",
                1,
                &["b"],
                KeypairOptions {
                    dns: vec!["b-wg".into(), "1.1.1.1".into(), "nobody-wg".into()],
                    mtu: Some(0),
                    ..KeypairOptions::default()
                },
            )
            .ready("b", 2, &["a"])
            .build()
            .expect("build");
        assert_eq!(spec["a"].interface.dns, vec!["10.0.0.2", "1.1.1.1", "nobody-wg"]);
        assert_eq!(spec["a"].interface.mtu, None);
    }

    #[test]
    fn build_is_deterministic() {
        let builder = || {
            FleetBuilder::new()
                .ready("a", 1, &["b", "c"])
                .ready("b", 2, &["a", "c"])
                .ready("c", 3, &["a", "b"])
        };
        let first = serde_json::to_string(&builder().build().expect("first")).expect("json");
        let second = serde_json::to_string(&builder().build().expect("second")).expect("json");
        assert_eq!(first, second);
    }
}
