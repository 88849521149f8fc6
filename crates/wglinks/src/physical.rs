//! Per-endpoint configuration emitted for the declarative applier.
//!
//! Field names follow the declarative module's option names so that the
//! serialized form can be merged into each machine's configuration as is.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};

use ipnet::Ipv4Net;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// Physical configuration of the whole fleet, keyed by endpoint name.
pub type PhysicalSpec = BTreeMap<String, EndpointConfig>;

/// One tunnel peer of an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRecord {
    /// The peer's public key.
    pub public_key: String,
    /// The peer's tunnel address as a single host route.
    #[serde(rename = "allowedIPs")]
    pub allowed_ips: Vec<Ipv4Net>,
    /// `address:port` the peer listens on.
    pub endpoint: String,
    /// Keepalive interval in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent_keepalive: Option<u16>,
    /// Path of the preshared key file on the local machine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preshared_key_file: Option<String>,
}

/// Host aliases of one endpoint: address to hostnames, canonical name first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostAliasTable {
    entries: BTreeMap<IpAddr, Vec<String>>,
}

impl HostAliasTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `alias` to the names of `address`, ignoring repeats.
    pub fn add(&mut self, address: IpAddr, alias: impl Into<String>) {
        let alias = alias.into();
        let names = self.entries.entry(address).or_default();
        if !names.contains(&alias) {
            names.push(alias);
        }
    }

    /// Hostnames registered for `address`.
    #[must_use]
    pub fn get(&self, address: &IpAddr) -> Option<&[String]> {
        self.entries.get(address).map(Vec::as_slice)
    }

    /// Entries sorted by canonical (first) alias.
    #[must_use]
    pub fn sorted(&self) -> Vec<(IpAddr, &[String])> {
        let mut sorted: Vec<(IpAddr, &[String])> = self
            .entries
            .iter()
            .map(|(ip, names)| (*ip, names.as_slice()))
            .collect();
        sorted.sort_by(|(_, a), (_, b)| a.first().cmp(&b.first()));
        sorted
    }

    /// Number of addresses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no alias has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for HostAliasTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let sorted = self.sorted();
        let mut map = serializer.serialize_map(Some(sorted.len()))?;
        for (ip, names) in sorted {
            map.serialize_entry(&ip.to_string(), names)?;
        }
        map.end()
    }
}

/// The tunnel interface of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceBlock {
    /// Local tunnel address with a `/24` prefix.
    pub address: Vec<Ipv4Net>,
    /// UDP listen port.
    pub listen_port: u16,
    /// Path of the private key file.
    pub private_key_file: String,
    /// DNS servers after tunnel-name substitution.
    pub dns: Vec<String>,
    /// Interface MTU.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
    /// Hook run before the interface comes up.
    pub pre_up: String,
    /// Hook run before the interface goes down.
    pub pre_down: String,
    /// Hook run after the interface comes up.
    pub post_up: String,
    /// Hook run after the interface goes down.
    pub post_down: String,
    /// Routing table.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    /// Validated peers in declaration order.
    pub peers: Vec<PeerRecord>,
}

/// Everything emitted for one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConfig {
    /// `/etc/hosts` style aliases.
    pub hosts: HostAliasTable,
    /// Firewall ports opened for the tunnel.
    #[serde(rename = "allowedUDPPorts")]
    pub allowed_udp_ports: Vec<u16>,
    /// Name of the tunnel interface.
    pub interface_name: String,
    /// The tunnel interface.
    pub interface: InterfaceBlock,
}

impl EndpointConfig {
    /// The endpoint's own tunnel address.
    #[must_use]
    pub fn tunnel_address(&self) -> Option<Ipv4Addr> {
        self.interface.address.first().map(Ipv4Net::addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v4(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(a, b, c, d))
    }

    #[test]
    fn aliases_sort_by_canonical_name() {
        let mut hosts = HostAliasTable::new();
        hosts.add(v4(10, 0, 0, 3), "zulu-wg");
        hosts.add(v4(127, 0, 0, 1), "mike");
        hosts.add(v4(10, 0, 0, 2), "alpha-wg");
        hosts.add(v4(10, 0, 0, 2), "alpha-wg");

        let order: Vec<&str> = hosts
            .sorted()
            .iter()
            .map(|(_, names)| names[0].as_str())
            .collect();
        assert_eq!(order, vec!["alpha-wg", "mike", "zulu-wg"]);
        assert_eq!(hosts.get(&v4(10, 0, 0, 2)).map(<[String]>::len), Some(1));
    }

    #[test]
    fn aliases_serialize_in_sorted_order() {
        let mut hosts = HostAliasTable::new();
        hosts.add(v4(127, 0, 0, 1), "mike");
        hosts.add(v4(10, 0, 0, 2), "alpha-wg");
        let json = serde_json::to_string(&hosts).expect("serialize");
        assert_eq!(json, r#"{"10.0.0.2":["alpha-wg"],"127.0.0.1":["mike"]}"#);
    }

    #[test]
    fn peer_record_omits_unset_options() {
        let peer = PeerRecord {
            public_key: "PUB".into(),
            allowed_ips: vec!["10.0.0.2/32".parse().expect("net")],
            endpoint: "203.0.113.2:51820".into(),
            persistent_keepalive: None,
            preshared_key_file: None,
        };
        let json = serde_json::to_value(&peer).expect("serialize");
        assert_eq!(json["allowedIPs"][0], "10.0.0.2/32");
        assert!(json.get("persistentKeepalive").is_none());
        assert!(json.get("presharedKeyFile").is_none());
    }
}
