//! Fleet registry: machines, their link declarations and key pair resources.
//!
//! The fleet is an explicit value handed to each component. Resources of
//! different kinds live in one name-keyed collection as a tagged enum so
//! that iteration order is stable across passes.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::address::BaseIpv4;
use crate::error::{Result, WgLinksError};

/// Suffix of key pair resource names and tunnel host aliases.
pub const WG_SUFFIX: &str = "-wg";

/// Suffix of host aliases for direct (non-tunnel) addresses.
pub const NO_WG_SUFFIX: &str = "-nowg";

/// Name of the key pair resource belonging to `endpoint`.
#[must_use]
pub fn keypair_name(endpoint: &str) -> String {
    format!("{endpoint}{WG_SUFFIX}")
}

/// Reported state of a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineState {
    /// The machine is up.
    #[default]
    Up,
    /// The machine is down.
    Down,
    /// The orchestrator does not know.
    Unknown,
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A machine participating in the mesh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Machine name.
    pub name: String,
    /// Stable ordinal index, required for any machine with links.
    pub index: Option<u32>,
    /// Public address, present only when the machine is reachable.
    pub public_address: Option<IpAddr>,
    /// Direct (non-tunnel) address other machines can reach it on.
    pub direct_address: Option<IpAddr>,
    /// Reported machine state.
    pub state: MachineState,
    /// Whether the machine has a definition in the current deployment.
    pub configured: bool,
    /// Peers this machine declares links to, in declaration order.
    pub links: Vec<String>,
}

impl Endpoint {
    /// Creates a configured, up endpoint with no addresses and no links.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index: None,
            public_address: None,
            direct_address: None,
            state: MachineState::Up,
            configured: true,
            links: Vec::new(),
        }
    }

    /// Sets the ordinal index.
    #[must_use]
    pub fn with_index(mut self, index: u32) -> Self {
        self.index = Some(index);
        self
    }

    /// Sets the public address.
    #[must_use]
    pub fn with_public_address(mut self, address: IpAddr) -> Self {
        self.public_address = Some(address);
        self
    }

    /// Sets the direct address.
    #[must_use]
    pub fn with_direct_address(mut self, address: IpAddr) -> Self {
        self.direct_address = Some(address);
        self
    }

    /// Sets the machine state.
    #[must_use]
    pub fn with_state(mut self, state: MachineState) -> Self {
        self.state = state;
        self
    }

    /// Marks the machine as excluded from the deployment.
    #[must_use]
    pub fn unconfigured(mut self) -> Self {
        self.configured = false;
        self
    }

    /// Declares a link to `peer`. Duplicate declarations are ignored.
    #[must_use]
    pub fn with_link(mut self, peer: impl Into<String>) -> Self {
        let peer = peer.into();
        if !self.links.contains(&peer) {
            self.links.push(peer);
        }
        self
    }

    /// Returns `true` if the machine is up.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.state == MachineState::Up
    }

    /// Returns `true` if the machine is up, configured and has a public address.
    #[must_use]
    pub fn is_reachable(&self) -> bool {
        self.is_live() && self.configured && self.public_address.is_some()
    }

    /// Returns `true` if this machine declares a link to `peer`.
    #[must_use]
    pub fn links_to(&self, peer: &str) -> bool {
        self.links.iter().any(|l| l == peer)
    }
}

fn default_true() -> bool {
    true
}

fn default_listen_port() -> u16 {
    51820
}

fn default_interface_name() -> String {
    "wg0".to_string()
}

/// Declared settings of a key pair resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeypairOptions {
    /// Whether the key pair is enabled.
    #[serde(default = "default_true")]
    pub enable: bool,
    /// DNS servers; `<name>-wg` entries are replaced by tunnel addresses.
    #[serde(default)]
    pub dns: Vec<String>,
    /// Interface MTU; values below 1 are omitted.
    #[serde(default)]
    pub mtu: Option<u32>,
    /// UDP listen port.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Persistent keepalive; values outside `1..=65535` disable it.
    #[serde(default)]
    pub persistent_keepalive: Option<u32>,
    /// Whether links use the shared preshared key.
    #[serde(default = "default_true")]
    pub use_preshared_key: bool,
    /// Re-upload existing key material on every pass.
    #[serde(default)]
    pub sync_state: bool,
    /// Interface name.
    #[serde(default = "default_interface_name")]
    pub interface_name: String,
    /// Routing table.
    #[serde(default)]
    pub table: Option<String>,
    /// Command run before the interface comes up.
    #[serde(default)]
    pub pre_up: String,
    /// Command run before the interface goes down.
    #[serde(default)]
    pub pre_down: String,
    /// Command run after the interface comes up.
    #[serde(default)]
    pub post_up: String,
    /// Command run after the interface goes down.
    #[serde(default)]
    pub post_down: String,
    /// Base address tunnel addresses are offset from.
    #[serde(default)]
    pub base_ipv4: BaseIpv4,
    /// Add `<name>-nowg` host aliases for direct addresses.
    #[serde(default = "default_true")]
    pub add_no_wg_hosts: bool,
}

impl Default for KeypairOptions {
    fn default() -> Self {
        Self {
            enable: true,
            dns: Vec::new(),
            mtu: None,
            listen_port: default_listen_port(),
            persistent_keepalive: None,
            use_preshared_key: true,
            sync_state: false,
            interface_name: default_interface_name(),
            table: None,
            pre_up: String::new(),
            pre_down: String::new(),
            post_up: String::new(),
            post_down: String::new(),
            base_ipv4: BaseIpv4::default(),
            add_no_wg_hosts: true,
        }
    }
}

/// Key material of one endpoint: the secrets plus the settings they apply to.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMaterial {
    /// Base64 private key.
    #[serde(default)]
    pub private: Option<String>,
    /// Base64 public key.
    #[serde(default)]
    pub public: Option<String>,
    /// Base64 preshared key.
    #[serde(default, rename = "presharedKey")]
    pub psk: Option<String>,
    /// Declared settings.
    #[serde(flatten)]
    pub options: KeypairOptions,
}

impl KeyMaterial {
    /// Creates an empty placeholder with the given settings.
    #[must_use]
    pub fn placeholder(options: KeypairOptions) -> Self {
        Self {
            private: None,
            public: None,
            psk: None,
            options,
        }
    }

    /// Returns `true` if all three secrets are present.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        [&self.private, &self.public, &self.psk]
            .iter()
            .all(|s| s.as_deref().is_some_and(|v| !v.is_empty()))
    }

    /// Returns the preshared key if set.
    #[must_use]
    pub fn psk(&self) -> Option<&str> {
        self.psk.as_deref().filter(|v| !v.is_empty())
    }

    /// Name of the systemd unit running this key material's interface.
    #[must_use]
    pub fn service_name(&self) -> String {
        format!("wg-quick-{}.service", self.options.interface_name)
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |s: &Option<String>| s.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("KeyMaterial")
            .field("private", &redact(&self.private))
            .field("public", &self.public)
            .field("psk", &redact(&self.psk))
            .field("options", &self.options)
            .finish()
    }
}

/// A key pair resource owned by one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeypairResource {
    /// Resource name, `<endpoint>-wg`.
    pub name: String,
    /// Owning endpoint.
    pub endpoint: String,
    /// Current key material.
    pub material: KeyMaterial,
}

impl KeypairResource {
    /// Creates the placeholder key pair for `endpoint`.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, options: KeypairOptions) -> Self {
        let endpoint = endpoint.into();
        Self {
            name: keypair_name(&endpoint),
            endpoint,
            material: KeyMaterial::placeholder(options),
        }
    }

    /// Returns `true` once the key material has been generated.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.material.is_complete()
    }
}

/// A resource known to the fleet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    /// A machine.
    Machine(Endpoint),
    /// A `WireGuard` key pair.
    Keypair(KeypairResource),
}

impl Resource {
    /// Returns the resource name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Machine(m) => &m.name,
            Self::Keypair(k) => &k.name,
        }
    }
}

/// The set of resources one convergence pass operates on.
#[derive(Debug, Clone, Default)]
pub struct Fleet {
    resources: BTreeMap<String, Resource>,
}

impl Fleet {
    /// Creates an empty fleet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, resource: Resource) -> Result<()> {
        let name = resource.name().to_string();
        if self.resources.contains_key(&name) {
            return Err(WgLinksError::invalid_fleet(format!(
                "duplicate resource name '{name}'"
            )));
        }
        self.resources.insert(name, resource);
        Ok(())
    }

    /// Adds a machine.
    ///
    /// # Errors
    ///
    /// Returns an error if a resource with the same name exists.
    pub fn add_machine(&mut self, endpoint: Endpoint) -> Result<()> {
        self.insert(Resource::Machine(endpoint))
    }

    /// Adds the placeholder key pair for `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if a resource with the same name exists.
    pub fn add_keypair(&mut self, endpoint: &str, options: KeypairOptions) -> Result<()> {
        self.insert(Resource::Keypair(KeypairResource::new(endpoint, options)))
    }

    /// Iterates over machines in name order.
    pub fn machines(&self) -> impl Iterator<Item = &Endpoint> {
        self.resources.values().filter_map(|r| match r {
            Resource::Machine(m) => Some(m),
            Resource::Keypair(_) => None,
        })
    }

    /// Iterates over key pairs in name order.
    pub fn keypairs(&self) -> impl Iterator<Item = &KeypairResource> {
        self.resources.values().filter_map(|r| match r {
            Resource::Keypair(k) => Some(k),
            Resource::Machine(_) => None,
        })
    }

    /// Returns the machine named `name`.
    #[must_use]
    pub fn machine(&self, name: &str) -> Option<&Endpoint> {
        match self.resources.get(name) {
            Some(Resource::Machine(m)) => Some(m),
            _ => None,
        }
    }

    /// Returns the key pair owned by `endpoint`.
    #[must_use]
    pub fn keypair(&self, endpoint: &str) -> Option<&KeypairResource> {
        match self.resources.get(&keypair_name(endpoint)) {
            Some(Resource::Keypair(k)) if k.endpoint == endpoint => Some(k),
            _ => None,
        }
    }

    /// Returns the key pair owned by `endpoint` mutably.
    pub fn keypair_mut(&mut self, endpoint: &str) -> Option<&mut KeypairResource> {
        match self.resources.get_mut(&keypair_name(endpoint)) {
            Some(Resource::Keypair(k)) if k.endpoint == endpoint => Some(k),
            _ => None,
        }
    }

    /// Number of resources of all kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns `true` if the fleet has no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Loads stored secrets into the placeholders.
    ///
    /// Settings always come from the current definition; only the three
    /// secrets are taken from `state`. Entries for unknown key pairs are
    /// ignored.
    pub fn apply_state(&mut self, state: &BTreeMap<String, KeyMaterial>) {
        for resource in self.resources.values_mut() {
            let Resource::Keypair(keypair) = resource else {
                continue;
            };
            if let Some(stored) = state.get(&keypair.name) {
                keypair.material.private.clone_from(&stored.private);
                keypair.material.public.clone_from(&stored.public);
                keypair.material.psk.clone_from(&stored.psk);
                debug!(keypair = %keypair.name, complete = keypair.is_ready(), "loaded key state");
            }
        }
    }

    /// Snapshot of all key material, keyed by key pair name.
    #[must_use]
    pub fn key_state(&self) -> BTreeMap<String, KeyMaterial> {
        self.keypairs()
            .map(|k| (k.name.clone(), k.material.clone()))
            .collect()
    }

    /// Builds a fleet from a declarative definition.
    ///
    /// # Errors
    ///
    /// Returns an error if machine names collide with each other or with
    /// key pair resource names.
    pub fn from_definition(definition: FleetDefinition) -> Result<Self> {
        let mut fleet = Self::new();
        for machine in definition.machines {
            let mut endpoint = Endpoint {
                name: machine.name,
                index: machine.index,
                public_address: machine.public_ipv4,
                direct_address: machine.private_ipv4,
                state: machine.state,
                configured: !machine.excluded,
                links: Vec::new(),
            };
            for peer in machine.wg_links_to {
                endpoint = endpoint.with_link(peer);
            }
            let name = endpoint.name.clone();
            fleet.add_machine(endpoint)?;
            if let Some(options) = machine.wg_keypair.filter(|o| o.enable) {
                fleet.add_keypair(&name, options)?;
            }
        }
        Ok(fleet)
    }
}

/// Declarative description of one machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineDefinition {
    /// Machine name.
    pub name: String,
    /// Ordinal index.
    #[serde(default)]
    pub index: Option<u32>,
    /// Reported state.
    #[serde(default)]
    pub state: MachineState,
    /// Public address.
    #[serde(default)]
    pub public_ipv4: Option<IpAddr>,
    /// Direct (non-tunnel) address.
    #[serde(default)]
    pub private_ipv4: Option<IpAddr>,
    /// Excluded from this deployment.
    #[serde(default)]
    pub excluded: bool,
    /// Peers this machine links to.
    #[serde(default)]
    pub wg_links_to: Vec<String>,
    /// Key pair settings.
    #[serde(default)]
    pub wg_keypair: Option<KeypairOptions>,
}

/// Declarative description of a fleet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetDefinition {
    /// All machines.
    #[serde(default)]
    pub machines: Vec<MachineDefinition>,
}

impl FleetDefinition {
    /// Parses a JSON fleet definition.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid JSON for this schema.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFINITION: &str = r#"{
        "machines": [
            {
                "name": "alpha",
                "index": 1,
                "publicIpv4": "203.0.113.10",
                "privateIpv4": "192.168.1.10",
                "wgLinksTo": ["beta", "beta"],
                "wgKeypair": { "listenPort": 51000, "baseIpv4": { "a": 10, "b": 9, "c": 0, "d": 0 } }
            },
            {
                "name": "beta",
                "index": 2,
                "state": "down",
                "wgLinksTo": ["alpha"],
                "wgKeypair": {}
            },
            { "name": "gamma", "excluded": true, "wgKeypair": { "enable": false } }
        ]
    }"#;

    #[test]
    fn definition_parses_with_defaults() {
        let def = FleetDefinition::from_json(DEFINITION).expect("parse");
        assert_eq!(def.machines.len(), 3);
        let beta = def.machines[1].wg_keypair.as_ref().expect("options");
        assert_eq!(beta.listen_port, 51820);
        assert_eq!(beta.interface_name, "wg0");
        assert!(beta.use_preshared_key);
        assert!(beta.add_no_wg_hosts);
        assert_eq!(beta.base_ipv4, BaseIpv4::new(10, 0, 0, 0));
        assert_eq!(def.machines[1].state, MachineState::Down);
    }

    #[test]
    fn fleet_from_definition_creates_placeholders() {
        let fleet = Fleet::from_definition(FleetDefinition::from_json(DEFINITION).expect("parse"))
            .expect("fleet");

        // three machines, two enabled key pairs
        assert_eq!(fleet.len(), 5);
        assert_eq!(fleet.machines().count(), 3);

        let alpha = fleet.machine("alpha").expect("alpha");
        assert_eq!(alpha.links, vec!["beta".to_string()]);
        assert!(alpha.is_reachable());
        assert!(!fleet.machine("beta").expect("beta").is_reachable());
        assert!(!fleet.machine("gamma").expect("gamma").configured);

        let keypair = fleet.keypair("alpha").expect("keypair");
        assert_eq!(keypair.name, "alpha-wg");
        assert_eq!(keypair.material.options.listen_port, 51000);
        assert!(!keypair.is_ready());
        assert!(fleet.keypair("gamma").is_none());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut fleet = Fleet::new();
        fleet.add_machine(Endpoint::new("alpha")).expect("add");
        let err = fleet.add_machine(Endpoint::new("alpha")).expect_err("duplicate");
        assert!(matches!(err, WgLinksError::InvalidFleet { .. }));

        // a machine named like another machine's key pair collides too
        fleet.add_keypair("alpha", KeypairOptions::default()).expect("keypair");
        let err = fleet.add_machine(Endpoint::new("alpha-wg")).expect_err("collision");
        assert!(matches!(err, WgLinksError::InvalidFleet { .. }));
    }

    #[test]
    fn apply_state_takes_only_secrets() {
        let mut fleet = Fleet::new();
        fleet.add_machine(Endpoint::new("alpha")).expect("add");
        fleet.add_keypair("alpha", KeypairOptions::default()).expect("keypair");

        let mut stored = KeyMaterial::placeholder(KeypairOptions {
            listen_port: 1,
            ..KeypairOptions::default()
        });
        stored.private = Some("prv".into());
        stored.public = Some("pub".into());
        stored.psk = Some("psk".into());

        let mut state = BTreeMap::new();
        state.insert("alpha-wg".to_string(), stored);
        state.insert("ghost-wg".to_string(), KeyMaterial::default());
        fleet.apply_state(&state);

        let keypair = fleet.keypair("alpha").expect("keypair");
        assert!(keypair.is_ready());
        assert_eq!(keypair.material.options.listen_port, 51820);
        assert_eq!(fleet.key_state().len(), 1);
    }

    #[test]
    fn key_material_debug_redacts_secrets() {
        let mut material = KeyMaterial::default();
        material.private = Some("super-secret".into());
        material.psk = Some("also-secret".into());
        let debug = format!("{material:?}");
        assert!(!debug.contains("super-secret"));
        assert!(!debug.contains("also-secret"));
    }

    #[test]
    fn key_material_serde_uses_declarative_names() {
        let mut material = KeyMaterial::placeholder(KeypairOptions::default());
        material.psk = Some("abc".into());
        let json = serde_json::to_value(&material).expect("serialize");
        assert_eq!(json["presharedKey"], "abc");
        assert_eq!(json["listenPort"], 51820);
        let back: KeyMaterial = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, material);
    }
}
