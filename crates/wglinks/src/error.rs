//! Error types for mesh addressing, link validation and key provisioning.
//!
//! Every variant names the endpoint(s) involved so that a failed convergence
//! pass points straight at the offending machine definition.

use std::net::Ipv4Addr;

use thiserror::Error;

/// Result type alias for wglinks operations.
pub type Result<T> = std::result::Result<T, WgLinksError>;

/// Errors that can occur during a convergence pass.
#[derive(Debug, Error)]
pub enum WgLinksError {
    /// A base or computed address is malformed or not private.
    #[error("wireguard address {address} for '{endpoint}' is invalid: {reason}")]
    InvalidAddress {
        /// Endpoint whose address failed.
        endpoint: String,
        /// The offending address, as far as it could be formed.
        address: String,
        /// Why the address was rejected.
        reason: String,
    },

    /// The `wg` tool could not be located.
    #[error("the wireguard tool '{tool}' must be available in the system path of the deployer for key generation")]
    ToolNotFound {
        /// Tool name or path that was looked up.
        tool: String,
    },

    /// Key generation failed or produced unusable output.
    #[error("wireguard key generation for '{endpoint}' failed: {message}")]
    KeyGenerationFailed {
        /// Endpoint the keys were generated for.
        endpoint: String,
        /// Diagnostic output of the tool.
        message: String,
    },

    /// Writing key files on the endpoint failed.
    #[error("unable to save wireguard keys to '{endpoint}': {message}")]
    UploadFailed {
        /// Endpoint the upload targeted.
        endpoint: String,
        /// Diagnostic output of the remote command.
        message: String,
    },

    /// Stopping the running wireguard service after an upload failed.
    #[error("unable to stop {service} on '{endpoint}' after uploading wireguard keys")]
    ServiceStopFailed {
        /// Endpoint the service runs on.
        endpoint: String,
        /// Service unit name.
        service: String,
    },

    /// A link names an endpoint that is not part of the fleet.
    #[error("'wgLinksTo' in machine '{endpoint}' refers to an unknown machine '{peer}'")]
    UnknownPeer {
        /// Declaring endpoint.
        endpoint: String,
        /// The unknown name.
        peer: String,
    },

    /// A link names the declaring endpoint itself.
    #[error("'wgLinksTo' in machine '{endpoint}' refers to itself")]
    SelfLink {
        /// Declaring endpoint.
        endpoint: String,
    },

    /// An endpoint taking part in a link has no ordinal index.
    #[error("'{endpoint}' is missing an index required for wg-links")]
    MissingIndex {
        /// Endpoint without an index.
        endpoint: String,
    },

    /// A link is declared from one side only.
    #[error("'{endpoint}' specifies a wg link to '{peer}', but '{peer}' does not specify a wg link to '{endpoint}'")]
    NonReciprocalLink {
        /// Declaring endpoint.
        endpoint: String,
        /// Peer that does not declare the link back.
        peer: String,
    },

    /// The two ends of a link disagree on preshared key usage.
    #[error("'{endpoint}' (usePresharedKey = {endpoint_uses_psk}) and '{peer}' (usePresharedKey = {peer_uses_psk}) do not agree on the use of a preshared key")]
    PskPolicyMismatch {
        /// Declaring endpoint.
        endpoint: String,
        /// Its use-psk flag.
        endpoint_uses_psk: bool,
        /// Peer endpoint.
        peer: String,
        /// The peer's use-psk flag.
        peer_uses_psk: bool,
    },

    /// Both ends use a preshared key but hold different values.
    #[error("'{endpoint}' and '{peer}' do not agree on the preshared key")]
    PskValueMismatch {
        /// Declaring endpoint.
        endpoint: String,
        /// Peer endpoint.
        peer: String,
    },

    /// Both ends of a link computed the same tunnel address.
    #[error("'{endpoint}' and '{peer}' have been assigned the same wireguard address {address}; use a single baseIpv4 for the whole fleet")]
    AddressCollision {
        /// Declaring endpoint.
        endpoint: String,
        /// Peer endpoint.
        peer: String,
        /// The shared address.
        address: Ipv4Addr,
    },

    /// An endpoint with links has no key pair resource.
    #[error("wireguard key pair resource not found for '{endpoint}'")]
    KeypairNotFound {
        /// Endpoint missing its key pair.
        endpoint: String,
    },

    /// The fleet definition is inconsistent.
    #[error("invalid fleet definition: {message}")]
    InvalidFleet {
        /// Description of the problem.
        message: String,
    },

    /// The command transport failed before the command could report a status.
    #[error("command on '{endpoint}' failed: {message}")]
    CommandFailed {
        /// Target endpoint.
        endpoint: String,
        /// Transport error.
        message: String,
    },

    /// Resource-state persistence failed.
    #[error("state store error: {message}")]
    State {
        /// Description of the failure.
        message: String,
    },

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors decoding key material printed by the key tool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// Invalid base64 encoding.
    #[error("invalid base64 encoding: {0}")]
    InvalidBase64(String),

    /// Invalid key length.
    #[error("invalid key length: expected 32, got {0}")]
    InvalidKeyLength(usize),

    /// The tool printed fewer tokens than expected.
    #[error("expected 3 keys in tool output, got {0}")]
    MissingKeys(usize),

    /// The public key does not belong to the private key.
    #[error("public key does not match private key")]
    PublicKeyMismatch,
}

impl WgLinksError {
    /// Creates an `InvalidAddress` error.
    #[must_use]
    pub fn invalid_address(
        endpoint: impl Into<String>,
        address: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidAddress {
            endpoint: endpoint.into(),
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `KeyGenerationFailed` error.
    #[must_use]
    pub fn key_generation_failed(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::KeyGenerationFailed {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Creates an `UploadFailed` error.
    #[must_use]
    pub fn upload_failed(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UploadFailed {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Creates an `InvalidFleet` error.
    #[must_use]
    pub fn invalid_fleet(message: impl Into<String>) -> Self {
        Self::InvalidFleet {
            message: message.into(),
        }
    }

    /// Creates a `CommandFailed` error.
    #[must_use]
    pub fn command_failed(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CommandFailed {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Creates a `State` error.
    #[must_use]
    pub fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
        }
    }

    /// Returns `true` for link and addressing problems in the fleet definition.
    #[must_use]
    pub fn is_topology_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidAddress { .. }
                | Self::UnknownPeer { .. }
                | Self::SelfLink { .. }
                | Self::MissingIndex { .. }
                | Self::NonReciprocalLink { .. }
                | Self::PskPolicyMismatch { .. }
                | Self::PskValueMismatch { .. }
                | Self::AddressCollision { .. }
                | Self::InvalidFleet { .. }
        )
    }

    /// Returns `true` for failures while generating or pushing key material.
    #[must_use]
    pub fn is_provisioning_error(&self) -> bool {
        matches!(
            self,
            Self::ToolNotFound { .. }
                | Self::KeyGenerationFailed { .. }
                | Self::UploadFailed { .. }
                | Self::ServiceStopFailed { .. }
                | Self::KeypairNotFound { .. }
                | Self::CommandFailed { .. }
        )
    }
}
