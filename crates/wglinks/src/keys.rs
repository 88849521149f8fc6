//! `WireGuard` key types.
//!
//! Key material is produced by the external `wg` tool and stored as opaque
//! base64 strings. These types only exist to check that what the tool printed
//! is usable before it is pushed to a machine.

use std::fmt;

use base64::Engine;
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use crate::error::KeyError;

/// `WireGuard` key size in bytes (256-bit Curve25519 keys).
pub const KEY_SIZE: usize = 32;

fn decode_key(s: &str) -> Result<[u8; KEY_SIZE], KeyError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(s.trim())
        .map_err(|e| KeyError::InvalidBase64(e.to_string()))?;
    if bytes.len() != KEY_SIZE {
        return Err(KeyError::InvalidKeyLength(bytes.len()));
    }
    let mut arr = [0u8; KEY_SIZE];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

fn encode_key(bytes: &[u8; KEY_SIZE]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// A `WireGuard` public key (Curve25519, 32 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; KEY_SIZE]);

impl PublicKey {
    /// Decodes a public key from base64.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not valid base64 or wrong length.
    pub fn from_base64(s: &str) -> Result<Self, KeyError> {
        decode_key(s).map(Self)
    }

    /// Encodes the key as base64.
    #[must_use]
    pub fn to_base64(&self) -> String {
        encode_key(&self.0)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b64 = self.to_base64();
        let short = &b64[..8.min(b64.len())];
        write!(f, "PublicKey({short}...)")
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base64())
    }
}

/// A `WireGuard` private key (Curve25519, 32 bytes).
#[derive(Clone)]
pub struct PrivateKey([u8; KEY_SIZE]);

impl PrivateKey {
    /// Creates a private key from a 32-byte array.
    #[must_use]
    pub const fn from_bytes_array(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Decodes a private key from base64.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not valid base64 or wrong length.
    pub fn from_base64(s: &str) -> Result<Self, KeyError> {
        decode_key(s).map(Self)
    }

    /// Encodes the key as base64.
    #[must_use]
    pub fn to_base64(&self) -> String {
        encode_key(&self.0)
    }

    /// Derives the corresponding public key, as `wg pubkey` does.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        let secret = StaticSecret::from(self.0);
        PublicKey(*X25519PublicKey::from(&secret).as_bytes())
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey([REDACTED])")
    }
}

impl PartialEq for PrivateKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for PrivateKey {}

/// A `WireGuard` preshared key (32 bytes).
#[derive(Clone)]
pub struct PresharedKey([u8; KEY_SIZE]);

impl PresharedKey {
    /// Creates a preshared key from a 32-byte array.
    #[must_use]
    pub const fn from_bytes_array(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Decodes a preshared key from base64.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not valid base64 or wrong length.
    pub fn from_base64(s: &str) -> Result<Self, KeyError> {
        decode_key(s).map(Self)
    }

    /// Encodes the key as base64.
    #[must_use]
    pub fn to_base64(&self) -> String {
        encode_key(&self.0)
    }
}

impl fmt::Debug for PresharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresharedKey").field("key", &"[REDACTED]").finish()
    }
}

impl PartialEq for PresharedKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for PresharedKey {}

/// A freshly generated key triple.
#[derive(Clone, PartialEq, Eq)]
pub struct GeneratedKeys {
    /// Private key.
    pub private: PrivateKey,
    /// Public key derived from `private`.
    pub public: PublicKey,
    /// Independently generated preshared key.
    pub psk: PresharedKey,
}

impl GeneratedKeys {
    /// Builds a consistent triple from a private key and a preshared key.
    #[must_use]
    pub fn new(private: PrivateKey, psk: PresharedKey) -> Self {
        let public = private.public_key();
        Self {
            private,
            public,
            psk,
        }
    }

    /// Parses the `"$PRV $PUB $PSK"` line printed by the generation script.
    ///
    /// # Errors
    ///
    /// Returns an error if fewer than three tokens are present, a token is
    /// not a 32-byte base64 key, or the public key does not match the
    /// private key.
    pub fn parse(output: &str) -> Result<Self, KeyError> {
        let tokens: Vec<&str> = output.split_whitespace().collect();
        let [private, public, psk, ..] = tokens.as_slice() else {
            return Err(KeyError::MissingKeys(tokens.len()));
        };

        let private = PrivateKey::from_base64(private)?;
        let public = PublicKey::from_base64(public)?;
        let psk = PresharedKey::from_base64(psk)?;

        if private.public_key() != public {
            return Err(KeyError::PublicKeyMismatch);
        }

        Ok(Self {
            private,
            public,
            psk,
        })
    }

    /// Renders the triple the way the generation script prints it.
    #[must_use]
    pub fn to_line(&self) -> String {
        format!(
            "{} {} {}",
            self.private.to_base64(),
            self.public.to_base64(),
            self.psk.to_base64()
        )
    }
}

impl fmt::Debug for GeneratedKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedKeys")
            .field("private", &"[REDACTED]")
            .field("public", &self.public)
            .field("psk", &"[REDACTED]")
            .finish()
    }
}
