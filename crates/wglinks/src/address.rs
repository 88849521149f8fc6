//! Deterministic tunnel address allocation.
//!
//! Every endpoint's tunnel address is derived from its key pair's base
//! address plus the endpoint's ordinal index. The base is treated as a
//! four-digit base-256 number and the index is added with carry, so repeated
//! passes always produce the same addressing without any allocator state.

use std::fmt;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WgLinksError};

/// Ranges that are not globally reachable (IANA special-purpose registry).
const PRIVATE_V4_RANGES: [Ipv4Net; 14] = [
    Ipv4Net::new_assert(Ipv4Addr::new(0, 0, 0, 0), 8),
    Ipv4Net::new_assert(Ipv4Addr::new(10, 0, 0, 0), 8),
    Ipv4Net::new_assert(Ipv4Addr::new(127, 0, 0, 0), 8),
    Ipv4Net::new_assert(Ipv4Addr::new(169, 254, 0, 0), 16),
    Ipv4Net::new_assert(Ipv4Addr::new(172, 16, 0, 0), 12),
    Ipv4Net::new_assert(Ipv4Addr::new(192, 0, 0, 0), 29),
    Ipv4Net::new_assert(Ipv4Addr::new(192, 0, 0, 170), 31),
    Ipv4Net::new_assert(Ipv4Addr::new(192, 0, 2, 0), 24),
    Ipv4Net::new_assert(Ipv4Addr::new(192, 168, 0, 0), 16),
    Ipv4Net::new_assert(Ipv4Addr::new(198, 18, 0, 0), 15),
    Ipv4Net::new_assert(Ipv4Addr::new(198, 51, 100, 0), 24),
    Ipv4Net::new_assert(Ipv4Addr::new(203, 0, 113, 0), 24),
    Ipv4Net::new_assert(Ipv4Addr::new(240, 0, 0, 0), 4),
    Ipv4Net::new_assert(Ipv4Addr::BROADCAST, 32),
];

/// Returns `true` if `addr` falls in a non-globally-reachable range.
#[must_use]
pub fn is_private(addr: Ipv4Addr) -> bool {
    PRIVATE_V4_RANGES.iter().any(|net| net.contains(&addr))
}

/// Base address of a key pair, as declared.
///
/// Octets are wider than `u8` so that an out-of-range declaration survives
/// deserialization and is reported as an invalid address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BaseIpv4 {
    /// Most significant octet.
    pub a: u16,
    /// Second octet.
    pub b: u16,
    /// Third octet.
    pub c: u16,
    /// Least significant octet.
    pub d: u16,
}

impl BaseIpv4 {
    /// Creates a base from four octets.
    #[must_use]
    pub const fn new(a: u16, b: u16, c: u16, d: u16) -> Self {
        Self { a, b, c, d }
    }

    fn to_ipv4(self) -> Option<Ipv4Addr> {
        Some(Ipv4Addr::new(
            u8::try_from(self.a).ok()?,
            u8::try_from(self.b).ok()?,
            u8::try_from(self.c).ok()?,
            u8::try_from(self.d).ok()?,
        ))
    }
}

impl Default for BaseIpv4 {
    fn default() -> Self {
        Self::new(10, 0, 0, 0)
    }
}

impl From<Ipv4Addr> for BaseIpv4 {
    fn from(addr: Ipv4Addr) -> Self {
        let [a, b, c, d] = addr.octets();
        Self::new(a.into(), b.into(), c.into(), d.into())
    }
}

impl fmt::Display for BaseIpv4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.a, self.b, self.c, self.d)
    }
}

/// Computes the tunnel address `base + offset` for `endpoint`.
///
/// Overflow out of the most significant octet wraps around.
///
/// # Errors
///
/// Returns [`WgLinksError::InvalidAddress`] if the base is not a valid
/// IPv4 address, or if the base or the result is not private.
pub fn allocate(endpoint: &str, base: BaseIpv4, offset: u32) -> Result<Ipv4Addr> {
    let Some(base_addr) = base.to_ipv4() else {
        return Err(WgLinksError::invalid_address(
            endpoint,
            base.to_string(),
            "base ipv4 address is not a valid ipv4 address",
        ));
    };
    if !is_private(base_addr) {
        return Err(WgLinksError::invalid_address(
            endpoint,
            base_addr.to_string(),
            "base ipv4 address is not a private ipv4 address",
        ));
    }

    let [a, b, c, d] = base_addr.octets().map(u64::from);
    let d_sum = d + u64::from(offset);
    let c_sum = c + d_sum / 256;
    let b_sum = b + c_sum / 256;
    let a_sum = a + b_sum / 256;

    let addr = Ipv4Addr::new(
        (a_sum % 256) as u8,
        (b_sum % 256) as u8,
        (c_sum % 256) as u8,
        (d_sum % 256) as u8,
    );

    if !is_private(addr) {
        return Err(WgLinksError::invalid_address(
            endpoint,
            addr.to_string(),
            "generated address is not a private ipv4 address",
        ));
    }

    Ok(addr)
}
