//! Networking utilities for zone placement.
//!
//! This library provides helpers for:
//! - IPv4 CIDR parsing and deterministic next-free-address allocation
//! - Deterministic VNIC link names derived from zone identifiers
//!
//! Everything here is pure: no I/O, no clocks, no randomness.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::ops::RangeInclusive;

use thiserror::Error;

/// Networking errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    /// Malformed CIDR range or dotted-quad address.
    #[error("invalid range: {0}")]
    InvalidRange(String),
}

// ============================================================================
// IPv4 ranges
// ============================================================================

/// Number of addresses after the network address that are held back for the
/// node itself (gateway and host-side interface).
pub const RESERVED_AFTER_NETWORK: u32 = 2;

/// An IPv4 range in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Cidr {
    /// Address as written, before masking.
    address: Ipv4Addr,

    /// Prefix length, 0..=32.
    prefix_len: u8,
}

impl Ipv4Cidr {
    /// Parse from CIDR notation (e.g., "192.168.1.0/24").
    ///
    /// The prefix must be an integer in `[0, 32]` and the address exactly four
    /// decimal octets in `[0, 255]`.
    pub fn from_cidr(s: &str) -> Result<Self, NetworkError> {
        let Some((addr_str, prefix_str)) = s.split_once('/') else {
            return Err(NetworkError::InvalidRange(format!(
                "missing '/' in CIDR: {}",
                s
            )));
        };

        let prefix_len = prefix_str
            .trim()
            .parse::<u8>()
            .ok()
            .filter(|p| *p <= 32)
            .ok_or_else(|| {
                NetworkError::InvalidRange(format!("invalid prefix length: {}", prefix_str))
            })?;

        let address = parse_dotted_quad(addr_str)?;

        Ok(Self {
            address,
            prefix_len,
        })
    }

    /// Prefix length (e.g., 24 for /24).
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Network mask as a 32-bit integer.
    fn mask(&self) -> u32 {
        if self.prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(self.prefix_len))
        }
    }

    /// First address of the range (the network address).
    pub fn network_start(&self) -> u32 {
        u32::from(self.address) & self.mask()
    }

    /// Last address of the range (the broadcast address).
    pub fn network_end(&self) -> u32 {
        self.network_start() | !self.mask()
    }

    /// The inclusive window of addresses that may be handed to zones.
    ///
    /// Below /31 the network address, the two addresses after it and the
    /// broadcast address are excluded. /31 and /32 ranges are point-to-point
    /// (RFC 3021) and every address in them is usable.
    pub fn usable_range(&self) -> RangeInclusive<u32> {
        let start = self.network_start();
        let end = self.network_end();

        if self.prefix_len >= 31 {
            start..=end
        } else {
            // prefix < 31 guarantees end - start >= 3
            (start + 1 + RESERVED_AFTER_NETWORK)..=(end - 1)
        }
    }

    /// Check if an address is within this range.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & self.mask() == self.network_start()
    }

    /// Render an address inside this range with the range's prefix length,
    /// e.g. `10.0.0.5/24`.
    pub fn host_cidr(&self, addr: Ipv4Addr) -> String {
        format!("{}/{}", addr, self.prefix_len)
    }
}

impl std::fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}",
            Ipv4Addr::from(self.network_start()),
            self.prefix_len
        )
    }
}

impl std::str::FromStr for Ipv4Cidr {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_cidr(s)
    }
}

/// Parse a strict dotted-quad address: four decimal octets, each 0..=255.
pub fn parse_dotted_quad(s: &str) -> Result<Ipv4Addr, NetworkError> {
    let invalid = || NetworkError::InvalidRange(format!("invalid IPv4 address: {}", s));

    let octets = s
        .split('.')
        .map(|part| {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            part.parse::<u8>().map_err(|_| invalid())
        })
        .collect::<Result<Vec<u8>, _>>()?;

    let &[a, b, c, d] = octets.as_slice() else {
        return Err(invalid());
    };

    Ok(Ipv4Addr::new(a, b, c, d))
}

/// Find the lowest usable address in `cidr` that is not in `used`.
///
/// Returns `Ok(None)` when every usable address is taken.
pub fn next_available_address(
    cidr: &str,
    used: &HashSet<Ipv4Addr>,
) -> Result<Option<Ipv4Addr>, NetworkError> {
    let range = Ipv4Cidr::from_cidr(cidr)?;
    Ok(next_available_in(&range, used))
}

/// Same as [`next_available_address`] for an already parsed range.
pub fn next_available_in(range: &Ipv4Cidr, used: &HashSet<Ipv4Addr>) -> Option<Ipv4Addr> {
    range
        .usable_range()
        .map(Ipv4Addr::from)
        .find(|addr| !used.contains(addr))
}

// ============================================================================
// VNIC naming
// ============================================================================

/// Number of letters in a derived link name, before the trailing `0`.
pub const LINK_NAME_LETTERS: usize = 6;

const LCG_MULTIPLIER: u32 = 1_664_525;
const LCG_INCREMENT: u32 = 1_013_904_223;

/// Derive a short, stable VNIC link name from an identifier.
///
/// The result is six lowercase ASCII letters followed by a literal `0`
/// (`dladm` requires link names to end in a digit). The same identifier
/// always yields the same name.
pub fn vnic_link_name(identifier: &str) -> String {
    let hash = identifier
        .bytes()
        .fold(0u32, |h, b| h.wrapping_mul(31).wrapping_add(u32::from(b)));

    let mut seed = (hash as i32).unsigned_abs();
    let mut name = String::with_capacity(LINK_NAME_LETTERS + 1);

    for _ in 0..LINK_NAME_LETTERS {
        seed = seed.wrapping_mul(LCG_MULTIPLIER).wrapping_add(LCG_INCREMENT);
        name.push(char::from(b'a' + (seed % 26) as u8));
    }

    name.push('0');
    name
}
