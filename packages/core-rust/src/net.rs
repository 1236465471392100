//! CIDR prefix arithmetic on `std::net` address types.
//!
//! The engine needs containment tests, prefix normalization, and bounded
//! neighbour enumeration for address sweeps. Both families are handled
//! through 128-bit integer math; IPv4 addresses occupy the low 32 bits.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while parsing or constructing a [`Cidr`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CidrError {
    #[error("malformed CIDR (expected address/prefix): {0}")]
    Malformed(String),
    #[error("invalid address in CIDR: {0}")]
    Address(String),
    #[error("prefix length {len} out of range for {family}")]
    PrefixLength { len: u8, family: &'static str },
}

/// An IP prefix in canonical form: host bits are always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cidr {
    network: IpAddr,
    prefix_len: u8,
}

/// Widens an address to its 128-bit integer form.
fn addr_to_bits(addr: IpAddr) -> u128 {
    match addr {
        IpAddr::V4(v4) => u128::from(u32::from(v4)),
        IpAddr::V6(v6) => u128::from(v6),
    }
}

/// Narrows 128-bit integer form back to an address of the given family.
#[allow(clippy::cast_possible_truncation)]
fn bits_to_addr(bits: u128, v4: bool) -> IpAddr {
    if v4 {
        IpAddr::V4(Ipv4Addr::from(bits as u32))
    } else {
        IpAddr::V6(Ipv6Addr::from(bits))
    }
}

/// The family-specific address width in bits.
fn family_bits(addr: IpAddr) -> u8 {
    if addr.is_ipv4() {
        32
    } else {
        128
    }
}

impl Cidr {
    /// Builds a prefix from an address and length, zeroing host bits.
    ///
    /// # Errors
    ///
    /// Returns [`CidrError::PrefixLength`] when `prefix_len` exceeds the
    /// family width.
    pub fn new(addr: IpAddr, prefix_len: u8) -> Result<Self, CidrError> {
        let width = family_bits(addr);
        if prefix_len > width {
            return Err(CidrError::PrefixLength {
                len: prefix_len,
                family: if width == 32 { "IPv4" } else { "IPv6" },
            });
        }
        let bits = addr_to_bits(addr);
        let masked = bits & Self::mask(prefix_len, width);
        Ok(Self {
            network: bits_to_addr(masked, width == 32),
            prefix_len,
        })
    }

    fn mask(prefix_len: u8, width: u8) -> u128 {
        if prefix_len == 0 {
            0
        } else {
            let host = u32::from(width - prefix_len);
            (!0u128).checked_shl(host).unwrap_or(0) & Self::family_mask(width)
        }
    }

    fn family_mask(width: u8) -> u128 {
        if width == 32 {
            u128::from(u32::MAX)
        } else {
            u128::MAX
        }
    }

    /// The network address with host bits zeroed.
    #[must_use]
    pub fn network(&self) -> IpAddr {
        self.network
    }

    /// The prefix length in bits.
    #[must_use]
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Whether this is an IPv4 prefix.
    #[must_use]
    pub fn is_ipv4(&self) -> bool {
        self.network.is_ipv4()
    }

    /// Whether `addr` falls inside this prefix. Addresses of the other
    /// family never match.
    #[must_use]
    pub fn contains(&self, addr: IpAddr) -> bool {
        if addr.is_ipv4() != self.network.is_ipv4() {
            return false;
        }
        let width = family_bits(addr);
        let mask = Self::mask(self.prefix_len, width);
        addr_to_bits(addr) & mask == addr_to_bits(self.network)
    }

    /// Whether `other` is fully covered by this prefix.
    #[must_use]
    pub fn covers(&self, other: &Cidr) -> bool {
        self.prefix_len <= other.prefix_len && self.contains(other.network)
    }

    /// The first address of the prefix (the network address itself).
    #[must_use]
    pub fn first(&self) -> IpAddr {
        self.network
    }

    /// The last address of the prefix.
    #[must_use]
    pub fn last(&self) -> IpAddr {
        let width = family_bits(self.network);
        let host = u32::from(width - self.prefix_len);
        let span = if host >= 128 {
            u128::MAX
        } else {
            (1u128 << host) - 1
        };
        bits_to_addr(
            addr_to_bits(self.network) | span,
            self.network.is_ipv4(),
        )
    }
}

impl FromStr for Cidr {
    type Err = CidrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr_part, len_part) = s
            .split_once('/')
            .ok_or_else(|| CidrError::Malformed(s.to_string()))?;
        let addr: IpAddr = addr_part
            .trim()
            .parse()
            .map_err(|_| CidrError::Address(addr_part.to_string()))?;
        let prefix_len: u8 = len_part
            .trim()
            .parse()
            .map_err(|_| CidrError::Malformed(s.to_string()))?;
        Self::new(addr, prefix_len)
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

impl TryFrom<String> for Cidr {
    type Error = CidrError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Cidr> for String {
    fn from(value: Cidr) -> Self {
        value.to_string()
    }
}

/// Enumerates up to `max` neighbour addresses of `ip` inside `cidr`,
/// alternating outwards (ip+1, ip-1, ip+2, ...) and never emitting `ip`
/// itself, the network address, or addresses outside the prefix.
#[must_use]
pub fn neighbors(ip: IpAddr, cidr: &Cidr, max: usize) -> Vec<IpAddr> {
    if max == 0 || !cidr.contains(ip) {
        return Vec::new();
    }
    let v4 = ip.is_ipv4();
    let center = addr_to_bits(ip);
    let low = addr_to_bits(cidr.first());
    let high = addr_to_bits(cidr.last());

    let mut out = Vec::with_capacity(max);
    let mut offset: u128 = 1;
    while out.len() < max {
        let above = center.checked_add(offset).filter(|b| *b <= high);
        // The network address itself is never a host worth probing.
        let below = center.checked_sub(offset).filter(|b| *b > low);
        if above.is_none() && below.is_none() {
            break;
        }
        if let Some(bits) = above {
            out.push(bits_to_addr(bits, v4));
        }
        if out.len() < max {
            if let Some(bits) = below {
                out.push(bits_to_addr(bits, v4));
            }
        }
        offset += 1;
    }
    out
}
