//! Network-layer assets: addresses, netblocks, autonomous systems.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use super::AssetError;
use crate::net::Cidr;

/// Address family discriminant carried alongside addresses and netblocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IpType {
    V4,
    V6,
}

impl IpType {
    /// The family of a parsed address.
    #[must_use]
    pub fn of(addr: IpAddr) -> Self {
        if addr.is_ipv4() {
            Self::V4
        } else {
            Self::V6
        }
    }
}

/// A single observed IP address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IpAddress {
    pub address: IpAddr,
    pub ip_type: IpType,
}

impl IpAddress {
    /// Builds an address asset, deriving the family from the address.
    #[must_use]
    pub fn new(address: IpAddr) -> Self {
        Self {
            address,
            ip_type: IpType::of(address),
        }
    }

    /// Parses the textual form.
    ///
    /// # Errors
    ///
    /// Returns [`AssetError::InvalidAddress`] when the text is not an IP
    /// address.
    pub fn parse(raw: &str) -> Result<Self, AssetError> {
        raw.trim()
            .parse::<IpAddr>()
            .map(Self::new)
            .map_err(|_| AssetError::InvalidAddress(raw.to_string()))
    }
}

/// An announced or allocated address block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Netblock {
    pub cidr: Cidr,
    pub ip_type: IpType,
}

impl Netblock {
    /// Builds a netblock asset, deriving the family from the prefix.
    #[must_use]
    pub fn new(cidr: Cidr) -> Self {
        let ip_type = if cidr.is_ipv4() { IpType::V4 } else { IpType::V6 };
        Self { cidr, ip_type }
    }

    /// Parses CIDR text.
    ///
    /// # Errors
    ///
    /// Returns [`AssetError::InvalidCidr`] when the text is not a CIDR.
    pub fn parse(raw: &str) -> Result<Self, AssetError> {
        raw.parse::<Cidr>()
            .map(Self::new)
            .map_err(|e| AssetError::InvalidCidr(e.to_string()))
    }
}

/// An autonomous system identified by its number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AutonomousSystem {
    pub number: u32,
}

impl AutonomousSystem {
    #[must_use]
    pub fn new(number: u32) -> Self {
        Self { number }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_family_derived() {
        let v4 = IpAddress::parse("205.251.199.98").expect("valid");
        assert_eq!(v4.ip_type, IpType::V4);
        let v6 = IpAddress::parse("2001:db8::1").expect("valid");
        assert_eq!(v6.ip_type, IpType::V6);
    }

    #[test]
    fn address_rejects_text() {
        assert!(IpAddress::parse("not.an.ip").is_err());
    }

    #[test]
    fn netblock_normalizes() {
        let nb = Netblock::parse("8.8.8.8/24").expect("valid");
        assert_eq!(nb.cidr.to_string(), "8.8.8.0/24");
        assert_eq!(nb.ip_type, IpType::V4);
    }
}
