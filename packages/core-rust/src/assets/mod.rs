//! The typed asset model.
//!
//! Every observable Internet artefact the engine tracks is one variant of
//! [`Asset`]. Identity inside a store is the pair (variant, [`Asset::key`]):
//! creating the same asset twice upserts rather than duplicates.

mod certificate;
mod contact;
mod dns;
mod network;
mod registration;
mod web;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use certificate::TlsCertificate;
pub use contact::{
    ContactRecord, Identifier, IdentifierType, Location, Organization, Person, Phone,
};
pub use dns::Fqdn;
pub use network::{AutonomousSystem, IpAddress, IpType, Netblock};
pub use registration::{AutnumRecord, DomainRecord, IpNetRecord};
pub use web::{Account, File, FundsTransfer, Product, Service, Url};

/// Validation failures raised while constructing asset values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssetError {
    #[error("invalid FQDN: {0}")]
    InvalidFqdn(String),
    #[error("invalid IP address: {0}")]
    InvalidAddress(String),
    #[error("invalid CIDR: {0}")]
    InvalidCidr(String),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("unknown asset type: {0}")]
    UnknownType(String),
}

// ---------------------------------------------------------------------------
// Asset
// ---------------------------------------------------------------------------

/// A typed value representing an observable Internet artefact.
///
/// Adjacently tagged on the wire: `{"type": "fqdn", "value": "a.com"}`.
/// String-backed variants (FQDNs, CIDRs) serialize as their text form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Asset {
    Fqdn(Fqdn),
    IpAddress(IpAddress),
    Netblock(Netblock),
    AutonomousSystem(AutonomousSystem),
    TlsCertificate(TlsCertificate),
    DomainRecord(DomainRecord),
    IpNetRecord(IpNetRecord),
    AutnumRecord(AutnumRecord),
    Url(Url),
    ContactRecord(ContactRecord),
    Organization(Organization),
    Location(Location),
    Identifier(Identifier),
    Service(Service),
    Person(Person),
    Phone(Phone),
    File(File),
    Account(Account),
    Product(Product),
    FundsTransfer(FundsTransfer),
}

impl Asset {
    /// The discriminant of this asset.
    #[must_use]
    pub fn asset_type(&self) -> AssetType {
        match self {
            Self::Fqdn(_) => AssetType::Fqdn,
            Self::IpAddress(_) => AssetType::IpAddress,
            Self::Netblock(_) => AssetType::Netblock,
            Self::AutonomousSystem(_) => AssetType::AutonomousSystem,
            Self::TlsCertificate(_) => AssetType::TlsCertificate,
            Self::DomainRecord(_) => AssetType::DomainRecord,
            Self::IpNetRecord(_) => AssetType::IpNetRecord,
            Self::AutnumRecord(_) => AssetType::AutnumRecord,
            Self::Url(_) => AssetType::Url,
            Self::ContactRecord(_) => AssetType::ContactRecord,
            Self::Organization(_) => AssetType::Organization,
            Self::Location(_) => AssetType::Location,
            Self::Identifier(_) => AssetType::Identifier,
            Self::Service(_) => AssetType::Service,
            Self::Person(_) => AssetType::Person,
            Self::Phone(_) => AssetType::Phone,
            Self::File(_) => AssetType::File,
            Self::Account(_) => AssetType::Account,
            Self::Product(_) => AssetType::Product,
            Self::FundsTransfer(_) => AssetType::FundsTransfer,
        }
    }

    /// The identity key of this asset within its variant.
    ///
    /// Two assets of the same variant with equal keys are the same entity;
    /// the repository upserts on this key.
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::Fqdn(f) => f.name().to_string(),
            Self::IpAddress(ip) => ip.address.to_string(),
            Self::Netblock(nb) => nb.cidr.to_string(),
            Self::AutonomousSystem(asn) => asn.number.to_string(),
            Self::TlsCertificate(cert) => cert.serial_number.clone(),
            Self::DomainRecord(rec) => rec.domain.clone(),
            Self::IpNetRecord(rec) => rec.handle.clone(),
            Self::AutnumRecord(rec) => rec.handle.clone(),
            Self::Url(url) => url.raw.clone(),
            Self::ContactRecord(rec) => rec.discovered_at.clone(),
            Self::Organization(org) => {
                format!("{}|{}", org.name, org.id.as_deref().unwrap_or_default())
            }
            Self::Location(loc) => loc.full_address(),
            Self::Identifier(ident) => format!("{}:{}", ident.id_type.as_str(), ident.id),
            Self::Service(svc) => svc.identifier.clone(),
            Self::Person(p) => p.full_name.clone(),
            Self::Phone(p) => p.raw.clone(),
            Self::File(f) => f.url.clone(),
            Self::Account(a) => a.unique_id.clone(),
            Self::Product(p) => p.unique_id.clone(),
            Self::FundsTransfer(t) => t.unique_id.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// AssetType
// ---------------------------------------------------------------------------

/// Discriminant for [`Asset`] variants; the unit pipelines are keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Fqdn,
    IpAddress,
    Netblock,
    AutonomousSystem,
    TlsCertificate,
    DomainRecord,
    IpNetRecord,
    AutnumRecord,
    Url,
    ContactRecord,
    Organization,
    Location,
    Identifier,
    Service,
    Person,
    Phone,
    File,
    Account,
    Product,
    FundsTransfer,
}

impl AssetType {
    /// Every asset type, in declaration order.
    pub const ALL: [AssetType; 20] = [
        Self::Fqdn,
        Self::IpAddress,
        Self::Netblock,
        Self::AutonomousSystem,
        Self::TlsCertificate,
        Self::DomainRecord,
        Self::IpNetRecord,
        Self::AutnumRecord,
        Self::Url,
        Self::ContactRecord,
        Self::Organization,
        Self::Location,
        Self::Identifier,
        Self::Service,
        Self::Person,
        Self::Phone,
        Self::File,
        Self::Account,
        Self::Product,
        Self::FundsTransfer,
    ];

    /// The stable text name used in queues, configs and transform keys.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fqdn => "fqdn",
            Self::IpAddress => "ip_address",
            Self::Netblock => "netblock",
            Self::AutonomousSystem => "autonomous_system",
            Self::TlsCertificate => "tls_certificate",
            Self::DomainRecord => "domain_record",
            Self::IpNetRecord => "ipnet_record",
            Self::AutnumRecord => "autnum_record",
            Self::Url => "url",
            Self::ContactRecord => "contact_record",
            Self::Organization => "organization",
            Self::Location => "location",
            Self::Identifier => "identifier",
            Self::Service => "service",
            Self::Person => "person",
            Self::Phone => "phone",
            Self::File => "file",
            Self::Account => "account",
            Self::Product => "product",
            Self::FundsTransfer => "funds_transfer",
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetType {
    type Err = AssetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| AssetError::UnknownType(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_per_variant() {
        let fqdn = Asset::Fqdn(Fqdn::new("owasp.org").expect("valid"));
        assert_eq!(fqdn.key(), "owasp.org");

        let ip = Asset::IpAddress(IpAddress::parse("8.8.8.8").expect("valid"));
        assert_eq!(ip.key(), "8.8.8.8");

        let asn = Asset::AutonomousSystem(AutonomousSystem::new(15169));
        assert_eq!(asn.key(), "15169");

        let org = Asset::Organization(Organization {
            name: "OWASP Foundation".to_string(),
            id: Some("81-3672779".to_string()),
        });
        assert_eq!(org.key(), "OWASP Foundation|81-3672779");

        let org_no_id = Asset::Organization(Organization::new("OWASP Foundation"));
        assert_eq!(org_no_id.key(), "OWASP Foundation|");

        let ident = Asset::Identifier(Identifier::email("info@owasp.org"));
        assert_eq!(ident.key(), "email_address:info@owasp.org");
    }

    #[test]
    fn asset_type_matches_variant() {
        let nb = Asset::Netblock(Netblock::parse("8.8.8.0/24").expect("valid"));
        assert_eq!(nb.asset_type(), AssetType::Netblock);
    }

    #[test]
    fn asset_type_text_roundtrip() {
        for t in AssetType::ALL {
            let parsed: AssetType = t.as_str().parse().expect("roundtrip");
            assert_eq!(parsed, t);
        }
        assert!("no_such_type".parse::<AssetType>().is_err());
    }

    #[test]
    fn asset_json_is_tagged() {
        let asset = Asset::Fqdn(Fqdn::new("example.com").expect("valid"));
        let json = serde_json::to_value(&asset).expect("serialize");
        assert_eq!(json["type"], "fqdn");
        assert_eq!(json["value"], "example.com");
        let decoded: Asset = serde_json::from_value(json).expect("deserialize");
        assert_eq!(decoded, asset);

        let ip = Asset::IpAddress(IpAddress::parse("8.8.8.8").expect("valid"));
        let json = serde_json::to_value(&ip).expect("serialize");
        assert_eq!(json["type"], "ip_address");
        let decoded: Asset = serde_json::from_value(json).expect("deserialize");
        assert_eq!(decoded, ip);
    }
}
