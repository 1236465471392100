//! Collaborator traits for external protocol clients.
//!
//! Concrete DNS resolvers, WHOIS/RDAP clients, TLS fetchers and BGP-WHOIS
//! clients are wired in by the embedding binary; the engine sees only
//! these capabilities. Tests implement them over fixed fixtures.

use std::net::IpAddr;

use async_trait::async_trait;
use surveyor_core::{AutnumRecord, Cidr, DomainRecord, IpNetRecord, Location, TlsCertificate};

/// One DNS resource record as returned by the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    pub rr_type: u16,
    pub ttl: u32,
    /// Record data: an address for A/AAAA, a target name for
    /// CNAME/NS/PTR/MX/SRV, free text for TXT.
    pub data: String,
}

/// Abstract DNS resolution capability.
#[async_trait]
pub trait DnsResolver: Send + Sync {
    /// Looks up records of one type for one name. An empty result means
    /// NXDOMAIN/NODATA; transport failures surface as errors.
    async fn lookup(&self, name: &str, rr_type: u16) -> anyhow::Result<Vec<DnsRecord>>;
}

/// Which contact role a registry record entry fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactKind {
    Registrant,
    Admin,
    Technical,
    Billing,
    Abuse,
}

impl ContactKind {
    /// The edge label linking a registration record to this contact.
    #[must_use]
    pub fn edge_label(self) -> &'static str {
        match self {
            Self::Registrant => surveyor_core::label::REGISTRANT_CONTACT,
            Self::Admin => surveyor_core::label::ADMIN_CONTACT,
            Self::Technical => surveyor_core::label::TECHNICAL_CONTACT,
            Self::Billing => surveyor_core::label::BILLING_CONTACT,
            Self::Abuse => surveyor_core::label::ABUSE_CONTACT,
        }
    }
}

/// Contact details attached to a registry record.
#[derive(Debug, Clone, Default)]
pub struct ContactDetails {
    pub organization: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub location: Option<Location>,
}

/// A registry answer: the typed record plus its contacts.
#[derive(Debug, Clone)]
pub enum RegistryRecord {
    Domain {
        record: DomainRecord,
        contacts: Vec<(ContactKind, ContactDetails)>,
    },
    Autnum {
        record: AutnumRecord,
        contacts: Vec<(ContactKind, ContactDetails)>,
    },
    IpNet {
        record: IpNetRecord,
        contacts: Vec<(ContactKind, ContactDetails)>,
    },
}

/// Abstract WHOIS/RDAP capability.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// The registration record for a registered domain, if the registry
    /// knows one.
    async fn domain(&self, domain: &str) -> anyhow::Result<Option<RegistryRecord>>;

    /// The RIR record for an autonomous system.
    async fn autnum(&self, asn: u32) -> anyhow::Result<Option<RegistryRecord>>;

    /// The RIR record for an address block.
    async fn ipnet(&self, cidr: &Cidr) -> anyhow::Result<Option<RegistryRecord>>;
}

/// Abstract TLS certificate retrieval capability.
///
/// Implementations fetch and parse the peer chain; the engine receives
/// already-structured certificates.
#[async_trait]
pub trait CertSource: Send + Sync {
    async fn certificates(&self, host: &str, port: u16) -> anyhow::Result<Vec<TlsCertificate>>;
}

/// One BGP announcement covering an address.
#[derive(Debug, Clone)]
pub struct BgpAnnouncement {
    pub asn: u32,
    pub prefix: Cidr,
    pub cc: String,
    pub registry: String,
    pub allocated: String,
    pub as_name: String,
}

/// Abstract BGP-WHOIS capability.
#[async_trait]
pub trait BgpClient: Send + Sync {
    /// The announcement containing `addr`, if one is visible.
    async fn announcement(&self, addr: IpAddr) -> anyhow::Result<Option<BgpAnnouncement>>;
}
