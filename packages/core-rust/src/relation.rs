//! Directed, typed relations between graph entities.
//!
//! Every edge in the asset graph carries exactly one [`Relation`]. Plain
//! ownership/containment edges use [`Relation::Simple`]; DNS resource records
//! keep their header data so resolvers can be replayed from the graph alone.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DNS resource-record constants
// ---------------------------------------------------------------------------

/// DNS resource-record type codes used across the engine.
///
/// Values match RFC 1035 / RFC 2782 assignments.
pub mod rr_type {
    pub const A: u16 = 1;
    pub const NS: u16 = 2;
    pub const CNAME: u16 = 5;
    pub const PTR: u16 = 12;
    pub const MX: u16 = 15;
    pub const TXT: u16 = 16;
    pub const AAAA: u16 = 28;
    pub const SRV: u16 = 33;
}

/// Header fields shared by every DNS-derived relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DnsHeader {
    /// Resource-record type code (see [`rr_type`]).
    pub rr_type: u16,
    /// Record class; 1 (IN) for everything this engine observes.
    pub class: u16,
    /// Record time-to-live in seconds as served by the resolver.
    pub ttl: u32,
}

impl DnsHeader {
    /// Creates an IN-class header for the given RR type and TTL.
    #[must_use]
    pub fn new(rr_type: u16, ttl: u32) -> Self {
        Self {
            rr_type,
            class: 1,
            ttl,
        }
    }
}

// ---------------------------------------------------------------------------
// Relation
// ---------------------------------------------------------------------------

/// A typed, directed relation between two entities.
///
/// Sealed sum type: matching on the variant recovers the full record data
/// without downcasting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Relation {
    /// Named edge with no further payload (`contains`, `announces`,
    /// `registration`, `associated_with`, ...).
    Simple {
        name: String,
    },
    /// Ordinary DNS record (A, AAAA, PTR, CNAME, TXT, ...).
    BasicDns {
        header: DnsHeader,
        name: String,
    },
    /// Preference-carrying DNS record (MX, NS-like).
    PrefDns {
        header: DnsHeader,
        name: String,
        preference: u16,
    },
    /// SRV record with priority, weight and port.
    SrvDns {
        header: DnsHeader,
        name: String,
        priority: u16,
        weight: u16,
        port: u16,
    },
}

impl Relation {
    /// Convenience constructor for a [`Relation::Simple`] edge.
    #[must_use]
    pub fn simple(name: impl Into<String>) -> Self {
        Self::Simple { name: name.into() }
    }

    /// Convenience constructor for a basic DNS record relation.
    #[must_use]
    pub fn basic_dns(name: impl Into<String>, rr_type: u16, ttl: u32) -> Self {
        Self::BasicDns {
            header: DnsHeader::new(rr_type, ttl),
            name: name.into(),
        }
    }

    /// The human-readable label of this relation, used for edge filtering
    /// and graph projection.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Simple { name }
            | Self::BasicDns { name, .. }
            | Self::PrefDns { name, .. }
            | Self::SrvDns { name, .. } => name,
        }
    }

    /// The DNS header when this relation was derived from a resource record.
    #[must_use]
    pub fn dns_header(&self) -> Option<&DnsHeader> {
        match self {
            Self::Simple { .. } => None,
            Self::BasicDns { header, .. }
            | Self::PrefDns { header, .. }
            | Self::SrvDns { header, .. } => Some(header),
        }
    }
}

/// Well-known simple-relation labels.
///
/// Collected in one place so plugins and the projection layer agree on
/// spelling.
pub mod label {
    pub const CONTAINS: &str = "contains";
    pub const ANNOUNCES: &str = "announces";
    pub const REGISTRATION: &str = "registration";
    pub const ASSOCIATED_WITH: &str = "associated_with";
    pub const CERTIFICATE: &str = "certificate";
    pub const NODE: &str = "node";
    pub const PORT: &str = "port";
    pub const SERVICE: &str = "service";
    pub const ORGANIZATION: &str = "organization";
    pub const LOCATION: &str = "location";
    pub const EMAIL: &str = "email";
    pub const PHONE: &str = "phone";
    pub const ID: &str = "id";
    pub const REGISTRANT_CONTACT: &str = "registrant_contact";
    pub const ADMIN_CONTACT: &str = "admin_contact";
    pub const TECHNICAL_CONTACT: &str = "technical_contact";
    pub const BILLING_CONTACT: &str = "billing_contact";
    pub const ABUSE_CONTACT: &str = "abuse_contact";
    pub const SUBJECT_CONTACT: &str = "subject_contact";
    pub const ISSUER_CONTACT: &str = "issuer_contact";
    pub const COMMON_NAME: &str = "common_name";
    pub const SAN_DNS_NAME: &str = "san_dns_name";
    pub const SAN_IP_ADDRESS: &str = "san_ip_address";
    pub const SAN_URL: &str = "san_url";
    pub const OCSP_SERVER: &str = "ocsp_server";
    pub const ISSUING_CERTIFICATE_URL: &str = "issuing_certificate_url";
    pub const DNS_RECORD: &str = "dns_record";
    pub const PTR_RECORD: &str = "ptr_record";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_label() {
        let rel = Relation::simple(label::CONTAINS);
        assert_eq!(rel.label(), "contains");
        assert!(rel.dns_header().is_none());
    }

    #[test]
    fn basic_dns_carries_header() {
        let rel = Relation::basic_dns("a_record", rr_type::A, 300);
        assert_eq!(rel.label(), "a_record");
        let header = rel.dns_header().expect("header");
        assert_eq!(header.rr_type, rr_type::A);
        assert_eq!(header.class, 1);
        assert_eq!(header.ttl, 300);
    }

    #[test]
    fn srv_dns_full_fields() {
        let rel = Relation::SrvDns {
            header: DnsHeader::new(rr_type::SRV, 60),
            name: "srv_record".to_string(),
            priority: 10,
            weight: 5,
            port: 5060,
        };
        assert_eq!(rel.label(), "srv_record");
        assert_eq!(rel.dns_header().map(|h| h.rr_type), Some(rr_type::SRV));
    }

    #[test]
    fn relation_json_roundtrip() {
        let rel = Relation::PrefDns {
            header: DnsHeader::new(rr_type::MX, 3600),
            name: "mx_record".to_string(),
            preference: 10,
        };
        let json = serde_json::to_string(&rel).expect("serialize");
        let decoded: Relation = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(rel, decoded);
    }
}
