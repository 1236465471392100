//! Registry-level assets: WHOIS domain records and RIR network/ASN records.
//!
//! Date fields hold the registry's textual timestamps as observed; parsing
//! them is the protocol client's concern, not the model's.

use serde::{Deserialize, Serialize};

/// WHOIS registration record for a domain.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DomainRecord {
    /// The registered domain this record describes.
    pub domain: String,
    pub registrar: String,
    pub whois_server: String,
    pub created_date: String,
    pub updated_date: String,
    pub expiration_date: String,
    /// EPP status codes as reported.
    pub status: Vec<String>,
    pub dnssec: bool,
    pub name_servers: Vec<String>,
}

/// RIR registration record for an address block.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IpNetRecord {
    /// Registry handle; the record's identity.
    pub handle: String,
    pub cidr: String,
    pub start_address: String,
    pub end_address: String,
    pub record_type: String,
    pub name: String,
    pub country: String,
    pub parent_handle: String,
    pub whois_server: String,
    pub created_date: String,
    pub updated_date: String,
    pub status: Vec<String>,
}

/// RIR registration record for an autonomous system.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AutnumRecord {
    /// Registry handle; the record's identity.
    pub handle: String,
    pub number: u32,
    pub name: String,
    pub whois_server: String,
    pub created_date: String,
    pub updated_date: String,
    pub status: Vec<String>,
}
