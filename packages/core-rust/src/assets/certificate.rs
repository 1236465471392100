//! TLS certificate asset.
//!
//! The fields mirror what the certificate collaborator extracts from a
//! parsed X.509 document; the serial number is the identity.

use serde::{Deserialize, Serialize};

/// An observed TLS certificate.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TlsCertificate {
    /// Hex serial number; the certificate's identity in the graph.
    pub serial_number: String,
    pub version: u8,
    pub subject_common_name: String,
    pub issuer_common_name: String,
    pub not_before: String,
    pub not_after: String,
    /// DNS names from the subject-alternative-name extension.
    pub san_dns_names: Vec<String>,
    /// IP addresses from the subject-alternative-name extension.
    pub san_ip_addresses: Vec<String>,
    /// URIs from the subject-alternative-name extension.
    pub san_urls: Vec<String>,
    pub ocsp_servers: Vec<String>,
    pub issuing_certificate_urls: Vec<String>,
    pub signature_algorithm: String,
    pub is_ca: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn certificate_roundtrip() {
        let cert = TlsCertificate {
            serial_number: "04:2f:91".to_string(),
            version: 3,
            subject_common_name: "*.example.com".to_string(),
            issuer_common_name: "R11".to_string(),
            san_dns_names: vec!["example.com".to_string(), "*.example.com".to_string()],
            ocsp_servers: vec!["http://ocsp.example-ca.org".to_string()],
            ..TlsCertificate::default()
        };
        let json = serde_json::to_string(&cert).expect("serialize");
        let decoded: TlsCertificate = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(cert, decoded);
    }
}
