//! Properties attached to entities and edges via tags.
//!
//! A [`Property`] is the payload of an entity tag or edge tag. The `Source`
//! variant is the unit the engine uses for TTL bookkeeping and association
//! confidence; `DnsRecord` preserves raw record data alongside the relation
//! it produced.

use serde::{Deserialize, Serialize};

use crate::relation::DnsHeader;

/// A named value attached to an entity or edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Property {
    /// Plain named string value.
    Simple { name: String, value: String },
    /// Names the plugin/data source that observed the owning entity or edge,
    /// with a confidence in [0, 100].
    Source { source: String, confidence: u8 },
    /// Raw DNS record data kept next to the derived relation.
    DnsRecord { header: DnsHeader, data: String },
}

impl Property {
    /// Convenience constructor for a [`Property::Simple`] value.
    #[must_use]
    pub fn simple(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Simple {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Convenience constructor for a [`Property::Source`] value.
    ///
    /// Confidence is clamped into [0, 100].
    #[must_use]
    pub fn source(source: impl Into<String>, confidence: u8) -> Self {
        Self::Source {
            source: source.into(),
            confidence: confidence.min(100),
        }
    }

    /// The name under which this property is filed and queried.
    ///
    /// `Source` properties always file under the source name; `DnsRecord`
    /// properties under the fixed name `dns_record`.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Simple { name, .. } => name,
            Self::Source { source, .. } => source,
            Self::DnsRecord { .. } => "dns_record",
        }
    }

    /// The string value carried by this property.
    #[must_use]
    pub fn value(&self) -> String {
        match self {
            Self::Simple { value, .. } => value.clone(),
            Self::Source { confidence, .. } => confidence.to_string(),
            Self::DnsRecord { data, .. } => data.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::rr_type;

    #[test]
    fn simple_name_and_value() {
        let p = Property::simple("monitor:dns", "1700000000000");
        assert_eq!(p.name(), "monitor:dns");
        assert_eq!(p.value(), "1700000000000");
    }

    #[test]
    fn source_files_under_source_name() {
        let p = Property::source("rdap", 80);
        assert_eq!(p.name(), "rdap");
        assert_eq!(p.value(), "80");
    }

    #[test]
    fn source_confidence_clamped() {
        let p = Property::source("dns", 150);
        assert!(matches!(p, Property::Source { confidence: 100, .. }));
    }

    #[test]
    fn dns_record_fixed_name() {
        let p = Property::DnsRecord {
            header: DnsHeader::new(rr_type::TXT, 300),
            data: "v=spf1 -all".to_string(),
        };
        assert_eq!(p.name(), "dns_record");
        assert_eq!(p.value(), "v=spf1 -all");
    }

    #[test]
    fn property_json_roundtrip() {
        let p = Property::source("cert", 100);
        let json = serde_json::to_string(&p).expect("serialize");
        let decoded: Property = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(p, decoded);
    }
}
