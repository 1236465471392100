//! Surveyor Core -- the typed asset model and its supporting primitives.
//!
//! This crate provides the foundation layer for the attack-surface mapper:
//!
//! - **Assets** ([`assets`]): every artefact variant the engine tracks, with
//!   per-variant identity keys
//! - **Relations** ([`relation`]): directed typed edges, including DNS
//!   record relations with their headers
//! - **Properties** ([`property`]): tag payloads, including source
//!   provenance with confidence
//! - **Graph records** ([`graph`]): `Entity`, `Edge`, `EntityTag`, `EdgeTag`
//! - **Net** ([`net`]): CIDR arithmetic and neighbour enumeration
//! - **Similarity** ([`similarity`]): Smith-Waterman-Gotoh scoring for
//!   scope matching
//! - **Time** ([`time`]): UTC-millis timestamps

pub mod assets;
pub mod graph;
pub mod net;
pub mod property;
pub mod relation;
pub mod similarity;
pub mod time;

// Assets
pub use assets::{
    Account, Asset, AssetError, AssetType, AutnumRecord, AutonomousSystem, ContactRecord,
    DomainRecord, File, Fqdn, FundsTransfer, Identifier, IdentifierType, IpAddress, IpNetRecord,
    IpType, Location, Netblock, Organization, Person, Phone, Product, Service, TlsCertificate,
    Url,
};

// Graph records
pub use graph::{Edge, EdgeTag, Entity, EntityTag};

// Net
pub use net::{neighbors, Cidr, CidrError};

// Properties and relations
pub use property::Property;
pub use relation::{label, rr_type, DnsHeader, Relation};

// Similarity
pub use similarity::{swg_accuracy, swg_similarity};

// Time
pub use time::{now_millis, UnixMillis};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }

    /// Verify all re-exports are accessible from the crate root.
    #[test]
    fn reexports_accessible() {
        let fqdn = Fqdn::new("example.com").expect("valid");
        let _ = Asset::Fqdn(fqdn);
        let _ = Relation::simple(label::CONTAINS);
        let _ = Property::source("dns", 100);
        let _: Cidr = "10.0.0.0/8".parse().expect("valid");
        let _ = swg_similarity("a", "b");
        let _ = now_millis();
    }
}
