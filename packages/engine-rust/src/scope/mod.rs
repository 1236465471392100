//! Scope membership: which assets belong to the target of a run.
//!
//! The scope holds registered domains, CIDRs, addresses, ASNs,
//! organization names and locations behind one lock. Admission rejects the
//! privacy-service junk registries put into redacted records, and
//! `is_asset_in_scope` reduces every asset variant to one of the held set
//! kinds before testing.

mod association;

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::OnceLock;

use parking_lot::RwLock;
use regex::Regex;
use surveyor_core::{swg_accuracy, Asset, Cidr, Fqdn};

pub use association::{is_associated, Association, AssociationRequest};

use crate::config::ScopeSeed;

/// Markers of privacy-service boilerplate rather than real registrant
/// data, matched case-insensitively anywhere in the field.
fn junk_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            "(?i)redact|privacy|registration|proxy|liability|masked|obscured|withheld|protected|statutory",
        )
        .expect("static pattern")
    })
}

/// Result of a scope membership test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScopeMatch {
    pub matched: bool,
    /// Accuracy in [0, 100]; exact hits score 100.
    pub accuracy: f64,
}

impl ScopeMatch {
    const MISS: Self = Self {
        matched: false,
        accuracy: 0.0,
    };

    const HIT: Self = Self {
        matched: true,
        accuracy: 100.0,
    };
}

#[derive(Default)]
struct ScopeInner {
    domains: HashSet<String>,
    cidrs: Vec<Cidr>,
    addresses: HashSet<IpAddr>,
    asns: HashSet<u32>,
    organizations: Vec<String>,
    locations: Vec<String>,
}

/// The session's in-scope identifier sets.
pub struct Scope {
    inner: RwLock<ScopeInner>,
}

/// Whether a free-text field is privacy-service boilerplate.
fn is_junk_field(text: &str) -> bool {
    junk_pattern().is_match(text)
}

impl Scope {
    /// Creates an empty scope.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(ScopeInner::default()),
        }
    }

    /// Builds a scope from the configuration seed, skipping entries that
    /// fail to parse.
    #[must_use]
    pub fn from_seed(seed: &ScopeSeed) -> Self {
        let scope = Self::new();
        for domain in &seed.domains {
            if let Ok(fqdn) = Fqdn::new(domain) {
                scope.add_fqdn(&fqdn);
            }
        }
        for cidr in &seed.cidrs {
            if let Ok(parsed) = cidr.parse::<Cidr>() {
                scope.add_cidr(parsed);
            }
        }
        for address in &seed.addresses {
            if let Ok(parsed) = address.parse::<IpAddr>() {
                scope.add_address(parsed);
            }
        }
        for asn in &seed.asns {
            scope.add_asn(*asn);
        }
        for org in &seed.organizations {
            scope.add_organization(org);
        }
        scope
    }

    /// Adds an asset to scope, dispatching on variant. Returns whether
    /// anything new was admitted.
    pub fn add(&self, asset: &Asset) -> bool {
        match asset {
            Asset::Fqdn(fqdn) => self.add_fqdn(fqdn),
            Asset::IpAddress(ip) => self.add_address(ip.address),
            Asset::Netblock(nb) => self.add_cidr(nb.cidr),
            Asset::AutonomousSystem(asn) => self.add_asn(asn.number),
            Asset::Organization(org) => self.add_organization(&org.name),
            Asset::Location(loc) => self.add_location(&loc.full_address()),
            Asset::DomainRecord(rec) => match Fqdn::new(&rec.domain) {
                Ok(fqdn) => self.add_fqdn(&fqdn),
                Err(_) => false,
            },
            _ => false,
        }
    }

    /// Admits a registered domain. Subdomains are rejected; scope growth
    /// happens at the registrable boundary only.
    pub fn add_fqdn(&self, fqdn: &Fqdn) -> bool {
        if !fqdn.is_registered_domain() {
            return false;
        }
        self.inner.write().domains.insert(fqdn.name().to_string())
    }

    pub fn add_cidr(&self, cidr: Cidr) -> bool {
        let mut inner = self.inner.write();
        if inner.cidrs.contains(&cidr) {
            false
        } else {
            inner.cidrs.push(cidr);
            true
        }
    }

    pub fn add_address(&self, address: IpAddr) -> bool {
        self.inner.write().addresses.insert(address)
    }

    pub fn add_asn(&self, asn: u32) -> bool {
        self.inner.write().asns.insert(asn)
    }

    /// Admits an organization name unless it is privacy-service junk.
    pub fn add_organization(&self, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() || is_junk_field(name) {
            return false;
        }
        let mut inner = self.inner.write();
        if inner.organizations.iter().any(|o| o.eq_ignore_ascii_case(name)) {
            false
        } else {
            inner.organizations.push(name.to_string());
            true
        }
    }

    /// Admits a location line unless it is privacy-service junk.
    pub fn add_location(&self, address: &str) -> bool {
        let address = address.trim();
        if address.is_empty() || is_junk_field(address) {
            return false;
        }
        let mut inner = self.inner.write();
        if inner.locations.iter().any(|l| l.eq_ignore_ascii_case(address)) {
            false
        } else {
            inner.locations.push(address.to_string());
            true
        }
    }

    /// The registered domains currently in scope.
    #[must_use]
    pub fn domains(&self) -> Vec<String> {
        self.inner.read().domains.iter().cloned().collect()
    }

    /// Tests whether `asset` belongs to this scope.
    ///
    /// Exact hits (domain suffix, address, CIDR containment, ASN) score
    /// accuracy 100. Organizations and locations fall back to
    /// Smith-Waterman-Gotoh similarity and match iff the accuracy reaches
    /// `conf`. Record/certificate/URL variants reduce to the underlying
    /// field.
    #[must_use]
    pub fn is_asset_in_scope(&self, asset: &Asset, conf: f64) -> ScopeMatch {
        match asset {
            Asset::Fqdn(fqdn) => self.check_fqdn(fqdn),
            Asset::IpAddress(ip) => self.check_address(ip.address),
            Asset::Netblock(nb) => self.check_cidr(&nb.cidr),
            Asset::AutonomousSystem(asn) => self.check_asn(asn.number),
            Asset::Organization(org) => self.check_fuzzy(&org.name, conf, FuzzyKind::Organization),
            Asset::Location(loc) => {
                self.check_fuzzy(&loc.full_address(), conf, FuzzyKind::Location)
            }
            Asset::DomainRecord(rec) => match Fqdn::new(&rec.domain) {
                Ok(fqdn) => self.check_fqdn(&fqdn),
                Err(_) => ScopeMatch::MISS,
            },
            Asset::AutnumRecord(rec) => self.check_asn(rec.number),
            Asset::IpNetRecord(rec) => match rec.cidr.parse::<Cidr>() {
                Ok(cidr) => self.check_cidr(&cidr),
                Err(_) => ScopeMatch::MISS,
            },
            Asset::TlsCertificate(cert) => {
                let stripped = cert
                    .subject_common_name
                    .trim_start_matches("*.")
                    .to_string();
                match Fqdn::new(&stripped) {
                    Ok(fqdn) => self.check_fqdn(&fqdn),
                    Err(_) => ScopeMatch::MISS,
                }
            }
            Asset::Url(url) => {
                if let Ok(address) = url.host.parse::<IpAddr>() {
                    self.check_address(address)
                } else {
                    match Fqdn::new(&url.host) {
                        Ok(fqdn) => self.check_fqdn(&fqdn),
                        Err(_) => ScopeMatch::MISS,
                    }
                }
            }
            Asset::Identifier(ident) => match ident.id.rsplit_once('@') {
                Some((_, domain)) => match Fqdn::new(domain) {
                    Ok(fqdn) => self.check_fqdn(&fqdn),
                    Err(_) => ScopeMatch::MISS,
                },
                None => ScopeMatch::MISS,
            },
            _ => ScopeMatch::MISS,
        }
    }

    fn check_fqdn(&self, fqdn: &Fqdn) -> ScopeMatch {
        let inner = self.inner.read();
        if inner.domains.iter().any(|domain| fqdn.is_within(domain)) {
            ScopeMatch::HIT
        } else {
            ScopeMatch::MISS
        }
    }

    fn check_address(&self, address: IpAddr) -> ScopeMatch {
        let inner = self.inner.read();
        if inner.addresses.contains(&address)
            || inner.cidrs.iter().any(|cidr| cidr.contains(address))
        {
            ScopeMatch::HIT
        } else {
            ScopeMatch::MISS
        }
    }

    fn check_cidr(&self, cidr: &Cidr) -> ScopeMatch {
        let inner = self.inner.read();
        if inner.cidrs.iter().any(|held| held.covers(cidr) || cidr.covers(held)) {
            return ScopeMatch::HIT;
        }
        // A block holding an in-scope address is in scope too.
        if inner.addresses.iter().any(|addr| cidr.contains(*addr)) {
            return ScopeMatch::HIT;
        }
        ScopeMatch::MISS
    }

    fn check_asn(&self, asn: u32) -> ScopeMatch {
        if self.inner.read().asns.contains(&asn) {
            ScopeMatch::HIT
        } else {
            ScopeMatch::MISS
        }
    }

    fn check_fuzzy(&self, text: &str, conf: f64, kind: FuzzyKind) -> ScopeMatch {
        if text.is_empty() || is_junk_field(text) {
            return ScopeMatch::MISS;
        }
        let inner = self.inner.read();
        let held = match kind {
            FuzzyKind::Organization => &inner.organizations,
            FuzzyKind::Location => &inner.locations,
        };
        let mut best = 0.0f64;
        for candidate in held {
            if candidate.eq_ignore_ascii_case(text) {
                return ScopeMatch::HIT;
            }
            let accuracy = swg_accuracy(candidate, text);
            if accuracy > best {
                best = accuracy;
            }
        }
        ScopeMatch {
            matched: best >= conf && best > 0.0,
            accuracy: best,
        }
    }
}

#[derive(Clone, Copy)]
enum FuzzyKind {
    Organization,
    Location,
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use surveyor_core::{AutonomousSystem, IpAddress, Netblock, Organization};

    use super::*;

    fn scope_with_domain(domain: &str) -> Scope {
        let scope = Scope::new();
        scope.add_fqdn(&Fqdn::new(domain).expect("valid"));
        scope
    }

    #[test]
    fn subdomain_matches_scope_domain() {
        let scope = scope_with_domain("example.com");
        let asset = Asset::Fqdn(Fqdn::new("sub.in.example.com").expect("valid"));
        let hit = scope.is_asset_in_scope(&asset, 0.0);
        assert!(hit.matched);
        assert!((hit.accuracy - 100.0).abs() < f64::EPSILON);

        let other = scope_with_domain("example.org");
        let miss = other.is_asset_in_scope(&asset, 0.0);
        assert!(!miss.matched);
        assert!(miss.accuracy.abs() < f64::EPSILON);
    }

    #[test]
    fn add_fqdn_rejects_subdomains() {
        let scope = Scope::new();
        assert!(!scope.add_fqdn(&Fqdn::new("www.example.com").expect("valid")));
        assert!(scope.add_fqdn(&Fqdn::new("example.com").expect("valid")));
        assert!(!scope.add_fqdn(&Fqdn::new("example.com").expect("valid")));
    }

    #[test]
    fn address_matches_directly_or_via_cidr() {
        let scope = Scope::new();
        scope.add_address("1.2.3.4".parse().expect("ip"));
        scope.add_cidr("8.8.8.0/24".parse().expect("cidr"));

        let direct = Asset::IpAddress(IpAddress::parse("1.2.3.4").expect("valid"));
        assert!(scope.is_asset_in_scope(&direct, 0.0).matched);

        let contained = Asset::IpAddress(IpAddress::parse("8.8.8.8").expect("valid"));
        assert!(scope.is_asset_in_scope(&contained, 0.0).matched);

        let outside = Asset::IpAddress(IpAddress::parse("9.9.9.9").expect("valid"));
        assert!(!scope.is_asset_in_scope(&outside, 0.0).matched);
    }

    #[test]
    fn netblock_overlap_and_asn() {
        let scope = Scope::new();
        scope.add_cidr("10.0.0.0/8".parse().expect("cidr"));
        scope.add_asn(15169);

        let inner = Asset::Netblock(Netblock::parse("10.1.0.0/16").expect("valid"));
        assert!(scope.is_asset_in_scope(&inner, 0.0).matched);

        let asn = Asset::AutonomousSystem(AutonomousSystem::new(15169));
        assert!(scope.is_asset_in_scope(&asn, 0.0).matched);
        let other = Asset::AutonomousSystem(AutonomousSystem::new(64500));
        assert!(!scope.is_asset_in_scope(&other, 0.0).matched);
    }

    #[test]
    fn organization_exact_and_fuzzy() {
        let scope = Scope::new();
        assert!(scope.add_organization("OWASP Foundation"));

        let exact = Asset::Organization(Organization::new("owasp foundation"));
        let hit = scope.is_asset_in_scope(&exact, 50.0);
        assert!(hit.matched);
        assert!((hit.accuracy - 100.0).abs() < f64::EPSILON);

        let close = Asset::Organization(Organization::new("OWASP Foundation Inc"));
        let fuzzy = scope.is_asset_in_scope(&close, 50.0);
        assert!(fuzzy.matched, "accuracy was {}", fuzzy.accuracy);

        let far = Asset::Organization(Organization::new("Quick Brown Fox LLC"));
        assert!(!scope.is_asset_in_scope(&far, 80.0).matched);
    }

    #[test]
    fn junk_registrant_fields_rejected() {
        let scope = Scope::new();
        assert!(!scope.add_organization("REDACTED FOR PRIVACY"));
        assert!(!scope.add_organization("Privacy service provided by Withheld"));
        assert!(!scope.add_location("Statutory Masked Address"));
        assert!(scope.add_organization("Example Industries"));
    }

    #[test]
    fn certificate_reduces_to_common_name() {
        let scope = scope_with_domain("example.com");
        let cert = Asset::TlsCertificate(surveyor_core::TlsCertificate {
            serial_number: "01".to_string(),
            subject_common_name: "*.example.com".to_string(),
            ..surveyor_core::TlsCertificate::default()
        });
        assert!(scope.is_asset_in_scope(&cert, 0.0).matched);
    }

    #[test]
    fn email_identifier_reduces_to_domain() {
        let scope = scope_with_domain("example.com");
        let ident = Asset::Identifier(surveyor_core::Identifier::email("admin@mail.example.com"));
        assert!(scope.is_asset_in_scope(&ident, 0.0).matched);
    }

    #[test]
    fn url_reduces_to_host() {
        let scope = scope_with_domain("example.com");
        let url = Asset::Url(surveyor_core::Url::parse("https://www.example.com/x").expect("valid"));
        assert!(scope.is_asset_in_scope(&url, 0.0).matched);
    }

    #[test]
    fn seed_populates_all_sets() {
        let seed = ScopeSeed {
            domains: vec!["example.com".to_string(), "not a domain".to_string()],
            cidrs: vec!["10.0.0.0/8".to_string()],
            addresses: vec!["1.2.3.4".to_string()],
            asns: vec![64500],
            organizations: vec!["Example Industries".to_string()],
        };
        let scope = Scope::from_seed(&seed);
        assert_eq!(scope.domains(), vec!["example.com".to_string()]);
        assert!(scope
            .is_asset_in_scope(
                &Asset::IpAddress(IpAddress::parse("10.9.9.9").expect("valid")),
                0.0
            )
            .matched);
    }
}
