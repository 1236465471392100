//! Fully-qualified domain names.
//!
//! Construction normalizes and validates: names are lowercased, trimmed of
//! whitespace and the trailing dot, and must consist of at least two
//! non-empty labels of at most 63 octets each. Registered-domain (eTLD+1)
//! derivation runs against the public-suffix list.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::AssetError;

/// One DNS label: letters, digits, underscores, interior hyphens.
fn label_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z0-9_]([a-z0-9_-]*[a-z0-9_])?$").expect("static pattern")
    })
}

/// A validated, normalized DNS name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fqdn {
    name: String,
}

impl Fqdn {
    /// Normalizes and validates a raw name.
    ///
    /// # Errors
    ///
    /// Returns [`AssetError::InvalidFqdn`] for names with fewer than two
    /// labels, empty labels, oversized labels, a leading/trailing hyphen in
    /// a label, or characters outside `[a-z0-9-_]`.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, AssetError> {
        let name = raw.as_ref().trim().trim_end_matches('.').to_lowercase();
        if name.len() > 253 {
            return Err(AssetError::InvalidFqdn(name));
        }
        let labels: Vec<&str> = name.split('.').collect();
        if labels.len() < 2 {
            return Err(AssetError::InvalidFqdn(name));
        }
        for label in &labels {
            if label.is_empty() || label.len() > 63 || !label_pattern().is_match(label) {
                return Err(AssetError::InvalidFqdn(name));
            }
        }
        Ok(Self { name })
    }

    /// The normalized name, lowercase with no trailing dot.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name's labels, leftmost first.
    #[must_use]
    pub fn labels(&self) -> Vec<&str> {
        self.name.split('.').collect()
    }

    /// The leftmost label.
    #[must_use]
    pub fn first_label(&self) -> &str {
        self.name.split('.').next().unwrap_or(&self.name)
    }

    /// The registrable domain (eTLD+1) per public-suffix rules, when one
    /// exists. `www.example.co.uk` maps to `example.co.uk`.
    #[must_use]
    pub fn registered_domain(&self) -> Option<Fqdn> {
        let registrable = psl::domain_str(&self.name)?;
        Fqdn::new(registrable).ok()
    }

    /// Whether this name IS a registrable domain rather than a subdomain of
    /// one.
    #[must_use]
    pub fn is_registered_domain(&self) -> bool {
        self.registered_domain()
            .is_some_and(|d| d.name == self.name)
    }

    /// Whether this name equals `domain` or sits underneath it.
    #[must_use]
    pub fn is_within(&self, domain: &str) -> bool {
        self.name == domain || self.name.ends_with(&format!(".{domain}"))
    }
}

impl fmt::Display for Fqdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl TryFrom<String> for Fqdn {
    type Error = AssetError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Fqdn> for String {
    fn from(value: Fqdn) -> Self {
        value.name
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn normalizes_case_and_trailing_dot() {
        let fqdn = Fqdn::new("  WWW.Example.COM. ").expect("valid");
        assert_eq!(fqdn.name(), "www.example.com");
    }

    #[test]
    fn rejects_single_label() {
        assert!(Fqdn::new("localhost").is_err());
    }

    #[test]
    fn rejects_empty_labels() {
        assert!(Fqdn::new("a..com").is_err());
        assert!(Fqdn::new(".example.com").is_err());
    }

    #[test]
    fn rejects_bad_characters() {
        assert!(Fqdn::new("exa mple.com").is_err());
        assert!(Fqdn::new("exam!ple.com").is_err());
    }

    #[test]
    fn rejects_hyphen_edges() {
        assert!(Fqdn::new("-bad.example.com").is_err());
        assert!(Fqdn::new("bad-.example.com").is_err());
    }

    #[test]
    fn underscore_labels_allowed() {
        // Service-discovery names like _dmarc are observed in the wild.
        assert!(Fqdn::new("_dmarc.example.com").is_ok());
    }

    #[test]
    fn registered_domain_etld_plus_one() {
        let fqdn = Fqdn::new("sub.host.example.co.uk").expect("valid");
        assert_eq!(
            fqdn.registered_domain().expect("registrable").name(),
            "example.co.uk"
        );
    }

    #[test]
    fn is_registered_domain_checks_exactness() {
        assert!(Fqdn::new("example.com").expect("valid").is_registered_domain());
        assert!(!Fqdn::new("www.example.com")
            .expect("valid")
            .is_registered_domain());
    }

    #[test]
    fn is_within_suffix_match() {
        let fqdn = Fqdn::new("sub.in.example.com").expect("valid");
        assert!(fqdn.is_within("example.com"));
        assert!(fqdn.is_within("in.example.com"));
        assert!(!fqdn.is_within("example.org"));
        // No partial-label matches: "e.com" is not a suffix domain of it.
        assert!(!fqdn.is_within("ample.com"));
    }

    proptest! {
        #[test]
        fn valid_names_are_idempotent(host in "[a-z][a-z0-9]{0,10}", domain in "[a-z]{2,8}") {
            let raw = format!("{host}.{domain}.com");
            let once = Fqdn::new(&raw).expect("valid");
            let twice = Fqdn::new(once.name()).expect("still valid");
            prop_assert_eq!(once, twice);
        }
    }
}
