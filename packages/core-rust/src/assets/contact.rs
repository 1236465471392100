//! People, organizations and the records that tie them together.

use serde::{Deserialize, Serialize};

/// Anchor entity for a set of contact details discovered together.
///
/// The `discovered_at` string records where the details were found (a WHOIS
/// section, a certificate DN, a page URL) and serves as the identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContactRecord {
    pub discovered_at: String,
}

impl ContactRecord {
    #[must_use]
    pub fn new(discovered_at: impl Into<String>) -> Self {
        Self {
            discovered_at: discovered_at.into(),
        }
    }
}

/// A named organization, optionally with a registry identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Organization {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,
}

impl Organization {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
        }
    }
}

/// A postal address, broken into the parts registries report.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Location {
    pub building: String,
    pub street: String,
    pub city: String,
    pub province: String,
    pub postal_code: String,
    pub country: String,
}

impl Location {
    /// The full address line used as this location's identity: the
    /// non-empty parts joined by commas.
    #[must_use]
    pub fn full_address(&self) -> String {
        [
            &self.building,
            &self.street,
            &self.city,
            &self.province,
            &self.postal_code,
            &self.country,
        ]
        .into_iter()
        .filter(|part| !part.is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join(", ")
    }
}

/// Kinds of identifiers attached to contacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierType {
    EmailAddress,
    Handle,
    RegistryId,
    TaxId,
}

impl IdentifierType {
    /// Stable text used in the identifier's composite key.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EmailAddress => "email_address",
            Self::Handle => "handle",
            Self::RegistryId => "registry_id",
            Self::TaxId => "tax_id",
        }
    }
}

/// A typed external identifier (email address, registry handle, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    pub id_type: IdentifierType,
    pub id: String,
}

impl Identifier {
    #[must_use]
    pub fn email(address: impl Into<String>) -> Self {
        Self {
            id_type: IdentifierType::EmailAddress,
            id: address.into(),
        }
    }
}

/// A natural person.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Person {
    pub full_name: String,
    pub first_name: String,
    pub last_name: String,
}

/// A phone number as observed, with its declared kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Phone {
    /// `voice`, `fax`, `mobile`, ... as reported by the source.
    pub phone_type: String,
    pub raw: String,
}
