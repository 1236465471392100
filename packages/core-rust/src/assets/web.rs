//! Web-facing and miscellaneous domain assets.

use serde::{Deserialize, Serialize};

use super::AssetError;

/// A URL broken into the parts the engine routes on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Url {
    /// The URL exactly as observed; the identity.
    pub raw: String,
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Url {
    /// Parses an absolute http/https-style URL without external crates:
    /// `scheme://host[:port][/path]`.
    ///
    /// # Errors
    ///
    /// Returns [`AssetError::InvalidUrl`] when the scheme separator or host
    /// is missing, or the port is unparseable.
    pub fn parse(raw: &str) -> Result<Self, AssetError> {
        let trimmed = raw.trim();
        let (scheme, rest) = trimmed
            .split_once("://")
            .ok_or_else(|| AssetError::InvalidUrl(raw.to_string()))?;
        if scheme.is_empty() {
            return Err(AssetError::InvalidUrl(raw.to_string()));
        }
        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };
        let (host, port) = match authority.rsplit_once(':') {
            // An IPv6 literal authority without a port also contains ':';
            // only treat the suffix as a port when it parses as one.
            Some((h, p)) if p.chars().all(|c| c.is_ascii_digit()) && !p.is_empty() => {
                let port: u16 = p
                    .parse()
                    .map_err(|_| AssetError::InvalidUrl(raw.to_string()))?;
                (h, port)
            }
            _ => (
                authority,
                match scheme {
                    "https" => 443,
                    "ftp" => 21,
                    _ => 80,
                },
            ),
        };
        if host.is_empty() {
            return Err(AssetError::InvalidUrl(raw.to_string()));
        }
        Ok(Self {
            raw: trimmed.to_string(),
            scheme: scheme.to_lowercase(),
            host: host.trim_matches(['[', ']']).to_lowercase(),
            port,
            path: path.to_string(),
        })
    }
}

/// A network service observed behind a host and port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Service {
    /// Synthesised identity, unique per host/port/banner observation.
    pub identifier: String,
    /// Protocol banner as captured.
    pub banner: String,
    /// Free-form probe output.
    pub output: String,
    pub port: u16,
}

/// A file discovered at a URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct File {
    /// Source URL; the identity.
    pub url: String,
    pub name: String,
    pub file_type: String,
}

/// An account on some platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Account {
    /// Platform-unique identity.
    pub unique_id: String,
    pub username: String,
    pub account_type: String,
}

/// A product or offering attributed to the organization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Product {
    pub unique_id: String,
    pub product_name: String,
    pub category: String,
}

/// A transfer of funds surfaced during discovery.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FundsTransfer {
    pub unique_id: String,
    pub amount: f64,
    pub currency: String,
    pub method: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_parse_full() {
        let url = Url::parse("https://www.Example.com:8443/a/b?q=1").expect("valid");
        assert_eq!(url.scheme, "https");
        assert_eq!(url.host, "www.example.com");
        assert_eq!(url.port, 8443);
        assert_eq!(url.path, "/a/b?q=1");
    }

    #[test]
    fn url_default_ports() {
        assert_eq!(Url::parse("https://example.com").expect("valid").port, 443);
        assert_eq!(Url::parse("http://example.com").expect("valid").port, 80);
    }

    #[test]
    fn url_missing_path_becomes_root() {
        assert_eq!(Url::parse("http://example.com").expect("valid").path, "/");
    }

    #[test]
    fn url_ipv6_literal_host() {
        let url = Url::parse("http://[2001:db8::1]/x").expect("valid");
        assert_eq!(url.host, "2001:db8::1");
        assert_eq!(url.port, 80);
    }

    #[test]
    fn url_rejects_schemeless() {
        assert!(Url::parse("example.com/path").is_err());
        assert!(Url::parse("://nohost").is_err());
    }
}
