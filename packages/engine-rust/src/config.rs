//! Engine configuration snapshot.
//!
//! Loading configuration files is a caller concern; the engine receives one
//! immutable [`EngineConfig`] per session. The struct is serde-deserializable
//! so the API surface can accept it as JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Seed scope supplied at session creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScopeSeed {
    /// Registered domains in scope.
    #[serde(default)]
    pub domains: Vec<String>,
    /// CIDR prefixes in scope.
    #[serde(default)]
    pub cidrs: Vec<String>,
    /// Individual addresses in scope.
    #[serde(default)]
    pub addresses: Vec<String>,
    /// Autonomous system numbers in scope.
    #[serde(default)]
    pub asns: Vec<u32>,
    /// Organization names in scope.
    #[serde(default)]
    pub organizations: Vec<String>,
}

/// TTL override for one transform, keyed `from->to` with an optional
/// plugin-specific refinement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Freshness window in minutes for results of this transform.
    pub ttl_minutes: Option<u64>,
    /// Confidence override for associations produced by this transform.
    pub confidence: Option<f64>,
}

/// Immutable per-session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seed scope for the run.
    pub scope: ScopeSeed,
    /// Default association confidence threshold in [0, 100].
    pub default_confidence: f64,
    /// Directory receiving the durable store and per-session state.
    pub output_dir: String,
    /// Durable store DSN. An empty value selects
    /// `<output_dir>/surveyor.sqlite`.
    pub store_dsn: String,
    /// Pipeline queue low watermark; refill triggers below this depth.
    pub min_pipeline_queue_size: usize,
    /// Pipeline queue high watermark; refill pauses above this depth.
    pub max_pipeline_queue_size: usize,
    /// Default concurrent invocations per handler when the handler does not
    /// set its own cap.
    pub default_max_instances: usize,
    /// Minimum freshness window in minutes for any data source.
    pub minimum_ttl_minutes: u64,
    /// Per-transform TTL/confidence overrides. Keys are
    /// `from_type->to_type` or `from_type->to_type->plugin`.
    pub transforms: HashMap<String, TransformConfig>,
    /// Wall-clock budget for the whole run, in minutes. 0 = unlimited.
    pub timeout_minutes: u64,
    /// Bind address for the GraphQL endpoint.
    pub api_bind: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scope: ScopeSeed::default(),
            default_confidence: 50.0,
            output_dir: ".".to_string(),
            store_dsn: String::new(),
            min_pipeline_queue_size: 100,
            max_pipeline_queue_size: 500,
            default_max_instances: 4,
            minimum_ttl_minutes: 1440,
            transforms: HashMap::new(),
            timeout_minutes: 0,
            api_bind: "127.0.0.1:4000".to_string(),
        }
    }
}

impl EngineConfig {
    /// Resolves the freshness window in minutes for the transform
    /// `from -> to` as executed by `plugin`.
    ///
    /// Most-specific key wins: `from->to->plugin`, then `from->to`, then
    /// the global minimum TTL.
    #[must_use]
    pub fn ttl_minutes(&self, from: &str, to: &str, plugin: &str) -> u64 {
        let specific = format!("{from}->{to}->{plugin}");
        let general = format!("{from}->{to}");
        for key in [specific, general] {
            if let Some(ttl) = self.transforms.get(&key).and_then(|t| t.ttl_minutes) {
                return ttl.max(self.minimum_ttl_minutes);
            }
        }
        self.minimum_ttl_minutes
    }

    /// Resolves the association confidence for the transform `from -> to`,
    /// falling back to the session default.
    #[must_use]
    pub fn transform_confidence(&self, from: &str, to: &str) -> f64 {
        self.transforms
            .get(&format!("{from}->{to}"))
            .and_then(|t| t.confidence)
            .unwrap_or(self.default_confidence)
    }

    /// The durable-store DSN with the SQLite default applied.
    #[must_use]
    pub fn resolved_store_dsn(&self) -> String {
        if self.store_dsn.is_empty() {
            format!("sqlite://{}/surveyor.sqlite", self.output_dir)
        } else {
            self.store_dsn.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_watermarks() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.min_pipeline_queue_size, 100);
        assert_eq!(cfg.max_pipeline_queue_size, 500);
        assert_eq!(cfg.api_bind, "127.0.0.1:4000");
    }

    #[test]
    fn ttl_resolution_prefers_specific_key() {
        let mut cfg = EngineConfig {
            minimum_ttl_minutes: 60,
            ..EngineConfig::default()
        };
        cfg.transforms.insert(
            "fqdn->ip_address".to_string(),
            TransformConfig {
                ttl_minutes: Some(120),
                confidence: None,
            },
        );
        cfg.transforms.insert(
            "fqdn->ip_address->dns".to_string(),
            TransformConfig {
                ttl_minutes: Some(240),
                confidence: None,
            },
        );

        assert_eq!(cfg.ttl_minutes("fqdn", "ip_address", "dns"), 240);
        assert_eq!(cfg.ttl_minutes("fqdn", "ip_address", "other"), 120);
        assert_eq!(cfg.ttl_minutes("fqdn", "netblock", "dns"), 60);
    }

    #[test]
    fn ttl_never_undercuts_minimum() {
        let mut cfg = EngineConfig {
            minimum_ttl_minutes: 100,
            ..EngineConfig::default()
        };
        cfg.transforms.insert(
            "fqdn->fqdn".to_string(),
            TransformConfig {
                ttl_minutes: Some(5),
                confidence: None,
            },
        );
        assert_eq!(cfg.ttl_minutes("fqdn", "fqdn", "dns"), 100);
    }

    #[test]
    fn confidence_falls_back_to_default() {
        let cfg = EngineConfig::default();
        assert!((cfg.transform_confidence("fqdn", "organization") - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn dsn_default_is_sqlite_in_outdir() {
        let cfg = EngineConfig {
            output_dir: "/tmp/run".to_string(),
            ..EngineConfig::default()
        };
        assert_eq!(cfg.resolved_store_dsn(), "sqlite:///tmp/run/surveyor.sqlite");
    }

    #[test]
    fn config_json_roundtrip() {
        let cfg = EngineConfig::default();
        let json = serde_json::to_string(&cfg).expect("serialize");
        let decoded: EngineConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(decoded.max_pipeline_queue_size, cfg.max_pipeline_queue_size);
    }
}
