//! The plugin framework and the discovery plugins shipped with the engine.
//!
//! A plugin registers one or more handlers on `start` and releases
//! resources on `stop`. Protocol I/O (DNS, WHOIS/RDAP, TLS fetching,
//! BGP-WHOIS) lives behind the collaborator traits in [`clients`]; the
//! engine only depends on the abstract capability, so tests drive the
//! plugins with canned fixtures.

pub mod clients;
mod dns;
mod horizontal;
mod netblock;
mod registration;
mod support;
mod tls;
mod txt_services;

use async_trait::async_trait;

pub use clients::{
    BgpAnnouncement, BgpClient, CertSource, ContactDetails, ContactKind, DnsRecord, DnsResolver,
    RegistryClient, RegistryRecord,
};
pub use dns::{names_to_addrs, DnsPlugin};
pub use horizontal::HorizontalPlugin;
pub use netblock::NetblockPlugin;
pub use registration::RegistrationPlugin;
pub use support::{
    asset_monitored_within_ttl, ip_address_sweep, mark_asset_monitored,
    process_assets_with_source, ttl_start_time, Finding, SWEEP_MAX_ACTIVE, SWEEP_MAX_DEFAULT,
};
pub use tls::TlsPlugin;
pub use txt_services::TxtServicesPlugin;

use crate::dispatch::HandlerRegistry;

/// A discovery plugin.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique plugin name; doubles as the default source name on the
    /// properties it attaches.
    fn name(&self) -> &'static str;

    /// Registers this plugin's handlers.
    ///
    /// # Errors
    ///
    /// Returns an error when the plugin cannot initialize; engine startup
    /// fails in that case.
    fn start(&self, registry: &HandlerRegistry) -> anyhow::Result<()>;

    /// Releases plugin resources. Default: nothing to release.
    async fn stop(&self) {}
}
