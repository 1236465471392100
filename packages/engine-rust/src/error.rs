//! Engine-wide error taxonomy.
//!
//! The retry decision lives in the variant: `InvalidInput` is never retried,
//! `TransientIo` completes the event but leaves the asset marked monitored,
//! `NotFound` means "no prior observation", `Fatal` fails session creation,
//! and `Cancelled` is the clean cooperative-shutdown exit.

use thiserror::Error;

/// Errors surfaced by the engine's subsystems.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Unparseable CIDR/IP/FQDN/email, empty key, malformed event.
    /// Surfaced immediately, never retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// DNS timeout, WHOIS connection refused, HTTP 5xx. Logged; the entity
    /// is still marked monitored to avoid hot-looping.
    #[error("transient I/O failure: {0}")]
    TransientIo(String),

    /// Entity lookup missed. Non-fatal; treated as "no prior observation".
    #[error("not found: {0}")]
    NotFound(String),

    /// Store open failure, migration failure, missing output directory.
    /// Session creation fails and the error is returned to the caller.
    #[error("fatal: {0}")]
    Fatal(String),

    /// The session was killed; loops exit cleanly.
    #[error("cancelled")]
    Cancelled,

    /// Untyped failure propagated from a collaborator or store.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Whether the failed operation may be retried later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientIo(_))
    }

    /// Whether this error should tear down the session.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// Engine-wide result alias.
pub type Result<T> = std::result::Result<T, EngineError>;
