//! Crate-wide error and result types.

use crate::increment::DeviceIncrement;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the controller.
///
/// Two are programmer errors that are never caught within the crate (an
/// invalid state-machine transition, and an unparsable `desired_mode`
/// surfacing from config); the rest are domain validation errors raised by
/// the device contract's shared validation helper and allowed to propagate
/// out of a tick.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Attempted an edge the transition state machine does not allow.
    #[error("invalid transition for device {device}: {from:?} -> {to:?}")]
    InvalidTransition {
        device: String,
        from: &'static str,
        to: &'static str,
    },

    /// A mutator was invoked while a change was already pending or debouncing.
    #[error("device {device} has a pending change in progress")]
    PendingChangeInProgress { device: String },

    /// A mutator was invoked with an increment that is not currently offered
    /// by the device's own `increase_increments`/`decrease_increments`.
    #[error("device {device} rejected unknown increment {increment:?}")]
    UnknownIncrement {
        device: String,
        increment: DeviceIncrement,
    },

    /// An entity read was required but the bridge reported `absent`.
    #[error("entity unavailable: {entity}")]
    EntityUnavailable { entity: String },

    /// Configuration failed to load or did not satisfy its invariants.
    #[error("configuration error: {0}")]
    Config(String),

    /// Catch-all for adapter/IO failures.
    #[error("{0}")]
    Other(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
