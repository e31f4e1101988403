//! Bus assembly errors.

use meridian_chain::ChainError;
use meridian_config::ConfigError;
use thiserror::Error;

/// Errors raised while building a [`Bus`](crate::Bus).
#[derive(Debug, Error)]
pub enum BusError {
    /// The configuration did not validate.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An interceptor names a phase the bus does not have.
    #[error(transparent)]
    Chain(#[from] ChainError),
}
