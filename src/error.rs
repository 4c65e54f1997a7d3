//! Crate-level error type

use thiserror::Error;

use crate::{config, persistence, question::BatchError};

/// Any failure surfaced by the engine
#[derive(Error, Debug)]
pub enum Error {
    /// A question batch was rejected as a whole
    #[error(transparent)]
    Batch(#[from] BatchError),
    /// State could not be saved
    #[error(transparent)]
    Persistence(#[from] persistence::Error),
    /// The environment lacks required configuration
    #[error(transparent)]
    Config(#[from] config::Error),
}

/// Result alias using [`Error`]
pub type Result<T, E = Error> = std::result::Result<T, E>;
