//! Errors from a benchmark run.

use crate::client::ClientError;
use crate::config::ConfigError;
use crate::phase::PhaseError;
use thiserror::Error;

/// Define all the kinds of errors that a benchmark run can return.
#[derive(Debug, Error)]
pub enum BenchError {
    /// The configuration is not usable.
    #[error(transparent)]
    ConfigError(#[from] ConfigError),

    /// The storage client could not be created.
    #[error(transparent)]
    ClientError(#[from] ClientError),

    /// The bucket could not be prepared for the benchmark.
    #[error("FATAL: bucket setup failed: {0}")]
    SetupError(ClientError),

    /// A phase failed, ending the run.
    #[error(transparent)]
    PhaseError(#[from] PhaseError),
}
