//! Session provisioning error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::k8s::{ConfigError, KubeError};

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors that abort a session request.
///
/// None of these are retried internally; retry policy belongs to the caller.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The selected cluster credential source is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A Kubernetes get/create call failed.
    #[error(transparent)]
    Kube(#[from] KubeError),

    /// The OS random source failed while generating a terminal ID.
    #[error("entropy source failed: {0}")]
    Entropy(String),

    /// The credential file could not be read and strict reads are enabled.
    #[error("failed to read credential file {}: {source}", path.display())]
    CredentialRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
