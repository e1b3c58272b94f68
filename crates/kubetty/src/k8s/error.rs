//! Kubernetes client error types.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for Kubernetes API operations.
pub type KubeResult<T> = Result<T, KubeError>;

/// Result type for building a Kubernetes client.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors returned by calls against the Kubernetes API.
#[derive(Debug, Error)]
pub enum KubeError {
    /// HTTP request failed before a response was received.
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// The API server answered with a non-success status.
    #[error("kubernetes API error: {message} (status: {code}, reason: {reason})")]
    Api {
        code: u16,
        reason: String,
        message: String,
    },

    /// Failed to parse the response body.
    #[error("failed to parse response: {0}")]
    ParseError(String),

    /// The response parsed but lacks a field the caller depends on.
    #[error("response missing field: {0}")]
    MissingField(String),
}

impl KubeError {
    /// HTTP status code, when the error came from the API server.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            KubeError::Api { code, .. } => Some(*code),
            KubeError::RequestFailed(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404)
    }

    /// True for `409 AlreadyExists` / `Conflict`.
    pub fn is_conflict(&self) -> bool {
        self.status_code() == Some(409)
    }
}

/// Errors that can occur while resolving cluster credentials.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// In-cluster environment variable is missing.
    #[error("not running inside a cluster: {0} is not set")]
    NotInCluster(&'static str),

    /// A credential or kubeconfig file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The kubeconfig is not valid YAML for the expected schema.
    #[error("invalid kubeconfig: {0}")]
    Kubeconfig(#[from] serde_yaml::Error),

    /// The kubeconfig has no `current-context`.
    #[error("kubeconfig does not set current-context")]
    NoCurrentContext,

    #[error("kubeconfig has no context named '{0}'")]
    MissingContext(String),

    #[error("kubeconfig has no cluster named '{0}'")]
    MissingCluster(String),

    #[error("kubeconfig has no user named '{0}'")]
    MissingUser(String),

    /// Embedded certificate or key data is not valid base64.
    #[error("invalid base64 in {field}: {source}")]
    Base64 {
        field: &'static str,
        #[source]
        source: base64::DecodeError,
    },

    /// Certificates or keys were rejected by the TLS backend.
    #[error("invalid TLS material: {0}")]
    Tls(String),

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}
