//! Session data models.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How the terminal authenticates against the user's cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// API server address and user token are injected as environment
    /// variables; kubetty talks to the cluster as its own service account.
    #[default]
    Token,
    /// A kubeconfig file is stored in a per-session secret and mounted into
    /// the terminal; kubetty talks to the cluster using the same file.
    Kubeconfig,
}

impl std::fmt::Display for AuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMode::Token => write!(f, "token"),
            AuthMode::Kubeconfig => write!(f, "kubeconfig"),
        }
    }
}

impl std::str::FromStr for AuthMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "token" => Ok(AuthMode::Token),
            "kubeconfig" => Ok(AuthMode::Kubeconfig),
            _ => Err(format!("unknown auth mode: {}", s)),
        }
    }
}

/// Request to provision one terminal.
///
/// Unset optional fields fall back to the service's `TerminalConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequest {
    /// User name, exported to the terminal as `USER_NAME`.
    pub user: String,
    /// User token, exported to the terminal as `USER_TOKEN`.
    pub user_token: String,
    /// API server address the terminal should talk to.
    pub apiserver: Option<String>,
    /// The user's own namespace (kubeconfig default), not the namespace the
    /// terminal objects are created in.
    pub namespace: String,
    pub auth_mode: AuthMode,
    /// Kubeconfig used in `AuthMode::Kubeconfig`.
    pub kubeconfig_path: Option<PathBuf>,
    /// Terminal container image.
    pub image: Option<String>,
}

impl Default for SessionRequest {
    fn default() -> Self {
        Self {
            user: String::new(),
            user_token: String::new(),
            apiserver: None,
            namespace: "default".to_string(),
            auth_mode: AuthMode::Token,
            kubeconfig_path: None,
            image: None,
        }
    }
}

impl SessionRequest {
    /// A token-mode request for `user`.
    pub fn new(user: impl Into<String>, user_token: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            user_token: user_token.into(),
            ..Default::default()
        }
    }

    /// A kubeconfig-mode request using the given file.
    pub fn with_kubeconfig(path: impl Into<PathBuf>) -> Self {
        Self {
            auth_mode: AuthMode::Kubeconfig,
            kubeconfig_path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn apiserver(mut self, apiserver: impl Into<String>) -> Self {
        self.apiserver = Some(apiserver.into());
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }
}

/// A provisioned terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Terminal ID, assigned once when the request is accepted.
    pub id: String,
    /// Node port the terminal is reachable on.
    pub endpoint: String,
    /// Namespace holding the objects below.
    pub namespace: String,
    pub deployment: String,
    pub service: String,
    /// Only set in `AuthMode::Kubeconfig`.
    pub secret: Option<String>,
}
