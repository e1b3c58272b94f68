//! Cluster connection settings.
//!
//! A [`ClusterConfig`] comes from one of two places:
//! - the pod's service account (`in_cluster`), when kubetty itself runs
//!   inside the cluster it provisions into
//! - a kubeconfig file (`from_kubeconfig`), for operation outside the cluster
//!
//! Only the kubeconfig features needed to reach a single API server are
//! supported: static tokens, token files, client certificates and basic auth.
//! Exec and auth-provider plugins are not.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use super::error::{ConfigError, ConfigResult};

/// Where the service account token and CA are mounted in every pod.
pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// How requests authenticate against the API server.
#[derive(Clone, Default, PartialEq, Eq)]
pub enum ClusterAuth {
    #[default]
    None,
    Bearer(String),
    Basic {
        username: String,
        password: String,
    },
    /// PEM certificate chain followed by the PEM private key.
    ClientCertificate { identity_pem: Vec<u8> },
}

impl fmt::Debug for ClusterAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterAuth::None => write!(f, "None"),
            ClusterAuth::Bearer(_) => write!(f, "Bearer(<redacted>)"),
            ClusterAuth::Basic { username, .. } => write!(f, "Basic({username}, <redacted>)"),
            ClusterAuth::ClientCertificate { .. } => write!(f, "ClientCertificate(<redacted>)"),
        }
    }
}

/// Resolved connection settings for one API server.
#[derive(Debug, Clone, Default)]
pub struct ClusterConfig {
    /// API server base URL, e.g. `https://10.96.0.1:443`.
    pub server: String,
    /// PEM bundle to trust in addition to the system roots.
    pub root_ca_pem: Option<Vec<u8>>,
    /// Skip server certificate verification (`insecure-skip-tls-verify`).
    pub accept_invalid_certs: bool,
    pub auth: ClusterAuth,
    /// Namespace of the selected context or service account.
    pub default_namespace: Option<String>,
}

impl ClusterConfig {
    /// Build the configuration from the pod's service account.
    pub fn in_cluster() -> ConfigResult<Self> {
        Self::in_cluster_from(|key| env::var(key).ok(), Path::new(SERVICE_ACCOUNT_DIR))
    }

    /// Like [`in_cluster`](Self::in_cluster), with the environment read
    /// through `lookup` and the service account files under `dir`.
    pub fn in_cluster_from<F>(lookup: F, dir: &Path) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &'static str| {
            lookup(key)
                .filter(|value| !value.is_empty())
                .ok_or(ConfigError::NotInCluster(key))
        };
        let host = var("KUBERNETES_SERVICE_HOST")?;
        let port = var("KUBERNETES_SERVICE_PORT")?;
        Self::from_service_account(&host, &port, dir)
    }

    /// Build the configuration from a service account directory holding
    /// `token`, `ca.crt` and optionally `namespace`.
    pub fn from_service_account(host: &str, port: &str, dir: &Path) -> ConfigResult<Self> {
        let token = read_string(&dir.join("token"))?.trim().to_string();
        let root_ca_pem = read_bytes(&dir.join("ca.crt"))?;
        let default_namespace = fs::read_to_string(dir.join("namespace"))
            .ok()
            .map(|ns| ns.trim().to_string())
            .filter(|ns| !ns.is_empty());

        // IPv6 service hosts must be bracketed in URLs.
        let server = if host.contains(':') {
            format!("https://[{host}]:{port}")
        } else {
            format!("https://{host}:{port}")
        };

        Ok(Self {
            server,
            root_ca_pem: Some(root_ca_pem),
            accept_invalid_certs: false,
            auth: ClusterAuth::Bearer(token),
            default_namespace,
        })
    }

    /// Build the configuration from the current context of a kubeconfig file.
    ///
    /// Relative file references inside the kubeconfig resolve against the
    /// directory containing it.
    pub fn from_kubeconfig(path: &Path) -> ConfigResult<Self> {
        let raw = read_bytes(path)?;
        let kubeconfig: Kubeconfig = serde_yaml::from_slice(&raw)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        kubeconfig.resolve(base)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Kubeconfig {
    #[serde(default)]
    current_context: Option<String>,
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    #[serde(default)]
    users: Vec<NamedUser>,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: KubeconfigCluster,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct KubeconfigCluster {
    server: String,
    #[serde(default)]
    certificate_authority: Option<String>,
    #[serde(default)]
    certificate_authority_data: Option<String>,
    #[serde(default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: KubeconfigContext,
}

#[derive(Debug, Deserialize)]
struct KubeconfigContext {
    cluster: String,
    #[serde(default)]
    user: String,
    #[serde(default)]
    namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    name: String,
    #[serde(default)]
    user: KubeconfigUser,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
struct KubeconfigUser {
    token: Option<String>,
    token_file: Option<String>,
    client_certificate: Option<String>,
    client_certificate_data: Option<String>,
    client_key: Option<String>,
    client_key_data: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

impl Kubeconfig {
    fn resolve(self, base: &Path) -> ConfigResult<ClusterConfig> {
        let context_name = self
            .current_context
            .filter(|name| !name.is_empty())
            .ok_or(ConfigError::NoCurrentContext)?;

        let context = self
            .contexts
            .into_iter()
            .find(|c| c.name == context_name)
            .ok_or_else(|| ConfigError::MissingContext(context_name.clone()))?
            .context;

        let cluster = self
            .clusters
            .into_iter()
            .find(|c| c.name == context.cluster)
            .ok_or_else(|| ConfigError::MissingCluster(context.cluster.clone()))?
            .cluster;

        let user = if context.user.is_empty() {
            KubeconfigUser::default()
        } else {
            self.users
                .into_iter()
                .find(|u| u.name == context.user)
                .ok_or_else(|| ConfigError::MissingUser(context.user.clone()))?
                .user
        };

        let root_ca_pem = match (
            cluster.certificate_authority_data,
            cluster.certificate_authority,
        ) {
            (Some(data), _) => Some(decode_base64("certificate-authority-data", &data)?),
            (None, Some(file)) => Some(read_bytes(&resolve_path(base, &file))?),
            (None, None) => None,
        };

        Ok(ClusterConfig {
            server: cluster.server,
            root_ca_pem,
            accept_invalid_certs: cluster.insecure_skip_tls_verify,
            auth: user.into_auth(base)?,
            default_namespace: context.namespace,
        })
    }
}

impl KubeconfigUser {
    fn into_auth(self, base: &Path) -> ConfigResult<ClusterAuth> {
        if let Some(token) = self.token.filter(|t| !t.is_empty()) {
            return Ok(ClusterAuth::Bearer(token));
        }

        if let Some(file) = self.token_file {
            let token = read_string(&resolve_path(base, &file))?;
            return Ok(ClusterAuth::Bearer(token.trim().to_string()));
        }

        let cert = match (self.client_certificate_data, self.client_certificate) {
            (Some(data), _) => Some(decode_base64("client-certificate-data", &data)?),
            (None, Some(file)) => Some(read_bytes(&resolve_path(base, &file))?),
            (None, None) => None,
        };
        let key = match (self.client_key_data, self.client_key) {
            (Some(data), _) => Some(decode_base64("client-key-data", &data)?),
            (None, Some(file)) => Some(read_bytes(&resolve_path(base, &file))?),
            (None, None) => None,
        };

        match (cert, key) {
            (Some(mut identity_pem), Some(key)) => {
                if !identity_pem.ends_with(b"\n") {
                    identity_pem.push(b'\n');
                }
                identity_pem.extend_from_slice(&key);
                return Ok(ClusterAuth::ClientCertificate { identity_pem });
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(ConfigError::Tls(
                    "client certificate and client key must be provided together".to_string(),
                ));
            }
            (None, None) => {}
        }

        if let Some(username) = self.username {
            return Ok(ClusterAuth::Basic {
                username,
                password: self.password.unwrap_or_default(),
            });
        }

        Ok(ClusterAuth::None)
    }
}

fn resolve_path(base: &Path, file: &str) -> PathBuf {
    let path = Path::new(file);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn decode_base64(field: &'static str, data: &str) -> ConfigResult<Vec<u8>> {
    STANDARD
        .decode(data.trim())
        .map_err(|source| ConfigError::Base64 { field, source })
}

fn read_bytes(path: &Path) -> ConfigResult<Vec<u8>> {
    fs::read(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_string(path: &Path) -> ConfigResult<String> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}
