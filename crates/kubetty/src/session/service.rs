//! Session service - provisions terminals on Kubernetes.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::k8s::{
    ClusterConfig, ConfigResult, DEFAULT_TIMEOUT_SECS, Deployment, KubeApi, KubeClient,
    KubeResult, Namespace, Secret, Service,
};

use super::error::{SessionError, SessionResult};
use super::id::new_terminal_id;
use super::models::{AuthMode, Session, SessionRequest};
use super::resources::{
    USER_TOKEN_ENV, WorkloadAuth, build_deployment, build_secret, build_service,
    node_port_endpoint,
};

/// Namespace terminal objects are created in.
pub const DEFAULT_TERMINAL_NAMESPACE: &str = "sealyun-tty";

/// API server address handed to token-mode terminals.
pub const DEFAULT_APISERVER: &str = "https://kubernetes.default.svc.cluster.local:443";

/// Terminal container image.
pub const DEFAULT_IMAGE: &str = "fanux/fist-tty-tools:v1.0.0";

pub const DEFAULT_KUBECONFIG: &str = "/root/.kube/config";

/// Port the terminal container listens on.
pub const DEFAULT_CONTAINER_PORT: u16 = 8080;

/// Terminal provisioning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Namespace holding every terminal's objects.
    pub namespace: String,
    /// Image used when the request does not name one.
    pub default_image: String,
    /// API server address used when the request does not name one.
    pub default_apiserver: String,
    /// Kubeconfig used when a kubeconfig-mode request does not name one.
    pub default_kubeconfig: PathBuf,
    /// Container and service port of the terminal.
    pub container_port: u16,
    /// Fail the request when the kubeconfig cannot be read instead of
    /// provisioning an empty secret.
    pub strict_credential_read: bool,
    /// Delete objects created by a request that fails part way.
    pub cleanup_on_failure: bool,
    /// Timeout for each Kubernetes API request.
    pub request_timeout_secs: u64,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_TERMINAL_NAMESPACE.to_string(),
            default_image: DEFAULT_IMAGE.to_string(),
            default_apiserver: DEFAULT_APISERVER.to_string(),
            default_kubeconfig: PathBuf::from(DEFAULT_KUBECONFIG),
            container_port: DEFAULT_CONTAINER_PORT,
            strict_credential_read: false,
            cleanup_on_failure: false,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl TerminalConfig {
    fn kubeconfig_path(&self, request: &SessionRequest) -> PathBuf {
        request
            .kubeconfig_path
            .clone()
            .unwrap_or_else(|| self.default_kubeconfig.clone())
    }
}

/// Build a Kubernetes client for the request's auth mode.
///
/// Kubeconfig mode uses the kubeconfig file; token mode uses the service
/// account of the pod kubetty runs in. There is no fallback between the two.
pub fn client_for(
    auth_mode: AuthMode,
    kubeconfig: &Path,
    timeout: Duration,
) -> ConfigResult<KubeClient> {
    let cluster = cluster_for(auth_mode, kubeconfig, ClusterConfig::in_cluster)?;
    debug!("using API server {} ({} mode)", cluster.server, auth_mode);
    KubeClient::with_timeout(cluster, timeout)
}

fn cluster_for<F>(
    auth_mode: AuthMode,
    kubeconfig: &Path,
    in_cluster: F,
) -> ConfigResult<ClusterConfig>
where
    F: FnOnce() -> ConfigResult<ClusterConfig>,
{
    match auth_mode {
        AuthMode::Kubeconfig => ClusterConfig::from_kubeconfig(kubeconfig),
        AuthMode::Token => in_cluster(),
    }
}

/// Make sure `name` exists.
///
/// Any read failure, not only 404, is taken as "missing" and followed by a
/// create. A create rejected with 409 means another request won the race.
pub async fn ensure_namespace(kube: &dyn KubeApi, name: &str) -> KubeResult<()> {
    let err = match kube.get_namespace(name).await {
        Ok(_) => return Ok(()),
        Err(err) => err,
    };

    if err.is_not_found() {
        debug!("namespace {} not found, creating it", name);
    } else {
        warn!("failed to read namespace {}, trying to create it: {}", name, err);
    }

    match kube.create_namespace(&Namespace::new(name)).await {
        Ok(_) => {
            info!("Created namespace {}", name);
            Ok(())
        }
        Err(err) if err.is_conflict() => {
            debug!("namespace {} already exists", name);
            Ok(())
        }
        Err(err) => Err(err),
    }
}

/// Objects to submit for one terminal.
#[derive(Debug, Clone, Serialize)]
pub struct SessionPlan {
    pub id: String,
    pub namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<Secret>,
    pub deployment: Deployment,
    pub service: Service,
}

/// Placeholder written over credentials in a redacted plan.
pub const REDACTED: &str = "<redacted>";

impl SessionPlan {
    /// Copy of the plan with the user token and kubeconfig contents masked,
    /// safe to print.
    pub fn redacted(&self) -> Self {
        let mut plan = self.clone();
        if let Some(ref mut secret) = plan.secret {
            for value in secret.data.values_mut() {
                *value = REDACTED.as_bytes().to_vec();
            }
        }
        if let Some(ref mut spec) = plan.deployment.spec {
            for container in spec.template.spec.containers.iter_mut() {
                for var in container.env.iter_mut().filter(|v| v.name == USER_TOKEN_ENV) {
                    var.value = Some(REDACTED.to_string());
                }
            }
        }
        plan
    }
}

/// Assign a terminal ID and build the objects for `request`.
///
/// In kubeconfig mode this reads the kubeconfig file for the secret.
pub async fn plan_session(
    config: &TerminalConfig,
    request: &SessionRequest,
) -> SessionResult<SessionPlan> {
    let id = new_terminal_id()?;
    let image = request.image.as_deref().unwrap_or(&config.default_image);

    let (secret, auth) = match request.auth_mode {
        AuthMode::Token => (
            None,
            WorkloadAuth::Token {
                apiserver: request
                    .apiserver
                    .as_deref()
                    .unwrap_or(&config.default_apiserver),
                user_token: &request.user_token,
                namespace: &request.namespace,
                user: &request.user,
            },
        ),
        AuthMode::Kubeconfig => {
            let kubeconfig = read_credentials(config, &config.kubeconfig_path(request)).await?;
            (
                Some(build_secret(&id, kubeconfig)),
                WorkloadAuth::MountedKubeconfig,
            )
        }
    };

    let deployment = build_deployment(&id, image, config.container_port, auth);
    let service = build_service(&id, config.container_port);

    Ok(SessionPlan {
        id,
        namespace: config.namespace.clone(),
        secret,
        deployment,
        service,
    })
}

async fn read_credentials(config: &TerminalConfig, path: &Path) -> SessionResult<Vec<u8>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(source) if config.strict_credential_read => Err(SessionError::CredentialRead {
            path: path.to_path_buf(),
            source,
        }),
        Err(e) => {
            warn!(
                "failed to read credential file {}, mounting an empty kubeconfig: {}",
                path.display(),
                e
            );
            Ok(Vec::new())
        }
    }
}

/// An object created by a request, kept for rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Created {
    Secret(String),
    Deployment(String),
    Service(String),
}

impl fmt::Display for Created {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Created::Secret(name) => write!(f, "secret/{name}"),
            Created::Deployment(name) => write!(f, "deployment/{name}"),
            Created::Service(name) => write!(f, "service/{name}"),
        }
    }
}

/// Service for provisioning terminal sessions.
#[derive(Clone)]
pub struct SessionService {
    kube: Arc<dyn KubeApi>,
    config: TerminalConfig,
}

impl SessionService {
    /// Create a session service on an existing Kubernetes API handle.
    pub fn new(kube: Arc<dyn KubeApi>, config: TerminalConfig) -> Self {
        Self { kube, config }
    }

    /// Create a session service whose client is chosen by the request's auth
    /// mode.
    pub fn connect(request: &SessionRequest, config: TerminalConfig) -> SessionResult<Self> {
        let client = client_for(
            request.auth_mode,
            &config.kubeconfig_path(request),
            Duration::from_secs(config.request_timeout_secs),
        )?;
        Ok(Self::new(Arc::new(client), config))
    }

    pub fn config(&self) -> &TerminalConfig {
        &self.config
    }

    /// Provision a terminal and return its endpoint.
    ///
    /// Steps run strictly in order: namespace, secret (kubeconfig mode),
    /// deployment, service. The first failure ends the request. Objects
    /// already created stay behind unless `cleanup_on_failure` is set.
    pub async fn create(&self, request: &SessionRequest) -> SessionResult<Session> {
        let plan = plan_session(&self.config, request).await?;
        info!(
            "Provisioning terminal {} for user '{}' ({} mode)",
            plan.id, request.user, request.auth_mode
        );

        ensure_namespace(self.kube.as_ref(), &plan.namespace).await?;

        let mut created = Vec::new();
        match self.submit(&plan, &mut created).await {
            Ok(endpoint) => {
                info!("Terminal {} ready on node port {}", plan.id, endpoint);
                Ok(Session {
                    id: plan.id,
                    endpoint,
                    namespace: plan.namespace,
                    deployment: object_name(&plan.deployment.metadata.name),
                    service: object_name(&plan.service.metadata.name),
                    secret: plan.secret.map(|s| object_name(&s.metadata.name)),
                })
            }
            Err(e) => {
                warn!("Provisioning terminal {} failed: {}", plan.id, e);
                if self.config.cleanup_on_failure {
                    self.rollback(&plan.namespace, &created).await;
                } else if !created.is_empty() {
                    let names: Vec<String> = created.iter().map(|c| c.to_string()).collect();
                    warn!(
                        "Leaving {} in namespace {} for manual cleanup",
                        names.join(", "),
                        plan.namespace
                    );
                }
                Err(e.into())
            }
        }
    }

    async fn submit(&self, plan: &SessionPlan, created: &mut Vec<Created>) -> KubeResult<String> {
        let ns = plan.namespace.as_str();

        // Names come from the plan; a response may omit them.
        if let Some(ref secret) = plan.secret {
            self.kube.create_secret(ns, secret).await?;
            let name = object_name(&secret.metadata.name);
            debug!("created secret {}", name);
            created.push(Created::Secret(name));
        }

        self.kube.create_deployment(ns, &plan.deployment).await?;
        let name = object_name(&plan.deployment.metadata.name);
        debug!("created deployment {}", name);
        created.push(Created::Deployment(name));

        let service = self.kube.create_service(ns, &plan.service).await?;
        let name = object_name(&plan.service.metadata.name);
        debug!("created service {}", name);
        created.push(Created::Service(name));

        node_port_endpoint(&service)
    }

    /// Best-effort delete of `created`, newest first.
    async fn rollback(&self, namespace: &str, created: &[Created]) {
        for object in created.iter().rev() {
            let result = match object {
                Created::Secret(name) => self.kube.delete_secret(namespace, name).await,
                Created::Deployment(name) => self.kube.delete_deployment(namespace, name).await,
                Created::Service(name) => self.kube.delete_service(namespace, name).await,
            };
            match result {
                Ok(()) => info!("Rolled back {}", object),
                Err(e) => warn!("Failed to roll back {}: {:?}", object, e),
            }
        }
    }
}

fn object_name(name: &Option<String>) -> String {
    name.clone().unwrap_or_default()
}
