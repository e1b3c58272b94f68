//! Kubernetes REST client.

use reqwest::{Certificate, Client, Identity, RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;

use super::config::{ClusterAuth, ClusterConfig};
use super::error::{ConfigError, ConfigResult, KubeError, KubeResult};
use super::types::{Deployment, Namespace, Secret, Service, Status};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Client for the handful of Kubernetes endpoints kubetty needs.
#[derive(Debug, Clone)]
pub struct KubeClient {
    /// HTTP client with the cluster's TLS settings applied.
    client: Client,
    /// API server base URL without a trailing slash.
    base_url: String,
    auth: ClusterAuth,
}

impl KubeClient {
    /// Create a client with the default request timeout.
    pub fn new(config: ClusterConfig) -> ConfigResult<Self> {
        Self::with_timeout(config, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create a client with an explicit request timeout.
    pub fn with_timeout(config: ClusterConfig, timeout: Duration) -> ConfigResult<Self> {
        let mut builder = Client::builder().timeout(timeout);

        if let Some(ref pem) = config.root_ca_pem {
            let certs = Certificate::from_pem_bundle(pem)
                .map_err(|e| ConfigError::Tls(format!("certificate authority: {e}")))?;
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        if config.accept_invalid_certs {
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let ClusterAuth::ClientCertificate { ref identity_pem } = config.auth {
            let identity = Identity::from_pem(identity_pem)
                .map_err(|e| ConfigError::Tls(format!("client certificate: {e}")))?;
            builder = builder.identity(identity);
        }

        Ok(Self {
            client: builder.build()?,
            base_url: config.server.trim_end_matches('/').to_string(),
            auth: config.auth,
        })
    }

    /// API server base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get_namespace(&self, name: &str) -> KubeResult<Namespace> {
        self.get(&format!("/api/v1/namespaces/{name}")).await
    }

    pub async fn create_namespace(&self, namespace: &Namespace) -> KubeResult<Namespace> {
        self.post("/api/v1/namespaces", namespace).await
    }

    pub async fn create_secret(&self, namespace: &str, secret: &Secret) -> KubeResult<Secret> {
        self.post(&format!("/api/v1/namespaces/{namespace}/secrets"), secret)
            .await
    }

    pub async fn delete_secret(&self, namespace: &str, name: &str) -> KubeResult<()> {
        self.delete(&format!("/api/v1/namespaces/{namespace}/secrets/{name}"))
            .await
    }

    pub async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> KubeResult<Deployment> {
        self.post(
            &format!("/apis/apps/v1/namespaces/{namespace}/deployments"),
            deployment,
        )
        .await
    }

    pub async fn delete_deployment(&self, namespace: &str, name: &str) -> KubeResult<()> {
        self.delete(&format!(
            "/apis/apps/v1/namespaces/{namespace}/deployments/{name}"
        ))
        .await
    }

    pub async fn create_service(&self, namespace: &str, service: &Service) -> KubeResult<Service> {
        self.post(&format!("/api/v1/namespaces/{namespace}/services"), service)
            .await
    }

    pub async fn delete_service(&self, namespace: &str, name: &str) -> KubeResult<()> {
        self.delete(&format!("/api/v1/namespaces/{namespace}/services/{name}"))
            .await
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            ClusterAuth::Bearer(token) => request.bearer_auth(token),
            ClusterAuth::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
            // Client certificates are presented during the TLS handshake.
            ClusterAuth::ClientCertificate { .. } | ClusterAuth::None => request,
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> KubeResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.authorize(self.client.get(&url)).send().await?;
        handle_response(response).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> KubeResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .authorize(self.client.post(&url))
            .json(body)
            .send()
            .await?;
        handle_response(response).await
    }

    /// Delete with background propagation so owned ReplicaSets and Pods go too.
    async fn delete(&self, path: &str) -> KubeResult<()> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .authorize(self.client.delete(&url))
            .json(&json!({"propagationPolicy": "Background"}))
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(());
        }
        Err(error_from_response(response).await)
    }
}

/// Handle response and parse JSON or error.
async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> KubeResult<T> {
    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }

    response
        .json()
        .await
        .map_err(|e| KubeError::ParseError(e.to_string()))
}

async fn error_from_response(response: reqwest::Response) -> KubeError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    api_error(status, &body)
}

/// Build an API error from a non-success status and its body, which is a
/// `Status` object for errors raised by the API server itself.
fn api_error(status: StatusCode, body: &str) -> KubeError {
    match serde_json::from_str::<Status>(body) {
        Ok(parsed) if !parsed.message.is_empty() => KubeError::Api {
            code: status.as_u16(),
            reason: parsed.reason,
            message: parsed.message,
        },
        _ => KubeError::Api {
            code: status.as_u16(),
            reason: status
                .canonical_reason()
                .unwrap_or("Unknown")
                .replace(' ', ""),
            message: body.trim().to_string(),
        },
    }
}
