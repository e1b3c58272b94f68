//! Kubernetes API access.
//!
//! Provides an async client for the namespace, secret, deployment and service
//! endpoints used to provision terminals, plus the connection settings to
//! reach an API server from inside or outside the cluster.

mod client;
mod config;
mod error;
pub mod types;

pub use client::{DEFAULT_TIMEOUT_SECS, KubeClient};
pub use config::{ClusterAuth, ClusterConfig, SERVICE_ACCOUNT_DIR};
pub use error::{ConfigError, ConfigResult, KubeError, KubeResult};
pub use types::{Deployment, Namespace, Secret, Service};

use async_trait::async_trait;

/// Kubernetes API abstraction for testability.
#[async_trait]
pub trait KubeApi: Send + Sync {
    async fn get_namespace(&self, name: &str) -> KubeResult<Namespace>;
    async fn create_namespace(&self, namespace: &Namespace) -> KubeResult<Namespace>;

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> KubeResult<Secret>;
    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> KubeResult<Deployment>;
    async fn create_service(&self, namespace: &str, service: &Service) -> KubeResult<Service>;

    async fn delete_secret(&self, namespace: &str, name: &str) -> KubeResult<()>;
    async fn delete_deployment(&self, namespace: &str, name: &str) -> KubeResult<()>;
    async fn delete_service(&self, namespace: &str, name: &str) -> KubeResult<()>;
}

#[async_trait]
impl KubeApi for KubeClient {
    async fn get_namespace(&self, name: &str) -> KubeResult<Namespace> {
        self.get_namespace(name).await
    }

    async fn create_namespace(&self, namespace: &Namespace) -> KubeResult<Namespace> {
        self.create_namespace(namespace).await
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> KubeResult<Secret> {
        self.create_secret(namespace, secret).await
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> KubeResult<Deployment> {
        self.create_deployment(namespace, deployment).await
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> KubeResult<Service> {
        self.create_service(namespace, service).await
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> KubeResult<()> {
        self.delete_secret(namespace, name).await
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> KubeResult<()> {
        self.delete_deployment(namespace, name).await
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> KubeResult<()> {
        self.delete_service(namespace, name).await
    }
}
