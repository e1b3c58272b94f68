//! Manifests for the objects backing a terminal.
//!
//! Every object is named `<role>-<terminal id>` and carries the
//! `TerminalID=<id>` label; the service selects pods by that same label.

use std::collections::BTreeMap;

use crate::k8s::types::{
    Container, ContainerPort, DeploymentSpec, EnvVar, IntOrString, LabelSelector, Labels,
    ObjectMeta, PodSpec, PodTemplateSpec, SecretVolumeSource, ServicePort, ServiceSpec, Volume,
    VolumeMount,
};
use crate::k8s::{Deployment, KubeError, KubeResult, Secret, Service};

/// Label selecting everything that belongs to one terminal.
pub const TERMINAL_ID_LABEL: &str = "TerminalID";

/// Name of the terminal container.
pub const CONTAINER_NAME: &str = "tty";

/// Secret key holding the kubeconfig bytes.
pub const KUBECONFIG_SECRET_KEY: &str = "config";

const KUBECONFIG_VOLUME: &str = "kube-config";

/// Env var carrying the user's token in token mode.
pub const USER_TOKEN_ENV: &str = "USER_TOKEN";

/// Where the terminal image expects its kubeconfig directory.
pub const KUBECONFIG_MOUNT_PATH: &str = "/root/.kube";

pub fn deployment_name(id: &str) -> String {
    format!("deploy-{id}")
}

pub fn service_name(id: &str) -> String {
    format!("svc-{id}")
}

pub fn secret_name(id: &str) -> String {
    format!("secret-{id}")
}

pub fn terminal_labels(id: &str) -> Labels {
    BTreeMap::from([(TERMINAL_ID_LABEL.to_string(), id.to_string())])
}

/// How the terminal container gets its cluster credentials.
#[derive(Debug, Clone, Copy)]
pub enum WorkloadAuth<'a> {
    Token {
        apiserver: &'a str,
        user_token: &'a str,
        namespace: &'a str,
        user: &'a str,
    },
    /// Mount `secret-<id>` at [`KUBECONFIG_MOUNT_PATH`].
    MountedKubeconfig,
}

/// Opaque secret holding the kubeconfig for a terminal.
pub fn build_secret(id: &str, kubeconfig: Vec<u8>) -> Secret {
    let mut secret = Secret::opaque(ObjectMeta::named(secret_name(id)).labels(terminal_labels(id)));
    secret
        .data
        .insert(KUBECONFIG_SECRET_KEY.to_string(), kubeconfig);
    secret
}

/// Single-replica deployment running the terminal container.
pub fn build_deployment(id: &str, image: &str, port: u16, auth: WorkloadAuth<'_>) -> Deployment {
    let (env, volumes, volume_mounts) = match auth {
        WorkloadAuth::Token {
            apiserver,
            user_token,
            namespace,
            user,
        } => (
            vec![
                EnvVar::new("APISERVER", apiserver),
                EnvVar::new(USER_TOKEN_ENV, user_token),
                EnvVar::new("NAMESPACE", namespace),
                EnvVar::new("USER_NAME", user),
                EnvVar::new("TERMINAL_ID", id),
            ],
            Vec::new(),
            Vec::new(),
        ),
        WorkloadAuth::MountedKubeconfig => (
            vec![EnvVar::new("TERMINAL_ID", id)],
            vec![Volume {
                name: KUBECONFIG_VOLUME.to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(secret_name(id)),
                }),
            }],
            vec![VolumeMount {
                name: KUBECONFIG_VOLUME.to_string(),
                mount_path: KUBECONFIG_MOUNT_PATH.to_string(),
                read_only: Some(true),
            }],
        ),
    };

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: image.to_string(),
        env,
        ports: vec![ContainerPort {
            name: Some("http".to_string()),
            container_port: i32::from(port),
            protocol: Some("TCP".to_string()),
        }],
        volume_mounts,
    };

    Deployment::new(
        ObjectMeta::named(deployment_name(id)).labels(terminal_labels(id)),
        DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: terminal_labels(id),
            },
            template: PodTemplateSpec {
                metadata: ObjectMeta::default().labels(terminal_labels(id)),
                spec: PodSpec {
                    containers: vec![container],
                    volumes,
                },
            },
        },
    )
}

/// NodePort service exposing the terminal container.
pub fn build_service(id: &str, port: u16) -> Service {
    Service::new(
        ObjectMeta::named(service_name(id)).labels(terminal_labels(id)),
        ServiceSpec {
            type_: Some("NodePort".to_string()),
            selector: terminal_labels(id),
            ports: vec![ServicePort {
                name: Some(CONTAINER_NAME.to_string()),
                port: i32::from(port),
                target_port: Some(IntOrString::Int(i32::from(port))),
                node_port: None,
                protocol: Some("TCP".to_string()),
            }],
        },
    )
}

/// The externally reachable endpoint of a created service.
pub fn node_port_endpoint(service: &Service) -> KubeResult<String> {
    service
        .first_node_port()
        .map(|port| port.to_string())
        .ok_or_else(|| KubeError::MissingField("spec.ports[0].nodePort".to_string()))
}
