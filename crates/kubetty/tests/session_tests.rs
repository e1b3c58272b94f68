//! End-to-end provisioning tests against an in-memory Kubernetes API.
//!
//! Tests cover:
//! - Token and kubeconfig provisioning flows
//! - Namespace creation and idempotence
//! - Failure propagation and optional rollback
//! - Lenient and strict credential reads

mod common;

use common::{Call, FakeKube, Op};
use kubetty::k8s::KubeError;
use kubetty::session::resources::{TERMINAL_ID_LABEL, secret_name};
use kubetty::session::{
    AuthMode, SessionError, SessionRequest, SessionService, TerminalConfig, ensure_namespace,
    is_terminal_id,
};
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

const NS: &str = "sealyun-tty";

fn service(fake: &Arc<FakeKube>, config: TerminalConfig) -> SessionService {
    SessionService::new(fake.clone(), config)
}

fn kubeconfig_file(contents: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents).unwrap();
    file
}

fn env_names(fake: &FakeKube) -> Vec<String> {
    let (_, deployment) = &fake.deployments()[0];
    deployment.spec.as_ref().unwrap().template.spec.containers[0]
        .env
        .iter()
        .map(|e| e.name.clone())
        .collect()
}

// ============================================================================
// Token mode
// ============================================================================

mod token_mode {
    use super::*;

    #[tokio::test]
    async fn test_provisions_deployment_and_service() {
        let fake = Arc::new(FakeKube::new());
        let request = SessionRequest::new("alice", "user-token").namespace("default");

        let session = service(&fake, TerminalConfig::default())
            .create(&request)
            .await
            .unwrap();

        assert_eq!(session.id.len(), 32);
        assert!(is_terminal_id(&session.id));
        assert_eq!(session.endpoint, "30000");
        assert!(session.endpoint.parse::<u16>().is_ok());
        assert_eq!(session.namespace, NS);
        assert_eq!(session.deployment, format!("deploy-{}", session.id));
        assert_eq!(session.service, format!("svc-{}", session.id));
        assert_eq!(session.secret, None);

        assert_eq!(
            fake.calls(),
            vec![
                Call::GetNamespace(NS.to_string()),
                Call::CreateNamespace(NS.to_string()),
                Call::CreateDeployment(session.deployment.clone()),
                Call::CreateService(session.service.clone()),
            ]
        );
        assert!(fake.secrets().is_empty());
    }

    #[tokio::test]
    async fn test_workload_carries_five_env_vars_and_no_volumes() {
        let fake = Arc::new(FakeKube::new().with_namespace(NS));
        let request = SessionRequest::new("alice", "user-token")
            .apiserver("https://10.96.0.1:443")
            .namespace("team-a");

        let session = service(&fake, TerminalConfig::default())
            .create(&request)
            .await
            .unwrap();

        let (ns, deployment) = &fake.deployments()[0];
        assert_eq!(ns, NS);
        let pod = &deployment.spec.as_ref().unwrap().template.spec;
        assert!(pod.volumes.is_empty());
        assert!(pod.containers[0].volume_mounts.is_empty());

        let env: Vec<(String, String)> = pod.containers[0]
            .env
            .iter()
            .map(|e| (e.name.clone(), e.value.clone().unwrap_or_default()))
            .collect();
        assert_eq!(
            env,
            vec![
                ("APISERVER".to_string(), "https://10.96.0.1:443".to_string()),
                ("USER_TOKEN".to_string(), "user-token".to_string()),
                ("NAMESPACE".to_string(), "team-a".to_string()),
                ("USER_NAME".to_string(), "alice".to_string()),
                ("TERMINAL_ID".to_string(), session.id.clone()),
            ]
        );
    }

    #[tokio::test]
    async fn test_service_selector_matches_pod_labels() {
        let fake = Arc::new(FakeKube::new().with_namespace(NS));
        let session = service(&fake, TerminalConfig::default())
            .create(&SessionRequest::new("alice", "tok"))
            .await
            .unwrap();

        let (_, deployment) = &fake.deployments()[0];
        let (_, svc) = &fake.services()[0];
        let pod_labels = &deployment.spec.as_ref().unwrap().template.metadata.labels;
        let selector = &svc.spec.as_ref().unwrap().selector;

        assert_eq!(selector, pod_labels);
        assert_eq!(selector.get(TERMINAL_ID_LABEL), Some(&session.id));
    }

    #[tokio::test]
    async fn test_sessions_get_distinct_ids_and_ports() {
        let fake = Arc::new(FakeKube::new());
        let svc = service(&fake, TerminalConfig::default());
        let request = SessionRequest::new("alice", "tok");

        let first = svc.create(&request).await.unwrap();
        let second = svc.create(&request).await.unwrap();

        assert_ne!(first.id, second.id);
        assert_ne!(first.endpoint, second.endpoint);
        assert_eq!(fake.deployments().len(), 2);
        assert_eq!(fake.services().len(), 2);
    }

    #[tokio::test]
    async fn test_configured_namespace_and_image() {
        let fake = Arc::new(FakeKube::new());
        let config = TerminalConfig {
            namespace: "terminals".to_string(),
            default_image: "registry.local/tty:2".to_string(),
            container_port: 7681,
            ..Default::default()
        };

        let session = service(&fake, config)
            .create(&SessionRequest::new("alice", "tok"))
            .await
            .unwrap();

        assert_eq!(session.namespace, "terminals");
        assert!(fake.has_namespace("terminals"));
        let (_, deployment) = &fake.deployments()[0];
        let container = &deployment.spec.as_ref().unwrap().template.spec.containers[0];
        assert_eq!(container.image, "registry.local/tty:2");
        assert_eq!(container.ports[0].container_port, 7681);
        let (_, svc) = &fake.services()[0];
        assert_eq!(svc.spec.as_ref().unwrap().ports[0].port, 7681);
    }
}

// ============================================================================
// Kubeconfig mode
// ============================================================================

mod kubeconfig_mode {
    use super::*;

    #[tokio::test]
    async fn test_secret_created_before_workload_and_mounted() {
        let fake = Arc::new(FakeKube::new().with_namespace(NS));
        let file = kubeconfig_file(b"apiVersion: v1\nkind: Config\n");
        let request = SessionRequest::with_kubeconfig(file.path());
        assert_eq!(request.auth_mode, AuthMode::Kubeconfig);

        let session = service(&fake, TerminalConfig::default())
            .create(&request)
            .await
            .unwrap();

        let secret = secret_name(&session.id);
        assert_eq!(session.secret.as_deref(), Some(secret.as_str()));
        assert_eq!(
            fake.calls(),
            vec![
                Call::GetNamespace(NS.to_string()),
                Call::CreateSecret(secret.clone()),
                Call::CreateDeployment(session.deployment.clone()),
                Call::CreateService(session.service.clone()),
            ]
        );

        let (ns, stored) = &fake.secrets()[0];
        assert_eq!(ns, NS);
        assert_eq!(stored.data["config"], b"apiVersion: v1\nkind: Config\n".to_vec());

        assert_eq!(env_names(&fake), vec!["TERMINAL_ID".to_string()]);

        let (_, deployment) = &fake.deployments()[0];
        let pod = &deployment.spec.as_ref().unwrap().template.spec;
        let mounts = &pod.containers[0].volume_mounts;
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].mount_path, "/root/.kube");
        assert_eq!(mounts[0].read_only, Some(true));
        assert_eq!(
            pod.volumes[0].secret.as_ref().unwrap().secret_name.as_deref(),
            Some(secret.as_str())
        );
    }

    #[tokio::test]
    async fn test_unreadable_file_gives_empty_secret_by_default() {
        let fake = Arc::new(FakeKube::new().with_namespace(NS));
        let dir = tempfile::TempDir::new().unwrap();
        let request = SessionRequest::with_kubeconfig(dir.path().join("missing"));

        let session = service(&fake, TerminalConfig::default())
            .create(&request)
            .await
            .unwrap();

        assert!(session.secret.is_some());
        let (_, stored) = &fake.secrets()[0];
        assert_eq!(stored.data["config"], Vec::<u8>::new());
    }

    #[tokio::test]
    async fn test_unreadable_file_fails_in_strict_mode() {
        let fake = Arc::new(FakeKube::new().with_namespace(NS));
        let dir = tempfile::TempDir::new().unwrap();
        let request = SessionRequest::with_kubeconfig(dir.path().join("missing"));
        let config = TerminalConfig {
            strict_credential_read: true,
            ..Default::default()
        };

        let err = service(&fake, config).create(&request).await.unwrap_err();

        assert!(matches!(err, SessionError::CredentialRead { .. }));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_secret_failure_is_surfaced() {
        let fake = Arc::new(FakeKube::new().with_namespace(NS).fail(Op::CreateSecret, 403));
        let file = kubeconfig_file(b"config");

        let err = service(&fake, TerminalConfig::default())
            .create(&SessionRequest::with_kubeconfig(file.path()))
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Kube(KubeError::Api { code: 403, .. })));
        assert!(fake.deployments().is_empty());
        assert!(fake.services().is_empty());
    }
}

// ============================================================================
// Namespace
// ============================================================================

mod namespace {
    use super::*;

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let fake = FakeKube::new();

        ensure_namespace(&fake, NS).await.unwrap();
        ensure_namespace(&fake, NS).await.unwrap();

        assert!(fake.has_namespace(NS));
        assert_eq!(
            fake.calls(),
            vec![
                Call::GetNamespace(NS.to_string()),
                Call::CreateNamespace(NS.to_string()),
                Call::GetNamespace(NS.to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_read_failure_falls_through_to_create() {
        let fake = FakeKube::new().fail(Op::GetNamespace, 403);

        ensure_namespace(&fake, NS).await.unwrap();

        assert!(fake.has_namespace(NS));
    }

    #[tokio::test]
    async fn test_existing_namespace_on_create_is_not_an_error() {
        // Read fails but the namespace is there: create answers 409.
        let fake = FakeKube::new()
            .with_namespace(NS)
            .fail(Op::GetNamespace, 500);

        ensure_namespace(&fake, NS).await.unwrap();

        assert_eq!(
            fake.calls(),
            vec![
                Call::GetNamespace(NS.to_string()),
                Call::CreateNamespace(NS.to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_create_failure_propagates() {
        let fake = Arc::new(FakeKube::new().fail(Op::CreateNamespace, 403));

        let err = service(&fake, TerminalConfig::default())
            .create(&SessionRequest::new("alice", "tok"))
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Kube(ref e) if e.status_code() == Some(403)));
        assert!(fake.deployments().is_empty());
    }
}

// ============================================================================
// Failures and rollback
// ============================================================================

mod failures {
    use super::*;

    #[tokio::test]
    async fn test_workload_failure_stops_before_endpoint() {
        let fake = Arc::new(
            FakeKube::new()
                .with_namespace(NS)
                .fail(Op::CreateDeployment, 422),
        );

        let err = service(&fake, TerminalConfig::default())
            .create(&SessionRequest::new("alice", "tok"))
            .await
            .unwrap_err();

        match err {
            SessionError::Kube(KubeError::Api { code, message, .. }) => {
                assert_eq!(code, 422);
                assert_eq!(message, "injected failure");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(
            !fake
                .calls()
                .iter()
                .any(|c| matches!(c, Call::CreateService(_)))
        );
    }

    #[tokio::test]
    async fn test_endpoint_failure_leaves_objects_by_default() {
        let fake = Arc::new(
            FakeKube::new()
                .with_namespace(NS)
                .fail(Op::CreateService, 500),
        );

        let err = service(&fake, TerminalConfig::default())
            .create(&SessionRequest::new("alice", "tok"))
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Kube(_)));
        assert_eq!(fake.deployments().len(), 1);
        assert!(
            !fake
                .calls()
                .iter()
                .any(|c| matches!(c, Call::DeleteDeployment(_)))
        );
    }

    #[tokio::test]
    async fn test_rollback_deletes_created_objects_newest_first() {
        let fake = Arc::new(FakeKube::new().with_namespace(NS).without_node_ports());
        let file = kubeconfig_file(b"config");
        let config = TerminalConfig {
            cleanup_on_failure: true,
            ..Default::default()
        };

        let err = service(&fake, config)
            .create(&SessionRequest::with_kubeconfig(file.path()))
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Kube(KubeError::MissingField(_))));

        let deletes: Vec<Call> = fake
            .calls()
            .into_iter()
            .filter(|c| {
                matches!(
                    c,
                    Call::DeleteSecret(_) | Call::DeleteDeployment(_) | Call::DeleteService(_)
                )
            })
            .collect();
        assert_eq!(deletes.len(), 3);
        assert!(matches!(deletes[0], Call::DeleteService(_)));
        assert!(matches!(deletes[1], Call::DeleteDeployment(_)));
        assert!(matches!(deletes[2], Call::DeleteSecret(_)));

        assert!(fake.secrets().is_empty());
        assert!(fake.deployments().is_empty());
        assert!(fake.services().is_empty());
    }

    #[tokio::test]
    async fn test_rollback_uses_planned_names_when_responses_omit_them() {
        let fake = Arc::new(
            FakeKube::new()
                .with_namespace(NS)
                .without_node_ports()
                .without_response_names(),
        );
        let file = kubeconfig_file(b"config");
        let config = TerminalConfig {
            cleanup_on_failure: true,
            ..Default::default()
        };

        service(&fake, config)
            .create(&SessionRequest::with_kubeconfig(file.path()))
            .await
            .unwrap_err();

        let deletes: Vec<String> = fake
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::DeleteSecret(name)
                | Call::DeleteDeployment(name)
                | Call::DeleteService(name) => Some(name),
                _ => None,
            })
            .collect();
        assert_eq!(deletes.len(), 3);
        assert!(deletes[0].starts_with("svc-"), "{deletes:?}");
        assert!(deletes[1].starts_with("deploy-"), "{deletes:?}");
        assert!(deletes[2].starts_with("secret-"), "{deletes:?}");
        assert!(fake.deployments().is_empty());
        assert!(fake.services().is_empty());
        assert!(fake.secrets().is_empty());
    }

    #[tokio::test]
    async fn test_rollback_only_touches_what_was_created() {
        let fake = Arc::new(
            FakeKube::new()
                .with_namespace(NS)
                .fail(Op::CreateDeployment, 500),
        );
        let config = TerminalConfig {
            cleanup_on_failure: true,
            ..Default::default()
        };

        service(&fake, config)
            .create(&SessionRequest::new("alice", "tok"))
            .await
            .unwrap_err();

        assert!(
            !fake.calls().iter().any(|c| matches!(
                c,
                Call::DeleteSecret(_) | Call::DeleteDeployment(_) | Call::DeleteService(_)
            ))
        );
    }
}
