//! Test utilities and common setup.
#![allow(dead_code)]

use async_trait::async_trait;
use kubetty::k8s::{Deployment, KubeApi, KubeError, KubeResult, Namespace, Secret, Service};
use std::collections::BTreeSet;
use std::sync::Mutex;

/// A call made against the fake API, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    GetNamespace(String),
    CreateNamespace(String),
    CreateSecret(String),
    CreateDeployment(String),
    CreateService(String),
    DeleteSecret(String),
    DeleteDeployment(String),
    DeleteService(String),
}

/// Operations the fake can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    GetNamespace,
    CreateNamespace,
    CreateSecret,
    CreateDeployment,
    CreateService,
}

#[derive(Debug, Default)]
struct State {
    namespaces: BTreeSet<String>,
    secrets: Vec<(String, Secret)>,
    deployments: Vec<(String, Deployment)>,
    services: Vec<(String, Service)>,
    calls: Vec<Call>,
    failures: Vec<(Op, u16)>,
    next_node_port: i32,
    omit_node_port: bool,
    omit_response_names: bool,
}

/// In-memory Kubernetes API that records every call.
#[derive(Debug, Default)]
pub struct FakeKube {
    state: Mutex<State>,
}

impl FakeKube {
    pub fn new() -> Self {
        let fake = Self::default();
        fake.state.lock().unwrap().next_node_port = 30000;
        fake
    }

    /// Start with `name` already present.
    pub fn with_namespace(self, name: &str) -> Self {
        self.state.lock().unwrap().namespaces.insert(name.to_string());
        self
    }

    /// Make `op` fail with HTTP `code`.
    pub fn fail(self, op: Op, code: u16) -> Self {
        self.state.lock().unwrap().failures.push((op, code));
        self
    }

    /// Answer service creation without an allocated node port.
    pub fn without_node_ports(self) -> Self {
        self.state.lock().unwrap().omit_node_port = true;
        self
    }

    /// Answer creates with objects whose `metadata.name` is unset.
    pub fn without_response_names(self) -> Self {
        self.state.lock().unwrap().omit_response_names = true;
        self
    }

    fn respond<T: Clone>(&self, object: &T, clear_name: impl FnOnce(&mut T)) -> T {
        let mut response = object.clone();
        if self.state.lock().unwrap().omit_response_names {
            clear_name(&mut response);
        }
        response
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn has_namespace(&self, name: &str) -> bool {
        self.state.lock().unwrap().namespaces.contains(name)
    }

    pub fn secrets(&self) -> Vec<(String, Secret)> {
        self.state.lock().unwrap().secrets.clone()
    }

    pub fn deployments(&self) -> Vec<(String, Deployment)> {
        self.state.lock().unwrap().deployments.clone()
    }

    pub fn services(&self) -> Vec<(String, Service)> {
        self.state.lock().unwrap().services.clone()
    }

    fn record(&self, call: Call, op: Option<Op>) -> KubeResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if let Some(op) = op
            && let Some((_, code)) = state.failures.iter().find(|(o, _)| *o == op)
        {
            return Err(api_error(*code, "injected failure"));
        }
        Ok(())
    }
}

pub fn api_error(code: u16, message: &str) -> KubeError {
    let reason = match code {
        404 => "NotFound",
        409 => "AlreadyExists",
        403 => "Forbidden",
        _ => "InternalError",
    };
    KubeError::Api {
        code,
        reason: reason.to_string(),
        message: message.to_string(),
    }
}

fn name_of(meta_name: &Option<String>) -> String {
    meta_name.clone().unwrap_or_default()
}

#[async_trait]
impl KubeApi for FakeKube {
    async fn get_namespace(&self, name: &str) -> KubeResult<Namespace> {
        self.record(Call::GetNamespace(name.to_string()), Some(Op::GetNamespace))?;
        if self.has_namespace(name) {
            Ok(Namespace::new(name))
        } else {
            Err(api_error(404, &format!("namespaces \"{name}\" not found")))
        }
    }

    async fn create_namespace(&self, namespace: &Namespace) -> KubeResult<Namespace> {
        let name = name_of(&namespace.metadata.name);
        self.record(Call::CreateNamespace(name.clone()), Some(Op::CreateNamespace))?;
        let mut state = self.state.lock().unwrap();
        if !state.namespaces.insert(name.clone()) {
            return Err(api_error(
                409,
                &format!("namespaces \"{name}\" already exists"),
            ));
        }
        Ok(namespace.clone())
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> KubeResult<Secret> {
        let name = name_of(&secret.metadata.name);
        self.record(Call::CreateSecret(name), Some(Op::CreateSecret))?;
        self.state
            .lock()
            .unwrap()
            .secrets
            .push((namespace.to_string(), secret.clone()));
        Ok(self.respond(secret, |s| s.metadata.name = None))
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> KubeResult<Deployment> {
        let name = name_of(&deployment.metadata.name);
        self.record(Call::CreateDeployment(name), Some(Op::CreateDeployment))?;
        self.state
            .lock()
            .unwrap()
            .deployments
            .push((namespace.to_string(), deployment.clone()));
        Ok(self.respond(deployment, |d| d.metadata.name = None))
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> KubeResult<Service> {
        let name = name_of(&service.metadata.name);
        self.record(Call::CreateService(name), Some(Op::CreateService))?;
        let mut state = self.state.lock().unwrap();
        let mut created = service.clone();
        if !state.omit_node_port {
            let port = state.next_node_port;
            state.next_node_port += 1;
            if let Some(spec) = created.spec.as_mut() {
                for p in spec.ports.iter_mut() {
                    p.node_port = Some(port);
                }
            }
        }
        state
            .services
            .push((namespace.to_string(), created.clone()));
        drop(state);
        Ok(self.respond(&created, |s| s.metadata.name = None))
    }

    async fn delete_secret(&self, _namespace: &str, name: &str) -> KubeResult<()> {
        self.record(Call::DeleteSecret(name.to_string()), None)?;
        let mut state = self.state.lock().unwrap();
        state
            .secrets
            .retain(|(_, s)| s.metadata.name.as_deref() != Some(name));
        Ok(())
    }

    async fn delete_deployment(&self, _namespace: &str, name: &str) -> KubeResult<()> {
        self.record(Call::DeleteDeployment(name.to_string()), None)?;
        let mut state = self.state.lock().unwrap();
        state
            .deployments
            .retain(|(_, d)| d.metadata.name.as_deref() != Some(name));
        Ok(())
    }

    async fn delete_service(&self, _namespace: &str, name: &str) -> KubeResult<()> {
        self.record(Call::DeleteService(name.to_string()), None)?;
        let mut state = self.state.lock().unwrap();
        state
            .services
            .retain(|(_, s)| s.metadata.name.as_deref() != Some(name));
        Ok(())
    }
}
