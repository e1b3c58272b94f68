//! Terminal session provisioning.
//!
//! A session is one terminal container for one user, backed by a deployment,
//! a NodePort service and, in kubeconfig mode, a secret. The service module
//! sequences their creation; `resources` builds the manifests.

mod error;
pub mod id;
mod models;
pub mod resources;
mod service;

pub use error::{SessionError, SessionResult};
pub use id::{TERMINAL_ID_LEN, is_terminal_id, new_terminal_id};
pub use models::{AuthMode, Session, SessionRequest};
pub use service::{
    DEFAULT_APISERVER, DEFAULT_CONTAINER_PORT, DEFAULT_IMAGE, DEFAULT_KUBECONFIG,
    DEFAULT_TERMINAL_NAMESPACE, REDACTED, SessionPlan, SessionService, TerminalConfig, client_for,
    ensure_namespace, plan_session,
};
