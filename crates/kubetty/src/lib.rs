//! kubetty library
//!
//! Provisions per-user web terminal sessions on Kubernetes: one deployment
//! and one NodePort service per terminal, plus a kubeconfig secret when the
//! terminal authenticates with a mounted kubeconfig.

pub mod k8s;
pub mod session;
