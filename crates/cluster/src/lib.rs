//! Node-local control plane of the secret service.
//!
//! Brings up this node's member of the replicated store, either by joining
//! the existing cluster (repairing stale membership left behind by a crash
//! first) or by bootstrapping a new one, configures certificate-based access
//! control, and exposes atomic, optionally expiring writes and deletes of
//! secrets.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod acquire;
mod auth;
mod config;
mod error;
mod launcher;
mod membership;
mod secrets;

pub use acquire::{AcquisitionOptions, ClusterAcquisition, NodeRole};
pub use auth::{AuthBootstrapper, CLIENT_PRINCIPAL, SECRET_PREFIX};
pub use config::{
    CLIENT_PORT, DEFAULT_STATEFUL_SET, LaunchOptions, PEER_PORT, ServiceNames, hostname,
};
pub use error::{Error, Result};
pub use launcher::{ClusterLauncher, JoinMethod};
pub use membership::{ClusterMember, MembershipRepairer};
pub use secrets::SecretStore;
