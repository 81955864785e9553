//! Abstract interface for an embedded, replicated key-value store engine.
//!
//! The engine runs inside the same process as its caller. Callers start a
//! server from a [`ServerConfig`], wait for it to become ready, and then talk
//! to it through direct in-process calls carrying a [`LocalAuthContext`].
//! Cluster membership is managed through a network client obtained from a
//! [`ClusterConnector`].
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod auth;
mod config;
mod member;
mod txn;

pub use auth::{AuthStatus, LocalAuthContext, Permission, PermissionType, ROOT, UserAddOptions};
pub use config::{ClientConfig, ClientTlsInfo, ClusterState, InitialCluster, ServerConfig, TlsInfo};
pub use member::Member;
pub use txn::{
    Compare, CompareOp, CompareTarget, KeyValue, Lease, LeaseId, RequestOp, ResponseOp,
    TxnRequest, TxnResponse,
};

use std::error::Error;
use std::fmt::{self, Debug, Display};

use async_trait::async_trait;
use url::Url;

/// The kind of engine error.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KvErrorKind {
    /// The target already exists (duplicate role, user, member, ...).
    AlreadyExists,

    /// The request was malformed or exceeded an engine limit.
    InvalidArgument,

    /// The target does not exist.
    NotFound,

    /// The caller's identity is not allowed to perform the request.
    PermissionDenied,

    /// The server has been closed.
    Stopped,

    /// No server could be reached.
    Unavailable,

    /// Other/unknown error.
    Other,
}

impl Display for KvErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Marker trait for engine errors.
pub trait KvError: Debug + Error + Send + Sync + 'static {
    /// Returns the kind of this error.
    fn kind(&self) -> KvErrorKind;
}

/// Starts engine servers.
#[async_trait]
pub trait KvEngine
where
    Self: Clone + Send + Sync + 'static,
{
    /// The error type for this engine.
    type Error: KvError;

    /// The running server type.
    type Server: KvServer<Error = Self::Error>;

    /// Starts a server with the given configuration.
    ///
    /// Returning successfully does not mean the server is ready to serve
    /// requests; callers must wait on [`KvServer::ready`].
    async fn start(&self, config: ServerConfig) -> Result<Self::Server, Self::Error>;
}

/// A running, in-process engine server.
///
/// Every request carries the identity it is authorized as. Once authorization
/// is enabled, the server checks that identity against its users and roles.
#[async_trait]
pub trait KvServer
where
    Self: Send + Sync + 'static,
{
    /// The error type for this server.
    type Error: KvError;

    /// The member name of this server.
    fn name(&self) -> &str;

    /// Resolves once the server has joined its cluster and can serve requests.
    async fn ready(&self);

    /// Stops the server. Calling it more than once has no further effect.
    fn close(&self);

    /// Executes a compare-and-swap transaction.
    async fn txn(
        &self,
        ctx: &LocalAuthContext,
        request: TxnRequest,
    ) -> Result<TxnResponse, Self::Error>;

    /// Grants a new lease with the given TTL in seconds.
    async fn lease_grant(&self, ctx: &LocalAuthContext, ttl: i64) -> Result<Lease, Self::Error>;

    /// Revokes a lease, deleting every key attached to it.
    async fn lease_revoke(&self, ctx: &LocalAuthContext, id: LeaseId) -> Result<(), Self::Error>;

    /// Reports whether authorization is enabled.
    async fn auth_status(&self, ctx: &LocalAuthContext) -> Result<AuthStatus, Self::Error>;

    /// Creates a role without permissions.
    async fn role_add(&self, ctx: &LocalAuthContext, name: &str) -> Result<(), Self::Error>;

    /// Grants a key-range permission to a role.
    async fn role_grant_permission(
        &self,
        ctx: &LocalAuthContext,
        role: &str,
        permission: Permission,
    ) -> Result<(), Self::Error>;

    /// Creates a user.
    async fn user_add(
        &self,
        ctx: &LocalAuthContext,
        name: &str,
        options: UserAddOptions,
    ) -> Result<(), Self::Error>;

    /// Grants a role to a user.
    async fn user_grant_role(
        &self,
        ctx: &LocalAuthContext,
        user: &str,
        role: &str,
    ) -> Result<(), Self::Error>;

    /// Enables authorization cluster-wide.
    async fn auth_enable(&self, ctx: &LocalAuthContext) -> Result<(), Self::Error>;
}

/// Opens network clients to a running cluster.
#[async_trait]
pub trait ClusterConnector
where
    Self: Clone + Send + Sync + 'static,
{
    /// The error type for this connector.
    type Error: KvError;

    /// The client type.
    type Client: ClusterClient<Error = Self::Error>;

    /// Connects to one of the given endpoints, authenticating with the
    /// configured client certificate.
    async fn connect(&self, config: ClientConfig) -> Result<Self::Client, Self::Error>;
}

/// Membership operations against a running cluster.
#[async_trait]
pub trait ClusterClient
where
    Self: Send + Sync + 'static,
{
    /// The error type for this client.
    type Error: KvError;

    /// Lists the current members.
    async fn member_list(&self) -> Result<Vec<Member>, Self::Error>;

    /// Registers a new, not yet started member advertising `peer_urls`.
    async fn member_add(&self, peer_urls: Vec<Url>) -> Result<Member, Self::Error>;

    /// Removes the member with the given ID, returning the remaining members.
    async fn member_remove(&self, id: u64) -> Result<Vec<Member>, Self::Error>;
}
