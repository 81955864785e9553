use crate::error::{Error, Result};
use crate::network::MemoryNetwork;
use crate::state::Cluster;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use secret_kv::{
    AuthStatus, KvServer, Lease, LeaseId, LocalAuthContext, Permission, ServerConfig, TxnRequest,
    TxnResponse, UserAddOptions,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Clone, Debug)]
struct Attachment {
    cluster: Arc<Cluster>,
    member_id: u64,
}

/// One started server as seen by the network and by clients.
#[derive(Debug)]
pub struct Node {
    pub config: ServerConfig,
    attachment: RwLock<Option<Attachment>>,
    pub shutdown: CancellationToken,
    ready: watch::Sender<bool>,
}

impl Node {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            attachment: RwLock::new(None),
            shutdown: CancellationToken::new(),
            ready: watch::Sender::new(false),
        }
    }

    pub fn attach(&self, cluster: Arc<Cluster>, member_id: u64) {
        *self.attachment.write() = Some(Attachment {
            cluster,
            member_id,
        });
        self.ready.send_replace(true);

        info!(name = %self.config.name, member_id = %format_args!("{member_id:x}"), "server ready");
    }

    /// The cluster this server serves, if it is running and attached.
    pub fn cluster(&self) -> Result<Arc<Cluster>> {
        if self.shutdown.is_cancelled() {
            return Err(Error::Stopped);
        }

        self.attachment
            .read()
            .as_ref()
            .map(|attachment| attachment.cluster.clone())
            .ok_or_else(|| {
                Error::Unavailable(format!("{} has not joined a cluster", self.config.name))
            })
    }

    pub fn is_attached(&self) -> bool {
        !self.shutdown.is_cancelled() && self.attachment.read().is_some()
    }

    pub fn is_member(&self, cluster: &Arc<Cluster>, member_id: u64) -> bool {
        self.attachment.read().as_ref().is_some_and(|attachment| {
            Arc::ptr_eq(&attachment.cluster, cluster) && attachment.member_id == member_id
        })
    }
}

/// A running in-memory server.
#[derive(Debug)]
pub struct MemoryServer {
    node: Arc<Node>,
    network: MemoryNetwork,
}

impl MemoryServer {
    pub(crate) const fn new(node: Arc<Node>, network: MemoryNetwork) -> Self {
        Self { node, network }
    }

    fn cluster(&self) -> Result<Arc<Cluster>> {
        self.node.cluster()
    }
}

#[async_trait]
impl KvServer for MemoryServer {
    type Error = Error;

    fn name(&self) -> &str {
        &self.node.config.name
    }

    async fn ready(&self) {
        let mut ready = self.node.ready.subscribe();
        let became_ready = ready.wait_for(|ready| *ready).await.is_ok();

        if !became_ready {
            std::future::pending::<()>().await;
        }
    }

    fn close(&self) {
        if self.node.shutdown.is_cancelled() {
            return;
        }

        self.node.shutdown.cancel();
        self.network.unlisten(&self.node);

        info!(name = %self.node.config.name, "server closed");
    }

    async fn txn(&self, ctx: &LocalAuthContext, request: TxnRequest) -> Result<TxnResponse> {
        self.cluster()?
            .lock()
            .txn(ctx.common_name(), request, self.node.config.max_txn_ops)
    }

    async fn lease_grant(&self, ctx: &LocalAuthContext, ttl: i64) -> Result<Lease> {
        self.cluster()?.lock().lease_grant(ctx.common_name(), ttl)
    }

    async fn lease_revoke(&self, ctx: &LocalAuthContext, id: LeaseId) -> Result<()> {
        self.cluster()?.lock().lease_revoke(ctx.common_name(), id)
    }

    async fn auth_status(&self, ctx: &LocalAuthContext) -> Result<AuthStatus> {
        self.cluster()?.lock().auth_status(ctx.common_name())
    }

    async fn role_add(&self, ctx: &LocalAuthContext, name: &str) -> Result<()> {
        self.cluster()?.lock().role_add(ctx.common_name(), name)
    }

    async fn role_grant_permission(
        &self,
        ctx: &LocalAuthContext,
        role: &str,
        permission: Permission,
    ) -> Result<()> {
        self.cluster()?
            .lock()
            .role_grant_permission(ctx.common_name(), role, permission)
    }

    async fn user_add(
        &self,
        ctx: &LocalAuthContext,
        name: &str,
        _options: UserAddOptions,
    ) -> Result<()> {
        // Users only ever authenticate by certificate here.
        self.cluster()?.lock().user_add(ctx.common_name(), name)
    }

    async fn user_grant_role(&self, ctx: &LocalAuthContext, user: &str, role: &str) -> Result<()> {
        self.cluster()?
            .lock()
            .user_grant_role(ctx.common_name(), user, role)
    }

    async fn auth_enable(&self, ctx: &LocalAuthContext) -> Result<()> {
        self.cluster()?.lock().auth_enable(ctx.common_name())
    }
}
