use crate::auth::AuthBootstrapper;
use crate::config::LaunchOptions;
use crate::error::{Error, Result};
use crate::membership::{ClusterMember, MembershipRepairer};
use crate::secrets::SecretStore;

use std::future::Future;
use std::sync::Arc;

use scopeguard::ScopeGuard;
use secret_kv::{ClusterConnector, ClusterState, KvEngine, KvServer, LocalAuthContext};
use secret_pki::CertificateIdentity;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How the store on this node comes up.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JoinMethod {
    /// Create a new cluster with this node as its only member.
    Bootstrap,

    /// Join an existing cluster, repairing this node's membership first.
    Join,
}

/// Starts the store on this node and hands out a [`SecretStore`] once it is
/// ready and authorization is configured.
pub struct ClusterLauncher<E, C> {
    engine: E,
    connector: C,
    options: LaunchOptions,
    ctx: LocalAuthContext,
}

impl<E, C> ClusterLauncher<E, C>
where
    E: KvEngine,
    C: ClusterConnector<Error = E::Error>,
{
    /// Creates a launcher.
    ///
    /// The node's certificate is read here: its common name is the identity
    /// every in-process request is authorized as.
    ///
    /// # Errors
    ///
    /// Returns an error if the certificate cannot be read or the node name
    /// does not follow the naming convention.
    pub fn new(engine: E, connector: C, options: LaunchOptions) -> Result<Self, E::Error> {
        if options.names.ordinal(&options.node_name).is_none() {
            return Err(Error::Config(format!(
                "node name {:?} does not end in an ordinal",
                options.node_name
            )));
        }

        let identity =
            CertificateIdentity::from_pem_file(&options.cert_file).map_err(Error::Certificate)?;
        let ctx = LocalAuthContext::from_certificate_identity(identity.common_name());

        Ok(Self {
            engine,
            connector,
            options,
            ctx,
        })
    }

    /// The options the store is launched with.
    pub const fn options(&self) -> &LaunchOptions {
        &self.options
    }

    /// Starts the store with the given method and waits until it is ready.
    ///
    /// On the join path every failure before the store has started is an
    /// [`Error::Join`]. A store that was started but fails to become ready,
    /// fails to configure authorization, or is cancelled is closed before
    /// returning.
    ///
    /// # Errors
    ///
    /// Returns an error if any phase fails or `cancel` fires.
    pub async fn launch(
        &self,
        method: JoinMethod,
        cancel: &CancellationToken,
    ) -> Result<SecretStore<E::Server>, E::Error> {
        let config = match method {
            JoinMethod::Bootstrap => self.options.server_config(&[], ClusterState::New)?,
            JoinMethod::Join => {
                let peers = self.discover(cancel).await.map_err(into_join_error)?;
                self.options
                    .server_config(&peers, ClusterState::Existing)
                    .map_err(|e| into_join_error(e.into()))?
            }
        };

        info!(name = %config.name, ?method, "starting store");

        let server = match with_cancel(cancel, self.engine.start(config)).await? {
            Ok(server) => Arc::new(server),
            Err(error) if method == JoinMethod::Join => {
                return Err(into_join_error(Error::Kv("starting store", error)));
            }
            Err(error) => return Err(Error::Kv("starting store", error)),
        };

        // Close the server on every early return from here on.
        let server = scopeguard::guard(server, |server| {
            warn!("closing partially started store");
            server.close();
        });

        let timeout = self.options.readiness_timeout;
        with_cancel(cancel, tokio::time::timeout(timeout, server.ready()))
            .await?
            .map_err(|_| Error::NotReady(timeout))?;

        with_cancel(cancel, AuthBootstrapper::new(&**server, &self.ctx).run()).await??;

        info!(name = %server.name(), "store ready");

        Ok(SecretStore::new(
            ScopeGuard::into_inner(server),
            self.ctx.clone(),
        ))
    }

    /// Repairs membership within the join bound.
    async fn discover(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<ClusterMember>, E::Error> {
        let timeout = self.options.join_timeout;
        let repairer = MembershipRepairer::new(&self.connector, &self.options);
        let repair = repairer.repair();

        with_cancel(cancel, tokio::time::timeout(timeout, repair))
            .await?
            .map_err(|_| Error::Timeout("discovering cluster", timeout))?
    }
}

fn into_join_error<KE>(error: Error<KE>) -> Error<KE>
where
    KE: secret_kv::KvError,
{
    match error {
        Error::Cancelled => Error::Cancelled,
        error => Error::Join(Box::new(error)),
    }
}

async fn with_cancel<T, KE>(
    cancel: &CancellationToken,
    future: impl Future<Output = T>,
) -> Result<T, KE>
where
    KE: secret_kv::KvError,
{
    tokio::select! {
        () = cancel.cancelled() => Err(Error::Cancelled),
        output = future => Ok(output),
    }
}
