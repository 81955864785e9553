use crate::error::{Error, Result};
use crate::launcher::{ClusterLauncher, JoinMethod};
use crate::secrets::SecretStore;

use std::time::Duration;

use secret_kv::{ClusterConnector, KvEngine};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// What a node does when no cluster can be joined.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeRole {
    /// Bootstraps a new cluster.
    Bootstrapper,

    /// Waits for the bootstrapper, retrying the join until a deadline.
    Follower,
}

/// Options of the acquisition loop.
#[derive(Clone, Debug)]
pub struct AcquisitionOptions {
    /// What this node does when joining fails.
    pub role: NodeRole,

    /// Interval between join attempts while waiting for the bootstrapper.
    pub poll_interval: Duration,

    /// How long a follower waits for the bootstrapper in total.
    ///
    /// The deadline is checked between attempts, so a join attempt in
    /// flight when it passes runs to completion.
    pub wait_deadline: Duration,
}

impl AcquisitionOptions {
    /// Creates options with the default interval and deadline.
    #[must_use]
    pub const fn new(role: NodeRole) -> Self {
        Self {
            role,
            poll_interval: Duration::from_secs(10),
            wait_deadline: Duration::from_secs(120),
        }
    }
}

/// Obtains a running store for this node.
///
/// Joining an existing cluster is always tried first. If that fails the
/// bootstrapper creates a new cluster, while every other node keeps retrying
/// the join until the bootstrapper's cluster shows up or the wait deadline
/// passes.
pub struct ClusterAcquisition<E, C> {
    launcher: ClusterLauncher<E, C>,
    options: AcquisitionOptions,
}

impl<E, C> ClusterAcquisition<E, C>
where
    E: KvEngine,
    C: ClusterConnector<Error = E::Error>,
{
    /// Creates the acquisition loop.
    pub const fn new(launcher: ClusterLauncher<E, C>, options: AcquisitionOptions) -> Self {
        Self { launcher, options }
    }

    /// Runs the loop until a store is obtained.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if `cancel` fires, [`Error::WaitDeadline`]
    /// if a follower gives up waiting, or the first error that is not a
    /// failure to join.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<SecretStore<E::Server>, E::Error> {
        match self.launcher.launch(JoinMethod::Join, cancel).await {
            Ok(store) => return Ok(store),
            Err(Error::Join(error)) => {
                info!(%error, "could not join existing cluster");
            }
            Err(error) => return Err(error),
        }

        match self.options.role {
            NodeRole::Bootstrapper => {
                info!("bootstrapping new cluster");
                self.launcher.launch(JoinMethod::Bootstrap, cancel).await
            }
            NodeRole::Follower => self.wait_for_bootstrap(cancel).await,
        }
    }

    async fn wait_for_bootstrap(
        &self,
        cancel: &CancellationToken,
    ) -> Result<SecretStore<E::Server>, E::Error> {
        let AcquisitionOptions {
            poll_interval,
            wait_deadline,
            ..
        } = self.options;

        info!(
            ?poll_interval,
            ?wait_deadline,
            "waiting for bootstrapper to bootstrap a cluster"
        );

        let deadline = tokio::time::sleep(wait_deadline);
        tokio::pin!(deadline);

        let mut interval = tokio::time::interval_at(Instant::now() + poll_interval, poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => return Err(Error::Cancelled),
                () = &mut deadline => return Err(Error::WaitDeadline(wait_deadline)),
                _ = interval.tick() => {}
            }

            match self.launcher.launch(JoinMethod::Join, cancel).await {
                Ok(store) => return Ok(store),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(error) => warn!(%error, "still unable to join cluster, retrying"),
            }
        }
    }
}
