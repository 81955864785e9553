use crate::config::LaunchOptions;
use crate::error::{Error, Result};

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use secret_kv::{ClusterClient, ClusterConnector, Member};
use tracing::{debug, info, warn};
use url::Url;

/// A peer to start the store with.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClusterMember {
    /// Member name.
    pub name: String,

    /// Peer URL the member is reachable at.
    pub peer_url: Url,

    /// Member ID, `0` for members inferred from the naming convention rather
    /// than observed in the cluster.
    pub id: u64,
}

/// Makes rejoining a cluster idempotent for a node that left it without
/// deregistering, for example after a crash.
///
/// Connects to the cluster through the internal service, removes any member
/// registered under this node's name, and registers this node again with its
/// per-node peer URL.
pub struct MembershipRepairer<'a, C> {
    connector: &'a C,
    options: &'a LaunchOptions,
}

impl<'a, C> MembershipRepairer<'a, C>
where
    C: ClusterConnector,
{
    /// Creates a repairer for the node described by `options`.
    pub const fn new(connector: &'a C, options: &'a LaunchOptions) -> Self {
        Self { connector, options }
    }

    /// Repairs this node's membership and returns the peers to start with.
    ///
    /// The returned peers are the members observed before the repair, with
    /// this node's entry pointing at its newly registered peer URL, plus an
    /// inferred entry for every ordinal up to this node's own that was not
    /// observed. Nodes therefore never start without the peers that must
    /// exist before them.
    ///
    /// # Errors
    ///
    /// Returns an error if connecting, listing, removing or adding fails or
    /// times out, or if this node's name carries no ordinal.
    pub async fn repair(&self) -> Result<Vec<ClusterMember>, C::Error> {
        let options = self.options;
        let own_name = options.node_name.as_str();
        let own_ordinal = options.names.ordinal(own_name).ok_or_else(|| {
            Error::Config(format!("node name {own_name:?} does not end in an ordinal"))
        })?;
        let own_peer_url = options.names.peer_url(own_name)?;

        let client = self
            .bounded(
                "connecting to cluster",
                self.connector.connect(options.client_config()?),
            )
            .await?;

        info!("getting available peers");
        let members = self
            .bounded("listing members", client.member_list())
            .await?;

        let stale: Vec<&Member> = members
            .iter()
            .filter(|member| is_stale_self(member, own_name, &own_peer_url))
            .collect();
        if stale.is_empty() {
            debug!("no previous member to remove");
        }
        for member in stale {
            info!(member_id = %format_args!("{:x}", member.id), "removing previously failed member");
            self.bounded("removing member", client.member_remove(member.id))
                .await?;
        }

        info!(peer_url = %own_peer_url, "adding member");
        let added = self
            .bounded("adding member", client.member_add(vec![own_peer_url.clone()]))
            .await?;

        let mut peers = index_members(&members);
        peers.insert(
            own_name.to_string(),
            ClusterMember {
                name: own_name.to_string(),
                peer_url: own_peer_url,
                id: added.id,
            },
        );

        for ordinal in 0..own_ordinal {
            let name = options.names.node_name(ordinal);
            if !peers.contains_key(&name) {
                let peer_url = options.names.peer_url(&name)?;
                peers.insert(
                    name.clone(),
                    ClusterMember {
                        name,
                        peer_url,
                        id: 0,
                    },
                );
            }
        }

        Ok(peers.into_values().collect())
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        request: impl Future<Output = std::result::Result<T, C::Error>> + Send,
    ) -> Result<T, C::Error> {
        let timeout: Duration = self.options.member_timeout;

        tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| Error::Timeout(operation, timeout))?
            .map_err(|e| Error::Kv(operation, e))
    }
}

/// Whether `member` is an earlier registration of this node: started under
/// this node's name, or registered with its peer URL but never started.
fn is_stale_self(member: &Member, own_name: &str, own_peer_url: &Url) -> bool {
    if member.is_unstarted() {
        member.peer_urls.contains(own_peer_url)
    } else {
        member.name == own_name
    }
}

fn index_members(members: &[Member]) -> BTreeMap<String, ClusterMember> {
    let mut peers = BTreeMap::new();

    for member in members {
        if member.is_unstarted() {
            debug!(member_id = %format_args!("{:x}", member.id), "skipping member that has not started");
            continue;
        }

        let Some(peer_url) = member.peer_urls.first() else {
            warn!(member = %member.name, "member has no peer URLs, skipping");
            continue;
        };
        if member.peer_urls.len() > 1 {
            warn!(member = %member.name, "member has multiple peer URLs, using the first one");
        }

        peers.insert(
            member.name.clone(),
            ClusterMember {
                name: member.name.clone(),
                peer_url: peer_url.clone(),
                id: member.id,
            },
        );
    }

    peers
}
