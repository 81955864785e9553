use crate::error::{Error, Result};
use crate::server::Node;
use crate::state::Cluster;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};
use url::Url;

#[derive(Clone, Debug)]
pub struct Persisted {
    pub cluster: Arc<Cluster>,
    pub member_id: u64,
}

#[derive(Debug, Default)]
struct NetworkState {
    listeners: HashMap<Url, Arc<Node>>,
    services: HashMap<String, String>,
    data_dirs: HashMap<PathBuf, Persisted>,
}

/// A simulated network connecting in-memory servers and clients.
///
/// Servers listen on their advertised peer and client URLs. A bound service
/// name balances client connections over every attached server whose client
/// URL host lives under the service's member domain, the way a headless
/// and a load-balanced service name resolve to the same pods.
///
/// The network also stands in for the servers' disks: state written under a
/// data directory survives a server being closed and started again.
#[derive(Clone, Debug, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    /// Creates an empty network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes client connections for `service_host` to any attached server
    /// whose client URL host is `member_domain` or a name under it.
    pub fn bind_service(&self, service_host: impl Into<String>, member_domain: impl Into<String>) {
        let service_host = service_host.into();
        let member_domain = member_domain.into();

        debug!(%service_host, %member_domain, "bound service");

        self.state
            .lock()
            .services
            .insert(service_host, member_domain);
    }

    /// Whether a running server listens on `url`.
    #[must_use]
    pub fn is_listening(&self, url: &Url) -> bool {
        self.state
            .lock()
            .listeners
            .get(url)
            .is_some_and(|node| !node.shutdown.is_cancelled())
    }

    pub(crate) fn listen(&self, node: &Arc<Node>) -> Result<()> {
        let mut state = self.state.lock();
        let urls: Vec<Url> = node
            .config
            .advertise_peer_urls
            .iter()
            .chain(&node.config.advertise_client_urls)
            .cloned()
            .collect();

        if let Some(url) = urls.iter().find(|url| {
            state
                .listeners
                .get(*url)
                .is_some_and(|existing| !existing.shutdown.is_cancelled())
        }) {
            return Err(Error::AlreadyExists(format!("listener on {url}")));
        }

        for url in urls {
            state.listeners.insert(url, node.clone());
        }

        Ok(())
    }

    pub(crate) fn unlisten(&self, node: &Arc<Node>) {
        self.state
            .lock()
            .listeners
            .retain(|_, existing| !Arc::ptr_eq(existing, node));
    }

    /// The cluster behind the server listening on `peer_url`.
    fn resolve_peer(&self, peer_url: &Url) -> Option<Arc<Cluster>> {
        self.state
            .lock()
            .listeners
            .get(peer_url)
            .and_then(|node| node.cluster().ok())
    }

    /// The attached server a client connecting to `endpoint` reaches.
    pub(crate) fn resolve_client(&self, endpoint: &Url) -> Option<Arc<Node>> {
        let state = self.state.lock();
        let host = endpoint.host_str()?;

        if let Some(domain) = state.services.get(host) {
            let suffix = format!(".{domain}");

            return state
                .listeners
                .iter()
                .filter(|(url, node)| {
                    node.is_attached()
                        && node.config.advertise_client_urls.contains(url)
                        && url.port_or_known_default() == endpoint.port_or_known_default()
                        && url
                            .host_str()
                            .is_some_and(|host| host == domain || host.ends_with(&suffix))
                })
                .map(|(_, node)| node.clone())
                .next();
        }

        state
            .listeners
            .get(endpoint)
            .filter(|node| node.is_attached())
            .cloned()
    }

    pub(crate) fn persisted(&self, data_dir: &Path) -> Option<Persisted> {
        self.state.lock().data_dirs.get(data_dir).cloned()
    }

    /// Attaches `node` to `cluster` and records the membership under the
    /// node's data directory.
    pub(crate) fn attach(&self, node: &Node, cluster: Arc<Cluster>, member_id: u64) {
        self.state.lock().data_dirs.insert(
            node.config.data_dir.clone(),
            Persisted {
                cluster: cluster.clone(),
                member_id,
            },
        );

        node.attach(cluster, member_id);
    }

    /// Attaches `node` to the cluster of any reachable peer from its initial
    /// cluster. The cluster must already list the node as a member.
    pub(crate) fn join(&self, node: &Node) -> Result<()> {
        let cluster = node
            .config
            .initial_cluster
            .iter()
            .filter(|(name, _)| *name != node.config.name)
            .find_map(|(_, peer_url)| self.resolve_peer(peer_url))
            .ok_or_else(|| {
                Error::Unavailable(format!(
                    "no peer of {} reachable in {}",
                    node.config.name, node.config.initial_cluster
                ))
            })?;

        let member_id = cluster.lock().attach_member(&node.config)?;
        self.attach(node, cluster, member_id);

        Ok(())
    }

    /// Stops the server running as `member_id` of `cluster`, if any.
    pub(crate) fn stop_member(&self, cluster: &Arc<Cluster>, member_id: u64) {
        let mut state = self.state.lock();

        let stopped: Vec<Arc<Node>> = state
            .listeners
            .values()
            .filter(|node| node.is_member(cluster, member_id))
            .cloned()
            .collect();

        for node in &stopped {
            info!(name = %node.config.name, "stopping removed member");
            node.shutdown.cancel();
        }

        state
            .listeners
            .retain(|_, node| !stopped.iter().any(|removed| Arc::ptr_eq(removed, node)));
    }
}
