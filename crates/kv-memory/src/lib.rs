//! In-memory implementation of the store engine for local development and
//! tests.
//!
//! Servers started from one [`MemoryEngine`] share a [`MemoryNetwork`], so a
//! cluster of several servers can be run inside a single process. Consensus
//! is not simulated: every member of a cluster observes the same state
//! immediately.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod client;
mod error;
mod network;
mod server;
mod state;

pub use client::{MemoryClient, MemoryConnector};
pub use error::{Error, Result};
pub use network::MemoryNetwork;
pub use server::MemoryServer;

use network::Persisted;
use server::Node;
use state::{Cluster, new_member_id};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secret_kv::{ClusterState, KvEngine, KvError, KvErrorKind, KvServer, Member, ServerConfig};
use tracing::{debug, info, warn};

const JOIN_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Starts in-memory servers on a [`MemoryNetwork`].
#[derive(Clone, Debug)]
pub struct MemoryEngine {
    network: MemoryNetwork,
}

impl MemoryEngine {
    /// Creates an engine whose servers listen on `network`.
    #[must_use]
    pub const fn new(network: MemoryNetwork) -> Self {
        Self { network }
    }

    /// Starts a new cluster from the configured initial cluster.
    fn bootstrap(&self, node: &Node) -> Result<()> {
        let config = &node.config;

        let own_peer_url = config.initial_cluster.get(&config.name).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "initial cluster {} does not list {}",
                config.initial_cluster, config.name
            ))
        })?;
        if !config.advertise_peer_urls.contains(own_peer_url) {
            return Err(Error::InvalidArgument(format!(
                "{} is not advertised by {}",
                own_peer_url, config.name
            )));
        }

        let mut members: Vec<Member> = Vec::with_capacity(config.initial_cluster.len());
        for (name, peer_url) in config.initial_cluster.iter() {
            members.push(Member {
                id: new_member_id(&members),
                name: name.to_string(),
                peer_urls: vec![peer_url.clone()],
                client_urls: if name == config.name {
                    config.advertise_client_urls.clone()
                } else {
                    Vec::new()
                },
            });
        }

        let member_id = members
            .iter()
            .find(|member| member.name == config.name)
            .map_or(0, |member| member.id);

        info!(name = %config.name, initial_cluster = %config.initial_cluster, "starting new cluster");

        self.network
            .attach(node, Arc::new(Cluster::new(members)), member_id);

        Ok(())
    }

    /// Restarts a member from the state under its data directory.
    fn restore(&self, node: &Node, persisted: Persisted) -> Result<()> {
        if !persisted.cluster.lock().has_member(persisted.member_id) {
            return Err(Error::NotFound(format!(
                "member {:x} of {:?}, it was removed from its cluster",
                persisted.member_id, node.config.data_dir
            )));
        }

        info!(name = %node.config.name, data_dir = ?node.config.data_dir, "restoring member from data directory");

        self.network
            .attach(node, persisted.cluster, persisted.member_id);

        Ok(())
    }

    fn spawn_join_retry(&self, node: Arc<Node>) {
        let network = self.network.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = node.shutdown.cancelled() => break,
                    () = tokio::time::sleep(JOIN_RETRY_INTERVAL) => {}
                }

                match network.join(&node) {
                    Ok(()) => break,
                    Err(error) if error.kind() == KvErrorKind::Unavailable => {
                        debug!(name = %node.config.name, %error, "cluster not reachable yet");
                    }
                    Err(error) => {
                        warn!(name = %node.config.name, %error, "giving up joining cluster");
                        break;
                    }
                }
            }
        });
    }
}

#[async_trait]
impl KvEngine for MemoryEngine {
    type Error = Error;
    type Server = MemoryServer;

    async fn start(&self, config: ServerConfig) -> Result<MemoryServer> {
        if config.advertise_peer_urls.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "{} advertises no peer URLs",
                config.name
            )));
        }

        tokio::fs::create_dir_all(&config.data_dir)
            .await
            .map_err(|e| Error::Io("failed to create data directory", e))?;

        let persisted = self.network.persisted(&config.data_dir);
        let node = Arc::new(Node::new(config));

        self.network.listen(&node)?;
        let server = MemoryServer::new(node.clone(), self.network.clone());

        let result = match (node.config.cluster_state, persisted) {
            (ClusterState::New, Some(persisted)) => self.restore(&node, persisted),
            (ClusterState::New, None) => self.bootstrap(&node),
            (ClusterState::Existing, _) => match self.network.join(&node) {
                Err(error) if error.kind() == KvErrorKind::Unavailable => {
                    debug!(name = %node.config.name, %error, "cluster not reachable, retrying in background");
                    self.spawn_join_retry(node.clone());
                    Ok(())
                }
                result => result,
            },
        };

        if let Err(error) = result {
            server.close();
            return Err(error);
        }

        Ok(server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::{Path, PathBuf};

    use bytes::Bytes;
    use secret_kv::{
        ClientConfig, ClientTlsInfo, ClusterClient, ClusterConnector, Compare, CompareOp,
        InitialCluster, LocalAuthContext, RequestOp, ROOT, TxnRequest,
    };
    use secret_pki::{CertificateAuthority, Pki};
    use tempfile::TempDir;
    use url::Url;

    const DOMAIN: &str = "nodes.test";
    const SERVICE: &str = "service.test";

    fn peer_url(name: &str) -> Url {
        Url::parse(&format!("https://{name}.{DOMAIN}:2380")).unwrap()
    }

    fn client_url(name: &str) -> Url {
        Url::parse(&format!("https://{name}.{DOMAIN}:2379")).unwrap()
    }

    fn config(name: &str, data_dir: &Path, cluster_state: ClusterState) -> ServerConfig {
        let mut config = ServerConfig::new(name, data_dir);
        config.cluster_state = cluster_state;
        config.initial_cluster.insert(name, peer_url(name));
        config.advertise_peer_urls = vec![peer_url(name)];
        config.advertise_client_urls = vec![client_url(name)];
        config
    }

    fn client_cert(dir: &Path, common_name: &str) -> PathBuf {
        let ca = CertificateAuthority::generate().unwrap();
        let pair = ca
            .create_certificate(common_name, &[], &[], Duration::from_secs(60))
            .unwrap();
        let path = dir.join(format!("{common_name}.crt"));
        std::fs::write(&path, pair.cert_pem).unwrap();
        path
    }

    fn client_config(cert_file: PathBuf) -> ClientConfig {
        ClientConfig {
            endpoints: vec![Url::parse(&format!("https://{SERVICE}:2379")).unwrap()],
            tls: ClientTlsInfo {
                cert_file,
                ..ClientTlsInfo::default()
            },
            dial_timeout: Duration::from_secs(1),
        }
    }

    fn root() -> LocalAuthContext {
        LocalAuthContext::from_certificate_identity(ROOT)
    }

    fn setup() -> (MemoryNetwork, MemoryEngine) {
        let network = MemoryNetwork::new();
        network.bind_service(SERVICE, DOMAIN);
        let engine = MemoryEngine::new(network.clone());
        (network, engine)
    }

    #[tokio::test]
    async fn test_bootstrap_is_ready() {
        let (network, engine) = setup();
        let dir = TempDir::new().unwrap();

        let server = engine
            .start(config("node-0", dir.path(), ClusterState::New))
            .await
            .unwrap();
        server.ready().await;

        assert_eq!(server.name(), "node-0");
        assert!(network.is_listening(&client_url("node-0")));

        server.close();
        server.close();
        assert!(!network.is_listening(&client_url("node-0")));
        assert!(matches!(
            server.auth_status(&root()).await,
            Err(Error::Stopped)
        ));
    }

    #[tokio::test]
    async fn test_bootstrap_requires_self_in_initial_cluster() {
        let (network, engine) = setup();
        let dir = TempDir::new().unwrap();

        let mut config = config("node-0", dir.path(), ClusterState::New);
        config.initial_cluster = InitialCluster::new();

        assert!(matches!(
            engine.start(config).await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(!network.is_listening(&client_url("node-0")));
    }

    #[tokio::test]
    async fn test_restart_restores_data() {
        let (_network, engine) = setup();
        let dir = TempDir::new().unwrap();

        let server = engine
            .start(config("node-0", dir.path(), ClusterState::New))
            .await
            .unwrap();
        let request = TxnRequest {
            success: vec![RequestOp::Put {
                key: Bytes::from_static(b"k"),
                value: Bytes::from_static(b"v"),
                lease: None,
            }],
            ..TxnRequest::default()
        };
        server.txn(&root(), request).await.unwrap();
        server.close();

        let server = engine
            .start(config("node-0", dir.path(), ClusterState::New))
            .await
            .unwrap();
        let request = TxnRequest {
            compare: vec![Compare::create_revision("k", CompareOp::Greater, 0)],
            ..TxnRequest::default()
        };
        assert!(server.txn(&root(), request).await.unwrap().succeeded);
    }

    #[tokio::test]
    async fn test_join_existing_cluster() {
        let (_network, engine) = setup();
        let dirs = [TempDir::new().unwrap(), TempDir::new().unwrap()];

        let first = engine
            .start(config("node-0", dirs[0].path(), ClusterState::New))
            .await
            .unwrap();

        let client = MemoryConnector::new(engine.network.clone())
            .connect(client_config(client_cert(dirs[0].path(), ROOT)))
            .await
            .unwrap();
        let added = client.member_add(vec![peer_url("node-1")]).await.unwrap();
        assert!(added.is_unstarted());

        let mut joining = config("node-1", dirs[1].path(), ClusterState::Existing);
        joining.initial_cluster.insert("node-0", peer_url("node-0"));
        let second = engine.start(joining).await.unwrap();
        second.ready().await;

        let members = client.member_list().await.unwrap();
        assert_eq!(members.len(), 2);
        assert!(members.iter().all(|member| !member.is_unstarted()));

        let request = TxnRequest {
            success: vec![RequestOp::Put {
                key: Bytes::from_static(b"shared"),
                value: Bytes::from_static(b"v"),
                lease: None,
            }],
            ..TxnRequest::default()
        };
        first.txn(&root(), request).await.unwrap();

        let read = TxnRequest {
            success: vec![RequestOp::Range {
                key: Bytes::from_static(b"shared"),
            }],
            ..TxnRequest::default()
        };
        let response = second.txn(&root(), read).await.unwrap();
        assert_eq!(response.responses[0].range_kvs().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_join_unregistered_member_fails() {
        let (_network, engine) = setup();
        let dirs = [TempDir::new().unwrap(), TempDir::new().unwrap()];

        let _first = engine
            .start(config("node-0", dirs[0].path(), ClusterState::New))
            .await
            .unwrap();

        let mut joining = config("node-1", dirs[1].path(), ClusterState::Existing);
        joining.initial_cluster.insert("node-0", peer_url("node-0"));

        assert!(matches!(
            engine.start(joining).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_without_cluster_never_ready() {
        let (_network, engine) = setup();
        let dir = TempDir::new().unwrap();

        let mut joining = config("node-1", dir.path(), ClusterState::Existing);
        joining.initial_cluster.insert("node-0", peer_url("node-0"));
        let server = engine.start(joining).await.unwrap();

        let ready = tokio::time::timeout(Duration::from_secs(10), server.ready()).await;
        assert!(ready.is_err());

        server.close();
    }

    #[tokio::test]
    async fn test_connect_without_servers() {
        let (_network, engine) = setup();
        let dir = TempDir::new().unwrap();

        let result = MemoryConnector::new(engine.network.clone())
            .connect(client_config(client_cert(dir.path(), ROOT)))
            .await;

        assert!(matches!(result, Err(Error::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_member_remove_stops_server() {
        let (network, engine) = setup();
        let dirs = [TempDir::new().unwrap(), TempDir::new().unwrap()];

        let _first = engine
            .start(config("node-0", dirs[0].path(), ClusterState::New))
            .await
            .unwrap();
        let client = MemoryConnector::new(network.clone())
            .connect(client_config(client_cert(dirs[0].path(), ROOT)))
            .await
            .unwrap();
        let added = client.member_add(vec![peer_url("node-1")]).await.unwrap();

        let mut joining = config("node-1", dirs[1].path(), ClusterState::Existing);
        joining.initial_cluster.insert("node-0", peer_url("node-0"));
        let second = engine.start(joining).await.unwrap();

        client.member_remove(added.id).await.unwrap();

        assert!(!network.is_listening(&peer_url("node-1")));
        assert!(matches!(
            second.auth_status(&root()).await,
            Err(Error::Stopped)
        ));
    }
}
