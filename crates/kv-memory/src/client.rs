use crate::error::{Error, Result};
use crate::network::MemoryNetwork;
use crate::server::Node;
use crate::state::Cluster;

use std::sync::Arc;

use async_trait::async_trait;
use secret_kv::{ClientConfig, ClusterClient, ClusterConnector, Member};
use secret_pki::CertificateIdentity;
use tracing::debug;
use url::Url;

/// Connects clients over a [`MemoryNetwork`].
#[derive(Clone, Debug)]
pub struct MemoryConnector {
    network: MemoryNetwork,
}

impl MemoryConnector {
    /// Creates a connector for servers on `network`.
    #[must_use]
    pub const fn new(network: MemoryNetwork) -> Self {
        Self { network }
    }
}

#[async_trait]
impl ClusterConnector for MemoryConnector {
    type Error = Error;
    type Client = MemoryClient;

    async fn connect(&self, config: ClientConfig) -> Result<MemoryClient> {
        if config.endpoints.is_empty() {
            return Err(Error::InvalidArgument("no endpoints".to_string()));
        }

        // The client is authorized as the common name of its certificate.
        let identity = CertificateIdentity::from_pem_file(&config.tls.cert_file)?;

        let node = config
            .endpoints
            .iter()
            .find_map(|endpoint| self.network.resolve_client(endpoint))
            .ok_or_else(|| {
                Error::Unavailable(format!(
                    "no server reachable at {:?}",
                    config
                        .endpoints
                        .iter()
                        .map(Url::as_str)
                        .collect::<Vec<_>>()
                ))
            })?;

        debug!(server = %node.config.name, user = identity.common_name(), "client connected");

        Ok(MemoryClient {
            network: self.network.clone(),
            node,
            user: identity.common_name().to_string(),
        })
    }
}

/// A client connected to one server of a cluster.
#[derive(Debug)]
pub struct MemoryClient {
    network: MemoryNetwork,
    node: Arc<Node>,
    user: String,
}

impl MemoryClient {
    fn cluster(&self) -> Result<Arc<Cluster>> {
        self.node.cluster().map_err(|_| {
            Error::Unavailable(format!("connection to {} lost", self.node.config.name))
        })
    }
}

#[async_trait]
impl ClusterClient for MemoryClient {
    type Error = Error;

    async fn member_list(&self) -> Result<Vec<Member>> {
        self.cluster()?.lock().member_list(&self.user)
    }

    async fn member_add(&self, peer_urls: Vec<Url>) -> Result<Member> {
        self.cluster()?.lock().member_add(&self.user, peer_urls)
    }

    async fn member_remove(&self, id: u64) -> Result<Vec<Member>> {
        let cluster = self.cluster()?;
        let members = cluster.lock().member_remove(&self.user, id)?;

        self.network.stop_member(&cluster, id);

        Ok(members)
    }
}
