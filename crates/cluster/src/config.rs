use crate::membership::ClusterMember;

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use secret_kv::{ClientConfig, ClientTlsInfo, ClusterState, ServerConfig, TlsInfo};
use url::Url;

/// Port the store serves clients on.
pub const CLIENT_PORT: u16 = 2379;

/// Port the store replicates between members on.
pub const PEER_PORT: u16 = 2380;

/// Default name of the stateful set the nodes belong to.
pub const DEFAULT_STATEFUL_SET: &str = "secret-service";

const SNAPSHOT_COUNT: u64 = 10;
const MAX_TXN_OPS: usize = 256;

/// Naming conventions of a deployment's nodes and services.
///
/// Nodes are named `<stateful-set>-<ordinal>` and reachable individually
/// under the headless service. The internal service balances over every
/// node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServiceNames {
    stateful_set: String,
    namespace: String,
}

impl ServiceNames {
    /// Creates the naming conventions for a stateful set in a namespace.
    pub fn new(stateful_set: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            stateful_set: stateful_set.into(),
            namespace: namespace.into(),
        }
    }

    /// Domain of the headless service used for per-node addressing.
    #[must_use]
    pub fn headless(&self) -> String {
        format!(
            "{}-headless.{}.svc.cluster.local",
            self.stateful_set, self.namespace
        )
    }

    /// Host of the internal service balancing over all nodes.
    #[must_use]
    pub fn internal(&self) -> String {
        format!(
            "{}-internal.{}.svc.cluster.local",
            self.stateful_set, self.namespace
        )
    }

    /// Name of the node with the given ordinal.
    #[must_use]
    pub fn node_name(&self, ordinal: u32) -> String {
        format!("{}-{ordinal}", self.stateful_set)
    }

    /// Ordinal of a node name, `None` if the name does not follow the naming
    /// convention.
    #[must_use]
    pub fn ordinal(&self, node_name: &str) -> Option<u32> {
        let suffix = node_name
            .strip_prefix(self.stateful_set.as_str())?
            .strip_prefix('-')?;

        // Reject signs and leading zeros so the name round-trips.
        if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if suffix.len() > 1 && suffix.starts_with('0') {
            return None;
        }

        suffix.parse().ok()
    }

    /// Peer URL a node advertises.
    ///
    /// # Errors
    ///
    /// Returns an error if the names do not form a valid host.
    pub fn peer_url(&self, node_name: &str) -> Result<Url, url::ParseError> {
        Url::parse(&format!(
            "https://{node_name}.{}:{PEER_PORT}",
            self.headless()
        ))
    }

    /// Client URL a node advertises.
    ///
    /// # Errors
    ///
    /// Returns an error if the names do not form a valid host.
    pub fn client_url(&self, node_name: &str) -> Result<Url, url::ParseError> {
        Url::parse(&format!(
            "https://{node_name}.{}:{CLIENT_PORT}",
            self.headless()
        ))
    }

    /// Client URL reaching any node of the cluster.
    ///
    /// # Errors
    ///
    /// Returns an error if the names do not form a valid host.
    pub fn service_client_url(&self) -> Result<Url, url::ParseError> {
        Url::parse(&format!("https://{}:{CLIENT_PORT}", self.internal()))
    }
}

/// Returns the node's hostname, preferring the `HOSTNAME` environment
/// variable over the operating system's hostname.
///
/// # Errors
///
/// Returns an error if `HOSTNAME` is unset and the hostname cannot be read.
pub fn hostname() -> io::Result<String> {
    if let Some(hostname) = std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty()) {
        return Ok(hostname);
    }

    nix::unistd::gethostname()
        .map_err(io::Error::from)?
        .into_string()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "hostname is not UTF-8"))
}

/// Options for launching the store on this node.
#[derive(Clone, Debug)]
pub struct LaunchOptions {
    /// Name of this node; also its member name.
    pub node_name: String,

    /// Naming conventions of the deployment.
    pub names: ServiceNames,

    /// Path to this node's PEM certificate. Its common name is the store
    /// user this process acts as.
    pub cert_file: PathBuf,

    /// Path to this node's PEM private key.
    pub key_file: PathBuf,

    /// Path to the PEM CA certificate of the store's PKI.
    pub ca_file: PathBuf,

    /// The store's data directory.
    pub data_dir: PathBuf,

    /// Upper bound for the store becoming ready after it started.
    pub readiness_timeout: Duration,

    /// Upper bound for discovering and repairing membership before joining.
    pub join_timeout: Duration,

    /// Upper bound for each membership request.
    pub member_timeout: Duration,
}

impl LaunchOptions {
    /// Creates options with the default bounds.
    pub fn new(
        node_name: impl Into<String>,
        names: ServiceNames,
        cert_file: impl Into<PathBuf>,
        key_file: impl Into<PathBuf>,
        ca_file: impl Into<PathBuf>,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            node_name: node_name.into(),
            names,
            cert_file: cert_file.into(),
            key_file: key_file.into(),
            ca_file: ca_file.into(),
            data_dir: data_dir.into(),
            readiness_timeout: Duration::from_secs(60),
            join_timeout: Duration::from_secs(10),
            member_timeout: Duration::from_secs(10),
        }
    }

    /// Builds the configuration the store is started with.
    ///
    /// The initial cluster lists `peers` plus this node, which always
    /// advertises its own per-node peer URL.
    pub(crate) fn server_config(
        &self,
        peers: &[ClusterMember],
        cluster_state: ClusterState,
    ) -> Result<ServerConfig, url::ParseError> {
        let mut config = ServerConfig::new(&self.node_name, &self.data_dir);

        let peer_url = self.names.peer_url(&self.node_name)?;
        for peer in peers {
            config
                .initial_cluster
                .insert(&peer.name, peer.peer_url.clone());
        }
        config
            .initial_cluster
            .insert(&self.node_name, peer_url.clone());
        config.cluster_state = cluster_state;

        config.listen_peer_urls = vec![Url::parse(&format!("https://0.0.0.0:{PEER_PORT}"))?];
        config.listen_client_urls = vec![Url::parse(&format!("https://0.0.0.0:{CLIENT_PORT}"))?];
        config.advertise_peer_urls = vec![peer_url];
        config.advertise_client_urls = vec![self.names.client_url(&self.node_name)?];

        config.client_tls = TlsInfo {
            cert_file: self.cert_file.clone(),
            key_file: self.key_file.clone(),
            trusted_ca_file: self.ca_file.clone(),
            client_cert_auth: true,
            skip_client_san_verify: false,
        };
        config.peer_tls = TlsInfo {
            skip_client_san_verify: true,
            ..config.client_tls.clone()
        };

        config.snapshot_count = SNAPSHOT_COUNT;
        config.max_txn_ops = MAX_TXN_OPS;

        Ok(config)
    }

    /// Builds the configuration of the client used to repair membership,
    /// authenticated with this node's certificate.
    pub(crate) fn client_config(&self) -> Result<ClientConfig, url::ParseError> {
        Ok(ClientConfig {
            endpoints: vec![self.names.service_client_url()?],
            tls: ClientTlsInfo {
                cert_file: self.cert_file.clone(),
                key_file: self.key_file.clone(),
                trusted_ca_file: self.ca_file.clone(),
            },
            dial_timeout: self.member_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> ServiceNames {
        ServiceNames::new(DEFAULT_STATEFUL_SET, "prod")
    }

    #[test]
    fn test_service_names() {
        let names = names();

        assert_eq!(
            names.headless(),
            "secret-service-headless.prod.svc.cluster.local"
        );
        assert_eq!(
            names.internal(),
            "secret-service-internal.prod.svc.cluster.local"
        );
        assert_eq!(
            names.peer_url("secret-service-2").unwrap().as_str(),
            "https://secret-service-2.secret-service-headless.prod.svc.cluster.local:2380/"
        );
        assert_eq!(
            names.service_client_url().unwrap().as_str(),
            "https://secret-service-internal.prod.svc.cluster.local:2379/"
        );
    }

    #[test]
    fn test_ordinal() {
        let names = names();

        assert_eq!(names.ordinal("secret-service-0"), Some(0));
        assert_eq!(names.ordinal("secret-service-12"), Some(12));
        assert_eq!(names.ordinal(&names.node_name(7)), Some(7));

        assert_eq!(names.ordinal("secret-service-"), None);
        assert_eq!(names.ordinal("secret-service-01"), None);
        assert_eq!(names.ordinal("secret-service-+1"), None);
        assert_eq!(names.ordinal("secret-service-a"), None);
        assert_eq!(names.ordinal("secret-service2"), None);
        assert_eq!(names.ordinal("other-0"), None);
    }

    #[test]
    fn test_server_config() {
        let options = LaunchOptions::new(
            "secret-service-1",
            names(),
            "/pki/member.crt",
            "/pki/member.key",
            "/pki/ca.crt",
            "/data",
        );
        let peers = vec![ClusterMember {
            name: "secret-service-0".to_string(),
            peer_url: names().peer_url("secret-service-0").unwrap(),
            id: 7,
        }];

        let config = options
            .server_config(&peers, ClusterState::Existing)
            .unwrap();

        assert_eq!(config.name, "secret-service-1");
        assert_eq!(config.cluster_state, ClusterState::Existing);
        assert_eq!(config.initial_cluster.len(), 2);
        assert_eq!(
            config.initial_cluster.get("secret-service-1"),
            config.advertise_peer_urls.first()
        );
        assert_eq!(config.snapshot_count, 10);
        assert_eq!(config.max_txn_ops, 256);
        assert!(config.client_tls.client_cert_auth);
        assert!(!config.client_tls.skip_client_san_verify);
        assert!(config.peer_tls.skip_client_san_verify);
    }
}
