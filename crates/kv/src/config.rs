use std::fmt::{self, Display};
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

/// Whether a server creates a new cluster or joins an existing one.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ClusterState {
    /// Create a new cluster from the initial cluster members.
    New,

    /// Join an existing cluster that already lists this server as a member.
    Existing,
}

/// The members a server is started with, as ordered `name=peer-url` pairs.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InitialCluster(Vec<(String, Url)>);

impl InitialCluster {
    /// Creates an empty initial cluster.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Adds a member, replacing the peer URL of an existing entry with the
    /// same name.
    pub fn insert(&mut self, name: impl Into<String>, peer_url: Url) {
        let name = name.into();

        match self.0.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = peer_url,
            None => self.0.push((name, peer_url)),
        }
    }

    /// Iterates over the `(name, peer_url)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Url)> {
        self.0.iter().map(|(name, url)| (name.as_str(), url))
    }

    /// The peer URL of the named member.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Url> {
        self.0
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, url)| url)
    }

    /// The number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for InitialCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, url)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{name}={url}")?;
        }
        Ok(())
    }
}

/// TLS settings of a server listener.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TlsInfo {
    /// Path to the PEM certificate.
    pub cert_file: PathBuf,

    /// Path to the PEM private key.
    pub key_file: PathBuf,

    /// Path to the PEM CA certificate clients must chain to.
    pub trusted_ca_file: PathBuf,

    /// Require clients to present a certificate.
    pub client_cert_auth: bool,

    /// Skip checking client SANs against the connecting address.
    pub skip_client_san_verify: bool,
}

/// Configuration a server is started with.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerConfig {
    /// Member name.
    pub name: String,

    /// Directory holding the replicated log and snapshots.
    pub data_dir: PathBuf,

    /// Members to start with.
    pub initial_cluster: InitialCluster,

    /// Whether to create or join a cluster.
    pub cluster_state: ClusterState,

    /// URLs to listen on for peer traffic.
    pub listen_peer_urls: Vec<Url>,

    /// URLs to listen on for client traffic.
    pub listen_client_urls: Vec<Url>,

    /// Peer URLs advertised to the rest of the cluster.
    pub advertise_peer_urls: Vec<Url>,

    /// Client URLs advertised to the rest of the cluster.
    pub advertise_client_urls: Vec<Url>,

    /// TLS for client listeners.
    pub client_tls: TlsInfo,

    /// TLS for peer listeners.
    pub peer_tls: TlsInfo,

    /// Number of committed transactions between snapshots.
    pub snapshot_count: u64,

    /// Maximum number of operations per transaction branch.
    pub max_txn_ops: usize,
}

impl ServerConfig {
    /// Creates a configuration with engine defaults for a new single-member
    /// cluster and no listeners.
    pub fn new(name: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            data_dir: data_dir.into(),
            initial_cluster: InitialCluster::new(),
            cluster_state: ClusterState::New,
            listen_peer_urls: Vec::new(),
            listen_client_urls: Vec::new(),
            advertise_peer_urls: Vec::new(),
            advertise_client_urls: Vec::new(),
            client_tls: TlsInfo::default(),
            peer_tls: TlsInfo::default(),
            snapshot_count: 100_000,
            max_txn_ops: 128,
        }
    }
}

/// TLS settings of a network client.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ClientTlsInfo {
    /// Path to the PEM client certificate.
    pub cert_file: PathBuf,

    /// Path to the PEM private key.
    pub key_file: PathBuf,

    /// Path to the PEM CA certificate servers must chain to.
    pub trusted_ca_file: PathBuf,
}

/// Configuration of a network client.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientConfig {
    /// Endpoints to try.
    pub endpoints: Vec<Url>,

    /// Client certificate and trust anchor.
    pub tls: ClientTlsInfo,

    /// Upper bound for establishing the connection.
    pub dial_timeout: Duration,
}
