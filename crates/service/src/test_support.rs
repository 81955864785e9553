use secret_cluster::{
    ClusterLauncher, DEFAULT_STATEFUL_SET, JoinMethod, LaunchOptions, SecretStore, ServiceNames,
};
use secret_kv_memory::{MemoryConnector, MemoryEngine, MemoryNetwork, MemoryServer};
use secret_pki::{CA_CERT_FILE, CertificateAuthority, ensure_member_key_pair};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// A bootstrapped single-node store in a temporary directory.
pub struct TestNode {
    pub store: SecretStore<MemoryServer>,
    _dir: TempDir,
}

impl TestNode {
    pub async fn start() -> Self {
        let dir = TempDir::new().unwrap();
        let names = ServiceNames::new(DEFAULT_STATEFUL_SET, "test");
        let node_name = names.node_name(0);

        let ca = CertificateAuthority::open(dir.path().join("pki")).unwrap();
        let pair = ensure_member_key_pair(dir.path().join("pki"), "localhost", &ca).unwrap();

        let options = LaunchOptions::new(
            node_name,
            names,
            pair.cert_path,
            pair.key_path,
            dir.path().join("pki").join(CA_CERT_FILE),
            dir.path().join("data"),
        );

        let network = MemoryNetwork::new();
        let store = ClusterLauncher::new(
            MemoryEngine::new(network.clone()),
            MemoryConnector::new(network),
            options,
        )
        .unwrap()
        .launch(JoinMethod::Bootstrap, &CancellationToken::new())
        .await
        .unwrap();

        Self { store, _dir: dir }
    }
}
