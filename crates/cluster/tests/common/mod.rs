//! Test helpers for running several nodes against one in-memory network.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use secret_cluster::{
    AcquisitionOptions, ClusterAcquisition, ClusterLauncher, LaunchOptions, NodeRole,
    ServiceNames,
};
use secret_kv_memory::{MemoryConnector, MemoryEngine, MemoryNetwork};
use secret_pki::{CertificateAuthority, ensure_member_key_pair};
use tempfile::TempDir;

/// Namespace all test nodes run in.
pub const NAMESPACE: &str = "test";

/// Launcher type used by every test.
pub type TestLauncher = ClusterLauncher<MemoryEngine, MemoryConnector>;

/// Nodes of one deployment sharing a network and a CA.
pub struct TestCluster {
    /// Root of every node's files.
    pub dir: TempDir,

    /// Network the nodes and their clients talk over.
    pub network: MemoryNetwork,

    /// Naming conventions of the deployment.
    pub names: ServiceNames,

    ca: CertificateAuthority,
}

impl TestCluster {
    /// Creates a deployment with the default stateful set name.
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let ca = CertificateAuthority::open(dir.path().join("ca")).unwrap();
        let names = ServiceNames::new(secret_cluster::DEFAULT_STATEFUL_SET, NAMESPACE);

        let network = MemoryNetwork::new();
        network.bind_service(names.internal(), names.headless());

        Self {
            dir,
            network,
            names,
            ca,
        }
    }

    /// Directory holding the files of the node with `ordinal`.
    pub fn node_dir(&self, ordinal: u32) -> PathBuf {
        self.dir.path().join(self.names.node_name(ordinal))
    }

    /// Issues a member certificate and returns launch options for the node
    /// with `ordinal`, with short bounds.
    pub fn options(&self, ordinal: u32) -> LaunchOptions {
        let node_name = self.names.node_name(ordinal);
        let node_dir = self.node_dir(ordinal);
        let host = format!("{node_name}.{}", self.names.headless());

        let pair = ensure_member_key_pair(node_dir.join("pki"), &host, &self.ca).unwrap();
        let ca_file = self.dir.path().join("ca").join(secret_pki::CA_CERT_FILE);

        let mut options = LaunchOptions::new(
            node_name,
            self.names.clone(),
            pair.cert_path,
            pair.key_path,
            ca_file,
            node_dir.join("data"),
        );
        options.readiness_timeout = Duration::from_secs(5);
        options.join_timeout = Duration::from_secs(2);
        options.member_timeout = Duration::from_secs(1);
        options
    }

    /// Launcher for the node with `ordinal`.
    pub fn launcher(&self, ordinal: u32) -> TestLauncher {
        self.launcher_with(self.options(ordinal))
    }

    /// Launcher on this deployment's network using the given options.
    pub fn launcher_with(&self, options: LaunchOptions) -> TestLauncher {
        ClusterLauncher::new(
            MemoryEngine::new(self.network.clone()),
            MemoryConnector::new(self.network.clone()),
            options,
        )
        .unwrap()
    }

    /// Acquisition loop for the node with `ordinal`.
    pub fn acquisition(
        &self,
        ordinal: u32,
        role: NodeRole,
    ) -> ClusterAcquisition<MemoryEngine, MemoryConnector> {
        ClusterAcquisition::new(self.launcher(ordinal), AcquisitionOptions::new(role))
    }
}

/// Builds a set of secrets from string pairs.
pub fn secrets(pairs: &[(&str, &str)]) -> BTreeMap<String, Bytes> {
    pairs
        .iter()
        .map(|(id, value)| ((*id).to_string(), Bytes::copy_from_slice(value.as_bytes())))
        .collect()
}

/// Builds a list of secret IDs.
pub fn ids(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|id| (*id).to_string()).collect()
}
