use std::io;

use thiserror::Error;

/// Errors that stop the service.
#[derive(Debug, Error)]
pub enum Error {
    /// Binding a listener failed.
    #[error("failed to bind {0} server: {1}")]
    Bind(&'static str, #[source] io::Error),

    /// Obtaining the store failed.
    #[error("joining or bootstrapping store: {0}")]
    Cluster(#[from] secret_cluster::Error<secret_kv_memory::Error>),

    /// The node's hostname could not be determined.
    #[error("failed to determine hostname: {0}")]
    Hostname(#[source] io::Error),

    /// Setting up the development PKI failed.
    #[error(transparent)]
    Pki(#[from] secret_pki::Error),

    /// A server exited with an error.
    #[error("{0} server failed: {1}")]
    Serve(&'static str, #[source] io::Error),
}
