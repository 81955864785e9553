//! Secret service: stores user secrets in a replicated store running on
//! every node and hands out client credentials for reading them.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod backend_api;
mod error;
mod health;
mod servers;
mod user_api;

#[cfg(test)]
mod test_support;

use error::Error;
use servers::{BoundServer, serve_all};

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use secret_cluster::{
    AcquisitionOptions, ClusterAcquisition, ClusterLauncher, DEFAULT_STATEFUL_SET, LaunchOptions,
    NodeRole, SecretStore, ServiceNames, hostname,
};
use secret_kv_memory::{MemoryConnector, MemoryEngine, MemoryNetwork, MemoryServer};
use secret_pki::{CA_CERT_FILE, CertificateAuthority, Pki, ensure_member_key_pair};
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// User API port
    #[arg(long, default_value_t = 3000, env = "SECRET_SERVICE_PORT")]
    port: u16,

    /// Backend API port
    #[arg(long, default_value_t = 9000, env = "SECRET_SERVICE_BACKEND_PORT")]
    backend_port: u16,

    /// Health probe port
    #[arg(long, default_value_t = 9001, env = "SECRET_SERVICE_HEALTH_PORT")]
    health_port: u16,

    /// Path to the store server certificate
    #[arg(
        long,
        default_value = "/var/lib/secret-service/etcd/etcd.crt",
        env = "SECRET_SERVICE_ETCD_SERVER_CERT"
    )]
    etcd_server_cert: PathBuf,

    /// Path to the store server key
    #[arg(
        long,
        default_value = "/var/lib/secret-service/etcd/etcd.key",
        env = "SECRET_SERVICE_ETCD_SERVER_KEY"
    )]
    etcd_server_key: PathBuf,

    /// Path to the store CA certificate
    #[arg(
        long,
        default_value = "/var/lib/secret-service/etcd/ca.crt",
        env = "SECRET_SERVICE_ETCD_CA"
    )]
    etcd_ca: PathBuf,

    /// Store data directory
    #[arg(
        long,
        default_value = "/var/lib/secret-service/etcd/data",
        env = "SECRET_SERVICE_DATA_DIR"
    )]
    data_dir: PathBuf,

    /// Kubernetes namespace of this instance
    #[arg(long, default_value = "default", env = "SECRET_SERVICE_K8S_NAMESPACE")]
    k8s_namespace: String,

    /// Name of the stateful set this instance belongs to
    #[arg(long, default_value = DEFAULT_STATEFUL_SET, env = "SECRET_SERVICE_STATEFUL_SET")]
    stateful_set: String,

    /// Whether this instance may bootstrap a new store cluster
    #[arg(long, env = "SECRET_SERVICE_MAY_BOOTSTRAP")]
    may_bootstrap: bool,

    /// Act as the store's own CA, keeping its key pair in this directory and
    /// issuing this node's certificate on start
    #[arg(long, env = "SECRET_SERVICE_PKI_DIR")]
    pki_dir: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value_t = Level::INFO, env = "SECRET_SERVICE_LOG_LEVEL")]
    log_level: Level,
}

/// Certificate paths the store is launched with, and the CA issuing client
/// certificates if this node acts as one.
struct Credentials {
    cert_file: PathBuf,
    key_file: PathBuf,
    ca_file: PathBuf,
    pki: Option<Arc<dyn Pki>>,
}

impl Credentials {
    fn from_args(args: &Args, names: &ServiceNames, node_name: &str) -> Result<Self, Error> {
        let Some(pki_dir) = &args.pki_dir else {
            return Ok(Self {
                cert_file: args.etcd_server_cert.clone(),
                key_file: args.etcd_server_key.clone(),
                ca_file: args.etcd_ca.clone(),
                pki: None,
            });
        };

        let ca = CertificateAuthority::open(pki_dir)?;
        let host = format!("{node_name}.{}", names.headless());
        let pair = ensure_member_key_pair(pki_dir, &host, &ca)?;

        Ok(Self {
            cert_file: pair.cert_path,
            key_file: pair.key_path,
            ca_file: pki_dir.join(CA_CERT_FILE),
            pki: Some(Arc::new(ca)),
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    tracing_subscriber::fmt().with_max_level(args.log_level).init();

    info!(version = env!("CARGO_PKG_VERSION"), "secret service starting");

    let shutdown_token = CancellationToken::new();
    spawn_signal_handler(shutdown_token.clone());

    let node_name = hostname().map_err(Error::Hostname)?;
    let names = ServiceNames::new(&args.stateful_set, &args.k8s_namespace);
    let credentials = Credentials::from_args(&args, &names, &node_name)?;

    // Every store member of this process shares one network.
    let network = MemoryNetwork::new();
    network.bind_service(names.internal(), names.headless());

    let options = LaunchOptions::new(
        node_name.clone(),
        names,
        credentials.cert_file,
        credentials.key_file,
        credentials.ca_file,
        args.data_dir.clone(),
    );
    let launcher = ClusterLauncher::new(
        MemoryEngine::new(network.clone()),
        MemoryConnector::new(network),
        options,
    )?;

    let role = if args.may_bootstrap {
        NodeRole::Bootstrapper
    } else {
        NodeRole::Follower
    };

    info!(%node_name, ?role, "acquiring store");
    let store = ClusterAcquisition::new(launcher, AcquisitionOptions::new(role))
        .run(&shutdown_token)
        .await?;

    let result = serve(&args, &store, credentials.pki, &node_name, shutdown_token).await;

    store.close();
    info!("secret service stopped");

    result
}

async fn serve(
    args: &Args,
    store: &SecretStore<MemoryServer>,
    pki: Option<Arc<dyn Pki>>,
    node_name: &str,
    shutdown_token: CancellationToken,
) -> Result<(), Error> {
    let any = |port: u16| SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));

    let servers = vec![
        BoundServer::bind("user", any(args.port), user_api::router(store.clone())).await?,
        BoundServer::bind(
            "backend",
            any(args.backend_port),
            backend_api::router(pki, node_name),
        )
        .await?,
        BoundServer::bind("health", any(args.health_port), health::router()).await?,
    ];

    serve_all(servers, shutdown_token).await
}

fn spawn_signal_handler(shutdown_token: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;

        info!("shutting down");
        shutdown_token.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => info!("received SIGTERM"),
                _ = sigint.recv() => info!("received SIGINT"),
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            warn!(error = %e, "failed to install signal handlers, waiting for ctrl-c");
            wait_for_ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received interrupt signal"),
        Err(e) => warn!(error = %e, "failed to wait for interrupt signal"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::ffi::OsString;

    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["secret-service"]);

        assert_eq!(args.port, 3000);
        assert_eq!(args.backend_port, 9000);
        assert_eq!(args.health_port, 9001);
        assert_eq!(args.stateful_set, DEFAULT_STATEFUL_SET);
        assert_eq!(args.log_level, Level::INFO);
        assert!(!args.may_bootstrap);
        assert!(args.pki_dir.is_none());
    }

    #[test]
    fn test_credentials_from_paths() {
        let args = Args::parse_from(["secret-service", "--etcd-ca", "/certs/ca.crt"]);
        let names = ServiceNames::new(DEFAULT_STATEFUL_SET, "test");

        let credentials = Credentials::from_args(&args, &names, "secret-service-0").unwrap();

        assert_eq!(credentials.ca_file, PathBuf::from("/certs/ca.crt"));
        assert!(credentials.pki.is_none());
    }

    #[test]
    fn test_credentials_from_pki_dir() {
        let dir = TempDir::new().unwrap();
        let args = Args::parse_from([
            OsString::from("secret-service"),
            OsString::from("--pki-dir"),
            OsString::from(dir.path()),
        ]);
        let names = ServiceNames::new(DEFAULT_STATEFUL_SET, "test");

        let credentials = Credentials::from_args(&args, &names, "secret-service-0").unwrap();

        assert!(credentials.cert_file.exists());
        assert!(credentials.key_file.exists());
        assert!(credentials.ca_file.exists());
        assert!(credentials.pki.is_some());
    }
}
