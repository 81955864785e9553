use std::time::Duration;

use secret_kv::KvError;
use thiserror::Error;

/// The result type for this crate.
pub type Result<T, KE> = std::result::Result<T, Error<KE>>;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error<KE>
where
    KE: KvError,
{
    /// The launch was cancelled by the root cancellation token.
    #[error("cancelled")]
    Cancelled,

    /// The member certificate could not be read.
    #[error("reading member certificate: {0}")]
    Certificate(#[source] secret_pki::Error),

    /// The node's configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Joining an existing cluster failed before the store was started.
    ///
    /// This is the only error that makes the acquisition loop bootstrap or
    /// wait instead of giving up.
    #[error("joining existing cluster: {0}")]
    Join(#[source] Box<Self>),

    /// An engine request failed.
    #[error("{0}: {1}")]
    Kv(&'static str, #[source] KE),

    /// The store did not become ready within the readiness bound.
    #[error("store took too long to become ready ({0:?})")]
    NotReady(Duration),

    /// Deleting failed because at least one secret does not exist.
    #[error("failed deleting secrets from store, does the secret exist?")]
    SecretsMissing,

    /// Writing failed because the named secrets already exist.
    #[error("{}", already_exists(.0))]
    SecretsExist(Vec<String>),

    /// A bounded operation did not complete in time.
    #[error("{0} timed out after {1:?}")]
    Timeout(&'static str, Duration),

    /// A store URL could not be built.
    #[error(transparent)]
    Url(#[from] url::ParseError),

    /// No other node bootstrapped a cluster before the wait deadline.
    #[error("timed out after {0:?} waiting for the bootstrapper to bootstrap a cluster")]
    WaitDeadline(Duration),

    /// Writing failed without the store naming a conflicting secret.
    #[error("failed writing secrets to store")]
    WriteFailed,
}

fn already_exists(ids: &[String]) -> String {
    ids.iter()
        .map(|id| format!("secret {id:?} already exists"))
        .collect::<Vec<_>>()
        .join("\n")
}
