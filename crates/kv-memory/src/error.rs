use secret_kv::{KvError, KvErrorKind};
use thiserror::Error;

/// The result type for this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors returned by the in-memory engine.
#[derive(Debug, Error)]
pub enum Error {
    /// A role, user, member or similar already exists.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// The client certificate could not be read.
    #[error("client certificate: {0}")]
    ClientCertificate(#[from] secret_pki::Error),

    /// The request was malformed or exceeded a limit.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An I/O error occurred.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),

    /// A role, user, lease or member does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The caller may not perform the request.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The server has been stopped.
    #[error("server stopped")]
    Stopped,

    /// No running server could be reached, or the server is not attached to
    /// a cluster yet.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl KvError for Error {
    fn kind(&self) -> KvErrorKind {
        match self {
            Self::AlreadyExists(_) => KvErrorKind::AlreadyExists,
            Self::ClientCertificate(_) | Self::PermissionDenied(_) => {
                KvErrorKind::PermissionDenied
            }
            Self::InvalidArgument(_) => KvErrorKind::InvalidArgument,
            Self::Io(..) => KvErrorKind::Other,
            Self::NotFound(_) => KvErrorKind::NotFound,
            Self::Stopped => KvErrorKind::Stopped,
            Self::Unavailable(_) => KvErrorKind::Unavailable,
        }
    }
}
