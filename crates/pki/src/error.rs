use std::path::PathBuf;

use thiserror::Error;

/// The result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors issuing or reading certificates.
#[derive(Debug, Error)]
pub enum Error {
    /// The certificate subject carries no common name.
    #[error("certificate has no common name")]
    MissingCommonName,

    /// The certificate's common name is not valid UTF-8 or contains NUL.
    #[error("certificate common name is not a valid name")]
    InvalidCommonName,

    /// IO operation failed.
    #[error("{0} {1:?}: {2}")]
    Io(&'static str, PathBuf, #[source] std::io::Error),

    /// OpenSSL failed.
    #[error(transparent)]
    Openssl(#[from] openssl::error::ErrorStack),
}
