//! Certificate authority for store members and clients.
//!
//! Store members authenticate each other and their clients by X.509
//! certificates chained to a single CA. The common name of a client
//! certificate is the user the store authorizes it as.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod ca;
mod error;
mod identity;
mod member;

pub use ca::{CA_CERT_FILE, CA_KEY_FILE, CertificateAuthority};
pub use error::{Error, Result};
pub use identity::CertificateIdentity;
pub use member::{
    MEMBER_CERT_FILE, MEMBER_COMMON_NAME, MEMBER_KEY_FILE, MemberKeyPair, ensure_member_key_pair,
};

use std::net::IpAddr;
use std::time::Duration;

/// A PEM encoded certificate and its private key.
#[derive(Clone, Debug)]
pub struct CertificateKeyPair {
    /// PEM encoded certificate.
    pub cert_pem: Vec<u8>,

    /// PEM encoded private key.
    pub key_pem: Vec<u8>,
}

/// Issues certificates signed by a CA.
pub trait Pki
where
    Self: Send + Sync + 'static,
{
    /// Creates a certificate and key for `common_name`, valid for the given
    /// DNS names and IP addresses for `validity`. Empty DNS names are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation or signing fails.
    fn create_certificate(
        &self,
        common_name: &str,
        sans: &[String],
        ips: &[IpAddr],
        validity: Duration,
    ) -> Result<CertificateKeyPair>;

    /// The PEM encoded CA certificate.
    fn ca_certificate(&self) -> Vec<u8>;
}
