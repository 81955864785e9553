use crate::error::{Error, Result};

use std::fs;
use std::path::Path;

use openssl::nid::Nid;
use openssl::x509::X509;

/// The identity a certificate asserts, used as the store user it is
/// authorized as.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CertificateIdentity {
    common_name: String,
}

impl CertificateIdentity {
    /// Reads the identity of a PEM encoded certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if the certificate does not parse or has no common
    /// name.
    pub fn from_pem(cert_pem: &[u8]) -> Result<Self> {
        let cert = X509::from_pem(cert_pem)?;

        let entry = cert
            .subject_name()
            .entries_by_nid(Nid::COMMONNAME)
            .next()
            .ok_or(Error::MissingCommonName)?;

        // Issued names are UTF8String or PrintableString.
        let common_name = std::str::from_utf8(entry.data().as_slice())
            .map_err(|_| Error::InvalidCommonName)?;

        if common_name.is_empty() {
            return Err(Error::MissingCommonName);
        }
        if common_name.contains('\0') {
            return Err(Error::InvalidCommonName);
        }

        Ok(Self {
            common_name: common_name.to_string(),
        })
    }

    /// Reads the identity of a PEM encoded certificate file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or [`Self::from_pem`]
    /// fails.
    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let cert_pem =
            fs::read(path).map_err(|e| Error::Io("reading certificate", path.to_path_buf(), e))?;

        Self::from_pem(&cert_pem)
    }

    /// The certificate's subject common name.
    #[must_use]
    pub fn common_name(&self) -> &str {
        &self.common_name
    }
}
