use crate::error::{Error, Result};
use crate::{CertificateKeyPair, Pki};

use std::fs;
use std::io::Write;
use std::net::IpAddr;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{
    BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
};
use openssl::x509::{X509, X509Builder, X509NameBuilder};
use tracing::{info, warn};

/// File name of the persisted CA certificate.
pub const CA_CERT_FILE: &str = "ca.crt";

/// File name of the persisted CA private key.
pub const CA_KEY_FILE: &str = "ca.key";

const CA_COMMON_NAME: &str = "secret-service-root-ca";

// Issued certificates are backdated to tolerate clock skew between nodes.
const CLOCK_SKEW: Duration = Duration::from_secs(5 * 60);

/// A certificate authority holding its key in memory.
pub struct CertificateAuthority {
    ca_cert: X509,
    ca_cert_pem: Vec<u8>,
    ca_key: PKey<Private>,
}

impl CertificateAuthority {
    /// Generates a new self-signed CA that only lives in memory.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation or signing fails.
    pub fn generate() -> Result<Self> {
        let (ca_cert, ca_key) = generate_cert(CA_COMMON_NAME, &[], &[], None, None)?;

        Self::from_parts(ca_cert, ca_key)
    }

    /// Loads a CA from PEM encoded certificate and key.
    ///
    /// # Errors
    ///
    /// Returns an error if either input fails to parse.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let ca_cert = X509::from_pem(cert_pem)?;
        let ca_key = PKey::private_key_from_pem(key_pem)?;

        Self::from_parts(ca_cert, ca_key)
    }

    /// Opens the CA persisted in `dir`, creating and persisting a new one if
    /// none exists.
    ///
    /// If only one of certificate and key exists, a new key pair replaces it.
    ///
    /// # Errors
    ///
    /// Returns an error if the files cannot be read, parsed, or written.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let cert_path = dir.join(CA_CERT_FILE);
        let key_path = dir.join(CA_KEY_FILE);

        let cert_exists = cert_path.exists();
        let key_exists = key_path.exists();

        if cert_exists && key_exists {
            info!("reusing existing CA key pair");

            let cert_pem = fs::read(&cert_path)
                .map_err(|e| Error::Io("reading CA certificate", cert_path.clone(), e))?;
            let key_pem = fs::read(&key_path)
                .map_err(|e| Error::Io("reading CA key", key_path.clone(), e))?;

            return Self::from_pem(&cert_pem, &key_pem);
        }

        if cert_exists || key_exists {
            warn!(
                certificate_exists = cert_exists,
                key_exists, "incomplete CA key pair found, creating new key pair"
            );
        } else {
            info!("creating new CA key pair");
        }

        let ca = Self::generate()?;

        fs::create_dir_all(dir)
            .map_err(|e| Error::Io("creating PKI directory", dir.to_path_buf(), e))?;
        write_private(&cert_path, &ca.ca_cert_pem)?;
        write_private(&key_path, &ca.ca_key.private_key_to_pem_pkcs8()?)?;

        Ok(ca)
    }

    fn from_parts(ca_cert: X509, ca_key: PKey<Private>) -> Result<Self> {
        let ca_cert_pem = ca_cert.to_pem()?;

        Ok(Self {
            ca_cert,
            ca_cert_pem,
            ca_key,
        })
    }
}

impl Pki for CertificateAuthority {
    fn create_certificate(
        &self,
        common_name: &str,
        sans: &[String],
        ips: &[IpAddr],
        validity: Duration,
    ) -> Result<CertificateKeyPair> {
        let sans: Vec<&str> = sans
            .iter()
            .map(String::as_str)
            .filter(|san| !san.is_empty())
            .collect();

        let (cert, key) = generate_cert(
            common_name,
            &sans,
            ips,
            Some(validity),
            Some((&self.ca_cert, &self.ca_key)),
        )?;

        Ok(CertificateKeyPair {
            cert_pem: cert.to_pem()?,
            key_pem: key.private_key_to_pem_pkcs8()?,
        })
    }

    fn ca_certificate(&self) -> Vec<u8> {
        self.ca_cert_pem.clone()
    }
}

/// Generates a P-256 key and a certificate for it.
///
/// Without a `parent` the certificate is a self-signed CA; without a
/// `validity` it never expires.
fn generate_cert(
    common_name: &str,
    sans: &[&str],
    ips: &[IpAddr],
    validity: Option<Duration>,
    parent: Option<(&X509, &PKey<Private>)>,
) -> Result<(X509, PKey<Private>)> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
    let key = PKey::from_ec_key(EcKey::generate(&group)?)?;

    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_nid(Nid::COMMONNAME, common_name)?;
    let name = name.build();

    let mut serial = BigNum::new()?;
    serial.rand(127, MsbOption::MAYBE_ZERO, false)?;

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .saturating_sub(CLOCK_SKEW);
    let not_before = Asn1Time::from_unix(unix_seconds(now))?;
    let not_after = match validity {
        Some(validity) => Asn1Time::from_unix(unix_seconds(now.saturating_add(validity)))?,
        None => Asn1Time::from_str_x509("99991231235959Z")?,
    };

    let serial = serial.to_asn1_integer()?;

    let mut builder = X509Builder::new()?;
    builder.set_version(2)?;
    builder.set_serial_number(&serial)?;
    builder.set_subject_name(&name)?;
    builder.set_pubkey(&key)?;
    builder.set_not_before(&not_before)?;
    builder.set_not_after(&not_after)?;

    match parent {
        Some((parent_cert, _)) => {
            builder.set_issuer_name(parent_cert.subject_name())?;
            builder.append_extension(BasicConstraints::new().build()?)?;
            builder.append_extension(
                KeyUsage::new()
                    .critical()
                    .digital_signature()
                    .key_encipherment()
                    .build()?,
            )?;
        }
        None => {
            builder.set_issuer_name(&name)?;
            builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
            builder.append_extension(
                KeyUsage::new()
                    .critical()
                    .digital_signature()
                    .key_cert_sign()
                    .crl_sign()
                    .build()?,
            )?;
        }
    }

    builder.append_extension(ExtendedKeyUsage::new().server_auth().client_auth().build()?)?;

    if !sans.is_empty() || !ips.is_empty() {
        let mut san = SubjectAlternativeName::new();
        for dns in sans {
            san.dns(dns);
        }
        for ip in ips {
            san.ip(&ip.to_string());
        }
        let extension = san.build(&builder.x509v3_context(parent.map(|(cert, _)| &**cert), None))?;
        builder.append_extension(extension)?;
    }

    let signing_key = parent.map_or(&key, |(_, parent_key)| parent_key);
    builder.sign(signing_key, MessageDigest::sha256())?;

    Ok((builder.build(), key))
}

fn unix_seconds(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}

fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map_err(|e| Error::Io("opening", path.to_path_buf(), e))?;

    file.write_all(contents)
        .map_err(|e| Error::Io("writing", path.to_path_buf(), e))
}

pub(crate) fn write_pem(path: &Path, contents: &[u8]) -> Result<()> {
    write_private(path, contents)
}
