use crate::Pki;
use crate::ca::write_pem;
use crate::error::{Error, Result};

use std::fs;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

/// File name of the member certificate inside the PKI directory.
pub const MEMBER_CERT_FILE: &str = "member.crt";

/// File name of the member private key inside the PKI directory.
pub const MEMBER_KEY_FILE: &str = "member.key";

/// Common name of member certificates. Members act as the store's root user.
pub const MEMBER_COMMON_NAME: &str = "root";

const MEMBER_VALIDITY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Paths of a member's certificate and key on disk.
#[derive(Clone, Debug)]
pub struct MemberKeyPair {
    /// Path to the PEM certificate.
    pub cert_path: PathBuf,

    /// Path to the PEM private key.
    pub key_path: PathBuf,

    /// PEM encoded certificate.
    pub cert_pem: Vec<u8>,
}

/// Issues a member certificate for `host` and writes it, with its key, to
/// `dir`, replacing any previous pair.
///
/// The certificate is valid for `localhost`, the loopback and unspecified
/// addresses, and `host` as a DNS name or IP address.
///
/// # Errors
///
/// Returns an error if issuing or writing the pair fails.
pub fn ensure_member_key_pair(
    dir: impl AsRef<Path>,
    host: &str,
    pki: &impl Pki,
) -> Result<MemberKeyPair> {
    let dir = dir.as_ref();

    let mut sans = vec!["localhost".to_string()];
    let mut ips = vec![
        IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        IpAddr::V6(Ipv6Addr::LOCALHOST),
    ];
    match host.parse::<IpAddr>() {
        Ok(ip) if !ips.contains(&ip) => ips.push(ip),
        Ok(_) => {}
        Err(_) => sans.push(host.to_string()),
    }

    let pair = pki.create_certificate(MEMBER_COMMON_NAME, &sans, &ips, MEMBER_VALIDITY)?;

    fs::create_dir_all(dir)
        .map_err(|e| Error::Io("creating PKI directory", dir.to_path_buf(), e))?;

    let cert_path = dir.join(MEMBER_CERT_FILE);
    let key_path = dir.join(MEMBER_KEY_FILE);
    write_pem(&cert_path, &pair.cert_pem)?;
    write_pem(&key_path, &pair.key_pem)?;

    debug!(host, ?cert_path, "wrote member key pair");

    Ok(MemberKeyPair {
        cert_path,
        key_path,
        cert_pem: pair.cert_pem,
    })
}
