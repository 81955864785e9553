use bytes::Bytes;

/// Name of the built-in administrator user and role.
pub const ROOT: &str = "root";

/// Identity attached to in-process requests.
///
/// The engine authorizes in-process calls by the certificate identity found on
/// the request, the same way it would authorize a peer certificate presented
/// during a TLS handshake. A `LocalAuthContext` is trusted only because it is
/// built from a certificate held by the process that also runs the server.
/// Never build one from data received over the network.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LocalAuthContext {
    common_name: String,
}

impl LocalAuthContext {
    /// Creates a context for the certificate with the given common name.
    pub fn from_certificate_identity(common_name: impl Into<String>) -> Self {
        Self {
            common_name: common_name.into(),
        }
    }

    /// The common name the request is authorized as.
    #[must_use]
    pub fn common_name(&self) -> &str {
        &self.common_name
    }
}

/// Whether authorization is enabled.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AuthStatus {
    /// Authorization is enabled cluster-wide.
    pub enabled: bool,
}

/// Options for creating a user.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct UserAddOptions {
    /// Disallow password authentication; the user can only authenticate with a
    /// client certificate carrying its name as common name.
    pub no_password: bool,
}

/// The access a permission grants.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PermissionType {
    /// Read-only access.
    Read,

    /// Write-only access.
    Write,

    /// Read and write access.
    ReadWrite,
}

/// A permission over a key or a half-open key range.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Permission {
    /// The granted access.
    pub perm_type: PermissionType,

    /// The first key covered.
    pub key: Bytes,

    /// End of the half-open range `[key, range_end)`. Empty means only `key`
    /// itself; a single zero byte means every key from `key` onwards.
    pub range_end: Bytes,
}

impl Permission {
    /// A permission covering every key that starts with `prefix`.
    ///
    /// The range end is `prefix` with its last byte incremented, dropping any
    /// trailing `0xff` bytes first, so `foo/` covers `[foo/, foo0)`.
    pub fn prefix(prefix: impl AsRef<[u8]>, perm_type: PermissionType) -> Self {
        let key = prefix.as_ref();

        Self {
            perm_type,
            key: Bytes::copy_from_slice(key),
            range_end: prefix_range_end(key),
        }
    }

    /// Whether `key` falls inside this permission's range.
    #[must_use]
    pub fn covers(&self, key: &[u8]) -> bool {
        match self.range_end.as_ref() {
            [] => key == self.key.as_ref(),
            [0] => key >= self.key.as_ref(),
            end => key >= self.key.as_ref() && key < end,
        }
    }

    /// Whether this permission grants read access.
    #[must_use]
    pub const fn allows_read(&self) -> bool {
        matches!(
            self.perm_type,
            PermissionType::Read | PermissionType::ReadWrite
        )
    }

    /// Whether this permission grants write access.
    #[must_use]
    pub const fn allows_write(&self) -> bool {
        matches!(
            self.perm_type,
            PermissionType::Write | PermissionType::ReadWrite
        )
    }
}

fn prefix_range_end(prefix: &[u8]) -> Bytes {
    let mut end = prefix.to_vec();

    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return Bytes::from(end);
        }
    }

    // Prefix was empty or all 0xff: cover everything.
    Bytes::from_static(&[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_range_end() {
        let permission = Permission::prefix("inference-secrets/", PermissionType::Read);

        assert_eq!(permission.key.as_ref(), b"inference-secrets/");
        assert_eq!(permission.range_end.as_ref(), b"inference-secrets0");
    }

    #[test]
    fn test_prefix_trailing_max_bytes() {
        let permission = Permission::prefix([b'a', 0xff, 0xff], PermissionType::Read);

        assert_eq!(permission.range_end.as_ref(), b"b");
    }

    #[test]
    fn test_empty_prefix_covers_everything() {
        let permission = Permission::prefix("", PermissionType::ReadWrite);

        assert!(permission.covers(b""));
        assert!(permission.covers(b"anything"));
    }

    #[test]
    fn test_covers() {
        let permission = Permission::prefix("inference-secrets/", PermissionType::Read);

        assert!(permission.covers(b"inference-secrets/"));
        assert!(permission.covers(b"inference-secrets/abc"));
        assert!(!permission.covers(b"inference-secrets0"));
        assert!(!permission.covers(b"inference-secret"));
        assert!(!permission.covers(b"other/abc"));

        assert!(permission.allows_read());
        assert!(!permission.allows_write());
    }

    #[test]
    fn test_single_key_permission() {
        let permission = Permission {
            perm_type: PermissionType::Write,
            key: Bytes::from_static(b"k"),
            range_end: Bytes::new(),
        };

        assert!(permission.covers(b"k"));
        assert!(!permission.covers(b"k2"));
        assert!(permission.allows_write());
    }
}
