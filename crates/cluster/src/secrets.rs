use crate::auth::SECRET_PREFIX;
use crate::error::{Error, Result};

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use secret_kv::{
    Compare, CompareOp, KvServer, LeaseId, LocalAuthContext, RequestOp, TxnRequest,
};
use tracing::{debug, warn};

/// One key's share of a transaction: its precondition and the operations to
/// run for it in either branch.
///
/// Keeping the parts together ties every failure-branch response back to the
/// key it belongs to.
#[derive(Debug)]
struct TxnEntry<'a> {
    id: &'a str,
    compare: Compare,
    on_success: RequestOp,
    on_failure: Option<RequestOp>,
}

impl<'a> TxnEntry<'a> {
    /// Puts the secret if its key does not exist, reads the existing key
    /// otherwise.
    fn create(id: &'a str, value: Bytes, lease: Option<LeaseId>) -> Self {
        let key = secret_key(id);

        Self {
            id,
            compare: Compare::create_revision(key.clone(), CompareOp::Equal, 0),
            on_success: RequestOp::Put {
                key: key.clone(),
                value,
                lease,
            },
            on_failure: Some(RequestOp::Range { key }),
        }
    }

    /// Deletes the secret if its key exists.
    fn delete(id: &'a str) -> Self {
        let key = secret_key(id);

        Self {
            id,
            compare: Compare::create_revision(key.clone(), CompareOp::Greater, 0),
            on_success: RequestOp::DeleteRange { key },
            on_failure: None,
        }
    }
}

fn build_request(entries: &[TxnEntry<'_>]) -> TxnRequest {
    TxnRequest {
        compare: entries.iter().map(|entry| entry.compare.clone()).collect(),
        success: entries
            .iter()
            .map(|entry| entry.on_success.clone())
            .collect(),
        failure: entries
            .iter()
            .filter_map(|entry| entry.on_failure.clone())
            .collect(),
    }
}

fn secret_key(id: &str) -> Bytes {
    Bytes::from(format!("{SECRET_PREFIX}{id}"))
}

/// Handle for storing and deleting secrets in a running store.
///
/// Every request is authorized as the certificate identity of this node.
pub struct SecretStore<S> {
    server: Arc<S>,
    ctx: LocalAuthContext,
}

impl<S> Clone for SecretStore<S> {
    fn clone(&self) -> Self {
        Self {
            server: self.server.clone(),
            ctx: self.ctx.clone(),
        }
    }
}

impl<S> SecretStore<S>
where
    S: KvServer,
{
    pub(crate) const fn new(server: Arc<S>, ctx: LocalAuthContext) -> Self {
        Self { server, ctx }
    }

    /// Member name of the underlying server.
    pub fn name(&self) -> &str {
        self.server.name()
    }

    /// Stores all `secrets` or none of them.
    ///
    /// With a positive `ttl` the secrets share a lease and expire after `ttl`
    /// seconds. The lease is revoked again if the secrets are not written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SecretsExist`] naming every secret that already
    /// exists, in which case nothing is written, or the failing store
    /// request.
    pub async fn set(&self, secrets: &BTreeMap<String, Bytes>, ttl: i64) -> Result<(), S::Error> {
        if secrets.is_empty() {
            return Ok(());
        }

        let lease = if ttl > 0 {
            let lease = self
                .server
                .lease_grant(&self.ctx, ttl)
                .await
                .map_err(|e| Error::Kv("creating lease for secrets", e))?;
            Some(lease.id)
        } else {
            None
        };

        let result = self.write(secrets, lease).await;

        if let (Err(_), Some(lease)) = (&result, lease) {
            if let Err(error) = self.server.lease_revoke(&self.ctx, lease).await {
                warn!(%error, lease_id = lease, "failed to revoke lease after failed transaction");
            }
        }

        result
    }

    async fn write(
        &self,
        secrets: &BTreeMap<String, Bytes>,
        lease: Option<LeaseId>,
    ) -> Result<(), S::Error> {
        let entries: Vec<TxnEntry<'_>> = secrets
            .iter()
            .map(|(id, value)| TxnEntry::create(id, value.clone(), lease))
            .collect();

        let response = self
            .server
            .txn(&self.ctx, build_request(&entries))
            .await
            .map_err(|e| Error::Kv("writing transaction to store", e))?;

        if response.succeeded {
            debug!(count = entries.len(), "stored secrets");
            return Ok(());
        }

        let existing: Vec<String> = entries
            .iter()
            .zip(&response.responses)
            .filter(|(_, response)| response.range_kvs().is_some_and(|kvs| !kvs.is_empty()))
            .map(|(entry, _)| entry.id.to_string())
            .collect();

        if existing.is_empty() {
            Err(Error::WriteFailed)
        } else {
            Err(Error::SecretsExist(existing))
        }
    }

    /// Deletes all secrets named by `ids` or none of them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SecretsMissing`] if any of the secrets does not
    /// exist, in which case nothing is deleted, or the failing store request.
    pub async fn delete(&self, ids: &[String]) -> Result<(), S::Error> {
        if ids.is_empty() {
            return Ok(());
        }

        let entries: Vec<TxnEntry<'_>> = ids.iter().map(|id| TxnEntry::delete(id)).collect();

        let response = self
            .server
            .txn(&self.ctx, build_request(&entries))
            .await
            .map_err(|e| Error::Kv("writing transaction to store", e))?;

        if !response.succeeded {
            return Err(Error::SecretsMissing);
        }

        debug!(count = entries.len(), "deleted secrets");

        Ok(())
    }

    /// Reads a secret, `None` if it does not exist or has expired.
    ///
    /// # Errors
    ///
    /// Returns the failing store request.
    pub async fn get(&self, id: &str) -> Result<Option<Bytes>, S::Error> {
        let request = TxnRequest {
            success: vec![RequestOp::Range {
                key: secret_key(id),
            }],
            ..TxnRequest::default()
        };

        let response = self
            .server
            .txn(&self.ctx, request)
            .await
            .map_err(|e| Error::Kv("reading secret from store", e))?;

        Ok(response
            .responses
            .first()
            .and_then(|response| response.range_kvs())
            .and_then(|kvs| kvs.first())
            .map(|kv| kv.value.clone()))
    }

    /// Stops the underlying server. Later requests fail.
    pub fn close(&self) {
        self.server.close();
    }
}
