//! User-facing API for storing and deleting secrets.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::put;
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use secret_cluster::SecretStore;
use secret_kv::{KvError, KvServer};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

/// Secret lengths accepted, in bytes: AES-128, AES-192 and AES-256 keys.
const VALID_SECRET_LENGTHS: [usize; 3] = [16, 24, 32];

/// Body of a request storing secrets.
#[derive(Debug, Deserialize)]
pub struct SetSecretsRequest {
    /// Base64 encoded secrets by ID.
    pub secrets: BTreeMap<String, String>,

    /// Seconds until the secrets expire. Zero or less never expires.
    #[serde(default)]
    pub time_to_live: i64,
}

/// Body of a request deleting secrets.
#[derive(Debug, Deserialize)]
pub struct DeleteSecretsRequest {
    /// IDs of the secrets to delete.
    pub ids: Vec<String>,
}

/// An error returned to the caller with its status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn invalid_secrets(problems: &[String]) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: format!(
                "invalid secret format: secrets must be 16 (AES-128), 24 (AES-192), or 32 (AES-256) bytes long: {}",
                problems.join("\n")
            ),
        }
    }
}

impl<KE> From<secret_cluster::Error<KE>> for ApiError
where
    KE: KvError,
{
    fn from(error: secret_cluster::Error<KE>) -> Self {
        let status = match &error {
            secret_cluster::Error::SecretsExist(_) => StatusCode::CONFLICT,
            secret_cluster::Error::SecretsMissing => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        Self {
            status,
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// Routes of the user API.
pub fn router<S>(store: SecretStore<S>) -> Router
where
    S: KvServer,
{
    Router::new()
        .route(
            "/v1/secrets",
            put(set_secrets::<S>).delete(delete_secrets::<S>),
        )
        .with_state(store)
}

async fn set_secrets<S>(
    State(store): State<SecretStore<S>>,
    Json(request): Json<SetSecretsRequest>,
) -> Result<StatusCode, ApiError>
where
    S: KvServer,
{
    info!(
        count = request.secrets.len(),
        time_to_live = request.time_to_live,
        "set secrets called"
    );

    let secrets = decode_secrets(&request.secrets).map_err(|problems| {
        warn!(invalid = problems.len(), "rejecting invalid secrets");
        ApiError::invalid_secrets(&problems)
    })?;

    store.set(&secrets, request.time_to_live).await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn delete_secrets<S>(
    State(store): State<SecretStore<S>>,
    Json(request): Json<DeleteSecretsRequest>,
) -> Result<StatusCode, ApiError>
where
    S: KvServer,
{
    info!(count = request.ids.len(), "delete secrets called");

    store.delete(&request.ids).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Decodes every secret, or describes every secret that is not valid.
fn decode_secrets(
    encoded: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, Bytes>, Vec<String>> {
    let mut secrets = BTreeMap::new();
    let mut problems = Vec::new();

    for (id, value) in encoded {
        match STANDARD.decode(value) {
            Ok(secret) if VALID_SECRET_LENGTHS.contains(&secret.len()) => {
                secrets.insert(id.clone(), Bytes::from(secret));
            }
            Ok(secret) => {
                problems.push(format!("secret {id:?} has invalid length: {}", secret.len()));
            }
            Err(error) => problems.push(format!("secret {id:?} is not valid base64: {error}")),
        }
    }

    if problems.is_empty() {
        Ok(secrets)
    } else {
        Err(problems)
    }
}
