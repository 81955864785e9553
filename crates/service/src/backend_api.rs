//! Backend API handing out client certificates to workloads that read
//! secrets. Not exposed to users.

use std::string::FromUtf8Error;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use secret_cluster::CLIENT_PRINCIPAL;
use secret_pki::{CertificateKeyPair, Pki};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info};

/// Workloads are replaced on upgrades, so their certificates need not
/// outlive a year.
const CLIENT_VALIDITY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Credentials for reading secrets from the store.
#[derive(Debug, Serialize)]
pub struct AccessSecretsResponse {
    /// PEM encoded client certificate.
    pub cert: String,

    /// PEM encoded private key of the certificate.
    pub key: String,

    /// PEM encoded CA certificate the store's servers chain to.
    pub ca_cert: String,
}

#[derive(Clone)]
struct BackendState {
    pki: Option<Arc<dyn Pki>>,
    hostname: String,
}

/// Routes of the backend API.
///
/// Without a PKI every request is refused as unavailable.
pub fn router(pki: Option<Arc<dyn Pki>>, hostname: impl Into<String>) -> Router {
    Router::new()
        .route("/v1/access-secrets", post(access_secrets))
        .with_state(BackendState {
            pki,
            hostname: hostname.into(),
        })
}

async fn access_secrets(State(state): State<BackendState>) -> Response {
    info!("access secrets called");

    let Some(pki) = state.pki else {
        return failure(
            StatusCode::SERVICE_UNAVAILABLE,
            "no certificate authority configured".to_string(),
        );
    };

    let pair = match pki.create_certificate(
        CLIENT_PRINCIPAL,
        &[state.hostname],
        &[],
        CLIENT_VALIDITY,
    ) {
        Ok(pair) => pair,
        Err(e) => {
            error!(error = %e, "access secrets failed");
            return failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("creating client certificate: {e}"),
            );
        }
    };

    let response = match encode(pair, pki.ca_certificate()) {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "access secrets failed");
            return failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    info!("access secrets succeeded");

    Json(response).into_response()
}

fn encode(
    pair: CertificateKeyPair,
    ca_cert: Vec<u8>,
) -> Result<AccessSecretsResponse, FromUtf8Error> {
    Ok(AccessSecretsResponse {
        cert: String::from_utf8(pair.cert_pem)?,
        key: String::from_utf8(pair.key_pem)?,
        ca_cert: String::from_utf8(ca_cert)?,
    })
}

fn failure(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
