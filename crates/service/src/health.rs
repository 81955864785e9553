//! Health probe endpoint.

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;

/// Routes of the health server. The server only runs once the store is
/// available, so every probe reports healthy.
pub fn router() -> Router {
    Router::new().route("/healthz", get(|| async { (StatusCode::OK, "ok") }))
}
