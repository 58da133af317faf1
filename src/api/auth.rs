// =============================================================================
// Bearer Token Authentication — Axum Extractor
// =============================================================================
//
// Guards the diagnostic endpoints. The expected token comes from the
// `GATEKEEPER_ADMIN_TOKEN` environment variable; comparison is constant
// time. Failed attempts count as anomalies against the peer address in the
// suspicious-activity tracker.
// =============================================================================

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::app_state::AppState;

/// Compare two byte slices in constant time. The comparison always
/// examines every byte even when a mismatch is found early.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Extracts and validates `Authorization: Bearer <token>`. On failure the
/// request short-circuits with 403 before the handler body runs.
pub struct AuthBearer(pub String);

pub struct AuthRejection {
    status: StatusCode,
    message: &'static str,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, axum::Json(body)).into_response()
    }
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for AuthBearer {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let expected = std::env::var("GATEKEEPER_ADMIN_TOKEN").unwrap_or_default();

        if expected.is_empty() {
            warn!("GATEKEEPER_ADMIN_TOKEN is not set — diagnostic requests are rejected");
            return Err(AuthRejection {
                status: StatusCode::FORBIDDEN,
                message: "Server authentication not configured",
            });
        }

        let auth_header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());

        let token = match auth_header {
            Some(value) if value.starts_with("Bearer ") => &value[7..],
            _ => {
                record_auth_anomaly(parts, state);
                return Err(AuthRejection {
                    status: StatusCode::FORBIDDEN,
                    message: "Missing or invalid authorization token",
                });
            }
        };

        if !constant_time_eq(token.as_bytes(), expected.as_bytes()) {
            record_auth_anomaly(parts, state);
            return Err(AuthRejection {
                status: StatusCode::FORBIDDEN,
                message: "Invalid authorization token",
            });
        }

        Ok(AuthBearer(token.to_string()))
    }
}

fn record_auth_anomaly(parts: &Parts, state: &Arc<AppState>) {
    let source = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let count = state
        .suspicious
        .record_anomaly(&source, chrono::Utc::now().timestamp_millis());
    warn!(source = %source, anomalies = count, "authentication failure recorded");
}
