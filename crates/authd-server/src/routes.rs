//! HTTP routes.

use authd_ldap::{Authenticator, Rejection};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

/// Upper bound for one HTTP exchange.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    authenticator: Arc<Authenticator>,
}

impl AppState {
    /// Creates a new state instance.
    #[must_use]
    pub fn new(authenticator: Authenticator) -> Self {
        Self {
            authenticator: Arc::new(authenticator),
        }
    }
}

/// Builds the router with every route under `base_path`.
///
/// `base_path` must already be normalized (empty, or a leading `/` without a trailing one).
pub fn create_router(state: AppState, base_path: &str) -> Router {
    let api = Router::new()
        .route("/v1/auth", post(authenticate))
        .route("/v1/healthz", get(healthz))
        .route("/v1/readyz", get(readyz))
        .with_state(state);

    let app = if base_path.is_empty() {
        api
    } else {
        Router::new().nest(base_path, api)
    };

    app.layer(TimeoutLayer::new(HTTP_TIMEOUT))
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Deserialize)]
struct AuthRequest {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Serialize)]
struct AuthResponse {
    ok: bool,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    user: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl AuthResponse {
    fn accepted(user: BTreeMap<String, String>) -> Response {
        let body = Self {
            ok: true,
            user,
            error: None,
            detail: None,
        };
        (StatusCode::OK, Json(body)).into_response()
    }

    fn refused(status: StatusCode, error: &'static str, detail: Option<String>) -> Response {
        let body = Self {
            ok: false,
            user: BTreeMap::new(),
            error: Some(error),
            detail,
        };
        (status, Json(body)).into_response()
    }
}

/// `POST /v1/auth`
async fn authenticate(State(state): State<AppState>, body: Bytes) -> Response {
    let request: AuthRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return AuthResponse::refused(
                StatusCode::BAD_REQUEST,
                "invalid_json",
                Some(err.to_string()),
            )
        }
    };

    if request.username.is_empty() || request.password.is_empty() {
        return AuthResponse::refused(StatusCode::BAD_REQUEST, "missing_credentials", None);
    }

    match state
        .authenticator
        .authenticate(&request.username, &request.password)
        .await
    {
        Ok(identity) => AuthResponse::accepted(identity.into_attributes()),
        Err(err) => match err.rejection() {
            Rejection::Unavailable => {
                AuthResponse::refused(StatusCode::INTERNAL_SERVER_ERROR, "ldap_client_error", None)
            }
            Rejection::InvalidCredentials => {
                debug!(stage = %err.stage(), kind = %err.kind(), "credentials refused");
                AuthResponse::refused(StatusCode::UNAUTHORIZED, "invalid_credentials", None)
            }
        },
    }
}

/// `GET /v1/healthz`
async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// `GET /v1/readyz`
async fn readyz() -> Json<serde_json::Value> {
    Json(json!({ "ready": "true" }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refusal_body_omits_user() {
        let body = AuthResponse {
            ok: false,
            user: BTreeMap::new(),
            error: Some("invalid_credentials"),
            detail: None,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({ "ok": false, "error": "invalid_credentials" })
        );
    }

    #[test]
    fn acceptance_body_carries_attributes() {
        let mut user = BTreeMap::new();
        user.insert("uid".to_string(), "alice".to_string());
        let body = AuthResponse {
            ok: true,
            user,
            error: None,
            detail: None,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({ "ok": true, "user": { "uid": "alice" } })
        );
    }
}
