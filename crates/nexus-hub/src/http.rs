//! HTTP surface
//!
//! The auth endpoints, the websocket upgrade routes, and the static-asset
//! hook. Everything else the hub does happens on the duplex links.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

use nexus_core::config::ClientOrigin;
use nexus_core::error::AuthError;

use crate::auth::credentials::CredentialError;
use crate::state::HubState;
use crate::ws;

/// API-level error with its HTTP status
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<CredentialError> for ApiError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Auth(auth) => auth.into(),
            CredentialError::Store(e) => {
                tracing::error!("Credential store failure: {}", e);
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let status = match err {
            AuthError::InvalidCredentials
            | AuthError::InvalidBearer
            | AuthError::ExpiredBearer
            | AuthError::UnauthorizedAgent => StatusCode::UNAUTHORIZED,
            AuthError::SetupForbidden => StatusCode::FORBIDDEN,
            AuthError::AlreadyConfigured
            | AuthError::NotConfigured
            | AuthError::WeakPassword => StatusCode::BAD_REQUEST,
        };
        ApiError::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

#[derive(Serialize)]
struct StatusResponse {
    needs_setup: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetupRequest {
    password: String,
    setup_token: Option<String>,
}

#[derive(Deserialize)]
struct LoginRequest {
    password: String,
}

#[derive(Serialize)]
struct TokenResponse {
    token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangePasswordRequest {
    current_password: String,
    new_password: String,
}

#[derive(Serialize)]
struct OkResponse {
    ok: bool,
}

/// GET /api/auth/status
async fn auth_status(
    State(state): State<Arc<HubState>>,
) -> Result<Json<StatusResponse>, ApiError> {
    let needs_setup = state.credentials.needs_setup().await?;
    Ok(Json(StatusResponse { needs_setup }))
}

/// POST /api/auth/setup
///
/// 400 when already configured; 403 when the caller is neither loopback
/// nor holding the setup ticket.
async fn auth_setup(
    State(state): State<Arc<HubState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Json(body): Json<SetupRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let loopback = peer.ip().is_loopback();
    let token = state
        .credentials
        .setup(&body.password, body.setup_token.as_deref(), loopback)
        .await?;

    state
        .audit
        .record(
            "auth_setup",
            serde_json::json!({ "loopback": loopback }),
            Some(crate::auth::credentials::ADMIN_PRINCIPAL),
            None,
        )
        .await;

    Ok(Json(TokenResponse { token }))
}

/// POST /api/auth/login
async fn auth_login(
    State(state): State<Arc<HubState>>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let token = state.credentials.login(&body.password).await?;
    Ok(Json(TokenResponse { token }))
}

/// POST /api/auth/password (bearer)
async fn auth_password(
    State(state): State<Arc<HubState>>,
    headers: axum::http::HeaderMap,
    Json(body): Json<ChangePasswordRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    let token = bearer_from_headers(&headers)?;
    let claims = state.credentials.verify_bearer(token)?;

    state
        .credentials
        .change(&body.current_password, &body.new_password)
        .await?;

    state
        .audit
        .record(
            "auth_password_change",
            serde_json::json!({}),
            Some(&claims.sub),
            None,
        )
        .await;

    Ok(Json(OkResponse { ok: true }))
}

fn bearer_from_headers(headers: &axum::http::HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::InvalidBearer)?;

    let mut parts = value.split_whitespace();
    let scheme = parts.next().ok_or(AuthError::InvalidBearer)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::InvalidBearer);
    }
    let token = parts.next().ok_or(AuthError::InvalidBearer)?;
    if token.is_empty() || parts.next().is_some() {
        return Err(AuthError::InvalidBearer);
    }
    Ok(token)
}

/// Build the hub's router: auth endpoints, link upgrades, CORS, and the
/// optional static-asset fallback.
pub fn build_router(state: Arc<HubState>) -> Router {
    let cors = cors_layer(&state.config.client_origin);
    let static_dir = state.config.static_dir.clone();

    let mut router = Router::new()
        .route("/api/auth/status", get(auth_status))
        .route("/api/auth/setup", post(auth_setup))
        .route("/api/auth/login", post(auth_login))
        .route("/api/auth/password", post(auth_password))
        .route("/ws/client", get(ws::client::upgrade))
        .route("/ws/agent", get(ws::agent::upgrade));

    if let Some(dir) = static_dir {
        router = router.fallback_service(ServeDir::new(dir));
    }

    router.layer(cors).with_state(state)
}

fn cors_layer(origin: &ClientOrigin) -> CorsLayer {
    match origin {
        ClientOrigin::Any => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
        ClientOrigin::List(origins) => {
            let parsed: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|o| o.parse::<HeaderValue>().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(parsed)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_from_headers() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer abc123".parse().unwrap());
        assert_eq!(bearer_from_headers(&headers).unwrap(), "abc123");
    }

    #[test]
    fn test_bearer_scheme_case_insensitive() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "bearer abc123".parse().unwrap());
        assert_eq!(bearer_from_headers(&headers).unwrap(), "abc123");
    }

    #[test]
    fn test_bearer_missing_or_malformed() {
        let headers = axum::http::HeaderMap::new();
        assert_eq!(bearer_from_headers(&headers), Err(AuthError::InvalidBearer));

        let mut headers = axum::http::HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Basic abc123".parse().unwrap());
        assert_eq!(bearer_from_headers(&headers), Err(AuthError::InvalidBearer));

        let mut headers = axum::http::HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer a b".parse().unwrap());
        assert_eq!(bearer_from_headers(&headers), Err(AuthError::InvalidBearer));
    }
}
