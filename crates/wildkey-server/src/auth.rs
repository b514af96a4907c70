use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use constant_time_eq::constant_time_eq;
use serde_json::json;
use tracing::{error, info};

use crate::{
    authorizer::{Decision, MatchKind},
    client_addr::resolve_caller,
    store::CredentialRecord,
    AppState,
};

/// Key resolved by [`require_wildcard_key`], available to handlers as a
/// request extension.
#[derive(Debug, Clone)]
pub struct AuthorizedKey {
    pub record: CredentialRecord,
    pub matched: MatchKind,
    pub caller: String,
}

/// Axum middleware that authorizes `X-API-Key` against the caller address,
/// honouring keys stored against the wildcard address.
///
/// Every denial reason yields the same 401 body; the reason is only logged.
pub async fn require_wildcard_key(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let caller = resolve_caller(peer, request.headers(), &state.trusted_proxies);

    let credential = request
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    match state.authorizer.authorize(credential.as_deref(), &caller) {
        Ok(Decision::Authorized { record, matched }) => {
            request.extensions_mut().insert(AuthorizedKey {
                record,
                matched,
                caller,
            });
            next.run(request).await
        }
        Ok(Decision::Denied(reason)) => {
            info!(%reason, caller = %caller.escape_debug(), "audit: key.denied");
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "unauthorized — valid API key required"})),
            )
                .into_response()
        }
        Err(e) => {
            error!(error = %e, "api key authorization unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": "authorization temporarily unavailable"})),
            )
                .into_response()
        }
    }
}

/// Axum middleware that validates `Authorization: Bearer <admin_token>`.
/// Admin routes are only mounted when a token is configured; a missing token
/// here rejects everything.
pub async fn require_admin_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match (token, state.admin_token.as_deref()) {
        (Some(t), Some(expected)) if constant_time_eq(t.as_bytes(), expected.as_bytes()) => {
            next.run(request).await
        }
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "unauthorized — valid WILDKEY_ADMIN_TOKEN required"})),
        )
            .into_response(),
    }
}
