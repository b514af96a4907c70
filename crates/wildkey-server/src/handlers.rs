use std::fmt::Write as _;

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::{
    audit::{escape_html, AuditEvent},
    auth::AuthorizedKey,
    pipeline::{TicketFormat, TicketSubmission},
    AppState,
};

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

// ── Wildcard ticket endpoint ──────────────────────────────────────────────────

pub async fn create_ticket(
    State(state): State<AppState>,
    Path(endpoint): Path<String>,
    Extension(key): Extension<AuthorizedKey>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(format) = TicketFormat::from_endpoint(&endpoint) else {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "not found"}))).into_response();
    };

    let Some(pipeline) = &state.pipeline else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "no upstream ticket pipeline configured"})),
        )
            .into_response();
    };

    let submission = TicketSubmission {
        format,
        key_id: key.record.id,
        caller: key.caller.clone(),
        content_type: headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned),
        body,
    };

    match pipeline.create_ticket(submission).await {
        Ok(resp) => {
            info!(
                key_id = key.record.id,
                matched = ?key.matched,
                %format,
                status = resp.status,
                "audit: ticket.create"
            );
            let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::BAD_GATEWAY);
            let mut builder = Response::builder().status(status);
            if let Some(ct) = resp.content_type {
                builder = builder.header(header::CONTENT_TYPE, ct);
            }
            builder
                .body(Body::from(resp.body))
                .unwrap_or_else(|e| internal_error(e.into()))
        }
        Err(e) => {
            error!(error = %e, "upstream ticket pipeline failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({"error": "upstream ticket pipeline failed"})),
            )
                .into_response()
        }
    }
}

// ── Admin audit view ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AuditParams {
    pub limit: Option<usize>,
}

const DEFAULT_AUDIT_LIMIT: usize = 100;
const MAX_AUDIT_LIMIT: usize = 1000;

fn audit_limit(params: &AuditParams) -> usize {
    params
        .limit
        .unwrap_or(DEFAULT_AUDIT_LIMIT)
        .clamp(1, MAX_AUDIT_LIMIT)
}

pub async fn audit_json(
    State(state): State<AppState>,
    Query(params): Query<AuditParams>,
) -> Response {
    match state.store.list_audit(audit_limit(&params)) {
        Ok(events) => Json(json!({ "events": events })).into_response(),
        Err(e) => internal_error(e),
    }
}

pub async fn audit_html(
    State(state): State<AppState>,
    Query(params): Query<AuditParams>,
) -> Response {
    let events = match state.store.list_audit(audit_limit(&params)) {
        Ok(events) => events,
        Err(e) => return internal_error(e),
    };

    Html(render_audit_page(&events)).into_response()
}

/// Event and caller are escaped here. The message already carries an
/// escaped caller from [`AuditEvent::wildcard_use`] and is written as stored.
fn render_audit_page(events: &[AuditEvent]) -> String {
    let mut page = String::from(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Wildcard API key audit</title></head>\n\
         <body><h1>Wildcard API key audit</h1>\n\
         <table><thead><tr><th>Time</th><th>Event</th><th>Caller</th><th>Message</th></tr></thead><tbody>\n",
    );
    for e in events {
        // Writing to a String cannot fail.
        let _ = writeln!(
            page,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            e.timestamp,
            escape_html(&e.event),
            escape_html(&e.caller),
            e.message,
        );
    }
    page.push_str("</tbody></table></body></html>\n");
    page
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn internal_error(e: anyhow::Error) -> Response {
    error!(error = %e, "internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "internal server error"})),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_limit_is_clamped() {
        assert_eq!(audit_limit(&AuditParams { limit: None }), 100);
        assert_eq!(audit_limit(&AuditParams { limit: Some(0) }), 1);
        assert_eq!(audit_limit(&AuditParams { limit: Some(50) }), 50);
        assert_eq!(audit_limit(&AuditParams { limit: Some(1_000_000) }), 1000);
    }

    #[test]
    fn audit_page_escapes_each_cell_once() {
        let page = render_audit_page(&[AuditEvent::wildcard_use("<script>")]);
        let row = page
            .lines()
            .find(|l| l.starts_with("<tr><td>") && !l.contains("<th>"))
            .unwrap();
        let cells: Vec<&str> = row
            .trim_start_matches("<tr><td>")
            .trim_end_matches("</td></tr>")
            .split("</td><td>")
            .collect();

        assert_eq!(cells.len(), 4);
        assert_eq!(cells[2], "&lt;script&gt;");
        assert_eq!(
            cells[3],
            "API key with wildcard IP (0.0.0.0) was used from &lt;script&gt;"
        );
        assert_eq!(cells[3].matches("&lt;script&gt;").count(), 1);
        assert!(!page.contains("&amp;lt;"), "{page}");
        assert!(!page.contains("<script>"), "{page}");
    }
}
