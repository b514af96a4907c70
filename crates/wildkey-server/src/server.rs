use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    audit::{AuditSink, FanoutAuditSink, StoreAuditSink, TracingAuditSink},
    auth::{require_admin_token, require_wildcard_key},
    authorizer::Authorizer,
    client_addr::parse_trusted_proxies,
    handlers::{audit_html, audit_json, create_ticket, health},
    lifecycle,
    pipeline::{HttpForwarder, TicketPipeline},
    store::Store,
    AppState,
};

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: Option<PathBuf>,
    /// Bearer token for the admin audit view. Admin routes are off without it.
    pub admin_token: Option<String>,
    /// Base URL of the host API that receives authorized tickets.
    pub upstream_url: Option<String>,
    pub trusted_proxies: Option<String>,
    pub cors_origins: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("WILDKEY_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("WILDKEY_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            data_dir: std::env::var("WILDKEY_DATA_DIR").ok().map(PathBuf::from),
            admin_token: std::env::var("WILDKEY_ADMIN_TOKEN").ok(),
            upstream_url: std::env::var("WILDKEY_UPSTREAM_URL").ok(),
            trusted_proxies: std::env::var("WILDKEY_TRUSTED_PROXIES").ok(),
            cors_origins: std::env::var("WILDKEY_CORS_ORIGINS").ok(),
        }
    }
}

/// Use the configured data directory, or fall back to the platform default.
pub fn resolve_data_dir(explicit: Option<&PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(d) => {
            std::fs::create_dir_all(d).context("create data dir")?;
            Ok(d.clone())
        }
        None => crate::dirs::data_dir(),
    }
}

/// Open the key store in the resolved data directory.
pub fn open_store(data_dir: Option<&PathBuf>) -> Result<Store> {
    let data_dir = resolve_data_dir(data_dir)?;
    info!(data_dir = %data_dir.display(), "using data directory");
    Store::open(&data_dir.join("wildkey.db")).context("open store")
}

/// Assemble handler state: the authorizer reads keys and settings from
/// `store` and audits to both tracing and the store.
pub fn build_state(
    store: Store,
    admin_token: Option<String>,
    pipeline: Option<Arc<dyn TicketPipeline>>,
    trusted_proxies: Option<&str>,
) -> AppState {
    let sinks: Vec<Arc<dyn AuditSink>> = vec![
        Arc::new(TracingAuditSink),
        Arc::new(StoreAuditSink::new(store.clone())),
    ];
    let audit: Arc<dyn AuditSink> = Arc::new(FanoutAuditSink::new(sinks));
    let authorizer = Authorizer::new(Arc::new(store.clone()), Arc::new(store.clone()), audit);

    AppState {
        store,
        authorizer: Arc::new(authorizer),
        pipeline,
        admin_token: admin_token.filter(|t| !t.is_empty()),
        trusted_proxies: Arc::new(trusted_proxies.map(parse_trusted_proxies).unwrap_or_default()),
    }
}

pub fn router(state: AppState, cors_origins: Option<&str>) -> Router {
    let cors = build_cors(cors_origins);

    let public = Router::new().route("/health", get(health));

    // Wildcard endpoint (API key required, wildcard addresses honoured).
    let wildcard = Router::new()
        .route("/api/wildcard/{endpoint}", post(create_ticket))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_wildcard_key,
        ));

    let mut app = Router::new().merge(public).merge(wildcard);

    if state.admin_token.is_some() {
        let admin = Router::new()
            .route("/admin/audit", get(audit_html))
            .route("/admin/audit.json", get(audit_json))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                require_admin_token,
            ));
        app = app.merge(admin);
    }

    app.with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub async fn run(cfg: ServerConfig) -> Result<()> {
    let store = open_store(cfg.data_dir.as_ref())?;

    lifecycle::bootstrap(&store, lifecycle::CURRENT_VERSION).context("bootstrap plugin state")?;

    let pipeline: Option<Arc<dyn TicketPipeline>> = match cfg.upstream_url.as_deref() {
        Some(url) => {
            info!(upstream = url, "forwarding authorized tickets upstream");
            Some(Arc::new(HttpForwarder::new(url)?))
        }
        None => {
            tracing::warn!("WILDKEY_UPSTREAM_URL not set — ticket submissions will return 503");
            None
        }
    };

    let state = build_state(
        store,
        cfg.admin_token,
        pipeline,
        cfg.trusted_proxies.as_deref(),
    );
    if state.admin_token.is_none() {
        info!("WILDKEY_ADMIN_TOKEN not set — admin audit view disabled");
    }

    let app = router(state, cfg.cors_origins.as_deref());

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, "wildkey server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server error")
}

fn build_cors(origins: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::OPTIONS])
        .allow_headers(Any);

    match origins {
        Some(o) => {
            let origins: Vec<_> = o
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            cors.allow_origin(origins)
        }
        None => cors.allow_origin(Any),
    }
}
