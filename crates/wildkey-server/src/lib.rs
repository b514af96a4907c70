use std::sync::Arc;

pub mod audit;
pub mod auth;
pub mod authorizer;
pub mod client_addr;
pub mod dirs;
pub mod handlers;
pub mod lifecycle;
pub mod pipeline;
pub mod server;
pub mod store;

/// Shared application state threaded through axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: store::Store,
    pub authorizer: Arc<authorizer::Authorizer>,
    /// Host pipeline receiving authorized tickets (absent when no upstream is configured).
    pub pipeline: Option<Arc<dyn pipeline::TicketPipeline>>,
    /// Bearer token guarding the admin audit view.
    pub admin_token: Option<String>,
    /// Proxies whose `X-Forwarded-For` header is believed.
    pub trusted_proxies: Arc<Vec<ipnet::IpNet>>,
}

pub use authorizer::{Authorizer, AuthorizeError, Decision, Denial, MatchKind};
pub use server::{build_state, open_store, resolve_data_dir, router, run, ServerConfig};
pub use store::WILDCARD_IP;
