//! Shared application state and operational endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use stratum_campaigns::{AdAccountStore, DraftService, DraftStore, PublisherRegistry};
use stratum_core::config::AppConfig;
use stratum_reporting::{AttributionEngine, BudgetPacer};
use stratum_rules::{ActionExecutor, InMemoryActionExecutor, RuleEngine};
use stratum_whatsapp::{BroadcastService, MessageService, TemplateStore, WhatsAppProvider, WhatsAppSender};

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub drafts: Arc<DraftService>,
    pub rules: Arc<RuleEngine>,
    pub attribution: Arc<AttributionEngine>,
    pub pacer: Arc<BudgetPacer>,
    pub messages: Arc<MessageService>,
    pub broadcasts: Arc<BroadcastService>,
    pub node_id: String,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        config: &AppConfig,
        publishers: PublisherRegistry,
        executor: Arc<dyn ActionExecutor>,
        sender: Arc<dyn WhatsAppSender>,
    ) -> Self {
        let drafts = DraftService::new(
            Arc::new(DraftStore::new()),
            Arc::new(AdAccountStore::new()),
            publishers,
        );
        let messages = Arc::new(MessageService::new(Arc::new(TemplateStore::new()), sender));
        Self {
            drafts: Arc::new(drafts),
            rules: Arc::new(RuleEngine::new(config.rules.clone(), executor)),
            attribution: Arc::new(AttributionEngine::new(config.attribution.clone())),
            pacer: Arc::new(BudgetPacer::new(&config.pacing)),
            broadcasts: Arc::new(BroadcastService::new(messages.clone())),
            messages,
            node_id: config.node_id.clone(),
            start_time: Instant::now(),
        }
    }

    /// Simulated ad-platform publishers, in-process rule actions, and the
    /// configured WhatsApp Cloud API account.
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config,
            PublisherRegistry::simulated(),
            Arc::new(InMemoryActionExecutor::new()),
            Arc::new(WhatsAppProvider::new(&config.whatsapp)),
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
}

/// GET /health — Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /ready — Readiness probe. Stores are in memory, so the node is ready
/// as soon as it serves requests.
pub async fn readiness() -> StatusCode {
    StatusCode::OK
}

/// GET /live — Liveness probe.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}
