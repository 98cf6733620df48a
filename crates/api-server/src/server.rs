//! API server — REST routes plus the Prometheus metrics listener.

use crate::rest::{self, AppState};
use crate::{campaign_rest, reporting_rest, rules_rest, whatsapp_rest};
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use stratum_core::config::AppConfig;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Main API server.
pub struct ApiServer {
    config: AppConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: AppConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Start the HTTP REST server.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let app = router(self.state.clone());

        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    /// Start the metrics server on a separate port.
    pub async fn start_metrics(&self) -> anyhow::Result<()> {
        if !self.config.metrics.enabled {
            info!("Metrics exporter disabled");
            return Ok(());
        }
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
        builder
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}

/// Every route the server exposes, with middleware applied.
pub fn router(state: AppState) -> Router {
    let tenant = Router::new()
        // Campaign drafts
        .route(
            "/campaign-drafts",
            get(campaign_rest::list_drafts).post(campaign_rest::create_draft),
        )
        .route(
            "/campaign-drafts/:id",
            get(campaign_rest::get_draft)
                .put(campaign_rest::update_draft)
                .delete(campaign_rest::delete_draft),
        )
        .route("/campaign-drafts/:id/submit", post(campaign_rest::submit_draft))
        .route("/campaign-drafts/:id/approve", post(campaign_rest::approve_draft))
        .route("/campaign-drafts/:id/reject", post(campaign_rest::reject_draft))
        .route("/campaign-drafts/:id/publish", post(campaign_rest::publish_draft))
        .route("/campaign-drafts/:id/history", get(campaign_rest::draft_history))
        // Ad accounts
        .route(
            "/ad-accounts",
            get(campaign_rest::list_accounts).post(campaign_rest::connect_account),
        )
        .route(
            "/ad-accounts/:id",
            get(campaign_rest::get_account).delete(campaign_rest::disconnect_account),
        )
        .route("/ad-accounts/:id/enable", post(campaign_rest::enable_account))
        .route("/ad-accounts/:id/disable", post(campaign_rest::disable_account))
        .route("/ad-accounts/:id/sync", post(campaign_rest::sync_account))
        // Automation rules
        .route("/rules", get(rules_rest::list_rules).post(rules_rest::create_rule))
        .route("/rules/evaluate", post(rules_rest::evaluate_rules))
        .route(
            "/rules/:id",
            get(rules_rest::get_rule)
                .put(rules_rest::update_rule)
                .delete(rules_rest::delete_rule),
        )
        .route("/rules/:id/status", post(rules_rest::set_rule_status))
        .route("/rules/:id/history", get(rules_rest::rule_history))
        .route("/rules/:id/preview", post(rules_rest::preview_rule))
        // Reporting
        .route("/attribution/summary", post(reporting_rest::attribution_summary))
        .route("/attribution/compare", post(reporting_rest::attribution_compare))
        .route("/pacing", post(reporting_rest::pacing))
        // WhatsApp
        .route(
            "/whatsapp/templates",
            get(whatsapp_rest::list_templates).post(whatsapp_rest::create_template),
        )
        .route(
            "/whatsapp/templates/:id",
            get(whatsapp_rest::get_template).put(whatsapp_rest::update_template),
        )
        .route("/whatsapp/templates/:id/review", post(whatsapp_rest::review_template))
        .route(
            "/whatsapp/messages",
            get(whatsapp_rest::list_messages).post(whatsapp_rest::send_message),
        )
        .route(
            "/whatsapp/broadcasts",
            get(whatsapp_rest::list_broadcasts).post(whatsapp_rest::create_broadcast),
        )
        .route("/whatsapp/broadcasts/:id", get(whatsapp_rest::get_broadcast))
        .route("/whatsapp/broadcasts/:id/dispatch", post(whatsapp_rest::dispatch_broadcast))
        .route("/whatsapp/broadcasts/:id/receipts", post(whatsapp_rest::broadcast_receipt));

    Router::new()
        .nest("/api/v1/tenant/:tenant_id", tenant)
        // Operational endpoints
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
