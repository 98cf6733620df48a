//! Automation rule REST endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use stratum_core::TenantId;
use stratum_rules::{
    EvaluationReport, MetricSnapshot, NewRule, PreviewMatch, Rule, RulePatch, RuleStatus,
    RuleTrigger,
};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::rest::AppState;

#[derive(Debug, Deserialize)]
pub struct RuleQuery {
    pub status: Option<RuleStatus>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: RuleStatus,
}

/// Snapshots for a dry run. `now` only decides which matches are reported
/// as in cooldown and defaults to the server clock.
#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    pub snapshots: Vec<MetricSnapshot>,
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
}

/// Snapshots to evaluate. Cooldowns are always measured on the server clock.
#[derive(Debug, Deserialize)]
pub struct EvaluateRequest {
    pub snapshots: Vec<MetricSnapshot>,
}

pub async fn list_rules(
    State(state): State<AppState>,
    Path(tenant): Path<TenantId>,
    Query(query): Query<RuleQuery>,
) -> Json<Vec<Rule>> {
    Json(state.rules.list(&tenant, query.status))
}

pub async fn create_rule(
    State(state): State<AppState>,
    Path(tenant): Path<TenantId>,
    Json(req): Json<NewRule>,
) -> ApiResult<(StatusCode, Json<Rule>)> {
    let rule = state.rules.create(&tenant, req)?;
    Ok((StatusCode::CREATED, Json(rule)))
}

pub async fn get_rule(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(TenantId, Uuid)>,
) -> ApiResult<Json<Rule>> {
    Ok(Json(state.rules.get(&tenant, id)?))
}

pub async fn update_rule(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(TenantId, Uuid)>,
    Json(patch): Json<RulePatch>,
) -> ApiResult<Json<Rule>> {
    Ok(Json(state.rules.update(&tenant, id, patch)?))
}

pub async fn delete_rule(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(TenantId, Uuid)>,
) -> ApiResult<StatusCode> {
    state.rules.delete(&tenant, id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_rule_status(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(TenantId, Uuid)>,
    Json(req): Json<StatusRequest>,
) -> ApiResult<Json<Rule>> {
    Ok(Json(state.rules.set_status(&tenant, id, req.status)?))
}

pub async fn rule_history(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(TenantId, Uuid)>,
) -> ApiResult<Json<Vec<RuleTrigger>>> {
    Ok(Json(state.rules.history(&tenant, id)?))
}

pub async fn preview_rule(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(TenantId, Uuid)>,
    Json(req): Json<PreviewRequest>,
) -> ApiResult<Json<Vec<PreviewMatch>>> {
    let now = req.now.unwrap_or_else(Utc::now);
    Ok(Json(state.rules.preview(&tenant, id, &req.snapshots, now)?))
}

/// POST /api/v1/tenant/:tenant_id/rules/evaluate
pub async fn evaluate_rules(
    State(state): State<AppState>,
    Path(tenant): Path<TenantId>,
    Json(req): Json<EvaluateRequest>,
) -> Json<EvaluationReport> {
    Json(state.rules.evaluate(&tenant, &req.snapshots, Utc::now()))
}
