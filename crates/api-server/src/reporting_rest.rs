//! Attribution and pacing REST endpoints. Both are computed on request from
//! the posted data.

use axum::extract::{Path, State};
use axum::Json;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use stratum_core::TenantId;
use stratum_reporting::{
    AttributionComparison, AttributionModel, AttributionSummary, Journey, PacingInput,
    PacingReport,
};
use tracing::debug;

use crate::error::ApiResult;
use crate::rest::AppState;

#[derive(Debug, Deserialize)]
pub struct SummaryRequest {
    pub model: AttributionModel,
    pub journeys: Vec<Journey>,
}

#[derive(Debug, Deserialize)]
pub struct CompareRequest {
    /// Every model when omitted.
    #[serde(default)]
    pub models: Option<Vec<AttributionModel>>,
    pub journeys: Vec<Journey>,
}

#[derive(Debug, Deserialize)]
pub struct PacingRequest {
    #[serde(flatten)]
    pub input: PacingInput,
    /// Defaults to today (UTC).
    #[serde(default)]
    pub as_of: Option<NaiveDate>,
}

pub async fn attribution_summary(
    State(state): State<AppState>,
    Path(tenant): Path<TenantId>,
    Json(req): Json<SummaryRequest>,
) -> ApiResult<Json<AttributionSummary>> {
    debug!(tenant = %tenant, model = %req.model, journeys = req.journeys.len(), "Attribution summary");
    Ok(Json(state.attribution.summarize(&req.journeys, req.model)?))
}

pub async fn attribution_compare(
    State(state): State<AppState>,
    Path(tenant): Path<TenantId>,
    Json(req): Json<CompareRequest>,
) -> ApiResult<Json<AttributionComparison>> {
    let models = req.models.unwrap_or_else(|| AttributionModel::ALL.to_vec());
    debug!(tenant = %tenant, models = models.len(), journeys = req.journeys.len(), "Attribution comparison");
    Ok(Json(state.attribution.compare(&req.journeys, &models)?))
}

pub async fn pacing(
    State(state): State<AppState>,
    Path(tenant): Path<TenantId>,
    Json(req): Json<PacingRequest>,
) -> ApiResult<Json<PacingReport>> {
    let as_of = req.as_of.unwrap_or_else(|| Utc::now().date_naive());
    debug!(tenant = %tenant, as_of = %as_of, "Pacing report");
    Ok(Json(state.pacer.pace(&req.input, as_of)?))
}
