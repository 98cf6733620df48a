//! Campaign draft and ad account REST endpoints.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use stratum_campaigns::accounts::ConnectAccount;
use stratum_campaigns::draft::{DraftPatch, DraftTransition, NewDraft};
use stratum_campaigns::store::DraftFilter;
use stratum_campaigns::{AdAccount, CampaignDraft};
use stratum_core::{Page, Platform, TenantId};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::rest::AppState;

/// Header naming the dashboard user behind a request; recorded in draft
/// history.
pub const ACTOR_HEADER: &str = "x-stratum-user";

fn actor(headers: &HeaderMap) -> String {
    headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .unwrap_or("api")
        .to_string()
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub reason: String,
}

// ─── Drafts ─────────────────────────────────────────────────────────────────

/// GET /api/v1/tenant/:tenant_id/campaign-drafts
pub async fn list_drafts(
    State(state): State<AppState>,
    Path(tenant): Path<TenantId>,
    Query(filter): Query<DraftFilter>,
) -> Json<Page<CampaignDraft>> {
    Json(state.drafts.drafts().list(&tenant, &filter))
}

/// POST /api/v1/tenant/:tenant_id/campaign-drafts
pub async fn create_draft(
    State(state): State<AppState>,
    Path(tenant): Path<TenantId>,
    headers: HeaderMap,
    Json(req): Json<NewDraft>,
) -> ApiResult<(StatusCode, Json<CampaignDraft>)> {
    let draft = state.drafts.create(&tenant, req, &actor(&headers))?;
    Ok((StatusCode::CREATED, Json(draft)))
}

pub async fn get_draft(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(TenantId, Uuid)>,
) -> ApiResult<Json<CampaignDraft>> {
    Ok(Json(state.drafts.drafts().get(&tenant, id)?))
}

pub async fn update_draft(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(TenantId, Uuid)>,
    headers: HeaderMap,
    Json(patch): Json<DraftPatch>,
) -> ApiResult<Json<CampaignDraft>> {
    Ok(Json(state.drafts.update(&tenant, id, patch, &actor(&headers))?))
}

pub async fn delete_draft(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(TenantId, Uuid)>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    state.drafts.drafts().delete(&tenant, id, &actor(&headers))?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn submit_draft(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(TenantId, Uuid)>,
    headers: HeaderMap,
) -> ApiResult<Json<CampaignDraft>> {
    Ok(Json(state.drafts.submit(&tenant, id, &actor(&headers))?))
}

pub async fn approve_draft(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(TenantId, Uuid)>,
    headers: HeaderMap,
) -> ApiResult<Json<CampaignDraft>> {
    Ok(Json(state.drafts.drafts().approve(&tenant, id, &actor(&headers))?))
}

pub async fn reject_draft(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(TenantId, Uuid)>,
    headers: HeaderMap,
    Json(req): Json<RejectRequest>,
) -> ApiResult<Json<CampaignDraft>> {
    Ok(Json(state.drafts.drafts().reject(&tenant, id, &actor(&headers), req.reason)?))
}

/// POST /api/v1/tenant/:tenant_id/campaign-drafts/:id/publish
///
/// A platform rejection still answers 200 with the draft in `failed`.
pub async fn publish_draft(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(TenantId, Uuid)>,
    headers: HeaderMap,
) -> ApiResult<Json<CampaignDraft>> {
    Ok(Json(state.drafts.publish(&tenant, id, &actor(&headers))?))
}

pub async fn draft_history(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(TenantId, Uuid)>,
) -> ApiResult<Json<Vec<DraftTransition>>> {
    Ok(Json(state.drafts.drafts().history(&tenant, id)?))
}

// ─── Ad accounts ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AccountQuery {
    pub platform: Option<Platform>,
}

#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    pub amount_spent: f64,
    #[serde(default)]
    pub synced_at: Option<DateTime<Utc>>,
}

pub async fn list_accounts(
    State(state): State<AppState>,
    Path(tenant): Path<TenantId>,
    Query(query): Query<AccountQuery>,
) -> Json<Vec<AdAccount>> {
    Json(state.drafts.accounts().list(&tenant, query.platform))
}

pub async fn connect_account(
    State(state): State<AppState>,
    Path(tenant): Path<TenantId>,
    Json(req): Json<ConnectAccount>,
) -> ApiResult<(StatusCode, Json<AdAccount>)> {
    let account = state.drafts.accounts().connect(&tenant, req)?;
    Ok((StatusCode::CREATED, Json(account)))
}

pub async fn get_account(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(TenantId, Uuid)>,
) -> ApiResult<Json<AdAccount>> {
    Ok(Json(state.drafts.accounts().get(&tenant, id)?))
}

pub async fn disconnect_account(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(TenantId, Uuid)>,
) -> ApiResult<StatusCode> {
    state.drafts.accounts().disconnect(&tenant, id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn enable_account(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(TenantId, Uuid)>,
) -> ApiResult<Json<AdAccount>> {
    Ok(Json(state.drafts.accounts().set_enabled(&tenant, id, true)?))
}

pub async fn disable_account(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(TenantId, Uuid)>,
) -> ApiResult<Json<AdAccount>> {
    Ok(Json(state.drafts.accounts().set_enabled(&tenant, id, false)?))
}

pub async fn sync_account(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(TenantId, Uuid)>,
    Json(req): Json<SyncRequest>,
) -> ApiResult<Json<AdAccount>> {
    let synced_at = req.synced_at.unwrap_or_else(Utc::now);
    Ok(Json(state.drafts.accounts().record_sync(&tenant, id, req.amount_spent, synced_at)?))
}
