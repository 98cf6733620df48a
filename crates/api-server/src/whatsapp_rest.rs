//! WhatsApp template, message and broadcast REST endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use stratum_core::TenantId;
use stratum_whatsapp::templates::{NewTemplate, TemplatePatch, TemplateReview, TemplateStatus};
use stratum_whatsapp::{
    Broadcast, DeliveryReceipt, NewBroadcast, SendMessage, WhatsAppMessage, WhatsAppTemplate,
};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::rest::AppState;

// ─── Templates ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct TemplateQuery {
    pub status: Option<TemplateStatus>,
}

pub async fn list_templates(
    State(state): State<AppState>,
    Path(tenant): Path<TenantId>,
    Query(query): Query<TemplateQuery>,
) -> Json<Vec<WhatsAppTemplate>> {
    Json(state.messages.templates().list(&tenant, query.status))
}

pub async fn create_template(
    State(state): State<AppState>,
    Path(tenant): Path<TenantId>,
    Json(req): Json<NewTemplate>,
) -> ApiResult<(StatusCode, Json<WhatsAppTemplate>)> {
    let template = state.messages.templates().create(&tenant, req)?;
    Ok((StatusCode::CREATED, Json(template)))
}

pub async fn get_template(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(TenantId, Uuid)>,
) -> ApiResult<Json<WhatsAppTemplate>> {
    Ok(Json(state.messages.templates().get(&tenant, id)?))
}

pub async fn update_template(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(TenantId, Uuid)>,
    Json(patch): Json<TemplatePatch>,
) -> ApiResult<Json<WhatsAppTemplate>> {
    Ok(Json(state.messages.templates().update(&tenant, id, patch)?))
}

/// POST /api/v1/tenant/:tenant_id/whatsapp/templates/:id/review
pub async fn review_template(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(TenantId, Uuid)>,
    Json(review): Json<TemplateReview>,
) -> ApiResult<Json<WhatsAppTemplate>> {
    Ok(Json(state.messages.templates().review(&tenant, id, review)?))
}

// ─── Messages ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    pub contact: Option<String>,
}

pub async fn list_messages(
    State(state): State<AppState>,
    Path(tenant): Path<TenantId>,
    Query(query): Query<MessageQuery>,
) -> Json<Vec<WhatsAppMessage>> {
    Json(state.messages.list_messages(&tenant, query.contact.as_deref()))
}

/// POST /api/v1/tenant/:tenant_id/whatsapp/messages
///
/// A provider failure answers 201 with the message in `failed`.
pub async fn send_message(
    State(state): State<AppState>,
    Path(tenant): Path<TenantId>,
    Json(req): Json<SendMessage>,
) -> ApiResult<(StatusCode, Json<WhatsAppMessage>)> {
    let message = state.messages.send_message(&tenant, req)?;
    Ok((StatusCode::CREATED, Json(message)))
}

// ─── Broadcasts ─────────────────────────────────────────────────────────────

pub async fn list_broadcasts(
    State(state): State<AppState>,
    Path(tenant): Path<TenantId>,
) -> Json<Vec<Broadcast>> {
    Json(state.broadcasts.list(&tenant))
}

pub async fn create_broadcast(
    State(state): State<AppState>,
    Path(tenant): Path<TenantId>,
    Json(req): Json<NewBroadcast>,
) -> ApiResult<(StatusCode, Json<Broadcast>)> {
    let broadcast = state.broadcasts.create(&tenant, req)?;
    Ok((StatusCode::CREATED, Json(broadcast)))
}

pub async fn get_broadcast(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(TenantId, Uuid)>,
) -> ApiResult<Json<Broadcast>> {
    Ok(Json(state.broadcasts.get(&tenant, id)?))
}

pub async fn dispatch_broadcast(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(TenantId, Uuid)>,
) -> ApiResult<Json<Broadcast>> {
    Ok(Json(state.broadcasts.dispatch(&tenant, id)?))
}

pub async fn broadcast_receipt(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(TenantId, Uuid)>,
    Json(receipt): Json<DeliveryReceipt>,
) -> ApiResult<Json<Broadcast>> {
    Ok(Json(state.broadcasts.record_status(&tenant, id, receipt)?))
}
