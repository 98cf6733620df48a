//! Template broadcasts to a recipient segment, with per-recipient delivery
//! tracking.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use stratum_core::{StratumError, StratumResult, TenantId};
use tracing::info;
use uuid::Uuid;

use crate::messages::{validate_phone, MessageService, MessageStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastStatus {
    Draft,
    Sending,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastRecipient {
    pub phone: String,
    pub message_id: Option<Uuid>,
    /// `None` until the broadcast is dispatched.
    pub status: Option<MessageStatus>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastCounts {
    pub recipients: usize,
    /// Accepted by WhatsApp, whatever happened afterwards.
    pub sent: usize,
    /// Delivered or read.
    pub delivered: usize,
    pub read: usize,
    pub failed: usize,
}

impl BroadcastCounts {
    fn tally(recipients: &[BroadcastRecipient]) -> Self {
        let mut counts = BroadcastCounts {
            recipients: recipients.len(),
            ..Self::default()
        };
        for status in recipients.iter().filter_map(|r| r.status) {
            match status {
                MessageStatus::Failed => counts.failed += 1,
                MessageStatus::Sent => counts.sent += 1,
                MessageStatus::Delivered => {
                    counts.sent += 1;
                    counts.delivered += 1;
                }
                MessageStatus::Read => {
                    counts.sent += 1;
                    counts.delivered += 1;
                    counts.read += 1;
                }
            }
        }
        counts
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Broadcast {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub name: String,
    pub template_id: Uuid,
    pub params: Vec<String>,
    pub recipients: Vec<BroadcastRecipient>,
    pub status: BroadcastStatus,
    pub counts: BroadcastCounts,
    pub created_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBroadcast {
    pub name: String,
    pub template_id: Uuid,
    #[serde(default)]
    pub params: Vec<String>,
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub recipient: String,
    pub status: MessageStatus,
}

// ---------------------------------------------------------------------------
// BroadcastService
// ---------------------------------------------------------------------------

pub struct BroadcastService {
    messages: Arc<MessageService>,
    broadcasts: DashMap<Uuid, Broadcast>,
}

impl BroadcastService {
    pub fn new(messages: Arc<MessageService>) -> Self {
        Self {
            messages,
            broadcasts: DashMap::new(),
        }
    }

    /// Create a draft broadcast. The template must be approved and the
    /// parameters must render it; recipients are de-duplicated in order.
    pub fn create(&self, tenant: &TenantId, req: NewBroadcast) -> StratumResult<Broadcast> {
        let template = self.messages.templates().get(tenant, req.template_id)?;
        if !template.is_approved() {
            return Err(StratumError::Ineligible(format!(
                "template {} is {:?}, broadcasts need an approved template",
                template.name, template.status
            )));
        }

        let mut problems = Vec::new();
        if req.name.trim().is_empty() {
            problems.push("name must not be empty".to_string());
        }
        if let Err(StratumError::Validation(mut p)) = template.render(&req.params) {
            problems.append(&mut p);
        }
        let mut seen = HashSet::new();
        let mut recipients = Vec::new();
        for phone in req.recipients {
            let phone = phone.trim().to_string();
            if let Err(StratumError::Validation(mut p)) = validate_phone(&phone) {
                problems.append(&mut p);
                continue;
            }
            if seen.insert(phone.clone()) {
                recipients.push(BroadcastRecipient {
                    phone,
                    message_id: None,
                    status: None,
                    error: None,
                });
            }
        }
        if recipients.is_empty() && problems.is_empty() {
            problems.push("at least one recipient is required".to_string());
        }
        if !problems.is_empty() {
            return Err(StratumError::Validation(problems));
        }

        let broadcast = Broadcast {
            id: Uuid::new_v4(),
            tenant_id: tenant.clone(),
            name: req.name,
            template_id: req.template_id,
            params: req.params,
            counts: BroadcastCounts::tally(&recipients),
            recipients,
            status: BroadcastStatus::Draft,
            created_at: Utc::now(),
            dispatched_at: None,
            completed_at: None,
        };
        self.broadcasts.insert(broadcast.id, broadcast.clone());
        info!(
            tenant = %tenant,
            broadcast_id = %broadcast.id,
            recipients = broadcast.recipients.len(),
            "WhatsApp broadcast created"
        );
        Ok(broadcast)
    }

    pub fn get(&self, tenant: &TenantId, id: Uuid) -> StratumResult<Broadcast> {
        self.broadcasts
            .get(&id)
            .filter(|b| &b.tenant_id == tenant)
            .map(|b| b.value().clone())
            .ok_or_else(|| StratumError::not_found("broadcast", id))
    }

    /// Broadcasts for a tenant, newest first.
    pub fn list(&self, tenant: &TenantId) -> Vec<Broadcast> {
        let mut broadcasts: Vec<Broadcast> = self
            .broadcasts
            .iter()
            .filter(|b| &b.tenant_id == tenant)
            .map(|b| b.value().clone())
            .collect();
        broadcasts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        broadcasts
    }

    /// Send to every recipient. The broadcast is claimed as `sending` first,
    /// so a second dispatch fails instead of double-sending.
    pub fn dispatch(&self, tenant: &TenantId, id: Uuid) -> StratumResult<Broadcast> {
        let claimed = {
            let mut entry = self
                .broadcasts
                .get_mut(&id)
                .filter(|b| &b.tenant_id == tenant)
                .ok_or_else(|| StratumError::not_found("broadcast", id))?;
            if entry.status != BroadcastStatus::Draft {
                return Err(StratumError::InvalidTransition {
                    from: format!("{:?}", entry.status),
                    action: "dispatch".to_string(),
                });
            }
            let template = self.messages.templates().get(tenant, entry.template_id)?;
            if !template.is_approved() {
                return Err(StratumError::Ineligible(format!(
                    "template {} is no longer approved",
                    template.name
                )));
            }
            entry.status = BroadcastStatus::Sending;
            entry.dispatched_at = Some(Utc::now());
            entry.value().clone()
        };

        let mut results = Vec::with_capacity(claimed.recipients.len());
        for recipient in &claimed.recipients {
            let outcome = self.messages.send_template(
                tenant,
                &recipient.phone,
                claimed.template_id,
                &claimed.params,
                Some(id),
            );
            results.push(outcome);
        }

        let mut entry = self
            .broadcasts
            .get_mut(&id)
            .ok_or_else(|| StratumError::not_found("broadcast", id))?;
        for (recipient, outcome) in entry.recipients.iter_mut().zip(results) {
            match outcome {
                Ok(message) => {
                    recipient.message_id = Some(message.id);
                    recipient.status = Some(message.status);
                    recipient.error = message.error;
                }
                Err(e) => {
                    recipient.status = Some(MessageStatus::Failed);
                    recipient.error = Some(e.to_string());
                }
            }
        }
        entry.counts = BroadcastCounts::tally(&entry.recipients);
        entry.status = BroadcastStatus::Completed;
        entry.completed_at = Some(Utc::now());

        metrics::counter!("stratum.whatsapp.broadcasts.dispatched").increment(1);
        info!(
            tenant = %tenant,
            broadcast_id = %id,
            sent = entry.counts.sent,
            failed = entry.counts.failed,
            "WhatsApp broadcast dispatched"
        );
        Ok(entry.value().clone())
    }

    /// Apply a delivery receipt for one recipient. Out-of-order receipts that
    /// would move a recipient backwards are ignored.
    pub fn record_status(
        &self,
        tenant: &TenantId,
        id: Uuid,
        receipt: DeliveryReceipt,
    ) -> StratumResult<Broadcast> {
        let mut entry = self
            .broadcasts
            .get_mut(&id)
            .filter(|b| &b.tenant_id == tenant)
            .ok_or_else(|| StratumError::not_found("broadcast", id))?;

        let recipient = entry
            .recipients
            .iter_mut()
            .find(|r| r.phone == receipt.recipient)
            .ok_or_else(|| StratumError::not_found("broadcast recipient", &receipt.recipient))?;
        let Some(current) = recipient.status else {
            return Err(StratumError::Conflict(format!(
                "broadcast {} has not been dispatched",
                id
            )));
        };

        if let Some(next) = current.advance(receipt.status) {
            recipient.status = Some(next);
            if let Some(message_id) = recipient.message_id {
                self.messages.record_receipt(tenant, message_id, receipt.status)?;
            }
            entry.counts = BroadcastCounts::tally(&entry.recipients);
        }
        Ok(entry.value().clone())
    }
}
