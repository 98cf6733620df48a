//! One-to-one WhatsApp messages and their delivery status.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use stratum_core::{StratumError, StratumResult, TenantId};
use tracing::{info, warn};
use uuid::Uuid;

use crate::sender::WhatsAppSender;
use crate::templates::TemplateStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    /// The status after a receipt, or `None` when the receipt would move the
    /// message backwards. `Failed` is terminal and only reachable from `Sent`.
    pub fn advance(self, receipt: MessageStatus) -> Option<MessageStatus> {
        use MessageStatus::*;
        match (self, receipt) {
            (Sent, Delivered | Read | Failed) => Some(receipt),
            (Delivered, Read) => Some(Read),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppMessage {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub to: String,
    /// Text as delivered, with template parameters substituted.
    pub body: String,
    pub template_id: Option<Uuid>,
    pub broadcast_id: Option<Uuid>,
    pub provider_message_id: Option<String>,
    pub status: MessageStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum MessageContent {
    Text {
        body: String,
    },
    Template {
        template_id: Uuid,
        #[serde(default)]
        params: Vec<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessage {
    pub to: String,
    #[serde(flatten)]
    pub content: MessageContent,
}

const MAX_TEXT_LEN: usize = 4096;

/// `+` followed by 8 to 15 digits, no leading zero.
pub fn validate_phone(number: &str) -> StratumResult<()> {
    let digits = number.strip_prefix('+').unwrap_or("");
    let valid = (8..=15).contains(&digits.len())
        && digits.bytes().all(|b| b.is_ascii_digit())
        && !digits.starts_with('0');
    if valid {
        Ok(())
    } else {
        Err(StratumError::invalid(format!(
            "{} is not an E.164 phone number",
            number
        )))
    }
}

// ---------------------------------------------------------------------------
// MessageService
// ---------------------------------------------------------------------------

pub struct MessageService {
    templates: Arc<TemplateStore>,
    messages: DashMap<Uuid, WhatsAppMessage>,
    sender: Arc<dyn WhatsAppSender>,
}

impl MessageService {
    pub fn new(templates: Arc<TemplateStore>, sender: Arc<dyn WhatsAppSender>) -> Self {
        Self {
            templates,
            messages: DashMap::new(),
            sender,
        }
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    /// Validate, dispatch, and store a message. A provider error is stored
    /// as a `failed` message rather than returned.
    pub fn send_message(&self, tenant: &TenantId, req: SendMessage) -> StratumResult<WhatsAppMessage> {
        validate_phone(&req.to)?;
        match req.content {
            MessageContent::Text { body } => {
                if body.trim().is_empty() || body.chars().count() > MAX_TEXT_LEN {
                    return Err(StratumError::invalid(format!(
                        "text body must be 1 to {} characters",
                        MAX_TEXT_LEN
                    )));
                }
                let result = self.sender.send_text(&req.to, &body);
                Ok(self.store(tenant, &req.to, body, None, None, result))
            }
            MessageContent::Template { template_id, params } => {
                self.send_template(tenant, &req.to, template_id, &params, None)
            }
        }
    }

    /// Send an approved template to one number.
    pub(crate) fn send_template(
        &self,
        tenant: &TenantId,
        to: &str,
        template_id: Uuid,
        params: &[String],
        broadcast_id: Option<Uuid>,
    ) -> StratumResult<WhatsAppMessage> {
        let template = self.templates.get(tenant, template_id)?;
        if !template.is_approved() {
            return Err(StratumError::Ineligible(format!(
                "template {} is {:?}, only approved templates can be sent",
                template.name, template.status
            )));
        }
        let body = template.render(params)?;
        let result = self.sender.send_template(to, &template, params);
        Ok(self.store(tenant, to, body, Some(template_id), broadcast_id, result))
    }

    pub fn get(&self, tenant: &TenantId, id: Uuid) -> StratumResult<WhatsAppMessage> {
        self.messages
            .get(&id)
            .filter(|m| &m.tenant_id == tenant)
            .map(|m| m.value().clone())
            .ok_or_else(|| StratumError::not_found("whatsapp message", id))
    }

    /// Messages for a tenant, newest first, optionally for one contact.
    pub fn list_messages(&self, tenant: &TenantId, contact: Option<&str>) -> Vec<WhatsAppMessage> {
        let mut messages: Vec<WhatsAppMessage> = self
            .messages
            .iter()
            .filter(|m| &m.tenant_id == tenant)
            .filter(|m| contact.map_or(true, |c| m.to == c))
            .map(|m| m.value().clone())
            .collect();
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        messages
    }

    /// Apply a delivery receipt. Receipts that would move the message
    /// backwards are ignored and the current message is returned.
    pub fn record_receipt(
        &self,
        tenant: &TenantId,
        id: Uuid,
        receipt: MessageStatus,
    ) -> StratumResult<WhatsAppMessage> {
        let mut message = self
            .messages
            .get_mut(&id)
            .filter(|m| &m.tenant_id == tenant)
            .ok_or_else(|| StratumError::not_found("whatsapp message", id))?;
        if let Some(next) = message.status.advance(receipt) {
            message.status = next;
            message.updated_at = Utc::now();
        }
        Ok(message.value().clone())
    }

    fn store(
        &self,
        tenant: &TenantId,
        to: &str,
        body: String,
        template_id: Option<Uuid>,
        broadcast_id: Option<Uuid>,
        result: Result<String, anyhow::Error>,
    ) -> WhatsAppMessage {
        let (status, provider_message_id, error) = match result {
            Ok(provider_id) => {
                metrics::counter!("stratum.whatsapp.messages.sent").increment(1);
                (MessageStatus::Sent, Some(provider_id), None)
            }
            Err(e) => {
                warn!(tenant = %tenant, to = to, error = %e, "WhatsApp send failed");
                metrics::counter!("stratum.whatsapp.messages.failed").increment(1);
                (MessageStatus::Failed, None, Some(format!("{:#}", e)))
            }
        };

        let now = Utc::now();
        let message = WhatsAppMessage {
            id: Uuid::new_v4(),
            tenant_id: tenant.clone(),
            to: to.to_string(),
            body,
            template_id,
            broadcast_id,
            provider_message_id,
            status,
            error,
            created_at: now,
            updated_at: now,
        };
        self.messages.insert(message.id, message.clone());
        info!(tenant = %tenant, message_id = %message.id, status = ?message.status, "WhatsApp message stored");
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::SimulatedSender;
    use crate::templates::*;

    fn tenant() -> TenantId {
        TenantId::new("acme")
    }

    fn service(sender: SimulatedSender) -> MessageService {
        MessageService::new(Arc::new(TemplateStore::new()), Arc::new(sender))
    }

    fn text(to: &str, body: &str) -> SendMessage {
        SendMessage {
            to: to.to_string(),
            content: MessageContent::Text {
                body: body.to_string(),
            },
        }
    }

    #[test]
    fn test_phone_validation() {
        assert!(validate_phone("+14155550100").is_ok());
        assert!(validate_phone("+447700900123").is_ok());
        assert!(validate_phone("14155550100").is_err());
        assert!(validate_phone("+0123456789").is_err());
        assert!(validate_phone("+1415-555").is_err());
        assert!(validate_phone("+1234567890123456").is_err());
    }

    #[test]
    fn test_send_text_and_list_newest_first() {
        let svc = service(SimulatedSender::new());
        svc.send_message(&tenant(), text("+14155550100", "first")).unwrap();
        svc.send_message(&tenant(), text("+14155550101", "second")).unwrap();
        let last = svc.send_message(&tenant(), text("+14155550100", "third")).unwrap();

        let all = svc.list_messages(&tenant(), None);
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].created_at >= w[1].created_at));

        let contact = svc.list_messages(&tenant(), Some("+14155550100"));
        assert_eq!(contact.len(), 2);
        assert!(contact.iter().any(|m| m.id == last.id));
        assert!(svc.list_messages(&TenantId::new("globex"), None).is_empty());
    }

    #[test]
    fn test_provider_failure_is_stored_as_failed() {
        let svc = service(SimulatedSender::unreachable(["+14155550199"]));
        let msg = svc.send_message(&tenant(), text("+14155550199", "hi")).unwrap();
        assert_eq!(msg.status, MessageStatus::Failed);
        assert!(msg.error.as_deref().unwrap().contains("not a WhatsApp user"));
    }

    #[test]
    fn test_invalid_number_is_not_stored() {
        let svc = service(SimulatedSender::new());
        assert!(svc.send_message(&tenant(), text("555-0100", "hi")).is_err());
        assert!(svc.list_messages(&tenant(), None).is_empty());
    }

    #[test]
    fn test_template_message_requires_approval() {
        let svc = service(SimulatedSender::new());
        let template = svc
            .templates()
            .create(
                &tenant(),
                NewTemplate {
                    name: "shipping_update".to_string(),
                    language: "en".to_string(),
                    category: TemplateCategory::Utility,
                    header: None,
                    body: "Order {{1}} ships {{2}}".to_string(),
                    footer: None,
                },
            )
            .unwrap();
        let req = SendMessage {
            to: "+14155550100".to_string(),
            content: MessageContent::Template {
                template_id: template.id,
                params: vec!["#9".to_string(), "today".to_string()],
            },
        };
        assert!(matches!(
            svc.send_message(&tenant(), req.clone()),
            Err(StratumError::Ineligible(_))
        ));

        svc.templates()
            .review(&tenant(), template.id, TemplateReview { status: TemplateStatus::Approved, reason: None })
            .unwrap();
        let msg = svc.send_message(&tenant(), req).unwrap();
        assert_eq!(msg.body, "Order #9 ships today");
        assert_eq!(msg.template_id, Some(template.id));
    }

    #[test]
    fn test_receipts_only_move_forward() {
        use MessageStatus::*;
        assert_eq!(Sent.advance(Read), Some(Read));
        assert_eq!(Read.advance(Delivered), None);
        assert_eq!(Delivered.advance(Failed), None);
        assert_eq!(Failed.advance(Delivered), None);

        let svc = service(SimulatedSender::new());
        let msg = svc.send_message(&tenant(), text("+14155550100", "hi")).unwrap();
        svc.record_receipt(&tenant(), msg.id, Read).unwrap();
        let after = svc.record_receipt(&tenant(), msg.id, Delivered).unwrap();
        assert_eq!(after.status, Read);
    }

    #[test]
    fn test_request_json_shape() {
        let req: SendMessage = serde_json::from_str(
            r#"{"to": "+14155550100", "type": "template", "template_id": "6f1c1a8e-1a3e-4d7e-9a53-0d9f3c2b1a10", "params": ["x"]}"#,
        )
        .unwrap();
        assert!(matches!(req.content, MessageContent::Template { .. }));
    }
}
