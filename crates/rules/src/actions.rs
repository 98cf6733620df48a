//! Rule action execution.
//!
//! The engine hands every fire to an `ActionExecutor`. Implementations route
//! labels, pauses and budget changes to the ad platforms and alerts to
//! email, Slack or WhatsApp.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use stratum_core::{EntityKind, EntityRef, TenantId};
use tracing::info;

use crate::types::{AlertChannel, Rule, RuleAction};

/// Trait for executing a fired rule's action. Returns a short human-readable
/// detail on success.
pub trait ActionExecutor: Send + Sync {
    fn execute(&self, tenant: &TenantId, rule: &Rule, entity: &EntityRef) -> Result<String, anyhow::Error>;
}

/// An alert handed to a delivery channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchedAlert {
    pub tenant_id: TenantId,
    pub rule_name: String,
    pub entity: EntityRef,
    pub channel: AlertChannel,
    pub recipients: Vec<String>,
    pub message: String,
    pub sent_at: DateTime<Utc>,
}

type EntityKey = (TenantId, EntityRef);

/// Executor that applies actions to in-process state. Labels, paused
/// campaigns and budget multipliers are queryable afterwards.
#[derive(Default)]
pub struct InMemoryActionExecutor {
    labels: DashMap<EntityKey, BTreeSet<String>>,
    paused: DashMap<EntityKey, DateTime<Utc>>,
    budget_multipliers: DashMap<EntityKey, f64>,
    alerts: Mutex<Vec<DispatchedAlert>>,
}

impl InMemoryActionExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn labels(&self, tenant: &TenantId, entity: &EntityRef) -> Vec<String> {
        self.labels
            .get(&(tenant.clone(), entity.clone()))
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_paused(&self, tenant: &TenantId, entity: &EntityRef) -> bool {
        self.paused.contains_key(&(tenant.clone(), entity.clone()))
    }

    /// Cumulative budget multiplier applied by rules (1.0 when untouched).
    pub fn budget_multiplier(&self, tenant: &TenantId, entity: &EntityRef) -> f64 {
        self.budget_multipliers
            .get(&(tenant.clone(), entity.clone()))
            .map(|m| *m)
            .unwrap_or(1.0)
    }

    pub fn alerts(&self) -> Vec<DispatchedAlert> {
        self.alerts.lock().clone()
    }
}

impl ActionExecutor for InMemoryActionExecutor {
    fn execute(&self, tenant: &TenantId, rule: &Rule, entity: &EntityRef) -> Result<String, anyhow::Error> {
        let key = (tenant.clone(), entity.clone());
        match &rule.action {
            RuleAction::ApplyLabel { label } => {
                self.labels.entry(key).or_default().insert(label.clone());
                Ok(format!("label '{}' applied to {}", label, entity))
            }
            RuleAction::SendAlert {
                channel,
                recipients,
                message,
            } => {
                if recipients.is_empty() {
                    anyhow::bail!("no recipients configured for {:?} alert", channel);
                }
                let message = message.clone().unwrap_or_else(|| {
                    format!(
                        "Rule '{}' triggered for {}: {} {} {}",
                        rule.name,
                        entity,
                        rule.condition.field,
                        rule.condition.operator,
                        rule.condition.threshold
                    )
                });
                info!(
                    tenant = %tenant,
                    channel = ?channel,
                    recipients = recipients.len(),
                    "Dispatching rule alert"
                );
                self.alerts.lock().push(DispatchedAlert {
                    tenant_id: tenant.clone(),
                    rule_name: rule.name.clone(),
                    entity: entity.clone(),
                    channel: *channel,
                    recipients: recipients.clone(),
                    message,
                    sent_at: Utc::now(),
                });
                Ok(format!("{:?} alert sent to {} recipient(s)", channel, recipients.len()))
            }
            RuleAction::PauseCampaign => {
                if entity.kind != EntityKind::Campaign {
                    anyhow::bail!("pause_campaign cannot target {}", entity);
                }
                self.paused.insert(key, Utc::now());
                Ok(format!("{} paused", entity))
            }
            RuleAction::AdjustBudget { percent } => {
                let mut multiplier = self.budget_multipliers.entry(key).or_insert(1.0);
                *multiplier = (*multiplier * (1.0 + percent / 100.0)).max(0.0);
                Ok(format!(
                    "budget for {} adjusted by {:+.1}% (multiplier {:.3})",
                    entity, percent, *multiplier
                ))
            }
        }
    }
}
