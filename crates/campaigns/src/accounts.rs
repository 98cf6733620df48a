//! Ad-account connectors and campaign publishing eligibility.

use crate::draft::CampaignDraft;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use stratum_core::{Platform, StratumError, StratumResult, TenantId};
use tracing::info;
use uuid::Uuid;

/// A platform ad account connected by a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdAccount {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub platform: Platform,
    /// The account id as known by the ad platform.
    pub external_id: String,
    pub name: String,
    pub currency: String,
    pub timezone: String,
    /// Disabled accounts are never eligible for publishing.
    pub enabled: bool,
    pub spend_cap: Option<f64>,
    pub amount_spent: f64,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub connected_at: DateTime<Utc>,
}

impl AdAccount {
    pub fn remaining_cap(&self) -> Option<f64> {
        self.spend_cap.map(|cap| (cap - self.amount_spent).max(0.0))
    }
}

/// Request body for connecting (or re-connecting) an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectAccount {
    pub platform: Platform,
    pub external_id: String,
    pub name: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub spend_cap: Option<f64>,
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// Thread-safe store of connected ad accounts.
pub struct AdAccountStore {
    accounts: DashMap<Uuid, AdAccount>,
    /// (tenant, platform, external_id) -> account id
    by_external_id: DashMap<(TenantId, Platform, String), Uuid>,
}

impl AdAccountStore {
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
            by_external_id: DashMap::new(),
        }
    }

    /// Connect an account. Connecting the same `(platform, external_id)` again
    /// refreshes its name, currency, timezone and cap instead of duplicating it.
    pub fn connect(&self, tenant: &TenantId, req: ConnectAccount) -> StratumResult<AdAccount> {
        let mut problems = Vec::new();
        if req.external_id.trim().is_empty() {
            problems.push("external_id must not be empty".to_string());
        }
        if req.name.trim().is_empty() {
            problems.push("name must not be empty".to_string());
        }
        if let Some(cap) = req.spend_cap {
            if !(cap.is_finite() && cap > 0.0) {
                problems.push("spend_cap must be positive".to_string());
            }
        }
        if !problems.is_empty() {
            return Err(StratumError::Validation(problems));
        }

        // The index entry stays locked until the account is stored.
        let key = (tenant.clone(), req.platform, req.external_id.clone());
        match self.by_external_id.entry(key) {
            Entry::Occupied(mut slot) => {
                let id = *slot.get();
                if let Some(mut entry) = self.accounts.get_mut(&id) {
                    let account = entry.value_mut();
                    account.name = req.name;
                    account.currency = req.currency;
                    account.timezone = req.timezone;
                    account.spend_cap = req.spend_cap;
                    info!(tenant = %tenant, account_id = %id, "Ad account reconnected");
                    return Ok(account.clone());
                }
                // Disconnected while indexed: take the slot over.
                let account = self.insert_new(tenant, req);
                slot.insert(account.id);
                Ok(account)
            }
            Entry::Vacant(slot) => {
                let account = self.insert_new(tenant, req);
                slot.insert(account.id);
                Ok(account)
            }
        }
    }

    fn insert_new(&self, tenant: &TenantId, req: ConnectAccount) -> AdAccount {
        let account = AdAccount {
            id: Uuid::new_v4(),
            tenant_id: tenant.clone(),
            platform: req.platform,
            external_id: req.external_id,
            name: req.name,
            currency: req.currency,
            timezone: req.timezone,
            enabled: true,
            spend_cap: req.spend_cap,
            amount_spent: 0.0,
            last_synced_at: None,
            connected_at: Utc::now(),
        };
        self.accounts.insert(account.id, account.clone());
        info!(
            tenant = %tenant,
            account_id = %account.id,
            platform = %account.platform,
            "Ad account connected"
        );
        account
    }

    pub fn get(&self, tenant: &TenantId, id: Uuid) -> StratumResult<AdAccount> {
        self.accounts
            .get(&id)
            .filter(|a| &a.tenant_id == tenant)
            .map(|a| a.value().clone())
            .ok_or_else(|| StratumError::not_found("ad account", id))
    }

    pub fn list(&self, tenant: &TenantId, platform: Option<Platform>) -> Vec<AdAccount> {
        let mut accounts: Vec<AdAccount> = self
            .accounts
            .iter()
            .filter(|a| &a.tenant_id == tenant)
            .filter(|a| platform.map_or(true, |p| a.platform == p))
            .map(|a| a.value().clone())
            .collect();
        accounts.sort_by(|a, b| a.name.cmp(&b.name));
        accounts
    }

    pub fn set_enabled(&self, tenant: &TenantId, id: Uuid, enabled: bool) -> StratumResult<AdAccount> {
        self.modify(tenant, id, |a| a.enabled = enabled)
    }

    /// Record the spend reported by the platform's latest sync.
    pub fn record_sync(
        &self,
        tenant: &TenantId,
        id: Uuid,
        amount_spent: f64,
        synced_at: DateTime<Utc>,
    ) -> StratumResult<AdAccount> {
        if !(amount_spent.is_finite() && amount_spent >= 0.0) {
            return Err(StratumError::invalid("amount_spent must be non-negative"));
        }
        self.modify(tenant, id, |a| {
            a.amount_spent = amount_spent;
            a.last_synced_at = Some(synced_at);
        })
    }

    pub fn disconnect(&self, tenant: &TenantId, id: Uuid) -> StratumResult<()> {
        let (_, account) = self
            .accounts
            .remove_if(&id, |_, a| &a.tenant_id == tenant)
            .ok_or_else(|| StratumError::not_found("ad account", id))?;
        let key = (account.tenant_id, account.platform, account.external_id);
        self.by_external_id.remove_if(&key, |_, indexed| *indexed == id);
        Ok(())
    }

    fn modify<F>(&self, tenant: &TenantId, id: Uuid, f: F) -> StratumResult<AdAccount>
    where
        F: FnOnce(&mut AdAccount),
    {
        let mut entry = self
            .accounts
            .get_mut(&id)
            .filter(|a| &a.tenant_id == tenant)
            .ok_or_else(|| StratumError::not_found("ad account", id))?;
        f(entry.value_mut());
        Ok(entry.value().clone())
    }
}

impl Default for AdAccountStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Check whether `draft` may be published through `account`.
///
/// The budget amount is compared against the remaining spend cap for both
/// budget kinds; a daily budget must fit at least one day of delivery.
pub fn check_publish_eligibility(account: &AdAccount, draft: &CampaignDraft) -> StratumResult<()> {
    let mut reasons = Vec::new();
    if account.tenant_id != draft.tenant_id {
        reasons.push("ad account belongs to another tenant".to_string());
    }
    if !account.enabled {
        reasons.push(format!("ad account {} is disabled", account.name));
    }
    if account.platform != draft.platform {
        reasons.push(format!(
            "ad account is on {} but the draft targets {}",
            account.platform, draft.platform
        ));
    }
    if let Some(remaining) = account.remaining_cap() {
        let planned = draft.budget.amount;
        if planned > remaining {
            reasons.push(format!(
                "budget {:.2} exceeds remaining spend cap {:.2}",
                planned, remaining
            ));
        }
    }

    if reasons.is_empty() {
        Ok(())
    } else {
        Err(StratumError::Ineligible(reasons.join("; ")))
    }
}
