//! Draft service — ties drafts to the tenant's ad accounts and drives the
//! publish round-trip.

use crate::accounts::{check_publish_eligibility, AdAccountStore};
use crate::draft::{CampaignDraft, DraftPatch, NewDraft};
use crate::publisher::PublisherRegistry;
use crate::store::DraftStore;
use std::sync::Arc;
use stratum_core::{Platform, StratumError, StratumResult, TenantId};
use tracing::{info, warn};
use uuid::Uuid;

pub struct DraftService {
    drafts: Arc<DraftStore>,
    accounts: Arc<AdAccountStore>,
    publishers: PublisherRegistry,
}

impl DraftService {
    pub fn new(
        drafts: Arc<DraftStore>,
        accounts: Arc<AdAccountStore>,
        publishers: PublisherRegistry,
    ) -> Self {
        Self {
            drafts,
            accounts,
            publishers,
        }
    }

    pub fn drafts(&self) -> &DraftStore {
        &self.drafts
    }

    pub fn accounts(&self) -> &AdAccountStore {
        &self.accounts
    }

    pub fn create(&self, tenant: &TenantId, req: NewDraft, actor: &str) -> StratumResult<CampaignDraft> {
        if let Some(account_id) = req.ad_account_id {
            self.ensure_account(tenant, account_id, req.platform)?;
        }
        Ok(self.drafts.create(tenant, req, actor))
    }

    pub fn update(
        &self,
        tenant: &TenantId,
        id: Uuid,
        patch: DraftPatch,
        actor: &str,
    ) -> StratumResult<CampaignDraft> {
        if let Some(account_id) = patch.ad_account_id {
            let platform = self.drafts.get(tenant, id)?.platform;
            self.ensure_account(tenant, account_id, platform)?;
        }
        self.drafts.update(tenant, id, patch, actor)
    }

    /// Submit for review. The attached ad account must still exist.
    pub fn submit(&self, tenant: &TenantId, id: Uuid, actor: &str) -> StratumResult<CampaignDraft> {
        let draft = self.drafts.get(tenant, id)?;
        if let Some(account_id) = draft.ad_account_id {
            self.ensure_account(tenant, account_id, draft.platform)?;
        }
        self.drafts.submit(tenant, id, actor)
    }

    /// Publish an approved (or previously failed) draft.
    ///
    /// The draft is flipped to `Publishing` before the platform call and
    /// reconciled to `Published` or `Failed` afterwards. A platform error is
    /// reflected in the returned draft, not returned as `Err`.
    pub fn publish(&self, tenant: &TenantId, id: Uuid, actor: &str) -> StratumResult<CampaignDraft> {
        let draft = self.drafts.get(tenant, id)?;
        let account_id = draft
            .ad_account_id
            .ok_or_else(|| StratumError::Ineligible("draft has no ad account".to_string()))?;
        let account = self.accounts.get(tenant, account_id)?;
        check_publish_eligibility(&account, &draft)?;

        let publisher = self.publishers.get(draft.platform).ok_or_else(|| {
            StratumError::Ineligible(format!("no publisher configured for {}", draft.platform))
        })?;

        let publishing = self.drafts.begin_publish(tenant, id, actor)?;
        let result = publisher
            .publish(&publishing, &account)
            .map_err(|e| format!("{:#}", e));

        match &result {
            Ok(platform_id) => info!(
                tenant = %tenant,
                draft_id = %id,
                platform_campaign_id = %platform_id,
                "Campaign published"
            ),
            Err(error) => warn!(
                tenant = %tenant,
                draft_id = %id,
                error = %error,
                "Campaign publish failed"
            ),
        }

        self.drafts.complete_publish(tenant, id, actor, result)
    }

    fn ensure_account(&self, tenant: &TenantId, account_id: Uuid, platform: Platform) -> StratumResult<()> {
        let account = self.accounts.get(tenant, account_id)?;
        if account.platform != platform {
            return Err(StratumError::invalid(format!(
                "ad account {} is a {} account, draft targets {}",
                account.name, account.platform, platform
            )));
        }
        Ok(())
    }
}
