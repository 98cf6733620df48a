//! In-memory campaign draft store backed by DashMap.

use crate::draft::*;
use chrono::Utc;
use dashmap::DashMap;
use stratum_core::{Page, Platform, StratumError, StratumResult, TenantId};
use tracing::info;
use uuid::Uuid;

/// Listing filter for drafts.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct DraftFilter {
    pub status: Option<DraftStatus>,
    pub platform: Option<Platform>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

/// Thread-safe store for campaign drafts and their transition history.
pub struct DraftStore {
    drafts: DashMap<Uuid, CampaignDraft>,
    transitions: DashMap<Uuid, Vec<DraftTransition>>,
}

impl DraftStore {
    pub fn new() -> Self {
        Self {
            drafts: DashMap::new(),
            transitions: DashMap::new(),
        }
    }

    pub fn create(&self, tenant: &TenantId, req: NewDraft, actor: &str) -> CampaignDraft {
        let now = Utc::now();
        let draft = CampaignDraft {
            id: Uuid::new_v4(),
            tenant_id: tenant.clone(),
            platform: req.platform,
            name: req.name,
            status: DraftStatus::Draft,
            objective: req.objective,
            budget: req.budget,
            targeting: req.targeting,
            creatives: req.creatives,
            ad_account_id: req.ad_account_id,
            platform_campaign_id: None,
            rejection_reason: None,
            last_error: None,
            created_by: actor.to_string(),
            created_at: now,
            updated_at: now,
            submitted_at: None,
            approved_at: None,
            published_at: None,
        };
        self.drafts.insert(draft.id, draft.clone());
        self.transitions.insert(draft.id, Vec::new());
        info!(tenant = %tenant, draft_id = %draft.id, platform = %draft.platform, "Campaign draft created");
        metrics::counter!("stratum.drafts.created").increment(1);
        draft
    }

    pub fn get(&self, tenant: &TenantId, id: Uuid) -> StratumResult<CampaignDraft> {
        self.drafts
            .get(&id)
            .filter(|d| &d.tenant_id == tenant)
            .map(|d| d.value().clone())
            .ok_or_else(|| StratumError::not_found("campaign draft", id))
    }

    /// Drafts for a tenant, newest first.
    pub fn list(&self, tenant: &TenantId, filter: &DraftFilter) -> Page<CampaignDraft> {
        let mut drafts: Vec<CampaignDraft> = self
            .drafts
            .iter()
            .filter(|d| &d.tenant_id == tenant)
            .filter(|d| filter.status.map_or(true, |s| d.status == s))
            .filter(|d| filter.platform.map_or(true, |p| d.platform == p))
            .map(|d| d.value().clone())
            .collect();
        drafts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Page::paginate(drafts, filter.offset, filter.limit)
    }

    /// Apply a content patch. A rejected or failed draft returns to `Draft`.
    pub fn update(
        &self,
        tenant: &TenantId,
        id: Uuid,
        patch: DraftPatch,
        actor: &str,
    ) -> StratumResult<CampaignDraft> {
        self.apply(tenant, id, DraftAction::Edit, actor, None, |d| {
            if let Some(name) = patch.name {
                d.name = name;
            }
            if let Some(objective) = patch.objective {
                d.objective = objective;
            }
            if let Some(budget) = patch.budget {
                d.budget = budget;
            }
            if let Some(targeting) = patch.targeting {
                d.targeting = targeting;
            }
            if let Some(creatives) = patch.creatives {
                d.creatives = creatives;
            }
            if let Some(account) = patch.ad_account_id {
                d.ad_account_id = Some(account);
            }
            d.rejection_reason = None;
            d.last_error = None;
            Ok(())
        })
    }

    pub fn delete(&self, tenant: &TenantId, id: Uuid, actor: &str) -> StratumResult<()> {
        let status = self.get(tenant, id)?.status;
        if matches!(status, DraftStatus::Publishing | DraftStatus::Published) {
            return Err(StratumError::Conflict(format!(
                "draft {} cannot be deleted while {:?}",
                id, status
            )));
        }
        // Re-check under the entry lock in case the status moved meanwhile.
        let removed = self.drafts.remove_if(&id, |_, d| {
            !matches!(d.status, DraftStatus::Publishing | DraftStatus::Published)
        });
        if removed.is_none() {
            return Err(StratumError::Conflict(format!(
                "draft {} changed state during delete",
                id
            )));
        }
        self.transitions.remove(&id);
        info!(tenant = %tenant, draft_id = %id, actor = actor, "Campaign draft deleted");
        Ok(())
    }

    /// Submit a complete draft for review.
    pub fn submit(&self, tenant: &TenantId, id: Uuid, actor: &str) -> StratumResult<CampaignDraft> {
        self.apply(tenant, id, DraftAction::Submit, actor, None, |d| {
            let problems = d.submission_problems();
            if !problems.is_empty() {
                return Err(StratumError::Validation(problems));
            }
            d.submitted_at = Some(Utc::now());
            d.rejection_reason = None;
            Ok(())
        })
    }

    pub fn approve(&self, tenant: &TenantId, id: Uuid, actor: &str) -> StratumResult<CampaignDraft> {
        self.apply(tenant, id, DraftAction::Approve, actor, None, |d| {
            d.approved_at = Some(Utc::now());
            Ok(())
        })
    }

    pub fn reject(
        &self,
        tenant: &TenantId,
        id: Uuid,
        actor: &str,
        reason: String,
    ) -> StratumResult<CampaignDraft> {
        if reason.trim().is_empty() {
            return Err(StratumError::invalid("rejection reason must not be empty"));
        }
        let comment = Some(reason.clone());
        self.apply(tenant, id, DraftAction::Reject, actor, comment, |d| {
            d.rejection_reason = Some(reason);
            Ok(())
        })
    }

    /// Optimistically flip an approved (or previously failed) draft to `Publishing`.
    pub fn begin_publish(
        &self,
        tenant: &TenantId,
        id: Uuid,
        actor: &str,
    ) -> StratumResult<CampaignDraft> {
        self.apply(tenant, id, DraftAction::BeginPublish, actor, None, |d| {
            d.last_error = None;
            Ok(())
        })
    }

    /// Reconcile a `Publishing` draft with the platform's answer.
    pub fn complete_publish(
        &self,
        tenant: &TenantId,
        id: Uuid,
        actor: &str,
        result: Result<String, String>,
    ) -> StratumResult<CampaignDraft> {
        match result {
            Ok(platform_campaign_id) => {
                let draft = self.apply(tenant, id, DraftAction::PublishSucceeded, actor, None, |d| {
                    d.platform_campaign_id = Some(platform_campaign_id);
                    d.published_at = Some(Utc::now());
                    Ok(())
                })?;
                metrics::counter!("stratum.drafts.published", "platform" => draft.platform.as_str())
                    .increment(1);
                Ok(draft)
            }
            Err(error) => {
                let comment = Some(error.clone());
                let draft = self.apply(tenant, id, DraftAction::PublishFailed, actor, comment, |d| {
                    d.last_error = Some(error);
                    Ok(())
                })?;
                metrics::counter!("stratum.drafts.publish_failed", "platform" => draft.platform.as_str())
                    .increment(1);
                Ok(draft)
            }
        }
    }

    pub fn history(&self, tenant: &TenantId, id: Uuid) -> StratumResult<Vec<DraftTransition>> {
        self.get(tenant, id)?;
        Ok(self
            .transitions
            .get(&id)
            .map(|t| t.clone())
            .unwrap_or_default())
    }

    /// Run `action` against a draft under its entry lock. `mutate` runs only
    /// when the transition is legal; if it fails the draft is left untouched.
    fn apply<F>(
        &self,
        tenant: &TenantId,
        id: Uuid,
        action: DraftAction,
        actor: &str,
        comment: Option<String>,
        mutate: F,
    ) -> StratumResult<CampaignDraft>
    where
        F: FnOnce(&mut CampaignDraft) -> StratumResult<()>,
    {
        let mut entry = self
            .drafts
            .get_mut(&id)
            .filter(|d| &d.tenant_id == tenant)
            .ok_or_else(|| StratumError::not_found("campaign draft", id))?;

        let from = entry.status;
        let to = next_status(from, action)?;

        let mut updated = entry.value().clone();
        mutate(&mut updated)?;
        updated.status = to;
        updated.updated_at = Utc::now();
        *entry.value_mut() = updated.clone();

        if from != to {
            let transition = DraftTransition {
                id: Uuid::new_v4(),
                draft_id: id,
                from_status: from,
                to_status: to,
                action,
                actor: actor.to_string(),
                comment,
                timestamp: updated.updated_at,
            };
            // Appended under the draft lock. Deleted drafts get no entries.
            if let Some(mut log) = self.transitions.get_mut(&id) {
                log.push(transition);
            }
            info!(
                tenant = %tenant,
                draft_id = %id,
                from = ?from,
                to = ?to,
                actor = actor,
                "Campaign draft transitioned"
            );
        }

        Ok(updated)
    }
}

impl Default for DraftStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant() -> TenantId {
        TenantId::new("acme")
    }

    fn new_draft() -> NewDraft {
        NewDraft {
            platform: Platform::Meta,
            name: "Spring Sale".to_string(),
            objective: Objective::Sales,
            budget: Budget {
                amount: 250.0,
                kind: BudgetKind::Daily,
                currency: "USD".to_string(),
            },
            targeting: Targeting {
                age_min: Some(18),
                age_max: Some(45),
                ..Targeting::default()
            },
            creatives: vec![CreativeAsset {
                id: Uuid::new_v4(),
                kind: CreativeKind::Image,
                url: Some("https://cdn.example.com/hero.png".to_string()),
                headline: Some("Save 30%".to_string()),
                body: None,
                call_to_action: Some("SHOP_NOW".to_string()),
            }],
            ad_account_id: Some(Uuid::new_v4()),
        }
    }

    #[test]
    fn test_full_lifecycle_records_history() {
        let store = DraftStore::new();
        let draft = store.create(&tenant(), new_draft(), "alice");

        store.submit(&tenant(), draft.id, "alice").unwrap();
        store.approve(&tenant(), draft.id, "bob").unwrap();
        store.begin_publish(&tenant(), draft.id, "bob").unwrap();
        let published = store
            .complete_publish(&tenant(), draft.id, "bob", Ok("act_1/cmp_9".to_string()))
            .unwrap();

        assert_eq!(published.status, DraftStatus::Published);
        assert_eq!(published.platform_campaign_id.as_deref(), Some("act_1/cmp_9"));
        assert!(published.submitted_at.is_some());
        assert!(published.approved_at.is_some());
        assert_eq!(store.history(&tenant(), draft.id).unwrap().len(), 4);
    }

    #[test]
    fn test_submit_reports_every_problem() {
        let store = DraftStore::new();
        let mut req = new_draft();
        req.name = "  ".to_string();
        req.creatives.clear();
        req.ad_account_id = None;
        let draft = store.create(&tenant(), req, "alice");

        match store.submit(&tenant(), draft.id, "alice") {
            Err(StratumError::Validation(problems)) => assert_eq!(problems.len(), 3),
            other => panic!("expected validation error, got {:?}", other),
        }
        assert_eq!(store.get(&tenant(), draft.id).unwrap().status, DraftStatus::Draft);
    }

    #[test]
    fn test_publish_failure_flips_to_failed_and_is_editable() {
        let store = DraftStore::new();
        let draft = store.create(&tenant(), new_draft(), "alice");
        store.submit(&tenant(), draft.id, "alice").unwrap();
        store.approve(&tenant(), draft.id, "bob").unwrap();
        store.begin_publish(&tenant(), draft.id, "bob").unwrap();

        let failed = store
            .complete_publish(&tenant(), draft.id, "bob", Err("token expired".to_string()))
            .unwrap();
        assert_eq!(failed.status, DraftStatus::Failed);
        assert_eq!(failed.last_error.as_deref(), Some("token expired"));

        let patch = DraftPatch {
            name: Some("Spring Sale v2".to_string()),
            ..DraftPatch::default()
        };
        let edited = store.update(&tenant(), draft.id, patch, "alice").unwrap();
        assert_eq!(edited.status, DraftStatus::Draft);
        assert!(edited.last_error.is_none());
    }

    #[test]
    fn test_rejected_draft_can_be_resubmitted() {
        let store = DraftStore::new();
        let draft = store.create(&tenant(), new_draft(), "alice");
        store.submit(&tenant(), draft.id, "alice").unwrap();
        let rejected = store
            .reject(&tenant(), draft.id, "bob", "Headline too long".to_string())
            .unwrap();
        assert_eq!(rejected.rejection_reason.as_deref(), Some("Headline too long"));

        let resubmitted = store.submit(&tenant(), draft.id, "alice").unwrap();
        assert_eq!(resubmitted.status, DraftStatus::Submitted);
        assert!(resubmitted.rejection_reason.is_none());
    }

    #[test]
    fn test_published_draft_cannot_be_edited_or_deleted() {
        let store = DraftStore::new();
        let draft = store.create(&tenant(), new_draft(), "alice");
        store.submit(&tenant(), draft.id, "alice").unwrap();
        store.approve(&tenant(), draft.id, "bob").unwrap();
        store.begin_publish(&tenant(), draft.id, "bob").unwrap();
        store
            .complete_publish(&tenant(), draft.id, "bob", Ok("cmp".to_string()))
            .unwrap();

        let err = store
            .update(&tenant(), draft.id, DraftPatch::default(), "alice")
            .unwrap_err();
        assert!(matches!(err, StratumError::InvalidTransition { .. }));
        assert!(matches!(
            store.delete(&tenant(), draft.id, "alice"),
            Err(StratumError::Conflict(_))
        ));
    }

    #[test]
    fn test_tenant_isolation() {
        let store = DraftStore::new();
        let draft = store.create(&tenant(), new_draft(), "alice");
        let other = TenantId::new("globex");

        assert!(matches!(
            store.get(&other, draft.id),
            Err(StratumError::NotFound { .. })
        ));
        assert!(store.submit(&other, draft.id, "mallory").is_err());
        assert_eq!(store.list(&other, &DraftFilter::default()).total, 0);
    }

    #[test]
    fn test_list_filters_by_status() {
        let store = DraftStore::new();
        let a = store.create(&tenant(), new_draft(), "alice");
        store.create(&tenant(), new_draft(), "alice");
        store.submit(&tenant(), a.id, "alice").unwrap();

        let filter = DraftFilter {
            status: Some(DraftStatus::Submitted),
            ..DraftFilter::default()
        };
        let page = store.list(&tenant(), &filter);
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].id, a.id);
    }

    #[test]
    fn test_reject_requires_reason() {
        let store = DraftStore::new();
        let draft = store.create(&tenant(), new_draft(), "alice");
        store.submit(&tenant(), draft.id, "alice").unwrap();
        assert!(store.reject(&tenant(), draft.id, "bob", " ".to_string()).is_err());
        assert_eq!(
            store.get(&tenant(), draft.id).unwrap().status,
            DraftStatus::Submitted
        );
    }

    #[test]
    fn test_concurrent_transitions_keep_history_in_order() {
        let store = DraftStore::new();
        let draft = store.create(&tenant(), new_draft(), "alice");

        std::thread::scope(|scope| {
            for worker in 0..4 {
                let store = &store;
                scope.spawn(move || {
                    let actor = format!("worker-{}", worker);
                    for _ in 0..50 {
                        let _ = store.submit(&tenant(), draft.id, &actor);
                        let _ = store.reject(&tenant(), draft.id, &actor, "again".to_string());
                    }
                });
            }
        });

        let history = store.history(&tenant(), draft.id).unwrap();
        assert!(!history.is_empty());
        assert_eq!(history[0].from_status, DraftStatus::Draft);
        for pair in history.windows(2) {
            assert_eq!(pair[0].to_status, pair[1].from_status);
        }
        let last = history.last().map(|t| t.to_status);
        assert_eq!(last, Some(store.get(&tenant(), draft.id).unwrap().status));
    }
}
