//! Campaign draft model and its lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stratum_core::{Platform, StratumError, StratumResult, TenantId};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Draft Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a campaign draft.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    #[default]
    Draft,
    Submitted,
    Approved,
    Rejected,
    Publishing,
    Published,
    Failed,
}

impl DraftStatus {
    /// Content edits are allowed in these statuses. Editing a rejected or
    /// failed draft moves it back to `Draft`.
    pub fn is_editable(&self) -> bool {
        matches!(
            self,
            DraftStatus::Draft | DraftStatus::Rejected | DraftStatus::Failed
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DraftStatus::Published)
    }
}

// ---------------------------------------------------------------------------
// Draft Action
// ---------------------------------------------------------------------------

/// An action that moves a draft from one status to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftAction {
    /// Draft | Rejected | Failed -> Draft
    Edit,
    /// Draft | Rejected -> Submitted
    Submit,
    /// Submitted -> Approved
    Approve,
    /// Submitted -> Rejected
    Reject,
    /// Approved | Failed -> Publishing
    BeginPublish,
    /// Publishing -> Published
    PublishSucceeded,
    /// Publishing -> Failed
    PublishFailed,
}

/// Validate that `action` is allowed from `current` and return the target status.
pub fn next_status(current: DraftStatus, action: DraftAction) -> StratumResult<DraftStatus> {
    use DraftAction as A;
    use DraftStatus as S;

    match (current, action) {
        (S::Draft | S::Rejected | S::Failed, A::Edit) => Ok(S::Draft),
        (S::Draft | S::Rejected, A::Submit) => Ok(S::Submitted),
        (S::Submitted, A::Approve) => Ok(S::Approved),
        (S::Submitted, A::Reject) => Ok(S::Rejected),
        (S::Approved | S::Failed, A::BeginPublish) => Ok(S::Publishing),
        (S::Publishing, A::PublishSucceeded) => Ok(S::Published),
        (S::Publishing, A::PublishFailed) => Ok(S::Failed),
        _ => Err(StratumError::invalid_transition(current, action)),
    }
}

// ---------------------------------------------------------------------------
// Draft content
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    Awareness,
    Traffic,
    Engagement,
    Leads,
    AppPromotion,
    Sales,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetKind {
    #[default]
    Daily,
    Lifetime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub amount: f64,
    #[serde(default)]
    pub kind: BudgetKind,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "USD".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Targeting {
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub age_min: Option<u8>,
    #[serde(default)]
    pub age_max: Option<u8>,
    #[serde(default)]
    pub genders: Vec<String>,
    #[serde(default)]
    pub interests: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreativeKind {
    Image,
    Video,
    Carousel,
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreativeAsset {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub kind: CreativeKind,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub headline: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub call_to_action: Option<String>,
}

/// A campaign being built in the dashboard before it reaches an ad platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignDraft {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub platform: Platform,
    pub name: String,
    pub status: DraftStatus,
    pub objective: Objective,
    pub budget: Budget,
    pub targeting: Targeting,
    pub creatives: Vec<CreativeAsset>,
    pub ad_account_id: Option<Uuid>,
    pub platform_campaign_id: Option<String>,
    pub rejection_reason: Option<String>,
    pub last_error: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
}

impl CampaignDraft {
    /// Problems that block submission for review. Empty when the draft is complete.
    pub fn submission_problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.name.trim().is_empty() {
            problems.push("name must not be empty".to_string());
        }
        if !(self.budget.amount.is_finite() && self.budget.amount > 0.0) {
            problems.push("budget amount must be positive".to_string());
        }
        if self.creatives.is_empty() {
            problems.push("at least one creative is required".to_string());
        }
        for creative in &self.creatives {
            let has_media = creative.url.as_deref().is_some_and(|u| !u.trim().is_empty());
            if creative.kind != CreativeKind::Text && !has_media {
                problems.push(format!("creative {} has no asset url", creative.id));
            }
        }
        if self.ad_account_id.is_none() {
            problems.push("an ad account must be selected".to_string());
        }
        if let Some(min) = self.targeting.age_min {
            if min < 13 {
                problems.push("minimum age must be at least 13".to_string());
            }
        }
        if let (Some(min), Some(max)) = (self.targeting.age_min, self.targeting.age_max) {
            if min > max {
                problems.push("minimum age exceeds maximum age".to_string());
            }
        }
        problems
    }
}

/// Request body for creating a draft.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDraft {
    pub platform: Platform,
    pub name: String,
    pub objective: Objective,
    pub budget: Budget,
    #[serde(default)]
    pub targeting: Targeting,
    #[serde(default)]
    pub creatives: Vec<CreativeAsset>,
    #[serde(default)]
    pub ad_account_id: Option<Uuid>,
}

/// Partial update of a draft's content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DraftPatch {
    pub name: Option<String>,
    pub objective: Option<Objective>,
    pub budget: Option<Budget>,
    pub targeting: Option<Targeting>,
    pub creatives: Option<Vec<CreativeAsset>>,
    pub ad_account_id: Option<Uuid>,
}

/// A recorded transition in a draft's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftTransition {
    pub id: Uuid,
    pub draft_id: Uuid,
    pub from_status: DraftStatus,
    pub to_status: DraftStatus,
    pub action: DraftAction,
    pub actor: String,
    pub comment: Option<String>,
    pub timestamp: DateTime<Utc>,
}
