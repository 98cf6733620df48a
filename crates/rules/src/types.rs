use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stratum_core::{EntityRef, TenantId};
use uuid::Uuid;

/// An automation rule: when a metric crosses a threshold, run one action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub name: String,
    pub description: String,
    pub status: RuleStatus,
    pub condition: RuleCondition,
    pub action: RuleAction,
    pub applies_to: AppliesTo,
    /// Minimum hours between two fires for the same entity.
    pub cooldown_hours: u32,
    pub trigger_count: u64,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle status of a rule. Only active rules are evaluated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    Active,
    Paused,
    #[default]
    Draft,
}

/// `metric[field] operator threshold`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCondition {
    pub field: String,
    pub operator: ComparisonOperator,
    pub threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    #[serde(alias = "=", alias = "==")]
    Equals,
    #[serde(alias = "≠", alias = "!=")]
    NotEquals,
    #[serde(alias = ">")]
    GreaterThan,
    #[serde(alias = "<")]
    LessThan,
    #[serde(alias = "≥", alias = ">=")]
    GreaterThanOrEqual,
    #[serde(alias = "≤", alias = "<=")]
    LessThanOrEqual,
}

impl ComparisonOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            ComparisonOperator::Equals => "=",
            ComparisonOperator::NotEquals => "≠",
            ComparisonOperator::GreaterThan => ">",
            ComparisonOperator::LessThan => "<",
            ComparisonOperator::GreaterThanOrEqual => "≥",
            ComparisonOperator::LessThanOrEqual => "≤",
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for ComparisonOperator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "=" | "==" | "equals" => Ok(ComparisonOperator::Equals),
            "≠" | "!=" | "not_equals" => Ok(ComparisonOperator::NotEquals),
            ">" | "greater_than" => Ok(ComparisonOperator::GreaterThan),
            "<" | "less_than" => Ok(ComparisonOperator::LessThan),
            "≥" | ">=" | "greater_than_or_equal" => Ok(ComparisonOperator::GreaterThanOrEqual),
            "≤" | "<=" | "less_than_or_equal" => Ok(ComparisonOperator::LessThanOrEqual),
            other => Err(format!("unknown comparison operator '{}'", other)),
        }
    }
}

/// The single action a rule runs when it fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum RuleAction {
    ApplyLabel {
        label: String,
    },
    SendAlert {
        channel: AlertChannel,
        #[serde(default)]
        recipients: Vec<String>,
        #[serde(default)]
        message: Option<String>,
    },
    PauseCampaign,
    /// Signed percentage change, e.g. `-20.0` cuts the budget by a fifth.
    AdjustBudget {
        percent: f64,
    },
}

impl RuleAction {
    pub fn kind(&self) -> &'static str {
        match self {
            RuleAction::ApplyLabel { .. } => "apply_label",
            RuleAction::SendAlert { .. } => "send_alert",
            RuleAction::PauseCampaign => "pause_campaign",
            RuleAction::AdjustBudget { .. } => "adjust_budget",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertChannel {
    Email,
    Slack,
    Whatsapp,
}

/// Which entities a rule is evaluated against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scope", content = "entities")]
pub enum AppliesTo {
    #[default]
    All,
    Entities(Vec<EntityRef>),
}

impl AppliesTo {
    pub fn contains(&self, entity: &EntityRef) -> bool {
        match self {
            AppliesTo::All => true,
            AppliesTo::Entities(entities) => entities.contains(entity),
        }
    }
}

/// Current metric values for one entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub entity: EntityRef,
    pub metrics: HashMap<String, f64>,
}

/// Request body for creating a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRule {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: RuleStatus,
    pub condition: RuleCondition,
    pub action: RuleAction,
    #[serde(default)]
    pub applies_to: AppliesTo,
    #[serde(default)]
    pub cooldown_hours: u32,
}

/// Partial update of a rule's definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub condition: Option<RuleCondition>,
    pub action: Option<RuleAction>,
    pub applies_to: Option<AppliesTo>,
    pub cooldown_hours: Option<u32>,
}

/// Outcome of running a fired rule's action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum ActionOutcome {
    Succeeded { detail: String },
    Failed { error: String },
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ActionOutcome::Succeeded { .. })
    }
}

/// A history entry recorded every time a rule fires for an entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleTrigger {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub rule_name: String,
    pub entity: EntityRef,
    pub field: String,
    pub observed_value: f64,
    pub threshold: f64,
    pub action: RuleAction,
    pub outcome: ActionOutcome,
    pub triggered_at: DateTime<Utc>,
}

/// Result of evaluating a batch of snapshots against a tenant's rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub rules_evaluated: usize,
    pub snapshots: usize,
    pub fired: Vec<RuleTrigger>,
    /// `(rule, entity)` pairs that matched but were inside their cooldown.
    pub suppressed_by_cooldown: usize,
}

/// A dry-run match: the rule would fire for this entity, cooldown aside.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewMatch {
    pub entity: EntityRef,
    pub observed_value: f64,
    pub in_cooldown: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_parses_symbols() {
        assert_eq!("≥".parse::<ComparisonOperator>(), Ok(ComparisonOperator::GreaterThanOrEqual));
        assert_eq!(">=".parse::<ComparisonOperator>(), Ok(ComparisonOperator::GreaterThanOrEqual));
        assert_eq!("≠".parse::<ComparisonOperator>(), Ok(ComparisonOperator::NotEquals));
        assert_eq!("<".parse::<ComparisonOperator>(), Ok(ComparisonOperator::LessThan));
        assert!("~".parse::<ComparisonOperator>().is_err());
    }

    #[test]
    fn test_condition_accepts_operator_symbols_in_json() {
        for (symbol, expected) in [
            (">", ComparisonOperator::GreaterThan),
            ("<=", ComparisonOperator::LessThanOrEqual),
            ("≤", ComparisonOperator::LessThanOrEqual),
            ("!=", ComparisonOperator::NotEquals),
            ("=", ComparisonOperator::Equals),
            ("greater_than_or_equal", ComparisonOperator::GreaterThanOrEqual),
        ] {
            let json = format!(r#"{{"field": "cpa", "operator": "{}", "threshold": 40}}"#, symbol);
            let condition: RuleCondition = serde_json::from_str(&json).unwrap();
            assert_eq!(condition.operator, expected, "operator {:?}", symbol);
        }
        // Written back in the canonical snake_case form.
        let out = serde_json::to_value(ComparisonOperator::GreaterThan).unwrap();
        assert_eq!(out, serde_json::json!("greater_than"));
        assert!(serde_json::from_str::<ComparisonOperator>(r#""~""#).is_err());
    }

    #[test]
    fn test_action_json_shape() {
        let action: RuleAction =
            serde_json::from_str(r#"{"type": "adjust_budget", "percent": -15.5}"#).unwrap();
        assert_eq!(action, RuleAction::AdjustBudget { percent: -15.5 });

        let alert: RuleAction = serde_json::from_str(
            r#"{"type": "send_alert", "channel": "whatsapp", "recipients": ["+15551234567"]}"#,
        )
        .unwrap();
        assert_eq!(alert.kind(), "send_alert");
    }

    #[test]
    fn test_applies_to_scope() {
        let scope: AppliesTo = serde_json::from_str(
            r#"{"scope": "entities", "entities": [{"kind": "campaign", "id": "c1"}]}"#,
        )
        .unwrap();
        assert!(scope.contains(&EntityRef::campaign("c1")));
        assert!(!scope.contains(&EntityRef::account("c1")));
        assert!(AppliesTo::All.contains(&EntityRef::account("anything")));

        let all: AppliesTo = serde_json::from_str(r#"{"scope": "all"}"#).unwrap();
        assert_eq!(all, AppliesTo::All);
    }
}
