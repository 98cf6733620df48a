use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use stratum_core::config::RulesConfig;
use stratum_core::{EntityRef, StratumError, StratumResult, TenantId};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::actions::ActionExecutor;
use crate::evaluator::RuleEvaluator;
use crate::types::*;

/// Bounds on `adjust_budget` percentages.
const MIN_BUDGET_PERCENT: f64 = -100.0;
const MAX_BUDGET_PERCENT: f64 = 1000.0;

/// Stores rules, evaluates metric snapshots against them, and fires actions
/// subject to a per-`(rule, entity)` cooldown.
pub struct RuleEngine {
    rules: DashMap<Uuid, Rule>,
    /// (rule_id, entity) -> time of the last fire
    last_fired: DashMap<(Uuid, EntityRef), DateTime<Utc>>,
    /// rule_id -> trigger history, oldest first
    history: DashMap<Uuid, VecDeque<RuleTrigger>>,
    evaluator: RuleEvaluator,
    executor: Arc<dyn ActionExecutor>,
    config: RulesConfig,
}

impl RuleEngine {
    pub fn new(config: RulesConfig, executor: Arc<dyn ActionExecutor>) -> Self {
        Self {
            rules: DashMap::new(),
            last_fired: DashMap::new(),
            history: DashMap::new(),
            evaluator: RuleEvaluator::new(),
            executor,
            config,
        }
    }

    // ------------------------------------------------------------------
    // CRUD
    // ------------------------------------------------------------------

    pub fn create(&self, tenant: &TenantId, req: NewRule) -> StratumResult<Rule> {
        let now = Utc::now();
        let rule = Rule {
            id: Uuid::new_v4(),
            tenant_id: tenant.clone(),
            name: req.name,
            description: req.description,
            status: req.status,
            condition: req.condition,
            action: req.action,
            applies_to: req.applies_to,
            cooldown_hours: req.cooldown_hours,
            trigger_count: 0,
            last_triggered_at: None,
            created_at: now,
            updated_at: now,
        };
        self.validate(&rule)?;
        self.rules.insert(rule.id, rule.clone());
        info!(tenant = %tenant, rule_id = %rule.id, name = %rule.name, "Rule created");
        Ok(rule)
    }

    pub fn get(&self, tenant: &TenantId, id: Uuid) -> StratumResult<Rule> {
        self.rules
            .get(&id)
            .filter(|r| &r.tenant_id == tenant)
            .map(|r| r.value().clone())
            .ok_or_else(|| StratumError::not_found("rule", id))
    }

    /// Rules for a tenant, oldest first.
    pub fn list(&self, tenant: &TenantId, status: Option<RuleStatus>) -> Vec<Rule> {
        let mut rules: Vec<Rule> = self
            .rules
            .iter()
            .filter(|r| &r.tenant_id == tenant)
            .filter(|r| status.map_or(true, |s| r.status == s))
            .map(|r| r.value().clone())
            .collect();
        rules.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        rules
    }

    /// Update a rule's definition. Existing cooldown stamps are kept, so an
    /// edit never lets a rule re-fire early.
    pub fn update(&self, tenant: &TenantId, id: Uuid, patch: RulePatch) -> StratumResult<Rule> {
        let mut entry = self
            .rules
            .get_mut(&id)
            .filter(|r| &r.tenant_id == tenant)
            .ok_or_else(|| StratumError::not_found("rule", id))?;

        let mut updated = entry.value().clone();
        if let Some(name) = patch.name {
            updated.name = name;
        }
        if let Some(description) = patch.description {
            updated.description = description;
        }
        if let Some(condition) = patch.condition {
            updated.condition = condition;
        }
        if let Some(action) = patch.action {
            updated.action = action;
        }
        if let Some(applies_to) = patch.applies_to {
            updated.applies_to = applies_to;
        }
        if let Some(cooldown) = patch.cooldown_hours {
            updated.cooldown_hours = cooldown;
        }
        self.validate(&updated)?;
        updated.updated_at = Utc::now();
        *entry.value_mut() = updated.clone();
        Ok(updated)
    }

    pub fn delete(&self, tenant: &TenantId, id: Uuid) -> StratumResult<()> {
        self.rules
            .remove_if(&id, |_, r| &r.tenant_id == tenant)
            .ok_or_else(|| StratumError::not_found("rule", id))?;
        self.last_fired.retain(|(rule_id, _), _| *rule_id != id);
        self.history.remove(&id);
        info!(tenant = %tenant, rule_id = %id, "Rule deleted");
        Ok(())
    }

    /// Activate or pause a rule. Once a rule has left `Draft` it cannot go back.
    pub fn set_status(&self, tenant: &TenantId, id: Uuid, status: RuleStatus) -> StratumResult<Rule> {
        let mut entry = self
            .rules
            .get_mut(&id)
            .filter(|r| &r.tenant_id == tenant)
            .ok_or_else(|| StratumError::not_found("rule", id))?;

        let current = entry.status;
        if status == RuleStatus::Draft && current != RuleStatus::Draft {
            return Err(StratumError::invalid_transition(current, status));
        }
        entry.status = status;
        entry.updated_at = Utc::now();
        info!(tenant = %tenant, rule_id = %id, from = ?current, to = ?status, "Rule status changed");
        Ok(entry.value().clone())
    }

    /// Trigger history for a rule, newest first.
    pub fn history(&self, tenant: &TenantId, id: Uuid) -> StratumResult<Vec<RuleTrigger>> {
        self.get(tenant, id)?;
        Ok(self
            .history
            .get(&id)
            .map(|h| h.iter().rev().cloned().collect())
            .unwrap_or_default())
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    /// Evaluate every active rule of the tenant against `snapshots`.
    ///
    /// A rule fires for an entity when its condition holds, the entity is in
    /// scope, and the pair has not fired within `cooldown_hours` of `now`.
    /// Each fire runs exactly one action. A failed action is recorded in the
    /// history but still consumes the cooldown.
    pub fn evaluate(
        &self,
        tenant: &TenantId,
        snapshots: &[MetricSnapshot],
        now: DateTime<Utc>,
    ) -> EvaluationReport {
        let rules = self.list(tenant, Some(RuleStatus::Active));
        let mut report = EvaluationReport {
            rules_evaluated: rules.len(),
            snapshots: snapshots.len(),
            ..EvaluationReport::default()
        };

        for rule in &rules {
            for snapshot in snapshots {
                let Some(observed) = self.evaluator.matches(rule, snapshot) else {
                    continue;
                };
                if !self.try_claim(rule, &snapshot.entity, now) {
                    debug!(rule_id = %rule.id, entity = %snapshot.entity, "Suppressed by cooldown");
                    report.suppressed_by_cooldown += 1;
                    continue;
                }
                let trigger = self.fire(tenant, rule, &snapshot.entity, observed, now);
                report.fired.push(trigger);
            }
        }

        if !report.fired.is_empty() {
            info!(
                tenant = %tenant,
                fired = report.fired.len(),
                suppressed = report.suppressed_by_cooldown,
                "Rule evaluation fired actions"
            );
        }
        report
    }

    /// Dry run: which snapshots would match, without touching cooldowns or
    /// running actions. Works for rules in any status.
    pub fn preview(
        &self,
        tenant: &TenantId,
        id: Uuid,
        snapshots: &[MetricSnapshot],
        now: DateTime<Utc>,
    ) -> StratumResult<Vec<PreviewMatch>> {
        let rule = self.get(tenant, id)?;
        Ok(snapshots
            .iter()
            .filter_map(|s| {
                self.evaluator.matches(&rule, s).map(|observed| PreviewMatch {
                    entity: s.entity.clone(),
                    observed_value: observed,
                    in_cooldown: self.in_cooldown(&rule, &s.entity, now),
                })
            })
            .collect())
    }

    fn in_cooldown(&self, rule: &Rule, entity: &EntityRef, now: DateTime<Utc>) -> bool {
        let cooldown = Duration::hours(i64::from(rule.cooldown_hours));
        self.last_fired
            .get(&(rule.id, entity.clone()))
            .map_or(false, |last| now - *last < cooldown)
    }

    /// Atomically check the cooldown and stamp the pair. Returns `false` when
    /// the pair fired within the cooldown window.
    fn try_claim(&self, rule: &Rule, entity: &EntityRef, now: DateTime<Utc>) -> bool {
        let cooldown = Duration::hours(i64::from(rule.cooldown_hours));
        match self.last_fired.entry((rule.id, entity.clone())) {
            Entry::Occupied(mut last) => {
                if now - *last.get() < cooldown {
                    false
                } else {
                    last.insert(now);
                    true
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        }
    }

    fn fire(
        &self,
        tenant: &TenantId,
        rule: &Rule,
        entity: &EntityRef,
        observed: f64,
        now: DateTime<Utc>,
    ) -> RuleTrigger {
        let outcome = match self.executor.execute(tenant, rule, entity) {
            Ok(detail) => {
                metrics::counter!("stratum.rules.fired", "action" => rule.action.kind()).increment(1);
                ActionOutcome::Succeeded { detail }
            }
            Err(e) => {
                warn!(
                    tenant = %tenant,
                    rule_id = %rule.id,
                    entity = %entity,
                    error = %e,
                    "Rule action failed"
                );
                metrics::counter!("stratum.rules.action_failed", "action" => rule.action.kind())
                    .increment(1);
                ActionOutcome::Failed {
                    error: format!("{:#}", e),
                }
            }
        };

        let trigger = RuleTrigger {
            id: Uuid::new_v4(),
            rule_id: rule.id,
            rule_name: rule.name.clone(),
            entity: entity.clone(),
            field: rule.condition.field.clone(),
            observed_value: observed,
            threshold: rule.condition.threshold,
            action: rule.action.clone(),
            outcome,
            triggered_at: now,
        };

        // The rule guard is held across the history append so a concurrent
        // delete cannot leave history behind.
        match self.rules.get_mut(&rule.id) {
            Some(mut stored) => {
                stored.trigger_count += 1;
                stored.last_triggered_at = stored.last_triggered_at.max(Some(now));
                let mut history = self.history.entry(rule.id).or_default();
                history.push_back(trigger.clone());
                while history.len() > self.config.history_limit {
                    history.pop_front();
                }
            }
            None => {
                debug!(rule_id = %rule.id, "Rule deleted while firing");
                self.last_fired.remove(&(rule.id, entity.clone()));
            }
        }

        trigger
    }

    fn validate(&self, rule: &Rule) -> StratumResult<()> {
        let mut problems = Vec::new();
        if rule.name.trim().is_empty() {
            problems.push("name must not be empty".to_string());
        }
        if rule.condition.field.trim().is_empty() {
            problems.push("condition field must not be empty".to_string());
        }
        if !rule.condition.threshold.is_finite() {
            problems.push("condition threshold must be a finite number".to_string());
        }
        if rule.cooldown_hours > self.config.max_cooldown_hours {
            problems.push(format!(
                "cooldown_hours must not exceed {}",
                self.config.max_cooldown_hours
            ));
        }
        match &rule.action {
            RuleAction::ApplyLabel { label } if label.trim().is_empty() => {
                problems.push("label must not be empty".to_string());
            }
            RuleAction::AdjustBudget { percent } => {
                if !percent.is_finite() || *percent == 0.0 {
                    problems.push("budget adjustment must be a non-zero number".to_string());
                } else if !(MIN_BUDGET_PERCENT..=MAX_BUDGET_PERCENT).contains(percent) {
                    problems.push(format!(
                        "budget adjustment must be within [{}, {}] percent",
                        MIN_BUDGET_PERCENT, MAX_BUDGET_PERCENT
                    ));
                }
            }
            _ => {}
        }
        if let AppliesTo::Entities(entities) = &rule.applies_to {
            if entities.is_empty() {
                problems.push("applies_to must list at least one entity".to_string());
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(StratumError::Validation(problems))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::InMemoryActionExecutor;
    use std::collections::HashMap;

    fn tenant() -> TenantId {
        TenantId::new("acme")
    }

    fn engine() -> (RuleEngine, Arc<InMemoryActionExecutor>) {
        let executor = Arc::new(InMemoryActionExecutor::new());
        let engine = RuleEngine::new(RulesConfig::default(), executor.clone());
        (engine, executor)
    }

    fn high_cpa_rule(cooldown_hours: u32, action: RuleAction) -> NewRule {
        NewRule {
            name: "High CPA".to_string(),
            description: "Pause campaigns with runaway CPA".to_string(),
            status: RuleStatus::Active,
            condition: RuleCondition {
                field: "cpa".to_string(),
                operator: ComparisonOperator::GreaterThan,
                threshold: 40.0,
            },
            action,
            applies_to: AppliesTo::All,
            cooldown_hours,
        }
    }

    fn cpa(entity: &str, value: f64) -> MetricSnapshot {
        MetricSnapshot {
            entity: EntityRef::campaign(entity),
            metrics: HashMap::from([("cpa".to_string(), value)]),
        }
    }

    #[test]
    fn test_cooldown_suppresses_second_fire() {
        let (engine, _) = engine();
        engine
            .create(&tenant(), high_cpa_rule(6, RuleAction::PauseCampaign))
            .unwrap();
        let t0 = Utc::now();

        let first = engine.evaluate(&tenant(), &[cpa("c1", 55.0)], t0);
        assert_eq!(first.fired.len(), 1);

        let within = engine.evaluate(&tenant(), &[cpa("c1", 60.0)], t0 + Duration::hours(5));
        assert!(within.fired.is_empty());
        assert_eq!(within.suppressed_by_cooldown, 1);

        let after = engine.evaluate(&tenant(), &[cpa("c1", 60.0)], t0 + Duration::hours(6));
        assert_eq!(after.fired.len(), 1);
    }

    #[test]
    fn test_cooldown_is_per_entity() {
        let (engine, executor) = engine();
        engine
            .create(&tenant(), high_cpa_rule(24, RuleAction::PauseCampaign))
            .unwrap();
        let now = Utc::now();

        engine.evaluate(&tenant(), &[cpa("c1", 55.0)], now);
        let report = engine.evaluate(&tenant(), &[cpa("c1", 55.0), cpa("c2", 70.0)], now);
        assert_eq!(report.fired.len(), 1);
        assert_eq!(report.fired[0].entity, EntityRef::campaign("c2"));
        assert!(executor.is_paused(&tenant(), &EntityRef::campaign("c1")));
        assert!(executor.is_paused(&tenant(), &EntityRef::campaign("c2")));
    }

    #[test]
    fn test_zero_cooldown_fires_every_time() {
        let (engine, _) = engine();
        engine
            .create(
                &tenant(),
                high_cpa_rule(0, RuleAction::ApplyLabel { label: "hot".to_string() }),
            )
            .unwrap();
        let now = Utc::now();
        assert_eq!(engine.evaluate(&tenant(), &[cpa("c1", 41.0)], now).fired.len(), 1);
        assert_eq!(engine.evaluate(&tenant(), &[cpa("c1", 41.0)], now).fired.len(), 1);
    }

    #[test]
    fn test_failed_action_is_recorded_and_keeps_cooldown() {
        let (engine, _) = engine();
        let rule = engine
            .create(
                &tenant(),
                high_cpa_rule(
                    12,
                    RuleAction::SendAlert {
                        channel: AlertChannel::Whatsapp,
                        recipients: vec![],
                        message: None,
                    },
                ),
            )
            .unwrap();
        let now = Utc::now();

        let report = engine.evaluate(&tenant(), &[cpa("c1", 90.0)], now);
        assert_eq!(report.fired.len(), 1);
        assert!(!report.fired[0].outcome.is_success());

        let retry = engine.evaluate(&tenant(), &[cpa("c1", 90.0)], now + Duration::hours(1));
        assert!(retry.fired.is_empty());

        let history = engine.history(&tenant(), rule.id).unwrap();
        assert_eq!(history.len(), 1);
        assert!(matches!(history[0].outcome, ActionOutcome::Failed { .. }));
        assert_eq!(engine.get(&tenant(), rule.id).unwrap().trigger_count, 1);
    }

    #[test]
    fn test_paused_rules_do_not_fire() {
        let (engine, _) = engine();
        let rule = engine
            .create(&tenant(), high_cpa_rule(0, RuleAction::PauseCampaign))
            .unwrap();
        engine.set_status(&tenant(), rule.id, RuleStatus::Paused).unwrap();

        let report = engine.evaluate(&tenant(), &[cpa("c1", 90.0)], Utc::now());
        assert_eq!(report.rules_evaluated, 0);
        assert!(report.fired.is_empty());
        assert!(engine.set_status(&tenant(), rule.id, RuleStatus::Draft).is_err());
    }

    #[test]
    fn test_preview_reports_cooldown_without_firing() {
        let (engine, executor) = engine();
        let rule = engine
            .create(&tenant(), high_cpa_rule(24, RuleAction::PauseCampaign))
            .unwrap();
        let now = Utc::now();
        engine.evaluate(&tenant(), &[cpa("c1", 50.0)], now);

        let matches = engine
            .preview(&tenant(), rule.id, &[cpa("c1", 50.0), cpa("c2", 45.0), cpa("c3", 10.0)], now)
            .unwrap();
        assert_eq!(matches.len(), 2);
        assert!(matches[0].in_cooldown);
        assert!(!matches[1].in_cooldown);
        assert!(!executor.is_paused(&tenant(), &EntityRef::campaign("c2")));
    }

    #[test]
    fn test_validation() {
        let (engine, _) = engine();
        let mut req = high_cpa_rule(10_000, RuleAction::AdjustBudget { percent: -150.0 });
        req.name = String::new();
        match engine.create(&tenant(), req) {
            Err(StratumError::Validation(problems)) => assert_eq!(problems.len(), 3),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_history_is_bounded_and_newest_first() {
        let executor = Arc::new(InMemoryActionExecutor::new());
        let config = RulesConfig {
            history_limit: 2,
            ..RulesConfig::default()
        };
        let engine = RuleEngine::new(config, executor);
        let rule = engine
            .create(
                &tenant(),
                high_cpa_rule(0, RuleAction::ApplyLabel { label: "x".to_string() }),
            )
            .unwrap();
        let t0 = Utc::now();
        for i in 0..3 {
            engine.evaluate(&tenant(), &[cpa("c1", 50.0 + i as f64)], t0 + Duration::minutes(i));
        }
        let history = engine.history(&tenant(), rule.id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].observed_value, 52.0);
    }

    #[test]
    fn test_rules_are_tenant_scoped() {
        let (engine, _) = engine();
        let rule = engine
            .create(&tenant(), high_cpa_rule(0, RuleAction::PauseCampaign))
            .unwrap();
        let other = TenantId::new("globex");
        assert!(engine.get(&other, rule.id).is_err());
        assert!(engine.evaluate(&other, &[cpa("c1", 99.0)], Utc::now()).fired.is_empty());
        assert!(engine.delete(&other, rule.id).is_err());
    }

    #[test]
    fn test_update_keeps_cooldown() {
        let (engine, _) = engine();
        let rule = engine
            .create(&tenant(), high_cpa_rule(24, RuleAction::PauseCampaign))
            .unwrap();
        let now = Utc::now();
        engine.evaluate(&tenant(), &[cpa("c1", 50.0)], now);

        let patch = RulePatch {
            condition: Some(RuleCondition {
                field: "cpa".to_string(),
                operator: ComparisonOperator::GreaterThan,
                threshold: 30.0,
            }),
            ..RulePatch::default()
        };
        engine.update(&tenant(), rule.id, patch).unwrap();
        let report = engine.evaluate(&tenant(), &[cpa("c1", 50.0)], now + Duration::hours(1));
        assert!(report.fired.is_empty());
    }

    // --- concurrency ---

    #[test]
    fn test_concurrent_evaluations_fire_once() {
        use std::sync::Barrier;

        let (engine, executor) = engine();
        let rule = engine
            .create(
                &tenant(),
                high_cpa_rule(24, RuleAction::SendAlert {
                    channel: AlertChannel::Email,
                    recipients: vec!["ops@acme.test".to_string()],
                    message: None,
                }),
            )
            .unwrap();
        let now = Utc::now();
        let threads = 8;
        let barrier = Barrier::new(threads);

        let fired: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        engine.evaluate(&tenant(), &[cpa("c1", 80.0)], now).fired.len()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(fired, 1);
        assert_eq!(executor.alerts().len(), 1);
        assert_eq!(engine.history(&tenant(), rule.id).unwrap().len(), 1);
        assert_eq!(engine.get(&tenant(), rule.id).unwrap().trigger_count, 1);
    }

    #[test]
    fn test_stale_clock_does_not_rewind_cooldown() {
        let (engine, _) = engine();
        let rule = engine
            .create(&tenant(), high_cpa_rule(24, RuleAction::PauseCampaign))
            .unwrap();
        let t0 = Utc::now();
        engine.evaluate(&tenant(), &[cpa("c1", 50.0)], t0);

        let stale = engine.evaluate(&tenant(), &[cpa("c1", 50.0)], t0 - Duration::days(2));
        assert!(stale.fired.is_empty());
        assert_eq!(stale.suppressed_by_cooldown, 1);

        let stored = engine.get(&tenant(), rule.id).unwrap();
        assert_eq!(stored.last_triggered_at, Some(t0));
        let later = engine.evaluate(&tenant(), &[cpa("c1", 50.0)], t0 + Duration::hours(23));
        assert!(later.fired.is_empty());
    }

    #[test]
    fn test_fire_after_delete_leaves_nothing_behind() {
        let (engine, _) = engine();
        let rule = engine
            .create(&tenant(), high_cpa_rule(24, RuleAction::PauseCampaign))
            .unwrap();
        let entity = EntityRef::campaign("c1");
        let now = Utc::now();

        // Claimed before the delete, fired after it.
        assert!(engine.try_claim(&rule, &entity, now));
        engine.delete(&tenant(), rule.id).unwrap();
        engine.fire(&tenant(), &rule, &entity, 50.0, now);

        assert!(engine.history.get(&rule.id).is_none());
        assert!(engine.last_fired.is_empty());
    }
}
