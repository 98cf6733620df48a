use tracing::debug;

use crate::types::{ComparisonOperator, MetricSnapshot, Rule, RuleCondition};

/// Absolute tolerance for `Equals` / `NotEquals` on floating-point metrics.
pub const EQUALITY_EPSILON: f64 = 1e-9;

/// Evaluates rule conditions against metric snapshots. Stateless; cooldown
/// bookkeeping lives in the engine.
#[derive(Debug, Clone, Default)]
pub struct RuleEvaluator;

impl RuleEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Compares `actual` to `threshold`. NaN never matches.
    pub fn compare(&self, actual: f64, operator: ComparisonOperator, threshold: f64) -> bool {
        if actual.is_nan() || threshold.is_nan() {
            return false;
        }
        match operator {
            ComparisonOperator::Equals => (actual - threshold).abs() <= EQUALITY_EPSILON,
            ComparisonOperator::NotEquals => (actual - threshold).abs() > EQUALITY_EPSILON,
            ComparisonOperator::GreaterThan => actual > threshold,
            ComparisonOperator::LessThan => actual < threshold,
            ComparisonOperator::GreaterThanOrEqual => actual >= threshold,
            ComparisonOperator::LessThanOrEqual => actual <= threshold,
        }
    }

    /// Evaluates a condition against one snapshot, returning the observed
    /// value when it holds. A snapshot without the field never matches.
    pub fn evaluate_condition(&self, condition: &RuleCondition, snapshot: &MetricSnapshot) -> Option<f64> {
        let Some(&actual) = snapshot.metrics.get(&condition.field) else {
            debug!(
                field = %condition.field,
                entity = %snapshot.entity,
                "Metric missing from snapshot"
            );
            return None;
        };
        self.compare(actual, condition.operator, condition.threshold)
            .then_some(actual)
    }

    /// Scope plus condition; cooldown is not considered here.
    pub fn matches(&self, rule: &Rule, snapshot: &MetricSnapshot) -> Option<f64> {
        if !rule.applies_to.contains(&snapshot.entity) {
            return None;
        }
        self.evaluate_condition(&rule.condition, snapshot)
    }
}
