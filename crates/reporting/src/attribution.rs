//! Multi-touch revenue attribution — splits each conversion across the
//! channels of the journey that led to it.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use stratum_core::config::AttributionConfig;
use stratum_core::{StratumError, StratumResult};
use tracing::debug;

use crate::markov::MarkovChain;
use crate::shapley::shapley_values;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionModel {
    FirstTouch,
    LastTouch,
    Linear,
    TimeDecay,
    PositionBased,
    Markov,
    Shapley,
}

impl AttributionModel {
    pub const ALL: [AttributionModel; 7] = [
        AttributionModel::FirstTouch,
        AttributionModel::LastTouch,
        AttributionModel::Linear,
        AttributionModel::TimeDecay,
        AttributionModel::PositionBased,
        AttributionModel::Markov,
        AttributionModel::Shapley,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AttributionModel::FirstTouch => "first_touch",
            AttributionModel::LastTouch => "last_touch",
            AttributionModel::Linear => "linear",
            AttributionModel::TimeDecay => "time_decay",
            AttributionModel::PositionBased => "position_based",
            AttributionModel::Markov => "markov",
            AttributionModel::Shapley => "shapley",
        }
    }
}

impl fmt::Display for AttributionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Touchpoint {
    pub channel: String,
    pub timestamp: DateTime<Utc>,
}

/// One user's path of touchpoints, converted or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Journey {
    pub id: String,
    pub touchpoints: Vec<Touchpoint>,
    #[serde(default)]
    pub converted: bool,
    #[serde(default)]
    pub revenue: f64,
    /// Defaults to the last touchpoint when absent.
    #[serde(default)]
    pub converted_at: Option<DateTime<Utc>>,
}

impl Journey {
    fn last_touch_at(&self) -> Option<DateTime<Utc>> {
        self.touchpoints.iter().map(|t| t.timestamp).max()
    }

    fn conversion_time(&self) -> Option<DateTime<Utc>> {
        self.converted_at.or_else(|| self.last_touch_at())
    }

    /// The instant used for the lookback window.
    fn reference_time(&self) -> Option<DateTime<Utc>> {
        if self.converted {
            self.conversion_time()
        } else {
            self.last_touch_at()
        }
    }
}

/// Per-channel credit for one converted journey. Weights sum to 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JourneyAttribution {
    pub journey_id: String,
    pub revenue: f64,
    pub weights: BTreeMap<String, f64>,
}

impl JourneyAttribution {
    pub fn revenue_for(&self, channel: &str) -> f64 {
        self.weights.get(channel).copied().unwrap_or(0.0) * self.revenue
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelAttribution {
    pub channel: String,
    /// Fractional conversion credit.
    pub conversions: f64,
    pub revenue: f64,
    /// Share of all conversion credit, in `[0, 1]`.
    pub weight_share: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionSummary {
    pub model: AttributionModel,
    /// Sorted by conversion credit, highest first.
    pub channels: Vec<ChannelAttribution>,
    pub total_conversions: usize,
    pub total_revenue: f64,
}

impl AttributionSummary {
    pub fn channel(&self, name: &str) -> Option<&ChannelAttribution> {
        self.channels.iter().find(|c| c.channel == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionComparison {
    pub summaries: Vec<AttributionSummary>,
}

// ---------------------------------------------------------------------------
// AttributionEngine
// ---------------------------------------------------------------------------

pub struct AttributionEngine {
    config: AttributionConfig,
}

impl AttributionEngine {
    pub fn new(config: AttributionConfig) -> Self {
        Self { config }
    }

    /// Per-journey channel weights for every converted journey inside the
    /// lookback window.
    pub fn attribute(
        &self,
        journeys: &[Journey],
        model: AttributionModel,
    ) -> StratumResult<Vec<JourneyAttribution>> {
        validate(journeys)?;
        let journeys = self.within_lookback(journeys);

        let global = match model {
            AttributionModel::Markov => Some(MarkovChain::build(&journeys).removal_effects()),
            AttributionModel::Shapley => Some(shapley_values(
                journeys.iter().filter(|j| j.converted),
                self.config.max_shapley_channels,
            )?),
            _ => None,
        };

        let mut results = Vec::new();
        for journey in journeys.iter().filter(|j| j.converted) {
            if journey.touchpoints.is_empty() {
                debug!(journey_id = %journey.id, "Converted journey has no touchpoints, skipped");
                continue;
            }
            let weights = match &global {
                Some(values) => weighted_by(values, journey),
                None => self.rule_based(journey, model),
            };
            results.push(JourneyAttribution {
                journey_id: journey.id.clone(),
                revenue: journey.revenue,
                weights,
            });
        }

        metrics::counter!("stratum.attribution.runs", "model" => model.as_str()).increment(1);
        Ok(results)
    }

    pub fn summarize(
        &self,
        journeys: &[Journey],
        model: AttributionModel,
    ) -> StratumResult<AttributionSummary> {
        let attributed = self.attribute(journeys, model)?;

        let mut by_channel: BTreeMap<String, (f64, f64)> = BTreeMap::new();
        let mut total_revenue = 0.0;
        for journey in &attributed {
            total_revenue += journey.revenue;
            for (channel, weight) in &journey.weights {
                let entry = by_channel.entry(channel.clone()).or_insert((0.0, 0.0));
                entry.0 += weight;
                entry.1 += weight * journey.revenue;
            }
        }

        let total_conversions = attributed.len();
        let mut channels: Vec<ChannelAttribution> = by_channel
            .into_iter()
            .map(|(channel, (conversions, revenue))| ChannelAttribution {
                channel,
                conversions,
                revenue,
                weight_share: if total_conversions > 0 {
                    conversions / total_conversions as f64
                } else {
                    0.0
                },
            })
            .collect();
        channels.sort_by(|a, b| {
            b.conversions
                .total_cmp(&a.conversions)
                .then_with(|| a.channel.cmp(&b.channel))
        });

        Ok(AttributionSummary {
            model,
            channels,
            total_conversions,
            total_revenue,
        })
    }

    /// One summary per distinct model, in request order.
    pub fn compare(
        &self,
        journeys: &[Journey],
        models: &[AttributionModel],
    ) -> StratumResult<AttributionComparison> {
        if models.is_empty() {
            return Err(StratumError::invalid("at least one model is required"));
        }
        let mut seen = Vec::with_capacity(models.len());
        let mut summaries = Vec::with_capacity(models.len());
        for model in models {
            if seen.contains(model) {
                continue;
            }
            seen.push(*model);
            summaries.push(self.summarize(journeys, *model)?);
        }
        Ok(AttributionComparison { summaries })
    }

    /// Sorted copies of the journeys whose reference time falls within
    /// `lookback_days` of the latest conversion.
    fn within_lookback(&self, journeys: &[Journey]) -> Vec<Journey> {
        let latest = journeys
            .iter()
            .filter(|j| j.converted)
            .filter_map(Journey::conversion_time)
            .max();
        let cutoff = latest.map(|l| l - Duration::days(i64::from(self.config.lookback_days)));

        journeys
            .iter()
            .filter(|j| match (cutoff, j.reference_time()) {
                (Some(cutoff), Some(at)) => at >= cutoff,
                _ => true,
            })
            .map(|j| {
                let mut j = j.clone();
                j.touchpoints.sort_by_key(|t| t.timestamp);
                j
            })
            .collect()
    }

    fn rule_based(&self, journey: &Journey, model: AttributionModel) -> BTreeMap<String, f64> {
        let touches = &journey.touchpoints;
        let n = touches.len();
        let shares: Vec<f64> = match model {
            AttributionModel::FirstTouch => (0..n).map(|i| if i == 0 { 1.0 } else { 0.0 }).collect(),
            AttributionModel::LastTouch => (0..n).map(|i| if i == n - 1 { 1.0 } else { 0.0 }).collect(),
            AttributionModel::TimeDecay => {
                // Ages run from the latest touch; the newest raw weight is 1.0.
                let half_life = self.config.time_decay_half_life_days;
                let latest = touches.iter().map(|t| t.timestamp).max();
                let raw: Vec<f64> = touches
                    .iter()
                    .map(|t| {
                        let age_days = latest
                            .map(|l| (l - t.timestamp).num_milliseconds().max(0) as f64 / MILLIS_PER_DAY)
                            .unwrap_or(0.0);
                        2f64.powf(-age_days / half_life)
                    })
                    .collect();
                let total: f64 = raw.iter().sum();
                if total.is_finite() && total > 0.0 {
                    raw.into_iter().map(|w| w / total).collect()
                } else {
                    vec![1.0 / n as f64; n]
                }
            }
            AttributionModel::PositionBased => match n {
                1 => vec![1.0],
                2 => vec![0.5, 0.5],
                _ => {
                    let middle = 0.2 / (n - 2) as f64;
                    (0..n)
                        .map(|i| if i == 0 || i == n - 1 { 0.4 } else { middle })
                        .collect()
                }
            },
            // Linear, and the fallback for data-driven models.
            _ => vec![1.0 / n as f64; n],
        };

        let mut weights = BTreeMap::new();
        for (touch, share) in touches.iter().zip(shares) {
            *weights.entry(touch.channel.clone()).or_insert(0.0) += share;
        }
        weights
    }
}

/// Normalise global channel values over the channels of one journey. Falls
/// back to an even split per touchpoint when they sum to zero.
fn weighted_by(values: &BTreeMap<String, f64>, journey: &Journey) -> BTreeMap<String, f64> {
    let mut weights: BTreeMap<String, f64> = journey
        .touchpoints
        .iter()
        .map(|t| (t.channel.clone(), values.get(&t.channel).copied().unwrap_or(0.0)))
        .collect();
    let total: f64 = weights.values().sum();
    if total > 0.0 {
        weights.values_mut().for_each(|w| *w /= total);
        return weights;
    }

    let share = 1.0 / journey.touchpoints.len() as f64;
    let mut linear = BTreeMap::new();
    for touch in &journey.touchpoints {
        *linear.entry(touch.channel.clone()).or_insert(0.0) += share;
    }
    linear
}

fn validate(journeys: &[Journey]) -> StratumResult<()> {
    let mut problems = Vec::new();
    for journey in journeys {
        if journey.touchpoints.iter().any(|t| t.channel.trim().is_empty()) {
            problems.push(format!("journey {} has a touchpoint without a channel", journey.id));
        }
        if !journey.revenue.is_finite() || journey.revenue < 0.0 {
            problems.push(format!("journey {} has invalid revenue {}", journey.id, journey.revenue));
        }
    }
    if problems.is_empty() {
        Ok(())
    } else {
        Err(StratumError::Validation(problems))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn journey(id: &str, path: &[(&str, i64)], converted: bool, revenue: f64) -> Journey {
        Journey {
            id: id.to_string(),
            touchpoints: path
                .iter()
                .map(|(channel, day)| Touchpoint {
                    channel: channel.to_string(),
                    timestamp: t0() + Duration::days(*day),
                })
                .collect(),
            converted,
            revenue,
            converted_at: None,
        }
    }

    fn sample() -> Vec<Journey> {
        vec![
            journey("j1", &[("search", 0), ("social", 2), ("email", 5)], true, 120.0),
            journey("j2", &[("social", 1), ("email", 3)], true, 80.0),
            journey("j3", &[("display", 0), ("search", 1), ("display", 2), ("email", 4)], true, 50.0),
            journey("j4", &[("display", 0), ("social", 2)], false, 0.0),
            journey("j5", &[("search", 3)], true, 30.0),
        ]
    }

    fn engine() -> AttributionEngine {
        AttributionEngine::new(AttributionConfig::default())
    }

    // 1. Weights sum to one --------------------------------------------------

    #[test]
    fn test_every_model_sums_to_one() {
        let engine = engine();
        for model in AttributionModel::ALL {
            let attributed = engine.attribute(&sample(), model).unwrap();
            assert_eq!(attributed.len(), 4, "{}", model);
            for j in &attributed {
                let total: f64 = j.weights.values().sum();
                assert!((total - 1.0).abs() < 1e-9, "{} {} sums to {}", model, j.journey_id, total);
                assert!(j.weights.values().all(|w| (0.0..=1.0 + 1e-12).contains(w)));
            }
        }
    }

    #[test]
    fn test_summary_revenue_is_conserved() {
        let engine = engine();
        for model in AttributionModel::ALL {
            let summary = engine.summarize(&sample(), model).unwrap();
            let revenue: f64 = summary.channels.iter().map(|c| c.revenue).sum();
            let share: f64 = summary.channels.iter().map(|c| c.weight_share).sum();
            assert!((revenue - 280.0).abs() < 1e-6, "{}", model);
            assert!((share - 1.0).abs() < 1e-9, "{}", model);
            assert_eq!(summary.total_conversions, 4);
        }
    }

    // 2. Rule-based models ---------------------------------------------------

    #[test]
    fn test_first_and_last_touch() {
        let engine = engine();
        let first = engine.summarize(&sample(), AttributionModel::FirstTouch).unwrap();
        assert!((first.channel("search").unwrap().revenue - 150.0).abs() < 1e-9);
        let last = engine.summarize(&sample(), AttributionModel::LastTouch).unwrap();
        assert!((last.channel("email").unwrap().revenue - 250.0).abs() < 1e-9);
    }

    #[test]
    fn test_linear_credits_repeated_channels() {
        let j = journey("j", &[("display", 0), ("search", 1), ("display", 2), ("email", 3)], true, 100.0);
        let attributed = engine().attribute(&[j], AttributionModel::Linear).unwrap();
        assert!((attributed[0].weights["display"] - 0.5).abs() < 1e-12);
        assert!((attributed[0].revenue_for("email") - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_position_based_shapes() {
        let engine = engine();
        let two = journey("two", &[("a", 0), ("b", 1)], true, 10.0);
        let four = journey("four", &[("a", 0), ("b", 1), ("c", 2), ("d", 3)], true, 10.0);
        let attributed = engine.attribute(&[two, four], AttributionModel::PositionBased).unwrap();
        assert!((attributed[0].weights["a"] - 0.5).abs() < 1e-12);
        assert!((attributed[1].weights["a"] - 0.4).abs() < 1e-12);
        assert!((attributed[1].weights["b"] - 0.1).abs() < 1e-12);
        assert!((attributed[1].weights["d"] - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_time_decay_favours_recent_touches() {
        let mut j = journey("j", &[("a", 0), ("b", 7), ("c", 14)], true, 10.0);
        j.converted_at = Some(t0() + Duration::days(14));
        let attributed = engine().attribute(&[j], AttributionModel::TimeDecay).unwrap();
        let w = &attributed[0].weights;
        assert!(w["a"] < w["b"] && w["b"] < w["c"]);
        // One half-life apart.
        assert!((w["c"] / w["b"] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_time_decay_old_touches_still_sum_to_one() {
        let engine = AttributionEngine::new(AttributionConfig {
            time_decay_half_life_days: 0.25,
            ..AttributionConfig::default()
        });
        let mut j = journey("j", &[("a", -300), ("b", -299)], true, 10.0);
        j.converted_at = Some(t0());
        let attributed = engine.attribute(&[j], AttributionModel::TimeDecay).unwrap();
        let w = &attributed[0].weights;
        assert!(w.values().all(|v| v.is_finite()));
        let sum: f64 = w.values().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!(w["b"] > w["a"]);
    }

    #[test]
    fn test_touchpoints_are_sorted_before_scoring() {
        let j = journey("j", &[("late", 5), ("early", 1)], true, 10.0);
        let attributed = engine().attribute(&[j], AttributionModel::FirstTouch).unwrap();
        assert_eq!(attributed[0].weights["early"], 1.0);
    }

    // 3. Lookback window ------------------------------------------------------

    #[test]
    fn test_old_journeys_fall_outside_lookback() {
        let journeys = vec![
            journey("old", &[("display", 0)], true, 40.0),
            journey("new", &[("search", 45)], true, 60.0),
        ];
        let summary = engine().summarize(&journeys, AttributionModel::Linear).unwrap();
        assert_eq!(summary.total_conversions, 1);
        assert!(summary.channel("display").is_none());
    }

    // 4. Data-driven models ---------------------------------------------------

    #[test]
    fn test_markov_splits_evenly_between_essential_channels() {
        let journeys = vec![journey("j", &[("a", 0), ("b", 1)], true, 10.0)];
        let attributed = engine().attribute(&journeys, AttributionModel::Markov).unwrap();
        assert!((attributed[0].weights["a"] - 0.5).abs() < 1e-9);
        assert!((attributed[0].weights["b"] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_markov_falls_back_to_linear_when_effects_are_zero() {
        let values = BTreeMap::from([("a".to_string(), 0.0), ("b".to_string(), 0.0)]);
        let j = journey("j", &[("a", 0), ("a", 1), ("b", 2)], true, 10.0);
        let weights = weighted_by(&values, &j);
        assert!((weights["a"] - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_shapley_channel_limit() {
        let engine = AttributionEngine::new(AttributionConfig {
            max_shapley_channels: 2,
            ..AttributionConfig::default()
        });
        let err = engine.summarize(&sample(), AttributionModel::Shapley).unwrap_err();
        assert!(matches!(err, StratumError::Validation(_)));
        assert!(engine.summarize(&sample(), AttributionModel::Linear).is_ok());
    }

    #[test]
    fn test_compare_deduplicates_models() {
        let comparison = engine()
            .compare(
                &sample(),
                &[AttributionModel::Linear, AttributionModel::Markov, AttributionModel::Linear],
            )
            .unwrap();
        assert_eq!(comparison.summaries.len(), 2);
        assert!(engine().compare(&sample(), &[]).is_err());
    }

    #[test]
    fn test_negative_revenue_rejected() {
        let j = journey("j", &[("a", 0)], true, -5.0);
        assert!(engine().attribute(&[j], AttributionModel::Linear).is_err());
    }

    #[test]
    fn test_journey_wire_format() {
        let j: Journey = serde_json::from_str(
            r#"{"id": "u1", "touchpoints": [{"channel": "email", "timestamp": "2024-06-01T00:00:00Z"}]}"#,
        )
        .unwrap();
        assert!(!j.converted);
        assert_eq!(j.revenue, 0.0);
        assert!(j.converted_at.is_none());

        let model: AttributionModel = serde_json::from_str("\"position_based\"").unwrap();
        assert_eq!(model, AttributionModel::PositionBased);
    }
}
