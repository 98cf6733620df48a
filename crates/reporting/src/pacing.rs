//! Budget pacing — compares actual spend against a linear spend curve over
//! the flight and projects where spend will land.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use stratum_core::config::PacingConfig;
use stratum_core::{StratumError, StratumResult};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Describes whether a campaign is spending at the expected rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacingStatus {
    NotStarted,
    OnTrack,
    Underspending,
    Overspending,
    Exhausted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailySpend {
    pub date: NaiveDate,
    pub amount: f64,
}

/// A flight budget and its spend so far. Both flight dates are inclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingInput {
    pub budget: f64,
    pub flight_start: NaiveDate,
    pub flight_end: NaiveDate,
    #[serde(default)]
    pub spend: Vec<DailySpend>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingReport {
    pub as_of: NaiveDate,
    pub days_total: i64,
    pub days_elapsed: i64,
    pub spent: f64,
    /// Spend on a straight line from zero to `budget` over the flight.
    pub expected_spend: f64,
    /// `spent / expected_spend` (0.0 before the flight).
    pub pacing_ratio: f64,
    pub status: PacingStatus,
    /// Average daily spend to date carried to the end of the flight.
    pub projected_spend: f64,
    /// Even daily spend that lands the remaining budget by the end.
    pub recommended_daily: f64,
}

// ---------------------------------------------------------------------------
// BudgetPacer
// ---------------------------------------------------------------------------

pub struct BudgetPacer {
    tolerance: f64,
}

impl BudgetPacer {
    pub fn new(config: &PacingConfig) -> Self {
        Self {
            tolerance: config.tolerance,
        }
    }

    /// Pacing as of the end of day `as_of`; spend dated after it is ignored.
    pub fn pace(&self, input: &PacingInput, as_of: NaiveDate) -> StratumResult<PacingReport> {
        validate(input)?;

        let days_total = (input.flight_end - input.flight_start).num_days() + 1;
        let spent: f64 = input
            .spend
            .iter()
            .filter(|s| s.date <= as_of)
            .map(|s| s.amount)
            .sum();

        if as_of < input.flight_start {
            return Ok(PacingReport {
                as_of,
                days_total,
                days_elapsed: 0,
                spent,
                expected_spend: 0.0,
                pacing_ratio: 0.0,
                status: PacingStatus::NotStarted,
                projected_spend: spent,
                recommended_daily: (input.budget - spent).max(0.0) / days_total as f64,
            });
        }

        let days_elapsed = ((as_of - input.flight_start).num_days() + 1).min(days_total);
        let expected_spend = input.budget * days_elapsed as f64 / days_total as f64;
        let pacing_ratio = spent / expected_spend;

        let status = if spent >= input.budget {
            PacingStatus::Exhausted
        } else if pacing_ratio > 1.0 + self.tolerance {
            PacingStatus::Overspending
        } else if pacing_ratio < 1.0 - self.tolerance {
            PacingStatus::Underspending
        } else {
            PacingStatus::OnTrack
        };

        let days_remaining = days_total - days_elapsed;
        let recommended_daily = if days_remaining > 0 {
            (input.budget - spent).max(0.0) / days_remaining as f64
        } else {
            0.0
        };

        Ok(PacingReport {
            as_of,
            days_total,
            days_elapsed,
            spent,
            expected_spend,
            pacing_ratio,
            status,
            projected_spend: spent / days_elapsed as f64 * days_total as f64,
            recommended_daily,
        })
    }
}

fn validate(input: &PacingInput) -> StratumResult<()> {
    let mut problems = Vec::new();
    if !input.budget.is_finite() || input.budget <= 0.0 {
        problems.push("budget must be a positive number".to_string());
    }
    if input.flight_end < input.flight_start {
        problems.push("flight_end must not be before flight_start".to_string());
    }
    if input.spend.iter().any(|s| !s.amount.is_finite() || s.amount < 0.0) {
        problems.push("spend amounts must be non-negative numbers".to_string());
    }
    if problems.is_empty() {
        Ok(())
    } else {
        Err(StratumError::Validation(problems))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
