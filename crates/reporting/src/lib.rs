//! Performance reporting — multi-touch revenue attribution and budget pacing.

pub mod attribution;
pub mod markov;
pub mod pacing;
pub mod shapley;

pub use attribution::{
    AttributionComparison, AttributionEngine, AttributionModel, AttributionSummary,
    ChannelAttribution, Journey, JourneyAttribution, Touchpoint,
};
pub use pacing::{BudgetPacer, DailySpend, PacingInput, PacingReport, PacingStatus};
