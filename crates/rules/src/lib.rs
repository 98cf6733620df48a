//! Rule automation engine — metric conditions, cooldown-gated firing, and
//! action execution with a per-rule trigger history.

pub mod actions;
pub mod engine;
pub mod evaluator;
pub mod types;

pub use actions::{ActionExecutor, InMemoryActionExecutor};
pub use engine::RuleEngine;
pub use evaluator::RuleEvaluator;
pub use types::*;
