//! Shared configuration, error taxonomy, and tenant-scoped identifiers used
//! by every Stratum crate.

pub mod config;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use error::{StratumError, StratumResult};
pub use types::{EntityKind, EntityRef, Page, Platform, TenantId};
