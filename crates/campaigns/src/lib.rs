//! Campaign builder backend — draft lifecycle, ad-account connectors, and
//! publishing to ad platforms.
//!
//! Data stored in DashMap; every lookup is scoped by tenant.

pub mod accounts;
pub mod draft;
pub mod publisher;
pub mod service;
pub mod store;

pub use accounts::{AdAccount, AdAccountStore};
pub use draft::{CampaignDraft, DraftAction, DraftStatus};
pub use publisher::{CampaignPublisher, PublisherRegistry, SimulatedPublisher};
pub use service::DraftService;
pub use store::DraftStore;
