#![warn(clippy::unwrap_used)]

pub mod campaign_rest;
pub mod error;
pub mod reporting_rest;
pub mod rest;
pub mod rules_rest;
pub mod server;
pub mod whatsapp_rest;

pub use rest::AppState;
pub use server::ApiServer;
