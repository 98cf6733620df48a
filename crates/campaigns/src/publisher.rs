//! Ad platform publishers. Each publisher translates an approved draft into
//! the platform's campaign API.

use crate::accounts::AdAccount;
use crate::draft::CampaignDraft;
use std::collections::HashMap;
use std::sync::Arc;
use stratum_core::Platform;
use tracing::debug;

/// Trait for ad platform publishing clients.
pub trait CampaignPublisher: Send + Sync {
    fn platform(&self) -> Platform;

    /// Create the campaign on the platform and return its platform-side id.
    fn publish(&self, draft: &CampaignDraft, account: &AdAccount) -> Result<String, anyhow::Error>;
}

/// Publisher that simulates a platform round-trip.
pub struct SimulatedPublisher {
    platform: Platform,
    fail_with: Option<String>,
}

impl SimulatedPublisher {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            fail_with: None,
        }
    }

    /// A publisher whose every call is rejected with `message`.
    pub fn failing(platform: Platform, message: impl Into<String>) -> Self {
        Self {
            platform,
            fail_with: Some(message.into()),
        }
    }
}

impl CampaignPublisher for SimulatedPublisher {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn publish(&self, draft: &CampaignDraft, account: &AdAccount) -> Result<String, anyhow::Error> {
        debug!(
            platform = %self.platform,
            draft_id = %draft.id,
            account = %account.external_id,
            creatives = draft.creatives.len(),
            "Publishing campaign"
        );

        // In production: POST to the platform's campaign + ad set + ad endpoints
        if let Some(message) = &self.fail_with {
            anyhow::bail!("{} rejected the campaign: {}", self.platform, message);
        }

        let simple = draft.id.simple().to_string();
        Ok(format!("{}_{}_{}", self.platform, account.external_id, &simple[..12]))
    }
}

/// Maps each platform to the publisher responsible for it.
#[derive(Clone, Default)]
pub struct PublisherRegistry {
    publishers: HashMap<Platform, Arc<dyn CampaignPublisher>>,
}

impl PublisherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a simulated publisher for every supported platform.
    pub fn simulated() -> Self {
        let mut registry = Self::new();
        for platform in Platform::ALL {
            registry.register(Arc::new(SimulatedPublisher::new(platform)));
        }
        registry
    }

    pub fn register(&mut self, publisher: Arc<dyn CampaignPublisher>) {
        self.publishers.insert(publisher.platform(), publisher);
    }

    pub fn get(&self, platform: Platform) -> Option<Arc<dyn CampaignPublisher>> {
        self.publishers.get(&platform).cloned()
    }
}
