use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `STRATUM__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub rules: RulesConfig,
    #[serde(default)]
    pub attribution: AttributionConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default functions
fn default_node_id() -> String {
    "stratum-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_enabled() -> bool {
    true
}
fn default_metrics_port() -> u16 {
    9091
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            rules: RulesConfig::default(),
            attribution: AttributionConfig::default(),
            pacing: PacingConfig::default(),
            whatsapp: WhatsAppConfig::default(),
        }
    }
}

// ─── Rules Config ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct RulesConfig {
    #[serde(default = "default_max_cooldown_hours")]
    pub max_cooldown_hours: u32,
    /// Trigger history entries retained per rule.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_max_cooldown_hours() -> u32 { 720 }
fn default_history_limit() -> usize { 500 }

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            max_cooldown_hours: default_max_cooldown_hours(),
            history_limit: default_history_limit(),
        }
    }
}

// ─── Attribution Config ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct AttributionConfig {
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    #[serde(default = "default_half_life_days")]
    pub time_decay_half_life_days: f64,
    #[serde(default = "default_max_shapley_channels")]
    pub max_shapley_channels: usize,
}

fn default_lookback_days() -> u32 { 30 }
fn default_half_life_days() -> f64 { 7.0 }
fn default_max_shapley_channels() -> usize { 12 }

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
            time_decay_half_life_days: default_half_life_days(),
            max_shapley_channels: default_max_shapley_channels(),
        }
    }
}

// ─── Pacing Config ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct PacingConfig {
    /// Allowed relative deviation from the linear spend curve before a
    /// campaign counts as under- or overspending.
    #[serde(default = "default_pacing_tolerance")]
    pub tolerance: f64,
}

fn default_pacing_tolerance() -> f64 { 0.10 }

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            tolerance: default_pacing_tolerance(),
        }
    }
}

// ─── WhatsApp Config ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct WhatsAppConfig {
    #[serde(default = "default_whatsapp_api_base")]
    pub api_base_url: String,
    #[serde(default)]
    pub phone_number_id: String,
    #[serde(default)]
    pub access_token: String,
}

fn default_whatsapp_api_base() -> String { "https://graph.facebook.com/v19.0".to_string() }

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_whatsapp_api_base(),
            phone_number_id: String::new(),
            access_token: String::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("STRATUM")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Reject settings the engines cannot work with.
    pub fn validate(&self) -> crate::StratumResult<()> {
        let mut problems = Vec::new();
        if self.attribution.time_decay_half_life_days <= 0.0 {
            problems.push("attribution.time_decay_half_life_days must be positive".to_string());
        }
        if self.attribution.max_shapley_channels == 0 || self.attribution.max_shapley_channels > 20 {
            problems.push("attribution.max_shapley_channels must be within 1..=20".to_string());
        }
        if !(0.0..1.0).contains(&self.pacing.tolerance) {
            problems.push("pacing.tolerance must be within [0, 1)".to_string());
        }
        if self.rules.history_limit == 0 {
            problems.push("rules.history_limit must be at least 1".to_string());
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(crate::StratumError::Validation(problems))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert_eq!(config.api.http_port, 8080);
        assert_eq!(config.attribution.max_shapley_channels, 12);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_collects_every_problem() {
        let mut config = AppConfig::default();
        config.attribution.time_decay_half_life_days = 0.0;
        config.pacing.tolerance = 1.5;
        match config.validate() {
            Err(crate::StratumError::Validation(problems)) => assert_eq!(problems.len(), 2),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"api": {"http_port": 9000}, "rules": {"history_limit": 10}}"#)
                .unwrap();
        assert_eq!(config.api.http_port, 9000);
        assert_eq!(config.api.host, "0.0.0.0");
        assert_eq!(config.rules.history_limit, 10);
        assert_eq!(config.rules.max_cooldown_hours, 720);
    }
}
