use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{AftercareError, Result};

/// Top-level configuration for the Aftercare service.
///
/// Loaded from `~/.aftercare/config.toml` by default. Each section corresponds
/// to one stage of the turn pipeline or a cross-cutting concern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AftercareConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub turn: TurnConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub services: ServicesConfig,
}

impl AftercareConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AftercareConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration, falling back to defaults if the file is missing or invalid.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| AftercareError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding the session database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// HTTP port (bound on 127.0.0.1).
    pub port: u16,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.aftercare/data".to_string(),
            log_level: "info".to_string(),
            port: 3030,
        }
    }
}

/// Intent classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Number of prior messages handed to the classifier.
    pub history_window: usize,
    /// Confidence below which an intent is ambiguous. Unset: never ambiguous.
    pub min_confidence: Option<f32>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            history_window: 3,
            min_confidence: None,
        }
    }
}

/// Capability routing and handler tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Visual confidence at which a defect counts as confirmed.
    pub defect_confidence_threshold: f32,
    /// Exchange candidates returned per turn.
    pub exchange_top_n: usize,
    /// Candidates scoring below this are not offered.
    pub exchange_min_similarity: f32,
    /// Policy snippets fetched for general inquiries.
    pub policy_top_k: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            defect_confidence_threshold: 0.75,
            exchange_top_n: 3,
            exchange_min_similarity: 0.0,
            policy_top_k: 2,
        }
    }
}

/// Turn timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    /// Overall budget for all external calls of one turn.
    pub turn_timeout_ms: u64,
    /// Budget for a single adapter attempt.
    pub call_timeout_ms: u64,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            turn_timeout_ms: 8000,
            call_timeout_ms: 3000,
        }
    }
}

/// Adapter retry policy (transient failures only).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 100,
            max_backoff_ms: 2000,
            multiplier: 2.0,
        }
    }
}

/// Human handoff policy.
///
/// Thresholds are policy values with no built-in numbers; an unset threshold
/// disables its trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Escalate once failed resolution attempts exceed this count.
    pub max_failed_resolutions: Option<u32>,
    /// Consecutive low-confidence turns that force a handoff.
    pub low_confidence_turns: u32,
    /// Orders above this total are handed to a human.
    pub high_value_order_limit: Option<f64>,
    /// Refunds above this amount need human approval. When set, refunds
    /// for orders whose total is unknown need approval too.
    pub refund_auto_approve_limit: Option<f64>,
    /// Escalate once more than this many turns in a row resolve nothing.
    pub max_turns_without_resolution: Option<u32>,
    /// Phrases (case-insensitive) that trigger an immediate handoff.
    pub keywords: Vec<String>,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            max_failed_resolutions: None,
            low_confidence_turns: 2,
            high_value_order_limit: None,
            refund_auto_approve_limit: None,
            max_turns_without_resolution: None,
            keywords: Vec::new(),
        }
    }
}

/// Session lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sessions idle longer than this are closed by the sweeper.
    pub inactivity_timeout_minutes: u64,
    pub sweep_interval_secs: u64,
    /// Maximum accepted message length in characters.
    pub max_message_length: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_minutes: 60,
            sweep_interval_secs: 60,
            max_message_length: 2000,
        }
    }
}

/// External service endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub order_url: Option<String>,
    pub image_url: Option<String>,
    pub index_url: Option<String>,
    pub payments_url: Option<String>,
    /// Hosts customer image links may point at. Empty means only inline
    /// `data:` images are accepted.
    pub image_hosts: Vec<String>,
    /// Largest image accepted, after decoding or download.
    pub max_image_bytes: usize,
    /// Use scripted in-process services instead of HTTP endpoints.
    pub demo: bool,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            order_url: None,
            image_url: None,
            index_url: None,
            payments_url: None,
            image_hosts: Vec::new(),
            max_image_bytes: 8 * 1024 * 1024,
            demo: false,
        }
    }
}

impl ServicesConfig {
    /// True when every HTTP endpoint is configured.
    pub fn is_complete(&self) -> bool {
        self.order_url.is_some()
            && self.image_url.is_some()
            && self.index_url.is_some()
            && self.payments_url.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = AftercareConfig::default();
        assert_eq!(config.general.data_dir, "~/.aftercare/data");
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.classifier.history_window, 3);
        assert!(config.classifier.min_confidence.is_none());
        assert_eq!(config.routing.exchange_top_n, 3);
        assert_eq!(config.turn.turn_timeout_ms, 8000);
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.escalation.low_confidence_turns, 2);
        assert!(!config.services.demo);
        assert!(config.services.image_hosts.is_empty());
        assert_eq!(config.services.max_image_bytes, 8 * 1024 * 1024);
    }

    #[test]
    fn test_escalation_thresholds_unset_by_default() {
        let config = EscalationConfig::default();
        assert!(config.max_failed_resolutions.is_none());
        assert!(config.high_value_order_limit.is_none());
        assert!(config.refund_auto_approve_limit.is_none());
        assert!(config.max_turns_without_resolution.is_none());
        assert!(config.keywords.is_empty());
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[general]
port = 8080

[classifier]
history_window = 5
min_confidence = 0.5

[escalation]
max_failed_resolutions = 2
refund_auto_approve_limit = 500.0
keywords = ["lawyer", "chargeback"]

max_turns_without_resolution = 6

[services]
order_url = "http://orders.local"
image_hosts = ["uploads.shop.example"]
"#;
        let file = create_temp_config(content);
        let config = AftercareConfig::load(file.path()).unwrap();
        assert_eq!(config.general.port, 8080);
        assert_eq!(config.classifier.history_window, 5);
        assert_eq!(config.classifier.min_confidence, Some(0.5));
        assert_eq!(config.escalation.max_failed_resolutions, Some(2));
        assert_eq!(config.escalation.refund_auto_approve_limit, Some(500.0));
        assert_eq!(config.escalation.keywords.len(), 2);
        assert_eq!(config.services.order_url.as_deref(), Some("http://orders.local"));
        assert_eq!(config.services.image_hosts, vec!["uploads.shop.example"]);
        assert_eq!(config.services.max_image_bytes, 8 * 1024 * 1024);
        assert!(!config.services.is_complete());
        assert_eq!(config.escalation.max_turns_without_resolution, Some(6));
        // Untouched sections keep defaults
        assert_eq!(config.turn.call_timeout_ms, 3000);
    }

    #[test]
    fn test_load_invalid_toml() {
        let file = create_temp_config("[general\nport = ");
        let result = AftercareConfig::load(file.path());
        assert!(matches!(result, Err(AftercareError::Config(_))));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = AftercareConfig::load_or_default(Path::new("/nonexistent/config.toml"));
        assert_eq!(config.general.data_dir, "~/.aftercare/data");
    }

    #[test]
    fn test_save_creates_parent_dirs_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AftercareConfig::default();
        config.escalation.max_failed_resolutions = Some(3);
        config.save(&path).unwrap();

        let reloaded = AftercareConfig::load(&path).unwrap();
        assert_eq!(reloaded.escalation.max_failed_resolutions, Some(3));
        assert_eq!(reloaded.retry.multiplier, 2.0);
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let config: AftercareConfig = toml::from_str("").unwrap();
        assert_eq!(config.session.inactivity_timeout_minutes, 60);
        assert_eq!(config.routing.defect_confidence_threshold, 0.75);
    }

    #[test]
    fn test_services_complete() {
        let services = ServicesConfig {
            order_url: Some("http://a".into()),
            image_url: Some("http://b".into()),
            index_url: Some("http://c".into()),
            payments_url: Some("http://d".into()),
            ..Default::default()
        };
        assert!(services.is_complete());
    }
}
