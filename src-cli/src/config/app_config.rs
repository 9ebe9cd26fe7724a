//! Runtime configuration loaded from the environment.

use std::time::Duration;

use anyhow::anyhow;
use niimbot::{ModelProfile, SessionConfig};

use super::validation::validate_setting;

/// Keys read by [`AppConfig::load`].
pub const KEYS: &[&str] = &[
    "NIIMBOT_MODEL",
    "NIIMBOT_DENSITY",
    "NIIMBOT_QUANTITY",
    "NIIMBOT_SCAN_TIMEOUT",
    "NIIMBOT_COMMAND_TIMEOUT",
    "NIIMBOT_CLOUD_LOOKUP",
    "DRY_RUN_MODE",
];

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub model: String,
    /// Explicit density; the model's default when unset.
    pub density: Option<u8>,
    pub quantity: u16,
    pub scan_timeout: Duration,
    pub command_timeout: Duration,
    pub cloud_lookup: bool,
    pub dry_run_mode: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: "d110".into(),
            density: None,
            quantity: 1,
            scan_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(10),
            cloud_lookup: true,
            dry_run_mode: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, anyhow::Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Empty values fall back to defaults; set
    /// values must pass validation.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, anyhow::Error> {
        let mut values = std::collections::HashMap::new();
        for &key in KEYS {
            let Some(value) = get(key).map(|v| v.trim().to_string()) else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            validate_setting(key, &value).map_err(|e| anyhow!("invalid {key}={value:?}: {e}"))?;
            values.insert(key, value);
        }
        let g = |key: &str| values.get(key).map(String::as_str).unwrap_or_default();

        let defaults = Self::default();
        Ok(Self {
            model: {
                let m = g("NIIMBOT_MODEL");
                if m.is_empty() { defaults.model } else { m.to_ascii_lowercase() }
            },
            density: g("NIIMBOT_DENSITY").parse().ok(),
            quantity: parse_or(g("NIIMBOT_QUANTITY"), defaults.quantity),
            scan_timeout: Duration::from_secs(parse_or(g("NIIMBOT_SCAN_TIMEOUT"), 5)),
            command_timeout: Duration::from_secs(parse_or(g("NIIMBOT_COMMAND_TIMEOUT"), 10)),
            cloud_lookup: g("NIIMBOT_CLOUD_LOOKUP") != "false",
            dry_run_mode: g("DRY_RUN_MODE") == "true",
        })
    }

    /// Profile for the configured model. Unknown names fall back to the
    /// generic profile with a warning.
    pub fn model_profile(&self) -> &'static ModelProfile {
        if !ModelProfile::is_known(&self.model) {
            tracing::warn!(
                model = %self.model,
                known = ?ModelProfile::known_models(),
                "Unknown printer model, using generic profile"
            );
        }
        ModelProfile::lookup(&self.model)
    }

    /// Print density: the configured value, else the model's default.
    pub fn density(&self) -> u8 {
        self.density
            .unwrap_or_else(|| ModelProfile::lookup(&self.model).default_density)
    }

    /// Session timings for this configuration.
    pub fn session_config(&self) -> SessionConfig {
        let config = SessionConfig::new()
            .with_scan_timeout(self.scan_timeout)
            .with_command_timeout(self.command_timeout);
        if self.dry_run_mode {
            config.with_settle_delay(Duration::ZERO)
        } else {
            config
        }
    }
}

fn parse_or<T: std::str::FromStr>(s: &str, default: T) -> T {
    if s.is_empty() {
        return default;
    }
    s.parse().unwrap_or(default)
}
