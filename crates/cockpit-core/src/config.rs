//! Cockpit configuration.
//!
//! Precedence: env `COCKPIT_CONFIG` path > `config/cockpit.toml` > defaults, then
//! `COCKPIT__*` environment overrides. Secrets never live in the file; see [`Secrets`].
//!
//! | Env | Default | Description |
//! |-----|---------|-------------|
//! | OPENAI_API_KEY | unset | Assistant provider key. |
//! | COCKPIT_SERVICE_KEY | unset | Service credential for the change-proposal endpoint. |
//! | COCKPIT_ONBOARDING_NUDGES | true | Append the next-step reminder to ordinary replies. |

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

fn default_app_name() -> String {
    "Cockpit".to_string()
}

fn default_bind_addr() -> String {
    "127.0.0.1:8010".to_string()
}

fn default_storage_path() -> String {
    "./data/cockpit".to_string()
}

fn default_provider_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_run_deadline_secs() -> u64 {
    120
}

fn default_thread_idle_secs() -> i64 {
    3600
}

fn default_dedup_window_secs() -> i64 {
    180
}

fn default_dedup_scan_limit() -> usize {
    10
}

fn default_recent_inputs_limit() -> usize {
    5
}

fn default_file_listing_limit() -> usize {
    20
}

fn default_short_word_limit() -> usize {
    60
}

fn default_persona_label() -> String {
    "Cockpit copilot".to_string()
}

/// Runtime configuration shared by the core pipeline and the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Directory for the sled database.
    #[serde(default = "default_storage_path")]
    pub storage_path: String,
    /// Directory for daily rolling log files. Unset: stdout only.
    #[serde(default)]
    pub log_dir: Option<String>,
    #[serde(default = "default_provider_base_url")]
    pub provider_base_url: String,
    /// Model used when the request does not carry `modelId`. Unset: the assistant's own model.
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_run_deadline_secs")]
    pub run_deadline_secs: u64,
    #[serde(default = "default_thread_idle_secs")]
    pub thread_idle_secs: i64,
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: i64,
    #[serde(default = "default_dedup_scan_limit")]
    pub dedup_scan_limit: usize,
    #[serde(default = "default_recent_inputs_limit")]
    pub recent_inputs_limit: usize,
    #[serde(default = "default_file_listing_limit")]
    pub file_listing_limit: usize,
    #[serde(default = "default_short_word_limit")]
    pub short_word_limit: usize,
    /// Base URL of the autonomy service that receives proposed change-sets.
    #[serde(default)]
    pub autonomy_endpoint: Option<String>,
    #[serde(default = "default_persona_label")]
    pub persona_label: String,
    #[serde(default = "default_true")]
    pub onboarding_nudges: bool,
}

fn default_true() -> bool {
    true
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            bind_addr: default_bind_addr(),
            storage_path: default_storage_path(),
            log_dir: None,
            provider_base_url: default_provider_base_url(),
            default_model: None,
            poll_interval_ms: default_poll_interval_ms(),
            run_deadline_secs: default_run_deadline_secs(),
            thread_idle_secs: default_thread_idle_secs(),
            dedup_window_secs: default_dedup_window_secs(),
            dedup_scan_limit: default_dedup_scan_limit(),
            recent_inputs_limit: default_recent_inputs_limit(),
            file_listing_limit: default_file_listing_limit(),
            short_word_limit: default_short_word_limit(),
            autonomy_endpoint: None,
            persona_label: default_persona_label(),
            onboarding_nudges: true,
        }
    }
}

impl CoreConfig {
    /// Load config from file and environment, then apply `.env` toggles.
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("COCKPIT_CONFIG").unwrap_or_else(|_| "config/cockpit".to_string());
        let builder = config::Config::builder()
            .set_default("app_name", default_app_name())?
            .set_default("bind_addr", default_bind_addr())?
            .set_default("storage_path", default_storage_path())?;

        let path = Path::new(&config_path);
        let with_ext = path.with_extension("toml");
        let builder = if path.exists() {
            builder.add_source(config::File::from(path))
        } else if with_ext.exists() {
            builder.add_source(config::File::from(with_ext.as_path()))
        } else {
            builder
        };

        let built = builder
            .add_source(config::Environment::with_prefix("COCKPIT").separator("__"))
            .build()?;

        let mut cfg: Self = built.try_deserialize()?;
        cfg.onboarding_nudges = env_bool("COCKPIT_ONBOARDING_NUDGES", cfg.onboarding_nudges);
        Ok(cfg)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }

    pub fn run_deadline(&self) -> Duration {
        Duration::from_secs(self.run_deadline_secs.max(1))
    }

    pub fn thread_idle(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.thread_idle_secs)
    }

    pub fn dedup_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.dedup_window_secs)
    }
}

/// Credentials read from the environment only.
#[derive(Clone, Default)]
pub struct Secrets {
    pub provider_api_key: Option<String>,
    pub service_key: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Self {
        Self {
            provider_api_key: env_opt_string("OPENAI_API_KEY"),
            service_key: env_opt_string("COCKPIT_SERVICE_KEY"),
        }
    }
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("provider_api_key", &self.provider_api_key.as_ref().map(|_| "<set>"))
            .field("service_key", &self.service_key.as_ref().map(|_| "<set>"))
            .finish()
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) if v.trim().is_empty() => default,
        Ok(v) => v.trim().eq_ignore_ascii_case("true") || v.trim() == "1",
        Err(_) => default,
    }
}

fn env_opt_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
