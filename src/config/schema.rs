use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::security::{normalize_action, ACTION_CONVERSATION_START, ACTION_MESSAGE};

const CONFIG_DIR_ENV: &str = "REHEARSAL_CONFIG_DIR";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Upper bound for every `*_secs` setting (ten years).
pub const MAX_DURATION_SECS: u64 = 10 * 365 * 86_400;

/// Seconds from config as a chrono duration, clamped to [`MAX_DURATION_SECS`].
pub fn duration_from_secs(secs: u64) -> chrono::Duration {
    i64::try_from(secs.min(MAX_DURATION_SECS))
        .map_or(chrono::Duration::zero(), chrono::Duration::seconds)
}

// ── Top-level config ──────────────────────────────────────────────

/// Top-level configuration, loaded from `config.toml`.
///
/// Resolution order: `--config-dir` → `REHEARSAL_CONFIG_DIR` → `~/.rehearsal/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to config.toml - computed at load time, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Conversation lifetimes and history sizes (`[sessions]`).
    #[serde(default)]
    pub sessions: SessionsConfig,

    /// Admission policies keyed by action kind (`[rate_limits.<action>]`).
    #[serde(default = "default_rate_limits")]
    pub rate_limits: BTreeMap<String, RatePolicyConfig>,

    /// Reply generation budget and input limits (`[generation]`).
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Caller identity derivation (`[identity]`).
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Persona catalog source (`[personas]`).
    #[serde(default)]
    pub personas: PersonasConfig,

    /// Logging (`[observability]`).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = default_config_dir().unwrap_or_else(|_| PathBuf::from(".rehearsal"));
        Self {
            config_path: config_dir.join(CONFIG_FILE_NAME),
            sessions: SessionsConfig::default(),
            rate_limits: default_rate_limits(),
            generation: GenerationConfig::default(),
            identity: IdentityConfig::default(),
            personas: PersonasConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

// ── Sessions ──────────────────────────────────────────────────────

/// Conversation store configuration (`[sessions]` section).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionsConfig {
    /// Seconds between reaper passes. Default: `1800`.
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,
    /// Idle seconds before an active conversation is abandoned. Default: `7200`.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Idle seconds before a conversation of any status is dropped. Default: `86400`.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    /// Seconds an ended conversation stays readable. Default: `5`.
    #[serde(default = "default_end_grace_secs")]
    pub end_grace_secs: u64,
    /// Turns returned by history lookups without an explicit limit. Default: `20`.
    #[serde(default = "default_history_limit")]
    pub default_history_limit: usize,
    /// Turns handed to the reply generator. Default: `16`.
    #[serde(default = "default_reply_history_limit")]
    pub reply_history_limit: usize,
}

fn default_reap_interval_secs() -> u64 {
    1800
}

fn default_idle_timeout_secs() -> u64 {
    7200
}

fn default_retention_secs() -> u64 {
    86_400
}

fn default_end_grace_secs() -> u64 {
    5
}

fn default_history_limit() -> usize {
    20
}

fn default_reply_history_limit() -> usize {
    16
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            reap_interval_secs: default_reap_interval_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            retention_secs: default_retention_secs(),
            end_grace_secs: default_end_grace_secs(),
            default_history_limit: default_history_limit(),
            reply_history_limit: default_reply_history_limit(),
        }
    }
}

// ── Rate limits ───────────────────────────────────────────────────

/// One admission policy (`[rate_limits.<action>]`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RatePolicyConfig {
    pub limit: u32,
    #[serde(default = "default_rate_window_secs")]
    pub window_secs: u64,
}

fn default_rate_window_secs() -> u64 {
    3600
}

fn default_rate_limits() -> BTreeMap<String, RatePolicyConfig> {
    BTreeMap::from([
        (
            ACTION_MESSAGE.to_string(),
            RatePolicyConfig {
                limit: 100,
                window_secs: default_rate_window_secs(),
            },
        ),
        (
            ACTION_CONVERSATION_START.to_string(),
            RatePolicyConfig {
                limit: 10,
                window_secs: default_rate_window_secs(),
            },
        ),
    ])
}

// ── Generation ────────────────────────────────────────────────────

/// Reply generation configuration (`[generation]` section).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenerationConfig {
    /// Hard budget for one generator call before the fallback reply is used. Default: `30`.
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    /// Longest accepted user message, in characters. Default: `500`.
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
}

fn default_generation_timeout_secs() -> u64 {
    30
}

fn default_max_message_chars() -> usize {
    500
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_generation_timeout_secs(),
            max_message_chars: default_max_message_chars(),
        }
    }
}

// ── Identity / personas / observability ──────────────────────────

/// Caller identity configuration (`[identity]` section).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentityConfig {
    /// Honour `X-Forwarded-For` / `X-Real-IP`. Only enable behind a trusted proxy.
    #[serde(default)]
    pub trust_forwarded_headers: bool,
}

/// Persona catalog configuration (`[personas]` section).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersonasConfig {
    /// JSON catalog file. `~` is expanded. Unset means the built-in cast.
    #[serde(default)]
    pub catalog_path: Option<String>,
}

impl PersonasConfig {
    pub fn resolved_catalog_path(&self) -> Option<PathBuf> {
        self.catalog_path
            .as_deref()
            .map(str::trim)
            .filter(|path| !path.is_empty())
            .map(|path| PathBuf::from(shellexpand::tilde(path).into_owned()))
    }
}

/// Logging configuration (`[observability]` section).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObservabilityConfig {
    /// Default filter when `RUST_LOG` is unset. Default: `"info"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// `"full"` or `"compact"`. Default: `"full"`.
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "full".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────

fn default_config_dir() -> Result<PathBuf> {
    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .context("Could not find home directory")?;
    Ok(home.join(".rehearsal"))
}

fn resolve_config_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(expand_path(dir));
    }
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(shellexpand::tilde(dir.trim()).into_owned()));
        }
    }
    default_config_dir()
}

fn expand_path(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(text) => PathBuf::from(shellexpand::tilde(text).into_owned()),
        None => path.to_path_buf(),
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl Config {
    /// Load `config.toml` from the resolved directory, writing defaults first
    /// when it does not exist yet.
    pub async fn load_or_init(config_dir: Option<&Path>) -> Result<Self> {
        let config_dir = resolve_config_dir(config_dir)?;
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        fs::create_dir_all(&config_dir).await.with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let initialized = !config_path.exists();
        let mut config = if initialized {
            let config = Config {
                config_path: config_path.clone(),
                ..Config::default()
            };
            config.save().await?;
            config
        } else {
            let contents = fs::read_to_string(&config_path)
                .await
                .context("Failed to read config file")?;
            let mut config = Config::from_toml(&contents)?;
            config.config_path = config_path.clone();
            config
        };

        config.apply_env_overrides();
        config.validate()?;
        tracing::info!(
            path = %config.config_path.display(),
            initialized,
            "Config loaded"
        );
        Ok(config)
    }

    /// Parse a config document. Rate-limit keys are normalised so
    /// `conversation-start` and `conversation_start` name one policy, and
    /// the document's policies are merged over the default set.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(contents).context("Failed to parse config file")?;
        let mut rate_limits = default_rate_limits();
        rate_limits.extend(
            config
                .rate_limits
                .into_iter()
                .map(|(action, policy)| (normalize_action(&action), policy)),
        );
        config.rate_limits = rate_limits;
        Ok(config)
    }

    /// Validate values that would otherwise fail at arbitrary runtime points.
    pub fn validate(&self) -> Result<()> {
        let s = &self.sessions;
        if s.reap_interval_secs == 0 {
            anyhow::bail!("sessions.reap_interval_secs must be greater than 0");
        }
        if s.idle_timeout_secs == 0 {
            anyhow::bail!("sessions.idle_timeout_secs must be greater than 0");
        }
        if s.retention_secs < s.idle_timeout_secs {
            anyhow::bail!(
                "sessions.retention_secs ({}) must be at least sessions.idle_timeout_secs ({})",
                s.retention_secs,
                s.idle_timeout_secs
            );
        }
        if s.default_history_limit == 0 {
            anyhow::bail!("sessions.default_history_limit must be greater than 0");
        }
        for (key, secs) in [
            ("reap_interval_secs", s.reap_interval_secs),
            ("idle_timeout_secs", s.idle_timeout_secs),
            ("retention_secs", s.retention_secs),
            ("end_grace_secs", s.end_grace_secs),
        ] {
            if secs > MAX_DURATION_SECS {
                anyhow::bail!("sessions.{key} must be at most {MAX_DURATION_SECS}");
            }
        }

        for (action, policy) in &self.rate_limits {
            if action.trim().is_empty() {
                anyhow::bail!("rate_limits keys must not be empty");
            }
            if policy.limit == 0 {
                anyhow::bail!("rate_limits.{action}.limit must be greater than 0");
            }
            if policy.window_secs == 0 {
                anyhow::bail!("rate_limits.{action}.window_secs must be greater than 0");
            }
            if policy.window_secs > MAX_DURATION_SECS {
                anyhow::bail!(
                    "rate_limits.{action}.window_secs must be at most {MAX_DURATION_SECS}"
                );
            }
        }

        if self.generation.timeout_secs == 0 {
            anyhow::bail!("generation.timeout_secs must be greater than 0");
        }
        if self.generation.timeout_secs > MAX_DURATION_SECS {
            anyhow::bail!("generation.timeout_secs must be at most {MAX_DURATION_SECS}");
        }
        if self.generation.max_message_chars == 0 {
            anyhow::bail!("generation.max_message_chars must be greater than 0");
        }

        if !matches!(self.observability.log_format.as_str(), "full" | "compact") {
            anyhow::bail!(
                "observability.log_format must be \"full\" or \"compact\" (got {:?})",
                self.observability.log_format
            );
        }

        Ok(())
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        if let Some(secs) = env_u64("REHEARSAL_IDLE_TIMEOUT_SECS") {
            self.sessions.idle_timeout_secs = secs;
        }
        if let Some(secs) = env_u64("REHEARSAL_RETENTION_SECS") {
            self.sessions.retention_secs = secs;
        }
        if let Some(secs) = env_u64("REHEARSAL_REAP_INTERVAL_SECS") {
            self.sessions.reap_interval_secs = secs;
        }
        if let Some(secs) = env_u64("REHEARSAL_GENERATION_TIMEOUT_SECS") {
            self.generation.timeout_secs = secs;
        }

        if let Ok(level) = std::env::var("REHEARSAL_LOG_LEVEL") {
            if !level.trim().is_empty() {
                self.observability.log_level = level.trim().to_string();
            }
        }

        if let Ok(path) = std::env::var("REHEARSAL_PERSONAS") {
            if !path.trim().is_empty() {
                self.personas.catalog_path = Some(path.trim().to_string());
            }
        }
    }

    /// Write the config atomically next to its final location.
    pub async fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;

        let parent_dir = self
            .config_path
            .parent()
            .context("Config path must have a parent directory")?;
        fs::create_dir_all(parent_dir).await.with_context(|| {
            format!(
                "Failed to create config directory: {}",
                parent_dir.display()
            )
        })?;

        let file_name = self
            .config_path
            .file_name()
            .and_then(|v| v.to_str())
            .unwrap_or(CONFIG_FILE_NAME);
        let temp_path = parent_dir.join(format!(".{file_name}.tmp-{}", uuid::Uuid::new_v4()));

        let mut temp_file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to create temporary config file: {}",
                    temp_path.display()
                )
            })?;
        temp_file
            .write_all(toml_str.as_bytes())
            .await
            .context("Failed to write temporary config contents")?;
        temp_file
            .sync_all()
            .await
            .context("Failed to fsync temporary config file")?;
        drop(temp_file);

        if let Err(e) = fs::rename(&temp_path, &self.config_path).await {
            let _ = fs::remove_file(&temp_path).await;
            anyhow::bail!("Failed to atomically replace config file: {e}");
        }
        Ok(())
    }
}
