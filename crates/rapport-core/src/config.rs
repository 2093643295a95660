use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::EngineError;

/// Top-level Rapport configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
}

/// Core engagement-engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Conversation history window per user.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// Idle seconds after which a new inbound message restarts onboarding.
    #[serde(default = "default_idle_reset_secs")]
    pub idle_reset_secs: u64,
    /// The completion signal ending an onboarding cycle.
    #[serde(default = "default_completion_keyword")]
    pub completion_keyword: String,
    /// Invite link substituted into welcome/reminder templates.
    #[serde(default = "default_group_link")]
    pub group_link: String,
    /// Statements shorter than this never enter the ring buffer.
    #[serde(default = "default_min_statement_len")]
    pub min_statement_len: usize,
    /// Timeout for completion-capability calls, in seconds.
    #[serde(default = "default_completion_timeout_secs")]
    pub completion_timeout_secs: u64,
    /// Evolve personality traits every N inbound messages.
    #[serde(default = "default_trait_evolve_every")]
    pub trait_evolve_every: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            idle_reset_secs: default_idle_reset_secs(),
            completion_keyword: default_completion_keyword(),
            group_link: default_group_link(),
            min_statement_len: default_min_statement_len(),
            completion_timeout_secs: default_completion_timeout_secs(),
            trait_evolve_every: default_trait_evolve_every(),
        }
    }
}

/// Provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider")]
    pub default: String,
    pub openai: Option<OpenAiConfig>,
    pub ollama: Option<OllamaConfig>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            default: default_provider(),
            openai: None,
            ollama: None,
        }
    }
}

/// OpenAI-compatible provider config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
}

/// Ollama local provider config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,
    #[serde(default = "default_ollama_model")]
    pub model: String,
}

/// Channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelConfig {
    pub console: Option<ConsoleConfig>,
}

/// Console (stdin/stdout) channel config, for local runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Memory config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// Follow-up scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Base delay before the first reminder, in seconds.
    #[serde(default = "default_followup1_secs")]
    pub followup1_secs: u64,
    #[serde(default = "default_followup2_secs")]
    pub followup2_secs: u64,
    #[serde(default = "default_followup3_secs")]
    pub followup3_secs: u64,
    /// Jitter applied to every base delay, ± this many seconds.
    #[serde(default = "default_jitter_secs")]
    pub jitter_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: default_poll_interval(),
            followup1_secs: default_followup1_secs(),
            followup2_secs: default_followup2_secs(),
            followup3_secs: default_followup3_secs(),
            jitter_secs: default_jitter_secs(),
        }
    }
}

/// Chunking and pacing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Replies at or below this length are sent as a single part.
    #[serde(default = "default_single_part_max")]
    pub single_part_max: usize,
    /// Modeled typing speed, characters per second.
    #[serde(default = "default_chars_per_sec")]
    pub chars_per_sec: u32,
    /// Typing-speed jitter, ± percent.
    #[serde(default = "default_jitter_pct")]
    pub jitter_pct: u32,
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Fixed pause before any part after the first.
    #[serde(default = "default_gap_ms")]
    pub inter_message_gap_ms: u64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            single_part_max: default_single_part_max(),
            chars_per_sec: default_chars_per_sec(),
            jitter_pct: default_jitter_pct(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            inter_message_gap_ms: default_gap_ms(),
        }
    }
}

// --- Default value functions ---

fn default_history_window() -> usize {
    10
}
fn default_idle_reset_secs() -> u64 {
    300
}
fn default_completion_keyword() -> String {
    "DONE".to_string()
}
fn default_group_link() -> String {
    "https://chat.example.com/invite".to_string()
}
fn default_min_statement_len() -> usize {
    12
}
fn default_completion_timeout_secs() -> u64 {
    10
}
fn default_trait_evolve_every() -> u64 {
    10
}
fn default_provider() -> String {
    "openai".to_string()
}
fn default_true() -> bool {
    true
}
fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_ollama_model() -> String {
    "llama3".to_string()
}
fn default_db_path() -> String {
    "~/.rapport/rapport.db".to_string()
}
fn default_poll_interval() -> u64 {
    5
}
fn default_followup1_secs() -> u64 {
    120
}
fn default_followup2_secs() -> u64 {
    300
}
fn default_followup3_secs() -> u64 {
    600
}
fn default_jitter_secs() -> u64 {
    30
}
fn default_single_part_max() -> usize {
    500
}
fn default_chars_per_sec() -> u32 {
    18
}
fn default_jitter_pct() -> u32 {
    30
}
fn default_min_delay_ms() -> u64 {
    800
}
fn default_max_delay_ms() -> u64 {
    7000
}
fn default_gap_ms() -> u64 {
    1500
}

/// Expand `~` to the home directory.
pub fn shellexpand(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return format!("{}/{rest}", home.to_string_lossy());
        }
    }
    path.to_string()
}

/// Load configuration from a TOML file.
///
/// Falls back to defaults if the file does not exist.
pub fn load(path: &str) -> Result<Config, EngineError> {
    let path = Path::new(path);
    if !path.exists() {
        tracing::info!("config file not found at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| EngineError::Config(format!("failed to read {}: {e}", path.display())))?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| EngineError::Config(format!("failed to parse config: {e}")))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.history_window, 10);
        assert_eq!(cfg.idle_reset_secs, 300);
        assert_eq!(cfg.completion_keyword, "DONE");
        assert_eq!(cfg.completion_timeout_secs, 10);
    }

    #[test]
    fn test_scheduler_defaults_match_stage_ladder() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.followup1_secs, 120);
        assert_eq!(cfg.followup2_secs, 300);
        assert_eq!(cfg.followup3_secs, 600);
        assert_eq!(cfg.jitter_secs, 30);
    }

    #[test]
    fn test_engine_config_from_toml_partial() {
        let toml_str = r#"
            history_window = 6
            completion_keyword = "READY"
        "#;
        let cfg: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.history_window, 6);
        assert_eq!(cfg.completion_keyword, "READY");
        // Unspecified fields fall back to defaults.
        assert_eq!(cfg.idle_reset_secs, 300);
    }

    #[test]
    fn test_full_config_from_toml() {
        let toml_str = r#"
            [engine]
            group_link = "https://chat.example.com/abc"

            [scheduler]
            poll_interval_secs = 1

            [chunking]
            single_part_max = 280

            [provider]
            default = "ollama"

            [provider.ollama]
            enabled = true
            model = "llama3"
        "#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.engine.group_link, "https://chat.example.com/abc");
        assert_eq!(cfg.scheduler.poll_interval_secs, 1);
        assert_eq!(cfg.chunking.single_part_max, 280);
        assert_eq!(cfg.provider.default, "ollama");
        assert!(cfg.provider.ollama.unwrap().enabled);
    }

    #[test]
    fn test_shellexpand_home() {
        std::env::set_var("HOME", "/home/tester");
        assert_eq!(shellexpand("~/data/db"), "/home/tester/data/db");
        assert_eq!(shellexpand("/abs/path"), "/abs/path");
    }
}
