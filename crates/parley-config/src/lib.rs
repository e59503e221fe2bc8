//! Multi-tier TOML configuration for Parley.
//!
//! Reads configuration from multiple sources with precedence:
//! CLI flags > env vars > config file > defaults

use parley_context::{BudgetConfig, HistoryConfig};
use parley_types::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The default system instruction sent with every request.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str =
    "You are a helpful assistant. Answer clearly and concisely.";

/// Resolved configuration for a Parley deployment.
#[derive(Debug, Clone)]
pub struct ParleyConfig {
    pub budget: BudgetConfig,
    pub history: HistoryConfig,
    pub system_instruction: String,
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
}

/// Settings that can be read from a TOML config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub budget: BudgetSettings,
    #[serde(default)]
    pub history: HistorySettings,
    #[serde(default)]
    pub chat: ChatSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BudgetSettings {
    pub max_context_tokens: Option<u64>,
    pub response_reserve_tokens: Option<u64>,
    pub system_prompt_tokens: Option<u64>,
    pub max_message_tokens: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistorySettings {
    pub recent_turn_limit: Option<usize>,
    pub fetch_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatSettings {
    pub system_instruction: Option<String>,
    pub data_dir: Option<PathBuf>,
}

/// CLI overrides that take highest precedence.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub max_context_tokens: Option<u64>,
    pub response_reserve_tokens: Option<u64>,
    pub system_prompt_tokens: Option<u64>,
    pub data_dir: Option<PathBuf>,
}

impl ParleyConfig {
    /// Load configuration from all sources, applying precedence rules.
    ///
    /// Precedence (highest to lowest):
    /// 1. CLI flags
    /// 2. Environment variables
    /// 3. Config file (~/.parley/config.toml)
    /// 4. Defaults
    pub fn load(overrides: CliOverrides) -> Result<Self, ConfigError> {
        let config_dir = config_dir();
        let settings = load_settings_file(&config_dir.join("config.toml"))?;
        Self::resolve(overrides, settings, config_dir, |key| std::env::var(key).ok())
    }

    /// Resolve a configuration from explicit sources. `env` looks up an
    /// environment variable by name.
    pub fn resolve(
        overrides: CliOverrides,
        settings: SettingsFile,
        config_dir: PathBuf,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let env_u64 = |key: &str| -> Result<Option<u64>, ConfigError> {
            match env(key) {
                Some(raw) => raw.trim().parse::<u64>().map(Some).map_err(|e| {
                    ConfigError::InvalidValue {
                        key: key.to_string(),
                        message: format!("'{raw}' is not a token count: {e}"),
                    }
                }),
                None => Ok(None),
            }
        };

        let defaults = BudgetConfig::default();
        let budget = BudgetConfig {
            max_context_tokens: overrides
                .max_context_tokens
                .or(env_u64("PARLEY_MAX_CONTEXT_TOKENS")?)
                .or(settings.budget.max_context_tokens)
                .unwrap_or(defaults.max_context_tokens),
            response_reserve_tokens: overrides
                .response_reserve_tokens
                .or(env_u64("PARLEY_RESPONSE_RESERVE_TOKENS")?)
                .or(settings.budget.response_reserve_tokens)
                .unwrap_or(defaults.response_reserve_tokens),
            system_prompt_tokens: overrides
                .system_prompt_tokens
                .or(env_u64("PARLEY_SYSTEM_PROMPT_TOKENS")?)
                .or(settings.budget.system_prompt_tokens)
                .unwrap_or(defaults.system_prompt_tokens),
            max_message_tokens: env_u64("PARLEY_MAX_MESSAGE_TOKENS")?
                .or(settings.budget.max_message_tokens)
                .unwrap_or(defaults.max_message_tokens),
        };

        let history_defaults = HistoryConfig::default();
        let history = HistoryConfig {
            recent_turn_limit: settings
                .history
                .recent_turn_limit
                .unwrap_or(history_defaults.recent_turn_limit),
            fetch_timeout_ms: settings
                .history
                .fetch_timeout_ms
                .or(history_defaults.fetch_timeout_ms),
        };

        let system_instruction = settings
            .chat
            .system_instruction
            .unwrap_or_else(|| DEFAULT_SYSTEM_INSTRUCTION.to_string());

        let data_dir = overrides
            .data_dir
            .or(settings.chat.data_dir)
            .unwrap_or_else(|| config_dir.clone());

        let config = ParleyConfig {
            budget,
            history,
            system_instruction,
            config_dir,
            data_dir,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let budget = &self.budget;
        if budget.response_reserve_tokens >= budget.max_context_tokens {
            return Err(ConfigError::InvalidValue {
                key: "budget.response_reserve_tokens".into(),
                message: format!(
                    "reserve ({}) must be smaller than max_context_tokens ({})",
                    budget.response_reserve_tokens, budget.max_context_tokens
                ),
            });
        }
        if budget.system_prompt_tokens >= budget.effective_budget() {
            return Err(ConfigError::InvalidValue {
                key: "budget.system_prompt_tokens".into(),
                message: format!(
                    "system allowance ({}) leaves no room in the effective budget ({})",
                    budget.system_prompt_tokens,
                    budget.effective_budget()
                ),
            });
        }
        if budget.max_message_tokens == 0 {
            return Err(ConfigError::InvalidValue {
                key: "budget.max_message_tokens".into(),
                message: "must be greater than zero".into(),
            });
        }
        if self.history.recent_turn_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "history.recent_turn_limit".into(),
                message: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

/// Get the Parley config directory path (~/.parley/).
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("PARLEY_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".parley")
}

/// Load and parse a TOML settings file. A missing or unreadable file yields
/// defaults; a file that does not parse is an error.
fn load_settings_file(path: &Path) -> Result<SettingsFile, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to read {}: {}", path.display(), e);
            }
            return Ok(SettingsFile::default());
        }
    };
    toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.message().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn resolve_with(
        overrides: CliOverrides,
        settings: SettingsFile,
        env: HashMap<&'static str, &'static str>,
    ) -> Result<ParleyConfig, ConfigError> {
        ParleyConfig::resolve(overrides, settings, PathBuf::from("/tmp/parley"), |key| {
            env.get(key).map(|v| v.to_string())
        })
    }

    #[test]
    fn test_defaults() {
        let config = ParleyConfig::resolve(
            CliOverrides::default(),
            SettingsFile::default(),
            PathBuf::from("/tmp/parley"),
            no_env,
        )
        .unwrap();
        assert_eq!(config.budget.max_context_tokens, 24_000);
        assert_eq!(config.budget.response_reserve_tokens, 4_000);
        assert_eq!(config.budget.system_prompt_tokens, 50);
        assert_eq!(config.budget.max_message_tokens, 15_000);
        assert_eq!(config.history.recent_turn_limit, 100);
        assert_eq!(config.history.fetch_timeout_ms, None);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/parley"));
        assert_eq!(config.system_instruction, DEFAULT_SYSTEM_INSTRUCTION);
    }

    #[test]
    fn test_settings_toml_parse() {
        let toml_str = r#"
[budget]
max_context_tokens = 32000
response_reserve_tokens = 2000

[history]
recent_turn_limit = 40
fetch_timeout_ms = 1500

[chat]
system_instruction = "Answer in French."
data_dir = "/var/lib/parley"
"#;
        let settings: SettingsFile = toml::from_str(toml_str).unwrap();
        let config = resolve_with(CliOverrides::default(), settings, HashMap::new()).unwrap();
        assert_eq!(config.budget.max_context_tokens, 32_000);
        assert_eq!(config.budget.effective_budget(), 30_000);
        assert_eq!(config.history.recent_turn_limit, 40);
        assert_eq!(config.history.fetch_timeout_ms, Some(1500));
        assert_eq!(config.system_instruction, "Answer in French.");
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/parley"));
    }

    #[test]
    fn test_precedence_cli_over_env_over_file() {
        let settings: SettingsFile = toml::from_str(
            r#"
[budget]
max_context_tokens = 10000
system_prompt_tokens = 80
"#,
        )
        .unwrap();
        let env = HashMap::from([
            ("PARLEY_MAX_CONTEXT_TOKENS", "12000"),
            ("PARLEY_SYSTEM_PROMPT_TOKENS", "60"),
        ]);
        let overrides = CliOverrides {
            max_context_tokens: Some(16_000),
            ..CliOverrides::default()
        };
        let config = resolve_with(overrides, settings, env).unwrap();
        assert_eq!(config.budget.max_context_tokens, 16_000);
        assert_eq!(config.budget.system_prompt_tokens, 60);
    }

    #[test]
    fn test_invalid_env_value() {
        let env = HashMap::from([("PARLEY_MAX_MESSAGE_TOKENS", "lots")]);
        let err = resolve_with(CliOverrides::default(), SettingsFile::default(), env).unwrap_err();
        match err {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "PARLEY_MAX_MESSAGE_TOKENS"),
            other => panic!("expected InvalidValue, got: {other:?}"),
        }
    }

    #[test]
    fn test_reserve_must_leave_room() {
        let overrides = CliOverrides {
            max_context_tokens: Some(4_000),
            ..CliOverrides::default()
        };
        let err = resolve_with(overrides, SettingsFile::default(), HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("response_reserve_tokens"));
    }

    #[test]
    fn test_missing_sections_default() {
        let settings: SettingsFile = toml::from_str("[chat]\n").unwrap();
        assert!(settings.budget.max_context_tokens.is_none());
        assert!(settings.history.recent_turn_limit.is_none());
    }

    #[test]
    fn test_unparseable_file_is_a_parse_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[budget\nmax_context_tokens = ").unwrap();
        match load_settings_file(&path) {
            Err(ConfigError::Parse { path: reported, .. }) => {
                assert_eq!(reported, path.display().to_string());
            }
            other => panic!("expected Parse error, got: {other:?}"),
        }
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let settings = load_settings_file(&tmp.path().join("config.toml")).unwrap();
        assert!(settings.budget.max_context_tokens.is_none());
        assert!(settings.chat.system_instruction.is_none());
    }
}
