//! Configuration loading and validation for Colloquy.
//!
//! Loads configuration from `~/.colloquy/config.toml` with environment
//! variable overrides. Validates all settings at startup; CLI flags are
//! applied on top by the binary.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use colloquy_core::ConfigError;

/// The root configuration structure.
///
/// Maps directly to `~/.colloquy/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Generation backend: "http" (llama-server), "tensor", or "local"
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Completion endpoint for the HTTP backends
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Model checkpoint path (required by the local backend)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,

    /// Context window in tokens; bounds per-turn generation
    #[serde(default = "default_context_window")]
    pub context_window: usize,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens per generation turn
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Reasoning effort advertised in the system message: low/medium/high
    #[serde(default = "default_reasoning")]
    pub reasoning: String,

    /// Tool enablement and sandboxing
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Web search provider settings (used by the browser tool)
    #[serde(default)]
    pub search: SearchConfig,
}

fn default_backend() -> String {
    "http".into()
}
fn default_server_url() -> String {
    "http://127.0.0.1:8080/completion".into()
}
fn default_context_window() -> usize {
    8192
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> usize {
    4096
}
fn default_reasoning() -> String {
    "low".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Enable the browser (web search) tool
    #[serde(default)]
    pub browser: bool,

    /// Enable the python interpreter tool
    #[serde(default)]
    pub python: bool,

    /// Enable the apply_patch function
    #[serde(default)]
    pub apply_patch: bool,

    /// Container image for the python sandbox
    #[serde(default = "default_python_image")]
    pub python_image: String,

    /// Python runner: "docker" (containerized) or "native" (host python3,
    /// trusted environments only)
    #[serde(default = "default_python_runner")]
    pub python_runner: String,

    /// Wall-clock limit for one python invocation
    #[serde(default = "default_python_timeout")]
    pub python_timeout_secs: u64,

    /// Directory apply_patch resolves relative paths against.
    /// Defaults to the process working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,
}

fn default_python_image() -> String {
    "python:3.11".into()
}
fn default_python_runner() -> String {
    "docker".into()
}
fn default_python_timeout() -> u64 {
    120
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            browser: false,
            python: false,
            apply_patch: false,
            python_image: default_python_image(),
            python_runner: default_python_runner(),
            python_timeout_secs: default_python_timeout(),
            workspace_root: None,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Search API key. Also read from `EXA_API_KEY`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_search_base_url")]
    pub base_url: String,
}

fn default_search_base_url() -> String {
    "https://api.exa.ai".into()
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_search_base_url(),
        }
    }
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for SearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.colloquy/config.toml),
    /// then apply environment variable overrides:
    /// - `COLLOQUY_BACKEND`
    /// - `COLLOQUY_SERVER_URL`
    /// - `EXA_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if let Ok(backend) = std::env::var("COLLOQUY_BACKEND") {
            config.backend = backend;
        }
        if let Ok(url) = std::env::var("COLLOQUY_SERVER_URL") {
            config.server_url = url;
        }
        if config.search.api_key.is_none() {
            config.search.api_key = std::env::var("EXA_API_KEY").ok();
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path. A missing file yields
    /// defaults; a malformed one is an error.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".colloquy")
    }

    /// Validate the configuration. Called after file + env + CLI merging.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.backend.as_str() {
            "http" | "tensor" | "local" => {}
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "backend".into(),
                    reason: format!("'{other}' is not one of http, tensor, local"),
                });
            }
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidValue {
                field: "temperature".into(),
                reason: "must be between 0.0 and 2.0".into(),
            });
        }

        if self.context_window == 0 {
            return Err(ConfigError::InvalidValue {
                field: "context_window".into(),
                reason: "must be greater than zero".into(),
            });
        }

        if self.max_tokens > self.context_window {
            return Err(ConfigError::InvalidValue {
                field: "max_tokens".into(),
                reason: format!(
                    "must not exceed context_window ({})",
                    self.context_window
                ),
            });
        }

        match self.tools.python_runner.as_str() {
            "docker" | "native" => {}
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "tools.python_runner".into(),
                    reason: format!("'{other}' is not one of docker, native"),
                });
            }
        }

        match self.reasoning.as_str() {
            "low" | "medium" | "high" => {}
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "reasoning".into(),
                    reason: format!("'{other}' is not one of low, medium, high"),
                });
            }
        }

        if self.backend == "local" && self.checkpoint.is_none() {
            return Err(ConfigError::Missing(
                "checkpoint (required by the local backend)".into(),
            ));
        }

        Ok(())
    }

    /// Render the effective configuration as TOML (for `config show`).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            server_url: default_server_url(),
            checkpoint: None,
            context_window: default_context_window(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            reasoning: default_reasoning(),
            tools: ToolsConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.backend, "http");
        assert_eq!(config.server_url, "http://127.0.0.1:8080/completion");
        assert_eq!(config.context_window, 8192);
        assert!(!config.tools.python);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = config.to_toml();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.backend, config.backend);
        assert_eq!(parsed.server_url, config.server_url);
        assert_eq!(parsed.tools.python_timeout_secs, 120);
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.backend, "http");
    }

    #[test]
    fn malformed_config_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "backend = [not toml").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseFailed { .. }));
    }

    #[test]
    fn partial_config_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "temperature = 0.2\n[tools]\npython = true").unwrap();
        let config = AppConfig::load_from(file.path()).unwrap();
        assert!((config.temperature - 0.2).abs() < f32::EPSILON);
        assert!(config.tools.python);
        assert_eq!(config.backend, "http");
        assert_eq!(config.max_tokens, 4096);
    }

    #[test]
    fn invalid_backend_rejected() {
        let config = AppConfig {
            backend: "grpc".into(),
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_python_runner_rejected() {
        let mut config = AppConfig::default();
        config.tools.python_runner = "podman".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn local_backend_requires_checkpoint() {
        let config = AppConfig {
            backend: "local".into(),
            ..AppConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Missing(_))));

        let config = AppConfig {
            backend: "local".into(),
            checkpoint: Some("/models/model.gguf".into()),
            ..AppConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let config = AppConfig {
            search: SearchConfig {
                api_key: Some("exa-secret".into()),
                ..SearchConfig::default()
            },
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("exa-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
