//! Configuration management.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// How results are delivered to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseMode {
    /// Events and the final result are flushed as an SSE stream.
    #[default]
    Streaming,
    /// Everything is buffered into one JSON body.
    Immediate,
}

impl ResponseMode {
    pub fn from_json_response(json_response: bool) -> Self {
        if json_response {
            Self::Immediate
        } else {
            Self::Streaming
        }
    }
}

/// How request session ids map to sessions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum SessionPolicy {
    /// One process-lifetime session shared by every request.
    Single,
    /// One session per client, created on first contact.
    #[default]
    PerClient,
}

/// Configuration structure that matches the TOML file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ServerConfig {
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default)]
    json_response: bool,
    #[serde(default)]
    session_mode: SessionPolicy,
    #[serde(default = "default_keep_alive_secs")]
    keep_alive_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            json_response: false,
            session_mode: SessionPolicy::default(),
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct LoggingConfig {
    /// Path to log file (if set, logs will be written to file in addition to stdout)
    log_file: Option<PathBuf>,
    /// Log level (trace, debug, info, warn, error)
    /// If not set, uses RUST_LOG environment variable or defaults to "info"
    log_level: Option<String>,
}

fn default_port() -> u16 {
    streamhttp_types::DEFAULT_PORT
}

fn default_keep_alive_secs() -> u64 {
    15
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port to listen on
    pub port: u16,
    /// JSON bodies or SSE streams
    pub response_mode: ResponseMode,
    /// Single global session or one per client
    pub session_policy: SessionPolicy,
    /// Interval between SSE keep-alive comments
    pub keep_alive: Duration,
    /// Path to log file (if set, logs will be written to file in addition to stdout)
    pub log_file: Option<PathBuf>,
    /// Log level (if set, overrides RUST_LOG environment variable)
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with full priority chain: CLI args > env vars > config files > defaults.
    ///
    /// Config files are searched in this order:
    /// 1. `config.toml` in user config directory (~/.config/streamhttp/ on Linux)
    /// 2. `.streamhttp.toml` in current directory
    ///
    /// Environment variables use the `STREAMHTTP_` prefix with `__` between
    /// section and key, e.g. `STREAMHTTP_SERVER__PORT=8080`.
    pub fn from_figment(
        port: Option<u16>,
        json_response: Option<bool>,
        session_mode: Option<SessionPolicy>,
        log_level: Option<String>,
        log_file: Option<PathBuf>,
    ) -> anyhow::Result<Self> {
        let local_config = std::env::current_dir()
            .ok()
            .map(|d| d.join(".streamhttp.toml"));
        let user_config = directories::ProjectDirs::from("", "", "streamhttp")
            .map(|dirs| dirs.config_dir().join("config.toml"));

        // Build figment with priority: defaults < user config < local config < env vars < CLI args
        let mut figment = Figment::new().merge(Serialized::defaults(ConfigFile::default()));

        if let Some(ref path) = user_config {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }

        if let Some(ref path) = local_config {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }

        figment = figment.merge(Env::prefixed("STREAMHTTP_").split("__"));

        if let Some(p) = port {
            figment = figment.merge(Serialized::default("server.port", p));
        }
        if let Some(json) = json_response {
            figment = figment.merge(Serialized::default("server.json_response", json));
        }
        if let Some(mode) = session_mode {
            figment = figment.merge(Serialized::default("server.session_mode", mode));
        }
        if let Some(ref level) = log_level {
            figment = figment.merge(Serialized::default("logging.log_level", level));
        }
        if let Some(ref file) = log_file {
            figment = figment.merge(Serialized::default("logging.log_file", file));
        }

        let config_file: ConfigFile = figment.extract()?;
        Ok(Self::from_file(config_file))
    }

    fn from_file(file: ConfigFile) -> Self {
        Self {
            port: file.server.port,
            response_mode: ResponseMode::from_json_response(file.server.json_response),
            session_policy: file.server.session_mode,
            keep_alive: Duration::from_secs(file.server.keep_alive_secs.max(1)),
            log_file: file.logging.log_file,
            log_level: file.logging.log_level,
        }
    }

    pub fn with_response_mode(mut self, mode: ResponseMode) -> Self {
        self.response_mode = mode;
        self
    }

    pub fn with_session_policy(mut self, policy: SessionPolicy) -> Self {
        self.session_policy = policy;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_file(ConfigFile::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    fn clear_env() {
        for key in [
            "STREAMHTTP_SERVER__PORT",
            "STREAMHTTP_SERVER__JSON_RESPONSE",
            "STREAMHTTP_SERVER__SESSION_MODE",
            "STREAMHTTP_LOGGING__LOG_LEVEL",
        ] {
            std::env::remove_var(key);
        }
    }

    /// Run `f` with the working directory set to `dir`.
    fn in_dir<T>(dir: &TempDir, f: impl FnOnce() -> T) -> T {
        let original_dir = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir).unwrap();
        let result = f();
        // Restore (ignore errors)
        let _ = std::env::set_current_dir(original_dir);
        result
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.response_mode, ResponseMode::Streaming);
        assert_eq!(config.session_policy, SessionPolicy::PerClient);
        assert_eq!(config.keep_alive, Duration::from_secs(15));
        assert!(config.log_level.is_none());
    }

    #[test]
    #[serial]
    fn test_from_figment_defaults() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let config = in_dir(&temp_dir, || {
            Config::from_figment(None, None, None, None, None).unwrap()
        });

        assert_eq!(config.port, streamhttp_types::DEFAULT_PORT);
        assert_eq!(config.response_mode, ResponseMode::Streaming);
    }

    #[test]
    #[serial]
    fn test_from_figment_config_file() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let config_content = r#"
[server]
port = 7777
json_response = true
session_mode = "single"

[logging]
log_level = "debug"
"#;
        fs::write(temp_dir.path().join(".streamhttp.toml"), config_content).unwrap();

        let config = in_dir(&temp_dir, || {
            Config::from_figment(None, None, None, None, None).unwrap()
        });

        assert_eq!(config.port, 7777);
        assert_eq!(config.response_mode, ResponseMode::Immediate);
        assert_eq!(config.session_policy, SessionPolicy::Single);
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    #[serial]
    fn test_from_figment_env_vars_override_config_file() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join(".streamhttp.toml"),
            "[server]\nport = 7777",
        )
        .unwrap();

        std::env::set_var("STREAMHTTP_SERVER__PORT", "8888");
        std::env::set_var("STREAMHTTP_SERVER__JSON_RESPONSE", "true");
        let config = in_dir(&temp_dir, || {
            Config::from_figment(None, None, None, None, None).unwrap()
        });
        clear_env();

        assert_eq!(config.port, 8888);
        assert_eq!(config.response_mode, ResponseMode::Immediate);
    }

    #[test]
    #[serial]
    fn test_from_figment_cli_overrides_env_and_config() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join(".streamhttp.toml"),
            "[server]\nport = 7777\njson_response = true",
        )
        .unwrap();

        std::env::set_var("STREAMHTTP_SERVER__PORT", "8888");
        let config = in_dir(&temp_dir, || {
            Config::from_figment(
                Some(9999),
                Some(false),
                Some(SessionPolicy::Single),
                Some("warn".to_string()),
                None,
            )
            .unwrap()
        });
        clear_env();

        assert_eq!(config.port, 9999);
        assert_eq!(config.response_mode, ResponseMode::Streaming);
        assert_eq!(config.session_policy, SessionPolicy::Single);
        assert_eq!(config.log_level.as_deref(), Some("warn"));
    }
}
