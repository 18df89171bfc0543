use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub webrtc: WebRTCConfig,
    pub signaling: SignalingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
    /// Allowed CORS origins; empty means any origin
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// WebRTC configuration for cast peer connections
///
/// Only STUN is supported. Peers behind symmetric NAT may fail to connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebRTCConfig {
    /// Public STUN server URLs
    pub stun_servers: Vec<String>,
    /// Maximum remote candidates held before a remote description arrives
    pub max_pending_candidates: usize,
    /// Capture audio together with the display when mirroring
    pub capture_audio: bool,
}

impl Default for WebRTCConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            max_pending_candidates: 256,
            capture_audio: true,
        }
    }
}

/// Signaling store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// Maximum number of live session documents (0 = unlimited)
    pub max_sessions: usize,
    /// Age after which terminal sessions are swept
    pub session_ttl_seconds: u64,
    /// Sweep interval
    pub cleanup_interval_seconds: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10_000,
            session_ttl_seconds: 3600, // 1 hour
            cleanup_interval_seconds: 60,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // DIMZTUBE_SERVER__HTTP_PORT, DIMZTUBE_LOGGING__LEVEL, ...
        builder = builder.add_source(
            Environment::with_prefix("DIMZTUBE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Get HTTP address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }

    /// Check the configuration and collect every problem found
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.http_port == 0 {
            errors.push("server.http_port must be non-zero".to_string());
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be 'json' or 'pretty', got '{}'",
                self.logging.format
            ));
        }
        if self.webrtc.stun_servers.is_empty() {
            errors.push("webrtc.stun_servers must list at least one server".to_string());
        }
        for url in &self.webrtc.stun_servers {
            if !url.starts_with("stun:") && !url.starts_with("stuns:") {
                errors.push(format!("webrtc.stun_servers entry '{url}' is not a stun: URL"));
            }
        }
        if self.webrtc.max_pending_candidates == 0 {
            errors.push("webrtc.max_pending_candidates must be non-zero".to_string());
        }
        if self.signaling.cleanup_interval_seconds == 0 {
            errors.push("signaling.cleanup_interval_seconds must be non-zero".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.http_port, 8080);
        assert_eq!(config.logging.format, "pretty");
        assert!(!config.webrtc.stun_servers.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_http_address() {
        let config = Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                http_port: 9000,
                cors_origins: Vec::new(),
            },
            ..Config::default()
        };

        assert_eq!(config.http_address(), "127.0.0.1:9000");
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut config = Config::default();
        config.server.http_port = 0;
        config.logging.format = "xml".to_string();
        config.webrtc.stun_servers = vec!["turn:relay.example.com".to_string()];

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_load_from_yaml_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            "server:\n  http_port: 9191\nsignaling:\n  max_sessions: 5\n"
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = Config::from_file(&path).unwrap();

        assert_eq!(config.server.http_port, 9191);
        assert_eq!(config.signaling.max_sessions, 5);
        // Untouched sections keep their defaults
        assert_eq!(config.logging.level, "info");
    }
}
