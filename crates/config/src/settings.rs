//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use voice_chat_core::{Role, RoleRegistry};

use crate::constants::{endpoints, playback};
use crate::roles::{default_roles, DEFAULT_ROLE};
use crate::{
    AgentSettings, ConfigError, PlaybackSettings, RecognitionSettings, SynthesisSettings,
    VadSettings,
};

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    /// Command surface
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub vad: VadSettings,

    #[serde(default)]
    pub recognition: RecognitionSettings,

    #[serde(default)]
    pub agent: AgentSettings,

    #[serde(default)]
    pub synthesis: SynthesisSettings,

    #[serde(default)]
    pub playback: PlaybackSettings,

    /// Completed-turn log
    #[serde(default)]
    pub conversation_log: ConversationLogConfig,

    /// Role selected at startup
    #[serde(default = "default_role")]
    pub default_role: String,

    /// Role table; replaces the built-in table when set
    #[serde(default = "default_roles")]
    pub roles: Vec<Role>,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

fn default_role() -> String {
    DEFAULT_ROLE.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            environment: RuntimeEnvironment::default(),
            server: ServerConfig::default(),
            vad: VadSettings::default(),
            recognition: RecognitionSettings::default(),
            agent: AgentSettings::default(),
            synthesis: SynthesisSettings::default(),
            playback: PlaybackSettings::default(),
            conversation_log: ConversationLogConfig::default(),
            default_role: default_role(),
            roles: default_roles(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_vad()?;
        self.validate_playback()?;
        self.validate_recognition()?;
        self.validate_roles()?;
        Ok(())
    }

    /// Build the role registry from the configured table
    pub fn role_registry(&self) -> Result<RoleRegistry, ConfigError> {
        RoleRegistry::new(self.roles.clone()).map_err(|e| ConfigError::InvalidValue {
            field: "roles".to_string(),
            message: e.to_string(),
        })
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "Port cannot be 0".to_string(),
            });
        }
        Ok(())
    }

    fn validate_vad(&self) -> Result<(), ConfigError> {
        let vad = &self.vad;

        if vad.frame_duration_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "vad.frame_duration_ms".to_string(),
                message: "Frame duration must be at least 1ms".to_string(),
            });
        }

        if !(vad.silence_duration_secs > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "vad.silence_duration_secs".to_string(),
                message: format!("Must be positive, got {}", vad.silence_duration_secs),
            });
        }

        if vad.debounce_frames == 0 {
            return Err(ConfigError::InvalidValue {
                field: "vad.debounce_frames".to_string(),
                message: "Debounce must be at least 1 frame".to_string(),
            });
        }

        if !(vad.silence_threshold >= 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "vad.silence_threshold".to_string(),
                message: format!("Must be non-negative, got {}", vad.silence_threshold),
            });
        }

        if vad.max_analysis_bytes < 2 {
            return Err(ConfigError::InvalidValue {
                field: "vad.max_analysis_bytes".to_string(),
                message: "Must cover at least one 16-bit sample".to_string(),
            });
        }

        Ok(())
    }

    fn validate_playback(&self) -> Result<(), ConfigError> {
        let poll = self.playback.poll_interval_ms;
        if poll == 0 || poll > playback::MAX_POLL_INTERVAL_MS {
            return Err(ConfigError::InvalidValue {
                field: "playback.poll_interval_ms".to_string(),
                message: format!(
                    "Must be between 1 and {}ms, got {}",
                    playback::MAX_POLL_INTERVAL_MS,
                    poll
                ),
            });
        }

        if self.playback.max_item_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "playback.max_item_ms".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.playback.player_command.is_empty() {
            return Err(ConfigError::MissingField(
                "playback.player_command".to_string(),
            ));
        }

        Ok(())
    }

    fn validate_recognition(&self) -> Result<(), ConfigError> {
        let recognition = &self.recognition;

        if recognition.watchdog_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "recognition.watchdog_interval_secs".to_string(),
                message: "Watchdog interval must be at least 1 second".to_string(),
            });
        }

        if recognition.heartbeat_interval_secs == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "recognition.heartbeat_interval_secs".to_string(),
                message: "Use null to disable heartbeats instead of 0".to_string(),
            });
        }

        if recognition.max_consecutive_send_errors == 0 {
            return Err(ConfigError::InvalidValue {
                field: "recognition.max_consecutive_send_errors".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        Ok(())
    }

    fn validate_roles(&self) -> Result<(), ConfigError> {
        if self.roles.is_empty() {
            return Err(ConfigError::MissingField("roles".to_string()));
        }

        let mut seen = HashSet::new();
        for role in &self.roles {
            if !seen.insert(role.id.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: "roles".to_string(),
                    message: format!("Duplicate role id '{}'", role.id),
                });
            }
        }

        if !seen.contains(self.default_role.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "default_role".to_string(),
                message: format!("Unknown role '{}'", self.default_role),
            });
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Allowed CORS origins; empty (or all invalid) falls back to http://localhost:3000
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    endpoints::SERVER_PORT
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

/// Completed-turn log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationLogConfig {
    /// Write one JSON file per turn; in-memory only when false
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_log_directory")]
    pub directory: String,
}

fn default_true() -> bool {
    true
}
fn default_log_directory() -> String {
    "conversations".to_string()
}

impl Default for ConversationLogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: default_log_directory(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

/// Load settings from `config/` and the environment
///
/// Priority: env vars > config/{env} > config/default > defaults
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    load_settings_from(Path::new("config"), env)
}

/// Load settings from a specific config directory
pub fn load_settings_from(dir: &Path, env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::from(dir.join("default")).required(false));

    if let Some(env_name) = env {
        builder = builder.add_source(File::from(dir.join(env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("VOICE_CHAT")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 51001);
        assert_eq!(settings.default_role, "libai");
        assert_eq!(settings.roles.len(), 6);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_poll_interval_validation() {
        let mut settings = Settings::default();
        settings.playback.poll_interval_ms = 800;
        assert!(settings.validate().is_err());

        settings.playback.poll_interval_ms = 500;
        assert!(settings.validate().is_ok());

        settings.playback.max_item_ms = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_vad_validation() {
        let mut settings = Settings::default();
        settings.vad.frame_duration_ms = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.vad.silence_duration_secs = 0.0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.vad.debounce_frames = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_unknown_default_role_rejected() {
        let mut settings = Settings::default();
        settings.default_role = "ghost".to_string();
        let err = settings.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "default_role"));
    }

    #[test]
    fn test_duplicate_roles_rejected() {
        let mut settings = Settings::default();
        settings.roles.push(Role::new("libai", "again", "v"));
        assert!(settings.validate().is_err());
        assert!(settings.role_registry().is_err());
    }

    #[test]
    fn test_load_settings_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.yaml"),
            "server:\n  port: 9000\nvad:\n  silence_threshold: 5\n  silence_duration_secs: 1.0\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("staging.yaml"),
            "default_role: storyteller\n",
        )
        .unwrap();

        let settings = load_settings_from(dir.path(), Some("staging")).unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.vad.silence_threshold, 5.0);
        assert_eq!(settings.vad.silence_frame_limit(), 20);
        assert_eq!(settings.default_role, "storyteller");
        // Untouched sections keep their defaults
        assert_eq!(settings.vad.debounce_frames, 3);
        assert_eq!(settings.roles.len(), 6);
    }

    #[test]
    fn test_missing_directory_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from(&dir.path().join("absent"), None).unwrap();
        assert_eq!(settings.server.port, 51001);
    }
}
