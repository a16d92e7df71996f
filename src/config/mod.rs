// Engine configuration - tempo defaults, device settings and timing knobs
// Persisted as RON under the user's config directory

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Ron(#[from] ron::error::SpannedError),

    #[error("failed to write configuration: {0}")]
    Serialize(#[from] ron::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Initial tempo in quarter notes per minute
    pub bpm: f64,

    /// Initial beats in a bar
    pub biab: u32,

    /// MIDI channel (1..=16) for newly opened outputs
    pub default_channel: u8,

    /// Print played groups on stdout
    pub echo: bool,

    /// Time given to a freshly started input before subscribers are added
    pub input_grace_ms: u64,

    /// Sleep between two reads of an idle input
    pub input_poll_ms: u64,

    /// How early the next loop span is planned before it sounds
    pub loop_lookahead_ms: u64,

    /// Name announced to the host MIDI system
    pub client_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            biab: 4,
            default_channel: 1,
            echo: false,
            input_grace_ms: 200,
            input_poll_ms: 2,
            loop_lookahead_ms: 100,
            client_name: "melokit".to_string(),
        }
    }
}

impl EngineConfig {
    /// `<config dir>/melokit/engine.ron`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("melokit").join("engine.ron"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: EngineConfig = ron::from_str(&text)?;
        config.validate()?;
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Load from the default path; fall back to defaults when missing or broken
    pub fn load_or_default() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), "using default configuration: {}", e);
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.bpm > 0.0 && self.bpm.is_finite()) {
            return Err(ConfigError::Invalid(format!("bpm must be positive, got {}", self.bpm)));
        }
        if self.biab == 0 {
            return Err(ConfigError::Invalid("biab must be at least 1".to_string()));
        }
        if !(1..=16).contains(&self.default_channel) {
            return Err(ConfigError::Invalid(format!(
                "default_channel must be in 1..=16, got {}",
                self.default_channel
            )));
        }
        if self.input_poll_ms == 0 {
            return Err(ConfigError::Invalid("input_poll_ms must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bpm, 120.0);
        assert_eq!(config.input_grace_ms, 200);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("engine.ron");
        let config = EngineConfig {
            bpm: 96.0,
            echo: true,
            default_channel: 10,
            ..EngineConfig::default()
        };

        config.save(&path).unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engine.ron");
        fs::write(&path, "(bpm: 90.0)").unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.bpm, 90.0);
        assert_eq!(config.biab, 4);
        assert_eq!(config.client_name, "melokit");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let bad_channel = EngineConfig {
            default_channel: 17,
            ..EngineConfig::default()
        };
        assert!(matches!(bad_channel.validate(), Err(ConfigError::Invalid(_))));

        let bad_bpm = EngineConfig {
            bpm: 0.0,
            ..EngineConfig::default()
        };
        assert!(bad_bpm.validate().is_err());
    }

    #[test]
    fn test_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engine.ron");
        fs::write(&path, "(bpm: ").unwrap();
        assert!(matches!(EngineConfig::load(&path), Err(ConfigError::Ron(_))));
    }
}
