//! Configuration system for Fabula.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment -> explicit overrides.
//! Configuration is loaded from `~/.config/fabula/config.toml` and/or
//! `.fabula/config.toml` in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::language::Language;
use crate::voice::WavFormat;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FabulaConfig {
    /// Story language.
    #[serde(default)]
    pub language: Language,
    #[serde(default)]
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub illustration: IllustrationConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Configuration for the Google Gemini collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Inline API key. Takes precedence over `api_key_env`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Override for the REST base URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub chat_model: String,
    pub speech_model: String,
    /// Prebuilt voice for speech synthesis.
    pub speech_voice: String,
    /// Primary (high-fidelity) image model.
    pub image_model: String,
    /// Secondary image-capable chat model.
    pub fallback_image_model: String,
    /// Model that transcribes spoken input.
    pub transcription_model: String,
    /// Whole-request timeout in seconds.
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key_env: "GEMINI_API_KEY".to_string(),
            api_key: None,
            base_url: None,
            chat_model: "gemini-2.5-flash".to_string(),
            speech_model: "gemini-2.5-flash-preview-tts".to_string(),
            speech_voice: "Kore".to_string(),
            image_model: "imagen-4.0-generate-001".to_string(),
            fallback_image_model: "gemini-2.5-flash-image".to_string(),
            transcription_model: "gemini-2.5-flash".to_string(),
            timeout_secs: 120,
            connect_timeout_secs: 10,
        }
    }
}

/// PCM format the speech collaborator emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate_hz: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl AudioConfig {
    pub fn format(&self) -> WavFormat {
        WavFormat::new(self.sample_rate_hz, self.channels, self.bits_per_sample)
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        let format = WavFormat::default();
        Self {
            sample_rate_hz: format.sample_rate_hz,
            channels: format.channels,
            bits_per_sample: format.bits_per_sample,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IllustrationConfig {
    /// Placeholder image service used when every generator fails.
    pub placeholder_url: String,
    pub aspect_ratio: String,
    pub output_mime_type: String,
}

impl Default for IllustrationConfig {
    fn default() -> Self {
        Self {
            placeholder_url: "https://picsum.photos/800/600".to_string(),
            aspect_ratio: "1:1".to_string(),
            output_mime_type: "image/jpeg".to_string(),
        }
    }
}

/// Where saved stories live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Data directory (None = platform data dir).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    /// File stem of the saved story.
    pub story_key: String,
    /// How long the "saved" status is reported after a save.
    pub saved_indicator_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            story_key: "fabula-magica-story".to_string(),
            saved_indicator_secs: 2,
        }
    }
}

impl StorageConfig {
    /// The configured data directory, or the platform default.
    pub fn resolve_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }
}

/// Platform data directory, falling back to `.fabula` in the working
/// directory when no home directory can be determined.
pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "fabula", "fabula")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".fabula"))
}

impl FabulaConfig {
    /// Reject values the pipeline cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let audio = &self.audio;
        if audio.sample_rate_hz == 0 {
            return Err(ConfigError::Invalid {
                message: "audio.sample_rate_hz must be greater than zero".into(),
            });
        }
        if audio.channels == 0 {
            return Err(ConfigError::Invalid {
                message: "audio.channels must be greater than zero".into(),
            });
        }
        if audio.bits_per_sample == 0 || audio.bits_per_sample % 8 != 0 {
            return Err(ConfigError::Invalid {
                message: format!(
                    "audio.bits_per_sample must be a positive multiple of 8, got {}",
                    audio.bits_per_sample
                ),
            });
        }
        if self.storage.story_key.trim().is_empty() {
            return Err(ConfigError::Invalid {
                message: "storage.story_key must not be empty".into(),
            });
        }
        Ok(())
    }
}

/// Values set explicitly by the caller (e.g. CLI flags). Unset fields leave
/// the lower layers alone.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageOverrides>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StorageOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

/// Load configuration from all layers and validate it.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&ConfigOverrides>,
) -> Result<FabulaConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(FabulaConfig::default()));

    // User-level config
    if let Some(config_dir) = directories::ProjectDirs::from("dev", "fabula", "fabula") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    // Workspace-level config
    if let Some(ws) = workspace {
        let ws_config = ws.join(".fabula").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // Environment variables (FABULA_LANGUAGE, FABULA_GEMINI__CHAT_MODEL, etc.)
    figment = figment.merge(Env::prefixed("FABULA_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let config: FabulaConfig = figment.extract().map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })?;
    config.validate()?;
    Ok(config)
}

/// Check whether any Fabula configuration file exists (user-level or
/// workspace-level).
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if let Some(config_dir) = directories::ProjectDirs::from("dev", "fabula", "fabula") {
        if config_dir.config_dir().join("config.toml").exists() {
            return true;
        }
    }

    if let Some(ws) = workspace {
        if ws.join(".fabula").join("config.toml").exists() {
            return true;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = FabulaConfig::default();
        assert_eq!(config.language, Language::Pt);
        assert_eq!(config.gemini.chat_model, "gemini-2.5-flash");
        assert_eq!(config.gemini.api_key_env, "GEMINI_API_KEY");
        assert_eq!(config.audio.format(), WavFormat::new(24_000, 1, 16));
        assert_eq!(config.storage.story_key, "fabula-magica-story");
        assert_eq!(config.storage.saved_indicator_secs, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = FabulaConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: FabulaConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(deserialized, config);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: FabulaConfig = toml::from_str(
            r#"
            language = "es"

            [gemini]
            speech_voice = "Puck"
            "#,
        )
        .unwrap();
        assert_eq!(config.language, Language::Es);
        assert_eq!(config.gemini.speech_voice, "Puck");
        assert_eq!(config.gemini.chat_model, "gemini-2.5-flash");
        assert_eq!(config.audio.sample_rate_hz, 24_000);
    }

    #[test]
    fn test_validate_rejects_bad_audio() {
        let mut config = FabulaConfig::default();
        config.audio.sample_rate_hz = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));

        let mut config = FabulaConfig::default();
        config.audio.channels = 0;
        assert!(config.validate().is_err());

        let mut config = FabulaConfig::default();
        config.audio.bits_per_sample = 12;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_config_workspace_file_and_overrides() {
        let dir = TempDir::new().unwrap();
        let config_dir = dir.path().join(".fabula");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join("config.toml"),
            "language = \"en\"\n[storage]\nstory_key = \"bedtime\"\n",
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.language, Language::En);
        assert_eq!(config.storage.story_key, "bedtime");
        assert!(config_exists(Some(dir.path())));

        let overrides = ConfigOverrides {
            language: Some(Language::Es),
            storage: Some(StorageOverrides {
                data_dir: Some(dir.path().join("data")),
            }),
        };
        let config = load_config(Some(dir.path()), Some(&overrides)).unwrap();
        assert_eq!(config.language, Language::Es);
        assert_eq!(config.storage.story_key, "bedtime");
        assert_eq!(config.storage.resolve_data_dir(), dir.path().join("data"));
    }

    #[test]
    fn test_load_config_invalid_workspace_value() {
        let dir = TempDir::new().unwrap();
        let config_dir = dir.path().join(".fabula");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(config_dir.join("config.toml"), "[audio]\nchannels = 0\n").unwrap();

        assert!(matches!(
            load_config(Some(dir.path()), None),
            Err(ConfigError::Invalid { .. })
        ));
    }
}
