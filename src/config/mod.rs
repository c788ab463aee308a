//! Configuration management for the speech engine
//!
//! Precedence: environment, then `~/.config/lingua/config.toml`, then defaults.

pub mod file;

use std::time::Duration;

use crate::voice::VoiceId;
use crate::{Error, Result};

use file::LinguaConfigFile;

/// Default TTS model
pub const DEFAULT_TTS_MODEL: &str = "gemini-2.5-flash-preview-tts";

/// Default API base URL
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Engine configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Speech synthesis configuration
    pub speech: SpeechConfig,
}

/// Speech synthesis configuration
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    /// Gemini API key (from `GEMINI_API_KEY`)
    pub api_key: Option<String>,

    /// TTS model identifier
    pub model: String,

    /// API base URL
    pub base_url: String,

    /// Voice used when a caller does not pick one
    pub voice: VoiceId,

    /// Per-request timeout for synthesis calls
    pub request_timeout: Duration,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_TTS_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            voice: VoiceId::default(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl Config {
    /// Load configuration from the environment and the config file
    ///
    /// # Errors
    ///
    /// Returns error if a configured voice or timeout is invalid
    pub fn load() -> Result<Self> {
        Self::from_sources(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed config file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a configured voice or timeout is invalid
    pub fn from_sources(
        fc: LinguaConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let defaults = SpeechConfig::default();
        let fs = fc.speech;

        let voice = match env("LINGUA_TTS_VOICE").or(fs.voice) {
            Some(name) => name.parse()?,
            None => defaults.voice,
        };

        let timeout_secs = match env("LINGUA_TTS_TIMEOUT_SECS") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("invalid LINGUA_TTS_TIMEOUT_SECS: {raw}")))?,
            None => fs.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
        };

        let speech = SpeechConfig {
            api_key: env("GEMINI_API_KEY")
                .or(fs.api_key)
                .filter(|k| !k.is_empty()),
            model: env("LINGUA_TTS_MODEL")
                .or(fs.model)
                .unwrap_or(defaults.model),
            base_url: env("LINGUA_TTS_BASE_URL")
                .or(fs.base_url)
                .unwrap_or(defaults.base_url),
            voice,
            request_timeout: Duration::from_secs(timeout_secs),
        };

        Ok(Self { speech })
    }
}
