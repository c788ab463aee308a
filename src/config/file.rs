//! TOML configuration file loading
//!
//! Supports `~/.config/lingua/config.toml` as a persistent config source.
//! All fields are optional — the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct LinguaConfigFile {
    /// Speech synthesis configuration
    #[serde(default)]
    pub speech: SpeechFileConfig,
}

/// Speech synthesis configuration
#[derive(Debug, Default, Deserialize)]
pub struct SpeechFileConfig {
    /// Gemini API key
    pub api_key: Option<String>,

    /// TTS model (e.g. "gemini-2.5-flash-preview-tts")
    pub model: Option<String>,

    /// API base URL
    pub base_url: Option<String>,

    /// Default voice (e.g. "Kore")
    pub voice: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: Option<u64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `LinguaConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> LinguaConfigFile {
    config_file_path().map_or_else(LinguaConfigFile::default, |path| load_config_file_from(&path))
}

/// Load a TOML config file from `path`
///
/// Returns `LinguaConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file_from(path: &Path) -> LinguaConfigFile {
    if !path.exists() {
        return LinguaConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                LinguaConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            LinguaConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/lingua/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("lingua").join("config.toml"))
}
