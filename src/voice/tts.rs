//! Text-to-speech (TTS) synthesis

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::SpeechConfig;
use crate::{Error, Result};

/// Synthesis voice
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum VoiceId {
    /// Firm, clear voice
    #[default]
    Kore,
    /// Upbeat voice
    Puck,
    /// Informative voice
    Charon,
}

impl VoiceId {
    /// Every known voice
    pub const ALL: [Self; 3] = [Self::Kore, Self::Puck, Self::Charon];

    /// Voice name as the backend expects it
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Kore => "Kore",
            Self::Puck => "Puck",
            Self::Charon => "Charon",
        }
    }
}

impl fmt::Display for VoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoiceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::Config(format!("unknown voice: {s}")))
    }
}

/// Speech synthesis backend
///
/// Returns the complete utterance as base64-encoded 16-bit little-endian
/// PCM, mono, 24kHz.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text` with `voice`
    ///
    /// # Errors
    ///
    /// Returns error on network, quota, or malformed-response failures
    async fn synthesize(&self, text: &str, voice: VoiceId) -> Result<String>;
}

/// Synthesizes speech through the Gemini `generateContent` endpoint
pub struct GeminiSynthesizer {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
}

impl GeminiSynthesizer {
    /// Create a new synthesizer
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing or the HTTP client cannot be built
    pub fn new(
        api_key: SecretString,
        base_url: String,
        model: String,
        timeout: Duration,
    ) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("Gemini API key required for TTS".to_string()));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }

    /// Create a synthesizer from speech configuration
    ///
    /// # Errors
    ///
    /// Returns error if no API key is configured
    pub fn from_config(config: &SpeechConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_ref()
            .ok_or_else(|| Error::Config("GEMINI_API_KEY not set".to_string()))?;

        Self::new(
            SecretString::from(api_key.clone()),
            config.base_url.clone(),
            config.model.clone(),
            config.request_timeout,
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

impl fmt::Debug for GeminiSynthesizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiSynthesizer")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Synthesizer for GeminiSynthesizer {
    async fn synthesize(&self, text: &str, voice: VoiceId) -> Result<String> {
        let request = GenerateRequest::speech(text, voice);

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Synthesis(format!("Gemini TTS error {status}: {body}")));
        }

        let body = response.text().await?;
        extract_audio(&body)
    }
}

/// Pull the inline audio payload out of a `generateContent` response body
fn extract_audio(body: &str) -> Result<String> {
    let response: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| Error::Synthesis(format!("malformed TTS response: {e}")))?;

    response
        .candidates
        .into_iter()
        .flat_map(|c| c.content.parts)
        .find_map(|p| p.inline_data)
        .map(|d| d.data)
        .ok_or_else(|| Error::Synthesis("TTS response contained no audio".to_string()))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [RequestContent<'a>; 1],
    generation_config: GenerationConfig,
}

impl<'a> GenerateRequest<'a> {
    fn speech(text: &'a str, voice: VoiceId) -> Self {
        Self {
            contents: [RequestContent {
                parts: [RequestPart { text }],
            }],
            generation_config: GenerationConfig {
                response_modalities: ["AUDIO"],
                speech_config: SpeechSettings {
                    voice_config: VoiceSettings {
                        prebuilt_voice_config: PrebuiltVoice { voice_name: voice },
                    },
                },
            },
        }
    }
}

#[derive(Serialize)]
struct RequestContent<'a> {
    parts: [RequestPart<'a>; 1],
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: [&'static str; 1],
    speech_config: SpeechSettings,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechSettings {
    voice_config: VoiceSettings,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceSettings {
    prebuilt_voice_config: PrebuiltVoice,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoice {
    voice_name: VoiceId,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    inline_data: Option<InlineData>,
}

#[derive(Deserialize)]
struct InlineData {
    data: String,
}
