//! Speech engine
//!
//! The session-wide context the UI talks to. Owns the utterance cache and
//! the playback controller (and through it the output device); construct
//! one per session and share it by reference.

use std::sync::Arc;

use crate::Result;
use crate::config::Config;
use crate::voice::{
    AudioOutput, CpalOutput, DecodedAudio, EntryState, FetchCache, GeminiSynthesizer,
    PlaybackController, PlaybackEnd, Synthesizer, VoiceId,
};

/// Completion callback for [`SpeechEngine::play`]
pub type OnEnded = Box<dyn FnOnce() + Send + 'static>;

/// Prefetch, play and stop utterances
#[derive(Debug)]
pub struct SpeechEngine {
    cache: FetchCache,
    playback: PlaybackController,
    default_voice: VoiceId,
}

impl SpeechEngine {
    /// Create an engine from its collaborators
    #[must_use]
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        output: Arc<dyn AudioOutput>,
        default_voice: VoiceId,
    ) -> Self {
        let cache = FetchCache::new(synthesizer);
        let playback = PlaybackController::new(cache.clone(), output);

        Self {
            cache,
            playback,
            default_voice,
        }
    }

    /// Create an engine backed by Gemini and the default output device
    ///
    /// The device is not opened until the first `play`.
    ///
    /// # Errors
    ///
    /// Returns error if the synthesizer cannot be configured
    pub fn from_config(config: &Config) -> Result<Self> {
        let synthesizer = GeminiSynthesizer::from_config(&config.speech)?;

        tracing::debug!(
            model = %config.speech.model,
            voice = %config.speech.voice,
            "speech engine configured"
        );

        Ok(Self::new(
            Arc::new(synthesizer),
            Arc::new(CpalOutput::new()),
            config.speech.voice,
        ))
    }

    /// Voice used when a caller does not pick one
    #[must_use]
    pub const fn default_voice(&self) -> VoiceId {
        self.default_voice
    }

    /// Warm the cache for `text`
    ///
    /// Best effort: failures are logged by the cache, never returned.
    pub async fn prefetch(&self, text: &str, voice: Option<VoiceId>) {
        let voice = voice.unwrap_or(self.default_voice);
        let _ = self.cache.ensure(text, voice).await;
    }

    /// Audio for `text`, synthesizing it if needed
    ///
    /// `None` if synthesis or decoding failed.
    pub async fn fetch(&self, text: &str, voice: Option<VoiceId>) -> Option<DecodedAudio> {
        let voice = voice.unwrap_or(self.default_voice);
        self.cache.ensure(text, voice).await
    }

    /// Play `text`, replacing whatever is playing
    ///
    /// Returns once playback has begun. `on_ended` runs once when this
    /// call's audio finishes, or straight away if no audio could be
    /// obtained. It never runs if the call is superseded by a later `play`
    /// or halted by [`stop`](Self::stop).
    pub async fn play(&self, text: &str, on_ended: Option<OnEnded>, voice: Option<VoiceId>) {
        let voice = voice.unwrap_or(self.default_voice);
        let mut ticket = self.playback.play(text, voice).await;

        let Some(on_ended) = on_ended else {
            return;
        };

        match ticket.try_ended() {
            Some(end) => {
                if end.notifies() {
                    on_ended();
                }
            }
            None => {
                tokio::spawn(async move {
                    if ticket.ended().await.notifies() {
                        on_ended();
                    }
                });
            }
        }
    }

    /// Play `text` and wait until the call ends
    pub async fn play_and_wait(&self, text: &str, voice: Option<VoiceId>) -> PlaybackEnd {
        let voice = voice.unwrap_or(self.default_voice);
        self.playback.play(text, voice).await.ended().await
    }

    /// Halt playback; a no-op when nothing is playing
    pub fn stop(&self) {
        self.playback.stop();
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.playback.is_playing()
    }

    /// Cached audio for `text`, without synthesizing
    #[must_use]
    pub fn get(&self, text: &str) -> Option<DecodedAudio> {
        self.cache.get(text)
    }

    #[must_use]
    pub fn state(&self, text: &str) -> EntryState {
        self.cache.state(text)
    }

    /// The utterance cache
    #[must_use]
    pub const fn cache(&self) -> &FetchCache {
        &self.cache
    }
}
