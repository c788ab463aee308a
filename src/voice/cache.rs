//! Single-flight speech cache
//!
//! Maps exact text to decoded audio. Concurrent requests for the same text
//! share one synthesis call. Entries are never evicted.
//!
//! # Concurrency Model
//!
//! - Each key is `Absent`, `Pending` or `Cached`, never two at once
//! - The fetch runs on its own task: abandoning every waiter does not cancel
//!   it, and the result still lands in the cache
//! - The slot lock is never held across an await

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

use super::decode::{DecodedAudio, decode};
use super::tts::{Synthesizer, VoiceId};

/// Completion shared by every caller waiting on one synthesis
type SharedFetch = Shared<BoxFuture<'static, Option<DecodedAudio>>>;

/// Per-key cache slot
enum Slot {
    /// Synthesis in flight
    Pending(SharedFetch),
    /// Decoded audio, immutable once stored
    Cached(DecodedAudio),
}

/// Observable state of a cache key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Never requested, or the last attempt failed
    Absent,
    /// Synthesis in flight
    Pending,
    /// Audio available
    Cached,
}

/// Memoizing, request-coalescing speech cache
///
/// Cloning shares the underlying cache.
#[derive(Clone)]
pub struct FetchCache {
    inner: Arc<Inner>,
}

struct Inner {
    synthesizer: Arc<dyn Synthesizer>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl FetchCache {
    /// Create an empty cache backed by `synthesizer`
    #[must_use]
    pub fn new(synthesizer: Arc<dyn Synthesizer>) -> Self {
        Self {
            inner: Arc::new(Inner {
                synthesizer,
                slots: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Look up cached audio without waiting or synthesizing
    #[must_use]
    pub fn get(&self, text: &str) -> Option<DecodedAudio> {
        match self.inner.lock().get(text) {
            Some(Slot::Cached(audio)) => Some(audio.clone()),
            _ => None,
        }
    }

    /// Current state of `text`
    #[must_use]
    pub fn state(&self, text: &str) -> EntryState {
        match self.inner.lock().get(text) {
            None => EntryState::Absent,
            Some(Slot::Pending(_)) => EntryState::Pending,
            Some(Slot::Cached(_)) => EntryState::Cached,
        }
    }

    /// Number of cached utterances
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Cached(_)))
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make sure audio for `text` is cached, synthesizing at most once
    ///
    /// Resolves to the audio, or `None` if synthesis or decoding failed.
    /// Failures are not retried here; a later call starts a fresh attempt.
    pub async fn ensure(&self, text: &str, voice: VoiceId) -> Option<DecodedAudio> {
        let fetch = {
            let mut slots = self.inner.lock();
            match slots.get(text) {
                Some(Slot::Cached(audio)) => return Some(audio.clone()),
                Some(Slot::Pending(fetch)) => {
                    tracing::trace!(text_len = text.len(), "joining in-flight synthesis");
                    fetch.clone()
                }
                None => {
                    let fetch = Arc::clone(&self.inner).spawn_fetch(text.to_string(), voice);
                    slots.insert(text.to_string(), Slot::Pending(fetch.clone()));
                    fetch
                }
            }
        };

        fetch.await
    }
}

impl std::fmt::Debug for FetchCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCache")
            .field("entries", &self.inner.lock().len())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start synthesis for `text` on its own task
    ///
    /// Caller must hold the slot lock and register the returned future as
    /// `Pending` before releasing it.
    fn spawn_fetch(self: Arc<Self>, text: String, voice: VoiceId) -> SharedFetch {
        let task = tokio::spawn({
            let inner = Arc::clone(&self);
            let text = text.clone();
            async move { inner.fetch(text, voice).await }
        });

        async move {
            match task.await {
                Ok(audio) => audio,
                Err(e) => {
                    tracing::error!(error = %e, "speech fetch task failed");
                    let mut slots = self.lock();
                    if matches!(slots.get(&text), Some(Slot::Pending(_))) {
                        slots.remove(&text);
                    }
                    None
                }
            }
        }
        .boxed()
        .shared()
    }

    async fn fetch(&self, text: String, voice: VoiceId) -> Option<DecodedAudio> {
        tracing::debug!(text_len = text.len(), %voice, "synthesizing speech");

        let result = match self.synthesizer.synthesize(&text, voice).await {
            Ok(payload) => decode(payload.as_bytes()),
            Err(e) => Err(e),
        };

        let mut slots = self.lock();
        match result {
            Ok(audio) => {
                tracing::debug!(
                    text_len = text.len(),
                    samples = audio.len(),
                    "speech cached"
                );
                slots.insert(text, Slot::Cached(audio.clone()));
                Some(audio)
            }
            Err(e) => {
                tracing::warn!(text_len = text.len(), %voice, error = %e, "speech unavailable");
                slots.remove(&text);
                None
            }
        }
    }
}
