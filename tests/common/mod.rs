//! Shared test utilities

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::sync::{Notify, oneshot, watch};

use lingua_voice::voice::{AudioOutput, DecodedAudio, Sound, StartedSound, Synthesizer};
use lingua_voice::{Error, OnEnded, Result, VoiceId};

/// Encode `samples` as a base64 PCM16LE payload
#[must_use]
pub fn pcm_payload(samples: &[i16]) -> String {
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    STANDARD.encode(bytes)
}

/// A ramp of `len` samples spanning the full i16 range
#[must_use]
pub fn ramp(len: usize) -> Vec<i16> {
    (0..len)
        .map(|i| {
            #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
            let sample = (i as i64 * 65535 / len.max(1) as i64 - 32768) as i16;
            sample
        })
        .collect()
}

/// Synthesizer with call counting, an optional gate and an offline switch
pub struct ScriptedSynthesizer {
    samples: usize,
    calls: Mutex<HashMap<String, usize>>,
    voices: Mutex<Vec<VoiceId>>,
    payloads: Mutex<HashMap<String, String>>,
    offline: AtomicBool,
    gate: watch::Sender<bool>,
}

impl ScriptedSynthesizer {
    /// Responds immediately with `samples` samples
    #[must_use]
    pub fn new(samples: usize) -> Arc<Self> {
        Arc::new(Self::build(samples, true))
    }

    /// Holds every call until [`open`](Self::open)
    #[must_use]
    pub fn gated(samples: usize) -> Arc<Self> {
        Arc::new(Self::build(samples, false))
    }

    fn build(samples: usize, open: bool) -> Self {
        Self {
            samples,
            calls: Mutex::new(HashMap::new()),
            voices: Mutex::new(Vec::new()),
            payloads: Mutex::new(HashMap::new()),
            offline: AtomicBool::new(false),
            gate: watch::channel(open).0,
        }
    }

    /// Release held and future calls
    pub fn open(&self) {
        self.gate.send_replace(true);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Respond to `text` with a fixed raw payload
    pub fn respond_with(&self, text: &str, payload: &str) {
        self.payloads
            .lock()
            .unwrap()
            .insert(text.to_string(), payload.to_string());
    }

    /// Calls made for `text`
    #[must_use]
    pub fn calls(&self, text: &str) -> usize {
        self.calls.lock().unwrap().get(text).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    #[must_use]
    pub fn voices(&self) -> Vec<VoiceId> {
        self.voices.lock().unwrap().clone()
    }
}

#[async_trait]
impl Synthesizer for ScriptedSynthesizer {
    async fn synthesize(&self, text: &str, voice: VoiceId) -> Result<String> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(text.to_string())
            .or_default() += 1;
        self.voices.lock().unwrap().push(voice);

        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Synthesis("network unreachable".to_string()));
        }

        if let Some(payload) = self.payloads.lock().unwrap().get(text) {
            return Ok(payload.clone());
        }

        Ok(pcm_payload(&ramp(self.samples)))
    }
}

/// Output that records sounds; they finish on demand or immediately
#[derive(Default)]
pub struct RecordingOutput {
    auto_finish: bool,
    resumes: AtomicUsize,
    started: Mutex<Vec<usize>>,
    halted: Arc<AtomicUsize>,
    finishers: Mutex<Vec<oneshot::Sender<()>>>,
}

struct RecordedSound {
    halted: Arc<AtomicUsize>,
    done: bool,
}

impl Sound for RecordedSound {
    fn halt(&mut self) {
        if !self.done {
            self.done = true;
            self.halted.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl RecordingOutput {
    /// Sounds play until [`finish_all`](Self::finish_all)
    #[must_use]
    pub fn held() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sounds finish as soon as they start
    #[must_use]
    pub fn instant() -> Arc<Self> {
        Arc::new(Self {
            auto_finish: true,
            ..Self::default()
        })
    }

    /// Finish every sound still playing
    pub fn finish_all(&self) {
        for finisher in self.finishers.lock().unwrap().drain(..) {
            let _ = finisher.send(());
        }
    }

    /// Sample counts of every started sound
    #[must_use]
    pub fn started(&self) -> Vec<usize> {
        self.started.lock().unwrap().clone()
    }

    #[must_use]
    pub fn halted(&self) -> usize {
        self.halted.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn resumes(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioOutput for RecordingOutput {
    async fn resume(&self) -> Result<()> {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn start(&self, audio: &DecodedAudio) -> Result<StartedSound> {
        self.started.lock().unwrap().push(audio.len());

        let (tx, rx) = oneshot::channel();
        if self.auto_finish {
            let _ = tx.send(());
        } else {
            self.finishers.lock().unwrap().push(tx);
        }

        Ok(StartedSound {
            sound: Box::new(RecordedSound {
                halted: Arc::clone(&self.halted),
                done: false,
            }),
            finished: rx,
        })
    }
}

/// Counts completion callbacks and wakes waiters
#[derive(Default)]
pub struct EndedProbe {
    count: AtomicUsize,
    notify: Notify,
}

impl EndedProbe {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A callback that records one invocation
    #[must_use]
    pub fn callback(self: &Arc<Self>) -> Option<OnEnded> {
        let probe = Arc::clone(self);
        Some(Box::new(move || {
            probe.count.fetch_add(1, Ordering::SeqCst);
            probe.notify.notify_one();
        }))
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Wait for the next invocation
    pub async fn wait(&self) {
        tokio::time::timeout(std::time::Duration::from_secs(2), self.notify.notified())
            .await
            .expect("completion callback never ran");
    }
}

/// Let spawned tasks run
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
