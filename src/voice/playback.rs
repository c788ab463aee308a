//! Playback control
//!
//! Owns the single audible sound. Every `play` call gets a [`PlaybackId`];
//! a completion only counts if its id is still the current one, so a
//! superseded or stopped call never reports as finished.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;

use super::cache::FetchCache;
use super::output::{AudioOutput, Sound, StartedSound};
use super::tts::VoiceId;

/// Slack past the clip length before a silent device counts as finished
const COMPLETION_GRACE: Duration = Duration::from_millis(500);

/// Identity of one `play` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaybackId(u64);

impl fmt::Display for PlaybackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// How a `play` call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEnd {
    /// Audio played to the end
    Finished,
    /// No audio could be obtained or started
    Unavailable,
    /// Superseded by a later `play` or halted by `stop`
    Cancelled,
}

impl PlaybackEnd {
    /// Whether the caller's completion callback should run
    #[must_use]
    pub const fn notifies(self) -> bool {
        matches!(self, Self::Finished | Self::Unavailable)
    }
}

/// Completion of one `play` call
#[derive(Debug)]
pub struct PlaybackTicket {
    id: PlaybackId,
    ended: oneshot::Receiver<PlaybackEnd>,
}

impl PlaybackTicket {
    #[must_use]
    pub const fn id(&self) -> PlaybackId {
        self.id
    }

    /// The outcome, if the call has already ended
    pub fn try_ended(&mut self) -> Option<PlaybackEnd> {
        match self.ended.try_recv() {
            Ok(end) => Some(end),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(PlaybackEnd::Cancelled),
        }
    }

    /// Wait for the call to end
    pub async fn ended(self) -> PlaybackEnd {
        self.ended.await.unwrap_or(PlaybackEnd::Cancelled)
    }
}

/// Controller state
enum PlaybackState {
    Idle,
    Playing(PlaybackHandle),
}

/// The sound currently audible
struct PlaybackHandle {
    id: PlaybackId,
    sound: Box<dyn Sound>,
    ended: oneshot::Sender<PlaybackEnd>,
}

impl PlaybackHandle {
    fn cancel(mut self) {
        self.sound.halt();
        let _ = self.ended.send(PlaybackEnd::Cancelled);
    }
}

struct Shared {
    /// Id of the most recent `play` or `stop`
    current: u64,
    state: PlaybackState,
}

/// At-most-one-sound playback state machine
pub struct PlaybackController {
    cache: FetchCache,
    output: Arc<dyn AudioOutput>,
    shared: Arc<Mutex<Shared>>,
}

impl PlaybackController {
    #[must_use]
    pub fn new(cache: FetchCache, output: Arc<dyn AudioOutput>) -> Self {
        Self {
            cache,
            output,
            shared: Arc::new(Mutex::new(Shared {
                current: 0,
                state: PlaybackState::Idle,
            })),
        }
    }

    /// Play `text`, replacing whatever is playing
    ///
    /// The previous sound is halted before audio for `text` is resolved.
    /// Returns once playback has begun or the call has ended; the ticket
    /// resolves exactly once.
    pub async fn play(&self, text: &str, voice: VoiceId) -> PlaybackTicket {
        let id = self.supersede();
        let (ended_tx, ended_rx) = oneshot::channel();
        let ticket = PlaybackTicket {
            id,
            ended: ended_rx,
        };

        let audio = match self.output.resume().await {
            Ok(()) => self.cache.ensure(text, voice).await,
            Err(e) => {
                tracing::warn!(playback_id = %id, error = %e, "audio output unavailable");
                None
            }
        };

        // Device-specific conversion happens outside the state lock
        let audio = match audio {
            Some(audio) => match self.output.prepare(audio).await {
                Ok(prepared) => Some(prepared),
                Err(e) => {
                    tracing::warn!(playback_id = %id, error = %e, "failed to prepare audio");
                    None
                }
            },
            None => None,
        };

        let mut shared = lock(&self.shared);
        if shared.current != id.0 {
            tracing::debug!(playback_id = %id, "playback superseded before start");
            let _ = ended_tx.send(PlaybackEnd::Cancelled);
            return ticket;
        }

        let Some(audio) = audio else {
            let _ = ended_tx.send(PlaybackEnd::Unavailable);
            return ticket;
        };

        match self.output.start(&audio) {
            Ok(StartedSound { sound, finished }) => {
                tracing::debug!(
                    playback_id = %id,
                    duration = ?audio.duration(),
                    "playback started"
                );
                shared.state = PlaybackState::Playing(PlaybackHandle {
                    id,
                    sound,
                    ended: ended_tx,
                });
                drop(shared);
                self.watch(id, audio.duration() + COMPLETION_GRACE, finished);
            }
            Err(e) => {
                tracing::warn!(playback_id = %id, error = %e, "failed to start playback");
                let _ = ended_tx.send(PlaybackEnd::Unavailable);
            }
        }

        ticket
    }

    /// Halt the current sound, if any
    ///
    /// Also cancels any `play` still resolving its audio.
    pub fn stop(&self) {
        let _ = self.supersede();
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        matches!(lock(&self.shared).state, PlaybackState::Playing(_))
    }

    /// Id of the audible playback
    #[must_use]
    pub fn current(&self) -> Option<PlaybackId> {
        match &lock(&self.shared).state {
            PlaybackState::Playing(handle) => Some(handle.id),
            PlaybackState::Idle => None,
        }
    }

    /// Invalidate every earlier call and return to `Idle`
    fn supersede(&self) -> PlaybackId {
        let mut shared = lock(&self.shared);
        shared.current += 1;
        let id = PlaybackId(shared.current);

        if let PlaybackState::Playing(handle) =
            std::mem::replace(&mut shared.state, PlaybackState::Idle)
        {
            tracing::debug!(playback_id = %handle.id, "halting playback");
            handle.cancel();
        }

        id
    }

    /// Return to `Idle` when the sound for `id` ends, if it is still current
    ///
    /// A device that never reports completion is given up on after `limit`.
    fn watch(&self, id: PlaybackId, limit: Duration, finished: oneshot::Receiver<()>) {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            // Closed without a value means the sound was halted or the stream died
            let timed_out = tokio::time::timeout(limit, finished).await.is_err();

            let mut shared = lock(&shared);
            if !matches!(&shared.state, PlaybackState::Playing(handle) if handle.id == id) {
                return;
            }
            if let PlaybackState::Playing(mut handle) =
                std::mem::replace(&mut shared.state, PlaybackState::Idle)
            {
                if timed_out {
                    tracing::warn!(playback_id = %id, ?limit, "output never reported completion");
                    handle.sound.halt();
                } else {
                    tracing::debug!(playback_id = %id, "playback finished");
                }
                let _ = handle.ended.send(PlaybackEnd::Finished);
            }
        });
    }
}

impl fmt::Debug for PlaybackController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackController")
            .field("current", &self.current())
            .finish_non_exhaustive()
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::voice::{DecodedAudio, Synthesizer};
    use crate::{Error, Result};

    struct SilentSynthesizer;

    #[async_trait]
    impl Synthesizer for SilentSynthesizer {
        async fn synthesize(&self, text: &str, _voice: VoiceId) -> Result<String> {
            if text == "broken" {
                return Err(Error::Synthesis("backend down".to_string()));
            }
            Ok("AAAAAA==".to_string())
        }
    }

    /// Output whose sounds never finish on their own
    #[derive(Default)]
    struct HeldOutput {
        started: AtomicUsize,
        halted: Arc<AtomicUsize>,
        finishers: Mutex<Vec<oneshot::Sender<()>>>,
    }

    struct HeldSound {
        halted: Arc<AtomicUsize>,
    }

    impl Sound for HeldSound {
        fn halt(&mut self) {
            self.halted.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl AudioOutput for HeldOutput {
        async fn resume(&self) -> Result<()> {
            Ok(())
        }

        fn start(&self, _audio: &DecodedAudio) -> Result<StartedSound> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = oneshot::channel();
            self.finishers.lock().unwrap().push(tx);
            Ok(StartedSound {
                sound: Box::new(HeldSound {
                    halted: Arc::clone(&self.halted),
                }),
                finished: rx,
            })
        }
    }

    fn controller() -> (PlaybackController, Arc<HeldOutput>) {
        let output = Arc::new(HeldOutput::default());
        let cache = FetchCache::new(Arc::new(SilentSynthesizer));
        (PlaybackController::new(cache, output.clone()), output)
    }

    #[tokio::test]
    async fn stop_when_idle_is_noop() {
        let (controller, _output) = controller();
        controller.stop();
        controller.stop();
        assert!(!controller.is_playing());
    }

    #[tokio::test]
    async fn play_then_finish() {
        let (controller, output) = controller();

        let ticket = controller.play("hello", VoiceId::Kore).await;
        assert!(controller.is_playing());
        assert_eq!(controller.current(), Some(ticket.id()));

        let finisher = output.finishers.lock().unwrap().pop().unwrap();
        finisher.send(()).unwrap();

        assert_eq!(ticket.ended().await, PlaybackEnd::Finished);
        assert!(!controller.is_playing());
    }

    #[tokio::test]
    async fn replay_halts_previous_sound() {
        let (controller, output) = controller();

        let first = controller.play("one", VoiceId::Kore).await;
        let second = controller.play("two", VoiceId::Kore).await;

        assert_eq!(output.started.load(Ordering::SeqCst), 2);
        assert_eq!(output.halted.load(Ordering::SeqCst), 1);
        assert_eq!(first.ended().await, PlaybackEnd::Cancelled);
        assert_eq!(controller.current(), Some(second.id()));
    }

    #[tokio::test]
    async fn stop_cancels_playback() {
        let (controller, output) = controller();

        let ticket = controller.play("hello", VoiceId::Kore).await;
        controller.stop();

        assert!(!controller.is_playing());
        assert_eq!(output.halted.load(Ordering::SeqCst), 1);
        assert_eq!(ticket.ended().await, PlaybackEnd::Cancelled);

        // A late completion signal from the halted sound is ignored
        let finisher = output.finishers.lock().unwrap().pop().unwrap();
        let _ = finisher.send(());
        tokio::task::yield_now().await;
        assert!(!controller.is_playing());
    }

    #[tokio::test]
    async fn unavailable_audio_ends_immediately() {
        let (controller, output) = controller();

        let mut ticket = controller.play("broken", VoiceId::Kore).await;

        assert_eq!(ticket.try_ended(), Some(PlaybackEnd::Unavailable));
        assert!(!controller.is_playing());
        assert_eq!(output.started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_device_times_out() {
        let (controller, output) = controller();

        let ticket = controller.play("hello", VoiceId::Kore).await;
        assert!(controller.is_playing());

        // The finished sender stays alive and never fires
        assert_eq!(output.finishers.lock().unwrap().len(), 1);
        assert_eq!(ticket.ended().await, PlaybackEnd::Finished);

        assert!(!controller.is_playing());
        assert_eq!(output.halted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn only_finished_and_unavailable_notify() {
        assert!(PlaybackEnd::Finished.notifies());
        assert!(PlaybackEnd::Unavailable.notifies());
        assert!(!PlaybackEnd::Cancelled.notifies());
    }
}
