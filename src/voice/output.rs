//! Audio output to speakers

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::oneshot;

use super::decode::{DecodedAudio, SAMPLE_RATE};
use crate::{Error, Result};

/// A sound currently producing output
pub trait Sound: Send {
    /// Halt output
    ///
    /// Halting an already-halted or already-finished sound is a no-op.
    fn halt(&mut self);
}

/// A sound that has begun playing
pub struct StartedSound {
    /// Control handle
    pub sound: Box<dyn Sound>,

    /// Resolves when the last sample has been played. The sender is dropped
    /// without sending if the sound is halted.
    pub finished: oneshot::Receiver<()>,
}

/// Output device seam
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Make sure the device is running, waiting until it confirms ready
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened
    async fn resume(&self) -> Result<()>;

    /// Convert `audio` into the form [`start`](Self::start) plays
    ///
    /// Runs before playback state is locked, so slow work belongs here.
    ///
    /// # Errors
    ///
    /// Returns error if the audio cannot be converted for the device
    async fn prepare(&self, audio: DecodedAudio) -> Result<DecodedAudio> {
        Ok(audio)
    }

    /// Begin playing `audio` from offset zero
    ///
    /// # Errors
    ///
    /// Returns error if the device is not running
    fn start(&self, audio: &DecodedAudio) -> Result<StartedSound>;
}

/// Plays audio on the default output device through cpal
///
/// The stream lives on a dedicated thread; cpal streams are not `Send`.
/// Opened lazily on the first [`AudioOutput::resume`] and reopened by the
/// next `resume` after a stream error.
#[derive(Default)]
pub struct CpalOutput {
    device: Mutex<Option<Arc<OutputDevice>>>,
    /// Serializes device opening
    opening: tokio::sync::Mutex<()>,
    /// Speech converted to the device rate, one entry per clip and rate
    resampled: Mutex<Vec<Resampled>>,
}

struct Resampled {
    source: DecodedAudio,
    audio: DecodedAudio,
}

/// A running output stream
struct OutputDevice {
    voice: Arc<Mutex<Option<Voice>>>,
    sample_rate: u32,
    next_id: AtomicU64,
    /// Cleared by the stream error callback
    healthy: Arc<AtomicBool>,
    /// Dropping this stops the stream thread
    _shutdown: mpsc::Sender<()>,
}

/// Samples being fed to the stream
struct Voice {
    id: u64,
    samples: Arc<[f32]>,
    position: usize,
    finished: oneshot::Sender<()>,
}

struct CpalSound {
    id: u64,
    voice: Arc<Mutex<Option<Voice>>>,
}

impl CpalOutput {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the device is open and its stream has not failed
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running().is_some()
    }

    fn running(&self) -> Option<Arc<OutputDevice>> {
        self.device
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|device| device.healthy.load(Ordering::Acquire))
            .cloned()
    }

    /// Resample `audio` to `rate`, reusing earlier conversions of the same clip
    async fn convert(&self, audio: DecodedAudio, rate: u32) -> Result<DecodedAudio> {
        if audio.sample_rate() == rate {
            return Ok(audio);
        }

        {
            let resampled = self.resampled.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(hit) = resampled
                .iter()
                .find(|r| r.audio.sample_rate() == rate && r.source.ptr_eq(&audio))
            {
                return Ok(hit.audio.clone());
            }
        }

        let source = audio.clone();
        let samples = tokio::task::spawn_blocking(move || {
            resample(source.samples(), source.sample_rate(), rate)
        })
        .await
        .map_err(|e| Error::Audio(format!("resample task failed: {e}")))??;

        let converted = DecodedAudio::with_sample_rate(samples, rate);
        tracing::debug!(
            from = audio.sample_rate(),
            to = rate,
            samples = converted.len(),
            "resampled speech"
        );

        self.resampled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Resampled {
                source: audio,
                audio: converted.clone(),
            });

        Ok(converted)
    }
}

impl std::fmt::Debug for CpalOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpalOutput")
            .field("sample_rate", &self.running().map(|d| d.sample_rate))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AudioOutput for CpalOutput {
    async fn resume(&self) -> Result<()> {
        if self.running().is_some() {
            return Ok(());
        }

        let _opening = self.opening.lock().await;
        if self.running().is_some() {
            return Ok(());
        }

        let device = Arc::new(OutputDevice::open().await?);
        let stale = self
            .device
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(device);
        if stale.is_some() {
            tracing::info!("audio output reopened after stream error");
        }

        Ok(())
    }

    async fn prepare(&self, audio: DecodedAudio) -> Result<DecodedAudio> {
        let device = self
            .running()
            .ok_or_else(|| Error::Audio("output device not running".to_string()))?;
        self.convert(audio, device.sample_rate).await
    }

    fn start(&self, audio: &DecodedAudio) -> Result<StartedSound> {
        let device = self
            .running()
            .ok_or_else(|| Error::Audio("output device not running".to_string()))?;

        if device.sample_rate != audio.sample_rate() {
            return Err(Error::Audio(format!(
                "audio at {}Hz not prepared for {}Hz output",
                audio.sample_rate(),
                device.sample_rate
            )));
        }

        let id = device.next_id.fetch_add(1, Ordering::Relaxed);
        let (finished_tx, finished_rx) = oneshot::channel();

        // Replacing the voice drops any previous finished sender
        *lock(&device.voice) = Some(Voice {
            id,
            samples: audio.shared_samples(),
            position: 0,
            finished: finished_tx,
        });

        Ok(StartedSound {
            sound: Box::new(CpalSound {
                id,
                voice: Arc::clone(&device.voice),
            }),
            finished: finished_rx,
        })
    }
}

impl Sound for CpalSound {
    fn halt(&mut self) {
        let mut voice = lock(&self.voice);
        if voice.as_ref().is_some_and(|v| v.id == self.id) {
            *voice = None;
        }
    }
}

impl OutputDevice {
    /// Spawn the stream thread and wait until the stream is playing
    async fn open() -> Result<Self> {
        let voice = Arc::new(Mutex::new(None));
        let healthy = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let stream_voice = Arc::clone(&voice);
        let stream_healthy = Arc::clone(&healthy);
        std::thread::Builder::new()
            .name("lingua-audio".to_string())
            .spawn(move || run_stream(&stream_voice, &stream_healthy, ready_tx, &shutdown_rx))?;

        let sample_rate = ready_rx
            .await
            .map_err(|_| Error::Audio("audio thread exited before ready".to_string()))??;

        Ok(Self {
            voice,
            sample_rate,
            next_id: AtomicU64::new(0),
            healthy,
            _shutdown: shutdown_tx,
        })
    }
}

/// Body of the stream thread
fn run_stream(
    voice: &Arc<Mutex<Option<Voice>>>,
    healthy: &Arc<AtomicBool>,
    ready: oneshot::Sender<Result<u32>>,
    shutdown: &mpsc::Receiver<()>,
) {
    let stream = match build_stream(voice, healthy) {
        Ok((stream, sample_rate)) => {
            let _ = ready.send(Ok(sample_rate));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    // Blocks until the output is dropped
    let _ = shutdown.recv();
    drop(stream);
    tracing::debug!("audio output closed");
}

fn build_stream(
    voice: &Arc<Mutex<Option<Voice>>>,
    healthy: &Arc<AtomicBool>,
) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();

    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let config = output_config(&device)?;
    let sample_rate = config.sample_rate.0;
    let channels = usize::from(config.channels);

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        channels,
        "audio output initialized"
    );

    let data_voice = Arc::clone(voice);
    let error_voice = Arc::clone(voice);
    let healthy = Arc::clone(healthy);
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                fill_frames(&mut lock(&data_voice), data, channels);
            },
            move |err| {
                tracing::error!(error = %err, "audio playback error");
                fail_stream(&error_voice, &healthy);
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    Ok((stream, sample_rate))
}

/// Pick a 24kHz config (mono, then stereo), else the device default
fn output_config(device: &cpal::Device) -> Result<StreamConfig> {
    let supports = |channels: u16| {
        device.supported_output_configs().ok()?.find(|c| {
            c.channels() == channels
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        })
    };

    if let Some(supported) = supports(1).or_else(|| supports(2)) {
        return Ok(supported.with_sample_rate(SampleRate(SAMPLE_RATE)).config());
    }

    let fallback = device
        .default_output_config()
        .map_err(|e| Error::Audio(e.to_string()))?;
    tracing::debug!(
        sample_rate = fallback.sample_rate().0,
        "device lacks 24kHz output, resampling"
    );
    Ok(fallback.config())
}

/// Copy the next samples of `slot` into interleaved `data`
///
/// Signals and clears the voice once its last sample has been written.
fn fill_frames(slot: &mut Option<Voice>, data: &mut [f32], channels: usize) {
    for frame in data.chunks_mut(channels.max(1)) {
        let sample = match slot.as_mut() {
            Some(v) if v.position < v.samples.len() => {
                v.position += 1;
                v.samples[v.position - 1]
            }
            _ => 0.0,
        };
        frame.fill(sample);
    }

    if slot.as_ref().is_some_and(|v| v.position >= v.samples.len()) {
        if let Some(done) = slot.take() {
            let _ = done.finished.send(());
        }
    }
}

/// Mark the stream dead and drop the playing voice
///
/// Dropping the voice closes its finished channel, so whoever waits on it
/// wakes up. The next `resume` opens a fresh stream.
fn fail_stream(voice: &Mutex<Option<Voice>>, healthy: &AtomicBool) {
    healthy.store(false, Ordering::Release);
    lock(voice).take();
}

fn lock(voice: &Mutex<Option<Voice>>) -> MutexGuard<'_, Option<Voice>> {
    voice.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Resample audio using rubato
#[allow(clippy::cast_possible_truncation)]
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    let chunk_size = 1024;
    let sub_chunks = 2;

    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, chunk_size, sub_chunks, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let mut input: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();

    // Pad the tail so the last partial chunk is not dropped
    let remainder = input.len() % chunk_size;
    if remainder != 0 {
        input.resize(input.len() + chunk_size - remainder, 0.0);
    }

    let mut output = Vec::with_capacity(input.len() * to_rate as usize / from_rate as usize);
    for chunk in input.chunks(chunk_size) {
        let result = resampler
            .process(&[chunk], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend_from_slice(&result[0]);
    }

    Ok(output.iter().map(|&s| s as f32).collect())
}
