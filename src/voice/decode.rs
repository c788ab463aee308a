//! Speech payload decoding
//!
//! The synthesis backend returns base64-encoded 16-bit little-endian PCM,
//! mono, at 24kHz. Decoding happens once per utterance; the result is shared
//! by every later replay.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::{Error, Result};

/// Sample rate of synthesized speech
pub const SAMPLE_RATE: u32 = 24000;

/// Channel count of synthesized speech
pub const CHANNELS: u16 = 1;

/// Decoded mono sample buffer
///
/// Cloning is cheap: the samples are shared, never copied.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    samples: Arc<[f32]>,
    sample_rate: u32,
    channels: u16,
}

impl DecodedAudio {
    /// Wrap normalized samples at the speech sample rate
    #[must_use]
    pub fn new(samples: Vec<f32>) -> Self {
        Self {
            samples: samples.into(),
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
        }
    }

    /// Wrap mono samples played back at `sample_rate`
    #[must_use]
    pub fn with_sample_rate(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            channels: CHANNELS,
        }
    }

    /// Normalized samples in [-1.0, 1.0]
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Shared handle to the sample buffer
    #[must_use]
    pub fn shared_samples(&self) -> Arc<[f32]> {
        Arc::clone(&self.samples)
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub const fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback duration
    #[must_use]
    pub fn duration(&self) -> Duration {
        #[allow(clippy::cast_precision_loss)]
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }

    /// Returns true if both values share the same sample buffer
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.samples, &other.samples)
    }

    /// Encode as a 16-bit PCM WAV file
    ///
    /// # Errors
    ///
    /// Returns error if WAV encoding fails
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        let spec = hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer =
                hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

            for &sample in self.samples.iter() {
                #[allow(clippy::cast_possible_truncation)]
                let sample_i16 = (sample * 32768.0).clamp(-32768.0, 32767.0) as i16;
                writer
                    .write_sample(sample_i16)
                    .map_err(|e| Error::Audio(e.to_string()))?;
            }

            writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
        }

        Ok(cursor.into_inner())
    }
}

/// Decode a base64 PCM payload into audio samples
///
/// # Errors
///
/// Returns [`Error::Decode`] if the payload is not valid base64 or the
/// decoded byte length is odd
pub fn decode(payload: &[u8]) -> Result<DecodedAudio> {
    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| Error::Decode(format!("invalid base64: {e}")))?;

    if bytes.len() % 2 != 0 {
        return Err(Error::Decode(format!(
            "PCM payload has odd length {}",
            bytes.len()
        )));
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect();

    Ok(DecodedAudio::new(samples))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_pcm(samples: &[i16]) -> Vec<u8> {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        STANDARD.encode(bytes).into_bytes()
    }

    #[test]
    fn decodes_little_endian_samples() {
        let audio = decode(&encode_pcm(&[0, 16384, -16384, i16::MIN, i16::MAX])).unwrap();

        assert_eq!(audio.sample_rate(), SAMPLE_RATE);
        assert_eq!(audio.channels(), 1);
        assert_eq!(audio.len(), 5);
        assert_eq!(audio.samples()[0], 0.0);
        assert_eq!(audio.samples()[1], 0.5);
        assert_eq!(audio.samples()[2], -0.5);
        assert_eq!(audio.samples()[3], -1.0);
        assert!(audio.samples()[4] < 1.0);
    }

    #[test]
    fn odd_length_is_rejected() {
        let payload = STANDARD.encode([0x01u8, 0x02, 0x03]);
        let err = decode(payload.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn invalid_base64_is_rejected() {
        let err = decode(b"not base64!!").unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn empty_payload_decodes_to_silence() {
        let audio = decode(b"").unwrap();
        assert!(audio.is_empty());
        assert_eq!(audio.duration(), Duration::ZERO);
    }

    #[test]
    fn decoding_is_deterministic() {
        let payload = encode_pcm(&[1, -2, 300, -32000, 12345]);
        let a = decode(&payload).unwrap();
        let b = decode(&payload).unwrap();

        let a_bits: Vec<u32> = a.samples().iter().map(|s| s.to_bits()).collect();
        let b_bits: Vec<u32> = b.samples().iter().map(|s| s.to_bits()).collect();
        assert_eq!(a_bits, b_bits);
        assert!(!a.ptr_eq(&b));
    }

    #[test]
    fn duration_follows_sample_rate() {
        let audio = DecodedAudio::new(vec![0.0; 2400]);
        assert_eq!(audio.duration(), Duration::from_millis(100));
    }

    #[test]
    fn wav_export_has_riff_header() {
        let audio = DecodedAudio::new(vec![0.0, 0.25, -0.25, 1.0, -1.0]);
        let wav = audio.to_wav().unwrap();

        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(wav.len(), 44 + 5 * 2);
    }
}
