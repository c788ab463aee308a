//! Speech acquisition and playback
//!
//! Text is synthesized once per session, decoded once, and replayed from
//! the cache. At most one sound is audible at a time.

mod cache;
mod decode;
mod output;
mod playback;
mod tts;

pub use cache::{EntryState, FetchCache};
pub use decode::{CHANNELS, DecodedAudio, SAMPLE_RATE, decode};
pub use output::{AudioOutput, CpalOutput, Sound, StartedSound};
pub use playback::{PlaybackController, PlaybackEnd, PlaybackId, PlaybackTicket};
pub use tts::{GeminiSynthesizer, Synthesizer, VoiceId};
