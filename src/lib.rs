//! Lingua Voice - speech acquisition and playback for language learning
//!
//! This library provides the text-to-speech engine behind a language-learning
//! front end:
//! - Speech synthesis through a pluggable backend (Gemini by default)
//! - A single-flight cache that decodes each utterance once per session
//! - Playback with at most one audible sound at a time
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  UI (flashcards, words)              │
//! │        prefetch   │   play / on_ended   │   stop     │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                   SpeechEngine                       │
//! │      FetchCache      │      PlaybackController       │
//! └──────────┬───────────┴───────────────┬──────────────┘
//!            │                           │
//! ┌──────────▼───────────┐   ┌───────────▼──────────────┐
//! │ Synthesizer + decode │   │   AudioOutput (cpal)     │
//! └──────────────────────┘   └──────────────────────────┘
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod voice;

pub use config::{Config, SpeechConfig};
pub use engine::{OnEnded, SpeechEngine};
pub use error::{Error, Result};
pub use voice::{DecodedAudio, PlaybackEnd, VoiceId};
