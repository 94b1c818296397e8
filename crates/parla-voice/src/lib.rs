//! Streaming speech pipeline for parla, a conversational language tutor.
//!
//! The model's reply streams in token by token; this crate turns that
//! stream into seamless speech with minimal delay. Tokens are segmented
//! into speakable sentence chunks, each chunk is synthesized by a remote
//! TTS endpoint (at most [`pipeline::MAX_PREFETCH`] requests in flight),
//! and the resulting audio assets play back strictly in sentence order.
//! A generation counter (`run`) lets a new turn, a user stop, or an
//! input-mode switch instantly invalidate everything in flight.

pub mod asset;
pub mod chat;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod playback;
pub mod segment;
pub mod sse;
pub mod synth;

// Re-export key types for convenience
pub use asset::{AssetSource, AudioAsset, AudioFormat, AudioSink, FileSink, MemorySink};
pub use chat::{ChatClient, TeachMode};
pub use config::SpeechConfig;
pub use error::SpeechError;
pub use pipeline::{MAX_PREFETCH, PipelineStats, SpeechEvent, SpeechPipeline};
pub use playback::{PlaybackDevice, PlaybackStatus, RodioPlayer};
pub use segment::SentenceSegmenter;
pub use sse::{SseDecoder, TokenEvent};
pub use synth::{HttpSynthesizer, SynthesizedAudio, Synthesizer};
