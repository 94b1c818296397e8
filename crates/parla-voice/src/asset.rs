//! Audio asset materialization — the `AudioSink` capability.
//!
//! Synthesized audio arrives as a raw body; where it lives until playback is
//! a runtime concern (a cache file on desktop, an in-memory blob elsewhere).
//! The pipeline only ever talks to the [`AudioSink`] trait so its logic
//! never branches on platform.

use std::path::PathBuf;

use bytes::Bytes;

use crate::error::SpeechError;

// ── Formats ────────────────────────────────────────────────────────

/// Container format of a synthesized audio body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    Mp3,
}

impl AudioFormat {
    /// Derive the format from a response `Content-Type`.
    ///
    /// Absence of a recognized type defaults to MP3.
    #[must_use]
    pub fn from_content_type(content_type: &str) -> Self {
        if content_type.contains("wav") {
            Self::Wav
        } else {
            Self::Mp3
        }
    }

    /// File extension for cache files.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
        }
    }
}

// ── Assets ─────────────────────────────────────────────────────────

/// Where an asset's audio data lives.
#[derive(Debug, Clone)]
pub enum AssetSource {
    /// A file in the local cache directory.
    File(PathBuf),

    /// An in-memory blob.
    Memory(Bytes),
}

/// One synthesized audio clip, ready for playback.
///
/// Carries its source chunk's sequence position so the sequencer can play
/// assets in emission order, and the run it belongs to so stale assets are
/// recognizable at every hand-off point.
#[derive(Debug, Clone)]
pub struct AudioAsset {
    /// Run (turn) this asset belongs to.
    pub run: u64,

    /// Sequence position of the source chunk within its run.
    pub seq: u64,

    /// Container format.
    pub format: AudioFormat,

    /// Backing data.
    pub source: AssetSource,
}

// ── Sink trait ─────────────────────────────────────────────────────

/// Capability for materializing and releasing audio assets.
///
/// Object-safe; the pipeline holds an `Arc<dyn AudioSink>`.
#[async_trait::async_trait]
pub trait AudioSink: Send + Sync {
    /// Persist a synthesized audio body and return a playable asset.
    async fn materialize(
        &self,
        run: u64,
        seq: u64,
        format: AudioFormat,
        body: Bytes,
    ) -> Result<AudioAsset, SpeechError>;

    /// Release an asset's backing storage after playback (or when dropped
    /// as stale). Best-effort — failures are logged, never propagated.
    fn release(&self, asset: &AudioAsset);
}

// ── File-backed sink ───────────────────────────────────────────────

/// Writes each asset to its own file under a cache directory.
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    /// Create a sink over an existing directory.
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Create a sink under the platform cache directory (`…/parla/tts`),
    /// creating it if needed.
    pub fn in_cache_dir() -> Result<Self, SpeechError> {
        let dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("parla")
            .join("tts");
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }
}

#[async_trait::async_trait]
impl AudioSink for FileSink {
    async fn materialize(
        &self,
        run: u64,
        seq: u64,
        format: AudioFormat,
        body: Bytes,
    ) -> Result<AudioAsset, SpeechError> {
        let path = self
            .dir
            .join(format!("tts-{run}-{seq}.{}", format.extension()));
        tokio::fs::write(&path, &body).await?;

        tracing::debug!(path = %path.display(), bytes = body.len(), "Materialized audio asset");

        Ok(AudioAsset {
            run,
            seq,
            format,
            source: AssetSource::File(path),
        })
    }

    fn release(&self, asset: &AudioAsset) {
        if let AssetSource::File(path) = &asset.source {
            if let Err(e) = std::fs::remove_file(path) {
                tracing::debug!(path = %path.display(), error = %e, "Failed to remove cached asset");
            }
        }
    }
}

// ── Memory-backed sink ─────────────────────────────────────────────

/// Keeps assets as in-memory blobs. Used where no filesystem is available
/// (and by tests).
#[derive(Debug, Default)]
pub struct MemorySink;

#[async_trait::async_trait]
impl AudioSink for MemorySink {
    async fn materialize(
        &self,
        run: u64,
        seq: u64,
        format: AudioFormat,
        body: Bytes,
    ) -> Result<AudioAsset, SpeechError> {
        Ok(AudioAsset {
            run,
            seq,
            format,
            source: AssetSource::Memory(body),
        })
    }

    fn release(&self, _asset: &AudioAsset) {
        // Dropping the Bytes handle frees the blob.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_maps_wav() {
        assert_eq!(
            AudioFormat::from_content_type("audio/wav"),
            AudioFormat::Wav
        );
        assert_eq!(
            AudioFormat::from_content_type("audio/x-wav; charset=binary"),
            AudioFormat::Wav
        );
    }

    #[test]
    fn unknown_content_type_defaults_to_mp3() {
        assert_eq!(
            AudioFormat::from_content_type("application/octet-stream"),
            AudioFormat::Mp3
        );
        assert_eq!(AudioFormat::from_content_type(""), AudioFormat::Mp3);
    }

    #[tokio::test]
    async fn file_sink_materializes_and_releases() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = FileSink::new(tmp.path().to_path_buf());

        let asset = sink
            .materialize(1, 0, AudioFormat::Mp3, Bytes::from_static(b"abc"))
            .await
            .unwrap();

        let AssetSource::File(path) = &asset.source else {
            panic!("expected file-backed asset");
        };
        assert!(path.exists());
        assert_eq!(std::fs::read(path).unwrap(), b"abc");

        sink.release(&asset);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn memory_sink_keeps_body() {
        let sink = MemorySink;
        let asset = sink
            .materialize(2, 5, AudioFormat::Wav, Bytes::from_static(b"pcm"))
            .await
            .unwrap();
        assert_eq!(asset.run, 2);
        assert_eq!(asset.seq, 5);
        let AssetSource::Memory(body) = &asset.source else {
            panic!("expected memory-backed asset");
        };
        assert_eq!(&body[..], b"pcm");
    }
}
