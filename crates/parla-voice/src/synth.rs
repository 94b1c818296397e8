//! Synthesis client — one text chunk in, one audio body out.
//!
//! Each call issues a single network request to the TTS endpoint. Requests
//! are individually cancellable; cancellation is reported as
//! [`SpeechError::Cancelled`] and is never treated as a failure.

use bytes::Bytes;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::asset::AudioFormat;
use crate::config::SpeechConfig;
use crate::error::SpeechError;

/// A synthesized audio body, not yet materialized into an asset.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub format: AudioFormat,
    pub bytes: Bytes,
}

/// Backend-agnostic speech synthesizer.
///
/// Object-safe so the pipeline can hold an `Arc<dyn Synthesizer>` and tests
/// can substitute a scripted mock.
#[async_trait::async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize one chunk of text.
    ///
    /// Implementations must observe `cancel` at every suspension point and
    /// return [`SpeechError::Cancelled`] promptly once it fires.
    async fn synthesize(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<SynthesizedAudio, SpeechError>;
}

/// Request body for the synthesis endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TtsRequest<'a> {
    text: &'a str,
    language: &'a str,
    voice: &'a str,
    chunk_size: u32,
}

/// HTTP synthesizer talking to the backend's TTS endpoint.
pub struct HttpSynthesizer {
    http: reqwest::Client,
    endpoint: String,
    language: String,
    voice: String,
    chunk_size: u32,
}

impl HttpSynthesizer {
    /// Build a synthesizer from the shared speech configuration.
    #[must_use]
    pub fn new(http: reqwest::Client, config: &SpeechConfig) -> Self {
        Self {
            http,
            endpoint: format!("{}/tts", config.api_url),
            language: config.language.clone(),
            voice: config.voice.clone(),
            chunk_size: config.chunk_size,
        }
    }
}

#[async_trait::async_trait]
impl Synthesizer for HttpSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<SynthesizedAudio, SpeechError> {
        let request = self
            .http
            .post(&self.endpoint)
            .json(&TtsRequest {
                text,
                language: &self.language,
                voice: &self.voice,
                chunk_size: self.chunk_size,
            })
            .send();

        // Dropping the request future aborts the underlying transport.
        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(SpeechError::Cancelled),
            res = request => res?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SpeechError::SynthesisStatus {
                status: status.as_u16(),
                body,
            });
        }

        let format = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map_or(AudioFormat::Mp3, AudioFormat::from_content_type);

        // Reading the body is a second suspension point — cancellation can
        // land while the audio is still streaming in.
        let bytes = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(SpeechError::Cancelled),
            res = response.bytes() => res?,
        };

        tracing::debug!(
            chars = text.chars().count(),
            bytes = bytes.len(),
            format = ?format,
            "Synthesized chunk"
        );

        Ok(SynthesizedAudio { format, bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pre_cancelled_request_returns_cancelled_without_io() {
        let config = SpeechConfig {
            // Unroutable; the biased select must bail before the request.
            api_url: "http://127.0.0.1:1".to_string(),
            ..SpeechConfig::default()
        };
        let synth = HttpSynthesizer::new(reqwest::Client::new(), &config);

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = synth.synthesize("Hello.", &cancel).await.unwrap_err();
        assert!(err.is_cancelled(), "expected Cancelled, got {err:?}");
    }
}
