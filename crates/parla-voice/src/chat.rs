//! Chat stream client — drives one tutoring turn end to end.
//!
//! Sends the user's text to the chat endpoint, consumes the SSE token
//! stream, forwards each token to the speech pipeline (for live synthesis)
//! and to the caller (for live display), and returns the assembled reply.

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::SpeechConfig;
use crate::error::SpeechError;
use crate::pipeline::SpeechPipeline;
use crate::sse::{SseDecoder, TokenEvent};

// ── Wire types ─────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TalkRequest<'a> {
    session_id: &'a str,
    user_text: &'a str,
    lang: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TeachRequest<'a> {
    user_text: &'a str,
    talk_text: &'a str,
    mode: &'a str,
}

#[derive(Debug, Deserialize)]
struct TeachResponse {
    teach: Option<String>,
}

/// How much tutoring feedback to request after each turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TeachMode {
    /// No feedback.
    Off,

    /// A short translation hint.
    Hint,

    /// Full tutor commentary.
    #[default]
    Tutor,
}

impl TeachMode {
    const fn wire_value(self) -> Option<&'static str> {
        match self {
            Self::Off => None,
            Self::Hint => Some("translate"),
            Self::Tutor => Some("tutor"),
        }
    }
}

// ── Client ─────────────────────────────────────────────────────────

/// Client for the tutoring backend's chat endpoints.
pub struct ChatClient {
    http: reqwest::Client,
    config: SpeechConfig,
}

impl ChatClient {
    #[must_use]
    pub fn new(http: reqwest::Client, config: SpeechConfig) -> Self {
        Self { http, config }
    }

    /// Warm up the backend. Failures are ignored — this is purely an
    /// optimization against cold starts.
    pub async fn ping(&self) {
        let url = format!("{}/ping", self.config.api_url);
        let _ = self.http.get(url).send().await;
    }

    /// Run one turn: stream the reply, speaking it as it arrives.
    ///
    /// Starts a fresh pipeline run (invalidating any previous turn's audio),
    /// then feeds every streamed token to the pipeline and to `on_token`.
    /// Returns the full reply text once the stream ends.
    ///
    /// Cancelling `cancel` mid-stream aborts the transport and returns
    /// [`SpeechError::Cancelled`]; the caller decides what (if anything) to
    /// show — a user-initiated stop is not an error. A transport failure
    /// *mid-stream* is logged and treated as end of stream, keeping
    /// whatever was already received.
    pub async fn stream_turn(
        &self,
        user_text: &str,
        pipeline: &SpeechPipeline,
        cancel: &CancellationToken,
        mut on_token: impl FnMut(&str),
    ) -> Result<String, SpeechError> {
        pipeline.begin_turn().await?;

        let url = format!("{}/talk", self.config.api_url);
        let request = self
            .http
            .post(url)
            .json(&TalkRequest {
                session_id: &self.config.session_id,
                user_text,
                lang: &self.config.language,
            })
            .send();

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(SpeechError::Cancelled),
            res = request => res?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SpeechError::ChatStatus {
                status: status.as_u16(),
                body,
            });
        }

        let mut stream = response.bytes_stream();
        let mut decoder = SseDecoder::new();
        let mut full_text = String::new();
        let mut done = false;

        'stream: loop {
            let chunk = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    pipeline.cancel()?;
                    return Err(SpeechError::Cancelled);
                }
                chunk = stream.next() => chunk,
            };

            let bytes = match chunk {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => {
                    // Keep the partial reply; the pipeline speaks what it
                    // already has.
                    tracing::warn!(error = %e, "Token stream failed mid-turn, treating as ended");
                    break;
                }
                None => break,
            };

            for event in decoder.feed(&bytes) {
                match event {
                    TokenEvent::Token(token) => {
                        full_text.push_str(&token);
                        on_token(&token);
                        pipeline.push_token(&token)?;
                    }
                    TokenEvent::Done => {
                        done = true;
                        break 'stream;
                    }
                }
            }
        }

        if !done {
            for event in decoder.finish() {
                if let TokenEvent::Token(token) = event {
                    full_text.push_str(&token);
                    on_token(&token);
                    pipeline.push_token(&token)?;
                }
            }
        }

        pipeline.end_of_stream()?;

        tracing::debug!(chars = full_text.chars().count(), "Turn stream complete");
        Ok(full_text)
    }

    /// Fetch tutoring feedback for a completed turn.
    ///
    /// Returns `None` when `mode` is [`TeachMode::Off`] or the backend has
    /// no feedback to give.
    pub async fn teach(
        &self,
        user_text: &str,
        talk_text: &str,
        mode: TeachMode,
    ) -> Result<Option<String>, SpeechError> {
        let Some(mode) = mode.wire_value() else {
            return Ok(None);
        };

        let url = format!("{}/teach", self.config.api_url);
        let response = self
            .http
            .post(url)
            .json(&TeachRequest {
                user_text,
                talk_text,
                mode,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SpeechError::ChatStatus {
                status: status.as_u16(),
                body,
            });
        }

        let teach: TeachResponse = response.json().await?;
        Ok(teach.teach.filter(|t| !t.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn teach_mode_wire_values() {
        assert_eq!(TeachMode::Off.wire_value(), None);
        assert_eq!(TeachMode::Hint.wire_value(), Some("translate"));
        assert_eq!(TeachMode::Tutor.wire_value(), Some("tutor"));
    }
}
