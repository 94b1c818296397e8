//! Speech pipeline error types.

/// Errors that can occur in the speech pipeline.
#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    /// Transport-level failure talking to the chat or synthesis endpoint.
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Chat endpoint rejected the turn.
    #[error("Chat endpoint returned {status}: {body}")]
    ChatStatus { status: u16, body: String },

    /// Synthesis endpoint rejected a chunk.
    #[error("Synthesis endpoint returned {status}: {body}")]
    SynthesisStatus { status: u16, body: String },

    /// Failed to start playback of an audio asset.
    #[error("Playback device error: {0}")]
    Playback(String),

    /// The operation was cancelled (user stop, new turn, mode switch).
    ///
    /// Distinguished from genuine failure — never surfaced as an error to
    /// the user.
    #[error("Speech operation cancelled")]
    Cancelled,

    /// The pipeline actor has shut down and can no longer accept commands.
    #[error("Speech pipeline is shut down")]
    PipelineClosed,

    /// IO error (audio asset cache).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpeechError {
    /// Whether this error is a cooperative cancellation rather than a failure.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
