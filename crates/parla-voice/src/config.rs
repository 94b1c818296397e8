//! Speech pipeline configuration.

use serde::{Deserialize, Serialize};

/// Configuration shared by the chat stream client and the synthesis client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    /// Base URL of the tutoring backend (chat + synthesis endpoints).
    pub api_url: String,

    /// Chat session identifier sent with every turn.
    pub session_id: String,

    /// Language being learned (e.g. `"it"`, `"en"`). Sent to both the chat
    /// and synthesis endpoints.
    pub language: String,

    /// Voice identifier for synthesis (backend-specific meaning).
    pub voice: String,

    /// Generation chunk-size hint forwarded to the synthesis endpoint.
    pub chunk_size: u32,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8787".to_string(),
            session_id: "local-dev-session".to_string(),
            language: "en".to_string(),
            voice: "default".to_string(),
            chunk_size: 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_points_at_local_backend() {
        let config = SpeechConfig::default();
        assert!(config.api_url.starts_with("http://localhost"));
        assert_eq!(config.chunk_size, 20);
    }
}
