//! Optional chat transcript collaborator.
//!
//! Runs attached to a chat mirror their externally-visible assistant
//! messages into the chat's transcript. The collaborator is external;
//! mirroring must never block or fail a turn.

use std::sync::Mutex;

use async_trait::async_trait;

/// Transcript-level error type.
#[derive(Debug, thiserror::Error)]
#[error("chat transcript error: {0}")]
pub struct TranscriptError(pub String);

#[async_trait]
pub trait ChatTranscript: Send + Sync {
    async fn record_assistant_message(
        &self,
        chat_id: &str,
        content: &str,
    ) -> Result<(), TranscriptError>;
}

/// Default collaborator for deployments without a chat domain.
pub struct NoopChatTranscript;

#[async_trait]
impl ChatTranscript for NoopChatTranscript {
    async fn record_assistant_message(
        &self,
        _chat_id: &str,
        _content: &str,
    ) -> Result<(), TranscriptError> {
        Ok(())
    }
}

/// Test collaborator that records every mirrored message.
pub struct RecordingChatTranscript {
    messages: Mutex<Vec<(String, String)>>,
}

impl RecordingChatTranscript {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }
}

impl Default for RecordingChatTranscript {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatTranscript for RecordingChatTranscript {
    async fn record_assistant_message(
        &self,
        chat_id: &str,
        content: &str,
    ) -> Result<(), TranscriptError> {
        self.messages
            .lock()
            .map_err(|_| TranscriptError("recording transcript lock poisoned".to_string()))?
            .push((chat_id.to_string(), content.to_string()));
        Ok(())
    }
}
