use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::glimpse::models::TokenUsage;

/// Stream chunks yielded by a model adapter.
///
/// `Content` carries the full cumulative text so far, not a delta; the
/// consumer replaces the assistant message's content wholesale. A stream
/// terminates with exactly one `Done` or `Error` under normal operation.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    Content {
        text: String,
    },
    Done {
        finish_reason: Option<String>,
        usage: Option<TokenUsage>,
    },
    Error {
        message: String,
    },
}

/// Type alias for response streams
pub type ChunkStream = BoxStream<'static, Result<StreamChunk>>;

/// Shared cooperative cancellation flag.
///
/// The stream controller sets it, the adapter stops yielding chunks once it
/// is set, and the consumer loop checks it before applying any chunk.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Role tag in the adapter's wire format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    User,
    Model,
}

/// Typed content part of a conversation turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnPart {
    Text(String),
    /// External video reference (YouTube URL)
    Video(String),
}

/// One role-tagged entry of the request history
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub parts: Vec<TurnPart>,
}

/// Everything an adapter needs to open one streaming exchange
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub model: String,
    pub history: Vec<ChatTurn>,
    pub system_prompt: Option<String>,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub cancel: CancelToken,
}

/// External collaborator that performs the actual network exchange with the
/// generative model
#[async_trait]
pub trait ModelAdapter: Send + Sync + 'static {
    /// Open a streaming request. The returned sequence is finite, consumed
    /// once, and yields no further chunks after cancellation is signaled.
    async fn open_stream(&self, credential: &str, request: StreamRequest) -> Result<ChunkStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_is_sticky_and_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());

        clone.cancel();
        assert!(token.is_cancelled());

        // Cancelling again changes nothing
        token.cancel();
        assert!(token.is_cancelled());
    }
}
