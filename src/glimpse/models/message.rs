use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Lifecycle of an assistant message.
///
/// An assistant message is created in `Streaming` status and mutated in place
/// until it reaches a terminal status (`Done` or `Error`). Content is frozen
/// after that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Streaming,
    Done,
    Error,
}

/// Token accounting reported by the model at end of stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One turn in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// Unix timestamp in milliseconds
    pub created_at: i64,
    /// Opaque resource identifiers carried alongside user text (video URLs)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
    /// Assistant-only stream lifecycle status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Message {
    /// Create a user message from prompt text and parsed attachment URLs
    pub fn user(content: impl Into<String>, attachments: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::User,
            content: content.into(),
            created_at: Utc::now().timestamp_millis(),
            attachments,
            status: None,
            finish_reason: None,
            usage: None,
            error: None,
        }
    }

    /// Create an assistant placeholder in `Streaming` status with empty content
    pub fn assistant_placeholder() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: String::new(),
            created_at: Utc::now().timestamp_millis(),
            attachments: Vec::new(),
            status: Some(MessageStatus::Streaming),
            finish_reason: None,
            usage: None,
            error: None,
        }
    }

    /// Whether this message is still receiving content
    pub fn is_streaming(&self) -> bool {
        self.status == Some(MessageStatus::Streaming)
    }
}

/// Partial update applied to exactly one message by id.
/// Absent fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct MessagePatch {
    pub content: Option<String>,
    pub status: Option<MessageStatus>,
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
    pub error: Option<String>,
}

impl MessagePatch {
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn done(finish_reason: Option<String>, usage: Option<TokenUsage>) -> Self {
        Self {
            status: Some(MessageStatus::Done),
            finish_reason,
            usage,
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Some(MessageStatus::Error),
            error: Some(message.into()),
            ..Default::default()
        }
    }

    /// Apply this patch to a message in place
    pub fn apply(self, message: &mut Message) {
        if let Some(content) = self.content {
            message.content = content;
        }
        if let Some(status) = self.status {
            message.status = Some(status);
        }
        if let Some(finish_reason) = self.finish_reason {
            message.finish_reason = Some(finish_reason);
        }
        if let Some(usage) = self.usage {
            message.usage = Some(usage);
        }
        if let Some(error) = self.error {
            message.error = Some(error);
        }
    }
}
