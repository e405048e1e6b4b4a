use std::sync::Arc;

use futures::StreamExt;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::glimpse::models::{Message, MessagePatch, MessageStatus, Role};
use crate::glimpse::services::stream::{
    CancelToken, ChatTurn, ModelAdapter, StreamChunk, StreamRequest, TurnPart, TurnRole,
};
use crate::glimpse::validation::{self, ValidationError};

use super::app::AppShared;

/// Error text recorded when the user cancels a stream
pub const CANCELED_BY_USER: &str = "Canceled by user.";

/// Fallback error text when a stream dies before any terminal chunk
const STREAM_INTERRUPTED: &str = "The response stream ended unexpectedly.";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Unknown session: {0}")]
    SessionNotFound(String),
}

struct ActiveStream {
    session_id: String,
    message_id: String,
    cancel: CancelToken,
    task: Option<JoinHandle<()>>,
}

/// Owner of the single in-flight streaming exchange.
///
/// Mediates between user intent (send/stop) and the model adapter, and
/// relays chunks into the session store. At most one assistant message is
/// in streaming status at any time: starting a new send cancels a
/// still-active prior stream first.
pub struct StreamController {
    adapter: Arc<dyn ModelAdapter>,
    active: Option<ActiveStream>,
}

impl StreamController {
    pub fn new(adapter: Arc<dyn ModelAdapter>) -> Self {
        Self {
            adapter,
            active: None,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| a.task.as_ref().is_some_and(|t| !t.is_finished()))
    }

    /// Validate and start one streaming exchange.
    ///
    /// Appends the user message and an assistant placeholder, then spawns a
    /// consumer task relaying adapter chunks into the store. Rejections leave
    /// the store untouched. A blank prompt is a no-op.
    pub(crate) fn send(
        &mut self,
        shared: &Arc<AppShared>,
        session_id: &str,
        prompt: &str,
    ) -> Result<(), SendError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Ok(());
        }

        let settings = shared
            .read_store(|store| store.get(session_id).map(|s| s.settings.clone()))
            .ok_or_else(|| SendError::SessionNotFound(session_id.to_string()))?;
        let credential = shared.credential();
        let attachments = validation::precheck(&credential, &settings)?;

        // A new send silently cancels and discards any still-active stream,
        // keeping at most one message in streaming status
        self.stop(shared);

        let user = Message::user(prompt, attachments);
        let assistant = Message::assistant_placeholder();
        let message_id = assistant.id.clone();
        shared.with_store(|store| store.append_messages(session_id, vec![user, assistant]));

        let history = shared.read_store(|store| {
            store
                .get(session_id)
                .map(|s| history_turns(&s.messages))
                .unwrap_or_default()
        });

        let cancel = CancelToken::new();
        let request = StreamRequest {
            model: settings.model.clone(),
            history,
            system_prompt: Some(settings.system_prompt.clone())
                .filter(|prompt| !prompt.trim().is_empty()),
            temperature: settings.temperature,
            top_p: settings.top_p,
            max_tokens: settings.max_tokens,
            cancel: cancel.clone(),
        };

        debug!(session_id, model = %settings.model, "Starting stream");
        let task = tokio::spawn(consume_stream(
            self.adapter.clone(),
            shared.clone(),
            credential,
            session_id.to_string(),
            message_id.clone(),
            request,
        ));

        self.active = Some(ActiveStream {
            session_id: session_id.to_string(),
            message_id,
            cancel,
            task: Some(task),
        });
        Ok(())
    }

    /// Cancel the active stream and mark its message as canceled.
    /// Synchronous from the caller's perspective; idempotent when nothing
    /// is streaming.
    pub(crate) fn stop(&mut self, shared: &Arc<AppShared>) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.cancel.cancel();
        shared.with_store(|store| {
            store.patch_streaming_message(
                &active.session_id,
                &active.message_id,
                MessagePatch::error(CANCELED_BY_USER),
            )
        });
        // Backstop: the cancel flag stops chunk application, aborting the
        // task also drops a stream blocked on the network
        if let Some(task) = active.task {
            task.abort();
        }
        debug!(session_id = %active.session_id, "Stream stopped");
    }

    /// Cancel the active stream if it targets the named session
    /// (used when that session is deleted)
    pub(crate) fn cancel_for_session(&mut self, shared: &Arc<AppShared>, session_id: &str) {
        if self
            .active
            .as_ref()
            .is_some_and(|a| a.session_id == session_id)
        {
            self.stop(shared);
        }
    }

    /// Wait for the current consumer task to finish
    pub(crate) async fn join(&mut self) {
        if let Some(active) = self.active.as_mut()
            && let Some(task) = active.task.take()
        {
            let _ = task.await;
        }
    }
}

/// Convert a session's message history into the adapter's wire format.
///
/// User messages carry one text part plus one video part per attachment.
/// Only completed assistant replies are included; errored replies and the
/// in-flight placeholder are not sent back to the model.
fn history_turns(messages: &[Message]) -> Vec<ChatTurn> {
    messages
        .iter()
        .filter_map(|message| match message.role {
            Role::User => {
                let mut parts = vec![TurnPart::Text(message.content.clone())];
                parts.extend(message.attachments.iter().cloned().map(TurnPart::Video));
                Some(ChatTurn {
                    role: TurnRole::User,
                    parts,
                })
            }
            Role::Assistant => (message.status == Some(MessageStatus::Done)
                && !message.content.is_empty())
            .then(|| ChatTurn {
                role: TurnRole::Model,
                parts: vec![TurnPart::Text(message.content.clone())],
            }),
        })
        .collect()
}

/// Relay adapter chunks into the store until a terminal chunk, stream end,
/// or cancellation. All writes go through the streaming-only patch path, so
/// late chunks after cancellation and chunks addressed to a deleted session
/// are discarded.
async fn consume_stream(
    adapter: Arc<dyn ModelAdapter>,
    shared: Arc<AppShared>,
    credential: String,
    session_id: String,
    message_id: String,
    request: StreamRequest,
) {
    let cancel = request.cancel.clone();
    let apply = |patch: MessagePatch| {
        shared.with_store(|store| store.patch_streaming_message(&session_id, &message_id, patch));
    };

    let mut stream = match adapter.open_stream(&credential, request).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "Failed to open model stream");
            apply(MessagePatch::error(STREAM_INTERRUPTED));
            return;
        }
    };

    let mut reached_terminal = false;
    while let Some(item) = stream.next().await {
        if cancel.is_cancelled() {
            break;
        }
        match item {
            Ok(StreamChunk::Content { text }) => {
                apply(MessagePatch::content(text));
            }
            Ok(StreamChunk::Done {
                finish_reason,
                usage,
            }) => {
                apply(MessagePatch::done(finish_reason, usage));
                reached_terminal = true;
                break;
            }
            Ok(StreamChunk::Error { message }) => {
                warn!(error = %message, "Stream reported an error");
                apply(MessagePatch::error(message));
                reached_terminal = true;
                break;
            }
            Err(e) => {
                warn!(error = %e, "Stream failed mid-flight");
                apply(MessagePatch::error(STREAM_INTERRUPTED));
                reached_terminal = true;
                break;
            }
        }
    }

    if !reached_terminal && !cancel.is_cancelled() {
        apply(MessagePatch::error(STREAM_INTERRUPTED));
    }
}
