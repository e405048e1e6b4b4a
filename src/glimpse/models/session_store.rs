use tracing::debug;

use super::message::{Message, MessagePatch, Role};
use super::session::{Session, SessionSettings, SettingsPatch, derive_title};

/// In-memory store for all chat sessions.
///
/// Invariants:
/// - the session collection is never empty
/// - `active_id` always references a member of the collection
/// - sessions are ordered by recency of creation, most recent first
///
/// All operations are total: invalid ids are no-ops.
pub struct SessionStore {
    sessions: Vec<Session>,
    active_id: String,
}

impl SessionStore {
    /// Create a store seeded with one default session
    pub fn new(template: &SessionSettings) -> Self {
        let session = Session::new(template);
        let active_id = session.id.clone();
        Self {
            sessions: vec![session],
            active_id,
        }
    }

    /// Rebuild a store from persisted parts.
    ///
    /// An empty collection synthesizes a default session; an active id that
    /// no longer resolves falls back to the first session.
    pub fn from_parts(
        mut sessions: Vec<Session>,
        active_id: Option<String>,
        template: &SessionSettings,
    ) -> Self {
        if sessions.is_empty() {
            sessions.push(Session::new(template));
        }
        let active_id = active_id
            .filter(|id| sessions.iter().any(|s| &s.id == id))
            .unwrap_or_else(|| sessions[0].id.clone());
        Self {
            sessions,
            active_id,
        }
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn active_id(&self) -> &str {
        &self.active_id
    }

    pub fn active_session(&self) -> &Session {
        // The non-empty and active-reference invariants make this lookup total
        self.sessions
            .iter()
            .find(|s| s.id == self.active_id)
            .unwrap_or(&self.sessions[0])
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    /// Create a session from the settings template and make it active.
    /// Returns the new session id.
    pub fn create_session(&mut self, template: &SessionSettings) -> String {
        let session = Session::new(template);
        let id = session.id.clone();
        self.sessions.insert(0, session);
        self.active_id = id.clone();
        debug!(session_id = %id, "Created session");
        id
    }

    /// Delete a session by id.
    ///
    /// If the deleted session was active, activation moves to the first
    /// remaining session. Deleting the last session synthesizes a fresh
    /// default session so the store is never observably empty.
    pub fn delete_session(&mut self, id: &str, template: &SessionSettings) {
        let Some(index) = self.sessions.iter().position(|s| s.id == id) else {
            return;
        };
        self.sessions.remove(index);

        if self.sessions.is_empty() {
            let session = Session::new(template);
            self.active_id = session.id.clone();
            self.sessions.push(session);
        } else if self.active_id == id {
            self.active_id = self.sessions[0].id.clone();
        }
        debug!(session_id = %id, remaining = self.sessions.len(), "Deleted session");
    }

    /// Switch the active session. Returns false for an unknown id.
    pub fn set_active(&mut self, id: &str) -> bool {
        if self.sessions.iter().any(|s| s.id == id) {
            self.active_id = id.to_string();
            true
        } else {
            false
        }
    }

    /// Empty the message sequence of the named session.
    /// Settings and title are left untouched.
    pub fn clear_messages(&mut self, id: &str) {
        if let Some(session) = self.get_mut(id) {
            session.messages.clear();
            session.touch();
        }
    }

    /// Append messages to the end of the named session's sequence.
    ///
    /// If the session still carries the placeholder title and the first
    /// appended message is from the user, a title is derived from its content.
    pub fn append_messages(&mut self, id: &str, messages: Vec<Message>) {
        let Some(session) = self.get_mut(id) else {
            return;
        };
        if session.has_placeholder_title()
            && let Some(first) = messages.first()
            && first.role == Role::User
            && let Some(title) = derive_title(&first.content)
        {
            session.title = title;
        }
        session.messages.extend(messages);
        session.touch();
    }

    /// Apply a partial update to exactly one message by id.
    /// No-op if the session or message is not found.
    pub fn update_message(&mut self, session_id: &str, message_id: &str, patch: MessagePatch) {
        let Some(session) = self.get_mut(session_id) else {
            return;
        };
        let Some(message) = session.messages.iter_mut().find(|m| m.id == message_id) else {
            return;
        };
        patch.apply(message);
        session.touch();
    }

    /// Apply a patch only while the target message is still streaming.
    ///
    /// This is the write path for stream-driven mutations: once a message has
    /// reached a terminal status (stop, error, or a completed exchange), late
    /// or duplicate chunks are discarded, as are mutations addressed to a
    /// session that no longer exists. Returns whether the patch was applied.
    pub fn patch_streaming_message(
        &mut self,
        session_id: &str,
        message_id: &str,
        patch: MessagePatch,
    ) -> bool {
        let Some(session) = self.get_mut(session_id) else {
            debug!(session_id, "Dropping stream patch for deleted session");
            return false;
        };
        let Some(message) = session.messages.iter_mut().find(|m| m.id == message_id) else {
            return false;
        };
        if !message.is_streaming() {
            return false;
        }
        patch.apply(message);
        session.touch();
        true
    }

    /// Merge a patch into the named session's settings.
    /// Returns a copy of the merged settings for use as the new template.
    pub fn update_settings(
        &mut self,
        session_id: &str,
        patch: SettingsPatch,
    ) -> Option<SessionSettings> {
        let session = self.get_mut(session_id)?;
        patch.apply(&mut session.settings);
        session.touch();
        Some(session.settings.clone())
    }
}
