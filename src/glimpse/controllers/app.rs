use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, warn};

use crate::glimpse::models::{Session, SessionSettings, SessionStore, SettingsPatch};
use crate::glimpse::repositories::{KeyValueStore, keys};
use crate::glimpse::services::ModelAdapter;

use super::stream_controller::{SendError, StreamController};

/// Observer callback fired after every snapshot change
pub type Observer = Box<dyn Fn() + Send + Sync>;

/// Shared application state mutated by both user actions and the background
/// stream-consumer task. Every mutation goes through [`AppShared::with_store`],
/// which persists the snapshot (best effort) and notifies observers.
pub(crate) struct AppShared {
    store: Mutex<SessionStore>,
    credential: Mutex<String>,
    template: Mutex<SessionSettings>,
    storage: Arc<dyn KeyValueStore>,
    observers: Mutex<Vec<Observer>>,
}

impl AppShared {
    /// Mutate the store atomically, persist the snapshot, notify observers
    pub(crate) fn with_store<R>(&self, f: impl FnOnce(&mut SessionStore) -> R) -> R {
        let result = {
            let mut store = self.store.lock();
            let result = f(&mut store);
            self.persist_sessions(&store);
            result
        };
        self.notify();
        result
    }

    pub(crate) fn read_store<R>(&self, f: impl FnOnce(&SessionStore) -> R) -> R {
        f(&self.store.lock())
    }

    pub(crate) fn credential(&self) -> String {
        self.credential.lock().clone()
    }

    pub(crate) fn template(&self) -> SessionSettings {
        self.template.lock().clone()
    }

    /// Best-effort write of one logical key; failures are logged and swallowed
    fn persist_value(&self, key: &str, value: serde_json::Value) {
        if let Err(e) = self.storage.set(key, value) {
            warn!(key, error = %e, "Persistence write failed, keeping in-memory state");
        }
    }

    fn persist_sessions(&self, store: &SessionStore) {
        match serde_json::to_value(store.sessions()) {
            Ok(value) => self.persist_value(keys::SESSIONS, value),
            Err(e) => warn!(error = %e, "Failed to serialize sessions"),
        }
        self.persist_value(keys::ACTIVE_SESSION, json!(store.active_id()));
    }

    fn notify(&self) {
        for observer in self.observers.lock().iter() {
            observer();
        }
    }
}

/// Top-level controller owning all client state: the session store, the
/// credential, the default-settings template, the persistence handle, and
/// the single in-flight stream.
pub struct GlimpseApp {
    shared: Arc<AppShared>,
    controller: StreamController,
}

impl GlimpseApp {
    /// Build the app root, restoring persisted state.
    ///
    /// Storage reads are best effort: unreadable keys fall back to defaults.
    /// The restored settings template degrades gracefully for data written
    /// by older versions (missing fields take hardcoded defaults).
    pub fn new(storage: Arc<dyn KeyValueStore>, adapter: Arc<dyn ModelAdapter>) -> Self {
        let template = read_key::<SessionSettings>(&*storage, keys::DEFAULT_SETTINGS)
            .unwrap_or_default();
        let credential = read_key::<String>(&*storage, keys::API_KEY).unwrap_or_default();
        let sessions = read_key::<Vec<Session>>(&*storage, keys::SESSIONS).unwrap_or_default();
        let active_id = read_key::<String>(&*storage, keys::ACTIVE_SESSION);

        let store = SessionStore::from_parts(sessions, active_id, &template);
        debug!(
            sessions = store.sessions().len(),
            "Restored session store"
        );

        let shared = Arc::new(AppShared {
            store: Mutex::new(store),
            credential: Mutex::new(credential),
            template: Mutex::new(template),
            storage,
            observers: Mutex::new(Vec::new()),
        });

        Self {
            shared,
            controller: StreamController::new(adapter),
        }
    }

    /// Register a callback fired after every snapshot change
    pub fn subscribe(&self, observer: impl Fn() + Send + Sync + 'static) {
        self.shared.observers.lock().push(Box::new(observer));
    }

    pub fn credential(&self) -> String {
        self.shared.credential()
    }

    pub fn set_credential(&self, credential: impl Into<String>) {
        let credential = credential.into();
        *self.shared.credential.lock() = credential.clone();
        self.shared.persist_value(keys::API_KEY, json!(credential));
    }

    /// Snapshot of all sessions, most recently created first
    pub fn sessions(&self) -> Vec<Session> {
        self.shared.read_store(|store| store.sessions().to_vec())
    }

    pub fn active_session_id(&self) -> String {
        self.shared.read_store(|store| store.active_id().to_string())
    }

    pub fn get_session(&self, id: &str) -> Option<Session> {
        self.shared.read_store(|store| store.get(id).cloned())
    }

    /// Create a session from the current default-settings template and make
    /// it active. Returns the new session id.
    pub fn create_session(&self) -> String {
        let template = self.shared.template();
        self.shared
            .with_store(|store| store.create_session(&template))
    }

    /// Delete a session. Any stream still targeting it is cancelled; the
    /// store synthesizes a fresh default session when the last one goes.
    pub fn delete_session(&mut self, id: &str) {
        self.controller.cancel_for_session(&self.shared, id);
        let template = self.shared.template();
        self.shared
            .with_store(|store| store.delete_session(id, &template));
    }

    /// Switch the active session. Returns false for an unknown id.
    /// An in-flight stream keeps running against its own session.
    pub fn select_session(&self, id: &str) -> bool {
        self.shared.with_store(|store| store.set_active(id))
    }

    pub fn clear_messages(&self, id: &str) {
        self.shared.with_store(|store| store.clear_messages(id));
    }

    /// Merge a settings patch into the named session and adopt the merged
    /// result as the template for future sessions.
    pub fn update_settings(&self, session_id: &str, patch: SettingsPatch) {
        let merged = self
            .shared
            .with_store(|store| store.update_settings(session_id, patch));
        let Some(merged) = merged else {
            return;
        };
        *self.shared.template.lock() = merged.clone();
        match serde_json::to_value(&merged) {
            Ok(value) => self.shared.persist_value(keys::DEFAULT_SETTINGS, value),
            Err(e) => warn!(error = %e, "Failed to serialize settings template"),
        }
    }

    /// Send a prompt on the named session and start streaming the reply.
    /// A still-active prior stream is cancelled first.
    pub fn send(&mut self, session_id: &str, prompt: &str) -> Result<(), SendError> {
        self.controller.send(&self.shared, session_id, prompt)
    }

    /// Cancel the active stream, marking its message as canceled.
    /// Idempotent when nothing is streaming.
    pub fn stop(&mut self) {
        self.controller.stop(&self.shared);
    }

    pub fn is_streaming(&self) -> bool {
        self.controller.is_streaming()
    }

    /// Wait for the current stream-consumer task to finish.
    /// Intended for tests and embedders that need a quiescent state.
    pub async fn join_stream(&mut self) {
        self.controller.join().await;
    }
}

/// Read and deserialize one logical key, treating failures as absent
fn read_key<T: serde::de::DeserializeOwned>(storage: &dyn KeyValueStore, key: &str) -> Option<T> {
    let value = match storage.get(key) {
        Ok(value) => value?,
        Err(e) => {
            warn!(key, error = %e, "Persistence read failed, using defaults");
            return None;
        }
    };
    match serde_json::from_value(value) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            warn!(key, error = %e, "Stored value malformed, using defaults");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::glimpse::models::PLACEHOLDER_TITLE;
    use crate::glimpse::repositories::InMemoryStore;
    use crate::glimpse::services::stream::{ChunkStream, StreamRequest};
    use anyhow::Result;
    use async_trait::async_trait;

    /// Adapter that never gets called; app tests exercise state only
    struct NullAdapter;

    #[async_trait]
    impl ModelAdapter for NullAdapter {
        async fn open_stream(&self, _: &str, _: StreamRequest) -> Result<ChunkStream> {
            Ok(Box::pin(futures::stream::empty()))
        }
    }

    fn app_with(storage: Arc<InMemoryStore>) -> GlimpseApp {
        GlimpseApp::new(storage, Arc::new(NullAdapter))
    }

    #[test]
    fn test_fresh_app_has_one_default_session() {
        let app = app_with(Arc::new(InMemoryStore::new()));
        let sessions = app.sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].title, PLACEHOLDER_TITLE);
        assert_eq!(app.active_session_id(), sessions[0].id);
    }

    #[test]
    fn test_round_trip_persistence_reproduces_snapshot() {
        let storage = Arc::new(InMemoryStore::new());

        let first_id;
        {
            let app = app_with(storage.clone());
            first_id = app.active_session_id();
            let second = app.create_session();
            app.update_settings(
                &second,
                SettingsPatch {
                    temperature: Some(0.4),
                    ..Default::default()
                },
            );
            app.set_credential("secret-key");
            app.select_session(&first_id);
        }

        let app = app_with(storage);
        let sessions = app.sessions();
        assert_eq!(sessions.len(), 2);
        assert_eq!(app.active_session_id(), first_id);
        assert_eq!(app.credential(), "secret-key");
        // The merged settings became the template for future sessions
        let created = app.create_session();
        assert_eq!(app.get_session(&created).unwrap().settings.temperature, 0.4);
    }

    #[test]
    fn test_persistence_failure_is_swallowed() {
        let storage = Arc::new(InMemoryStore::new());
        let app = app_with(storage.clone());

        storage.fail_writes(true);
        let id = app.create_session();
        assert_eq!(app.sessions().len(), 2);
        assert_eq!(app.active_session_id(), id);
    }

    #[test]
    fn test_delete_last_session_synthesizes_default() {
        let mut app = app_with(Arc::new(InMemoryStore::new()));
        let id = app.active_session_id();
        app.delete_session(&id);

        let sessions = app.sessions();
        assert_eq!(sessions.len(), 1);
        assert_ne!(sessions[0].id, id);
        assert_eq!(app.active_session_id(), sessions[0].id);
    }

    #[test]
    fn test_observers_fire_on_snapshot_changes() {
        let app = app_with(Arc::new(InMemoryStore::new()));
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        app.subscribe(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        app.create_session();
        app.clear_messages(&app.active_session_id());
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_restored_template_merges_over_defaults() {
        let storage = Arc::new(InMemoryStore::new());
        storage
            .set(keys::DEFAULT_SETTINGS, serde_json::json!({"model": "gemini-1.5-pro"}))
            .unwrap();

        let app = app_with(storage);
        let session = app.sessions().into_iter().next().unwrap();
        assert_eq!(session.settings.model, "gemini-1.5-pro");
        assert_eq!(session.settings.top_p, SessionSettings::default().top_p);
    }

    #[test]
    fn test_restore_with_stale_active_id_falls_back() {
        let storage = Arc::new(InMemoryStore::new());
        {
            let app = app_with(storage.clone());
            app.create_session();
        }
        storage
            .set(keys::ACTIVE_SESSION, serde_json::json!("no-such-session"))
            .unwrap();

        let app = app_with(storage);
        assert_eq!(app.active_session_id(), app.sessions()[0].id);
    }

    #[test]
    fn test_select_unknown_session_is_rejected() {
        let app = app_with(Arc::new(InMemoryStore::new()));
        let active = app.active_session_id();
        assert!(!app.select_session("missing"));
        assert_eq!(app.active_session_id(), active);
    }
}
