use serde_json::Value;

use super::error::StorageResult;

/// Logical keys used by the app root
pub mod keys {
    /// The full session collection
    pub const SESSIONS: &str = "sessions";
    /// Id of the active session
    pub const ACTIVE_SESSION: &str = "active_session";
    /// Gemini API key
    pub const API_KEY: &str = "api_key";
    /// Default-settings template applied to new sessions
    pub const DEFAULT_SETTINGS: &str = "default_settings";
}

/// Synchronous key/value persistence of JSON-serializable blobs.
///
/// Writes are best-effort: the app swallows failures and keeps the
/// in-memory state as the source of truth.
pub trait KeyValueStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> StorageResult<Option<Value>>;
    fn set(&self, key: &str, value: Value) -> StorageResult<()>;
}
