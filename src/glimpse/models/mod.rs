pub mod message;
pub mod session;
pub mod session_store;

pub use message::{Message, MessagePatch, MessageStatus, Role, TokenUsage};
pub use session::{PLACEHOLDER_TITLE, Session, SessionSettings, SettingsPatch};
pub use session_store::SessionStore;
