//! Glimpse — the session/stream core of a Gemini video-understanding chat
//! client.
//!
//! The crate models chat sessions, messages, and a single in-flight streaming
//! exchange, keeping them consistent under concurrent user actions while a
//! network stream is active. Presentation is out of scope: embedders observe
//! snapshot changes through [`GlimpseApp::subscribe`] and render however they
//! like.

pub mod glimpse;
pub mod logging;

pub use glimpse::{GlimpseApp, SendError};
