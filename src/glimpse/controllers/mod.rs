pub mod app;
pub mod stream_controller;

pub use app::GlimpseApp;
pub use stream_controller::{CANCELED_BY_USER, SendError};
