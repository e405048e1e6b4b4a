pub mod controllers;
pub mod models;
pub mod repositories;
pub mod services;
pub mod validation;

pub use controllers::{GlimpseApp, SendError};
