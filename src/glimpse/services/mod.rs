pub mod gemini;
pub mod stream;

pub use gemini::GeminiAdapter;
pub use stream::{CancelToken, ChunkStream, ModelAdapter, StreamChunk, StreamRequest};
