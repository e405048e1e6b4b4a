pub mod error;
pub mod in_memory;
pub mod json_file;
pub mod key_value;

pub use error::{StorageError, StorageResult};
pub use in_memory::InMemoryStore;
pub use json_file::JsonFileStore;
pub use key_value::{KeyValueStore, keys};
