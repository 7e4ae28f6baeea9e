pub mod cancel;
pub mod citation;
pub mod embeddings;
pub mod engine;
pub mod index;
pub mod retrieve;

pub use cancel::CancelToken;
pub use engine::{EngineStatus, RetrievalEngine};
