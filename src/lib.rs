//! Vocabulary learning engine
//!
//! Picks a handful of words on each page to show in the target language,
//! tracks how well each word is known with an SM-2 scheduler, enforces
//! daily usage quotas and persists all of it through a batching, retrying
//! key-value store.

pub mod config;
pub mod engine;
pub mod learning;
pub mod persistence;
pub mod translation_cache;
pub mod usage;

pub use config::EngineConfig;
pub use engine::{Command, LearningEngine, Response};
pub use persistence::{PersistentStore, StoreConfig, StoreEvent};
