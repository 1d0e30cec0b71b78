//! Spaced repetition learning
//!
//! This module provides:
//! - An SM-2 scheduler driven by reading interactions
//! - The per-page word selection policy and its candidate filter
//! - Persistence of per-word progress

pub mod algorithm;
pub mod candidates;
pub mod models;
pub mod selection;
pub mod storage;

pub use algorithm::*;
pub use candidates::PageWords;
pub use models::*;
pub use selection::{select_by_frequency, select_words_for_page, DEFAULT_WORDS_PER_PAGE};
pub use storage::ProgressStore;
