//! Domain layer - core entities and error types.
//!
//! This layer contains pure domain models without any external
//! dependencies (DB, IO, etc.).

pub mod error;
pub mod models;
pub mod timeline;

pub use error::{AppError, Result};
pub use models::{
    Attr, Author, CommSentence, Community, FrequencyRow, Message, Platform, RawMessage, Sentence,
    StoreId, NULL_AUTHOR, NULL_CONTAINER, PASSING_SCORE,
};
