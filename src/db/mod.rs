//! Database module: entity models and SQL repositories.
//!
//! - `model`: persisted entities and the insert payloads that create them.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! Callers import from `feed_harvest::db`; the repository API is re-exported
//! here.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{ArticleEntity, AuthorEntity, NewArticle, NewAuthor};
