//! `hearth-memory` – Conversation state.
//!
//! Keeps every dialogue the assistant is part of, with an optional durable
//! copy in SQLite.
//!
//! # Modules
//!
//! - [`store`] – [`ConversationStore`][store::ConversationStore]: the
//!   authoritative in-memory store guarded by a single reader/writer lock.
//! - [`repository`] – [`ConversationRepository`][repository::ConversationRepository]
//!   and its SQLite implementation.  Persistence is best-effort: failures
//!   are logged and never roll back an in-memory mutation.

pub mod repository;
pub mod store;

pub use repository::{ConversationRepository, RepositoryError, SqliteConversationRepository};
pub use store::{ConversationStore, StoreStats};
