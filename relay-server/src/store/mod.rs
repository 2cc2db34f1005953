use async_trait::async_trait;
use shared::models::{ConversationDoc, ConversationSummary, User};
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

/// Errors surfaced by the stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("duplicate: {0}")]
    Duplicate(String),
    #[error("corrupt document: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable conversation documents keyed by `(user_id, conversation_id)`.
///
/// Writes are full-document upserts with last-write-wins semantics:
/// concurrent turns on the same conversation can race, and the later
/// finalization overwrites the earlier one's history append. Turns on
/// distinct conversations never interfere.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Point lookup of one conversation.
    async fn fetch(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> StoreResult<Option<ConversationDoc>>;

    /// All conversations of a user, newest first.
    async fn list(&self, user_id: Uuid) -> StoreResult<Vec<ConversationSummary>>;

    /// Insert or replace the full document.
    async fn upsert(&self, doc: &ConversationDoc) -> StoreResult<()>;

    /// Update the display alias. Returns `false` when the conversation does
    /// not exist.
    async fn rename(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        alias: &str,
    ) -> StoreResult<bool>;

    /// Delete one conversation. Returns `false` when nothing was deleted.
    async fn delete(&self, user_id: Uuid, conversation_id: Uuid) -> StoreResult<bool>;

    /// Delete every conversation of a user, returning the count removed.
    async fn delete_all(&self, user_id: Uuid) -> StoreResult<u64>;

    /// Drop messages from `start_index` (inclusive) onward. Returns `false`
    /// when the conversation does not exist or the index is out of range.
    async fn truncate(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        start_index: usize,
    ) -> StoreResult<bool>;
}

/// A user record as held by the store, including the credential hash.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub user: User,
    pub password_hash: String,
}

/// Durable user accounts with an atomically incremented billing total.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Create an account. Fails with [`StoreError::Duplicate`] when the
    /// email is taken.
    async fn create(&self, name: &str, email: &str, password_hash: &str) -> StoreResult<User>;

    /// Look up a record by email, including the password hash.
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<UserRecord>>;

    /// Look up a user by id.
    async fn find_by_id(&self, user_id: Uuid) -> StoreResult<Option<User>>;

    /// Atomically add `amount` to the user's billing total.
    ///
    /// This is the only writer of the billing field; it must be an atomic
    /// numeric increment at the store, never read-modify-write.
    async fn add_billing(&self, user_id: Uuid, amount: f64) -> StoreResult<()>;
}
