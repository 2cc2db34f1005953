use async_trait::async_trait;
use shared::models::{ConversationDoc, ConversationSummary, User};
use std::{
    collections::HashMap,
    sync::Mutex,
};
use uuid::Uuid;

use super::{ConversationStore, StoreError, StoreResult, UserRecord, UserStore};

/// In-process store used for development (empty database URL) and tests.
///
/// Holds everything behind plain mutexes; no durability. Mirrors the
/// last-write-wins upsert semantics of the Postgres store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    conversations: Mutex<HashMap<(Uuid, Uuid), ConversationDoc>>,
    users: Mutex<HashMap<Uuid, UserRecord>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn fetch(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> StoreResult<Option<ConversationDoc>> {
        let guard = self.conversations.lock().expect("conversation map poisoned");
        Ok(guard.get(&(user_id, conversation_id)).cloned())
    }

    async fn list(&self, user_id: Uuid) -> StoreResult<Vec<ConversationSummary>> {
        let guard = self.conversations.lock().expect("conversation map poisoned");
        Ok(guard
            .values()
            .filter(|doc| doc.user_id == user_id)
            .map(|doc| ConversationSummary {
                conversation_id: doc.conversation_id,
                alias: doc.alias.clone(),
            })
            .collect())
    }

    async fn upsert(&self, doc: &ConversationDoc) -> StoreResult<()> {
        let mut guard = self.conversations.lock().expect("conversation map poisoned");
        guard.insert((doc.user_id, doc.conversation_id), doc.clone());
        Ok(())
    }

    async fn rename(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        alias: &str,
    ) -> StoreResult<bool> {
        let mut guard = self.conversations.lock().expect("conversation map poisoned");
        match guard.get_mut(&(user_id, conversation_id)) {
            Some(doc) => {
                doc.alias = alias.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, user_id: Uuid, conversation_id: Uuid) -> StoreResult<bool> {
        let mut guard = self.conversations.lock().expect("conversation map poisoned");
        Ok(guard.remove(&(user_id, conversation_id)).is_some())
    }

    async fn delete_all(&self, user_id: Uuid) -> StoreResult<u64> {
        let mut guard = self.conversations.lock().expect("conversation map poisoned");
        let before = guard.len();
        guard.retain(|(owner, _), _| *owner != user_id);
        Ok((before - guard.len()) as u64)
    }

    async fn truncate(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        start_index: usize,
    ) -> StoreResult<bool> {
        let mut guard = self.conversations.lock().expect("conversation map poisoned");
        match guard.get_mut(&(user_id, conversation_id)) {
            Some(doc) if start_index < doc.messages.len() => {
                doc.messages.truncate(start_index);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create(&self, name: &str, email: &str, password_hash: &str) -> StoreResult<User> {
        let mut guard = self.users.lock().expect("user map poisoned");
        if guard.values().any(|record| record.user.email == email) {
            return Err(StoreError::Duplicate(format!(
                "user with email {email} already exists"
            )));
        }

        let user = User {
            user_id: Uuid::new_v4(),
            name: name.to_string(),
            email: email.to_string(),
            billing: 0.0,
        };
        guard.insert(
            user.user_id,
            UserRecord {
                user: user.clone(),
                password_hash: password_hash.to_string(),
            },
        );
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<UserRecord>> {
        let guard = self.users.lock().expect("user map poisoned");
        Ok(guard
            .values()
            .find(|record| record.user.email == email)
            .cloned())
    }

    async fn find_by_id(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        let guard = self.users.lock().expect("user map poisoned");
        Ok(guard.get(&user_id).map(|record| record.user.clone()))
    }

    async fn add_billing(&self, user_id: Uuid, amount: f64) -> StoreResult<()> {
        let mut guard = self.users.lock().expect("user map poisoned");
        if let Some(record) = guard.get_mut(&user_id) {
            record.user.billing += amount;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::StoredMessage;

    #[tokio::test]
    async fn upsert_then_fetch_round_trips() {
        let store = MemoryStore::new();
        let mut doc = ConversationDoc::new(Uuid::new_v4(), Uuid::new_v4());
        doc.messages.push(StoredMessage::user("hi"));

        store.upsert(&doc).await.unwrap();
        let fetched = store.fetch(doc.user_id, doc.conversation_id).await.unwrap();
        assert_eq!(fetched, Some(doc));
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let store = MemoryStore::new();
        store.create("a", "a@example.com", "hash").await.unwrap();
        let err = store.create("b", "a@example.com", "hash").await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }

    #[tokio::test]
    async fn billing_accumulates() {
        let store = MemoryStore::new();
        let user = store.create("a", "a@example.com", "hash").await.unwrap();

        store.add_billing(user.user_id, 0.5).await.unwrap();
        store.add_billing(user.user_id, 0.25).await.unwrap();

        let fetched = store.find_by_id(user.user_id).await.unwrap().unwrap();
        assert!((fetched.billing - 0.75).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn truncate_drops_suffix_and_checks_bounds() {
        let store = MemoryStore::new();
        let mut doc = ConversationDoc::new(Uuid::new_v4(), Uuid::new_v4());
        for index in 0..4 {
            doc.messages.push(StoredMessage::user(format!("m{index}")));
        }
        store.upsert(&doc).await.unwrap();

        assert!(store.truncate(doc.user_id, doc.conversation_id, 2).await.unwrap());
        let fetched = store
            .fetch(doc.user_id, doc.conversation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.messages.len(), 2);

        assert!(!store.truncate(doc.user_id, doc.conversation_id, 9).await.unwrap());
    }
}
