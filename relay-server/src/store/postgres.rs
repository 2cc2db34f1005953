use async_trait::async_trait;
use shared::models::{ConversationDoc, ConversationSummary, StoredMessage, User};
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use super::{ConversationStore, StoreError, StoreResult, UserRecord, UserStore};

/// Postgres-backed store. Conversations are JSONB documents keyed by
/// `(user_id, conversation_id)`; the billing total lives on the user row
/// and is only ever changed through `billing = billing + $n`.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore").finish()
    }
}

impl PostgresStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the backing tables when they do not exist yet.
    ///
    /// # Errors
    /// Returns an error when a DDL statement fails.
    pub async fn bootstrap(&self) -> StoreResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS relay_users (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                billing DOUBLE PRECISION NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS relay_conversations (
                user_id UUID NOT NULL,
                conversation_id UUID NOT NULL,
                alias TEXT NOT NULL DEFAULT '',
                model TEXT NOT NULL DEFAULT '',
                temperature DOUBLE PRECISION NOT NULL DEFAULT 0.5,
                reason INT NOT NULL DEFAULT 0,
                system_message TEXT NOT NULL DEFAULT '',
                messages JSONB NOT NULL DEFAULT '[]'::jsonb,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (user_id, conversation_id)
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct ConversationRow {
    user_id: Uuid,
    conversation_id: Uuid,
    alias: String,
    model: String,
    temperature: f64,
    reason: i32,
    system_message: String,
    messages: serde_json::Value,
}

impl ConversationRow {
    #[allow(clippy::cast_possible_truncation)]
    fn into_doc(self) -> StoreResult<ConversationDoc> {
        let messages: Vec<StoredMessage> = serde_json::from_value(self.messages)
            .map_err(|err| StoreError::Corrupt(format!("conversation history: {err}")))?;

        Ok(ConversationDoc {
            user_id: self.user_id,
            conversation_id: self.conversation_id,
            alias: self.alias,
            model: self.model,
            temperature: self.temperature as f32,
            reason: u8::try_from(self.reason).unwrap_or(0),
            system_message: self.system_message,
            messages,
        })
    }
}

#[async_trait]
impl ConversationStore for PostgresStore {
    #[instrument(name = "store.fetch_conversation", skip(self), err)]
    async fn fetch(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> StoreResult<Option<ConversationDoc>> {
        let row = sqlx::query_as::<_, ConversationRow>(
            "SELECT user_id, conversation_id, alias, model, temperature, reason,
                    system_message, messages
             FROM relay_conversations
             WHERE user_id = $1 AND conversation_id = $2",
        )
        .bind(user_id)
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ConversationRow::into_doc).transpose()
    }

    #[instrument(name = "store.list_conversations", skip(self), err)]
    async fn list(&self, user_id: Uuid) -> StoreResult<Vec<ConversationSummary>> {
        #[derive(sqlx::FromRow)]
        struct SummaryRow {
            conversation_id: Uuid,
            alias: String,
        }

        let rows = sqlx::query_as::<_, SummaryRow>(
            "SELECT conversation_id, alias
             FROM relay_conversations
             WHERE user_id = $1
             ORDER BY updated_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ConversationSummary {
                conversation_id: row.conversation_id,
                alias: row.alias,
            })
            .collect())
    }

    #[instrument(name = "store.upsert_conversation", skip(self, doc), err)]
    async fn upsert(&self, doc: &ConversationDoc) -> StoreResult<()> {
        let messages = serde_json::to_value(&doc.messages)
            .map_err(|err| StoreError::Corrupt(format!("conversation history: {err}")))?;

        sqlx::query(
            "INSERT INTO relay_conversations
                 (user_id, conversation_id, alias, model, temperature, reason,
                  system_message, messages, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now())
             ON CONFLICT (user_id, conversation_id) DO UPDATE SET
                 alias = EXCLUDED.alias,
                 model = EXCLUDED.model,
                 temperature = EXCLUDED.temperature,
                 reason = EXCLUDED.reason,
                 system_message = EXCLUDED.system_message,
                 messages = EXCLUDED.messages,
                 updated_at = now()",
        )
        .bind(doc.user_id)
        .bind(doc.conversation_id)
        .bind(&doc.alias)
        .bind(&doc.model)
        .bind(f64::from(doc.temperature))
        .bind(i32::from(doc.reason))
        .bind(&doc.system_message)
        .bind(messages)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(name = "store.rename_conversation", skip(self), err)]
    async fn rename(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        alias: &str,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE relay_conversations SET alias = $3, updated_at = now()
             WHERE user_id = $1 AND conversation_id = $2",
        )
        .bind(user_id)
        .bind(conversation_id)
        .bind(alias)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(name = "store.delete_conversation", skip(self), err)]
    async fn delete(&self, user_id: Uuid, conversation_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            "DELETE FROM relay_conversations WHERE user_id = $1 AND conversation_id = $2",
        )
        .bind(user_id)
        .bind(conversation_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(name = "store.delete_all_conversations", skip(self), err)]
    async fn delete_all(&self, user_id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM relay_conversations WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    #[instrument(name = "store.truncate_conversation", skip(self), err)]
    async fn truncate(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        start_index: usize,
    ) -> StoreResult<bool> {
        // Read-then-slice; the document upsert below keeps last-write-wins
        // semantics consistent with turn finalization.
        let Some(mut doc) = self.fetch(user_id, conversation_id).await? else {
            return Ok(false);
        };

        if start_index >= doc.messages.len() {
            return Ok(false);
        }

        doc.messages.truncate(start_index);
        self.upsert(&doc).await?;
        Ok(true)
    }
}

#[async_trait]
impl UserStore for PostgresStore {
    #[instrument(name = "store.create_user", skip(self, password_hash), err)]
    async fn create(&self, name: &str, email: &str, password_hash: &str) -> StoreResult<User> {
        let user_id = Uuid::new_v4();
        let result = sqlx::query(
            "INSERT INTO relay_users (id, name, email, password_hash)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (email) DO NOTHING",
        )
        .bind(user_id)
        .bind(name)
        .bind(email)
        .bind(password_hash)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Duplicate(format!(
                "user with email {email} already exists"
            )));
        }

        Ok(User {
            user_id,
            name: name.to_string(),
            email: email.to_string(),
            billing: 0.0,
        })
    }

    #[instrument(name = "store.find_user_by_email", skip(self), err)]
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<UserRecord>> {
        #[derive(sqlx::FromRow)]
        struct UserRow {
            id: Uuid,
            name: String,
            email: String,
            password_hash: String,
            billing: f64,
        }

        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, name, email, password_hash, billing
             FROM relay_users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| UserRecord {
            user: User {
                user_id: row.id,
                name: row.name,
                email: row.email,
                billing: row.billing,
            },
            password_hash: row.password_hash,
        }))
    }

    #[instrument(name = "store.find_user", skip(self), err)]
    async fn find_by_id(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        #[derive(sqlx::FromRow)]
        struct UserRow {
            id: Uuid,
            name: String,
            email: String,
            billing: f64,
        }

        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, name, email, billing FROM relay_users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| User {
            user_id: row.id,
            name: row.name,
            email: row.email,
            billing: row.billing,
        }))
    }

    #[instrument(name = "store.add_billing", skip(self), err)]
    async fn add_billing(&self, user_id: Uuid, amount: f64) -> StoreResult<()> {
        sqlx::query("UPDATE relay_users SET billing = billing + $2 WHERE id = $1")
            .bind(user_id)
            .bind(amount)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
