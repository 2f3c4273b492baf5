use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::Store;
use crate::models::{Chat, ChatMember, ROLE_ADMIN, ROLE_MEMBER};

impl Store {
    /// Personal chat containing exactly {a, b}, if one exists. Symmetric in
    /// its arguments, so CreatePersonalChat(a, b) and (b, a) converge.
    pub async fn find_personal_chat(&self, a: Uuid, b: Uuid) -> Result<Option<Chat>, sqlx::Error> {
        sqlx::query_as::<_, Chat>(
            r#"
            SELECT c.*
            FROM chats c
            JOIN chat_members m1 ON m1.chat_id = c.id AND m1.user_id = $1
            JOIN chat_members m2 ON m2.chat_id = c.id AND m2.user_id = $2
            WHERE c.type = 'personal'
            LIMIT 1
            "#,
        )
        .bind(a)
        .bind(b)
        .fetch_optional(self.pool())
        .await
    }

    pub async fn create_personal_chat(&self, a: Uuid, b: Uuid) -> Result<Chat, sqlx::Error> {
        let mut tx = self.begin().await?;

        let chat = sqlx::query_as::<_, Chat>(
            "INSERT INTO chats (id, type) VALUES ($1, 'personal') RETURNING *",
        )
        .bind(Uuid::new_v4())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO chat_members (chat_id, user_id, role) VALUES ($1, $2, $3), ($1, $4, $3)",
        )
        .bind(chat.id)
        .bind(a)
        .bind(ROLE_MEMBER)
        .bind(b)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(chat)
    }

    pub async fn create_channel(&self, creator: Uuid, name: &str) -> Result<Chat, sqlx::Error> {
        let mut tx = self.begin().await?;

        let chat = sqlx::query_as::<_, Chat>(
            "INSERT INTO chats (id, type, name) VALUES ($1, 'channel', $2) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO chat_members (chat_id, user_id, role) VALUES ($1, $2, $3)")
            .bind(chat.id)
            .bind(creator)
            .bind(ROLE_ADMIN)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(chat)
    }

    pub async fn chat_by_id(&self, chat_id: Uuid) -> Result<Option<Chat>, sqlx::Error> {
        sqlx::query_as::<_, Chat>("SELECT * FROM chats WHERE id = $1")
            .bind(chat_id)
            .fetch_optional(self.pool())
            .await
    }

    pub async fn chats_for_user(&self, user_id: Uuid) -> Result<Vec<Chat>, sqlx::Error> {
        sqlx::query_as::<_, Chat>(
            r#"
            SELECT c.*
            FROM chats c
            JOIN chat_members m ON m.chat_id = c.id
            WHERE m.user_id = $1
            ORDER BY c.created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await
    }

    pub async fn members_of(&self, chat_id: Uuid) -> Result<Vec<ChatMember>, sqlx::Error> {
        sqlx::query_as::<_, ChatMember>(
            "SELECT chat_id, user_id, role, blocked FROM chat_members WHERE chat_id = $1",
        )
        .bind(chat_id)
        .fetch_all(self.pool())
        .await
    }

    pub async fn member_ids(&self, chat_id: Uuid) -> Result<Vec<Uuid>, sqlx::Error> {
        sqlx::query_scalar::<_, Uuid>("SELECT user_id FROM chat_members WHERE chat_id = $1")
            .bind(chat_id)
            .fetch_all(self.pool())
            .await
    }

    pub async fn membership(
        &self,
        chat_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<ChatMember>, sqlx::Error> {
        sqlx::query_as::<_, ChatMember>(
            "SELECT chat_id, user_id, role, blocked FROM chat_members WHERE chat_id = $1 AND user_id = $2",
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_optional(self.pool())
        .await
    }

    /// Row-locked membership read. Concurrent sends into the same chat
    /// serialize on this lock before evaluating or clearing block state.
    pub async fn lock_membership(
        tx: &mut Transaction<'static, Postgres>,
        chat_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<ChatMember>, sqlx::Error> {
        sqlx::query_as::<_, ChatMember>(
            r#"
            SELECT chat_id, user_id, role, blocked
            FROM chat_members
            WHERE chat_id = $1 AND user_id = $2
            FOR UPDATE
            "#,
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await
    }

    pub async fn clear_block_tx(
        tx: &mut Transaction<'static, Postgres>,
        chat_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE chat_members SET blocked = FALSE WHERE chat_id = $1 AND user_id = $2 AND blocked",
        )
        .bind(chat_id)
        .bind(user_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Returns false when no such membership exists.
    pub async fn set_blocked(
        &self,
        chat_id: Uuid,
        user_id: Uuid,
        blocked: bool,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE chat_members SET blocked = $1 WHERE chat_id = $2 AND user_id = $3",
        )
        .bind(blocked)
        .bind(chat_id)
        .bind(user_id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
