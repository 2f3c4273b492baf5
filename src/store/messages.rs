use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::Store;
use crate::models::Message;

impl Store {
    /// Insert within the caller's transaction; the timestamp is assigned by
    /// the database so ordering within a chat follows commit order, with the
    /// identifier as tiebreak.
    pub async fn insert_message_tx(
        tx: &mut Transaction<'static, Postgres>,
        chat_id: Uuid,
        sender_id: Uuid,
        kind: &str,
        content: &str,
        media_url: Option<&str>,
    ) -> Result<Message, sqlx::Error> {
        sqlx::query_as::<_, Message>(
            r#"
            INSERT INTO messages (id, chat_id, sender_id, type, content, media_url, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, clock_timestamp())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(chat_id)
        .bind(sender_id)
        .bind(kind)
        .bind(content)
        .bind(media_url)
        .fetch_one(&mut **tx)
        .await
    }

    /// Page of messages strictly before `before` (newest first in the scan,
    /// returned ascending). `limit` is already clamped by the route layer.
    pub async fn messages_before(
        &self,
        chat_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<Message>, sqlx::Error> {
        if limit <= 0 {
            return Ok(Vec::new());
        }

        let mut messages = sqlx::query_as::<_, Message>(
            r#"
            SELECT *
            FROM messages
            WHERE chat_id = $1
              AND ($2::timestamptz IS NULL OR created_at < $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3
            "#,
        )
        .bind(chat_id)
        .bind(before)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        messages.reverse();
        Ok(messages)
    }
}
