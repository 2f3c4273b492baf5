use chrono::{Duration, Utc};
use uuid::Uuid;

use super::Store;
use crate::models::Story;

pub const STORY_TTL_HOURS: i64 = 24;

impl Store {
    pub async fn create_story(&self, user_id: Uuid, media_url: &str) -> Result<Story, sqlx::Error> {
        let expires_at = Utc::now() + Duration::hours(STORY_TTL_HOURS);
        sqlx::query_as::<_, Story>(
            r#"
            INSERT INTO stories (id, user_id, media_url, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(media_url)
        .bind(expires_at)
        .fetch_one(self.pool())
        .await
    }

    pub async fn active_stories(&self) -> Result<Vec<Story>, sqlx::Error> {
        sqlx::query_as::<_, Story>(
            "SELECT * FROM stories WHERE expires_at > NOW() ORDER BY created_at DESC",
        )
        .fetch_all(self.pool())
        .await
    }

    pub async fn purge_expired_stories(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM stories WHERE expires_at <= NOW()")
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }
}
