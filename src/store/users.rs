use chrono::Utc;
use uuid::Uuid;

use super::Store;
use crate::models::{PublicUser, User, STATUS_OFFLINE};

impl Store {
    pub async fn create_user(
        &self,
        name: &str,
        phone: &str,
        email: Option<&str>,
        password_hash: &str,
    ) -> Result<User, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, name, phone, email, password_hash, status)
            VALUES ($1, $2, $3, $4, $5, 'offline')
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(phone)
        .bind(email)
        .bind(password_hash)
        .fetch_one(self.pool())
        .await
    }

    pub async fn user_by_id(&self, user_id: Uuid) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(self.pool())
            .await
    }

    pub async fn user_by_phone(&self, phone: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE phone = $1")
            .bind(phone)
            .fetch_optional(self.pool())
            .await
    }

    /// Search by display name or phone fragment.
    pub async fn search_users(&self, query: &str) -> Result<Vec<PublicUser>, sqlx::Error> {
        sqlx::query_as::<_, PublicUser>(
            r#"
            SELECT id, name, phone, email, status, last_seen, profile_picture
            FROM users
            WHERE name ILIKE $1 OR phone LIKE $1
            ORDER BY name ASC
            LIMIT 20
            "#,
        )
        .bind(format!("%{}%", query))
        .fetch_all(self.pool())
        .await
    }

    /// Only the provided fields change.
    pub async fn update_profile(
        &self,
        user_id: Uuid,
        name: Option<&str>,
        email: Option<&str>,
        profile_picture: Option<&str>,
    ) -> Result<User, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET
                name = COALESCE($1, name),
                email = COALESCE($2, email),
                profile_picture = COALESCE($3, profile_picture)
            WHERE id = $4
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(email)
        .bind(profile_picture)
        .bind(user_id)
        .fetch_one(self.pool())
        .await
    }

    /// Going offline stamps last_seen.
    pub async fn update_status(&self, user_id: Uuid, status: &str) -> Result<(), sqlx::Error> {
        if status == STATUS_OFFLINE {
            sqlx::query("UPDATE users SET status = $1, last_seen = $2 WHERE id = $3")
                .bind(status)
                .bind(Utc::now())
                .bind(user_id)
                .execute(self.pool())
                .await?;
        } else {
            sqlx::query("UPDATE users SET status = $1 WHERE id = $2")
                .bind(status)
                .bind(user_id)
                .execute(self.pool())
                .await?;
        }
        Ok(())
    }
}
