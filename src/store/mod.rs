mod chats;
mod messages;
mod stories;
mod users;

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};

use crate::config::StoreConfig;

/// Authoritative persistence for chats, memberships, messages and stories.
/// All SQL lives here; the dispatcher and the routes never touch the pool
/// directly.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub async fn connect(config: &StoreConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.connect_url())
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Wrap an existing pool. Used by tests with a lazy pool that is never
    /// actually connected.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, sqlx::Error> {
        self.pool.begin().await
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // Idempotent schema initialization. Older deployments with the schema
    // already present run through this unchanged.
    async fn init_schema(&self) -> Result<(), sqlx::Error> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                phone TEXT NOT NULL UNIQUE,
                email TEXT UNIQUE,
                password_hash TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'offline',
                last_seen TIMESTAMPTZ,
                profile_picture TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS chats (
                id UUID PRIMARY KEY,
                type TEXT NOT NULL,
                name TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS chat_members (
                chat_id UUID NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
                user_id UUID NOT NULL REFERENCES users(id),
                role TEXT NOT NULL DEFAULT 'member',
                blocked BOOLEAN NOT NULL DEFAULT FALSE,
                PRIMARY KEY (chat_id, user_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id UUID PRIMARY KEY,
                chat_id UUID NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
                sender_id UUID NOT NULL,
                type TEXT NOT NULL,
                content TEXT NOT NULL,
                media_url TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS stories (
                id UUID PRIMARY KEY,
                user_id UUID NOT NULL,
                media_url TEXT NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_users_phone ON users(phone)",
            "CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_id)",
            "CREATE INDEX IF NOT EXISTS idx_messages_created ON messages(created_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_messages_chat_time ON messages(chat_id, created_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_stories_expiry ON stories(expires_at)",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        tracing::info!(component = "store", "schema initialized");
        Ok(())
    }
}
