use crate::controller::MessageStore;
use crate::types::{MessageRecord, PrismError, Result, Role};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::path::Path;

pub type DbPool = SqlitePool;

pub async fn init_db<P: AsRef<Path>>(path: P) -> Result<DbPool> {
    let path_str = match path.as_ref().to_str() {
        Some(s) => s,
        None => {
            return Err(PrismError::Internal(
                "Invalid database path: Path contains non-UTF8 characters".to_string(),
                tracing_error::SpanTrace::capture(),
            )
            .into())
        }
    };
    let url = format!("sqlite:{}?mode=rwc", path_str);

    let pool = match SqlitePool::connect(&url).await {
        Ok(p) => p,
        Err(e) => return Err(PrismError::Database(e).into()),
    };

    configure_db(&pool).await?;

    if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
        return Err(PrismError::Internal(
            format!("Migration failed: {}", e),
            tracing_error::SpanTrace::capture(),
        )
        .into());
    }

    tracing::info!("Database initialized at {}", path_str);
    Ok(pool)
}

async fn configure_db(pool: &DbPool) -> Result<()> {
    let pragmas = [
        "PRAGMA journal_mode = WAL",
        "PRAGMA synchronous = NORMAL",
        "PRAGMA busy_timeout = 5000",
    ];

    for pragma in pragmas {
        if let Err(e) = sqlx::query(pragma).execute(pool).await {
            return Err(PrismError::Database(e).into());
        }
    }
    Ok(())
}

/// SQLite-backed message store. Assistant messages are inserted as
/// incomplete placeholders, updated with each streamed snapshot, and marked
/// complete exactly once at end of turn.
#[derive(Clone)]
pub struct SqliteMessageStore {
    pool: DbPool,
}

impl SqliteMessageStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn insert_message(&self, record: &MessageRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO messages (id, thread_id, role, content, created_at, is_complete) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.thread_id)
        .bind(record.role.to_string())
        .bind(&record.content)
        .bind(record.created_at.to_rfc3339())
        .bind(record.is_complete)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Read side of the message contract, for thread views. The streaming
    /// pipeline itself only writes.
    pub async fn load_history(&self, thread_id: &str) -> Result<Vec<MessageRecord>> {
        let rows = sqlx::query(
            "SELECT id, thread_id, role, content, created_at, is_complete \
             FROM messages WHERE thread_id = ? ORDER BY created_at, rowid",
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(record_from_row(&row)?);
        }
        Ok(records)
    }

    pub async fn get_message(&self, message_id: &str) -> Result<Option<MessageRecord>> {
        let row = sqlx::query(
            "SELECT id, thread_id, role, content, created_at, is_complete \
             FROM messages WHERE id = ?",
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(record_from_row(&row)?)),
            None => Ok(None),
        }
    }
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<MessageRecord> {
    let role_str: String = row.try_get("role")?;
    let role = role_str.parse::<Role>().unwrap_or_else(|_| {
        tracing::warn!("[DB] Unknown role {:?}; treating as user", role_str);
        Role::User
    });
    // Timestamps travel as RFC 3339 text.
    let created_str: String = row.try_get("created_at")?;
    let created_at = chrono::DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(|e| {
            tracing::warn!("[DB] Bad timestamp {:?}: {}", created_str, e);
            chrono::Utc::now()
        });
    Ok(MessageRecord {
        id: row.try_get("id")?,
        thread_id: row.try_get("thread_id")?,
        role,
        content: row.try_get("content")?,
        created_at,
        is_complete: row.try_get("is_complete")?,
    })
}

#[async_trait::async_trait]
impl MessageStore for SqliteMessageStore {
    async fn update_content(&self, message_id: &str, content: &str) -> Result<()> {
        sqlx::query("UPDATE messages SET content = ? WHERE id = ?")
            .bind(content)
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn finalize_content(&self, message_id: &str, content: &str) -> Result<()> {
        // Idempotent: finalizing an already-final message rewrites the same
        // state.
        sqlx::query("UPDATE messages SET content = ?, is_complete = 1 WHERE id = ?")
            .bind(content)
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
