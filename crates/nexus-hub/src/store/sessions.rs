//! Durable session metadata and output tails

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};

/// A session as persisted in the store
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: String,
    pub worker_name: String,
    pub worker_key: String,
    pub display_name: String,
    /// Creation time, epoch millis
    pub created_at: u64,
    /// Last activity, epoch millis
    pub last_active_at: u64,
    /// Bounded output tail
    pub output: String,
}

/// Repository over the `sessions` table
#[derive(Debug, Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    /// Create a new repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new session.
    ///
    /// The insert is a single statement, so a session never exists in a
    /// half-persisted state.
    pub async fn create(&self, record: &SessionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (
                id, worker_name, worker_key, display_name,
                created_at, last_active_at, output
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.worker_name)
        .bind(&record.worker_key)
        .bind(&record.display_name)
        .bind(record.created_at as i64)
        .bind(record.last_active_at as i64)
        .bind(&record.output)
        .execute(&self.pool)
        .await
        .context("creating session")?;

        Ok(())
    }

    /// Change a session's display name
    pub async fn rename(&self, id: &str, display_name: &str, now_millis: u64) -> Result<()> {
        sqlx::query("UPDATE sessions SET display_name = ?, last_active_at = ? WHERE id = ?")
            .bind(display_name)
            .bind(now_millis as i64)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("renaming session")?;

        Ok(())
    }

    /// Persist a session's bounded output tail and activity timestamp.
    ///
    /// The in-memory tail is the authoritative live copy; this write is the
    /// coalesced flush of it.
    pub async fn save_output(&self, id: &str, output: &str, last_active_at: u64) -> Result<()> {
        sqlx::query("UPDATE sessions SET output = ?, last_active_at = ? WHERE id = ?")
            .bind(output)
            .bind(last_active_at as i64)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("saving session output")?;

        Ok(())
    }

    /// Update a session's activity timestamp
    pub async fn set_last_active(&self, id: &str, last_active_at: u64) -> Result<()> {
        sqlx::query("UPDATE sessions SET last_active_at = ? WHERE id = ?")
            .bind(last_active_at as i64)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("updating session activity")?;

        Ok(())
    }

    /// Delete a session
    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("deleting session")?;

        Ok(())
    }

    /// Load every persisted session
    pub async fn load_all(&self) -> Result<Vec<SessionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, worker_name, worker_key, display_name,
                   created_at, last_active_at, output
            FROM sessions
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("loading sessions")?;

        Ok(rows.into_iter().map(record_from_row).collect())
    }

    /// Fetch a single session's stored output tail
    pub async fn get_output(&self, id: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT output FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("fetching session output")?;

        Ok(row.map(|row| row.get("output")))
    }
}

fn record_from_row(row: sqlx::sqlite::SqliteRow) -> SessionRecord {
    SessionRecord {
        id: row.get("id"),
        worker_name: row.get("worker_name"),
        worker_key: row.get("worker_key"),
        display_name: row.get("display_name"),
        created_at: row.get::<i64, _>("created_at") as u64,
        last_active_at: row.get::<i64, _>("last_active_at") as u64,
        output: row.get("output"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;

    fn sample(id: &str) -> SessionRecord {
        SessionRecord {
            id: id.to_string(),
            worker_name: "host1".to_string(),
            worker_key: "worker1".to_string(),
            display_name: "tty".to_string(),
            created_at: 1_000,
            last_active_at: 1_000,
            output: String::new(),
        }
    }

    #[tokio::test]
    async fn test_create_and_load() {
        let db = Database::in_memory().await.unwrap();
        let repo = SessionRepository::new(db.pool().clone());

        repo.create(&sample("s-1")).await.unwrap();
        repo.create(&sample("s-2")).await.unwrap();

        let all = repo.load_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "s-1");
        assert_eq!(all[0].worker_key, "worker1");
    }

    #[tokio::test]
    async fn test_duplicate_create_fails() {
        let db = Database::in_memory().await.unwrap();
        let repo = SessionRepository::new(db.pool().clone());

        repo.create(&sample("s-1")).await.unwrap();
        assert!(repo.create(&sample("s-1")).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_removes_session() {
        let db = Database::in_memory().await.unwrap();
        let repo = SessionRepository::new(db.pool().clone());

        repo.create(&sample("s-1")).await.unwrap();
        repo.delete("s-1").await.unwrap();

        assert!(repo.load_all().await.unwrap().is_empty());
        assert!(repo.get_output("s-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_and_get_output() {
        let db = Database::in_memory().await.unwrap();
        let repo = SessionRepository::new(db.pool().clone());

        repo.create(&sample("s-1")).await.unwrap();
        repo.save_output("s-1", "line1\nline2\n", 2_000).await.unwrap();

        let output = repo.get_output("s-1").await.unwrap().unwrap();
        assert_eq!(output, "line1\nline2\n");

        let all = repo.load_all().await.unwrap();
        assert_eq!(all[0].last_active_at, 2_000);
    }

    #[tokio::test]
    async fn test_rename() {
        let db = Database::in_memory().await.unwrap();
        let repo = SessionRepository::new(db.pool().clone());

        repo.create(&sample("s-1")).await.unwrap();
        repo.rename("s-1", "renamed", 3_000).await.unwrap();

        let all = repo.load_all().await.unwrap();
        assert_eq!(all[0].display_name, "renamed");
    }
}
