//! Append-only audit log

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use nexus_core::time::current_time_millis;

/// Repository over the `audit` table
#[derive(Debug, Clone)]
pub struct AuditRepository {
    pool: SqlitePool,
}

impl AuditRepository {
    /// Create a new repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append one audit entry
    pub async fn append(
        &self,
        event: &str,
        data: &serde_json::Value,
        user_id: Option<&str>,
        worker_id: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit (ts, event, data, user_id, worker_id) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(current_time_millis() as i64)
        .bind(event)
        .bind(data.to_string())
        .bind(user_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .context("appending audit entry")?;

        Ok(())
    }
}

/// Audit sink shared by the routing and auth layers.
///
/// Audit writes are best-effort: a failed append is logged and dropped
/// rather than failing the operation it describes.
#[derive(Debug, Clone)]
pub struct AuditLog {
    repo: AuditRepository,
}

impl AuditLog {
    /// Create a new audit log over the given pool
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            repo: AuditRepository::new(pool),
        }
    }

    /// Record an event
    pub async fn record(
        &self,
        event: &str,
        data: serde_json::Value,
        user_id: Option<&str>,
        worker_id: Option<&str>,
    ) {
        if let Err(e) = self.repo.append(event, &data, user_id, worker_id).await {
            tracing::warn!("Failed to write audit entry {}: {}", event, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;
    use sqlx::Row;

    #[tokio::test]
    async fn test_audit_append() {
        let db = Database::in_memory().await.unwrap();
        let repo = AuditRepository::new(db.pool().clone());

        repo.append(
            "command_dispatch",
            &serde_json::json!({"sessionId": "s-1", "bytes": 11}),
            Some("admin"),
            Some("worker1"),
        )
        .await
        .unwrap();

        let row = sqlx::query("SELECT event, user_id, worker_id FROM audit")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(row.get::<String, _>("event"), "command_dispatch");
        assert_eq!(row.get::<Option<String>, _>("user_id").as_deref(), Some("admin"));
        assert_eq!(
            row.get::<Option<String>, _>("worker_id").as_deref(),
            Some("worker1")
        );
    }
}
