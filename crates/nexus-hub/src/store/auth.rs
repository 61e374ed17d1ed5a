//! Admin credential persistence

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};

/// The stored admin credential with its hashing parameters.
///
/// Parameters are persisted next to the hash so the work factor can be
/// raised later without invalidating existing records.
#[derive(Debug, Clone)]
pub struct AuthRecord {
    /// PBKDF2 output, hex-encoded
    pub hash: String,
    /// Random salt, hex-encoded
    pub salt: String,
    /// PBKDF2 iteration count used for this record
    pub iterations: u32,
    /// Last change, epoch millis
    pub updated_at: u64,
}

/// Repository over the single-row `auth` table
#[derive(Debug, Clone)]
pub struct AuthRepository {
    pool: SqlitePool,
}

impl AuthRepository {
    /// Create a new repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Fetch the credential record, if one has been configured
    pub async fn get(&self) -> Result<Option<AuthRecord>> {
        let row = sqlx::query(
            "SELECT hash, salt, iterations, updated_at FROM auth WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .context("fetching auth record")?;

        Ok(row.map(|row| AuthRecord {
            hash: row.get("hash"),
            salt: row.get("salt"),
            iterations: row.get::<i64, _>("iterations") as u32,
            updated_at: row.get::<i64, _>("updated_at") as u64,
        }))
    }

    /// Insert or replace the credential record
    pub async fn upsert(&self, record: &AuthRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO auth (id, hash, salt, iterations, updated_at)
            VALUES (1, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                hash = excluded.hash,
                salt = excluded.salt,
                iterations = excluded.iterations,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.hash)
        .bind(&record.salt)
        .bind(record.iterations as i64)
        .bind(record.updated_at as i64)
        .execute(&self.pool)
        .await
        .context("storing auth record")?;

        Ok(())
    }
}
