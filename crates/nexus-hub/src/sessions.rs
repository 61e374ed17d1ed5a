//! Live session state
//!
//! The hub owns session metadata and the bounded output tail. While the
//! process is alive the in-memory tail is the authoritative read source;
//! the store is the coalesced write-behind copy. Appends are batched per
//! session with a quiet period and flushed on shutdown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use dashmap::DashMap;

use nexus_core::time::current_time_millis;
use nexus_core::types::{AgentKey, SessionId};
use nexus_protocol::SessionInfo;

use crate::store::{SessionRecord, SessionRepository};

/// Maximum retained output tail per session, in bytes
pub const MAX_TAIL_BYTES: usize = 50_000;

/// Quiet period before a dirty tail is flushed to the store
pub const FLUSH_QUIET_PERIOD: Duration = Duration::from_secs(2);

/// Errors from session mutations
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A session with this id already exists
    #[error("Session already exists: {0}")]
    AlreadyExists(String),

    /// No session with this id
    #[error("Unknown session: {0}")]
    Unknown(String),

    /// The backing store failed
    #[error("Session store failure: {0}")]
    Store(#[from] anyhow::Error),
}

/// One live session owned by the hub
#[derive(Debug)]
pub struct SessionEntry {
    pub id: SessionId,
    pub worker_name: String,
    pub worker_key: AgentKey,
    pub created_at: u64,
    display_name: Mutex<String>,
    last_active: AtomicU64,
    tail: Mutex<TailBuf>,
}

#[derive(Debug)]
struct TailBuf {
    buf: String,
    dirty: bool,
    last_append_millis: u64,
}

impl SessionEntry {
    /// Current display name
    pub fn display_name(&self) -> String {
        self.display_name.lock().expect("display name lock").clone()
    }

    /// Last activity, epoch millis
    pub fn last_active_millis(&self) -> u64 {
        self.last_active.load(Ordering::Relaxed)
    }

    /// Current output tail
    pub fn tail(&self) -> String {
        self.tail.lock().expect("tail lock").buf.clone()
    }

    /// Summary for a `session_list` push
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.to_string(),
            worker_name: self.worker_name.clone(),
            worker_key: self.worker_key.to_string(),
            display_name: self.display_name(),
            created_at: self.created_at,
            last_active_at: self.last_active_millis(),
        }
    }

    fn touch(&self) {
        self.last_active
            .store(current_time_millis(), Ordering::Relaxed);
    }
}

/// Append `data` to `buf`, keeping at most `limit` trailing bytes.
///
/// The cut point is advanced to the next char boundary, so the retained
/// suffix stays valid UTF-8. No cell or frame alignment is guaranteed;
/// clients replay the tail into a VT emulator that re-syncs.
fn append_bounded(buf: &mut String, data: &str, limit: usize) {
    buf.push_str(data);
    if buf.len() > limit {
        let mut cut = buf.len() - limit;
        while !buf.is_char_boundary(cut) {
            cut += 1;
        }
        buf.drain(..cut);
    }
}

/// The hub's session catalogue (metadata plus tails)
pub struct SessionService {
    repo: SessionRepository,
    entries: DashMap<SessionId, Arc<SessionEntry>>,
}

impl SessionService {
    /// Create an empty service over the given repository
    pub fn new(repo: SessionRepository) -> Self {
        Self {
            repo,
            entries: DashMap::new(),
        }
    }

    /// Hydrate the catalogue from the store (hub start)
    pub async fn load_all(&self) -> Result<usize> {
        let records = self.repo.load_all().await?;
        let count = records.len();
        for record in records {
            let entry = entry_from_record(record);
            self.entries.insert(entry.id.clone(), Arc::new(entry));
        }
        Ok(count)
    }

    /// Create a session.
    ///
    /// The store insert happens first so the session never exists in
    /// memory without being durable.
    pub async fn create(
        &self,
        id: SessionId,
        worker_name: String,
        worker_key: AgentKey,
        display_name: String,
    ) -> Result<Arc<SessionEntry>, SessionError> {
        if self.entries.contains_key(&id) {
            return Err(SessionError::AlreadyExists(id.to_string()));
        }

        let now = current_time_millis();
        let record = SessionRecord {
            id: id.to_string(),
            worker_name: worker_name.clone(),
            worker_key: worker_key.to_string(),
            display_name: display_name.clone(),
            created_at: now,
            last_active_at: now,
            output: String::new(),
        };
        self.repo.create(&record).await.map_err(|e| {
            // A lost insert race surfaces as a constraint violation.
            if self.entries.contains_key(&id) {
                SessionError::AlreadyExists(id.to_string())
            } else {
                SessionError::Store(e)
            }
        })?;

        let entry = Arc::new(SessionEntry {
            id: id.clone(),
            worker_name,
            worker_key,
            created_at: now,
            display_name: Mutex::new(display_name),
            last_active: AtomicU64::new(now),
            tail: Mutex::new(TailBuf {
                buf: String::new(),
                dirty: false,
                last_append_millis: 0,
            }),
        });
        self.entries.insert(id, Arc::clone(&entry));
        Ok(entry)
    }

    /// Rename a session. Idempotent; last writer wins.
    pub async fn rename(
        &self,
        id: &SessionId,
        display_name: String,
    ) -> Result<(), SessionError> {
        let entry = self.get(id).ok_or_else(|| SessionError::Unknown(id.to_string()))?;
        let now = current_time_millis();
        self.repo.rename(id.as_str(), &display_name, now).await?;
        *entry.display_name.lock().expect("display name lock") = display_name;
        entry.last_active.store(now, Ordering::Relaxed);
        Ok(())
    }

    /// Append PTY output to a session's tail.
    ///
    /// The write is buffered; the store copy catches up on the next quiet
    /// flush. Returns the session entry for fan-out.
    pub fn append_output(
        &self,
        id: &SessionId,
        data: &str,
    ) -> Result<Arc<SessionEntry>, SessionError> {
        let entry = self.get(id).ok_or_else(|| SessionError::Unknown(id.to_string()))?;
        {
            let mut tail = entry.tail.lock().expect("tail lock");
            append_bounded(&mut tail.buf, data, MAX_TAIL_BYTES);
            tail.dirty = true;
            tail.last_append_millis = current_time_millis();
        }
        entry.touch();
        Ok(entry)
    }

    /// Record input activity on a session
    pub fn touch(&self, id: &SessionId) {
        if let Some(entry) = self.get(id) {
            entry.touch();
        }
    }

    /// Close a session: remove it from the store and the catalogue
    pub async fn close(&self, id: &SessionId) -> Result<(), SessionError> {
        if self.get(id).is_none() {
            return Err(SessionError::Unknown(id.to_string()));
        }
        self.repo.delete(id.as_str()).await?;
        self.entries.remove(id);
        Ok(())
    }

    /// Look up a session
    pub fn get(&self, id: &SessionId) -> Option<Arc<SessionEntry>> {
        self.entries.get(id).map(|r| Arc::clone(&r))
    }

    /// Whether a session exists
    pub fn contains(&self, id: &SessionId) -> bool {
        self.entries.contains_key(id)
    }

    /// Session summaries, oldest first
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> =
            self.entries.iter().map(|r| r.info()).collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        infos
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the catalogue is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flush every dirty tail whose quiet period has elapsed
    pub async fn flush_quiescent(&self) {
        self.flush(false).await;
    }

    /// Flush every dirty tail regardless of quiet period (shutdown)
    pub async fn flush_all(&self) {
        self.flush(true).await;
    }

    async fn flush(&self, force: bool) {
        let now = current_time_millis();
        let quiet = FLUSH_QUIET_PERIOD.as_millis() as u64;

        // Snapshot the dirty entries first; the store writes happen outside
        // any tail lock.
        let mut pending: Vec<(Arc<SessionEntry>, String)> = Vec::new();
        for entry in self.entries.iter() {
            let entry = Arc::clone(&entry);
            let snapshot = {
                let mut tail = entry.tail.lock().expect("tail lock");
                if !tail.dirty {
                    None
                } else if !force && now.saturating_sub(tail.last_append_millis) < quiet {
                    None
                } else {
                    tail.dirty = false;
                    Some(tail.buf.clone())
                }
            };
            if let Some(buf) = snapshot {
                pending.push((entry, buf));
            }
        }

        for (entry, buf) in pending {
            let last_active = entry.last_active_millis();
            if let Err(e) = self
                .repo
                .save_output(entry.id.as_str(), &buf, last_active)
                .await
            {
                tracing::warn!("Failed to flush output for session {}: {}", entry.id, e);
                // Leave redelivery to the next flush pass.
                entry.tail.lock().expect("tail lock").dirty = true;
            }
        }
    }
}

fn entry_from_record(record: SessionRecord) -> SessionEntry {
    SessionEntry {
        id: SessionId::new(record.id),
        worker_name: record.worker_name,
        worker_key: AgentKey::new(&record.worker_key),
        created_at: record.created_at,
        display_name: Mutex::new(record.display_name),
        last_active: AtomicU64::new(record.last_active_at),
        tail: Mutex::new(TailBuf {
            buf: record.output,
            dirty: false,
            last_append_millis: 0,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;

    async fn service() -> (SessionService, Database) {
        let db = Database::in_memory().await.unwrap();
        let service = SessionService::new(SessionRepository::new(db.pool().clone()));
        (service, db)
    }

    async fn create_one(service: &SessionService, id: &str) -> Arc<SessionEntry> {
        service
            .create(
                SessionId::new(id),
                "host1".to_string(),
                AgentKey::new("worker1"),
                "tty".to_string(),
            )
            .await
            .unwrap()
    }

    #[test]
    fn test_append_bounded_keeps_suffix() {
        let mut buf = "line1\n".to_string();
        append_bounded(&mut buf, "line2\n", 8);
        assert_eq!(buf, "1\nline2\n");
        assert!(buf.len() <= 8);
        assert!(buf.ends_with("line2\n"));
    }

    #[test]
    fn test_append_bounded_respects_char_boundary() {
        let mut buf = String::new();
        // Multi-byte characters across the cut point must not split.
        append_bounded(&mut buf, &"é".repeat(100), 11);
        assert!(buf.len() <= 11);
        assert!(buf.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_append_bounded_under_limit_unchanged() {
        let mut buf = "abc".to_string();
        append_bounded(&mut buf, "def", 100);
        assert_eq!(buf, "abcdef");
    }

    #[tokio::test]
    async fn test_create_and_list() {
        let (service, _db) = service().await;
        create_one(&service, "s-1").await;
        create_one(&service, "s-2").await;

        let list = service.list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].worker_key, "worker1");
    }

    #[tokio::test]
    async fn test_duplicate_create_rejected() {
        let (service, _db) = service().await;
        create_one(&service, "s-1").await;

        let err = service
            .create(
                SessionId::new("s-1"),
                "host1".to_string(),
                AgentKey::new("worker1"),
                "other".to_string(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_close_then_id_is_free() {
        let (service, _db) = service().await;
        create_one(&service, "s-1").await;
        service.close(&SessionId::new("s-1")).await.unwrap();

        assert!(!service.contains(&SessionId::new("s-1")));
        // create ∘ close returns the system to a state where the id is free
        create_one(&service, "s-1").await;
    }

    #[tokio::test]
    async fn test_close_unknown_session() {
        let (service, _db) = service().await;
        let err = service.close(&SessionId::new("nope")).await.unwrap_err();
        assert!(matches!(err, SessionError::Unknown(_)));
    }

    #[tokio::test]
    async fn test_rename_idempotent() {
        let (service, _db) = service().await;
        create_one(&service, "s-1").await;
        let id = SessionId::new("s-1");

        service.rename(&id, "renamed".to_string()).await.unwrap();
        service.rename(&id, "renamed".to_string()).await.unwrap();

        assert_eq!(service.get(&id).unwrap().display_name(), "renamed");
    }

    #[tokio::test]
    async fn test_append_output_bounded_tail() {
        let (service, _db) = service().await;
        create_one(&service, "s-1").await;
        let id = SessionId::new("s-1");

        let chunk = "x".repeat(20_000);
        for _ in 0..4 {
            service.append_output(&id, &chunk).unwrap();
        }

        let tail = service.get(&id).unwrap().tail();
        assert_eq!(tail.len(), MAX_TAIL_BYTES);
    }

    #[tokio::test]
    async fn test_append_to_deleted_session() {
        let (service, _db) = service().await;
        create_one(&service, "s-1").await;
        service.close(&SessionId::new("s-1")).await.unwrap();

        let err = service
            .append_output(&SessionId::new("s-1"), "late output")
            .unwrap_err();
        assert!(matches!(err, SessionError::Unknown(_)));
    }

    #[tokio::test]
    async fn test_flush_and_reload() {
        let db = Database::in_memory().await.unwrap();
        let repo = SessionRepository::new(db.pool().clone());
        let service = SessionService::new(repo.clone());

        create_one(&service, "s-2").await;
        service
            .append_output(&SessionId::new("s-2"), "line1\nline2\n")
            .unwrap();
        service.flush_all().await;

        // A fresh service over the same store sees the flushed tail.
        let reloaded = SessionService::new(repo);
        assert_eq!(reloaded.load_all().await.unwrap(), 1);
        let entry = reloaded.get(&SessionId::new("s-2")).unwrap();
        assert_eq!(entry.tail(), "line1\nline2\n");
        assert_eq!(entry.info().display_name, "tty");
    }

    #[tokio::test]
    async fn test_quiescent_flush_waits_for_quiet_period() {
        let (service, db) = service().await;
        create_one(&service, "s-1").await;
        service
            .append_output(&SessionId::new("s-1"), "fresh")
            .unwrap();

        // Just appended: the quiet period has not elapsed.
        service.flush_quiescent().await;
        let repo = SessionRepository::new(db.pool().clone());
        assert_eq!(repo.get_output("s-1").await.unwrap().unwrap(), "");

        // Forced flush writes regardless.
        service.flush_all().await;
        assert_eq!(repo.get_output("s-1").await.unwrap().unwrap(), "fresh");
    }
}
