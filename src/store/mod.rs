// ABOUTME: Embedded sqlite store facade - one serialized writer, callers never touch rusqlite directly
// Every mutation here is a single-statement transaction (§4.3)

pub mod migrations;
pub mod model;

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

pub use model::{AgentSessionPatch, AgentSessionRecord, AgentType};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("writer task panicked: {0}")]
    WriterPanic(String),
}

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut conn = Connection::open(path)?;
        migrations::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let mut conn = Connection::open_in_memory()?;
        migrations::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking thread pool.
    /// This is the one point every store method funnels through, which is
    /// what makes the connection a single serialized writer.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("store mutex poisoned");
            f(&conn).map_err(StoreError::from)
        })
        .await
        .map_err(|e| StoreError::WriterPanic(e.to_string()))?
    }

    pub async fn insert_session(&self, record: AgentSessionRecord) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO agent_sessions
                    (session_id, log_file_path, project_path, agent_type, display_name,
                     created_at, last_activity_at, current_window, is_pinned,
                     last_user_message, last_resume_error, last_known_log_size, is_codex_exec)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    record.session_id,
                    record.log_file_path,
                    record.project_path,
                    record.agent_type.as_str(),
                    record.display_name,
                    record.created_at.to_rfc3339(),
                    record.last_activity_at.to_rfc3339(),
                    record.current_window,
                    record.is_pinned as i64,
                    record.last_user_message,
                    record.last_resume_error,
                    record.last_known_log_size,
                    record.is_codex_exec as i64,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_session_by_id(
        &self,
        session_id: &str,
    ) -> Result<Option<AgentSessionRecord>, StoreError> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT * FROM agent_sessions WHERE session_id = ?1",
                params![session_id],
                row_to_record,
            )
            .optional()
        })
        .await
    }

    pub async fn get_session_by_log_path(
        &self,
        log_file_path: &str,
    ) -> Result<Option<AgentSessionRecord>, StoreError> {
        let log_file_path = log_file_path.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT * FROM agent_sessions WHERE log_file_path = ?1",
                params![log_file_path],
                row_to_record,
            )
            .optional()
        })
        .await
    }

    pub async fn get_session_by_window(
        &self,
        tmux_target: &str,
    ) -> Result<Option<AgentSessionRecord>, StoreError> {
        let tmux_target = tmux_target.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT * FROM agent_sessions WHERE current_window = ?1",
                params![tmux_target],
                row_to_record,
            )
            .optional()
        })
        .await
    }

    pub async fn update_session(
        &self,
        session_id: &str,
        patch: AgentSessionPatch,
    ) -> Result<(), StoreError> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            if let Some(name) = patch.display_name {
                conn.execute(
                    "UPDATE agent_sessions SET display_name = ?1 WHERE session_id = ?2",
                    params![name, session_id],
                )?;
            }
            if let Some(ts) = patch.last_activity_at {
                conn.execute(
                    "UPDATE agent_sessions SET last_activity_at = ?1 WHERE session_id = ?2",
                    params![ts.to_rfc3339(), session_id],
                )?;
            }
            if let Some(window) = patch.current_window {
                conn.execute(
                    "UPDATE agent_sessions SET current_window = ?1 WHERE session_id = ?2",
                    params![window, session_id],
                )?;
            }
            if let Some(msg) = patch.last_user_message {
                conn.execute(
                    "UPDATE agent_sessions SET last_user_message = ?1 WHERE session_id = ?2",
                    params![msg, session_id],
                )?;
            }
            if let Some(err) = patch.last_resume_error {
                conn.execute(
                    "UPDATE agent_sessions SET last_resume_error = ?1 WHERE session_id = ?2",
                    params![err, session_id],
                )?;
            }
            if let Some(size) = patch.last_known_log_size {
                conn.execute(
                    "UPDATE agent_sessions SET last_known_log_size = ?1 WHERE session_id = ?2",
                    params![size, session_id],
                )?;
            }
            Ok(())
        })
        .await
    }

    /// Atomically clears `current_window`, keeping the row (§3 invariant:
    /// orphaning never deletes).
    pub async fn orphan_session(&self, session_id: &str) -> Result<(), StoreError> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE agent_sessions SET current_window = NULL WHERE session_id = ?1",
                params![session_id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn set_pinned(&self, session_id: &str, is_pinned: bool) -> Result<(), StoreError> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE agent_sessions SET is_pinned = ?1 WHERE session_id = ?2",
                params![is_pinned as i64, session_id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn display_name_exists(&self, name: &str) -> Result<bool, StoreError> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM agent_sessions WHERE display_name = ?1",
                params![name],
                |r| r.get::<_, i64>(0),
            )
            .map(|c| c > 0)
        })
        .await
    }

    pub async fn get_active_sessions(&self) -> Result<Vec<AgentSessionRecord>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM agent_sessions WHERE current_window IS NOT NULL",
            )?;
            let rows = stmt.query_map([], row_to_record)?;
            rows.collect()
        })
        .await
    }

    pub async fn get_inactive_sessions(
        &self,
        max_age_hours: i64,
    ) -> Result<Vec<AgentSessionRecord>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM agent_sessions
                 WHERE current_window IS NULL
                   AND (is_pinned = 1 OR last_activity_at >= ?1)",
            )?;
            let cutoff = (Utc::now() - chrono::Duration::hours(max_age_hours)).to_rfc3339();
            let rows = stmt.query_map(params![cutoff], row_to_record)?;
            rows.collect()
        })
        .await
    }

    pub async fn get_pinned_orphaned(&self) -> Result<Vec<AgentSessionRecord>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM agent_sessions WHERE current_window IS NULL AND is_pinned = 1",
            )?;
            let rows = stmt.query_map([], row_to_record)?;
            rows.collect()
        })
        .await
    }

    pub async fn get_app_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT value FROM app_settings WHERE key = ?1",
                params![key],
                |r| r.get(0),
            )
            .optional()
        })
        .await
    }

    pub async fn set_app_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let (key, value) = (key.to_string(), value.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO app_settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })
        .await
    }
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<AgentSessionRecord> {
    let agent_type_str: String = row.get("agent_type")?;
    let created_at: String = row.get("created_at")?;
    let last_activity_at: String = row.get("last_activity_at")?;
    Ok(AgentSessionRecord {
        session_id: row.get("session_id")?,
        log_file_path: row.get("log_file_path")?,
        project_path: row.get("project_path")?,
        agent_type: AgentType::parse(&agent_type_str).unwrap_or(AgentType::Claude),
        display_name: row.get("display_name")?,
        created_at: parse_rfc3339(&created_at),
        last_activity_at: parse_rfc3339(&last_activity_at),
        current_window: row.get("current_window")?,
        last_user_message: row.get("last_user_message")?,
        is_pinned: row.get::<_, i64>("is_pinned")? != 0,
        last_resume_error: row.get("last_resume_error")?,
        last_known_log_size: row.get("last_known_log_size")?,
        is_codex_exec: row.get::<_, i64>("is_codex_exec")? != 0,
    })
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(session_id: &str) -> AgentSessionRecord {
        AgentSessionRecord {
            session_id: session_id.to_string(),
            log_file_path: format!("/tmp/{session_id}.jsonl"),
            project_path: "/tmp/project".to_string(),
            agent_type: AgentType::Claude,
            display_name: "project".to_string(),
            created_at: Utc::now(),
            last_activity_at: Utc::now(),
            current_window: None,
            last_user_message: None,
            is_pinned: false,
            last_resume_error: None,
            last_known_log_size: Some(0),
            is_codex_exec: false,
        }
    }

    #[tokio::test]
    async fn insert_and_fetch_round_trips() {
        let store = Store::open_in_memory().unwrap();
        store.insert_session(sample_record("s1")).await.unwrap();

        let fetched = store.get_session_by_id("s1").await.unwrap().unwrap();
        assert_eq!(fetched.session_id, "s1");
        assert_eq!(fetched.project_path, "/tmp/project");

        let by_log = store
            .get_session_by_log_path("/tmp/s1.jsonl")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_log.session_id, "s1");
    }

    #[tokio::test]
    async fn orphan_clears_window_without_deleting_row() {
        let store = Store::open_in_memory().unwrap();
        let mut record = sample_record("s2");
        record.current_window = Some("agentboard:1".to_string());
        store.insert_session(record).await.unwrap();

        store.orphan_session("s2").await.unwrap();
        let fetched = store.get_session_by_id("s2").await.unwrap().unwrap();
        assert!(fetched.current_window.is_none());
    }

    #[tokio::test]
    async fn pinned_orphaned_survive_inactive_age_filter() {
        let store = Store::open_in_memory().unwrap();
        let mut record = sample_record("s3");
        record.is_pinned = true;
        record.last_activity_at = Utc::now() - chrono::Duration::days(30);
        store.insert_session(record).await.unwrap();

        let inactive = store.get_inactive_sessions(1).await.unwrap();
        assert_eq!(inactive.len(), 1);
        assert_eq!(inactive[0].session_id, "s3");
    }

    #[tokio::test]
    async fn old_unpinned_sessions_hidden_from_inactive_list() {
        let store = Store::open_in_memory().unwrap();
        let mut record = sample_record("s4");
        record.last_activity_at = Utc::now() - chrono::Duration::days(30);
        store.insert_session(record).await.unwrap();

        let inactive = store.get_inactive_sessions(1).await.unwrap();
        assert!(inactive.is_empty());
    }

    #[tokio::test]
    async fn app_settings_upsert() {
        let store = Store::open_in_memory().unwrap();
        store.set_app_setting("tmux-mouse-mode", "true").await.unwrap();
        assert_eq!(
            store.get_app_setting("tmux-mouse-mode").await.unwrap(),
            Some("true".to_string())
        );
        store.set_app_setting("tmux-mouse-mode", "false").await.unwrap();
        assert_eq!(
            store.get_app_setting("tmux-mouse-mode").await.unwrap(),
            Some("false".to_string())
        );
    }

    #[tokio::test]
    async fn display_name_exists_checks_collisions() {
        let store = Store::open_in_memory().unwrap();
        store.insert_session(sample_record("s5")).await.unwrap();
        assert!(store.display_name_exists("project").await.unwrap());
        assert!(!store.display_name_exists("other").await.unwrap());
    }
}
