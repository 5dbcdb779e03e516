// ABOUTME: Forward-only schema migrations for the embedded sqlite store
// Idempotent statements run in order, under a single transaction per startup (§4.3)

use rusqlite::Connection;
use tracing::info;

/// Applies every migration that hasn't run yet, in a single transaction.
/// Safe to call on a fresh database, an up-to-date one, or (the interesting
/// case, §8.8) a legacy schema missing `session_source`/`last_user_message`.
pub fn migrate(conn: &mut Connection) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_meta (version INTEGER NOT NULL);",
    )?;
    let version: i64 = tx
        .query_row("SELECT version FROM schema_meta LIMIT 1", [], |r| r.get(0))
        .unwrap_or(0);

    if version < 1 {
        info!("running migration v1: create agent_sessions/app_settings");
        tx.execute_batch(
            "CREATE TABLE IF NOT EXISTS agent_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT UNIQUE NOT NULL,
                log_file_path TEXT UNIQUE NOT NULL,
                project_path TEXT NOT NULL,
                agent_type TEXT NOT NULL CHECK (agent_type IN ('claude','codex')),
                display_name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_activity_at TEXT NOT NULL,
                current_window TEXT,
                is_pinned INTEGER NOT NULL DEFAULT 0,
                last_user_message TEXT,
                last_resume_error TEXT,
                last_known_log_size INTEGER,
                is_codex_exec INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS app_settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
    }

    if version < 2 {
        // Legacy installs may predate `session_source`/`last_user_message`
        // and may carry synthetic rows from an earlier test-data feature.
        let has_session_source: bool = tx
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('agent_sessions') WHERE name = 'session_source'",
                [],
                |r| r.get::<_, i64>(0),
            )
            .map(|c| c > 0)
            .unwrap_or(false);

        if has_session_source {
            info!("running migration v2: drop session_source, delete synthetic rows");
            tx.execute(
                "DELETE FROM agent_sessions WHERE session_source = 'synthetic'",
                [],
            )?;
            // SQLite's ALTER TABLE cannot drop columns before 3.35; rebuild
            // the table rather than assume a modern libsqlite3.
            tx.execute_batch(
                "CREATE TABLE agent_sessions_v2 (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    session_id TEXT UNIQUE NOT NULL,
                    log_file_path TEXT UNIQUE NOT NULL,
                    project_path TEXT NOT NULL,
                    agent_type TEXT NOT NULL CHECK (agent_type IN ('claude','codex')),
                    display_name TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    last_activity_at TEXT NOT NULL,
                    current_window TEXT,
                    is_pinned INTEGER NOT NULL DEFAULT 0,
                    last_user_message TEXT,
                    last_resume_error TEXT,
                    last_known_log_size INTEGER,
                    is_codex_exec INTEGER NOT NULL DEFAULT 0
                );
                INSERT INTO agent_sessions_v2
                    (id, session_id, log_file_path, project_path, agent_type, display_name,
                     created_at, last_activity_at, current_window, is_pinned,
                     last_resume_error, is_codex_exec)
                SELECT id, session_id, log_file_path, project_path, agent_type, display_name,
                       created_at, last_activity_at, current_window, is_pinned,
                       last_resume_error, is_codex_exec
                FROM agent_sessions;
                DROP TABLE agent_sessions;
                ALTER TABLE agent_sessions_v2 RENAME TO agent_sessions;",
            )?;
        }
    }

    tx.execute("DELETE FROM schema_meta", [])?;
    tx.execute("INSERT INTO schema_meta (version) VALUES (2)", [])?;
    tx.commit()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_db_migrates_cleanly() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM agent_sessions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn migration_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();
    }

    #[test]
    fn legacy_schema_preserves_non_synthetic_rows_and_drops_synthetic() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE agent_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT UNIQUE NOT NULL,
                log_file_path TEXT UNIQUE NOT NULL,
                project_path TEXT NOT NULL,
                agent_type TEXT NOT NULL,
                display_name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_activity_at TEXT NOT NULL,
                current_window TEXT,
                is_pinned INTEGER NOT NULL DEFAULT 0,
                last_resume_error TEXT,
                is_codex_exec INTEGER NOT NULL DEFAULT 0,
                session_source TEXT
            );",
        )
        .unwrap();
        conn.execute(
            "INSERT INTO agent_sessions (session_id, log_file_path, project_path, agent_type,
                display_name, created_at, last_activity_at, session_source)
             VALUES ('real-1', '/tmp/a.jsonl', '/tmp/proj', 'claude', 'proj', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z', NULL)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO agent_sessions (session_id, log_file_path, project_path, agent_type,
                display_name, created_at, last_activity_at, session_source)
             VALUES ('fake-1', '/tmp/b.jsonl', '/tmp/proj', 'claude', 'proj', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z', 'synthetic')",
            [],
        )
        .unwrap();

        migrate(&mut conn).unwrap();

        let has_session_source: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('agent_sessions') WHERE name = 'session_source'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(has_session_source, 0, "session_source column should be gone");

        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM agent_sessions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(remaining, 1, "only the non-synthetic row should survive");

        let kept_id: String = conn
            .query_row(
                "SELECT session_id FROM agent_sessions WHERE session_id = 'real-1'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(kept_id, "real-1");
    }
}
