//! SQLite persistence for tally-daemon.
//!
//! This is the single-writer store backing the daemon: projects, time
//! sessions and a small settings table. Every call opens its own connection
//! in WAL mode; multi-statement mutations run in a transaction.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use std::path::PathBuf;

use tally_core::stats;
use tally_core::store::{append_note, new_session_id, StoreResult};
use tally_core::{Project, ProjectStats, ProjectStatus, SessionStore, StoreError, TimeSession};

const SESSION_COLUMNS: &str =
    "id, project_id, start_time, end_time, duration_seconds, notes, is_running";

pub struct Db {
    path: PathBuf,
}

impl Db {
    pub fn new(path: PathBuf) -> Result<Self, String> {
        let db = Self { path };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), String> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS projects (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    color TEXT,
                    status TEXT NOT NULL DEFAULT 'active',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS time_sessions (
                    id TEXT PRIMARY KEY,
                    project_id TEXT NOT NULL,
                    start_time TEXT NOT NULL,
                    end_time TEXT,
                    duration_seconds INTEGER,
                    notes TEXT,
                    is_running INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
                 );
                 CREATE TABLE IF NOT EXISTS settings (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_sessions_project ON time_sessions(project_id);
                 CREATE INDEX IF NOT EXISTS idx_sessions_start ON time_sessions(start_time);
                 CREATE INDEX IF NOT EXISTS idx_sessions_running ON time_sessions(is_running);
                 COMMIT;",
            )
            .map_err(|err| format!("Failed to initialize schema: {}", err))
        })
    }

    fn with_connection<T, E: From<String>>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, E>,
    ) -> Result<T, E> {
        let mut conn = self.open().map_err(E::from)?;
        op(&mut conn)
    }

    fn open(&self) -> Result<Connection, String> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent)
                .map_err(|err| format!("Failed to create daemon data dir: {}", err))?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|err| format!("Failed to open sqlite db: {}", err))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|err| format!("Failed to enable WAL: {}", err))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|err| format!("Failed to set synchronous: {}", err))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|err| format!("Failed to set busy_timeout: {}", err))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|err| format!("Failed to enable foreign keys: {}", err))?;

        Ok(conn)
    }
}

impl SessionStore for Db {
    fn start_session(&self, project_id: &str, start: DateTime<Utc>) -> StoreResult<TimeSession> {
        self.with_connection(|conn| {
            let tx = conn
                .transaction()
                .map_err(|err| backend("begin transaction", err))?;

            let known: Option<String> = tx
                .query_row(
                    "SELECT id FROM projects WHERE id = ?1",
                    params![project_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|err| backend("look up project", err))?;
            if known.is_none() {
                return Err(StoreError::NotFound {
                    entity: "Project",
                    id: project_id.to_string(),
                });
            }

            let running: Option<String> = tx
                .query_row(
                    "SELECT id FROM time_sessions WHERE project_id = ?1 AND is_running = 1 LIMIT 1",
                    params![project_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|err| backend("check running session", err))?;
            if let Some(session_id) = running {
                return Err(StoreError::AlreadyRunning {
                    project_id: project_id.to_string(),
                    session_id,
                });
            }

            let session = TimeSession::open(new_session_id(), project_id.to_string(), start);
            let now = Utc::now().to_rfc3339();
            tx.execute(
                "INSERT INTO time_sessions (id, project_id, start_time, is_running, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, 1, ?4, ?4)",
                params![session.id, session.project_id, session.start_time.to_rfc3339(), now],
            )
            .map_err(|err| backend("insert session", err))?;
            tx.commit().map_err(|err| backend("commit session", err))?;
            Ok(session)
        })
    }

    fn stop_session(
        &self,
        session_id: &str,
        end: DateTime<Utc>,
        notes: Option<&str>,
    ) -> StoreResult<TimeSession> {
        self.with_connection(|conn| {
            let tx = conn
                .transaction()
                .map_err(|err| backend("begin transaction", err))?;
            let mut session = select_session(&tx, session_id)?.ok_or_else(|| {
                StoreError::NotFound {
                    entity: "Session",
                    id: session_id.to_string(),
                }
            })?;
            if !session.is_running {
                return Err(StoreError::Conflict {
                    session_id: session_id.to_string(),
                });
            }

            session.close(end, notes.map(str::to_string));
            write_closed(&tx, &session)?;
            tx.commit().map_err(|err| backend("commit stop", err))?;
            Ok(session)
        })
    }

    fn delete_session(&self, session_id: &str) -> StoreResult<bool> {
        self.with_connection(|conn| {
            let removed = conn
                .execute("DELETE FROM time_sessions WHERE id = ?1", params![session_id])
                .map_err(|err| backend("delete session", err))?;
            Ok(removed > 0)
        })
    }

    fn get_session(&self, session_id: &str) -> StoreResult<Option<TimeSession>> {
        self.with_connection(|conn| select_session(conn, session_id))
    }

    fn list_running_sessions(&self) -> StoreResult<Vec<TimeSession>> {
        self.with_connection(|conn| {
            let sql = format!(
                "SELECT {} FROM time_sessions WHERE is_running = 1 ORDER BY start_time DESC",
                SESSION_COLUMNS
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|err| backend("prepare running sessions query", err))?;
            let rows = stmt
                .query_map([], session_from_row)
                .map_err(|err| backend("read running sessions", err))?;

            let mut sessions = Vec::new();
            for row in rows {
                sessions.push(row.map_err(|err| backend("decode session row", err))??);
            }
            Ok(sessions)
        })
    }

    fn stop_all_running_sessions(
        &self,
        end: DateTime<Utc>,
        note: &str,
    ) -> StoreResult<Vec<TimeSession>> {
        let running = self.list_running_sessions()?;
        self.with_connection(|conn| {
            let tx = conn
                .transaction()
                .map_err(|err| backend("begin transaction", err))?;
            let mut stopped = Vec::with_capacity(running.len());
            for mut session in running {
                let notes = append_note(session.notes.as_deref(), note);
                session.close(end, Some(notes));
                write_closed(&tx, &session)?;
                stopped.push(session);
            }
            tx.commit().map_err(|err| backend("commit stop all", err))?;
            Ok(stopped)
        })
    }

    fn list_projects(&self) -> StoreResult<Vec<Project>> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, name, color, status FROM projects ORDER BY created_at ASC, id ASC")
                .map_err(|err| backend("prepare projects query", err))?;
            let rows = stmt
                .query_map([], project_from_row)
                .map_err(|err| backend("read projects", err))?;

            let mut projects = Vec::new();
            for row in rows {
                projects.push(row.map_err(|err| backend("decode project row", err))??);
            }
            Ok(projects)
        })
    }

    fn get_project(&self, project_id: &str) -> StoreResult<Option<Project>> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT id, name, color, status FROM projects WHERE id = ?1",
                params![project_id],
                project_from_row,
            )
            .optional()
            .map_err(|err| backend("fetch project", err))?
            .transpose()
        })
    }

    fn upsert_project(&self, project: &Project) -> StoreResult<Project> {
        self.with_connection(|conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO projects (id, name, color, status, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5) \
                 ON CONFLICT(id) DO UPDATE SET \
                    name = excluded.name, \
                    color = excluded.color, \
                    status = excluded.status, \
                    updated_at = excluded.updated_at",
                params![
                    project.id,
                    project.name,
                    project.color,
                    project.status.as_str(),
                    now
                ],
            )
            .map_err(|err| backend("upsert project", err))?;
            Ok(project.clone())
        })
    }

    fn project_stats(&self, project_id: &str) -> StoreResult<ProjectStats> {
        self.with_connection(|conn| {
            let (total_seconds, session_count): (i64, u32) = conn
                .query_row(
                    "SELECT COALESCE(SUM(duration_seconds), 0), COUNT(*) \
                     FROM time_sessions WHERE project_id = ?1 AND is_running = 0",
                    params![project_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map_err(|err| backend("aggregate project stats", err))?;
            Ok(ProjectStats {
                project_id: project_id.to_string(),
                total_seconds,
                total_hours: stats::hours(total_seconds),
                session_count,
            })
        })
    }

    fn all_project_stats(&self) -> StoreResult<Vec<ProjectStats>> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT p.id, COALESCE(SUM(s.duration_seconds), 0), COUNT(s.id) \
                     FROM projects p \
                     LEFT JOIN time_sessions s ON s.project_id = p.id AND s.is_running = 0 \
                     GROUP BY p.id ORDER BY p.created_at ASC, p.id ASC",
                )
                .map_err(|err| backend("prepare stats query", err))?;
            let rows = stmt
                .query_map([], |row| {
                    let total_seconds: i64 = row.get(1)?;
                    Ok(ProjectStats {
                        project_id: row.get(0)?,
                        total_seconds,
                        total_hours: stats::hours(total_seconds),
                        session_count: row.get(2)?,
                    })
                })
                .map_err(|err| backend("read stats", err))?;

            let mut all = Vec::new();
            for row in rows {
                all.push(row.map_err(|err| backend("decode stats row", err))?);
            }
            Ok(all)
        })
    }

    fn load_setting(&self, key: &str) -> StoreResult<Option<String>> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| backend("load setting", err))
        })
    }

    fn save_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, Utc::now().to_rfc3339()],
            )
            .map_err(|err| backend("save setting", err))?;
            Ok(())
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Row mapping
// ═══════════════════════════════════════════════════════════════════════════════

fn backend(action: &str, err: rusqlite::Error) -> StoreError {
    StoreError::Backend(format!("Failed to {}: {}", action, err))
}

fn select_session(conn: &Connection, session_id: &str) -> StoreResult<Option<TimeSession>> {
    let sql = format!("SELECT {} FROM time_sessions WHERE id = ?1", SESSION_COLUMNS);
    conn.query_row(&sql, params![session_id], session_from_row)
        .optional()
        .map_err(|err| backend("fetch session", err))?
        .transpose()
}

fn write_closed(conn: &Connection, session: &TimeSession) -> StoreResult<()> {
    conn.execute(
        "UPDATE time_sessions SET end_time = ?1, duration_seconds = ?2, notes = ?3, \
            is_running = 0, updated_at = ?4 \
         WHERE id = ?5",
        params![
            session.end_time.map(|end| end.to_rfc3339()),
            session.duration_seconds,
            session.notes,
            Utc::now().to_rfc3339(),
            session.id
        ],
    )
    .map_err(|err| backend("update session", err))?;
    Ok(())
}

/// Decodes a session row. Malformed timestamps surface as a store error
/// rather than a SQLite error so callers see which row was bad.
fn session_from_row(row: &Row<'_>) -> rusqlite::Result<StoreResult<TimeSession>> {
    let id: String = row.get(0)?;
    let start_raw: String = row.get(2)?;
    let end_raw: Option<String> = row.get(3)?;

    let start_time = match parse_rfc3339(&start_raw) {
        Some(start) => start,
        None => {
            return Ok(Err(StoreError::Backend(format!(
                "Session {} has invalid start_time: {}",
                id, start_raw
            ))))
        }
    };
    let end_time = match end_raw {
        Some(raw) => match parse_rfc3339(&raw) {
            Some(end) => Some(end),
            None => {
                return Ok(Err(StoreError::Backend(format!(
                    "Session {} has invalid end_time: {}",
                    id, raw
                ))))
            }
        },
        None => None,
    };

    Ok(Ok(TimeSession {
        id,
        project_id: row.get(1)?,
        start_time,
        end_time,
        duration_seconds: row.get(4)?,
        notes: row.get(5)?,
        is_running: row.get::<_, i64>(6)? == 1,
    }))
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<StoreResult<Project>> {
    let id: String = row.get(0)?;
    let status_raw: String = row.get(3)?;
    let Some(status) = ProjectStatus::from_str(&status_raw) else {
        return Ok(Err(StoreError::Backend(format!(
            "Project {} has unknown status: {}",
            id, status_raw
        ))));
    };
    Ok(Ok(Project {
        id,
        name: row.get(1)?,
        color: row.get(2)?,
        status,
    }))
}

fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
