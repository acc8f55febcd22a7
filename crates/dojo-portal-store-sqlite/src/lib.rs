use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use dojo_portal_core::{BlobStore, KeyValueStore, PortalError};
use rusqlite::{params, Connection, DatabaseName, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

const LATEST_SCHEMA_VERSION: i64 = 2;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS kv_entries (
  entry_key TEXT PRIMARY KEY,
  value_json TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS certificate_blobs (
  blob_key TEXT PRIMARY KEY,
  bytes BLOB NOT NULL,
  byte_len INTEGER NOT NULL CHECK (byte_len >= 0),
  sha256 TEXT NOT NULL,
  stored_at TEXT NOT NULL
);
";

const MIGRATION_002_SQL: &str = r"
CREATE TABLE IF NOT EXISTS students (
  student_id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  birth_date TEXT NOT NULL,
  phone TEXT,
  current_belt TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS login_events (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  student_id TEXT NOT NULL REFERENCES students(student_id) ON DELETE CASCADE,
  action TEXT NOT NULL,
  actor TEXT NOT NULL,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS belt_progress (
  student_id TEXT NOT NULL REFERENCES students(student_id) ON DELETE CASCADE,
  belt_slug TEXT NOT NULL,
  file_name TEXT,
  uploaded_at TEXT NOT NULL,
  created_at TEXT NOT NULL,
  PRIMARY KEY (student_id, belt_slug)
);

CREATE TABLE IF NOT EXISTS portal_sessions (
  token_hash TEXT PRIMARY KEY,
  student_id TEXT NOT NULL REFERENCES students(student_id) ON DELETE CASCADE,
  issued_at TEXT NOT NULL,
  expires_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS test_applications (
  application_id TEXT PRIMARY KEY,
  student_id TEXT NOT NULL REFERENCES students(student_id) ON DELETE CASCADE,
  desired_belt TEXT NOT NULL,
  current_belt TEXT NOT NULL,
  preferred_test_date TEXT NOT NULL,
  message TEXT,
  submitted_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_login_events_created_at ON login_events(created_at);
CREATE INDEX IF NOT EXISTS idx_login_events_student ON login_events(student_id);
CREATE INDEX IF NOT EXISTS idx_belt_progress_uploaded_at ON belt_progress(student_id, uploaded_at);
CREATE INDEX IF NOT EXISTS idx_portal_sessions_student ON portal_sessions(student_id);
";

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: i64,
    pub parent: String,
    pub fk_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
    pub schema_status: SchemaStatus,
}

/// Roster entry for one student.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StudentRow {
    pub student_id: String,
    pub name: String,
    pub birth_date: String,
    pub phone: Option<String>,
    pub current_belt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginEventRow {
    pub id: i64,
    pub student_id: String,
    pub action: String,
    pub actor: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BeltProgressRow {
    pub belt_slug: String,
    pub file_name: Option<String>,
    pub uploaded_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionRow {
    pub student_id: String,
    pub issued_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivitySummaryRow {
    pub student_id: String,
    pub name: Option<String>,
    pub total_events: i64,
    pub login_events: i64,
    pub last_event_at: Option<String>,
    pub latest_belt: Option<String>,
    pub latest_belt_uploaded_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestApplicationRow {
    pub application_id: String,
    pub student_id: String,
    pub desired_belt: String,
    pub current_belt: String,
    pub preferred_test_date: String,
    pub message: Option<String>,
    pub submitted_at: String,
}

impl SqliteStore {
    /// Open a SQLite-backed portal store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Open a database and bring it to the latest schema.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or migrated.
    pub fn open_migrated(path: &Path) -> Result<Self> {
        let mut store = Self::open(path)?;
        store.migrate()?;
        Ok(store)
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus { current_version, target_version: LATEST_SCHEMA_VERSION, pending_versions })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;

        if version < 1 {
            self.apply_migration(1, MIGRATION_001_SQL)?;
            version = current_schema_version(&self.conn)?;
        }

        if version < 2 {
            self.apply_migration(2, MIGRATION_002_SQL)?;
            version = current_schema_version(&self.conn)?;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    fn apply_migration(&mut self, version: i64, sql: &str) -> Result<()> {
        let tx = self.conn.transaction().context("failed to start migration transaction")?;
        tx.execute_batch(sql).with_context(|| format!("failed to apply migration v{version}"))?;
        record_schema_version(&tx, version)?;
        tx.commit().with_context(|| format!("failed to commit migration v{version}"))?;
        Ok(())
    }

    /// Insert or update a roster entry.
    ///
    /// # Errors
    /// Returns an error when required fields are empty or the write fails.
    pub fn upsert_student(&mut self, student: &StudentRow) -> Result<()> {
        for (field, value) in [
            ("student_id", &student.student_id),
            ("name", &student.name),
            ("birth_date", &student.birth_date),
        ] {
            if value.trim().is_empty() {
                return Err(anyhow!("student {field} must be non-empty"));
            }
        }

        self.conn
            .execute(
                "INSERT INTO students(student_id, name, birth_date, phone, current_belt, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(student_id) DO UPDATE SET
                   name = excluded.name,
                   birth_date = excluded.birth_date,
                   phone = excluded.phone,
                   current_belt = excluded.current_belt,
                   updated_at = excluded.updated_at",
                params![
                    student.student_id.trim(),
                    student.name.trim(),
                    student.birth_date.trim(),
                    student.phone,
                    student.current_belt.trim(),
                    now_rfc3339()?,
                ],
            )
            .with_context(|| format!("failed to upsert student {}", student.student_id))?;
        Ok(())
    }

    /// # Errors
    /// Returns an error when the roster cannot be read.
    pub fn get_student(&self, student_id: &str) -> Result<Option<StudentRow>> {
        self.conn
            .query_row(
                "SELECT student_id, name, birth_date, phone, current_belt
                 FROM students WHERE student_id = ?1",
                params![student_id],
                |row| {
                    Ok(StudentRow {
                        student_id: row.get(0)?,
                        name: row.get(1)?,
                        birth_date: row.get(2)?,
                        phone: row.get(3)?,
                        current_belt: row.get(4)?,
                    })
                },
            )
            .optional()
            .with_context(|| format!("failed to load student {student_id}"))
    }

    /// # Errors
    /// Returns an error when the roster cannot be counted.
    pub fn count_students(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM students", [], |row| row.get::<_, i64>(0))
            .context("failed to count students")
    }

    /// Append a login or activity event.
    ///
    /// # Errors
    /// Returns an error when the event cannot be written.
    pub fn insert_login_event(
        &mut self,
        student_id: &str,
        action: &str,
        actor: &str,
        at: OffsetDateTime,
    ) -> Result<String> {
        let created_at = rfc3339(at)?;
        self.conn
            .execute(
                "INSERT INTO login_events(student_id, action, actor, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![student_id, action, actor, created_at],
            )
            .with_context(|| format!("failed to record {action} event for {student_id}"))?;
        Ok(created_at)
    }

    /// Most recent events first.
    ///
    /// # Errors
    /// Returns an error when events cannot be read.
    pub fn list_login_events(&self, limit: u32) -> Result<Vec<LoginEventRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, student_id, action, actor, created_at
             FROM login_events
             ORDER BY created_at DESC, id DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![i64::from(limit)], |row| {
            Ok(LoginEventRow {
                id: row.get(0)?,
                student_id: row.get(1)?,
                action: row.get(2)?,
                actor: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row.context("failed to decode login event row")?);
        }
        Ok(events)
    }

    /// Per-student activity totals, most recently active first.
    ///
    /// # Errors
    /// Returns an error when the summary query fails.
    pub fn activity_summary(&self) -> Result<Vec<ActivitySummaryRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT
               le.student_id,
               s.name,
               COUNT(*) AS total_events,
               SUM(CASE WHEN le.action = 'login' THEN 1 ELSE 0 END) AS login_events,
               MAX(le.created_at) AS last_event,
               (
                 SELECT bp.belt_slug FROM belt_progress bp
                 WHERE bp.student_id = le.student_id
                 ORDER BY bp.uploaded_at DESC
                 LIMIT 1
               ) AS latest_belt,
               (
                 SELECT bp.uploaded_at FROM belt_progress bp
                 WHERE bp.student_id = le.student_id
                 ORDER BY bp.uploaded_at DESC
                 LIMIT 1
               ) AS latest_belt_uploaded
             FROM login_events le
             LEFT JOIN students s ON s.student_id = le.student_id
             GROUP BY le.student_id
             ORDER BY last_event DESC, le.student_id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ActivitySummaryRow {
                student_id: row.get(0)?,
                name: row.get(1)?,
                total_events: row.get(2)?,
                login_events: row.get(3)?,
                last_event_at: row.get(4)?,
                latest_belt: row.get(5)?,
                latest_belt_uploaded_at: row.get(6)?,
            })
        })?;

        let mut summary = Vec::new();
        for row in rows {
            summary.push(row.context("failed to decode activity summary row")?);
        }
        Ok(summary)
    }

    /// Record a certificate for a belt; the latest upload for a belt wins.
    ///
    /// # Errors
    /// Returns an error when the upsert fails.
    pub fn upsert_belt_progress(
        &mut self,
        student_id: &str,
        belt_slug: &str,
        file_name: Option<&str>,
        uploaded_at: OffsetDateTime,
    ) -> Result<BeltProgressRow> {
        let uploaded_at = rfc3339(uploaded_at)?;
        self.conn
            .execute(
                "INSERT INTO belt_progress(student_id, belt_slug, file_name, uploaded_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(student_id, belt_slug) DO UPDATE SET
                   file_name = excluded.file_name,
                   uploaded_at = excluded.uploaded_at,
                   created_at = excluded.created_at",
                params![student_id, belt_slug, file_name, uploaded_at, now_rfc3339()?],
            )
            .with_context(|| format!("failed to upsert belt progress {student_id}/{belt_slug}"))?;

        Ok(BeltProgressRow {
            belt_slug: belt_slug.to_string(),
            file_name: file_name.map(str::to_string),
            uploaded_at,
        })
    }

    /// Certificates for a student, oldest upload first.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read.
    pub fn list_belt_progress(&self, student_id: &str) -> Result<Vec<BeltProgressRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT belt_slug, file_name, uploaded_at
             FROM belt_progress
             WHERE student_id = ?1
             ORDER BY uploaded_at ASC, belt_slug ASC",
        )?;
        let rows = stmt.query_map(params![student_id], |row| {
            Ok(BeltProgressRow { belt_slug: row.get(0)?, file_name: row.get(1)?, uploaded_at: row.get(2)? })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.context("failed to decode belt progress row")?);
        }
        Ok(records)
    }

    /// # Errors
    /// Returns an error when the session cannot be written.
    pub fn create_session(
        &mut self,
        token_hash: &str,
        student_id: &str,
        issued_at: OffsetDateTime,
        expires_at: OffsetDateTime,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO portal_sessions(token_hash, student_id, issued_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![token_hash, student_id, rfc3339(issued_at)?, rfc3339(expires_at)?],
            )
            .with_context(|| format!("failed to create session for {student_id}"))?;
        Ok(())
    }

    /// # Errors
    /// Returns an error when the session cannot be read or decoded.
    pub fn find_session(&self, token_hash: &str) -> Result<Option<SessionRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT student_id, issued_at, expires_at FROM portal_sessions WHERE token_hash = ?1",
                params![token_hash],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?)),
            )
            .optional()
            .context("failed to load session")?;

        row.map(|(student_id, issued_at, expires_at)| {
            Ok(SessionRow {
                student_id,
                issued_at: parse_rfc3339(&issued_at)?,
                expires_at: parse_rfc3339(&expires_at)?,
            })
        })
        .transpose()
    }

    /// # Errors
    /// Returns an error when the delete fails.
    pub fn delete_session(&mut self, token_hash: &str) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM portal_sessions WHERE token_hash = ?1", params![token_hash])
            .context("failed to delete session")?;
        Ok(deleted > 0)
    }

    /// Drop sessions that expired before `now`.
    ///
    /// # Errors
    /// Returns an error when the delete fails.
    pub fn purge_expired_sessions(&mut self, now: OffsetDateTime) -> Result<usize> {
        self.conn
            .execute("DELETE FROM portal_sessions WHERE expires_at < ?1", params![rfc3339(now)?])
            .context("failed to purge expired sessions")
    }

    /// # Errors
    /// Returns an error when the application cannot be written.
    pub fn insert_test_application(&mut self, application: &TestApplicationRow) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO test_applications(
                    application_id, student_id, desired_belt, current_belt,
                    preferred_test_date, message, submitted_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    application.application_id,
                    application.student_id,
                    application.desired_belt,
                    application.current_belt,
                    application.preferred_test_date,
                    application.message,
                    application.submitted_at,
                ],
            )
            .with_context(|| {
                format!("failed to insert test application {}", application.application_id)
            })?;
        Ok(())
    }

    /// # Errors
    /// Returns an error when rows cannot be read.
    pub fn list_test_applications(&self, student_id: &str) -> Result<Vec<TestApplicationRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT application_id, student_id, desired_belt, current_belt,
                    preferred_test_date, message, submitted_at
             FROM test_applications
             WHERE student_id = ?1
             ORDER BY submitted_at ASC, application_id ASC",
        )?;
        let rows = stmt.query_map(params![student_id], |row| {
            Ok(TestApplicationRow {
                application_id: row.get(0)?,
                student_id: row.get(1)?,
                desired_belt: row.get(2)?,
                current_belt: row.get(3)?,
                preferred_test_date: row.get(4)?,
                message: row.get(5)?,
                submitted_at: row.get(6)?,
            })
        })?;

        let mut applications = Vec::new();
        for row in rows {
            applications.push(row.context("failed to decode test application row")?);
        }
        Ok(applications)
    }

    /// Create a `SQLite` backup file of the current main database.
    ///
    /// # Errors
    /// Returns an error when backup directories cannot be created or backup fails.
    pub fn backup_database(&self, out_file: &Path) -> Result<()> {
        if let Some(parent) = out_file.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory for backup file {}", out_file.display())
            })?;
        }

        self.conn
            .backup(DatabaseName::Main, out_file, None)
            .with_context(|| format!("failed to create sqlite backup at {}", out_file.display()))
    }

    /// Restore this database from a `SQLite` backup file, then migrate to latest.
    ///
    /// # Errors
    /// Returns an error when the backup file is missing, restore fails, or migrations fail.
    pub fn restore_database(&mut self, in_file: &Path) -> Result<()> {
        if !in_file.exists() {
            return Err(anyhow!("backup file does not exist: {}", in_file.display()));
        }

        self.conn
            .restore(DatabaseName::Main, in_file, None::<fn(rusqlite::backup::Progress)>)
            .with_context(|| format!("failed to restore sqlite backup from {}", in_file.display()))?;

        self.migrate()?;
        Ok(())
    }

    /// Run quick-check, foreign-key-check, and schema status health probes.
    ///
    /// # Errors
    /// Returns an error when any integrity probe query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let mut stmt = self
            .conn
            .prepare("PRAGMA foreign_key_check")
            .context("failed to prepare PRAGMA foreign_key_check")?;
        let rows = stmt.query_map([], |row| {
            Ok(ForeignKeyViolation {
                table: row.get(0)?,
                rowid: row.get(1)?,
                parent: row.get(2)?,
                fk_index: row.get(3)?,
            })
        })?;

        let mut foreign_key_violations = Vec::new();
        for row in rows {
            foreign_key_violations.push(row?);
        }

        let schema_status = self.schema_status()?;
        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            foreign_key_violations,
            schema_status,
        })
    }
}

impl KeyValueStore for SqliteStore {
    fn get_value(&self, key: &str) -> Result<Option<Value>, PortalError> {
        let raw = self
            .conn
            .query_row(
                "SELECT value_json FROM kv_entries WHERE entry_key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(PortalError::storage)?;
        raw.map(|raw| serde_json::from_str(&raw).map_err(PortalError::storage)).transpose()
    }

    fn set_value(&mut self, key: &str, value: &Value) -> Result<(), PortalError> {
        let raw = serde_json::to_string(value).map_err(PortalError::storage)?;
        let now = now_rfc3339().map_err(PortalError::storage)?;
        self.conn
            .execute(
                "INSERT INTO kv_entries(entry_key, value_json, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(entry_key) DO UPDATE SET
                   value_json = excluded.value_json,
                   updated_at = excluded.updated_at",
                params![key, raw, now],
            )
            .map_err(PortalError::storage)?;
        Ok(())
    }

    fn remove_value(&mut self, key: &str) -> Result<(), PortalError> {
        self.conn
            .execute("DELETE FROM kv_entries WHERE entry_key = ?1", params![key])
            .map_err(PortalError::storage)?;
        Ok(())
    }
}

impl BlobStore for SqliteStore {
    fn save_blob(&mut self, key: &str, bytes: &[u8]) -> Result<(), PortalError> {
        let digest = Sha256::digest(bytes);
        let byte_len = i64::try_from(bytes.len()).map_err(PortalError::storage)?;
        let now = now_rfc3339().map_err(PortalError::storage)?;
        let tx = self.conn.transaction().map_err(PortalError::storage)?;
        tx.execute(
            "INSERT INTO certificate_blobs(blob_key, bytes, byte_len, sha256, stored_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(blob_key) DO UPDATE SET
               bytes = excluded.bytes,
               byte_len = excluded.byte_len,
               sha256 = excluded.sha256,
               stored_at = excluded.stored_at",
            params![key, bytes, byte_len, format!("{digest:x}"), now],
        )
        .map_err(PortalError::storage)?;
        tx.commit().map_err(PortalError::storage)
    }

    fn load_blob(&self, key: &str) -> Result<Option<Vec<u8>>, PortalError> {
        let row = self
            .conn
            .query_row(
                "SELECT bytes, sha256 FROM certificate_blobs WHERE blob_key = ?1",
                params![key],
                |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .map_err(PortalError::storage)?;

        let Some((bytes, expected)) = row else {
            return Ok(None);
        };
        let actual = format!("{:x}", Sha256::digest(&bytes));
        if actual != expected {
            return Err(PortalError::Storage(format!("certificate blob {key} failed digest check")));
        }
        Ok(Some(bytes))
    }

    fn remove_blob(&mut self, key: &str) -> Result<(), PortalError> {
        let tx = self.conn.transaction().map_err(PortalError::storage)?;
        tx.execute("DELETE FROM certificate_blobs WHERE blob_key = ?1", params![key])
            .map_err(PortalError::storage)?;
        tx.commit().map_err(PortalError::storage)
    }
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    rfc3339(OffsetDateTime::now_utc())
}

/// Format a timestamp as RFC3339 in UTC.
///
/// # Errors
/// Returns an error when the timestamp cannot be formatted.
pub fn rfc3339(value: OffsetDateTime) -> Result<String> {
    value
        .to_offset(time::UtcOffset::UTC)
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

/// # Errors
/// Returns an error when `value` is not an RFC3339 timestamp.
pub fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
}
