use std::path::PathBuf;

use anyhow::Result;
use dojo_portal_core::{BeltTestApplication, PortalError, ServerCertificate, Student};
use dojo_portal_store_sqlite::{
    rfc3339, ActivitySummaryRow, LoginEventRow, SchemaStatus, SqliteStore, StudentRow,
    TestApplicationRow,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};
use ulid::Ulid;

pub const API_CONTRACT_VERSION: &str = "portal.v1";
pub const DEFAULT_ACTIVITY_LIMIT: i64 = 200;
pub const MAX_ACTIVITY_LIMIT: i64 = 1000;
pub const DEFAULT_TOKEN_TTL_HOURS: i64 = 12;

/// Failure classes the HTTP layer maps onto status codes.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl From<PortalError> for ApiError {
    fn from(err: PortalError) -> Self {
        match err {
            PortalError::Storage(_) => Self::Internal(anyhow::Error::new(err)),
            other => Self::BadRequest(other.to_string()),
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoginEventRequest {
    #[serde(default)]
    pub student_id: String,
    #[serde(default)]
    pub birth_date: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub actor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressResponse {
    pub records: Vec<ServerCertificate>,
    #[serde(default)]
    pub generated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: String,
    pub student: Student,
    pub progress: ProgressResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecorded {
    pub ok: bool,
    pub recorded_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum LoginEventOutcome {
    Login(LoginResponse),
    Activity(ActivityRecorded),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub student: Student,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecordProgressRequest {
    #[serde(default)]
    pub student_id: String,
    #[serde(default)]
    pub belt_slug: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub uploaded_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecordProgressResponse {
    pub ok: bool,
    pub belt_slug: String,
    pub uploaded_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TestApplicationResponse {
    pub ok: bool,
    pub application_id: String,
    pub submitted_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub student_id: String,
    pub action: String,
    pub actor: String,
    pub recorded_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySummary {
    pub student_id: String,
    pub name: Option<String>,
    pub total_events: i64,
    pub login_events: i64,
    pub last_event_at: Option<String>,
    pub latest_belt: Option<String>,
    pub latest_belt_uploaded_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AdminActivity {
    pub events: Vec<ActivityEvent>,
    pub summary: Vec<ActivitySummary>,
    pub generated_at: String,
}

/// One roster entry as exported from the studio's student list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub birth_date: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub current_belt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RosterImportSummary {
    pub imported: usize,
    pub total_students: i64,
}

impl From<LoginEventRow> for ActivityEvent {
    fn from(row: LoginEventRow) -> Self {
        Self { student_id: row.student_id, action: row.action, actor: row.actor, recorded_at: row.created_at }
    }
}

impl From<ActivitySummaryRow> for ActivitySummary {
    fn from(row: ActivitySummaryRow) -> Self {
        Self {
            student_id: row.student_id,
            name: row.name,
            total_events: row.total_events,
            login_events: row.login_events,
            last_event_at: row.last_event_at,
            latest_belt: row.latest_belt,
            latest_belt_uploaded_at: row.latest_belt_uploaded_at,
        }
    }
}

fn profile_of(row: &StudentRow) -> Student {
    Student { id: row.student_id.clone(), name: row.name.clone(), current_belt: row.current_belt.clone() }
}

/// SHA-256 of a bearer token as stored in `portal_sessions`.
#[must_use]
pub fn token_hash(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    format!("{digest:x}")
}

fn generate_token() -> String {
    let mut bytes = [0_u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Clamp a requested activity limit into `1..=1000`, defaulting to 200.
#[must_use]
pub fn clamp_activity_limit(requested: Option<i64>) -> u32 {
    let limit = requested.map_or(DEFAULT_ACTIVITY_LIMIT, |value| value.clamp(1, MAX_ACTIVITY_LIMIT));
    u32::try_from(limit).unwrap_or(200)
}

fn now_string() -> ApiResult<String> {
    Ok(rfc3339(OffsetDateTime::now_utc())?)
}

#[derive(Debug, Clone)]
pub struct PortalApi {
    db_path: PathBuf,
    admin_key: Option<String>,
    token_ttl: Duration,
}

impl PortalApi {
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path, admin_key: None, token_ttl: Duration::hours(DEFAULT_TOKEN_TTL_HOURS) }
    }

    /// Require this key on admin requests. An unset or blank key leaves the
    /// admin endpoint open.
    #[must_use]
    pub fn with_admin_key(mut self, admin_key: Option<String>) -> Self {
        self.admin_key = admin_key.filter(|key| !key.trim().is_empty());
        self
    }

    #[must_use]
    pub fn with_token_ttl(mut self, token_ttl: Duration) -> Self {
        self.token_ttl = token_ttl;
        self
    }

    fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::open_migrated(&self.db_path)
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = SqliteStore::open(&self.db_path)?;
        store.schema_status()
    }

    /// Apply pending migrations, or return planned versions for dry-run mode.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut store = SqliteStore::open(&self.db_path)?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                after_version: None,
                up_to_date: None,
            });
        }

        let planned_versions = before.pending_versions;
        store.migrate()?;
        let after = store.schema_status()?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: planned_versions,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// Insert or update roster entries. Every entry is validated before any
    /// is written.
    ///
    /// # Errors
    /// Returns [`ApiError::BadRequest`] naming the first invalid entry, or an
    /// internal error when persistence fails.
    pub fn import_roster(&self, entries: &[RosterEntry]) -> ApiResult<RosterImportSummary> {
        let mut rows = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            let row = StudentRow {
                student_id: entry.id.trim().to_string(),
                name: entry.name.trim().to_string(),
                birth_date: entry.birth_date.trim().to_string(),
                phone: entry.phone.as_deref().map(str::trim).filter(|value| !value.is_empty()).map(str::to_string),
                current_belt: entry.current_belt.as_deref().map(str::trim).unwrap_or_default().to_string(),
            };
            if row.student_id.is_empty() || row.name.is_empty() || row.birth_date.is_empty() {
                return Err(ApiError::BadRequest(format!(
                    "roster entry {index} requires id, name and birthDate"
                )));
            }
            rows.push(row);
        }

        let mut store = self.open_store()?;
        for row in &rows {
            store.upsert_student(row)?;
        }
        tracing::info!(imported = rows.len(), "roster imported");
        Ok(RosterImportSummary { imported: rows.len(), total_students: store.count_students()? })
    }

    /// Record a login (issuing a session token) or an authenticated activity event.
    ///
    /// # Errors
    /// Returns [`ApiError::BadRequest`] for missing fields,
    /// [`ApiError::Unauthorized`] for bad credentials or tokens, and
    /// [`ApiError::Forbidden`] when the token belongs to another student.
    pub fn login_event(&self, request: &LoginEventRequest, bearer: Option<&str>) -> ApiResult<LoginEventOutcome> {
        let student_id = request.student_id.trim();
        if student_id.is_empty() {
            return Err(ApiError::BadRequest("studentId is required".to_string()));
        }
        let action = request
            .action
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or("login")
            .to_lowercase();
        let actor = request
            .actor
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or("student")
            .to_lowercase();

        let mut store = self.open_store()?;
        let now = OffsetDateTime::now_utc();

        if action != "login" {
            let subject = self.authorize(&mut store, bearer, now)?;
            if subject != student_id {
                tracing::warn!(student_id, %subject, %action, "activity event for another student rejected");
                return Err(ApiError::Forbidden("Token does not match student".to_string()));
            }
            let recorded_at = store.insert_login_event(student_id, &action, &actor, now)?;
            if action == "logout" {
                if let Some(token) = bearer {
                    store.delete_session(&token_hash(token))?;
                }
            }
            return Ok(LoginEventOutcome::Activity(ActivityRecorded { ok: true, recorded_at }));
        }

        let birth_date = request.birth_date.as_deref().map(str::trim).unwrap_or_default();
        if birth_date.is_empty() {
            return Err(ApiError::BadRequest("birthDate is required".to_string()));
        }
        let student = store
            .get_student(student_id)?
            .filter(|row| row.birth_date.trim() == birth_date)
            .ok_or_else(|| {
                tracing::warn!(student_id, "login rejected");
                ApiError::Unauthorized("Invalid student ID or birth date".to_string())
            })?;

        store.insert_login_event(student_id, &action, &actor, now)?;
        store.purge_expired_sessions(now)?;
        let token = generate_token();
        let expires_at = now + self.token_ttl;
        store.create_session(&token_hash(&token), student_id, now, expires_at)?;
        let records = store.list_belt_progress(student_id)?.into_iter().map(server_certificate).collect();
        tracing::info!(student_id, "student signed in");

        Ok(LoginEventOutcome::Login(LoginResponse {
            token,
            expires_at: rfc3339(expires_at)?,
            student: profile_of(&student),
            progress: ProgressResponse { records, generated_at: Some(rfc3339(now)?) },
        }))
    }

    /// # Errors
    /// Returns [`ApiError::Unauthorized`] for a missing, unknown or expired
    /// token, or [`ApiError::Forbidden`] when its student left the roster.
    pub fn profile(&self, bearer: Option<&str>) -> ApiResult<ProfileResponse> {
        let mut store = self.open_store()?;
        let subject = self.authorize(&mut store, bearer, OffsetDateTime::now_utc())?;
        let student = store
            .get_student(&subject)?
            .ok_or_else(|| ApiError::Forbidden("Student is no longer on the roster".to_string()))?;
        Ok(ProfileResponse { student: profile_of(&student) })
    }

    /// Certificates recorded for `student_id`, oldest first.
    ///
    /// # Errors
    /// Returns [`ApiError::NotFound`] when nothing is recorded, plus the
    /// authorization errors of [`Self::profile`].
    pub fn progress(&self, bearer: Option<&str>, student_id: &str) -> ApiResult<ProgressResponse> {
        let student_id = student_id.trim();
        if student_id.is_empty() {
            return Err(ApiError::BadRequest("Invalid student id".to_string()));
        }
        let mut store = self.open_store()?;
        let now = OffsetDateTime::now_utc();
        self.authorize_for(&mut store, bearer, student_id, now)?;

        let records: Vec<ServerCertificate> =
            store.list_belt_progress(student_id)?.into_iter().map(server_certificate).collect();
        if records.is_empty() {
            return Err(ApiError::NotFound("Not found".to_string()));
        }
        Ok(ProgressResponse { records, generated_at: Some(rfc3339(now)?) })
    }

    /// Upsert a certificate record for the authenticated student.
    ///
    /// # Errors
    /// Returns [`ApiError::BadRequest`] for missing fields,
    /// plus the authorization errors of [`Self::profile`].
    pub fn record_progress(
        &self,
        bearer: Option<&str>,
        request: &RecordProgressRequest,
    ) -> ApiResult<RecordProgressResponse> {
        let student_id = request.student_id.trim();
        let belt_slug = request.belt_slug.trim().to_lowercase();
        if student_id.is_empty() || belt_slug.is_empty() {
            return Err(ApiError::BadRequest("studentId and beltSlug are required".to_string()));
        }

        let mut store = self.open_store()?;
        let now = OffsetDateTime::now_utc();
        self.authorize_for(&mut store, bearer, student_id, now)?;

        let uploaded_at = request
            .uploaded_at
            .as_deref()
            .map(str::trim)
            .and_then(|raw| OffsetDateTime::parse(raw, &Rfc3339).ok())
            .unwrap_or(now);
        let file_name = request.file_name.as_deref().map(str::trim).filter(|value| !value.is_empty());
        let row = store.upsert_belt_progress(student_id, &belt_slug, file_name, uploaded_at)?;
        tracing::info!(student_id, belt_slug = %row.belt_slug, "belt progress recorded");

        Ok(RecordProgressResponse { ok: true, belt_slug: row.belt_slug, uploaded_at: row.uploaded_at })
    }

    /// Store a belt test application for the authenticated student.
    ///
    /// # Errors
    /// Returns [`ApiError::BadRequest`] for an incomplete application, plus
    /// the authorization errors of [`Self::profile`].
    pub fn submit_test_application(
        &self,
        bearer: Option<&str>,
        application: &BeltTestApplication,
    ) -> ApiResult<TestApplicationResponse> {
        application.validate()?;
        let mut store = self.open_store()?;
        let now = OffsetDateTime::now_utc();
        let student_id = application.student_id.trim();
        self.authorize_for(&mut store, bearer, student_id, now)?;

        let row = TestApplicationRow {
            application_id: Ulid::new().to_string(),
            student_id: student_id.to_string(),
            desired_belt: application.desired_belt.trim().to_string(),
            current_belt: application.current_belt.trim().to_string(),
            preferred_test_date: application.preferred_test_date.trim().to_string(),
            message: application.message.clone().filter(|message| !message.trim().is_empty()),
            submitted_at: now_string()?,
        };
        store.insert_test_application(&row)?;
        store.insert_login_event(student_id, "test-application", "student", now)?;
        tracing::info!(student_id, desired_belt = %row.desired_belt, "belt test application submitted");

        Ok(TestApplicationResponse { ok: true, application_id: row.application_id, submitted_at: row.submitted_at })
    }

    /// Recent events and per-student totals for the admin dashboard.
    ///
    /// # Errors
    /// Returns [`ApiError::Unauthorized`] when an admin key is configured and
    /// `provided_keys` does not contain it.
    pub fn admin_activity(&self, provided_keys: &[Option<&str>], limit: Option<i64>) -> ApiResult<AdminActivity> {
        if let Some(expected) = &self.admin_key {
            if !provided_keys.iter().flatten().any(|key| *key == expected.as_str()) {
                tracing::warn!("admin activity request rejected");
                return Err(ApiError::Unauthorized("Unauthorized".to_string()));
            }
        }

        let store = self.open_store()?;
        let events = store.list_login_events(clamp_activity_limit(limit))?;
        let summary = store.activity_summary()?;
        Ok(AdminActivity {
            events: events.into_iter().map(ActivityEvent::from).collect(),
            summary: summary.into_iter().map(ActivitySummary::from).collect(),
            generated_at: now_string()?,
        })
    }

    fn authorize(&self, store: &mut SqliteStore, bearer: Option<&str>, now: OffsetDateTime) -> ApiResult<String> {
        let token = bearer.map(str::trim).filter(|token| !token.is_empty()).ok_or_else(|| {
            ApiError::Unauthorized("Missing bearer token".to_string())
        })?;
        let hash = token_hash(token);
        let Some(session) = store.find_session(&hash)? else {
            return Err(ApiError::Unauthorized("Invalid or expired session".to_string()));
        };
        if session.expires_at <= now {
            store.delete_session(&hash)?;
            tracing::info!(student_id = %session.student_id, "expired session rejected");
            return Err(ApiError::Unauthorized("Invalid or expired session".to_string()));
        }
        Ok(session.student_id)
    }

    fn authorize_for(
        &self,
        store: &mut SqliteStore,
        bearer: Option<&str>,
        student_id: &str,
        now: OffsetDateTime,
    ) -> ApiResult<()> {
        let subject = self.authorize(store, bearer, now)?;
        if subject != student_id {
            tracing::warn!(student_id, %subject, "token subject mismatch");
            return Err(ApiError::Forbidden("Token does not match student".to_string()));
        }
        Ok(())
    }
}

fn server_certificate(row: dojo_portal_store_sqlite::BeltProgressRow) -> ServerCertificate {
    ServerCertificate {
        belt_slug: row.belt_slug,
        file_name: row.file_name.unwrap_or_default(),
        uploaded_at: row.uploaded_at,
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("dojo-portal-api-{}.sqlite3", Ulid::new()))
    }

    fn seeded_api(db_path: &Path) -> Result<PortalApi> {
        let api = PortalApi::new(db_path.to_path_buf()).with_admin_key(Some("sensei".to_string()));
        api.import_roster(&[
            RosterEntry {
                id: "ARA001".to_string(),
                name: "Jamie Park".to_string(),
                birth_date: "2012-04-09".to_string(),
                phone: None,
                current_belt: Some("Yellow Belt".to_string()),
            },
            RosterEntry {
                id: "ARA002".to_string(),
                name: "Riley Chen".to_string(),
                birth_date: "2011-01-15".to_string(),
                phone: Some(" 555-0100 ".to_string()),
                current_belt: Some("Blue Belt".to_string()),
            },
        ])
        .map_err(|err| anyhow::anyhow!("{err}"))?;
        Ok(api)
    }

    fn login(api: &PortalApi, student_id: &str, birth_date: &str) -> ApiResult<LoginResponse> {
        let request = LoginEventRequest {
            student_id: student_id.to_string(),
            birth_date: Some(birth_date.to_string()),
            action: Some("login".to_string()),
            actor: Some("student".to_string()),
        };
        match api.login_event(&request, None)? {
            LoginEventOutcome::Login(response) => Ok(response),
            LoginEventOutcome::Activity(_) => panic!("login produced an activity response"),
        }
    }

    // Test IDs: TAPI-001
    #[test]
    fn login_issues_token_and_profile_resolves() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = seeded_api(&db_path)?;

        let response = login(&api, "ARA001", "2012-04-09").map_err(|err| anyhow::anyhow!("{err}"))?;
        assert_eq!(response.student.current_belt, "Yellow Belt");
        assert!(response.progress.records.is_empty());
        assert_eq!(response.token.len(), 64);

        let profile = api.profile(Some(&response.token)).map_err(|err| anyhow::anyhow!("{err}"))?;
        assert_eq!(profile.student.name, "Jamie Park");

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    // Test IDs: TAPI-002
    #[test]
    fn bad_credentials_are_unauthorized() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = seeded_api(&db_path)?;

        assert!(matches!(login(&api, "ARA001", "1999-01-01"), Err(ApiError::Unauthorized(_))));
        assert!(matches!(login(&api, "ARA404", "2012-04-09"), Err(ApiError::Unauthorized(_))));
        assert!(matches!(login(&api, "", "2012-04-09"), Err(ApiError::BadRequest(_))));
        assert!(matches!(api.profile(None), Err(ApiError::Unauthorized(_))));
        assert!(matches!(api.profile(Some("not-a-token")), Err(ApiError::Unauthorized(_))));

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    // Test IDs: TAPI-003
    #[test]
    fn progress_round_trip_and_subject_checks() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = seeded_api(&db_path)?;
        let session = login(&api, "ARA001", "2012-04-09").map_err(|err| anyhow::anyhow!("{err}"))?;
        let token = Some(session.token.as_str());

        assert!(matches!(api.progress(token, "ARA001"), Err(ApiError::NotFound(_))));

        let written = api
            .record_progress(
                token,
                &RecordProgressRequest {
                    student_id: "ARA001".to_string(),
                    belt_slug: "High-Yellow".to_string(),
                    file_name: Some("hy.jpg".to_string()),
                    uploaded_at: Some("garbage".to_string()),
                },
            )
            .map_err(|err| anyhow::anyhow!("{err}"))?;
        assert_eq!(written.belt_slug, "high-yellow");

        let progress = api.progress(token, "ARA001").map_err(|err| anyhow::anyhow!("{err}"))?;
        assert_eq!(progress.records.len(), 1);
        assert_eq!(progress.records[0].file_name, "hy.jpg");

        let foreign = api.record_progress(
            token,
            &RecordProgressRequest {
                student_id: "ARA002".to_string(),
                belt_slug: "red".to_string(),
                file_name: None,
                uploaded_at: None,
            },
        );
        assert!(matches!(foreign, Err(ApiError::Forbidden(_))));
        assert!(matches!(api.progress(token, "ARA002"), Err(ApiError::Forbidden(_))));

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    // Test IDs: TAPI-004
    #[test]
    fn activity_events_require_matching_token_and_logout_revokes() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = seeded_api(&db_path)?;
        let session = login(&api, "ARA001", "2012-04-09").map_err(|err| anyhow::anyhow!("{err}"))?;

        let certificate_event = LoginEventRequest {
            student_id: "ARA001".to_string(),
            birth_date: None,
            action: Some("certificate:high-yellow".to_string()),
            actor: None,
        };
        assert!(matches!(api.login_event(&certificate_event, None), Err(ApiError::Unauthorized(_))));
        let recorded = api
            .login_event(&certificate_event, Some(&session.token))
            .map_err(|err| anyhow::anyhow!("{err}"))?;
        assert!(matches!(recorded, LoginEventOutcome::Activity(ActivityRecorded { ok: true, .. })));

        let logout = LoginEventRequest { action: Some("logout".to_string()), ..certificate_event };
        assert!(api.login_event(&logout, Some(&session.token)).is_ok());
        assert!(matches!(api.profile(Some(&session.token)), Err(ApiError::Unauthorized(_))));

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    // Test IDs: TAPI-005
    #[test]
    fn admin_activity_requires_key_and_clamps_limit() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = seeded_api(&db_path)?;
        login(&api, "ARA001", "2012-04-09").map_err(|err| anyhow::anyhow!("{err}"))?;
        login(&api, "ARA002", "2011-01-15").map_err(|err| anyhow::anyhow!("{err}"))?;

        assert!(matches!(api.admin_activity(&[None, Some("wrong")], None), Err(ApiError::Unauthorized(_))));
        let activity = api
            .admin_activity(&[None, Some("sensei")], Some(1))
            .map_err(|err| anyhow::anyhow!("{err}"))?;
        assert_eq!(activity.events.len(), 1);
        assert_eq!(activity.summary.len(), 2);

        assert_eq!(clamp_activity_limit(None), 200);
        assert_eq!(clamp_activity_limit(Some(0)), 1);
        assert_eq!(clamp_activity_limit(Some(50_000)), 1000);

        let open = PortalApi::new(db_path.clone());
        assert!(open.admin_activity(&[], None).is_ok());

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    // Test IDs: TAPI-006
    #[test]
    fn test_application_is_validated_and_stored() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = seeded_api(&db_path)?;
        let session = login(&api, "ARA001", "2012-04-09").map_err(|err| anyhow::anyhow!("{err}"))?;

        let mut application = BeltTestApplication {
            student_name: "Jamie Park".to_string(),
            student_id: "ARA001".to_string(),
            current_belt: "Yellow Belt".to_string(),
            desired_belt: "High Yellow Belt".to_string(),
            preferred_test_date: "2026-11-14".to_string(),
            message: Some("Ready for the November test".to_string()),
        };
        let stored = api
            .submit_test_application(Some(&session.token), &application)
            .map_err(|err| anyhow::anyhow!("{err}"))?;
        assert!(stored.ok);

        application.preferred_test_date = String::new();
        assert!(matches!(
            api.submit_test_application(Some(&session.token), &application),
            Err(ApiError::BadRequest(_))
        ));

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    #[test]
    fn roster_import_rejects_incomplete_entries() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = PortalApi::new(db_path.clone());
        let result = api.import_roster(&[RosterEntry {
            id: "ARA009".to_string(),
            name: String::new(),
            birth_date: "2010-02-02".to_string(),
            phone: None,
            current_belt: None,
        }]);
        assert!(matches!(result, Err(ApiError::BadRequest(_))));

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }
}
