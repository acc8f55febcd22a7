use std::collections::BTreeMap;

use dojo_portal_api::RecordProgressRequest;
use dojo_portal_core::{
    certificate_blob_key, compute_readiness_state, reconcile, save_json, validate_certificate, AttendancePenalty,
    BeltCatalog, BeltRank, BeltTestApplication, BlobStore, CertificateFile, CertificateIndex, CertificateRecord,
    KeyValueStore, PortalError, ProgressRecord, ReadinessEntry, ReadinessPolicy, ReadinessState,
    ServerCertificate, StoredFile, Student, TestRequestFlow, TestRequestState, TextRecognizer, UploadRejection,
    CERTIFICATES_KEY, PROGRESS_KEY,
};
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::remote::{PortalRemote, RemoteError};
use crate::state::{PortalState, Session};
use crate::view::{render_portal, PortalView};

pub const SYNC_SUCCESS_MESSAGE: &str = "Progress synced with the studio.";
pub const SYNC_FAILURE_MESSAGE: &str = "Could not sync progress right now.";
pub const SESSION_EXPIRED_MESSAGE: &str = "Your session expired. Please sign in again.";
pub const SAVED_LOCALLY_MESSAGE: &str = "Certificate saved locally. It will sync with the studio when you're back online.";
pub const SIGNED_OUT_MESSAGE: &str = "You have signed out. Come back soon!";
pub const TEST_REQUEST_SUBMITTED_MESSAGE: &str =
    "Belt test application submitted successfully! Master Ara will review it shortly.";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Portal(#[from] PortalError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("Please sign in first.")]
    NotSignedIn,
    #[error("Enter both your Student ID and birthdate.")]
    MissingCredentials,
    #[error("Invalid student ID or birth date")]
    InvalidCredentials,
    #[error("{belt} is still locked. Finish {unlocked} first.")]
    BeltLocked { belt: String, unlocked: String },
}

impl From<UploadRejection> for ClientError {
    fn from(rejection: UploadRejection) -> Self {
        Self::Portal(PortalError::Upload(rejection))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StatusTone {
    Success,
    Error,
    Info,
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct StatusMessage {
    pub text: String,
    pub tone: StatusTone,
}

impl StatusMessage {
    #[must_use]
    pub fn success(text: impl Into<String>) -> Self {
        Self { text: text.into(), tone: StatusTone::Success }
    }

    #[must_use]
    pub fn error(text: impl Into<String>) -> Self {
        Self { text: text.into(), tone: StatusTone::Error }
    }

    #[must_use]
    pub fn info(text: impl Into<String>) -> Self {
        Self { text: text.into(), tone: StatusTone::Info }
    }
}

/// Stages of a single certificate upload attempt.
#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum UploadStage {
    Validating,
    Persisting,
    LocalCommit,
    RemoteSyncPending,
    Reconciled,
    Orphaned,
}

impl UploadStage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::Persisting => "persisting",
            Self::LocalCommit => "local_commit",
            Self::RemoteSyncPending => "remote_sync_pending",
            Self::Reconciled => "reconciled",
            Self::Orphaned => "orphaned",
        }
    }
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadOutcome {
    pub belt: String,
    pub belt_slug: String,
    pub stage: UploadStage,
    pub status: StatusMessage,
    pub notice: Option<StatusMessage>,
    pub progress: ProgressRecord,
    pub stored_in_blob_store: bool,
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoginOutcome {
    pub student: Student,
    pub status: StatusMessage,
    pub sync: Option<StatusMessage>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessReport {
    pub target_belt: String,
    pub state: ReadinessState,
    pub entry: ReadinessEntry,
    pub test_request: TestRequestState,
}

/// The student portal: owned ledger state plus the collaborators it persists
/// to and syncs with.
pub struct Portal {
    catalog: BeltCatalog,
    policy: ReadinessPolicy,
    store: Box<dyn KeyValueStore>,
    blobs: Option<Box<dyn BlobStore>>,
    recognizer: Box<dyn TextRecognizer>,
    remote: Box<dyn PortalRemote>,
    penalties: BTreeMap<String, AttendancePenalty>,
    test_request: TestRequestFlow,
    state: PortalState,
}

fn success_message(catalog: &BeltCatalog, rank: &BeltRank) -> String {
    match catalog.next_after(rank.ordinal) {
        Some(next) => format!("{} awarded! {} is now unlocked—let's go!", rank.name, next.name),
        None => format!("{} awarded! You've reached the highest rank—outstanding work!", rank.name),
    }
}

fn file_storage_key(record: Option<&CertificateRecord>) -> Option<String> {
    record.and_then(|record| record.file.as_ref()).and_then(StoredFile::storage_key).map(str::to_string)
}

fn first_name(name: &str) -> &str {
    name.split_whitespace().next().unwrap_or(name)
}

impl Portal {
    /// # Errors
    /// Returns [`PortalError::Storage`] when persisted state cannot be loaded.
    pub fn open(
        store: Box<dyn KeyValueStore>,
        blobs: Option<Box<dyn BlobStore>>,
        recognizer: Box<dyn TextRecognizer>,
        remote: Box<dyn PortalRemote>,
    ) -> Result<Self, PortalError> {
        let state = PortalState::load(store.as_ref())?;
        Ok(Self {
            catalog: BeltCatalog::standard(),
            policy: ReadinessPolicy::standard(),
            store,
            blobs,
            recognizer,
            remote,
            penalties: BTreeMap::new(),
            test_request: TestRequestFlow::new(),
            state,
        })
    }

    #[must_use]
    pub fn with_policy(mut self, policy: ReadinessPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn state(&self) -> &PortalState {
        &self.state
    }

    #[must_use]
    pub fn catalog(&self) -> &BeltCatalog {
        &self.catalog
    }

    #[must_use]
    pub fn test_request_state(&self) -> TestRequestState {
        self.test_request.state()
    }

    fn active_student(&self) -> Result<Student, ClientError> {
        self.state.active_student().cloned().ok_or(ClientError::NotSignedIn)
    }

    fn online_token(&self) -> Option<String> {
        if self.remote.is_available() {
            self.state.token().map(str::to_string)
        } else {
            None
        }
    }

    /// Derive or clamp the student's ledger entry, persisting any change.
    fn ensure_progress(&mut self, student: &Student) -> Result<ProgressRecord, ClientError> {
        let base = student.base_index(&self.catalog);
        let stored = self.state.progress.get(&student.id).copied();
        let (record, changed) = ProgressRecord::ensure_unlocked(&self.catalog, base, stored);
        if changed {
            self.state.progress.insert(student.id.clone(), record);
            self.state.flush_progress(self.store.as_mut())?;
        }
        Ok(record)
    }

    fn teardown_session(&mut self) -> Result<(), ClientError> {
        if let Some(session) = self.state.session.take() {
            tracing::warn!(student_id = %session.student.id, "session rejected; signing out");
        }
        self.test_request = TestRequestFlow::new();
        self.state.flush_session(self.store.as_mut())?;
        Ok(())
    }

    /// Persist a student's certificate index and progress record, then adopt
    /// them. In-memory state only changes once both writes succeeded.
    fn commit_ledger(
        &mut self,
        student_id: &str,
        certificates: CertificateIndex,
        progress: ProgressRecord,
    ) -> Result<(), PortalError> {
        let mut staged_certificates = self.state.certificates.clone();
        staged_certificates.insert(student_id.to_string(), certificates);
        let mut staged_progress = self.state.progress.clone();
        staged_progress.insert(student_id.to_string(), progress);

        save_json(self.store.as_mut(), CERTIFICATES_KEY, &staged_certificates)?;
        if let Err(err) = save_json(self.store.as_mut(), PROGRESS_KEY, &staged_progress) {
            if let Err(rollback) = self.state.flush_certificates(self.store.as_mut()) {
                tracing::warn!(error = %rollback, "could not restore persisted certificates");
            }
            return Err(err);
        }
        self.state.certificates = staged_certificates;
        self.state.progress = staged_progress;
        Ok(())
    }

    fn release_blob(&mut self, key: &str) {
        if let Some(blobs) = self.blobs.as_deref_mut() {
            if let Err(err) = blobs.remove_blob(key) {
                tracing::warn!(error = %err, storage_key = %key, "could not release certificate blob");
            }
        }
    }

    /// Sign in, persist the session and fold in the server's records.
    ///
    /// # Errors
    /// Returns [`ClientError::InvalidCredentials`] for unknown credentials,
    /// or a remote/storage error.
    pub fn login(&mut self, student_id: &str, birth_date: &str) -> Result<LoginOutcome, ClientError> {
        let student_id = student_id.trim();
        let birth_date = birth_date.trim();
        if student_id.is_empty() || birth_date.is_empty() {
            return Err(ClientError::MissingCredentials);
        }

        let remote_session = match self.remote.login(student_id, birth_date) {
            Ok(session) => session,
            Err(err) if err.is_auth() => return Err(ClientError::InvalidCredentials),
            Err(err) => return Err(err.into()),
        };
        let student = remote_session.student.clone();
        self.state.session = Some(Session {
            student: student.clone(),
            token: remote_session.token,
            expires_at: remote_session.expires_at,
        });
        self.test_request = TestRequestFlow::new();
        self.state.flush_session(self.store.as_mut())?;
        self.ensure_progress(&student)?;
        tracing::info!(student_id = %student.id, online = self.remote.is_available(), "student signed in");

        // The login snapshot predates any push, so it is folded in while
        // offline uploads are still flagged pending.
        let sync = if self.remote.is_available() {
            let notify = self.apply_server_records(&student, &remote_session.records, false)?;
            self.push_pending()?;
            notify.then(|| StatusMessage::success(SYNC_SUCCESS_MESSAGE))
        } else {
            None
        };

        Ok(LoginOutcome {
            status: StatusMessage::success(format!("Welcome back, {}!", first_name(&student.name))),
            student,
            sync,
        })
    }

    /// Resume a persisted session: confirm it with the API and run a silent sync.
    /// Returns `None` when there is no session or the API rejected it.
    ///
    /// # Errors
    /// Returns a storage error when local state cannot be written.
    pub fn restore_session(&mut self) -> Result<Option<Student>, ClientError> {
        let Some(session) = self.state.session.clone() else {
            return Ok(None);
        };
        let Some(token) = self.online_token() else {
            self.ensure_progress(&session.student)?;
            return Ok(Some(session.student));
        };

        match self.remote.profile(&token) {
            Ok(student) => {
                if student != session.student {
                    self.state.session = Some(Session { student: student.clone(), ..session });
                    self.state.flush_session(self.store.as_mut())?;
                }
                self.ensure_progress(&student)?;
                self.sync_progress(true)?;
                Ok(self.state.active_student().cloned())
            }
            Err(err) if err.is_auth() => {
                self.teardown_session()?;
                Ok(None)
            }
            Err(err) => {
                tracing::warn!(error = %err, "could not confirm session; continuing offline");
                self.ensure_progress(&session.student)?;
                Ok(Some(session.student))
            }
        }
    }

    /// Clear the session pointer. Ledger and certificates are kept.
    ///
    /// # Errors
    /// Returns a storage error when the session cannot be cleared.
    pub fn logout(&mut self) -> Result<StatusMessage, ClientError> {
        if let (Some(token), Some(student)) = (self.online_token(), self.state.active_student().cloned()) {
            if let Err(err) = self.remote.record_activity(&token, &student.id, "logout") {
                tracing::debug!(error = %err, "logout event not recorded");
            }
        }
        self.state.session = None;
        self.test_request = TestRequestFlow::new();
        self.state.flush_session(self.store.as_mut())?;
        Ok(StatusMessage::success(SIGNED_OUT_MESSAGE))
    }

    /// Push pending uploads, then pull and reconcile the server's records.
    /// Returns the status line to show, if any.
    ///
    /// # Errors
    /// Returns [`ClientError::NotSignedIn`] without a session, or a storage error.
    pub fn sync_progress(&mut self, silent: bool) -> Result<Option<StatusMessage>, ClientError> {
        let student = self.active_student()?;
        let Some(token) = self.online_token() else {
            return Ok(None);
        };
        if !self.push_pending()? {
            return Ok(Some(StatusMessage::error(SESSION_EXPIRED_MESSAGE)));
        }

        match self.remote.fetch_progress(&token, &student.id) {
            Ok(records) => {
                let notify = self.apply_server_records(&student, &records, silent)?;
                Ok(notify.then(|| StatusMessage::success(SYNC_SUCCESS_MESSAGE)))
            }
            Err(err) if err.is_auth() => {
                self.teardown_session()?;
                Ok(Some(StatusMessage::error(SESSION_EXPIRED_MESSAGE)))
            }
            Err(err) => {
                tracing::warn!(error = %err, student_id = %student.id, "progress sync failed");
                Ok((!silent).then(|| StatusMessage::error(SYNC_FAILURE_MESSAGE)))
            }
        }
    }

    /// Merge server records into the ledger and certificate store.
    /// Returns whether a success notice should be shown.
    fn apply_server_records(
        &mut self,
        student: &Student,
        records: &[ServerCertificate],
        silent: bool,
    ) -> Result<bool, ClientError> {
        let base = student.base_index(&self.catalog);
        let stored = self.state.progress.get(&student.id).copied();
        let local = self.state.certificates.get(&student.id).cloned().unwrap_or_default();
        let outcome = reconcile(&self.catalog, base, stored, &local, records, silent, OffsetDateTime::now_utc());

        for slug in &outcome.skipped_slugs {
            tracing::warn!(student_id = %student.id, belt_slug = %slug, "skipping server record for unknown belt");
        }

        self.commit_ledger(&student.id, outcome.certificates, outcome.progress)?;
        for key in &outcome.released_blobs {
            self.release_blob(key);
        }
        tracing::info!(
            student_id = %student.id,
            records = records.len(),
            unlocked_index = outcome.progress.unlocked_index,
            awarded_index = outcome.progress.awarded_index,
            "progress reconciled"
        );
        Ok(outcome.notify)
    }

    /// Send every pending certificate record to the API. Returns `false` when
    /// the session was torn down on the way.
    fn push_pending(&mut self) -> Result<bool, ClientError> {
        let (Some(token), Ok(student)) = (self.online_token(), self.active_student()) else {
            return Ok(true);
        };
        let pending: Vec<String> = self
            .state
            .certificates
            .get(&student.id)
            .map(|index| {
                index.iter().filter(|(_, record)| record.pending_sync).map(|(belt, _)| belt.clone()).collect()
            })
            .unwrap_or_default();

        for belt in pending {
            match self.push_record(&token, &student.id, &belt) {
                Ok(()) => {}
                Err(err) if err.is_auth() => {
                    self.teardown_session()?;
                    return Ok(false);
                }
                Err(err) => {
                    tracing::warn!(error = %err, belt = %belt, "pending certificate still unsynced");
                    break;
                }
            }
        }
        Ok(true)
    }

    /// POST one certificate's metadata and mark it synced on success.
    fn push_record(&mut self, token: &str, student_id: &str, belt: &str) -> Result<(), RemoteError> {
        let Some(record) = self.state.certificates.get(student_id).and_then(|index| index.get(belt)) else {
            return Ok(());
        };
        let request = RecordProgressRequest {
            student_id: student_id.to_string(),
            belt_slug: record.belt_slug.clone(),
            file_name: Some(record.file_name.clone()),
            uploaded_at: record.uploaded_at.format(&Rfc3339).ok(),
        };
        self.remote.record_progress(token, &request)?;

        if let Some(record) = self.state.certificates.get_mut(student_id).and_then(|index| index.get_mut(belt)) {
            record.mark_synced();
        }
        if let Err(err) = self.state.flush_certificates(self.store.as_mut()) {
            tracing::warn!(error = %err, "could not persist synced certificate");
        }
        Ok(())
    }

    /// Store the certificate file, preferring the blob store and falling back
    /// to an inline data URL.
    fn persist_file(&mut self, key: &str, file: &CertificateFile) -> Result<(StoredFile, bool), UploadRejection> {
        if file.bytes.is_empty() {
            return Err(UploadRejection::ProcessingFailed);
        }
        if let Some(blobs) = self.blobs.as_deref_mut() {
            match blobs.save_blob(key, &file.bytes) {
                Ok(()) => return Ok((StoredFile::Stored { storage_key: key.to_string() }, true)),
                Err(err) => tracing::warn!(error = %err, storage_key = %key, "blob store write failed; storing inline"),
            }
        }
        Ok((StoredFile::inline(&file.mime_type, &file.bytes), false))
    }

    /// Validate, store and commit a certificate for `belt_slug`, advancing the
    /// ledger, then try to sync it.
    ///
    /// # Errors
    /// Returns the upload rejection, [`ClientError::BeltLocked`] for a belt
    /// past the unlock point, or a storage error. Nothing is mutated on error.
    pub fn upload_certificate(&mut self, belt_slug: &str, file: &CertificateFile) -> Result<UploadOutcome, ClientError> {
        let student = self.active_student()?;
        let rank = self
            .catalog
            .resolve_by_slug(belt_slug)
            .ok_or_else(|| PortalError::UnknownBelt(belt_slug.to_string()))?;
        let progress = self.ensure_progress(&student)?;
        if rank.ordinal > progress.unlocked_index {
            let unlocked = self.catalog.get(progress.unlocked_index).map_or("", |next| next.name);
            return Err(ClientError::BeltLocked { belt: rank.name.to_string(), unlocked: unlocked.to_string() });
        }

        tracing::debug!(stage = UploadStage::Validating.as_str(), belt_slug = rank.slug, "certificate upload");
        validate_certificate(file, self.recognizer.as_ref())?;

        tracing::debug!(stage = UploadStage::Persisting.as_str(), belt_slug = rank.slug, "certificate upload");
        let blob_key = certificate_blob_key(&student.id, rank.slug);
        let (stored_file, in_blob_store) = self.persist_file(&blob_key, file)?;

        tracing::debug!(stage = UploadStage::LocalCommit.as_str(), belt_slug = rank.slug, "certificate upload");
        let incoming = CertificateRecord::local_upload(
            rank.name,
            rank.slug,
            OffsetDateTime::now_utc(),
            &file.file_name,
            &file.mime_type,
            file.size(),
            Some(stored_file),
        );
        let mut index = self.state.certificates.get(&student.id).cloned().unwrap_or_default();
        let previous_key = file_storage_key(index.get(rank.name));
        let merged = CertificateRecord::merge_upload(index.get(rank.name), incoming);
        let merged_key = file_storage_key(Some(&merged));
        index.insert(rank.name.to_string(), merged);
        let base = student.base_index(&self.catalog);
        let advanced = progress.advance_to(&self.catalog, base, rank.ordinal + 1);
        if let Err(err) = self.commit_ledger(&student.id, index, advanced) {
            // A blob under a key the persisted record already points at was
            // overwritten in place and stays.
            if in_blob_store && previous_key.as_deref() != Some(blob_key.as_str()) {
                self.release_blob(&blob_key);
            }
            return Err(err.into());
        }
        if let Some(key) = previous_key.filter(|key| merged_key.as_deref() != Some(key.as_str())) {
            self.release_blob(&key);
        }
        let status = StatusMessage::success(success_message(&self.catalog, rank));
        tracing::info!(
            student_id = %student.id,
            belt_slug = rank.slug,
            unlocked_index = advanced.unlocked_index,
            "certificate committed locally"
        );

        let Some(token) = self.online_token() else {
            return Ok(UploadOutcome {
                belt: rank.name.to_string(),
                belt_slug: rank.slug.to_string(),
                stage: UploadStage::Orphaned,
                status,
                notice: Some(StatusMessage::info(SAVED_LOCALLY_MESSAGE)),
                progress: advanced,
                stored_in_blob_store: in_blob_store,
            });
        };

        if let Err(err) = self.remote.record_activity(&token, &student.id, &format!("certificate:{}", rank.slug)) {
            tracing::debug!(error = %err, "certificate activity event not recorded");
        }

        tracing::debug!(stage = UploadStage::RemoteSyncPending.as_str(), belt_slug = rank.slug, "certificate upload");
        let (stage, notice) = match self.push_record(&token, &student.id, rank.name) {
            Ok(()) => (UploadStage::Reconciled, None),
            Err(err) if err.is_auth() => {
                self.teardown_session()?;
                (UploadStage::Orphaned, Some(StatusMessage::error(SESSION_EXPIRED_MESSAGE)))
            }
            Err(err) => {
                tracing::warn!(error = %err, belt_slug = rank.slug, "certificate metadata not synced");
                (UploadStage::Orphaned, Some(StatusMessage::info(SAVED_LOCALLY_MESSAGE)))
            }
        };

        if self.state.session.is_some() {
            self.sync_progress(true)?;
        }
        let progress = self.state.progress.get(&student.id).copied().unwrap_or(advanced);

        Ok(UploadOutcome {
            belt: rank.name.to_string(),
            belt_slug: rank.slug.to_string(),
            stage,
            status,
            notice,
            progress,
            stored_in_blob_store: in_blob_store,
        })
    }

    /// The certificate file for `belt_slug`, as `(file name, bytes)`.
    ///
    /// # Errors
    /// Returns a validation error when no file is stored, or a storage error
    /// when the stored bytes cannot be loaded.
    pub fn download_certificate(&self, belt_slug: &str) -> Result<(String, Vec<u8>), ClientError> {
        let student = self.active_student()?;
        let record = self
            .state
            .certificates
            .get(&student.id)
            .and_then(|index| index.values().find(|record| record.belt_slug == belt_slug))
            .ok_or_else(|| PortalError::Validation(format!("no certificate recorded for {belt_slug}")))?;
        let file = record
            .file
            .as_ref()
            .ok_or_else(|| PortalError::Validation(format!("no certificate file stored for {}", record.belt)))?;
        let bytes = file.resolve(self.blobs.as_deref())?;
        Ok((record.file_name.clone(), bytes))
    }

    #[must_use]
    pub fn view(&self) -> Option<PortalView> {
        let student = self.state.active_student()?;
        let base = student.base_index(&self.catalog);
        let stored = self.state.progress.get(&student.id).copied();
        let (progress, _) = ProgressRecord::ensure_unlocked(&self.catalog, base, stored);
        let certificates = self.state.certificates.get(&student.id).cloned().unwrap_or_default();
        Some(render_portal(&self.catalog, student, progress, &certificates))
    }

    /// Record or clear the kiosk attendance veto for the active student.
    ///
    /// # Errors
    /// Returns [`ClientError::NotSignedIn`] without a session.
    pub fn set_attendance_penalty(&mut self, penalty: Option<AttendancePenalty>) -> Result<(), ClientError> {
        let student = self.active_student()?;
        match penalty {
            Some(penalty) => self.penalties.insert(student.id, penalty),
            None => self.penalties.remove(&student.id),
        };
        Ok(())
    }

    fn target_rank(&mut self, student: &Student, belt_slug: Option<&str>) -> Result<&'static BeltRank, ClientError> {
        if let Some(slug) = belt_slug {
            return self
                .catalog
                .resolve_by_slug(slug)
                .ok_or_else(|| ClientError::from(PortalError::UnknownBelt(slug.to_string())));
        }
        let progress = self.ensure_progress(student)?;
        self.catalog
            .get(progress.unlocked_index)
            .ok_or_else(|| ClientError::from(PortalError::UnknownBelt(progress.unlocked_index.to_string())))
    }

    /// Evaluate readiness toward `belt_slug` (default: the unlocked belt) and
    /// advance the test-request flow accordingly.
    ///
    /// # Errors
    /// Returns [`ClientError::NotSignedIn`] or an unknown-belt error.
    pub fn readiness(&mut self, belt_slug: Option<&str>) -> Result<ReadinessReport, ClientError> {
        let student = self.active_student()?;
        let rank = self.target_rank(&student, belt_slug)?;
        let entry = self.state.readiness.get(&student.id).map(|tracker| tracker.entry(rank.slug)).unwrap_or_default();
        let state = compute_readiness_state(&self.policy, rank, &entry, self.penalties.get(&student.id));
        let test_request = self.test_request.observe(&state);
        Ok(ReadinessReport { target_belt: rank.name.to_string(), state, entry, test_request })
    }

    /// Overwrite the readiness entry for `belt_slug`.
    ///
    /// # Errors
    /// Returns [`ClientError::NotSignedIn`], an unknown-belt error, or a storage error.
    pub fn save_readiness(&mut self, belt_slug: &str, entry: ReadinessEntry) -> Result<ReadinessReport, ClientError> {
        let student = self.active_student()?;
        let rank = self.target_rank(&student, Some(belt_slug))?;
        self.state.readiness.entry(student.id.clone()).or_default().save(rank.slug, entry, OffsetDateTime::now_utc());
        self.state.flush_readiness(self.store.as_mut())?;
        self.readiness(Some(rank.slug))
    }

    /// Open the belt test form, pre-filled for the unlocked belt.
    ///
    /// # Errors
    /// Returns [`PortalError::InvalidTransition`] unless readiness is met.
    pub fn open_test_form(&mut self) -> Result<BeltTestApplication, ClientError> {
        let student = self.active_student()?;
        self.readiness(None)?;
        self.test_request.open_form()?;
        let progress = self.ensure_progress(&student)?;
        let current_belt = self
            .catalog
            .get(progress.awarded_index)
            .map_or_else(|| student.current_belt.clone(), |rank| rank.name.to_string());
        let desired_belt = self.catalog.get(progress.unlocked_index).map(|rank| rank.name.to_string()).unwrap_or_default();
        Ok(BeltTestApplication {
            student_name: student.name,
            student_id: student.id,
            current_belt,
            desired_belt,
            preferred_test_date: String::new(),
            message: None,
        })
    }

    /// Re-check readiness and submit the open form to the studio.
    ///
    /// # Errors
    /// Returns [`PortalError::NotReady`] (relocking the flow) when readiness
    /// regressed, a validation error for an incomplete form, or the remote failure.
    pub fn submit_test_request(&mut self, application: &BeltTestApplication) -> Result<StatusMessage, ClientError> {
        let student = self.active_student()?;
        let rank = self.target_rank(&student, None)?;
        let entry = self.state.readiness.get(&student.id).map(|tracker| tracker.entry(rank.slug)).unwrap_or_default();
        let readiness = compute_readiness_state(&self.policy, rank, &entry, self.penalties.get(&student.id));

        let mut next = self.test_request;
        if let Err(err) = next.submit(&readiness, application) {
            self.test_request = next;
            return Err(err.into());
        }

        let Some(token) = self.online_token() else {
            return Err(RemoteError::Offline.into());
        };
        match self.remote.submit_test_application(&token, application) {
            Ok(_) => {
                self.test_request = next;
                tracing::info!(student_id = %student.id, desired_belt = %application.desired_belt, "belt test requested");
                Ok(StatusMessage::success(TEST_REQUEST_SUBMITTED_MESSAGE))
            }
            Err(err) if err.is_auth() => {
                self.teardown_session()?;
                Err(err.into())
            }
            Err(err) => Err(err.into()),
        }
    }
}
