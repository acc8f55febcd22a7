//! Belt progression domain for the studio portal: the rank catalog, progress
//! ledger math, certificate records, readiness gating, upload validation and
//! the server reconciliation merge.

pub mod catalog;
pub mod certificate;
pub mod error;
pub mod persist;
pub mod progress;
pub mod readiness;
pub mod reconcile;
pub mod test_request;
pub mod upload;

pub use catalog::{BeltCatalog, BeltRank, NameMatch};
pub use certificate::{
    certificate_blob_key, decode_data_url, CertificateIndex, CertificateRecord, CertificateSource,
    StoredFile,
};
pub use error::PortalError;
pub use persist::{
    load_json, save_json, BlobStore, KeyValueStore, MemoryBlobStore, MemoryKeyValueStore,
    UnavailableBlobStore, CERTIFICATES_KEY, PROGRESS_KEY, READINESS_KEY, SESSION_KEY,
};
pub use progress::{compute_awarded_index, unlock_target, ProgressRecord, Student};
pub use readiness::{
    attendance_percent, compute_readiness_state, AttendancePenalty, ReadinessEntry, ReadinessPolicy,
    ReadinessState, ReadinessThreshold, ReadinessTracker, Stripe, Stripes, DEFAULT_THRESHOLD,
};
pub use reconcile::{reconcile, ReconcileOutcome, ServerCertificate, SERVER_FILE_NAME_FALLBACK};
pub use test_request::{BeltTestApplication, TestRequestFlow, TestRequestState};
pub use upload::{
    keyword_matches, mime_from_extension, validate_certificate, CertificateFile, NoTextRecognition,
    TextRecognizer, UploadRejection, MAX_CERTIFICATE_BYTES, VERIFICATION_KEYWORDS,
};
