//! Student-side portal: the owned ledger state, the certificate upload and
//! unlock protocol, readiness tracking and synchronization with the studio API.

pub mod ocr;
pub mod portal;
pub mod remote;
pub mod state;
pub mod view;

pub use ocr::CommandOcr;
pub use portal::{
    ClientError, LoginOutcome, Portal, ReadinessReport, StatusMessage, StatusTone, UploadOutcome, UploadStage,
    SAVED_LOCALLY_MESSAGE, SESSION_EXPIRED_MESSAGE, SIGNED_OUT_MESSAGE, SYNC_FAILURE_MESSAGE, SYNC_SUCCESS_MESSAGE,
    TEST_REQUEST_SUBMITTED_MESSAGE,
};
pub use remote::{HttpRemote, OfflineRemote, PortalRemote, RemoteError, RemoteSession};
pub use state::{PortalState, Session};
pub use view::{
    render_portal, BeltBadge, BeltCard, CertificateLogEntry, CertificateSummary, PortalView, EMPTY_LOG_HINT,
    FINAL_BELT_LABEL,
};
