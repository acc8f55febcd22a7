use dojo_portal_api::{
    LoginEventOutcome, LoginEventRequest, ProfileResponse, ProgressResponse, RecordProgressRequest,
    RecordProgressResponse, RosterEntry, TestApplicationResponse,
};
use dojo_portal_core::{BeltTestApplication, ServerCertificate, Student};
use serde::Deserialize;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum RemoteError {
    #[error("the studio API is not configured")]
    Offline,
    #[error("session expired or invalid")]
    Unauthorized,
    #[error("session does not belong to this student")]
    Forbidden,
    #[error("studio API returned {code}: {message}")]
    Status { code: u16, message: String },
    #[error("could not reach the studio API: {0}")]
    Transport(String),
    #[error("unexpected response from the studio API: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Failures that invalidate the session rather than the request.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized | Self::Forbidden)
    }
}

/// What a successful sign-in hands back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSession {
    pub token: Option<String>,
    pub expires_at: Option<String>,
    pub student: Student,
    pub records: Vec<ServerCertificate>,
}

/// The studio API as seen from the student portal.
pub trait PortalRemote {
    /// False when no API is configured and every network step is skipped.
    fn is_available(&self) -> bool;

    /// # Errors
    /// Returns [`RemoteError::Unauthorized`] for unknown credentials.
    fn login(&self, student_id: &str, birth_date: &str) -> Result<RemoteSession, RemoteError>;

    /// # Errors
    /// Returns the transport or status failure.
    fn record_activity(&self, token: &str, student_id: &str, action: &str) -> Result<(), RemoteError>;

    /// # Errors
    /// Returns [`RemoteError::Unauthorized`] or [`RemoteError::Forbidden`] for a dead session.
    fn profile(&self, token: &str) -> Result<Student, RemoteError>;

    /// Server certificate records. A 404 is an empty list.
    ///
    /// # Errors
    /// Returns the transport or status failure.
    fn fetch_progress(&self, token: &str, student_id: &str) -> Result<Vec<ServerCertificate>, RemoteError>;

    /// # Errors
    /// Returns the transport or status failure.
    fn record_progress(
        &self,
        token: &str,
        request: &RecordProgressRequest,
    ) -> Result<RecordProgressResponse, RemoteError>;

    /// # Errors
    /// Returns the transport or status failure.
    fn submit_test_application(
        &self,
        token: &str,
        application: &BeltTestApplication,
    ) -> Result<TestApplicationResponse, RemoteError>;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: String,
}

/// Blocking HTTP client for the portal service.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpRemote {
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self { base_url: base_url.trim_end_matches('/').to_string(), agent: ureq::Agent::new() }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn bearer(token: &str) -> String {
        format!("Bearer {token}")
    }
}

fn classify(err: ureq::Error) -> RemoteError {
    match err {
        ureq::Error::Status(401, _) => RemoteError::Unauthorized,
        ureq::Error::Status(403, _) => RemoteError::Forbidden,
        ureq::Error::Status(code, response) => {
            let message = response.into_json::<ErrorBody>().map(|body| body.error).unwrap_or_default();
            RemoteError::Status { code, message }
        }
        ureq::Error::Transport(transport) => RemoteError::Transport(transport.to_string()),
    }
}

fn decode<T: serde::de::DeserializeOwned>(response: ureq::Response) -> Result<T, RemoteError> {
    response.into_json::<T>().map_err(|err| RemoteError::Decode(err.to_string()))
}

/// Percent-encode a single path segment.
fn encode_segment(segment: &str) -> String {
    let mut encoded = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            encoded.push(char::from(byte));
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}

impl PortalRemote for HttpRemote {
    fn is_available(&self) -> bool {
        true
    }

    fn login(&self, student_id: &str, birth_date: &str) -> Result<RemoteSession, RemoteError> {
        let request = LoginEventRequest {
            student_id: student_id.to_string(),
            birth_date: Some(birth_date.to_string()),
            action: Some("login".to_string()),
            actor: Some("student".to_string()),
        };
        let response = self.agent.post(&self.url("/portal/login-event")).send_json(&request).map_err(classify)?;
        match decode::<LoginEventOutcome>(response)? {
            LoginEventOutcome::Login(login) => Ok(RemoteSession {
                token: Some(login.token),
                expires_at: Some(login.expires_at),
                student: login.student,
                records: login.progress.records,
            }),
            LoginEventOutcome::Activity(_) => {
                Err(RemoteError::Decode("login returned an activity acknowledgement".to_string()))
            }
        }
    }

    fn record_activity(&self, token: &str, student_id: &str, action: &str) -> Result<(), RemoteError> {
        let request = LoginEventRequest {
            student_id: student_id.to_string(),
            birth_date: None,
            action: Some(action.to_string()),
            actor: Some("student".to_string()),
        };
        self.agent
            .post(&self.url("/portal/login-event"))
            .set("Authorization", &Self::bearer(token))
            .send_json(&request)
            .map_err(classify)?;
        Ok(())
    }

    fn profile(&self, token: &str) -> Result<Student, RemoteError> {
        let response = self
            .agent
            .get(&self.url("/portal/profile"))
            .set("Authorization", &Self::bearer(token))
            .call()
            .map_err(classify)?;
        Ok(decode::<ProfileResponse>(response)?.student)
    }

    fn fetch_progress(&self, token: &str, student_id: &str) -> Result<Vec<ServerCertificate>, RemoteError> {
        let url = self.url(&format!("/portal/progress/{}", encode_segment(student_id)));
        match self.agent.get(&url).set("Authorization", &Self::bearer(token)).call() {
            Ok(response) => Ok(decode::<ProgressResponse>(response)?.records),
            Err(ureq::Error::Status(404, _)) => Ok(Vec::new()),
            Err(err) => Err(classify(err)),
        }
    }

    fn record_progress(
        &self,
        token: &str,
        request: &RecordProgressRequest,
    ) -> Result<RecordProgressResponse, RemoteError> {
        let response = self
            .agent
            .post(&self.url("/portal/progress"))
            .set("Authorization", &Self::bearer(token))
            .send_json(request)
            .map_err(classify)?;
        decode(response)
    }

    fn submit_test_application(
        &self,
        token: &str,
        application: &BeltTestApplication,
    ) -> Result<TestApplicationResponse, RemoteError> {
        let response = self
            .agent
            .post(&self.url("/portal/test-applications"))
            .set("Authorization", &Self::bearer(token))
            .send_json(application)
            .map_err(classify)?;
        decode(response)
    }
}

/// Offline mode: sign-in is checked against a local roster export and every
/// network step reports [`RemoteError::Offline`].
#[derive(Debug, Clone, Default)]
pub struct OfflineRemote {
    roster: Vec<RosterEntry>,
}

impl OfflineRemote {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_roster(roster: Vec<RosterEntry>) -> Self {
        Self { roster }
    }
}

impl PortalRemote for OfflineRemote {
    fn is_available(&self) -> bool {
        false
    }

    fn login(&self, student_id: &str, birth_date: &str) -> Result<RemoteSession, RemoteError> {
        let entry = self
            .roster
            .iter()
            .find(|entry| entry.id.eq_ignore_ascii_case(student_id.trim()))
            .filter(|entry| entry.birth_date.trim() == birth_date.trim())
            .ok_or(RemoteError::Unauthorized)?;
        Ok(RemoteSession {
            token: None,
            expires_at: None,
            student: Student {
                id: entry.id.clone(),
                name: entry.name.clone(),
                current_belt: entry.current_belt.clone().unwrap_or_default(),
            },
            records: Vec::new(),
        })
    }

    fn record_activity(&self, _token: &str, _student_id: &str, _action: &str) -> Result<(), RemoteError> {
        Err(RemoteError::Offline)
    }

    fn profile(&self, _token: &str) -> Result<Student, RemoteError> {
        Err(RemoteError::Offline)
    }

    fn fetch_progress(&self, _token: &str, _student_id: &str) -> Result<Vec<ServerCertificate>, RemoteError> {
        Err(RemoteError::Offline)
    }

    fn record_progress(
        &self,
        _token: &str,
        _request: &RecordProgressRequest,
    ) -> Result<RecordProgressResponse, RemoteError> {
        Err(RemoteError::Offline)
    }

    fn submit_test_application(
        &self,
        _token: &str,
        _application: &BeltTestApplication,
    ) -> Result<TestApplicationResponse, RemoteError> {
        Err(RemoteError::Offline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_are_classified() {
        assert!(RemoteError::Unauthorized.is_auth());
        assert!(RemoteError::Forbidden.is_auth());
        assert!(!RemoteError::Offline.is_auth());
        assert!(!RemoteError::Status { code: 500, message: String::new() }.is_auth());
    }

    #[test]
    fn path_segments_are_percent_encoded() {
        assert_eq!(encode_segment("ARA001"), "ARA001");
        assert_eq!(encode_segment("a b/c"), "a%20b%2Fc");
    }

    #[test]
    fn offline_login_checks_roster() {
        let remote = OfflineRemote::with_roster(vec![RosterEntry {
            id: "ARA001".to_string(),
            name: "Jamie Park".to_string(),
            birth_date: "2012-04-09".to_string(),
            phone: None,
            current_belt: Some("Yellow Belt".to_string()),
        }]);

        let session = remote.login("ara001", "2012-04-09").unwrap_or_else(|err| panic!("login failed: {err}"));
        assert_eq!(session.student.current_belt, "Yellow Belt");
        assert!(session.token.is_none());
        assert_eq!(remote.login("ARA001", "2012-04-10"), Err(RemoteError::Unauthorized));
        assert_eq!(remote.fetch_progress("t", "ARA001"), Err(RemoteError::Offline));
    }
}
