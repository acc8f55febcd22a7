use std::collections::BTreeMap;

use dojo_portal_core::{
    load_json, save_json, CertificateIndex, KeyValueStore, PortalError, ProgressRecord, ReadinessTracker,
    Student, CERTIFICATES_KEY, PROGRESS_KEY, READINESS_KEY, SESSION_KEY,
};
use serde::{Deserialize, Serialize};

/// The signed-in student and their bearer token, if the API issued one.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub student: Student,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<String>,
}

/// Everything the portal keeps between runs, keyed by student id.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct PortalState {
    pub session: Option<Session>,
    pub progress: BTreeMap<String, ProgressRecord>,
    pub certificates: BTreeMap<String, CertificateIndex>,
    pub readiness: BTreeMap<String, ReadinessTracker>,
}

impl PortalState {
    /// # Errors
    /// Returns [`PortalError::Storage`] when a key cannot be read or decoded.
    pub fn load(store: &dyn KeyValueStore) -> Result<Self, PortalError> {
        Ok(Self {
            session: load_json(store, SESSION_KEY)?,
            progress: load_json(store, PROGRESS_KEY)?.unwrap_or_default(),
            certificates: load_json(store, CERTIFICATES_KEY)?.unwrap_or_default(),
            readiness: load_json(store, READINESS_KEY)?.unwrap_or_default(),
        })
    }

    /// # Errors
    /// Returns [`PortalError::Storage`] when the write fails.
    pub fn flush_session(&self, store: &mut dyn KeyValueStore) -> Result<(), PortalError> {
        match &self.session {
            Some(session) => save_json(store, SESSION_KEY, session),
            None => store.remove_value(SESSION_KEY),
        }
    }

    /// # Errors
    /// Returns [`PortalError::Storage`] when the write fails.
    pub fn flush_progress(&self, store: &mut dyn KeyValueStore) -> Result<(), PortalError> {
        save_json(store, PROGRESS_KEY, &self.progress)
    }

    /// # Errors
    /// Returns [`PortalError::Storage`] when the write fails.
    pub fn flush_certificates(&self, store: &mut dyn KeyValueStore) -> Result<(), PortalError> {
        save_json(store, CERTIFICATES_KEY, &self.certificates)
    }

    /// # Errors
    /// Returns [`PortalError::Storage`] when the write fails.
    pub fn flush_readiness(&self, store: &mut dyn KeyValueStore) -> Result<(), PortalError> {
        save_json(store, READINESS_KEY, &self.readiness)
    }

    #[must_use]
    pub fn active_student(&self) -> Option<&Student> {
        self.session.as_ref().map(|session| &session.student)
    }

    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.session.as_ref().and_then(|session| session.token.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use dojo_portal_core::MemoryKeyValueStore;

    use super::*;

    #[test]
    fn state_round_trips_through_store() -> Result<(), PortalError> {
        let mut store = MemoryKeyValueStore::new();
        let mut state = PortalState {
            session: Some(Session {
                student: Student {
                    id: "ARA001".to_string(),
                    name: "Jamie Park".to_string(),
                    current_belt: "Yellow Belt".to_string(),
                },
                token: Some("abc".to_string()),
                expires_at: None,
            }),
            ..PortalState::default()
        };
        state.progress.insert("ARA001".to_string(), ProgressRecord { unlocked_index: 3, awarded_index: 2 });

        state.flush_session(&mut store)?;
        state.flush_progress(&mut store)?;
        assert_eq!(PortalState::load(&store)?, state);

        state.session = None;
        state.flush_session(&mut store)?;
        let reloaded = PortalState::load(&store)?;
        assert!(reloaded.session.is_none());
        assert_eq!(reloaded.progress.len(), 1);
        Ok(())
    }
}
