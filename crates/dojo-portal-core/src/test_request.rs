use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::Date;

use crate::error::PortalError;
use crate::readiness::ReadinessState;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TestRequestState {
    #[default]
    Locked,
    ReadinessMet,
    FormOpen,
    Submitted,
}

impl TestRequestState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Locked => "locked",
            Self::ReadinessMet => "readiness_met",
            Self::FormOpen => "form_open",
            Self::Submitted => "submitted",
        }
    }
}

/// Belt test application as entered on the request form.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BeltTestApplication {
    pub student_name: String,
    pub student_id: String,
    pub current_belt: String,
    pub desired_belt: String,
    pub preferred_test_date: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl BeltTestApplication {
    /// # Errors
    /// Returns [`PortalError::Validation`] naming the first empty required
    /// field, or when the preferred date is not `YYYY-MM-DD`.
    pub fn validate(&self) -> Result<(), PortalError> {
        let required = [
            ("studentName", &self.student_name),
            ("studentId", &self.student_id),
            ("currentBelt", &self.current_belt),
            ("desiredBelt", &self.desired_belt),
            ("preferredTestDate", &self.preferred_test_date),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(PortalError::Validation(format!("{field} is required")));
            }
        }
        Date::parse(self.preferred_test_date.trim(), format_description!("[year]-[month]-[day]"))
            .map_err(|_| {
                PortalError::Validation("preferredTestDate must be formatted as YYYY-MM-DD".to_string())
            })?;
        Ok(())
    }
}

/// Locked -> ReadinessMet -> FormOpen -> Submitted.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct TestRequestFlow {
    state: TestRequestState,
}

impl TestRequestFlow {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> TestRequestState {
        self.state
    }

    /// Follow the latest readiness evaluation. An open form is left alone;
    /// readiness is re-checked when it is submitted.
    pub fn observe(&mut self, readiness: &ReadinessState) -> TestRequestState {
        self.state = match (self.state, readiness.is_ready) {
            (TestRequestState::Locked, true) => TestRequestState::ReadinessMet,
            (TestRequestState::ReadinessMet, false) => TestRequestState::Locked,
            (state, _) => state,
        };
        self.state
    }

    /// # Errors
    /// Returns [`PortalError::InvalidTransition`] unless readiness is met.
    pub fn open_form(&mut self) -> Result<TestRequestState, PortalError> {
        if self.state != TestRequestState::ReadinessMet {
            return Err(PortalError::InvalidTransition { from: self.state.as_str(), action: "open the test form" });
        }
        self.state = TestRequestState::FormOpen;
        Ok(self.state)
    }

    /// Submit the open form against a fresh readiness evaluation.
    ///
    /// # Errors
    /// Returns [`PortalError::InvalidTransition`] when no form is open,
    /// [`PortalError::NotReady`] (and relocks) when readiness regressed, or
    /// [`PortalError::Validation`] for an incomplete application.
    pub fn submit(
        &mut self,
        readiness: &ReadinessState,
        application: &BeltTestApplication,
    ) -> Result<TestRequestState, PortalError> {
        if self.state != TestRequestState::FormOpen {
            return Err(PortalError::InvalidTransition { from: self.state.as_str(), action: "submit a test request" });
        }
        if !readiness.is_ready {
            self.state = TestRequestState::Locked;
            return Err(PortalError::NotReady(readiness.missing.clone()));
        }
        application.validate()?;
        self.state = TestRequestState::Submitted;
        Ok(self.state)
    }
}
