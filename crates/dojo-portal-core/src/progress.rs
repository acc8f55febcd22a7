use serde::{Deserialize, Serialize};

use crate::catalog::BeltCatalog;

/// Identity and nominal rank as the studio roster knows the student.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub current_belt: String,
}

impl Student {
    /// Ordinal of the student's nominal current belt.
    #[must_use]
    pub fn base_index(&self, catalog: &BeltCatalog) -> usize {
        catalog.resolve_index_by_name(&self.current_belt)
    }
}

/// Per-student advancement pointers into the belt catalog.
///
/// Invariant: `awarded_index <= unlocked_index <= catalog.last_ordinal()`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub unlocked_index: usize,
    pub awarded_index: usize,
}

/// The lowest unlock point for a student whose nominal belt is `base_index`.
#[must_use]
pub fn unlock_target(catalog: &BeltCatalog, base_index: usize) -> usize {
    base_index.saturating_add(1).min(catalog.last_ordinal())
}

/// The awarded ordinal implied by an unlock point.
///
/// Reaching the unlock point for rank N presumes rank N-1 was certified.
#[must_use]
pub fn compute_awarded_index(catalog: &BeltCatalog, base_index: usize, unlocked_index: usize) -> usize {
    let last = catalog.last_ordinal();
    if unlocked_index >= last {
        return base_index.max(last).min(last);
    }
    base_index.max(unlocked_index.saturating_sub(1)).min(unlocked_index)
}

impl ProgressRecord {
    /// Fresh record derived from the nominal current belt.
    #[must_use]
    pub fn derive(catalog: &BeltCatalog, base_index: usize) -> Self {
        let unlocked_index = unlock_target(catalog, base_index);
        Self { unlocked_index, awarded_index: compute_awarded_index(catalog, base_index, unlocked_index) }
    }

    /// Clamp a stored record (or derive one) so the unlock point is never
    /// below the freshly derived minimum. Returns the record and whether it
    /// differs from what was stored.
    #[must_use]
    pub fn ensure_unlocked(
        catalog: &BeltCatalog,
        base_index: usize,
        stored: Option<Self>,
    ) -> (Self, bool) {
        let Some(stored) = stored else {
            return (Self::derive(catalog, base_index), true);
        };
        let ensured = stored.advance_to(catalog, base_index, unlock_target(catalog, base_index));
        (ensured, ensured != stored)
    }

    /// Move the unlock point forward to `requested` (capped at the last rank).
    /// Requests below the current unlock point are ignored.
    #[must_use]
    pub fn advance_to(self, catalog: &BeltCatalog, base_index: usize, requested: usize) -> Self {
        let last = catalog.last_ordinal();
        let unlocked_index = requested
            .max(self.unlocked_index)
            .max(unlock_target(catalog, base_index))
            .min(last);
        let awarded_index = compute_awarded_index(catalog, base_index, unlocked_index)
            .max(self.awarded_index)
            .min(unlocked_index);
        Self { unlocked_index, awarded_index }
    }

    #[must_use]
    pub fn is_complete(&self, catalog: &BeltCatalog) -> bool {
        self.awarded_index >= catalog.last_ordinal()
    }
}
