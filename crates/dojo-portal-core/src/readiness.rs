use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::catalog::BeltRank;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stripe {
    Poomsae,
    SelfDefense,
    BoardBreaking,
    Sparring,
}

impl Stripe {
    pub const ALL: [Self; 4] = [Self::Poomsae, Self::SelfDefense, Self::BoardBreaking, Self::Sparring];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Poomsae => "poomsae",
            Self::SelfDefense => "self_defense",
            Self::BoardBreaking => "board_breaking",
            Self::Sparring => "sparring",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Poomsae => "Poomsae",
            Self::SelfDefense => "Self-Defense",
            Self::BoardBreaking => "Board Breaking",
            Self::Sparring => "Sparring",
        }
    }

    /// # Errors
    /// Returns an error string when `value` is not a known stripe.
    pub fn parse(value: &str) -> Result<Self, String> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "poomsae" | "forms" => Ok(Self::Poomsae),
            "self_defense" => Ok(Self::SelfDefense),
            "board_breaking" => Ok(Self::BoardBreaking),
            "sparring" => Ok(Self::Sparring),
            other => Err(format!("unsupported stripe: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Stripes {
    pub poomsae: bool,
    pub self_defense: bool,
    pub board_breaking: bool,
    pub sparring: bool,
}

impl Stripes {
    #[must_use]
    pub fn all_complete() -> Self {
        Self { poomsae: true, self_defense: true, board_breaking: true, sparring: true }
    }

    #[must_use]
    pub fn get(&self, stripe: Stripe) -> bool {
        match stripe {
            Stripe::Poomsae => self.poomsae,
            Stripe::SelfDefense => self.self_defense,
            Stripe::BoardBreaking => self.board_breaking,
            Stripe::Sparring => self.sparring,
        }
    }

    pub fn set(&mut self, stripe: Stripe, earned: bool) {
        match stripe {
            Stripe::Poomsae => self.poomsae = earned,
            Stripe::SelfDefense => self.self_defense = earned,
            Stripe::BoardBreaking => self.board_breaking = earned,
            Stripe::Sparring => self.sparring = earned,
        }
    }

    /// Incomplete stripes in display order.
    #[must_use]
    pub fn incomplete(&self) -> Vec<Stripe> {
        Stripe::ALL.into_iter().filter(|stripe| !self.get(*stripe)).collect()
    }
}

/// Attendance and stripe progress toward one target belt.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessEntry {
    #[serde(default)]
    pub classes_offered: u32,
    #[serde(default)]
    pub classes_attended: u32,
    #[serde(default)]
    pub stripes: Stripes,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
}

/// Target belt slug -> readiness entry for one student.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(transparent)]
pub struct ReadinessTracker {
    entries: BTreeMap<String, ReadinessEntry>,
}

impl ReadinessTracker {
    /// The entry for `belt_slug`, or all-zero defaults when none was saved.
    #[must_use]
    pub fn entry(&self, belt_slug: &str) -> ReadinessEntry {
        self.entries.get(belt_slug).cloned().unwrap_or_default()
    }

    /// Replace the entry for `belt_slug` wholesale.
    pub fn save(&mut self, belt_slug: &str, mut entry: ReadinessEntry, now: OffsetDateTime) {
        entry.updated_at = Some(now);
        self.entries.insert(belt_slug.to_string(), entry);
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ReadinessThreshold {
    pub lessons: u32,
    pub percent: f64,
}

pub const DEFAULT_THRESHOLD: ReadinessThreshold = ReadinessThreshold { lessons: 20, percent: 0.70 };

const STANDARD_THRESHOLDS: [(&str, ReadinessThreshold); 13] = [
    ("high-white", ReadinessThreshold { lessons: 12, percent: 0.60 }),
    ("yellow", ReadinessThreshold { lessons: 16, percent: 0.60 }),
    ("high-yellow", ReadinessThreshold { lessons: 20, percent: 0.65 }),
    ("green", ReadinessThreshold { lessons: 24, percent: 0.65 }),
    ("high-green", ReadinessThreshold { lessons: 28, percent: 0.70 }),
    ("blue", ReadinessThreshold { lessons: 32, percent: 0.70 }),
    ("high-blue", ReadinessThreshold { lessons: 36, percent: 0.75 }),
    ("red", ReadinessThreshold { lessons: 40, percent: 0.75 }),
    ("high-red", ReadinessThreshold { lessons: 44, percent: 0.80 }),
    ("black", ReadinessThreshold { lessons: 60, percent: 0.85 }),
    ("black-2nd-dan", ReadinessThreshold { lessons: 80, percent: 0.85 }),
    ("black-3rd-dan", ReadinessThreshold { lessons: 100, percent: 0.90 }),
    ("black-4th-dan", ReadinessThreshold { lessons: 120, percent: 0.90 }),
];

#[derive(Debug, Clone, PartialEq)]
pub struct ReadinessPolicy {
    thresholds: BTreeMap<String, ReadinessThreshold>,
    fallback: ReadinessThreshold,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl ReadinessPolicy {
    #[must_use]
    pub fn standard() -> Self {
        Self {
            thresholds: STANDARD_THRESHOLDS
                .iter()
                .map(|(slug, threshold)| ((*slug).to_string(), *threshold))
                .collect(),
            fallback: DEFAULT_THRESHOLD,
        }
    }

    /// A policy with only a fallback threshold; every belt uses it.
    #[must_use]
    pub fn uniform(fallback: ReadinessThreshold) -> Self {
        Self { thresholds: BTreeMap::new(), fallback }
    }

    #[must_use]
    pub fn with_threshold(mut self, belt_slug: &str, threshold: ReadinessThreshold) -> Self {
        self.thresholds.insert(belt_slug.to_string(), threshold);
        self
    }

    #[must_use]
    pub fn threshold_for(&self, belt_slug: &str) -> ReadinessThreshold {
        self.thresholds.get(belt_slug).copied().unwrap_or(self.fallback)
    }
}

/// Externally supplied veto from the attendance service.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct AttendancePenalty {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessState {
    pub belt_slug: String,
    pub is_ready: bool,
    pub missing: Vec<String>,
    pub attendance_percent: f64,
    pub threshold: ReadinessThreshold,
}

#[must_use]
pub fn attendance_percent(entry: &ReadinessEntry) -> f64 {
    if entry.classes_offered == 0 {
        return 0.0;
    }
    f64::from(entry.classes_attended) / f64::from(entry.classes_offered)
}

/// Evaluate every gate for `target` and collect one reason per failure.
#[must_use]
pub fn compute_readiness_state(
    policy: &ReadinessPolicy,
    target: &BeltRank,
    entry: &ReadinessEntry,
    penalty: Option<&AttendancePenalty>,
) -> ReadinessState {
    let threshold = policy.threshold_for(target.slug);
    let percent = attendance_percent(entry);
    let mut missing = Vec::new();

    if entry.classes_attended < threshold.lessons {
        missing.push(format!(
            "Lessons: {} of {} attended",
            entry.classes_attended, threshold.lessons
        ));
    }

    if entry.classes_offered == 0 {
        missing.push("Attendance: no classes offered yet".to_string());
    } else if percent < threshold.percent {
        missing.push(format!(
            "Attendance: {:.0}% of {:.0}% required",
            percent * 100.0,
            threshold.percent * 100.0
        ));
    }

    let incomplete = entry.stripes.incomplete();
    if !incomplete.is_empty() {
        let labels: Vec<&str> = incomplete.iter().map(|stripe| stripe.label()).collect();
        missing.push(format!("Stripes: {}", labels.join(", ")));
    }

    if let Some(penalty) = penalty {
        missing.push(penalty.message.clone());
    }

    ReadinessState {
        belt_slug: target.slug.to_string(),
        is_ready: missing.is_empty(),
        missing,
        attendance_percent: percent,
        threshold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::BeltCatalog;

    fn rank(slug: &str) -> BeltRank {
        match BeltCatalog::standard().resolve_by_slug(slug) {
            Some(rank) => *rank,
            None => panic!("unknown slug {slug}"),
        }
    }

    fn entry(offered: u32, attended: u32, stripes: Stripes) -> ReadinessEntry {
        ReadinessEntry { classes_offered: offered, classes_attended: attended, stripes, updated_at: None }
    }

    // Test IDs: TRDY-001
    #[test]
    fn lesson_and_percent_shortfalls_are_both_listed() {
        let policy = ReadinessPolicy::uniform(ReadinessThreshold { lessons: 25, percent: 0.70 });
        let state = compute_readiness_state(
            &policy,
            &rank("green"),
            &entry(30, 20, Stripes::all_complete()),
            None,
        );
        assert!(!state.is_ready);
        assert_eq!(
            state.missing,
            vec!["Lessons: 20 of 25 attended".to_string(), "Attendance: 67% of 70% required".to_string()]
        );
    }

    // Test IDs: TRDY-002
    #[test]
    fn single_missing_stripe_is_the_only_reason() {
        let policy = ReadinessPolicy::standard();
        let mut stripes = Stripes::all_complete();
        stripes.set(Stripe::Sparring, false);
        let state = compute_readiness_state(&policy, &rank("yellow"), &entry(20, 18, stripes), None);
        assert!(!state.is_ready);
        assert_eq!(state.missing, vec!["Stripes: Sparring".to_string()]);
    }

    // Test IDs: TRDY-003
    #[test]
    fn zero_offered_is_zero_percent_not_an_error() {
        let state = compute_readiness_state(
            &ReadinessPolicy::standard(),
            &rank("high-white"),
            &ReadinessEntry::default(),
            None,
        );
        assert!(!state.is_ready);
        assert!(state.attendance_percent.abs() < f64::EPSILON);
        assert_eq!(
            state.missing,
            vec![
                "Lessons: 0 of 12 attended".to_string(),
                "Attendance: no classes offered yet".to_string(),
                "Stripes: Poomsae, Self-Defense, Board Breaking, Sparring".to_string(),
            ]
        );
    }

    // Test IDs: TRDY-004
    #[test]
    fn penalty_vetoes_an_otherwise_ready_student() {
        let policy = ReadinessPolicy::standard();
        let ready_entry = entry(20, 25, Stripes::all_complete());
        let clear = compute_readiness_state(&policy, &rank("yellow"), &ready_entry, None);
        assert!(clear.is_ready);
        assert!(clear.missing.is_empty());

        let penalty = AttendancePenalty { message: "Attendance hold: see Master Ara".to_string() };
        let vetoed = compute_readiness_state(&policy, &rank("yellow"), &ready_entry, Some(&penalty));
        assert!(!vetoed.is_ready);
        assert_eq!(vetoed.missing, vec!["Attendance hold: see Master Ara".to_string()]);
    }

    // Test IDs: TRDY-005
    #[test]
    fn unknown_target_uses_fallback_threshold() {
        let policy = ReadinessPolicy::standard();
        assert_eq!(policy.threshold_for("white"), DEFAULT_THRESHOLD);
        assert_eq!(policy.threshold_for("black-4th-dan").lessons, 120);
    }

    #[test]
    fn tracker_defaults_and_overwrites() {
        let mut tracker = ReadinessTracker::default();
        assert_eq!(tracker.entry("green"), ReadinessEntry::default());
        tracker.save("green", entry(10, 9, Stripes::default()), OffsetDateTime::UNIX_EPOCH);
        tracker.save("green", entry(12, 4, Stripes::default()), OffsetDateTime::UNIX_EPOCH);
        let saved = tracker.entry("green");
        assert_eq!((saved.classes_offered, saved.classes_attended), (12, 4));
        assert_eq!(saved.updated_at, Some(OffsetDateTime::UNIX_EPOCH));
        assert_eq!(Stripe::parse("self-defense"), Ok(Stripe::SelfDefense));
    }
}
