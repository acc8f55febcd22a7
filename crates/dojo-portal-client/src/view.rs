use dojo_portal_core::{BeltCatalog, CertificateIndex, CertificateSource, ProgressRecord, Student};
use serde::Serialize;
use time::macros::format_description;
use time::OffsetDateTime;

pub const FINAL_BELT_LABEL: &str = "You're at the final belt!";
pub const EMPTY_LOG_HINT: &str = "Upload your certificate after each belt test to unlock the next belt instantly.";

#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum BeltBadge {
    Awarded,
    UpNext,
    Locked,
}

impl BeltBadge {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Awarded => "Awarded",
            Self::UpNext => "Up Next",
            Self::Locked => "Locked",
        }
    }
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSummary {
    pub uploaded_on: String,
    pub file_name: String,
    pub pending_sync: bool,
    pub downloadable: bool,
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BeltCard {
    pub ordinal: usize,
    pub name: &'static str,
    pub slug: &'static str,
    pub focus: &'static str,
    pub badge: BeltBadge,
    pub unlocked: bool,
    pub status: String,
    pub certificate: Option<CertificateSummary>,
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateLogEntry {
    pub belt: String,
    pub belt_slug: String,
    pub uploaded_on: String,
    pub file_name: String,
    pub source: CertificateSource,
    pub pending_sync: bool,
    pub downloadable: bool,
}

/// Everything the UI needs to redraw the portal for one student.
#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PortalView {
    pub student_id: String,
    pub student_name: String,
    pub current_belt: String,
    pub next_belt: Option<String>,
    pub next_belt_label: String,
    pub progress: ProgressRecord,
    pub belts: Vec<BeltCard>,
    pub certificate_log: Vec<CertificateLogEntry>,
    pub empty_log_hint: Option<&'static str>,
}

fn format_date(value: OffsetDateTime) -> String {
    value
        .format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| value.date().to_string())
}

/// Build the portal view from the ledger state.
#[must_use]
pub fn render_portal(
    catalog: &BeltCatalog,
    student: &Student,
    progress: ProgressRecord,
    certificates: &CertificateIndex,
) -> PortalView {
    let unlocked = progress.unlocked_index;
    let awarded = progress.awarded_index;
    let has_next = unlocked > awarded && unlocked < catalog.len();
    let next_belt = if has_next { catalog.get(unlocked).map(|rank| rank.name.to_string()) } else { None };
    let current_belt = catalog
        .get(awarded)
        .map(|rank| rank.name.to_string())
        .unwrap_or_else(|| student.current_belt.clone());

    let belts = catalog
        .ranks()
        .iter()
        .map(|rank| {
            let is_awarded = rank.ordinal <= awarded;
            let is_active = rank.ordinal == unlocked && unlocked > awarded;
            let badge = if is_awarded {
                BeltBadge::Awarded
            } else if is_active {
                BeltBadge::UpNext
            } else {
                BeltBadge::Locked
            };
            let record = certificates.get(rank.name);
            let status = match record {
                Some(record) => format!("Awarded {} • {}", format_date(record.uploaded_at), record.file_name),
                None if is_active => {
                    "Upload your certificate to award this belt and unlock the next rank instantly.".to_string()
                }
                None if is_awarded => "Belt awarded. Upload your certificate to keep a copy in your locker.".to_string(),
                None => "Keep training—this belt will unlock soon.".to_string(),
            };
            BeltCard {
                ordinal: rank.ordinal,
                name: rank.name,
                slug: rank.slug,
                focus: rank.focus,
                badge,
                unlocked: rank.ordinal <= unlocked,
                status,
                certificate: record.map(|record| CertificateSummary {
                    uploaded_on: format_date(record.uploaded_at),
                    file_name: record.file_name.clone(),
                    pending_sync: record.pending_sync,
                    downloadable: record.has_file(),
                }),
            }
        })
        .collect();

    let mut log: Vec<_> = certificates
        .values()
        .filter(|record| catalog.resolve_by_slug(&record.belt_slug).is_some())
        .collect();
    log.sort_by(|left, right| right.uploaded_at.cmp(&left.uploaded_at));
    let certificate_log: Vec<CertificateLogEntry> = log
        .into_iter()
        .map(|record| CertificateLogEntry {
            belt: record.belt.clone(),
            belt_slug: record.belt_slug.clone(),
            uploaded_on: format_date(record.uploaded_at),
            file_name: record.file_name.clone(),
            source: record.source,
            pending_sync: record.pending_sync,
            downloadable: record.has_file(),
        })
        .collect();

    PortalView {
        student_id: student.id.clone(),
        student_name: student.name.clone(),
        current_belt,
        next_belt_label: next_belt.clone().unwrap_or_else(|| FINAL_BELT_LABEL.to_string()),
        next_belt,
        progress,
        belts,
        empty_log_hint: certificate_log.is_empty().then_some(EMPTY_LOG_HINT),
        certificate_log,
    }
}

#[cfg(test)]
mod tests {
    use dojo_portal_core::{CertificateRecord, StoredFile};
    use time::Duration;

    use super::*;

    fn student(belt: &str) -> Student {
        Student { id: "ARA001".to_string(), name: "Jamie Park".to_string(), current_belt: belt.to_string() }
    }

    fn record(catalog: &BeltCatalog, slug: &str, age_days: i64) -> CertificateRecord {
        let rank = catalog.resolve_by_slug(slug).unwrap_or_else(|| panic!("unknown slug {slug}"));
        CertificateRecord::local_upload(
            rank.name,
            rank.slug,
            OffsetDateTime::UNIX_EPOCH + Duration::days(1000 - age_days),
            &format!("{slug}.jpg"),
            "image/jpeg",
            10,
            Some(StoredFile::inline("image/jpeg", b"x")),
        )
    }

    // Test IDs: TVIEW-001
    #[test]
    fn badges_follow_awarded_and_unlocked() {
        let catalog = BeltCatalog::standard();
        let view = render_portal(
            &catalog,
            &student("Yellow Belt"),
            ProgressRecord { unlocked_index: 3, awarded_index: 2 },
            &CertificateIndex::new(),
        );

        assert_eq!(view.current_belt, "Yellow Belt");
        assert_eq!(view.next_belt.as_deref(), Some("High Yellow Belt"));
        assert_eq!(view.belts[2].badge, BeltBadge::Awarded);
        assert_eq!(view.belts[3].badge, BeltBadge::UpNext);
        assert!(view.belts[3].unlocked);
        assert_eq!(view.belts[4].badge, BeltBadge::Locked);
        assert!(!view.belts[4].unlocked);
        assert_eq!(view.empty_log_hint, Some(EMPTY_LOG_HINT));
    }

    // Test IDs: TVIEW-002
    #[test]
    fn final_belt_has_no_next() {
        let catalog = BeltCatalog::standard();
        let last = catalog.last_ordinal();
        let view = render_portal(
            &catalog,
            &student("Black Belt 4th Dan"),
            ProgressRecord { unlocked_index: last, awarded_index: last },
            &CertificateIndex::new(),
        );
        assert_eq!(view.next_belt, None);
        assert_eq!(view.next_belt_label, FINAL_BELT_LABEL);
        assert!(view.belts.iter().all(|card| card.badge == BeltBadge::Awarded));
    }

    // Test IDs: TVIEW-003
    #[test]
    fn certificate_log_is_newest_first_and_skips_unknown_slugs() {
        let catalog = BeltCatalog::standard();
        let mut certificates = CertificateIndex::new();
        let older = record(&catalog, "yellow", 30);
        let newer = record(&catalog, "high-yellow", 1);
        let mut orphan = record(&catalog, "green", 0);
        orphan.belt = "Purple Belt".to_string();
        orphan.belt_slug = "purple".to_string();
        certificates.insert(older.belt.clone(), older);
        certificates.insert(newer.belt.clone(), newer);
        certificates.insert(orphan.belt.clone(), orphan);

        let view = render_portal(
            &catalog,
            &student("Yellow Belt"),
            ProgressRecord { unlocked_index: 4, awarded_index: 3 },
            &certificates,
        );

        let belts: Vec<&str> = view.certificate_log.iter().map(|entry| entry.belt.as_str()).collect();
        assert_eq!(belts, vec!["High Yellow Belt", "Yellow Belt"]);
        assert!(view.certificate_log.iter().all(|entry| entry.downloadable));
        assert!(view.belts[3].status.starts_with("Awarded "));
        assert_eq!(view.empty_log_hint, None);
    }
}
