use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::catalog::BeltCatalog;
use crate::certificate::{CertificateIndex, CertificateRecord, CertificateSource};
use crate::progress::{unlock_target, ProgressRecord};

pub const SERVER_FILE_NAME_FALLBACK: &str = "Certificate uploaded";

/// Canonical certificate metadata as reported by the portal API.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerCertificate {
    pub belt_slug: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub uploaded_at: String,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ReconcileOutcome {
    pub progress: ProgressRecord,
    pub certificates: CertificateIndex,
    /// Blob keys of local records the server no longer reports.
    pub released_blobs: Vec<String>,
    pub skipped_slugs: Vec<String>,
    /// Whether the caller should surface the one-time "synced" notice.
    pub notify: bool,
}

/// Running maxima of the ordinals implied by certificates.
#[derive(Debug, Clone, Copy)]
struct Implied {
    awarded: usize,
    unlocked: usize,
}

impl Implied {
    fn fold(&mut self, catalog: &BeltCatalog, ordinal: usize) {
        self.awarded = self.awarded.max(ordinal);
        self.unlocked = self.unlocked.max(ordinal.saturating_add(1).min(catalog.last_ordinal()));
    }
}

/// Merge the server's certificate records into local state.
///
/// The result is a monotonic union: progress never moves below what was
/// stored, pending local uploads the server has not seen survive untouched,
/// and only records that were previously confirmed and are now absent
/// server-side are dropped.
#[must_use]
pub fn reconcile(
    catalog: &BeltCatalog,
    base_index: usize,
    stored: Option<ProgressRecord>,
    local: &CertificateIndex,
    server: &[ServerCertificate],
    silent: bool,
    now: OffsetDateTime,
) -> ReconcileOutcome {
    let last = catalog.last_ordinal();
    let default_unlocked = unlock_target(catalog, base_index);
    let mut implied = Implied { awarded: base_index.min(last), unlocked: default_unlocked };
    let mut certificates = CertificateIndex::new();
    let mut skipped_slugs = Vec::new();

    for record in server {
        let Some(rank) = catalog.resolve_by_slug(&record.belt_slug) else {
            skipped_slugs.push(record.belt_slug.clone());
            continue;
        };
        implied.fold(catalog, rank.ordinal);

        let existing = local.get(rank.name);
        let uploaded_at = OffsetDateTime::parse(&record.uploaded_at, &Rfc3339)
            .ok()
            .or_else(|| existing.map(|item| item.uploaded_at))
            .unwrap_or(now);
        let file_name = if record.file_name.trim().is_empty() {
            existing.map_or_else(|| SERVER_FILE_NAME_FALLBACK.to_string(), |item| item.file_name.clone())
        } else {
            record.file_name.clone()
        };

        certificates.insert(
            rank.name.to_string(),
            CertificateRecord {
                belt: rank.name.to_string(),
                belt_slug: rank.slug.to_string(),
                uploaded_at,
                file_name,
                file_type: existing.map(|item| item.file_type.clone()).unwrap_or_default(),
                file_size: existing.map_or(0, |item| item.file_size),
                file: existing.and_then(|item| item.file.clone()),
                source: CertificateSource::Server,
                pending_sync: false,
            },
        );
    }

    let mut released_blobs = Vec::new();
    for (belt, record) in local {
        if certificates.contains_key(belt) {
            continue;
        }
        if record.pending_sync {
            if let Some(rank) = catalog.resolve_by_slug(&record.belt_slug) {
                implied.fold(catalog, rank.ordinal);
            }
            certificates.insert(belt.clone(), record.clone());
        } else if let Some(key) = record.file.as_ref().and_then(|file| file.storage_key()) {
            released_blobs.push(key.to_string());
        }
    }

    let stored = stored.unwrap_or(ProgressRecord {
        unlocked_index: default_unlocked,
        awarded_index: base_index.min(default_unlocked),
    });
    let unlocked_index = default_unlocked
        .max(stored.unlocked_index)
        .max(implied.unlocked)
        .min(last);
    let awarded_index = stored.awarded_index.max(implied.awarded).min(unlocked_index);

    ReconcileOutcome {
        progress: ProgressRecord { unlocked_index, awarded_index },
        certificates,
        released_blobs,
        skipped_slugs,
        notify: !silent && !server.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use time::Duration;

    use super::*;
    use crate::certificate::{certificate_blob_key, StoredFile};

    fn fixture_time() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + Duration::seconds(1_760_000_000)
    }

    fn server(slug: &str, file_name: &str) -> ServerCertificate {
        ServerCertificate {
            belt_slug: slug.to_string(),
            file_name: file_name.to_string(),
            uploaded_at: "2026-09-01T10:00:00Z".to_string(),
        }
    }

    fn local(catalog: &BeltCatalog, slug: &str, pending: bool) -> CertificateRecord {
        let Some(rank) = catalog.resolve_by_slug(slug) else {
            panic!("unknown slug {slug}");
        };
        let mut record = CertificateRecord::local_upload(
            rank.name,
            rank.slug,
            fixture_time(),
            &format!("{slug}.jpg"),
            "image/jpeg",
            4096,
            Some(StoredFile::Stored { storage_key: certificate_blob_key("S-1", slug) }),
        );
        if !pending {
            record.mark_synced();
        }
        record
    }

    fn index(records: Vec<CertificateRecord>) -> CertificateIndex {
        records.into_iter().map(|record| (record.belt.clone(), record)).collect()
    }

    // Test IDs: TREC-001
    #[test]
    fn stale_server_data_never_regresses_progress() {
        let catalog = BeltCatalog::standard();
        let stored = ProgressRecord { unlocked_index: 6, awarded_index: 5 };
        let outcome = reconcile(
            &catalog,
            2,
            Some(stored),
            &CertificateIndex::new(),
            &[server("green", "green.jpg")],
            false,
            fixture_time(),
        );
        assert_eq!(outcome.progress, stored);
        assert!(outcome.notify);
    }

    // Test IDs: TREC-002
    #[test]
    fn pending_local_record_survives_and_counts() {
        let catalog = BeltCatalog::standard();
        let pending = local(&catalog, "high-yellow", true);
        let outcome = reconcile(
            &catalog,
            2,
            Some(ProgressRecord { unlocked_index: 3, awarded_index: 2 }),
            &index(vec![pending.clone()]),
            &[],
            true,
            fixture_time(),
        );
        assert_eq!(outcome.certificates.get("High Yellow Belt"), Some(&pending));
        assert_eq!(outcome.progress, ProgressRecord { unlocked_index: 4, awarded_index: 3 });
        assert!(!outcome.notify);
    }

    // Test IDs: TREC-003
    #[test]
    fn confirmed_record_absent_from_server_is_released() {
        let catalog = BeltCatalog::standard();
        let confirmed = local(&catalog, "yellow", false);
        let outcome = reconcile(
            &catalog,
            1,
            None,
            &index(vec![confirmed]),
            &[],
            false,
            fixture_time(),
        );
        assert!(outcome.certificates.is_empty());
        assert_eq!(outcome.released_blobs, vec!["S-1::yellow".to_string()]);
        assert!(!outcome.notify);
    }

    // Test IDs: TREC-004
    #[test]
    fn server_record_overwrites_metadata_but_keeps_local_file() {
        let catalog = BeltCatalog::standard();
        let pending = local(&catalog, "yellow", true);
        let outcome = reconcile(
            &catalog,
            1,
            None,
            &index(vec![pending.clone()]),
            &[server("yellow", "studio-copy.jpg"), server("purple", "x.jpg")],
            false,
            fixture_time(),
        );
        let Some(merged) = outcome.certificates.get("Yellow Belt") else {
            panic!("yellow certificate missing");
        };
        assert_eq!(merged.file_name, "studio-copy.jpg");
        assert_eq!(merged.file, pending.file);
        assert_eq!(merged.file_size, 4096);
        assert_eq!(merged.source, CertificateSource::Server);
        assert!(!merged.pending_sync);
        assert!(merged.validate().is_ok());
        assert_eq!(outcome.skipped_slugs, vec!["purple".to_string()]);
        assert_eq!(outcome.progress, ProgressRecord { unlocked_index: 3, awarded_index: 2 });
    }

    // Test IDs: TREC-005
    #[test]
    fn server_record_without_file_name_uses_fallback() {
        let catalog = BeltCatalog::standard();
        let mut record = server("blue", "");
        record.uploaded_at = "not a timestamp".to_string();
        let outcome = reconcile(&catalog, 0, None, &CertificateIndex::new(), &[record], true, fixture_time());
        let Some(merged) = outcome.certificates.get("Blue Belt") else {
            panic!("blue certificate missing");
        };
        assert_eq!(merged.file_name, SERVER_FILE_NAME_FALLBACK);
        assert_eq!(merged.uploaded_at, fixture_time());
        assert!(!merged.has_file());
    }

    fn slug_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("white".to_string()),
            Just("yellow".to_string()),
            Just("green".to_string()),
            Just("high-blue".to_string()),
            Just("black".to_string()),
            Just("black-4th-dan".to_string()),
            Just("unknown".to_string()),
        ]
    }

    // Test IDs: TREC-006
    proptest! {
        #[test]
        fn property_reconcile_is_idempotent_and_monotonic(
            base in 0usize..14,
            stored_unlocked in 0usize..14,
            server_slugs in proptest::collection::vec(slug_strategy(), 0..5),
            local_slugs in proptest::collection::vec((slug_strategy(), any::<bool>()), 0..5),
        ) {
            let catalog = BeltCatalog::standard();
            let (stored, _) = ProgressRecord::ensure_unlocked(
                &catalog,
                base,
                Some(ProgressRecord { unlocked_index: stored_unlocked, awarded_index: stored_unlocked.saturating_sub(1) }),
            );
            let local_index = index(
                local_slugs
                    .iter()
                    .filter(|(slug, _)| catalog.resolve_by_slug(slug).is_some())
                    .map(|(slug, pending)| local(&catalog, slug, *pending))
                    .collect(),
            );
            let records: Vec<ServerCertificate> =
                server_slugs.iter().map(|slug| server(slug, "cert.jpg")).collect();

            let once = reconcile(&catalog, base, Some(stored), &local_index, &records, true, fixture_time());
            let twice = reconcile(&catalog, base, Some(once.progress), &once.certificates, &records, true, fixture_time());

            prop_assert_eq!(once.progress, twice.progress);
            prop_assert_eq!(&once.certificates, &twice.certificates);
            prop_assert!(once.progress.unlocked_index >= stored.unlocked_index);
            prop_assert!(once.progress.awarded_index >= stored.awarded_index);
            prop_assert!(once.progress.awarded_index <= once.progress.unlocked_index);
            for (belt, record) in &local_index {
                if record.pending_sync && !records.iter().any(|item| item.belt_slug == record.belt_slug) {
                    prop_assert_eq!(once.certificates.get(belt), Some(record));
                }
            }
        }
    }
}
