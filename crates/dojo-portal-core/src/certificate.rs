use std::collections::BTreeMap;

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::PortalError;
use crate::persist::BlobStore;

/// Belt name -> certificate record for one student.
pub type CertificateIndex = BTreeMap<String, CertificateRecord>;

/// Where a certificate's bytes live.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoredFile {
    Stored {
        #[serde(rename = "storageKey")]
        storage_key: String,
    },
    Inline {
        #[serde(rename = "dataUrl")]
        data_url: String,
    },
}

impl StoredFile {
    #[must_use]
    pub fn inline(mime_type: &str, bytes: &[u8]) -> Self {
        let mime_type = if mime_type.trim().is_empty() { "application/octet-stream" } else { mime_type };
        Self::Inline {
            data_url: format!("data:{mime_type};base64,{}", general_purpose::STANDARD.encode(bytes)),
        }
    }

    /// Resolve either representation to the certificate bytes.
    ///
    /// # Errors
    /// Returns [`PortalError::Storage`] when a stored key cannot be loaded or
    /// is missing, or when an inline payload is not a base64 data URL.
    pub fn resolve(&self, blobs: Option<&dyn BlobStore>) -> Result<Vec<u8>, PortalError> {
        match self {
            Self::Stored { storage_key } => {
                let Some(blobs) = blobs else {
                    return Err(PortalError::Storage("blob store unavailable".to_string()));
                };
                blobs.load_blob(storage_key)?.ok_or_else(|| {
                    PortalError::Storage(format!("certificate blob missing: {storage_key}"))
                })
            }
            Self::Inline { data_url } => decode_data_url(data_url),
        }
    }

    #[must_use]
    pub fn storage_key(&self) -> Option<&str> {
        match self {
            Self::Stored { storage_key } => Some(storage_key),
            Self::Inline { .. } => None,
        }
    }
}

/// # Errors
/// Returns [`PortalError::Storage`] when the input is not a base64 data URL.
pub fn decode_data_url(data_url: &str) -> Result<Vec<u8>, PortalError> {
    let payload = data_url
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(";base64,"))
        .map(|(_, payload)| payload)
        .ok_or_else(|| PortalError::Storage("inline certificate is not a base64 data URL".to_string()))?;
    general_purpose::STANDARD.decode(payload).map_err(PortalError::storage)
}

#[must_use]
pub fn certificate_blob_key(student_id: &str, belt_slug: &str) -> String {
    format!("{student_id}::{belt_slug}")
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum CertificateSource {
    Local,
    Server,
}

impl CertificateSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Server => "server",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRecord {
    pub belt: String,
    pub belt_slug: String,
    #[serde(with = "time::serde::rfc3339")]
    pub uploaded_at: OffsetDateTime,
    pub file_name: String,
    #[serde(default)]
    pub file_type: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub file: Option<StoredFile>,
    pub source: CertificateSource,
    pub pending_sync: bool,
}

impl CertificateRecord {
    /// A freshly uploaded record awaiting server acknowledgement.
    #[must_use]
    pub fn local_upload(
        belt: &str,
        belt_slug: &str,
        uploaded_at: OffsetDateTime,
        file_name: &str,
        file_type: &str,
        file_size: u64,
        file: Option<StoredFile>,
    ) -> Self {
        Self {
            belt: belt.to_string(),
            belt_slug: belt_slug.to_string(),
            uploaded_at,
            file_name: file_name.to_string(),
            file_type: file_type.to_string(),
            file_size,
            file,
            source: CertificateSource::Local,
            pending_sync: true,
        }
    }

    #[must_use]
    pub fn has_file(&self) -> bool {
        self.file.is_some()
    }

    pub fn mark_synced(&mut self) {
        self.source = CertificateSource::Server;
        self.pending_sync = false;
    }

    /// Merge a new upload over an existing record for the same belt. The new
    /// upload's metadata wins; an existing file reference is kept when the new
    /// attempt produced none.
    #[must_use]
    pub fn merge_upload(existing: Option<&Self>, incoming: Self) -> Self {
        let file = incoming.file.clone().or_else(|| existing.and_then(|record| record.file.clone()));
        Self { file, ..incoming }
    }

    /// # Errors
    /// Returns [`PortalError::Validation`] when a server-sourced record is
    /// still flagged as pending or required fields are empty.
    pub fn validate(&self) -> Result<(), PortalError> {
        if self.belt_slug.trim().is_empty() {
            return Err(PortalError::Validation("certificate belt_slug must be non-empty".to_string()));
        }
        if self.file_name.trim().is_empty() {
            return Err(PortalError::Validation("certificate file_name must be non-empty".to_string()));
        }
        if self.source == CertificateSource::Server && self.pending_sync {
            return Err(PortalError::Validation(
                "server-sourced certificate cannot be pending sync".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;
    use crate::persist::MemoryBlobStore;

    fn fixture_time() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + Duration::seconds(1_760_000_000)
    }

    fn upload(file: Option<StoredFile>, name: &str) -> CertificateRecord {
        CertificateRecord::local_upload(
            "Yellow Belt",
            "yellow",
            fixture_time(),
            name,
            "image/png",
            2048,
            file,
        )
    }

    #[test]
    fn merge_never_drops_an_existing_file() {
        let existing = upload(
            Some(StoredFile::Stored { storage_key: certificate_blob_key("S-1", "yellow") }),
            "first.png",
        );
        let merged = CertificateRecord::merge_upload(Some(&existing), upload(None, "second.png"));
        assert_eq!(merged.file_name, "second.png");
        assert_eq!(merged.file, existing.file);
        assert!(merged.has_file());
    }

    #[test]
    fn merge_prefers_the_new_file_when_present() {
        let existing = upload(Some(StoredFile::inline("image/png", b"old")), "first.png");
        let fresh = StoredFile::Stored { storage_key: "S-1::yellow".to_string() };
        let merged = CertificateRecord::merge_upload(Some(&existing), upload(Some(fresh.clone()), "b.png"));
        assert_eq!(merged.file, Some(fresh));
    }

    #[test]
    fn server_record_must_not_be_pending() {
        let mut record = upload(None, "cert.png");
        assert!(record.validate().is_ok());
        record.source = CertificateSource::Server;
        assert!(record.validate().is_err());
        record.mark_synced();
        assert!(record.validate().is_ok());
    }

    #[test]
    fn stored_file_resolves_both_variants() {
        let inline = StoredFile::inline("image/jpeg", b"jpeg-bytes");
        assert_eq!(inline.resolve(None).unwrap_or_else(|_| unreachable!()), b"jpeg-bytes".to_vec());

        let mut blobs = MemoryBlobStore::new();
        assert!(blobs.save_blob("S-1::green", b"png-bytes").is_ok());
        let stored = StoredFile::Stored { storage_key: "S-1::green".to_string() };
        assert_eq!(
            stored.resolve(Some(&blobs as &dyn BlobStore)).unwrap_or_else(|_| unreachable!()),
            b"png-bytes".to_vec()
        );
        assert!(stored.resolve(None).is_err());
        assert!(decode_data_url("not-a-data-url").is_err());
    }

    #[test]
    fn record_json_uses_tagged_file_union() {
        let record = upload(Some(StoredFile::Stored { storage_key: "S-1::yellow".to_string() }), "c.png");
        let json = serde_json::to_value(&record).unwrap_or_else(|_| unreachable!());
        assert_eq!(json["file"], serde_json::json!({"kind": "stored", "storageKey": "S-1::yellow"}));
        assert_eq!(json["pendingSync"], serde_json::json!(true));
        assert_eq!(json["source"], serde_json::json!("local"));
    }
}
