use serde::{Deserialize, Serialize};

pub const MAX_CERTIFICATE_BYTES: u64 = 10 * 1024 * 1024;

/// Phrases expected on a genuine studio certificate; at least half must be
/// recognized when text recognition is available.
pub const VERIFICATION_KEYWORDS: [&str; 6] =
    ["certificate", "promotion", "master ara", "belt", "date of examination", "taekwondo"];

const IMAGE_EXTENSIONS: [(&str, &str); 6] = [
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("heic", "image/heic"),
    ("heif", "image/heif"),
    ("webp", "image/webp"),
];

/// A certificate file as handed over by the user.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CertificateFile {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl CertificateFile {
    /// Build a file, inferring the MIME type from the extension when the
    /// caller has none.
    #[must_use]
    pub fn new(file_name: &str, mime_type: Option<&str>, bytes: Vec<u8>) -> Self {
        let mime_type = mime_type
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map_or_else(|| mime_from_extension(file_name).to_string(), str::to_ascii_lowercase);
        Self { file_name: file_name.to_string(), mime_type, bytes }
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        u64::try_from(self.bytes.len()).unwrap_or(u64::MAX)
    }
}

fn extension(file_name: &str) -> String {
    file_name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()).unwrap_or_default()
}

#[must_use]
pub fn mime_from_extension(file_name: &str) -> &'static str {
    let ext = extension(file_name);
    if ext == "pdf" {
        return "application/pdf";
    }
    IMAGE_EXTENSIONS
        .iter()
        .find(|(candidate, _)| *candidate == ext)
        .map_or("application/octet-stream", |(_, mime)| *mime)
}

/// Optional text recognition capability used to verify certificate photos.
pub trait TextRecognizer {
    /// Recognized text, or `None` when recognition is unavailable or failed.
    fn recognize(&self, file: &CertificateFile) -> Option<String>;
}

/// Always-pass capability selected when no recognizer is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTextRecognition;

impl TextRecognizer for NoTextRecognition {
    fn recognize(&self, _file: &CertificateFile) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, Copy, thiserror::Error, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum UploadRejection {
    #[error("Certificate photos must be 10 MB or smaller.")]
    TooLarge,
    #[error("PDF certificates can't be verified. Upload a photo (JPG, PNG, HEIC) of your certificate instead.")]
    PdfNotSupported,
    #[error("Use an image format (JPG, PNG, HEIC, WEBP) for certificate uploads.")]
    WrongFormat,
    #[error("We could not verify this document as a belt certificate.")]
    Unverifiable,
    #[error("We couldn't process that file. Please try again.")]
    ProcessingFailed,
}

#[must_use]
pub fn keyword_matches(text: &str) -> usize {
    let normalized = text.to_lowercase();
    VERIFICATION_KEYWORDS.iter().filter(|keyword| normalized.contains(*keyword)).count()
}

/// Size, format and (when recognition is available) content checks.
///
/// # Errors
/// Returns the first [`UploadRejection`] that applies.
pub fn validate_certificate(
    file: &CertificateFile,
    recognizer: &dyn TextRecognizer,
) -> Result<(), UploadRejection> {
    if file.size() > MAX_CERTIFICATE_BYTES {
        return Err(UploadRejection::TooLarge);
    }
    if file.mime_type == "application/pdf" || extension(&file.file_name) == "pdf" {
        return Err(UploadRejection::PdfNotSupported);
    }
    if !file.mime_type.starts_with("image/") {
        return Err(UploadRejection::WrongFormat);
    }
    if let Some(text) = recognizer.recognize(file) {
        let required = VERIFICATION_KEYWORDS.len().div_ceil(2);
        if keyword_matches(&text) < required {
            return Err(UploadRejection::Unverifiable);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedText(&'static str);

    impl TextRecognizer for FixedText {
        fn recognize(&self, _file: &CertificateFile) -> Option<String> {
            Some(self.0.to_string())
        }
    }

    fn photo(size: usize) -> CertificateFile {
        CertificateFile::new("yellow.jpg", None, vec![0_u8; size])
    }

    // Test IDs: TUPL-001
    #[test]
    fn size_cap_is_ten_mebibytes() {
        let limit = usize::try_from(MAX_CERTIFICATE_BYTES).unwrap_or(usize::MAX);
        assert_eq!(validate_certificate(&photo(limit), &NoTextRecognition), Ok(()));
        assert_eq!(
            validate_certificate(&photo(limit + 1), &NoTextRecognition),
            Err(UploadRejection::TooLarge)
        );
    }

    // Test IDs: TUPL-002
    #[test]
    fn pdf_gets_its_own_message() {
        let pdf = CertificateFile::new("cert.pdf", Some("application/pdf"), vec![1, 2, 3]);
        let rejection = validate_certificate(&pdf, &NoTextRecognition);
        assert_eq!(rejection, Err(UploadRejection::PdfNotSupported));
        assert!(UploadRejection::PdfNotSupported.to_string().contains("Upload a photo"));

        let doc = CertificateFile::new("cert.docx", None, vec![1]);
        assert_eq!(validate_certificate(&doc, &NoTextRecognition), Err(UploadRejection::WrongFormat));
    }

    // Test IDs: TUPL-003
    #[test]
    fn recognition_requires_half_the_keywords() {
        let file = photo(16);
        let weak = FixedText("Certificate of Belt");
        assert_eq!(validate_certificate(&file, &weak), Err(UploadRejection::Unverifiable));

        let strong = FixedText("TAEKWONDO Certificate of Promotion - Yellow Belt");
        assert_eq!(validate_certificate(&file, &strong), Ok(()));
    }

    #[test]
    fn mime_type_is_inferred_from_extension() {
        assert_eq!(CertificateFile::new("IMG_0001.HEIC", None, Vec::new()).mime_type, "image/heic");
        assert_eq!(CertificateFile::new("scan.png", Some(" IMAGE/PNG "), Vec::new()).mime_type, "image/png");
        assert_eq!(mime_from_extension("notes"), "application/octet-stream");
    }
}
