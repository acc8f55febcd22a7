use std::path::PathBuf;
use std::process::Command;

use dojo_portal_core::{CertificateFile, TextRecognizer};

/// Text recognition through an external program invoked as
/// `<program> <image-path>`, which prints the recognized text on stdout.
#[derive(Debug, Clone)]
pub struct CommandOcr {
    program: PathBuf,
}

impl CommandOcr {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }

    fn scratch_path(file: &CertificateFile) -> PathBuf {
        let extension = file.file_name.rsplit_once('.').map_or("img", |(_, ext)| ext);
        std::env::temp_dir().join(format!("dojo-portal-ocr-{}.{extension}", ulid::Ulid::new()))
    }
}

impl TextRecognizer for CommandOcr {
    fn recognize(&self, file: &CertificateFile) -> Option<String> {
        let path = Self::scratch_path(file);
        if let Err(err) = std::fs::write(&path, &file.bytes) {
            tracing::warn!(error = %err, "could not stage certificate for text recognition");
            return None;
        }

        let output = Command::new(&self.program).arg(&path).output();
        let _ = std::fs::remove_file(&path);

        match output {
            Ok(output) if output.status.success() => Some(String::from_utf8_lossy(&output.stdout).into_owned()),
            Ok(output) => {
                tracing::warn!(status = %output.status, "text recognition exited unsuccessfully; skipping check");
                None
            }
            Err(err) => {
                tracing::warn!(error = %err, program = %self.program.display(), "text recognition unavailable");
                None
            }
        }
    }
}
