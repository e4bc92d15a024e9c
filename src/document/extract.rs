use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::core::errors::PipelineError;

const PDF_MAGIC: &[u8] = b"%PDF-";
const FORM_FEED: char = '\u{c}';

/// Turns a stored upload into plain text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<String, PipelineError>;
}

/// PDFs go through `pdftotext` (poppler); anything else must be UTF-8 text.
#[derive(Debug, Clone)]
pub struct FileTextExtractor {
    pdftotext: String,
}

impl FileTextExtractor {
    pub fn new(pdftotext: impl Into<String>) -> Self {
        Self {
            pdftotext: pdftotext.into(),
        }
    }

    async fn extract_pdf(&self, path: &Path) -> Result<String, PipelineError> {
        let output = Command::new(&self.pdftotext)
            .arg("-enc")
            .arg("UTF-8")
            .arg(path)
            .arg("-")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| {
                tracing::warn!(binary = %self.pdftotext, error = %err, "failed to run pdftotext");
                extraction_error(
                    path,
                    format!("could not run '{}' (is poppler installed?): {}", self.pdftotext, err),
                )
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(status = %output.status, "pdftotext failed: {}", stderr.trim());
            return Err(extraction_error(
                path,
                format!("pdftotext exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        // page breaks become paragraph breaks for the chunker
        Ok(text.replace(FORM_FEED, "\n\n"))
    }
}

#[async_trait]
impl TextExtractor for FileTextExtractor {
    async fn extract(&self, path: &Path) -> Result<String, PipelineError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|err| extraction_error(path, format!("failed to read file: {}", err)))?;

        let text = if is_pdf(path, &bytes) {
            self.extract_pdf(path).await?
        } else {
            String::from_utf8(bytes)
                .map_err(|_| extraction_error(path, "file is neither a PDF nor UTF-8 text".into()))?
        };

        if text.trim().is_empty() {
            tracing::warn!(path = %path.display(), "extracted text is empty");
        } else {
            tracing::info!(
                path = %path.display(),
                chars = text.chars().count(),
                "extracted document text"
            );
        }
        Ok(text)
    }
}

fn is_pdf(path: &Path, bytes: &[u8]) -> bool {
    bytes.starts_with(PDF_MAGIC)
        || path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

fn extraction_error(path: &Path, message: String) -> PipelineError {
    PipelineError::Extraction {
        path: path.display().to_string(),
        message,
    }
}
