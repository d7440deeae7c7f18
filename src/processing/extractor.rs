//! Text extraction from content units.

use async_trait::async_trait;

use super::units::ContentUnit;
use crate::core::errors::RagError;

/// Text pulled out of a content unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub full_text: String,
    pub page_count: Option<i64>,
}

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, unit: &ContentUnit) -> Result<Extracted, RagError>;
}

/// Uses text already stored on the unit, or reads a UTF-8 file from its
/// `file_path`. Binary formats need their own extractor.
#[derive(Debug, Clone, Default)]
pub struct PlainTextExtractor;

#[async_trait]
impl Extractor for PlainTextExtractor {
    async fn extract(&self, unit: &ContentUnit) -> Result<Extracted, RagError> {
        if let Some(text) = unit.full_text.as_deref().filter(|t| !t.trim().is_empty()) {
            return Ok(Extracted {
                full_text: text.to_string(),
                page_count: unit.page_count.or_else(|| Some(page_count(text))),
            });
        }

        let path = unit.file_path.as_deref().ok_or_else(|| {
            RagError::Extraction(format!("{} {} has neither text nor a file", unit.kind, unit.id))
        })?;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| RagError::Extraction(format!("cannot read {}: {}", path, e)))?;
        let text = String::from_utf8(bytes)
            .map_err(|_| RagError::Extraction(format!("{} is not valid UTF-8 text", path)))?;

        Ok(Extracted {
            page_count: Some(page_count(&text)),
            full_text: text,
        })
    }
}

/// Pages are separated by form feeds.
fn page_count(text: &str) -> i64 {
    text.matches('\u{c}').count() as i64 + 1
}
