//! Shared types for chunk storage and retrieval.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::errors::RagError;

/// The three kinds of ingestible content. Each kind owns its own unit and
/// chunk tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Source,
    Minute,
    AgendaMaterial,
}

impl ContentKind {
    pub const ALL: [ContentKind; 3] = [
        ContentKind::Source,
        ContentKind::Minute,
        ContentKind::AgendaMaterial,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Source => "source",
            ContentKind::Minute => "minute",
            ContentKind::AgendaMaterial => "agenda_material",
        }
    }

    pub fn units_table(&self) -> &'static str {
        match self {
            ContentKind::Source => "source_units",
            ContentKind::Minute => "minute_units",
            ContentKind::AgendaMaterial => "agenda_material_units",
        }
    }

    pub fn chunks_table(&self) -> &'static str {
        match self {
            ContentKind::Source => "source_chunks",
            ContentKind::Minute => "minute_chunks",
            ContentKind::AgendaMaterial => "agenda_material_chunks",
        }
    }

    /// Rank used to break score ties across collections (lower wins).
    /// Meeting materials come before minutes.
    pub fn priority(&self) -> u8 {
        match self {
            ContentKind::AgendaMaterial => 0,
            ContentKind::Source => 1,
            ContentKind::Minute => 2,
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = RagError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().replace('-', "_").as_str() {
            "source" | "sources" => Ok(ContentKind::Source),
            "minute" | "minutes" => Ok(ContentKind::Minute),
            "agenda_material" | "agenda_materials" | "material" | "materials" => {
                Ok(ContentKind::AgendaMaterial)
            }
            other => Err(RagError::InvalidInput(format!(
                "unknown content kind '{}'",
                other
            ))),
        }
    }
}

/// One chunk handed to the store for a content unit.
#[derive(Debug, Clone)]
pub struct ChunkInput {
    pub index: usize,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
}

/// A persisted chunk joined with the provenance of its content unit.
#[derive(Debug, Clone, Serialize)]
pub struct StoredChunk {
    pub chunk_id: i64,
    pub kind: ContentKind,
    pub unit_id: String,
    pub chunk_index: usize,
    pub content: String,
    pub unit_title: String,
    pub unit_created_at: String,
}

/// Result of a similarity or lexical search.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: StoredChunk,
    /// Higher is more relevant.
    pub score: f32,
}

/// Restricts a search to one chunk collection. Every filter that is set must
/// match; a scope with no filter matches nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionScope {
    pub kind: ContentKind,
    pub notebook_id: Option<String>,
    pub meeting_id: Option<String>,
    pub unit_ids: Option<Vec<String>>,
}

impl CollectionScope {
    pub fn notebook(kind: ContentKind, notebook_id: impl Into<String>) -> Self {
        Self {
            kind,
            notebook_id: Some(notebook_id.into()),
            meeting_id: None,
            unit_ids: None,
        }
    }

    pub fn meeting(kind: ContentKind, meeting_id: impl Into<String>) -> Self {
        Self {
            kind,
            notebook_id: None,
            meeting_id: Some(meeting_id.into()),
            unit_ids: None,
        }
    }

    pub fn units(kind: ContentKind, unit_ids: Vec<String>) -> Self {
        Self {
            kind,
            notebook_id: None,
            meeting_id: None,
            unit_ids: Some(unit_ids),
        }
    }

    pub fn with_unit_ids(mut self, unit_ids: Vec<String>) -> Self {
        self.unit_ids = Some(unit_ids);
        self
    }

    /// True when the scope cannot match any chunk.
    pub fn is_empty(&self) -> bool {
        let unfiltered =
            self.notebook_id.is_none() && self.meeting_id.is_none() && self.unit_ids.is_none();
        let no_units = self.unit_ids.as_ref().is_some_and(|ids| ids.is_empty());
        unfiltered || no_units
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parses_route_spellings() {
        assert_eq!("sources".parse::<ContentKind>().unwrap(), ContentKind::Source);
        assert_eq!("Minutes".parse::<ContentKind>().unwrap(), ContentKind::Minute);
        assert_eq!(
            "agenda-materials".parse::<ContentKind>().unwrap(),
            ContentKind::AgendaMaterial
        );
        assert!("slides".parse::<ContentKind>().is_err());
    }

    #[test]
    fn materials_outrank_minutes() {
        assert!(ContentKind::AgendaMaterial.priority() < ContentKind::Minute.priority());
    }

    #[test]
    fn unfiltered_or_empty_scopes_match_nothing() {
        let unfiltered = CollectionScope {
            kind: ContentKind::Source,
            notebook_id: None,
            meeting_id: None,
            unit_ids: None,
        };
        assert!(unfiltered.is_empty());
        assert!(CollectionScope::units(ContentKind::Source, vec![]).is_empty());
        assert!(!CollectionScope::notebook(ContentKind::Source, "nb-1").is_empty());
        assert!(CollectionScope::notebook(ContentKind::Source, "nb-1")
            .with_unit_ids(vec![])
            .is_empty());
    }
}
