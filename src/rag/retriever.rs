//! Context retriever.
//!
//! Turns a question plus a scope into a ranked, size-bounded context block:
//! 1. Embed the query (on failure, fall back to lexical search only)
//! 2. Search every collection the scope covers, concurrently
//! 3. Blend similarity and lexical scores per chunk and rank
//! 4. Keep chunks until the character budget is reached
//! 5. Merge adjacent chunks of a unit into excerpts with provenance

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::time::{timeout_at, Instant};

use super::store::ChunkStore;
use super::types::{CollectionScope, ContentKind, ScoredChunk, StoredChunk};
use crate::core::config::RetrievalSettings;
use crate::core::errors::RagError;
use crate::embedding::EmbeddingGateway;

/// What a question is asked about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScopeDescriptor {
    /// Sources of a notebook (optionally a subset) plus its minutes.
    Notebook {
        notebook_id: String,
        #[serde(default)]
        source_ids: Option<Vec<String>>,
    },
    /// Agenda materials and minutes of a council meeting.
    Meeting { meeting_id: String },
    /// An explicit subset of one collection.
    Units {
        kind: ContentKind,
        unit_ids: Vec<String>,
    },
}

impl ScopeDescriptor {
    pub fn collections(&self) -> Vec<CollectionScope> {
        match self {
            ScopeDescriptor::Notebook {
                notebook_id,
                source_ids,
            } => {
                let mut sources = CollectionScope::notebook(ContentKind::Source, notebook_id.clone());
                if let Some(ids) = source_ids {
                    sources = sources.with_unit_ids(ids.clone());
                }
                vec![
                    sources,
                    CollectionScope::notebook(ContentKind::Minute, notebook_id.clone()),
                ]
            }
            ScopeDescriptor::Meeting { meeting_id } => vec![
                CollectionScope::meeting(ContentKind::AgendaMaterial, meeting_id.clone()),
                CollectionScope::meeting(ContentKind::Minute, meeting_id.clone()),
            ],
            ScopeDescriptor::Units { kind, unit_ids } => {
                vec![CollectionScope::units(*kind, unit_ids.clone())]
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetrieveOptions {
    /// Overall deadline; the configured retrieval timeout when unset.
    pub timeout: Option<Duration>,
    /// Return what was gathered when the deadline passes instead of failing.
    pub allow_partial: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub kind: ContentKind,
    pub unit_id: String,
    pub title: String,
    pub chunk_id: i64,
    pub chunk_index: usize,
    pub content: String,
    pub score: f32,
    pub similarity: Option<f32>,
    pub lexical: Option<f32>,
}

/// Consecutive selected chunks of one unit, joined.
#[derive(Debug, Clone, Serialize)]
pub struct ContextExcerpt {
    pub kind: ContentKind,
    pub unit_id: String,
    pub title: String,
    pub first_index: usize,
    pub last_index: usize,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Provenance {
    pub kind: ContentKind,
    pub unit_id: String,
    pub title: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ContextBundle {
    pub results: Vec<RetrievalResult>,
    pub excerpts: Vec<ContextExcerpt>,
    pub prompt_text: String,
    pub provenance: Vec<Provenance>,
    /// Query embedding failed; results come from lexical search only.
    pub degraded: bool,
    /// The deadline passed and the caller accepted partial results.
    pub partial: bool,
}

impl ContextBundle {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
enum SearchMode {
    Similarity,
    Lexical,
}

struct Candidate {
    chunk: StoredChunk,
    similarity: Option<f32>,
    lexical: Option<f32>,
    score: f32,
}

pub struct ContextRetriever {
    store: Arc<dyn ChunkStore>,
    gateway: Arc<EmbeddingGateway>,
    settings: RetrievalSettings,
    overlap: usize,
}

impl ContextRetriever {
    /// `overlap` is the chunker overlap, used to de-duplicate adjacent chunks.
    pub fn new(
        store: Arc<dyn ChunkStore>,
        gateway: Arc<EmbeddingGateway>,
        settings: RetrievalSettings,
        overlap: usize,
    ) -> Self {
        Self {
            store,
            gateway,
            settings,
            overlap,
        }
    }

    pub fn settings(&self) -> &RetrievalSettings {
        &self.settings
    }

    pub async fn retrieve(
        &self,
        query: &str,
        scope: &ScopeDescriptor,
        top_k: usize,
        max_chars: usize,
        options: RetrieveOptions,
    ) -> Result<ContextBundle, RagError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::InvalidInput("query must not be empty".to_string()));
        }

        let collections: Vec<CollectionScope> = scope
            .collections()
            .into_iter()
            .filter(|collection| !collection.is_empty())
            .collect();
        if collections.is_empty() || top_k == 0 || max_chars == 0 {
            return Ok(ContextBundle::default());
        }

        let deadline = Instant::now() + options.timeout.unwrap_or(self.settings.timeout);
        let mut bundle = ContextBundle::default();

        let query_vector = match timeout_at(deadline, self.gateway.embed_query(query)).await {
            Ok(Ok(vector)) => Some(vector),
            Ok(Err(err)) => {
                tracing::warn!(
                    error = %err,
                    "Query embedding failed; continuing with lexical search only"
                );
                bundle.degraded = true;
                None
            }
            Err(_) => return self.deadline_reached(bundle, &options),
        };

        let run_lexical = self.settings.lexical_enabled || query_vector.is_none();
        // Fetch more than `top_k` per search so blending can reorder candidates.
        let candidates_k = top_k.saturating_mul(2);

        let mut searches: FuturesUnordered<
            BoxFuture<'_, (SearchMode, Result<Vec<ScoredChunk>, RagError>)>,
        > = FuturesUnordered::new();
        for collection in &collections {
            if let Some(vector) = &query_vector {
                searches.push(
                    self.store
                        .similarity_search(vector, collection, candidates_k)
                        .map(|result| (SearchMode::Similarity, result))
                        .boxed(),
                );
            }
            if run_lexical {
                searches.push(
                    self.store
                        .lexical_search(query, collection, candidates_k)
                        .map(|result| (SearchMode::Lexical, result))
                        .boxed(),
                );
            }
        }

        let mut merged: HashMap<(ContentKind, i64), Candidate> = HashMap::new();
        loop {
            match timeout_at(deadline, searches.next()).await {
                Ok(Some((mode, Ok(hits)))) => merge_hits(&mut merged, mode, hits),
                Ok(Some((mode, Err(err)))) => {
                    tracing::error!(?mode, error = %err, "Chunk search failed");
                    return Err(RagError::Retrieval(err.to_string()));
                }
                Ok(None) => break,
                Err(_) => {
                    if !options.allow_partial {
                        return Err(RagError::RetrievalTimeout);
                    }
                    tracing::warn!(
                        pending = searches.len(),
                        "Retrieval deadline reached; returning partial results"
                    );
                    bundle.partial = true;
                    break;
                }
            }
        }
        drop(searches);

        let blend = query_vector.is_some() && self.settings.lexical_enabled;
        let weight = self.settings.similarity_weight.clamp(0.0, 1.0);
        let mut ranked: Vec<Candidate> = merged
            .into_values()
            .map(|mut candidate| {
                candidate.score = if blend {
                    weight * candidate.similarity.unwrap_or(0.0).max(0.0)
                        + (1.0 - weight) * candidate.lexical.unwrap_or(0.0)
                } else if query_vector.is_some() {
                    candidate.similarity.unwrap_or(0.0)
                } else {
                    candidate.lexical.unwrap_or(0.0)
                };
                candidate
            })
            .collect();
        ranked.sort_by(compare_candidates);
        ranked.truncate(top_k);

        let mut used = 0;
        for candidate in ranked {
            let length = candidate.chunk.content.chars().count();
            if used + length > max_chars {
                break;
            }
            used += length;
            bundle.results.push(RetrievalResult {
                kind: candidate.chunk.kind,
                unit_id: candidate.chunk.unit_id,
                title: candidate.chunk.unit_title,
                chunk_id: candidate.chunk.chunk_id,
                chunk_index: candidate.chunk.chunk_index,
                content: candidate.chunk.content,
                score: candidate.score,
                similarity: candidate.similarity,
                lexical: candidate.lexical,
            });
        }

        bundle.excerpts = merge_excerpts(&bundle.results, self.overlap);
        bundle.prompt_text = format_prompt(&bundle.excerpts);
        bundle.provenance = provenance(&bundle.results);

        tracing::info!(
            collections = collections.len(),
            results = bundle.results.len(),
            chars = used,
            degraded = bundle.degraded,
            partial = bundle.partial,
            "Context retrieved"
        );
        Ok(bundle)
    }

    fn deadline_reached(
        &self,
        mut bundle: ContextBundle,
        options: &RetrieveOptions,
    ) -> Result<ContextBundle, RagError> {
        if options.allow_partial {
            tracing::warn!("Retrieval deadline reached while embedding the query");
            bundle.partial = true;
            Ok(bundle)
        } else {
            Err(RagError::RetrievalTimeout)
        }
    }
}

fn merge_hits(
    merged: &mut HashMap<(ContentKind, i64), Candidate>,
    mode: SearchMode,
    hits: Vec<ScoredChunk>,
) {
    for hit in hits {
        let entry = merged
            .entry((hit.chunk.kind, hit.chunk.chunk_id))
            .or_insert_with(|| Candidate {
                chunk: hit.chunk,
                similarity: None,
                lexical: None,
                score: 0.0,
            });
        match mode {
            SearchMode::Similarity => entry.similarity = Some(hit.score),
            SearchMode::Lexical => entry.lexical = Some(hit.score),
        }
    }
}

fn compare_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.chunk.kind.priority().cmp(&b.chunk.kind.priority()))
        .then_with(|| a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
        .then_with(|| a.chunk.unit_id.cmp(&b.chunk.unit_id))
        .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
}

/// Group selected chunks into runs of consecutive indices per unit. Excerpts
/// keep the rank of their best chunk.
fn merge_excerpts(results: &[RetrievalResult], overlap: usize) -> Vec<ContextExcerpt> {
    let mut by_unit: BTreeMap<(ContentKind, &str), Vec<(usize, &RetrievalResult)>> = BTreeMap::new();
    for (rank, result) in results.iter().enumerate() {
        by_unit
            .entry((result.kind, result.unit_id.as_str()))
            .or_default()
            .push((rank, result));
    }

    let mut ranked_excerpts: Vec<(usize, ContextExcerpt)> = Vec::new();
    for (_, mut members) in by_unit {
        members.sort_by_key(|(_, result)| result.chunk_index);

        let mut current: Option<(usize, ContextExcerpt)> = None;
        for (rank, result) in members {
            let extends = current
                .as_ref()
                .is_some_and(|(_, excerpt)| excerpt.last_index + 1 == result.chunk_index);
            if extends {
                if let Some((best, excerpt)) = current.as_mut() {
                    join_overlapping(&mut excerpt.content, &result.content, overlap);
                    excerpt.last_index = result.chunk_index;
                    *best = (*best).min(rank);
                }
                continue;
            }

            if let Some(done) = current.take() {
                ranked_excerpts.push(done);
            }
            current = Some((
                rank,
                ContextExcerpt {
                    kind: result.kind,
                    unit_id: result.unit_id.clone(),
                    title: result.title.clone(),
                    first_index: result.chunk_index,
                    last_index: result.chunk_index,
                    content: result.content.clone(),
                },
            ));
        }
        if let Some(done) = current {
            ranked_excerpts.push(done);
        }
    }

    ranked_excerpts.sort_by_key(|(rank, _)| *rank);
    ranked_excerpts.into_iter().map(|(_, excerpt)| excerpt).collect()
}

/// Append `next`, emitting the shared overlap once when it matches exactly.
fn join_overlapping(content: &mut String, next: &str, overlap: usize) {
    if overlap > 0 {
        let tail_start = content
            .char_indices()
            .rev()
            .nth(overlap - 1)
            .map(|(pos, _)| pos);
        let head_end = next
            .char_indices()
            .nth(overlap)
            .map(|(pos, _)| pos)
            .or_else(|| (next.chars().count() == overlap).then_some(next.len()));
        if let (Some(tail_start), Some(head_end)) = (tail_start, head_end) {
            if content[tail_start..] == next[..head_end] {
                content.push_str(&next[head_end..]);
                return;
            }
        }
    }
    content.push('\n');
    content.push_str(next);
}

fn format_prompt(excerpts: &[ContextExcerpt]) -> String {
    excerpts
        .iter()
        .enumerate()
        .map(|(i, excerpt)| {
            format!(
                "[{}] (Source: {}, {})\n{}",
                i + 1,
                excerpt.title,
                excerpt.kind,
                excerpt.content.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn provenance(results: &[RetrievalResult]) -> Vec<Provenance> {
    let mut seen = HashSet::new();
    results
        .iter()
        .filter(|result| seen.insert((result.kind, result.unit_id.as_str())))
        .map(|result| Provenance {
            kind: result.kind,
            unit_id: result.unit_id.clone(),
            title: result.title.clone(),
        })
        .collect()
}
