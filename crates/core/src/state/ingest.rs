//! # Plain-Text Ingestion
//!
//! Normalizes a blueprint or research document and splits it into
//! overlapping chunks for the planning stages. Line breaks survive
//! normalization because the planner classifies input line by line.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use super::plan::{DocumentStats, IngestionResponse};
use super::store::PlanStore;
use crate::error::WorkflowError;

pub const CHUNK_CHAR_LIMIT: usize = 1200;
pub const CHUNK_OVERLAP: usize = 200;

static HORIZONTAL_WS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\S\n]+").expect("valid regex"));

/// Normalized text split into chunks
#[derive(Debug, Clone, PartialEq)]
pub struct IngestedDocument {
    pub text: String,
    pub chunks: Vec<String>,
    pub stats: DocumentStats,
}

/// Normalize `text`: invisible characters become spaces, horizontal
/// whitespace collapses, lines are trimmed and blank lines dropped.
pub fn normalize_text(text: &str) -> String {
    let replaced: String = text
        .chars()
        .map(|c| match c {
            '\u{200b}' | '\u{200c}' | '\u{200d}' | '\u{2060}' | '\u{feff}' | '\0' => ' ',
            '\r' => '\n',
            other => other,
        })
        .collect();
    replaced
        .lines()
        .map(|line| HORIZONTAL_WS.replace_all(line, " ").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Split into windows of at most [`CHUNK_CHAR_LIMIT`] characters that
/// overlap by [`CHUNK_OVERLAP`]. Empty windows are dropped.
pub fn chunk_text(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + CHUNK_CHAR_LIMIT).min(chars.len());
        let chunk: String = chars[start..end].iter().collect();
        let trimmed = chunk.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }
        if end == chars.len() {
            break;
        }
        start = end.saturating_sub(CHUNK_OVERLAP);
    }
    chunks
}

/// Drop exact duplicates, keeping first occurrences.
pub fn dedupe_chunks(chunks: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    chunks
        .into_iter()
        .filter(|chunk| seen.insert(chunk.clone()))
        .collect()
}

pub fn ingest_text(text: &str) -> IngestedDocument {
    let normalized = normalize_text(text);
    let chunks = dedupe_chunks(chunk_text(&normalized));
    let stats = DocumentStats {
        word_count: normalized.split_whitespace().count(),
        char_count: normalized.chars().count(),
        chunk_count: chunks.len(),
    };
    IngestedDocument {
        text: normalized,
        chunks,
        stats,
    }
}

/// Ingest `text` as a new run in `store`.
pub fn ingest_into(
    store: &dyn PlanStore,
    text: &str,
    source: Option<&str>,
) -> Result<IngestionResponse, WorkflowError> {
    let run_id = Uuid::new_v4().to_string();
    tracing::info!(
        event = "ingest.start",
        run_id = %run_id,
        source = source.unwrap_or("inline"),
        chars = text.len(),
        "Ingesting document"
    );
    let document = ingest_text(text);
    if document.chunks.is_empty() {
        return Err(WorkflowError::invalid_input("Document contains no text."));
    }

    store.register_run(&run_id, source, &document.stats)?;
    store.add_chunks(&run_id, &document.chunks)?;

    tracing::info!(
        event = "ingest.complete",
        run_id = %run_id,
        source = source.unwrap_or("inline"),
        words = document.stats.word_count,
        chunks = document.stats.chunk_count,
        "Document ingested"
    );

    Ok(IngestionResponse {
        run_id,
        stats: document.stats,
    })
}
