//! Retrieval subsystem: best-effort book context for a user message
//!
//! Queries the configured vector store and turns the hits into
//! [`ContextChunk`]s. Every failure degrades to an empty context so the
//! conversation continues without book grounding:
//! - no store configured or no provider client → empty, warning
//! - "store not found" (404, `not_found` code, or message match) → empty, warning
//! - any other provider error → empty, error log

use bookchat_core::vector_store::{clamp_top_k, ContextChunk, VectorSearch};

/// Default number of passages requested per question.
pub const DEFAULT_TOP_K: u32 = 5;

pub async fn retrieve_book_context(
    search: Option<&dyn VectorSearch>,
    vector_store_id: Option<&str>,
    query: &str,
    top_k: u32,
) -> Vec<ContextChunk> {
    let Some(store_id) = vector_store_id else {
        tracing::warn!("No vector store ID configured, proceeding without book context");
        return Vec::new();
    };

    let Some(search) = search else {
        tracing::warn!("No provider client available, proceeding without book context");
        return Vec::new();
    };

    let top_k = clamp_top_k(top_k);

    let hits = match search.search(store_id, query, top_k).await {
        Ok(hits) => hits,
        Err(e) if e.is_not_found() => {
            tracing::warn!(
                vector_store_id = store_id,
                "Vector store not found; continuing without book context. Check OPENAI_VECTOR_STORE_ID"
            );
            return Vec::new();
        }
        Err(e) => {
            tracing::error!(error = %e, "Error retrieving book context");
            return Vec::new();
        }
    };

    let chunks: Vec<ContextChunk> = hits.into_iter().filter_map(ContextChunk::from_hit).collect();

    if chunks.is_empty() {
        tracing::warn!(query = %query, "No content found in vector store for query");
    } else {
        tracing::info!(count = chunks.len(), "Retrieved chunks from vector store");
    }

    chunks
}
