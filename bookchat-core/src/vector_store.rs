//! Semantic search over a hosted vector store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// The provider accepts between 1 and 50 results per search.
pub const MIN_RESULTS: u32 = 1;
pub const MAX_RESULTS: u32 = 50;

#[async_trait]
pub trait VectorSearch: Send + Sync {
    /// Search `store_id` for passages relevant to `query`.
    async fn search(
        &self,
        store_id: &str,
        query: &str,
        max_num_results: u32,
    ) -> Result<Vec<SearchHit>, ProviderError>;
}

/// One raw search result as returned by the provider.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchHit {
    #[serde(default)]
    pub file_id: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub content: Vec<ContentSegment>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContentSegment {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub score: f64,
    pub file_id: Option<String>,
    pub filename: Option<String>,
}

/// A retrieved passage with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextChunk {
    pub content: String,
    pub metadata: ChunkMetadata,
}

impl ContextChunk {
    /// Joins the hit's text segments with newlines. `None` when the hit
    /// carries no text.
    pub fn from_hit(hit: SearchHit) -> Option<Self> {
        let parts: Vec<String> = hit
            .content
            .into_iter()
            .filter(|segment| segment.kind == "text")
            .filter_map(|segment| segment.text)
            .filter(|text| !text.is_empty())
            .collect();

        if parts.is_empty() {
            return None;
        }

        Some(Self {
            content: parts.join("\n"),
            metadata: ChunkMetadata {
                score: hit.score,
                file_id: hit.file_id,
                filename: hit.filename,
            },
        })
    }
}

pub fn clamp_top_k(top_k: u32) -> u32 {
    top_k.clamp(MIN_RESULTS, MAX_RESULTS)
}
