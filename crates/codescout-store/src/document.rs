use serde::{Deserialize, Serialize};

/// Where a document came from in the repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentMetadata {
    pub file_path: String,
    /// Chunk kind as a stable string (`class`, `function`, ...).
    pub kind: String,
    pub symbol_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enclosing_type: Option<String>,
    /// 1-based line of the declaration in its file.
    pub start_line: usize,
}

/// One indexed chunk of source text.
///
/// Ids are stable per session: `{file_path}#{ordinal}` where the ordinal
/// counts chunks within that file across the session's lifetime. The embedding is
/// `None` once a document has been round-tripped through the lexical cache;
/// the vector store keeps the authoritative copy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub metadata: DocumentMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Document {
    /// Copy without the embedding, for cache persistence.
    pub fn without_embedding(&self) -> Document {
        Document {
            id: self.id.clone(),
            content: self.content.clone(),
            metadata: self.metadata.clone(),
            embedding: None,
        }
    }

}

/// A document with a retrieval score attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub document: Document,
    pub score: f32,
}
