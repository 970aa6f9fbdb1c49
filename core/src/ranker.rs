//! Similarity scoring and ordering
//!
//! Scores are the raw inner product of the query and document embeddings. Vectors are never
//! re-normalized: the score is cosine similarity only when the provider returns unit vectors.

use crate::SimilarityError;
use std::cmp::Ordering;
use text_similarity_backend::Embedding;

/// A document paired with its similarity to the query
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMatch {
    pub document: String,
    pub score: f32,
}

/// Check the output of one provider call.
///
/// Every embedding must have the same non-zero dimensionality (`expected_dim` when given) and only
/// finite components. Returns the dimensionality.
pub fn check_embeddings(
    embeddings: &[Embedding],
    expected_count: usize,
    expected_dim: Option<usize>,
) -> Result<usize, SimilarityError> {
    if embeddings.len() != expected_count {
        return Err(violation(format!(
            "expected {expected_count} embeddings, got {}",
            embeddings.len()
        )));
    }

    let dim = expected_dim.unwrap_or_else(|| embeddings.first().map_or(0, Vec::len));
    if dim == 0 {
        return Err(violation("embeddings cannot be empty".to_string()));
    }

    for (i, embedding) in embeddings.iter().enumerate() {
        if embedding.len() != dim {
            return Err(violation(format!(
                "embedding {i} has dimension {}, expected {dim}",
                embedding.len()
            )));
        }
        if let Some(j) = embedding.iter().position(|v| !v.is_finite()) {
            return Err(violation(format!(
                "embedding {i} has a non-finite value at position {j}"
            )));
        }
    }
    Ok(dim)
}

/// Inner product of two vectors of the same length
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Score every document embedding against the query embedding
pub fn score(query: &[f32], documents: &[Embedding]) -> Result<Vec<f32>, SimilarityError> {
    documents
        .iter()
        .enumerate()
        .map(|(i, document)| {
            let score = dot(query, document);
            // Finite inputs can still overflow
            if score.is_finite() {
                Ok(score)
            } else {
                Err(violation(format!("score of document {i} is not finite")))
            }
        })
        .collect()
}

/// Pair documents with their scores and sort by descending score.
///
/// The sort is stable: documents with equal scores keep their input order.
pub fn order(documents: Vec<String>, scores: Vec<f32>) -> Vec<ScoredMatch> {
    debug_assert_eq!(documents.len(), scores.len());

    let mut matches: Vec<ScoredMatch> = documents
        .into_iter()
        .zip(scores)
        .map(|(document, score)| ScoredMatch { document, score })
        .collect();

    // Scores are finite so `partial_cmp` never fails. `total_cmp` would split -0.0 from 0.0
    matches.sort_by(|x, y| y.score.partial_cmp(&x.score).unwrap_or(Ordering::Equal));
    matches
}

/// Rank documents from already computed embeddings
pub fn rank_embeddings(
    query_embedding: &Embedding,
    documents: Vec<String>,
    document_embeddings: &[Embedding],
) -> Result<Vec<ScoredMatch>, SimilarityError> {
    let dim = check_embeddings(std::slice::from_ref(query_embedding), 1, None)?;
    check_embeddings(document_embeddings, documents.len(), Some(dim))?;

    let scores = score(query_embedding, document_embeddings)?;
    Ok(order(documents, scores))
}

fn violation(message: String) -> SimilarityError {
    tracing::error!("{message}");
    SimilarityError::EmbeddingContractViolation(message)
}
