use crate::SimilarityError;

/// Check a ranking request before any embedding work is done.
///
/// A query made only of whitespace counts as empty. Documents are accepted as is: empty strings
/// and duplicates are valid and the list has no upper bound.
pub fn validate(query: &str, documents: &[String]) -> Result<(), SimilarityError> {
    if query.trim().is_empty() {
        return Err(SimilarityError::InvalidInput(
            "`query` cannot be empty".to_string(),
        ));
    }
    if documents.is_empty() {
        return Err(SimilarityError::InvalidInput(
            "`documents` cannot be empty".to_string(),
        ));
    }
    Ok(())
}
