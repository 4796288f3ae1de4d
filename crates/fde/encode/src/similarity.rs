//! Scoring encodings against each other.

use fde_core::{Encoding, FdeError, Result, SearchResult, SearchResults};

/// Compute dot product between two vectors.
fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Similarity between a query encoding and a document encoding.
///
/// This is the plain dot product. The scale difference between a summed query
/// and an averaged document is part of the approximation, so no normalisation
/// is applied.
pub fn similarity(query: &Encoding, document: &Encoding) -> Result<f32> {
    similarity_slices(query.as_slice(), document.as_slice())
}

/// [`similarity`] over raw encoded values, e.g. rows read back from a store.
pub fn similarity_slices(query: &[f32], document: &[f32]) -> Result<f32> {
    if query.len() != document.len() {
        return Err(FdeError::dimension_mismatch(query.len(), document.len()));
    }
    Ok(dot_product(query, document))
}

/// Score one query against many documents, in document order.
pub fn similarity_batch(query: &Encoding, documents: &[Encoding]) -> Result<Vec<f32>> {
    documents
        .iter()
        .map(|doc| similarity(query, doc))
        .collect()
}

/// Score and sort documents by descending similarity, keeping the best `limit`.
pub fn rank<'a, I>(query: &Encoding, documents: I, limit: usize) -> Result<SearchResults>
where
    I: IntoIterator<Item = (&'a str, &'a [f32])>,
{
    let mut results = documents
        .into_iter()
        .map(|(doc_id, values)| {
            Ok(SearchResult {
                doc_id: doc_id.to_string(),
                score: similarity_slices(query.as_slice(), values)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results.truncate(limit);

    Ok(results)
}
