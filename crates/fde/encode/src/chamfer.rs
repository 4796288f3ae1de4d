//! Exact Chamfer similarity, the quantity encodings approximate.

use fde_core::{Result, VectorSet};

/// Chamfer similarity between two vector sets of the same dimension.
///
/// Every query vector contributes its best dot product against the document;
/// the contributions are summed. An empty query or document scores 0.
pub fn chamfer_similarity(query: &VectorSet, document: &VectorSet) -> Result<f32> {
    let Some(first) = query.vectors().first() else {
        return Ok(0.0);
    };
    if document.is_empty() {
        return Ok(0.0);
    }

    let dim = first.len();
    let query = query.to_array(dim)?;
    let document = document.to_array(dim)?;

    // [num_query, num_document] pairwise dot products
    let scores = query.dot(&document.t());
    Ok(scores
        .rows()
        .into_iter()
        .map(|row| row.iter().copied().fold(f32::NEG_INFINITY, f32::max))
        .sum())
}
