use std::cmp::Ordering;

use crate::matrix::QueryVector;
use crate::repository::CorpusRepository;
use crate::{DocMeta, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDoc<'a> {
    pub row: usize,
    pub meta: &'a DocMeta,
    pub score: f32,
}

/// Brute-force cosine search over a repository whose rows are unit-normalized.
#[derive(Debug, Clone, Copy)]
pub struct SimilarityIndex<'a> {
    repository: &'a CorpusRepository,
}

impl<'a> SimilarityIndex<'a> {
    pub fn new(repository: &'a CorpusRepository) -> Self { Self { repository } }

    /// The `min(k, corpus size)` best rows, highest score first. Order among
    /// equal scores is unspecified.
    pub fn search(&self, query: &QueryVector, k: usize) -> Result<Vec<ScoredDoc<'a>>> {
        let scores = self.repository.matrix().scores(query)?;
        let metadata = self.repository.metadata();
        Ok(top_k(&scores, k)
            .into_iter()
            .map(|(row, score)| ScoredDoc { row, meta: &metadata[row], score })
            .collect())
    }
}

fn descending(a: &(usize, f32), b: &(usize, f32)) -> Ordering { b.1.total_cmp(&a.1) }

/// Indices and scores of the `k` largest scores, sorted descending.
/// Partition first (O(n)), then sort only the selected `k`.
pub fn top_k(scores: &[f32], k: usize) -> Vec<(usize, f32)> {
    let k = k.min(scores.len());
    if k == 0 {
        return Vec::new();
    }
    let mut ranked: Vec<(usize, f32)> = scores.iter().copied().enumerate().collect();
    if k < ranked.len() {
        ranked.select_nth_unstable_by(k - 1, descending);
        ranked.truncate(k);
    }
    ranked.sort_unstable_by(descending);
    ranked
}
