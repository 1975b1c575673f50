//! Held-out self-retrieval check: a document that was part of the corpus
//! should find itself among its own nearest neighbours.

use crate::config::SearchConfig;
use crate::repository::{Model, SearchRequest};
use crate::source::DocumentSource;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ValidationReport {
    pub ok: usize,
    pub total: usize,
}

impl ValidationReport {
    pub fn ratio(&self) -> f64 { if self.total == 0 { 0.0 } else { self.ok as f64 / self.total as f64 } }
}

/// Query every document's body and count those whose own id comes back
/// within the first `k` results. Documents that fail to load are skipped.
pub fn validate<S: DocumentSource>(model: &Model, documents: &[S], k: usize) -> Result<ValidationReport> {
    let config = SearchConfig { min_score: f32::NEG_INFINITY, ..SearchConfig::default() };
    let mut report = ValidationReport::default();
    for source in documents {
        let doc = match source.load() {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(source = %source.describe(), error = %e, "skipping validation document");
                continue;
            }
        };
        let hits = model.search(&SearchRequest::new(doc.body.as_str()).with_k(k), &config)?;
        let found = hits.iter().any(|h| h.id == doc.id);
        report.total += 1;
        if found {
            report.ok += 1;
        }
        let best: Vec<&str> = hits.iter().map(|h| h.title.as_str()).collect();
        tracing::info!(id = %doc.id, title = %doc.title, found, ?best, "validated");
    }
    tracing::info!(ok = report.ok, total = report.total, "validation finished");
    Ok(report)
}
