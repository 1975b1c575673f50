//! The corpus matrix with its row-aligned metadata, and the [`Model`] that
//! bundles it with the fitted vectorizer for querying.

use serde::{Deserialize, Serialize};

use crate::config::SearchConfig;
use crate::index::SimilarityIndex;
use crate::matrix::{CorpusMatrix, QueryVector};
use crate::reducer::DimensionalityReducer;
use crate::tokenizer::Analyzer;
use crate::vectorizer::FittedVectorizer;
use crate::{DocMeta, Error, Result, SearchHit};

/// Row `i` of the matrix describes `metadata[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusRepository {
    matrix: CorpusMatrix,
    metadata: Vec<DocMeta>,
}

impl CorpusRepository {
    pub fn build(matrix: CorpusMatrix, metadata: Vec<DocMeta>) -> Result<Self> {
        if matrix.n_rows() != metadata.len() {
            return Err(Error::Misaligned { rows: matrix.n_rows(), metadata: metadata.len() });
        }
        Ok(Self { matrix, metadata })
    }

    pub fn len(&self) -> usize { self.metadata.len() }

    pub fn is_empty(&self) -> bool { self.metadata.is_empty() }

    pub fn matrix(&self) -> &CorpusMatrix { &self.matrix }

    pub fn metadata(&self) -> &[DocMeta] { &self.metadata }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Extracted body text of the page to match.
    pub text: String,
    /// Short summary, e.g. a meta description; a secondary signal.
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub k: Option<usize>,
}

impl SearchRequest {
    pub fn new(text: impl Into<String>) -> Self { Self { text: text.into(), ..Self::default() } }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }
}

/// Everything needed to answer queries. Immutable once built; share it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    analyzer: Analyzer,
    vectorizer: FittedVectorizer,
    reducer: Option<DimensionalityReducer>,
    repository: CorpusRepository,
}

impl Model {
    pub fn new(analyzer: Analyzer, vectorizer: FittedVectorizer, reducer: Option<DimensionalityReducer>, repository: CorpusRepository) -> Result<Self> {
        let model = Self { analyzer, vectorizer, reducer, repository };
        model.check()?;
        Ok(model)
    }

    pub fn analyzer(&self) -> &Analyzer { &self.analyzer }

    pub fn vectorizer(&self) -> &FittedVectorizer { &self.vectorizer }

    pub fn reducer(&self) -> Option<&DimensionalityReducer> { self.reducer.as_ref() }

    pub fn repository(&self) -> &CorpusRepository { &self.repository }

    /// Query vector for `text`, with `description` blended in at `description_weight`.
    /// `None` when no recognized term survives.
    pub fn embed(&self, text: &str, description: Option<&str>, description_weight: f32) -> Result<Option<QueryVector>> {
        let mut v = self.vectorizer.transform(&self.analyzer.analyze(text));
        if let Some(description) = description.filter(|d| !d.trim().is_empty()) {
            let d = self.vectorizer.transform(&self.analyzer.analyze(description));
            v = v.add_scaled(&d, description_weight);
            v.normalize();
        }
        if v.is_zero() {
            return Ok(None);
        }
        match &self.reducer {
            None => Ok(Some(QueryVector::Sparse(v))),
            Some(reducer) => {
                let reduced = reducer.transform(&v)?;
                Ok(reduced.iter().any(|&x| x != 0.0).then_some(QueryVector::Dense(reduced)))
            }
        }
    }

    /// Ranked matches for a request. Empty text, or text without any
    /// vocabulary term, yields no results rather than arbitrary zero-score rows.
    pub fn search(&self, request: &SearchRequest, config: &SearchConfig) -> Result<Vec<SearchHit>> {
        if request.text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let Some(query) = self.embed(&request.text, request.description.as_deref(), config.description_weight)? else {
            return Ok(Vec::new());
        };
        let k = request.k.unwrap_or(config.top_k);
        let hits = SimilarityIndex::new(&self.repository).search(&query, k)?;
        Ok(hits
            .into_iter()
            .filter(|h| h.score >= config.min_score)
            .map(|h| SearchHit { title: h.meta.title.clone(), url: h.meta.url.clone(), id: h.meta.external_id.clone(), score: h.score })
            .collect())
    }

    /// Structural consistency of every part; a model failing this must not be served.
    pub fn check(&self) -> Result<()> {
        self.vectorizer.check()?;
        let matrix = self.repository.matrix();
        matrix.check()?;
        if matrix.n_rows() != self.repository.metadata.len() {
            return Err(Error::Misaligned { rows: matrix.n_rows(), metadata: self.repository.metadata.len() });
        }
        let n_features = self.vectorizer.n_features();
        match (&self.reducer, matrix) {
            (None, CorpusMatrix::Sparse(m)) if m.n_cols() == n_features => Ok(()),
            (Some(r), CorpusMatrix::Dense(m)) if r.n_features() == n_features && m.n_cols() == r.n_components() => r.check(),
            _ => Err(Error::CorruptModel(format!(
                "matrix of width {} does not fit {} features (reduced: {})",
                matrix.n_cols(),
                n_features,
                self.reducer.is_some()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::CsrMatrix;

    fn meta(id: &str) -> DocMeta { DocMeta { external_id: id.into(), title: id.into(), url: String::new() } }

    #[test]
    fn build_rejects_misalignment() {
        let matrix = CorpusMatrix::Sparse(CsrMatrix::new(3));
        let err = CorpusRepository::build(matrix, vec![meta("a")]).unwrap_err();
        assert!(matches!(err, Error::Misaligned { rows: 0, metadata: 1 }));
    }

    #[test]
    fn request_builders() {
        let r = SearchRequest::new("body").with_description("summary").with_k(3);
        assert_eq!(r.description.as_deref(), Some("summary"));
        assert_eq!(r.k, Some(3));
        let parsed: SearchRequest = serde_json::from_str(r#"{"text":"only text"}"#).unwrap();
        assert_eq!(parsed, SearchRequest::new("only text"));
    }
}
