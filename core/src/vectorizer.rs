//! TF-IDF weighting. A [`VectorizerBuilder`] is only used to fit; the
//! [`FittedVectorizer`] it returns is immutable and shared by every reader.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::config::ModelConfig;
use crate::{Error, Result, TermId, TokenSequence};

/// Non-zero weights of one document, sorted by term index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    pub indices: Vec<TermId>,
    pub values: Vec<f32>,
}

impl SparseVector {
    /// Sorts by index and drops zero weights. Indices must be unique.
    pub fn from_pairs(mut pairs: Vec<(TermId, f32)>) -> Self {
        pairs.retain(|&(_, w)| w != 0.0);
        pairs.sort_unstable_by_key(|&(i, _)| i);
        let (indices, values) = pairs.into_iter().unzip();
        Self { indices, values }
    }

    pub fn nnz(&self) -> usize { self.indices.len() }

    pub fn is_zero(&self) -> bool { self.indices.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = (TermId, f32)> + '_ {
        self.indices.iter().copied().zip(self.values.iter().copied())
    }

    pub fn norm(&self) -> f32 { self.values.iter().map(|v| v * v).sum::<f32>().sqrt() }

    /// Scale to unit length; the zero vector stays zero.
    pub fn normalize(&mut self) {
        let norm = self.norm();
        if norm > 0.0 {
            self.values.iter_mut().for_each(|v| *v /= norm);
        }
    }

    /// `self + weight * other`, not normalized.
    pub fn add_scaled(&self, other: &SparseVector, weight: f32) -> SparseVector {
        let mut acc: HashMap<TermId, f32> = self.iter().collect();
        for (i, v) in other.iter() {
            *acc.entry(i).or_insert(0.0) += weight * v;
        }
        SparseVector::from_pairs(acc.into_iter().collect())
    }
}

/// Term → column index. Indices are dense, unique and follow lexicographic term order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Vocabulary {
    terms: Vec<String>,
    index: HashMap<String, TermId>,
}

impl Vocabulary {
    pub fn len(&self) -> usize { self.terms.len() }

    pub fn is_empty(&self) -> bool { self.terms.is_empty() }

    pub fn get(&self, term: &str) -> Option<TermId> { self.index.get(term).copied() }

    pub fn terms(&self) -> &[String] { &self.terms }
}

impl TryFrom<Vec<String>> for Vocabulary {
    type Error = Error;

    fn try_from(terms: Vec<String>) -> Result<Self> {
        let mut index = HashMap::with_capacity(terms.len());
        for (id, term) in terms.iter().enumerate() {
            if index.insert(term.clone(), id as TermId).is_some() {
                return Err(Error::CorruptModel(format!("duplicate vocabulary term {term:?}")));
            }
        }
        Ok(Self { terms, index })
    }
}

impl From<Vocabulary> for Vec<String> {
    fn from(v: Vocabulary) -> Self { v.terms }
}

/// Inverse document frequency per vocabulary index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightTable {
    pub idf: Vec<f32>,
}

impl WeightTable {
    pub fn idf(&self, id: TermId) -> f32 { self.idf.get(id as usize).copied().unwrap_or(0.0) }
}

#[derive(Debug, Clone)]
pub struct VectorizerBuilder {
    pub min_df: f64,
    pub max_df: f64,
    pub sublinear_tf: bool,
    pub smooth_idf: bool,
}

impl Default for VectorizerBuilder {
    fn default() -> Self { Self::from_config(&ModelConfig::default()) }
}

impl VectorizerBuilder {
    pub fn from_config(config: &ModelConfig) -> Self {
        Self { min_df: config.min_df, max_df: config.max_df, sublinear_tf: config.sublinear_tf, smooth_idf: config.smooth_idf }
    }

    pub fn with_df_bounds(mut self, min_df: f64, max_df: f64) -> Self {
        self.min_df = min_df;
        self.max_df = max_df;
        self
    }

    /// Learn the vocabulary and idf weights. Terms must appear in at least
    /// `min_df * n` and at most `max_df * n` documents.
    pub fn fit(&self, corpus: &[TokenSequence]) -> Result<FittedVectorizer> {
        let n = corpus.len();
        if n == 0 {
            return Err(Error::EmptyCorpus);
        }
        let low = self.min_df * n as f64;
        let high = self.max_df * n as f64;
        if high < low {
            return Err(Error::InvalidConfig(format!("max_df {} keeps fewer documents than min_df {}", self.max_df, self.min_df)));
        }

        let mut df: HashMap<&str, u32> = HashMap::new();
        for tokens in corpus {
            let unique: HashSet<&str> = tokens.iter().map(String::as_str).collect();
            for term in unique {
                *df.entry(term).or_insert(0) += 1;
            }
        }

        let mut kept: Vec<(&str, u32)> = df
            .into_iter()
            .filter(|&(_, d)| (d as f64) >= low && (d as f64) <= high)
            .collect();
        if kept.is_empty() {
            return Err(Error::EmptyVocabulary { documents: n });
        }
        kept.sort_unstable_by(|a, b| a.0.cmp(b.0));

        let idf = kept.iter().map(|&(_, d)| self.idf(n, d)).collect();
        let vocabulary = Vocabulary::try_from(kept.into_iter().map(|(t, _)| t.to_string()).collect::<Vec<_>>())?;

        let step = (vocabulary.len() / 20).max(1);
        let sample: Vec<&str> = vocabulary.terms().iter().step_by(step).take(20).map(String::as_str).collect();
        tracing::info!(terms = vocabulary.len(), documents = n, ?sample, "vocabulary fitted");

        Ok(FittedVectorizer { vocabulary, weights: WeightTable { idf }, sublinear_tf: self.sublinear_tf })
    }

    fn idf(&self, n: usize, df: u32) -> f32 {
        let (n, df) = (n as f64, df as f64);
        let idf = if self.smooth_idf { ((1.0 + n) / (1.0 + df)).ln() + 1.0 } else { (n / df).ln() + 1.0 };
        idf as f32
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedVectorizer {
    vocabulary: Vocabulary,
    weights: WeightTable,
    sublinear_tf: bool,
}

impl FittedVectorizer {
    pub fn vocabulary(&self) -> &Vocabulary { &self.vocabulary }

    pub fn weights(&self) -> &WeightTable { &self.weights }

    pub fn n_features(&self) -> usize { self.vocabulary.len() }

    /// L2-normalized tf-idf vector; out-of-vocabulary terms are ignored.
    pub fn transform(&self, tokens: &[String]) -> SparseVector {
        let mut counts: HashMap<TermId, u32> = HashMap::new();
        for token in tokens {
            if let Some(id) = self.vocabulary.get(token) {
                *counts.entry(id).or_insert(0) += 1;
            }
        }
        let pairs = counts
            .into_iter()
            .map(|(id, count)| {
                let tf = if self.sublinear_tf { 1.0 + (count as f32).ln() } else { count as f32 };
                (id, tf * self.weights.idf(id))
            })
            .collect();
        let mut v = SparseVector::from_pairs(pairs);
        v.normalize();
        v
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.weights.idf.len() != self.vocabulary.len() {
            return Err(Error::CorruptModel(format!(
                "{} weights for {} vocabulary terms",
                self.weights.idf.len(),
                self.vocabulary.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(words: &str) -> TokenSequence { words.split_whitespace().map(str::to_string).collect() }

    fn corpus() -> Vec<TokenSequence> {
        vec![doc("appl orchard appl"), doc("banana plantat"), doc("appl pastri oven"), doc("oven bread flour")]
    }

    fn open_builder() -> VectorizerBuilder { VectorizerBuilder::default().with_df_bounds(0.0, 1.0) }

    #[test]
    fn vocabulary_is_sorted_and_dense() {
        let v = open_builder().fit(&corpus()).unwrap();
        let terms = v.vocabulary().terms().to_vec();
        let mut sorted = terms.clone();
        sorted.sort();
        assert_eq!(terms, sorted);
        for (i, t) in terms.iter().enumerate() {
            assert_eq!(v.vocabulary().get(t), Some(i as TermId));
        }
        assert_eq!(v.weights().idf.len(), terms.len());
    }

    #[test]
    fn df_bounds_prune_common_terms() {
        // "appl" and "oven" appear in half of the documents
        let v = open_builder().with_df_bounds(0.0, 0.3).fit(&corpus()).unwrap();
        assert!(v.vocabulary().get("appl").is_none());
        assert!(v.vocabulary().get("oven").is_none());
        assert!(v.vocabulary().get("banana").is_some());

        let v = open_builder().with_df_bounds(0.5, 1.0).fit(&corpus()).unwrap();
        assert_eq!(v.vocabulary().terms(), &["appl".to_string(), "oven".to_string()]);
    }

    #[test]
    fn empty_vocabulary_is_an_error() {
        let err = VectorizerBuilder::default().fit(&corpus()).unwrap_err();
        assert!(matches!(err, Error::EmptyVocabulary { documents: 4 }));
        assert!(matches!(open_builder().fit(&[]), Err(Error::EmptyCorpus)));
    }

    #[test]
    fn smoothed_idf_values() {
        let v = open_builder().fit(&corpus()).unwrap();
        let appl = v.vocabulary().get("appl").unwrap();
        let banana = v.vocabulary().get("banana").unwrap();
        assert!((v.weights().idf(appl) - ((5.0f32 / 3.0).ln() + 1.0)).abs() < 1e-6);
        assert!((v.weights().idf(banana) - ((5.0f32 / 2.0).ln() + 1.0)).abs() < 1e-6);
    }

    #[test]
    fn transform_is_unit_norm_or_zero() {
        let v = open_builder().fit(&corpus()).unwrap();
        for d in corpus() {
            assert!((v.transform(&d).norm() - 1.0).abs() < 1e-5);
        }
        let empty = v.transform(&[]);
        assert!(empty.is_zero());
        assert!(v.transform(&doc("unseen words only")).is_zero());
    }

    #[test]
    fn sublinear_tf_weights() {
        let v = open_builder().fit(&corpus()).unwrap();
        let vec = v.transform(&doc("appl appl orchard"));
        let appl = v.vocabulary().get("appl").unwrap();
        let orchard = v.vocabulary().get("orchard").unwrap();
        let w = |id| vec.iter().find(|&(i, _)| i == id).map(|(_, w)| w).unwrap();
        let expected = (1.0 + 2f32.ln()) * v.weights().idf(appl) / v.weights().idf(orchard);
        assert!((w(appl) / w(orchard) - expected).abs() < 1e-5);
    }

    #[test]
    fn concurrent_transform_is_stable() {
        let v = open_builder().fit(&corpus()).unwrap();
        let before = v.n_features();
        let query = doc("appl oven novel");
        let expected = v.transform(&query);
        std::thread::scope(|s| {
            let handles: Vec<_> = (0..8).map(|_| s.spawn(|| v.transform(&query))).collect();
            for h in handles {
                assert_eq!(h.join().unwrap(), expected);
            }
        });
        assert_eq!(v.n_features(), before);
    }

    #[test]
    fn vocabulary_rejects_duplicates() {
        assert!(Vocabulary::try_from(vec!["a".to_string(), "a".to_string()]).is_err());
    }

    #[test]
    fn add_scaled_merges_terms() {
        let a = SparseVector::from_pairs(vec![(1, 1.0), (3, 2.0)]);
        let b = SparseVector::from_pairs(vec![(3, 1.0), (0, 4.0)]);
        let c = a.add_scaled(&b, 0.5);
        assert_eq!(c.indices, vec![0, 1, 3]);
        assert_eq!(c.values, vec![2.0, 1.0, 2.5]);
    }
}
