//! Corpus matrices stored in half precision.
//!
//! Queries are rounded through `f16` too, so a query row and a stored row carry
//! the same precision; products accumulate in `f32`.

use half::f16;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::vectorizer::SparseVector;
use crate::{Error, Result, TermId};

#[inline]
pub fn round_f16(x: f32) -> f32 { f16::from_f32(x).to_f32() }

/// Compressed sparse rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsrMatrix {
    n_cols: usize,
    indptr: Vec<usize>,
    indices: Vec<TermId>,
    values: Vec<f16>,
}

impl CsrMatrix {
    pub fn new(n_cols: usize) -> Self { Self { n_cols, indptr: vec![0], indices: Vec::new(), values: Vec::new() } }

    pub fn n_rows(&self) -> usize { self.indptr.len() - 1 }

    pub fn n_cols(&self) -> usize { self.n_cols }

    pub fn nnz(&self) -> usize { self.indices.len() }

    pub fn push_row(&mut self, row: &SparseVector) -> Result<()> {
        if let Some(&max) = row.indices.last() {
            if max as usize >= self.n_cols {
                return Err(Error::DimensionMismatch { expected: self.n_cols, found: max as usize + 1 });
            }
        }
        self.indices.extend_from_slice(&row.indices);
        self.values.extend(row.values.iter().map(|&v| f16::from_f32(v)));
        self.indptr.push(self.indices.len());
        Ok(())
    }

    pub fn row(&self, i: usize) -> (&[TermId], &[f16]) {
        let (start, end) = (self.indptr[i], self.indptr[i + 1]);
        (&self.indices[start..end], &self.values[start..end])
    }

    /// Dot product of every row with `query`.
    pub fn scores(&self, query: &SparseVector) -> Result<Vec<f32>> {
        let mut dense = vec![0.0f32; self.n_cols];
        for (i, w) in query.iter() {
            let slot = dense.get_mut(i as usize).ok_or(Error::DimensionMismatch { expected: self.n_cols, found: i as usize + 1 })?;
            *slot = round_f16(w);
        }
        Ok((0..self.n_rows())
            .into_par_iter()
            .map(|r| {
                let (indices, values) = self.row(r);
                indices.iter().zip(values).map(|(&j, v)| v.to_f32() * dense[j as usize]).sum::<f32>()
            })
            .collect())
    }

    pub(crate) fn check(&self) -> Result<()> {
        let consistent = self.indptr.first() == Some(&0)
            && self.indptr.windows(2).all(|w| w[0] <= w[1])
            && self.indptr.last() == Some(&self.indices.len())
            && self.indices.len() == self.values.len()
            && self.indices.iter().all(|&j| (j as usize) < self.n_cols);
        if consistent { Ok(()) } else { Err(Error::CorruptModel("inconsistent sparse matrix".into())) }
    }
}

/// Row-major dense matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseMatrix {
    n_cols: usize,
    values: Vec<f16>,
}

impl DenseMatrix {
    pub fn new(n_cols: usize) -> Self { Self { n_cols, values: Vec::new() } }

    pub fn n_rows(&self) -> usize { if self.n_cols == 0 { 0 } else { self.values.len() / self.n_cols } }

    pub fn n_cols(&self) -> usize { self.n_cols }

    pub fn push_row(&mut self, row: &[f32]) -> Result<()> {
        if row.len() != self.n_cols {
            return Err(Error::DimensionMismatch { expected: self.n_cols, found: row.len() });
        }
        self.values.extend(row.iter().map(|&v| f16::from_f32(v)));
        Ok(())
    }

    pub fn row(&self, i: usize) -> &[f16] { &self.values[i * self.n_cols..(i + 1) * self.n_cols] }

    pub fn scores(&self, query: &[f32]) -> Result<Vec<f32>> {
        if query.len() != self.n_cols {
            return Err(Error::DimensionMismatch { expected: self.n_cols, found: query.len() });
        }
        let query: Vec<f32> = query.iter().map(|&q| round_f16(q)).collect();
        Ok((0..self.n_rows())
            .into_par_iter()
            .map(|r| self.row(r).iter().zip(&query).map(|(v, q)| v.to_f32() * q).sum::<f32>())
            .collect())
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.n_cols == 0 || self.values.len() % self.n_cols != 0 {
            return Err(Error::CorruptModel("inconsistent dense matrix".into()));
        }
        Ok(())
    }
}

/// A query in the same space as the corpus rows.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryVector {
    Sparse(SparseVector),
    Dense(Vec<f32>),
}

impl QueryVector {
    pub fn dim(&self) -> usize {
        match self {
            QueryVector::Sparse(v) => v.indices.last().map_or(0, |&i| i as usize + 1),
            QueryVector::Dense(v) => v.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CorpusMatrix {
    Sparse(CsrMatrix),
    Dense(DenseMatrix),
}

impl CorpusMatrix {
    pub fn n_rows(&self) -> usize {
        match self {
            CorpusMatrix::Sparse(m) => m.n_rows(),
            CorpusMatrix::Dense(m) => m.n_rows(),
        }
    }

    pub fn n_cols(&self) -> usize {
        match self {
            CorpusMatrix::Sparse(m) => m.n_cols(),
            CorpusMatrix::Dense(m) => m.n_cols(),
        }
    }

    pub fn scores(&self, query: &QueryVector) -> Result<Vec<f32>> {
        match (self, query) {
            (CorpusMatrix::Sparse(m), QueryVector::Sparse(q)) => m.scores(q),
            (CorpusMatrix::Dense(m), QueryVector::Dense(q)) => m.scores(q),
            _ => Err(Error::DimensionMismatch { expected: self.n_cols(), found: query.dim() }),
        }
    }

    pub(crate) fn check(&self) -> Result<()> {
        match self {
            CorpusMatrix::Sparse(m) => m.check(),
            CorpusMatrix::Dense(m) => m.check(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_scores_match_dot_products() {
        let rows = vec![
            SparseVector::from_pairs(vec![(0, 0.6), (2, 0.8)]),
            SparseVector::from_pairs(vec![(1, 1.0)]),
            SparseVector::default(),
        ];
        let mut m = CsrMatrix::new(3);
        for r in &rows {
            m.push_row(r).unwrap();
        }
        assert_eq!(m.n_rows(), 3);
        let q = SparseVector::from_pairs(vec![(2, 1.0)]);
        let scores = m.scores(&q).unwrap();
        assert!((scores[0] - 0.8).abs() < 1e-3);
        assert_eq!(scores[1], 0.0);
        assert_eq!(scores[2], 0.0);
        assert!(m.check().is_ok());
    }

    #[test]
    fn rejects_out_of_range_columns() {
        let mut m = CsrMatrix::new(2);
        let err = m.push_row(&SparseVector::from_pairs(vec![(5, 1.0)])).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 2, found: 6 }));
        assert!(m.scores(&SparseVector::from_pairs(vec![(9, 1.0)])).is_err());
    }

    #[test]
    fn dense_scores_and_mismatch() {
        let mut m = DenseMatrix::new(2);
        m.push_row(&[1.0, 0.0]).unwrap();
        m.push_row(&[0.0, 1.0]).unwrap();
        let scores = m.scores(&[0.6, 0.8]).unwrap();
        assert!((scores[0] - 0.6).abs() < 1e-3);
        assert!((scores[1] - 0.8).abs() < 1e-3);
        assert!(m.push_row(&[1.0]).is_err());
        let corpus = CorpusMatrix::Dense(m);
        assert!(corpus.scores(&QueryVector::Sparse(SparseVector::default())).is_err());
    }
}
