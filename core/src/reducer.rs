//! Optional latent-semantic projection of the sparse corpus.
//!
//! Randomized truncated SVD: a seeded range finder with a few power
//! iterations narrows the corpus to `k + OVERSAMPLE` directions, and the small
//! factor is decomposed exactly. Rows are re-normalized after projection.

use nalgebra::{DMatrix, SymmetricEigen};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::matrix::{round_f16, CsrMatrix, DenseMatrix};
use crate::vectorizer::SparseVector;
use crate::{Error, Result};

const OVERSAMPLE: usize = 10;
const POWER_ITERATIONS: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionalityReducer {
    n_features: usize,
    n_components: usize,
    /// `n_features x n_components`, row-major.
    components: Vec<f32>,
    explained_variance_ratio: f64,
}

impl DimensionalityReducer {
    pub fn n_features(&self) -> usize { self.n_features }

    pub fn n_components(&self) -> usize { self.n_components }

    /// Share of the corpus variance kept by the components. Diagnostic only.
    pub fn explained_variance_ratio(&self) -> f64 { self.explained_variance_ratio }

    /// Fit on the corpus and return the reducer with the projected, unit-norm rows.
    pub fn fit(matrix: &CsrMatrix, n_components: usize, seed: u64) -> Result<(Self, DenseMatrix)> {
        let (n, m) = (matrix.n_rows(), matrix.n_cols());
        if n == 0 || m == 0 {
            return Err(Error::EmptyCorpus);
        }
        if n_components == 0 {
            return Err(Error::InvalidConfig("n_components must be positive to reduce".into()));
        }
        let rank_cap = n.min(m);
        let k = n_components.min(rank_cap);
        let l = (k + OVERSAMPLE).min(rank_cap);

        let mut rng = StdRng::seed_from_u64(seed);
        let omega = DMatrix::<f64>::from_fn(m, l, |_, _| rng.gen_range(-1.0..1.0));
        let mut y = mul(matrix, &omega);
        for _ in 0..POWER_ITERATIONS {
            let q = y.qr().q();
            let z = mul_transpose(matrix, &q).qr().q();
            y = mul(matrix, &z);
        }
        let q = y.qr().q();
        // B = Qᵀ A, kept transposed (m x l)
        let bt = mul_transpose(matrix, &q);
        let eigen = SymmetricEigen::new(bt.transpose() * &bt);

        let mut order: Vec<usize> = (0..eigen.eigenvalues.len()).collect();
        order.sort_unstable_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));
        let top = eigen.eigenvalues[order[0]].max(0.0);
        let kept: Vec<usize> = order.into_iter().take(k).filter(|&i| eigen.eigenvalues[i] > top * 1e-12 && eigen.eigenvalues[i] > 0.0).collect();
        if kept.is_empty() {
            return Err(Error::InvalidConfig("corpus matrix has rank zero".into()));
        }

        // V = Bᵀ U Σ⁻¹
        let mut v = DMatrix::<f64>::zeros(m, kept.len());
        for (c, &i) in kept.iter().enumerate() {
            let sigma = eigen.eigenvalues[i].sqrt();
            let col = &bt * eigen.eigenvectors.column(i) / sigma;
            v.set_column(c, &col);
        }

        let projected = mul(matrix, &v);
        let explained_variance_ratio = explained_variance(matrix, &projected);
        let k = kept.len();
        let components = (0..m).flat_map(|j| (0..k).map(move |c| (j, c))).map(|(j, c)| v[(j, c)] as f32).collect();
        let reducer = Self { n_features: m, n_components: k, components, explained_variance_ratio };

        let mut reduced = DenseMatrix::new(k);
        let mut row = vec![0.0f32; k];
        for r in 0..n {
            for (c, slot) in row.iter_mut().enumerate() {
                *slot = projected[(r, c)] as f32;
            }
            normalize(&mut row);
            reduced.push_row(&row)?;
        }
        Ok((reducer, reduced))
    }

    /// Project a vectorizer-space vector and re-normalize it.
    pub fn transform(&self, v: &SparseVector) -> Result<Vec<f32>> {
        let k = self.n_components;
        let mut out = vec![0.0f32; k];
        for (j, w) in v.iter() {
            let j = j as usize;
            if j >= self.n_features {
                return Err(Error::DimensionMismatch { expected: self.n_features, found: j + 1 });
            }
            let w = round_f16(w);
            for (o, c) in out.iter_mut().zip(&self.components[j * k..(j + 1) * k]) {
                *o += w * c;
            }
        }
        normalize(&mut out);
        Ok(out)
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.n_components == 0 || self.components.len() != self.n_features * self.n_components {
            return Err(Error::CorruptModel("reducer components have the wrong shape".into()));
        }
        Ok(())
    }
}

fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

/// A · D for sparse A (n x m) and dense D (m x l).
fn mul(a: &CsrMatrix, d: &DMatrix<f64>) -> DMatrix<f64> {
    let mut out = DMatrix::<f64>::zeros(a.n_rows(), d.ncols());
    for r in 0..a.n_rows() {
        let (indices, values) = a.row(r);
        for (&j, v) in indices.iter().zip(values) {
            let v = v.to_f64();
            for c in 0..d.ncols() {
                out[(r, c)] += v * d[(j as usize, c)];
            }
        }
    }
    out
}

/// Aᵀ · D for sparse A (n x m) and dense D (n x l).
fn mul_transpose(a: &CsrMatrix, d: &DMatrix<f64>) -> DMatrix<f64> {
    let mut out = DMatrix::<f64>::zeros(a.n_cols(), d.ncols());
    for r in 0..a.n_rows() {
        let (indices, values) = a.row(r);
        for (&j, v) in indices.iter().zip(values) {
            let v = v.to_f64();
            for c in 0..d.ncols() {
                out[(j as usize, c)] += v * d[(r, c)];
            }
        }
    }
    out
}

/// Σ column variance of the projection over Σ column variance of the corpus.
fn explained_variance(a: &CsrMatrix, projected: &DMatrix<f64>) -> f64 {
    let n = a.n_rows() as f64;
    let mut col_sums = vec![0.0f64; a.n_cols()];
    let mut sum_sq = 0.0f64;
    for r in 0..a.n_rows() {
        let (indices, values) = a.row(r);
        for (&j, v) in indices.iter().zip(values) {
            let v = v.to_f64();
            col_sums[j as usize] += v;
            sum_sq += v * v;
        }
    }
    let total = sum_sq / n - col_sums.iter().map(|s| (s / n).powi(2)).sum::<f64>();
    if total <= 0.0 {
        return 0.0;
    }
    let kept: f64 = projected
        .column_iter()
        .map(|col| {
            let mean = col.sum() / n;
            col.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n
        })
        .sum();
    kept / total
}
