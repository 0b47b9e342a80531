// model.rs

use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, ArrayView1};

/// An ordinary least-squares model with an implicit intercept.
///
/// Regressors are kept in insertion order. Inserting under an existing name
/// replaces that regressor in place.
#[derive(Debug, Clone, Default)]
pub struct Model {
    regressors: Vec<(String, Array1<f64>)>,
}

/// Outcome of fitting a [`Model`] against one expression vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelFit {
    /// Regressors + 1 for the intercept, whatever the design's rank.
    pub df: usize,
    /// Numerical column rank of `[1 | regressors]`.
    pub rank: usize,
    pub rss: f64,
    pub n: usize,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, values: Array1<f64>) {
        let name = name.into();
        match self.regressors.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = values,
            None => self.regressors.push((name, values)),
        }
    }

    /// Copy of this model with one more regressor.
    pub fn with_regressor(&self, name: impl Into<String>, values: Array1<f64>) -> Self {
        let mut extended = self.clone();
        extended.insert(name, values);
        extended
    }

    pub fn len(&self) -> usize {
        self.regressors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regressors.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.regressors.iter().map(|(n, _)| n.as_str())
    }

    /// Least-squares fit of `y` on `[1 | regressors]`.
    ///
    /// Rank-deficient designs get the minimum-norm solution; the lost rank
    /// shows up in `rank`, never as an error.
    pub fn fit(&self, y: ArrayView1<f64>) -> ModelFit {
        let n = y.len();
        let p = self.regressors.len() + 1;
        let x = DMatrix::from_fn(n, p, |row, col| {
            if col == 0 {
                1.0
            } else {
                self.regressors[col - 1].1[row]
            }
        });
        let y_vec = DVector::from_iterator(n, y.iter().copied());

        if n == 0 {
            return ModelFit { df: p, rank: 0, rss: 0.0, n };
        }
        if x.iter().chain(y_vec.iter()).any(|v| !v.is_finite()) {
            return ModelFit { df: p, rank: p, rss: f64::NAN, n };
        }

        let svd = x.clone().svd(true, true);
        let max_sv = svd.singular_values.max();
        let eps = (n.max(p) as f64) * f64::EPSILON * max_sv;
        let rank = svd.rank(eps);

        let rss = match svd.solve(&y_vec, eps) {
            Ok(beta) => {
                let resid = &y_vec - &x * beta;
                resid.norm_squared()
            }
            Err(_) => f64::NAN,
        };

        ModelFit { df: p, rank, rss, n }
    }
}
