use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::BoW;

/// Linear machine `w . x + b` trained on the L2-regularized squared hinge loss.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(super) struct LinearMachine {
    w: Vec<f32>,
    bias: f32,
}

impl LinearMachine {
    /// Dual coordinate descent (Hsieh et al. 2008). The bias is learned as
    /// the weight of a constant feature of value 1, so it is regularized too.
    pub(super) fn fit(x: &[BoW], y: &[f64], c: f64, tol: f64, max_iter: usize) -> Self {
        let n = x.len();
        let dim = x.first().map_or(0, |r| r.len());
        let diag = 0.5 / c;

        let qd: Vec<f64> = x
            .iter()
            .map(|r| diag + 1. + r.iter().map(|&v| (v as f64) * (v as f64)).sum::<f64>())
            .collect();
        let mut alpha = vec![0f64; n];
        // last entry is the bias
        let mut w = vec![0f64; dim + 1];
        let mut order: Vec<usize> = (0..n).collect();
        let mut rng = StdRng::seed_from_u64(0);

        let mut converged = false;
        for iter in 0..max_iter {
            order.shuffle(&mut rng);
            let (mut pg_max, mut pg_min) = (f64::NEG_INFINITY, f64::INFINITY);
            for &i in &order {
                let g = y[i] * Self::dot(&w, &x[i]) - 1. + diag * alpha[i];
                let pg = if alpha[i] == 0. { g.min(0.) } else { g };
                pg_max = pg_max.max(pg);
                pg_min = pg_min.min(pg);
                if pg.abs() > 1e-12 {
                    let old = alpha[i];
                    alpha[i] = (old - g / qd[i]).max(0.);
                    let step = (alpha[i] - old) * y[i];
                    for (wj, &v) in w.iter_mut().zip(&x[i]) {
                        *wj += step * v as f64;
                    }
                    w[dim] += step;
                }
            }
            if pg_max - pg_min <= tol {
                debug!("linear solver converged after {} passes", iter + 1);
                converged = true;
                break;
            }
        }
        if !converged {
            debug!("linear solver stopped at {} passes", max_iter);
        }

        let bias = w.pop().unwrap_or(0.) as f32;
        Self {
            w: w.into_iter().map(|v| v as f32).collect(),
            bias,
        }
    }

    #[inline]
    fn dot(w: &[f64], x: &[f32]) -> f64 {
        w.iter().zip(x).map(|(a, &b)| a * b as f64).sum::<f64>() + w[w.len() - 1]
    }

    pub(super) fn margin(&self, x: &[f32]) -> f32 {
        crate::config::dot(&self.w, x) + self.bias
    }
}
