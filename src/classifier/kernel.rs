use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{BoW, KernelFn};

const TAU: f64 = 1e-12;

/// Kernel matrix of the training rows.
pub(super) fn gram(x: &[BoW], kernel: &KernelFn) -> Vec<Vec<f64>> {
    let n = x.len();
    let mut k = vec![vec![0f64; n]; n];
    for i in 0..n {
        for j in i..n {
            let v = kernel.eval(&x[i], &x[j]) as f64;
            k[i][j] = v;
            k[j][i] = v;
        }
    }
    k
}

/// Kernel machine `sum_i coef_i K(sv_i, x) - rho`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(super) struct KernelMachine {
    kernel: KernelFn,
    support: Vec<BoW>,
    coef: Vec<f32>,
    rho: f32,
}

impl KernelMachine {
    /// Solve the C-SVM dual with SMO, picking the maximal violating pair each step.
    pub(super) fn fit(
        x: &[BoW],
        gram: &[Vec<f64>],
        y: &[f64],
        kernel: KernelFn,
        c: f64,
        tol: f64,
        max_iter: usize,
    ) -> Self {
        let n = y.len();
        let mut alpha = vec![0f64; n];
        // gradient of the dual objective, Q alpha - 1
        let mut grad = vec![-1f64; n];
        let q = |i: usize, j: usize| y[i] * y[j] * gram[i][j];

        let mut iter = 0;
        while iter < max_iter {
            let (mut g_max, mut g_min) = (f64::NEG_INFINITY, f64::INFINITY);
            let (mut i, mut j) = (None, None);
            for t in 0..n {
                let v = -y[t] * grad[t];
                let up = if y[t] > 0. { alpha[t] < c } else { alpha[t] > 0. };
                let low = if y[t] > 0. { alpha[t] > 0. } else { alpha[t] < c };
                if up && v > g_max {
                    g_max = v;
                    i = Some(t);
                }
                if low && v < g_min {
                    g_min = v;
                    j = Some(t);
                }
            }
            let (i, j) = match (i, j) {
                (Some(i), Some(j)) if g_max - g_min >= tol => (i, j),
                _ => break,
            };

            let (old_i, old_j) = (alpha[i], alpha[j]);
            if y[i] != y[j] {
                let quad = (gram[i][i] + gram[j][j] + 2. * q(i, j)).max(TAU);
                let delta = (-grad[i] - grad[j]) / quad;
                let diff = alpha[i] - alpha[j];
                alpha[i] += delta;
                alpha[j] += delta;
                if diff > 0. {
                    if alpha[j] < 0. {
                        alpha[j] = 0.;
                        alpha[i] = diff;
                    }
                } else if alpha[i] < 0. {
                    alpha[i] = 0.;
                    alpha[j] = -diff;
                }
                if diff > 0. {
                    if alpha[i] > c {
                        alpha[i] = c;
                        alpha[j] = c - diff;
                    }
                } else if alpha[j] > c {
                    alpha[j] = c;
                    alpha[i] = c + diff;
                }
            } else {
                let quad = (gram[i][i] + gram[j][j] - 2. * q(i, j)).max(TAU);
                let delta = (grad[i] - grad[j]) / quad;
                let sum = alpha[i] + alpha[j];
                alpha[i] -= delta;
                alpha[j] += delta;
                if sum > c {
                    if alpha[i] > c {
                        alpha[i] = c;
                        alpha[j] = sum - c;
                    }
                } else if alpha[j] < 0. {
                    alpha[j] = 0.;
                    alpha[i] = sum;
                }
                if sum > c {
                    if alpha[j] > c {
                        alpha[j] = c;
                        alpha[i] = sum - c;
                    }
                } else if alpha[i] < 0. {
                    alpha[i] = 0.;
                    alpha[j] = sum;
                }
            }

            let (d_i, d_j) = (alpha[i] - old_i, alpha[j] - old_j);
            for t in 0..n {
                grad[t] += q(i, t) * d_i + q(j, t) * d_j;
            }
            iter += 1;
        }
        if iter == max_iter {
            debug!("SMO stopped at {} iterations", max_iter);
        }

        let rho = Self::rho(&alpha, &grad, y, c);
        let (support, coef) = alpha
            .iter()
            .zip(y)
            .zip(x)
            .filter(|((a, _), _)| **a > 0.)
            .map(|((&a, &yi), xi)| (xi.clone(), (a * yi) as f32))
            .unzip();
        Self {
            kernel,
            support,
            coef,
            rho: rho as f32,
        }
    }

    /// Offset from the free multipliers, or the middle of the feasible interval when none is free.
    fn rho(alpha: &[f64], grad: &[f64], y: &[f64], c: f64) -> f64 {
        let (mut ub, mut lb) = (f64::INFINITY, f64::NEG_INFINITY);
        let (mut free, mut sum_free) = (0usize, 0f64);
        for t in 0..alpha.len() {
            let yg = y[t] * grad[t];
            if alpha[t] >= c {
                if y[t] < 0. {
                    ub = ub.min(yg);
                } else {
                    lb = lb.max(yg);
                }
            } else if alpha[t] <= 0. {
                if y[t] > 0. {
                    ub = ub.min(yg);
                } else {
                    lb = lb.max(yg);
                }
            } else {
                free += 1;
                sum_free += yg;
            }
        }
        if free > 0 {
            sum_free / free as f64
        } else {
            (ub + lb) / 2.
        }
    }

    pub(super) fn margin(&self, x: &[f32]) -> f32 {
        self.support
            .iter()
            .zip(&self.coef)
            .map(|(sv, &a)| a * self.kernel.eval(sv, x))
            .sum::<f32>()
            - self.rho
    }
}
