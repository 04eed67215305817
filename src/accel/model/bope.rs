// This file is part of CTMP.
// Copyright (C) 2024-2026 CTMP contributors.
// Licensed under the MIT license, see LICENSE.md for details.
// SPDX-License-Identifier: MIT

//! Bernoulli-randomized MAP estimation of topic proportions (BOPE).
//!
//! For one document we ascend
//!
//! ```text
//! L(θ) = cts · log(θᵀ β_d) + (α - 1) Σ_k log θ_k - (λ / 2) ‖θ - μ_d‖²
//! ```
//!
//! over the simplex.  Each step builds a likelihood direction `G1` and a
//! prior direction `G2`, and two trajectories ("lower" and "upper") each
//! draw a Bernoulli coin to decide which direction gets another vote.  Each
//! trajectory moves a Frank-Wolfe step toward the vertex its vote-weighted
//! direction favors, and the candidate with the higher objective wins.
use ndarray::{Array1, ArrayView1, ArrayView2, Zip};
use rand::Rng;

/// Mixing probability between the likelihood and prior directions.
const LIKELIHOOD_PROB: f64 = 0.5;

/// Settings for the proportion inferencer.
#[derive(Debug, Clone, Copy)]
pub struct BopeInferencer {
    pub alpha: f64,
    pub lamb: f64,
    pub iter_infer: usize,
}

/// Vote counts for one speculative trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Trajectory {
    likelihood: u64,
    prior: u64,
}

impl Trajectory {
    /// Draw a vote and return the vertex the combined direction points at.
    fn vote<R: Rng>(&mut self, rng: &mut R, g1: &Array1<f64>, g2: &Array1<f64>) -> usize {
        if rng.random::<f64>() < LIKELIHOOD_PROB {
            self.likelihood += 1;
        } else {
            self.prior += 1;
        }
        let w1 = self.likelihood as f64;
        let w2 = self.prior as f64;
        argmax(g1.iter().zip(g2.iter()).map(|(a, b)| w1 * a + w2 * b))
    }
}

impl BopeInferencer {
    /// Infer topic proportions for one document.
    ///
    /// * `beta_d` — topic-term weights restricted to the document's terms,
    ///   shape `[topics, doc_terms]`.
    /// * `cts` — term counts, parallel to the columns of `beta_d`.
    /// * `theta` — starting proportions (on the simplex).
    /// * `mu` — the document's topic offset.
    pub fn infer<R: Rng>(
        &self,
        beta_d: ArrayView2<'_, f64>,
        cts: ArrayView1<'_, f64>,
        theta: ArrayView1<'_, f64>,
        mu: ArrayView1<'_, f64>,
        rng: &mut R,
    ) -> Array1<f64> {
        let p = LIKELIHOOD_PROB;
        let mut theta = theta.to_owned();
        // x = θᵀ β_d, maintained incrementally
        let mut x = theta.dot(&beta_d);

        let mut lower = Trajectory {
            likelihood: 1,
            prior: 0,
        };
        let mut upper = Trajectory {
            likelihood: 0,
            prior: 1,
        };

        for t in 1..self.iter_infer {
            let ratio = &cts / &x;
            let mut g1 = beta_d.dot(&ratio);
            Zip::from(&mut g1)
                .and(&theta)
                .for_each(|g, th| *g = (*g + (self.alpha - 1.0) / th) / p);
            let g2 = Zip::from(&theta)
                .and(&mu)
                .map_collect(|th, m| -self.lamb * (th - m) / (1.0 - p));

            let step = 1.0 / (t as f64 + 1.0);
            let index_lower = lower.vote(rng, &g1, &g2);
            let index_upper = upper.vote(rng, &g1, &g2);
            let theta_lower = frank_wolfe_step(&theta, index_lower, step);
            let theta_upper = frank_wolfe_step(&theta, index_upper, step);

            let score_lower = self.objective(beta_d, cts, mu, theta_lower.view());
            let score_upper = self.objective(beta_d, cts, mu, theta_upper.view());

            let index = if score_upper > score_lower {
                theta = theta_upper;
                index_upper
            } else {
                theta = theta_lower;
                index_lower
            };
            Zip::from(&mut x)
                .and(beta_d.row(index))
                .for_each(|x, b| *x += step * (b - *x));
        }

        theta
    }

    /// Unnormalized log posterior of `theta` for one document.
    pub fn objective(
        &self,
        beta_d: ArrayView2<'_, f64>,
        cts: ArrayView1<'_, f64>,
        mu: ArrayView1<'_, f64>,
        theta: ArrayView1<'_, f64>,
    ) -> f64 {
        let x = theta.dot(&beta_d);
        let fit: f64 = Zip::from(&cts).and(&x).fold(0.0, |acc, c, x| acc + c * x.ln());
        let prior: f64 = theta.iter().map(|t| t.ln()).sum();
        let dist: f64 = Zip::from(&theta)
            .and(&mu)
            .fold(0.0, |acc, t, m| acc + (t - m) * (t - m));
        fit + (self.alpha - 1.0) * prior - 0.5 * self.lamb * dist
    }
}

/// Move `theta` a convex step of size `step` toward simplex vertex `index`.
fn frank_wolfe_step(theta: &Array1<f64>, index: usize, step: f64) -> Array1<f64> {
    let mut next = theta * (1.0 - step);
    next[index] += step;
    next
}

/// Index of the first maximum, ignoring NaN entries.
fn argmax(values: impl Iterator<Item = f64>) -> usize {
    let mut best = 0;
    let mut best_val = f64::NEG_INFINITY;
    for (i, v) in values.enumerate() {
        if v > best_val {
            best = i;
            best_val = v;
        }
    }
    best
}

#[cfg(test)]
use ndarray::array;
#[cfg(test)]
use rand::SeedableRng;
#[cfg(test)]
use rand_pcg::Pcg64;

#[cfg(test)]
fn scenario_a() -> (BopeInferencer, ndarray::Array2<f64>, Array1<f64>) {
    let inf = BopeInferencer {
        alpha: 1.1,
        lamb: 0.01,
        iter_infer: 50,
    };
    (inf, array![[0.9, 0.1], [0.2, 0.8]], array![3.0, 1.0])
}

#[test]
fn test_shifts_toward_word_profile() {
    let (inf, beta, cts) = scenario_a();
    let theta0 = array![0.5, 0.5];
    let mu = array![0.5, 0.5];
    let mut rng = Pcg64::seed_from_u64(42);
    let theta = inf.infer(beta.view(), cts.view(), theta0.view(), mu.view(), &mut rng);
    assert!(theta[0] > theta[1], "theta = {}", theta);
    assert!((theta.sum() - 1.0).abs() < 1e-10);
    assert!(theta.iter().all(|t| *t >= 0.0));
}

#[test]
fn test_stays_on_simplex() {
    let inf = BopeInferencer {
        alpha: 0.9,
        lamb: 2.0,
        iter_infer: 100,
    };
    let beta = array![[0.5, 0.3, 0.2, 0.0], [0.1, 0.1, 0.4, 0.4], [0.25, 0.25, 0.25, 0.25]];
    let cts = array![1.0, 4.0, 2.0, 7.0];
    let theta0 = array![0.2, 0.3, 0.5];
    let mu = array![1.5, 0.0, 0.3];
    for seed in 0..10 {
        let mut rng = Pcg64::seed_from_u64(seed);
        let theta = inf.infer(beta.view(), cts.view(), theta0.view(), mu.view(), &mut rng);
        assert!((theta.sum() - 1.0).abs() < 1e-10, "seed {}: {}", seed, theta);
        assert!(theta.iter().all(|t| *t >= 0.0), "seed {}: {}", seed, theta);
    }
}

#[test]
fn test_deterministic_for_seed() {
    let (inf, beta, cts) = scenario_a();
    let theta0 = array![0.3, 0.7];
    let mu = array![0.4, 0.6];
    let mut r1 = Pcg64::seed_from_u64(7);
    let mut r2 = Pcg64::seed_from_u64(7);
    let a = inf.infer(beta.view(), cts.view(), theta0.view(), mu.view(), &mut r1);
    let b = inf.infer(beta.view(), cts.view(), theta0.view(), mu.view(), &mut r2);
    assert_eq!(
        a.iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
        b.iter().map(|v| v.to_bits()).collect::<Vec<_>>()
    );
}

#[test]
fn test_single_iteration_is_identity() {
    let (mut inf, beta, cts) = scenario_a();
    inf.iter_infer = 1;
    let theta0 = array![0.3, 0.7];
    let mu = array![0.5, 0.5];
    let mut rng = Pcg64::seed_from_u64(1);
    let theta = inf.infer(beta.view(), cts.view(), theta0.view(), mu.view(), &mut rng);
    assert_eq!(theta, theta0);
}

#[test]
fn test_objective_prefers_fit() {
    let (inf, beta, cts) = scenario_a();
    let mu = array![0.5, 0.5];
    let good = inf.objective(beta.view(), cts.view(), mu.view(), array![0.8, 0.2].view());
    let bad = inf.objective(beta.view(), cts.view(), mu.view(), array![0.2, 0.8].view());
    assert!(good > bad);
}

#[test]
fn test_objective_value() {
    let inf = BopeInferencer {
        alpha: 2.0,
        lamb: 1.0,
        iter_infer: 10,
    };
    let beta = array![[0.5], [0.5]];
    let cts = array![2.0];
    let theta = array![0.5, 0.5];
    let mu = array![1.5, 0.5];
    let l = inf.objective(beta.view(), cts.view(), mu.view(), theta.view());
    let expected = 2.0 * 0.5f64.ln() + 2.0 * 0.5f64.ln() - 0.5;
    assert!((l - expected).abs() < 1e-12);
}

#[test]
fn test_argmax_skips_nan() {
    assert_eq!(argmax([f64::NAN, 1.0, 3.0, 3.0].into_iter()), 2);
    assert_eq!(argmax([f64::NAN, f64::NAN].into_iter()), 0);
}

#[test]
fn test_frank_wolfe_step() {
    let next = frank_wolfe_step(&array![0.5, 0.5], 1, 0.5);
    assert_eq!(next, array![0.25, 0.75]);
}
