// This file is part of CTMP.
// Copyright (C) 2024-2026 CTMP contributors.
// Licensed under the MIT license, see LICENSE.md for details.
// SPDX-License-Identifier: MIT

//! Closed-form topic offset solve for one document.
use ndarray::{Array1, Array2, ArrayView1, ArrayViewMut1, Axis};

use super::phi::ResponsibilityStore;

/// The offset quadratic had no real non-negative root.
#[derive(Debug, Clone, PartialEq)]
pub struct OffsetDomainError {
    pub topic: usize,
    pub delta: f64,
}

/// Global offset normalizer `Σ_u shp[u,k] / rte[u,k]`.
///
/// This must be taken before the users are updated in an E-step.
pub fn offset_normalizer(shp: &Array2<f64>, rte: &Array2<f64>) -> Array1<f64> {
    (shp / rte).sum_axis(Axis(0))
}

/// Sum the responsibilities of document `d` over the users who liked it.
pub fn aggregate_responsibility(
    phi: &ResponsibilityStore,
    raters: &[usize],
    d: usize,
) -> Array1<f64> {
    let mut total = Array1::zeros(phi.n_topics());
    for &u in raters {
        let row = phi.user(u);
        total
            .iter_mut()
            .zip(row.row(d).iter())
            .for_each(|(t, p)| *t += *p as f64);
    }
    total
}

/// Solve for the offset of one document.
///
/// With no rating evidence the offset collapses onto the topic proportions.
/// Otherwise each topic takes the non-negative root of
/// `λ·μ² + (norm_mu - λ·θ)·μ - rating_phi = 0`.
pub fn solve_offset(
    theta_d: ArrayView1<'_, f64>,
    rating_phi: Option<&Array1<f64>>,
    norm_mu: &Array1<f64>,
    lamb: f64,
    mut mu_d: ArrayViewMut1<'_, f64>,
) -> Result<(), OffsetDomainError> {
    let rating_phi = match rating_phi {
        Some(rp) => rp,
        None => {
            mu_d.assign(&theta_d);
            return Ok(());
        }
    };

    for k in 0..theta_d.len() {
        let temp = lamb * theta_d[k] - norm_mu[k];
        let delta = temp * temp + 4.0 * lamb * rating_phi[k];
        if !(delta >= 0.0 && delta.is_finite()) {
            return Err(OffsetDomainError { topic: k, delta });
        }
        // for negative `temp` the textbook root cancels; use its conjugate form
        mu_d[k] = if temp < 0.0 {
            2.0 * rating_phi[k] / (delta.sqrt() - temp)
        } else {
            (temp + delta.sqrt()) / (2.0 * lamb)
        };
    }
    Ok(())
}

#[cfg(test)]
use ndarray::array;

#[test]
fn test_unrated_copies_theta() {
    let theta = array![0.7, 0.3];
    let mut mu = array![0.1, 0.9];
    solve_offset(theta.view(), None, &array![4.0, 2.0], 0.01, mu.view_mut())
        .expect("solve should succeed");
    assert_eq!(mu, theta);
}

#[test]
fn test_root_satisfies_quadratic() {
    let theta = array![0.6, 0.4];
    let rating_phi = array![1.5, 0.5];
    let norm_mu = array![3.0, 2.5];
    let lamb = 0.5;
    let mut mu = Array1::zeros(2);
    solve_offset(theta.view(), Some(&rating_phi), &norm_mu, lamb, mu.view_mut())
        .expect("solve should succeed");
    for k in 0..2 {
        let m = mu[k];
        assert!(m >= 0.0);
        let resid = lamb * m * m + (norm_mu[k] - lamb * theta[k]) * m - rating_phi[k];
        assert!(resid.abs() < 1e-10, "residual {} for topic {}", resid, k);
    }
}

#[test]
fn test_zero_evidence_root() {
    // without responsibility mass the root is max(θ - norm/λ, 0)
    let theta = array![0.5];
    let mut mu = Array1::zeros(1);
    solve_offset(theta.view(), Some(&array![0.0]), &array![1.0], 0.1, mu.view_mut())
        .expect("solve should succeed");
    assert_eq!(mu[0], 0.0);
}

#[test]
fn test_large_normalizer_keeps_precision() {
    // λθ - norm is hugely negative, so the root is about r / (norm - λθ)
    let theta = array![0.5];
    let rating_phi = array![1.0e-3];
    let norm_mu = array![1.0e8];
    let lamb = 0.01;
    let mut mu = Array1::zeros(1);
    solve_offset(theta.view(), Some(&rating_phi), &norm_mu, lamb, mu.view_mut())
        .expect("solve should succeed");
    let approx = rating_phi[0] / (norm_mu[0] - lamb * theta[0]);
    assert!(mu[0] > 0.0);
    assert!(((mu[0] - approx) / approx).abs() < 1e-12, "root {} vs {}", mu[0], approx);
}

#[test]
fn test_negative_discriminant() {
    let theta = array![0.5, 0.5];
    let mut mu = Array1::zeros(2);
    let res = solve_offset(
        theta.view(),
        Some(&array![0.2, -50.0]),
        &array![1.0, 1.0],
        0.1,
        mu.view_mut(),
    );
    match res {
        Err(e) => {
            assert_eq!(e.topic, 1);
            assert!(e.delta < 0.0);
        }
        Ok(()) => panic!("negative discriminant accepted"),
    }
}

#[test]
fn test_aggregate() {
    let mut phi = ResponsibilityStore::zeros(3, 2, 2, 2);
    {
        let mut row = phi.user_mut(0);
        row[[1, 0]] = 0.25;
        row[[1, 1]] = 0.75;
    }
    {
        let mut row = phi.user_mut(2);
        row[[1, 0]] = 0.5;
        row[[1, 1]] = 0.5;
    }
    let total = aggregate_responsibility(&phi, &[0, 2], 1);
    assert_eq!(total, array![0.75, 1.25]);
    let none = aggregate_responsibility(&phi, &[1], 1);
    assert_eq!(none, array![0.0, 0.0]);
}

#[test]
fn test_normalizer() {
    let shp = array![[2.0, 1.0], [4.0, 3.0]];
    let rte = array![[1.0, 2.0], [2.0, 3.0]];
    assert_eq!(offset_normalizer(&shp, &rte), array![4.0, 1.5]);
}
