// This file is part of CTMP.
// Copyright (C) 2024-2026 CTMP contributors.
// Licensed under the MIT license, see LICENSE.md for details.
// SPDX-License-Identifier: MIT

//! Per-user E-step: rating responsibilities and Gamma affinity parameters.
use log::*;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2, Axis, Zip};
use rayon::prelude::*;
use statrs::function::gamma::digamma;

use crate::data::RatingGraph;
use crate::parallel::maybe_fuse;
use crate::progress::ProgressHandle;

use super::phi::ResponsibilityStore;

/// Summary of one pass over the users.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserPassStats {
    /// Users with at least one liked document.
    pub updated: usize,
    /// Liked documents whose responsibilities had no usable mass.
    pub degenerate: usize,
}

/// Expected log-affinity weights `exp(ψ(shp) - ln(rte))` for one user.
pub fn affinity_weights(shp: ArrayView1<'_, f64>, rte: ArrayView1<'_, f64>) -> Array1<f64> {
    Zip::from(&shp)
        .and(&rte)
        .map_collect(|s, r| (digamma(*s) - r.ln()).exp())
}

/// Update one user's responsibilities and Gamma parameters.
///
/// Returns `None` when the user has no liked documents (nothing changes),
/// otherwise the number of liked documents whose unnormalized
/// responsibilities summed to zero and were replaced by a uniform row.
#[allow(clippy::too_many_arguments)]
pub fn update_user(
    liked: &[usize],
    mu: &ArrayView2<'_, f64>,
    mu_total: &ArrayView1<'_, f64>,
    e: f64,
    f: f64,
    mut phi_u: ArrayViewMut2<'_, f32>,
    mut shp_u: ArrayViewMut1<'_, f64>,
    mut rte_u: ArrayViewMut1<'_, f64>,
) -> Option<usize> {
    if liked.is_empty() {
        return None;
    }

    let weights = affinity_weights(shp_u.view(), rte_u.view());
    let nk = weights.len();
    let mut totals = Array1::<f64>::zeros(nk);
    let mut row = Array1::<f64>::zeros(nk);
    let mut degenerate = 0;

    for &j in liked {
        Zip::from(&mut row)
            .and(mu.row(j))
            .and(&weights)
            .for_each(|r, m, w| *r = m * w);
        let sum = row.sum();
        if sum > 0.0 && sum.is_finite() {
            row /= sum;
        } else {
            row.fill(1.0 / nk as f64);
            degenerate += 1;
        }
        totals += &row;
        Zip::from(phi_u.row_mut(j))
            .and(&row)
            .for_each(|p, r| *p = *r as f32);
    }

    shp_u.assign(&totals.mapv(|t| e + t));
    // the rate uses every document's offset, not only the liked ones
    rte_u.assign(&mu_total.mapv(|m| f + m));

    Some(degenerate)
}

/// Run the per-user update over every user.
///
/// Users are independent given the current offsets, so each block of the
/// responsibility store is processed in parallel.
#[allow(clippy::too_many_arguments)]
pub fn update_users(
    phi: &mut ResponsibilityStore,
    shp: &mut Array2<f64>,
    rte: &mut Array2<f64>,
    mu: ArrayView2<'_, f64>,
    ratings: &RatingGraph,
    e: f64,
    f: f64,
    progress: &ProgressHandle<'_>,
) -> UserPassStats {
    let mu_total = mu.sum_axis(Axis(0));
    let mu_total = mu_total.view();
    let chunk = phi.chunk_size();
    let mut stats = UserPassStats::default();

    let blocks = phi
        .blocks_mut()
        .zip(shp.axis_chunks_iter_mut(Axis(0), chunk))
        .zip(rte.axis_chunks_iter_mut(Axis(0), chunk));
    for (c, ((mut block, mut shp_b), mut rte_b)) in blocks.enumerate() {
        let base = c * chunk;
        trace!("updating users {}..{}", base, base + block.len_of(Axis(0)));
        let iter = block
            .outer_iter_mut()
            .into_par_iter()
            .zip(shp_b.outer_iter_mut().into_par_iter())
            .zip(rte_b.outer_iter_mut().into_par_iter())
            .enumerate();
        let (updated, degenerate) = maybe_fuse(iter)
            .map(|(i, ((phi_u, shp_u), rte_u))| {
                let u = base + i;
                let res = update_user(
                    ratings.liked_by_user(u),
                    &mu,
                    &mu_total,
                    e,
                    f,
                    phi_u,
                    shp_u,
                    rte_u,
                );
                progress.tick();
                match res {
                    Some(bad) => {
                        if bad > 0 {
                            warn!(
                                "user {}: {} liked documents had no responsibility mass",
                                u, bad
                            );
                        }
                        (1, bad)
                    }
                    None => (0, 0),
                }
            })
            .reduce(|| (0, 0), |a, b| (a.0 + b.0, a.1 + b.1));
        stats.updated += updated;
        stats.degenerate += degenerate;
    }

    stats
}

#[cfg(test)]
use ndarray::array;

#[test]
fn test_liked_rows_normalized() {
    let mut mu = Array2::from_elem((6, 2), 0.5);
    mu.row_mut(2).assign(&array![0.6, 0.4]);
    mu.row_mut(5).assign(&array![0.3, 0.7]);
    let mu_total = mu.sum_axis(Axis(0));

    let mut phi = Array2::<f32>::zeros((6, 2));
    let mut shp = array![2.0, 2.0];
    let mut rte = array![1.0, 1.0];

    let res = update_user(
        &[2, 5],
        &mu.view(),
        &mu_total.view(),
        0.3,
        0.3,
        phi.view_mut(),
        shp.view_mut(),
        rte.view_mut(),
    );
    assert_eq!(res, Some(0));

    for j in [2, 5] {
        let sum: f32 = phi.row(j).sum();
        assert!((sum - 1.0).abs() < 1e-6, "row {} sums to {}", j, sum);
    }
    // equal affinity weights leave the offsets' proportions unchanged
    assert!((phi[[2, 0]] - 0.6).abs() < 1e-6);
    assert!((phi[[5, 1]] - 0.7).abs() < 1e-6);
    // unliked documents stay untouched
    assert_eq!(phi.row(0).sum(), 0.0);

    assert!((shp[0] - 1.2).abs() < 1e-12);
    assert!((shp[1] - 1.4).abs() < 1e-12);
    assert!((rte[0] - (0.3 + mu_total[0])).abs() < 1e-12);
    assert!((rte[1] - (0.3 + mu_total[1])).abs() < 1e-12);
}

#[test]
fn test_weights_shift_responsibility() {
    let mu = array![[0.5, 0.5]];
    let mu_total = mu.sum_axis(Axis(0));
    let mut phi = Array2::<f32>::zeros((1, 2));
    let mut shp = array![5.0, 1.0];
    let mut rte = array![1.0, 1.0];
    update_user(
        &[0],
        &mu.view(),
        &mu_total.view(),
        0.3,
        0.3,
        phi.view_mut(),
        shp.view_mut(),
        rte.view_mut(),
    );
    assert!(phi[[0, 0]] > phi[[0, 1]]);
}

#[test]
fn test_empty_user_skipped() {
    let mu = array![[0.5, 0.5]];
    let mu_total = mu.sum_axis(Axis(0));
    let mut phi = Array2::<f32>::zeros((1, 2));
    let mut shp = array![2.0, 3.0];
    let mut rte = array![1.0, 4.0];
    let res = update_user(
        &[],
        &mu.view(),
        &mu_total.view(),
        0.3,
        0.3,
        phi.view_mut(),
        shp.view_mut(),
        rte.view_mut(),
    );
    assert_eq!(res, None);
    assert_eq!(shp, array![2.0, 3.0]);
    assert_eq!(rte, array![1.0, 4.0]);
    assert_eq!(phi.sum(), 0.0);
}

#[test]
fn test_zero_offsets_fall_back_to_uniform() {
    let mu = array![[0.0, 0.0], [0.2, 0.8]];
    let mu_total = mu.sum_axis(Axis(0));
    let mut phi = Array2::<f32>::zeros((2, 2));
    let mut shp = array![1.0, 1.0];
    let mut rte = array![1.0, 1.0];
    let res = update_user(
        &[0, 1],
        &mu.view(),
        &mu_total.view(),
        0.3,
        0.3,
        phi.view_mut(),
        shp.view_mut(),
        rte.view_mut(),
    );
    assert_eq!(res, Some(1));
    assert_eq!(phi.row(0).to_vec(), vec![0.5, 0.5]);
}

#[test]
fn test_pass_over_chunks() {
    let n_users = 5;
    let ratings = RatingGraph::from_user_lists(
        3,
        vec![vec![0, 2], vec![], vec![1], vec![0, 1, 2], vec![2]],
    )
    .expect("graph should build");
    let mu = array![[0.2, 0.8], [0.5, 0.5], [0.9, 0.1]];
    let mut phi = ResponsibilityStore::zeros(n_users, 3, 2, 2);
    let mut shp = Array2::from_elem((n_users, 2), 0.3);
    let mut rte = Array2::from_elem((n_users, 2), 0.3);
    let pb = ProgressHandle::new("users", n_users, None);

    let stats = update_users(
        &mut phi,
        &mut shp,
        &mut rte,
        mu.view(),
        &ratings,
        0.3,
        0.3,
        &pb,
    );
    assert_eq!(stats.updated, 4);
    assert_eq!(stats.degenerate, 0);
    assert_eq!(pb.completed(), n_users);

    for u in 0..n_users {
        let liked = ratings.liked_by_user(u);
        for d in 0..3 {
            let sum: f32 = phi.user(u).row(d).sum();
            if liked.contains(&d) {
                assert!((sum - 1.0).abs() < 1e-5, "user {} doc {} sums to {}", u, d, sum);
            } else {
                assert_eq!(sum, 0.0);
            }
        }
    }
    // user 1 has no ratings and keeps its prior
    assert_eq!(shp.row(1).to_vec(), vec![0.3, 0.3]);
    assert_eq!(rte.row(1).to_vec(), vec![0.3, 0.3]);
    // user 4 liked only document 2
    assert!((shp[[4, 0]] - (0.3 + phi.get(4, 2, 0) as f64)).abs() < 1e-6);
    assert!((rte[[4, 0]] - 1.9).abs() < 1e-12);
}
