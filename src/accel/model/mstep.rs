// This file is part of CTMP.
// Copyright (C) 2024-2026 CTMP contributors.
// Licensed under the MIT license, see LICENSE.md for details.
// SPDX-License-Identifier: MIT

//! M-step: re-estimate the topic-term distribution.
use log::*;
use ndarray::{Array2, ArrayView2, Axis};
use rayon::prelude::*;

use crate::data::Corpus;
use crate::parallel::maybe_fuse;

/// Compute a fresh topic-term distribution from topic proportions and counts.
///
/// Each topic row is accumulated by a single task, so there is no write
/// contention and the sums are taken in document order.  Terms with no mass
/// in any topic stay zero; every other column is renormalized per topic
/// over the terms with mass.
pub fn estimate_topics(
    theta: ArrayView2<'_, f64>,
    corpus: &Corpus,
    n_terms: usize,
) -> Array2<f64> {
    let n_topics = theta.ncols();
    let mut raw = Array2::<f64>::zeros((n_topics, n_terms));

    maybe_fuse(raw.outer_iter_mut().into_par_iter().enumerate()).for_each(|(k, mut row)| {
        for (d, doc) in corpus.docs().iter().enumerate() {
            let w = theta[[d, k]];
            for (&id, &c) in doc.ids.iter().zip(doc.cts.iter()) {
                row[id] += w * c as f64;
            }
        }
    });

    let col_mass = raw.sum_axis(Axis(0));
    let live: Vec<usize> = col_mass
        .iter()
        .enumerate()
        .filter(|(_, m)| **m != 0.0)
        .map(|(j, _)| j)
        .collect();
    debug!("{} of {} terms carry topic mass", live.len(), n_terms);

    let mut beta = Array2::zeros((n_topics, n_terms));
    for (k, (src, mut dst)) in raw.outer_iter().zip(beta.outer_iter_mut()).enumerate() {
        let norm: f64 = live.iter().map(|j| src[*j]).sum();
        if !(norm > 0.0 && norm.is_finite()) {
            warn!("topic {} has no usable mass (total {}), leaving it empty", k, norm);
            continue;
        }
        for &j in &live {
            dst[j] = src[j] / norm;
        }
    }

    beta
}

/// Replace `beta` with the estimate from the current proportions.
pub fn update_topics(beta: &mut Array2<f64>, theta: ArrayView2<'_, f64>, corpus: &Corpus) {
    let n_terms = beta.ncols();
    *beta = estimate_topics(theta, corpus, n_terms);
}

#[cfg(test)]
use ndarray::array;

#[cfg(test)]
fn small_corpus() -> Corpus {
    Corpus::from_parts(
        vec![vec![0, 2], vec![2, 3], vec![0]],
        vec![vec![3, 1], vec![2, 2], vec![5]],
    )
    .expect("corpus should build")
}

#[test]
fn test_rows_normalized() {
    let corpus = small_corpus();
    let theta = array![[0.7, 0.3], [0.1, 0.9], [0.5, 0.5]];
    let beta = estimate_topics(theta.view(), &corpus, 5);
    for k in 0..2 {
        assert!((beta.row(k).sum() - 1.0).abs() < 1e-12);
    }
    // terms 1 and 4 never occur
    for j in [1, 4] {
        assert!(beta.column(j).iter().all(|v| *v == 0.0));
    }
}

#[test]
fn test_expected_values() {
    let corpus = small_corpus();
    let theta = array![[1.0, 0.0], [0.0, 1.0], [1.0, 0.0]];
    let beta = estimate_topics(theta.view(), &corpus, 4);
    // topic 0 sees docs 0 and 2: term 0 -> 8, term 2 -> 1
    assert!((beta[[0, 0]] - 8.0 / 9.0).abs() < 1e-12);
    assert!((beta[[0, 2]] - 1.0 / 9.0).abs() < 1e-12);
    assert_eq!(beta[[0, 3]], 0.0);
    // topic 1 sees doc 1 only
    assert!((beta[[1, 2]] - 0.5).abs() < 1e-12);
    assert!((beta[[1, 3]] - 0.5).abs() < 1e-12);
}

#[test]
fn test_fixed_point() {
    let corpus = small_corpus();
    let theta = array![[0.7, 0.3], [0.1, 0.9], [0.5, 0.5]];
    let mut beta = Array2::from_elem((2, 5), 0.2);
    update_topics(&mut beta, theta.view(), &corpus);
    let first = beta.clone();
    update_topics(&mut beta, theta.view(), &corpus);
    assert_eq!(beta, first);
}

#[test]
fn test_empty_topic() {
    let corpus = small_corpus();
    let theta = array![[1.0, 0.0], [1.0, 0.0], [1.0, 0.0]];
    let beta = estimate_topics(theta.view(), &corpus, 4);
    assert!((beta.row(0).sum() - 1.0).abs() < 1e-12);
    assert!(beta.row(1).iter().all(|v| *v == 0.0));
}
