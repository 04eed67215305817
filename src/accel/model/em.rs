// This file is part of CTMP.
// Copyright (C) 2024-2026 CTMP contributors.
// Licensed under the MIT license, see LICENSE.md for details.
// SPDX-License-Identifier: MIT

//! Variational EM driver for one training iteration.
use std::time::Instant;

use log::*;
use ndarray::{Array1, ArrayView2, ArrayViewMut1, Axis};
use rand_pcg::Pcg64;
use rayon::prelude::*;

use crate::config::CtmpConfig;
use crate::data::{Corpus, Document, RatingGraph};
use crate::errors::{CtmpError, CtmpResult};
use crate::parallel::maybe_fuse;
use crate::progress::{ProgressHandle, ProgressSink};

use super::affinity::{update_users, UserPassStats};
use super::bope::BopeInferencer;
use super::mstep::update_topics;
use super::offset::{aggregate_responsibility, offset_normalizer, solve_offset};
use super::phi::ResponsibilityStore;
use super::ModelState;

/// Summary of one EM iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IterationStats {
    pub iteration: usize,
    /// Users with ratings whose affinity was updated.
    pub users_updated: usize,
    /// Documents whose offset was solved from rating evidence.
    pub docs_rated: usize,
    /// Documents whose offset fell back to their proportions.
    pub docs_unrated: usize,
    /// Documents whose proportion update was discarded as non-finite.
    pub docs_skipped: usize,
    /// Frobenius norm of the change in topic proportions.
    pub theta_delta: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct DocOutcome {
    rated: bool,
    skipped: bool,
    sq_delta: f64,
}

/// Sequences the E and M steps.
///
/// The orchestrator holds only settings and the iteration counter; all
/// trainable state lives in [ModelState].
#[derive(Debug, Clone)]
pub struct EmOrchestrator {
    inferencer: BopeInferencer,
    lamb: f64,
    e: f64,
    f: f64,
    seed: u64,
    iter_train: usize,
    iteration: usize,
}

impl EmOrchestrator {
    pub fn new(config: &CtmpConfig) -> EmOrchestrator {
        EmOrchestrator {
            inferencer: BopeInferencer {
                alpha: config.alpha,
                lamb: config.lamb,
                iter_infer: config.iter_infer,
            },
            lamb: config.lamb,
            e: config.e,
            f: config.f,
            seed: config.seed,
            iter_train: config.iter_train,
            iteration: 0,
        }
    }

    /// Number of completed iterations.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Run `iter_train` iterations.
    pub fn fit(
        &mut self,
        state: &mut ModelState,
        corpus: &Corpus,
        ratings: &RatingGraph,
        sink: Option<&dyn ProgressSink>,
    ) -> CtmpResult<Vec<IterationStats>> {
        let mut history = Vec::with_capacity(self.iter_train);
        for _ in 0..self.iter_train {
            history.push(self.run_em(state, corpus, ratings, sink)?);
        }
        Ok(history)
    }

    /// Run one E-step followed by one M-step.
    pub fn run_em(
        &mut self,
        state: &mut ModelState,
        corpus: &Corpus,
        ratings: &RatingGraph,
        sink: Option<&dyn ProgressSink>,
    ) -> CtmpResult<IterationStats> {
        let iteration = self.iteration;
        info!("starting EM iteration {}", iteration);
        let (users, docs) = self.e_step(state, corpus, ratings, sink)?;

        let start = Instant::now();
        update_topics(&mut state.beta, state.theta.view(), corpus);
        debug!("M-step finished in {:.3}s", start.elapsed().as_secs_f64());

        let mut stats = IterationStats {
            iteration,
            users_updated: users.updated,
            ..IterationStats::default()
        };
        let mut sq_delta = 0.0;
        for out in docs {
            if out.rated {
                stats.docs_rated += 1;
            } else {
                stats.docs_unrated += 1;
            }
            if out.skipped {
                stats.docs_skipped += 1;
            }
            sq_delta += out.sq_delta;
        }
        stats.theta_delta = sq_delta.sqrt();
        info!(
            "iteration {}: {} users, {} rated / {} unrated documents, theta moved {:.4e}",
            iteration, stats.users_updated, stats.docs_rated, stats.docs_unrated, stats.theta_delta
        );

        self.iteration += 1;
        Ok(stats)
    }

    fn e_step(
        &self,
        state: &mut ModelState,
        corpus: &Corpus,
        ratings: &RatingGraph,
        sink: Option<&dyn ProgressSink>,
    ) -> CtmpResult<(UserPassStats, Vec<DocOutcome>)> {
        // snapshot before any user moves, so the document pass does not
        // depend on user order
        let norm_mu = offset_normalizer(&state.shp, &state.rte);

        let progress = ProgressHandle::new("users", state.shp.nrows(), sink);
        let users = update_users(
            &mut state.phi,
            &mut state.shp,
            &mut state.rte,
            state.mu.view(),
            ratings,
            self.e,
            self.f,
            &progress,
        );
        progress.finish();
        if users.degenerate > 0 {
            warn!(
                "iteration {}: {} rated documents had no responsibility mass",
                self.iteration, users.degenerate
            );
        }

        let progress = ProgressHandle::new("documents", state.theta.nrows(), sink);
        let phi = &state.phi;
        let beta = state.beta.view();
        let iter = state
            .theta
            .outer_iter_mut()
            .into_par_iter()
            .zip(state.mu.outer_iter_mut().into_par_iter())
            .enumerate();
        let docs = maybe_fuse(iter)
            .map(|(d, (theta_d, mu_d))| {
                let out = self.update_document(
                    d,
                    corpus.get(d),
                    ratings.raters_of(d),
                    phi,
                    beta,
                    &norm_mu,
                    theta_d,
                    mu_d,
                );
                progress.tick();
                out
            })
            .collect::<CtmpResult<Vec<_>>>()?;
        progress.finish();

        Ok((users, docs))
    }

    /// Solve the offset, then infer proportions, for one document.
    #[allow(clippy::too_many_arguments)]
    fn update_document(
        &self,
        d: usize,
        doc: &Document,
        raters: &[usize],
        phi: &ResponsibilityStore,
        beta: ArrayView2<'_, f64>,
        norm_mu: &Array1<f64>,
        mut theta_d: ArrayViewMut1<'_, f64>,
        mut mu_d: ArrayViewMut1<'_, f64>,
    ) -> CtmpResult<DocOutcome> {
        let rating_phi = if raters.is_empty() {
            None
        } else {
            Some(aggregate_responsibility(phi, raters, d))
        };
        solve_offset(
            theta_d.view(),
            rating_phi.as_ref(),
            norm_mu,
            self.lamb,
            mu_d.view_mut(),
        )
        .map_err(|e| CtmpError::Domain {
            iteration: self.iteration,
            document: d,
            topic: e.topic,
            detail: format!("offset discriminant {} is not a non-negative number", e.delta),
        })?;

        let beta_d = beta.select(Axis(1), &doc.ids);
        let cts = doc.weights();
        let mut rng = document_rng(self.seed, self.iteration, d);
        let theta = self.inferencer.infer(
            beta_d.view(),
            cts.view(),
            theta_d.view(),
            mu_d.view(),
            &mut rng,
        );

        let mut out = DocOutcome {
            rated: !raters.is_empty(),
            ..DocOutcome::default()
        };
        if theta.iter().all(|v| v.is_finite()) {
            out.sq_delta = (&theta - &theta_d.view()).mapv(|v| v * v).sum();
            theta_d.assign(&theta);
        } else {
            warn!(
                "iteration {}, document {}: proportion update is not finite, keeping previous value",
                self.iteration, d
            );
            out.skipped = true;
        }
        Ok(out)
    }
}

/// Random stream for one document in one iteration.
///
/// Streams depend only on the seed and the (iteration, document) pair, so
/// results do not depend on how documents are scheduled across threads.
fn document_rng(seed: u64, iteration: usize, doc: usize) -> Pcg64 {
    let state = ((seed as u128) << 64) | iteration as u128;
    Pcg64::new(state, doc as u128)
}

#[cfg(test)]
use crate::config::test_config;
#[cfg(test)]
use ndarray::{array, Array2};

#[cfg(test)]
struct Fixture {
    config: CtmpConfig,
    corpus: Corpus,
    ratings: RatingGraph,
    state: ModelState,
}

#[cfg(test)]
fn fixture() -> Fixture {
    let mut config = test_config(6, 5, 2, 4);
    config.chunk_users = 3;
    let corpus = Corpus::from_parts(
        vec![
            vec![0, 1],
            vec![1, 2, 4],
            vec![0, 3],
            vec![2, 3, 4],
            vec![0],
            vec![1, 4],
        ],
        vec![
            vec![3, 1],
            vec![1, 2, 1],
            vec![4, 1],
            vec![2, 2, 1],
            vec![6],
            vec![1, 3],
        ],
    )
    .expect("corpus should build");
    // document 4 has no raters and user 1 has no ratings
    let ratings = RatingGraph::from_user_lists(
        6,
        vec![vec![2, 5], vec![], vec![0, 1, 3], vec![1, 5]],
    )
    .expect("graph should build");
    let beta = array![
        [0.4, 0.1, 0.2, 0.2, 0.1],
        [0.1, 0.3, 0.1, 0.2, 0.3]
    ];
    let theta = array![
        [0.6, 0.4],
        [0.5, 0.5],
        [0.8, 0.2],
        [0.3, 0.7],
        [0.7, 0.3],
        [0.4, 0.6]
    ];
    let state = ModelState::initialize(&config, &corpus, &ratings, beta, theta)
        .expect("model should initialize");
    Fixture {
        config,
        corpus,
        ratings,
        state,
    }
}

#[test]
fn test_iteration_invariants() {
    let Fixture {
        config,
        corpus,
        ratings,
        mut state,
    } = fixture();
    let mut em = EmOrchestrator::new(&config);
    let stats = em
        .run_em(&mut state, &corpus, &ratings, None)
        .expect("iteration should succeed");

    assert_eq!(stats.iteration, 0);
    assert_eq!(em.iteration(), 1);
    assert_eq!(stats.users_updated, 3);
    assert_eq!(stats.docs_rated, 5);
    assert_eq!(stats.docs_unrated, 1);
    assert_eq!(stats.docs_skipped, 0);

    // responsibilities are distributions over topics for every rating
    for u in 0..4 {
        for &d in ratings.liked_by_user(u) {
            let sum: f32 = state.phi.user(u).row(d).sum();
            assert!((sum - 1.0).abs() < 1e-5, "user {} doc {}: {}", u, d, sum);
        }
    }
    // proportions stay on the simplex
    for row in state.theta.outer_iter() {
        assert!((row.sum() - 1.0).abs() < 1e-10);
        assert!(row.iter().all(|v| *v >= 0.0));
    }
    // offsets are non-negative
    assert!(state.mu.iter().all(|v| *v >= 0.0));
    // every term occurs, so every topic row is a distribution
    for row in state.beta.outer_iter() {
        assert!((row.sum() - 1.0).abs() < 1e-10);
    }
}

#[test]
fn test_user_with_two_documents() {
    let Fixture {
        config,
        corpus,
        ratings,
        mut state,
    } = fixture();
    state.shp.row_mut(0).assign(&array![2.0, 2.0]);
    state.rte.row_mut(0).assign(&array![1.0, 1.0]);
    state.mu.row_mut(2).assign(&array![0.6, 0.4]);
    state.mu.row_mut(5).assign(&array![0.3, 0.7]);

    let mut em = EmOrchestrator::new(&config);
    em.run_em(&mut state, &corpus, &ratings, None)
        .expect("iteration should succeed");

    for d in [2, 5] {
        let sum: f32 = state.phi.user(0).row(d).sum();
        assert!((sum - 1.0).abs() < 1e-6, "doc {} sums to {}", d, sum);
    }
    assert!((state.phi.get(0, 2, 0) - 0.6).abs() < 1e-6);
    assert!((state.phi.get(0, 5, 1) - 0.7).abs() < 1e-6);
}

#[test]
fn test_unrated_document_offset() {
    let Fixture {
        config,
        corpus,
        ratings,
        mut state,
    } = fixture();
    assert!(ratings.raters_of(4).is_empty());
    // perturb the offset so the fallback is observable
    state.mu.row_mut(4).assign(&array![0.1, 0.1]);
    let mut em = EmOrchestrator::new(&config);
    em.run_em(&mut state, &corpus, &ratings, None)
        .expect("iteration should succeed");
    assert_eq!(state.mu.row(4).to_vec(), vec![0.7, 0.3]);
}

#[test]
fn test_deterministic_runs() {
    let Fixture {
        config,
        corpus,
        ratings,
        state,
    } = fixture();
    let mut s1 = state.clone();
    let mut s2 = state;
    EmOrchestrator::new(&config)
        .fit(&mut s1, &corpus, &ratings, None)
        .expect("fit should succeed");
    // a single worker must reproduce the result of the shared pool
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(1)
        .build()
        .expect("pool should build");
    pool.install(|| EmOrchestrator::new(&config).fit(&mut s2, &corpus, &ratings, None))
        .expect("fit should succeed");
    let bits = |a: &Array2<f64>| a.iter().map(|v| v.to_bits()).collect::<Vec<_>>();
    assert_eq!(bits(&s1.theta), bits(&s2.theta));
    assert_eq!(bits(&s1.mu), bits(&s2.mu));
    assert_eq!(bits(&s1.beta), bits(&s2.beta));
    assert_eq!(bits(&s1.shp), bits(&s2.shp));
}

#[test]
fn test_offset_uses_normalizer_before_user_pass() {
    let Fixture {
        config,
        corpus,
        ratings,
        mut state,
    } = fixture();
    // the user pass rewrites this row, so the normalizer moves
    state.shp.row_mut(2).assign(&array![50.0, 20.0]);
    let theta0 = state.theta.clone();
    let norm_before = offset_normalizer(&state.shp, &state.rte);

    let mut em = EmOrchestrator::new(&config);
    em.run_em(&mut state, &corpus, &ratings, None)
        .expect("iteration should succeed");
    let norm_after = offset_normalizer(&state.shp, &state.rte);

    for d in 0..6 {
        let raters = ratings.raters_of(d);
        if raters.is_empty() {
            continue;
        }
        let rating_phi = aggregate_responsibility(&state.phi, raters, d);
        let mut expected = Array1::zeros(2);
        solve_offset(
            theta0.row(d),
            Some(&rating_phi),
            &norm_before,
            config.lamb,
            expected.view_mut(),
        )
        .expect("solve should succeed");
        let mut stale = Array1::zeros(2);
        solve_offset(
            theta0.row(d),
            Some(&rating_phi),
            &norm_after,
            config.lamb,
            stale.view_mut(),
        )
        .expect("solve should succeed");

        for k in 0..2 {
            assert!(
                (state.mu[[d, k]] - expected[k]).abs() < 1e-12,
                "doc {} topic {}: {} vs {}",
                d,
                k,
                state.mu[[d, k]],
                expected[k]
            );
        }
        assert!((&expected - &stale).iter().any(|v| v.abs() > 1e-6));
    }
}

#[test]
fn test_fit_history() {
    let Fixture {
        mut config,
        corpus,
        ratings,
        mut state,
    } = fixture();
    config.iter_train = 3;
    let mut em = EmOrchestrator::new(&config);
    let history = em
        .fit(&mut state, &corpus, &ratings, None)
        .expect("fit should succeed");
    assert_eq!(history.len(), 3);
    assert_eq!(
        history.iter().map(|s| s.iteration).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert_eq!(em.iteration(), 3);
}

#[test]
fn test_negative_responsibility_is_domain_error() {
    let Fixture {
        config,
        corpus,
        ratings,
        mut state,
    } = fixture();
    {
        let mut row = state.phi.user_mut(0);
        row[[2, 1]] = -1.0e6;
    }
    let em = EmOrchestrator::new(&config);
    let norm_mu = offset_normalizer(&state.shp, &state.rte);
    let beta = state.beta.clone();
    let res = em.update_document(
        2,
        corpus.get(2),
        ratings.raters_of(2),
        &state.phi,
        beta.view(),
        &norm_mu,
        state.theta.row_mut(2),
        state.mu.row_mut(2),
    );
    match res {
        Err(CtmpError::Domain {
            document, topic, ..
        }) => {
            assert_eq!(document, 2);
            assert_eq!(topic, 1);
        }
        r => panic!("unexpected result {:?}", r),
    }
}

#[test]
fn test_document_streams_differ() {
    use rand::Rng;
    let mut a = document_rng(3, 0, 0);
    let mut b = document_rng(3, 0, 1);
    let mut c = document_rng(3, 1, 0);
    let va: u64 = a.random();
    let vb: u64 = b.random();
    let vc: u64 = c.random();
    assert_ne!(va, vb);
    assert_ne!(va, vc);
    let mut a2 = document_rng(3, 0, 0);
    assert_eq!(va, a2.random::<u64>());
}
