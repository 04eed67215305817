// This file is part of CTMP.
// Copyright (C) 2024-2026 CTMP contributors.
// Licensed under the MIT license, see LICENSE.md for details.
// SPDX-License-Identifier: MIT

//! Collaborative topic model state and its variational EM updates.
use log::*;
use ndarray::Array2;

use crate::config::CtmpConfig;
use crate::data::{Corpus, RatingGraph};
use crate::ensure_shape;
use crate::errors::{CtmpError, CtmpResult};

pub mod affinity;
pub mod bope;
mod em;
pub mod mstep;
pub mod offset;
mod phi;

pub use em::{EmOrchestrator, IterationStats};
pub use phi::ResponsibilityStore;

/// The trainable state of a CTMP model.
#[derive(Debug, Clone)]
pub struct ModelState {
    /// Topic-term distribution, `[topic, term]`.
    pub beta: Array2<f64>,
    /// Topic proportions, `[document, topic]`.
    pub theta: Array2<f64>,
    /// Topic offsets, `[document, topic]`.
    pub mu: Array2<f64>,
    /// Rating responsibilities, `[user, document, topic]`.
    pub phi: ResponsibilityStore,
    /// Gamma affinity shape, `[user, topic]`.
    pub shp: Array2<f64>,
    /// Gamma affinity rate, `[user, topic]`.
    pub rte: Array2<f64>,
}

impl ModelState {
    /// Set up the model from initial topics and proportions.
    ///
    /// All dimensions are checked against the configuration, the corpus and
    /// the rating graph before anything is allocated.
    pub fn initialize(
        config: &CtmpConfig,
        corpus: &Corpus,
        ratings: &RatingGraph,
        beta: Array2<f64>,
        theta: Array2<f64>,
    ) -> CtmpResult<ModelState> {
        config.validate()?;
        let k = config.num_topics;
        ensure_shape!("initial beta", (k, config.num_terms), beta.dim());
        ensure_shape!("initial theta", (config.num_docs, k), theta.dim());
        ensure_shape!("corpus documents", config.num_docs, corpus.len());
        ensure_shape!("rating graph users", config.user_size, ratings.n_users());
        ensure_shape!("rating graph documents", config.num_docs, ratings.n_docs());
        corpus.check_vocabulary(config.num_terms)?;

        for (name, arr) in [("initial beta", &beta), ("initial theta", &theta)] {
            if let Some(v) = arr.iter().find(|v| !(v.is_finite() && **v >= 0.0)) {
                return Err(CtmpError::Config(format!(
                    "{} has invalid entry {}",
                    name, v
                )));
            }
        }

        info!(
            "initializing model with {} topics, {} documents, {} terms, {} users ({} ratings)",
            k,
            config.num_docs,
            config.num_terms,
            config.user_size,
            ratings.n_edges()
        );

        let mu = theta.clone();
        let phi =
            ResponsibilityStore::zeros(config.user_size, config.num_docs, k, config.chunk_users);
        let shp = Array2::from_elem((config.user_size, k), config.e);
        let rte = Array2::from_elem((config.user_size, k), config.f);

        Ok(ModelState {
            beta,
            theta,
            mu,
            phi,
            shp,
            rte,
        })
    }

    pub fn n_topics(&self) -> usize {
        self.beta.nrows()
    }

    pub fn n_docs(&self) -> usize {
        self.theta.nrows()
    }

    pub fn n_users(&self) -> usize {
        self.shp.nrows()
    }
}

#[cfg(test)]
use crate::config::test_config;

#[test]
fn test_initialize() {
    let cfg = test_config(2, 3, 2, 3);
    let corpus = Corpus::from_parts(vec![vec![0, 2], vec![1]], vec![vec![1, 1], vec![4]])
        .expect("corpus should build");
    let ratings = RatingGraph::from_user_lists(2, vec![vec![0], vec![0, 1], vec![]])
        .expect("graph should build");
    let beta = Array2::from_elem((2, 3), 1.0 / 3.0);
    let theta = Array2::from_elem((2, 2), 0.5);

    let state = ModelState::initialize(&cfg, &corpus, &ratings, beta, theta.clone())
        .expect("model should initialize");
    assert_eq!(state.mu, theta);
    assert!(state.shp.iter().all(|v| *v == cfg.e));
    assert!(state.rte.iter().all(|v| *v == cfg.f));
    assert_eq!(state.phi.n_users(), 3);
    assert_eq!(state.n_topics(), 2);
}

#[test]
fn test_initialize_bad_beta() {
    let cfg = test_config(2, 3, 2, 3);
    let corpus = Corpus::from_parts(vec![vec![0], vec![1]], vec![vec![1], vec![4]])
        .expect("corpus should build");
    let ratings =
        RatingGraph::from_user_lists(2, vec![vec![], vec![], vec![]]).expect("graph should build");
    let beta = Array2::from_elem((2, 4), 0.25);
    let theta = Array2::from_elem((2, 2), 0.5);
    let res = ModelState::initialize(&cfg, &corpus, &ratings, beta, theta);
    assert!(matches!(
        res,
        Err(CtmpError::ShapeMismatch {
            what: "initial beta",
            ..
        })
    ));
}

#[test]
fn test_initialize_bad_users() {
    let cfg = test_config(2, 3, 2, 3);
    let corpus = Corpus::from_parts(vec![vec![0], vec![1]], vec![vec![1], vec![4]])
        .expect("corpus should build");
    let ratings = RatingGraph::from_user_lists(2, vec![vec![0]]).expect("graph should build");
    let beta = Array2::from_elem((2, 3), 1.0 / 3.0);
    let theta = Array2::from_elem((2, 2), 0.5);
    let res = ModelState::initialize(&cfg, &corpus, &ratings, beta, theta);
    assert!(matches!(
        res,
        Err(CtmpError::ShapeMismatch {
            what: "rating graph users",
            ..
        })
    ));
}

#[test]
fn test_initialize_bad_vocabulary() {
    let cfg = test_config(2, 3, 2, 1);
    let corpus = Corpus::from_parts(vec![vec![0], vec![7]], vec![vec![1], vec![4]])
        .expect("corpus should build");
    let ratings = RatingGraph::from_user_lists(2, vec![vec![1]]).expect("graph should build");
    let beta = Array2::from_elem((2, 3), 1.0 / 3.0);
    let theta = Array2::from_elem((2, 2), 0.5);
    let res = ModelState::initialize(&cfg, &corpus, &ratings, beta, theta);
    assert!(matches!(res, Err(CtmpError::IndexOutOfRange { index: 7, .. })));
}
