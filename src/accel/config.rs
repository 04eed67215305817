// This file is part of CTMP.
// Copyright (C) 2024-2026 CTMP contributors.
// Licensed under the MIT license, see LICENSE.md for details.
// SPDX-License-Identifier: MIT

//! Model settings.
use serde::{Deserialize, Serialize};

use crate::errors::{CtmpError, CtmpResult};

fn default_chunk_users() -> usize {
    1000
}

/// Settings for a CTMP model and its training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CtmpConfig {
    pub num_docs: usize,
    pub num_terms: usize,
    pub num_topics: usize,
    pub user_size: usize,
    /// Precision of the topic offset around the topic proportions.
    pub lamb: f64,
    /// Gamma prior shape for user affinity.
    pub e: f64,
    /// Gamma prior rate for user affinity.
    pub f: f64,
    /// Dirichlet-like prior on topic proportions.
    pub alpha: f64,
    /// Inner ascent iterations per document.
    pub iter_infer: usize,
    /// Outer EM iterations.
    pub iter_train: usize,
    /// Number of top terms to report for each topic.
    pub tops: usize,
    /// Users per responsibility chunk.
    #[serde(default = "default_chunk_users")]
    pub chunk_users: usize,
    #[serde(default)]
    pub seed: u64,
}

impl CtmpConfig {
    /// Parse and validate settings from a JSON document.
    pub fn from_json(text: &str) -> CtmpResult<CtmpConfig> {
        let cfg: CtmpConfig = serde_json::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check the settings for values the update equations cannot use.
    pub fn validate(&self) -> CtmpResult<()> {
        if self.num_topics == 0 {
            return Err(CtmpError::Config("num_topics must be positive".into()));
        }
        if self.chunk_users == 0 {
            return Err(CtmpError::Config("chunk_users must be positive".into()));
        }
        if self.iter_infer == 0 {
            return Err(CtmpError::Config("iter_infer must be positive".into()));
        }
        for (name, value) in [("lamb", self.lamb), ("e", self.e), ("f", self.f)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(CtmpError::Config(format!(
                    "{} must be positive and finite, got {}",
                    name, value
                )));
            }
        }
        if !self.alpha.is_finite() {
            return Err(CtmpError::Config(format!(
                "alpha must be finite, got {}",
                self.alpha
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_config(
    num_docs: usize,
    num_terms: usize,
    num_topics: usize,
    users: usize,
) -> CtmpConfig {
    CtmpConfig {
        num_docs,
        num_terms,
        num_topics,
        user_size: users,
        lamb: 0.01,
        e: 0.3,
        f: 0.3,
        alpha: 1.1,
        iter_infer: 50,
        iter_train: 2,
        tops: 5,
        chunk_users: 1000,
        seed: 42,
    }
}

#[test]
fn test_parse_defaults() {
    let cfg = CtmpConfig::from_json(
        r#"{"num_docs": 639, "num_terms": 8000, "num_topics": 50, "user_size": 1915,
            "lamb": 0.01, "e": 0.3, "f": 0.3, "alpha": 1.1,
            "iter_infer": 50, "iter_train": 20, "tops": 10}"#,
    )
    .expect("config should parse");
    assert_eq!(cfg.num_topics, 50);
    assert_eq!(cfg.chunk_users, 1000);
    assert_eq!(cfg.seed, 0);
}

#[test]
fn test_parse_missing_field() {
    let res = CtmpConfig::from_json(r#"{"num_docs": 10}"#);
    assert!(matches!(res, Err(CtmpError::Parse(_))));
}

#[test]
fn test_reject_zero_lambda() {
    let mut cfg = test_config(2, 2, 2, 2);
    cfg.lamb = 0.0;
    assert!(matches!(cfg.validate(), Err(CtmpError::Config(_))));
}

#[test]
fn test_reject_zero_chunk() {
    let mut cfg = test_config(2, 2, 2, 2);
    cfg.chunk_users = 0;
    assert!(matches!(cfg.validate(), Err(CtmpError::Config(_))));
}
