// This file is part of CTMP.
// Copyright (C) 2024-2026 CTMP contributors.
// Licensed under the MIT license, see LICENSE.md for details.
// SPDX-License-Identifier: MIT

//! Top-term summaries of trained topics.
use std::cmp::Reverse;

use ndarray::ArrayView2;
use ordered_float::NotNan;
use rayon::prelude::*;
use serde::Serialize;

use crate::errors::{CtmpError, CtmpResult};

/// The highest-weight terms of one topic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicSummary {
    pub topic: usize,
    /// Vocabulary indices, highest weight first.
    pub terms: Vec<usize>,
    pub weights: Vec<f64>,
}

/// Select the `tops` highest-weight terms of every topic.
///
/// Ties are broken toward the lower vocabulary index.
pub fn top_terms(beta: ArrayView2<'_, f64>, tops: usize) -> CtmpResult<Vec<TopicSummary>> {
    beta.outer_iter()
        .into_par_iter()
        .enumerate()
        .map(|(k, row)| -> CtmpResult<TopicSummary> {
            let mut scored = row
                .iter()
                .enumerate()
                .map(|(j, w)| {
                    NotNan::new(*w)
                        .map(|w| (j, w))
                        .map_err(|_| CtmpError::NanWeight { topic: k, term: j })
                })
                .collect::<CtmpResult<Vec<_>>>()?;
            // stable sort keeps lower indices first among equal weights
            scored.sort_by_key(|(_j, w)| Reverse(*w));
            scored.truncate(tops);
            Ok(TopicSummary {
                topic: k,
                terms: scored.iter().map(|(j, _)| *j).collect(),
                weights: scored.iter().map(|(_, w)| w.into_inner()).collect(),
            })
        })
        .collect()
}

/// Render topic summaries as JSON for a results writer.
pub fn summaries_to_json(summaries: &[TopicSummary]) -> CtmpResult<String> {
    Ok(serde_json::to_string_pretty(summaries)?)
}

#[cfg(test)]
use ndarray::array;

#[test]
fn test_top_terms() {
    let beta = array![[0.1, 0.5, 0.1, 0.3], [0.4, 0.0, 0.4, 0.2]];
    let tops = top_terms(beta.view(), 2).expect("top terms should succeed");
    assert_eq!(tops.len(), 2);
    assert_eq!(tops[0].terms, vec![1, 3]);
    assert_eq!(tops[0].weights, vec![0.5, 0.3]);
    assert_eq!(tops[1].terms, vec![0, 2]);
}

#[test]
fn test_more_tops_than_terms() {
    let beta = array![[0.25, 0.75]];
    let tops = top_terms(beta.view(), 10).expect("top terms should succeed");
    assert_eq!(tops[0].terms, vec![1, 0]);
}

#[test]
fn test_nan_weight() {
    let beta = array![[0.25, f64::NAN]];
    assert!(matches!(
        top_terms(beta.view(), 1),
        Err(CtmpError::NanWeight { topic: 0, term: 1 })
    ));
}

#[test]
fn test_json() {
    let beta = array![[0.25, 0.75]];
    let tops = top_terms(beta.view(), 1).expect("top terms should succeed");
    let json = summaries_to_json(&tops).expect("serialization should succeed");
    let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
    assert_eq!(value[0]["topic"], 0);
    assert_eq!(value[0]["terms"][0], 1);
}
