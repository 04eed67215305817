// This file is part of CTMP.
// Copyright (C) 2024-2026 CTMP contributors.
// Licensed under the MIT license, see LICENSE.md for details.
// SPDX-License-Identifier: MIT

use log::*;
use rustc_hash::FxHashSet;

use crate::ensure_shape;
use crate::errors::{CtmpError, CtmpResult};

/// Bipartite "user liked document" relation with both adjacency views.
///
/// Each adjacency list is sorted and free of duplicates.
#[derive(Debug, Clone, Default)]
pub struct RatingGraph {
    by_user: Vec<Vec<usize>>,
    by_doc: Vec<Vec<usize>>,
    n_edges: usize,
}

impl RatingGraph {
    /// Build the graph from per-user document lists, deriving the document view.
    pub fn from_user_lists(n_docs: usize, by_user: Vec<Vec<usize>>) -> CtmpResult<RatingGraph> {
        let by_user: Vec<Vec<usize>> = by_user.into_iter().map(ordered_set).collect();
        let mut by_doc = vec![Vec::new(); n_docs];
        let mut n_edges = 0;
        for (u, docs) in by_user.iter().enumerate() {
            for &d in docs {
                if d >= n_docs {
                    return Err(CtmpError::IndexOutOfRange {
                        what: "rated document",
                        index: d,
                        bound: n_docs,
                    });
                }
                // users are visited in order, so document lists stay sorted
                by_doc[d].push(u);
                n_edges += 1;
            }
        }
        debug!(
            "built rating graph with {} users, {} documents, {} edges",
            by_user.len(),
            n_docs,
            n_edges
        );
        Ok(RatingGraph {
            by_user,
            by_doc,
            n_edges,
        })
    }

    /// Build the graph from (user, document) pairs, ignoring repeats.
    pub fn from_pairs(
        n_users: usize,
        n_docs: usize,
        pairs: impl IntoIterator<Item = (usize, usize)>,
    ) -> CtmpResult<RatingGraph> {
        let mut seen = FxHashSet::default();
        let mut by_user = vec![Vec::new(); n_users];
        for (u, d) in pairs {
            if u >= n_users {
                return Err(CtmpError::IndexOutOfRange {
                    what: "rating user",
                    index: u,
                    bound: n_users,
                });
            }
            if seen.insert((u, d)) {
                by_user[u].push(d);
            }
        }
        RatingGraph::from_user_lists(n_docs, by_user)
    }

    /// Accept both externally-prepared views, checking they agree.
    pub fn from_views(
        by_user: Vec<Vec<usize>>,
        by_doc: Vec<Vec<usize>>,
    ) -> CtmpResult<RatingGraph> {
        let n_users = by_user.len();
        let graph = RatingGraph::from_user_lists(by_doc.len(), by_user)?;
        let by_doc: Vec<Vec<usize>> = by_doc.into_iter().map(ordered_set).collect();
        for users in &by_doc {
            if let Some(&u) = users.iter().find(|u| **u >= n_users) {
                return Err(CtmpError::IndexOutOfRange {
                    what: "rating user",
                    index: u,
                    bound: n_users,
                });
            }
        }
        let doc_edges: usize = by_doc.iter().map(Vec::len).sum();
        ensure_shape!("rating graph edges", graph.n_edges, doc_edges);
        if by_doc != graph.by_doc {
            return Err(CtmpError::ShapeMismatch {
                what: "rating graph views",
                expected: "document view matching user view".into(),
                found: "different edges".into(),
            });
        }
        Ok(graph)
    }

    pub fn n_users(&self) -> usize {
        self.by_user.len()
    }

    pub fn n_docs(&self) -> usize {
        self.by_doc.len()
    }

    pub fn n_edges(&self) -> usize {
        self.n_edges
    }

    /// Documents liked by user `u`.
    pub fn liked_by_user(&self, u: usize) -> &[usize] {
        &self.by_user[u]
    }

    /// Users who liked document `d`.
    pub fn raters_of(&self, d: usize) -> &[usize] {
        &self.by_doc[d]
    }
}

fn ordered_set(mut list: Vec<usize>) -> Vec<usize> {
    list.sort_unstable();
    list.dedup();
    list
}

#[test]
fn test_user_lists() {
    let g = RatingGraph::from_user_lists(4, vec![vec![2, 0], vec![], vec![0, 3, 3]])
        .expect("graph should build");
    assert_eq!(g.n_users(), 3);
    assert_eq!(g.n_docs(), 4);
    assert_eq!(g.n_edges(), 4);
    assert_eq!(g.liked_by_user(0), &[0, 2]);
    assert_eq!(g.liked_by_user(1), &[] as &[usize]);
    assert_eq!(g.liked_by_user(2), &[0, 3]);
    assert_eq!(g.raters_of(0), &[0, 2]);
    assert_eq!(g.raters_of(1), &[] as &[usize]);
    assert_eq!(g.raters_of(3), &[2]);
}

#[test]
fn test_pairs_dedup() {
    let g = RatingGraph::from_pairs(2, 3, vec![(0, 1), (1, 1), (0, 1), (1, 2)])
        .expect("graph should build");
    assert_eq!(g.n_edges(), 3);
    assert_eq!(g.raters_of(1), &[0, 1]);
}

#[test]
fn test_document_out_of_range() {
    let res = RatingGraph::from_user_lists(2, vec![vec![5]]);
    assert!(matches!(
        res,
        Err(CtmpError::IndexOutOfRange { index: 5, bound: 2, .. })
    ));
}

#[test]
fn test_views_agree() {
    let g = RatingGraph::from_views(vec![vec![1], vec![0, 1]], vec![vec![1], vec![0, 1]])
        .expect("views should agree");
    assert_eq!(g.n_edges(), 3);
}

#[test]
fn test_views_disagree() {
    let res = RatingGraph::from_views(vec![vec![1], vec![0]], vec![vec![0], vec![1]]);
    assert!(matches!(res, Err(CtmpError::ShapeMismatch { .. })));
}
