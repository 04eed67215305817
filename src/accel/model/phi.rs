// This file is part of CTMP.
// Copyright (C) 2024-2026 CTMP contributors.
// Licensed under the MIT license, see LICENSE.md for details.
// SPDX-License-Identifier: MIT

//! Chunked storage for rating responsibilities.
//!
//! The full `[user, document, topic]` tensor is far too large for one
//! allocation on real data sets, so it is split along the user axis into
//! blocks of `chunk_size` users.  Each block is a dense row-major
//! `[chunk_users, num_documents, num_topics]` array; the last block holds
//! the remainder.
use log::*;
use ndarray::{Array3, ArrayView2, ArrayViewMut2, ArrayViewMut3, Axis};

/// Per-(user, document, topic) responsibilities, chunked by user.
#[derive(Debug, Clone)]
pub struct ResponsibilityStore {
    chunk_size: usize,
    n_users: usize,
    n_docs: usize,
    n_topics: usize,
    blocks: Vec<Array3<f32>>,
}

impl ResponsibilityStore {
    /// Allocate a zeroed store.
    ///
    /// # Panics
    ///
    /// Panics if `chunk_size` is zero. [CtmpConfig::validate] rejects such
    /// configurations before a store is built from them.
    ///
    /// [CtmpConfig::validate]: crate::config::CtmpConfig::validate
    pub fn zeros(n_users: usize, n_docs: usize, n_topics: usize, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be positive");
        let mut blocks = Vec::with_capacity(n_users.div_ceil(chunk_size));
        let mut start = 0;
        while start < n_users {
            let n = chunk_size.min(n_users - start);
            blocks.push(Array3::zeros((n, n_docs, n_topics)));
            start += n;
        }
        debug!(
            "allocated {} responsibility blocks for {} users ({} MiB)",
            blocks.len(),
            n_users,
            (n_users * n_docs * n_topics * std::mem::size_of::<f32>()) >> 20
        );
        ResponsibilityStore {
            chunk_size,
            n_users,
            n_docs,
            n_topics,
            blocks,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn n_users(&self) -> usize {
        self.n_users
    }

    pub fn n_docs(&self) -> usize {
        self.n_docs
    }

    pub fn n_topics(&self) -> usize {
        self.n_topics
    }

    pub fn n_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Block holding user `u`.
    pub fn chunk_index(&self, u: usize) -> usize {
        u / self.chunk_size
    }

    /// Position of user `u` inside its block.
    pub fn offset_in_chunk(&self, u: usize) -> usize {
        u % self.chunk_size
    }

    /// Mutable view of the whole block containing user `u`.
    pub fn get_block(&mut self, u: usize) -> ArrayViewMut3<'_, f32> {
        let c = self.chunk_index(u);
        self.blocks[c].view_mut()
    }

    /// The `[document, topic]` responsibilities for one user.
    pub fn user(&self, u: usize) -> ArrayView2<'_, f32> {
        let c = self.chunk_index(u);
        self.blocks[c].index_axis(Axis(0), self.offset_in_chunk(u))
    }

    pub fn user_mut(&mut self, u: usize) -> ArrayViewMut2<'_, f32> {
        let (c, o) = (self.chunk_index(u), self.offset_in_chunk(u));
        self.blocks[c].index_axis_mut(Axis(0), o)
    }

    /// Read a single responsibility.
    pub fn get(&self, u: usize, d: usize, k: usize) -> f32 {
        self.blocks[self.chunk_index(u)][[self.offset_in_chunk(u), d, k]]
    }

    /// Iterate over the blocks mutably, in user order.
    pub fn blocks_mut(&mut self) -> impl Iterator<Item = ArrayViewMut3<'_, f32>> {
        self.blocks.iter_mut().map(|b| b.view_mut())
    }
}

#[test]
fn test_chunk_layout() {
    let store = ResponsibilityStore::zeros(2500, 3, 2, 1000);
    assert_eq!(store.n_blocks(), 3);
    assert_eq!(store.blocks[0].shape(), &[1000, 3, 2]);
    assert_eq!(store.blocks[2].shape(), &[500, 3, 2]);
    assert_eq!(store.chunk_index(999), 0);
    assert_eq!(store.chunk_index(1000), 1);
    assert_eq!(store.offset_in_chunk(2499), 499);
}

#[test]
fn test_exact_multiple() {
    let store = ResponsibilityStore::zeros(6, 2, 2, 3);
    assert_eq!(store.n_blocks(), 2);
    assert_eq!(store.blocks[1].shape(), &[3, 2, 2]);
}

#[test]
fn test_starts_zeroed() {
    let store = ResponsibilityStore::zeros(7, 4, 3, 3);
    for u in 0..7 {
        assert!(store.user(u).iter().all(|v| *v == 0.0));
    }
}

#[test]
fn test_user_addressing() {
    let mut store = ResponsibilityStore::zeros(5, 3, 2, 2);
    {
        let mut row = store.user_mut(3);
        row[[1, 0]] = 0.25;
    }
    assert_eq!(store.get(3, 1, 0), 0.25);
    assert_eq!(store.get(2, 1, 0), 0.0);
    let block = store.get_block(3);
    assert_eq!(block[[1, 1, 0]], 0.25);
}

#[test]
fn test_no_users() {
    let store = ResponsibilityStore::zeros(0, 3, 2, 10);
    assert_eq!(store.n_blocks(), 0);
}

#[test]
#[should_panic(expected = "chunk size must be positive")]
fn test_zero_chunk_size() {
    ResponsibilityStore::zeros(4, 3, 2, 0);
}
