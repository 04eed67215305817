// This file is part of CTMP.
// Copyright (C) 2024-2026 CTMP contributors.
// Licensed under the MIT license, see LICENSE.md for details.
// SPDX-License-Identifier: MIT

use ndarray::Array1;

use crate::ensure_shape;
use crate::errors::{CtmpError, CtmpResult};

/// A bag-of-words document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    /// Vocabulary indices of the terms in the document.
    pub ids: Vec<usize>,
    /// Count of each term, parallel to `ids`.
    pub cts: Vec<u32>,
}

impl Document {
    pub fn new(ids: Vec<usize>, cts: Vec<u32>) -> CtmpResult<Document> {
        ensure_shape!("document term counts", ids.len(), cts.len());
        Ok(Document { ids, cts })
    }

    /// Term counts as floating-point weights.
    pub fn weights(&self) -> Array1<f64> {
        self.cts.iter().map(|c| *c as f64).collect()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// An ordered, read-only collection of documents.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    docs: Vec<Document>,
}

impl Corpus {
    pub fn new(docs: Vec<Document>) -> Corpus {
        Corpus { docs }
    }

    /// Build a corpus from parallel per-document id and count lists.
    pub fn from_parts(wordids: Vec<Vec<usize>>, wordcts: Vec<Vec<u32>>) -> CtmpResult<Corpus> {
        ensure_shape!("corpus documents", wordids.len(), wordcts.len());
        let docs = wordids
            .into_iter()
            .zip(wordcts)
            .map(|(ids, cts)| Document::new(ids, cts))
            .collect::<CtmpResult<Vec<_>>>()?;
        Ok(Corpus { docs })
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn get(&self, d: usize) -> &Document {
        &self.docs[d]
    }

    pub fn docs(&self) -> &[Document] {
        &self.docs
    }

    /// Check that every term index lies inside a vocabulary of `n_terms`.
    pub fn check_vocabulary(&self, n_terms: usize) -> CtmpResult<()> {
        match self.max_term() {
            Some(t) if t >= n_terms => Err(CtmpError::IndexOutOfRange {
                what: "corpus term ids",
                index: t,
                bound: n_terms,
            }),
            _ => Ok(()),
        }
    }

    /// The largest vocabulary index referenced by any document.
    pub fn max_term(&self) -> Option<usize> {
        self.docs
            .iter()
            .flat_map(|d| d.ids.iter().copied())
            .max()
    }
}

#[test]
fn test_from_parts() {
    let corpus = Corpus::from_parts(vec![vec![0, 3], vec![1]], vec![vec![2, 1], vec![5]])
        .expect("corpus should build");
    assert_eq!(corpus.len(), 2);
    assert_eq!(corpus.get(0).weights().to_vec(), vec![2.0, 1.0]);
    assert_eq!(corpus.max_term(), Some(3));
    assert!(corpus.check_vocabulary(4).is_ok());
    assert!(matches!(
        corpus.check_vocabulary(3),
        Err(CtmpError::IndexOutOfRange { index: 3, .. })
    ));
}

#[test]
fn test_ragged_document() {
    let res = Corpus::from_parts(vec![vec![0, 1]], vec![vec![2]]);
    assert!(matches!(res, Err(CtmpError::ShapeMismatch { .. })));
}
