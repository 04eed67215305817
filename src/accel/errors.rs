// This file is part of CTMP.
// Copyright (C) 2024-2026 CTMP contributors.
// Licensed under the MIT license, see LICENSE.md for details.
// SPDX-License-Identifier: MIT

//! Error types for model setup and training.
use thiserror::Error;

/// Errors raised while configuring, validating or training a model.
#[derive(Error, Debug)]
pub enum CtmpError {
    #[error("shape mismatch for {what}: expected {expected}, found {found}")]
    ShapeMismatch {
        what: &'static str,
        expected: String,
        found: String,
    },
    #[error("index {index} out of range in {what} (bound {bound})")]
    IndexOutOfRange {
        what: &'static str,
        index: usize,
        bound: usize,
    },
    #[error("domain error at iteration {iteration}, document {document}, topic {topic}: {detail}")]
    Domain {
        iteration: usize,
        document: usize,
        topic: usize,
        detail: String,
    },
    #[error("topic {topic} has a NaN weight for term {term}")]
    NanWeight { topic: usize, term: usize },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("thread pool initialization error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type CtmpResult<T> = Result<T, CtmpError>;

/// Return a [CtmpError::ShapeMismatch] from the enclosing function if two
/// dimensions disagree.
#[macro_export]
macro_rules! ensure_shape {
    ($what:expr, $expected:expr, $found:expr) => {
        if $expected != $found {
            return Err($crate::errors::CtmpError::ShapeMismatch {
                what: $what,
                expected: format!("{:?}", $expected),
                found: format!("{:?}", $found),
            });
        }
    };
}

#[cfg(feature = "python")]
impl From<CtmpError> for pyo3::PyErr {
    fn from(err: CtmpError) -> pyo3::PyErr {
        use pyo3::exceptions::{PyArithmeticError, PyRuntimeError, PyValueError};
        match err {
            CtmpError::Domain { .. } | CtmpError::NanWeight { .. } => {
                PyArithmeticError::new_err(err.to_string())
            }
            CtmpError::ThreadPool(_) => PyRuntimeError::new_err(err.to_string()),
            _ => PyValueError::new_err(err.to_string()),
        }
    }
}

#[test]
fn test_shape_macro_passes() {
    fn check(n: usize) -> CtmpResult<()> {
        ensure_shape!("widgets", 3, n);
        Ok(())
    }
    assert!(check(3).is_ok());
}

#[test]
fn test_shape_macro_fails() {
    fn check(n: usize) -> CtmpResult<()> {
        ensure_shape!("widgets", (3, 2), (n, 2));
        Ok(())
    }
    match check(4) {
        Err(CtmpError::ShapeMismatch {
            what,
            expected,
            found,
        }) => {
            assert_eq!(what, "widgets");
            assert_eq!(expected, "(3, 2)");
            assert_eq!(found, "(4, 2)");
        }
        r => panic!("unexpected result {:?}", r),
    }
}
