// This file is part of CTMP.
// Copyright (C) 2024-2026 CTMP contributors.
// Licensed under the MIT license, see LICENSE.md for details.
// SPDX-License-Identifier: MIT

//! Training engine for the collaborative topic model with Poisson ratings
//! (CTMP).
//!
//! Documents carry topic proportions, users carry Gamma-distributed topic
//! affinities, and ratings tie the two through a per-document topic offset.
//! Training is variational EM: [model::EmOrchestrator] runs the per-user
//! and per-document E-step updates over a [model::ModelState], then
//! re-estimates the topics.
#[cfg(feature = "python")]
use pyo3::prelude::*;

pub mod config;
pub mod data;
pub mod errors;
pub mod model;
pub mod parallel;
pub mod progress;
#[cfg(feature = "python")]
mod python;
pub mod topics;

pub use config::CtmpConfig;
pub use errors::{CtmpError, CtmpResult};

/// Entry point for the CTMP accelerator module.
#[cfg(feature = "python")]
#[pymodule]
fn _accel(m: &Bound<'_, PyModule>) -> PyResult<()> {
    pyo3_log::init();
    python::register(m)
}
