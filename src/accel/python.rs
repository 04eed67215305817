// This file is part of CTMP.
// Copyright (C) 2024-2026 CTMP contributors.
// Licensed under the MIT license, see LICENSE.md for details.
// SPDX-License-Identifier: MIT

//! Python bindings for the training engine.
use log::*;
use numpy::{PyArray2, PyReadonlyArray2};
use pyo3::{intern, prelude::*, types::PyDict};

use crate::{
    config::CtmpConfig,
    data::{Corpus, RatingGraph},
    model::{EmOrchestrator, IterationStats, ModelState},
    parallel,
    progress::ProgressSink,
    topics::{summaries_to_json, top_terms},
};

/// Forward progress to a Python progress bar.
struct PyProgress {
    pb: Py<PyAny>,
}

impl ProgressSink for PyProgress {
    fn update(&self, _label: &str, completed: usize, _total: usize) {
        let res = Python::with_gil(|py| {
            py.check_signals()?;
            let kwargs = PyDict::new(py);
            kwargs.set_item(intern!(py, "completed"), completed)?;
            self.pb
                .call_method(py, intern!(py, "update"), (), Some(&kwargs))?;
            Ok::<(), PyErr>(())
        });
        if let Err(e) = res {
            warn!("progress update failed: {}", e);
        }
    }
}

/// Train CTMP models.
#[pyclass]
pub struct CtmpTrainer {
    config: CtmpConfig,
    corpus: Corpus,
    ratings: RatingGraph,
    state: ModelState,
    em: EmOrchestrator,
}

#[pymethods]
impl CtmpTrainer {
    /// Instantiate a new trainer from settings (as JSON), the corpus, both
    /// views of the rating graph and the initial topics and proportions.
    #[new]
    fn new<'py>(
        config: &str,
        wordids: Vec<Vec<usize>>,
        wordcts: Vec<Vec<u32>>,
        user_docs: Vec<Vec<usize>>,
        doc_users: Vec<Vec<usize>>,
        beta: PyReadonlyArray2<'py, f64>,
        theta: PyReadonlyArray2<'py, f64>,
    ) -> PyResult<Self> {
        let config = CtmpConfig::from_json(config)?;
        let corpus = Corpus::from_parts(wordids, wordcts)?;
        let ratings = RatingGraph::from_views(user_docs, doc_users)?;
        let state = ModelState::initialize(
            &config,
            &corpus,
            &ratings,
            beta.as_array().to_owned(),
            theta.as_array().to_owned(),
        )?;
        let em = EmOrchestrator::new(&config);

        Ok(CtmpTrainer {
            config,
            corpus,
            ratings,
            state,
            em,
        })
    }

    /// Run a single EM iteration.
    #[pyo3(signature = (progress=None))]
    fn run_em<'py>(
        &mut self,
        py: Python<'py>,
        progress: Option<Py<PyAny>>,
    ) -> PyResult<Bound<'py, PyDict>> {
        let sink = progress.map(|pb| PyProgress { pb });
        let stats = py.allow_threads(|| {
            self.em.run_em(
                &mut self.state,
                &self.corpus,
                &self.ratings,
                sink.as_ref().map(|s| s as &dyn ProgressSink),
            )
        })?;
        stats_dict(py, &stats)
    }

    /// Run the configured number of EM iterations.
    #[pyo3(signature = (progress=None))]
    fn fit<'py>(
        &mut self,
        py: Python<'py>,
        progress: Option<Py<PyAny>>,
    ) -> PyResult<Vec<Bound<'py, PyDict>>> {
        let sink = progress.map(|pb| PyProgress { pb });
        let history = py.allow_threads(|| {
            self.em.fit(
                &mut self.state,
                &self.corpus,
                &self.ratings,
                sink.as_ref().map(|s| s as &dyn ProgressSink),
            )
        })?;
        history.iter().map(|s| stats_dict(py, s)).collect()
    }

    #[getter]
    fn iteration(&self) -> usize {
        self.em.iteration()
    }

    #[getter]
    fn beta<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray2<f64>> {
        PyArray2::from_array(py, &self.state.beta)
    }

    #[getter]
    fn theta<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray2<f64>> {
        PyArray2::from_array(py, &self.state.theta)
    }

    #[getter]
    fn mu<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray2<f64>> {
        PyArray2::from_array(py, &self.state.mu)
    }

    #[getter]
    fn shp<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray2<f64>> {
        PyArray2::from_array(py, &self.state.shp)
    }

    #[getter]
    fn rte<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray2<f64>> {
        PyArray2::from_array(py, &self.state.rte)
    }

    /// Top terms of each topic as `(terms, weights)` pairs.
    #[pyo3(signature = (tops=None))]
    fn top_terms(&self, tops: Option<usize>) -> PyResult<Vec<(Vec<usize>, Vec<f64>)>> {
        let tops = tops.unwrap_or(self.config.tops);
        let summaries = top_terms(self.state.beta.view(), tops)?;
        Ok(summaries
            .into_iter()
            .map(|s| (s.terms, s.weights))
            .collect())
    }

    /// Top terms of each topic, rendered as JSON.
    #[pyo3(signature = (tops=None))]
    fn top_terms_json(&self, tops: Option<usize>) -> PyResult<String> {
        let tops = tops.unwrap_or(self.config.tops);
        let summaries = top_terms(self.state.beta.view(), tops)?;
        Ok(summaries_to_json(&summaries)?)
    }
}

fn stats_dict<'py>(py: Python<'py>, stats: &IterationStats) -> PyResult<Bound<'py, PyDict>> {
    let dict = PyDict::new(py);
    dict.set_item(intern!(py, "iteration"), stats.iteration)?;
    dict.set_item(intern!(py, "users_updated"), stats.users_updated)?;
    dict.set_item(intern!(py, "docs_rated"), stats.docs_rated)?;
    dict.set_item(intern!(py, "docs_unrated"), stats.docs_unrated)?;
    dict.set_item(intern!(py, "docs_skipped"), stats.docs_skipped)?;
    dict.set_item(intern!(py, "theta_delta"), stats.theta_delta)?;
    Ok(dict)
}

#[pyfunction]
fn init_accel_pool(n_threads: usize) -> PyResult<()> {
    Ok(parallel::init_pool(n_threads)?)
}

#[pyfunction]
fn thread_count() -> usize {
    parallel::thread_count()
}

/// Register the classes and functions of the accelerator module.
pub fn register(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<CtmpTrainer>()?;
    m.add_function(wrap_pyfunction!(init_accel_pool, m)?)?;
    m.add_function(wrap_pyfunction!(thread_count, m)?)?;
    Ok(())
}
