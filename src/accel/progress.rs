// This file is part of CTMP.
// Copyright (C) 2024-2026 CTMP contributors.
// Licensed under the MIT license, see LICENSE.md for details.
// SPDX-License-Identifier: MIT

//! Throttled progress reporting for training passes.
use std::sync::RwLock;
use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Instant,
};

use log::*;

const UPDATE_SECS: f64 = 0.2;

/// Receiver for progress updates.
pub trait ProgressSink: Send + Sync {
    fn update(&self, label: &str, completed: usize, total: usize);
}

#[derive(Clone, Copy)]
struct UpdateState {
    count: usize,
    time: f64,
    rate: f64,
}

/// Progress counter for one pass over users or documents.
///
/// Ticks are cheap atomic increments; the sink is only refreshed when the
/// estimated rate says at least [UPDATE_SECS] have passed.
pub struct ProgressHandle<'a> {
    label: &'static str,
    total: usize,
    sink: Option<&'a dyn ProgressSink>,
    start: Instant,
    count: AtomicUsize,
    last_update: RwLock<Option<UpdateState>>,
}

impl<'a> ProgressHandle<'a> {
    pub fn new(
        label: &'static str,
        total: usize,
        sink: Option<&'a dyn ProgressSink>,
    ) -> Self {
        ProgressHandle {
            label,
            total,
            sink,
            start: Instant::now(),
            count: AtomicUsize::new(0),
            last_update: RwLock::new(None),
        }
    }

    pub fn tick(&self) {
        self.advance(1);
    }

    pub fn advance(&self, n: usize) {
        let count = self.count.fetch_add(n, Ordering::Relaxed) + n;

        let last_update = match self.last_update.read() {
            Ok(lock) => *lock,
            // a panicking writer leaves nothing worth reporting
            Err(_) => return,
        };

        let thresh = if let Some(lu) = last_update {
            // bail early if the rate estimate says we don't need to update
            let n = count.saturating_sub(lu.count) as f64;
            if n / lu.rate < UPDATE_SECS * 0.95 {
                return;
            }

            lu.time
        } else {
            0.0
        };

        let time = self.start.elapsed().as_secs_f64();
        if time < thresh + UPDATE_SECS {
            return;
        }

        // if someone else is writing, they've handled it
        if let Ok(mut lock) = self.last_update.try_write() {
            *lock = Some(UpdateState {
                count,
                time,
                rate: count as f64 / time,
            });
            self.refresh(count);
        }
    }

    /// Number of ticks recorded so far.
    pub fn completed(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Push the final count and report the elapsed time.
    pub fn finish(self) -> f64 {
        let count = self.completed();
        self.refresh(count);
        let elapsed = self.start.elapsed().as_secs_f64();
        debug!(
            "{}: finished {} of {} in {:.3}s",
            self.label, count, self.total, elapsed
        );
        elapsed
    }

    fn refresh(&self, count: usize) {
        match self.sink {
            Some(sink) => sink.update(self.label, count, self.total),
            None => trace!("{}: {}/{}", self.label, count, self.total),
        }
    }
}

#[cfg(test)]
struct RecordingSink(std::sync::Mutex<Vec<(String, usize, usize)>>);

#[cfg(test)]
impl ProgressSink for RecordingSink {
    fn update(&self, label: &str, completed: usize, total: usize) {
        self.0
            .lock()
            .unwrap()
            .push((label.to_string(), completed, total));
    }
}

#[test]
fn test_finish_reports_total() {
    let sink = RecordingSink(std::sync::Mutex::new(Vec::new()));
    let pb = ProgressHandle::new("users", 10, Some(&sink));
    for _ in 0..10 {
        pb.tick();
    }
    assert_eq!(pb.completed(), 10);
    pb.finish();
    let updates = sink.0.lock().unwrap();
    let last = updates.last().expect("no progress updates");
    assert_eq!(last, &("users".to_string(), 10, 10));
}

#[test]
fn test_stale_count_behind_last_update() {
    // another thread may record a later count before this one reads it
    let pb = ProgressHandle::new("documents", 200, None);
    if let Ok(mut lock) = pb.last_update.write() {
        *lock = Some(UpdateState {
            count: 100,
            time: 0.0,
            rate: 1.0,
        });
    }
    pb.advance(1);
    assert_eq!(pb.completed(), 1);
}

#[test]
fn test_no_sink() {
    let pb = ProgressHandle::new("documents", 3, None);
    pb.advance(3);
    assert_eq!(pb.completed(), 3);
    assert!(pb.finish() >= 0.0);
}
