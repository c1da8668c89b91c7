//! history.rs: bounded in-memory log of finished pipeline runs (for `/runs`).

use std::sync::{Mutex, MutexGuard};

use crate::pipeline::PipelineRun;

#[derive(Debug)]
pub struct RunHistory {
    inner: Mutex<Vec<PipelineRun>>,
    cap: usize,
}

impl RunHistory {
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.clamp(1, 10_000);
        Self {
            inner: Mutex::new(Vec::with_capacity(cap)),
            cap,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PipelineRun>> {
        // a panic while holding the lock cannot leave the Vec half-written
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn push(&self, run: PipelineRun) {
        let mut v = self.lock();
        v.push(run);
        if v.len() > self.cap {
            let excess = v.len() - self.cap;
            v.drain(0..excess);
        }
    }

    /// Up to `n` runs, newest first.
    pub fn last_n(&self, n: usize) -> Vec<PipelineRun> {
        self.lock().iter().rev().take(n).cloned().collect()
    }

    pub fn latest(&self) -> Option<PipelineRun> {
        self.lock().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
