//! Ordered steps with compensations, for work that spans systems without a
//! shared transaction.
//!
//! Each successful step may register a compensation. When a later step fails,
//! registered compensations run in reverse order and the step's error is
//! returned. A failing compensation is logged and counted; it never replaces
//! the original error.

use std::future::Future;

use futures::future::BoxFuture;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};

pub type Compensation<'a> = BoxFuture<'a, Result<()>>;

pub struct Saga<'a> {
    name: &'static str,
    compensations: Vec<(&'static str, Compensation<'a>)>,
    finished: bool,
}

impl<'a> Saga<'a> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            compensations: Vec::new(),
            finished: false,
        }
    }

    /// Run `action`; on success register the compensation built from its output.
    /// On failure unwind everything registered so far and return the error.
    pub async fn step<T, Fut, C>(&mut self, label: &'static str, action: Fut, compensate: C) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
        C: FnOnce(&T) -> Compensation<'a>,
    {
        match action.await {
            Ok(value) => {
                self.compensations.push((label, compensate(&value)));
                Ok(value)
            }
            Err(e) => Err(self.abort(label, e).await),
        }
    }

    /// A step with nothing to undo.
    pub async fn run<T, Fut>(&mut self, label: &'static str, action: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        match action.await {
            Ok(value) => Ok(value),
            Err(e) => Err(self.abort(label, e).await),
        }
    }

    /// Unwind and hand back `err`, for failures detected outside a step.
    pub async fn abort(&mut self, label: &'static str, err: Error) -> Error {
        warn!(saga = self.name, step = label, error = %err, "Saga step failed, compensating");
        self.unwind().await;
        err
    }

    /// Mark the saga done; registered compensations are dropped without running.
    pub fn complete(mut self) {
        self.finished = true;
        self.compensations.clear();
    }

    pub fn pending(&self) -> usize {
        self.compensations.len()
    }

    async fn unwind(&mut self) {
        self.finished = true;
        while let Some((label, compensation)) = self.compensations.pop() {
            metrics::counter!("saga_compensations_total", "saga" => self.name).increment(1);
            match compensation.await {
                Ok(()) => debug!(saga = self.name, step = label, "Compensation applied"),
                Err(e) => {
                    metrics::counter!("saga_compensation_failures_total", "saga" => self.name).increment(1);
                    error!(saga = self.name, step = label, error = %e, "Compensation failed");
                }
            }
        }
    }
}

impl Drop for Saga<'_> {
    fn drop(&mut self) {
        if !self.finished && !self.compensations.is_empty() {
            // Cancelled mid-flight: nothing can be awaited here. The orphan sweep
            // reclaims any objects left behind.
            warn!(
                saga = self.name,
                pending = self.compensations.len(),
                "Saga dropped before completing, compensations skipped"
            );
        }
    }
}
