//! Asynchronous execution
//!
//! Jobs are never run inline: they are submitted to a per-tenant
//! [`ExecutionEngine`] which owns the result cache and the registry of
//! ongoing jobs. The [`ExecutionCoordinator`] drives one submission from
//! the caller's side: deadlines, lazy cache-only reads, result mapping,
//! status and cancellation.
//!
//! - **Coordinator**: timeout, lazy modes, status and cancel authorization
//! - **Memory**: reference engine with semaphore-bounded tenants and a cache
//! - **Runner**: reference computation over in-memory rows

mod coordinator;
mod eval;
mod memory;
mod runner;

pub use coordinator::{ExecutionCoordinator, ExecutionPolicy, RunOptions};
pub use memory::InMemoryEngine;
pub use runner::{JobRunner, Row, TableRunner};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::{AnalysisError, AnalysisResult};
use crate::job::AnalysisJob;
use crate::result::ResultSet;

/// Outcome delivered to every waiter of one computation
pub type Outcome = AnalysisResult<Arc<ResultSet>>;

/// Cooperative cancellation flag shared with a running computation
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fail with a computation error once cancelled
    pub fn check(&self) -> AnalysisResult<()> {
        if self.is_cancelled() {
            Err(AnalysisError::Computation("job cancelled".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Submission flags
#[derive(Debug, Clone, Copy, Default)]
pub struct SubmitOptions {
    /// Only serve from cache; a miss fails with `NotInCache`
    pub cache_only: bool,
}

/// A running or finished computation as seen by one submitter
#[derive(Debug)]
pub struct Submission {
    /// Job key: the fingerprint the computation runs under
    pub key: String,
    pub from_cache: bool,
    outcome: watch::Receiver<Option<Outcome>>,
}

impl Submission {
    /// Already finished
    pub fn ready(key: String, from_cache: bool, outcome: Outcome) -> Self {
        let (_, receiver) = watch::channel(Some(outcome));
        Self {
            key,
            from_cache,
            outcome: receiver,
        }
    }

    /// Attached to a running computation
    pub fn pending(key: String, outcome: watch::Receiver<Option<Outcome>>) -> Self {
        Self {
            key,
            from_cache: false,
            outcome,
        }
    }

    /// Wait for the computation to finish
    pub async fn wait(mut self) -> Outcome {
        loop {
            let current = self.outcome.borrow().clone();
            if let Some(outcome) = current {
                return outcome;
            }
            if self.outcome.changed().await.is_err() {
                let last = self.outcome.borrow().clone();
                return last.unwrap_or_else(|| {
                    Err(AnalysisError::Computation(
                        "execution ended without a result".to_string(),
                    ))
                });
            }
        }
    }
}

/// An ongoing job
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub key: String,
    /// Id of the job that started the computation
    pub job_id: String,
    pub owner: String,
    pub domain: String,
    pub started_at: DateTime<Utc>,
    /// Submitters attached to this computation
    pub waiters: usize,
    pub cancelled: bool,
}

/// Per-tenant execution collaborator
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Submit a job, attaching to an equal running computation if any
    async fn submit(
        &self,
        tenant: &str,
        job: Arc<AnalysisJob>,
        options: SubmitOptions,
    ) -> AnalysisResult<Submission>;

    /// Jobs currently running for a tenant
    async fn list_ongoing(&self, tenant: &str) -> Vec<JobStatus>;

    /// Signal cancellation; returns whether a job was found
    async fn cancel(&self, tenant: &str, key: &str) -> bool;

    /// Query text the job would run, without running it
    fn render_sql(&self, job: &AnalysisJob) -> AnalysisResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        let shared = token.clone();
        assert!(token.check().is_ok());
        shared.cancel();
        assert!(token.is_cancelled());
        assert!(token.check().is_err());
    }

    #[tokio::test]
    async fn test_ready_submission() {
        let submission = Submission::ready(
            "k".to_string(),
            true,
            Err(AnalysisError::Computation("boom".to_string())),
        );
        assert!(submission.from_cache);
        assert!(submission.wait().await.is_err());
    }

    #[tokio::test]
    async fn test_pending_submission_resolves() {
        let (sender, receiver) = watch::channel(None);
        let submission = Submission::pending("k".to_string(), receiver);
        let waiter = tokio::spawn(submission.wait());
        sender
            .send(Some(Err(AnalysisError::Computation("late".to_string()))))
            .unwrap();
        let outcome = waiter.await.unwrap();
        assert_eq!(
            outcome.unwrap_err(),
            AnalysisError::Computation("late".to_string())
        );
    }
}
