//! Caller side of an execution
//!
//! The coordinator never computes anything itself. It submits the job to
//! the tenant's engine, waits with an optional deadline, applies the lazy
//! cache-only modes and maps the physical result into a [`Matrix`].

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::{ExecutionEngine, JobStatus, SubmitOptions};
use crate::error::{AnalysisError, AnalysisResult};
use crate::job::AnalysisJob;
use crate::request::{LazyMode, Request, Space};
use crate::result::{Matrix, ResultMapper};

/// Deadline and retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionPolicy {
    /// Timeout applied when a run sets none
    pub default_timeout_ms: Option<u64>,
    /// Floor of every wait
    pub min_wait_ms: u64,
    /// Suggested retry-after as a multiple of the timeout
    pub retry_after_factor: u64,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            default_timeout_ms: None,
            min_wait_ms: 1000,
            retry_after_factor: 2,
        }
    }
}

/// Per-run options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub max_results: Option<usize>,
    pub start_index: Option<usize>,
    pub lazy: LazyMode,
    pub timeout_ms: Option<u64>,
}

impl RunOptions {
    pub fn from_request(request: &Request) -> Self {
        Self {
            max_results: request.max_results,
            start_index: request.start_index,
            lazy: request.lazy,
            timeout_ms: request.timeout_ms,
        }
    }
}

pub struct ExecutionCoordinator {
    engine: Arc<dyn ExecutionEngine>,
    policy: ExecutionPolicy,
}

impl ExecutionCoordinator {
    pub fn new(engine: Arc<dyn ExecutionEngine>, policy: ExecutionPolicy) -> Self {
        Self { engine, policy }
    }

    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    /// Run a job for the space's tenant and map its result
    pub async fn run(
        &self,
        space: &Space,
        job: Arc<AnalysisJob>,
        options: RunOptions,
    ) -> AnalysisResult<Matrix> {
        let submit = SubmitOptions {
            cache_only: options.lazy.is_lazy(),
        };
        let submission = match self.engine.submit(&space.tenant, job.clone(), submit).await {
            Ok(submission) => submission,
            Err(AnalysisError::NotInCache { .. }) if options.lazy == LazyMode::CacheOrEmpty => {
                info!(tenant = %space.tenant, job_id = %job.id, "Not in cache, returning empty result");
                return Ok(Matrix::empty(&job));
            }
            Err(e) => return Err(e),
        };

        let key = submission.key.clone();
        let from_cache = submission.from_cache;
        let timeout_ms = options.timeout_ms.or(self.policy.default_timeout_ms);

        let outcome = match timeout_ms {
            Some(timeout_ms) => {
                let wait = Duration::from_millis(timeout_ms.max(self.policy.min_wait_ms));
                match tokio::time::timeout(wait, submission.wait()).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        info!(
                            tenant = %space.tenant,
                            fingerprint = %key,
                            waited_ms = wait.as_millis() as u64,
                            "Job timed out, still running"
                        );
                        return Err(AnalysisError::Timeout {
                            job_id: key,
                            retry_after_ms: timeout_ms.saturating_mul(self.policy.retry_after_factor),
                        });
                    }
                }
            }
            None => submission.wait().await,
        };

        let result = outcome.map_err(|e| match e {
            AnalysisError::Computation(_) => AnalysisError::Computation(e.innermost_message()),
            other => other,
        })?;

        let mapper = ResultMapper::bind(&job, &result)?;
        let matrix = mapper.map(&job, &result, from_cache);
        Ok(matrix.page(options.max_results, options.start_index))
    }

    /// Ongoing jobs of the space's tenant, optionally only the one with `key`
    pub async fn status(&self, space: &Space, key: Option<&str>) -> Vec<JobStatus> {
        self.engine
            .list_ongoing(&space.tenant)
            .await
            .into_iter()
            .filter(|status| key.map(|k| status.key == k).unwrap_or(true))
            .collect()
    }

    /// Cancel an ongoing job of the space's tenant
    ///
    /// Only the job owner or a tenant writer may cancel.
    pub async fn cancel(&self, space: &Space, key: &str) -> AnalysisResult<()> {
        let status = self
            .status(space, Some(key))
            .await
            .into_iter()
            .next()
            .ok_or_else(|| AnalysisError::NotFound(format!("no ongoing job '{}'", key)))?;

        if status.owner != space.user && !space.role.can_write() {
            warn!(tenant = %space.tenant, user = %space.user, fingerprint = %key, "Cancel denied");
            return Err(AnalysisError::AccessDenied(format!(
                "job '{}' belongs to another user",
                key
            )));
        }

        if !self.engine.cancel(&space.tenant, key).await {
            return Err(AnalysisError::NotFound(format!("no ongoing job '{}'", key)));
        }
        info!(tenant = %space.tenant, user = %space.user, fingerprint = %key, "Cancel requested");
        Ok(())
    }

    /// Query text for a job without running it
    pub fn render_sql(&self, job: &AnalysisJob) -> AnalysisResult<String> {
        self.engine.render_sql(job)
    }
}
