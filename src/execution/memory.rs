//! In-memory execution engine
//!
//! One state per tenant: a semaphore bounding concurrent computations, a
//! result cache and the registry of ongoing jobs. Equal jobs (same
//! content key) share one computation; later submitters attach to it.
//! Cached results expire after the configured time to live.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock, Semaphore};
use tracing::{debug, error, info};

use super::{
    CancelToken, ExecutionEngine, JobRunner, JobStatus, Outcome, SubmitOptions, Submission,
};
use crate::error::{AnalysisError, AnalysisResult};
use crate::job::{AnalysisJob, JobKey};
use crate::result::ResultSet;

struct Cached {
    result: Arc<ResultSet>,
    stored_at: Instant,
}

struct Ongoing {
    status: JobStatus,
    token: CancelToken,
    outcome: watch::Receiver<Option<Outcome>>,
}

struct TenantState {
    permits: Arc<Semaphore>,
    cache: RwLock<HashMap<JobKey, Cached>>,
    ongoing: RwLock<HashMap<JobKey, Ongoing>>,
}

impl TenantState {
    fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            cache: RwLock::new(HashMap::new()),
            ongoing: RwLock::new(HashMap::new()),
        }
    }

    /// Unexpired cached result; an expired entry is dropped
    async fn cached(&self, key: &JobKey, ttl: Option<Duration>) -> Option<Arc<ResultSet>> {
        let fresh = |entry: &Cached| ttl.map(|ttl| entry.stored_at.elapsed() < ttl).unwrap_or(true);
        {
            let cache = self.cache.read().await;
            match cache.get(key) {
                Some(entry) if fresh(entry) => return Some(entry.result.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        let mut cache = self.cache.write().await;
        if cache.get(key).map(|entry| !fresh(entry)).unwrap_or(false) {
            cache.remove(key);
            debug!(key = %key.id(), "Cached result expired");
        }
        None
    }
}

/// Execution engine running jobs on the blocking pool
pub struct InMemoryEngine {
    runner: Arc<dyn JobRunner>,
    max_concurrent: usize,
    cache_ttl: Option<Duration>,
    tenants: Arc<RwLock<HashMap<String, Arc<TenantState>>>>,
}

impl InMemoryEngine {
    pub fn new(runner: Arc<dyn JobRunner>, max_concurrent: usize) -> Self {
        Self {
            runner,
            max_concurrent,
            cache_ttl: None,
            tenants: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Builder method: expire cached results after `ttl` (default: never)
    pub fn with_cache_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.cache_ttl = ttl;
        self
    }

    async fn tenant(&self, tenant: &str) -> Arc<TenantState> {
        if let Some(state) = self.tenants.read().await.get(tenant) {
            return state.clone();
        }
        let mut tenants = self.tenants.write().await;
        tenants
            .entry(tenant.to_string())
            .or_insert_with(|| Arc::new(TenantState::new(self.max_concurrent)))
            .clone()
    }

    /// Number of cached results for a tenant
    pub async fn cache_size(&self, tenant: &str) -> usize {
        match self.tenants.read().await.get(tenant) {
            Some(state) => state.cache.read().await.len(),
            None => 0,
        }
    }

    /// Drop every cached result of a tenant
    pub async fn clear_cache(&self, tenant: &str) {
        if let Some(state) = self.tenants.read().await.get(tenant) {
            state.cache.write().await.clear();
        }
    }

    fn spawn(
        &self,
        tenant: &str,
        state: Arc<TenantState>,
        key: JobKey,
        job: Arc<AnalysisJob>,
        token: CancelToken,
        sender: watch::Sender<Option<Outcome>>,
    ) {
        let runner = self.runner.clone();
        let tenant = tenant.to_string();
        let ttl = self.cache_ttl;

        tokio::spawn(async move {
            let id = key.id();
            let outcome: Outcome = match state.permits.clone().acquire_owned().await {
                Ok(permit) => {
                    info!(tenant = %tenant, key = %id, job_id = %job.id, "Job started");
                    let started = Instant::now();
                    let task_job = job.clone();
                    let task_token = token.clone();
                    let computed = tokio::task::spawn_blocking(move || {
                        let _permit = permit;
                        run_job(runner.as_ref(), &task_job, &task_token)
                    })
                    .await;
                    match computed {
                        Ok(Ok(result)) => {
                            info!(
                                tenant = %tenant,
                                key = %id,
                                rows = result.rows.len(),
                                elapsed_ms = started.elapsed().as_millis() as u64,
                                "Job finished"
                            );
                            Ok(Arc::new(result))
                        }
                        Ok(Err(e)) => {
                            error!(tenant = %tenant, key = %id, error = %e, "Job failed");
                            Err(e.context(&format!("job {}", id)))
                        }
                        Err(e) => {
                            error!(tenant = %tenant, key = %id, error = %e, "Job panicked");
                            Err(AnalysisError::Computation(format!("execution aborted: {}", e)))
                        }
                    }
                }
                Err(e) => Err(AnalysisError::Computation(format!("execution pool closed: {}", e))),
            };

            let mut ongoing = state.ongoing.write().await;
            if let Ok(result) = &outcome {
                if !token.is_cancelled() {
                    let mut cache = state.cache.write().await;
                    if let Some(ttl) = ttl {
                        cache.retain(|_, entry| entry.stored_at.elapsed() < ttl);
                    }
                    cache.insert(
                        key.clone(),
                        Cached {
                            result: result.clone(),
                            stored_at: Instant::now(),
                        },
                    );
                }
            }
            ongoing.remove(&key);
            drop(ongoing);
            if sender.send(Some(outcome)).is_err() {
                debug!(tenant = %tenant, key = %id, "No waiters left for job outcome");
            }
        });
    }
}

fn run_job(
    runner: &dyn JobRunner,
    job: &AnalysisJob,
    token: &CancelToken,
) -> AnalysisResult<ResultSet> {
    token.check()?;
    runner.run(job, token)
}

#[async_trait]
impl ExecutionEngine for InMemoryEngine {
    async fn submit(
        &self,
        tenant: &str,
        job: Arc<AnalysisJob>,
        options: SubmitOptions,
    ) -> AnalysisResult<Submission> {
        let key = job.key()?;
        let id = key.id();
        let state = self.tenant(tenant).await;

        if let Some(result) = state.cached(&key, self.cache_ttl).await {
            return Ok(Submission::ready(id, true, Ok(result)));
        }
        if options.cache_only {
            return Err(AnalysisError::NotInCache { job_id: id });
        }

        let mut ongoing = state.ongoing.write().await;
        // finished while we waited for the lock
        if let Some(result) = state.cached(&key, self.cache_ttl).await {
            return Ok(Submission::ready(id, true, Ok(result)));
        }
        if let Some(running) = ongoing.get_mut(&key) {
            running.status.waiters += 1;
            info!(tenant = %tenant, key = %id, waiters = running.status.waiters, "Attached to running job");
            return Ok(Submission::pending(id, running.outcome.clone()));
        }

        let (sender, receiver) = watch::channel(None);
        let token = CancelToken::new();
        ongoing.insert(
            key.clone(),
            Ongoing {
                status: JobStatus {
                    key: id.clone(),
                    job_id: job.id.clone(),
                    owner: job.owner.clone(),
                    domain: job.domain.clone(),
                    started_at: Utc::now(),
                    waiters: 1,
                    cancelled: false,
                },
                token: token.clone(),
                outcome: receiver.clone(),
            },
        );
        drop(ongoing);

        self.spawn(tenant, state, key, job, token, sender);
        Ok(Submission::pending(id, receiver))
    }

    async fn list_ongoing(&self, tenant: &str) -> Vec<JobStatus> {
        let state = match self.tenants.read().await.get(tenant) {
            Some(state) => state.clone(),
            None => return Vec::new(),
        };
        let ongoing = state.ongoing.read().await;
        let mut jobs: Vec<JobStatus> = ongoing.values().map(|o| o.status.clone()).collect();
        jobs.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        jobs
    }

    async fn cancel(&self, tenant: &str, key: &str) -> bool {
        let state = match self.tenants.read().await.get(tenant) {
            Some(state) => state.clone(),
            None => return false,
        };
        let mut ongoing = state.ongoing.write().await;
        let mut found = false;
        for running in ongoing.values_mut().filter(|o| o.status.key == key) {
            running.token.cancel();
            running.status.cancelled = true;
            found = true;
        }
        if found {
            info!(tenant = %tenant, key = %key, "Job cancelled");
        }
        found
    }

    fn render_sql(&self, job: &AnalysisJob) -> AnalysisResult<String> {
        self.runner.render_sql(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{IndexLookup, MetricSpec};
    use crate::model::ValueType;
    use crate::result::{PhysicalColumn, PhysicalType};
    use crate::selection::Selection;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts runs and sleeps to keep jobs ongoing
    struct SlowRunner {
        runs: AtomicUsize,
        delay: Duration,
    }

    impl JobRunner for SlowRunner {
        fn run(&self, job: &AnalysisJob, token: &CancelToken) -> AnalysisResult<ResultSet> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            token.check()?;
            Ok(ResultSet {
                columns: vec![PhysicalColumn {
                    label: job.metrics[0].expr.clone(),
                    ty: PhysicalType::Integer,
                }],
                rows: vec![vec![crate::model::Value::Integer(1)]],
                computed_at: Utc::now(),
                complete: true,
            })
        }

        fn render_sql(&self, _job: &AnalysisJob) -> AnalysisResult<String> {
            Ok("SELECT 1".to_string())
        }
    }

    fn engine(delay_ms: u64) -> (InMemoryEngine, Arc<SlowRunner>) {
        let runner = Arc::new(SlowRunner {
            runs: AtomicUsize::new(0),
            delay: Duration::from_millis(delay_ms),
        });
        (InMemoryEngine::new(runner.clone(), 2), runner)
    }

    fn job(id: &str) -> Arc<AnalysisJob> {
        Arc::new(AnalysisJob {
            id: id.into(),
            owner: "alice".into(),
            domain: "sales".into(),
            selection: Selection::new(),
            facets: vec![],
            metrics: vec![MetricSpec {
                expr: "@'sales'.count()".into(),
                name: "count()".into(),
                value_type: ValueType::Numeric,
                description: None,
            }],
            order_by: vec![],
            rollups: vec![],
            limit: None,
            offset: None,
            beyond_limit: vec![],
            anchor: chrono::NaiveDate::from_ymd_opt(2024, 2, 15).unwrap(),
            lookup: IndexLookup::default(),
        })
    }

    #[tokio::test]
    async fn test_equal_jobs_share_one_computation() {
        let (engine, runner) = engine(100);
        let first = engine.submit("acme", job("a"), SubmitOptions::default()).await.unwrap();
        let second = engine.submit("acme", job("b"), SubmitOptions::default()).await.unwrap();
        assert_eq!(first.key, second.key);

        let ongoing = engine.list_ongoing("acme").await;
        assert_eq!(ongoing.len(), 1);
        assert_eq!(ongoing[0].waiters, 2);
        assert_eq!(ongoing[0].job_id, "a");

        let (a, b) = tokio::join!(first.wait(), second.wait());
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(runner.runs.load(Ordering::SeqCst), 1);
        assert!(engine.list_ongoing("acme").await.is_empty());
    }

    #[tokio::test]
    async fn test_cache_hit_after_completion() {
        let (engine, runner) = engine(0);
        let first = engine.submit("acme", job("a"), SubmitOptions::default()).await.unwrap();
        assert!(!first.from_cache);
        first.wait().await.unwrap();
        assert_eq!(engine.cache_size("acme").await, 1);

        let again = engine
            .submit("acme", job("b"), SubmitOptions { cache_only: true })
            .await
            .unwrap();
        assert!(again.from_cache);
        again.wait().await.unwrap();
        assert_eq!(runner.runs.load(Ordering::SeqCst), 1);

        // tenants do not share caches
        let other = engine.submit("globex", job("c"), SubmitOptions { cache_only: true }).await;
        assert!(matches!(other, Err(AnalysisError::NotInCache { .. })));
    }

    #[tokio::test]
    async fn test_cancel_running_job() {
        let (engine, _) = engine(100);
        let submission = engine.submit("acme", job("a"), SubmitOptions::default()).await.unwrap();
        assert!(engine.cancel("acme", &submission.key).await);
        assert!(engine.list_ongoing("acme").await[0].cancelled);

        let key = submission.key.clone();
        let err = submission.wait().await.unwrap_err();
        assert!(err.to_string().contains(&format!("job {}", key)));
        assert_eq!(err.innermost_message(), "job cancelled");
        assert_eq!(engine.cache_size("acme").await, 0);
        assert!(!engine.cancel("acme", "missing").await);
    }

    #[tokio::test]
    async fn test_limit_and_offset_keep_separate_entries() {
        let (engine, runner) = engine(0);
        let mut limited = (*job("a")).clone();
        limited.limit = Some(10);
        let mut shifted = (*job("b")).clone();
        shifted.limit = Some(10);
        shifted.offset = Some(5);

        for job in [job("c"), Arc::new(limited), Arc::new(shifted)] {
            let submission = engine.submit("acme", job, SubmitOptions::default()).await.unwrap();
            assert!(!submission.from_cache);
            submission.wait().await.unwrap();
        }
        assert_eq!(engine.cache_size("acme").await, 3);
        assert_eq!(runner.runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_expired_result_is_not_served() {
        let (engine, runner) = engine(0);
        let engine = engine.with_cache_ttl(Some(Duration::from_millis(50)));
        let first = engine.submit("acme", job("a"), SubmitOptions::default()).await.unwrap();
        first.wait().await.unwrap();

        let hit = engine.submit("acme", job("b"), SubmitOptions { cache_only: true }).await.unwrap();
        assert!(hit.from_cache);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let miss = engine.submit("acme", job("c"), SubmitOptions { cache_only: true }).await;
        assert!(matches!(miss, Err(AnalysisError::NotInCache { .. })));
        assert_eq!(engine.cache_size("acme").await, 0);

        let again = engine.submit("acme", job("d"), SubmitOptions::default()).await.unwrap();
        assert!(!again.from_cache);
        again.wait().await.unwrap();
        assert_eq!(runner.runs.load(Ordering::SeqCst), 2);
    }
}
