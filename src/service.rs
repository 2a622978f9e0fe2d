//! Analytics service
//!
//! The end-to-end pipeline behind one analysis call:
//!
//! 1. merge the bookmark's stored configuration into the request
//! 2. build the selection
//! 3. compile the job
//! 4. run it through the coordinator (or only render its SQL)
//! 5. lay the matrix out

use std::sync::Arc;
use tracing::debug;

use crate::bookmark::{BookmarkStore, StoredConfig};
use crate::error::{AnalysisError, AnalysisResult};
use crate::execution::{ExecutionCoordinator, JobStatus, RunOptions};
use crate::job::{JobCompiler, LimitPolicy};
use crate::merge::ConfigMerger;
use crate::model::SemanticModel;
use crate::output::{encode, Export, Output, OutputConverter};
use crate::request::{Encoding, Layout, Problem, Request, Space};
use crate::result::Matrix;
use crate::selection::SelectionBuilder;

/// Result of one analysis call
#[derive(Debug, Clone)]
pub struct Analysis {
    pub output: Output,
    /// Job fingerprint, usable for status and cancel
    pub key: String,
    /// Non-fatal issues found while resolving the request
    pub problems: Vec<Problem>,
    /// The request after merging
    pub resolved: Request,
}

pub struct AnalyticsService {
    model: Arc<dyn SemanticModel>,
    bookmarks: Arc<dyn BookmarkStore>,
    coordinator: ExecutionCoordinator,
    limits: LimitPolicy,
}

impl AnalyticsService {
    pub fn new(
        model: Arc<dyn SemanticModel>,
        bookmarks: Arc<dyn BookmarkStore>,
        coordinator: ExecutionCoordinator,
    ) -> Self {
        Self {
            model,
            bookmarks,
            coordinator,
            limits: LimitPolicy::default(),
        }
    }

    /// Builder method: set the default limit policy
    pub fn with_limits(mut self, limits: LimitPolicy) -> Self {
        self.limits = limits;
        self
    }

    fn stored(&self, bookmark_id: Option<&str>) -> AnalysisResult<Option<StoredConfig>> {
        bookmark_id
            .map(|id| {
                self.bookmarks
                    .get(id)
                    .ok_or_else(|| AnalysisError::NotFound(format!("bookmark '{}'", id)))
            })
            .transpose()
    }

    /// Run an analysis and lay out its result
    ///
    /// `layout` overrides the request's own layout when set.
    pub async fn analyze(
        &self,
        space: &Space,
        mut request: Request,
        bookmark_id: Option<&str>,
        layout: Option<Layout>,
    ) -> AnalysisResult<Analysis> {
        if let Some(layout) = layout {
            request.layout = layout;
        }
        let model = self.model.as_ref();
        let stored = self.stored(bookmark_id)?;

        ConfigMerger::new(model).merge(space, &mut request, stored.as_ref())?;
        let selection = SelectionBuilder::new(model).build(space, &request)?;
        let job = JobCompiler::new(model)
            .with_policy(self.limits)
            .compile(space, &mut request, &selection)?;
        let key = job.fingerprint()?;

        let matrix = if request.layout == Layout::Sql {
            let sql = self.coordinator.render_sql(&job)?;
            Matrix::empty(&job).with_sql(sql)
        } else {
            self.coordinator
                .run(space, Arc::new(job), RunOptions::from_request(&request))
                .await?
        };

        let output = OutputConverter::new(model).convert(&matrix, request.layout, request.style);
        debug!(
            tenant = %space.tenant,
            fingerprint = %key,
            rows = matrix.rows.len(),
            from_cache = matrix.from_cache,
            problems = request.problems.len(),
            "Analysis done"
        );

        Ok(Analysis {
            output,
            key,
            problems: request.problems.clone(),
            resolved: request,
        })
    }

    /// Run an analysis and encode it as a downloadable file
    pub async fn export(
        &self,
        space: &Space,
        mut request: Request,
        bookmark_id: Option<&str>,
        encoding: Encoding,
        gzip: bool,
    ) -> AnalysisResult<Export> {
        request.encoding = Some(encoding);
        let analysis = self.analyze(space, request, bookmark_id, None).await?;
        encode(&analysis.output, encoding, gzip)
    }

    /// Ongoing jobs of the caller's tenant
    pub async fn status(&self, space: &Space, key: Option<&str>) -> Vec<JobStatus> {
        self.coordinator.status(space, key).await
    }

    /// Cancel an ongoing job of the caller's tenant
    pub async fn cancel(&self, space: &Space, key: &str) -> AnalysisResult<()> {
        self.coordinator.cancel(space, key).await
    }
}
