//! # Prism
//!
//! Analytics query compilation and execution core. A declarative request
//! (dimensions, metrics, filters, period, ordering, roll-ups) is merged with
//! an optional stored bookmark, compiled into an analysis job and run against
//! a pluggable execution engine with per-tenant caching.
//!
//! ## Modules
//!
//! - [`model`]: semantic catalog, expression parser and pretty printer
//! - [`merge`]: bookmark merging and wildcard expansion
//! - [`selection`]: filters and timeframe into a facet selection
//! - [`job`]: job compilation, limits, order and roll-ups
//! - [`execution`]: cached async execution and the in-memory engine
//! - [`result`]: raw results into a paged matrix
//! - [`output`]: layouts and file exports
//! - [`service`]: the end-to-end pipeline
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use prism::execution::{ExecutionCoordinator, ExecutionPolicy, InMemoryEngine, TableRunner};
//! use prism::model::Catalog;
//! use prism::request::{Request, Space};
//! use prism::{AnalyticsService, InMemoryBookmarkStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let catalog = Arc::new(Catalog::from_json(&std::fs::read_to_string("catalog.json")?)?);
//!     let runner = TableRunner::from_json(catalog.clone(), &std::fs::read_to_string("data.json")?)?;
//!     let engine = Arc::new(InMemoryEngine::new(Arc::new(runner), 4));
//!
//!     let service = AnalyticsService::new(
//!         catalog,
//!         Arc::new(InMemoryBookmarkStore::new()),
//!         ExecutionCoordinator::new(engine, ExecutionPolicy::default()),
//!     );
//!
//!     let space = Space::new("acme", "p1", "@'sales'", "alice");
//!     let request = Request::new().group_by(&["'Country'"]).metrics(&["'Revenue'"]);
//!     let analysis = service.analyze(&space, request, None, None).await?;
//!
//!     println!("{}", serde_json::to_string_pretty(&analysis.output)?);
//!     Ok(())
//! }
//! ```

pub mod bookmark;
pub mod config;
pub mod error;
pub mod execution;
pub mod job;
pub mod merge;
pub mod model;
pub mod output;
pub mod request;
pub mod result;
pub mod selection;
pub mod service;

#[cfg(test)]
mod test_support;

pub use bookmark::{BookmarkStore, InMemoryBookmarkStore, StoredConfig};
pub use config::Config;
pub use error::{AnalysisError, AnalysisResult};
pub use request::{Layout, Request, Space};
pub use service::{Analysis, AnalyticsService};
