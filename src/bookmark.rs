//! Stored bookmark configurations
//!
//! A bookmark is a saved query configuration bound to a domain. The pipeline
//! only reads them; persistence lives behind the `BookmarkStore` trait.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::selection::Selection;

/// A saved, reusable query configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoredConfig {
    /// Domain the bookmark is bound to
    pub domain: Option<String>,
    pub limit: Option<u64>,
    /// Dimension expressions, in the bookmark's domain scope
    pub chosen_dimensions: Vec<String>,
    /// Metric expressions, in the bookmark's domain scope
    pub chosen_metrics: Vec<String>,
    /// Order specs, optionally wrapped in `ASC(...)`/`DESC(...)`
    pub order_by: Vec<String>,
    pub rollups: Vec<String>,
    /// Period expression per domain id
    pub period: HashMap<String, String>,
    pub selection: Option<Selection>,
}

impl StoredConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set chosen dimensions
    pub fn dimensions(mut self, items: &[&str]) -> Self {
        self.chosen_dimensions = items.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Builder method: set chosen metrics
    pub fn metrics(mut self, items: &[&str]) -> Self {
        self.chosen_metrics = items.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Builder method: set default order
    pub fn order_by(mut self, items: &[&str]) -> Self {
        self.order_by = items.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Builder method: set default limit
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Builder method: set the period of a domain
    pub fn period(mut self, domain: &str, expr: &str) -> Self {
        self.period.insert(domain.to_string(), expr.to_string());
        self
    }

    /// Builder method: set selection snapshot
    pub fn selection(mut self, selection: Selection) -> Self {
        self.selection = Some(selection);
        self
    }

    /// Period stored for a domain
    pub fn period_for(&self, domain_id: &str) -> Option<&str> {
        self.period.get(domain_id).map(String::as_str)
    }
}

/// Read-only access to stored configurations
pub trait BookmarkStore: Send + Sync {
    /// Look up a configuration by bookmark or state id
    fn get(&self, id: &str) -> Option<StoredConfig>;
}

/// Bookmark store backed by a map
#[derive(Debug, Clone, Default)]
pub struct InMemoryBookmarkStore {
    configs: HashMap<String, StoredConfig>,
}

impl InMemoryBookmarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: add a configuration
    pub fn with(mut self, id: impl Into<String>, config: StoredConfig) -> Self {
        self.configs.insert(id.into(), config);
        self
    }

    /// Load `{ "<id>": { ...config } }`
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Self {
            configs: serde_json::from_str(json)?,
        })
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}

impl BookmarkStore for InMemoryBookmarkStore {
    fn get(&self, id: &str) -> Option<StoredConfig> {
        self.configs.get(id).cloned()
    }
}
