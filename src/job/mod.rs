//! Analysis jobs
//!
//! An `AnalysisJob` is the compiled, executable form of a resolved request:
//! ordered facet and metric projections, order, roll-ups and limits. It is
//! built fresh per request by the [`JobCompiler`] and never mutated after.
//!
//! Column addressing follows the older ordinal protocol: request entries get a
//! dense *declaration index* (group-by first, then metrics), while the job
//! addresses its physical columns facets first, then metrics.

mod compiler;

pub use compiler::{JobCompiler, LimitPolicy};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{AnalysisError, AnalysisResult};
use crate::model::{Value, ValueType};
use crate::selection::{Bound, ResolvedInterval, Selection};

/// A dimension projection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacetSpec {
    /// Expression in global robot form
    pub expr: String,
    /// Display label in the request style
    pub label: String,
    pub value_type: ValueType,
    /// Projected as a (min, max) pair
    pub continuous: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// An aggregate projection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSpec {
    /// Domain-composed expression in global robot form
    pub expr: String,
    /// Display name in the request style
    pub name: String,
    pub value_type: ValueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    /// Default direction for a value type
    pub fn for_type(value_type: ValueType) -> Self {
        if value_type.prefers_descending() {
            Direction::Desc
        } else {
            Direction::Asc
        }
    }
}

/// What an order spec sorts on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OrderTarget {
    /// Projected column: facets first, then metrics
    Column(usize),
    /// Expression in global robot form, possibly not projected
    Expression(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub target: OrderTarget,
    pub direction: Direction,
}

/// Where subtotal rows go relative to their group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RollUpPosition {
    First,
    Last,
    #[default]
    Default,
}

/// Grand total marker
pub const GRAND_TOTAL: i64 = -1;

/// A subtotal level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollUp {
    /// Facet index the subtotal is computed at, or `-1` for the grand total
    pub col: i64,
    pub position: RollUpPosition,
}

impl RollUp {
    pub fn is_grand_total(&self) -> bool {
        self.col == GRAND_TOTAL
    }

    /// Number of leading facets kept by this subtotal
    pub fn depth(&self) -> usize {
        if self.is_grand_total() {
            0
        } else {
            self.col as usize + 1
        }
    }
}

/// Declaration index to legacy index tables
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexLookup {
    legacy: BTreeMap<usize, usize>,
    metric: BTreeMap<usize, bool>,
}

impl IndexLookup {
    pub fn insert(&mut self, decl: usize, legacy: usize, is_metric: bool) {
        self.legacy.insert(decl, legacy);
        self.metric.insert(decl, is_metric);
    }

    /// Index within facets, or within metrics
    pub fn legacy_index(&self, decl: usize) -> Option<usize> {
        self.legacy.get(&decl).copied()
    }

    pub fn is_metric(&self, decl: usize) -> Option<bool> {
        self.metric.get(&decl).copied()
    }

    pub fn len(&self) -> usize {
        self.legacy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.legacy.is_empty()
    }
}

/// A compiled analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisJob {
    pub id: String,
    /// User who submitted the job
    pub owner: String,
    /// Domain id
    pub domain: String,
    pub selection: Selection,
    pub facets: Vec<FacetSpec>,
    pub metrics: Vec<MetricSpec>,
    pub order_by: Vec<OrderBy>,
    pub rollups: Vec<RollUp>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Facet indices exempt from the limit
    pub beyond_limit: Vec<usize>,
    /// Day relative timeframes resolve against
    pub anchor: NaiveDate,
    #[serde(skip)]
    pub lookup: IndexLookup,
}

/// Content identity of a job
///
/// Holds the full encoded content, so distinct analyses never share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey(Vec<u8>);

impl JobKey {
    /// Short display id, not unique
    pub fn id(&self) -> String {
        format!("{:08x}", crc32fast::hash(&self.0))
    }
}

#[derive(Serialize)]
struct Fingerprint<'a> {
    domain: &'a str,
    selection: &'a Selection,
    periods: Vec<(Option<Value>, Option<Value>)>,
    facets: &'a [FacetSpec],
    metrics: &'a [MetricSpec],
    order_by: &'a [OrderBy],
    rollups: &'a [RollUp],
    limit: Option<u64>,
    offset: Option<u64>,
    beyond_limit: &'a [usize],
}

impl AnalysisJob {
    /// Cache key over the job's semantic content
    ///
    /// Excludes the id and owner, so equal analyses share one cache entry.
    /// Relative timeframes enter as their bounds on the job's anchor day.
    pub fn key(&self) -> AnalysisResult<JobKey> {
        let content = Fingerprint {
            domain: &self.domain,
            selection: &self.selection,
            periods: self.resolved_periods()?,
            facets: &self.facets,
            metrics: &self.metrics,
            order_by: &self.order_by,
            rollups: &self.rollups,
            limit: self.limit,
            offset: self.offset,
            beyond_limit: &self.beyond_limit,
        };
        let bytes = bincode::serialize(&content)
            .map_err(|e| AnalysisError::Computation(format!("failed to encode job: {}", e)))?;
        Ok(JobKey(bytes))
    }

    /// Display id of the cache key
    pub fn fingerprint(&self) -> AnalysisResult<String> {
        Ok(self.key()?.id())
    }

    fn resolved_periods(&self) -> AnalysisResult<Vec<(Option<Value>, Option<Value>)>> {
        let shortcut = |b: &Bound| matches!(b, Bound::Shortcut(_));
        // compare shortcuts follow the main interval
        let compare = |b: &Bound| matches!(b, Bound::Shortcut(s) if s.starts_with("__COMPARE_TO_"));

        let mut periods = Vec::new();
        for facet in self.selection.facets.iter().chain(&self.selection.compare_to) {
            let Some((lower, upper)) = facet.interval_bounds() else {
                continue;
            };
            if !(shortcut(lower) || shortcut(upper)) || compare(lower) || compare(upper) {
                continue;
            }
            let interval = ResolvedInterval::resolve(lower, upper, self.anchor)?;
            periods.push((interval.lower, interval.upper));
        }
        Ok(periods)
    }

    /// Number of projected columns
    pub fn column_count(&self) -> usize {
        self.facets.len() + self.metrics.len()
    }

    /// Whether a projected column index falls in the metric range
    pub fn is_metric_column(&self, column: usize) -> bool {
        column >= self.facets.len() && column < self.column_count()
    }

    /// Value type of a projected column
    pub fn column_type(&self, column: usize) -> Option<ValueType> {
        match self.facets.get(column) {
            Some(f) => Some(f.value_type),
            None => self
                .metrics
                .get(column - self.facets.len())
                .map(|m| m.value_type),
        }
    }

    /// Whether a projected column is a beyond-limit facet
    pub fn is_beyond_limit(&self, facet: usize) -> bool {
        self.beyond_limit.contains(&facet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::Facet;
    use std::collections::HashSet;

    fn job(id: &str, owner: &str) -> AnalysisJob {
        AnalysisJob {
            id: id.to_string(),
            owner: owner.to_string(),
            domain: "sales".to_string(),
            selection: Selection::new(),
            facets: vec![FacetSpec {
                expr: "@'sales'.@'country'".into(),
                label: "Country".into(),
                value_type: ValueType::Text,
                continuous: false,
                description: None,
            }],
            metrics: vec![MetricSpec {
                expr: "@'sales'.@'revenue'".into(),
                name: "Revenue".into(),
                value_type: ValueType::Numeric,
                description: None,
            }],
            order_by: vec![OrderBy {
                target: OrderTarget::Column(1),
                direction: Direction::Desc,
            }],
            rollups: vec![],
            limit: Some(100),
            offset: None,
            beyond_limit: vec![],
            anchor: day(2026, 10, 31),
            lookup: IndexLookup::default(),
        }
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn current_month(mut job: AnalysisJob) -> AnalysisJob {
        job.selection.facets.push(Facet::interval(
            "@'sales'.@'order_date'",
            Some("order_date".into()),
            Bound::Shortcut("__CURRENT_MONTH".into()),
            Bound::Shortcut("__CURRENT_MONTH".into()),
        ));
        job
    }

    #[test]
    fn test_fingerprint_ignores_identity() {
        let a = job("a", "alice");
        let b = job("b", "bob");
        assert_eq!(a.key().unwrap(), b.key().unwrap());
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());

        let mut c = job("c", "alice");
        c.limit = Some(10);
        assert_ne!(a.key().unwrap(), c.key().unwrap());
    }

    #[test]
    fn test_limit_and_offset_never_share_a_key() {
        let mut keys = HashSet::new();
        for i in 0..20_000u64 {
            let mut limited = job("a", "alice");
            limited.limit = Some(i.wrapping_mul(0x9E37_79B9_7F4A_7C15));
            assert!(keys.insert(limited.key().unwrap()));

            let mut shifted = job("a", "alice");
            shifted.offset = Some(i);
            assert!(keys.insert(shifted.key().unwrap()));
        }
        assert_eq!(keys.len(), 40_000);
    }

    #[test]
    fn test_relative_timeframe_keys_follow_anchor() {
        let mut october = current_month(job("a", "alice"));
        october.anchor = day(2026, 10, 31);
        let mut early_october = current_month(job("b", "alice"));
        early_october.anchor = day(2026, 10, 1);
        let mut november = current_month(job("c", "alice"));
        november.anchor = day(2026, 11, 1);

        assert_eq!(october.key().unwrap(), early_october.key().unwrap());
        assert_ne!(october.key().unwrap(), november.key().unwrap());

        // fixed bounds do not depend on the day
        let mut fixed = job("d", "alice");
        fixed.anchor = day(2026, 11, 1);
        assert_eq!(fixed.key().unwrap(), job("e", "alice").key().unwrap());
    }

    #[test]
    fn test_unknown_shortcut_fails_key() {
        let mut job = job("a", "alice");
        job.selection.facets.push(Facet::interval(
            "@'sales'.@'order_date'",
            None,
            Bound::Shortcut("__NEXT_CENTURY".into()),
            Bound::Shortcut("__NEXT_CENTURY".into()),
        ));
        assert!(job.fingerprint().is_err());
    }

    #[test]
    fn test_column_addressing() {
        let job = job("a", "alice");
        assert!(!job.is_metric_column(0));
        assert!(job.is_metric_column(1));
        assert!(!job.is_metric_column(2));
        assert_eq!(job.column_type(1), Some(ValueType::Numeric));
        assert_eq!(job.column_type(2), None);
    }

    #[test]
    fn test_job_shape() {
        let json = serde_json::to_value(job("a", "alice")).unwrap();
        assert_eq!(json["orderBy"][0]["target"], 1);
        assert_eq!(json["orderBy"][0]["direction"], "DESC");
        assert!(json.get("lookup").is_none());
    }

    #[test]
    fn test_rollup_depth() {
        let total = RollUp {
            col: GRAND_TOTAL,
            position: RollUpPosition::Default,
        };
        assert!(total.is_grand_total());
        assert_eq!(total.depth(), 0);
        let first = RollUp {
            col: 0,
            position: RollUpPosition::First,
        };
        assert_eq!(first.depth(), 1);
    }
}
