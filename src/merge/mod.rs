//! Stored configuration merging
//!
//! Completes an incoming `Request` in place from a bookmark's `StoredConfig`:
//! domain, limit, period, group-by, metrics, order, roll-ups and the stored
//! selection. Explicit request values always win; a leading `"*"` extends the
//! stored defaults instead of replacing them.
//!
//! Parse failures on stored content are downgraded to `Problem`s attached to
//! the request. Only an unresolvable domain or explicit period is fatal.

mod selection;

use tracing::debug;

use crate::bookmark::StoredConfig;
use crate::error::AnalysisResult;
use crate::model::{Domain, Expr, SemanticModel};
use crate::request::{is_unset, Request, Space, WILDCARD};

/// Shortcut applied to an auto-detected, fully indexed period
pub const DEFAULT_INDEXED_TIMEFRAME: &str = "__CURRENT_MONTH";
/// Shortcut applied to an auto-detected, partially indexed period
pub const DEFAULT_TIMEFRAME: &str = "__ALL";
/// Metric used when nothing at all was chosen
pub const DEFAULT_METRIC: &str = "count()";

/// Merge a list with its stored defaults
///
/// A leading wildcard yields `defaults ++ rest`; an empty list yields the
/// defaults; any other list is kept unchanged.
pub fn extend_with_defaults(list: &[String], defaults: &[String]) -> Vec<String> {
    match list.first() {
        Some(first) if first.trim() == WILDCARD => {
            defaults.iter().chain(&list[1..]).cloned().collect()
        }
        Some(_) => list.to_vec(),
        None => defaults.to_vec(),
    }
}

/// Merges stored configurations into requests
pub struct ConfigMerger<'a> {
    model: &'a dyn SemanticModel,
}

impl<'a> ConfigMerger<'a> {
    pub fn new(model: &'a dyn SemanticModel) -> Self {
        Self { model }
    }

    /// Complete `request` from `stored`
    pub fn merge(
        &self,
        space: &Space,
        request: &mut Request,
        stored: Option<&StoredConfig>,
    ) -> AnalysisResult<()> {
        let domain_text = request
            .domain
            .clone()
            .or_else(|| stored.and_then(|s| s.domain.clone()))
            .unwrap_or_else(|| space.domain.clone());
        let domain = self.model.resolve_domain(&domain_text)?;
        request.domain = Some(domain_text);

        if request.limit.is_none() {
            request.limit = stored.and_then(|s| s.limit);
        }

        let detected = self.merge_period(request, domain, stored)?;

        let dimensions = stored
            .map(|s| self.reprint_all(request, &s.chosen_dimensions, &domain.id, "chosenDimensions"));
        let list = request.group_by.take();
        request.group_by = self.merge_list(request, "groupBy", list, dimensions);

        let metrics = stored
            .map(|s| self.reprint_all(request, &s.chosen_metrics, &domain.id, "chosenMetrics"));
        let list = request.metrics.take();
        request.metrics = self.merge_list(request, "metrics", list, metrics);

        if stored.is_none() && is_unset(&request.group_by) && is_unset(&request.metrics) {
            request.metrics = Some(vec![DEFAULT_METRIC.to_string()]);
        }

        if let Some(stored) = stored {
            if is_unset(&request.order_by) && !stored.order_by.is_empty() {
                let order = self.reprint_order(request, &stored.order_by, &domain.id);
                request.order_by = Some(order).filter(|o| !o.is_empty());
            }
            if is_unset(&request.rollups) && !stored.rollups.is_empty() {
                request.rollups = Some(stored.rollups.clone());
            }
        }
        self.merge_selection(request, domain, stored.and_then(|s| s.selection.as_ref()));

        if let Some(indexed) = detected {
            if is_unset(&request.timeframe) {
                let shortcut = if indexed {
                    DEFAULT_INDEXED_TIMEFRAME
                } else {
                    DEFAULT_TIMEFRAME
                };
                request.timeframe = Some(vec![shortcut.to_string()]);
            }
        }

        if request.period.is_none()
            && (!is_unset(&request.timeframe) || !is_unset(&request.compare_to))
        {
            request.warn("period", "a period is required to apply timeframe and compareTo");
        }

        debug!(
            domain = %domain.id,
            group_by = ?request.group_by,
            metrics = ?request.metrics,
            period = ?request.period,
            problems = request.problems.len(),
            "Request merged"
        );
        Ok(())
    }

    /// Resolve the period; returns the auto-detected dimension's indexed flag
    fn merge_period(
        &self,
        request: &mut Request,
        domain: &Domain,
        stored: Option<&StoredConfig>,
    ) -> AnalysisResult<Option<bool>> {
        if let Some(period) = request.period.as_deref() {
            self.model.parse(period, Some(&domain.id))?;
            return Ok(None);
        }

        if let Some(text) = stored.and_then(|s| s.period_for(&domain.id)) {
            match self.model.parse(text, Some(&domain.id)) {
                Ok(expr) => {
                    request.period = Some(self.print(request, &expr, &domain.id));
                    return Ok(None);
                }
                Err(e) => request.error("period", format!("stored period ignored: {}", e)),
            }
        }

        match domain.find_period_dimension() {
            Some(dimension) => {
                let expr = self
                    .model
                    .parse(&format!("@'{}'", dimension.id), Some(&domain.id))?;
                request.period = Some(self.print(request, &expr, &domain.id));
                Ok(Some(dimension.indexed))
            }
            None => Ok(None),
        }
    }

    fn merge_list(
        &self,
        request: &mut Request,
        subject: &str,
        list: Option<Vec<String>>,
        defaults: Option<Vec<String>>,
    ) -> Option<Vec<String>> {
        let list = list
            .map(|l| self.strip_misplaced_wildcards(request, subject, l))
            .unwrap_or_default();
        let merged = extend_with_defaults(&list, &defaults.unwrap_or_default());
        Some(merged).filter(|m| !m.is_empty())
    }

    fn strip_misplaced_wildcards(
        &self,
        request: &mut Request,
        subject: &str,
        list: Vec<String>,
    ) -> Vec<String> {
        let mut kept = Vec::with_capacity(list.len());
        for (i, item) in list.into_iter().enumerate() {
            if i > 0 && item.trim() == WILDCARD {
                request.warn(
                    format!("{}[{}]", subject, i),
                    "wildcard is only allowed as the first element",
                );
                continue;
            }
            kept.push(item);
        }
        kept
    }

    /// Reparse stored expressions and print them in the request style
    fn reprint_all(
        &self,
        request: &mut Request,
        items: &[String],
        domain_id: &str,
        subject: &str,
    ) -> Vec<String> {
        let mut printed = Vec::with_capacity(items.len());
        for (i, text) in items.iter().enumerate() {
            match self.model.parse(text, Some(domain_id)) {
                Ok(expr) => printed.push(self.print(request, &expr, domain_id)),
                Err(e) => request.error(format!("{}[{}]", subject, i), e.to_string()),
            }
        }
        printed
    }

    /// Reprint stored order specs with an explicit direction
    fn reprint_order(&self, request: &mut Request, items: &[String], domain_id: &str) -> Vec<String> {
        let mut printed = Vec::with_capacity(items.len());
        for (i, text) in items.iter().enumerate() {
            // Bare ordinals are resolved by the compiler
            if text.trim().parse::<i64>().is_ok() {
                printed.push(text.trim().to_string());
                continue;
            }
            let expr = match self.model.parse(text, Some(domain_id)) {
                Ok(expr) => expr,
                Err(e) => {
                    request.error(format!("orderBy[{}]", i), e.to_string());
                    continue;
                }
            };
            let expr = if expr.sort_wrapper().is_some() {
                expr
            } else {
                let descending = expr.expr_type().value.prefers_descending();
                Expr::call(if descending { "desc" } else { "asc" }, vec![expr])
            };
            printed.push(self.print(request, &expr, domain_id));
        }
        printed
    }

    fn print(&self, request: &Request, expr: &Expr, domain_id: &str) -> String {
        self.model.pretty_print(expr, request.style, Some(domain_id))
    }
}
