//! Resolved request and selection into an `AnalysisJob`

use chrono::{NaiveDate, Utc};
use tracing::debug;
use uuid::Uuid;

use super::{
    AnalysisJob, Direction, FacetSpec, IndexLookup, MetricSpec, OrderBy, OrderTarget, RollUp,
    RollUpPosition, GRAND_TOTAL,
};
use crate::error::{AnalysisError, AnalysisResult};
use crate::model::{print_global, Domain, Expr, RefKind, SemanticModel, Style, Value};
use crate::request::{Request, Space};
use crate::selection::Selection;

/// Automatic limit for JSON-style output: `10^(facets + exponent_offset)`, capped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitPolicy {
    pub exponent_offset: u32,
    pub cap: u64,
}

impl Default for LimitPolicy {
    fn default() -> Self {
        Self {
            exponent_offset: 1,
            cap: 100_000,
        }
    }
}

impl LimitPolicy {
    pub fn limit_for(&self, facet_count: usize) -> u64 {
        let exponent = (facet_count as u32).saturating_add(self.exponent_offset);
        10u64
            .checked_pow(exponent)
            .map(|l| l.min(self.cap))
            .unwrap_or(self.cap)
    }
}

/// Compiles resolved requests into jobs
pub struct JobCompiler<'a> {
    model: &'a dyn SemanticModel,
    policy: LimitPolicy,
    anchor: Option<NaiveDate>,
}

impl<'a> JobCompiler<'a> {
    pub fn new(model: &'a dyn SemanticModel) -> Self {
        Self {
            model,
            policy: LimitPolicy::default(),
            anchor: None,
        }
    }

    /// Builder method: set limit policy
    pub fn with_policy(mut self, policy: LimitPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Builder method: pin the day relative timeframes resolve against (default: today, UTC)
    pub fn with_anchor(mut self, anchor: NaiveDate) -> Self {
        self.anchor = Some(anchor);
        self
    }

    /// Compile a merged request
    ///
    /// Fails on unresolvable expressions, an empty column list, out of bounds
    /// ordinals and roll-ups on metrics. Unresolvable beyond-limit entries
    /// are recorded on the request and dropped.
    pub fn compile(
        &self,
        space: &Space,
        request: &mut Request,
        selection: &Selection,
    ) -> AnalysisResult<AnalysisJob> {
        let domain_text = request.domain.as_deref().unwrap_or(&space.domain);
        let domain = self.model.resolve_domain(domain_text)?;
        let style = request.style;

        let group_by = request.group_by.clone().unwrap_or_default();
        let metric_list = request.metrics.clone().unwrap_or_default();

        let mut facets = Vec::new();
        let mut metrics = Vec::new();
        let mut lookup = IndexLookup::default();
        let mut declared = Vec::with_capacity(group_by.len() + metric_list.len());

        for (decl, text) in group_by.iter().chain(metric_list.iter()).enumerate() {
            let expr = self.model.parse(text, Some(&domain.id))?;
            let ty = expr.expr_type();
            let label = self.model.pretty_print(&expr, style, Some(&domain.id));
            let description = describe(domain, &expr);

            if ty.aggregate {
                let composed = compose(domain, expr.clone());
                lookup.insert(decl, metrics.len(), true);
                metrics.push(MetricSpec {
                    expr: print_global(&composed, Style::Robot),
                    name: label,
                    value_type: ty.value,
                    description,
                });
            } else {
                lookup.insert(decl, facets.len(), false);
                facets.push(FacetSpec {
                    expr: print_global(&expr, Style::Robot),
                    label,
                    value_type: ty.value,
                    continuous: ty.continuous,
                    description,
                });
            }
            declared.push(expr);
        }

        if facets.is_empty() && metrics.is_empty() {
            return Err(AnalysisError::Config(
                "at least one group-by or metric is required".to_string(),
            ));
        }

        let order_by = self.compile_order(request, domain, &lookup, &facets, &metrics)?;
        let rollups = self.compile_rollups(request, &lookup)?;
        let beyond_limit = self.compile_beyond_limit(request, domain, &lookup, &group_by, &declared)?;

        let limit = match request.limit {
            Some(limit) => Some(limit),
            None if request.is_json_output() => Some(self.policy.limit_for(facets.len())),
            None => None,
        };

        let job = AnalysisJob {
            id: Uuid::new_v4().to_string(),
            owner: space.user.clone(),
            domain: domain.id.clone(),
            selection: selection.clone(),
            facets,
            metrics,
            order_by,
            rollups,
            limit,
            offset: request.offset,
            beyond_limit,
            anchor: self.anchor.unwrap_or_else(|| Utc::now().date_naive()),
            lookup,
        };

        debug!(
            job_id = %job.id,
            facets = job.facets.len(),
            metrics = job.metrics.len(),
            limit = ?job.limit,
            "Job compiled"
        );
        Ok(job)
    }

    fn compile_order(
        &self,
        request: &Request,
        domain: &Domain,
        lookup: &IndexLookup,
        facets: &[FacetSpec],
        metrics: &[MetricSpec],
    ) -> AnalysisResult<Vec<OrderBy>> {
        let column_type = |column: usize| match facets.get(column) {
            Some(f) => f.value_type,
            None => metrics[column - facets.len()].value_type,
        };

        let mut order = Vec::new();
        for text in request.order_by.iter().flatten() {
            if let Ok(n) = text.trim().parse::<i64>() {
                let column = column_of(n, lookup, facets.len(), "orderBy")?;
                order.push(OrderBy {
                    target: OrderTarget::Column(column),
                    direction: Direction::for_type(column_type(column)),
                });
                continue;
            }

            let expr = self.model.parse(text, Some(&domain.id))?;
            let (explicit, inner) = match expr.sort_wrapper() {
                Some((descending, inner)) => (Some(descending), inner.clone()),
                None => (None, expr),
            };

            // `DESC(2)` addresses a column with an explicit direction
            if let Some(Value::Integer(n)) = inner.as_literal() {
                let column = column_of(*n, lookup, facets.len(), "orderBy")?;
                let direction = match explicit {
                    Some(true) => Direction::Desc,
                    Some(false) => Direction::Asc,
                    None => Direction::for_type(column_type(column)),
                };
                order.push(OrderBy {
                    target: OrderTarget::Column(column),
                    direction,
                });
                continue;
            }

            let ty = inner.expr_type();
            let direction = match explicit {
                Some(true) => Direction::Desc,
                Some(false) => Direction::Asc,
                None => Direction::for_type(ty.value),
            };
            let inner = if ty.aggregate { compose(domain, inner) } else { inner };
            order.push(OrderBy {
                target: OrderTarget::Expression(print_global(&inner, Style::Robot)),
                direction,
            });
        }
        Ok(order)
    }

    fn compile_rollups(&self, request: &Request, lookup: &IndexLookup) -> AnalysisResult<Vec<RollUp>> {
        let pattern = regex::Regex::new(r"(?i)^\s*(?:(FIRST|LAST)\(\s*(-?\d+)\s*\)|(-?\d+))\s*$")
            .map_err(|e| AnalysisError::Config(format!("roll-up pattern: {}", e)))?;

        let mut rollups = Vec::new();
        for text in request.rollups.iter().flatten() {
            let invalid = || AnalysisError::Config(format!("invalid roll-up '{}'", text));
            let caps = pattern.captures(text).ok_or_else(invalid)?;
            let position = match caps.get(1).map(|m| m.as_str().to_uppercase()) {
                Some(p) if p == "FIRST" => RollUpPosition::First,
                Some(_) => RollUpPosition::Last,
                None => RollUpPosition::Default,
            };
            let n = caps
                .get(2)
                .or_else(|| caps.get(3))
                .and_then(|m| m.as_str().parse::<i64>().ok())
                .ok_or_else(invalid)?;

            if n == GRAND_TOTAL {
                rollups.push(RollUp { col: n, position });
                continue;
            }

            let decl = usize::try_from(n).map_err(|_| out_of_bounds("roll-up", n))?;
            match (lookup.legacy_index(decl), lookup.is_metric(decl)) {
                (_, Some(true)) => {
                    return Err(AnalysisError::Config("cannot rollup on metric".to_string()))
                }
                (Some(legacy), Some(false)) => rollups.push(RollUp {
                    col: legacy as i64,
                    position,
                }),
                _ => return Err(out_of_bounds("roll-up", n)),
            }
        }
        Ok(rollups)
    }

    fn compile_beyond_limit(
        &self,
        request: &mut Request,
        domain: &Domain,
        lookup: &IndexLookup,
        group_by: &[String],
        declared: &[Expr],
    ) -> AnalysisResult<Vec<usize>> {
        let entries = request.beyond_limit.clone().unwrap_or_default();
        let mut indices = Vec::new();

        for (i, entry) in entries.iter().enumerate() {
            let decl = if let Ok(n) = entry.trim().parse::<i64>() {
                Some(usize::try_from(n).map_err(|_| out_of_bounds("beyond-limit", n))?)
            } else if let Some(position) = group_by.iter().position(|g| g.trim() == entry.trim()) {
                Some(position)
            } else {
                self.model
                    .parse(entry, Some(&domain.id))
                    .ok()
                    .and_then(|expr| declared[..group_by.len()].iter().position(|d| *d == expr))
            };

            let Some(decl) = decl else {
                request.error(
                    format!("beyondLimit[{}]", i),
                    format!("'{}' does not match any group-by column", entry),
                );
                continue;
            };

            match (lookup.legacy_index(decl), lookup.is_metric(decl)) {
                (Some(legacy), Some(false)) => {
                    if !indices.contains(&legacy) {
                        indices.push(legacy);
                    }
                }
                (_, Some(true)) => {
                    return Err(AnalysisError::Config(format!(
                        "beyond-limit column {} is a metric",
                        decl
                    )))
                }
                _ => return Err(out_of_bounds("beyond-limit", decl as i64)),
            }
        }
        Ok(indices)
    }
}

/// Bind an aggregate to its domain unless it already is
fn compose(domain: &Domain, expr: Expr) -> Expr {
    if expr.is_domain_scoped() {
        expr
    } else {
        Expr::Compose {
            domain: domain.to_ref(),
            inner: Box::new(expr),
        }
    }
}

fn describe(domain: &Domain, expr: &Expr) -> Option<String> {
    let reference = expr.as_reference()?;
    match reference.kind {
        RefKind::Dimension => domain
            .find_dimension(&reference.target.id)
            .and_then(|d| d.description.clone()),
        RefKind::Metric => domain
            .find_metric(&reference.target.id)
            .and_then(|m| m.description.clone()),
        _ => None,
    }
}

/// Declaration index to projected column: facets first, then metrics
fn column_of(n: i64, lookup: &IndexLookup, facet_count: usize, subject: &str) -> AnalysisResult<usize> {
    let decl = usize::try_from(n).map_err(|_| out_of_bounds(subject, n))?;
    match (lookup.legacy_index(decl), lookup.is_metric(decl)) {
        (Some(legacy), Some(true)) => Ok(facet_count + legacy),
        (Some(legacy), Some(false)) => Ok(legacy),
        _ => Err(out_of_bounds(subject, n)),
    }
}

fn out_of_bounds(subject: &str, n: i64) -> AnalysisError {
    AnalysisError::Config(format!("{} index {} is out of bounds", subject, n))
}
