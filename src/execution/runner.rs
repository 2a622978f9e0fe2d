//! Reference computation over in-memory tables
//!
//! [`TableRunner`] evaluates a job against rows held in memory, one table
//! per domain. It produces the same physical shape a SQL engine would:
//! label-addressed columns, `(min, max)` pairs for continuous facets,
//! extra columns for order-by expressions that are not projected and a
//! `__grouping` column carrying the depth of subtotal rows.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use super::eval::{compare_values, extreme, matches_values, Definitions, Evaluator, Scope};
use super::CancelToken;
use crate::error::{AnalysisError, AnalysisResult};
use crate::job::{AnalysisJob, Direction, OrderTarget, RollUpPosition};
use crate::model::{Catalog, Expr, SemanticModel, Value, ValueType};
use crate::result::{max_label, min_label, PhysicalColumn, PhysicalType, ResultSet, GROUPING_LABEL};
use crate::selection::{Member, ResolvedInterval, Selection};

/// One input row: column name to value
pub type Row = HashMap<String, Value>;

/// Rows checked between two cancellation polls
const CANCEL_CHECK_INTERVAL: usize = 1024;

/// Synchronous computation of a job
pub trait JobRunner: Send + Sync {
    /// Compute the physical result of a job, polling `token` for cancellation
    fn run(&self, job: &AnalysisJob, token: &CancelToken) -> AnalysisResult<ResultSet>;

    /// Query text equivalent to the job
    fn render_sql(&self, job: &AnalysisJob) -> AnalysisResult<String>;
}

/// Runs jobs against in-memory tables
pub struct TableRunner {
    catalog: Arc<Catalog>,
    tables: HashMap<String, Vec<Row>>,
    definitions: Definitions,
}

/// A compiled row filter
enum Condition {
    Interval { expr: Expr, interval: ResolvedInterval },
    Discrete { expr: Expr, values: Vec<Value> },
    Predicate(Expr),
}

/// Rows sharing the same discrete facet values
struct Group<'r> {
    key: Vec<Value>,
    rows: Vec<&'r Row>,
}

/// Computed output row with its sort keys
struct OutputRow {
    cells: Vec<Value>,
    sort: Vec<Value>,
    /// Values of the facets the limit applies to
    limited: String,
    prefix: Vec<String>,
}

impl TableRunner {
    /// Create a runner over `tables`, keyed by domain id
    pub fn new(catalog: Arc<Catalog>, tables: HashMap<String, Vec<Row>>) -> AnalysisResult<Self> {
        let definitions = Definitions::compile(&catalog)?;
        Ok(Self {
            catalog,
            tables,
            definitions,
        })
    }

    /// Load tables from a JSON object mapping domain ids to arrays of rows
    pub fn from_json(catalog: Arc<Catalog>, json: &str) -> AnalysisResult<Self> {
        let tables: HashMap<String, Vec<Row>> = serde_json::from_str(json)
            .map_err(|e| AnalysisError::Config(format!("invalid data file: {}", e)))?;
        Self::new(catalog, tables)
    }

    pub fn row_count(&self, domain: &str) -> usize {
        self.tables.get(domain).map(Vec::len).unwrap_or(0)
    }

    fn parse(&self, text: &str) -> AnalysisResult<Expr> {
        Ok(self.catalog.parse(text, None)?)
    }

    fn conditions(&self, job: &AnalysisJob) -> AnalysisResult<Vec<Condition>> {
        let anchor = job.anchor;
        let mut conditions = Vec::new();

        for facet in &job.selection.facets {
            if facet.is_segment() {
                for member in &facet.members {
                    match member {
                        Member::Open { expr, .. } => conditions.push(Condition::Predicate(self.parse(expr)?)),
                        Member::Discrete { value } => {
                            let id = match value {
                                Value::Text(s) => s.clone(),
                                other => other.to_string(),
                            };
                            let segment = self.definitions.segment(&job.domain, &id).ok_or_else(|| {
                                AnalysisError::Computation(format!("unknown segment '{}'", id))
                            })?;
                            conditions.push(Condition::Predicate(segment.clone()));
                        }
                        Member::Interval { .. } => {
                            return Err(AnalysisError::Computation(
                                "segments cannot hold intervals".to_string(),
                            ))
                        }
                    }
                }
                continue;
            }

            let expr = self.parse(&facet.id)?;
            if let Some((lower, upper)) = facet.interval_bounds() {
                let interval = ResolvedInterval::resolve(lower, upper, anchor)?;
                conditions.push(Condition::Interval { expr, interval });
                continue;
            }
            let values: Vec<Value> = facet.discrete_values().into_iter().cloned().collect();
            if !values.is_empty() {
                conditions.push(Condition::Discrete { expr, values });
            }
        }
        Ok(conditions)
    }

    fn keep(&self, evaluator: &Evaluator<'_>, conditions: &[Condition], row: &Row) -> AnalysisResult<bool> {
        for condition in conditions {
            let kept = match condition {
                Condition::Interval { expr, interval } => {
                    let value = evaluator.eval(expr, Scope::Row(row))?;
                    !value.is_null() && interval.contains(&value)
                }
                Condition::Discrete { expr, values } => {
                    let value = evaluator.eval(expr, Scope::Row(row))?;
                    values.iter().any(|v| matches_values(&value, v))
                }
                Condition::Predicate(expr) => evaluator.test(expr, row)?,
            };
            if !kept {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl JobRunner for TableRunner {
    fn run(&self, job: &AnalysisJob, token: &CancelToken) -> AnalysisResult<ResultSet> {
        let table = self
            .tables
            .get(&job.domain)
            .ok_or_else(|| AnalysisError::Computation(format!("no data for domain '{}'", job.domain)))?;
        let evaluator = Evaluator {
            definitions: &self.definitions,
        };

        let facets = job
            .facets
            .iter()
            .map(|f| self.parse(&f.expr))
            .collect::<AnalysisResult<Vec<_>>>()?;
        let metrics = job
            .metrics
            .iter()
            .map(|m| self.parse(&m.expr))
            .collect::<AnalysisResult<Vec<_>>>()?;

        let projected: HashSet<&str> = job
            .facets
            .iter()
            .map(|f| f.expr.as_str())
            .chain(job.metrics.iter().map(|m| m.expr.as_str()))
            .collect();
        let mut hidden: Vec<(String, Expr)> = Vec::new();
        for order in &job.order_by {
            if let OrderTarget::Expression(text) = &order.target {
                if !projected.contains(text.as_str()) && !hidden.iter().any(|(t, _)| t == text) {
                    hidden.push((text.clone(), self.parse(text)?));
                }
            }
        }

        // filter
        let conditions = self.conditions(job)?;
        let mut kept = Vec::new();
        for (i, row) in table.iter().enumerate() {
            if i % CANCEL_CHECK_INTERVAL == 0 {
                token.check()?;
            }
            if self.keep(&evaluator, &conditions, row)? {
                kept.push(row);
            }
        }

        // group on discrete facets, in first-seen order
        let discrete: Vec<usize> = (0..facets.len()).filter(|&i| !job.facets[i].continuous).collect();
        let mut groups: Vec<Group<'_>> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for (i, row) in kept.iter().copied().enumerate() {
            if i % CANCEL_CHECK_INTERVAL == 0 {
                token.check()?;
            }
            let key = discrete
                .iter()
                .map(|&f| evaluator.eval(&facets[f], Scope::Row(row)))
                .collect::<AnalysisResult<Vec<_>>>()?;
            let id = key.iter().map(Value::key).collect::<Vec<_>>().join("\u{1}");
            match positions.get(&id) {
                Some(&p) => groups[p].rows.push(row),
                None => {
                    positions.insert(id, groups.len());
                    groups.push(Group {
                        key,
                        rows: vec![row],
                    });
                }
            }
        }
        if groups.is_empty() && discrete.is_empty() {
            // a pure aggregate still yields one row
            groups.push(Group {
                key: Vec::new(),
                rows: Vec::new(),
            });
        }
        token.check()?;

        let limited_facets: Vec<usize> = (0..facets.len())
            .filter(|f| !job.is_beyond_limit(*f))
            .collect();
        let project = |rows: &[&Row], key: &[Value], depth: Option<usize>| -> AnalysisResult<OutputRow> {
            let mut cells = Vec::new();
            let mut facet_values = Vec::with_capacity(facets.len());
            let mut key_values = key.iter();
            for (f, expr) in facets.iter().enumerate() {
                let rolled = depth.map(|d| f >= d).unwrap_or(false);
                if job.facets[f].continuous {
                    let values = rows
                        .iter()
                        .map(|r| evaluator.eval(expr, Scope::Row(r)))
                        .collect::<AnalysisResult<Vec<_>>>()?;
                    let (min, max) = if rolled {
                        (Value::Null, Value::Null)
                    } else {
                        (extreme(values.clone(), Ordering::Less), extreme(values, Ordering::Greater))
                    };
                    cells.push(min.clone());
                    cells.push(max);
                    facet_values.push(min);
                } else {
                    let value = key_values.next().cloned().unwrap_or(Value::Null);
                    let value = if rolled { Value::Null } else { value };
                    cells.push(value.clone());
                    facet_values.push(value);
                }
            }
            let mut measure_values = Vec::with_capacity(metrics.len());
            for expr in &metrics {
                let value = evaluator.eval(expr, Scope::Group(rows))?;
                cells.push(value.clone());
                measure_values.push(value);
            }
            let mut hidden_values = HashMap::new();
            for (text, expr) in &hidden {
                let value = evaluator.eval(expr, Scope::Group(rows))?;
                cells.push(value.clone());
                hidden_values.insert(text.as_str(), value);
            }
            if !job.rollups.is_empty() {
                cells.push(depth.map(|d| Value::Integer(d as i64)).unwrap_or(Value::Null));
            }

            let sort = job
                .order_by
                .iter()
                .map(|order| match &order.target {
                    OrderTarget::Column(c) if *c < facet_values.len() => facet_values[*c].clone(),
                    OrderTarget::Column(c) => {
                        measure_values.get(c - facet_values.len()).cloned().unwrap_or(Value::Null)
                    }
                    OrderTarget::Expression(text) => hidden_values
                        .get(text.as_str())
                        .cloned()
                        .or_else(|| {
                            job.facets
                                .iter()
                                .position(|f| &f.expr == text)
                                .map(|p| facet_values[p].clone())
                        })
                        .or_else(|| {
                            job.metrics
                                .iter()
                                .position(|m| &m.expr == text)
                                .map(|p| measure_values[p].clone())
                        })
                        .unwrap_or(Value::Null),
                })
                .collect();
            let limited = limited_facets
                .iter()
                .map(|&f| facet_values[f].key())
                .collect::<Vec<_>>()
                .join("\u{1}");
            let prefix = facet_values.iter().map(Value::key).collect();
            Ok(OutputRow {
                cells,
                sort,
                limited,
                prefix,
            })
        };

        let mut details = Vec::with_capacity(groups.len());
        for (i, group) in groups.iter().enumerate() {
            if i % CANCEL_CHECK_INTERVAL == 0 {
                token.check()?;
            }
            details.push((project(&group.rows[..], &group.key[..], None)?, i));
        }

        // nulls sort last whatever the direction
        details.sort_by(|(a, _), (b, _)| {
            for (i, order) in job.order_by.iter().enumerate() {
                let ordering = match (a.sort[i].is_null(), b.sort[i].is_null()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) => {
                        let ordering = compare_values(&a.sort[i], &b.sort[i]).unwrap_or(Ordering::Equal);
                        match order.direction {
                            Direction::Asc => ordering,
                            Direction::Desc => ordering.reverse(),
                        }
                    }
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });

        // offset and limit count distinct keys of the limited facets
        let mut seen: Vec<&str> = Vec::new();
        let mut distinct = HashSet::new();
        for (row, _) in &details {
            if distinct.insert(row.limited.as_str()) {
                seen.push(&row.limited);
            }
        }
        let offset = job.offset.unwrap_or(0) as usize;
        let end = job
            .limit
            .map(|l| offset.saturating_add(l as usize))
            .unwrap_or(usize::MAX);
        let allowed: HashSet<String> = seen
            .iter()
            .skip(offset)
            .take(end.saturating_sub(offset))
            .map(|s| s.to_string())
            .collect();
        let complete = end >= seen.len();
        let details: Vec<(OutputRow, usize)> = details
            .into_iter()
            .filter(|(row, _)| allowed.contains(&row.limited))
            .collect();
        token.check()?;

        let rows = if job.rollups.is_empty() {
            details.into_iter().map(|(row, _)| row.cells).collect()
        } else {
            self.with_rollups(job, &groups, details, &project)?
        };

        let mut columns = Vec::new();
        for facet in &job.facets {
            if facet.continuous {
                columns.push((min_label(&facet.expr), facet.value_type));
                columns.push((max_label(&facet.expr), facet.value_type));
            } else {
                columns.push((facet.expr.clone(), facet.value_type));
            }
        }
        for metric in &job.metrics {
            columns.push((metric.expr.clone(), metric.value_type));
        }
        for (text, expr) in &hidden {
            columns.push((text.clone(), expr.expr_type().value));
        }
        if !job.rollups.is_empty() {
            columns.push((GROUPING_LABEL.to_string(), ValueType::Numeric));
        }
        let columns = columns
            .into_iter()
            .enumerate()
            .map(|(i, (label, fallback))| PhysicalColumn {
                ty: if label == GROUPING_LABEL {
                    PhysicalType::Integer
                } else {
                    PhysicalType::infer(rows.iter().filter_map(|r: &Vec<Value>| r.get(i)), fallback)
                },
                label,
            })
            .collect();

        debug!(
            job_id = %job.id,
            input = table.len(),
            filtered = kept.len(),
            rows = rows.len(),
            complete,
            "Job computed"
        );

        Ok(ResultSet {
            columns,
            rows,
            computed_at: Utc::now(),
            complete,
        })
    }

    fn render_sql(&self, job: &AnalysisJob) -> AnalysisResult<String> {
        render_sql(job, job.anchor)
    }
}

impl TableRunner {
    /// Interleave subtotal rows with the detail rows they summarize
    fn with_rollups<'r, F>(
        &self,
        job: &AnalysisJob,
        groups: &[Group<'r>],
        details: Vec<(OutputRow, usize)>,
        project: &F,
    ) -> AnalysisResult<Vec<Vec<Value>>>
    where
        F: Fn(&[&'r Row], &[Value], Option<usize>) -> AnalysisResult<OutputRow>,
    {
        // (anchor detail, before it, depth, cells)
        let mut inserts: Vec<(usize, bool, usize, Vec<Value>)> = Vec::new();

        for rollup in &job.rollups {
            let depth = rollup.depth().min(job.facets.len());
            let first = rollup.position == RollUpPosition::First;

            let mut members: Vec<(Vec<String>, Vec<usize>)> = Vec::new();
            for (index, (row, _)) in details.iter().enumerate() {
                let prefix = row.prefix[..depth].to_vec();
                match members.iter_mut().find(|(p, _)| *p == prefix) {
                    Some((_, indices)) => indices.push(index),
                    None => members.push((prefix, vec![index])),
                }
            }
            if members.is_empty() {
                members.push((Vec::new(), Vec::new()));
            }

            for (_, indices) in members {
                let mut rows: Vec<&'r Row> = Vec::new();
                for &index in &indices {
                    rows.extend(groups[details[index].1].rows.iter().copied());
                }
                let key = indices
                    .first()
                    .map(|&i| groups[details[i].1].key.clone())
                    .unwrap_or_default();
                let subtotal = project(&rows[..], &key[..], Some(depth))?;
                let anchor = if first {
                    indices.first().copied().unwrap_or(0)
                } else {
                    indices.last().copied().unwrap_or(0)
                };
                inserts.push((anchor, first, depth, subtotal.cells));
            }
        }

        let mut before: HashMap<usize, Vec<(usize, Vec<Value>)>> = HashMap::new();
        let mut after: HashMap<usize, Vec<(usize, Vec<Value>)>> = HashMap::new();
        for (anchor, first, depth, cells) in inserts {
            let slot = if first { &mut before } else { &mut after };
            slot.entry(anchor).or_default().push((depth, cells));
        }

        let mut rows = Vec::new();
        let count = details.len().max(1);
        let mut details = details.into_iter();
        for index in 0..count {
            if let Some(mut subtotals) = before.remove(&index) {
                // outer totals open first
                subtotals.sort_by_key(|(depth, _)| *depth);
                rows.extend(subtotals.into_iter().map(|(_, cells)| cells));
            }
            if let Some((row, _)) = details.next() {
                rows.push(row.cells);
            }
            if let Some(mut subtotals) = after.remove(&index) {
                // inner totals close first
                subtotals.sort_by_key(|(depth, _)| std::cmp::Reverse(*depth));
                rows.extend(subtotals.into_iter().map(|(_, cells)| cells));
            }
        }
        Ok(rows)
    }
}

/// SQL-like preview of a job
pub(crate) fn render_sql(job: &AnalysisJob, anchor: chrono::NaiveDate) -> AnalysisResult<String> {
    let mut select = Vec::new();
    let mut group_by = Vec::new();
    for facet in &job.facets {
        if facet.continuous {
            select.push(format!("MIN({}) AS \"{}\"", facet.expr, min_label(&facet.expr)));
            select.push(format!("MAX({}) AS \"{}\"", facet.expr, max_label(&facet.expr)));
        } else {
            select.push(facet.expr.clone());
            group_by.push(facet.expr.clone());
        }
    }
    select.extend(job.metrics.iter().map(|m| m.expr.clone()));

    let mut sql = format!("SELECT {}\nFROM @'{}'", select.join(", "), job.domain);

    let conditions = where_clause(&job.selection, anchor)?;
    if !conditions.is_empty() {
        sql.push_str(&format!("\nWHERE {}", conditions.join("\n  AND ")));
    }
    if !group_by.is_empty() {
        if job.rollups.is_empty() {
            sql.push_str(&format!("\nGROUP BY {}", group_by.join(", ")));
        } else {
            sql.push_str(&format!("\nGROUP BY ROLLUP({})", group_by.join(", ")));
        }
    }
    if !job.order_by.is_empty() {
        let order: Vec<String> = job
            .order_by
            .iter()
            .map(|o| {
                let target = match &o.target {
                    OrderTarget::Column(c) => (c + 1).to_string(),
                    OrderTarget::Expression(e) => e.clone(),
                };
                let direction = match o.direction {
                    Direction::Asc => "ASC",
                    Direction::Desc => "DESC",
                };
                format!("{} {} NULLS LAST", target, direction)
            })
            .collect();
        sql.push_str(&format!("\nORDER BY {}", order.join(", ")));
    }
    if let Some(limit) = job.limit {
        sql.push_str(&format!("\nLIMIT {}", limit));
    }
    if let Some(offset) = job.offset {
        sql.push_str(&format!("\nOFFSET {}", offset));
    }
    Ok(sql)
}

fn where_clause(selection: &Selection, anchor: chrono::NaiveDate) -> AnalysisResult<Vec<String>> {
    let mut conditions = Vec::new();
    for facet in &selection.facets {
        if facet.is_segment() {
            for member in &facet.members {
                match member {
                    Member::Open { expr, .. } => conditions.push(format!("({})", expr)),
                    Member::Discrete { value } => conditions.push(format!("SEGMENT({})", value.to_literal())),
                    Member::Interval { .. } => {}
                }
            }
            continue;
        }
        if let Some((lower, upper)) = facet.interval_bounds() {
            let interval = ResolvedInterval::resolve(lower, upper, anchor)?;
            if let Some(lower) = &interval.lower {
                conditions.push(format!("{} >= {}", facet.id, lower.to_literal()));
            }
            if let Some(upper) = &interval.upper {
                conditions.push(format!("{} <= {}", facet.id, upper.to_literal()));
            }
            continue;
        }
        let values: Vec<String> = facet.discrete_values().iter().map(|v| v.to_literal()).collect();
        if !values.is_empty() {
            conditions.push(format!("{} IN ({})", facet.id, values.join(", ")));
        }
    }
    Ok(conditions)
}
