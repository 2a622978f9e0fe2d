//! Analysis request types
//!
//! A `Request` arrives partially filled by the caller, is completed in place
//! by the config merger, and accumulates non-fatal `Problem`s along the way.

use serde::{Deserialize, Deserializer, Serialize};

use crate::model::Style;

/// Wildcard marker: "stored defaults, then the rest of this list"
pub const WILDCARD: &str = "*";

/// Who is asking, and on whose behalf
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Space {
    /// Tenant (customer) owning caches and running jobs
    pub tenant: String,
    pub project: String,
    /// The space's own domain reference, used when a request names none
    pub domain: String,
    pub user: String,
    pub role: Role,
}

impl Space {
    pub fn new(
        tenant: impl Into<String>,
        project: impl Into<String>,
        domain: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            project: project.into(),
            domain: domain.into(),
            user: user.into(),
            role: Role::Reader,
        }
    }

    /// Builder method: set role
    pub fn role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }
}

/// Access level within a tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Reader,
    Writer,
    Owner,
}

impl Role {
    pub fn can_write(&self) -> bool {
        *self >= Role::Writer
    }
}

/// Severity of a non-fatal issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// A non-fatal issue found while resolving a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub severity: Severity,
    /// The request element concerned (`groupBy`, `orderBy[2]`, ...)
    pub subject: String,
    pub message: String,
}

/// Cache-only behaviour of a run
///
/// On the wire: `false`, `true` or `"noError"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LazyMode {
    /// Compute on cache miss
    #[default]
    Off,
    /// Only return cached results, fail with NotInCache otherwise
    CacheOnly,
    /// Only return cached results, return an empty result otherwise
    CacheOrEmpty,
}

impl LazyMode {
    /// Parse from the wire value: unset/"false", "true", "noError"
    ///
    /// Variant names ("off", "cacheOnly", "cacheOrEmpty") are accepted too.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "false" | "off" => Some(Self::Off),
            "true" | "cacheonly" => Some(Self::CacheOnly),
            "noerror" | "cacheorempty" => Some(Self::CacheOrEmpty),
            _ => None,
        }
    }

    pub fn is_lazy(&self) -> bool {
        !matches!(self, Self::Off)
    }
}

impl Serialize for LazyMode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            LazyMode::Off => serializer.serialize_bool(false),
            LazyMode::CacheOnly => serializer.serialize_bool(true),
            LazyMode::CacheOrEmpty => serializer.serialize_str("noError"),
        }
    }
}

impl<'de> Deserialize<'de> for LazyMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Flag(bool),
            Text(String),
        }

        match Option::<Repr>::deserialize(deserializer)? {
            None | Some(Repr::Flag(false)) => Ok(LazyMode::Off),
            Some(Repr::Flag(true)) => Ok(LazyMode::CacheOnly),
            Some(Repr::Text(s)) => LazyMode::from_str(&s)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid lazy mode '{}'", s))),
        }
    }
}

/// Output layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// Column-major grid
    Table,
    /// One object per row
    #[default]
    Records,
    /// One series per measure
    Transpose,
    /// Older `{cols, rows: [{v}]}` shape
    Legacy,
    /// Generated SQL text, no execution
    Sql,
}

impl Layout {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(Self::Table),
            "records" => Some(Self::Records),
            "transpose" => Some(Self::Transpose),
            "legacy" => Some(Self::Legacy),
            "sql" => Some(Self::Sql),
            _ => None,
        }
    }
}

/// Export file encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Csv,
    Json,
    Xls,
    Xlsx,
}

impl Encoding {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "json" => Some(Self::Json),
            "xls" => Some(Self::Xls),
            "xlsx" => Some(Self::Xlsx),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Xls => "xls",
            Self::Xlsx => "xlsx",
        }
    }
}

/// A declarative analysis request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Request {
    /// Domain reference; defaults to the space's own domain
    pub domain: Option<String>,
    pub group_by: Option<Vec<String>>,
    pub metrics: Option<Vec<String>>,
    pub filters: Option<Vec<String>>,
    /// Temporal axis the timeframe applies to
    pub period: Option<String>,
    /// One bound (repeated) or lower/upper pair; literal values or `__` shortcuts
    pub timeframe: Option<Vec<String>>,
    pub compare_to: Option<Vec<String>>,
    pub order_by: Option<Vec<String>>,
    pub rollups: Option<Vec<String>>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub beyond_limit: Option<Vec<String>>,
    pub max_results: Option<usize>,
    pub start_index: Option<usize>,
    pub style: Style,
    pub lazy: LazyMode,
    pub timeout_ms: Option<u64>,
    pub layout: Layout,
    pub encoding: Option<Encoding>,
    #[serde(skip_deserializing)]
    pub problems: Vec<Problem>,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set group-by list
    pub fn group_by(mut self, items: &[&str]) -> Self {
        self.group_by = Some(to_owned(items));
        self
    }

    /// Builder method: set metrics list
    pub fn metrics(mut self, items: &[&str]) -> Self {
        self.metrics = Some(to_owned(items));
        self
    }

    /// Builder method: set filters list
    pub fn filters(mut self, items: &[&str]) -> Self {
        self.filters = Some(to_owned(items));
        self
    }

    /// Builder method: set order-by list
    pub fn order_by(mut self, items: &[&str]) -> Self {
        self.order_by = Some(to_owned(items));
        self
    }

    /// Builder method: set roll-up list
    pub fn rollups(mut self, items: &[&str]) -> Self {
        self.rollups = Some(to_owned(items));
        self
    }

    /// Builder method: set period and timeframe
    pub fn period(mut self, period: &str, timeframe: &[&str]) -> Self {
        self.period = Some(period.to_string());
        self.timeframe = Some(to_owned(timeframe));
        self
    }

    /// Builder method: set explicit limit
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Record a warning
    pub fn warn(&mut self, subject: impl Into<String>, message: impl Into<String>) {
        self.push_problem(Severity::Warning, subject.into(), message.into());
    }

    /// Record a non-fatal error
    pub fn error(&mut self, subject: impl Into<String>, message: impl Into<String>) {
        self.push_problem(Severity::Error, subject.into(), message.into());
    }

    fn push_problem(&mut self, severity: Severity, subject: String, message: String) {
        tracing::warn!(subject = %subject, severity = ?severity, "{}", message);
        self.problems.push(Problem {
            severity,
            subject,
            message,
        });
    }

    /// Whether JSON-style output applies the automatic limit
    pub fn is_json_output(&self) -> bool {
        self.layout != Layout::Sql && matches!(self.encoding, None | Some(Encoding::Json))
    }
}

fn to_owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// A list is "unset" when absent or empty
pub fn is_unset(list: &Option<Vec<String>>) -> bool {
    list.as_ref().map(|l| l.is_empty()).unwrap_or(true)
}

/// Whether a list starts with the wildcard marker
pub fn has_wildcard(list: &Option<Vec<String>>) -> bool {
    list.as_ref()
        .and_then(|l| l.first())
        .map(|s| s.trim() == WILDCARD)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lazy_mode_parsing() {
        let req: Request = serde_json::from_str(r#"{"lazy": "noError"}"#).unwrap();
        assert_eq!(req.lazy, LazyMode::CacheOrEmpty);

        let req: Request = serde_json::from_str(r#"{"lazy": "true"}"#).unwrap();
        assert_eq!(req.lazy, LazyMode::CacheOnly);

        let req: Request = serde_json::from_str(r#"{"lazy": false}"#).unwrap();
        assert_eq!(req.lazy, LazyMode::Off);

        let req: Request = serde_json::from_str("{}").unwrap();
        assert_eq!(req.lazy, LazyMode::Off);

        assert!(serde_json::from_str::<Request>(r#"{"lazy": "sometimes"}"#).is_err());
    }

    #[test]
    fn test_lazy_mode_round_trips() {
        for (mode, wire) in [
            (LazyMode::Off, serde_json::json!(false)),
            (LazyMode::CacheOnly, serde_json::json!(true)),
            (LazyMode::CacheOrEmpty, serde_json::json!("noError")),
        ] {
            let mut request = Request::new();
            request.lazy = mode;
            let json = serde_json::to_value(&request).unwrap();
            assert_eq!(json["lazy"], wire);

            let back: Request = serde_json::from_value(json).unwrap();
            assert_eq!(back.lazy, mode);
        }

        let req: Request = serde_json::from_str(r#"{"lazy": "cacheOrEmpty"}"#).unwrap();
        assert_eq!(req.lazy, LazyMode::CacheOrEmpty);
    }

    #[test]
    fn test_request_camel_case() {
        let req: Request = serde_json::from_str(
            r#"{"groupBy": ["*", "country"], "metrics": ["*"], "maxResults": 10, "style": "ROBOT"}"#,
        )
        .unwrap();
        assert_eq!(req.group_by.as_ref().unwrap().len(), 2);
        assert!(has_wildcard(&req.group_by));
        assert_eq!(req.max_results, Some(10));
        assert_eq!(req.style, Style::Robot);
    }

    #[test]
    fn test_unset_lists() {
        assert!(is_unset(&None));
        assert!(is_unset(&Some(vec![])));
        assert!(!is_unset(&Some(vec!["a".to_string()])));
        assert!(!has_wildcard(&Some(vec!["a".to_string(), "*".to_string()])));
    }

    #[test]
    fn test_problems_accumulate() {
        let mut req = Request::new();
        req.warn("period", "period required for timeframe");
        req.error("groupBy[1]", "unknown reference");
        assert_eq!(req.problems.len(), 2);
        assert_eq!(req.problems[0].severity, Severity::Warning);
    }

    #[test]
    fn test_json_output_detection() {
        let mut req = Request::new();
        assert!(req.is_json_output());
        req.encoding = Some(Encoding::Csv);
        assert!(!req.is_json_output());
        req.encoding = None;
        req.layout = Layout::Sql;
        assert!(!req.is_json_output());
    }

    #[test]
    fn test_role_ordering() {
        assert!(Role::Owner.can_write());
        assert!(Role::Writer.can_write());
        assert!(!Role::Reader.can_write());
    }
}
