//! Structured selection
//!
//! A `Selection` is the filter side of an analysis: an ordered set of facets,
//! each restricting one axis to discrete values, one interval, or (for the
//! shared segment facet) a list of open boolean filters.
//!
//! - **Builder**: request filters/period/timeframe into a `Selection`
//! - **Timeframe**: `__` shortcut tokens resolved against an anchor date

mod builder;
mod timeframe;

pub use builder::SelectionBuilder;
pub use timeframe::{resolve_compare, resolve_shortcut, DateRange, ResolvedInterval};

use serde::{Deserialize, Serialize};

use crate::model::Value;

/// Id of the facet collecting open filters and named segments
pub const SEGMENT_FACET_ID: &str = "__segments";

/// One bound of an interval member
#[derive(Debug, Clone, PartialEq)]
pub enum Bound {
    Value(Value),
    /// Symbolic token such as `__CURRENT_MONTH`
    Shortcut(String),
}

impl Bound {
    /// Parse a timeframe token
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if s.starts_with("__") {
            Bound::Shortcut(s.to_uppercase())
        } else {
            Bound::Value(Value::parse_loose(s))
        }
    }

    /// Back to the token a request timeframe carries
    pub fn to_token(&self) -> String {
        match self {
            Bound::Value(v) => v.to_string(),
            Bound::Shortcut(s) => s.clone(),
        }
    }
}

impl Serialize for Bound {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Bound::Value(v) => v.serialize(serializer),
            Bound::Shortcut(s) => serializer.serialize_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for Bound {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Ok(match json {
            serde_json::Value::String(s) if s.starts_with("__") => Bound::Shortcut(s),
            other => Bound::Value(Value::from(other)),
        })
    }
}

/// A facet member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Member {
    /// Exact value
    Discrete { value: Value },
    /// Closed range
    Interval { lower: Bound, upper: Bound },
    /// Boolean filter kept verbatim
    Open { expr: String, text: String },
}

impl Member {
    pub fn discrete(value: impl Into<Value>) -> Self {
        Member::Discrete {
            value: value.into(),
        }
    }
}

/// A filter unit over one axis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Facet {
    /// Axis expression in global robot form, or `__segments`
    pub id: String,
    /// Display name of the axis dimension
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<String>,
    #[serde(default)]
    pub members: Vec<Member>,
}

impl Facet {
    pub fn new(id: impl Into<String>, dimension: Option<String>, members: Vec<Member>) -> Self {
        Self {
            id: id.into(),
            dimension,
            members,
        }
    }

    /// An interval facet always holds exactly one member
    pub fn interval(id: impl Into<String>, dimension: Option<String>, lower: Bound, upper: Bound) -> Self {
        Self::new(id, dimension, vec![Member::Interval { lower, upper }])
    }

    pub fn is_segment(&self) -> bool {
        self.id == SEGMENT_FACET_ID
    }

    /// The single interval member of an interval facet
    pub fn interval_bounds(&self) -> Option<(&Bound, &Bound)> {
        match self.members.as_slice() {
            [Member::Interval { lower, upper }] => Some((lower, upper)),
            _ => None,
        }
    }

    /// Values of the discrete members
    pub fn discrete_values(&self) -> Vec<&Value> {
        self.members
            .iter()
            .filter_map(|m| match m {
                Member::Discrete { value } => Some(value),
                _ => None,
            })
            .collect()
    }
}

/// The filter side of an analysis
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    #[serde(default)]
    pub facets: Vec<Facet>,
    /// Secondary selection compared against the main one
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compare_to: Vec<Facet>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.facets.is_empty() && self.compare_to.is_empty()
    }

    pub fn facet(&self, id: &str) -> Option<&Facet> {
        self.facets.iter().find(|f| f.id == id)
    }

    pub fn segment_facet(&self) -> Option<&Facet> {
        self.facet(SEGMENT_FACET_ID)
    }

    /// Append an open filter to the shared segment facet
    pub fn push_open(&mut self, expr: String, text: String) {
        self.segment_members().push(Member::Open { expr, text });
    }

    /// Append a named segment to the shared segment facet
    pub fn push_segment(&mut self, segment_id: &str) {
        self.segment_members().push(Member::discrete(segment_id));
    }

    fn segment_members(&mut self) -> &mut Vec<Member> {
        let position = match self.facets.iter().position(|f| f.is_segment()) {
            Some(p) => p,
            None => {
                self.facets.push(Facet::new(SEGMENT_FACET_ID, None, Vec::new()));
                self.facets.len() - 1
            }
        };
        &mut self.facets[position].members
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_parsing() {
        assert_eq!(Bound::parse("__current_month"), Bound::Shortcut("__CURRENT_MONTH".into()));
        assert!(matches!(Bound::parse("2024-01-01"), Bound::Value(Value::Date(_))));
        assert_eq!(Bound::parse("2024-01-01").to_token(), "2024-01-01");
    }

    #[test]
    fn test_member_shape() {
        let member = Member::discrete("France");
        let json = serde_json::to_value(&member).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "discrete", "value": "France"}));

        let member = Member::Interval {
            lower: Bound::Shortcut("__ALL".into()),
            upper: Bound::Value(Value::Integer(3)),
        };
        let json = serde_json::to_value(&member).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "interval", "lower": "__ALL", "upper": 3}));

        let back: Member = serde_json::from_value(json).unwrap();
        assert_eq!(back, member);
    }

    #[test]
    fn test_segment_facet_is_shared() {
        let mut selection = Selection::new();
        selection.push_open("a > 1".into(), "a > 1".into());
        selection.push_segment("big");
        assert_eq!(selection.facets.len(), 1);
        assert_eq!(selection.segment_facet().unwrap().members.len(), 2);
    }

    #[test]
    fn test_interval_facet_has_single_member() {
        let facet = Facet::interval(
            "@'sales'.@'date'",
            None,
            Bound::Shortcut("__LAST_7_DAYS".into()),
            Bound::Shortcut("__LAST_7_DAYS".into()),
        );
        assert_eq!(facet.members.len(), 1);
        assert!(facet.interval_bounds().is_some());
    }
}
