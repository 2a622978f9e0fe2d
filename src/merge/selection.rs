//! Stored selection into request filters, timeframe and compareTo

use super::{extend_with_defaults, ConfigMerger};
use crate::model::{print_global, BinaryOp, Domain, Expr, Style, Value};
use crate::request::{has_wildcard, is_unset, Request};
use crate::selection::{Bound, Facet, Member, Selection};

impl<'a> ConfigMerger<'a> {
    /// Translate a stored selection into the request
    ///
    /// The period facet feeds the timeframe and the segment facet is always
    /// carried over. Other facets become filters only when the caller gave
    /// no explicit filters or extended them with a wildcard.
    pub(super) fn merge_selection(
        &self,
        request: &mut Request,
        domain: &Domain,
        selection: Option<&Selection>,
    ) {
        let explicit = !is_unset(&request.filters) && !has_wildcard(&request.filters);
        let mut derived = Vec::new();
        let mut segments = Vec::new();

        if let Some(selection) = selection {
            let period_id = request
                .period
                .as_deref()
                .and_then(|p| self.model.parse(p, Some(&domain.id)).ok())
                .map(|e| print_global(&e, Style::Robot));

            for (i, facet) in selection.facets.iter().enumerate() {
                if period_id.as_deref() == Some(facet.id.as_str()) {
                    if is_unset(&request.timeframe) {
                        request.timeframe = interval_tokens(facet);
                    }
                } else if facet.is_segment() {
                    segments.extend(self.segment_filters(request, domain, facet));
                } else if !explicit {
                    if let Some(filter) = self.facet_filter(request, domain, facet, i) {
                        derived.push(filter);
                    }
                }
            }

            for (i, facet) in selection.compare_to.iter().enumerate() {
                if period_id.as_deref() == Some(facet.id.as_str()) {
                    if is_unset(&request.compare_to) {
                        request.compare_to = interval_tokens(facet);
                    }
                } else {
                    request.warn(
                        format!("selection.compareTo[{}]", i),
                        "compareTo only applies to the period",
                    );
                }
            }
        }

        let list = request.filters.take().unwrap_or_default();
        let merged = if explicit {
            let mut list = list;
            for filter in segments {
                if !list.contains(&filter) {
                    list.push(filter);
                }
            }
            list
        } else {
            derived.extend(segments);
            extend_with_defaults(&list, &derived)
        };
        request.filters = Some(merged).filter(|f| !f.is_empty());
    }

    fn segment_filters(&self, request: &mut Request, domain: &Domain, facet: &Facet) -> Vec<String> {
        let mut filters = Vec::with_capacity(facet.members.len());
        for (i, member) in facet.members.iter().enumerate() {
            let subject = format!("selection.segments[{}]", i);
            match member {
                Member::Open { text, .. } => filters.push(text.clone()),
                Member::Discrete { value } => {
                    let key = value.to_string();
                    let reference = domain
                        .find_segment(&key)
                        .and_then(|s| self.model.parse(&format!("@'{}'", s.id), Some(&domain.id)).ok());
                    match reference {
                        Some(expr) => filters.push(self.print(request, &expr, &domain.id)),
                        None => request.error(subject, format!("unknown segment '{}'", key)),
                    }
                }
                Member::Interval { .. } => {
                    request.error(subject, "segments cannot hold an interval")
                }
            }
        }
        filters
    }

    /// `dim = "v"`, `dim IN {...}` or a closed range filter for one facet
    fn facet_filter(
        &self,
        request: &mut Request,
        domain: &Domain,
        facet: &Facet,
        index: usize,
    ) -> Option<String> {
        let subject = format!("selection.facets[{}]", index);
        let axis = match self.model.parse(&facet.id, Some(&domain.id)) {
            Ok(axis) => axis,
            Err(e) => {
                request.error(subject, e.to_string());
                return None;
            }
        };

        let values = facet.discrete_values();
        let expr = match (values.as_slice(), facet.interval_bounds()) {
            ([], Some((lower, upper))) => match range_filter(&axis, lower, upper) {
                Some(expr) => expr,
                None => {
                    request.warn(subject, "shortcut bounds only apply to the period");
                    return None;
                }
            },
            ([], None) => return None,
            ([value], _) => Expr::binary(BinaryOp::Eq, axis, Expr::Literal((*value).clone())),
            (values, _) => Expr::binary(
                BinaryOp::In,
                axis,
                Expr::Set(values.iter().map(|v| Expr::Literal((*v).clone())).collect()),
            ),
        };
        Some(self.print(request, &expr, &domain.id))
    }
}

fn interval_tokens(facet: &Facet) -> Option<Vec<String>> {
    facet.interval_bounds().map(|(lower, upper)| {
        if lower == upper {
            vec![lower.to_token()]
        } else {
            vec![lower.to_token(), upper.to_token()]
        }
    })
}

fn range_filter(axis: &Expr, lower: &Bound, upper: &Bound) -> Option<Expr> {
    let literal = |bound: &Bound| match bound {
        Bound::Value(Value::Null) => Some(None),
        Bound::Value(v) => Some(Some(Expr::Literal(v.clone()))),
        Bound::Shortcut(_) => None,
    };
    let conditions = [
        literal(lower)?.map(|l| Expr::binary(BinaryOp::Gte, axis.clone(), l)),
        literal(upper)?.map(|u| Expr::binary(BinaryOp::Lte, axis.clone(), u)),
    ];
    conditions
        .into_iter()
        .flatten()
        .reduce(|lhs, rhs| Expr::binary(BinaryOp::And, lhs, rhs))
}

#[cfg(test)]
mod tests {
    use crate::bookmark::StoredConfig;
    use crate::merge::ConfigMerger;
    use crate::model::Value;
    use crate::request::Request;
    use crate::selection::{Bound, Facet, Member, Selection, SEGMENT_FACET_ID};
    use crate::test_support::{catalog, space};

    fn stored_selection() -> Selection {
        Selection {
            facets: vec![
                Facet::interval(
                    "@'sales'.@'order_date'",
                    Some("Order Date".into()),
                    Bound::Value(Value::parse_loose("2024-01-01")),
                    Bound::Value(Value::parse_loose("2024-03-31")),
                ),
                Facet::new(
                    "@'sales'.@'region'",
                    Some("Region".into()),
                    vec![Member::discrete("EMEA")],
                ),
                Facet::new(
                    "@'sales'.@'country'",
                    Some("Country".into()),
                    vec![Member::discrete("France"), Member::discrete("Spain")],
                ),
                Facet::new(
                    SEGMENT_FACET_ID,
                    None,
                    vec![
                        Member::Open {
                            expr: "@'sales'.@'amount' > 10".into(),
                            text: "amount > 10".into(),
                        },
                        Member::discrete("big"),
                    ],
                ),
            ],
            compare_to: vec![Facet::interval(
                "@'sales'.@'order_date'",
                None,
                Bound::Shortcut("__COMPARE_TO_PREVIOUS_YEAR".into()),
                Bound::Shortcut("__COMPARE_TO_PREVIOUS_YEAR".into()),
            )],
        }
    }

    fn merge(request: &mut Request) {
        let catalog = catalog();
        let stored = StoredConfig::new()
            .dimensions(&["country"])
            .selection(stored_selection());
        ConfigMerger::new(&catalog)
            .merge(&space(), request, Some(&stored))
            .unwrap();
    }

    #[test]
    fn test_selection_translated_into_request() {
        let mut request = Request::new();
        merge(&mut request);

        assert_eq!(
            request.timeframe,
            Some(vec!["2024-01-01".to_string(), "2024-03-31".to_string()])
        );
        assert_eq!(
            request.compare_to,
            Some(vec!["__COMPARE_TO_PREVIOUS_YEAR".to_string()])
        );
        assert_eq!(
            request.filters,
            Some(vec![
                "'Region' = \"EMEA\"".to_string(),
                "'Country' IN {\"France\", \"Spain\"}".to_string(),
                "amount > 10".to_string(),
                "'Big Orders'".to_string(),
            ])
        );
    }

    #[test]
    fn test_explicit_filters_keep_only_segments() {
        let mut request = Request::new().filters(&["quantity > 2"]);
        merge(&mut request);
        assert_eq!(
            request.filters,
            Some(vec![
                "quantity > 2".to_string(),
                "amount > 10".to_string(),
                "'Big Orders'".to_string(),
            ])
        );
    }

    #[test]
    fn test_wildcard_filters_extend_selection() {
        let mut request = Request::new().filters(&["*", "quantity > 2"]);
        merge(&mut request);
        let filters = request.filters.unwrap();
        assert_eq!(filters.len(), 5);
        assert_eq!(filters[4], "quantity > 2");
    }

    #[test]
    fn test_explicit_timeframe_not_overridden() {
        let mut request = Request::new();
        request.timeframe = Some(vec!["__LAST_7_DAYS".to_string()]);
        merge(&mut request);
        assert_eq!(request.timeframe, Some(vec!["__LAST_7_DAYS".to_string()]));
    }
}
