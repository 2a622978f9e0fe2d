//! Property tests for list merging and job compilation

use prism::job::JobCompiler;
use prism::merge::{extend_with_defaults, ConfigMerger};
use prism::model::{Catalog, Dimension, Domain, MetricDef, Style, ValueType};
use prism::selection::SelectionBuilder;
use prism::{Request, Space, StoredConfig};
use proptest::prelude::*;

const DIMENSIONS: [&str; 4] = ["region", "country", "channel", "store"];
const METRICS: [&str; 3] = ["revenue", "orders", "margin"];

fn catalog() -> Catalog {
    let mut domain = Domain::new("sales", "Sales")
        .column("amount", ValueType::Numeric)
        .column("cost", ValueType::Numeric);
    for id in DIMENSIONS {
        domain = domain
            .column(id, ValueType::Text)
            .dimension(Dimension::new(id, id.to_uppercase(), ValueType::Text));
    }
    domain = domain
        .metric(MetricDef::new("revenue", "Revenue", "sum(amount)"))
        .metric(MetricDef::new("orders", "Orders", "count()"))
        .metric(MetricDef::new("margin", "Margin", "sum(amount) - sum(cost)"));
    Catalog::new(vec![domain])
}

fn space() -> Space {
    Space::new("acme", "p1", "@'sales'", "alice")
}

fn ids(pool: &'static [&'static str]) -> impl Strategy<Value = Vec<String>> {
    prop::sample::subsequence(pool, 0..=pool.len())
        .prop_shuffle()
        .prop_map(|items| items.into_iter().map(String::from).collect())
}

fn with_wildcard(tail: Vec<String>) -> Vec<String> {
    std::iter::once("*".to_string()).chain(tail).collect()
}

proptest! {
    #[test]
    fn wildcard_prepends_defaults(defaults in ids(&DIMENSIONS), tail in ids(&DIMENSIONS)) {
        let merged = extend_with_defaults(&with_wildcard(tail.clone()), &defaults);
        let expected: Vec<String> = defaults.iter().chain(&tail).cloned().collect();
        prop_assert_eq!(merged, expected);
    }

    #[test]
    fn explicit_list_is_kept(defaults in ids(&DIMENSIONS), list in ids(&DIMENSIONS)) {
        prop_assume!(!list.is_empty());
        prop_assert_eq!(extend_with_defaults(&list, &defaults), list);
    }

    #[test]
    fn merger_follows_wildcard_law(defaults in ids(&DIMENSIONS), tail in ids(&DIMENSIONS)) {
        let catalog = catalog();
        let stored_ids: Vec<&str> = defaults.iter().map(String::as_str).collect();
        let stored = StoredConfig::new().dimensions(&stored_ids).metrics(&["revenue"]);
        let mut request = Request::new();
        request.group_by = Some(with_wildcard(tail.clone()));
        request.style = Style::Robot;

        ConfigMerger::new(&catalog).merge(&space(), &mut request, Some(&stored)).unwrap();

        let expected: Vec<String> = defaults
            .iter()
            .map(|id| format!("@'{}'", id))
            .chain(tail)
            .collect();
        prop_assert_eq!(request.group_by, Some(expected).filter(|e| !e.is_empty()));
    }

    #[test]
    fn compile_is_deterministic(dims in ids(&DIMENSIONS), metrics in ids(&METRICS)) {
        prop_assume!(!dims.is_empty() || !metrics.is_empty());
        let catalog = catalog();
        let compile = || {
            let mut request = Request::new();
            request.group_by = Some(dims.clone()).filter(|d| !d.is_empty());
            request.metrics = Some(metrics.clone()).filter(|m| !m.is_empty());
            ConfigMerger::new(&catalog).merge(&space(), &mut request, None).unwrap();
            let selection = SelectionBuilder::new(&catalog).build(&space(), &request).unwrap();
            JobCompiler::new(&catalog).compile(&space(), &mut request, &selection).unwrap()
        };

        let first = compile();
        let second = compile();
        prop_assert_eq!(&first.facets, &second.facets);
        prop_assert_eq!(&first.metrics, &second.metrics);
        prop_assert_eq!(&first.lookup, &second.lookup);
        prop_assert_eq!(first.key().unwrap(), second.key().unwrap());
        prop_assert_eq!(first.facets.len(), dims.len());
        prop_assert_eq!(first.metrics.len(), metrics.len());

        for decl in 0..dims.len() + metrics.len() {
            let is_metric = first.lookup.is_metric(decl).unwrap();
            let legacy = first.lookup.legacy_index(decl).unwrap();
            prop_assert_eq!(is_metric, decl >= dims.len());
            if is_metric {
                prop_assert!(legacy < first.metrics.len());
            } else {
                prop_assert!(legacy < first.facets.len());
            }
        }
    }
}
