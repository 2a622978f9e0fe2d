//! Shared fixtures for unit tests

use std::collections::HashMap;
use std::sync::Arc;

use crate::execution::{Row, TableRunner};
use crate::model::{Catalog, Dimension, Domain, MetricDef, Value, ValueType};
use crate::request::Space;

pub(crate) fn sales_domain() -> Domain {
    Domain::new("sales", "Sales")
        .column("region", ValueType::Text)
        .column("country", ValueType::Text)
        .column("amount", ValueType::Numeric)
        .column("quantity", ValueType::Numeric)
        .column("order_date", ValueType::Temporal)
        .dimension(Dimension::new("region", "Region", ValueType::Text))
        .dimension(Dimension::new("country", "Country", ValueType::Text).parent("region"))
        .dimension(
            Dimension::new("order_date", "Order Date", ValueType::Temporal)
                .continuous()
                .description("Day the order was placed"),
        )
        .dimension(Dimension::new("quantity", "Quantity", ValueType::Numeric).continuous())
        .metric(MetricDef::new("revenue", "Revenue", "sum(amount)").description("Total amount"))
        .metric(MetricDef::new("orders", "Orders", "count()"))
        .segment("big", "Big Orders", "amount > 100")
}

pub(crate) fn catalog() -> Catalog {
    Catalog::new(vec![sales_domain()])
}

pub(crate) fn space() -> Space {
    Space::new("acme", "p1", "@'sales'", "alice")
}

pub(crate) fn sale(region: &str, country: &str, amount: i64, quantity: i64, date: &str) -> Row {
    [
        ("region", Value::from(region)),
        ("country", Value::from(country)),
        ("amount", Value::Integer(amount)),
        ("quantity", Value::Integer(quantity)),
        ("order_date", Value::from(date)),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// Five orders over three months
pub(crate) fn sales_rows() -> Vec<Row> {
    vec![
        sale("EMEA", "France", 120, 2, "2024-01-05"),
        sale("EMEA", "Spain", 40, 1, "2024-01-20"),
        sale("EMEA", "France", 30, 5, "2024-02-11"),
        sale("AMER", "Canada", 200, 3, "2024-02-14"),
        sale("AMER", "Mexico", 10, 7, "2024-03-02"),
    ]
}

pub(crate) fn table_runner() -> TableRunner {
    let tables = HashMap::from([("sales".to_string(), sales_rows())]);
    match TableRunner::new(Arc::new(catalog()), tables) {
        Ok(runner) => runner,
        Err(e) => panic!("fixture catalog does not compile: {}", e),
    }
}
