// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! End-to-end pipeline scenarios: declared chain in, materialized tree out.

#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use grove_core::PipelineBuilder;
use grove_tree::Props;
use serde_json::{json, Value};

fn props(value: Value) -> Props {
    Props::from_value(&value).unwrap()
}

/// Finds the first row object in a rendered array whose `property` equals
/// `expected`.
fn row_where<'tree>(rendered: &'tree Value, property: &str, expected: &Value) -> &'tree Value {
    rendered
        .as_array()
        .and_then(|rows| rows.iter().find(|row| row.get(property) == Some(expected)))
        .unwrap_or(&Value::Null)
}

#[test]
fn nested_group_by_builds_the_state_city_town_tree() {
    let (pipeline, tree) = PipelineBuilder::new()
        .group_by(&["state"], "cities")
        .group_by(&["state", "city"], "towns")
        .build()
        .unwrap();

    pipeline
        .add("t1", &props(json!({"state": "TX", "city": "Dallas", "town": "Plano", "pop": 1})))
        .unwrap();
    pipeline
        .add("t2", &props(json!({"state": "TX", "city": "Dallas", "town": "Richardson", "pop": 2})))
        .unwrap();
    pipeline
        .add("t3", &props(json!({"state": "TX", "city": "Houston", "town": "Katy", "pop": 6})))
        .unwrap();
    pipeline.force_flush().unwrap();

    assert_eq!(
        tree.render(),
        json!([{
            "state": "TX",
            "cities": [
                {"city": "Dallas", "towns": [
                    {"town": "Plano", "pop": 1},
                    {"town": "Richardson", "pop": 2}
                ]},
                {"city": "Houston", "towns": [
                    {"town": "Katy", "pop": 6}
                ]}
            ]
        }])
    );
}

#[test]
fn aggregate_chain_feeds_a_derived_property_into_an_outer_sum() {
    let (pipeline, tree) = PipelineBuilder::new()
        .group_by(&["cat"], "products")
        .group_by(&["cat", "prod"], "orders")
        .sum(&["products", "orders"], "amount", "productTotal")
        .define_property_at(&["products"], "adj", &["productTotal"], |item| {
            let total = item.number("productTotal").unwrap_or(0.0);
            if total > 100.0 {
                json!(total * 1.1)
            } else {
                json!(total)
            }
        })
        .sum(&["products"], "adj", "categoryTotal")
        .build()
        .unwrap();

    pipeline
        .add("o1", &props(json!({"cat": "X", "prod": "A", "amount": 50})))
        .unwrap();
    pipeline
        .add("o2", &props(json!({"cat": "X", "prod": "A", "amount": 100})))
        .unwrap();
    pipeline.force_flush().unwrap();

    let rendered = tree.render();
    let rows = rendered.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    let category_total = rows[0]["categoryTotal"].as_f64().unwrap();
    assert!(
        (category_total - 165.0).abs() < 1e-9,
        "categoryTotal = {category_total}"
    );
}

#[test]
fn filter_on_an_aggregate_admits_the_row_once_the_threshold_clears() {
    let (pipeline, tree) = PipelineBuilder::new()
        .group_by(&["cust"], "orders")
        .sum(&["orders"], "amount", "totalAmount")
        .filter(&["totalAmount"], |item| {
            item.number("totalAmount").unwrap_or(0.0) > 100.0
        })
        .build()
        .unwrap();

    pipeline
        .add("o1", &props(json!({"cust": "C", "amount": 50})))
        .unwrap();
    pipeline.force_flush().unwrap();
    assert_eq!(tree.render(), json!([]));

    pipeline
        .add("o2", &props(json!({"cust": "C", "amount": 100})))
        .unwrap();
    pipeline.force_flush().unwrap();

    let rendered = tree.render();
    let rows = rendered.as_array().unwrap();
    assert_eq!(rows.len(), 1, "{rendered}");
    assert_eq!(rows[0]["cust"], json!("C"));
    assert_eq!(rows[0]["totalAmount"].as_f64(), Some(150.0));
    // The gated orders replayed under the now-passing customer.
    assert_eq!(rows[0]["orders"].as_array().map(Vec::len), Some(2));
}

#[test]
fn regrouping_by_a_derived_bucket_moves_the_row_out_of_its_old_group() {
    let (pipeline, tree) = PipelineBuilder::new()
        .group_by(&["id"], "entries")
        .sum(&["entries"], "amount", "total")
        .define_property("bucket", &["total"], |item| {
            let total = item.number("total").unwrap_or(0.0);
            if total < 200.0 {
                json!("low")
            } else if total < 400.0 {
                json!("med")
            } else {
                json!("high")
            }
        })
        .group_by_at(&[], &["bucket"], "items")
        .build()
        .unwrap();

    pipeline
        .add("e1", &props(json!({"id": "X", "amount": 100})))
        .unwrap();
    pipeline
        .add("e2", &props(json!({"id": "X", "amount": 200})))
        .unwrap();
    pipeline.force_flush().unwrap();

    let rendered = tree.render();
    let rows = rendered.as_array().unwrap();
    assert_eq!(rows.len(), 1, "{rendered}");
    assert_eq!(rows[0]["bucket"], json!("med"));
    assert!(
        row_where(&rendered, "bucket", &json!("low")).is_null(),
        "no low bucket may survive: {rendered}"
    );
}

#[test]
fn min_recomputes_when_the_current_minimum_is_removed() {
    let (pipeline, tree) = PipelineBuilder::new()
        .group_by(&["g"], "items")
        .min(&["items"], "value", "minVal")
        .build()
        .unwrap();

    for (key, value) in [("a", 10), ("b", 20), ("c", 30)] {
        pipeline
            .add(key, &props(json!({"g": "G", "value": value})))
            .unwrap();
    }
    pipeline
        .remove("a", &props(json!({"g": "G", "value": 10})))
        .unwrap();
    pipeline.force_flush().unwrap();

    let rendered = tree.render();
    assert_eq!(rendered[0]["minVal"].as_f64(), Some(20.0), "{rendered}");
    assert_eq!(rendered[0]["items"].as_array().map(Vec::len), Some(2));
}

#[test]
fn pick_by_min_follows_an_upstream_aggregate_price_change() {
    // Effective price is an aggregate (sum of per-unit prices), so a new
    // unit changes a product's price without any remove/re-add.
    let (pipeline, tree) = PipelineBuilder::new()
        .group_by(&["cat"], "items")
        .group_by(&["cat", "prodId"], "units")
        .sum(&["items", "units"], "price", "effPrice")
        .pick_by_min(&["items"], "effPrice", "cheapest")
        .build()
        .unwrap();

    pipeline
        .add("u1", &props(json!({"cat": "X", "prodId": "A", "price": 10})))
        .unwrap();
    pipeline
        .add("u2", &props(json!({"cat": "X", "prodId": "B", "price": 20})))
        .unwrap();
    pipeline.force_flush().unwrap();
    let rendered = tree.render();
    assert_eq!(rendered[0]["cheapest"]["prodId"], json!("A"), "{rendered}");

    // A's effective price rises to 25; B (20) becomes the pick.
    pipeline
        .add("u3", &props(json!({"cat": "X", "prodId": "A", "price": 15})))
        .unwrap();
    pipeline.force_flush().unwrap();
    let rendered = tree.render();
    assert_eq!(rendered[0]["cheapest"]["prodId"], json!("B"), "{rendered}");
    assert_eq!(rendered[0]["cheapest"]["effPrice"].as_f64(), Some(20.0));
}

#[test]
fn drop_property_removes_payload_noise_from_the_tree() {
    let (pipeline, tree) = PipelineBuilder::new()
        .group_by(&["g"], "items")
        .drop_property_at(&["items"], "internal")
        .build()
        .unwrap();

    pipeline
        .add("a", &props(json!({"g": "G", "keep": 1, "internal": "x"})))
        .unwrap();
    pipeline.force_flush().unwrap();

    assert_eq!(
        tree.render(),
        json!([{"g": "G", "items": [{"keep": 1}]}])
    );
}

#[test]
fn average_and_count_sit_side_by_side_on_the_same_array() {
    let (pipeline, tree) = PipelineBuilder::new()
        .group_by(&["g"], "items")
        .average(&["items"], "value", "avgValue")
        .count(&["items"], "itemCount")
        .build()
        .unwrap();

    for (key, value) in [("a", 10), ("b", 20)] {
        pipeline
            .add(key, &props(json!({"g": "G", "value": value})))
            .unwrap();
    }
    pipeline.force_flush().unwrap();

    let rendered = tree.render();
    assert_eq!(rendered[0]["avgValue"].as_f64(), Some(15.0), "{rendered}");
    assert_eq!(rendered[0]["itemCount"], json!(2));
}
