use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use semcube_core::blocks::{BuildingBlock, Recipe, Reference};
use semcube_core::error::ErrorType;
use semcube_core::extent::Extent;
use semcube_core::processor::QueryProcessor;
use semcube_core::provider::{DataProvider, MemoryDataProvider, RuleMapping};
use semcube_core::pushdown::temporal_pushdown;
use semcube_core::types::ValueType;
use semcube_core::value::{Cell, DataArray, Value};

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 1, d, 0, 0, 0).unwrap()
}

fn extent(days: &[u32], pixels: usize) -> Extent {
    Extent::grid(
        days.iter().map(|d| day(*d)).collect(),
        [0.0, 0.0, pixels as f64, 1.0],
        1.0,
    )
}

fn layer(extent: &Extent, values: &[i64]) -> DataArray {
    DataArray {
        data: values.iter().map(|n| Some(Cell::Int(*n))).collect(),
        ..extent.canvas()
    }
}

fn array_of(value: &Value) -> &DataArray {
    value.as_array().unwrap()
}

struct CountingProvider {
    inner: MemoryDataProvider,
    retrievals: AtomicUsize,
}

impl DataProvider for CountingProvider {
    fn retrieve(
        &self,
        reference: &Reference,
        extent: &Extent,
    ) -> Result<DataArray, semcube_core::error::Error> {
        self.retrievals.fetch_add(1, Ordering::SeqCst);
        self.inner.retrieve(reference, extent)
    }
}

#[test]
fn materializes_results_in_recipe_order() {
    let extent = extent(&[1, 2], 2);
    let provider = MemoryDataProvider::new()
        .with_layer("appearance/color", layer(&extent, &[1, 2, 3, 4]));
    let recipe = Recipe::from_json(
        r#"{
            "total": {
                "type": "processing_chain",
                "with": {"type": "layer", "reference": ["appearance", "color"]},
                "do": [
                    {"type": "verb", "name": "reduce",
                     "params": {"reducer": "sum", "dimension": "time"}}
                ]
            },
            "average": {
                "type": "processing_chain",
                "with": {"type": "layer", "reference": ["appearance", "color"]},
                "do": [
                    {"type": "verb", "name": "reduce", "params": {"reducer": "mean"}}
                ]
            }
        }"#,
    )
    .unwrap();
    let mut processor = QueryProcessor::new(
        recipe,
        extent,
        Arc::new(provider),
        Arc::new(RuleMapping::new()),
    );
    let response = processor.execute().unwrap();
    assert_eq!(
        response.keys().collect::<Vec<_>>(),
        vec!["total", "average"]
    );
    let total = array_of(&response["total"]);
    assert_eq!(total.data, vec![Some(Cell::Int(4)), Some(Cell::Int(6))]);
    assert_eq!(total.value_type, Some(ValueType::Discrete));
    let average = array_of(&response["average"]);
    assert_eq!(average.data, vec![Some(Cell::Float(2.5))]);
    assert_eq!(average.value_type, Some(ValueType::Continuous));

    // Re-execution starts from a clean slate and reproduces the response.
    let again = processor.execute().unwrap();
    assert_eq!(again, response);
}

#[test]
fn cache_avoids_repeated_retrieval() {
    let extent = extent(&[1, 2], 2);
    let provider = Arc::new(CountingProvider {
        inner: MemoryDataProvider::new()
            .with_layer("appearance/color", layer(&extent, &[1, 2, 3, 4])),
        retrievals: AtomicUsize::new(0),
    });
    let recipe = Recipe::from_json(
        r#"{
            "a": {
                "type": "processing_chain",
                "with": {"type": "layer", "reference": ["appearance", "color"]},
                "do": [{"type": "verb", "name": "reduce",
                        "params": {"reducer": "sum", "dimension": "time"}}]
            },
            "b": {
                "type": "processing_chain",
                "with": {"type": "layer", "reference": ["appearance", "color"]},
                "do": [{"type": "verb", "name": "reduce",
                        "params": {"reducer": "max", "dimension": "time"}}]
            }
        }"#,
    )
    .unwrap();

    let mut cached = QueryProcessor::new(
        recipe.clone(),
        extent.clone(),
        provider.clone(),
        Arc::new(RuleMapping::new()),
    );
    cached.execute().unwrap();
    assert_eq!(provider.retrievals.load(Ordering::SeqCst), 1);

    let uncached_provider = Arc::new(CountingProvider {
        inner: MemoryDataProvider::new()
            .with_layer("appearance/color", layer(&extent, &[1, 2, 3, 4])),
        retrievals: AtomicUsize::new(0),
    });
    let mut uncached = QueryProcessor::new(
        recipe,
        extent,
        uncached_provider.clone(),
        Arc::new(RuleMapping::new()),
    )
    .with_cache_disabled();
    uncached.execute().unwrap();
    assert_eq!(uncached_provider.retrievals.load(Ordering::SeqCst), 2);
}

#[test]
fn concept_translates_through_mapping_rules() {
    let extent = extent(&[1], 2);
    let provider = MemoryDataProvider::new()
        .with_layer("appearance/color", layer(&extent, &[1, 2]))
        .with_layer(
            "soil/moisture",
            DataArray {
                data: vec![Some(Cell::Float(0.9)), Some(Cell::Float(0.8))],
                ..extent.canvas()
            },
        );
    let color_rule = BuildingBlock::layer("appearance/color").chain("evaluate", {
        let mut m = serde_json::Map::new();
        m.insert("operator".to_owned(), serde_json::json!("equal"));
        m.insert("operand".to_owned(), serde_json::json!(1));
        m
    });
    let wetness_rule = BuildingBlock::layer("soil/moisture").chain("evaluate", {
        let mut m = serde_json::Map::new();
        m.insert("operator".to_owned(), serde_json::json!("greater"));
        m.insert("operand".to_owned(), serde_json::json!(0.5));
        m
    });
    let mapping = RuleMapping::new().with_concept(
        "entity/water",
        vec![("color", color_rule), ("wetness", wetness_rule)],
    );
    let recipe = Recipe::new()
        .with("water", BuildingBlock::concept("entity/water"))
        .with(
            "wet_color",
            BuildingBlock::concept_property("entity/water", "color"),
        );
    let mut processor = QueryProcessor::new(
        recipe,
        extent,
        Arc::new(provider),
        Arc::new(mapping),
    );
    let response = processor.execute().unwrap();

    // Both rules hold only for the first pixel.
    let water = array_of(&response["water"]);
    assert_eq!(water.value_type, Some(ValueType::Binary));
    assert_eq!(
        water.data,
        vec![Some(Cell::Bool(true)), Some(Cell::Bool(false))]
    );
    let by_color = array_of(&response["wet_color"]);
    assert_eq!(
        by_color.data,
        vec![Some(Cell::Bool(true)), Some(Cell::Bool(false))]
    );
}

#[test]
fn unknown_concept_and_property_are_reported() {
    let extent = extent(&[1], 1);
    let mapping = RuleMapping::new().with_concept(
        "entity/water",
        vec![("color", BuildingBlock::layer("appearance/color"))],
    );
    let recipe = Recipe::new().with("x", BuildingBlock::concept("entity/lava"));
    let mut processor = QueryProcessor::new(
        recipe,
        extent.clone(),
        Arc::new(MemoryDataProvider::new()),
        Arc::new(mapping),
    );
    let err = processor.execute().unwrap_err();
    assert_eq!(err.error_type, ErrorType::UnknownConcept);
    assert_eq!(err.result.as_deref(), Some("x"));

    let mapping = RuleMapping::new().with_concept(
        "entity/water",
        vec![("color", BuildingBlock::layer("appearance/color"))],
    );
    let recipe = Recipe::new().with(
        "x",
        BuildingBlock::concept_property("entity/water", "smell"),
    );
    let mut processor = QueryProcessor::new(
        recipe,
        extent,
        Arc::new(MemoryDataProvider::new()),
        Arc::new(mapping),
    );
    let err = processor.execute().unwrap_err();
    assert_eq!(err.error_type, ErrorType::UnknownReference);
}

#[test]
fn label_resolves_against_active_object() {
    let extent = extent(&[1], 3);
    let mut labels = BTreeMap::new();
    labels.insert(1, "water".to_owned());
    labels.insert(2, "land".to_owned());
    let classified = layer(&extent, &[1, 2, 1])
        .with_value_type(ValueType::Nominal)
        .with_labels(labels);
    let provider = MemoryDataProvider::new().with_layer("cover/class", classified);
    let recipe = Recipe::from_json(
        r#"{
            "is_water": {
                "type": "processing_chain",
                "with": {"type": "layer", "reference": ["cover", "class"]},
                "do": [
                    {"type": "verb", "name": "evaluate",
                     "params": {"operator": "equal",
                                "operand": {"type": "label", "content": "water"}}}
                ]
            }
        }"#,
    )
    .unwrap();
    let mut processor = QueryProcessor::new(
        recipe,
        extent,
        Arc::new(provider),
        Arc::new(RuleMapping::new()),
    );
    let response = processor.execute().unwrap();
    let out = array_of(&response["is_water"]);
    assert_eq!(out.value_type, Some(ValueType::Binary));
    assert_eq!(
        out.data,
        vec![
            Some(Cell::Bool(true)),
            Some(Cell::Bool(false)),
            Some(Cell::Bool(true)),
        ]
    );
}

#[test]
fn label_resolves_when_active_object_is_a_collection() {
    let extent = extent(&[1], 2);
    let mut labels = BTreeMap::new();
    labels.insert(1, "water".to_owned());
    labels.insert(2, "land".to_owned());
    let provider = MemoryDataProvider::new()
        .with_layer(
            "cover/spring",
            layer(&extent, &[1, 2])
                .with_value_type(ValueType::Nominal)
                .with_labels(labels.clone()),
        )
        .with_layer(
            "cover/autumn",
            layer(&extent, &[2, 1])
                .with_value_type(ValueType::Nominal)
                .with_labels(labels),
        );
    let recipe = Recipe::from_json(
        r#"{
            "ever_water": {
                "type": "processing_chain",
                "with": {"type": "collection", "elements": [
                    {"type": "layer", "reference": ["cover", "spring"]},
                    {"type": "layer", "reference": ["cover", "autumn"]}
                ]},
                "do": [
                    {"type": "verb", "name": "evaluate",
                     "params": {"operator": "equal",
                                "operand": {"type": "label", "content": "water"}}},
                    {"type": "verb", "name": "merge", "params": {"reducer": "any"}}
                ]
            }
        }"#,
    )
    .unwrap();
    let mut processor = QueryProcessor::new(
        recipe,
        extent,
        Arc::new(provider),
        Arc::new(RuleMapping::new()),
    );
    let response = processor.execute().unwrap();
    let out = array_of(&response["ever_water"]);
    assert_eq!(out.value_type, Some(ValueType::Binary));
    assert_eq!(
        out.data,
        vec![Some(Cell::Bool(true)), Some(Cell::Bool(true))]
    );
}

#[test]
fn unknown_label_is_reported() {
    let extent = extent(&[1], 1);
    let provider =
        MemoryDataProvider::new().with_layer("cover/class", layer(&extent, &[1]));
    let recipe = Recipe::from_json(
        r#"{
            "x": {
                "type": "processing_chain",
                "with": {"type": "layer", "reference": ["cover", "class"]},
                "do": [
                    {"type": "verb", "name": "evaluate",
                     "params": {"operator": "equal",
                                "operand": {"type": "label", "content": "water"}}}
                ]
            }
        }"#,
    )
    .unwrap();
    let mut processor = QueryProcessor::new(
        recipe,
        extent,
        Arc::new(provider),
        Arc::new(RuleMapping::new()),
    );
    let err = processor.execute().unwrap_err();
    assert_eq!(err.error_type, ErrorType::UnknownLabel);
}

#[test]
fn collections_merge_and_reject_mixed_types() {
    let extent = extent(&[1], 2);
    let a = layer(&extent, &[1, 0]).with_value_type(ValueType::Binary);
    let b = layer(&extent, &[0, 1]).with_value_type(ValueType::Binary);
    let provider = MemoryDataProvider::new()
        .with_layer("mask/a", a)
        .with_layer("mask/b", b);
    let recipe = Recipe::from_json(
        r#"{
            "either": {
                "type": "processing_chain",
                "with": {"type": "collection", "elements": [
                    {"type": "layer", "reference": ["mask", "a"]},
                    {"type": "layer", "reference": ["mask", "b"]}
                ]},
                "do": [{"type": "verb", "name": "merge", "params": {"reducer": "any"}}]
            }
        }"#,
    )
    .unwrap();
    let mut processor = QueryProcessor::new(
        recipe.clone(),
        extent.clone(),
        Arc::new(provider),
        Arc::new(RuleMapping::new()),
    );
    let response = processor.execute().unwrap();
    let merged = array_of(&response["either"]);
    assert_eq!(merged.value_type, Some(ValueType::Binary));
    assert_eq!(
        merged.data,
        vec![Some(Cell::Bool(true)), Some(Cell::Bool(true))]
    );

    let mixed_provider = MemoryDataProvider::new()
        .with_layer(
            "mask/a",
            layer(&extent, &[1, 0]).with_value_type(ValueType::Binary),
        )
        .with_layer(
            "mask/b",
            layer(&extent, &[0, 1]).with_value_type(ValueType::Discrete),
        );
    let mut processor = QueryProcessor::new(
        recipe,
        extent,
        Arc::new(mixed_provider),
        Arc::new(RuleMapping::new()),
    );
    let err = processor.execute().unwrap_err();
    assert_eq!(err.error_type, ErrorType::InvalidValueType);
}

#[test]
fn results_reference_each_other_and_cycles_are_rejected() {
    let extent = extent(&[1], 2);
    let provider = MemoryDataProvider::new()
        .with_layer("appearance/color", layer(&extent, &[3, 5]));
    let recipe = Recipe::from_json(
        r#"{
            "base": {"type": "layer", "reference": ["appearance", "color"]},
            "doubled": {
                "type": "processing_chain",
                "with": {"type": "result", "name": "base"},
                "do": [{"type": "verb", "name": "evaluate",
                        "params": {"operator": "multiply", "operand": 2}}]
            }
        }"#,
    )
    .unwrap();
    let mut processor = QueryProcessor::new(
        recipe,
        extent.clone(),
        Arc::new(provider),
        Arc::new(RuleMapping::new()),
    );
    let response = processor.execute().unwrap();
    let doubled = array_of(&response["doubled"]);
    assert_eq!(doubled.data, vec![Some(Cell::Int(6)), Some(Cell::Int(10))]);

    let cyclic = Recipe::from_json(
        r#"{
            "a": {"type": "result", "name": "b"},
            "b": {"type": "result", "name": "a"}
        }"#,
    )
    .unwrap();
    let mut processor = QueryProcessor::new(
        cyclic,
        extent.clone(),
        Arc::new(MemoryDataProvider::new()),
        Arc::new(RuleMapping::new()),
    );
    let err = processor.execute().unwrap_err();
    assert_eq!(err.error_type, ErrorType::CircularResult);

    let dangling = Recipe::from_json(r#"{"a": {"type": "result", "name": "zzz"}}"#).unwrap();
    let mut processor = QueryProcessor::new(
        dangling,
        extent,
        Arc::new(MemoryDataProvider::new()),
        Arc::new(RuleMapping::new()),
    );
    let err = processor.execute().unwrap_err();
    assert_eq!(err.error_type, ErrorType::UnknownResult);
}

#[test]
fn temporal_pushdown_narrows_retrieval() {
    let extent = extent(&[1, 2, 3], 1);
    let provider = Arc::new(CountingProvider {
        inner: MemoryDataProvider::new()
            .with_layer("appearance/color", layer(&extent, &[1, 0, 1])),
        retrievals: AtomicUsize::new(0),
    });
    // Keep only observations within the first two days.
    let recipe = Recipe::from_json(
        r#"{
            "early": {
                "type": "processing_chain",
                "with": {"type": "layer", "reference": ["appearance", "color"]},
                "do": [
                    {"type": "verb", "name": "filter", "params": {"filterer": {
                        "type": "processing_chain",
                        "with": {"type": "self"},
                        "do": [
                            {"type": "verb", "name": "extract",
                             "params": {"dimension": "time"}},
                            {"type": "verb", "name": "evaluate",
                             "params": {"operator": "during",
                                        "operand": {"type": "time_interval",
                                                    "content": ["2020-01-01", "2020-01-02"]}}}
                        ]
                    }}}
                ]
            }
        }"#,
    )
    .unwrap();
    let mut probe = QueryProcessor::new(
        recipe.clone(),
        extent.clone(),
        provider.clone(),
        Arc::new(RuleMapping::new()),
    );
    let plan = temporal_pushdown(&mut probe);
    let reference = Reference::from("appearance/color");
    assert_eq!(plan.get(&reference), Some(&vec![day(1), day(2)]));
    // Probing never touches the provider.
    assert_eq!(provider.retrievals.load(Ordering::SeqCst), 0);

    let mut processor = QueryProcessor::new(
        recipe,
        extent,
        provider.clone(),
        Arc::new(RuleMapping::new()),
    )
    .with_time_subsets(plan);
    let response = processor.execute().unwrap();
    let out = array_of(&response["early"]);
    // The layer was retrieved for two timestamps only.
    assert_eq!(out.dims[0].size(), 2);
    assert_eq!(out.data, vec![Some(Cell::Int(1)), Some(Cell::Int(0))]);
}

#[test]
fn unstack_and_stack_round_trip_the_spatial_dimension() {
    let extent = extent(&[1, 2], 2);
    let provider = MemoryDataProvider::new()
        .with_layer("appearance/color", layer(&extent, &[1, 2, 3, 4]));
    let recipe = Recipe::from_json(
        r#"{
            "gridded": {
                "type": "processing_chain",
                "with": {"type": "layer", "reference": ["appearance", "color"]},
                "do": [{"type": "verb", "name": "unstack", "params": {}}]
            },
            "restacked": {
                "type": "processing_chain",
                "with": {"type": "result", "name": "gridded"},
                "do": [{"type": "verb", "name": "stack", "params": {}}]
            }
        }"#,
    )
    .unwrap();
    let mut processor = QueryProcessor::new(
        recipe,
        extent.clone(),
        Arc::new(provider),
        Arc::new(RuleMapping::new()),
    );
    let response = processor.execute().unwrap();
    let gridded = array_of(&response["gridded"]);
    assert_eq!(
        gridded.dims.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
        vec!["time", "y", "x"]
    );
    assert_eq!(gridded.shape(), vec![2, 1, 2]);
    let restacked = array_of(&response["restacked"]);
    assert_eq!(restacked.dims[1].name, "space");
    assert_eq!(restacked.dims[1].coords, extent.canvas().dims[1].coords);
    assert_eq!(
        restacked.data,
        vec![
            Some(Cell::Int(1)),
            Some(Cell::Int(2)),
            Some(Cell::Int(3)),
            Some(Cell::Int(4)),
        ]
    );
}

#[test]
fn align_with_broadcasts_onto_target_shape() {
    let extent = extent(&[1, 2], 2);
    let provider = MemoryDataProvider::new()
        .with_layer("appearance/color", layer(&extent, &[1, 2, 3, 4]));
    let recipe = Recipe::from_json(
        r#"{
            "per_pixel_total": {
                "type": "processing_chain",
                "with": {"type": "layer", "reference": ["appearance", "color"]},
                "do": [
                    {"type": "verb", "name": "reduce",
                     "params": {"reducer": "sum", "dimension": "time"}},
                    {"type": "verb", "name": "align_with",
                     "params": {"target":
                        {"type": "layer", "reference": ["appearance", "color"]}}}
                ]
            }
        }"#,
    )
    .unwrap();
    let mut processor = QueryProcessor::new(
        recipe,
        extent,
        Arc::new(provider),
        Arc::new(RuleMapping::new()),
    );
    let response = processor.execute().unwrap();
    let out = array_of(&response["per_pixel_total"]);
    assert_eq!(out.shape(), vec![2, 2]);
    // The per-pixel sums repeat along the restored time dimension.
    assert_eq!(
        out.data,
        vec![
            Some(Cell::Int(4)),
            Some(Cell::Int(6)),
            Some(Cell::Int(4)),
            Some(Cell::Int(6)),
        ]
    );
    assert_eq!(out.value_type, Some(ValueType::Discrete));
}

#[test]
fn groupby_splits_and_concatenate_rejoins() {
    let extent = extent(&[1, 15], 2);
    let provider = MemoryDataProvider::new()
        .with_layer("appearance/color", layer(&extent, &[1, 2, 3, 4]));
    let recipe = Recipe::from_json(
        r#"{
            "by_day": {
                "type": "processing_chain",
                "with": {"type": "layer", "reference": ["appearance", "color"]},
                "do": [
                    {"type": "verb", "name": "groupby", "params": {"grouper": {
                        "type": "processing_chain",
                        "with": {"type": "self"},
                        "do": [{"type": "verb", "name": "extract",
                                "params": {"dimension": "time", "component": "day"}}]
                    }}},
                    {"type": "verb", "name": "reduce",
                     "params": {"reducer": "sum", "dimension": "time"}},
                    {"type": "verb", "name": "concatenate",
                     "params": {"dimension": "group"}}
                ]
            }
        }"#,
    )
    .unwrap();
    let mut processor = QueryProcessor::new(
        recipe,
        extent,
        Arc::new(provider),
        Arc::new(RuleMapping::new()),
    );
    let response = processor.execute().unwrap();
    let out = array_of(&response["by_day"]);
    assert_eq!(out.dims[0].name, "group");
    assert_eq!(out.shape(), vec![2, 2]);
    assert_eq!(
        out.data,
        vec![
            Some(Cell::Int(1)),
            Some(Cell::Int(2)),
            Some(Cell::Int(3)),
            Some(Cell::Int(4)),
        ]
    );
}
