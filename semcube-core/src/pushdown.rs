//! Temporal filter pushdown.
//!
//! Many recipes filter their layers down to a few observation dates. Running
//! the recipe once per layer under the
//! [TimeFilter](crate::processor::TimeFilter) strategy reveals, per layer,
//! which timestamps survive the recipe's own filtering. Feeding the outcome
//! back through [QueryProcessor::with_time_subsets] lets the provider skip
//! retrieving observations the recipe would discard anyway.
//!
//! Pushdown is an optimization only: any failure during the probe runs is
//! logged and yields an empty plan, never an error.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use tracing::warn;

use crate::blocks::Reference;
use crate::processor::{QueryProcessor, TimeFilter};
use crate::value::{Cell, Value};

/// The timestamps each layer needs to be retrieved at. Layers for which
/// nothing can be concluded are absent from the map.
pub type TimePlan = HashMap<Reference, Vec<DateTime<Utc>>>;

pub fn temporal_pushdown(processor: &mut QueryProcessor) -> TimePlan {
    let references = match processor.discover() {
        Ok(sequence) => sequence.into_iter().unique().collect::<Vec<_>>(),
        Err(e) => {
            warn!(error = %e, "Temporal pushdown probe failed, skipping");
            return TimePlan::new();
        }
    };
    let mut plan = TimePlan::new();
    for reference in references {
        let mut strategy = TimeFilter {
            watched: reference.clone(),
        };
        let response = match processor.run_untracked(&mut strategy) {
            Ok(response) => response,
            Err(e) => {
                warn!(layer = %reference, error = %e, "Temporal pushdown probe failed, skipping");
                return TimePlan::new();
            }
        };
        let mut times: Vec<DateTime<Utc>> = response
            .values()
            .flat_map(collect_times)
            .sorted()
            .dedup()
            .collect();
        times.retain(|t| processor.extent().time.contains(t));
        if !times.is_empty() && times.len() < processor.extent().time.len() {
            plan.insert(reference, times);
        }
    }
    plan
}

fn collect_times(value: &Value) -> Vec<DateTime<Utc>> {
    let arrays: Vec<_> = match value {
        Value::Array(a) => vec![a],
        Value::Collection(c) => c.elements().iter().collect(),
    };
    arrays
        .into_iter()
        .flat_map(|a| {
            a.data.iter().flatten().filter_map(|c| match c {
                Cell::Time(t) => Some(*t),
                _ => None,
            })
        })
        .collect()
}
