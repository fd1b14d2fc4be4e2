//! Pluggable data retrieval and concept translation.
//!
//! A [DataProvider] turns a data layer reference into an array subset to
//! the query extent. A [Mapping] turns a semantic concept reference into a
//! value by evaluating the concept's rules through the calling processor,
//! so rules are ordinary building blocks and may themselves reference
//! layers, results or other concepts.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::blocks::{BuildingBlock, Reference};
use crate::error::Error;
use crate::extent::{Extent, SPACE, TIME};
use crate::processor::{EvalStrategy, QueryProcessor};
use crate::value::{Cell, DataArray, Value};

pub trait DataProvider: Send + Sync {
    /// Retrieves a data layer subset to `extent`, with the extent's `time`
    /// and `space` dimensions in the extent's order.
    fn retrieve(&self, reference: &Reference, extent: &Extent) -> Result<DataArray, Error>;
}

/// An in-memory provider over preloaded layers, for tests and small data.
///
/// Stored layers carry their own `time` and `space` coordinates; retrieval
/// reindexes them onto the extent grid, leaving cells missing where the
/// layer has no matching coordinate. A layer without one of the dimensions
/// broadcasts along it.
#[derive(Default)]
pub struct MemoryDataProvider {
    layers: HashMap<Reference, DataArray>,
}

impl MemoryDataProvider {
    pub fn new() -> Self {
        MemoryDataProvider {
            layers: HashMap::new(),
        }
    }

    pub fn with_layer<R: Into<Reference>>(mut self, reference: R, layer: DataArray) -> Self {
        self.layers.insert(reference.into(), layer);
        self
    }
}

fn coord_position(layer: &DataArray, dim: &str, coord: &Cell) -> Option<usize> {
    let k = layer.dim_index(dim)?;
    layer.dims[k].coords.iter().position(|c| c == coord)
}

impl DataProvider for MemoryDataProvider {
    fn retrieve(&self, reference: &Reference, extent: &Extent) -> Result<DataArray, Error> {
        let layer = self
            .layers
            .get(reference)
            .ok_or_else(|| Error::unknown_layer(reference))?;
        let strides = layer.strides();
        let time_stride = layer.dim_index(TIME).map(|k| strides[k]);
        let space_stride = layer.dim_index(SPACE).map(|k| strides[k]);
        let mut data = Vec::with_capacity(extent.time.len() * extent.space.len());
        for t in &extent.time {
            let ti = match time_stride {
                None => Some(0),
                Some(_) => coord_position(layer, TIME, &Cell::Time(*t)),
            };
            for p in &extent.space {
                let si = match space_stride {
                    None => Some(0),
                    Some(_) => coord_position(layer, SPACE, &Cell::Coords(*p)),
                };
                let cell = match (ti, si) {
                    (Some(ti), Some(si)) => {
                        let i = ti * time_stride.unwrap_or(0) + si * space_stride.unwrap_or(0);
                        layer.data[i].clone()
                    }
                    _ => None,
                };
                data.push(cell);
            }
        }
        let out = DataArray {
            name: Some(reference.to_string()),
            dims: vec![extent.time_dim(), extent.space_dim()],
            data,
            value_type: layer.value_type,
            value_labels: layer.value_labels.clone(),
        };
        if out.is_empty() {
            return Err(Error::empty_data(reference));
        }
        Ok(out)
    }
}

pub trait Mapping: Send + Sync {
    /// Evaluates a concept reference into a value. `property` selects a
    /// single named rule; without it all rules are evaluated and combined
    /// conjunctively.
    fn translate(
        &self,
        reference: &Reference,
        property: Option<&str>,
        processor: &mut QueryProcessor,
        strategy: &mut dyn EvalStrategy,
    ) -> Result<Value, Error>;
}

/// A mapping defined as named rule blocks per concept.
#[derive(Default)]
pub struct RuleMapping {
    concepts: IndexMap<Reference, IndexMap<String, BuildingBlock>>,
}

impl RuleMapping {
    pub fn new() -> Self {
        RuleMapping {
            concepts: IndexMap::new(),
        }
    }

    pub fn with_concept<R: Into<Reference>>(
        mut self,
        reference: R,
        rules: Vec<(&str, BuildingBlock)>,
    ) -> Self {
        self.concepts.insert(
            reference.into(),
            rules
                .into_iter()
                .map(|(name, block)| (name.to_owned(), block))
                .collect(),
        );
        self
    }
}

impl Mapping for RuleMapping {
    fn translate(
        &self,
        reference: &Reference,
        property: Option<&str>,
        processor: &mut QueryProcessor,
        strategy: &mut dyn EvalStrategy,
    ) -> Result<Value, Error> {
        let rules = self
            .concepts
            .get(reference)
            .ok_or_else(|| Error::unknown_concept(reference))?;
        match property {
            Some(property) => {
                let block = rules
                    .get(property)
                    .ok_or_else(|| Error::unknown_reference(reference, property))?;
                processor.eval_block(&block.clone(), strategy)
            }
            None => {
                let mut combined: Option<Value> = None;
                for block in rules.values().cloned().collect::<Vec<_>>() {
                    let value = processor.eval_block(&block, strategy)?;
                    combined = Some(match combined {
                        None => value,
                        Some(acc) => processor.combine_and(acc, value)?,
                    });
                }
                combined.ok_or_else(|| Error::unknown_concept(reference))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn extent() -> Extent {
        Extent::grid(
            vec![
                Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2020, 7, 1, 0, 0, 0).unwrap(),
            ],
            [0.0, 0.0, 2.0, 1.0],
            1.0,
        )
    }

    #[test]
    fn retrieval_reindexes_to_extent() {
        let extent = extent();
        let full = extent.canvas();
        let layer = DataArray {
            data: (0..full.len() as i64).map(|n| Some(Cell::Int(n))).collect(),
            ..full
        };
        let provider = MemoryDataProvider::new().with_layer("appearance/color", layer);
        let out = provider
            .retrieve(&Reference::from("appearance/color"), &extent)
            .unwrap();
        assert_eq!(out.shape(), vec![2, 2]);
        assert_eq!(out.name.as_deref(), Some("appearance/color"));

        // A narrowed extent picks only matching timestamps.
        let narrowed = extent.with_time_subset(&[extent.time[1]]);
        let out = provider
            .retrieve(&Reference::from("appearance/color"), &narrowed)
            .unwrap();
        assert_eq!(out.shape(), vec![1, 2]);
        assert_eq!(out.data, vec![Some(Cell::Int(2)), Some(Cell::Int(3))]);
    }

    #[test]
    fn unknown_layer_and_empty_data() {
        let extent = extent();
        let provider = MemoryDataProvider::new();
        let err = provider
            .retrieve(&Reference::from("appearance/color"), &extent)
            .unwrap_err();
        assert_eq!(err.error_type, crate::error::ErrorType::UnknownReference);

        let empty = DataArray {
            data: vec![None; 4],
            ..extent.canvas()
        };
        let provider = MemoryDataProvider::new().with_layer("appearance/color", empty);
        let err = provider
            .retrieve(&Reference::from("appearance/color"), &extent)
            .unwrap_err();
        assert_eq!(err.error_type, crate::error::ErrorType::EmptyData);
    }
}
