//! The array engine: shape-aware execution of verbs on data arrays.
//!
//! The [ArrayEngine] trait is the seam between verb resolution and the
//! actual array arithmetic. [BasicEngine] is the in-memory reference
//! implementation working on row-major [DataArray] buffers. Operands are
//! aligned by dimension name and coordinate equality; an operand whose
//! dimensions are a subset of the subject's broadcasts over the missing
//! ones, and a dimensionless scalar broadcasts everywhere.

use std::collections::BTreeMap;

use chrono::{Datelike, Timelike};

use crate::error::Error;
use crate::extent::{SPACE, TIME};
use crate::operators::{OperatorDef, OperatorKind};
use crate::reducers::ReducerDef;
use crate::value::{Cell, Collection, DataArray, Dimension};

/// How [ArrayEngine::fill] picks replacements for missing cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMethod {
    Forward,
    Backward,
    Nearest,
}

impl FillMethod {
    pub fn parse(name: &str) -> Result<Self, Error> {
        match name {
            "forward" => Ok(FillMethod::Forward),
            "backward" => Ok(FillMethod::Backward),
            "nearest" => Ok(FillMethod::Nearest),
            other => Err(Error::invalid_building_block(format!(
                "Unknown fill method '{}'",
                other
            ))),
        }
    }
}

pub trait ArrayEngine: Send + Sync {
    fn evaluate(
        &self,
        x: &DataArray,
        operator: &OperatorDef,
        y: Option<&DataArray>,
    ) -> Result<DataArray, Error>;

    fn extract(
        &self,
        x: &DataArray,
        dimension: &str,
        component: Option<&str>,
    ) -> Result<DataArray, Error>;

    fn filter(&self, x: &DataArray, filterer: &DataArray, trim: bool)
        -> Result<DataArray, Error>;

    fn assign(
        &self,
        x: &DataArray,
        y: &DataArray,
        at: Option<&DataArray>,
    ) -> Result<DataArray, Error>;

    fn groupby(&self, x: &DataArray, groupers: &[DataArray]) -> Result<Collection, Error>;

    fn reduce(
        &self,
        x: &DataArray,
        reducer: &ReducerDef,
        dimension: Option<&str>,
    ) -> Result<DataArray, Error>;

    fn shift(&self, x: &DataArray, dimension: &str, steps: i64) -> Result<DataArray, Error>;

    fn smooth(
        &self,
        x: &DataArray,
        reducer: &ReducerDef,
        dimension: &str,
        size: usize,
    ) -> Result<DataArray, Error>;

    fn trim(&self, x: &DataArray, dimension: Option<&str>) -> Result<DataArray, Error>;

    fn delineate(&self, x: &DataArray, dimension: &str) -> Result<DataArray, Error>;

    fn fill(&self, x: &DataArray, dimension: &str, method: FillMethod)
        -> Result<DataArray, Error>;

    /// Broadcasts and reorders `x` onto the dimensions of `target`.
    fn align(&self, x: &DataArray, target: &DataArray) -> Result<DataArray, Error>;

    /// Collapses adjacent `y` and `x` dimensions into one stacked spatial
    /// dimension of coordinate pairs.
    fn stack(&self, x: &DataArray) -> Result<DataArray, Error>;

    /// Splits a stacked spatial dimension back into `y` and `x` grid
    /// dimensions, leaving cells missing where the stacked coordinates do
    /// not cover the full grid.
    fn unstack(&self, x: &DataArray, dimension: &str) -> Result<DataArray, Error>;

    fn concatenate(&self, elements: &[DataArray], dimension: &str) -> Result<DataArray, Error>;

    fn merge(&self, elements: &[DataArray], reducer: &ReducerDef) -> Result<DataArray, Error>;

    fn compose(&self, elements: &[DataArray]) -> Result<DataArray, Error>;
}

/// Maps flat indices of the subject array onto flat indices of an aligned
/// operand.
struct AlignMap {
    x_strides: Vec<usize>,
    x_shape: Vec<usize>,
    /// Per subject dimension, the operand stride, or 0 when the operand
    /// lacks that dimension (broadcast).
    y_strides: Vec<usize>,
}

impl AlignMap {
    fn build(x: &DataArray, y: &DataArray) -> Result<Self, Error> {
        for dim in &y.dims {
            match x.dims.iter().find(|d| d.name == dim.name) {
                None => {
                    return Err(Error::too_many_dimensions(format!(
                        "Operand dimension '{}' is not a dimension of the subject",
                        dim.name
                    )))
                }
                Some(xd) if xd.coords != dim.coords => {
                    return Err(Error::alignment(format!(
                        "Coordinates of dimension '{}' do not match",
                        dim.name
                    )))
                }
                Some(_) => {}
            }
        }
        let y_full = y.strides();
        let y_strides = x
            .dims
            .iter()
            .map(|xd| {
                y.dim_index(&xd.name)
                    .map(|k| y_full[k])
                    .unwrap_or(0)
            })
            .collect();
        Ok(AlignMap {
            x_strides: x.strides(),
            x_shape: x.shape(),
            y_strides,
        })
    }

    fn map(&self, i: usize) -> usize {
        let mut j = 0;
        for k in 0..self.x_strides.len() {
            let idx = (i / self.x_strides[k]) % self.x_shape[k];
            j += idx * self.y_strides[k];
        }
        j
    }
}

fn bare(x: &DataArray, data: Vec<Option<Cell>>) -> DataArray {
    DataArray {
        name: x.name.clone(),
        dims: x.dims.clone(),
        data,
        value_type: None,
        value_labels: None,
    }
}

fn dim_index(x: &DataArray, name: &str) -> Result<usize, Error> {
    x.dim_index(name).ok_or_else(|| Error::unknown_dimension(name))
}

/// Flat indices of the first cell of every line along dimension `k`.
fn line_bases(x: &DataArray, k: usize) -> Vec<usize> {
    let stride = x.strides()[k];
    let size = x.dims[k].size();
    (0..x.len())
        .filter(|i| (i / stride) % size == 0)
        .collect()
}

/// Subsets `x` along dimension `k`, keeping `positions` in the given order.
fn take(x: &DataArray, k: usize, positions: &[usize]) -> DataArray {
    let strides = x.strides();
    let size = x.dims[k].size();
    let mut dims = x.dims.clone();
    dims[k] = Dimension::new(
        x.dims[k].name.clone(),
        positions.iter().map(|p| x.dims[k].coords[*p].clone()).collect(),
    );
    let mut data = Vec::with_capacity(x.len() / size.max(1) * positions.len());
    // Row-major output order over the new shape.
    let out = DataArray {
        name: x.name.clone(),
        dims,
        data: Vec::new(),
        value_type: x.value_type,
        value_labels: x.value_labels.clone(),
    };
    let out_strides = {
        let mut s = vec![1usize; out.dims.len()];
        for i in (0..out.dims.len().saturating_sub(1)).rev() {
            s[i] = s[i + 1] * out.dims[i + 1].size();
        }
        s
    };
    let out_len: usize = out.dims.iter().map(|d| d.size()).product();
    let out_shape: Vec<usize> = out.dims.iter().map(|d| d.size()).collect();
    for j in 0..out_len {
        let mut i = 0;
        for d in 0..out_shape.len() {
            let idx = (j / out_strides[d]) % out_shape[d];
            let src_idx = if d == k { positions[idx] } else { idx };
            i += src_idx * strides[d];
        }
        data.push(x.data[i].clone());
    }
    DataArray { data, ..out }
}

fn time_component(t: &chrono::DateTime<chrono::Utc>, component: &str) -> Option<i64> {
    match component {
        "year" => Some(t.year() as i64),
        "month" => Some(t.month() as i64),
        "day" => Some(t.day() as i64),
        "hour" => Some(t.hour() as i64),
        "minute" => Some(t.minute() as i64),
        "second" => Some(t.second() as i64),
        "day_of_week" => Some(t.weekday().number_from_monday() as i64),
        "day_of_year" => Some(t.ordinal() as i64),
        // Meteorological season: 1 spring .. 4 winter.
        "season" => Some(match t.month() {
            3..=5 => 1,
            6..=8 => 2,
            9..=11 => 3,
            _ => 4,
        }),
        _ => None,
    }
}

#[derive(Debug, Default, Clone)]
pub struct BasicEngine;

impl BasicEngine {
    pub fn new() -> Self {
        BasicEngine
    }
}

impl ArrayEngine for BasicEngine {
    fn evaluate(
        &self,
        x: &DataArray,
        operator: &OperatorDef,
        y: Option<&DataArray>,
    ) -> Result<DataArray, Error> {
        match (&operator.kind, y) {
            (OperatorKind::Unary(f), None) => {
                let data = x.data.iter().map(|c| c.as_ref().and_then(f)).collect();
                Ok(bare(x, data))
            }
            (OperatorKind::Unary(_), Some(_)) => Err(Error::invalid_building_block(format!(
                "Operator '{}' takes no operand",
                operator.name
            ))),
            (OperatorKind::Binary(f), Some(y)) => {
                let align = AlignMap::build(x, y)?;
                let data = x
                    .data
                    .iter()
                    .enumerate()
                    .map(|(i, c)| match (c, &y.data[align.map(i)]) {
                        (Some(a), Some(b)) => f(a, b),
                        _ => None,
                    })
                    .collect();
                Ok(bare(x, data))
            }
            (OperatorKind::RightSlice(f), Some(y)) => {
                let data = x
                    .data
                    .iter()
                    .map(|c| c.as_ref().and_then(|a| f(a, &y.data)))
                    .collect();
                Ok(bare(x, data))
            }
            (_, None) => Err(Error::invalid_building_block(format!(
                "Operator '{}' requires an operand",
                operator.name
            ))),
        }
    }

    fn extract(
        &self,
        x: &DataArray,
        dimension: &str,
        component: Option<&str>,
    ) -> Result<DataArray, Error> {
        let k = dim_index(x, dimension)?;
        let dim = &x.dims[k];
        let (cells, value_type): (Vec<Option<Cell>>, _) = match component {
            None => {
                let value_type = match dimension {
                    TIME => Some(crate::types::ValueType::Time),
                    SPACE => Some(crate::types::ValueType::Space),
                    _ => None,
                };
                (dim.coords.iter().cloned().map(Some).collect(), value_type)
            }
            Some(component) => {
                let cells = dim
                    .coords
                    .iter()
                    .map(|c| match c {
                        Cell::Time(t) => time_component(t, component).map(Cell::Int),
                        Cell::Coords([cx, cy]) => match component {
                            "x" => Some(Cell::Float(*cx)),
                            "y" => Some(Cell::Float(*cy)),
                            _ => None,
                        },
                        _ => None,
                    })
                    .collect::<Vec<_>>();
                if cells.iter().all(|c| c.is_none()) && !dim.coords.is_empty() {
                    return Err(Error::unknown_component(dimension, component));
                }
                (cells, None)
            }
        };
        let mut out = DataArray {
            name: None,
            dims: vec![dim.clone()],
            data: cells,
            value_type,
            value_labels: None,
        };
        out.name = Some(match component {
            Some(c) => format!("{}_{}", dimension, c),
            None => dimension.to_owned(),
        });
        Ok(out)
    }

    fn filter(
        &self,
        x: &DataArray,
        filterer: &DataArray,
        trim: bool,
    ) -> Result<DataArray, Error> {
        let align = AlignMap::build(x, filterer)?;
        let data = x
            .data
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let keep = filterer.data[align.map(i)]
                    .as_ref()
                    .map(|f| f.is_truthy())
                    .unwrap_or(false);
                if keep {
                    c.clone()
                } else {
                    None
                }
            })
            .collect();
        let mut out = bare(x, data);
        out.value_type = x.value_type;
        out.value_labels = x.value_labels.clone();
        if trim {
            self.trim(&out, None)
        } else {
            Ok(out)
        }
    }

    fn assign(
        &self,
        x: &DataArray,
        y: &DataArray,
        at: Option<&DataArray>,
    ) -> Result<DataArray, Error> {
        let align = AlignMap::build(x, y)?;
        let at_align = match at {
            Some(mask) => Some((AlignMap::build(x, mask)?, mask)),
            None => None,
        };
        let data = x
            .data
            .iter()
            .enumerate()
            .map(|(i, c)| {
                if c.is_none() {
                    return None;
                }
                let selected = match &at_align {
                    None => true,
                    Some((align, mask)) => mask.data[align.map(i)]
                        .as_ref()
                        .map(|m| m.is_truthy())
                        .unwrap_or(false),
                };
                if selected {
                    y.data[align.map(i)].clone()
                } else {
                    c.clone()
                }
            })
            .collect();
        Ok(bare(x, data))
    }

    fn groupby(&self, x: &DataArray, groupers: &[DataArray]) -> Result<Collection, Error> {
        if groupers.is_empty() {
            return Err(Error::invalid_building_block(
                "Groupby requires at least one grouper",
            ));
        }
        let dim_name = match groupers[0].dims.as_slice() {
            [only] => only.name.clone(),
            _ => {
                return Err(Error::too_many_dimensions(
                    "A grouper must be one-dimensional",
                ))
            }
        };
        if groupers
            .iter()
            .any(|g| g.dims.len() != 1 || g.dims[0].name != dim_name)
        {
            return Err(Error::mixed_dimensions(
                "All groupers must share one dimension",
            ));
        }
        let k = x
            .dim_index(&dim_name)
            .ok_or_else(|| Error::missing_dimension(&dim_name))?;
        let size = x.dims[k].size();
        if groupers.iter().any(|g| g.len() != size) {
            return Err(Error::alignment(format!(
                "Grouper length does not match dimension '{}'",
                dim_name
            )));
        }
        // Group keys in first-occurrence order.
        let mut groups: Vec<(Vec<String>, Vec<usize>)> = Vec::new();
        for p in 0..size {
            let key: Vec<String> = groupers
                .iter()
                .map(|g| {
                    g.data[p]
                        .as_ref()
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "missing".to_owned())
                })
                .collect();
            match groups.iter_mut().find(|(k2, _)| *k2 == key) {
                Some((_, positions)) => positions.push(p),
                None => groups.push((key, vec![p])),
            }
        }
        let elements = groups
            .into_iter()
            .map(|(key, positions)| take(x, k, &positions).with_name(&key.join(", ")))
            .collect();
        Ok(Collection::new(elements))
    }

    fn reduce(
        &self,
        x: &DataArray,
        reducer: &ReducerDef,
        dimension: Option<&str>,
    ) -> Result<DataArray, Error> {
        match dimension {
            None => {
                let cell = (reducer.func)(&x.data);
                Ok(DataArray {
                    name: x.name.clone(),
                    dims: Vec::new(),
                    data: vec![cell],
                    value_type: None,
                    value_labels: None,
                })
            }
            Some(name) => {
                let k = dim_index(x, name)?;
                let stride = x.strides()[k];
                let size = x.dims[k].size();
                let mut dims = x.dims.clone();
                dims.remove(k);
                let data = line_bases(x, k)
                    .into_iter()
                    .map(|base| {
                        let line: Vec<Option<Cell>> = (0..size)
                            .map(|j| x.data[base + j * stride].clone())
                            .collect();
                        (reducer.func)(&line)
                    })
                    .collect();
                Ok(DataArray {
                    name: x.name.clone(),
                    dims,
                    data,
                    value_type: None,
                    value_labels: None,
                })
            }
        }
    }

    fn shift(&self, x: &DataArray, dimension: &str, steps: i64) -> Result<DataArray, Error> {
        let k = dim_index(x, dimension)?;
        let stride = x.strides()[k];
        let size = x.dims[k].size() as i64;
        let mut data = vec![None; x.len()];
        for base in line_bases(x, k) {
            for j in 0..size {
                let src = j - steps;
                if src >= 0 && src < size {
                    data[base + (j as usize) * stride] =
                        x.data[base + (src as usize) * stride].clone();
                }
            }
        }
        let mut out = bare(x, data);
        out.value_type = x.value_type;
        out.value_labels = x.value_labels.clone();
        Ok(out)
    }

    fn smooth(
        &self,
        x: &DataArray,
        reducer: &ReducerDef,
        dimension: &str,
        size: usize,
    ) -> Result<DataArray, Error> {
        if size % 2 == 0 || size == 0 {
            return Err(Error::invalid_building_block(
                "Smoothing window size must be odd",
            ));
        }
        let k = dim_index(x, dimension)?;
        let stride = x.strides()[k];
        let dim_size = x.dims[k].size() as i64;
        let half = (size / 2) as i64;
        let mut data = vec![None; x.len()];
        for base in line_bases(x, k) {
            for j in 0..dim_size {
                let lo = (j - half).max(0);
                let hi = (j + half).min(dim_size - 1);
                let window: Vec<Option<Cell>> = (lo..=hi)
                    .map(|p| x.data[base + (p as usize) * stride].clone())
                    .collect();
                data[base + (j as usize) * stride] = (reducer.func)(&window);
            }
        }
        Ok(bare(x, data))
    }

    fn trim(&self, x: &DataArray, dimension: Option<&str>) -> Result<DataArray, Error> {
        let targets: Vec<usize> = match dimension {
            Some(name) => vec![dim_index(x, name)?],
            None => (0..x.dims.len()).collect(),
        };
        let mut out = x.clone();
        for name in targets.iter().map(|k| x.dims[*k].name.clone()) {
            let k = match out.dim_index(&name) {
                Some(k) => k,
                None => continue,
            };
            let stride = out.strides()[k];
            let size = out.dims[k].size();
            let keep: Vec<usize> = (0..size)
                .filter(|p| {
                    line_bases(&out, k)
                        .into_iter()
                        .any(|base| out.data[base + p * stride].is_some())
                })
                .collect();
            if keep.len() != size {
                out = take(&out, k, &keep);
            }
        }
        Ok(out)
    }

    fn delineate(&self, x: &DataArray, dimension: &str) -> Result<DataArray, Error> {
        let k = dim_index(x, dimension)?;
        let stride = x.strides()[k];
        let size = x.dims[k].size();
        let mut data = vec![None; x.len()];
        for base in line_bases(x, k) {
            let mut run = 0i64;
            let mut inside = false;
            for j in 0..size {
                let truthy = x.data[base + j * stride]
                    .as_ref()
                    .map(|c| c.is_truthy())
                    .unwrap_or(false);
                if truthy {
                    if !inside {
                        run += 1;
                        inside = true;
                    }
                    data[base + j * stride] = Some(Cell::Int(run));
                } else {
                    inside = false;
                }
            }
        }
        Ok(bare(x, data))
    }

    fn fill(
        &self,
        x: &DataArray,
        dimension: &str,
        method: FillMethod,
    ) -> Result<DataArray, Error> {
        let k = dim_index(x, dimension)?;
        let stride = x.strides()[k];
        let size = x.dims[k].size();
        let mut data = x.data.clone();
        for base in line_bases(x, k) {
            let line: Vec<Option<Cell>> = (0..size)
                .map(|j| x.data[base + j * stride].clone())
                .collect();
            for j in 0..size {
                if line[j].is_some() {
                    continue;
                }
                let before = (0..j).rev().find(|p| line[*p].is_some());
                let after = (j + 1..size).find(|p| line[*p].is_some());
                let pick = match method {
                    FillMethod::Forward => before,
                    FillMethod::Backward => after,
                    FillMethod::Nearest => match (before, after) {
                        (Some(b), Some(a)) => {
                            if j - b <= a - j {
                                Some(b)
                            } else {
                                Some(a)
                            }
                        }
                        (b, a) => b.or(a),
                    },
                };
                if let Some(p) = pick {
                    data[base + j * stride] = line[p].clone();
                }
            }
        }
        let mut out = bare(x, data);
        out.value_type = x.value_type;
        out.value_labels = x.value_labels.clone();
        Ok(out)
    }

    fn align(&self, x: &DataArray, target: &DataArray) -> Result<DataArray, Error> {
        let map = AlignMap::build(target, x)?;
        let data = (0..target.len()).map(|i| x.data[map.map(i)].clone()).collect();
        Ok(DataArray {
            name: x.name.clone(),
            dims: target.dims.clone(),
            data,
            value_type: x.value_type,
            value_labels: x.value_labels.clone(),
        })
    }

    fn stack(&self, x: &DataArray) -> Result<DataArray, Error> {
        let ky = dim_index(x, "y")?;
        let kx = dim_index(x, "x")?;
        if kx != ky + 1 {
            return Err(Error::mixed_dimensions(
                "Dimensions 'y' and 'x' must be adjacent, 'y' outermost, to stack",
            ));
        }
        let mut coords = Vec::with_capacity(x.dims[ky].size() * x.dims[kx].size());
        for yc in &x.dims[ky].coords {
            for xc in &x.dims[kx].coords {
                match (xc.as_f64(), yc.as_f64()) {
                    (Some(xv), Some(yv)) => coords.push(Cell::Coords([xv, yv])),
                    _ => return Err(Error::conversion_error(
                        "non-numeric grid coordinates",
                        "a stacked spatial dimension",
                    )),
                }
            }
        }
        let mut dims = x.dims.clone();
        dims[ky] = Dimension::new(SPACE, coords);
        dims.remove(kx);
        // Row-major adjacency makes the cell order identical.
        Ok(DataArray {
            name: x.name.clone(),
            dims,
            data: x.data.clone(),
            value_type: x.value_type,
            value_labels: x.value_labels.clone(),
        })
    }

    fn unstack(&self, x: &DataArray, dimension: &str) -> Result<DataArray, Error> {
        let k = dim_index(x, dimension)?;
        let points = x.dims[k]
            .coords
            .iter()
            .map(|c| match c {
                Cell::Coords(p) => Ok(*p),
                _ => Err(Error::invalid_value_type(format!(
                    "Dimension '{}' holds no coordinate pairs, cannot unstack",
                    dimension
                ))),
            })
            .collect::<Result<Vec<[f64; 2]>, Error>>()?;
        let mut ys: Vec<f64> = points.iter().map(|p| p[1]).collect();
        ys.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        ys.dedup();
        let mut xs: Vec<f64> = points.iter().map(|p| p[0]).collect();
        xs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        xs.dedup();
        let mut dims = x.dims.clone();
        dims[k] = Dimension::new("y", ys.iter().map(|v| Cell::Float(*v)).collect());
        dims.insert(k + 1, Dimension::new("x", xs.iter().map(|v| Cell::Float(*v)).collect()));
        let out_shape: Vec<usize> = dims.iter().map(|d| d.size()).collect();
        let out_len: usize = out_shape.iter().product();
        let mut out_strides = vec![1usize; dims.len()];
        for i in (0..dims.len().saturating_sub(1)).rev() {
            out_strides[i] = out_strides[i + 1] * out_shape[i + 1];
        }
        let src_strides = x.strides();
        let mut data = Vec::with_capacity(out_len);
        for j in 0..out_len {
            let mut src = Some(0usize);
            let mut d = 0;
            while d < dims.len() {
                let idx = (j / out_strides[d]) % out_shape[d];
                if d == k {
                    let ix = (j / out_strides[k + 1]) % out_shape[k + 1];
                    let point = [xs[ix], ys[idx]];
                    src = match points.iter().position(|p| *p == point) {
                        Some(p) => src.map(|s| s + p * src_strides[k]),
                        None => None,
                    };
                    d += 2;
                } else {
                    let src_dim = if d > k { d - 1 } else { d };
                    src = src.map(|s| s + idx * src_strides[src_dim]);
                    d += 1;
                }
            }
            data.push(src.and_then(|s| x.data[s].clone()));
        }
        Ok(DataArray {
            name: x.name.clone(),
            dims,
            data,
            value_type: x.value_type,
            value_labels: x.value_labels.clone(),
        })
    }

    fn concatenate(&self, elements: &[DataArray], dimension: &str) -> Result<DataArray, Error> {
        if elements.is_empty() {
            return Err(Error::invalid_building_block(
                "Concatenate requires at least one element",
            ));
        }
        let first = &elements[0];
        if elements.iter().any(|e| e.dims != first.dims) {
            return Err(Error::mixed_dimensions(
                "Concatenated elements must share dimensions and coordinates",
            ));
        }
        if first.has_dim(dimension) {
            return Err(Error::invalid_building_block(format!(
                "Elements already have a dimension named '{}'",
                dimension
            )));
        }
        let coords = (0..elements.len() as i64).map(Cell::Int).collect();
        let mut dims = vec![Dimension::new(dimension, coords)];
        dims.extend(first.dims.clone());
        let mut data = Vec::with_capacity(elements.len() * first.len());
        for element in elements {
            data.extend(element.data.iter().cloned());
        }
        // Element names become the label table of the new dimension coords.
        let labels: BTreeMap<i64, String> = elements
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.name.clone().map(|n| (i as i64, n)))
            .collect();
        Ok(DataArray {
            name: None,
            dims,
            data,
            value_type: first.value_type,
            value_labels: if labels.is_empty() { None } else { Some(labels) },
        })
    }

    fn merge(&self, elements: &[DataArray], reducer: &ReducerDef) -> Result<DataArray, Error> {
        let first = elements
            .first()
            .ok_or_else(|| Error::invalid_building_block("Merge requires at least one element"))?;
        if elements.iter().any(|e| e.dims != first.dims) {
            return Err(Error::mixed_dimensions(
                "Merged elements must share dimensions and coordinates",
            ));
        }
        let data = (0..first.len())
            .map(|i| {
                let cells: Vec<Option<Cell>> =
                    elements.iter().map(|e| e.data[i].clone()).collect();
                (reducer.func)(&cells)
            })
            .collect();
        Ok(bare(first, data))
    }

    fn compose(&self, elements: &[DataArray]) -> Result<DataArray, Error> {
        let first = elements.first().ok_or_else(|| {
            Error::invalid_building_block("Compose requires at least one element")
        })?;
        if elements.iter().any(|e| e.dims != first.dims) {
            return Err(Error::mixed_dimensions(
                "Composed elements must share dimensions and coordinates",
            ));
        }
        let data = (0..first.len())
            .map(|i| {
                elements
                    .iter()
                    .position(|e| {
                        e.data[i].as_ref().map(|c| c.is_truthy()).unwrap_or(false)
                    })
                    .map(|p| Cell::Int(p as i64 + 1))
            })
            .collect();
        let labels: BTreeMap<i64, String> = elements
            .iter()
            .enumerate()
            .map(|(i, e)| {
                (
                    i as i64 + 1,
                    e.name.clone().unwrap_or_else(|| format!("element_{}", i + 1)),
                )
            })
            .collect();
        let mut out = bare(first, data);
        out.name = None;
        out.value_type = Some(crate::types::ValueType::Nominal);
        out.value_labels = Some(labels);
        Ok(out)
    }
}
