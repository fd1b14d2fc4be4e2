use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::Error;
use crate::types::ValueType;

/// A single cell of a data array. Missing values are represented as `None`
/// at the array level, never as a cell variant.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Bool(bool),
    Int(i64),
    Float(f64),
    Time(DateTime<Utc>),
    Coords([f64; 2]),
    Bounds([f64; 4]),
}

/// The raw storage representation of a cell, distinct from the semantic
/// value type. Used as the fallback for type-promotion matching when an
/// array carries no declared value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKind {
    Boolean,
    Integer,
    Float,
    Time,
    Space,
}

impl Cell {
    pub fn raw_kind(&self) -> RawKind {
        match self {
            Cell::Bool(_) => RawKind::Boolean,
            Cell::Int(_) => RawKind::Integer,
            Cell::Float(_) => RawKind::Float,
            Cell::Time(_) => RawKind::Time,
            Cell::Coords(_) | Cell::Bounds(_) => RawKind::Space,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Cell::Int(n) => Some(*n as f64),
            Cell::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Cell::Bool(b) => Some(*b),
            Cell::Int(n) => Some(*n != 0),
            Cell::Float(x) => Some(*x != 0.0),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::Bool(b) => Some(*b as i64),
            Cell::Int(n) => Some(*n),
            Cell::Float(x) => Some(*x as i64),
            _ => None,
        }
    }

    /// Truthiness for filtering and counting: false for non-numeric cells.
    pub fn is_truthy(&self) -> bool {
        self.as_bool().unwrap_or(false)
    }

    /// Value equality across numeric representations: `Int(1)` equals
    /// `Float(1.0)` and `Bool(true)`.
    pub fn loose_eq(&self, other: &Cell) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }

    /// Ordering across numeric representations and timestamps; `None` for
    /// incomparable kinds.
    pub fn loose_cmp(&self, other: &Cell) -> Option<Ordering> {
        match (self, other) {
            (Cell::Time(a), Cell::Time(b)) => Some(a.cmp(b)),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Bool(b) => write!(f, "{}", b),
            Cell::Int(n) => write!(f, "{}", n),
            Cell::Float(x) => write!(f, "{}", x),
            Cell::Time(t) => write!(f, "{}", t.to_rfc3339()),
            Cell::Coords([x, y]) => write!(f, "({}, {})", x, y),
            Cell::Bounds([a, b, c, d]) => write!(f, "[{}, {}, {}, {}]", a, b, c, d),
        }
    }
}

/// A named dimension with its coordinate values.
#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    pub name: String,
    pub coords: Vec<Cell>,
}

impl Dimension {
    pub fn new<S: Into<String>>(name: S, coords: Vec<Cell>) -> Self {
        Dimension {
            name: name.into(),
            coords,
        }
    }

    pub fn size(&self) -> usize {
        self.coords.len()
    }
}

/// A multi-dimensional labeled array of cells: the single-array form of a
/// [Value]. Data is stored row-major; a cell is `None` where the array has
/// no valid observation. The semantic `value_type` and the `value_labels`
/// code table are carried alongside the data and maintained by the type
/// promotion engine.
#[derive(Debug, Clone, PartialEq)]
pub struct DataArray {
    pub name: Option<String>,
    pub dims: Vec<Dimension>,
    pub data: Vec<Option<Cell>>,
    pub value_type: Option<ValueType>,
    pub value_labels: Option<BTreeMap<i64, String>>,
}

impl DataArray {
    pub fn new(dims: Vec<Dimension>, data: Vec<Option<Cell>>) -> Result<Self, Error> {
        let expected: usize = dims.iter().map(|d| d.size()).product();
        if data.len() != expected {
            return Err(Error::unexpected_error(format!(
                "Array data has {} cells, dimensions imply {}",
                data.len(),
                expected
            )));
        }
        Ok(DataArray {
            name: None,
            dims,
            data,
            value_type: None,
            value_labels: None,
        })
    }

    /// A dimensionless array holding a single cell.
    pub fn scalar(cell: Cell) -> Self {
        DataArray {
            name: None,
            dims: Vec::new(),
            data: vec![Some(cell)],
            value_type: None,
            value_labels: None,
        }
    }

    /// A one-dimensional array over an anonymous `content` dimension.
    pub fn from_cells(cells: Vec<Option<Cell>>) -> Self {
        let coords = (0..cells.len() as i64).map(Cell::Int).collect();
        DataArray {
            name: None,
            dims: vec![Dimension::new("content", coords)],
            data: cells,
            value_type: None,
            value_labels: None,
        }
    }

    pub fn with_value_type(mut self, value_type: ValueType) -> Self {
        self.value_type = Some(value_type);
        self
    }

    pub fn with_labels(mut self, labels: BTreeMap<i64, String>) -> Self {
        self.value_labels = Some(labels);
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_owned());
        self
    }

    pub fn shape(&self) -> Vec<usize> {
        self.dims.iter().map(|d| d.size()).collect()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when the array holds no valid observation at all.
    pub fn is_empty(&self) -> bool {
        self.data.iter().all(|c| c.is_none())
    }

    pub fn dim_index(&self, name: &str) -> Option<usize> {
        self.dims.iter().position(|d| d.name == name)
    }

    pub fn has_dim(&self, name: &str) -> bool {
        self.dim_index(name).is_some()
    }

    /// Row-major strides, innermost dimension last.
    pub fn strides(&self) -> Vec<usize> {
        let mut strides = vec![1usize; self.dims.len()];
        for i in (0..self.dims.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * self.dims[i + 1].size();
        }
        strides
    }

    /// The raw kind of the first present cell, if any.
    pub fn raw_kind(&self) -> Option<RawKind> {
        self.data.iter().flatten().next().map(|c| c.raw_kind())
    }

    /// A copy of this array with fresh data but identical structure and
    /// semantic metadata.
    pub fn like(&self, data: Vec<Option<Cell>>) -> Self {
        DataArray {
            name: self.name.clone(),
            dims: self.dims.clone(),
            data,
            value_type: self.value_type,
            value_labels: self.value_labels.clone(),
        }
    }
}

/// An ordered sequence of data arrays sharing dimensional shape: the
/// collection form of a [Value]. Verbs fan out element-wise; the combining
/// verbs (`compose`, `concatenate`, `merge`) reduce a collection to a single
/// array.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection(pub Vec<DataArray>);

impl Collection {
    pub fn new(elements: Vec<DataArray>) -> Self {
        Collection(elements)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|a| a.is_empty())
    }

    pub fn elements(&self) -> &[DataArray] {
        &self.0
    }
}

/// The unit of evaluated data flowing through the interpreter.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Array(DataArray),
    Collection(Collection),
}

impl Value {
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Array(a) => a.is_empty(),
            Value::Collection(c) => c.is_empty(),
        }
    }

    pub fn as_array(&self) -> Result<&DataArray, Error> {
        match self {
            Value::Array(a) => Ok(a),
            Value::Collection(_) => Err(Error::invalid_building_block(
                "Expected a single array, got a collection",
            )),
        }
    }

    pub fn into_array(self) -> Result<DataArray, Error> {
        match self {
            Value::Array(a) => Ok(a),
            Value::Collection(_) => Err(Error::invalid_building_block(
                "Expected a single array, got a collection",
            )),
        }
    }

    pub fn with_name(self, name: &str) -> Self {
        match self {
            Value::Array(a) => Value::Array(a.with_name(name)),
            Value::Collection(c) => Value::Collection(c),
        }
    }
}

impl From<DataArray> for Value {
    fn from(array: DataArray) -> Self {
        Value::Array(array)
    }
}

impl From<Collection> for Value {
    fn from(collection: Collection) -> Self {
        Value::Collection(collection)
    }
}
