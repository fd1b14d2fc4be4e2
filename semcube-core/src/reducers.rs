//! Built-in reducers and the reducer registry.
//!
//! A reducer collapses a slice of cells into a single cell. Missing cells
//! are skipped; a slice with no present cell reduces to missing. The
//! statistical reducers convert their inputs through [Cell::as_f64], the
//! positional and extremal reducers keep the original cell representation.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Error;
use crate::types::{reducer_manual, Manual};
use crate::value::Cell;

pub type ReducerFn = fn(&[Option<Cell>]) -> Option<Cell>;

#[derive(Debug)]
pub struct ReducerDef {
    pub name: String,
    pub func: ReducerFn,
    pub manual: Option<Manual>,
}

impl ReducerDef {
    pub fn new(name: &str, func: ReducerFn, manual: Option<Manual>) -> Self {
        ReducerDef {
            name: name.to_owned(),
            func,
            manual,
        }
    }
}

/// Named reducer lookup. Starts with the built-in set; user-registered
/// reducers shadow built-ins of the same name.
pub struct ReducerRegistry {
    reducers: HashMap<String, Arc<ReducerDef>>,
}

impl ReducerRegistry {
    pub fn empty() -> Self {
        ReducerRegistry {
            reducers: HashMap::new(),
        }
    }

    pub fn builtin() -> Self {
        let mut registry = ReducerRegistry::empty();
        for (name, func) in builtin_reducers() {
            registry.insert(ReducerDef::new(name, func, reducer_manual(name)));
        }
        registry
    }

    pub fn insert(&mut self, reducer: ReducerDef) {
        self.reducers.insert(reducer.name.clone(), Arc::new(reducer));
    }

    pub fn get(&self, name: &str) -> Result<Arc<ReducerDef>, Error> {
        self.reducers
            .get(name)
            .cloned()
            .ok_or_else(|| Error::unknown_reducer(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.reducers.contains_key(name)
    }
}

fn builtin_reducers() -> Vec<(&'static str, ReducerFn)> {
    vec![
        ("mean", red_mean),
        ("median", red_median),
        ("mode", red_mode),
        ("max", red_max),
        ("min", red_min),
        ("sum", red_sum),
        ("product", red_product),
        ("standard_deviation", red_standard_deviation),
        ("variance", red_variance),
        ("all", red_all),
        ("any", red_any),
        ("count", red_count),
        ("percentage", red_percentage),
        ("first", red_first),
        ("last", red_last),
    ]
}

fn present(cells: &[Option<Cell>]) -> impl Iterator<Item = &Cell> {
    cells.iter().flatten()
}

fn numbers(cells: &[Option<Cell>]) -> Vec<f64> {
    present(cells).filter_map(|c| c.as_f64()).collect()
}

fn red_mean(cells: &[Option<Cell>]) -> Option<Cell> {
    let xs = numbers(cells);
    if xs.is_empty() {
        None
    } else {
        Some(Cell::Float(xs.iter().sum::<f64>() / xs.len() as f64))
    }
}

fn red_median(cells: &[Option<Cell>]) -> Option<Cell> {
    let mut xs = numbers(cells);
    if xs.is_empty() {
        return None;
    }
    xs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = xs.len() / 2;
    let median = if xs.len() % 2 == 0 {
        (xs[mid - 1] + xs[mid]) / 2.0
    } else {
        xs[mid]
    };
    Some(Cell::Float(median))
}

// Most frequent cell; ties resolve to the first encountered.
fn red_mode(cells: &[Option<Cell>]) -> Option<Cell> {
    let mut seen: Vec<(&Cell, usize)> = Vec::new();
    for cell in present(cells) {
        match seen.iter_mut().find(|(c, _)| c.loose_eq(cell)) {
            Some((_, n)) => *n += 1,
            None => seen.push((cell, 1)),
        }
    }
    let mut best: Option<(&Cell, usize)> = None;
    for (cell, n) in seen {
        if best.map(|(_, m)| n > m).unwrap_or(true) {
            best = Some((cell, n));
        }
    }
    best.map(|(c, _)| c.clone())
}

fn extremum(cells: &[Option<Cell>], keep: fn(std::cmp::Ordering) -> bool) -> Option<Cell> {
    let mut best: Option<&Cell> = None;
    for cell in present(cells) {
        best = match best {
            None => Some(cell),
            Some(b) => match cell.loose_cmp(b) {
                Some(o) if keep(o) => Some(cell),
                _ => Some(b),
            },
        };
    }
    best.cloned()
}

fn red_max(cells: &[Option<Cell>]) -> Option<Cell> {
    extremum(cells, |o| o.is_gt())
}

fn red_min(cells: &[Option<Cell>]) -> Option<Cell> {
    extremum(cells, |o| o.is_lt())
}

fn combine(
    x: &Cell,
    y: &Cell,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Option<Cell> {
    match (x, y) {
        (Cell::Int(a), Cell::Int(b)) => int_op(*a, *b).map(Cell::Int),
        _ => match (x.as_f64(), y.as_f64()) {
            (Some(a), Some(b)) => Some(Cell::Float(float_op(a, b))),
            _ => None,
        },
    }
}

// Sum and product stay integer when every present cell is an integer.
fn accumulate(
    cells: &[Option<Cell>],
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Option<Cell> {
    let mut acc: Option<Cell> = None;
    for cell in present(cells) {
        acc = match acc {
            None => Some(cell.clone()),
            Some(prev) => Some(combine(&prev, cell, int_op, float_op)?),
        };
    }
    acc
}

fn red_sum(cells: &[Option<Cell>]) -> Option<Cell> {
    accumulate(cells, i64::checked_add, |a, b| a + b)
}

fn red_product(cells: &[Option<Cell>]) -> Option<Cell> {
    accumulate(cells, i64::checked_mul, |a, b| a * b)
}

fn red_variance(cells: &[Option<Cell>]) -> Option<Cell> {
    let xs = numbers(cells);
    if xs.is_empty() {
        return None;
    }
    let mean = xs.iter().sum::<f64>() / xs.len() as f64;
    let var = xs.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / xs.len() as f64;
    Some(Cell::Float(var))
}

fn red_standard_deviation(cells: &[Option<Cell>]) -> Option<Cell> {
    match red_variance(cells) {
        Some(Cell::Float(v)) => Some(Cell::Float(v.sqrt())),
        _ => None,
    }
}

fn red_all(cells: &[Option<Cell>]) -> Option<Cell> {
    if present(cells).next().is_none() {
        return None;
    }
    Some(Cell::Bool(present(cells).all(|c| c.is_truthy())))
}

fn red_any(cells: &[Option<Cell>]) -> Option<Cell> {
    if present(cells).next().is_none() {
        return None;
    }
    Some(Cell::Bool(present(cells).any(|c| c.is_truthy())))
}

fn red_count(cells: &[Option<Cell>]) -> Option<Cell> {
    if present(cells).next().is_none() {
        return None;
    }
    Some(Cell::Int(present(cells).filter(|c| c.is_truthy()).count() as i64))
}

fn red_percentage(cells: &[Option<Cell>]) -> Option<Cell> {
    let total = present(cells).count();
    if total == 0 {
        return None;
    }
    let truthy = present(cells).filter(|c| c.is_truthy()).count();
    Some(Cell::Float(100.0 * truthy as f64 / total as f64))
}

fn red_first(cells: &[Option<Cell>]) -> Option<Cell> {
    present(cells).next().cloned()
}

fn red_last(cells: &[Option<Cell>]) -> Option<Cell> {
    present(cells).last().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(xs: &[i64]) -> Vec<Option<Cell>> {
        xs.iter().map(|n| Some(Cell::Int(*n))).collect()
    }

    #[test]
    fn registry_lookup() {
        let registry = ReducerRegistry::builtin();
        assert!(registry.get("mean").is_ok());
        let err = registry.get("frobnicate").unwrap_err();
        assert_eq!(err.error_type, crate::error::ErrorType::UnknownReducer);
    }

    #[test]
    fn statistics_skip_missing() {
        let mut cells = ints(&[2, 4]);
        cells.insert(1, None);
        assert_eq!(red_mean(&cells), Some(Cell::Float(3.0)));
        assert_eq!(red_sum(&cells), Some(Cell::Int(6)));
        assert_eq!(red_count(&ints(&[1, 0, 1])), Some(Cell::Int(2)));
    }

    #[test]
    fn all_missing_reduces_to_missing() {
        let cells = vec![None, None];
        assert_eq!(red_mean(&cells), None);
        assert_eq!(red_any(&cells), None);
        assert_eq!(red_first(&cells), None);
    }

    #[test]
    fn median_and_mode() {
        assert_eq!(red_median(&ints(&[5, 1, 3])), Some(Cell::Float(3.0)));
        assert_eq!(red_median(&ints(&[1, 2, 3, 4])), Some(Cell::Float(2.5)));
        assert_eq!(red_mode(&ints(&[1, 2, 2, 3])), Some(Cell::Int(2)));
        assert_eq!(red_mode(&ints(&[1, 2])), Some(Cell::Int(1)));
    }

    #[test]
    fn mode_tie_keeps_first_encountered() {
        let mode = ReducerRegistry::builtin().get("mode").unwrap();
        assert_eq!((mode.func)(&ints(&[1, 2])), Some(Cell::Int(1)));
        assert_eq!((mode.func)(&ints(&[2, 1])), Some(Cell::Int(2)));
        assert_eq!((mode.func)(&ints(&[3, 1, 1, 3])), Some(Cell::Int(3)));
    }

    #[test]
    fn logical_reducers() {
        let cells = vec![Some(Cell::Bool(true)), Some(Cell::Bool(false)), None];
        assert_eq!(red_all(&cells), Some(Cell::Bool(false)));
        assert_eq!(red_any(&cells), Some(Cell::Bool(true)));
        assert_eq!(red_percentage(&cells), Some(Cell::Float(50.0)));
    }

    #[test]
    fn positional_reducers() {
        let cells = vec![None, Some(Cell::Int(7)), Some(Cell::Int(9)), None];
        assert_eq!(red_first(&cells), Some(Cell::Int(7)));
        assert_eq!(red_last(&cells), Some(Cell::Int(9)));
        assert_eq!(red_max(&cells), Some(Cell::Int(9)));
        assert_eq!(red_min(&cells), Some(Cell::Int(7)));
    }
}
