//! Built-in cell-level operators and the operator registry.
//!
//! Operators work on single cells; alignment and broadcasting across array
//! shapes happen in the [engine](crate::engine). A missing operand always
//! yields a missing output. Unknown or unrepresentable results (logarithm of
//! a negative number, division by zero) also yield a missing output rather
//! than an error.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Error;
use crate::types::{operator_manual, Manual};
use crate::value::Cell;

/// The calling convention of an operator.
///
/// Most operators take one or two single cells. Membership and containment
/// operators (`in`, `during`, `intersects`, ...) take the full cell slice of
/// the right-hand operand so they can test against a set, an interval or a
/// geometry in one call.
#[derive(Debug)]
pub enum OperatorKind {
    Unary(fn(&Cell) -> Option<Cell>),
    Binary(fn(&Cell, &Cell) -> Option<Cell>),
    RightSlice(fn(&Cell, &[Option<Cell>]) -> Option<Cell>),
}

#[derive(Debug)]
pub struct OperatorDef {
    pub name: String,
    pub kind: OperatorKind,
    pub manual: Option<Manual>,
}

impl OperatorDef {
    pub fn new(name: &str, kind: OperatorKind, manual: Option<Manual>) -> Self {
        OperatorDef {
            name: name.to_owned(),
            kind,
            manual,
        }
    }

    pub fn wants_operand(&self) -> bool {
        !matches!(self.kind, OperatorKind::Unary(_))
    }
}

/// Named operator lookup. Starts with the built-in set; user-registered
/// operators shadow built-ins of the same name.
pub struct OperatorRegistry {
    operators: HashMap<String, Arc<OperatorDef>>,
}

impl OperatorRegistry {
    pub fn empty() -> Self {
        OperatorRegistry {
            operators: HashMap::new(),
        }
    }

    pub fn builtin() -> Self {
        let mut registry = OperatorRegistry::empty();
        for (name, kind) in builtin_operators() {
            registry.insert(OperatorDef::new(name, kind, operator_manual(name)));
        }
        registry
    }

    pub fn insert(&mut self, operator: OperatorDef) {
        self.operators
            .insert(operator.name.clone(), Arc::new(operator));
    }

    pub fn get(&self, name: &str) -> Result<Arc<OperatorDef>, Error> {
        self.operators
            .get(name)
            .cloned()
            .ok_or_else(|| Error::unknown_operator(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operators.contains_key(name)
    }
}

fn builtin_operators() -> Vec<(&'static str, OperatorKind)> {
    use OperatorKind::*;
    vec![
        ("not", Unary(op_not)),
        ("absolute", Unary(op_absolute)),
        ("cube_root", Unary(op_cube_root)),
        ("exponential", Unary(op_exponential)),
        ("natural_logarithm", Unary(op_natural_logarithm)),
        ("square_root", Unary(op_square_root)),
        ("add", Binary(op_add)),
        ("subtract", Binary(op_subtract)),
        ("multiply", Binary(op_multiply)),
        ("divide", Binary(op_divide)),
        ("power", Binary(op_power)),
        ("and", Binary(op_and)),
        ("or", Binary(op_or)),
        ("exclusive_or", Binary(op_exclusive_or)),
        ("equal", Binary(op_equal)),
        ("not_equal", Binary(op_not_equal)),
        ("greater", Binary(op_greater)),
        ("greater_equal", Binary(op_greater_equal)),
        ("less", Binary(op_less)),
        ("less_equal", Binary(op_less_equal)),
        ("in", RightSlice(op_in)),
        ("not_in", RightSlice(op_not_in)),
        ("after", RightSlice(op_after)),
        ("before", RightSlice(op_before)),
        ("during", RightSlice(op_during)),
        ("intersects", RightSlice(op_intersects)),
    ]
}

fn op_not(x: &Cell) -> Option<Cell> {
    x.as_bool().map(|b| Cell::Bool(!b))
}

fn op_absolute(x: &Cell) -> Option<Cell> {
    match x {
        Cell::Int(n) => Some(Cell::Int(n.abs())),
        Cell::Float(v) => Some(Cell::Float(v.abs())),
        _ => None,
    }
}

fn op_cube_root(x: &Cell) -> Option<Cell> {
    x.as_f64().map(|v| Cell::Float(v.cbrt()))
}

fn op_exponential(x: &Cell) -> Option<Cell> {
    x.as_f64().map(|v| Cell::Float(v.exp()))
}

fn op_natural_logarithm(x: &Cell) -> Option<Cell> {
    x.as_f64().filter(|v| *v > 0.0).map(|v| Cell::Float(v.ln()))
}

fn op_square_root(x: &Cell) -> Option<Cell> {
    x.as_f64().filter(|v| *v >= 0.0).map(|v| Cell::Float(v.sqrt()))
}

// Integer operands stay integer where the operation is closed over
// integers; any float operand makes the result float.
fn arithmetic(x: &Cell, y: &Cell, int_op: fn(i64, i64) -> Option<i64>, float_op: fn(f64, f64) -> f64) -> Option<Cell> {
    match (x, y) {
        (Cell::Int(a), Cell::Int(b)) => int_op(*a, *b).map(Cell::Int),
        _ => match (x.as_f64(), y.as_f64()) {
            (Some(a), Some(b)) => Some(Cell::Float(float_op(a, b))),
            _ => None,
        },
    }
}

fn op_add(x: &Cell, y: &Cell) -> Option<Cell> {
    arithmetic(x, y, i64::checked_add, |a, b| a + b)
}

fn op_subtract(x: &Cell, y: &Cell) -> Option<Cell> {
    arithmetic(x, y, i64::checked_sub, |a, b| a - b)
}

fn op_multiply(x: &Cell, y: &Cell) -> Option<Cell> {
    arithmetic(x, y, i64::checked_mul, |a, b| a * b)
}

fn op_divide(x: &Cell, y: &Cell) -> Option<Cell> {
    match (x.as_f64(), y.as_f64()) {
        (Some(_), Some(b)) if b == 0.0 => None,
        (Some(a), Some(b)) => Some(Cell::Float(a / b)),
        _ => None,
    }
}

fn op_power(x: &Cell, y: &Cell) -> Option<Cell> {
    match (x, y) {
        (Cell::Int(a), Cell::Int(b)) if *b >= 0 => {
            u32::try_from(*b).ok().and_then(|e| a.checked_pow(e)).map(Cell::Int)
        }
        _ => match (x.as_f64(), y.as_f64()) {
            (Some(a), Some(b)) => Some(Cell::Float(a.powf(b))),
            _ => None,
        },
    }
}

fn logical(x: &Cell, y: &Cell, op: fn(bool, bool) -> bool) -> Option<Cell> {
    match (x.as_bool(), y.as_bool()) {
        (Some(a), Some(b)) => Some(Cell::Bool(op(a, b))),
        _ => None,
    }
}

fn op_and(x: &Cell, y: &Cell) -> Option<Cell> {
    logical(x, y, |a, b| a && b)
}

fn op_or(x: &Cell, y: &Cell) -> Option<Cell> {
    logical(x, y, |a, b| a || b)
}

fn op_exclusive_or(x: &Cell, y: &Cell) -> Option<Cell> {
    logical(x, y, |a, b| a != b)
}

fn op_equal(x: &Cell, y: &Cell) -> Option<Cell> {
    Some(Cell::Bool(x.loose_eq(y)))
}

fn op_not_equal(x: &Cell, y: &Cell) -> Option<Cell> {
    Some(Cell::Bool(!x.loose_eq(y)))
}

fn ordering(x: &Cell, y: &Cell, accept: fn(std::cmp::Ordering) -> bool) -> Option<Cell> {
    x.loose_cmp(y).map(|o| Cell::Bool(accept(o)))
}

fn op_greater(x: &Cell, y: &Cell) -> Option<Cell> {
    ordering(x, y, |o| o.is_gt())
}

fn op_greater_equal(x: &Cell, y: &Cell) -> Option<Cell> {
    ordering(x, y, |o| o.is_ge())
}

fn op_less(x: &Cell, y: &Cell) -> Option<Cell> {
    ordering(x, y, |o| o.is_lt())
}

fn op_less_equal(x: &Cell, y: &Cell) -> Option<Cell> {
    ordering(x, y, |o| o.is_le())
}

fn op_in(x: &Cell, ys: &[Option<Cell>]) -> Option<Cell> {
    Some(Cell::Bool(
        ys.iter().flatten().any(|y| x.loose_eq(y)),
    ))
}

fn op_not_in(x: &Cell, ys: &[Option<Cell>]) -> Option<Cell> {
    op_in(x, ys).and_then(|c| op_not(&c))
}

fn time_bounds(ys: &[Option<Cell>]) -> Option<(Cell, Cell)> {
    let mut times: Vec<&Cell> = ys
        .iter()
        .flatten()
        .filter(|c| matches!(c, Cell::Time(_)))
        .collect();
    times.sort_by(|a, b| a.loose_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    match (times.first(), times.last()) {
        (Some(lo), Some(hi)) => Some(((*lo).clone(), (*hi).clone())),
        _ => None,
    }
}

// Against an interval the relation holds for the whole of it: after means
// later than the latest instant, before means earlier than the earliest.
fn op_after(x: &Cell, ys: &[Option<Cell>]) -> Option<Cell> {
    let (_, hi) = time_bounds(ys)?;
    ordering(x, &hi, |o| o.is_gt())
}

fn op_before(x: &Cell, ys: &[Option<Cell>]) -> Option<Cell> {
    let (lo, _) = time_bounds(ys)?;
    ordering(x, &lo, |o| o.is_lt())
}

fn op_during(x: &Cell, ys: &[Option<Cell>]) -> Option<Cell> {
    let (lo, hi) = time_bounds(ys)?;
    match (x.loose_cmp(&lo), x.loose_cmp(&hi)) {
        (Some(a), Some(b)) => Some(Cell::Bool(a.is_ge() && b.is_le())),
        _ => None,
    }
}

fn op_intersects(x: &Cell, ys: &[Option<Cell>]) -> Option<Cell> {
    let point = match x {
        Cell::Coords(p) => *p,
        _ => return None,
    };
    let hit = ys.iter().flatten().any(|y| match y {
        Cell::Bounds([xmin, ymin, xmax, ymax]) => {
            point[0] >= *xmin && point[0] <= *xmax && point[1] >= *ymin && point[1] <= *ymax
        }
        Cell::Coords(q) => point == *q,
        _ => false,
    });
    Some(Cell::Bool(hit))
}
