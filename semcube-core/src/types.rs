//! The value-type promotion engine.
//!
//! Every operation that combines or transforms data may change the semantic
//! value type of its output: comparing two continuous arrays yields a binary
//! array, counting true values in a binary array yields a discrete array,
//! and so on. Each built-in operator and reducer carries a promotion
//! [Manual] defining which operand value types it accepts and what the
//! output type is; the [TypePromoter] checks operands against the manual and
//! stamps the result.

use std::collections::BTreeMap;
use std::fmt;

use itertools::Itertools;

use crate::error::Error;
use crate::value::{DataArray, RawKind};

/// A semantic classification of array content, distinct from the raw cell
/// representation: an integer-coded land cover class is nominal even though
/// it is stored as integers.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Binary,
    Nominal,
    Ordinal,
    Continuous,
    Discrete,
    Time,
    Space,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Binary => "binary",
            ValueType::Nominal => "nominal",
            ValueType::Ordinal => "ordinal",
            ValueType::Continuous => "continuous",
            ValueType::Discrete => "discrete",
            ValueType::Time => "time",
            ValueType::Space => "space",
        };
        write!(f, "{}", name)
    }
}

use ValueType::*;

const ALL_TYPES: &[ValueType] = &[Binary, Nominal, Ordinal, Continuous, Discrete, Time, Space];

/// Candidate value types for an array without a declared type, derived from
/// its raw storage kind. The order is the deterministic matching order.
pub fn fallback_types(kind: RawKind) -> &'static [ValueType] {
    match kind {
        RawKind::Boolean => &[Binary],
        RawKind::Integer => &[Discrete, Ordinal, Nominal],
        RawKind::Float => &[Continuous],
        RawKind::Time => &[Time],
        RawKind::Space => &[Space],
    }
}

/// The ordered set of value types an operand can act as: its declared type,
/// or the fallback set of its raw kind.
pub fn candidate_types(x: &DataArray) -> Vec<ValueType> {
    if let Some(t) = x.value_type {
        vec![t]
    } else if let Some(kind) = x.raw_kind() {
        fallback_types(kind).to_vec()
    } else {
        Vec::new()
    }
}

/// Which operand's label table the operation output inherits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreserveLabels {
    Neither,
    First,
    Second,
}

#[derive(Debug, Clone)]
pub enum PromotionTable {
    /// input type -> output type
    Unary(Vec<(ValueType, ValueType)>),
    /// first operand type -> second operand type -> output type
    Binary(Vec<(ValueType, Vec<(ValueType, ValueType)>)>),
}

/// The per-operation promotion lookup table plus its label directive.
#[derive(Debug, Clone)]
pub struct Manual {
    pub table: PromotionTable,
    pub preserve_labels: PreserveLabels,
}

impl Manual {
    pub fn unary(pairs: &[(ValueType, ValueType)], preserve_labels: PreserveLabels) -> Self {
        Manual {
            table: PromotionTable::Unary(pairs.to_vec()),
            preserve_labels,
        }
    }

    pub fn binary(
        rows: &[(ValueType, &[(ValueType, ValueType)])],
        preserve_labels: PreserveLabels,
    ) -> Self {
        Manual {
            table: PromotionTable::Binary(
                rows.iter().map(|(x, ys)| (*x, ys.to_vec())).collect(),
            ),
            preserve_labels,
        }
    }

    /// A binary table accepting only equal operand types, each pair mapping
    /// to a fixed output type.
    pub fn diagonal(types: &[ValueType], output: ValueType, preserve_labels: PreserveLabels) -> Self {
        Manual {
            table: PromotionTable::Binary(
                types.iter().map(|t| (*t, vec![(*t, output)])).collect(),
            ),
            preserve_labels,
        }
    }

    /// A unary table mapping every listed type onto itself.
    pub fn identity(types: &[ValueType], preserve_labels: PreserveLabels) -> Self {
        Manual {
            table: PromotionTable::Unary(types.iter().map(|t| (*t, *t)).collect()),
            preserve_labels,
        }
    }

    fn lookup1(&self, t: ValueType) -> Option<ValueType> {
        match &self.table {
            PromotionTable::Unary(pairs) => {
                pairs.iter().find(|(i, _)| *i == t).map(|(_, o)| *o)
            }
            PromotionTable::Binary(_) => None,
        }
    }

    fn lookup2(&self, x: ValueType, y: ValueType) -> Option<ValueType> {
        match &self.table {
            PromotionTable::Binary(rows) => rows
                .iter()
                .find(|(i, _)| *i == x)
                .and_then(|(_, ys)| ys.iter().find(|(j, _)| *j == y).map(|(_, o)| *o)),
            PromotionTable::Unary(_) => None,
        }
    }
}

struct Operand {
    candidates: Vec<ValueType>,
    labels: Option<BTreeMap<i64, String>>,
}

impl Operand {
    fn of(x: &DataArray) -> Self {
        Operand {
            candidates: candidate_types(x),
            labels: x.value_labels.clone(),
        }
    }
}

/// Checks an operation's operand value types against its manual and
/// promotes the output.
///
/// For one operand the candidate set is matched directly against the unary
/// table; for two operands an exact-type match is tried first (diagonal
/// shortcut), then every `(x, y)` candidate combination in left-to-right,
/// outer-then-inner order. The first successful match wins, making the
/// result a pure function of the operand types.
pub struct TypePromoter {
    function: String,
    manual: Manual,
    operands: Vec<Operand>,
    output_type: Option<ValueType>,
}

impl TypePromoter {
    pub fn unary(function: &str, manual: Manual, x: &DataArray) -> Self {
        TypePromoter {
            function: function.to_owned(),
            manual,
            operands: vec![Operand::of(x)],
            output_type: None,
        }
    }

    pub fn binary(function: &str, manual: Manual, x: &DataArray, y: &DataArray) -> Self {
        TypePromoter {
            function: function.to_owned(),
            manual,
            operands: vec![Operand::of(x), Operand::of(y)],
            output_type: None,
        }
    }

    /// Checks operand support and determines the output value type.
    pub fn check(&mut self) -> Result<ValueType, Error> {
        if let Some(t) = self.output_type {
            return Ok(t);
        }
        let found = match self.operands.len() {
            1 => {
                let xs = &self.operands[0].candidates;
                xs.iter().find_map(|t| self.manual.lookup1(*t))
            }
            2 => {
                let xs = &self.operands[0].candidates;
                let ys = &self.operands[1].candidates;
                let diagonal = xs
                    .iter()
                    .filter(|t| ys.contains(t))
                    .find_map(|t| self.manual.lookup2(*t, *t));
                diagonal.or_else(|| {
                    xs.iter()
                        .find_map(|x| ys.iter().find_map(|y| self.manual.lookup2(*x, *y)))
                })
            }
            _ => None,
        };
        match found {
            Some(t) => {
                self.output_type = Some(t);
                Ok(t)
            }
            None => {
                let shown = self
                    .operands
                    .iter()
                    .map(|o| {
                        if o.candidates.is_empty() {
                            "untyped".to_owned()
                        } else {
                            o.candidates.iter().map(|t| t.to_string()).join("|")
                        }
                    })
                    .collect::<Vec<_>>();
                Err(Error::unsupported_operand_types(&self.function, &shown))
            }
        }
    }

    /// Stamps the checked output type and the preserved label table onto the
    /// operation output.
    pub fn promote(&mut self, mut out: DataArray) -> Result<DataArray, Error> {
        let output_type = self.check()?;
        out.value_type = Some(output_type);
        out.value_labels = match self.manual.preserve_labels {
            PreserveLabels::Neither => None,
            PreserveLabels::First => self.operands[0].labels.clone(),
            PreserveLabels::Second => self.operands.get(1).and_then(|o| o.labels.clone()),
        };
        Ok(out)
    }
}

/// Requires an operand to act as binary, e.g. a filterer or a compose input.
pub fn expect_binary(role: &str, x: &DataArray) -> Result<(), Error> {
    if candidate_types(x).contains(&Binary) {
        Ok(())
    } else {
        Err(Error::invalid_value_type(format!(
            "{} must be binary, got '{}'",
            role,
            candidate_types(x).iter().map(|t| t.to_string()).join("|")
        )))
    }
}

const NUMERIC_TO_CONTINUOUS: &[(ValueType, ValueType)] =
    &[(Continuous, Continuous), (Discrete, Continuous)];

/// The promotion manual of a built-in operator, by name.
pub fn operator_manual(name: &str) -> Option<Manual> {
    use PreserveLabels::*;
    let manual = match name {
        "not" => Manual::unary(&[(Binary, Binary)], First),
        "absolute" => Manual::unary(&[(Continuous, Continuous), (Discrete, Discrete)], Neither),
        "cube_root" | "exponential" | "natural_logarithm" | "square_root" => {
            Manual::unary(NUMERIC_TO_CONTINUOUS, Neither)
        }
        "add" | "subtract" | "multiply" | "power" => Manual::binary(
            &[
                (Continuous, &[(Continuous, Continuous), (Discrete, Continuous)]),
                (Discrete, &[(Discrete, Discrete), (Continuous, Continuous)]),
            ],
            Neither,
        ),
        "divide" => Manual::binary(
            &[
                (Continuous, &[(Continuous, Continuous), (Discrete, Continuous)]),
                (Discrete, &[(Discrete, Continuous), (Continuous, Continuous)]),
            ],
            Neither,
        ),
        "and" | "or" | "exclusive_or" => Manual::diagonal(&[Binary], Binary, First),
        "equal" | "not_equal" | "in" | "not_in" => Manual::diagonal(ALL_TYPES, Binary, Neither),
        "greater" | "greater_equal" | "less" | "less_equal" => {
            Manual::diagonal(&[Binary, Ordinal, Continuous, Discrete, Time], Binary, Neither)
        }
        "after" | "before" | "during" => Manual::diagonal(&[Time], Binary, Neither),
        "intersects" => Manual::diagonal(&[Space], Binary, Neither),
        _ => return None,
    };
    Some(manual)
}

/// The promotion manual of a built-in reducer, by name.
pub fn reducer_manual(name: &str) -> Option<Manual> {
    use PreserveLabels::*;
    let manual = match name {
        "mean" | "standard_deviation" | "variance" | "median" => {
            Manual::unary(NUMERIC_TO_CONTINUOUS, Neither)
        }
        "sum" | "product" => {
            Manual::unary(&[(Continuous, Continuous), (Discrete, Discrete)], Neither)
        }
        "all" | "any" => Manual::unary(&[(Binary, Binary)], First),
        "count" => Manual::unary(&[(Binary, Discrete)], Neither),
        "percentage" => Manual::unary(&[(Binary, Continuous)], Neither),
        "max" | "min" => Manual::identity(&[Binary, Ordinal, Continuous, Discrete, Time], First),
        "first" | "last" | "mode" => Manual::identity(ALL_TYPES, First),
        _ => return None,
    };
    Some(manual)
}

/// The promotion manual of the assign verb: any typed input accepts any
/// typed replacement, the output takes the replacement's type and labels.
pub fn assign_manual() -> Manual {
    let rows: Vec<(ValueType, Vec<(ValueType, ValueType)>)> = ALL_TYPES
        .iter()
        .map(|x| (*x, ALL_TYPES.iter().map(|y| (*y, *y)).collect()))
        .collect();
    Manual {
        table: PromotionTable::Binary(rows),
        preserve_labels: PreserveLabels::Second,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Cell;

    fn typed(t: ValueType) -> DataArray {
        DataArray::from_cells(vec![Some(Cell::Int(1))]).with_value_type(t)
    }

    #[test]
    fn untyped_integer_fallback() {
        // An untyped integer array matches manual entries accepting nominal
        // or discrete inputs.
        let x = DataArray::from_cells(vec![Some(Cell::Int(3))]);
        assert_eq!(candidate_types(&x), vec![Discrete, Ordinal, Nominal]);
        let manual = Manual::unary(&[(Nominal, Nominal)], PreserveLabels::Neither);
        let mut p = TypePromoter::unary("test", manual, &x);
        assert_eq!(p.check().unwrap(), Nominal);
        let manual = Manual::unary(&[(Discrete, Discrete)], PreserveLabels::Neither);
        let mut p = TypePromoter::unary("test", manual, &x);
        assert_eq!(p.check().unwrap(), Discrete);
    }

    #[test]
    fn check_is_deterministic() {
        for _ in 0..3 {
            let mut p = TypePromoter::binary(
                "add",
                operator_manual("add").unwrap(),
                &typed(Continuous),
                &typed(Discrete),
            );
            assert_eq!(p.check().unwrap(), Continuous);
        }
    }

    #[test]
    fn diagonal_shortcut_precedes_cross_match() {
        // Untyped integers on both sides: the diagonal discrete/discrete
        // entry must win before any cross combination is considered.
        let x = DataArray::from_cells(vec![Some(Cell::Int(1))]);
        let y = DataArray::from_cells(vec![Some(Cell::Int(2))]);
        let mut p = TypePromoter::binary("add", operator_manual("add").unwrap(), &x, &y);
        assert_eq!(p.check().unwrap(), Discrete);
    }

    #[test]
    fn unsupported_combination_is_an_error() {
        let mut p = TypePromoter::binary(
            "and",
            operator_manual("and").unwrap(),
            &typed(Continuous),
            &typed(Continuous),
        );
        let err = p.check().unwrap_err();
        assert_eq!(err.error_type, crate::error::ErrorType::InvalidValueType);
    }

    #[test]
    fn promote_preserves_second_labels() {
        let mut labels = std::collections::BTreeMap::new();
        labels.insert(1, "water".to_owned());
        let x = typed(Continuous);
        let y = typed(Nominal).with_labels(labels.clone());
        let mut p = TypePromoter::binary("assign", assign_manual(), &x, &y);
        let out = p.promote(DataArray::from_cells(vec![Some(Cell::Int(1))])).unwrap();
        assert_eq!(out.value_type, Some(Nominal));
        assert_eq!(out.value_labels, Some(labels));
    }

    #[test]
    fn count_promotes_binary_to_discrete() {
        let mut p = TypePromoter::unary(
            "count",
            reducer_manual("count").unwrap(),
            &typed(Binary),
        );
        assert_eq!(p.check().unwrap(), Discrete);
    }
}
