//! Verb resolution targets and the value facade.
//!
//! The processor resolves each verb block into a [ResolvedVerb] carrying
//! looked-up operators, reducers and evaluated operands. The [Facade] trait
//! then applies the verb uniformly: a [DataArray] executes it through the
//! [ArrayEngine], a [Collection] fans it out element-wise except for the
//! combining verbs which collapse the collection into a single array.

use std::sync::Arc;

use serde_json::Value as Json;

use crate::engine::{ArrayEngine, FillMethod};
use crate::error::Error;
use crate::operators::{OperatorDef, OperatorKind};
use crate::reducers::ReducerDef;
use crate::types::{assign_manual, expect_binary, Manual, TypePromoter, ValueType};
use crate::value::{Collection, DataArray, Value};

pub type CustomVerbFn = Arc<
    dyn Fn(&DataArray, &serde_json::Map<String, Json>) -> Result<DataArray, Error> + Send + Sync,
>;

/// A user-registered verb applied per array. When value type tracking is on
/// the verb must carry a promotion manual.
pub struct CustomVerb {
    pub name: String,
    pub func: CustomVerbFn,
    pub manual: Option<Manual>,
}

pub enum ResolvedVerb {
    Evaluate {
        operator: Arc<OperatorDef>,
        operand: Option<Value>,
    },
    Extract {
        dimension: String,
        component: Option<String>,
    },
    Filter {
        filterer: Value,
        trim: bool,
    },
    Assign {
        operand: Value,
        at: Option<Value>,
    },
    Groupby {
        grouper: Value,
    },
    Reduce {
        reducer: Arc<ReducerDef>,
        dimension: Option<String>,
    },
    Shift {
        dimension: String,
        steps: i64,
    },
    Smooth {
        reducer: Arc<ReducerDef>,
        dimension: String,
        size: usize,
    },
    Trim {
        dimension: Option<String>,
    },
    Delineate {
        dimension: String,
    },
    Fill {
        dimension: String,
        method: FillMethod,
    },
    AlignWith {
        target: Value,
    },
    Stack,
    Unstack {
        dimension: String,
    },
    Name {
        name: String,
    },
    Apply {
        verb: Arc<CustomVerb>,
        params: serde_json::Map<String, Json>,
    },
    Compose,
    Concatenate {
        dimension: String,
    },
    Merge {
        reducer: Arc<ReducerDef>,
    },
}

impl ResolvedVerb {
    pub fn name(&self) -> &'static str {
        match self {
            ResolvedVerb::Evaluate { .. } => "evaluate",
            ResolvedVerb::Extract { .. } => "extract",
            ResolvedVerb::Filter { .. } => "filter",
            ResolvedVerb::Assign { .. } => "assign",
            ResolvedVerb::Groupby { .. } => "groupby",
            ResolvedVerb::Reduce { .. } => "reduce",
            ResolvedVerb::Shift { .. } => "shift",
            ResolvedVerb::Smooth { .. } => "smooth",
            ResolvedVerb::Trim { .. } => "trim",
            ResolvedVerb::Delineate { .. } => "delineate",
            ResolvedVerb::Fill { .. } => "fill",
            ResolvedVerb::AlignWith { .. } => "align_with",
            ResolvedVerb::Stack => "stack",
            ResolvedVerb::Unstack { .. } => "unstack",
            ResolvedVerb::Name { .. } => "name",
            ResolvedVerb::Apply { .. } => "apply_custom",
            ResolvedVerb::Compose => "compose",
            ResolvedVerb::Concatenate { .. } => "concatenate",
            ResolvedVerb::Merge { .. } => "merge",
        }
    }

    fn is_combining(&self) -> bool {
        matches!(
            self,
            ResolvedVerb::Compose
                | ResolvedVerb::Concatenate { .. }
                | ResolvedVerb::Merge { .. }
        )
    }
}

pub struct VerbCtx<'a> {
    pub engine: &'a dyn ArrayEngine,
    pub track_types: bool,
}

pub trait Facade {
    fn apply_verb(&self, verb: &ResolvedVerb, ctx: &VerbCtx<'_>) -> Result<Value, Error>;
}

fn operand_array(value: &Value) -> Result<&DataArray, Error> {
    value.as_array().map_err(|_| {
        Error::invalid_building_block("A verb operand must be a single array, not a collection")
    })
}

fn promote_unary(
    name: &str,
    manual: &Option<Manual>,
    x: &DataArray,
    out: DataArray,
    ctx: &VerbCtx<'_>,
) -> Result<DataArray, Error> {
    if !ctx.track_types {
        return Ok(out);
    }
    match manual {
        Some(manual) => TypePromoter::unary(name, manual.clone(), x).promote(out),
        None => Err(Error::invalid_value_type(format!(
            "'{}' has no type promotion manual but value type tracking is on",
            name
        ))),
    }
}

fn promote_binary(
    name: &str,
    manual: &Option<Manual>,
    x: &DataArray,
    y: &DataArray,
    out: DataArray,
    ctx: &VerbCtx<'_>,
) -> Result<DataArray, Error> {
    if !ctx.track_types {
        return Ok(out);
    }
    match manual {
        Some(manual) => TypePromoter::binary(name, manual.clone(), x, y).promote(out),
        None => Err(Error::invalid_value_type(format!(
            "'{}' has no type promotion manual but value type tracking is on",
            name
        ))),
    }
}

impl Facade for DataArray {
    fn apply_verb(&self, verb: &ResolvedVerb, ctx: &VerbCtx<'_>) -> Result<Value, Error> {
        let value = match verb {
            ResolvedVerb::Evaluate { operator, operand } => {
                let y = operand.as_ref().map(operand_array).transpose()?;
                let out = ctx.engine.evaluate(self, operator, y)?;
                let out = match (&operator.kind, y) {
                    (OperatorKind::Unary(_), _) => {
                        promote_unary(&operator.name, &operator.manual, self, out, ctx)?
                    }
                    (_, Some(y)) => {
                        promote_binary(&operator.name, &operator.manual, self, y, out, ctx)?
                    }
                    (_, None) => out,
                };
                Value::Array(out)
            }
            ResolvedVerb::Extract {
                dimension,
                component,
            } => Value::Array(ctx.engine.extract(self, dimension, component.as_deref())?),
            ResolvedVerb::Filter { filterer, trim } => {
                let filterer = operand_array(filterer)?;
                if ctx.track_types {
                    expect_binary("A filterer", filterer)?;
                }
                Value::Array(ctx.engine.filter(self, filterer, *trim)?)
            }
            ResolvedVerb::Assign { operand, at } => {
                let y = operand_array(operand)?;
                let at = at.as_ref().map(operand_array).transpose()?;
                if let (true, Some(at)) = (ctx.track_types, at) {
                    expect_binary("An assignment selector", at)?;
                }
                let out = ctx.engine.assign(self, y, at)?;
                let out =
                    promote_binary("assign", &Some(assign_manual()), self, y, out, ctx)?;
                Value::Array(out)
            }
            ResolvedVerb::Groupby { grouper } => {
                let groupers: Vec<DataArray> = match grouper {
                    Value::Array(a) => vec![a.clone()],
                    Value::Collection(c) => c.elements().to_vec(),
                };
                Value::Collection(ctx.engine.groupby(self, &groupers)?)
            }
            ResolvedVerb::Reduce { reducer, dimension } => {
                let out = ctx.engine.reduce(self, reducer, dimension.as_deref())?;
                let out = promote_unary(&reducer.name, &reducer.manual, self, out, ctx)?;
                Value::Array(out)
            }
            ResolvedVerb::Shift { dimension, steps } => {
                Value::Array(ctx.engine.shift(self, dimension, *steps)?)
            }
            ResolvedVerb::Smooth {
                reducer,
                dimension,
                size,
            } => {
                let out = ctx.engine.smooth(self, reducer, dimension, *size)?;
                let out = promote_unary(&reducer.name, &reducer.manual, self, out, ctx)?;
                Value::Array(out)
            }
            ResolvedVerb::Trim { dimension } => {
                Value::Array(ctx.engine.trim(self, dimension.as_deref())?)
            }
            ResolvedVerb::Delineate { dimension } => {
                if ctx.track_types {
                    expect_binary("A delineated array", self)?;
                }
                let mut out = ctx.engine.delineate(self, dimension)?;
                if ctx.track_types {
                    out.value_type = Some(ValueType::Nominal);
                }
                Value::Array(out)
            }
            ResolvedVerb::Fill { dimension, method } => {
                Value::Array(ctx.engine.fill(self, dimension, *method)?)
            }
            ResolvedVerb::AlignWith { target } => {
                let target = operand_array(target)?;
                Value::Array(ctx.engine.align(self, target)?)
            }
            ResolvedVerb::Stack => Value::Array(ctx.engine.stack(self)?),
            ResolvedVerb::Unstack { dimension } => {
                Value::Array(ctx.engine.unstack(self, dimension)?)
            }
            ResolvedVerb::Name { name } => Value::Array(self.clone().with_name(name)),
            ResolvedVerb::Apply { verb, params } => {
                let out = (verb.func)(self, params)?;
                let out = promote_unary(&verb.name, &verb.manual, self, out, ctx)?;
                Value::Array(out)
            }
            ResolvedVerb::Compose | ResolvedVerb::Concatenate { .. } | ResolvedVerb::Merge { .. } => {
                return Err(Error::invalid_building_block(format!(
                    "Verb '{}' combines a collection, the active object is a single array",
                    verb.name()
                )))
            }
        };
        Ok(value)
    }
}

impl Facade for Collection {
    fn apply_verb(&self, verb: &ResolvedVerb, ctx: &VerbCtx<'_>) -> Result<Value, Error> {
        if verb.is_combining() {
            let out = match verb {
                ResolvedVerb::Compose => {
                    if ctx.track_types {
                        for element in self.elements() {
                            expect_binary("A composed element", element)?;
                        }
                    }
                    ctx.engine.compose(self.elements())?
                }
                ResolvedVerb::Concatenate { dimension } => {
                    if ctx.track_types {
                        let first = self.elements().first().map(|e| e.value_type);
                        if self.elements().iter().any(|e| Some(e.value_type) != first) {
                            return Err(Error::invalid_value_type(
                                "Concatenated elements must share one value type",
                            ));
                        }
                    }
                    ctx.engine.concatenate(self.elements(), dimension)?
                }
                ResolvedVerb::Merge { reducer } => {
                    if ctx.track_types {
                        let first = self.elements().first().map(|e| e.value_type);
                        if self.elements().iter().any(|e| Some(e.value_type) != first) {
                            return Err(Error::invalid_value_type(
                                "Merged elements must share one value type",
                            ));
                        }
                    }
                    let out = ctx.engine.merge(self.elements(), reducer)?;
                    match self.elements().first() {
                        Some(first) => {
                            promote_unary(&reducer.name, &reducer.manual, first, out, ctx)?
                        }
                        None => out,
                    }
                }
                _ => unreachable!(),
            };
            return Ok(Value::Array(out));
        }
        if matches!(verb, ResolvedVerb::Groupby { .. }) {
            return Err(Error::invalid_building_block(
                "A collection cannot be grouped",
            ));
        }
        let mut elements = Vec::with_capacity(self.len());
        for element in self.elements() {
            elements.push(element.apply_verb(verb, ctx)?.into_array()?);
        }
        Ok(Value::Collection(Collection::new(elements)))
    }
}

impl Facade for Value {
    fn apply_verb(&self, verb: &ResolvedVerb, ctx: &VerbCtx<'_>) -> Result<Value, Error> {
        match self {
            Value::Array(a) => a.apply_verb(verb, ctx),
            Value::Collection(c) => c.apply_verb(verb, ctx),
        }
    }
}
