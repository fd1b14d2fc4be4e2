//! The query processor: recipe walking, block dispatch and the evaluation
//! strategies.
//!
//! One processor owns a recipe, an extent, the pluggable collaborators
//! (data provider, concept mapping, array engine) and the operator, reducer
//! and custom verb registries. [QueryProcessor::execute] first runs the
//! recipe in discovery mode to precompute the layer usage sequence for the
//! [reference cache](crate::cache::ReferenceCache), then materializes every
//! result in recipe order.
//!
//! The three evaluation variants share the block dispatch and differ only
//! in how a data layer or a label resolves, expressed through the
//! [EvalStrategy] trait.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use indexmap::IndexMap;
use serde_json::Value as Json;
use tracing::{debug, warn};

use crate::blocks::{BuildingBlock, Recipe, Reference};
use crate::cache::ReferenceCache;
use crate::context::EvalContext;
use crate::engine::{ArrayEngine, BasicEngine, FillMethod};
use crate::error::Error;
use crate::extent::{Extent, SPACE, TIME};
use crate::operators::{OperatorDef, OperatorRegistry};
use crate::provider::{DataProvider, Mapping};
use crate::reducers::{ReducerDef, ReducerRegistry};
use crate::types::ValueType;
use crate::value::{Cell, Collection, DataArray, Dimension, Value};
use crate::verbs::{CustomVerb, Facade, ResolvedVerb, VerbCtx};

/// Named results in recipe order.
pub type Response = IndexMap<String, Value>;

/// How a data layer or a label resolves during one evaluation run.
pub trait EvalStrategy {
    fn on_layer(
        &mut self,
        processor: &mut QueryProcessor,
        reference: &Reference,
    ) -> Result<Value, Error>;

    fn on_label(&mut self, processor: &mut QueryProcessor, label: &str) -> Result<Value, Error>;
}

pub struct QueryProcessor {
    recipe: Recipe,
    extent: Extent,
    provider: Arc<dyn DataProvider>,
    mapping: Arc<dyn Mapping>,
    engine: Arc<dyn ArrayEngine>,
    operators: OperatorRegistry,
    reducers: ReducerRegistry,
    custom_verbs: HashMap<String, Arc<CustomVerb>>,
    track_types: bool,
    use_cache: bool,
    time_subsets: HashMap<Reference, Vec<DateTime<Utc>>>,
    context: EvalContext,
    cache: ReferenceCache,
    response: Response,
    in_progress: Vec<String>,
}

impl QueryProcessor {
    pub fn new(
        recipe: Recipe,
        extent: Extent,
        provider: Arc<dyn DataProvider>,
        mapping: Arc<dyn Mapping>,
    ) -> Self {
        let canvas = Value::Array(extent.canvas());
        QueryProcessor {
            recipe,
            extent,
            provider,
            mapping,
            engine: Arc::new(BasicEngine::new()),
            operators: OperatorRegistry::builtin(),
            reducers: ReducerRegistry::builtin(),
            custom_verbs: HashMap::new(),
            track_types: true,
            use_cache: true,
            time_subsets: HashMap::new(),
            context: EvalContext::new(canvas),
            cache: ReferenceCache::empty(),
            response: Response::new(),
            in_progress: Vec::new(),
        }
    }

    pub fn with_engine(mut self, engine: Arc<dyn ArrayEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_operator(mut self, operator: OperatorDef) -> Self {
        self.operators.insert(operator);
        self
    }

    pub fn with_reducer(mut self, reducer: ReducerDef) -> Self {
        self.reducers.insert(reducer);
        self
    }

    pub fn with_custom_verb(mut self, verb: CustomVerb) -> Self {
        self.custom_verbs.insert(verb.name.clone(), Arc::new(verb));
        self
    }

    pub fn with_track_types(mut self, track_types: bool) -> Self {
        self.track_types = track_types;
        self
    }

    pub fn with_cache_disabled(mut self) -> Self {
        self.use_cache = false;
        self
    }

    /// Restricts retrieval of the given layers to the given timestamps,
    /// typically the outcome of
    /// [temporal_pushdown](crate::pushdown::temporal_pushdown).
    pub fn with_time_subsets(
        mut self,
        subsets: HashMap<Reference, Vec<DateTime<Utc>>>,
    ) -> Self {
        self.time_subsets = subsets;
        self
    }

    pub fn extent(&self) -> &Extent {
        &self.extent
    }

    /// Evaluates the full recipe and returns the response.
    ///
    /// Unless caching is disabled a discovery run precedes materialization
    /// to seed the reference cache with the layer usage sequence.
    pub fn execute(&mut self) -> Result<Response, Error> {
        self.cache = if self.use_cache {
            ReferenceCache::new(self.discover()?)
        } else {
            ReferenceCache::empty()
        };
        let mut strategy = Materialize;
        self.run_variant(&mut strategy)
    }

    /// The layer usage sequence of this recipe, from a discovery run.
    pub fn discover(&mut self) -> Result<Vec<Reference>, Error> {
        let mut strategy = Discover::default();
        self.run_untracked(&mut strategy)?;
        Ok(strategy.sequence)
    }

    /// Runs every recipe result under the given strategy.
    pub fn run_variant(&mut self, strategy: &mut dyn EvalStrategy) -> Result<Response, Error> {
        let saved_response = std::mem::take(&mut self.response);
        let saved_progress = std::mem::take(&mut self.in_progress);
        let mut outcome = Ok(());
        for name in self.recipe.names() {
            if let Err(e) = self.result(&name, strategy) {
                outcome = Err(e);
                break;
            }
        }
        let produced = std::mem::replace(&mut self.response, saved_response);
        self.in_progress = saved_progress;
        outcome.map(|_| produced)
    }

    /// Like [run_variant](QueryProcessor::run_variant) with value type
    /// tracking off, for non-materializing runs over placeholder data.
    pub fn run_untracked(&mut self, strategy: &mut dyn EvalStrategy) -> Result<Response, Error> {
        let saved = self.track_types;
        self.track_types = false;
        let result = self.run_variant(strategy);
        self.track_types = saved;
        result
    }

    /// Evaluates one named result, memoized within the current run.
    pub fn result(
        &mut self,
        name: &str,
        strategy: &mut dyn EvalStrategy,
    ) -> Result<Value, Error> {
        if let Some(value) = self.response.get(name) {
            return Ok(value.clone());
        }
        if self.in_progress.iter().any(|n| n == name) {
            return Err(Error::circular_result(name, &self.in_progress));
        }
        let block = self
            .recipe
            .get(name)
            .ok_or_else(|| Error::unknown_result(name))?
            .clone();
        debug!(result = name, "Evaluating recipe result");
        self.in_progress.push(name.to_owned());
        let value = self.eval_result_block(&block, strategy).map_err(|e| {
            if e.result.is_none() {
                e.with_result(name)
            } else {
                e
            }
        });
        self.in_progress.pop();
        let value = value?;
        self.response.insert(name.to_owned(), value.clone());
        Ok(value)
    }

    /// Evaluates a result's block in a fresh context over the canvas.
    fn eval_result_block(
        &mut self,
        block: &BuildingBlock,
        strategy: &mut dyn EvalStrategy,
    ) -> Result<Value, Error> {
        let canvas = Value::Array(self.extent.canvas());
        let saved = std::mem::replace(&mut self.context, EvalContext::new(canvas));
        let value = self.eval_block(block, strategy);
        self.context = saved;
        value
    }

    /// Dispatches one building block to its handler.
    pub fn eval_block(
        &mut self,
        block: &BuildingBlock,
        strategy: &mut dyn EvalStrategy,
    ) -> Result<Value, Error> {
        debug!(block = block.type_name(), "Evaluating building block");
        match block {
            BuildingBlock::Concept {
                reference,
                property,
            } => {
                let mapping = self.mapping.clone();
                mapping.translate(reference, property.as_deref(), self, strategy)
            }
            BuildingBlock::Layer { reference } => strategy.on_layer(self, reference),
            BuildingBlock::Result { name } => self.result(name, strategy),
            BuildingBlock::ActiveObject => self.context.peek().cloned(),
            BuildingBlock::Collection { elements } => {
                let mut arrays = Vec::with_capacity(elements.len());
                for element in elements {
                    arrays.push(self.eval_block(element, strategy)?.into_array().map_err(
                        |_| {
                            Error::invalid_building_block(
                                "Collection elements must evaluate to single arrays",
                            )
                        },
                    )?);
                }
                Ok(Value::Collection(Collection::new(arrays)))
            }
            BuildingBlock::ProcessingChain { with, do_ } => {
                let subject = self.eval_block(with, strategy)?;
                self.context.push(subject);
                let mut outcome = Ok(());
                for verb in do_ {
                    if let Err(e) = self.handle_verb(verb, strategy) {
                        outcome = Err(e);
                        break;
                    }
                }
                let value = self.context.pop();
                outcome?;
                value
            }
            BuildingBlock::Verb { name, .. } => Err(Error::invalid_building_block(format!(
                "Verb '{}' appears outside a processing chain",
                name
            ))),
            BuildingBlock::Label { content } => strategy.on_label(self, content),
            BuildingBlock::Set { content } => {
                let cells = content
                    .iter()
                    .map(|v| json_to_cell(v).map(Some))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Array(DataArray::from_cells(cells)))
            }
            BuildingBlock::Interval { content } => {
                if content.len() != 2 {
                    return Err(Error::invalid_building_block(
                        "An interval needs exactly a lower and an upper bound",
                    ));
                }
                let cells = content
                    .iter()
                    .map(|v| json_to_cell(v).map(Some))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Array(DataArray::from_cells(cells)))
            }
            BuildingBlock::Geometry { content } => {
                let bounds = content
                    .as_array()
                    .filter(|xs| xs.len() == 4)
                    .map(|xs| xs.iter().filter_map(Json::as_f64).collect::<Vec<_>>())
                    .filter(|xs| xs.len() == 4);
                match bounds {
                    Some(xs) => Ok(Value::Array(
                        DataArray::from_cells(vec![Some(Cell::Bounds([
                            xs[0], xs[1], xs[2], xs[3],
                        ]))])
                        .with_value_type(ValueType::Space),
                    )),
                    None => Err(Error::invalid_building_block(
                        "A geometry must be a [xmin, ymin, xmax, ymax] bounds array",
                    )),
                }
            }
            BuildingBlock::TimeInstant { content } => Ok(Value::Array(
                DataArray::scalar(Cell::Time(parse_time(content)?))
                    .with_value_type(ValueType::Time),
            )),
            BuildingBlock::TimeInterval { content } => {
                if content.len() != 2 {
                    return Err(Error::invalid_building_block(
                        "A time interval needs exactly a start and an end",
                    ));
                }
                let cells = content
                    .iter()
                    .map(|s| parse_time(s).map(|t| Some(Cell::Time(t))))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Array(
                    DataArray::from_cells(cells).with_value_type(ValueType::Time),
                ))
            }
        }
    }

    fn handle_verb(
        &mut self,
        block: &BuildingBlock,
        strategy: &mut dyn EvalStrategy,
    ) -> Result<(), Error> {
        let (name, params) = match block {
            BuildingBlock::Verb { name, params } => (name.clone(), params.clone()),
            other => {
                return Err(Error::invalid_building_block(format!(
                    "A processing chain may only contain verbs, got '{}'",
                    other.type_name()
                )))
            }
        };
        let resolved = self.resolve_verb(&name, &params, strategy)?;
        let active = self.context.peek()?.clone();
        let engine = self.engine.clone();
        let ctx = VerbCtx {
            engine: &*engine,
            track_types: self.track_types,
        };
        let out = active.apply_verb(&resolved, &ctx)?;
        if out.is_empty() {
            warn!(verb = name.as_str(), "Verb produced an all-missing value");
        }
        self.context.replace_top(out)
    }

    fn resolve_verb(
        &mut self,
        name: &str,
        params: &serde_json::Map<String, Json>,
        strategy: &mut dyn EvalStrategy,
    ) -> Result<ResolvedVerb, Error> {
        let verb = match name {
            "evaluate" => {
                let operator = self.operators.get(&param_str(name, params, "operator")?)?;
                let operand = match params.get("operand") {
                    Some(v) => Some(self.eval_param(v, strategy)?),
                    None => None,
                };
                ResolvedVerb::Evaluate { operator, operand }
            }
            "extract" => ResolvedVerb::Extract {
                dimension: param_str(name, params, "dimension")?,
                component: param_opt_str(params, "component"),
            },
            "filter" => ResolvedVerb::Filter {
                filterer: self.eval_named_param(name, params, "filterer", strategy)?,
                trim: param_bool(params, "trim", false),
            },
            "assign" => ResolvedVerb::Assign {
                operand: self.eval_named_param(name, params, "operand", strategy)?,
                at: match params.get("at") {
                    Some(v) => Some(self.eval_param(v, strategy)?),
                    None => None,
                },
            },
            "groupby" => ResolvedVerb::Groupby {
                grouper: self.eval_named_param(name, params, "grouper", strategy)?,
            },
            "reduce" => ResolvedVerb::Reduce {
                reducer: self.reducers.get(&param_str(name, params, "reducer")?)?,
                dimension: param_opt_str(params, "dimension"),
            },
            "shift" => ResolvedVerb::Shift {
                dimension: param_str(name, params, "dimension")?,
                steps: param_i64(name, params, "steps")?,
            },
            "smooth" => ResolvedVerb::Smooth {
                reducer: self.reducers.get(&param_str(name, params, "reducer")?)?,
                dimension: param_str(name, params, "dimension")?,
                size: param_i64(name, params, "size")?.max(0) as usize,
            },
            "trim" => ResolvedVerb::Trim {
                dimension: param_opt_str(params, "dimension"),
            },
            "delineate" => ResolvedVerb::Delineate {
                dimension: param_opt_str(params, "dimension").unwrap_or_else(|| TIME.to_owned()),
            },
            "fill" => ResolvedVerb::Fill {
                dimension: param_str(name, params, "dimension")?,
                method: FillMethod::parse(&param_str(name, params, "method")?)?,
            },
            "align_with" => ResolvedVerb::AlignWith {
                target: self.eval_named_param(name, params, "target", strategy)?,
            },
            "stack" => ResolvedVerb::Stack,
            "unstack" => ResolvedVerb::Unstack {
                dimension: param_opt_str(params, "dimension").unwrap_or_else(|| SPACE.to_owned()),
            },
            "name" => ResolvedVerb::Name {
                name: param_str(name, params, "value")?,
            },
            "compose" => ResolvedVerb::Compose,
            "concatenate" => ResolvedVerb::Concatenate {
                dimension: param_str(name, params, "dimension")?,
            },
            "merge" => ResolvedVerb::Merge {
                reducer: self.reducers.get(&param_str(name, params, "reducer")?)?,
            },
            "apply_custom" => {
                let verb_name = param_str(name, params, "verb")?;
                let verb = self
                    .custom_verbs
                    .get(&verb_name)
                    .cloned()
                    .ok_or_else(|| Error::unknown_verb(&verb_name))?;
                ResolvedVerb::Apply {
                    verb,
                    params: params.clone(),
                }
            }
            other => match self.custom_verbs.get(other).cloned() {
                Some(verb) => ResolvedVerb::Apply {
                    verb,
                    params: params.clone(),
                },
                None => return Err(Error::unknown_verb(other)),
            },
        };
        Ok(verb)
    }

    /// A verb parameter is either a nested building block (an object with a
    /// `type` field) or a literal scalar.
    fn eval_param(
        &mut self,
        value: &Json,
        strategy: &mut dyn EvalStrategy,
    ) -> Result<Value, Error> {
        match value {
            Json::Object(map) if map.contains_key("type") => {
                let block: BuildingBlock = serde_json::from_value(Json::Object(map.clone()))
                    .map_err(|e| {
                        Error::invalid_building_block(format!("Can't parse parameter block: {}", e))
                    })?;
                self.eval_block(&block, strategy)
            }
            literal => Ok(Value::Array(DataArray::scalar(json_to_cell(literal)?))),
        }
    }

    fn eval_named_param(
        &mut self,
        verb: &str,
        params: &serde_json::Map<String, Json>,
        key: &str,
        strategy: &mut dyn EvalStrategy,
    ) -> Result<Value, Error> {
        let value = params
            .get(key)
            .ok_or_else(|| missing_param(verb, key))?
            .clone();
        self.eval_param(&value, strategy)
    }

    /// Conjunction of two values with the registered `and` operator, used
    /// when a concept translates through multiple rules.
    pub fn combine_and(&mut self, x: Value, y: Value) -> Result<Value, Error> {
        let operator = self.operators.get("and")?;
        let engine = self.engine.clone();
        let ctx = VerbCtx {
            engine: &*engine,
            track_types: self.track_types,
        };
        x.apply_verb(
            &ResolvedVerb::Evaluate {
                operator,
                operand: Some(y),
            },
            &ctx,
        )
    }
}

/// The materializing strategy: layers retrieve real data through the cache,
/// labels resolve against the active object's label table.
pub struct Materialize;

impl EvalStrategy for Materialize {
    fn on_layer(
        &mut self,
        processor: &mut QueryProcessor,
        reference: &Reference,
    ) -> Result<Value, Error> {
        let data = match processor.cache.load(reference) {
            Some(data) => {
                debug!(layer = %reference, "Layer served from cache");
                data
            }
            None => {
                let extent = match processor.time_subsets.get(reference) {
                    Some(keep) => processor.extent.with_time_subset(keep),
                    None => processor.extent.clone(),
                };
                let provider = processor.provider.clone();
                provider.retrieve(reference, &extent)?
            }
        };
        processor.cache.update(reference, data.clone());
        Ok(Value::Array(data))
    }

    fn on_label(&mut self, processor: &mut QueryProcessor, label: &str) -> Result<Value, Error> {
        // Collections share one label table, the first element carries it.
        let array = match processor.context.peek()? {
            Value::Array(a) => a,
            Value::Collection(c) => c
                .elements()
                .first()
                .ok_or_else(|| Error::unknown_label(label))?,
        };
        let labels = array
            .value_labels
            .as_ref()
            .ok_or_else(|| Error::unknown_label(label))?;
        let code = labels
            .iter()
            .find(|(_, v)| v.as_str() == label)
            .map(|(k, _)| *k)
            .ok_or_else(|| Error::unknown_label(label))?;
        let mut out = DataArray::scalar(Cell::Int(code));
        out.value_type = array.value_type;
        out.value_labels = array.value_labels.clone();
        Ok(Value::Array(out))
    }
}

/// The discovery strategy: no data is touched, layer references are
/// recorded in evaluation order and placeholders keep the walk going.
#[derive(Default)]
pub struct Discover {
    pub sequence: Vec<Reference>,
}

impl EvalStrategy for Discover {
    fn on_layer(
        &mut self,
        processor: &mut QueryProcessor,
        reference: &Reference,
    ) -> Result<Value, Error> {
        self.sequence.push(reference.clone());
        Ok(Value::Array(processor.extent.canvas()))
    }

    fn on_label(&mut self, _processor: &mut QueryProcessor, _label: &str) -> Result<Value, Error> {
        Ok(Value::Array(DataArray::scalar(Cell::Int(1))))
    }
}

/// The temporal filtering strategy behind
/// [temporal_pushdown](crate::pushdown::temporal_pushdown): the watched
/// layer resolves to its own timestamps so that surviving cells reveal
/// which observations the recipe actually needs.
pub struct TimeFilter {
    pub watched: Reference,
}

impl EvalStrategy for TimeFilter {
    fn on_layer(
        &mut self,
        processor: &mut QueryProcessor,
        reference: &Reference,
    ) -> Result<Value, Error> {
        if reference == &self.watched {
            let coords: Vec<Cell> = processor
                .extent
                .time
                .iter()
                .map(|t| Cell::Time(*t))
                .collect();
            let data = coords.iter().cloned().map(Some).collect();
            let array = DataArray::new(vec![Dimension::new(TIME, coords)], data)?;
            Ok(Value::Array(array))
        } else {
            Ok(Value::Array(processor.extent.canvas()))
        }
    }

    fn on_label(&mut self, _processor: &mut QueryProcessor, _label: &str) -> Result<Value, Error> {
        Ok(Value::Array(DataArray::scalar(Cell::Int(1))))
    }
}

fn missing_param(verb: &str, key: &str) -> Error {
    Error::invalid_building_block(format!("Verb '{}' requires parameter '{}'", verb, key))
}

fn param_str(
    verb: &str,
    params: &serde_json::Map<String, Json>,
    key: &str,
) -> Result<String, Error> {
    params
        .get(key)
        .and_then(Json::as_str)
        .map(|s| s.to_owned())
        .ok_or_else(|| missing_param(verb, key))
}

fn param_opt_str(params: &serde_json::Map<String, Json>, key: &str) -> Option<String> {
    params.get(key).and_then(Json::as_str).map(|s| s.to_owned())
}

fn param_bool(params: &serde_json::Map<String, Json>, key: &str, default: bool) -> bool {
    params.get(key).and_then(Json::as_bool).unwrap_or(default)
}

fn param_i64(
    verb: &str,
    params: &serde_json::Map<String, Json>,
    key: &str,
) -> Result<i64, Error> {
    params
        .get(key)
        .and_then(Json::as_i64)
        .ok_or_else(|| missing_param(verb, key))
}

pub(crate) fn json_to_cell(value: &Json) -> Result<Cell, Error> {
    match value {
        Json::Bool(b) => Ok(Cell::Bool(*b)),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Cell::Int(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Cell::Float(f))
            } else {
                Err(Error::conversion_error(n, "a cell"))
            }
        }
        Json::String(s) => parse_time(s).map(Cell::Time),
        other => Err(Error::conversion_error(other, "a cell")),
    }
}

pub(crate) fn parse_time(text: &str) -> Result<DateTime<Utc>, Error> {
    if let Ok(t) = DateTime::parse_from_rfc3339(text) {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map(|d| {
            DateTime::from_naive_utc_and_offset(d.and_hms_opt(0, 0, 0).unwrap_or_default(), Utc)
        })
        .map_err(|_| Error::conversion_error(text, "a timestamp"))
}
