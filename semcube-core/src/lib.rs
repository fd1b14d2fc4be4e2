//!
//! # Semcube Core
//!
//! Semcube core defines the essential components of a semantic raster-query
//! interpreter: a declarative recipe of building blocks is evaluated against
//! a pluggable raster data provider and a pluggable concept-to-data mapping,
//! producing named multi-dimensional results.
//!
//! ## Glossary
//!
//! **[Building block](crate::blocks::BuildingBlock)** - one node of the recipe
//! expression tree. A building block either references data (a data layer, a
//! semantic concept, another result, the active object), wraps literal content
//! (labels, sets, intervals, geometries, time instants and intervals), or
//! composes other blocks (collections, processing chains, verbs).
//!
//! **[Recipe](crate::blocks::Recipe)** - an ordered mapping from result name to
//! building block. Recipes are plain serializable trees; every node carries a
//! `type` discriminant on the wire.
//!
//! **[Value](crate::value::Value)** - the unit of evaluated data: either a
//! single [data array](crate::value::DataArray) (dimensioned cells plus a
//! semantic value type and optional value labels) or an ordered
//! [collection](crate::value::Collection) of arrays sharing dimensions.
//!
//! **Verb** - a named operation applied to the active object inside a
//! processing chain, e.g. `filter` or `reduce`. Verbs are resolved into a
//! typed form (see [verbs](crate::verbs)) and applied uniformly to arrays and
//! collections through one facade.
//!
//! **Active object** - the value a `self` block resolves to; the top of the
//! [evaluation context](crate::context::EvalContext) stack. The bottom of the
//! stack is always the spatio-temporal [extent](crate::extent::Extent) canvas.
//!
//! **[Reference cache](crate::cache::ReferenceCache)** - keeps retrieved data
//! layers resident exactly while a precomputed usage sequence says they will
//! be needed again. The sequence is produced by a non-materializing discovery
//! run of the same interpreter.
//!
//! **Value type** - a semantic classification (binary, nominal, ordinal,
//! continuous, discrete, time, space) distinct from the raw cell
//! representation. The [promotion engine](crate::types::TypePromoter) checks
//! operand types against per-operation manuals and derives output types and
//! labels.
//!
//! **[Query processor](crate::processor::QueryProcessor)** - walks a recipe,
//! dispatches each block to a handler, consults the cache and the promotion
//! engine, and produces a response. Evaluation strategies (materializing,
//! discovery, temporal filtering) share this dispatch protocol through the
//! [EvalStrategy](crate::processor::EvalStrategy) trait.
extern crate serde;
#[macro_use]
extern crate serde_derive;

pub mod blocks;
pub mod cache;
pub mod context;
pub mod engine;
pub mod error;
pub mod extent;
pub mod operators;
pub mod processor;
pub mod provider;
pub mod pushdown;
pub mod reducers;
pub mod types;
pub mod value;
pub mod verbs;
