use std::fmt;

use indexmap::IndexMap;
use serde_json::Value as Json;

use crate::error::Error;

/// An identifier of a data layer or semantic concept: a sequence of path
/// segments, e.g. `["entity", "water"]`. References serialize as plain
/// segment lists and display as a '/'-joined path.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Reference(pub Vec<String>);

impl Reference {
    pub fn new<S: Into<String>>(segments: Vec<S>) -> Self {
        Reference(segments.into_iter().map(|s| s.into()).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

impl From<&str> for Reference {
    fn from(path: &str) -> Self {
        Reference(path.split('/').map(|s| s.to_owned()).collect())
    }
}

/// One node of the recipe expression tree.
///
/// Building blocks are pure data: they carry no behavior and are immutable
/// once constructed. On the wire every node is a map with a `type`
/// discriminant, e.g. `{"type": "layer", "reference": ["appearance", "color"]}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BuildingBlock {
    Concept {
        reference: Reference,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        property: Option<String>,
    },
    Layer {
        reference: Reference,
    },
    Result {
        name: String,
    },
    #[serde(rename = "self")]
    ActiveObject,
    Collection {
        elements: Vec<BuildingBlock>,
    },
    ProcessingChain {
        with: Box<BuildingBlock>,
        #[serde(rename = "do")]
        do_: Vec<BuildingBlock>,
    },
    Verb {
        name: String,
        #[serde(default)]
        params: serde_json::Map<String, Json>,
    },
    Label {
        content: String,
    },
    Set {
        content: Vec<Json>,
    },
    Interval {
        content: Vec<Json>,
    },
    Geometry {
        content: Json,
    },
    TimeInstant {
        content: String,
    },
    TimeInterval {
        content: Vec<String>,
    },
}

impl BuildingBlock {
    pub fn layer<R: Into<Reference>>(reference: R) -> Self {
        BuildingBlock::Layer {
            reference: reference.into(),
        }
    }

    pub fn concept<R: Into<Reference>>(reference: R) -> Self {
        BuildingBlock::Concept {
            reference: reference.into(),
            property: None,
        }
    }

    pub fn concept_property<R: Into<Reference>>(reference: R, property: &str) -> Self {
        BuildingBlock::Concept {
            reference: reference.into(),
            property: Some(property.to_owned()),
        }
    }

    pub fn result(name: &str) -> Self {
        BuildingBlock::Result {
            name: name.to_owned(),
        }
    }

    pub fn collection(elements: Vec<BuildingBlock>) -> Self {
        BuildingBlock::Collection { elements }
    }

    /// Starts a processing chain on this block. Verbs are appended with
    /// [chain](BuildingBlock::chain).
    pub fn with(self) -> Self {
        BuildingBlock::ProcessingChain {
            with: Box::new(self),
            do_: Vec::new(),
        }
    }

    /// Appends a verb to a processing chain, wrapping `self` into a chain
    /// first when needed.
    pub fn chain(self, name: &str, params: serde_json::Map<String, Json>) -> Self {
        let verb = BuildingBlock::Verb {
            name: name.to_owned(),
            params,
        };
        match self {
            BuildingBlock::ProcessingChain { with, mut do_ } => {
                do_.push(verb);
                BuildingBlock::ProcessingChain { with, do_ }
            }
            other => BuildingBlock::ProcessingChain {
                with: Box::new(other),
                do_: vec![verb],
            },
        }
    }

    /// The wire discriminant of this block, as it appears in the `type` field.
    pub fn type_name(&self) -> &'static str {
        match self {
            BuildingBlock::Concept { .. } => "concept",
            BuildingBlock::Layer { .. } => "layer",
            BuildingBlock::Result { .. } => "result",
            BuildingBlock::ActiveObject => "self",
            BuildingBlock::Collection { .. } => "collection",
            BuildingBlock::ProcessingChain { .. } => "processing_chain",
            BuildingBlock::Verb { .. } => "verb",
            BuildingBlock::Label { .. } => "label",
            BuildingBlock::Set { .. } => "set",
            BuildingBlock::Interval { .. } => "interval",
            BuildingBlock::Geometry { .. } => "geometry",
            BuildingBlock::TimeInstant { .. } => "time_instant",
            BuildingBlock::TimeInterval { .. } => "time_interval",
        }
    }
}

/// An ordered mapping from result name to building block. The interpreter
/// consumes recipes read-only; result order is part of the contract.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct Recipe {
    items: IndexMap<String, BuildingBlock>,
}

impl Recipe {
    pub fn new() -> Self {
        Recipe {
            items: IndexMap::new(),
        }
    }

    pub fn with(mut self, name: &str, block: BuildingBlock) -> Self {
        self.items.insert(name.to_owned(), block);
        self
    }

    pub fn insert(&mut self, name: &str, block: BuildingBlock) {
        self.items.insert(name.to_owned(), block);
    }

    pub fn get(&self, name: &str) -> Option<&BuildingBlock> {
        self.items.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.items.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.items.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BuildingBlock)> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn from_json(text: &str) -> Result<Self, Error> {
        serde_json::from_str(text)
            .map_err(|e| Error::invalid_building_block(format!("Can't parse recipe: {}", e)))
    }

    pub fn from_yaml(text: &str) -> Result<Self, Error> {
        serde_yaml::from_str(text)
            .map_err(|e| Error::invalid_building_block(format!("Can't parse recipe: {}", e)))
    }
}
