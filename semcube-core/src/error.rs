use itertools::Itertools;

use crate::blocks::Reference;
use std::error;
use std::fmt;
use std::fmt::Display;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, Copy)]
pub enum ErrorType {
    InvalidBuildingBlock,
    UnknownResult,
    CircularResult,
    UnknownConcept,
    UnknownReference,
    UnknownOperator,
    UnknownReducer,
    UnknownVerb,
    UnknownDimension,
    UnknownComponent,
    UnknownLabel,
    InvalidValueType,
    Alignment,
    MissingDimension,
    TooManyDimensions,
    MixedDimensions,
    EmptyData,
    ConversionError,
    UnexpectedError,
}

/// Crate-wide error type.
///
/// Every failure mode has a dedicated constructor so that call sites stay
/// terse and the error type discriminant stays accurate. The optional
/// `reference` and `result` fields carry the layer/concept reference or the
/// recipe result name the error occurred at, when known.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Error {
    pub error_type: ErrorType,
    pub message: String,
    pub reference: Option<String>,
    pub result: Option<String>,
}

impl Error {
    pub fn new(error_type: ErrorType, message: String) -> Self {
        Error {
            error_type,
            message,
            reference: None,
            result: None,
        }
    }

    pub fn with_reference(mut self, reference: &Reference) -> Self {
        self.reference = Some(reference.to_string());
        self
    }

    pub fn with_result(mut self, result: &str) -> Self {
        self.result = Some(result.to_owned());
        self
    }

    pub fn invalid_building_block<M: Display>(message: M) -> Self {
        Error::new(ErrorType::InvalidBuildingBlock, message.to_string())
    }

    pub fn unknown_result(name: &str) -> Self {
        Error::new(
            ErrorType::UnknownResult,
            format!("Result '{}' is not defined in the recipe", name),
        )
        .with_result(name)
    }

    pub fn circular_result(name: &str, chain: &[String]) -> Self {
        Error::new(
            ErrorType::CircularResult,
            format!(
                "Result '{}' references itself through {}",
                name,
                chain.iter().map(|r| format!("'{}'", r)).join(" -> ")
            ),
        )
        .with_result(name)
    }

    pub fn unknown_concept(reference: &Reference) -> Self {
        Error::new(
            ErrorType::UnknownConcept,
            format!("Concept '{}' is not defined in the mapping", reference),
        )
        .with_reference(reference)
    }

    pub fn unknown_reference(reference: &Reference, property: &str) -> Self {
        Error::new(
            ErrorType::UnknownReference,
            format!(
                "Property '{}' is not defined for concept '{}'",
                property, reference
            ),
        )
        .with_reference(reference)
    }

    pub fn unknown_layer(reference: &Reference) -> Self {
        Error::new(
            ErrorType::UnknownReference,
            format!("Layer '{}' is not present in the data source", reference),
        )
        .with_reference(reference)
    }

    pub fn unknown_operator(name: &str) -> Self {
        Error::new(
            ErrorType::UnknownOperator,
            format!("Operator '{}' is not defined", name),
        )
    }

    pub fn unknown_reducer(name: &str) -> Self {
        Error::new(
            ErrorType::UnknownReducer,
            format!("Reducer '{}' is not defined", name),
        )
    }

    pub fn unknown_verb(name: &str) -> Self {
        Error::new(
            ErrorType::UnknownVerb,
            format!("Verb '{}' is not defined", name),
        )
    }

    pub fn unknown_dimension(name: &str) -> Self {
        Error::new(
            ErrorType::UnknownDimension,
            format!("Dimension '{}' does not exist", name),
        )
    }

    pub fn unknown_component(dimension: &str, component: &str) -> Self {
        Error::new(
            ErrorType::UnknownComponent,
            format!(
                "Component '{}' cannot be extracted from dimension '{}'",
                component, dimension
            ),
        )
    }

    pub fn unknown_label(label: &str) -> Self {
        Error::new(
            ErrorType::UnknownLabel,
            format!("Label '{}' is not attached to any value", label),
        )
    }

    pub fn invalid_value_type<M: Display>(message: M) -> Self {
        Error::new(ErrorType::InvalidValueType, message.to_string())
    }

    pub fn unsupported_operand_types(function: &str, types: &[String]) -> Self {
        Error::new(
            ErrorType::InvalidValueType,
            format!(
                "Unsupported operand value type(s) for '{}': {}",
                function,
                types.iter().map(|t| format!("'{}'", t)).join(", ")
            ),
        )
    }

    pub fn alignment<M: Display>(message: M) -> Self {
        Error::new(ErrorType::Alignment, message.to_string())
    }

    pub fn missing_dimension(name: &str) -> Self {
        Error::new(
            ErrorType::MissingDimension,
            format!("Required dimension '{}' is missing", name),
        )
    }

    pub fn too_many_dimensions<M: Display>(message: M) -> Self {
        Error::new(ErrorType::TooManyDimensions, message.to_string())
    }

    pub fn mixed_dimensions<M: Display>(message: M) -> Self {
        Error::new(ErrorType::MixedDimensions, message.to_string())
    }

    pub fn empty_data(reference: &Reference) -> Self {
        Error::new(
            ErrorType::EmptyData,
            format!("Layer '{}' contains no valid data within the extent", reference),
        )
        .with_reference(reference)
    }

    pub fn conversion_error<W: Display, T: Display>(what: W, to: T) -> Self {
        Error::new(
            ErrorType::ConversionError,
            format!("Can't convert '{}' to {}", what, to),
        )
    }

    pub fn unexpected_error<M: Display>(message: M) -> Self {
        Error::new(ErrorType::UnexpectedError, message.to_string())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.result, &self.reference) {
            (Some(r), _) => write!(f, "{} (in result '{}')", self.message, r),
            (None, Some(r)) => write!(f, "{} (at '{}')", self.message, r),
            (None, None) => write!(f, "{}", self.message),
        }
    }
}

impl error::Error for Error {
    fn description(&self) -> &str {
        &self.message
    }
}
