// THEORY:
// Every failure the measurement core can produce falls into one of three kinds:
// the caller handed us something malformed (`Validation`), a computation broke
// underneath us (`Computation`, which keeps the original cause attached), or the
// input was well-formed but too small to answer the question (`DegenerateInput`,
// e.g. a nearest neighbour with fewer than two regions). Components log the
// failure with context at the point where it happens and then return one of these
// variants, so nothing low-level escapes unannotated.

use thiserror::Error;

/// Boxed cause carried by `SpotError::Computation`.
pub type BoxedCause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Input that is structurally wrong before any measurement starts.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("acquisition header must be a key/value mapping")]
    NotAMapping,

    #[error("unknown acquisition format tag '{0}'")]
    UnknownFormat(String),

    #[error("header field '{field}' is missing for format '{format}'")]
    MissingField { field: String, format: String },

    #[error("header field '{field}' for format '{format}' is not numeric: {raw}")]
    NonNumericField {
        field: String,
        format: String,
        raw: String,
    },

    #[error("header field '{field}' for format '{format}' carries no numeric token: '{raw}'")]
    NoNumericToken {
        field: String,
        format: String,
        raw: String,
    },

    #[error("pixel count '{field}' for format '{format}' is zero")]
    ZeroPixelCount { field: String, format: String },

    #[error("shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("region index {index} out of range for {count} regions")]
    RegionOutOfRange { index: usize, count: usize },

    #[error("operation index {index} out of range for {count} history entries")]
    OperationOutOfRange { index: usize, count: usize },

    #[error("no sample named '{0}'")]
    SampleNotFound(String),

    #[error("sample name '{name}' is produced by both {first} and {second}")]
    DuplicateSample {
        name: String,
        first: String,
        second: String,
    },

    #[error("sample '{0}' has no measurement results yet")]
    NoMeasurements(String),
}

/// The domain error returned by every measurement component.
#[derive(Debug, Error)]
pub enum SpotError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{stage} failed: {source}")]
    Computation {
        stage: &'static str,
        #[source]
        source: BoxedCause,
    },

    #[error("{stage} needs at least two regions, found {regions}")]
    DegenerateInput { stage: &'static str, regions: usize },
}

impl SpotError {
    /// Wraps an arbitrary cause as a computation failure of `stage`.
    pub fn computation<E>(stage: &'static str, cause: E) -> Self
    where
        E: Into<BoxedCause>,
    {
        SpotError::Computation {
            stage,
            source: cause.into(),
        }
    }
}

pub type SpotResult<T> = Result<T, SpotError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn computation_error_keeps_its_cause() {
        let err = SpotError::computation("labeling", "empty grid");
        assert_eq!(err.to_string(), "labeling failed: empty grid");
        let cause = err.source().expect("cause should be attached");
        assert_eq!(cause.to_string(), "empty grid");
    }

    #[test]
    fn missing_field_names_field_and_format() {
        let err: SpotError = ValidationError::MissingField {
            field: "x_size".into(),
            format: "s94".into(),
        }
        .into();
        let text = err.to_string();
        assert!(text.contains("x_size"));
        assert!(text.contains("s94"));
    }
}
