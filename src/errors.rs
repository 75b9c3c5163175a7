//! Definition of errors.

use core::fmt;

use std::error::Error;

/// The error type for Ruseq.
#[derive(Debug)]
pub enum RuseqError {
    /// No training example was given.
    EmptyTrainingSet,

    /// Tokens and labels of an example have different lengths.
    DimensionMismatch(DimensionMismatchError),

    /// A label is outside the fixed label set of a model.
    UnknownLabel(UnknownLabelError),

    /// The grammar cannot derive the input.
    ///
    /// This is an ordinary outcome of parsing and callers are expected to handle it.
    NoParse(NoParseError),

    /// A persisted model is corrupt or incompatible.
    Serialization(SerializationError),

    /// A hyperparameter is out of its valid range.
    InvalidHyperparameter(InvalidHyperparameterError),

    /// A training tree is not well-formed.
    MalformedTree(MalformedTreeError),

    /// The numerical optimizer failed.
    Optimization(OptimizationError),

    /// I/O error.
    Io(std::io::Error),
}

impl RuseqError {
    pub(crate) const fn dimension_mismatch(index: usize, tokens: usize, labels: usize) -> Self {
        Self::DimensionMismatch(DimensionMismatchError {
            index,
            tokens,
            labels,
        })
    }

    pub(crate) fn unknown_label<S>(label: S) -> Self
    where
        S: Into<String>,
    {
        Self::UnknownLabel(UnknownLabelError {
            label: label.into(),
        })
    }

    pub(crate) const fn no_parse(tokens: usize) -> Self {
        Self::NoParse(NoParseError { tokens })
    }

    pub(crate) fn serialization<S>(msg: S) -> Self
    where
        S: Into<String>,
    {
        Self::Serialization(SerializationError { msg: msg.into() })
    }

    pub(crate) fn invalid_hyperparameter<S>(arg: &'static str, msg: S) -> Self
    where
        S: Into<String>,
    {
        Self::InvalidHyperparameter(InvalidHyperparameterError {
            arg,
            msg: msg.into(),
        })
    }

    pub(crate) fn malformed_tree<S>(msg: S) -> Self
    where
        S: Into<String>,
    {
        Self::MalformedTree(MalformedTreeError { msg: msg.into() })
    }

    pub(crate) fn optimization<S>(msg: S) -> Self
    where
        S: Into<String>,
    {
        Self::Optimization(OptimizationError { msg: msg.into() })
    }

    /// Returns `true` if the error is [`RuseqError::NoParse`].
    #[must_use]
    pub const fn is_no_parse(&self) -> bool {
        matches!(self, Self::NoParse(_))
    }
}

impl fmt::Display for RuseqError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::EmptyTrainingSet => write!(f, "EmptyTrainingSet: no training example"),
            Self::DimensionMismatch(e) => e.fmt(f),
            Self::UnknownLabel(e) => e.fmt(f),
            Self::NoParse(e) => e.fmt(f),
            Self::Serialization(e) => e.fmt(f),
            Self::InvalidHyperparameter(e) => e.fmt(f),
            Self::MalformedTree(e) => e.fmt(f),
            Self::Optimization(e) => e.fmt(f),
            Self::Io(e) => e.fmt(f),
        }
    }
}

impl Error for RuseqError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

/// Error used when tokens and labels have different lengths.
#[derive(Debug)]
pub struct DimensionMismatchError {
    /// Index of the offending example.
    pub index: usize,

    /// Number of tokens.
    pub tokens: usize,

    /// Number of labels.
    pub labels: usize,
}

impl fmt::Display for DimensionMismatchError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "DimensionMismatchError: example {} has {} tokens but {} labels",
            self.index, self.tokens, self.labels
        )
    }
}

impl Error for DimensionMismatchError {}

/// Error used when a label is outside the label set.
#[derive(Debug)]
pub struct UnknownLabelError {
    /// The label.
    pub label: String,
}

impl fmt::Display for UnknownLabelError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "UnknownLabelError: {}", self.label)
    }
}

impl Error for UnknownLabelError {}

/// Error used when no parse tree derives the input.
#[derive(Debug)]
pub struct NoParseError {
    /// Length of the input.
    pub tokens: usize,
}

impl fmt::Display for NoParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "NoParseError: the grammar cannot derive the input of {} tokens",
            self.tokens
        )
    }
}

impl Error for NoParseError {}

/// Error used when a model cannot be restored.
#[derive(Debug)]
pub struct SerializationError {
    pub(crate) msg: String,
}

impl fmt::Display for SerializationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SerializationError: {}", self.msg)
    }
}

impl Error for SerializationError {}

/// Error used when a hyperparameter is invalid.
#[derive(Debug)]
pub struct InvalidHyperparameterError {
    /// Name of the hyperparameter.
    pub arg: &'static str,

    pub(crate) msg: String,
}

impl fmt::Display for InvalidHyperparameterError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "InvalidHyperparameterError: {}: {}", self.arg, self.msg)
    }
}

impl Error for InvalidHyperparameterError {}

/// Error used when a tree is malformed.
#[derive(Debug)]
pub struct MalformedTreeError {
    pub(crate) msg: String,
}

impl fmt::Display for MalformedTreeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "MalformedTreeError: {}", self.msg)
    }
}

impl Error for MalformedTreeError {}

/// Error used when the optimizer fails.
#[derive(Debug)]
pub struct OptimizationError {
    pub(crate) msg: String,
}

impl fmt::Display for OptimizationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "OptimizationError: {}", self.msg)
    }
}

impl Error for OptimizationError {}

impl From<bincode::error::DecodeError> for RuseqError {
    fn from(error: bincode::error::DecodeError) -> Self {
        Self::serialization(error.to_string())
    }
}

impl From<bincode::error::EncodeError> for RuseqError {
    fn from(error: bincode::error::EncodeError) -> Self {
        Self::serialization(error.to_string())
    }
}

impl From<std::io::Error> for RuseqError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error)
    }
}

impl From<argmin::core::Error> for RuseqError {
    fn from(error: argmin::core::Error) -> Self {
        Self::optimization(error.to_string())
    }
}

/// A specialized Result type.
pub type Result<T, E = RuseqError> = core::result::Result<T, E>;
