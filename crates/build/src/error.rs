//! Definition errors raised while parsing, assembling and compiling techniques
//!
//! Every error in this module is fatal to the bind attempt that produced it.
//! None of them can leave GPU state behind because compilation happens before
//! any resource is allocated.

use crate::techniques::{OutputChannel, TargetKind};

/// Errors that can occur while building or compiling a technique definition
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TechniqueError {
    /// The external definition could not be parsed
    #[error("failed to parse technique definition: {0}")]
    Parse(String),
    /// A definition file could not be read
    #[error("failed to read {path}: {reason}")]
    Io {
        /// File path
        path: String,
        /// Underlying IO error message
        reason: String,
    },
    /// A field holds a value outside its closed set of accepted values
    #[error("invalid value {value:?} for {field}: {reason}")]
    InvalidValue {
        /// Dotted path of the offending field
        field: String,
        /// The rejected value
        value: String,
        /// Why the value was rejected
        reason: String,
    },
    /// A symbol was defined twice with different semantic roles
    #[error("symbol '{0}' is already defined with a different semantic")]
    DuplicateSymbol(String),
    /// A symbol lookup failed
    #[error("unknown symbol '{0}'")]
    UnknownSymbol(String),
    /// A custom target was defined twice with different descriptors
    #[error("target '{0}' is already defined with a different descriptor")]
    DuplicateTarget(String),
    /// A custom target tried to redefine one of the default targets
    #[error("target name '{0}' is reserved for a default target")]
    ReservedName(String),
    /// Two passes share a name
    #[error("pass '{0}' is already defined")]
    DuplicatePass(String),
    /// A name was declared both as a symbol and as a target
    #[error("'{0}' is declared both as a symbol and as a target")]
    AmbiguousName(String),
    /// A custom target declaration is internally inconsistent
    #[error("invalid target '{target}': {reason}")]
    InvalidTarget {
        /// Target name
        target: String,
        /// Description of the problem
        reason: String,
    },
    /// A pass references a symbol or target that does not exist
    #[error("unresolved binding '{name}' in pass '{pass}'")]
    UnresolvedBinding {
        /// Pass holding the reference
        pass: String,
        /// The name that failed to resolve
        name: String,
    },
    /// An output channel is bound to a target of the wrong kind
    #[error("pass '{pass}' binds {channel} output to {kind} target '{target}'")]
    OutputKindMismatch {
        /// Pass holding the binding
        pass: String,
        /// Output channel
        channel: OutputChannel,
        /// Target bound to the channel
        target: String,
        /// Kind of the bound target
        kind: TargetKind,
    },
    /// A pass declares no output at all
    #[error("pass '{0}' declares no outputs")]
    PassMissingOutputs(String),
    /// Color and depth outputs of one pass do not share a size policy
    #[error("pass '{pass}' writes '{color}' and '{depth}' which do not share a size")]
    AttachmentSizeMismatch {
        /// Pass holding the outputs
        pass: String,
        /// Color output target
        color: String,
        /// Depth output target
        depth: String,
    },
    /// A pass samples the depth target it renders into
    #[error("pass '{pass}' samples depth target '{target}' while writing it")]
    DepthFeedback {
        /// Pass holding the bindings
        pass: String,
        /// Depth target both sampled and written
        target: String,
    },
    /// The draw mode and node reference of a pass disagree
    #[error("pass '{pass}': {reason}")]
    InvalidDrawMode {
        /// Pass name
        pass: String,
        /// Description of the problem
        reason: String,
    },
    /// The execution sequence is not a permutation of the declared passes
    #[error("sequence does not match passes (missing: {missing:?}, duplicated: {duplicated:?}, unknown: {unknown:?})")]
    SequenceMismatch {
        /// Declared passes absent from the sequence
        missing: Vec<String>,
        /// Passes listed more than once
        duplicated: Vec<String>,
        /// Sequence entries naming no declared pass
        unknown: Vec<String>,
    },
}

impl TechniqueError {
    pub(crate) fn invalid_value(field: impl Into<String>, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unresolved(pass: &str, name: &str) -> Self {
        Self::UnresolvedBinding {
            pass: pass.to_string(),
            name: name.to_string(),
        }
    }
}
