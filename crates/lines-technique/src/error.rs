//! Runtime errors raised while binding and executing techniques

use lines_technique_build::TechniqueError;

/// Errors reported by a render backend
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    /// The program library has no program with this name
    #[error("program '{0}' not found")]
    ProgramNotFound(String),
    /// The program exists but could not be turned into a pipeline
    #[error("program '{program}' is invalid: {reason}")]
    InvalidProgram { program: String, reason: String },
    /// A target could not be allocated
    #[error("failed to allocate target '{target}': {reason}")]
    Allocation { target: String, reason: String },
    /// A handle does not refer to a live resource
    #[error("unknown resource handle {0}")]
    UnknownHandle(u64),
    /// A per-frame call was made outside of a frame
    #[error("no frame in progress")]
    NoActiveFrame,
    /// A per-pass call was made outside of a pass
    #[error("no pass in progress")]
    NoActivePass,
    /// The device reported an error while recording or submitting work
    #[error("device error: {0}")]
    Device(String),
}

/// Errors that prevent a technique from being bound
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BindError {
    /// The technique definition is invalid
    #[error(transparent)]
    Technique(#[from] TechniqueError),
    /// A pass references a program the backend does not know
    #[error("pass '{pass}' uses unknown program '{program}'")]
    ProgramNotFound { pass: String, program: String },
    /// A program exists but failed to load
    #[error("pass '{pass}' failed to load program '{program}': {source}")]
    Program {
        pass: String,
        program: String,
        #[source]
        source: BackendError,
    },
    /// A custom target could not be allocated
    #[error("failed to allocate target '{target}': {source}")]
    TargetAllocation {
        target: String,
        #[source]
        source: BackendError,
    },
}

impl BindError {
    /// Wraps a program load failure with the pass it happened in
    pub(crate) fn program(pass: &str, program: &str, source: BackendError) -> Self {
        match source {
            BackendError::ProgramNotFound(_) => Self::ProgramNotFound {
                pass: pass.to_string(),
                program: program.to_string(),
            },
            source => Self::Program {
                pass: pass.to_string(),
                program: program.to_string(),
                source,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_not_found_names_pass() {
        let error = BindError::program("line-step", "lines", BackendError::ProgramNotFound("lines".to_string()));
        assert_eq!(
            error,
            BindError::ProgramNotFound {
                pass: "line-step".to_string(),
                program: "lines".to_string(),
            }
        );
        assert_eq!(error.to_string(), "pass 'line-step' uses unknown program 'lines'");
    }

    #[test]
    fn test_technique_errors_are_transparent() {
        let error = BindError::from(TechniqueError::DuplicatePass("prep".to_string()));
        assert_eq!(error.to_string(), "pass 'prep' is already defined");
    }
}
