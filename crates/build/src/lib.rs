//! Lines technique build utilities
//!
//! This crate parses declarative multi-pass render techniques from JSON or
//! YAML, validates them against their symbol table and target registry, and
//! compiles them into ExecutableTechnique structures that a renderer can bind
//! without further name resolution. It has no GPU dependency.

mod error;

pub mod predefined;
pub mod techniques;

pub use error::TechniqueError;

/// Compiles a technique definition file into an ExecutableTechnique
///
/// Files ending in `.yaml` or `.yml` are parsed as YAML, anything else as JSON.
/// Every program referenced by the technique must exist next to the definition
/// as `<program>.wgsl`.
///
/// # Arguments
/// * `technique_filepath` - Path to the technique definition
///
/// # Returns
/// The compiled technique and the WGSL source of each program it references
pub fn technique_file_to_executable(technique_filepath: &str) -> Result<(techniques::ExecutableTechnique, Vec<(String, String)>), Box<dyn std::error::Error>> {
    let path = std::path::Path::new(technique_filepath);
    let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
    let technique = techniques::ExecutableTechnique::from_file(path)?;

    let mut programs: Vec<(String, String)> = Vec::new();
    for pass in &technique.passes {
        if programs.iter().any(|(name, _)| *name == pass.program) {
            continue;
        }
        let program_path = dir.join(format!("{}.wgsl", pass.program));
        let code = std::fs::read_to_string(&program_path).inspect_err(|e| {
            tracing::error!(path = %program_path.display(), "error reading program: {e}");
        })?;
        programs.push((pass.program.clone(), code));
    }

    Ok((technique, programs))
}
