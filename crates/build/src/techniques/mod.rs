//! Technique definition, validation and compilation
//!
//! This module turns declarative technique definitions into executable
//! techniques: typed symbols, targets and passes are assembled into a graph,
//! validated against each other and compiled into a sequence-ordered list of
//! fully resolved passes.

mod executable_technique;
mod lifetime;
mod pass;
mod symbols;
mod targets;
mod technique_graph;
mod technique_spec;

pub use executable_technique::*;
pub use lifetime::{DependencyAnalysis, Diagnostic, PassAccess, TargetLifetime, analyze_dependencies};
pub use pass::*;
pub use symbols::*;
pub use targets::*;
pub use technique_graph::TechniqueGraph;
pub use technique_spec::*;
