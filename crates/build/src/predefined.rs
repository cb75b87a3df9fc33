//! Predefined technique configurations.
//!
//! This module embeds the technique definitions shipped with the crate together
//! with the WGSL programs they reference, so renderers can bind them without
//! touching the filesystem.

use crate::TechniqueError;
use crate::techniques::{ExecutableTechnique, TechniqueSpec};

/// Encoding of an embedded technique definition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionFormat {
    Json,
    Yaml,
}

/// A technique definition embedded in the crate
#[derive(Debug, Clone, Copy)]
pub struct PredefinedTechnique {
    /// Name used to look the technique up
    pub name: &'static str,
    /// Path of the definition relative to the crate root
    pub path: &'static str,
    pub format: DefinitionFormat,
    /// Definition source
    pub definition: &'static str,
    /// Program name to WGSL source
    pub programs: &'static [(&'static str, &'static str)],
}

impl PredefinedTechnique {
    /// Parses the embedded definition
    pub fn spec(&self) -> Result<TechniqueSpec, TechniqueError> {
        match self.format {
            DefinitionFormat::Json => TechniqueSpec::from_json(self.definition),
            DefinitionFormat::Yaml => TechniqueSpec::from_yaml(self.definition),
        }
    }

    /// Parses and compiles the embedded definition
    pub fn compile(&self) -> Result<ExecutableTechnique, TechniqueError> {
        self.spec()?.compile()
    }

    /// WGSL source of a program used by this technique
    pub fn program(&self, name: &str) -> Option<&'static str> {
        self.programs.iter().find(|(program, _)| *program == name).map(|(_, source)| *source)
    }
}

/// A list of predefined techniques.
///
/// `LINES` renders normals of the "Bishop" node into a custom target, then
/// draws lines where depth or normals change sharply. `DEPTH_LINES` uses depth
/// discontinuities only and needs no custom target.
pub const PREDEFINED_TECHNIQUES: &[PredefinedTechnique] = &[
    PredefinedTechnique {
        name: "LINES",
        path: "techniques/lines/technique.json",
        format: DefinitionFormat::Json,
        definition: include_str!("../techniques/lines/technique.json"),
        programs: &[("prep", include_str!("../techniques/lines/prep.wgsl")), ("lines", include_str!("../techniques/lines/lines.wgsl"))],
    },
    PredefinedTechnique {
        name: "DEPTH_LINES",
        path: "techniques/depth_lines/technique.yaml",
        format: DefinitionFormat::Yaml,
        definition: include_str!("../techniques/depth_lines/technique.yaml"),
        programs: &[("depth_lines", include_str!("../techniques/depth_lines/depth_lines.wgsl"))],
    },
];

/// Looks up a predefined technique by name
pub fn find_predefined(name: &str) -> Option<&'static PredefinedTechnique> {
    PREDEFINED_TECHNIQUES.iter().find(|technique| technique.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::techniques::{COLOR, DrawMode};

    #[test]
    fn test_every_predefined_technique_compiles() {
        for predefined in PREDEFINED_TECHNIQUES {
            let technique = predefined.compile().unwrap_or_else(|e| panic!("{} failed to compile: {e}", predefined.name));
            for pass in &technique.passes {
                assert!(predefined.program(&pass.program).is_some(), "{} lacks program {}", predefined.name, pass.program);
            }
        }
    }

    #[test]
    fn test_lines_technique_layout() {
        let technique = find_predefined("LINES").unwrap().compile().unwrap();
        assert_eq!(technique.sequence().collect::<Vec<_>>(), vec!["prep-step", "line-step"]);

        let prep = technique.pass("prep-step").unwrap();
        assert_eq!(prep.draw, DrawMode::SceneNode("Bishop".to_string()));
        assert!(prep.scratch_depth);

        let lines = technique.pass("line-step").unwrap();
        assert_eq!(lines.program, "lines");
        assert!(lines.writes(COLOR));
        assert!(lines.reads("NORMALS"));
        assert!(technique.diagnostics.is_empty(), "{:?}", technique.diagnostics);
    }

    #[test]
    fn test_programs_declare_a_sampler_per_texture_input() {
        for predefined in PREDEFINED_TECHNIQUES {
            let technique = predefined.compile().unwrap();
            for pass in &technique.passes {
                let source = predefined.program(&pass.program).unwrap();
                for index in 0..pass.texture_inputs.len() {
                    let texture = format!("@group(0) @binding({}) var ", 1 + 2 * index);
                    let sampler = format!("@group(0) @binding({}) var ", 2 + 2 * index);
                    let texture_line = source.lines().find(|line| line.starts_with(&texture));
                    let sampler_line = source.lines().find(|line| line.starts_with(&sampler));
                    assert!(texture_line.is_some_and(|line| line.contains("texture_")), "{}: no texture at {texture}", pass.program);
                    assert!(sampler_line.is_some_and(|line| line.ends_with(": sampler;")), "{}: no sampler at {sampler}", pass.program);
                }
            }
        }
    }

    #[test]
    fn test_unknown_predefined_technique() {
        assert!(find_predefined("SKETCH").is_none());
    }
}
