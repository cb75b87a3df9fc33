//! Ready-made line rendering techniques
//!
//! Each preset pairs a predefined technique definition with the programs it
//! needs, so hosts can bind an outline effect without shipping any files.

use crate::wgpu_backend::ProgramLibrary;
use lines_technique_build::TechniqueError;
use lines_technique_build::predefined::{PREDEFINED_TECHNIQUES, PredefinedTechnique};
use lines_technique_build::techniques::ExecutableTechnique;
use std::fmt;
use std::str::FromStr;

/// Line rendering presets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinesPreset {
    /// Normals of the "Bishop" node combined with scene depth
    Lines,
    /// Depth discontinuities only, without custom targets
    DepthLines,
}

impl LinesPreset {
    pub const ALL: [LinesPreset; 2] = [LinesPreset::Lines, LinesPreset::DepthLines];

    /// Returns the name of the predefined technique behind this preset
    pub fn name(&self) -> &'static str {
        self.predefined().name
    }

    /// Returns the predefined technique behind this preset
    pub fn predefined(&self) -> &'static PredefinedTechnique {
        match self {
            LinesPreset::Lines => &PREDEFINED_TECHNIQUES[0],
            LinesPreset::DepthLines => &PREDEFINED_TECHNIQUES[1],
        }
    }

    /// Compiles the technique of this preset
    ///
    /// # Returns
    /// The executable technique, ready to be bound
    pub fn compile(&self) -> Result<ExecutableTechnique, TechniqueError> {
        self.predefined().compile()
    }

    /// Returns a program library holding every program this preset uses
    pub fn program_library(&self) -> ProgramLibrary {
        ProgramLibrary::from_predefined(self.predefined())
    }
}

impl fmt::Display for LinesPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LinesPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|preset| preset.name().eq_ignore_ascii_case(s) || preset.name().replace('_', "-").eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown preset '{s}', expected one of: {}", Self::ALL.map(|preset| preset.name()).join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_names() {
        assert_eq!(LinesPreset::Lines.name(), "LINES");
        assert_eq!(LinesPreset::DepthLines.name(), "DEPTH_LINES");
        assert_eq!(LinesPreset::DepthLines.to_string(), "DEPTH_LINES");
    }

    #[test]
    fn test_preset_from_str() {
        assert_eq!("lines".parse::<LinesPreset>(), Ok(LinesPreset::Lines));
        assert_eq!("depth-lines".parse::<LinesPreset>(), Ok(LinesPreset::DepthLines));
        assert_eq!("DEPTH_LINES".parse::<LinesPreset>(), Ok(LinesPreset::DepthLines));
        assert!("sketch".parse::<LinesPreset>().unwrap_err().contains("LINES, DEPTH_LINES"));
    }

    #[test]
    fn test_presets_compile_with_their_programs() {
        for preset in LinesPreset::ALL {
            let technique = preset.compile().unwrap();
            let library = preset.program_library();
            for pass in &technique.passes {
                assert!(library.contains(&pass.program), "{preset} lacks program {}", pass.program);
            }
        }
    }
}
