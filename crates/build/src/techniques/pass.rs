//! Pass descriptors
//!
//! A pass is the unit of work of a technique: it binds its output targets as
//! the render destination, applies its clear policies, binds its inputs and
//! invokes its program with a draw mode.

use super::{SemanticRole, SymbolTable, TargetDescriptor, TargetKind, TargetRegistry};
use crate::TechniqueError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Logical output channel of a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputChannel {
    /// Fragment color output
    Color,
    /// Depth attachment
    Depth,
}

impl OutputChannel {
    /// Kind of target this channel must be bound to
    pub fn target_kind(&self) -> TargetKind {
        match self {
            Self::Color => TargetKind::Color,
            Self::Depth => TargetKind::Depth,
        }
    }
}

impl fmt::Display for OutputChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Color => write!(f, "color"),
            Self::Depth => write!(f, "depth"),
        }
    }
}

/// Texture sampling filter modes
#[derive(Default, Debug, Clone, Copy, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub enum SamplerFilterMode {
    /// Nearest neighbor filtering - sharp, pixelated
    #[serde(rename = "nearest")]
    Nearest,
    /// Linear interpolation filtering - smooth, blurred
    #[default]
    #[serde(rename = "linear")]
    Linear,
}

/// Depth comparison function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CompareFunction {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

/// Face culling mode
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

/// What a pass draws
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DrawMode {
    /// Geometry of exactly one scene node, looked up by name at draw time
    SceneNode(String),
    /// A single screen-covering quad with no scene geometry
    FullScreenQuad,
}

/// Color buffer policy of a pass
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ColorPolicy {
    /// Clear the color output before drawing
    pub clear: bool,
    /// Clear value, RGBA
    pub clear_color: [f32; 4],
}

impl Default for ColorPolicy {
    fn default() -> Self {
        Self {
            clear: false,
            clear_color: [0.0, 0.0, 0.0, 0.0],
        }
    }
}

/// Depth buffer policy of a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DepthPolicy {
    /// Clear the depth buffer before drawing
    pub clear: bool,
    /// Comparison applied when depth testing
    pub compare: CompareFunction,
    /// Whether fragments write depth
    pub write: bool,
    /// Whether fragments are depth tested
    pub read: bool,
}

impl Default for DepthPolicy {
    fn default() -> Self {
        Self {
            clear: false,
            compare: CompareFunction::Less,
            write: true,
            read: true,
        }
    }
}

impl DepthPolicy {
    /// Comparison actually applied, taking `read` into account
    pub fn effective_compare(&self) -> CompareFunction {
        if self.read { self.compare } else { CompareFunction::Always }
    }
}

/// A shader input declaration before name resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassInput {
    /// Symbol or target name feeding the input
    pub source: String,
    /// Sampler filter, only meaningful for target inputs
    pub filter: Option<SamplerFilterMode>,
}

impl PassInput {
    pub fn new(source: impl Into<String>) -> Self {
        Self { source: source.into(), filter: None }
    }
}

/// How a resolved input reaches the program
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum InputBinding {
    /// Vertex stream or uniform value supplied by a symbol
    Symbol { symbol: String, role: SemanticRole },
    /// Target sampled as a texture
    Target {
        target: String,
        descriptor: TargetDescriptor,
        filter: SamplerFilterMode,
    },
}

/// A shader input after resolution against the symbol table and target registry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedInput {
    /// Shader input name
    pub shader_input: String,
    pub binding: InputBinding,
}

/// Declarative description of one pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassDescriptor {
    /// Output channel to target name
    pub outputs: BTreeMap<OutputChannel, String>,
    /// Shader input name to source
    pub inputs: BTreeMap<String, PassInput>,
    /// Identifier of the vertex+fragment program pair
    pub program: String,
    pub draw: DrawMode,
    pub color: ColorPolicy,
    pub depth: DepthPolicy,
    pub cull_mode: CullMode,
}

impl PassDescriptor {
    /// Creates a pass with no bindings and default policies
    pub fn new(program: impl Into<String>, draw: DrawMode) -> Self {
        Self {
            outputs: BTreeMap::new(),
            inputs: BTreeMap::new(),
            program: program.into(),
            draw,
            color: ColorPolicy::default(),
            depth: DepthPolicy::default(),
            cull_mode: CullMode::default(),
        }
    }

    /// Binds an output channel to a target
    pub fn with_output(mut self, channel: OutputChannel, target: impl Into<String>) -> Self {
        self.outputs.insert(channel, target.into());
        self
    }

    /// Feeds a shader input from a symbol or target
    pub fn with_input(mut self, shader_input: impl Into<String>, source: impl Into<String>) -> Self {
        self.inputs.insert(shader_input.into(), PassInput::new(source));
        self
    }

    /// Clears the color output before drawing
    pub fn with_color_clear(mut self, clear_color: [f32; 4]) -> Self {
        self.color = ColorPolicy { clear: true, clear_color };
        self
    }

    /// Clears depth before drawing and tests with `compare`
    pub fn with_depth_clear(mut self, compare: CompareFunction) -> Self {
        self.depth.clear = true;
        self.depth.compare = compare;
        self
    }

    /// Target bound to an output channel, if any
    pub fn output(&self, channel: OutputChannel) -> Option<&str> {
        self.outputs.get(&channel).map(String::as_str)
    }

    /// Checks every binding of this pass
    ///
    /// Verifies that every output and input name resolves, that each output
    /// channel is bound to a target of the matching kind, and that the draw
    /// mode is consistent.
    ///
    /// # Arguments
    /// * `name` - Name of this pass, used in error reports
    /// * `symbols` - Symbol table of the technique
    /// * `targets` - Target registry of the technique
    pub fn validate(&self, name: &str, symbols: &SymbolTable, targets: &TargetRegistry) -> Result<(), TechniqueError> {
        self.resolve_outputs(name, targets)?;
        self.resolve_inputs(name, symbols, targets)?;
        Ok(())
    }

    /// Resolves output bindings to target descriptors
    pub fn resolve_outputs(&self, name: &str, targets: &TargetRegistry) -> Result<Vec<(OutputChannel, String, TargetDescriptor)>, TechniqueError> {
        if self.outputs.is_empty() {
            return Err(TechniqueError::PassMissingOutputs(name.to_string()));
        }

        match &self.draw {
            DrawMode::SceneNode(node) if node.is_empty() => {
                return Err(TechniqueError::InvalidDrawMode {
                    pass: name.to_string(),
                    reason: "DRAW_NODE requires a node name".to_string(),
                });
            }
            _ => {}
        }

        let mut resolved = Vec::with_capacity(self.outputs.len());
        for (channel, target) in &self.outputs {
            let descriptor = targets.resolve(name, target)?;
            if descriptor.kind != channel.target_kind() {
                return Err(TechniqueError::OutputKindMismatch {
                    pass: name.to_string(),
                    channel: *channel,
                    target: target.clone(),
                    kind: descriptor.kind,
                });
            }
            resolved.push((*channel, target.clone(), *descriptor));
        }

        if let (Some(color), Some(depth)) = (self.output(OutputChannel::Color), self.output(OutputChannel::Depth)) {
            let color_size = targets.get(color).map(|target| target.size);
            let depth_size = targets.get(depth).map(|target| target.size);
            if color_size != depth_size {
                return Err(TechniqueError::AttachmentSizeMismatch {
                    pass: name.to_string(),
                    color: color.to_string(),
                    depth: depth.to_string(),
                });
            }
        }

        Ok(resolved)
    }

    /// Resolves every input to a symbol or target binding
    pub fn resolve_inputs(&self, name: &str, symbols: &SymbolTable, targets: &TargetRegistry) -> Result<Vec<ResolvedInput>, TechniqueError> {
        self.inputs
            .iter()
            .map(|(shader_input, input)| {
                let binding = match (symbols.contains(&input.source), targets.get(&input.source)) {
                    (true, Some(_)) => return Err(TechniqueError::AmbiguousName(input.source.clone())),
                    (true, None) => {
                        if input.filter.is_some() {
                            return Err(TechniqueError::invalid_value(
                                format!("passes.{name}.inputs.{shader_input}"),
                                &input.source,
                                "sampler options apply to target inputs only",
                            ));
                        }
                        InputBinding::Symbol {
                            symbol: input.source.clone(),
                            role: symbols.resolve(&input.source)?,
                        }
                    }
                    (false, Some(descriptor)) => {
                        // Depth attachments cannot be snapshotted mid-pass
                        if self.output(OutputChannel::Depth) == Some(input.source.as_str()) {
                            return Err(TechniqueError::DepthFeedback {
                                pass: name.to_string(),
                                target: input.source.clone(),
                            });
                        }
                        InputBinding::Target {
                            target: input.source.clone(),
                            descriptor: *descriptor,
                            filter: input.filter.unwrap_or_default(),
                        }
                    }
                    (false, None) => return Err(TechniqueError::unresolved(name, &input.source)),
                };
                Ok(ResolvedInput {
                    shader_input: shader_input.clone(),
                    binding,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::techniques::{COLOR, DEPTH, Extent, ScaleFactor, SizePolicy, TargetFormat};

    fn registry() -> (SymbolTable, TargetRegistry) {
        let mut symbols = SymbolTable::new();
        symbols.define("position-symbol", SemanticRole::Vertex).unwrap();
        symbols.define("mvp-symbol", SemanticRole::ModelViewProjectionTransform).unwrap();

        let mut targets = TargetRegistry::new();
        targets
            .define_target("NORMALS", TargetKind::Color, TargetFormat::Rgb8, SizePolicy::Fixed(Extent::new(512, 512)))
            .unwrap();
        targets
            .define_target("SHADOW", TargetKind::Depth, TargetFormat::Depth32Float, SizePolicy::Scaled(ScaleFactor::ONE))
            .unwrap();
        (symbols, targets)
    }

    fn lines_pass() -> PassDescriptor {
        PassDescriptor::new("lines", DrawMode::FullScreenQuad)
            .with_output(OutputChannel::Color, COLOR)
            .with_input("colorSampler", COLOR)
            .with_input("depthSampler", DEPTH)
            .with_input("normalSampler", "NORMALS")
            .with_input("a_position", "position-symbol")
    }

    #[test]
    fn test_valid_pass() {
        let (symbols, targets) = registry();
        lines_pass().validate("lines", &symbols, &targets).unwrap();
    }

    #[test]
    fn test_resolved_inputs_are_tagged() {
        let (symbols, targets) = registry();
        let inputs = lines_pass().resolve_inputs("lines", &symbols, &targets).unwrap();

        let position = inputs.iter().find(|input| input.shader_input == "a_position").unwrap();
        assert_eq!(
            position.binding,
            InputBinding::Symbol {
                symbol: "position-symbol".to_string(),
                role: SemanticRole::Vertex
            }
        );

        let depth = inputs.iter().find(|input| input.shader_input == "depthSampler").unwrap();
        assert!(matches!(&depth.binding, InputBinding::Target { target, descriptor, .. } if target == DEPTH && descriptor.kind == TargetKind::Depth));
    }

    #[test]
    fn test_unresolved_symbol_input() {
        let (symbols, targets) = registry();
        let pass = lines_pass().with_input("a_uv", "uv-symbol");
        let error = pass.validate("lines", &symbols, &targets).unwrap_err();
        assert_eq!(error, TechniqueError::unresolved("lines", "uv-symbol"));
    }

    #[test]
    fn test_unresolved_output_target() {
        let (symbols, targets) = registry();
        let pass = PassDescriptor::new("prep", DrawMode::SceneNode("Bishop".to_string())).with_output(OutputChannel::Color, "NORMAL");
        let error = pass.validate("prep", &symbols, &targets).unwrap_err();
        assert_eq!(error, TechniqueError::unresolved("prep", "NORMAL"));
    }

    #[test]
    fn test_color_channel_rejects_depth_target() {
        let (symbols, targets) = registry();
        let pass = PassDescriptor::new("prep", DrawMode::FullScreenQuad).with_output(OutputChannel::Color, DEPTH);
        let error = pass.validate("prep", &symbols, &targets).unwrap_err();
        assert_eq!(
            error,
            TechniqueError::OutputKindMismatch {
                pass: "prep".to_string(),
                channel: OutputChannel::Color,
                target: DEPTH.to_string(),
                kind: TargetKind::Depth,
            }
        );
    }

    #[test]
    fn test_depth_channel_rejects_color_target() {
        let (symbols, targets) = registry();
        let pass = PassDescriptor::new("prep", DrawMode::FullScreenQuad).with_output(OutputChannel::Depth, "NORMALS");
        assert!(matches!(pass.validate("prep", &symbols, &targets), Err(TechniqueError::OutputKindMismatch { .. })));
    }

    #[test]
    fn test_pass_without_outputs() {
        let (symbols, targets) = registry();
        let pass = PassDescriptor::new("prep", DrawMode::FullScreenQuad);
        assert_eq!(pass.validate("prep", &symbols, &targets).unwrap_err(), TechniqueError::PassMissingOutputs("prep".to_string()));
    }

    #[test]
    fn test_attachment_sizes_must_agree() {
        let (symbols, targets) = registry();
        let pass = PassDescriptor::new("prep", DrawMode::SceneNode("Bishop".to_string()))
            .with_output(OutputChannel::Color, "NORMALS")
            .with_output(OutputChannel::Depth, "SHADOW");
        assert!(matches!(pass.validate("prep", &symbols, &targets), Err(TechniqueError::AttachmentSizeMismatch { .. })));

        let pass = PassDescriptor::new("prep", DrawMode::SceneNode("Bishop".to_string()))
            .with_output(OutputChannel::Color, COLOR)
            .with_output(OutputChannel::Depth, "SHADOW");
        pass.validate("prep", &symbols, &targets).unwrap();
    }

    #[test]
    fn test_sampling_written_depth_target_is_rejected() {
        let (symbols, targets) = registry();
        let pass = PassDescriptor::new("prep", DrawMode::SceneNode("Bishop".to_string()))
            .with_output(OutputChannel::Color, COLOR)
            .with_output(OutputChannel::Depth, DEPTH)
            .with_input("depthSampler", DEPTH);
        let error = pass.validate("prep", &symbols, &targets).unwrap_err();
        assert_eq!(
            error,
            TechniqueError::DepthFeedback {
                pass: "prep".to_string(),
                target: DEPTH.to_string(),
            }
        );
        assert!(error.to_string().contains("prep") && error.to_string().contains(DEPTH));

        // Color feedback stays allowed
        let pass = PassDescriptor::new("prep", DrawMode::SceneNode("Bishop".to_string()))
            .with_output(OutputChannel::Color, COLOR)
            .with_output(OutputChannel::Depth, DEPTH)
            .with_input("colorSampler", COLOR);
        pass.validate("prep", &symbols, &targets).unwrap();
    }

    #[test]
    fn test_draw_node_requires_name() {
        let (symbols, targets) = registry();
        let pass = PassDescriptor::new("prep", DrawMode::SceneNode(String::new())).with_output(OutputChannel::Color, "NORMALS");
        assert!(matches!(pass.validate("prep", &symbols, &targets), Err(TechniqueError::InvalidDrawMode { .. })));
    }

    #[test]
    fn test_sampler_filter_on_symbol_is_rejected() {
        let (symbols, targets) = registry();
        let mut pass = lines_pass();
        pass.inputs.insert(
            "a_position".to_string(),
            PassInput {
                source: "position-symbol".to_string(),
                filter: Some(SamplerFilterMode::Nearest),
            },
        );
        assert!(matches!(pass.validate("lines", &symbols, &targets), Err(TechniqueError::InvalidValue { .. })));
    }

    #[test]
    fn test_name_shared_by_symbol_and_target_is_ambiguous() {
        let (mut symbols, targets) = registry();
        symbols.define("NORMALS", SemanticRole::Normal).unwrap();
        let error = lines_pass().validate("lines", &symbols, &targets).unwrap_err();
        assert_eq!(error, TechniqueError::AmbiguousName("NORMALS".to_string()));
    }

    #[test]
    fn test_depth_read_disabled_compares_always() {
        let policy = DepthPolicy {
            read: false,
            ..DepthPolicy::default()
        };
        assert_eq!(policy.effective_compare(), CompareFunction::Always);
        assert_eq!(DepthPolicy::default().effective_compare(), CompareFunction::Less);
    }
}
