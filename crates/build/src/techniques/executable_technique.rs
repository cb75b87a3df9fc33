//! ExecutableTechnique compilation
//!
//! This module converts a validated technique graph into an ExecutableTechnique:
//! passes resolved against the symbol table and target registry, laid out in
//! sequence order, together with the custom targets to allocate, their
//! lifetimes and data flow diagnostics. Compilation never touches the GPU, so a
//! failure here cannot leave resources behind.

use super::{
    ColorPolicy, CullMode, DepthPolicy, Diagnostic, DrawMode, InputBinding, OutputChannel, PassAccess, PassDescriptor, SamplerFilterMode, SemanticRole, TargetDescriptor, TargetLifetime, TargetSlot, TechniqueGraph,
    TechniqueSpec, analyze_dependencies,
};
use crate::TechniqueError;
use serde::Serialize;

/// A technique compiled and ready to be bound to a surface
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutableTechnique {
    /// Custom targets to allocate while the technique is bound
    pub targets: Vec<CompiledTarget>,
    /// Passes in execution order
    pub passes: Vec<ExecutablePass>,
    /// Frame lifetimes of the custom targets
    pub lifetimes: Vec<TargetLifetime>,
    /// Non-fatal data flow findings
    pub diagnostics: Vec<Diagnostic>,
}

/// A custom target declaration carried into the compiled technique
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledTarget {
    pub name: String,
    pub descriptor: TargetDescriptor,
}

/// Target bound to an output channel of a pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputBinding {
    pub target: String,
    pub slot: TargetSlot,
    pub descriptor: TargetDescriptor,
}

/// Target sampled by a pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextureInput {
    /// Shader input name
    pub shader_input: String,
    /// Target name
    pub target: String,
    pub slot: TargetSlot,
    pub descriptor: TargetDescriptor,
    pub filter: SamplerFilterMode,
    /// The pass also writes this target; it must sample the contents from before the pass
    pub feedback: bool,
}

/// Symbol feeding a vertex stream or uniform value of a pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolInput {
    /// Shader input name
    pub shader_input: String,
    /// Symbol name
    pub symbol: String,
    pub role: SemanticRole,
}

/// A single pass within an executable technique
///
/// Contains everything needed to execute one pass: resolved output targets,
/// texture and symbol inputs in lexical shader-input order, and the pass
/// policies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutablePass {
    /// Pass name
    pub name: String,
    /// Program identifier
    pub program: String,
    pub draw: DrawMode,
    pub color_output: Option<OutputBinding>,
    pub depth_output: Option<OutputBinding>,
    pub texture_inputs: Vec<TextureInput>,
    pub symbol_inputs: Vec<SymbolInput>,
    pub color: ColorPolicy,
    pub depth: DepthPolicy,
    pub cull_mode: CullMode,
    /// Node draws without a depth output get a transient depth buffer sized like the color output
    pub scratch_depth: bool,
}

impl ExecutablePass {
    /// Output binding of a channel
    pub fn output(&self, channel: OutputChannel) -> Option<&OutputBinding> {
        match channel {
            OutputChannel::Color => self.color_output.as_ref(),
            OutputChannel::Depth => self.depth_output.as_ref(),
        }
    }

    /// Returns true if this pass writes the named target
    pub fn writes(&self, target: &str) -> bool {
        [&self.color_output, &self.depth_output].into_iter().flatten().any(|output| output.target == target)
    }

    /// Returns true if this pass samples the named target
    pub fn reads(&self, target: &str) -> bool {
        self.texture_inputs.iter().any(|input| input.target == target)
    }

    /// Symbol inputs supplying vertex streams, in shader-input order
    pub fn vertex_inputs(&self) -> impl Iterator<Item = &SymbolInput> {
        self.symbol_inputs.iter().filter(|input| input.role.is_vertex_attribute())
    }
}

impl ExecutableTechnique {
    /// Creates an ExecutableTechnique from JSON content
    ///
    /// # Arguments
    /// * `json_content` - JSON technique definition
    ///
    /// # Returns
    /// A compiled technique, or the first definition error
    pub fn from_json(json_content: &str) -> Result<Self, TechniqueError> {
        TechniqueSpec::from_json(json_content)?.compile()
    }

    /// Creates an ExecutableTechnique from YAML content
    pub fn from_yaml(yaml_content: &str) -> Result<Self, TechniqueError> {
        TechniqueSpec::from_yaml(yaml_content)?.compile()
    }

    /// Creates an ExecutableTechnique from a JSON or YAML file
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, TechniqueError> {
        TechniqueSpec::from_file(path)?.compile()
    }

    /// Looks up a pass by name
    pub fn pass(&self, name: &str) -> Option<&ExecutablePass> {
        self.passes.iter().find(|pass| pass.name == name)
    }

    /// Pass names in execution order
    pub fn sequence(&self) -> impl Iterator<Item = &str> {
        self.passes.iter().map(|pass| pass.name.as_str())
    }

    /// Looks up a custom target by name
    pub fn target(&self, name: &str) -> Option<&CompiledTarget> {
        self.targets.iter().find(|target| target.name == name)
    }

    /// Returns the lifetime of a custom target
    pub fn lifetime(&self, target: &str) -> Option<&TargetLifetime> {
        self.lifetimes.iter().find(|lifetime| lifetime.target == target)
    }
}

impl TechniqueSpec {
    /// Converts this definition into a graph and compiles it
    pub fn compile(self) -> Result<ExecutableTechnique, TechniqueError> {
        self.into_graph()?.compile()
    }
}

impl TechniqueGraph {
    /// Validates this graph and compiles it into an executable technique
    ///
    /// The sequence is checked first, then every pass in sequence order, so the
    /// reported error is the first one a reader of the sequence would hit.
    ///
    /// # Returns
    /// An ExecutableTechnique whose passes are in sequence order
    pub fn compile(&self) -> Result<ExecutableTechnique, TechniqueError> {
        TechniqueCompiler::new(self).compile()
    }

    /// Validates this graph without producing an executable technique
    pub fn validate(&self) -> Result<(), TechniqueError> {
        self.validate_sequence()?;
        for name in self.sequence() {
            if let Some(pass) = self.passes().get(name) {
                pass.validate(name, self.symbols(), self.targets())?;
            }
        }
        Ok(())
    }
}

/// Internal compiler turning a technique graph into an executable technique
struct TechniqueCompiler<'a> {
    graph: &'a TechniqueGraph,
}

impl<'a> TechniqueCompiler<'a> {
    fn new(graph: &'a TechniqueGraph) -> Self {
        Self { graph }
    }

    fn compile(self) -> Result<ExecutableTechnique, TechniqueError> {
        self.graph.validate_sequence()?;

        let mut passes = Vec::with_capacity(self.graph.sequence().len());
        let mut accesses = Vec::with_capacity(self.graph.sequence().len());
        for name in self.graph.sequence() {
            let descriptor = self.graph.passes().get(name).ok_or_else(|| TechniqueError::SequenceMismatch {
                missing: vec![],
                duplicated: vec![],
                unknown: vec![name.clone()],
            })?;
            let (pass, access) = self.compile_pass(name, descriptor)?;
            tracing::debug!(pass = %name, program = %pass.program, inputs = pass.texture_inputs.len() + pass.symbol_inputs.len(), "compiled pass");
            passes.push(pass);
            accesses.push(access);
        }

        let targets: Vec<CompiledTarget> = self
            .graph
            .targets()
            .custom_targets()
            .map(|(name, descriptor)| CompiledTarget {
                name: name.to_string(),
                descriptor: *descriptor,
            })
            .collect();

        let analysis = analyze_dependencies(&accesses, targets.iter().map(|target| target.name.as_str()), self.graph.symbols());
        for diagnostic in &analysis.diagnostics {
            tracing::warn!("{diagnostic}");
        }

        Ok(ExecutableTechnique {
            targets,
            passes,
            lifetimes: analysis.lifetimes,
            diagnostics: analysis.diagnostics,
        })
    }

    /// Resolves one pass and records its target accesses
    fn compile_pass(&self, name: &str, descriptor: &PassDescriptor) -> Result<(ExecutablePass, PassAccess), TechniqueError> {
        let outputs = descriptor.resolve_outputs(name, self.graph.targets())?;
        let inputs = descriptor.resolve_inputs(name, self.graph.symbols(), self.graph.targets())?;

        let mut color_output = None;
        let mut depth_output = None;
        for (channel, target, target_descriptor) in outputs {
            let binding = Some(OutputBinding {
                slot: self.slot(name, &target)?,
                target,
                descriptor: target_descriptor,
            });
            match channel {
                OutputChannel::Color => color_output = binding,
                OutputChannel::Depth => depth_output = binding,
            }
        }

        let mut writes = Vec::new();
        if let Some(output) = &color_output {
            writes.push((output.target.clone(), descriptor.color.clear));
        }
        if let Some(output) = &depth_output {
            writes.push((output.target.clone(), descriptor.depth.clear));
        }

        let mut texture_inputs = Vec::new();
        let mut symbol_inputs = Vec::new();
        for input in inputs {
            match input.binding {
                InputBinding::Symbol { symbol, role } => symbol_inputs.push(SymbolInput {
                    shader_input: input.shader_input,
                    symbol,
                    role,
                }),
                InputBinding::Target { target, descriptor, filter } => {
                    let feedback = writes.iter().any(|(written, _)| *written == target);
                    texture_inputs.push(TextureInput {
                        shader_input: input.shader_input,
                        slot: self.slot(name, &target)?,
                        target,
                        descriptor,
                        filter,
                        feedback,
                    });
                }
            }
        }

        let access = PassAccess {
            pass: name.to_string(),
            reads: texture_inputs.iter().map(|input| input.target.clone()).collect(),
            writes,
            symbols: symbol_inputs.iter().map(|input| input.symbol.clone()).collect(),
        };

        let scratch_depth = depth_output.is_none() && matches!(descriptor.draw, DrawMode::SceneNode(_));

        let pass = ExecutablePass {
            name: name.to_string(),
            program: descriptor.program.clone(),
            draw: descriptor.draw.clone(),
            color_output,
            depth_output,
            texture_inputs,
            symbol_inputs,
            color: descriptor.color,
            depth: descriptor.depth,
            cull_mode: descriptor.cull_mode,
            scratch_depth,
        };
        Ok((pass, access))
    }

    fn slot(&self, pass: &str, target: &str) -> Result<TargetSlot, TechniqueError> {
        self.graph.targets().slot(target).ok_or_else(|| TechniqueError::unresolved(pass, target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::techniques::{COLOR, CompareFunction, DEPTH, Extent, ScaleFactor, SizePolicy, SymbolTable, TargetFormat, TargetKind, TargetRegistry};

    fn lines_graph() -> TechniqueGraph {
        let mut symbols = SymbolTable::new();
        symbols.define("position-symbol", SemanticRole::Vertex).unwrap();
        symbols.define("normal-symbol", SemanticRole::Normal).unwrap();
        symbols.define("mvp-symbol", SemanticRole::ModelViewProjectionTransform).unwrap();
        symbols.define("nt-symbol", SemanticRole::NormalTransform).unwrap();

        let mut targets = TargetRegistry::new();
        targets
            .define_target("NORMALS", TargetKind::Color, TargetFormat::Rgb8, SizePolicy::Scaled(ScaleFactor::ONE))
            .unwrap();

        let prep = PassDescriptor::new("prep", DrawMode::SceneNode("Bishop".to_string()))
            .with_output(OutputChannel::Color, "NORMALS")
            .with_input("a_position", "position-symbol")
            .with_input("a_normal", "normal-symbol")
            .with_input("modelViewProjection", "mvp-symbol")
            .with_input("normalTransform", "nt-symbol")
            .with_color_clear([1.0, 0.0, 0.5, 1.0])
            .with_depth_clear(CompareFunction::Less);
        let lines = PassDescriptor::new("lines", DrawMode::FullScreenQuad)
            .with_output(OutputChannel::Color, COLOR)
            .with_input("colorSampler", COLOR)
            .with_input("depthSampler", DEPTH)
            .with_input("normalSampler", "NORMALS")
            .with_input("a_position", "position-symbol");

        TechniqueGraph::new(symbols, targets)
            .unwrap()
            .with_pass("prep", prep)
            .unwrap()
            .with_pass("lines", lines)
            .unwrap()
            .with_sequence(["prep", "lines"])
    }

    #[test]
    fn test_compile_lines_technique() {
        let technique = lines_graph().compile().unwrap();

        assert_eq!(technique.sequence().collect::<Vec<_>>(), vec!["prep", "lines"]);
        assert_eq!(technique.targets.len(), 1);
        assert_eq!(technique.targets[0].name, "NORMALS");
        assert!(technique.diagnostics.is_empty(), "{:?}", technique.diagnostics);

        let normals = technique.lifetime("NORMALS").unwrap();
        assert_eq!((normals.first_written, normals.last_read), (Some(0), Some(1)));
    }

    #[test]
    fn test_compiled_pass_layout() {
        let technique = lines_graph().compile().unwrap();

        let prep = technique.pass("prep").unwrap();
        assert!(prep.scratch_depth);
        assert!(prep.writes("NORMALS"));
        assert!(prep.texture_inputs.is_empty());
        let vertex_inputs: Vec<_> = prep.vertex_inputs().map(|input| input.shader_input.as_str()).collect();
        assert_eq!(vertex_inputs, vec!["a_normal", "a_position"]);

        let lines = technique.pass("lines").unwrap();
        assert!(!lines.scratch_depth);
        assert_eq!(lines.output(OutputChannel::Color).unwrap().target, COLOR);
        let textures: Vec<_> = lines.texture_inputs.iter().map(|input| (input.shader_input.as_str(), input.feedback)).collect();
        assert_eq!(textures, vec![("colorSampler", true), ("depthSampler", false), ("normalSampler", false)]);
        assert!(lines.reads("NORMALS"));

        let slots: Vec<_> = lines.texture_inputs.iter().map(|input| input.slot).collect();
        assert_eq!(slots, vec![TargetSlot::DefaultColor, TargetSlot::DefaultDepth, TargetSlot::Custom]);
        assert_eq!(lines.color_output.as_ref().unwrap().slot, TargetSlot::DefaultColor);
        assert_eq!(prep.color_output.as_ref().unwrap().slot, TargetSlot::Custom);
    }

    #[test]
    fn test_sequence_order_is_authoritative() {
        let technique = lines_graph().with_sequence(["lines", "prep"]).compile().unwrap();
        assert_eq!(technique.sequence().collect::<Vec<_>>(), vec!["lines", "prep"]);
        assert!(technique.diagnostics.iter().any(|diagnostic| matches!(diagnostic, Diagnostic::OrderContradiction { .. })));
    }

    #[test]
    fn test_incomplete_sequence_names_missing_pass() {
        let error = lines_graph().with_sequence(["prep"]).compile().unwrap_err();
        assert_eq!(
            error,
            TechniqueError::SequenceMismatch {
                missing: vec!["lines".to_string()],
                duplicated: vec![],
                unknown: vec![],
            }
        );
        assert!(error.to_string().contains("lines"));
    }

    #[test]
    fn test_unresolved_names_fail_compilation() {
        let mut graph = lines_graph();
        graph
            .add_pass(
                "extra",
                PassDescriptor::new("extra", DrawMode::FullScreenQuad)
                    .with_output(OutputChannel::Color, COLOR)
                    .with_input("a_uv", "uv-symbol"),
            )
            .unwrap();
        let error = graph.with_sequence(["prep", "lines", "extra"]).compile().unwrap_err();
        assert_eq!(error, TechniqueError::unresolved("extra", "uv-symbol"));
    }

    #[test]
    fn test_empty_technique_compiles() {
        let technique = TechniqueGraph::new(SymbolTable::new(), TargetRegistry::new()).unwrap().compile().unwrap();
        assert!(technique.passes.is_empty());
        assert!(technique.targets.is_empty());
    }

    #[test]
    fn test_fixed_size_target_is_carried() {
        let json = r#"{
            "passes": {
                "prep": { "outputs": { "color": "NORMALS" }, "program": "prep", "draw": "DRAW_NODE", "node": "Bishop" },
                "lines": { "outputs": { "color": "COLOR" }, "inputs": { "normalSampler": "NORMALS" }, "program": "lines", "draw": "DRAW_QUAD" }
            },
            "sequence": ["prep", "lines"],
            "targets": { "NORMALS": { "type": "color", "format": "rgb", "size": "512x512" } }
        }"#;
        let technique = ExecutableTechnique::from_json(json).unwrap();
        assert_eq!(technique.target("NORMALS").unwrap().descriptor.size, SizePolicy::Fixed(Extent::new(512, 512)));
    }
}
