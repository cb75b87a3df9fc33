//! Technique Definition Parser
//!
//! This module parses the external technique definition format, a nested
//! mapping with top-level `passes`, `sequence`, `symbols` and `targets` keys,
//! from JSON or YAML. Anything the format does not recognize is rejected here so
//! that only typed structures reach validation and execution.

use super::{
    ColorPolicy, CompareFunction, CullMode, DepthPolicy, DrawMode, Extent, OutputChannel, PassDescriptor, PassInput, SamplerFilterMode, ScaleFactor, SemanticRole, SizePolicy, SymbolTable, TargetFormat,
    TargetKind, TargetRegistry, TechniqueGraph,
};
use crate::TechniqueError;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;

/// Named declarations in the order they appear in the definition
///
/// Unlike a map, repeated names are kept so that registration reports them
/// instead of the last declaration silently winning.
#[derive(Debug, Clone)]
pub struct Declarations<T>(pub Vec<(String, T)>);

impl<T> Default for Declarations<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T> Declarations<T> {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First declaration with this name
    pub fn get(&self, name: &str) -> Option<&T> {
        self.0.iter().find(|(declared, _)| declared == name).map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl<'de, T> Deserialize<'de> for Declarations<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DeclarationsVisitor<T>(PhantomData<T>);

        impl<'de, T> Visitor<'de> for DeclarationsVisitor<T>
        where
            T: Deserialize<'de>,
        {
            type Value = Declarations<T>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a mapping of names to declarations")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut declarations = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, T>()? {
                    declarations.push(entry);
                }
                Ok(Declarations(declarations))
            }
        }

        deserializer.deserialize_map(DeclarationsVisitor(PhantomData))
    }
}

/// Symbol declaration, e.g. `{"semantic": "vertex"}`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SymbolSpec {
    pub semantic: SemanticRole,
}

/// Custom target declaration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct TargetSpec {
    /// Target kind (defaults to color)
    #[serde(rename = "type", default)]
    pub kind: Option<TargetKind>,
    /// Pixel format name (defaults to the kind's default format)
    #[serde(default)]
    pub format: Option<String>,
    /// Absolute size written as `"WIDTHxHEIGHT"`
    #[serde(default)]
    pub size: Option<String>,
    /// Size relative to the surface, used when `size` is absent
    #[serde(default)]
    pub scale_factor: Option<ScaleFactor>,
}

/// Draw mode keyword
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum DrawSpec {
    #[serde(rename = "DRAW_NODE")]
    Node,
    #[serde(rename = "DRAW_QUAD")]
    Quad,
}

/// Target input with sampler options
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetailedInputSpec {
    pub target: String,
    #[serde(default)]
    pub filter: Option<SamplerFilterMode>,
}

/// Value of an entry in a pass's `inputs` mapping
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum InputSpec {
    /// Symbol or target name
    Name(String),
    /// Target name with sampler options
    Detailed(DetailedInputSpec),
}

/// Clear color, either `"r g b a"` or `[r, g, b, a]`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ClearColorSpec {
    Text(String),
    Components([f32; 4]),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ColorStatesSpec {
    #[serde(default)]
    pub clear: bool,
    #[serde(default)]
    pub clear_color: Option<ClearColorSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct DepthStatesSpec {
    #[serde(default)]
    pub clear: bool,
    #[serde(default)]
    pub func: Option<CompareFunction>,
    #[serde(default)]
    pub enable_write: Option<bool>,
    #[serde(default)]
    pub enable_read: Option<bool>,
}

/// A single pass as written in the definition
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct PassSpec {
    #[serde(default)]
    pub outputs: BTreeMap<OutputChannel, String>,
    #[serde(default)]
    pub inputs: BTreeMap<String, InputSpec>,
    pub program: String,
    pub draw: DrawSpec,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub color_states: Option<ColorStatesSpec>,
    #[serde(default)]
    pub depth_states: Option<DepthStatesSpec>,
    #[serde(default)]
    pub cull_mode: CullMode,
}

/// Raw technique definition as parsed from JSON or YAML
///
/// Contains the unprocessed definition before name resolution and validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TechniqueSpec {
    #[serde(default)]
    pub passes: Declarations<PassSpec>,
    #[serde(default)]
    pub sequence: Vec<String>,
    #[serde(default)]
    pub symbols: Declarations<SymbolSpec>,
    #[serde(default)]
    pub targets: Declarations<TargetSpec>,
}

impl TechniqueSpec {
    /// Parses a technique definition from JSON content
    pub fn from_json(json_content: &str) -> Result<Self, TechniqueError> {
        serde_json::from_str(json_content).map_err(|e| TechniqueError::Parse(e.to_string()))
    }

    /// Parses a technique definition from YAML content
    pub fn from_yaml(yaml_content: &str) -> Result<Self, TechniqueError> {
        serde_norway::from_str(yaml_content).map_err(|e| TechniqueError::Parse(e.to_string()))
    }

    /// Parses a technique definition file
    ///
    /// Files ending in `.yaml` or `.yml` are read as YAML, everything else as JSON.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, TechniqueError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| TechniqueError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        match path.extension().and_then(|extension| extension.to_str()) {
            Some("yaml" | "yml") => Self::from_yaml(&content),
            _ => Self::from_json(&content),
        }
    }

    /// Converts the raw definition into a typed technique graph
    ///
    /// Symbols and targets are registered first, then every pass is converted,
    /// each in declaration order. A repeated pass name is an error, as is a
    /// repeated symbol or target whose declarations differ. Name resolution of
    /// pass bindings is left to compilation.
    pub fn into_graph(self) -> Result<TechniqueGraph, TechniqueError> {
        let mut symbols = SymbolTable::new();
        for (name, symbol) in self.symbols.iter() {
            symbols.define(name, symbol.semantic)?;
        }

        let mut targets = TargetRegistry::new();
        for (name, target) in self.targets.iter() {
            let kind = target.kind.unwrap_or(TargetKind::Color);
            let format = match &target.format {
                Some(format) => format.parse::<TargetFormat>().map_err(|_| TechniqueError::invalid_value(format!("targets.{name}.format"), format, "unknown target format"))?,
                None => TargetFormat::default_for(kind),
            };
            targets.define_target(name, kind, format, size_policy(name, target)?)?;
        }

        let mut graph = TechniqueGraph::new(symbols, targets)?;
        for (name, pass) in self.passes.0 {
            let descriptor = pass.into_descriptor(&name)?;
            graph.add_pass(name, descriptor)?;
        }

        Ok(graph.with_sequence(self.sequence))
    }
}

/// Derives the size policy of a target declaration
///
/// An explicit `size` wins; a `scaleFactor` next to it must be 1.
fn size_policy(name: &str, target: &TargetSpec) -> Result<SizePolicy, TechniqueError> {
    match (&target.size, target.scale_factor) {
        (Some(size), scale_factor) => {
            if scale_factor.is_some_and(|factor| !factor.is_unity()) {
                return Err(TechniqueError::InvalidTarget {
                    target: name.to_string(),
                    reason: "size and a non-unit scaleFactor cannot be combined".to_string(),
                });
            }
            let extent = size.parse::<Extent>().map_err(|_| TechniqueError::invalid_value(format!("targets.{name}.size"), size, "expected WIDTHxHEIGHT"))?;
            Ok(SizePolicy::Fixed(extent))
        }
        (None, scale_factor) => Ok(SizePolicy::Scaled(scale_factor.unwrap_or(ScaleFactor::ONE))),
    }
}

fn parse_clear_color(pass: &str, spec: &ClearColorSpec) -> Result<[f32; 4], TechniqueError> {
    match spec {
        ClearColorSpec::Components(components) => Ok(*components),
        ClearColorSpec::Text(text) => {
            let field = format!("passes.{pass}.colorStates.clearColor");
            let components = text
                .split_whitespace()
                .map(|component| component.parse::<f32>().map_err(|_| TechniqueError::invalid_value(&field, text, "expected four numbers")))
                .collect::<Result<Vec<_>, _>>()?;
            <[f32; 4]>::try_from(components).map_err(|_| TechniqueError::invalid_value(&field, text, "expected four numbers"))
        }
    }
}

impl PassSpec {
    /// Converts this raw pass into a typed descriptor
    fn into_descriptor(self, name: &str) -> Result<PassDescriptor, TechniqueError> {
        let draw = match (self.draw, self.node) {
            (DrawSpec::Node, Some(node)) => DrawMode::SceneNode(node),
            (DrawSpec::Node, None) => {
                return Err(TechniqueError::InvalidDrawMode {
                    pass: name.to_string(),
                    reason: "DRAW_NODE requires a node name".to_string(),
                });
            }
            (DrawSpec::Quad, None) => DrawMode::FullScreenQuad,
            (DrawSpec::Quad, Some(node)) => {
                return Err(TechniqueError::InvalidDrawMode {
                    pass: name.to_string(),
                    reason: format!("DRAW_QUAD does not draw node '{node}'"),
                });
            }
        };

        let color = match &self.color_states {
            Some(states) => ColorPolicy {
                clear: states.clear,
                clear_color: match &states.clear_color {
                    Some(clear_color) => parse_clear_color(name, clear_color)?,
                    None => ColorPolicy::default().clear_color,
                },
            },
            None => ColorPolicy::default(),
        };

        let depth = match &self.depth_states {
            Some(states) => {
                let defaults = DepthPolicy::default();
                DepthPolicy {
                    clear: states.clear,
                    compare: states.func.unwrap_or(defaults.compare),
                    write: states.enable_write.unwrap_or(defaults.write),
                    read: states.enable_read.unwrap_or(defaults.read),
                }
            }
            None => DepthPolicy::default(),
        };

        let inputs = self
            .inputs
            .into_iter()
            .map(|(shader_input, input)| {
                let input = match input {
                    InputSpec::Name(source) => PassInput::new(source),
                    InputSpec::Detailed(detailed) => PassInput {
                        source: detailed.target,
                        filter: Some(detailed.filter.unwrap_or_default()),
                    },
                };
                (shader_input, input)
            })
            .collect();

        Ok(PassDescriptor {
            outputs: self.outputs,
            inputs,
            program: self.program,
            draw,
            color,
            depth,
            cull_mode: self.cull_mode,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::techniques::{COLOR, DEPTH};

    const LINES_JSON: &str = r#"{
        "passes": {
            "prep-step": {
                "outputs": { "color": "NORMALS" },
                "inputs": {
                    "a_position": "position-symbol",
                    "a_normal": "normal-symbol",
                    "a_uv": "uv-symbol",
                    "modelViewProjection": "mvp-symbol",
                    "normalTransform": "nt-symbol"
                },
                "program": "prep",
                "draw": "DRAW_NODE",
                "node": "Bishop",
                "colorStates": { "clear": true, "clearColor": "1.0 0.0 0.5 1.0" },
                "depthStates": { "clear": true, "func": "lessEqual" }
            },
            "line-step": {
                "outputs": { "color": "COLOR" },
                "inputs": {
                    "colorSampler": "COLOR",
                    "depthSampler": "DEPTH",
                    "normalSampler": "NORMALS",
                    "a_position": "position-symbol"
                },
                "program": "lines",
                "draw": "DRAW_QUAD",
                "colorStates": { "clear": true, "clearColor": "0.5 0.0 0.5 1.0" }
            }
        },
        "sequence": ["prep-step", "line-step"],
        "symbols": {
            "position-symbol": { "semantic": "vertex" },
            "normal-symbol": { "semantic": "normal" },
            "uv-symbol": { "semantic": "texcoord" },
            "mvp-symbol": { "semantic": "modelViewProjectionTransform" },
            "nt-symbol": { "semantic": "normalTransform" }
        },
        "targets": {
            "NORMALS": { "type": "color", "format": "rgb", "size": "512x512", "scaleFactor": 1.0 }
        }
    }"#;

    #[test]
    fn test_parse_original_definition() {
        let spec = TechniqueSpec::from_json(LINES_JSON).unwrap();
        assert_eq!(spec.passes.len(), 2);
        assert_eq!(spec.sequence, vec!["prep-step", "line-step"]);
        assert_eq!(spec.symbols.get("mvp-symbol").unwrap().semantic, SemanticRole::ModelViewProjectionTransform);

        let graph = spec.into_graph().unwrap();
        let prep = &graph.passes()["prep-step"];
        assert_eq!(prep.draw, DrawMode::SceneNode("Bishop".to_string()));
        assert_eq!(prep.output(OutputChannel::Color), Some("NORMALS"));
        assert_eq!(prep.color.clear_color, [1.0, 0.0, 0.5, 1.0]);
        assert!(prep.depth.clear);
        assert_eq!(prep.depth.compare, CompareFunction::LessEqual);

        let lines = &graph.passes()["line-step"];
        assert_eq!(lines.draw, DrawMode::FullScreenQuad);
        assert_eq!(lines.inputs["depthSampler"].source, DEPTH);
        assert_eq!(lines.output(OutputChannel::Color), Some(COLOR));

        let normals = graph.targets().get("NORMALS").unwrap();
        assert_eq!(normals.format, TargetFormat::Rgb8);
        assert_eq!(normals.size, SizePolicy::Fixed(Extent::new(512, 512)));
    }

    #[test]
    fn test_parse_yaml_definition() {
        let yaml = r#"
passes:
  blur:
    outputs:
      color: HALF
    inputs:
      source:
        target: COLOR
        filter: nearest
      a_position: position-symbol
    program: blur
    draw: DRAW_QUAD
    cullMode: none
sequence: [blur]
symbols:
  position-symbol:
    semantic: vertex
targets:
  HALF:
    type: color
    format: rgba16f
    scaleFactor: "1/2"
"#;
        let graph = TechniqueSpec::from_yaml(yaml).unwrap().into_graph().unwrap();
        let blur = &graph.passes()["blur"];
        assert_eq!(blur.cull_mode, CullMode::None);
        assert_eq!(blur.inputs["source"].filter, Some(SamplerFilterMode::Nearest));

        let half = graph.targets().get("HALF").unwrap();
        assert_eq!(half.size.extent(Extent::new(800, 600)), Extent::new(400, 300));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let json = r#"{ "passes": {}, "sequence": [], "blendStates": {} }"#;
        assert!(matches!(TechniqueSpec::from_json(json), Err(TechniqueError::Parse(_))));

        let json = r#"{ "passes": { "p": { "program": "p", "draw": "DRAW_QUAD", "outputs": { "color": "COLOR" }, "stencilStates": {} } } }"#;
        assert!(matches!(TechniqueSpec::from_json(json), Err(TechniqueError::Parse(_))));
    }

    #[test]
    fn test_unknown_enumerations_are_rejected() {
        let unknown_draw = r#"{ "passes": { "p": { "program": "p", "draw": "DRAW_SCENE" } } }"#;
        assert!(matches!(TechniqueSpec::from_json(unknown_draw), Err(TechniqueError::Parse(_))));

        let unknown_semantic = r#"{ "symbols": { "s": { "semantic": "boneWeights" } } }"#;
        assert!(matches!(TechniqueSpec::from_json(unknown_semantic), Err(TechniqueError::Parse(_))));

        let unknown_channel = r#"{ "passes": { "p": { "program": "p", "draw": "DRAW_QUAD", "outputs": { "stencil": "COLOR" } } } }"#;
        assert!(matches!(TechniqueSpec::from_json(unknown_channel), Err(TechniqueError::Parse(_))));

        let unknown_format = r#"{ "targets": { "T": { "format": "bgra" } } }"#;
        let error = TechniqueSpec::from_json(unknown_format).unwrap().into_graph().unwrap_err();
        assert!(matches!(error, TechniqueError::InvalidValue { field, .. } if field == "targets.T.format"));
    }

    #[test]
    fn test_reserved_target_names_are_rejected() {
        let json = r#"{ "targets": { "COLOR": { "type": "color", "format": "rgba" } } }"#;
        let error = TechniqueSpec::from_json(json).unwrap().into_graph().unwrap_err();
        assert_eq!(error, TechniqueError::ReservedName(COLOR.to_string()));
    }

    #[test]
    fn test_draw_mode_node_consistency() {
        let missing_node = r#"{ "passes": { "p": { "program": "p", "draw": "DRAW_NODE", "outputs": { "color": "COLOR" } } } }"#;
        let error = TechniqueSpec::from_json(missing_node).unwrap().into_graph().unwrap_err();
        assert!(matches!(error, TechniqueError::InvalidDrawMode { .. }));

        let stray_node = r#"{ "passes": { "p": { "program": "p", "draw": "DRAW_QUAD", "node": "Bishop", "outputs": { "color": "COLOR" } } } }"#;
        let error = TechniqueSpec::from_json(stray_node).unwrap().into_graph().unwrap_err();
        assert!(matches!(error, TechniqueError::InvalidDrawMode { .. }));
    }

    #[test]
    fn test_clear_color_forms() {
        let json = r#"{ "passes": { "p": { "program": "p", "draw": "DRAW_QUAD", "outputs": { "color": "COLOR" }, "colorStates": { "clear": true, "clearColor": [0.1, 0.2, 0.3, 0.4] } } } }"#;
        let graph = TechniqueSpec::from_json(json).unwrap().into_graph().unwrap();
        assert_eq!(graph.passes()["p"].color.clear_color, [0.1, 0.2, 0.3, 0.4]);

        let json = r#"{ "passes": { "p": { "program": "p", "draw": "DRAW_QUAD", "outputs": { "color": "COLOR" }, "colorStates": { "clear": true, "clearColor": "1 0 0" } } } }"#;
        let error = TechniqueSpec::from_json(json).unwrap().into_graph().unwrap_err();
        assert!(matches!(error, TechniqueError::InvalidValue { .. }));
    }

    #[test]
    fn test_size_and_scale_factor_conflict() {
        let json = r#"{ "targets": { "T": { "size": "256x256", "scaleFactor": 0.5 } } }"#;
        let error = TechniqueSpec::from_json(json).unwrap().into_graph().unwrap_err();
        assert!(matches!(error, TechniqueError::InvalidTarget { target, .. } if target == "T"));
    }

    #[test]
    fn test_target_defaults() {
        let json = r#"{ "targets": { "T": {}, "Z": { "type": "depth" } } }"#;
        let graph = TechniqueSpec::from_json(json).unwrap().into_graph().unwrap();
        let t = graph.targets().get("T").unwrap();
        assert_eq!((t.kind, t.format, t.size), (TargetKind::Color, TargetFormat::Rgba8, SizePolicy::Scaled(ScaleFactor::ONE)));
        let z = graph.targets().get("Z").unwrap();
        assert_eq!(z.format, TargetFormat::Depth32Float);
    }

    #[test]
    fn test_repeated_pass_is_rejected() {
        let json = r#"{
            "passes": {
                "p": { "program": "a", "draw": "DRAW_QUAD", "outputs": { "color": "COLOR" } },
                "p": { "program": "b", "draw": "DRAW_QUAD", "outputs": { "color": "COLOR" } }
            },
            "sequence": ["p"]
        }"#;
        let spec = TechniqueSpec::from_json(json).unwrap();
        assert_eq!(spec.passes.len(), 2);
        assert_eq!(spec.into_graph().unwrap_err(), TechniqueError::DuplicatePass("p".to_string()));
    }

    #[test]
    fn test_repeated_symbol_is_rejected() {
        let json = r#"{ "symbols": { "s": { "semantic": "vertex" }, "s": { "semantic": "normal" } } }"#;
        let error = TechniqueSpec::from_json(json).unwrap().into_graph().unwrap_err();
        assert_eq!(error, TechniqueError::DuplicateSymbol("s".to_string()));

        let identical = r#"{ "symbols": { "s": { "semantic": "vertex" }, "s": { "semantic": "vertex" } } }"#;
        let graph = TechniqueSpec::from_json(identical).unwrap().into_graph().unwrap();
        assert_eq!(graph.symbols().resolve("s").unwrap(), SemanticRole::Vertex);
    }

    #[test]
    fn test_repeated_target_is_rejected() {
        let json = r#"{ "targets": { "T": { "format": "rgba" }, "T": { "format": "rgba16f" } } }"#;
        let error = TechniqueSpec::from_json(json).unwrap().into_graph().unwrap_err();
        assert_eq!(error, TechniqueError::DuplicateTarget("T".to_string()));

        let identical = r#"{ "targets": { "T": { "size": "64x64" }, "T": { "size": "64x64" } } }"#;
        let graph = TechniqueSpec::from_json(identical).unwrap().into_graph().unwrap();
        assert_eq!(graph.targets().get("T").unwrap().size, SizePolicy::Fixed(Extent::new(64, 64)));
    }

    #[test]
    fn test_missing_file() {
        let error = TechniqueSpec::from_file("does/not/exist.json").unwrap_err();
        assert!(matches!(error, TechniqueError::Io { .. }));
    }
}
