//! Symbol table
//!
//! Symbols expose per-vertex streams and per-draw uniform values to shader
//! inputs. Each symbol carries a fixed semantic role that determines both the
//! data it supplies and how that data reaches the program.

use crate::TechniqueError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Semantic role of a symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SemanticRole {
    /// Per-vertex position
    Vertex,
    /// Per-vertex normal
    Normal,
    /// Per-vertex texture coordinate
    Texcoord,
    /// Per-vertex color
    Color,
    /// Per-vertex tangent
    Tangent,
    /// Node-to-world transform
    ModelTransform,
    /// World-to-view transform
    ViewTransform,
    /// View-to-clip transform
    ProjectionTransform,
    /// Node-to-view transform
    ModelViewTransform,
    /// Node-to-clip transform
    ModelViewProjectionTransform,
    /// Inverse transpose of the model-view transform
    NormalTransform,
    /// Seconds since the host started rendering
    Time,
    /// Pixel size of the pass render destination
    ViewportSize,
}

/// How a symbol reaches the program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SymbolBindingKind {
    /// Bound as a vertex buffer at the given shader location
    VertexAttribute {
        /// Shader location of the attribute
        location: u32,
    },
    /// Written into the per-pass uniform block
    Uniform,
}

impl SemanticRole {
    /// All roles, in declaration order
    pub const ALL: [SemanticRole; 13] = [
        Self::Vertex,
        Self::Normal,
        Self::Texcoord,
        Self::Color,
        Self::Tangent,
        Self::ModelTransform,
        Self::ViewTransform,
        Self::ProjectionTransform,
        Self::ModelViewTransform,
        Self::ModelViewProjectionTransform,
        Self::NormalTransform,
        Self::Time,
        Self::ViewportSize,
    ];

    /// Returns the name used for this role in technique definitions
    pub fn name(&self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::Normal => "normal",
            Self::Texcoord => "texcoord",
            Self::Color => "color",
            Self::Tangent => "tangent",
            Self::ModelTransform => "modelTransform",
            Self::ViewTransform => "viewTransform",
            Self::ProjectionTransform => "projectionTransform",
            Self::ModelViewTransform => "modelViewTransform",
            Self::ModelViewProjectionTransform => "modelViewProjectionTransform",
            Self::NormalTransform => "normalTransform",
            Self::Time => "time",
            Self::ViewportSize => "viewportSize",
        }
    }

    /// Returns how values of this role are bound
    pub fn binding_kind(&self) -> SymbolBindingKind {
        match self {
            Self::Vertex => SymbolBindingKind::VertexAttribute { location: 0 },
            Self::Normal => SymbolBindingKind::VertexAttribute { location: 1 },
            Self::Texcoord => SymbolBindingKind::VertexAttribute { location: 2 },
            Self::Color => SymbolBindingKind::VertexAttribute { location: 3 },
            Self::Tangent => SymbolBindingKind::VertexAttribute { location: 4 },
            _ => SymbolBindingKind::Uniform,
        }
    }

    /// Returns true if this role supplies a per-vertex stream
    pub fn is_vertex_attribute(&self) -> bool {
        matches!(self.binding_kind(), SymbolBindingKind::VertexAttribute { .. })
    }
}

impl fmt::Display for SemanticRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for SemanticRole {
    type Err = TechniqueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|role| role.name() == s)
            .ok_or_else(|| TechniqueError::invalid_value("semantic", s, "unknown semantic role"))
    }
}

/// Maps symbol names to semantic roles
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SymbolTable {
    symbols: BTreeMap<String, SemanticRole>,
}

impl SymbolTable {
    /// Creates an empty symbol table
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a symbol
    ///
    /// Redefining a symbol with the same role is a no-op; redefining it with a
    /// different role fails with [`TechniqueError::DuplicateSymbol`].
    pub fn define(&mut self, name: &str, role: SemanticRole) -> Result<(), TechniqueError> {
        match self.symbols.get(name) {
            Some(existing) if *existing == role => Ok(()),
            Some(_) => Err(TechniqueError::DuplicateSymbol(name.to_string())),
            None => {
                self.symbols.insert(name.to_string(), role);
                Ok(())
            }
        }
    }

    /// Looks up the role of a symbol
    pub fn resolve(&self, name: &str) -> Result<SemanticRole, TechniqueError> {
        self.symbols.get(name).copied().ok_or_else(|| TechniqueError::UnknownSymbol(name.to_string()))
    }

    /// Returns true if a symbol with this name exists
    pub fn contains(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    /// Iterates over symbols in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, SemanticRole)> {
        self.symbols.iter().map(|(name, role)| (name.as_str(), *role))
    }

    /// Number of defined symbols
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Returns true if no symbol is defined
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_and_resolve() {
        let mut table = SymbolTable::new();
        table.define("position-symbol", SemanticRole::Vertex).unwrap();
        table.define("mvp-symbol", SemanticRole::ModelViewProjectionTransform).unwrap();

        assert_eq!(table.resolve("position-symbol").unwrap(), SemanticRole::Vertex);
        assert_eq!(table.resolve("mvp-symbol").unwrap(), SemanticRole::ModelViewProjectionTransform);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_redefinition_with_same_role_is_idempotent() {
        let mut table = SymbolTable::new();
        table.define("uv-symbol", SemanticRole::Texcoord).unwrap();
        table.define("uv-symbol", SemanticRole::Texcoord).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_redefinition_with_different_role_fails() {
        let mut table = SymbolTable::new();
        table.define("uv-symbol", SemanticRole::Texcoord).unwrap();
        let error = table.define("uv-symbol", SemanticRole::Normal).unwrap_err();
        assert_eq!(error, TechniqueError::DuplicateSymbol("uv-symbol".to_string()));
        assert_eq!(table.resolve("uv-symbol").unwrap(), SemanticRole::Texcoord);
    }

    #[test]
    fn test_unknown_symbol() {
        let table = SymbolTable::new();
        assert_eq!(table.resolve("nt-symbol").unwrap_err(), TechniqueError::UnknownSymbol("nt-symbol".to_string()));
    }

    #[test]
    fn test_role_names_round_trip() {
        for role in SemanticRole::ALL {
            assert_eq!(role.name().parse::<SemanticRole>().unwrap(), role);
        }
        assert!("modelviewprojection".parse::<SemanticRole>().is_err());
    }

    #[test]
    fn test_binding_kinds() {
        assert_eq!(SemanticRole::Vertex.binding_kind(), SymbolBindingKind::VertexAttribute { location: 0 });
        assert_eq!(SemanticRole::Normal.binding_kind(), SymbolBindingKind::VertexAttribute { location: 1 });
        assert_eq!(SemanticRole::Texcoord.binding_kind(), SymbolBindingKind::VertexAttribute { location: 2 });
        assert_eq!(SemanticRole::NormalTransform.binding_kind(), SymbolBindingKind::Uniform);
        assert!(!SemanticRole::Time.is_vertex_attribute());
    }
}
