//! Symbol evaluation
//!
//! Turns semantic roles into the values a draw supplies for them: transform
//! matrices derived from the node and camera, the viewport size, the frame
//! time, or a reference to a mesh vertex stream.

use crate::frame::FrameContext;
use glam::{Mat4, Vec2};
use lines_technique_build::techniques::{Extent, SemanticRole};

/// Value bound to a symbol input for one draw
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SymbolValue {
    Matrix(Mat4),
    Vector2(Vec2),
    Scalar(f32),
    /// Per-vertex data read from the drawn mesh
    VertexStream(SemanticRole),
}

/// Transforms of a single draw
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawTransforms {
    pub model: Mat4,
    pub view: Mat4,
    pub projection: Mat4,
    pub viewport: Extent,
    pub time: f32,
}

impl DrawTransforms {
    /// Transforms for drawing a node with the given world transform
    pub fn for_node(frame: &FrameContext, world_transform: Mat4, viewport: Extent) -> Self {
        Self {
            model: world_transform,
            view: frame.camera.view,
            projection: frame.camera.projection,
            viewport,
            time: frame.time,
        }
    }

    /// Transforms for a full-screen quad, which has no model transform
    pub fn for_quad(frame: &FrameContext, viewport: Extent) -> Self {
        Self::for_node(frame, Mat4::IDENTITY, viewport)
    }

    pub fn model_view(&self) -> Mat4 {
        self.view * self.model
    }

    pub fn model_view_projection(&self) -> Mat4 {
        self.projection * self.view * self.model
    }

    /// Inverse transpose of the model-view matrix, mapping normals to view space
    pub fn normal_transform(&self) -> Mat4 {
        let model_view = self.model_view();
        if model_view.determinant().abs() <= f32::EPSILON {
            return Mat4::IDENTITY;
        }
        model_view.inverse().transpose()
    }

    /// Evaluates a role for this draw
    pub fn evaluate(&self, role: SemanticRole) -> SymbolValue {
        match role {
            SemanticRole::Vertex | SemanticRole::Normal | SemanticRole::Texcoord | SemanticRole::Color | SemanticRole::Tangent => SymbolValue::VertexStream(role),
            SemanticRole::ModelTransform => SymbolValue::Matrix(self.model),
            SemanticRole::ViewTransform => SymbolValue::Matrix(self.view),
            SemanticRole::ProjectionTransform => SymbolValue::Matrix(self.projection),
            SemanticRole::ModelViewTransform => SymbolValue::Matrix(self.model_view()),
            SemanticRole::ModelViewProjectionTransform => SymbolValue::Matrix(self.model_view_projection()),
            SemanticRole::NormalTransform => SymbolValue::Matrix(self.normal_transform()),
            SemanticRole::Time => SymbolValue::Scalar(self.time),
            SemanticRole::ViewportSize => SymbolValue::Vector2(Vec2::new(self.viewport.width as f32, self.viewport.height as f32)),
        }
    }
}
