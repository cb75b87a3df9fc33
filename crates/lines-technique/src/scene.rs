//! Scene graph seam
//!
//! Techniques draw scene geometry by node name. The host owns the scene; the
//! binder only needs to look nodes up, read their world transform and reach
//! their mesh.

use glam::{Mat4, Vec3};
use lines_technique_build::techniques::SemanticRole;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_MESH_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a mesh, used to cache GPU buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(u64);

/// Indexed triangle geometry with optional per-vertex attributes
///
/// Attributes that are present must have one entry per position.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    id: MeshId,
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub texcoords: Vec<[f32; 2]>,
    pub colors: Vec<[f32; 4]>,
    pub tangents: Vec<[f32; 4]>,
    pub indices: Vec<u32>,
}

impl Mesh {
    /// Creates a mesh from positions and triangle indices
    pub fn new(positions: Vec<[f32; 3]>, indices: Vec<u32>) -> Self {
        Self {
            id: MeshId(NEXT_MESH_ID.fetch_add(1, Ordering::Relaxed)),
            positions,
            normals: Vec::new(),
            texcoords: Vec::new(),
            colors: Vec::new(),
            tangents: Vec::new(),
            indices,
        }
    }

    pub fn with_normals(mut self, normals: Vec<[f32; 3]>) -> Self {
        self.normals = normals;
        self
    }

    pub fn with_texcoords(mut self, texcoords: Vec<[f32; 2]>) -> Self {
        self.texcoords = texcoords;
        self
    }

    pub fn with_colors(mut self, colors: Vec<[f32; 4]>) -> Self {
        self.colors = colors;
        self
    }

    pub fn id(&self) -> MeshId {
        self.id
    }

    /// Returns true if the mesh has nothing to draw
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty() || self.indices.is_empty()
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Screen-covering quad in clip space, wound counter-clockwise
    pub fn full_screen_quad() -> Self {
        Self::new(vec![[-1.0, -1.0, 0.0], [1.0, -1.0, 0.0], [1.0, 1.0, 0.0], [-1.0, 1.0, 0.0]], vec![0, 1, 2, 0, 2, 3])
            .with_normals(vec![[0.0, 0.0, 1.0]; 4])
            .with_texcoords(vec![[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]])
    }

    /// Flattened vertex stream for a vertex attribute role
    ///
    /// Attributes the mesh does not carry are filled with a constant default
    /// (normal `+Z`, texcoord `0`, color white, tangent `+X`) so every program
    /// can be fed regardless of the mesh it draws. Uniform roles yield nothing.
    pub fn vertex_stream(&self, role: SemanticRole) -> Vec<f32> {
        let count = self.positions.len();
        match role {
            SemanticRole::Vertex => self.positions.iter().flatten().copied().collect(),
            SemanticRole::Normal => stream_or_default(&self.normals, count, [0.0, 0.0, 1.0]),
            SemanticRole::Texcoord => stream_or_default(&self.texcoords, count, [0.0, 0.0]),
            SemanticRole::Color => stream_or_default(&self.colors, count, [1.0, 1.0, 1.0, 1.0]),
            SemanticRole::Tangent => stream_or_default(&self.tangents, count, [1.0, 0.0, 0.0, 1.0]),
            _ => Vec::new(),
        }
    }
}

fn stream_or_default<const N: usize>(values: &[[f32; N]], count: usize, default: [f32; N]) -> Vec<f32> {
    if values.len() == count {
        values.iter().flatten().copied().collect()
    } else {
        std::iter::repeat_n(default, count).flatten().collect()
    }
}

/// A named node of a scene hierarchy
#[derive(Debug, Clone, Default)]
pub struct SceneNode {
    pub name: String,
    /// Transform relative to the parent node
    pub transform: Mat4,
    pub mesh: Option<Arc<Mesh>>,
    pub children: Vec<SceneNode>,
}

impl SceneNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transform: Mat4::IDENTITY,
            mesh: None,
            children: Vec::new(),
        }
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_translation(self, translation: Vec3) -> Self {
        self.with_transform(Mat4::from_translation(translation))
    }

    pub fn with_mesh(mut self, mesh: Arc<Mesh>) -> Self {
        self.mesh = Some(mesh);
        self
    }

    pub fn with_child(mut self, child: SceneNode) -> Self {
        self.children.push(child);
        self
    }

    /// Depth-first search below this node, accumulating world transforms
    fn find_descendant<'a>(&'a self, name: &str, parent: Mat4, recursive: bool) -> Option<NodeRef<'a>> {
        for child in &self.children {
            let world_transform = parent * child.transform;
            if child.name == name {
                return Some(NodeRef { node: child, world_transform });
            }
            if recursive {
                if let Some(found) = child.find_descendant(name, world_transform, true) {
                    return Some(found);
                }
            }
        }
        None
    }
}

/// A node found in a scene, with its accumulated world transform
#[derive(Debug, Clone, Copy)]
pub struct NodeRef<'a> {
    pub node: &'a SceneNode,
    pub world_transform: Mat4,
}

impl<'a> NodeRef<'a> {
    /// Mesh of the node if it has drawable geometry
    pub fn geometry(&self) -> Option<&'a Mesh> {
        self.node.mesh.as_deref().filter(|mesh| !mesh.is_empty())
    }
}

/// Access to the host's scene for node draws
pub trait SceneGraph {
    /// Finds the first node named `name` below the root
    ///
    /// With `recursive` false only direct children of the root are searched.
    fn find_node(&self, name: &str, recursive: bool) -> Option<NodeRef<'_>>;
}

/// Simple owned scene hierarchy
#[derive(Debug, Clone, Default)]
pub struct Scene {
    pub root: SceneNode,
}

impl Scene {
    pub fn new() -> Self {
        Self { root: SceneNode::new("root") }
    }

    pub fn with_node(mut self, node: SceneNode) -> Self {
        self.root.children.push(node);
        self
    }
}

impl SceneGraph for Scene {
    fn find_node(&self, name: &str, recursive: bool) -> Option<NodeRef<'_>> {
        self.root.find_descendant(name, self.root.transform, recursive)
    }
}
