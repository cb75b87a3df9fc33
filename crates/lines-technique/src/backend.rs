//! Render backend seam
//!
//! The binder drives a technique through this trait. A backend owns the GPU
//! device, the default `COLOR` and `DEPTH` targets the host renders into, and
//! every resource the binder asks it to allocate. Calls arrive in a fixed
//! order for each pass:
//!
//! `begin_pass` → `clear` → `bind_texture`/`bind_symbol`* → `draw`? → `end_pass`
//!
//! framed by `begin_frame` and either `end_frame` or `abort_frame`.

use crate::error::BackendError;
use crate::scene::Mesh;
use crate::symbols::SymbolValue;
use lines_technique_build::techniques::{ExecutablePass, Extent, SymbolInput, TargetDescriptor, TextureInput};

/// Handle of a target allocated by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetHandle(pub u64);

/// Handle of a program loaded by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramHandle(pub u64);

/// Where the pixels of a target live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetLocation {
    /// The host's color target
    DefaultColor,
    /// The host's depth target
    DefaultDepth,
    /// A target allocated for the bound technique
    Custom(TargetHandle),
}

/// A target resolved for the current frame
#[derive(Debug, Clone, PartialEq)]
pub struct BoundTarget {
    pub name: String,
    pub location: TargetLocation,
    pub descriptor: TargetDescriptor,
    /// Current pixel size
    pub extent: Extent,
}

/// Render destination of a pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassTargets {
    pub color: Option<BoundTarget>,
    pub depth: Option<BoundTarget>,
    /// Size of the transient depth buffer the backend provides, if any
    pub scratch_depth: Option<Extent>,
}

/// What a pass draws
#[derive(Debug, Clone, Copy)]
pub enum DrawCall<'a> {
    /// Geometry of one scene node
    Node { name: &'a str, mesh: &'a Mesh },
    /// A single screen-covering quad
    FullScreenQuad,
}

/// A GPU backend able to execute technique passes
pub trait RenderBackend {
    /// Current size of the render surface and of the default targets
    fn surface_extent(&self) -> Extent;

    /// Resizes the surface together with the default targets
    fn resize_surface(&mut self, extent: Extent) -> Result<(), BackendError>;

    /// Allocates a custom target
    ///
    /// # Arguments
    /// * `name` - Target name, for labels and error reports
    /// * `descriptor` - Kind, format and size policy of the target
    /// * `extent` - Pixel size to allocate, already resolved against the surface
    fn allocate_target(&mut self, name: &str, descriptor: &TargetDescriptor, extent: Extent) -> Result<TargetHandle, BackendError>;

    /// Releases a custom target; unknown handles are ignored
    fn release_target(&mut self, handle: TargetHandle);

    /// Loads the program of a pass, building whatever pipeline state the pass layout needs
    fn load_program(&mut self, pass: &ExecutablePass) -> Result<ProgramHandle, BackendError>;

    /// Releases a program; unknown handles are ignored
    fn release_program(&mut self, handle: ProgramHandle);

    fn begin_frame(&mut self) -> Result<(), BackendError>;

    /// Binds the output targets of a pass as the render destination
    fn begin_pass(&mut self, pass: &ExecutablePass, program: ProgramHandle, targets: &PassTargets) -> Result<(), BackendError>;

    /// Clears the bound color output and/or depth output
    fn clear(&mut self, color: Option<[f32; 4]>, depth: Option<f32>) -> Result<(), BackendError>;

    /// Binds a target as the texture behind a shader input
    fn bind_texture(&mut self, input: &TextureInput, target: &BoundTarget) -> Result<(), BackendError>;

    /// Binds a symbol value to a shader input
    fn bind_symbol(&mut self, input: &SymbolInput, value: SymbolValue) -> Result<(), BackendError>;

    /// Draws with the bound program, inputs and outputs
    fn draw(&mut self, draw: DrawCall<'_>) -> Result<(), BackendError>;

    fn end_pass(&mut self) -> Result<(), BackendError>;

    /// Submits the recorded frame
    fn end_frame(&mut self) -> Result<(), BackendError>;

    /// Discards everything recorded since `begin_frame`
    fn abort_frame(&mut self);
}
