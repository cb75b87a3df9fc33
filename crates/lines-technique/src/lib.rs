//! Declarative multi-pass line rendering for wgpu
//!
//! This crate binds techniques compiled by `lines-technique-build` to a render
//! backend and executes them every frame on top of the host's base render.
//! A technique reads the host's `COLOR` and `DEPTH` targets, renders into
//! custom targets of its own and composites outlines back into `COLOR`.
//!
//! The wgpu backend ships with the crate; other backends implement
//! [`RenderBackend`].

mod backend;
mod binder;
mod bound_technique;
mod error;
mod frame;
mod scene;
mod symbols;
#[cfg(test)]
mod testing;

pub mod presets;
pub mod wgpu_backend;

pub use backend::{BoundTarget, DrawCall, PassTargets, ProgramHandle, RenderBackend, TargetHandle, TargetLocation};
pub use binder::{BinderState, TechniqueBinder};
pub use bound_technique::BoundTechnique;
pub use error::{BackendError, BindError};
pub use frame::{Camera, FrameContext, FrameOutcome, FrameReport, SkipReason, SkippedPass};
pub use lines_technique_build::{TechniqueError, techniques};
pub use scene::{Mesh, MeshId, NodeRef, Scene, SceneGraph, SceneNode};
pub use symbols::{DrawTransforms, SymbolValue};
pub use wgpu_backend::{ProgramLibrary, WgpuBackend};
