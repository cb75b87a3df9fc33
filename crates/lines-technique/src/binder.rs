//! Technique binder
//!
//! The binder is the entry point hosts use to run a technique: it binds a
//! compiled technique to a backend, keeps its targets sized to the surface and
//! executes it once per frame after the host has rendered the base scene into
//! the default targets.

use crate::backend::RenderBackend;
use crate::bound_technique::BoundTechnique;
use crate::error::{BackendError, BindError};
use crate::frame::{FrameContext, FrameOutcome, FrameReport};
use crate::scene::SceneGraph;
use lines_technique_build::techniques::{ExecutableTechnique, Extent, TechniqueGraph};

/// Lifecycle state of a binder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinderState {
    /// No technique is bound; frames are not touched
    Unbound,
    /// A technique is bound and its targets match the surface
    Bound,
    /// The surface changed size; surface-relative targets are reallocated before the next frame
    PendingReallocation,
}

/// Binds techniques to a render backend and executes them per frame
pub struct TechniqueBinder<B: RenderBackend> {
    backend: B,
    bound: Option<BoundTechnique>,
    pending_rebind: Option<ExecutableTechnique>,
    pending_reallocation: bool,
}

impl<B: RenderBackend> TechniqueBinder<B> {
    /// Creates an unbound binder driving `backend`
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            bound: None,
            pending_rebind: None,
            pending_reallocation: false,
        }
    }

    /// Binds a compiled technique, replacing the current one
    ///
    /// The previous technique is released before any resource of the new one
    /// is acquired. Binding is atomic: on failure nothing of the new technique
    /// stays allocated and the binder is left unbound.
    ///
    /// # Arguments
    /// * `technique` - Compiled technique to bind
    ///
    /// # Returns
    /// The bound technique, or the first program load or allocation failure
    pub fn bind(&mut self, technique: ExecutableTechnique) -> Result<&BoundTechnique, BindError> {
        self.unbind();
        self.pending_rebind = None;
        let bound = BoundTechnique::bind(technique, &mut self.backend)?;
        Ok(&*self.bound.insert(bound))
    }

    /// Compiles a technique graph and binds the result
    ///
    /// The current technique is released first, so a graph that fails to
    /// compile leaves the binder unbound.
    pub fn bind_graph(&mut self, graph: &TechniqueGraph) -> Result<&BoundTechnique, BindError> {
        self.unbind();
        self.pending_rebind = None;
        let technique = graph.compile()?;
        self.bind(technique)
    }

    /// Schedules a technique to be bound at the start of the next frame
    ///
    /// The outcome is reported in [`FrameReport::rebind`] of that frame.
    /// A later request replaces an earlier one that has not been applied yet.
    pub fn request_rebind(&mut self, technique: ExecutableTechnique) {
        self.pending_rebind = Some(technique);
    }

    /// Releases the bound technique, if any
    pub fn unbind(&mut self) {
        if let Some(mut bound) = self.bound.take() {
            bound.release(&mut self.backend);
            tracing::info!(passes = bound.technique().passes.len(), "unbound technique");
        }
        self.pending_reallocation = false;
    }

    /// Resizes the surface and the default targets
    ///
    /// Surface-relative targets of the bound technique are reallocated lazily,
    /// before the next frame draws anything.
    pub fn resize(&mut self, extent: Extent) -> Result<(), BackendError> {
        if extent == self.backend.surface_extent() {
            return Ok(());
        }
        self.backend.resize_surface(extent)?;
        tracing::debug!(surface = %extent, "resized surface");
        if self.bound.is_some() {
            self.pending_reallocation = true;
        }
        Ok(())
    }

    /// Executes the bound technique for one frame
    ///
    /// Pending rebinds are applied first, then pending reallocations. Without a
    /// bound technique the frame is left untouched and reported as idle.
    ///
    /// # Arguments
    /// * `scene` - Scene providing the nodes drawn by node passes
    /// * `frame` - Camera and time of this frame
    ///
    /// # Returns
    /// What was drawn, what was skipped and how the frame ended
    pub fn execute(&mut self, scene: &dyn SceneGraph, frame: &FrameContext) -> FrameReport {
        let rebind = self.pending_rebind.take().map(|technique| self.bind(technique).map(|_| ()));

        let mut report = match &mut self.bound {
            None => FrameReport::new(FrameOutcome::Idle),
            Some(bound) => {
                let reallocated = if self.pending_reallocation { bound.reallocate(&mut self.backend) } else { Ok(()) };
                match reallocated {
                    Ok(()) => {
                        self.pending_reallocation = false;
                        bound.execute(&mut self.backend, scene, frame)
                    }
                    Err(error) => {
                        tracing::warn!("failed to reallocate targets: {error}");
                        FrameReport::new(FrameOutcome::Aborted { pass: None, error })
                    }
                }
            }
        };
        report.rebind = rebind;
        report
    }

    /// Current lifecycle state
    pub fn state(&self) -> BinderState {
        match (&self.bound, self.pending_reallocation) {
            (None, _) => BinderState::Unbound,
            (Some(_), true) => BinderState::PendingReallocation,
            (Some(_), false) => BinderState::Bound,
        }
    }

    /// The bound technique, if any
    pub fn bound(&self) -> Option<&BoundTechnique> {
        self.bound.as_ref()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable access to the backend, for the host's own rendering
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

impl<B: RenderBackend> Drop for TechniqueBinder<B> {
    fn drop(&mut self) {
        self.unbind();
    }
}
