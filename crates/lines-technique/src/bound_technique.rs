//! Technique execution against a render backend
//!
//! A BoundTechnique owns the custom targets and programs of one compiled
//! technique for as long as it is bound, and records its passes in sequence
//! order once per frame.

use crate::backend::{BoundTarget, DrawCall, PassTargets, ProgramHandle, RenderBackend, TargetHandle, TargetLocation};
use crate::error::{BackendError, BindError};
use crate::frame::{FrameContext, FrameOutcome, FrameReport, SkipReason, SkippedPass};
use crate::scene::SceneGraph;
use crate::symbols::DrawTransforms;
use lines_technique_build::techniques::{DrawMode, ExecutablePass, ExecutableTechnique, Extent, OutputBinding, TargetDescriptor, TargetSlot};
use std::collections::BTreeMap;

/// A custom target allocated for the bound technique
#[derive(Debug, Clone, Copy)]
struct AllocatedTarget {
    handle: TargetHandle,
    descriptor: TargetDescriptor,
    extent: Extent,
}

/// A compiled technique bound to backend resources
#[derive(Debug)]
pub struct BoundTechnique {
    technique: ExecutableTechnique,
    targets: BTreeMap<String, AllocatedTarget>,
    /// Program of each pass, by pass index
    programs: Vec<ProgramHandle>,
    surface: Extent,
}

/// Outcome of a single pass
enum PassResult {
    Drawn,
    Skipped(SkipReason),
}

impl BoundTechnique {
    /// Loads every program and allocates every custom target
    ///
    /// Either everything is acquired or, on the first failure, everything
    /// acquired so far is released again before the error is returned.
    ///
    /// # Arguments
    /// * `technique` - Compiled technique to bind
    /// * `backend` - Backend owning the resources
    ///
    /// # Returns
    /// The bound technique, or the first program or allocation failure
    pub(crate) fn bind<B: RenderBackend>(technique: ExecutableTechnique, backend: &mut B) -> Result<Self, BindError> {
        let surface = backend.surface_extent();
        let mut bound = Self {
            programs: Vec::with_capacity(technique.passes.len()),
            targets: BTreeMap::new(),
            technique,
            surface,
        };

        if let Err(error) = bound.acquire(backend) {
            bound.release(backend);
            return Err(error);
        }

        tracing::info!(passes = bound.technique.passes.len(), targets = bound.targets.len(), surface = %surface, "bound technique");
        Ok(bound)
    }

    fn acquire<B: RenderBackend>(&mut self, backend: &mut B) -> Result<(), BindError> {
        for pass in &self.technique.passes {
            let program = backend.load_program(pass).map_err(|source| BindError::program(&pass.name, &pass.program, source))?;
            tracing::debug!(pass = %pass.name, program = %pass.program, "loaded program");
            self.programs.push(program);
        }

        for target in &self.technique.targets {
            let extent = target.descriptor.size.extent(self.surface);
            let handle = backend.allocate_target(&target.name, &target.descriptor, extent).map_err(|source| BindError::TargetAllocation {
                target: target.name.clone(),
                source,
            })?;
            tracing::debug!(target = %target.name, extent = %extent, "allocated target");
            self.targets.insert(
                target.name.clone(),
                AllocatedTarget {
                    handle,
                    descriptor: target.descriptor,
                    extent,
                },
            );
        }

        Ok(())
    }

    /// Releases every target and program held by this technique
    pub(crate) fn release<B: RenderBackend>(&mut self, backend: &mut B) {
        for (_, target) in std::mem::take(&mut self.targets) {
            backend.release_target(target.handle);
        }
        for program in self.programs.drain(..) {
            backend.release_program(program);
        }
    }

    /// Reallocates every surface-relative target for the backend's current surface size
    ///
    /// New targets are allocated before old ones are released, so a failure
    /// leaves the technique with its previous, still valid targets.
    pub(crate) fn reallocate<B: RenderBackend>(&mut self, backend: &mut B) -> Result<(), BackendError> {
        let surface = backend.surface_extent();
        let mut replacements = Vec::new();

        for (name, target) in &self.targets {
            if !target.descriptor.size.tracks_surface() {
                continue;
            }
            let extent = target.descriptor.size.extent(surface);
            if extent == target.extent {
                continue;
            }
            match backend.allocate_target(name, &target.descriptor, extent) {
                Ok(handle) => replacements.push((name.clone(), handle, extent)),
                Err(error) => {
                    for (_, handle, _) in replacements {
                        backend.release_target(handle);
                    }
                    return Err(error);
                }
            }
        }

        for (name, handle, extent) in replacements {
            if let Some(target) = self.targets.get_mut(&name) {
                backend.release_target(target.handle);
                tracing::debug!(target = %name, from = %target.extent, to = %extent, "reallocated target");
                target.handle = handle;
                target.extent = extent;
            }
        }
        self.surface = surface;
        Ok(())
    }

    /// Records and submits every pass of the technique for one frame
    ///
    /// A pass whose node is missing or has no geometry still applies its
    /// clears, then is skipped with a warning. A backend error aborts the
    /// whole frame without submitting anything.
    pub(crate) fn execute<B: RenderBackend>(&self, backend: &mut B, scene: &dyn SceneGraph, frame: &FrameContext) -> FrameReport {
        let mut report = FrameReport::new(FrameOutcome::Completed);

        if let Err(error) = backend.begin_frame() {
            report.outcome = FrameOutcome::Aborted { pass: None, error };
            return report;
        }

        for (index, pass) in self.technique.passes.iter().enumerate() {
            match self.execute_pass(backend, pass, self.programs[index], scene, frame) {
                Ok(PassResult::Drawn) => report.executed.push(pass.name.clone()),
                Ok(PassResult::Skipped(reason)) => {
                    match &reason {
                        SkipReason::NodeNotFound(node) => tracing::warn!(pass = %pass.name, "node '{node}' not found, skipping pass"),
                        SkipReason::NoGeometry(node) => tracing::warn!(pass = %pass.name, "node '{node}' has no geometry, skipping pass"),
                    }
                    report.skipped.push(SkippedPass { pass: pass.name.clone(), reason });
                }
                Err(error) => {
                    tracing::warn!(pass = %pass.name, "aborting frame: {error}");
                    backend.abort_frame();
                    report.outcome = FrameOutcome::Aborted {
                        pass: Some(pass.name.clone()),
                        error,
                    };
                    return report;
                }
            }
        }

        if let Err(error) = backend.end_frame() {
            tracing::warn!("failed to submit frame: {error}");
            report.outcome = FrameOutcome::Aborted { pass: None, error };
        }
        report
    }

    fn execute_pass<B: RenderBackend>(&self, backend: &mut B, pass: &ExecutablePass, program: ProgramHandle, scene: &dyn SceneGraph, frame: &FrameContext) -> Result<PassResult, BackendError> {
        let targets = PassTargets {
            color: pass.color_output.as_ref().map(|output| self.resolve_output(output)).transpose()?,
            depth: pass.depth_output.as_ref().map(|output| self.resolve_output(output)).transpose()?,
            scratch_depth: None,
        };
        let viewport = targets.color.as_ref().or(targets.depth.as_ref()).map_or(self.surface, |target| target.extent);
        let targets = PassTargets {
            scratch_depth: pass.scratch_depth.then_some(viewport),
            ..targets
        };

        // Node lookup happens before anything is recorded; clears apply either way
        let node = match &pass.draw {
            DrawMode::SceneNode(name) => match scene.find_node(name, true) {
                None => Err(SkipReason::NodeNotFound(name.clone())),
                Some(node) => match node.geometry() {
                    None => Err(SkipReason::NoGeometry(name.clone())),
                    Some(mesh) => Ok(Some((name.as_str(), mesh, node.world_transform))),
                },
            },
            DrawMode::FullScreenQuad => Ok(None),
        };

        backend.begin_pass(pass, program, &targets)?;
        backend.clear(
            (pass.color.clear && targets.color.is_some()).then_some(pass.color.clear_color),
            (pass.depth.clear && targets.depth.is_some()).then_some(1.0),
        )?;

        let node = match node {
            Ok(node) => node,
            Err(reason) => {
                backend.end_pass()?;
                return Ok(PassResult::Skipped(reason));
            }
        };

        for input in &pass.texture_inputs {
            let target = self.resolve_target(&input.target, input.slot, &input.descriptor)?;
            backend.bind_texture(input, &target)?;
        }

        let transforms = match node {
            Some((_, _, world_transform)) => DrawTransforms::for_node(frame, world_transform, viewport),
            None => DrawTransforms::for_quad(frame, viewport),
        };
        for input in &pass.symbol_inputs {
            backend.bind_symbol(input, transforms.evaluate(input.role))?;
        }

        let draw = match node {
            Some((name, mesh, _)) => DrawCall::Node { name, mesh },
            None => DrawCall::FullScreenQuad,
        };
        backend.draw(draw)?;
        backend.end_pass()?;
        Ok(PassResult::Drawn)
    }

    fn resolve_output(&self, output: &OutputBinding) -> Result<BoundTarget, BackendError> {
        self.resolve_target(&output.target, output.slot, &output.descriptor)
    }

    /// Resolves a target to its current location and size
    fn resolve_target(&self, name: &str, slot: TargetSlot, descriptor: &TargetDescriptor) -> Result<BoundTarget, BackendError> {
        let (location, extent) = match slot {
            TargetSlot::DefaultColor => (TargetLocation::DefaultColor, descriptor.size.extent(self.surface)),
            TargetSlot::DefaultDepth => (TargetLocation::DefaultDepth, descriptor.size.extent(self.surface)),
            TargetSlot::Custom => {
                let target = self.targets.get(name).ok_or_else(|| BackendError::Allocation {
                    target: name.to_string(),
                    reason: "target is not allocated".to_string(),
                })?;
                (TargetLocation::Custom(target.handle), target.extent)
            }
        };
        Ok(BoundTarget {
            name: name.to_string(),
            location,
            descriptor: *descriptor,
            extent,
        })
    }

    /// The compiled technique
    pub fn technique(&self) -> &ExecutableTechnique {
        &self.technique
    }

    /// Surface size the targets were allocated for
    pub fn surface(&self) -> Extent {
        self.surface
    }

    /// Current pixel size of a custom target
    pub fn target_extent(&self, name: &str) -> Option<Extent> {
        self.targets.get(name).map(|target| target.extent)
    }

    /// Returns true if every custom target of the technique is allocated
    pub fn is_fully_allocated(&self) -> bool {
        self.technique.targets.iter().all(|target| self.targets.contains_key(&target.name))
    }
}
