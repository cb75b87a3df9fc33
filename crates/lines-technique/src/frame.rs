//! Per-frame inputs and results

use crate::error::BackendError;
use crate::error::BindError;
use glam::{Mat4, Vec3};

/// Viewer transforms of a frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub view: Mat4,
    pub projection: Mat4,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
        }
    }
}

impl Camera {
    /// Perspective camera at `eye` looking at `target`, with a 0..1 depth range
    ///
    /// # Arguments
    /// * `fov_y_degrees` - Vertical field of view
    /// * `aspect` - Width divided by height of the surface
    pub fn looking_at(eye: Vec3, target: Vec3, fov_y_degrees: f32, aspect: f32) -> Self {
        Self {
            view: Mat4::look_at_rh(eye, target, Vec3::Y),
            projection: Mat4::perspective_rh(fov_y_degrees.to_radians(), aspect, 0.1, 100.0),
        }
    }
}

/// Everything a frame needs besides the scene
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameContext {
    pub camera: Camera,
    /// Seconds since the host started rendering
    pub time: f32,
}

/// Why a pass was skipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// No node with this name exists in the scene
    NodeNotFound(String),
    /// The node exists but carries no drawable geometry
    NoGeometry(String),
}

/// A pass that cleared its outputs but drew nothing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedPass {
    pub pass: String,
    pub reason: SkipReason,
}

/// How a frame ended
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// Every pass was recorded and the frame submitted
    Completed,
    /// A backend call failed; the recorded work was discarded
    Aborted { pass: Option<String>, error: BackendError },
    /// No technique is bound
    Idle,
}

/// Result of executing one frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    /// Passes that drew, in execution order
    pub executed: Vec<String>,
    pub skipped: Vec<SkippedPass>,
    pub outcome: FrameOutcome,
    /// Result of a deferred rebind applied at the start of this frame
    pub rebind: Option<Result<(), BindError>>,
}

impl FrameReport {
    pub(crate) fn new(outcome: FrameOutcome) -> Self {
        Self {
            executed: Vec::new(),
            skipped: Vec::new(),
            outcome,
            rebind: None,
        }
    }

    /// Returns true if the frame was submitted
    pub fn is_completed(&self) -> bool {
        self.outcome == FrameOutcome::Completed
    }
}
