//! In-memory backend recording every call, for binder tests

use crate::backend::{BoundTarget, DrawCall, PassTargets, ProgramHandle, RenderBackend, TargetHandle, TargetLocation};
use crate::error::BackendError;
use crate::symbols::SymbolValue;
use lines_technique_build::techniques::{ExecutablePass, Extent, SymbolInput, TargetDescriptor, TextureInput};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Resize(Extent),
    AllocateTarget { name: String, extent: Extent },
    ReleaseTarget { name: String },
    LoadProgram { program: String },
    ReleaseProgram { program: String },
    BeginFrame,
    BeginPass { pass: String },
    Clear { pass: String, color: Option<[f32; 4]>, depth: Option<f32> },
    BindTexture { pass: String, input: String, target: String, location: TargetLocation },
    BindSymbol { pass: String, input: String, value: SymbolValue },
    Draw { pass: String, node: Option<String> },
    EndPass { pass: String },
    EndFrame,
    AbortFrame,
}

#[derive(Debug)]
struct ActivePass {
    name: String,
    targets: PassTargets,
}

#[derive(Debug)]
pub struct RecordingBackend {
    pub surface: Extent,
    pub events: Vec<Event>,
    /// Program that fails to load, if any
    pub fail_program: Option<String>,
    /// Target that fails to allocate, if any
    pub fail_target: Option<String>,
    /// Pass whose draw fails, if any
    pub fail_draw_in: Option<String>,
    next_handle: u64,
    live_targets: BTreeMap<u64, (String, Extent)>,
    live_programs: BTreeMap<u64, String>,
    in_frame: bool,
    active_pass: Option<ActivePass>,
    frame_writes: Vec<(String, String)>,
    /// Pass that last wrote each target, as of the last submitted frame
    pub last_writer: BTreeMap<String, String>,
}

impl RecordingBackend {
    pub fn new(surface: Extent) -> Self {
        Self {
            surface,
            events: Vec::new(),
            fail_program: None,
            fail_target: None,
            fail_draw_in: None,
            next_handle: 0,
            live_targets: BTreeMap::new(),
            live_programs: BTreeMap::new(),
            in_frame: false,
            active_pass: None,
            frame_writes: Vec::new(),
            last_writer: BTreeMap::new(),
        }
    }

    pub fn live_targets(&self) -> Vec<(String, Extent)> {
        self.live_targets.values().cloned().collect()
    }

    pub fn live_programs(&self) -> Vec<String> {
        self.live_programs.values().cloned().collect()
    }

    /// Index of the first event matching `predicate`
    pub fn position(&self, predicate: impl Fn(&Event) -> bool) -> Option<usize> {
        self.events.iter().position(predicate)
    }

    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn active_pass(&self) -> Result<&ActivePass, BackendError> {
        self.active_pass.as_ref().ok_or(BackendError::NoActivePass)
    }

    fn record_write(&mut self, target: &Option<BoundTarget>) {
        if let (Some(target), Some(pass)) = (target, &self.active_pass) {
            self.frame_writes.push((target.name.clone(), pass.name.clone()));
        }
    }
}

impl RenderBackend for RecordingBackend {
    fn surface_extent(&self) -> Extent {
        self.surface
    }

    fn resize_surface(&mut self, extent: Extent) -> Result<(), BackendError> {
        self.surface = extent;
        self.events.push(Event::Resize(extent));
        Ok(())
    }

    fn allocate_target(&mut self, name: &str, _descriptor: &TargetDescriptor, extent: Extent) -> Result<TargetHandle, BackendError> {
        if self.fail_target.as_deref() == Some(name) {
            return Err(BackendError::Allocation {
                target: name.to_string(),
                reason: "out of memory".to_string(),
            });
        }
        let handle = self.handle();
        self.live_targets.insert(handle, (name.to_string(), extent));
        self.events.push(Event::AllocateTarget { name: name.to_string(), extent });
        Ok(TargetHandle(handle))
    }

    fn release_target(&mut self, handle: TargetHandle) {
        if let Some((name, _)) = self.live_targets.remove(&handle.0) {
            self.events.push(Event::ReleaseTarget { name });
        }
    }

    fn load_program(&mut self, pass: &ExecutablePass) -> Result<ProgramHandle, BackendError> {
        if self.fail_program.as_deref() == Some(pass.program.as_str()) {
            return Err(BackendError::ProgramNotFound(pass.program.clone()));
        }
        let handle = self.handle();
        self.live_programs.insert(handle, pass.program.clone());
        self.events.push(Event::LoadProgram { program: pass.program.clone() });
        Ok(ProgramHandle(handle))
    }

    fn release_program(&mut self, handle: ProgramHandle) {
        if let Some(program) = self.live_programs.remove(&handle.0) {
            self.events.push(Event::ReleaseProgram { program });
        }
    }

    fn begin_frame(&mut self) -> Result<(), BackendError> {
        self.in_frame = true;
        self.frame_writes.clear();
        self.events.push(Event::BeginFrame);
        Ok(())
    }

    fn begin_pass(&mut self, pass: &ExecutablePass, program: ProgramHandle, targets: &PassTargets) -> Result<(), BackendError> {
        if !self.in_frame {
            return Err(BackendError::NoActiveFrame);
        }
        if !self.live_programs.contains_key(&program.0) {
            return Err(BackendError::UnknownHandle(program.0));
        }
        self.active_pass = Some(ActivePass {
            name: pass.name.clone(),
            targets: targets.clone(),
        });
        self.events.push(Event::BeginPass { pass: pass.name.clone() });
        Ok(())
    }

    fn clear(&mut self, color: Option<[f32; 4]>, depth: Option<f32>) -> Result<(), BackendError> {
        let pass = self.active_pass()?.name.clone();
        let targets = self.active_pass()?.targets.clone();
        if color.is_some() {
            self.record_write(&targets.color);
        }
        if depth.is_some() {
            self.record_write(&targets.depth);
        }
        self.events.push(Event::Clear { pass, color, depth });
        Ok(())
    }

    fn bind_texture(&mut self, input: &TextureInput, target: &BoundTarget) -> Result<(), BackendError> {
        let pass = self.active_pass()?.name.clone();
        self.events.push(Event::BindTexture {
            pass,
            input: input.shader_input.clone(),
            target: target.name.clone(),
            location: target.location,
        });
        Ok(())
    }

    fn bind_symbol(&mut self, input: &SymbolInput, value: SymbolValue) -> Result<(), BackendError> {
        let pass = self.active_pass()?.name.clone();
        self.events.push(Event::BindSymbol {
            pass,
            input: input.shader_input.clone(),
            value,
        });
        Ok(())
    }

    fn draw(&mut self, draw: DrawCall<'_>) -> Result<(), BackendError> {
        let pass = self.active_pass()?.name.clone();
        if self.fail_draw_in.as_deref() == Some(pass.as_str()) {
            return Err(BackendError::Device("lost device".to_string()));
        }
        let targets = self.active_pass()?.targets.clone();
        self.record_write(&targets.color);
        self.record_write(&targets.depth);
        let node = match draw {
            DrawCall::Node { name, .. } => Some(name.to_string()),
            DrawCall::FullScreenQuad => None,
        };
        self.events.push(Event::Draw { pass, node });
        Ok(())
    }

    fn end_pass(&mut self) -> Result<(), BackendError> {
        let pass = self.active_pass.take().ok_or(BackendError::NoActivePass)?;
        self.events.push(Event::EndPass { pass: pass.name });
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), BackendError> {
        if !self.in_frame {
            return Err(BackendError::NoActiveFrame);
        }
        self.in_frame = false;
        for (target, pass) in self.frame_writes.drain(..) {
            self.last_writer.insert(target, pass);
        }
        self.events.push(Event::EndFrame);
        Ok(())
    }

    fn abort_frame(&mut self) {
        self.in_frame = false;
        self.active_pass = None;
        self.frame_writes.clear();
        self.events.push(Event::AbortFrame);
    }
}
