//! wgpu render backend
//!
//! Executes technique passes with wgpu render pipelines. The backend owns the
//! default `COLOR` and `DEPTH` targets: the host renders its base scene into
//! them, then lets the binder run the technique on top.
//!
//! Every program shares one binding convention at group 0:
//! * binding 0 holds the `TechniqueUniforms` block
//! * texture inputs follow in lexical shader-input order, the texture of the
//!   i-th input at binding `1 + 2i` and its sampler at `2 + 2i`
//!
//! Vertex symbol inputs each get their own vertex buffer, in lexical
//! shader-input order, with the attribute at the location of the symbol's role.
//! Programs provide `vs_main` and `fs_main` entry points.

use crate::backend::{BoundTarget, DrawCall, PassTargets, ProgramHandle, RenderBackend, TargetHandle, TargetLocation};
use crate::error::BackendError;
use crate::scene::{Mesh, MeshId};
use crate::symbols::SymbolValue;
use lines_technique_build::predefined::PredefinedTechnique;
use lines_technique_build::techniques::{
    CompareFunction, CullMode, ExecutablePass, Extent, SamplerFilterMode, SemanticRole, SymbolBindingKind, SymbolInput, TargetDescriptor, TargetFormat, TargetKind, TextureInput,
};
use std::collections::HashMap;
use std::sync::Arc;
use wgpu::util::DeviceExt;

/// Format of the default `COLOR` target
pub const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
/// Format of the default `DEPTH` target and of scratch depth buffers
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

const TARGET_USAGES: wgpu::TextureUsages = wgpu::TextureUsages::RENDER_ATTACHMENT
    .union(wgpu::TextureUsages::TEXTURE_BINDING)
    .union(wgpu::TextureUsages::COPY_SRC)
    .union(wgpu::TextureUsages::COPY_DST);

/// Uniform block at group 0, binding 0 of every program
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct TechniqueUniforms {
    pub model: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub model_view: [[f32; 4]; 4],
    pub model_view_projection: [[f32; 4]; 4],
    pub normal_transform: [[f32; 4]; 4],
    pub viewport_size: [f32; 2],
    pub time: f32,
    pub _pad: f32,
}

impl TechniqueUniforms {
    /// Stores a symbol value in the field of its role; vertex streams are ignored
    pub fn set(&mut self, role: SemanticRole, value: SymbolValue) {
        match (role, value) {
            (SemanticRole::ModelTransform, SymbolValue::Matrix(matrix)) => self.model = matrix.to_cols_array_2d(),
            (SemanticRole::ViewTransform, SymbolValue::Matrix(matrix)) => self.view = matrix.to_cols_array_2d(),
            (SemanticRole::ProjectionTransform, SymbolValue::Matrix(matrix)) => self.projection = matrix.to_cols_array_2d(),
            (SemanticRole::ModelViewTransform, SymbolValue::Matrix(matrix)) => self.model_view = matrix.to_cols_array_2d(),
            (SemanticRole::ModelViewProjectionTransform, SymbolValue::Matrix(matrix)) => self.model_view_projection = matrix.to_cols_array_2d(),
            (SemanticRole::NormalTransform, SymbolValue::Matrix(matrix)) => self.normal_transform = matrix.to_cols_array_2d(),
            (SemanticRole::ViewportSize, SymbolValue::Vector2(size)) => self.viewport_size = size.to_array(),
            (SemanticRole::Time, SymbolValue::Scalar(time)) => self.time = time,
            _ => {}
        }
    }
}

/// WGSL sources of the programs techniques refer to by name
#[derive(Debug, Clone, Default)]
pub struct ProgramLibrary {
    programs: HashMap<String, String>,
}

impl ProgramLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Library holding every program of a predefined technique
    pub fn from_predefined(technique: &PredefinedTechnique) -> Self {
        technique.programs.iter().map(|(name, source)| (*name, *source)).collect()
    }

    pub fn insert(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.programs.insert(name.into(), source.into());
    }

    pub fn with_program(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.insert(name, source);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.programs.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.programs.contains_key(name)
    }
}

impl<N: Into<String>, S: Into<String>> FromIterator<(N, S)> for ProgramLibrary {
    fn from_iter<I: IntoIterator<Item = (N, S)>>(iter: I) -> Self {
        let mut library = Self::new();
        for (name, source) in iter {
            library.insert(name, source);
        }
        library
    }
}

/// Sampler variant, shared between all programs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SamplerKey {
    filter: SamplerFilterMode,
    /// False for depth and 32-bit float targets, which only support non-filtering samplers
    filtering: bool,
}

impl SamplerKey {
    fn for_input(input: &TextureInput) -> Self {
        let filtering = input.descriptor.format.is_filterable();
        Self {
            filter: if filtering { input.filter } else { SamplerFilterMode::Nearest },
            filtering,
        }
    }
}

/// A loaded program with its pipeline state
#[derive(Debug)]
struct Program {
    name: String,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    /// Shader input and sampler of each texture slot
    texture_slots: Vec<(String, SamplerKey)>,
    /// Role of each vertex buffer slot
    vertex_roles: Vec<SemanticRole>,
}

#[derive(Debug)]
struct GpuTarget {
    name: String,
    texture: wgpu::Texture,
}

/// Vertex streams and indices of one mesh, created on first use
#[derive(Debug)]
struct MeshBuffers {
    streams: HashMap<SemanticRole, wgpu::Buffer>,
    indices: Option<wgpu::Buffer>,
    index_count: u32,
    vertex_count: u32,
}

#[derive(Debug)]
struct DepthAttachment {
    view: wgpu::TextureView,
    load: wgpu::LoadOp<f32>,
    store: wgpu::StoreOp,
}

/// State of the pass being recorded; the render pass is encoded at draw time
#[derive(Debug)]
struct PendingPass {
    name: String,
    program: u64,
    color: Option<wgpu::TextureView>,
    color_load: wgpu::LoadOp<wgpu::Color>,
    depth: Option<DepthAttachment>,
    uniforms: TechniqueUniforms,
    textures: Vec<Option<wgpu::TextureView>>,
    encoded: bool,
}

#[derive(Debug)]
struct Frame {
    encoder: wgpu::CommandEncoder,
    pass: Option<PendingPass>,
}

/// Render backend executing techniques with wgpu
#[derive(Debug)]
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    library: ProgramLibrary,
    surface: Extent,
    color: wgpu::Texture,
    depth: wgpu::Texture,
    next_handle: u64,
    targets: HashMap<u64, GpuTarget>,
    programs: HashMap<u64, Program>,
    samplers: HashMap<SamplerKey, wgpu::Sampler>,
    meshes: HashMap<MeshId, MeshBuffers>,
    quad: Arc<Mesh>,
    scratch_depth: HashMap<Extent, wgpu::TextureView>,
    /// Copies of targets sampled by the pass that writes them
    snapshots: HashMap<String, wgpu::Texture>,
    frame: Option<Frame>,
}

impl WgpuBackend {
    /// Creates a backend with default targets of the given surface size
    ///
    /// # Arguments
    /// * `device` - Device all resources are created on
    /// * `queue` - Queue frames are submitted to
    /// * `surface` - Initial surface size
    /// * `library` - Programs available to techniques
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, surface: Extent, library: ProgramLibrary) -> Result<Self, BackendError> {
        check_extent(&device, "COLOR", surface)?;
        let color = create_texture(&device, "COLOR", COLOR_FORMAT, surface);
        let depth = create_texture(&device, "DEPTH", DEPTH_FORMAT, surface);

        Ok(Self {
            device,
            queue,
            library,
            surface,
            color,
            depth,
            next_handle: 0,
            targets: HashMap::new(),
            programs: HashMap::new(),
            samplers: HashMap::new(),
            meshes: HashMap::new(),
            quad: Arc::new(Mesh::full_screen_quad()),
            scratch_depth: HashMap::new(),
            snapshots: HashMap::new(),
            frame: None,
        })
    }

    /// Creates a backend on the first high-performance adapter, without a window surface
    pub async fn headless(surface: Extent, library: ProgramLibrary) -> Result<Self, BackendError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| BackendError::Device(e.to_string()))?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Lines Technique"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::default(),
                trace: Default::default(),
            })
            .await
            .map_err(|e| BackendError::Device(e.to_string()))?;

        Self::new(device, queue, surface, library)
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// The default `COLOR` target
    pub fn color_texture(&self) -> &wgpu::Texture {
        &self.color
    }

    /// The default `DEPTH` target
    pub fn depth_texture(&self) -> &wgpu::Texture {
        &self.depth
    }

    /// The programs available to techniques
    pub fn library_mut(&mut self) -> &mut ProgramLibrary {
        &mut self.library
    }

    /// Texture of a custom target
    pub fn target_texture(&self, handle: TargetHandle) -> Option<&wgpu::Texture> {
        self.targets.get(&handle.0).map(|target| &target.texture)
    }

    /// Drops the cached GPU buffers of a mesh
    ///
    /// Buffers are cached by mesh identity, so a mesh whose data changes must
    /// be released before it is drawn again.
    pub fn release_mesh(&mut self, id: MeshId) {
        self.meshes.remove(&id);
    }

    fn next_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    /// Runs `f` inside validation and out-of-memory error scopes
    fn with_error_scope<T>(&self, f: impl FnOnce(&wgpu::Device) -> T) -> Result<T, String> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f(&self.device);
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        match validation.or(out_of_memory) {
            Some(error) => Err(error.to_string()),
            None => Ok(value),
        }
    }

    fn texture(&self, location: TargetLocation) -> Result<&wgpu::Texture, BackendError> {
        match location {
            TargetLocation::DefaultColor => Ok(&self.color),
            TargetLocation::DefaultDepth => Ok(&self.depth),
            TargetLocation::Custom(handle) => self.targets.get(&handle.0).map(|target| &target.texture).ok_or(BackendError::UnknownHandle(handle.0)),
        }
    }

    fn attachment_view(&self, target: &BoundTarget) -> Result<wgpu::TextureView, BackendError> {
        let texture = self.texture(target.location)?;
        if (texture.width(), texture.height()) != (target.extent.width, target.extent.height) {
            return Err(BackendError::Device(format!(
                "target '{}' is {}x{} but {} was expected",
                target.name,
                texture.width(),
                texture.height(),
                target.extent
            )));
        }
        Ok(texture.create_view(&wgpu::TextureViewDescriptor::default()))
    }

    fn scratch_depth_view(&mut self, extent: Extent) -> wgpu::TextureView {
        let device = &self.device;
        self.scratch_depth
            .entry(extent)
            .or_insert_with(|| create_texture(device, "Scratch Depth", DEPTH_FORMAT, extent).create_view(&wgpu::TextureViewDescriptor::default()))
            .clone()
    }

    /// Copies the current contents of a target so a pass can sample what it overwrites
    fn snapshot_view(&mut self, target: &BoundTarget) -> Result<wgpu::TextureView, BackendError> {
        if target.descriptor.kind == TargetKind::Depth {
            return Err(BackendError::Device(format!("depth target '{}' cannot be sampled by the pass writing it", target.name)));
        }

        let source = self.texture(target.location)?.clone();
        let size = source.size();
        let format = source.format();
        let stale = self.snapshots.get(&target.name).is_none_or(|snapshot| snapshot.size() != size || snapshot.format() != format);
        if stale {
            let snapshot = create_texture(&self.device, &format!("{} Snapshot", target.name), format, Extent::new(size.width, size.height));
            self.snapshots.insert(target.name.clone(), snapshot);
        }

        let snapshot = &self.snapshots[&target.name];
        let frame = self.frame.as_mut().ok_or(BackendError::NoActiveFrame)?;
        frame.encoder.copy_texture_to_texture(source.as_image_copy(), snapshot.as_image_copy(), size);
        Ok(snapshot.create_view(&wgpu::TextureViewDescriptor::default()))
    }

    fn ensure_sampler(&mut self, key: SamplerKey) {
        let device = &self.device;
        self.samplers.entry(key).or_insert_with(|| {
            let filter = match key.filter {
                SamplerFilterMode::Nearest => wgpu::FilterMode::Nearest,
                SamplerFilterMode::Linear => wgpu::FilterMode::Linear,
            };
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(&format!("Sampler {:?}", key.filter)),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                mag_filter: filter,
                min_filter: filter,
                mipmap_filter: wgpu::FilterMode::Nearest,
                lod_min_clamp: 0.0,
                lod_max_clamp: 0.0,
                compare: None,
                anisotropy_clamp: 1,
                border_color: None,
            })
        });
    }

    fn ensure_mesh(&mut self, mesh: &Mesh, roles: &[SemanticRole]) {
        let device = &self.device;
        let buffers = self.meshes.entry(mesh.id()).or_insert_with(|| MeshBuffers {
            streams: HashMap::new(),
            indices: (!mesh.indices.is_empty()).then(|| {
                device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Mesh Indices"),
                    contents: bytemuck::cast_slice(&mesh.indices),
                    usage: wgpu::BufferUsages::INDEX,
                })
            }),
            index_count: mesh.indices.len() as u32,
            vertex_count: mesh.vertex_count() as u32,
        });

        for role in roles {
            buffers.streams.entry(*role).or_insert_with(|| {
                device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(&format!("Mesh {role} Stream")),
                    contents: bytemuck::cast_slice(&mesh.vertex_stream(*role)),
                    usage: wgpu::BufferUsages::VERTEX,
                })
            });
        }
    }

    fn pending_mut(&mut self) -> Result<&mut PendingPass, BackendError> {
        self.frame.as_mut().ok_or(BackendError::NoActiveFrame)?.pass.as_mut().ok_or(BackendError::NoActivePass)
    }

    fn encode_draw(&mut self, pending: &mut PendingPass, mesh: &Mesh) -> Result<(), BackendError> {
        let program = self.programs.get(&pending.program).ok_or(BackendError::UnknownHandle(pending.program))?;
        let sampler_keys: Vec<SamplerKey> = program.texture_slots.iter().map(|(_, key)| *key).collect();
        let vertex_roles = program.vertex_roles.clone();
        for key in &sampler_keys {
            self.ensure_sampler(*key);
        }
        self.ensure_mesh(mesh, &vertex_roles);

        let program = self.programs.get(&pending.program).ok_or(BackendError::UnknownHandle(pending.program))?;
        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: program.uniform_buffer.as_entire_binding(),
        }];
        for (index, (view, (shader_input, key))) in pending.textures.iter().zip(&program.texture_slots).enumerate() {
            let view = view.as_ref().ok_or_else(|| BackendError::InvalidProgram {
                program: program.name.clone(),
                reason: format!("texture input '{shader_input}' was not bound"),
            })?;
            let sampler = self.samplers.get(key).ok_or_else(|| BackendError::Device("sampler missing".to_string()))?;
            let binding = 1 + 2 * index as u32;
            entries.push(wgpu::BindGroupEntry {
                binding,
                resource: wgpu::BindingResource::TextureView(view),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: binding + 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            });
        }

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&pending.name),
            layout: &program.bind_group_layout,
            entries: &entries,
        });
        self.queue.write_buffer(&program.uniform_buffer, 0, bytemuck::bytes_of(&pending.uniforms));

        let buffers = self.meshes.get(&mesh.id()).ok_or_else(|| BackendError::Device("mesh buffers missing".to_string()))?;
        let frame = self.frame.as_mut().ok_or(BackendError::NoActiveFrame)?;
        {
            let mut render_pass = encode_render_pass(&mut frame.encoder, pending);
            render_pass.set_pipeline(&program.pipeline);
            render_pass.set_bind_group(0, &bind_group, &[]);
            for (slot, role) in program.vertex_roles.iter().enumerate() {
                if let Some(stream) = buffers.streams.get(role) {
                    render_pass.set_vertex_buffer(slot as u32, stream.slice(..));
                }
            }
            match &buffers.indices {
                Some(indices) => {
                    render_pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
                    render_pass.draw_indexed(0..buffers.index_count, 0, 0..1);
                }
                None => render_pass.draw(0..buffers.vertex_count, 0..1),
            }
        }

        // Further work on the same attachments must keep what was drawn
        pending.color_load = wgpu::LoadOp::Load;
        if let Some(depth) = pending.depth.as_mut() {
            depth.load = wgpu::LoadOp::Load;
        }
        pending.encoded = true;
        Ok(())
    }
}

impl RenderBackend for WgpuBackend {
    fn surface_extent(&self) -> Extent {
        self.surface
    }

    fn resize_surface(&mut self, extent: Extent) -> Result<(), BackendError> {
        if self.frame.is_some() {
            return Err(BackendError::Device("cannot resize during a frame".to_string()));
        }
        check_extent(&self.device, "COLOR", extent)?;
        self.color = create_texture(&self.device, "COLOR", COLOR_FORMAT, extent);
        self.depth = create_texture(&self.device, "DEPTH", DEPTH_FORMAT, extent);
        self.scratch_depth.clear();
        self.surface = extent;
        Ok(())
    }

    fn allocate_target(&mut self, name: &str, descriptor: &TargetDescriptor, extent: Extent) -> Result<TargetHandle, BackendError> {
        check_extent(&self.device, name, extent)?;
        let format = texture_format(descriptor.format);
        let texture = self
            .with_error_scope(|device| create_texture(device, name, format, extent))
            .map_err(|reason| BackendError::Allocation {
                target: name.to_string(),
                reason,
            })?;

        let handle = self.next_handle();
        self.targets.insert(handle, GpuTarget { name: name.to_string(), texture });
        tracing::debug!(target = %name, format = ?format, extent = %extent, "created target texture");
        Ok(TargetHandle(handle))
    }

    fn release_target(&mut self, handle: TargetHandle) {
        if let Some(target) = self.targets.remove(&handle.0) {
            self.snapshots.remove(&target.name);
            target.texture.destroy();
        }
    }

    fn load_program(&mut self, pass: &ExecutablePass) -> Result<ProgramHandle, BackendError> {
        let source = self.library.get(&pass.program).ok_or_else(|| BackendError::ProgramNotFound(pass.program.clone()))?.to_string();
        let program = self
            .with_error_scope(|device| build_program(device, pass, &source))
            .map_err(|reason| BackendError::InvalidProgram {
                program: pass.program.clone(),
                reason,
            })?;

        let handle = self.next_handle();
        tracing::debug!(pass = %pass.name, program = %pass.program, textures = program.texture_slots.len(), vertex_streams = program.vertex_roles.len(), "created render pipeline");
        self.programs.insert(handle, program);
        Ok(ProgramHandle(handle))
    }

    fn release_program(&mut self, handle: ProgramHandle) {
        if let Some(program) = self.programs.remove(&handle.0) {
            program.uniform_buffer.destroy();
        }
    }

    fn begin_frame(&mut self) -> Result<(), BackendError> {
        if self.frame.is_some() {
            return Err(BackendError::Device("a frame is already in progress".to_string()));
        }
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Technique Frame") });
        self.frame = Some(Frame { encoder, pass: None });
        Ok(())
    }

    fn begin_pass(&mut self, pass: &ExecutablePass, program: ProgramHandle, targets: &PassTargets) -> Result<(), BackendError> {
        if self.frame.is_none() {
            return Err(BackendError::NoActiveFrame);
        }
        let texture_count = self.programs.get(&program.0).ok_or(BackendError::UnknownHandle(program.0))?.texture_slots.len();

        let color = targets.color.as_ref().map(|target| self.attachment_view(target)).transpose()?;
        let depth = match (&targets.depth, targets.scratch_depth) {
            (Some(target), _) => Some(DepthAttachment {
                view: self.attachment_view(target)?,
                load: wgpu::LoadOp::Load,
                store: wgpu::StoreOp::Store,
            }),
            (None, Some(extent)) => Some(DepthAttachment {
                view: self.scratch_depth_view(extent),
                load: wgpu::LoadOp::Clear(1.0),
                store: wgpu::StoreOp::Discard,
            }),
            (None, None) => None,
        };

        if let (Some(color), Some(depth)) = (&targets.color, &targets.depth) {
            if color.extent != depth.extent {
                return Err(BackendError::Device(format!("pass '{}' renders to {} color and {} depth", pass.name, color.extent, depth.extent)));
            }
        }

        let frame = self.frame.as_mut().ok_or(BackendError::NoActiveFrame)?;
        frame.pass = Some(PendingPass {
            name: pass.name.clone(),
            program: program.0,
            color,
            color_load: wgpu::LoadOp::Load,
            depth,
            uniforms: bytemuck::Zeroable::zeroed(),
            textures: vec![None; texture_count],
            encoded: false,
        });
        Ok(())
    }

    fn clear(&mut self, color: Option<[f32; 4]>, depth: Option<f32>) -> Result<(), BackendError> {
        let pending = self.pending_mut()?;
        if let Some([r, g, b, a]) = color {
            if pending.color.is_some() {
                pending.color_load = wgpu::LoadOp::Clear(wgpu::Color {
                    r: r as f64,
                    g: g as f64,
                    b: b as f64,
                    a: a as f64,
                });
            }
        }
        if let (Some(value), Some(attachment)) = (depth, pending.depth.as_mut()) {
            attachment.load = wgpu::LoadOp::Clear(value);
        }
        Ok(())
    }

    fn bind_texture(&mut self, input: &TextureInput, target: &BoundTarget) -> Result<(), BackendError> {
        let program_id = self.pending_mut()?.program;
        let program = self.programs.get(&program_id).ok_or(BackendError::UnknownHandle(program_id))?;
        let slot = program
            .texture_slots
            .iter()
            .position(|(shader_input, _)| *shader_input == input.shader_input)
            .ok_or_else(|| BackendError::InvalidProgram {
                program: program.name.clone(),
                reason: format!("no texture slot for input '{}'", input.shader_input),
            })?;

        let view = if input.feedback {
            self.snapshot_view(target)?
        } else {
            let texture = self.texture(target.location)?;
            texture.create_view(&wgpu::TextureViewDescriptor {
                aspect: match target.descriptor.kind {
                    TargetKind::Color => wgpu::TextureAspect::All,
                    TargetKind::Depth => wgpu::TextureAspect::DepthOnly,
                },
                ..Default::default()
            })
        };

        self.pending_mut()?.textures[slot] = Some(view);
        Ok(())
    }

    fn bind_symbol(&mut self, input: &SymbolInput, value: SymbolValue) -> Result<(), BackendError> {
        self.pending_mut()?.uniforms.set(input.role, value);
        Ok(())
    }

    fn draw(&mut self, draw: DrawCall<'_>) -> Result<(), BackendError> {
        let quad = self.quad.clone();
        let mesh = match draw {
            DrawCall::Node { mesh, .. } => mesh,
            DrawCall::FullScreenQuad => quad.as_ref(),
        };

        let frame = self.frame.as_mut().ok_or(BackendError::NoActiveFrame)?;
        let mut pending = frame.pass.take().ok_or(BackendError::NoActivePass)?;
        let result = self.encode_draw(&mut pending, mesh);
        if let Some(frame) = self.frame.as_mut() {
            frame.pass = Some(pending);
        }
        result
    }

    fn end_pass(&mut self) -> Result<(), BackendError> {
        let frame = self.frame.as_mut().ok_or(BackendError::NoActiveFrame)?;
        let pending = frame.pass.take().ok_or(BackendError::NoActivePass)?;
        if !pending.encoded {
            // Nothing was drawn; the pass still applies its clears
            drop(encode_render_pass(&mut frame.encoder, &pending));
        }
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), BackendError> {
        let frame = self.frame.take().ok_or(BackendError::NoActiveFrame)?;
        self.queue.submit(std::iter::once(frame.encoder.finish()));
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => Err(BackendError::Device(error.to_string())),
            None => Ok(()),
        }
    }

    fn abort_frame(&mut self) {
        if self.frame.take().is_some() {
            let _ = pollster::block_on(self.device.pop_error_scope());
        }
    }
}

fn encode_render_pass<'e>(encoder: &'e mut wgpu::CommandEncoder, pending: &PendingPass) -> wgpu::RenderPass<'e> {
    let color_attachments: Vec<_> = pending
        .color
        .iter()
        .map(|view| {
            Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: pending.color_load,
                    store: wgpu::StoreOp::Store,
                },
            })
        })
        .collect();

    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(&pending.name),
        color_attachments: &color_attachments,
        depth_stencil_attachment: pending.depth.as_ref().map(|depth| wgpu::RenderPassDepthStencilAttachment {
            view: &depth.view,
            depth_ops: Some(wgpu::Operations {
                load: depth.load,
                store: depth.store,
            }),
            stencil_ops: None,
        }),
        timestamp_writes: None,
        occlusion_query_set: None,
    })
}

/// Builds the pipeline of a pass following the shared binding convention
fn build_program(device: &wgpu::Device, pass: &ExecutablePass, source: &str) -> Program {
    let shader_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(&pass.program),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });

    let mut bind_group_layout_entries = vec![wgpu::BindGroupLayoutEntry {
        binding: 0,
        visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<TechniqueUniforms>() as u64),
        },
        count: None,
    }];

    let mut texture_slots = Vec::with_capacity(pass.texture_inputs.len());
    for (index, input) in pass.texture_inputs.iter().enumerate() {
        let key = SamplerKey::for_input(input);
        let binding = 1 + 2 * index as u32;
        let sample_type = match input.descriptor.kind {
            TargetKind::Color => wgpu::TextureSampleType::Float { filterable: key.filtering },
            TargetKind::Depth => wgpu::TextureSampleType::Depth,
        };
        bind_group_layout_entries.push(wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type,
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });
        bind_group_layout_entries.push(wgpu::BindGroupLayoutEntry {
            binding: binding + 1,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(if key.filtering {
                wgpu::SamplerBindingType::Filtering
            } else {
                wgpu::SamplerBindingType::NonFiltering
            }),
            count: None,
        });
        texture_slots.push((input.shader_input.clone(), key));
    }

    let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(&pass.name),
        entries: &bind_group_layout_entries,
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(&pass.name),
        bind_group_layouts: &[&bind_group_layout],
        push_constant_ranges: &[],
    });

    let vertex_attributes: Vec<(SemanticRole, [wgpu::VertexAttribute; 1])> = pass
        .vertex_inputs()
        .filter_map(|input| match input.role.binding_kind() {
            SymbolBindingKind::VertexAttribute { location } => Some((
                input.role,
                [wgpu::VertexAttribute {
                    format: vertex_format(input.role),
                    offset: 0,
                    shader_location: location,
                }],
            )),
            SymbolBindingKind::Uniform => None,
        })
        .collect();
    let vertex_buffers: Vec<wgpu::VertexBufferLayout> = vertex_attributes
        .iter()
        .map(|(role, attributes)| wgpu::VertexBufferLayout {
            array_stride: vertex_format(*role).size(),
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes,
        })
        .collect();

    let color_targets: Vec<Option<wgpu::ColorTargetState>> = pass
        .color_output
        .iter()
        .map(|output| {
            Some(wgpu::ColorTargetState {
                format: texture_format(output.descriptor.format),
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })
        })
        .collect();

    let depth_format = match &pass.depth_output {
        Some(output) => Some(texture_format(output.descriptor.format)),
        None if pass.scratch_depth => Some(DEPTH_FORMAT),
        None => None,
    };

    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(&pass.name),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: &shader_module,
            entry_point: Some("vs_main"),
            compilation_options: Default::default(),
            buffers: &vertex_buffers,
        },
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: cull_face(pass.cull_mode),
            unclipped_depth: false,
            polygon_mode: wgpu::PolygonMode::Fill,
            conservative: false,
        },
        depth_stencil: depth_format.map(|format| wgpu::DepthStencilState {
            format,
            depth_write_enabled: pass.depth.write,
            depth_compare: compare_function(pass.depth.effective_compare()),
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module: &shader_module,
            entry_point: Some("fs_main"),
            compilation_options: Default::default(),
            targets: &color_targets,
        }),
        multiview: None,
        cache: None,
    });

    let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(&format!("{} Uniforms", pass.name)),
        size: std::mem::size_of::<TechniqueUniforms>() as u64,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    Program {
        name: pass.program.clone(),
        pipeline,
        bind_group_layout,
        uniform_buffer,
        texture_slots,
        vertex_roles: vertex_attributes.iter().map(|(role, _)| *role).collect(),
    }
}

fn create_texture(device: &wgpu::Device, label: &str, format: wgpu::TextureFormat, extent: Extent) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: extent.width,
            height: extent.height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: TARGET_USAGES,
        view_formats: &[],
    })
}

fn check_extent(device: &wgpu::Device, target: &str, extent: Extent) -> Result<(), BackendError> {
    let max = device.limits().max_texture_dimension_2d;
    if extent.width == 0 || extent.height == 0 || extent.width > max || extent.height > max {
        return Err(BackendError::Allocation {
            target: target.to_string(),
            reason: format!("size {extent} is outside 1..={max}"),
        });
    }
    Ok(())
}

/// Texture format backing a target format
pub fn texture_format(format: TargetFormat) -> wgpu::TextureFormat {
    match format {
        // Three-channel formats are not renderable; alpha is left opaque
        TargetFormat::Rgb8 | TargetFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
        TargetFormat::R8 => wgpu::TextureFormat::R8Unorm,
        TargetFormat::Rg8 => wgpu::TextureFormat::Rg8Unorm,
        TargetFormat::R16Float => wgpu::TextureFormat::R16Float,
        TargetFormat::Rg16Float => wgpu::TextureFormat::Rg16Float,
        TargetFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TargetFormat::R32Float => wgpu::TextureFormat::R32Float,
        TargetFormat::Rg32Float => wgpu::TextureFormat::Rg32Float,
        TargetFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        TargetFormat::Depth16 => wgpu::TextureFormat::Depth16Unorm,
        TargetFormat::Depth24 => wgpu::TextureFormat::Depth24Plus,
        TargetFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
        TargetFormat::Depth24Stencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
    }
}

fn vertex_format(role: SemanticRole) -> wgpu::VertexFormat {
    match role {
        SemanticRole::Texcoord => wgpu::VertexFormat::Float32x2,
        SemanticRole::Color | SemanticRole::Tangent => wgpu::VertexFormat::Float32x4,
        _ => wgpu::VertexFormat::Float32x3,
    }
}

fn compare_function(compare: CompareFunction) -> wgpu::CompareFunction {
    match compare {
        CompareFunction::Never => wgpu::CompareFunction::Never,
        CompareFunction::Less => wgpu::CompareFunction::Less,
        CompareFunction::Equal => wgpu::CompareFunction::Equal,
        CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
        CompareFunction::Greater => wgpu::CompareFunction::Greater,
        CompareFunction::NotEqual => wgpu::CompareFunction::NotEqual,
        CompareFunction::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
        CompareFunction::Always => wgpu::CompareFunction::Always,
    }
}

fn cull_face(cull_mode: CullMode) -> Option<wgpu::Face> {
    match cull_mode {
        CullMode::None => None,
        CullMode::Front => Some(wgpu::Face::Front),
        CullMode::Back => Some(wgpu::Face::Back),
    }
}
