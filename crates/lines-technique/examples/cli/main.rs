//! Lines CLI Renderer
//!
//! Renders a lathed chess bishop headlessly, runs a line technique on top of
//! the base render and writes the resulting `COLOR` target to an image file.
//!
//! # Usage
//! ```bash
//! lines-cli bishop.png --preset lines --width 800 --height 600
//! lines-cli bishop.png --technique crates/build/techniques/depth_lines/technique.yaml
//! ```

use clap::Parser;
use glam::Vec3;
use lines_technique::presets::LinesPreset;
use lines_technique::techniques::{Extent, SemanticRole};
use lines_technique::wgpu_backend::{COLOR_FORMAT, DEPTH_FORMAT};
use lines_technique::{Camera, DrawTransforms, FrameContext, FrameOutcome, Mesh, ProgramLibrary, Scene, SceneGraph, SceneNode, TechniqueBinder, WgpuBackend};
use std::path::PathBuf;
use std::sync::Arc;
use wgpu::util::DeviceExt;

/// Diffuse color of the bishop in the base render
const BISHOP_COLOR: [f32; 4] = [0.2695, 0.6424, 0.9001, 1.0];

const BASE_SHADER: &str = r#"
struct BaseUniforms {
    model_view_projection: mat4x4<f32>,
    normal_transform: mat4x4<f32>,
    base_color: vec4<f32>,
}

@group(0) @binding(0) var<uniform> uniforms: BaseUniforms;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) normal: vec3<f32>,
}

@vertex
fn vs_main(@location(0) position: vec3<f32>, @location(1) normal: vec3<f32>) -> VertexOutput {
    var out: VertexOutput;
    out.position = uniforms.model_view_projection * vec4<f32>(position, 1.0);
    out.normal = (uniforms.normal_transform * vec4<f32>(normal, 0.0)).xyz;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let light = normalize(vec3<f32>(0.4, 0.8, 0.6));
    let diffuse = max(dot(normalize(in.normal), light), 0.0);
    return vec4<f32>(uniforms.base_color.rgb * (0.35 + 0.65 * diffuse), 1.0);
}
"#;

/// Command-line arguments for the line renderer
#[derive(Parser)]
#[command(version, about = "Render a chess bishop with a line technique")]
struct Args {
    /// Output image file path
    output: PathBuf,

    /// Predefined technique (lines, depth-lines)
    #[arg(long, short, default_value = "lines")]
    preset: LinesPreset,

    /// Technique definition file; programs are loaded from `<program>.wgsl` next to it
    #[arg(long, short, conflicts_with = "preset")]
    technique: Option<PathBuf>,

    #[arg(long, default_value_t = 800)]
    width: u32,

    #[arg(long, default_value_t = 600)]
    height: u32,

    /// Seconds passed to the technique's time symbol
    #[arg(long, default_value_t = 0.0)]
    time: f32,

    /// Log every bind and allocation
    #[arg(long, short)]
    verbose: bool,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct BaseUniforms {
    model_view_projection: [[f32; 4]; 4],
    normal_transform: [[f32; 4]; 4],
    base_color: [f32; 4],
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO })
        .init();

    let (technique, library) = match &args.technique {
        Some(path) => {
            let (technique, programs) = lines_technique_build::technique_file_to_executable(&path.to_string_lossy())?;
            (technique, programs.into_iter().collect::<ProgramLibrary>())
        }
        None => (args.preset.compile()?, args.preset.program_library()),
    };
    for diagnostic in &technique.diagnostics {
        tracing::warn!("{diagnostic}");
    }

    let extent = Extent::new(args.width, args.height);
    tracing::info!(surface = %extent, passes = technique.passes.len(), "initializing GPU");
    let backend = pollster::block_on(WgpuBackend::headless(extent, library))?;

    let scene = Scene::new().with_node(SceneNode::new("Chess Pieces").with_child(SceneNode::new("Bishop").with_translation(Vec3::new(0.0, -0.75, 0.0)).with_mesh(Arc::new(bishop_mesh(48)))));
    let frame = FrameContext {
        camera: Camera::looking_at(Vec3::new(0.0, 0.6, 3.4), Vec3::ZERO, 35.0, args.width as f32 / args.height as f32),
        time: args.time,
    };

    let mut binder = TechniqueBinder::new(backend);
    binder.bind(technique)?;

    render_base(binder.backend(), &scene, &frame)?;
    let report = binder.execute(&scene, &frame);
    for skipped in &report.skipped {
        tracing::warn!(pass = %skipped.pass, "skipped: {:?}", skipped.reason);
    }
    if let FrameOutcome::Aborted { pass, error } = &report.outcome {
        return Err(format!("frame aborted in pass {pass:?}: {error}").into());
    }
    tracing::info!(executed = ?report.executed, "technique executed");

    let backend = binder.backend();
    let image = read_color(backend.device(), backend.queue(), backend.color_texture())?;
    image.save(&args.output)?;
    println!("Saved {}x{} render to {}", image.width(), image.height(), args.output.display());

    Ok(())
}

/// Lathes a bishop profile around the Y axis
///
/// # Arguments
/// * `segments` - Number of slices around the axis
fn bishop_mesh(segments: u32) -> Mesh {
    // (radius, height) from the base to the tip
    const PROFILE: [[f32; 2]; 19] = [
        [0.0, 0.0],
        [0.45, 0.0],
        [0.45, 0.08],
        [0.38, 0.14],
        [0.30, 0.18],
        [0.22, 0.30],
        [0.16, 0.55],
        [0.13, 0.80],
        [0.22, 0.86],
        [0.22, 0.90],
        [0.12, 0.94],
        [0.20, 1.05],
        [0.24, 1.18],
        [0.20, 1.32],
        [0.12, 1.42],
        [0.06, 1.47],
        [0.08, 1.52],
        [0.06, 1.57],
        [0.0, 1.59],
    ];

    // Profile normals, averaged over the segments adjacent to each point
    let segment_normals: Vec<[f32; 2]> = PROFILE
        .windows(2)
        .map(|pair| {
            let (dr, dy) = (pair[1][0] - pair[0][0], pair[1][1] - pair[0][1]);
            let length = (dr * dr + dy * dy).sqrt().max(f32::EPSILON);
            [dy / length, -dr / length]
        })
        .collect();
    let profile_normals: Vec<[f32; 2]> = (0..PROFILE.len())
        .map(|i| {
            let before = segment_normals[i.saturating_sub(1).min(segment_normals.len() - 1)];
            let after = segment_normals[i.min(segment_normals.len() - 1)];
            let (r, y) = (before[0] + after[0], before[1] + after[1]);
            let length = (r * r + y * y).sqrt().max(f32::EPSILON);
            [r / length, y / length]
        })
        .collect();

    let mut positions = Vec::new();
    let mut normals = Vec::new();
    let mut texcoords = Vec::new();
    for (ring, ([radius, height], [normal_r, normal_y])) in PROFILE.iter().zip(&profile_normals).enumerate() {
        for slice in 0..=segments {
            let angle = slice as f32 / segments as f32 * std::f32::consts::TAU;
            let (sin, cos) = angle.sin_cos();
            positions.push([radius * cos, *height, radius * sin]);
            normals.push([normal_r * cos, *normal_y, normal_r * sin]);
            texcoords.push([slice as f32 / segments as f32, ring as f32 / (PROFILE.len() - 1) as f32]);
        }
    }

    let columns = segments + 1;
    let mut indices = Vec::new();
    for ring in 0..PROFILE.len() as u32 - 1 {
        for slice in 0..segments {
            let a = ring * columns + slice;
            let b = a + 1;
            let c = a + columns;
            let d = c + 1;
            indices.extend_from_slice(&[a, c, b, b, c, d]);
        }
    }

    Mesh::new(positions, indices).with_normals(normals).with_texcoords(texcoords)
}

/// Renders the lit bishop into the backend's default `COLOR` and `DEPTH` targets
fn render_base(backend: &WgpuBackend, scene: &Scene, frame: &FrameContext) -> Result<(), Box<dyn std::error::Error>> {
    let device = backend.device();
    let bishop = scene.find_node("Bishop", true).ok_or("scene has no Bishop")?;
    let mesh = bishop.geometry().ok_or("Bishop has no geometry")?;
    let color = backend.color_texture();
    let transforms = DrawTransforms::for_node(frame, bishop.world_transform, Extent::new(color.width(), color.height()));

    let uniforms = BaseUniforms {
        model_view_projection: transforms.model_view_projection().to_cols_array_2d(),
        normal_transform: transforms.normal_transform().to_cols_array_2d(),
        base_color: BISHOP_COLOR,
    };
    let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Base Uniforms"),
        contents: bytemuck::bytes_of(&uniforms),
        usage: wgpu::BufferUsages::UNIFORM,
    });
    let position_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Base Positions"),
        contents: bytemuck::cast_slice(&mesh.vertex_stream(SemanticRole::Vertex)),
        usage: wgpu::BufferUsages::VERTEX,
    });
    let normal_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Base Normals"),
        contents: bytemuck::cast_slice(&mesh.vertex_stream(SemanticRole::Normal)),
        usage: wgpu::BufferUsages::VERTEX,
    });
    let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Base Indices"),
        contents: bytemuck::cast_slice(&mesh.indices),
        usage: wgpu::BufferUsages::INDEX,
    });

    let shader_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("Base Shader"),
        source: wgpu::ShaderSource::Wgsl(BASE_SHADER.into()),
    });
    let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Base"),
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }],
    });
    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Base"),
        layout: &bind_group_layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: uniform_buffer.as_entire_binding(),
        }],
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("Base"),
        bind_group_layouts: &[&bind_group_layout],
        push_constant_ranges: &[],
    });
    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("Base"),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: &shader_module,
            entry_point: Some("vs_main"),
            compilation_options: Default::default(),
            buffers: &[
                wgpu::VertexBufferLayout {
                    array_stride: 12,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &wgpu::vertex_attr_array![0 => Float32x3],
                },
                wgpu::VertexBufferLayout {
                    array_stride: 12,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &wgpu::vertex_attr_array![1 => Float32x3],
                },
            ],
        },
        primitive: wgpu::PrimitiveState {
            cull_mode: Some(wgpu::Face::Back),
            ..Default::default()
        },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::Less,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module: &shader_module,
            entry_point: Some("fs_main"),
            compilation_options: Default::default(),
            targets: &[Some(COLOR_FORMAT.into())],
        }),
        multiview: None,
        cache: None,
    });

    let color_view = color.create_view(&wgpu::TextureViewDescriptor::default());
    let depth_view = backend.depth_texture().create_view(&wgpu::TextureViewDescriptor::default());
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Base Render") });
    {
        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Base Render"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &color_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::WHITE),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &depth_view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        render_pass.set_pipeline(&pipeline);
        render_pass.set_bind_group(0, &bind_group, &[]);
        render_pass.set_vertex_buffer(0, position_buffer.slice(..));
        render_pass.set_vertex_buffer(1, normal_buffer.slice(..));
        render_pass.set_index_buffer(index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        render_pass.draw_indexed(0..mesh.indices.len() as u32, 0, 0..1);
    }
    backend.queue().submit(std::iter::once(encoder.finish()));

    Ok(())
}

/// Reads an Rgba8Unorm texture back into an image
fn read_color(device: &wgpu::Device, queue: &wgpu::Queue, texture: &wgpu::Texture) -> Result<image::RgbaImage, Box<dyn std::error::Error>> {
    let (width, height) = (texture.width(), texture.height());
    let unpadded_bytes_per_row = width * 4;
    let bytes_per_row = unpadded_bytes_per_row.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

    // Create staging buffer for GPU-to-CPU data transfer
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Readback Buffer"),
        size: (bytes_per_row * height) as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Readback") });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        texture.size(),
    );
    queue.submit(std::iter::once(encoder.finish()));

    let buffer_slice = buffer.slice(..);
    let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
    buffer_slice.map_async(wgpu::MapMode::Read, move |v| {
        let _ = sender.send(v);
    });

    device.poll(wgpu::PollType::Wait)?;

    pollster::block_on(receiver.receive()).ok_or("Failed to map buffer for reading")??;

    // Strip the row padding required by the copy
    let data = buffer_slice.get_mapped_range();
    let pixels: Vec<u8> = data.chunks(bytes_per_row as usize).flat_map(|row| &row[..unpadded_bytes_per_row as usize]).copied().collect();

    Ok(image::RgbaImage::from_raw(width, height, pixels).ok_or("Failed to create image from data")?)
}
