//! GPU lens-distortion compositing.
//!
//! The compositor owns every GPU resource the pipeline needs: the offscreen
//! color + depth targets the scene is rendered into, the warp pipeline, and
//! the per-eye mesh buffers. All of it lives on the render thread; nothing
//! here is shared across threads.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use log::{debug, info};
use thiserror::Error;

use crate::geometry::TextureViewport;
use crate::mesh::DistortionMesh;
use crate::params::Hmd;

/// Depth-stencil format attached to every scene render pass.
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24PlusStencil8;

/// Device, queue and target format shared between the host and the
/// compositor. The host hands this over once the surface exists.
#[derive(Clone)]
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    /// Format of both the presentation surface and the offscreen target.
    pub surface_format: wgpu::TextureFormat,
}

/// Configuration errors are unrecoverable for the current setup: the
/// pipeline must stop rather than render garbage.
#[derive(Debug, Error)]
pub enum CompositorError {
    #[error("warp shader rejected by device: {0}")]
    ShaderValidation(String),
    #[error("warp pipeline creation failed: {0}")]
    PipelineValidation(String),
    #[error("offscreen target allocation ({width}x{height}) failed: {reason}")]
    OffscreenAllocation {
        width: u32,
        height: u32,
        reason: String,
    },
    #[error("offscreen target would be empty ({width}x{height}); check screen and viewer parameters")]
    EmptyOffscreenTarget { width: u32, height: u32 },
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct WarpUniforms {
    /// x = texture-coordinate scale, yzw padding.
    tex_coord_scale: [f32; 4],
}

struct GpuMesh {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
}

struct OffscreenTarget {
    _color: wgpu::Texture,
    color_view: wgpu::TextureView,
    _depth: wgpu::Texture,
    depth_view: wgpu::TextureView,
    bind_group: wgpu::BindGroup,
    width: u32,
    height: u32,
}

/// Owns the offscreen render target and the warp pass.
pub struct DistortionCompositor {
    gpu: GpuContext,
    pipeline: wgpu::RenderPipeline,
    sampler: wgpu::Sampler,
    uniform_buffer: wgpu::Buffer,
    bind_group_layout: wgpu::BindGroupLayout,
    resolution_scale: f32,
    target: Option<OffscreenTarget>,
    left_mesh: Option<GpuMesh>,
    right_mesh: Option<GpuMesh>,
}

impl DistortionCompositor {
    /// Compiles the warp pipeline. Shader or pipeline rejection is a fatal
    /// configuration error surfaced to the caller instead of a panic.
    pub fn new(gpu: GpuContext) -> Result<Self, CompositorError> {
        let device = &gpu.device;

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Warp Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/distortion.wgsl").into()),
        });
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(CompositorError::ShaderValidation(err.to_string()));
        }

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Warp Uniform Buffer"),
            size: std::mem::size_of::<WarpUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        gpu.queue.write_buffer(
            &uniform_buffer,
            0,
            bytemuck::bytes_of(&WarpUniforms {
                tex_coord_scale: [1.0, 0.0, 0.0, 0.0],
            }),
        );

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Warp Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Warp Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        // position + vignette + texcoord interleaved, 20-byte stride.
        const VERTEX_ATTRS: [wgpu::VertexAttribute; 3] =
            wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32, 2 => Float32x2];
        let vertex_layout = wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<crate::mesh::MeshVertex>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &VERTEX_ATTRS,
        };

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Warp Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[vertex_layout],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: gpu.surface_format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                strip_index_format: Some(wgpu::IndexFormat::Uint32),
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(CompositorError::PipelineValidation(err.to_string()));
        }

        info!("distortion compositor initialized");
        Ok(Self {
            gpu,
            pipeline,
            sampler,
            uniform_buffer,
            bind_group_layout,
            resolution_scale: 1.0,
            target: None,
            left_mesh: None,
            right_mesh: None,
        })
    }

    /// Current sampling scale for reduced-resolution rendering.
    pub fn resolution_scale(&self) -> f32 {
        self.resolution_scale
    }

    /// Adjusts the sampling uniform only; mesh geometry is untouched.
    pub fn set_resolution_scale(&mut self, scale: f32) {
        self.resolution_scale = scale;
        self.gpu.queue.write_buffer(
            &self.uniform_buffer,
            0,
            bytemuck::bytes_of(&WarpUniforms {
                tex_coord_scale: [scale, 0.0, 0.0, 0.0],
            }),
        );
    }

    /// Rebuilds both eyes' warp meshes and, when the combined stereo
    /// texture size changed, tears down and reallocates the offscreen
    /// target (it is never resized in place).
    pub fn on_projection_changed(
        &mut self,
        hmd: &Hmd,
        left_viewport: &TextureViewport,
        right_viewport: &TextureViewport,
    ) -> Result<(), CompositorError> {
        let screen = &hmd.screen;
        let viewer = &hmd.viewer;

        let texture_width_m = left_viewport.width + right_viewport.width;
        let texture_height_m = left_viewport.height.max(right_viewport.height);
        let width_px = (texture_width_m * screen.x_pixels_per_meter()).round() as u32;
        let height_px = (texture_height_m * screen.y_pixels_per_meter()).round() as u32;

        // Lens center on the physical screen, left eye first; the right
        // eye's center mirrors it about the screen midline.
        let x_eye_offset_screen =
            screen.width_meters() / 2.0 - viewer.interpupillary_distance / 2.0;
        let y_eye_offset_screen =
            viewer.vertical_distance_to_lens_center - screen.border_size_meters;

        let left = DistortionMesh::build(
            &viewer.distortion,
            screen.width_meters(),
            screen.height_meters(),
            x_eye_offset_screen,
            y_eye_offset_screen,
            texture_width_m,
            texture_height_m,
            left_viewport,
        );
        let right = DistortionMesh::build(
            &viewer.distortion,
            screen.width_meters(),
            screen.height_meters(),
            screen.width_meters() - x_eye_offset_screen,
            y_eye_offset_screen,
            texture_width_m,
            texture_height_m,
            right_viewport,
        );
        self.left_mesh = Some(self.upload_mesh("Left", &left));
        self.right_mesh = Some(self.upload_mesh("Right", &right));

        let needs_realloc = self
            .target
            .as_ref()
            .map_or(true, |t| t.width != width_px || t.height != height_px);
        if needs_realloc {
            self.target = Some(self.create_target(width_px, height_px)?);
        }
        Ok(())
    }

    /// Scene render passes target these views until
    /// [`after_draw_frame`](Self::after_draw_frame) runs. `None` until the
    /// first projection update.
    pub fn scene_target(&self) -> Option<(&wgpu::TextureView, &wgpu::TextureView)> {
        self.target
            .as_ref()
            .map(|t| (&t.color_view, &t.depth_view))
    }

    /// Offscreen target size in pixels.
    pub fn offscreen_size(&self) -> Option<(u32, u32)> {
        self.target.as_ref().map(|t| (t.width, t.height))
    }

    /// Warps the offscreen scene onto the output: clears it, then draws
    /// each eye's mesh scissored to its half of the screen. The pass is
    /// self-contained, so no surrounding pipeline state needs saving or
    /// restoring.
    pub fn after_draw_frame(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        output: &wgpu::TextureView,
        screen_width: u32,
        screen_height: u32,
    ) {
        let (Some(target), Some(left), Some(right)) =
            (&self.target, &self.left_mesh, &self.right_mesh)
        else {
            return;
        };

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Warp Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: output,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &target.bind_group, &[]);

        let half_width = screen_width / 2;
        pass.set_scissor_rect(0, 0, half_width, screen_height);
        draw_mesh(&mut pass, left);
        pass.set_scissor_rect(half_width, 0, screen_width - half_width, screen_height);
        draw_mesh(&mut pass, right);
    }

    fn upload_mesh(&self, label: &str, mesh: &DistortionMesh) -> GpuMesh {
        let device = &self.gpu.device;
        let vertex_bytes: &[u8] = bytemuck::cast_slice(&mesh.vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(&mesh.indices);

        let vertex_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{label} Warp Vertex Buffer")),
            size: vertex_bytes.len() as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let index_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{label} Warp Index Buffer")),
            size: index_bytes.len() as u64,
            usage: wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.gpu.queue.write_buffer(&vertex_buffer, 0, vertex_bytes);
        self.gpu.queue.write_buffer(&index_buffer, 0, index_bytes);

        GpuMesh {
            vertex_buffer,
            index_buffer,
            index_count: mesh.indices.len() as u32,
        }
    }

    fn create_target(&self, width: u32, height: u32) -> Result<OffscreenTarget, CompositorError> {
        if width == 0 || height == 0 {
            return Err(CompositorError::EmptyOffscreenTarget { width, height });
        }
        debug!("allocating offscreen target {width}x{height}");

        let device = &self.gpu.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let color = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Offscreen Scene Texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: self.gpu.surface_format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let color_view = color.create_view(&wgpu::TextureViewDescriptor::default());

        let depth = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Offscreen Depth Texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Warp Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&color_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
            ],
        });

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(CompositorError::OffscreenAllocation {
                width,
                height,
                reason: err.to_string(),
            });
        }

        Ok(OffscreenTarget {
            _color: color,
            color_view,
            _depth: depth,
            depth_view,
            bind_group,
            width,
            height,
        })
    }
}

fn draw_mesh(pass: &mut wgpu::RenderPass<'_>, mesh: &GpuMesh) {
    pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
    pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
    pass.draw_indexed(0..mesh.index_count, 0, 0..1);
}
