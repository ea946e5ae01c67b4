//! Draws a [`SpriteBatch`] of tile submissions into an offscreen target.
//!
//! One pipeline per [`BlendMode`]. Each draw call binds its tile texture with
//! the sampler for its filter, and its clip rect becomes the scissor.

use std::collections::HashMap;

use mosaic_core::{Color, Rect};
use wgpu::util::DeviceExt;

use crate::backend::{BackendError, TextureHandle};
use crate::batch::{SpriteBatch, SpriteVertex};
use crate::compositor::{BlendMode, FilterMode};
use crate::gpu_context::GpuContext;
use crate::wgpu_backend::{read_texture_argb, WgpuBackend, TILE_TEXTURE_FORMAT};

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct ViewportUniform {
    size: [f32; 2],
    _padding: [f32; 2],
}

/// Colour target in the tile texture format that can be read back.
pub struct RenderTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl RenderTarget {
    pub fn new(context: &GpuContext, width: u32, height: u32) -> Result<Self, BackendError> {
        let max = context.max_texture_dimension();
        if width == 0 || height == 0 || width > max || height > max {
            return Err(BackendError::InvalidSize { width, height });
        }
        let texture = context.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Tile Render Target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TILE_TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(Self { texture, view })
    }

    pub fn width(&self) -> u32 {
        self.texture.width()
    }

    pub fn height(&self) -> u32 {
        self.texture.height()
    }

    pub fn read_argb(&self, context: &GpuContext) -> Result<Vec<u32>, BackendError> {
        read_texture_argb(context, &self.texture)
    }
}

pub struct TilePipeline {
    normal: wgpu::RenderPipeline,
    additive: wgpu::RenderPipeline,
    viewport_layout: wgpu::BindGroupLayout,
    tile_layout: wgpu::BindGroupLayout,
    linear_sampler: wgpu::Sampler,
    nearest_sampler: wgpu::Sampler,
}

impl TilePipeline {
    pub fn new(backend: &WgpuBackend) -> Self {
        let device = &backend.context().device;
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Tile Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("tile.wgsl").into()),
        });

        let viewport_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Tile Viewport Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let tile_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Tile Texture Layout"),
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
            ],
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Tile Pipeline Layout"),
            bind_group_layouts: &[&viewport_layout, &tile_layout],
            push_constant_ranges: &[],
        });

        let normal = create_pipeline(device, &layout, &shader, BlendMode::Normal);
        let additive = create_pipeline(device, &layout, &shader, BlendMode::Additive);

        Self {
            normal,
            additive,
            viewport_layout,
            tile_layout,
            linear_sampler: backend.create_tile_sampler(FilterMode::Linear),
            nearest_sampler: backend.create_tile_sampler(FilterMode::Nearest),
        }
    }

    /// Draw `batch` into `target`, clearing it to `clear` first when given.
    /// Returns the number of indexed draws issued.
    pub fn render(
        &self,
        backend: &WgpuBackend,
        batch: &SpriteBatch,
        target: &RenderTarget,
        clear: Option<Color>,
    ) -> Result<usize, BackendError> {
        let context = backend.context();
        let device = &context.device;

        let viewport = ViewportUniform {
            size: [target.width() as f32, target.height() as f32],
            _padding: [0.0; 2],
        };
        let viewport_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Tile Viewport Buffer"),
            contents: bytemuck::bytes_of(&viewport),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let viewport_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Tile Viewport Bind Group"),
            layout: &self.viewport_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: viewport_buffer.as_entire_binding(),
            }],
        });

        let mut tile_groups: HashMap<(TextureHandle, FilterMode), wgpu::BindGroup> =
            HashMap::new();
        for call in batch.draw_calls() {
            let key = (call.texture, call.filter);
            if tile_groups.contains_key(&key) {
                continue;
            }
            let view = backend
                .texture_view(call.texture)
                .ok_or(BackendError::UnknownTexture(call.texture))?;
            let sampler = match call.filter {
                FilterMode::Linear => &self.linear_sampler,
                FilterMode::Nearest => &self.nearest_sampler,
            };
            let group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Tile Bind Group"),
                layout: &self.tile_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(sampler),
                    },
                ],
            });
            tile_groups.insert(key, group);
        }

        let buffers = if batch.is_empty() {
            None
        } else {
            let vertices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Tile Vertex Buffer"),
                contents: bytemuck::cast_slice(batch.vertices()),
                usage: wgpu::BufferUsages::VERTEX,
            });
            let indices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Tile Index Buffer"),
                contents: bytemuck::cast_slice(batch.indices()),
                usage: wgpu::BufferUsages::INDEX,
            });
            Some((vertices, indices))
        };

        let load = match clear {
            Some(color) => wgpu::LoadOp::Clear(clear_color(color)),
            None => wgpu::LoadOp::Load,
        };
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Tile Render Encoder"),
        });
        let mut issued = 0;
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Tile Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                ..Default::default()
            });

            if let Some((vertices, indices)) = &buffers {
                pass.set_bind_group(0, &viewport_group, &[]);
                pass.set_vertex_buffer(0, vertices.slice(..));
                pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);

                let mut bound_blend = None;
                let mut bound_tile = None;
                for call in batch.draw_calls() {
                    let Some((x, y, width, height)) =
                        scissor_rect(call.clip, target.width(), target.height())
                    else {
                        continue;
                    };
                    pass.set_scissor_rect(x, y, width, height);
                    if bound_blend != Some(call.blend) {
                        pass.set_pipeline(match call.blend {
                            BlendMode::Normal => &self.normal,
                            BlendMode::Additive => &self.additive,
                        });
                        bound_blend = Some(call.blend);
                    }
                    let key = (call.texture, call.filter);
                    if bound_tile != Some(key) {
                        if let Some(group) = tile_groups.get(&key) {
                            pass.set_bind_group(1, group, &[]);
                        }
                        bound_tile = Some(key);
                    }
                    pass.draw_indexed(call.index_start..call.index_start + call.index_count, 0, 0..1);
                    issued += 1;
                }
            }
        }
        context.queue.submit(std::iter::once(encoder.finish()));
        Ok(issued)
    }
}

fn create_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    shader: &wgpu::ShaderModule,
    blend: BlendMode,
) -> wgpu::RenderPipeline {
    let label = match blend {
        BlendMode::Normal => "Tile Pipeline (normal)",
        BlendMode::Additive => "Tile Pipeline (additive)",
    };
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_main"),
            buffers: &[SpriteVertex::layout()],
            compilation_options: Default::default(),
        },
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: TILE_TEXTURE_FORMAT,
                blend: Some(blend_state(blend)),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        multiview: None,
        cache: None,
    })
}

fn blend_state(blend: BlendMode) -> wgpu::BlendState {
    match blend {
        BlendMode::Normal => wgpu::BlendState::ALPHA_BLENDING,
        BlendMode::Additive => wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::SrcAlpha,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            },
            alpha: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            },
        },
    }
}

fn clear_color(color: Color) -> wgpu::Color {
    let [r, g, b, a] = color.to_f32_array();
    wgpu::Color {
        r: r as f64,
        g: g as f64,
        b: b as f64,
        a: a as f64,
    }
}

/// Scissor for a draw: its clip cut to the target, or the whole target.
/// `None` when nothing of the clip is on the target.
fn scissor_rect(clip: Option<Rect>, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let full = Rect::new(0, 0, width as i32, height as i32);
    let rect = clip.map_or(full, |clip| clip.intersect(&full));
    if rect.is_empty() {
        return None;
    }
    Some((
        rect.x as u32,
        rect.y as u32,
        rect.width as u32,
        rect.height as u32,
    ))
}
