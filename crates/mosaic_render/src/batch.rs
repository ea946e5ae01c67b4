use mosaic_core::Rect;

use crate::backend::TextureHandle;
use crate::compositor::{BlendMode, DrawSink, DrawSubmission, FilterMode, Geometry};

/// Vertex as `tile.wgsl` reads it: position in target pixels, UV in the
/// tile texture, tint.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SpriteVertex {
    pub position: [f32; 2],
    pub tex_coords: [f32; 2],
    pub color: [f32; 4],
}

impl SpriteVertex {
    const ATTRIBUTES: [wgpu::VertexAttribute; 3] =
        wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2, 2 => Float32x4];

    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<SpriteVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

/// A contiguous run of indices that share texture and pipeline state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawCall {
    pub texture: TextureHandle,
    pub filter: FilterMode,
    pub blend: BlendMode,
    pub clip: Option<Rect>,
    pub index_start: u32,
    pub index_count: u32,
}

impl DrawCall {
    fn same_state(&self, other: &DrawCall) -> bool {
        self.texture == other.texture
            && self.filter == other.filter
            && self.blend == other.blend
            && self.clip == other.clip
    }
}

/// Mesh builder fed by the compositor. Consecutive submissions that share a
/// texture and state collapse into one indexed draw.
#[derive(Debug, Default)]
pub struct SpriteBatch {
    vertices: Vec<SpriteVertex>,
    indices: Vec<u32>,
    draw_calls: Vec<DrawCall>,
}

impl SpriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vertices(&self) -> &[SpriteVertex] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn draw_calls(&self) -> &[DrawCall] {
        &self.draw_calls
    }

    pub fn is_empty(&self) -> bool {
        self.draw_calls.is_empty()
    }

    pub fn clear(&mut self) {
        self.vertices.clear();
        self.indices.clear();
        self.draw_calls.clear();
    }

    fn push_draw_call(&mut self, call: DrawCall) {
        if let Some(last) = self.draw_calls.last_mut() {
            let contiguous = last.index_start + last.index_count == call.index_start;
            if last.same_state(&call) && contiguous {
                last.index_count += call.index_count;
                return;
            }
        }
        self.draw_calls.push(call);
    }
}

impl DrawSink for SpriteBatch {
    fn submit(&mut self, submission: DrawSubmission) {
        let base_index = self.vertices.len() as u32;
        let index_start = self.indices.len() as u32;

        match &submission.geometry {
            Geometry::Quad { position, size, uv } => {
                let color = submission.tint.to_f32_array();
                let (x0, y0) = (position.x, position.y);
                let (x1, y1) = (position.x + size.x, position.y + size.y);
                for (position, tex_coords) in [
                    ([x0, y0], [uv.u0, uv.v0]),
                    ([x1, y0], [uv.u1, uv.v0]),
                    ([x0, y1], [uv.u0, uv.v1]),
                    ([x1, y1], [uv.u1, uv.v1]),
                ] {
                    self.vertices.push(SpriteVertex {
                        position,
                        tex_coords,
                        color,
                    });
                }
                self.indices.extend_from_slice(&[
                    base_index,
                    base_index + 1,
                    base_index + 2,
                    base_index + 2,
                    base_index + 1,
                    base_index + 3,
                ]);
            }
            Geometry::Triangles(vertices) => {
                for vertex in vertices {
                    self.vertices.push(SpriteVertex {
                        position: vertex.position.to_array(),
                        tex_coords: vertex.uv.to_array(),
                        color: vertex.color.to_f32_array(),
                    });
                }
                self.indices
                    .extend(base_index..base_index + vertices.len() as u32);
            }
        }

        let index_count = self.indices.len() as u32 - index_start;
        if index_count == 0 {
            return;
        }
        self.push_draw_call(DrawCall {
            texture: submission.texture,
            filter: submission.filter,
            blend: submission.blend,
            clip: submission.clip,
            index_start,
            index_count,
        });
    }
}
