//! Turns blits and triangle batches against a tiled image into one draw
//! submission per touched tile.
//!
//! The compositor only reads tile metadata. Callers bring the store up to
//! date before drawing.

use glam::{Affine2, Vec2};
use mosaic_core::{Color, ImageFlags, Rect};

use crate::backend::TextureHandle;
use crate::grid::TileGrid;
use crate::store::TileStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    #[default]
    Normal,
    Additive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    #[default]
    Linear,
    Nearest,
}

impl FilterMode {
    pub fn for_flags(flags: ImageFlags) -> Self {
        if flags.contains(ImageFlags::NEAREST_FILTERING) {
            FilterMode::Nearest
        } else {
            FilterMode::Linear
        }
    }
}

/// Normalized texture coordinates within one tile texture.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct UvRect {
    pub u0: f32,
    pub v0: f32,
    pub u1: f32,
    pub v1: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileVertex {
    pub position: Vec2,
    pub uv: Vec2,
    pub color: Color,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    /// Axis-aligned quad with its top-left at `position`.
    Quad {
        position: Vec2,
        size: Vec2,
        uv: UvRect,
    },
    /// Three vertices per triangle.
    Triangles(Vec<TileVertex>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrawSubmission {
    pub texture: TextureHandle,
    pub geometry: Geometry,
    pub tint: Color,
    pub blend: BlendMode,
    pub filter: FilterMode,
    pub clip: Option<Rect>,
}

/// Receiver of draw submissions, usually a batch feeding the GPU.
pub trait DrawSink {
    fn submit(&mut self, submission: DrawSubmission);
}

impl DrawSink for Vec<DrawSubmission> {
    fn submit(&mut self, submission: DrawSubmission) {
        self.push(submission);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DrawParams {
    pub tint: Color,
    pub blend: BlendMode,
    pub clip: Option<Rect>,
}

/// Triangle corner. `u`/`v` span the whole image: (1, 1) is its
/// bottom-right corner regardless of tiling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriVertex {
    pub x: f32,
    pub y: f32,
    pub u: f32,
    pub v: f32,
    pub color: Option<Color>,
}

impl TriVertex {
    pub fn new(x: f32, y: f32, u: f32, v: f32) -> Self {
        Self {
            x,
            y,
            u,
            v,
            color: None,
        }
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.color = Some(color);
        self
    }
}

/// Destination of a scaled blit. `mirror` flips the image left to right
/// inside `size`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stretch {
    pub position: Vec2,
    pub size: Vec2,
    pub mirror: bool,
}

/// The part of a request that one tile can serve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TexturePiece {
    pub texture: TextureHandle,
    pub width: u32,
    pub height: u32,
    pub uv: UvRect,
}

pub struct Compositor<'a> {
    store: &'a TileStore,
    grid: Option<&'a TileGrid>,
    filter: FilterMode,
}

impl<'a> Compositor<'a> {
    pub fn new(store: &'a TileStore) -> Self {
        let grid = if store.is_usable() { store.grid() } else { None };
        Self {
            store,
            grid,
            filter: FilterMode::for_flags(store.flags()),
        }
    }

    /// Resolve the tile holding image pixel `(x, y)` and clip a
    /// `width x height` request to that tile's covered region.
    pub fn get_texture(&self, x: u32, y: u32, width: u32, height: u32) -> Option<TexturePiece> {
        let grid = self.grid?;
        let index = grid.locate(x, y)?;
        let tile = grid.tiles().get(index)?;
        let texture = *self.store.textures().get(index)?;

        let left = x - tile.x;
        let top = y - tile.y;
        let width = width.min(tile.covered_width - left);
        let height = height.min(tile.covered_height - top);
        let physical_width = tile.width as f32;
        let physical_height = tile.height as f32;

        Some(TexturePiece {
            texture,
            width,
            height,
            uv: UvRect {
                u0: left as f32 / physical_width,
                v0: top as f32 / physical_height,
                u1: (left + width) as f32 / physical_width,
                v1: (top + height) as f32 / physical_height,
            },
        })
    }

    /// Draw `src` of the image with its top-left at `(dest_x, dest_y)`.
    /// Returns the number of submissions.
    pub fn blt(
        &self,
        sink: &mut dyn DrawSink,
        dest_x: f32,
        dest_y: f32,
        src: Rect,
        params: &DrawParams,
    ) -> usize {
        let stretch = Stretch {
            position: Vec2::new(dest_x, dest_y),
            size: Vec2::new(src.width as f32, src.height as f32),
            mirror: false,
        };
        self.blt_stretched(sink, src, stretch, params)
    }

    /// Draw `src` scaled to fill `stretch`.
    pub fn blt_stretched(
        &self,
        sink: &mut dyn DrawSink,
        src: Rect,
        stretch: Stretch,
        params: &DrawParams,
    ) -> usize {
        if src.is_empty() || stretch.size.x <= 0.0 || stretch.size.y <= 0.0 {
            return 0;
        }
        let dest_pos = stretch.position;
        let scale = stretch.size / Vec2::new(src.width as f32, src.height as f32);
        self.walk_pieces(src, |x, y, piece| {
            let size = Vec2::new(piece.width as f32, piece.height as f32) * scale;
            let top = dest_pos.y + (y - src.y) as f32 * scale.y;
            let (left, uv) = if stretch.mirror {
                let right_edge = (src.right() - x) as f32 * scale.x;
                let uv = UvRect {
                    u0: piece.uv.u1,
                    u1: piece.uv.u0,
                    ..piece.uv
                };
                (dest_pos.x + right_edge - size.x, uv)
            } else {
                (dest_pos.x + (x - src.x) as f32 * scale.x, piece.uv)
            };
            sink.submit(DrawSubmission {
                texture: piece.texture,
                geometry: Geometry::Quad {
                    position: Vec2::new(left, top),
                    size,
                    uv,
                },
                tint: params.tint,
                blend: params.blend,
                filter: self.filter,
                clip: params.clip,
            });
        })
    }

    /// Draw `src` through an arbitrary affine transform (rotation, shear,
    /// scale). `src`'s top-left maps to `transform`'s origin. Each touched
    /// tile gets two triangles whose UVs stay inside that tile.
    pub fn blt_transformed(
        &self,
        sink: &mut dyn DrawSink,
        src: Rect,
        transform: Affine2,
        params: &DrawParams,
    ) -> usize {
        self.walk_pieces(src, |x, y, piece| {
            let origin = Vec2::new((x - src.x) as f32, (y - src.y) as f32);
            let (w, h) = (piece.width as f32, piece.height as f32);
            let uv = piece.uv;
            let corner = |dx: f32, dy: f32, u: f32, v: f32| TileVertex {
                position: transform.transform_point2(origin + Vec2::new(dx, dy)),
                uv: Vec2::new(u, v),
                color: params.tint,
            };
            let top_left = corner(0.0, 0.0, uv.u0, uv.v0);
            let top_right = corner(w, 0.0, uv.u1, uv.v0);
            let bottom_left = corner(0.0, h, uv.u0, uv.v1);
            let bottom_right = corner(w, h, uv.u1, uv.v1);
            sink.submit(DrawSubmission {
                texture: piece.texture,
                geometry: Geometry::Triangles(vec![
                    top_left,
                    top_right,
                    bottom_left,
                    bottom_left,
                    top_right,
                    bottom_right,
                ]),
                tint: params.tint,
                blend: params.blend,
                filter: self.filter,
                clip: params.clip,
            });
        })
    }

    /// Clip `src` to the image and hand each tile piece it covers, with the
    /// image position of the piece's top-left, to `emit`. Returns the number
    /// of pieces.
    fn walk_pieces(&self, src: Rect, mut emit: impl FnMut(i32, i32, &TexturePiece)) -> usize {
        let Some(grid) = self.grid else {
            return 0;
        };
        let (image_width, image_height) = grid.image_size();
        let bounds = Rect::new(0, 0, image_width as i32, image_height as i32);
        let clipped = src.intersect(&bounds);
        if clipped.is_empty() {
            return 0;
        }

        let (left, top) = (clipped.x as u32, clipped.y as u32);
        let (right, bottom) = (clipped.right() as u32, clipped.bottom() as u32);
        let mut pieces = 0;
        let mut y = top;
        while y < bottom {
            let mut x = left;
            let mut row_height = 0;
            while x < right {
                let Some(piece) = self.get_texture(x, y, right - x, bottom - y) else {
                    return pieces;
                };
                emit(x as i32, y as i32, &piece);
                pieces += 1;
                x += piece.width;
                row_height = piece.height;
            }
            y += row_height;
        }
        pieces
    }

    /// Draw textured triangles, splitting them across the tiles their UVs
    /// touch. Vertices without a colour take the tint. Returns the number of
    /// submissions, at most one per tile.
    ///
    /// A triangle that straddles tiles is submitted whole to each tile with
    /// UVs rebased to that tile, so coordinates outside `0..1` occur; the
    /// sink must treat them as transparent (border addressing).
    pub fn blt_triangles(
        &self,
        sink: &mut dyn DrawSink,
        triangles: &[[TriVertex; 3]],
        translation: Vec2,
        params: &DrawParams,
    ) -> usize {
        let Some(grid) = self.grid else {
            return 0;
        };
        if triangles.is_empty() || grid.is_empty() {
            return 0;
        }
        let (max_u, max_v) = grid.max_uv();
        let vertex = |corner: &TriVertex, uv: Vec2| TileVertex {
            position: Vec2::new(corner.x, corner.y) + translation,
            uv,
            color: corner.color.unwrap_or(params.tint),
        };

        if max_u <= 1.0 && max_v <= 1.0 {
            let (scale_u, scale_v) = grid.uv_scale(0);
            let scale = Vec2::new(max_u * scale_u, max_v * scale_v);
            let vertices = triangles
                .iter()
                .flatten()
                .map(|corner| vertex(corner, Vec2::new(corner.u, corner.v) * scale))
                .collect();
            self.submit_triangles(sink, 0, vertices, params);
            return 1;
        }

        let (columns, rows) = grid.dimensions();
        let mut per_tile: Vec<Vec<TileVertex>> = vec![Vec::new(); grid.len()];
        for triangle in triangles {
            let tile_space = (*triangle).map(|c| Vec2::new(c.u * max_u, c.v * max_v));
            let min = tile_space[0].min(tile_space[1]).min(tile_space[2]);
            let max = tile_space[0].max(tile_space[1]).max(tile_space[2]);
            let (Some(col_range), Some(row_range)) =
                (span(min.x, max.x, columns), span(min.y, max.y, rows))
            else {
                continue;
            };

            for row in row_range {
                for col in col_range.clone() {
                    let index = grid.index(col, row);
                    let (scale_u, scale_v) = grid.uv_scale(index);
                    let origin = Vec2::new(col as f32, row as f32);
                    let scale = Vec2::new(scale_u, scale_v);
                    per_tile[index].extend(
                        triangle
                            .iter()
                            .zip(tile_space)
                            .map(|(corner, uv)| vertex(corner, (uv - origin) * scale)),
                    );
                }
            }
        }

        let mut submitted = 0;
        for (index, vertices) in per_tile.into_iter().enumerate() {
            if vertices.is_empty() {
                continue;
            }
            self.submit_triangles(sink, index, vertices, params);
            submitted += 1;
        }
        submitted
    }

    fn submit_triangles(
        &self,
        sink: &mut dyn DrawSink,
        index: usize,
        vertices: Vec<TileVertex>,
        params: &DrawParams,
    ) {
        let Some(&texture) = self.store.textures().get(index) else {
            return;
        };
        sink.submit(DrawSubmission {
            texture,
            geometry: Geometry::Triangles(vertices),
            tint: params.tint,
            blend: params.blend,
            filter: self.filter,
            clip: params.clip,
        });
    }
}

/// Tiles in `0..count` overlapped by the tile-space interval `[min, max]`.
fn span(min: f32, max: f32, count: u32) -> Option<std::ops::Range<u32>> {
    if count == 0 || max < 0.0 || min >= count as f32 {
        return None;
    }
    let first = (min.floor().max(0.0) as u32).min(count - 1);
    let last = (max.ceil() as u32).clamp(first + 1, count);
    Some(first..last)
}
