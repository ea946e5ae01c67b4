//! Tile textures on a real GPU.
//!
//! Packed ARGB stored little-endian is B, G, R, A in memory, which is
//! exactly `Bgra8Unorm`. wgpu has no 16-bit colour or paletted sampling
//! formats, so this backend advertises `A8R8G8B8` only and the store
//! degrades every image to it.

use std::borrow::Cow;
use std::collections::HashMap;

use log::{error, info};
use mosaic_core::{HardwareCaps, Palette, PixelFormat};

use crate::backend::{check_texture_size, BackendError, TextureHandle, TileBackend};
use crate::compositor::FilterMode;
use crate::gpu_context::GpuContext;
use crate::surface::TileSurface;

pub const TILE_TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Bgra8Unorm;

/// Tile caps for a device with the given limits: any size up to the 2D
/// texture limit, 32-bit only.
pub fn caps_from_limits(limits: &wgpu::Limits) -> HardwareCaps {
    HardwareCaps::argb_only(limits.max_texture_dimension_2d)
}

pub struct WgpuBackend {
    context: GpuContext,
    caps: HardwareCaps,
    textures: HashMap<TextureHandle, wgpu::Texture>,
    next_handle: u64,
}

impl WgpuBackend {
    pub fn new(context: GpuContext) -> Self {
        let caps = caps_from_limits(&context.device.limits());
        info!(
            "wgpu tile backend on {}: tiles up to {} px per side",
            context.adapter_name,
            context.max_texture_dimension()
        );
        Self {
            context,
            caps,
            textures: HashMap::new(),
            next_handle: 1,
        }
    }

    pub fn headless() -> Result<Self, String> {
        GpuContext::headless().map(Self::new)
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    pub fn texture(&self, handle: TextureHandle) -> Option<&wgpu::Texture> {
        self.textures.get(&handle)
    }

    pub fn texture_view(&self, handle: TextureHandle) -> Option<wgpu::TextureView> {
        self.textures
            .get(&handle)
            .map(|texture| texture.create_view(&wgpu::TextureViewDescriptor::default()))
    }

    /// Current texel contents of a tile as packed ARGB, padding included.
    pub fn read_tile(&self, handle: TextureHandle) -> Result<Vec<u32>, BackendError> {
        let texture = self
            .textures
            .get(&handle)
            .ok_or(BackendError::UnknownTexture(handle))?;
        read_texture_argb(&self.context, texture)
    }

    /// Sampler for tile draws. Edges clamp so padding texels, not the
    /// opposite edge, feed the bilinear filter.
    pub fn create_tile_sampler(&self, filter: FilterMode) -> wgpu::Sampler {
        let filter = match filter {
            FilterMode::Linear => wgpu::FilterMode::Linear,
            FilterMode::Nearest => wgpu::FilterMode::Nearest,
        };
        self.context.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Tile Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: filter,
            min_filter: filter,
            ..Default::default()
        })
    }

    fn pop_error_scope(&self, requested_bytes: usize) -> Option<BackendError> {
        let err = pollster::block_on(self.context.device.pop_error_scope())?;
        Some(match err {
            wgpu::Error::OutOfMemory { .. } => BackendError::OutOfMemory { requested_bytes },
            other => BackendError::Device(other.to_string()),
        })
    }
}

impl TileBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn caps(&self) -> HardwareCaps {
        self.caps
    }

    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<TextureHandle, BackendError> {
        if format != PixelFormat::A8R8G8B8 {
            return Err(BackendError::UnsupportedFormat(format));
        }
        check_texture_size(&self.caps, width, height)?;

        let device = &self.context.device;
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Image Tile"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TILE_TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let requested_bytes = width as usize * height as usize * format.bytes_per_pixel();
        let validation = self.pop_error_scope(requested_bytes);
        let out_of_memory = self.pop_error_scope(requested_bytes);
        if let Some(err) = out_of_memory.or(validation) {
            error!("Tile texture {}x{} creation failed: {}", width, height, err);
            texture.destroy();
            return Err(err);
        }

        let handle = TextureHandle::from_raw(self.next_handle);
        self.next_handle += 1;
        self.textures.insert(handle, texture);
        Ok(handle)
    }

    fn upload(
        &mut self,
        texture: TextureHandle,
        surface: &TileSurface,
        _palette: Option<&Palette>,
    ) -> Result<(), BackendError> {
        let target = self
            .textures
            .get(&texture)
            .ok_or(BackendError::UnknownTexture(texture))?;
        if surface.format() != PixelFormat::A8R8G8B8
            || target.width() != surface.width()
            || target.height() != surface.height()
        {
            return Err(BackendError::SurfaceMismatch(texture));
        }

        let (width, height) = (surface.width(), surface.height());
        let stride = surface.pitch() as u32;
        let padded = compute_padded_stride(stride);
        let bytes = surface.bytes();
        let upload: Cow<'_, [u8]> = if padded != stride {
            let mut staging = vec![0u8; padded as usize * height as usize];
            let rs = stride as usize;
            let rd = padded as usize;
            for y in 0..height as usize {
                staging[y * rd..y * rd + rs].copy_from_slice(&bytes[y * rs..y * rs + rs]);
            }
            Cow::Owned(staging)
        } else {
            Cow::Borrowed(bytes)
        };

        self.context.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            upload.as_ref(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn release(&mut self, texture: TextureHandle) {
        if let Some(texture) = self.textures.remove(&texture) {
            texture.destroy();
        }
    }
}

/// Copy a `TILE_TEXTURE_FORMAT` texture back to the CPU. Blocks until the
/// GPU has finished.
pub(crate) fn read_texture_argb(
    context: &GpuContext,
    texture: &wgpu::Texture,
) -> Result<Vec<u32>, BackendError> {
    let (width, height) = (texture.width(), texture.height());
    let stride = width * 4;
    let padded = compute_padded_stride(stride);
    let device = &context.device;

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Tile Readback Buffer"),
        size: padded as u64 * height as u64,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Tile Readback Encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &staging,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded),
                rows_per_image: Some(height),
            },
        },
        texture.size(),
    );
    context.queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    let _ = device.poll(wgpu::Maintain::Wait);
    rx.recv()
        .map_err(|err| BackendError::Device(err.to_string()))?
        .map_err(|err| BackendError::Device(err.to_string()))?;

    let mapped = slice.get_mapped_range();
    let mut pixels = Vec::with_capacity(width as usize * height as usize);
    for row in mapped.chunks_exact(padded as usize) {
        pixels.extend(
            row[..stride as usize]
                .chunks_exact(4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        );
    }
    drop(mapped);
    staging.unmap();
    Ok(pixels)
}

fn compute_padded_stride(bytes_per_row: u32) -> u32 {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    bytes_per_row.div_ceil(align) * align
}
