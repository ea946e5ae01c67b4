//! CPU-resident backend. Textures are plain surfaces kept in a map.
//!
//! Useful headless (tools, tests) and as the reference for what a GPU backend
//! must do. An optional memory budget makes allocations fail once exceeded,
//! the same way a real device runs out of texture memory.

use std::collections::HashMap;

use mosaic_core::{HardwareCaps, Palette, PixelFormat};

use crate::backend::{check_texture_size, BackendError, TextureHandle, TileBackend};
use crate::surface::TileSurface;

#[derive(Debug, Clone)]
pub struct SoftwareTexture {
    pub surface: TileSurface,
    pub palette: Option<Box<Palette>>,
    pub upload_count: u32,
}

impl SoftwareTexture {
    pub fn pixel_argb(&self, x: u32, y: u32) -> Option<u32> {
        self.surface.pixel_argb(x, y, self.palette.as_deref())
    }
}

pub struct SoftwareBackend {
    caps: HardwareCaps,
    textures: HashMap<TextureHandle, SoftwareTexture>,
    next_handle: u64,
    memory_budget: Option<usize>,
    memory_used: usize,
}

impl SoftwareBackend {
    pub fn new(caps: HardwareCaps) -> Self {
        Self {
            caps,
            textures: HashMap::new(),
            next_handle: 1,
            memory_budget: None,
            memory_used: 0,
        }
    }

    /// Fail allocations that would push live texture memory past `bytes`.
    pub fn with_memory_budget(caps: HardwareCaps, bytes: usize) -> Self {
        Self {
            memory_budget: Some(bytes),
            ..Self::new(caps)
        }
    }

    pub fn set_memory_budget(&mut self, bytes: Option<usize>) {
        self.memory_budget = bytes;
    }

    pub fn texture(&self, handle: TextureHandle) -> Option<&SoftwareTexture> {
        self.textures.get(&handle)
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn memory_used(&self) -> usize {
        self.memory_used
    }
}

impl TileBackend for SoftwareBackend {
    fn name(&self) -> &'static str {
        "software"
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
        if !self.caps.supports(format) {
            return Err(BackendError::UnsupportedFormat(format));
        }
        check_texture_size(&self.caps, width, height)?;

        let surface = TileSurface::new(width, height, format);
        let requested_bytes = surface.byte_len();
        if let Some(budget) = self.memory_budget {
            if self.memory_used + requested_bytes > budget {
                return Err(BackendError::OutOfMemory { requested_bytes });
            }
        }

        let handle = TextureHandle::from_raw(self.next_handle);
        self.next_handle += 1;
        self.memory_used += requested_bytes;
        self.textures.insert(
            handle,
            SoftwareTexture {
                surface,
                palette: None,
                upload_count: 0,
            },
        );
        Ok(handle)
    }

    fn upload(
        &mut self,
        texture: TextureHandle,
        surface: &TileSurface,
        palette: Option<&Palette>,
    ) -> Result<(), BackendError> {
        let target = self
            .textures
            .get_mut(&texture)
            .ok_or(BackendError::UnknownTexture(texture))?;
        if target.surface.width() != surface.width()
            || target.surface.height() != surface.height()
            || target.surface.format() != surface.format()
        {
            return Err(BackendError::SurfaceMismatch(texture));
        }
        target.surface.clone_from(surface);
        target.palette = palette.map(|p| Box::new(*p));
        target.upload_count += 1;
        Ok(())
    }

    fn release(&mut self, texture: TextureHandle) {
        if let Some(removed) = self.textures.remove(&texture) {
            self.memory_used -= removed.surface.byte_len();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_release_track_memory() {
        let mut backend = SoftwareBackend::new(HardwareCaps::default());
        let handle = backend
            .create_texture(64, 32, PixelFormat::A8R8G8B8)
            .expect("create");
        assert_eq!(backend.memory_used(), 64 * 32 * 4);
        assert_eq!(backend.live_textures(), 1);

        backend.release(handle);
        assert_eq!(backend.memory_used(), 0);
        assert_eq!(backend.live_textures(), 0);
    }

    #[test]
    fn handles_are_never_reused() {
        let mut backend = SoftwareBackend::new(HardwareCaps::default());
        let a = backend.create_texture(8, 8, PixelFormat::A8R8G8B8).unwrap();
        backend.release(a);
        let b = backend.create_texture(8, 8, PixelFormat::A8R8G8B8).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn budget_rejects_oversubscription() {
        let mut backend = SoftwareBackend::with_memory_budget(HardwareCaps::default(), 1000);
        assert!(backend.create_texture(16, 8, PixelFormat::A8R8G8B8).is_ok());
        let err = backend
            .create_texture(16, 8, PixelFormat::A8R8G8B8)
            .expect_err("second texture exceeds budget");
        assert_eq!(err, BackendError::OutOfMemory { requested_bytes: 512 });
    }

    #[test]
    fn unsupported_format_is_rejected() {
        let mut backend = SoftwareBackend::new(HardwareCaps::argb_only(256));
        assert_eq!(
            backend.create_texture(8, 8, PixelFormat::R5G6B5),
            Err(BackendError::UnsupportedFormat(PixelFormat::R5G6B5))
        );
    }

    #[test]
    fn upload_checks_surface_shape() {
        let mut backend = SoftwareBackend::new(HardwareCaps::default());
        let handle = backend.create_texture(8, 8, PixelFormat::A8R8G8B8).unwrap();

        let wrong = TileSurface::new(4, 8, PixelFormat::A8R8G8B8);
        assert_eq!(
            backend.upload(handle, &wrong, None),
            Err(BackendError::SurfaceMismatch(handle))
        );

        let right = TileSurface::new(8, 8, PixelFormat::A8R8G8B8);
        assert!(backend.upload(handle, &right, None).is_ok());
        assert_eq!(backend.texture(handle).unwrap().upload_count, 1);
    }

    #[test]
    fn upload_to_released_texture_fails() {
        let mut backend = SoftwareBackend::new(HardwareCaps::default());
        let handle = backend.create_texture(8, 8, PixelFormat::A8R8G8B8).unwrap();
        backend.release(handle);
        let surface = TileSurface::new(8, 8, PixelFormat::A8R8G8B8);
        assert_eq!(
            backend.upload(handle, &surface, None),
            Err(BackendError::UnknownTexture(handle))
        );
    }
}
