use std::fmt;

use mosaic_core::{HardwareCaps, Palette, PixelFormat};

use crate::surface::TileSurface;

/// Opaque reference to one backend texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(u64);

impl TextureHandle {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    OutOfMemory { requested_bytes: usize },
    UnsupportedFormat(PixelFormat),
    InvalidSize { width: u32, height: u32 },
    UnknownTexture(TextureHandle),
    SurfaceMismatch(TextureHandle),
    Device(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::OutOfMemory { requested_bytes } => {
                write!(formatter, "out of texture memory ({} bytes requested)", requested_bytes)
            }
            BackendError::UnsupportedFormat(format) => {
                write!(formatter, "pixel format {} is not supported", format)
            }
            BackendError::InvalidSize { width, height } => {
                write!(formatter, "texture size {}x{} is outside device limits", width, height)
            }
            BackendError::UnknownTexture(handle) => {
                write!(formatter, "texture {} does not exist", handle.raw())
            }
            BackendError::SurfaceMismatch(handle) => write!(
                formatter,
                "surface size or format does not match texture {}",
                handle.raw()
            ),
            BackendError::Device(message) => write!(formatter, "device error: {}", message),
        }
    }
}

impl std::error::Error for BackendError {}

/// Texture allocation and upload for one rendering API.
///
/// The tile store owns every handle it gets from `create_texture` and is the
/// only caller of `upload` and `release`.
pub trait TileBackend {
    fn name(&self) -> &'static str;

    fn caps(&self) -> HardwareCaps;

    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<TextureHandle, BackendError>;

    /// Push a staging surface to the texture. `palette` accompanies
    /// `Palette8` surfaces.
    fn upload(
        &mut self,
        texture: TextureHandle,
        surface: &TileSurface,
        palette: Option<&Palette>,
    ) -> Result<(), BackendError>;

    fn release(&mut self, texture: TextureHandle);
}

/// Reject sizes outside the caps before touching the device.
pub(crate) fn check_texture_size(
    caps: &HardwareCaps,
    width: u32,
    height: u32,
) -> Result<(), BackendError> {
    if width == 0 || height == 0 || width > caps.max_width || height > caps.max_height {
        return Err(BackendError::InvalidSize { width, height });
    }
    Ok(())
}
