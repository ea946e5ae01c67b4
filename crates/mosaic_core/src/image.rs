//! CPU-side image: packed ARGB pixels, an optional palette form, and the
//! change counter the renderer uses to detect stale textures.
//!
//! Every mutation goes through a method that bumps `change_count`, so a
//! renderer that recorded the counter at upload time can tell whether its
//! textures still match. The only exception is `recovery_target`, which the
//! readback path uses to copy texture contents back without invalidating
//! them.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::flags::ImageFlags;

pub const PALETTE_SIZE: usize = 256;

/// 256 packed ARGB entries.
pub type Palette = [u32; PALETTE_SIZE];

static NEXT_IMAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an [`Image`], used to key renderer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(u64);

impl ImageId {
    fn next() -> Self {
        Self(NEXT_IMAGE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone)]
struct IndexedPixels {
    indices: Vec<u8>,
    palette: Box<Palette>,
}

#[derive(Debug)]
pub struct Image {
    id: ImageId,
    width: u32,
    height: u32,
    bits: Vec<u32>,
    indexed: Option<IndexedPixels>,
    flags: ImageFlags,
    has_alpha: bool,
    has_trans: bool,
    change_count: u64,
}

impl Image {
    /// Fully transparent image.
    pub fn new(width: u32, height: u32) -> Self {
        let bits = vec![0; pixel_count(width, height)];
        Self::with_bits(width, height, bits)
    }

    pub fn from_argb(width: u32, height: u32, bits: Vec<u32>) -> Result<Self, String> {
        let expected = pixel_count(width, height);
        if bits.len() != expected {
            return Err(format!(
                "Image {}x{} needs {} pixels, got {}",
                width,
                height,
                expected,
                bits.len()
            ));
        }
        Ok(Self::with_bits(width, height, bits))
    }

    /// Build an image from palette indices. The packed buffer is the palette
    /// expansion of the indices, so both forms always agree.
    pub fn from_indexed(
        width: u32,
        height: u32,
        indices: Vec<u8>,
        palette: Palette,
    ) -> Result<Self, String> {
        let expected = pixel_count(width, height);
        if indices.len() != expected {
            return Err(format!(
                "Image {}x{} needs {} palette indices, got {}",
                width,
                height,
                expected,
                indices.len()
            ));
        }
        let bits = indices.iter().map(|&i| palette[i as usize]).collect();
        let mut image = Self::with_bits(width, height, bits);
        image.indexed = Some(IndexedPixels {
            indices,
            palette: Box::new(palette),
        });
        Ok(image)
    }

    fn with_bits(width: u32, height: u32, bits: Vec<u32>) -> Self {
        let (has_alpha, has_trans) = scan_alpha(&bits);
        Self {
            id: ImageId::next(),
            width,
            height,
            bits,
            indexed: None,
            flags: ImageFlags::empty(),
            has_alpha,
            has_trans,
            change_count: 0,
        }
    }

    pub fn id(&self) -> ImageId {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bits(&self) -> &[u32] {
        &self.bits
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.bits[(y * self.width + x) as usize])
    }

    pub fn indices(&self) -> Option<&[u8]> {
        self.indexed.as_ref().map(|p| p.indices.as_slice())
    }

    pub fn palette(&self) -> Option<&Palette> {
        self.indexed.as_ref().map(|p| &*p.palette)
    }

    pub fn flags(&self) -> ImageFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: ImageFlags) {
        self.flags = flags;
    }

    /// Some pixel has partial alpha (neither 0 nor 255).
    pub fn has_alpha(&self) -> bool {
        self.has_alpha
    }

    /// Some pixel is fully transparent.
    pub fn has_trans(&self) -> bool {
        self.has_trans
    }

    pub fn is_opaque(&self) -> bool {
        !self.has_alpha && !self.has_trans
    }

    pub fn change_count(&self) -> u64 {
        self.change_count
    }

    /// Mark the pixels as changed without touching them.
    pub fn bits_changed(&mut self) {
        self.change_count += 1;
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, argb: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        self.modify_bits(|bits, width| bits[(y * width + x) as usize] = argb);
        true
    }

    pub fn fill(&mut self, argb: u32) {
        self.modify_bits(|bits, _| bits.fill(argb));
    }

    /// Mutate the packed pixels in place. The palette form is dropped since
    /// the new pixels may not be expressible through it.
    pub fn modify_bits(&mut self, edit: impl FnOnce(&mut [u32], u32)) {
        edit(&mut self.bits, self.width);
        self.indexed = None;
        (self.has_alpha, self.has_trans) = scan_alpha(&self.bits);
        self.change_count += 1;
    }

    /// Replace the palette of an indexed image, re-expanding the packed pixels.
    pub fn set_palette(&mut self, palette: Palette) -> bool {
        let Some(indexed) = self.indexed.as_mut() else {
            return false;
        };
        *indexed.palette = palette;
        for (dst, &index) in self.bits.iter_mut().zip(&indexed.indices) {
            *dst = palette[index as usize];
        }
        (self.has_alpha, self.has_trans) = scan_alpha(&self.bits);
        self.change_count += 1;
        true
    }

    /// Resize, clearing to transparent. Drops any palette form.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.bits = vec![0; pixel_count(width, height)];
        self.indexed = None;
        self.has_alpha = false;
        self.has_trans = !self.bits.is_empty();
        self.change_count += 1;
    }

    /// Writable pixels for the readback path. Does not bump the change
    /// counter: the caller is restoring what the textures already hold.
    pub fn recovery_target(&mut self) -> &mut [u32] {
        &mut self.bits
    }
}

fn pixel_count(width: u32, height: u32) -> usize {
    width as usize * height as usize
}

fn scan_alpha(bits: &[u32]) -> (bool, bool) {
    let mut has_alpha = false;
    let mut has_trans = false;
    for &pixel in bits {
        match pixel >> 24 {
            0xFF => {}
            0 => has_trans = true,
            _ => has_alpha = true,
        }
        if has_alpha && has_trans {
            break;
        }
    }
    (has_alpha, has_trans)
}
