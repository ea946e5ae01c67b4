//! CPU staging surfaces and pixel format conversion.
//!
//! A surface is a tightly packed `width * height * bytes_per_pixel` buffer in
//! the tile's texture format; multi-byte texels are little-endian. Packed
//! ARGB therefore lands in memory as B, G, R, A.
//!
//! 16-bit formats expand back to 8 bits per channel by bit replication, so
//! any colour that survives packing unchanged reads back bit-identical.

use mosaic_core::{Image, Palette, PixelFormat};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileSurface {
    width: u32,
    height: u32,
    format: PixelFormat,
    bytes: Vec<u8>,
}

impl TileSurface {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let len = width as usize * height as usize * format.bytes_per_pixel();
        Self {
            width,
            height,
            format,
            bytes: vec![0; len],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn pitch(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    /// Copy the `covered_width x covered_height` window at `(x0, y0)` of
    /// `image` into the top-left of this surface, then replicate the last
    /// column and row into any padding.
    ///
    /// Returns false if the format needs palette indices the image lacks.
    pub fn fill_from_image(
        &mut self,
        image: &Image,
        x0: u32,
        y0: u32,
        covered_width: u32,
        covered_height: u32,
    ) -> bool {
        let covered_width = covered_width.min(self.width) as usize;
        let covered_height = covered_height.min(self.height) as usize;
        if covered_width == 0 || covered_height == 0 {
            return true;
        }

        let image_width = image.width() as usize;
        let source = match (self.format, image.indices(), image.palette()) {
            (PixelFormat::Palette8, Some(indices), _) => Source::Indices(indices),
            (PixelFormat::Palette8, None, _) => return false,
            (_, Some(indices), Some(palette)) => Source::Indexed(indices, palette),
            _ => Source::Packed(image.bits()),
        };

        let bpp = self.format.bytes_per_pixel();
        let pitch = self.pitch();
        let format = self.format;
        let surface_width = self.width as usize;
        for row in 0..covered_height {
            let src_start = (y0 as usize + row) * image_width + x0 as usize;
            let dst_row = &mut self.bytes[row * pitch..(row + 1) * pitch];
            source.encode_row(format, src_start, covered_width, dst_row);

            let last = (covered_width - 1) * bpp;
            for col in covered_width..surface_width {
                dst_row.copy_within(last..last + bpp, col * bpp);
            }
        }

        let last_row = (covered_height - 1) * pitch;
        for row in covered_height..self.height as usize {
            self.bytes.copy_within(last_row..last_row + pitch, row * pitch);
        }
        true
    }

    /// Decode one texel to packed ARGB. `palette` is required for `Palette8`.
    pub fn pixel_argb(&self, x: u32, y: u32, palette: Option<&Palette>) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = y as usize * self.pitch() + x as usize * self.format.bytes_per_pixel();
        decode_texel(self.format, &self.bytes[offset..], palette)
    }

    /// Decode the top-left `width x height` texels into `dst`, which is an
    /// image buffer `dst_stride` pixels wide, starting at `(x0, y0)`.
    ///
    /// Returns false if the surface is `Palette8` and no palette was given.
    pub fn read_into(
        &self,
        dst: &mut [u32],
        dst_stride: u32,
        x0: u32,
        y0: u32,
        width: u32,
        height: u32,
        palette: Option<&Palette>,
    ) -> bool {
        if self.format == PixelFormat::Palette8 && palette.is_none() {
            return false;
        }
        let width = width.min(self.width) as usize;
        let height = height.min(self.height) as usize;
        let bpp = self.format.bytes_per_pixel();
        let pitch = self.pitch();

        for row in 0..height {
            let src_row = &self.bytes[row * pitch..row * pitch + width * bpp];
            let dst_start = (y0 as usize + row) * dst_stride as usize + x0 as usize;
            let dst_row = &mut dst[dst_start..dst_start + width];
            for (dst, texel) in dst_row.iter_mut().zip(src_row.chunks_exact(bpp)) {
                match decode_texel(self.format, texel, palette) {
                    Some(argb) => *dst = argb,
                    None => return false,
                }
            }
        }
        true
    }
}

enum Source<'a> {
    Packed(&'a [u32]),
    Indexed(&'a [u8], &'a Palette),
    Indices(&'a [u8]),
}

impl Source<'_> {
    fn argb(&self, index: usize) -> u32 {
        match self {
            Source::Packed(bits) => bits[index],
            Source::Indexed(indices, palette) => palette[indices[index] as usize],
            Source::Indices(indices) => indices[index] as u32,
        }
    }

    fn encode_row(&self, format: PixelFormat, start: usize, count: usize, dst: &mut [u8]) {
        match format {
            PixelFormat::A8R8G8B8 => {
                for (i, texel) in dst.chunks_exact_mut(4).take(count).enumerate() {
                    texel.copy_from_slice(&self.argb(start + i).to_le_bytes());
                }
            }
            PixelFormat::A4R4G4B4 => {
                for (i, texel) in dst.chunks_exact_mut(2).take(count).enumerate() {
                    texel.copy_from_slice(&pack_4444(self.argb(start + i)).to_le_bytes());
                }
            }
            PixelFormat::R5G6B5 => {
                for (i, texel) in dst.chunks_exact_mut(2).take(count).enumerate() {
                    texel.copy_from_slice(&pack_565(self.argb(start + i)).to_le_bytes());
                }
            }
            PixelFormat::Palette8 => {
                for (i, texel) in dst.iter_mut().take(count).enumerate() {
                    *texel = self.argb(start + i) as u8;
                }
            }
        }
    }
}

fn decode_texel(format: PixelFormat, texel: &[u8], palette: Option<&Palette>) -> Option<u32> {
    match format {
        PixelFormat::A8R8G8B8 => Some(u32::from_le_bytes([texel[0], texel[1], texel[2], texel[3]])),
        PixelFormat::A4R4G4B4 => Some(unpack_4444(u16::from_le_bytes([texel[0], texel[1]]))),
        PixelFormat::R5G6B5 => Some(unpack_565(u16::from_le_bytes([texel[0], texel[1]]))),
        PixelFormat::Palette8 => palette.map(|p| p[texel[0] as usize]),
    }
}

pub fn pack_4444(argb: u32) -> u16 {
    (((argb >> 16) & 0xF000) | ((argb >> 12) & 0x0F00) | ((argb >> 8) & 0x00F0) | ((argb >> 4) & 0x000F))
        as u16
}

pub fn unpack_4444(texel: u16) -> u32 {
    let nibble = |shift: u32| {
        let v = ((texel >> shift) & 0xF) as u32;
        (v << 4) | v
    };
    (nibble(12) << 24) | (nibble(8) << 16) | (nibble(4) << 8) | nibble(0)
}

pub fn pack_565(argb: u32) -> u16 {
    (((argb >> 8) & 0xF800) | ((argb >> 5) & 0x07E0) | ((argb >> 3) & 0x001F)) as u16
}

pub fn unpack_565(texel: u16) -> u32 {
    let r = ((texel >> 11) & 0x1F) as u32;
    let g = ((texel >> 5) & 0x3F) as u32;
    let b = (texel & 0x1F) as u32;
    let r = (r << 3) | (r >> 2);
    let g = (g << 2) | (g >> 4);
    let b = (b << 3) | (b >> 2);
    0xFF00_0000 | (r << 16) | (g << 8) | b
}
