pub mod caps;
pub mod flags;
pub mod geom;
pub mod image;

pub use caps::{
    load_caps_from_path, parse_caps, FormatSet, HardwareCaps, PixelFormat, MAX_TILE_DIMENSION,
};
pub use flags::ImageFlags;
pub use geom::{Color, Rect};
pub use image::{Image, ImageId, Palette, PALETTE_SIZE};
