//! Tile dimension planning.
//!
//! Given a candidate size (usually the image size, or the leftover strip at
//! the right/bottom edge), pick a texture size the hardware accepts while
//! wasting as little memory as possible.
//!
//! Interior tiles use a "good size" table: for each candidate `i` it holds a
//! power of two `p` such that either `p - i <= 64`, or `p < i` and the strip
//! left over after cutting `i` into `p`-wide tiles is small (`< 64`) or
//! itself a power of two. That keeps "nice" sizes like 300 or 640 from being
//! padded to the next full power of two. Edge tiles just round up.
//!
//! The table search always terminates: halving reaches `p <= 64` after
//! finitely many steps, and from there `i % p < p <= 64` satisfies the stop
//! condition.

use std::cell::OnceCell;

use mosaic_core::{HardwareCaps, ImageFlags};

/// Tile edge used when an image asks for fixed 64x64 subdivision.
pub const FIXED_SUBDIVISION_SIZE: u32 = 64;

/// Largest padding the good-size table accepts before trying a smaller tile.
const GOOD_SIZE_SLACK: u32 = 64;

pub struct TilePlanner {
    caps: HardwareCaps,
    good_sizes: OnceCell<Vec<u32>>,
}

impl TilePlanner {
    pub fn new(caps: HardwareCaps) -> Self {
        Self {
            caps,
            good_sizes: OnceCell::new(),
        }
    }

    pub fn caps(&self) -> &HardwareCaps {
        &self.caps
    }

    /// Plan one tile's texture size.
    ///
    /// `is_boundary` marks the last row/column, which rounds straight up to
    /// a power of two instead of consulting the good-size table.
    pub fn plan_tile_size(
        &self,
        candidate_width: u32,
        candidate_height: u32,
        is_boundary: bool,
        use_pow2: bool,
        flags: ImageFlags,
    ) -> (u32, u32) {
        if flags.contains(ImageFlags::USE_64X64_SUBDIVISIONS) {
            return (FIXED_SUBDIVISION_SIZE, FIXED_SUBDIVISION_SIZE);
        }

        let caps = &self.caps;
        let (mut width, mut height) = if !use_pow2 {
            (
                candidate_width.min(caps.max_width),
                candidate_height.min(caps.max_height),
            )
        } else if is_boundary || flags.contains(ImageFlags::MINIMIZE_SUBDIVISIONS) {
            (
                round_up_pow2_capped(candidate_width, caps.max_width),
                round_up_pow2_capped(candidate_height, caps.max_height),
            )
        } else {
            (
                self.good_size(candidate_width, caps.max_width),
                self.good_size(candidate_height, caps.max_height),
            )
        };

        width = width.max(caps.min_width);
        height = height.max(caps.min_height);

        // Growing the short side stops at the hardware max even if the ratio
        // is still exceeded; a texture past the max could never be created.
        let ratio = caps.max_aspect_ratio.max(1) as u64;
        if width > height {
            while width as u64 > ratio * height as u64 && height < caps.max_height {
                height = (height << 1).min(caps.max_height);
            }
        } else if height > width {
            while height as u64 > ratio * width as u64 && width < caps.max_width {
                width = (width << 1).min(caps.max_width);
            }
        }

        (width, height)
    }

    fn good_size(&self, candidate: u32, max: u32) -> u32 {
        if candidate >= max {
            return max;
        }
        let table = self.good_sizes.get_or_init(|| {
            let len = self.caps.max_width.max(self.caps.max_height) as usize;
            build_good_size_table(len)
        });
        table[candidate as usize].min(max)
    }
}

fn round_up_pow2_capped(candidate: u32, max: u32) -> u32 {
    if candidate >= max {
        max
    } else {
        candidate.next_power_of_two().min(max)
    }
}

/// Good tile size for every candidate in `0..len`.
pub fn build_good_size_table(len: usize) -> Vec<u32> {
    let mut table = Vec::with_capacity(len);
    let mut pow2: u32 = 1;
    for i in 0..len as u32 {
        if i > pow2 {
            pow2 <<= 1;
        }

        let mut good = pow2;
        if good - i > GOOD_SIZE_SLACK {
            good >>= 1;
            loop {
                let left_over = i % good;
                if left_over < GOOD_SIZE_SLACK || left_over.is_power_of_two() {
                    break;
                }
                good >>= 1;
            }
        }
        table.push(good);
    }
    table
}
