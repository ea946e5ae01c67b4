bitflags::bitflags! {
    /// Per-image hints consumed by the tiling engine.
    ///
    /// Changing any of these on an image forces its texture shadow to be
    /// rebuilt from scratch on the next draw.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ImageFlags: u32 {
        /// Subdivide into the fewest possible textures (may use more memory).
        const MINIMIZE_SUBDIVISIONS = 0x0001;
        /// Fixed 64x64 tiles. Suits image strips where only one cel is drawn
        /// at a time, so the whole sheet is not pulled in.
        const USE_64X64_SUBDIVISIONS = 0x0002;
        /// Store as 16-bit A4R4G4B4 when the backend supports it.
        const USE_A4R4G4B4 = 0x0004;
        /// Keep opaque images at 32 bits instead of packing them to R5G6B5.
        const USE_A8R8G8B8 = 0x0008;
        /// Sample with nearest filtering when scaled.
        const NEAREST_FILTERING = 0x0010;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_empty() {
        assert!(ImageFlags::default().is_empty());
    }

    #[test]
    fn flags_are_distinct_bits() {
        let all = [
            ImageFlags::MINIMIZE_SUBDIVISIONS,
            ImageFlags::USE_64X64_SUBDIVISIONS,
            ImageFlags::USE_A4R4G4B4,
            ImageFlags::USE_A8R8G8B8,
            ImageFlags::NEAREST_FILTERING,
        ];
        for (i, a) in all.iter().enumerate() {
            assert_eq!(a.bits().count_ones(), 1);
            for b in &all[i + 1..] {
                assert!(!a.intersects(*b));
            }
        }
    }
}
