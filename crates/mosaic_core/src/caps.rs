//! Hardware capability profile for the tiling engine.
//!
//! A backend reports its limits once at renderer construction and they never
//! change afterwards. Profiles can also be authored as JSON so headless tools
//! can reproduce the tiling a given device would get:
//!
//! ```json
//! {
//!   "version": "0.1",
//!   "min_tile": { "width": 1, "height": 1 },
//!   "max_tile": { "width": 1024, "height": 1024 },
//!   "max_aspect_ratio": 8,
//!   "supported_formats": ["a8r8g8b8", "r5g6b5"],
//!   "pow2_required": true
//! }
//! ```

use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::Path;

/// Texel layout of one tile texture. One format is chosen per image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    A8R8G8B8,
    A4R4G4B4,
    R5G6B5,
    Palette8,
}

impl PixelFormat {
    pub const ALL: &'static [PixelFormat] = &[
        PixelFormat::A8R8G8B8,
        PixelFormat::A4R4G4B4,
        PixelFormat::R5G6B5,
        PixelFormat::Palette8,
    ];

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::A8R8G8B8 => 4,
            Self::A4R4G4B4 | Self::R5G6B5 => 2,
            Self::Palette8 => 1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::A8R8G8B8 => "A8R8G8B8",
            Self::A4R4G4B4 => "A4R4G4B4",
            Self::R5G6B5 => "R5G6B5",
            Self::Palette8 => "Palette8",
        }
    }

    pub fn as_set(self) -> FormatSet {
        match self {
            Self::A8R8G8B8 => FormatSet::A8R8G8B8,
            Self::A4R4G4B4 => FormatSet::A4R4G4B4,
            Self::R5G6B5 => FormatSet::R5G6B5,
            Self::Palette8 => FormatSet::PALETTE8,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

bitflags::bitflags! {
    /// Set of pixel formats a backend can allocate.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FormatSet: u32 {
        const A8R8G8B8 = 0x0001;
        const A4R4G4B4 = 0x0002;
        const R5G6B5 = 0x0004;
        const PALETTE8 = 0x0008;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareCaps {
    pub min_width: u32,
    pub min_height: u32,
    pub max_width: u32,
    pub max_height: u32,
    /// Largest allowed `long side / short side` of a single tile.
    pub max_aspect_ratio: u32,
    pub formats: FormatSet,
    pub pow2_required: bool,
}

/// Largest tile side any profile may declare. Planning keeps a table with one
/// entry per texel of the longest side, and doubling must not overflow `u32`.
pub const MAX_TILE_DIMENSION: u32 = 1 << 16;

impl Default for HardwareCaps {
    fn default() -> Self {
        Self {
            min_width: 1,
            min_height: 1,
            max_width: 1024,
            max_height: 1024,
            max_aspect_ratio: 8,
            formats: FormatSet::all(),
            pow2_required: true,
        }
    }
}

impl HardwareCaps {
    /// Profile for backends that only take 32-bit textures of any size up to
    /// `max_dimension`, with no shape restrictions.
    pub fn argb_only(max_dimension: u32) -> Self {
        let max_dimension = max_dimension.clamp(1, MAX_TILE_DIMENSION);
        Self {
            min_width: 1,
            min_height: 1,
            max_width: max_dimension,
            max_height: max_dimension,
            max_aspect_ratio: max_dimension,
            formats: FormatSet::A8R8G8B8,
            pow2_required: false,
        }
    }

    pub fn supports(&self, format: PixelFormat) -> bool {
        self.formats.contains(format.as_set())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.min_width == 0 || self.min_height == 0 {
            return Err("Caps validation failed: min tile size must be > 0".to_string());
        }
        if self.max_width < self.min_width || self.max_height < self.min_height {
            return Err(format!(
                "Caps validation failed: max tile {}x{} is smaller than min tile {}x{}",
                self.max_width, self.max_height, self.min_width, self.min_height
            ));
        }
        if self.max_width > MAX_TILE_DIMENSION || self.max_height > MAX_TILE_DIMENSION {
            return Err(format!(
                "Caps validation failed: max tile {}x{} exceeds {}",
                self.max_width, self.max_height, MAX_TILE_DIMENSION
            ));
        }
        if self.max_aspect_ratio == 0 {
            return Err("Caps validation failed: max_aspect_ratio must be >= 1".to_string());
        }
        if self.formats.is_empty() {
            return Err("Caps validation failed: no supported pixel formats".to_string());
        }
        Ok(())
    }
}

// --- JSON deserialization types (private) ---

#[derive(Debug, Deserialize)]
struct CapsFileJson {
    version: String,
    min_tile: TileSizeJson,
    max_tile: TileSizeJson,
    max_aspect_ratio: u32,
    supported_formats: Vec<PixelFormat>,
    #[serde(default = "default_pow2_required")]
    pow2_required: bool,
}

#[derive(Debug, Deserialize, Clone, Copy)]
struct TileSizeJson {
    width: u32,
    height: u32,
}

const fn default_pow2_required() -> bool {
    true
}

/// Parse and validate a capability profile from JSON text.
pub fn parse_caps(raw: &str) -> Result<HardwareCaps, String> {
    let json: CapsFileJson =
        serde_json::from_str(raw).map_err(|e| format!("Failed to parse caps profile: {e}"))?;
    if json.version != "0.1" {
        return Err(format!(
            "Caps validation failed: unsupported version '{}'",
            json.version
        ));
    }

    let formats = json
        .supported_formats
        .iter()
        .fold(FormatSet::empty(), |set, format| set | format.as_set());
    let caps = HardwareCaps {
        min_width: json.min_tile.width,
        min_height: json.min_tile.height,
        max_width: json.max_tile.width,
        max_height: json.max_tile.height,
        max_aspect_ratio: json.max_aspect_ratio,
        formats,
        pow2_required: json.pow2_required,
    };
    caps.validate()?;
    Ok(caps)
}

/// Load a capability profile from disk.
pub fn load_caps_from_path(path: &Path) -> Result<HardwareCaps, String> {
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read caps profile {}: {e}", path.display()))?;
    let caps = parse_caps(&raw).map_err(|e| format!("{} ({})", e, path.display()))?;
    log::debug!("Loaded caps profile {}: {:?}", path.display(), caps);
    Ok(caps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_file_path(name_hint: &str) -> std::path::PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before unix epoch")
            .as_nanos();
        std::env::temp_dir().join(format!(
            "mosaic_caps_test_{}_{}_{}.json",
            name_hint,
            std::process::id(),
            nanos
        ))
    }

    const VALID_CAPS: &str = r#"
    {
      "version": "0.1",
      "min_tile": { "width": 8, "height": 8 },
      "max_tile": { "width": 2048, "height": 1024 },
      "max_aspect_ratio": 4,
      "supported_formats": ["a8r8g8b8", "palette8"]
    }
    "#;

    #[test]
    fn default_caps_are_valid() {
        assert!(HardwareCaps::default().validate().is_ok());
        assert!(HardwareCaps::argb_only(8192).validate().is_ok());
    }

    #[test]
    fn parse_caps_reads_all_fields() {
        let caps = parse_caps(VALID_CAPS).expect("caps should parse");
        assert_eq!((caps.min_width, caps.min_height), (8, 8));
        assert_eq!((caps.max_width, caps.max_height), (2048, 1024));
        assert_eq!(caps.max_aspect_ratio, 4);
        assert!(caps.supports(PixelFormat::A8R8G8B8));
        assert!(caps.supports(PixelFormat::Palette8));
        assert!(!caps.supports(PixelFormat::R5G6B5));
        assert!(caps.pow2_required, "pow2_required defaults to true");
    }

    #[test]
    fn parse_caps_rejects_unknown_format() {
        let json = VALID_CAPS.replace("palette8", "dxt5");
        let err = parse_caps(&json).expect_err("unknown format should fail");
        assert!(err.contains("Failed to parse caps profile"));
    }

    #[test]
    fn parse_caps_rejects_empty_format_list() {
        let json = VALID_CAPS.replace(r#"["a8r8g8b8", "palette8"]"#, "[]");
        let err = parse_caps(&json).expect_err("empty formats should fail");
        assert!(err.contains("no supported pixel formats"));
    }

    #[test]
    fn parse_caps_rejects_inverted_limits() {
        let json = VALID_CAPS.replace(r#""width": 2048"#, r#""width": 4"#);
        let err = parse_caps(&json).expect_err("max below min should fail");
        assert!(err.contains("smaller than min tile"));
    }

    #[test]
    fn parse_caps_rejects_zero_aspect_ratio() {
        let json = VALID_CAPS.replace(r#""max_aspect_ratio": 4"#, r#""max_aspect_ratio": 0"#);
        let err = parse_caps(&json).expect_err("zero ratio should fail");
        assert!(err.contains("max_aspect_ratio"));
    }

    #[test]
    fn parse_caps_rejects_oversized_max_tile() {
        let json = VALID_CAPS.replace(r#""width": 2048"#, r#""width": 4294967295"#);
        let err = parse_caps(&json).expect_err("huge max should fail");
        assert!(err.contains("exceeds 65536"));

        let json = VALID_CAPS.replace(r#""width": 2048"#, r#""width": 65536"#);
        assert_eq!(parse_caps(&json).expect("limit is inclusive").max_width, 65536);
    }

    #[test]
    fn argb_only_clamps_to_tile_limit() {
        let caps = HardwareCaps::argb_only(u32::MAX);
        assert_eq!(caps.max_width, MAX_TILE_DIMENSION);
        assert!(caps.validate().is_ok());
        assert_eq!(HardwareCaps::argb_only(0).max_width, 1);
    }

    #[test]
    fn load_caps_from_path_parses_valid_file() {
        let path = temp_file_path("valid");
        fs::write(&path, VALID_CAPS).expect("failed to write temp caps file");

        let caps = load_caps_from_path(&path).expect("caps should load");
        assert_eq!(caps.max_width, 2048);

        let _ = fs::remove_file(path);
    }

    #[test]
    fn load_caps_from_path_reports_missing_file() {
        let path = temp_file_path("missing");
        let err = load_caps_from_path(&path).expect_err("missing file should fail");
        assert!(err.contains("Failed to read caps profile"));
    }

    #[test]
    fn format_sets_match_formats() {
        for &format in PixelFormat::ALL {
            assert_eq!(format.as_set().bits().count_ones(), 1);
        }
        assert_eq!(PixelFormat::Palette8.bytes_per_pixel(), 1);
        assert_eq!(PixelFormat::R5G6B5.bytes_per_pixel(), 2);
    }
}
