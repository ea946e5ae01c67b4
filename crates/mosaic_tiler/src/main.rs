use image::RgbaImage;
use mosaic_core::{load_caps_from_path, Color, HardwareCaps, Image, ImageFlags};
use mosaic_render::{
    DrawParams, RenderTarget, SoftwareBackend, SpriteBatch, SyncOutcome, TilePipeline,
    TiledRenderer, TileStore, WgpuBackend,
};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
struct TileReport {
    col: u32,
    row: u32,
    x: u32,
    y: u32,
    covered_width: u32,
    covered_height: u32,
    width: u32,
    height: u32,
}

#[derive(Debug, Serialize)]
struct LayoutReport {
    version: String,
    source_path: String,
    image_width: u32,
    image_height: u32,
    format: String,
    grid_width: u32,
    grid_height: u32,
    tile_width: u32,
    tile_height: u32,
    texture_bytes: usize,
    readback_mismatches: usize,
    tiles: Vec<TileReport>,
}

#[derive(Debug, Default)]
struct Options {
    input: PathBuf,
    report: PathBuf,
    caps: Option<PathBuf>,
    flags: ImageFlags,
    dump_dir: Option<PathBuf>,
    preview: Option<PathBuf>,
}

fn usage() -> String {
    "Usage: cargo run -p mosaic_tiler -- <input_png> <report_json> [--caps <caps_json>] [--flags <list>] [--dump <dir>] [--preview <png>]\nFlags: minimize,64x64,a4r4g4b4,a8r8g8b8,nearest\nExample: cargo run -p mosaic_tiler -- title.png out/title.tiles.json --caps caps/legacy.json --dump out/tiles".to_string()
}

fn main() -> Result<(), String> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let options = parse_args(&args)?;

    let caps = match &options.caps {
        Some(path) => load_caps_from_path(path)?,
        None => HardwareCaps::default(),
    };

    let source = image::open(&options.input)
        .map_err(|e| format!("Failed to open '{}': {e}", options.input.display()))?
        .to_rgba8();
    let mut image = Image::from_argb(source.width(), source.height(), argb_from_rgba(&source))?;
    image.set_flags(options.flags);

    let mut renderer = TiledRenderer::new(SoftwareBackend::new(caps));
    if renderer.ensure_current(&image) == SyncOutcome::Unusable {
        return Err(format!(
            "Failed to build tiles for '{}'",
            options.input.display()
        ));
    }

    let original = image.bits().to_vec();
    image.recovery_target().fill(0);
    if !renderer.recover_bits(&mut image) {
        return Err("Readback of freshly built tiles failed".to_string());
    }
    let readback_mismatches = original
        .iter()
        .zip(image.bits())
        .filter(|(a, b)| a != b)
        .count();
    if readback_mismatches > 0 {
        log::warn!(
            "{} pixels changed through the tile format round trip",
            readback_mismatches
        );
    }

    let store = renderer
        .shadow(image.id())
        .ok_or_else(|| "Renderer lost the image shadow".to_string())?;
    let report = build_report(&options.input, store, readback_mismatches)?;

    if let Some(dir) = &options.dump_dir {
        dump_tiles(dir, store, renderer.backend())?;
    }

    if let Some(path) = &options.preview {
        render_preview(path, &image)?;
    }

    if let Some(parent) = options.report.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            format!(
                "Failed to create report output dir '{}': {e}",
                parent.display()
            )
        })?;
    }
    let json = serde_json::to_string_pretty(&report)
        .map_err(|e| format!("Failed to serialize tile report: {e}"))?;
    let json_tmp = temporary_output_path(&options.report);
    fs::write(&json_tmp, json)
        .map_err(|e| format!("Failed to write '{}': {e}", json_tmp.display()))?;
    promote_temporary_file(&json_tmp, &options.report)?;

    println!(
        "Tiled {}x{} image into {}x{} {} tiles ({} bytes) -> {}",
        report.image_width,
        report.image_height,
        report.grid_width,
        report.grid_height,
        report.format,
        report.texture_bytes,
        options.report.display()
    );
    Ok(())
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut options = Options::default();
    let mut positional = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--caps" => {
                let value = iter.next().ok_or_else(usage)?;
                options.caps = Some(PathBuf::from(value));
            }
            "--dump" => {
                let value = iter.next().ok_or_else(usage)?;
                options.dump_dir = Some(PathBuf::from(value));
            }
            "--preview" => {
                let value = iter.next().ok_or_else(usage)?;
                options.preview = Some(PathBuf::from(value));
            }
            "--flags" => {
                let value = iter.next().ok_or_else(usage)?;
                options.flags = parse_flags(value)?;
            }
            other if other.starts_with("--") => {
                return Err(format!("Unknown option '{}'\n{}", other, usage()));
            }
            _ => positional.push(arg),
        }
    }

    if positional.len() != 2 {
        return Err(usage());
    }
    options.input = PathBuf::from(positional[0]);
    options.report = PathBuf::from(positional[1]);
    Ok(options)
}

fn parse_flags(list: &str) -> Result<ImageFlags, String> {
    let mut flags = ImageFlags::empty();
    for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        flags |= match name {
            "minimize" => ImageFlags::MINIMIZE_SUBDIVISIONS,
            "64x64" => ImageFlags::USE_64X64_SUBDIVISIONS,
            "a4r4g4b4" => ImageFlags::USE_A4R4G4B4,
            "a8r8g8b8" => ImageFlags::USE_A8R8G8B8,
            "nearest" => ImageFlags::NEAREST_FILTERING,
            other => return Err(format!("Unknown image flag '{}'", other)),
        };
    }
    Ok(flags)
}

fn build_report(
    source: &Path,
    store: &TileStore,
    readback_mismatches: usize,
) -> Result<LayoutReport, String> {
    let grid = store
        .grid()
        .ok_or_else(|| "Image has no tile grid".to_string())?;
    let (image_width, image_height) = grid.image_size();
    let (grid_width, grid_height) = grid.dimensions();
    let (tile_width, tile_height) = grid.tile_size();
    let tiles = grid
        .tiles()
        .iter()
        .map(|tile| TileReport {
            col: tile.col,
            row: tile.row,
            x: tile.x,
            y: tile.y,
            covered_width: tile.covered_width,
            covered_height: tile.covered_height,
            width: tile.width,
            height: tile.height,
        })
        .collect();

    Ok(LayoutReport {
        version: "0.1".to_string(),
        source_path: normalize_path_for_json(source),
        image_width,
        image_height,
        format: store.format().label().to_string(),
        grid_width,
        grid_height,
        tile_width,
        tile_height,
        texture_bytes: store.texture_bytes(),
        readback_mismatches,
        tiles,
    })
}

/// Write every tile texture, padding included, as `tile_<col>_<row>.png`.
fn dump_tiles(dir: &Path, store: &TileStore, backend: &SoftwareBackend) -> Result<(), String> {
    fs::create_dir_all(dir)
        .map_err(|e| format!("Failed to create dump dir '{}': {e}", dir.display()))?;
    let grid = store
        .grid()
        .ok_or_else(|| "Image has no tile grid".to_string())?;

    for (tile, &handle) in grid.tiles().iter().zip(store.textures()) {
        let texture = backend
            .texture(handle)
            .ok_or_else(|| format!("Tile {},{} has no texture", tile.col, tile.row))?;
        let mut out = RgbaImage::new(tile.width, tile.height);
        for (x, y, pixel) in out.enumerate_pixels_mut() {
            let argb = texture.pixel_argb(x, y).unwrap_or(0);
            pixel.0 = rgba_from_argb(argb);
        }
        let path = dir.join(format!("tile_{}_{}.png", tile.col, tile.row));
        out.save_with_format(&path, image::ImageFormat::Png)
            .map_err(|e| format!("Failed to write '{}': {e}", path.display()))?;
    }
    log::info!("Dumped {} tiles to '{}'", store.textures().len(), dir.display());
    Ok(())
}

/// Draw the image through the GPU tile path and save what the GPU produced.
fn render_preview(path: &Path, image: &Image) -> Result<(), String> {
    let backend = WgpuBackend::headless()?;
    let pipeline = TilePipeline::new(&backend);
    let mut renderer = TiledRenderer::new(backend);

    let mut batch = SpriteBatch::new();
    if renderer.draw_image_at(image, &mut batch, 0.0, 0.0, &DrawParams::default()) == 0 {
        return Err("GPU backend could not build tiles for the preview".to_string());
    }

    let context = renderer.backend().context();
    let target = RenderTarget::new(context, image.width(), image.height())
        .map_err(|e| format!("Failed to create preview target: {e}"))?;
    pipeline
        .render(renderer.backend(), &batch, &target, Some(Color::rgba(0, 0, 0, 0)))
        .map_err(|e| format!("Failed to render preview: {e}"))?;
    let pixels = target
        .read_argb(context)
        .map_err(|e| format!("Failed to read back preview: {e}"))?;

    let mut out = RgbaImage::new(image.width(), image.height());
    for (pixel, argb) in out.pixels_mut().zip(pixels) {
        pixel.0 = rgba_from_argb(argb);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create preview dir '{}': {e}", parent.display()))?;
    }
    out.save_with_format(path, image::ImageFormat::Png)
        .map_err(|e| format!("Failed to write '{}': {e}", path.display()))?;
    log::info!(
        "Rendered {} draw calls on {} to '{}'",
        batch.draw_calls().len(),
        context.adapter_name,
        path.display()
    );
    Ok(())
}

fn argb_from_rgba(source: &RgbaImage) -> Vec<u32> {
    source
        .pixels()
        .map(|p| {
            let [r, g, b, a] = p.0;
            u32::from_be_bytes([a, r, g, b])
        })
        .collect()
}

fn rgba_from_argb(argb: u32) -> [u8; 4] {
    let [a, r, g, b] = argb.to_be_bytes();
    [r, g, b, a]
}

fn normalize_path_for_json(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn temporary_output_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("output");
    path.with_file_name(format!("{file_name}.tmp"))
}

fn promote_temporary_file(temp_path: &Path, final_path: &Path) -> Result<(), String> {
    if final_path.exists() {
        fs::remove_file(final_path).map_err(|e| {
            format!(
                "Failed to replace existing output '{}': {e}",
                final_path.display()
            )
        })?;
    }
    fs::rename(temp_path, final_path).map_err(|e| {
        format!(
            "Failed to move temporary output '{}' -> '{}': {e}",
            temp_path.display(),
            final_path.display()
        )
    })
}
