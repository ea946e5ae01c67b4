//! Per-image tile store: the grid, one staging surface and one backend
//! texture per tile, the chosen format and the change-counter sync point.
//!
//! The store exclusively owns its textures. Every handle it holds is
//! released through `release_all` before the store forgets it.

use log::{debug, error, info, warn};
use mosaic_core::{HardwareCaps, Image, ImageFlags, ImageId, Palette, PixelFormat, PALETTE_SIZE};

use crate::backend::{BackendError, TextureHandle, TileBackend};
use crate::grid::TileGrid;
use crate::planner::TilePlanner;
use crate::surface::TileSurface;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Grid (re)built and every tile created and uploaded.
    Rebuilt,
    /// Pixels re-copied into the existing textures.
    Refreshed,
    UpToDate,
    /// A previous build failed; nothing is drawable until a rebuild.
    Unusable,
}

impl SyncOutcome {
    pub fn is_drawable(self) -> bool {
        !matches!(self, SyncOutcome::Unusable)
    }
}

/// Pick the texture format for `image` on hardware described by `caps`.
pub fn select_format(image: &Image, caps: &HardwareCaps) -> PixelFormat {
    let flags = image.flags();
    if image.is_opaque()
        && caps.supports(PixelFormat::R5G6B5)
        && !flags.contains(ImageFlags::USE_A8R8G8B8)
    {
        return PixelFormat::R5G6B5;
    }
    if image.indices().is_some() && caps.supports(PixelFormat::Palette8) {
        return PixelFormat::Palette8;
    }
    if flags.contains(ImageFlags::USE_A4R4G4B4) && caps.supports(PixelFormat::A4R4G4B4) {
        return PixelFormat::A4R4G4B4;
    }
    if !caps.supports(PixelFormat::A8R8G8B8) && caps.supports(PixelFormat::A4R4G4B4) {
        return PixelFormat::A4R4G4B4;
    }
    PixelFormat::A8R8G8B8
}

pub struct TileStore {
    image_id: ImageId,
    grid: Option<TileGrid>,
    format: PixelFormat,
    flags: ImageFlags,
    textures: Vec<TextureHandle>,
    surfaces: Vec<TileSurface>,
    palette: Option<Box<Palette>>,
    synced_change_count: u64,
    usable: bool,
    texture_bytes: usize,
}

impl TileStore {
    pub fn new(image_id: ImageId) -> Self {
        Self {
            image_id,
            grid: None,
            format: PixelFormat::A8R8G8B8,
            flags: ImageFlags::empty(),
            textures: Vec::new(),
            surfaces: Vec::new(),
            palette: None,
            synced_change_count: 0,
            usable: false,
            texture_bytes: 0,
        }
    }

    pub fn image_id(&self) -> ImageId {
        self.image_id
    }

    pub fn grid(&self) -> Option<&TileGrid> {
        self.grid.as_ref()
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn flags(&self) -> ImageFlags {
        self.flags
    }

    pub fn textures(&self) -> &[TextureHandle] {
        &self.textures
    }

    pub fn surfaces(&self) -> &[TileSurface] {
        &self.surfaces
    }

    /// Palette captured at the last upload of a `Palette8` grid.
    pub fn palette(&self) -> Option<&Palette> {
        self.palette.as_deref()
    }

    pub fn synced_change_count(&self) -> u64 {
        self.synced_change_count
    }

    /// Built and every tile alive.
    pub fn is_usable(&self) -> bool {
        self.usable && self.grid.is_some()
    }

    /// Texture memory held by this store, palette included.
    pub fn texture_bytes(&self) -> usize {
        self.texture_bytes
    }

    /// Bring the tiles in line with `image`.
    pub fn sync<B: TileBackend>(
        &mut self,
        planner: &TilePlanner,
        backend: &mut B,
        image: &Image,
    ) -> SyncOutcome {
        let format = select_format(image, planner.caps());
        let needs_rebuild = match &self.grid {
            None => true,
            Some(grid) => {
                grid.image_size() != (image.width(), image.height())
                    || self.flags != image.flags()
                    || self.format != format
            }
        };

        if needs_rebuild {
            return self.rebuild(planner, backend, image, format);
        }
        if !self.usable {
            return SyncOutcome::Unusable;
        }
        if self.synced_change_count == image.change_count() {
            return SyncOutcome::UpToDate;
        }
        self.refresh(backend, image)
    }

    fn rebuild<B: TileBackend>(
        &mut self,
        planner: &TilePlanner,
        backend: &mut B,
        image: &Image,
        format: PixelFormat,
    ) -> SyncOutcome {
        self.release_all(backend);
        warn_if_degraded(self.image_id, image, format);

        let use_pow2 = planner.caps().pow2_required || format == PixelFormat::Palette8;
        let grid = TileGrid::build(planner, image.width(), image.height(), image.flags(), use_pow2);
        self.format = format;
        self.flags = image.flags();
        self.palette = capture_palette(image, format);
        self.synced_change_count = image.change_count();

        let created = create_tiles(backend, &grid, image, format, self.palette.as_deref());
        let (columns, rows) = grid.dimensions();
        let (tile_width, tile_height) = grid.tile_size();
        self.grid = Some(grid);

        match created {
            Ok((textures, surfaces)) => {
                self.texture_bytes = surfaces.iter().map(TileSurface::byte_len).sum::<usize>()
                    + self.palette.as_ref().map_or(0, |_| PALETTE_SIZE * 4);
                self.textures = textures;
                self.surfaces = surfaces;
                self.usable = true;
                info!(
                    "Built {}x{} tile grid ({}x{} nominal, {}) for image {} ({}x{})",
                    columns,
                    rows,
                    tile_width,
                    tile_height,
                    format,
                    self.image_id.raw(),
                    image.width(),
                    image.height()
                );
                SyncOutcome::Rebuilt
            }
            Err(err) => {
                self.usable = false;
                self.palette = None;
                log_backend_failure(self.image_id, &err);
                SyncOutcome::Unusable
            }
        }
    }

    fn refresh<B: TileBackend>(&mut self, backend: &mut B, image: &Image) -> SyncOutcome {
        let Some(grid) = self.grid.as_ref() else {
            return SyncOutcome::Unusable;
        };
        if self.format == PixelFormat::Palette8 {
            self.palette = capture_palette(image, self.format);
        }

        let mut failure = None;
        for ((tile, surface), &texture) in grid
            .tiles()
            .iter()
            .zip(self.surfaces.iter_mut())
            .zip(&self.textures)
        {
            if !surface.fill_from_image(image, tile.x, tile.y, tile.covered_width, tile.covered_height)
            {
                failure = Some(BackendError::UnsupportedFormat(self.format));
                break;
            }
            if let Err(err) = backend.upload(texture, surface, self.palette.as_deref()) {
                failure = Some(err);
                break;
            }
        }

        if let Some(err) = failure {
            log_backend_failure(self.image_id, &err);
            self.release_all(backend);
            self.usable = false;
            return SyncOutcome::Unusable;
        }

        self.synced_change_count = image.change_count();
        debug!(
            "Refreshed {} tiles of image {} at change {}",
            self.textures.len(),
            self.image_id.raw(),
            self.synced_change_count
        );
        SyncOutcome::Refreshed
    }

    /// Push every staging surface back to its texture unchanged.
    pub(crate) fn reupload<B: TileBackend>(&self, backend: &mut B) -> Result<(), BackendError> {
        for (surface, &texture) in self.surfaces.iter().zip(&self.textures) {
            backend.upload(texture, surface, self.palette.as_deref())?;
        }
        Ok(())
    }

    /// Free every texture. The grid shape is kept so an unusable store stays
    /// unusable until the image's dimensions, flags or format change.
    pub fn release_all<B: TileBackend>(&mut self, backend: &mut B) {
        for texture in self.textures.drain(..) {
            backend.release(texture);
        }
        self.surfaces.clear();
        self.texture_bytes = 0;
    }

    /// Free everything and forget the grid, so the next sync rebuilds.
    pub fn purge<B: TileBackend>(&mut self, backend: &mut B) {
        self.release_all(backend);
        self.grid = None;
        self.palette = None;
        self.usable = false;
    }
}

type CreatedTiles = (Vec<TextureHandle>, Vec<TileSurface>);

/// Create and upload every tile of `grid`. On failure, any texture created
/// so far is released before the error is returned.
fn create_tiles<B: TileBackend>(
    backend: &mut B,
    grid: &TileGrid,
    image: &Image,
    format: PixelFormat,
    palette: Option<&Palette>,
) -> Result<CreatedTiles, BackendError> {
    let mut created = (Vec::with_capacity(grid.len()), Vec::with_capacity(grid.len()));
    if let Err(err) = fill_tiles(backend, grid, image, format, palette, &mut created) {
        for texture in created.0 {
            backend.release(texture);
        }
        return Err(err);
    }
    Ok(created)
}

fn fill_tiles<B: TileBackend>(
    backend: &mut B,
    grid: &TileGrid,
    image: &Image,
    format: PixelFormat,
    palette: Option<&Palette>,
    (textures, surfaces): &mut CreatedTiles,
) -> Result<(), BackendError> {
    for tile in grid.tiles() {
        let mut surface = TileSurface::new(tile.width, tile.height, format);
        if !surface.fill_from_image(image, tile.x, tile.y, tile.covered_width, tile.covered_height) {
            return Err(BackendError::UnsupportedFormat(format));
        }
        let texture = backend.create_texture(tile.width, tile.height, format)?;
        textures.push(texture);
        backend.upload(texture, &surface, palette)?;
        surfaces.push(surface);
    }
    Ok(())
}

fn capture_palette(image: &Image, format: PixelFormat) -> Option<Box<Palette>> {
    if format != PixelFormat::Palette8 {
        return None;
    }
    image.palette().map(|palette| Box::new(*palette))
}

/// Requested formats the hardware could not honour.
fn warn_if_degraded(image_id: ImageId, image: &Image, format: PixelFormat) {
    let wanted = if image.indices().is_some() {
        Some(PixelFormat::Palette8)
    } else if image.flags().contains(ImageFlags::USE_A4R4G4B4) {
        Some(PixelFormat::A4R4G4B4)
    } else {
        None
    };
    if let Some(wanted) = wanted {
        if wanted != format && format != PixelFormat::R5G6B5 {
            warn!(
                "Image {} wanted {} but the hardware gives {}",
                image_id.raw(),
                wanted,
                format
            );
        }
    }
}

fn log_backend_failure(image_id: ImageId, err: &BackendError) {
    match err {
        BackendError::OutOfMemory { .. } => {
            error!("Image {} is unusable: {}", image_id.raw(), err)
        }
        _ => warn!("Image {} is unusable: {}", image_id.raw(), err),
    }
}
