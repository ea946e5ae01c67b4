//! Rebuild an image's CPU pixels from its tiles.

use log::warn;
use mosaic_core::Image;

use crate::backend::TileBackend;
use crate::store::TileStore;

/// Copy every tile's covered window back into `image`.
///
/// Fails without touching the image when the store is unusable or was
/// synced at a different change count than the image carries now. On
/// success the tiles are pushed to the backend again, so the textures match
/// what was just read back. The change counter is not bumped.
pub fn recover_bits<B: TileBackend>(store: &TileStore, backend: &mut B, image: &mut Image) -> bool {
    let Some(grid) = store.grid() else {
        return false;
    };
    if !store.is_usable() {
        return false;
    }
    if store.synced_change_count() != image.change_count() {
        warn!(
            "Skipping readback of image {}: tiles synced at change {}, image is at {}",
            image.id().raw(),
            store.synced_change_count(),
            image.change_count()
        );
        return false;
    }
    if grid.image_size() != (image.width(), image.height()) {
        return false;
    }

    let image_width = image.width();
    let palette = store.palette();
    let target = image.recovery_target();
    for (tile, surface) in grid.tiles().iter().zip(store.surfaces()) {
        if !surface.read_into(
            target,
            image_width,
            tile.x,
            tile.y,
            tile.covered_width,
            tile.covered_height,
            palette,
        ) {
            return false;
        }
    }

    if let Err(err) = store.reupload(backend) {
        warn!("Re-upload after readback of image {} failed: {}", image.id().raw(), err);
        return false;
    }
    true
}
