//! Renderer façade: one tile store per image, keyed by image id.
//!
//! All texture work happens on the thread that owns the renderer. Other
//! threads may only announce that an image is gone, through a
//! [`ShadowReleaser`]; its textures are freed at the next collection.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use glam::{Affine2, Vec2};
use log::{debug, info};
use mosaic_core::{HardwareCaps, Image, ImageId, Rect};

use crate::backend::TileBackend;
use crate::compositor::{Compositor, DrawParams, DrawSink, Stretch, TexturePiece, TriVertex};
use crate::planner::TilePlanner;
use crate::readback;
use crate::store::{SyncOutcome, TileStore};

#[derive(Debug, Default)]
struct TrackedImages {
    live: HashSet<ImageId>,
    released: Vec<ImageId>,
}

fn lock_tracked(tracked: &Mutex<TrackedImages>) -> MutexGuard<'_, TrackedImages> {
    tracked.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cloneable, `Send` handle for releasing image shadows from any thread.
#[derive(Debug, Clone)]
pub struct ShadowReleaser {
    tracked: Arc<Mutex<TrackedImages>>,
}

impl ShadowReleaser {
    /// Queue the shadow of `id` for release. Returns false if the renderer
    /// holds no shadow for it.
    pub fn release(&self, id: ImageId) -> bool {
        let mut tracked = lock_tracked(&self.tracked);
        if !tracked.live.remove(&id) {
            return false;
        }
        tracked.released.push(id);
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RendererStats {
    pub images: usize,
    pub unusable_images: usize,
    pub textures: usize,
    pub texture_bytes: usize,
}

pub struct TiledRenderer<B: TileBackend> {
    backend: B,
    planner: TilePlanner,
    shadows: HashMap<ImageId, TileStore>,
    tracked: Arc<Mutex<TrackedImages>>,
}

impl<B: TileBackend> TiledRenderer<B> {
    /// Hardware caps are read from the backend once, here.
    pub fn new(backend: B) -> Self {
        let caps = backend.caps();
        info!(
            "Tiled renderer on {} backend: tiles {}x{}..{}x{}, aspect {}, formats {:?}, pow2 {}",
            backend.name(),
            caps.min_width,
            caps.min_height,
            caps.max_width,
            caps.max_height,
            caps.max_aspect_ratio,
            caps.formats,
            caps.pow2_required
        );
        Self {
            backend,
            planner: TilePlanner::new(caps),
            shadows: HashMap::new(),
            tracked: Arc::new(Mutex::new(TrackedImages::default())),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn caps(&self) -> &HardwareCaps {
        self.planner.caps()
    }

    pub fn releaser(&self) -> ShadowReleaser {
        ShadowReleaser {
            tracked: Arc::clone(&self.tracked),
        }
    }

    pub fn shadow(&self, id: ImageId) -> Option<&TileStore> {
        self.shadows.get(&id)
    }

    /// Create or update the shadow of `image` so it can be drawn.
    pub fn ensure_current(&mut self, image: &Image) -> SyncOutcome {
        self.collect_released();
        let id = image.id();
        let store = self.shadows.entry(id).or_insert_with(|| {
            lock_tracked(&self.tracked).live.insert(id);
            TileStore::new(id)
        });
        store.sync(&self.planner, &mut self.backend, image)
    }

    /// Blit `src` of `image` with its top-left at `(x, y)`. Returns the
    /// number of submissions.
    pub fn draw_image(
        &mut self,
        image: &Image,
        sink: &mut dyn DrawSink,
        x: f32,
        y: f32,
        src: Rect,
        params: &DrawParams,
    ) -> usize {
        self.composite(image, "Blit", |compositor| {
            compositor.blt(sink, x, y, src, params)
        })
    }

    /// Draw the whole image at `(x, y)`.
    pub fn draw_image_at(
        &mut self,
        image: &Image,
        sink: &mut dyn DrawSink,
        x: f32,
        y: f32,
        params: &DrawParams,
    ) -> usize {
        let src = Rect::new(0, 0, image.width() as i32, image.height() as i32);
        self.draw_image(image, sink, x, y, src, params)
    }

    /// Blit `src` scaled into `stretch`, optionally mirrored.
    pub fn draw_image_stretched(
        &mut self,
        image: &Image,
        sink: &mut dyn DrawSink,
        src: Rect,
        stretch: Stretch,
        params: &DrawParams,
    ) -> usize {
        self.composite(image, "Stretched blit", |compositor| {
            compositor.blt_stretched(sink, src, stretch, params)
        })
    }

    /// Blit `src` through `transform`; rotation is
    /// `Affine2::from_angle_translation`.
    pub fn draw_image_transformed(
        &mut self,
        image: &Image,
        sink: &mut dyn DrawSink,
        src: Rect,
        transform: Affine2,
        params: &DrawParams,
    ) -> usize {
        self.composite(image, "Transformed blit", |compositor| {
            compositor.blt_transformed(sink, src, transform, params)
        })
    }

    pub fn draw_triangles(
        &mut self,
        image: &Image,
        sink: &mut dyn DrawSink,
        triangles: &[[TriVertex; 3]],
        translation: Vec2,
        params: &DrawParams,
    ) -> usize {
        self.composite(image, "Triangle batch", |compositor| {
            compositor.blt_triangles(sink, triangles, translation, params)
        })
    }

    fn composite(
        &mut self,
        image: &Image,
        what: &str,
        draw: impl FnOnce(Compositor<'_>) -> usize,
    ) -> usize {
        if !self.ensure_current(image).is_drawable() {
            return 0;
        }
        let Some(store) = self.shadows.get(&image.id()) else {
            return 0;
        };
        let submitted = draw(Compositor::new(store));
        debug!(
            "{} of image {} produced {} submissions",
            what,
            image.id().raw(),
            submitted
        );
        submitted
    }

    /// Tile piece for a region of `image`, syncing it first.
    pub fn get_texture(
        &mut self,
        image: &Image,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Option<TexturePiece> {
        if !self.ensure_current(image).is_drawable() {
            return None;
        }
        let store = self.shadows.get(&image.id())?;
        Compositor::new(store).get_texture(x, y, width, height)
    }

    /// Restore `image`'s pixels from its tiles. See [`readback::recover_bits`].
    pub fn recover_bits(&mut self, image: &mut Image) -> bool {
        let Some(store) = self.shadows.get(&image.id()) else {
            return false;
        };
        readback::recover_bits(store, &mut self.backend, image)
    }

    /// Free the shadow of `id` now. The next draw rebuilds it from scratch.
    pub fn remove_image(&mut self, id: ImageId) -> bool {
        lock_tracked(&self.tracked).live.remove(&id);
        match self.shadows.remove(&id) {
            Some(mut store) => {
                store.purge(&mut self.backend);
                true
            }
            None => false,
        }
    }

    /// Free shadows released from other threads. Returns how many were freed.
    pub fn collect_released(&mut self) -> usize {
        let released = std::mem::take(&mut lock_tracked(&self.tracked).released);
        let mut freed = 0;
        for id in released {
            if let Some(mut store) = self.shadows.remove(&id) {
                store.purge(&mut self.backend);
                freed += 1;
            }
        }
        if freed > 0 {
            debug!("Collected {} released image shadows", freed);
        }
        freed
    }

    pub fn stats(&self) -> RendererStats {
        self.shadows
            .values()
            .fold(RendererStats::default(), |mut stats, store| {
                stats.images += 1;
                if !store.is_usable() {
                    stats.unusable_images += 1;
                }
                stats.textures += store.textures().len();
                stats.texture_bytes += store.texture_bytes();
                stats
            })
    }

    /// Release every shadow.
    pub fn cleanup(&mut self) {
        {
            let mut tracked = lock_tracked(&self.tracked);
            tracked.live.clear();
            tracked.released.clear();
        }
        for (_, mut store) in self.shadows.drain() {
            store.purge(&mut self.backend);
        }
    }
}

impl<B: TileBackend> Drop for TiledRenderer<B> {
    fn drop(&mut self) {
        self.cleanup();
    }
}
