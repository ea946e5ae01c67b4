pub mod backend;
pub mod batch;
pub mod compositor;
pub mod gpu_context;
pub mod grid;
pub mod planner;
pub mod readback;
pub mod renderer;
pub mod software;
pub mod store;
pub mod surface;
pub mod tile_pipeline;
pub mod wgpu_backend;

pub use backend::{BackendError, TextureHandle, TileBackend};
pub use batch::{DrawCall, SpriteBatch, SpriteVertex};
pub use compositor::{
    BlendMode, Compositor, DrawParams, DrawSink, DrawSubmission, FilterMode, Geometry, Stretch,
    TexturePiece, TileVertex, TriVertex, UvRect,
};
pub use gpu_context::GpuContext;
pub use grid::{TileGrid, TileLayout};
pub use planner::{build_good_size_table, TilePlanner, FIXED_SUBDIVISION_SIZE};
pub use readback::recover_bits;
pub use renderer::{RendererStats, ShadowReleaser, TiledRenderer};
pub use software::{SoftwareBackend, SoftwareTexture};
pub use store::{select_format, SyncOutcome, TileStore};
pub use surface::TileSurface;
pub use tile_pipeline::{RenderTarget, TilePipeline};
pub use wgpu_backend::{caps_from_limits, WgpuBackend, TILE_TEXTURE_FORMAT};
