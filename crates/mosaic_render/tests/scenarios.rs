use glam::{Affine2, Vec2};
use mosaic_core::{
    Color, FormatSet, HardwareCaps, Image, ImageFlags, PixelFormat, Rect, PALETTE_SIZE,
};
use mosaic_render::surface::unpack_565;
use mosaic_render::{
    BlendMode, DrawParams, DrawSubmission, Geometry, SoftwareBackend, Stretch, SyncOutcome,
    TileBackend, TileGrid, TilePlanner, TiledRenderer, TriVertex,
};

fn renderer(caps: HardwareCaps) -> TiledRenderer<SoftwareBackend> {
    TiledRenderer::new(SoftwareBackend::new(caps))
}

fn opaque(width: u32, height: u32) -> Image {
    Image::from_argb(width, height, vec![0xFF33_6699; (width * height) as usize]).unwrap()
}

fn translucent(width: u32, height: u32) -> Image {
    let bits = (0..width * height)
        .map(|i| ((i % 255) << 24) | (i.wrapping_mul(2_654_435_761) & 0x00FF_FFFF))
        .collect();
    Image::from_argb(width, height, bits).unwrap()
}

fn grid_of(renderer: &TiledRenderer<SoftwareBackend>, image: &Image) -> TileGrid {
    renderer
        .shadow(image.id())
        .and_then(|store| store.grid())
        .cloned()
        .expect("image has a grid")
}

#[test]
fn scenario_small_image_is_one_tile() {
    let mut renderer = renderer(HardwareCaps::default());
    let image = opaque(100, 100);
    assert_eq!(renderer.ensure_current(&image), SyncOutcome::Rebuilt);

    let grid = grid_of(&renderer, &image);
    assert_eq!(grid.dimensions(), (1, 1));
    let tile = grid.tiles()[0];
    assert_eq!((tile.width, tile.height), (128, 128));
}

#[test]
fn scenario_wide_image_splits_into_two_columns() {
    let mut renderer = renderer(HardwareCaps::default());
    let image = opaque(2000, 50);
    renderer.ensure_current(&image);
    let grid = grid_of(&renderer, &image);
    assert_eq!(grid.dimensions(), (2, 1));
    let covered: Vec<u32> = grid.tiles().iter().map(|t| t.covered_width).collect();
    assert_eq!(covered, vec![1024, 976]);
    assert!(grid.tiles().iter().all(|t| t.width <= 1024));

    let mut renderer = self::renderer(HardwareCaps::argb_only(1024));
    renderer.ensure_current(&image);
    let grid = grid_of(&renderer, &image);
    let physical: Vec<u32> = grid.tiles().iter().map(|t| t.width).collect();
    assert_eq!(physical, vec![1024, 976]);
}

#[test]
fn scenario_blit_across_tile_boundary() {
    let mut renderer = renderer(HardwareCaps::default());
    let image = opaque(2000, 50);
    let mut sink: Vec<DrawSubmission> = Vec::new();
    let count = renderer.draw_image(
        &image,
        &mut sink,
        0.0,
        0.0,
        Rect::new(1020, 0, 10, 50),
        &DrawParams::default(),
    );
    assert_eq!(count, 2);
    assert_ne!(sink[0].texture, sink[1].texture);

    let sizes: Vec<(Vec2, Vec2)> = sink
        .iter()
        .map(|s| match &s.geometry {
            Geometry::Quad { position, size, .. } => (*position, *size),
            Geometry::Triangles(_) => panic!("blit emitted triangles"),
        })
        .collect();
    assert_eq!(sizes[0], (Vec2::new(0.0, 0.0), Vec2::new(4.0, 50.0)));
    assert_eq!(sizes[1], (Vec2::new(4.0, 0.0), Vec2::new(6.0, 50.0)));
}

#[test]
fn scenario_indexed_image_without_palette_support() {
    let caps = HardwareCaps {
        formats: FormatSet::A8R8G8B8 | FormatSet::A4R4G4B4 | FormatSet::R5G6B5,
        ..HardwareCaps::default()
    };
    let mut renderer = renderer(caps);
    let mut palette = [0u32; PALETTE_SIZE];
    palette[1] = 0x80FF_0000;
    palette[2] = 0xFF00_FF00;
    let image = Image::from_indexed(64, 64, vec![1, 2].repeat(64 * 32), palette).unwrap();
    renderer.ensure_current(&image);
    let store = renderer.shadow(image.id()).unwrap();
    assert_eq!(store.format(), PixelFormat::A8R8G8B8);

    let texture = renderer.backend().texture(store.textures()[0]).unwrap();
    assert_eq!(texture.pixel_argb(0, 0), Some(0x80FF_0000));
    assert_eq!(texture.pixel_argb(1, 0), Some(0xFF00_FF00));
}

#[test]
fn grid_invariants_hold_for_many_sizes() {
    let sizes = [
        1, 2, 63, 64, 65, 100, 127, 128, 129, 300, 640, 1000, 1023, 1024, 1025, 2000, 3000,
    ];
    let profiles = [
        HardwareCaps::default(),
        HardwareCaps::argb_only(1024),
        HardwareCaps {
            min_width: 16,
            min_height: 16,
            max_width: 512,
            max_height: 512,
            max_aspect_ratio: 2,
            ..HardwareCaps::default()
        },
    ];
    let flag_sets = [
        ImageFlags::empty(),
        ImageFlags::MINIMIZE_SUBDIVISIONS,
        ImageFlags::USE_64X64_SUBDIVISIONS,
    ];

    for caps in profiles {
        let planner = TilePlanner::new(caps);
        for flags in flag_sets {
            for &width in &sizes {
                for &height in &sizes {
                    let grid = TileGrid::build(&planner, width, height, flags, caps.pow2_required);
                    let context = format!("{}x{} {:?} {:?}", width, height, flags, caps);
                    let (tile_w, tile_h) = grid.tile_size();
                    let (cols, rows) = grid.dimensions();
                    assert_eq!(cols, width.div_ceil(tile_w), "{}", context);
                    assert_eq!(rows, height.div_ceil(tile_h), "{}", context);

                    for row in 0..rows {
                        let sum: u32 = (0..cols)
                            .map(|col| grid.tile(col, row).unwrap().covered_width)
                            .sum();
                        assert_eq!(sum, width, "row {} of {}", row, context);
                    }
                    for col in 0..cols {
                        let sum: u32 = (0..rows)
                            .map(|row| grid.tile(col, row).unwrap().covered_height)
                            .sum();
                        assert_eq!(sum, height, "column {} of {}", col, context);
                    }
                    for tile in grid.tiles() {
                        assert!(tile.width >= caps.min_width && tile.width <= caps.max_width);
                        assert!(tile.height >= caps.min_height && tile.height <= caps.max_height);
                        assert!(tile.width >= tile.covered_width, "{}", context);
                        assert!(tile.height >= tile.covered_height, "{}", context);
                    }
                }
            }
        }
    }
}

#[test]
fn get_texture_never_spans_two_tiles() {
    let mut renderer = renderer(HardwareCaps::default());
    let image = translucent(2000, 300);
    renderer.ensure_current(&image);
    let grid = grid_of(&renderer, &image);

    for y in (0..300).step_by(29) {
        for x in (0..2000).step_by(37) {
            let piece = renderer.get_texture(&image, x, y, 500, 500).unwrap();
            assert!(piece.width >= 1 && piece.height >= 1);
            let first = grid.locate(x, y);
            let last = grid.locate(x + piece.width - 1, y + piece.height - 1);
            assert_eq!(first, last, "piece at {},{} crosses a tile edge", x, y);
            assert!(piece.uv.u1 <= 1.0 && piece.uv.v1 <= 1.0);
        }
    }
}

fn assert_round_trip(caps: HardwareCaps, mut image: Image, expected_format: PixelFormat) {
    let mut renderer = renderer(caps);
    renderer.ensure_current(&image);
    assert_eq!(
        renderer.shadow(image.id()).unwrap().format(),
        expected_format
    );

    let original = image.bits().to_vec();
    let change_count = image.change_count();
    image.recovery_target().fill(0);
    assert!(renderer.recover_bits(&mut image));
    assert_eq!(image.change_count(), change_count);
    assert!(
        image.bits() == original.as_slice(),
        "{} round trip changed pixels",
        expected_format
    );
}

#[test]
fn round_trip_a8r8g8b8() {
    assert_round_trip(
        HardwareCaps::default(),
        translucent(300, 300),
        PixelFormat::A8R8G8B8,
    );
    assert_round_trip(
        HardwareCaps::argb_only(1024),
        translucent(2000, 50),
        PixelFormat::A8R8G8B8,
    );
}

#[test]
fn round_trip_a4r4g4b4() {
    let nibble = |v: u32| ((v & 0xF) << 4) | (v & 0xF);
    let bits = (0..300 * 300u32)
        .map(|i| {
            (nibble(i % 15 + 1) << 24) | (nibble(i / 3) << 16) | (nibble(i / 7) << 8) | nibble(i)
        })
        .collect();
    let mut image = Image::from_argb(300, 300, bits).unwrap();
    image.set_flags(ImageFlags::USE_A4R4G4B4);
    assert_round_trip(HardwareCaps::default(), image, PixelFormat::A4R4G4B4);
}

#[test]
fn round_trip_r5g6b5() {
    let bits = (0..300 * 300u32)
        .map(|i| unpack_565(i.wrapping_mul(97) as u16))
        .collect();
    let image = Image::from_argb(300, 300, bits).unwrap();
    assert_round_trip(HardwareCaps::default(), image, PixelFormat::R5G6B5);
}

#[test]
fn round_trip_palette8() {
    let mut palette = [0u32; PALETTE_SIZE];
    for (k, entry) in palette.iter_mut().enumerate() {
        let k = k as u32;
        *entry = (k << 24) | (k.wrapping_mul(3) & 0xFF) << 16 | (k ^ 0x5A) << 8 | (255 - k);
    }
    let indices = (0..300 * 300u32).map(|i| (i % 256) as u8).collect();
    let image = Image::from_indexed(300, 300, indices, palette).unwrap();
    assert_round_trip(HardwareCaps::default(), image, PixelFormat::Palette8);
}

#[test]
fn change_counter_bump_refreshes_without_rebuilding() {
    let mut renderer = renderer(HardwareCaps::default());
    let mut image = translucent(300, 300);
    assert_eq!(renderer.ensure_current(&image), SyncOutcome::Rebuilt);
    let handles = renderer.shadow(image.id()).unwrap().textures().to_vec();

    image.set_pixel(299, 299, 0x1234_5678);
    assert_eq!(renderer.ensure_current(&image), SyncOutcome::Refreshed);
    assert_eq!(renderer.shadow(image.id()).unwrap().textures(), handles.as_slice());
    assert_eq!(renderer.ensure_current(&image), SyncOutcome::UpToDate);

    let corner = *handles.last().unwrap();
    let texture = renderer.backend().texture(corner).unwrap();
    assert_eq!(texture.pixel_argb(43, 43), Some(0x1234_5678));
    // padding replicates the new corner pixel
    assert_eq!(texture.pixel_argb(63, 63), Some(0x1234_5678));
}

#[test]
fn failed_allocation_makes_image_unusable_until_flags_change() {
    let caps = HardwareCaps::default();
    let mut renderer =
        TiledRenderer::new(SoftwareBackend::with_memory_budget(caps, 1024 * 128 * 4 + 1));
    let mut image = translucent(2000, 64);
    let mut sink: Vec<DrawSubmission> = Vec::new();
    let params = DrawParams::default();

    assert_eq!(renderer.draw_image_at(&image, &mut sink, 0.0, 0.0, &params), 0);
    let tri = [
        TriVertex::new(0.0, 0.0, 0.0, 0.0),
        TriVertex::new(1.0, 0.0, 1.0, 0.0),
        TriVertex::new(0.0, 1.0, 0.0, 1.0),
    ];
    assert_eq!(
        renderer.draw_triangles(&image, &mut sink, &[tri], Vec2::ZERO, &params),
        0
    );
    assert!(sink.is_empty());
    assert!(!renderer.recover_bits(&mut image));
    assert_eq!(renderer.backend().live_textures(), 0);

    image.bits_changed();
    assert_eq!(renderer.ensure_current(&image), SyncOutcome::Unusable);

    renderer.backend_mut().set_memory_budget(None);
    image.set_flags(ImageFlags::MINIMIZE_SUBDIVISIONS);
    assert_eq!(renderer.draw_image_at(&image, &mut sink, 0.0, 0.0, &params), 2);
}

#[test]
fn shadow_released_from_another_thread_is_collected() {
    let mut renderer = renderer(HardwareCaps::default());
    let image = translucent(2000, 50);
    renderer.ensure_current(&image);
    assert_eq!(renderer.backend().live_textures(), 2);

    let releaser = renderer.releaser();
    let id = image.id();
    let released = std::thread::spawn(move || releaser.release(id))
        .join()
        .expect("release thread");
    assert!(released);

    assert_eq!(renderer.backend().live_textures(), 2);
    assert_eq!(renderer.collect_released(), 1);
    assert_eq!(renderer.backend().live_textures(), 0);
    assert!(renderer.shadow(id).is_none());
    assert_eq!(renderer.ensure_current(&image), SyncOutcome::Rebuilt);
}

#[test]
fn triangles_spanning_the_whole_image_touch_every_tile() {
    let mut renderer = renderer(HardwareCaps::default());
    let image = translucent(300, 300);
    let mut sink: Vec<DrawSubmission> = Vec::new();
    let triangles = [
        [
            TriVertex::new(0.0, 0.0, 0.0, 0.0),
            TriVertex::new(300.0, 0.0, 1.0, 0.0),
            TriVertex::new(0.0, 300.0, 0.0, 1.0),
        ],
        [
            TriVertex::new(300.0, 0.0, 1.0, 0.0),
            TriVertex::new(300.0, 300.0, 1.0, 1.0),
            TriVertex::new(0.0, 300.0, 0.0, 1.0),
        ],
    ];
    let count = renderer.draw_triangles(
        &image,
        &mut sink,
        &triangles,
        Vec2::ZERO,
        &DrawParams::default(),
    );
    assert_eq!(count, 4);

    // bottom-right tile: 44 covered texels of a 64 wide texture
    let Geometry::Triangles(vertices) = &sink[3].geometry else {
        panic!("expected triangles");
    };
    assert_eq!(vertices.len(), 6);
    let corner = vertices[4];
    assert_eq!(corner.position, Vec2::new(300.0, 300.0));
    assert!((corner.uv.x - 44.0 / 64.0).abs() < 1e-5);
    assert!((corner.uv.y - 44.0 / 64.0).abs() < 1e-5);
}

#[test]
fn palette_tiles_are_power_of_two_even_when_caps_allow_any_size() {
    let caps = HardwareCaps {
        pow2_required: false,
        ..HardwareCaps::default()
    };
    let mut renderer = renderer(caps);
    let palette = [0x8080_4020u32; PALETTE_SIZE];
    let image = Image::from_indexed(100, 30, vec![7; 100 * 30], palette).unwrap();
    assert_eq!(renderer.ensure_current(&image), SyncOutcome::Rebuilt);

    let store = renderer.shadow(image.id()).unwrap();
    assert_eq!(store.format(), PixelFormat::Palette8);
    let grid = store.grid().unwrap();
    for tile in grid.tiles() {
        assert!(tile.width.is_power_of_two(), "width {}", tile.width);
        assert!(tile.height.is_power_of_two(), "height {}", tile.height);
    }
    let covered: u32 = grid
        .tiles()
        .iter()
        .filter(|tile| tile.row == 0)
        .map(|tile| tile.covered_width)
        .sum();
    assert_eq!(covered, 100);
}

#[test]
fn a4r4g4b4_stands_in_when_a8r8g8b8_is_missing() {
    let caps = HardwareCaps {
        formats: FormatSet::A4R4G4B4,
        ..HardwareCaps::default()
    };
    let mut renderer = renderer(caps);
    let image = translucent(100, 100);
    assert_eq!(renderer.ensure_current(&image), SyncOutcome::Rebuilt);
    let store = renderer.shadow(image.id()).unwrap();
    assert_eq!(store.format(), PixelFormat::A4R4G4B4);
    for &handle in store.textures() {
        let texture = renderer.backend().texture(handle).unwrap();
        assert_eq!(texture.surface.format(), PixelFormat::A4R4G4B4);
    }
}

#[test]
fn draw_params_reach_every_submission() {
    let mut renderer = renderer(HardwareCaps::default());
    let image = translucent(300, 300);
    let clip = Rect::new(10, 20, 200, 150);
    let tint = Color::rgba(200, 100, 50, 128);
    let params = DrawParams {
        tint,
        blend: BlendMode::Additive,
        clip: Some(clip),
    };

    let mut sink: Vec<DrawSubmission> = Vec::new();
    assert_eq!(renderer.draw_image_at(&image, &mut sink, 0.0, 0.0, &params), 4);
    let triangle = [
        TriVertex::new(0.0, 0.0, 0.0, 0.0),
        TriVertex::new(300.0, 0.0, 1.0, 0.0),
        TriVertex::new(0.0, 300.0, 0.0, 1.0),
    ];
    assert!(renderer.draw_triangles(&image, &mut sink, &[triangle], Vec2::ZERO, &params) > 0);

    for submission in &sink {
        assert_eq!(submission.clip, Some(clip));
        assert_eq!(submission.blend, BlendMode::Additive);
        assert_eq!(submission.tint, tint);
    }
}

#[test]
fn upload_failure_during_refresh_makes_image_unusable() {
    let mut renderer = renderer(HardwareCaps::default());
    let mut image = translucent(300, 300);
    assert_eq!(renderer.ensure_current(&image), SyncOutcome::Rebuilt);

    // Pull one texture out from under the store so the next upload fails.
    let handle = renderer.shadow(image.id()).unwrap().textures()[2];
    renderer.backend_mut().release(handle);

    image.set_pixel(0, 0, 0xFF00_FF00);
    assert_eq!(renderer.ensure_current(&image), SyncOutcome::Unusable);
    let store = renderer.shadow(image.id()).unwrap();
    assert!(!store.is_usable());
    assert!(store.textures().is_empty());
    assert_eq!(renderer.backend().live_textures(), 0);

    image.set_pixel(1, 0, 0xFF00_FF00);
    assert_eq!(renderer.ensure_current(&image), SyncOutcome::Unusable);

    image.set_flags(ImageFlags::MINIMIZE_SUBDIVISIONS);
    assert_eq!(renderer.ensure_current(&image), SyncOutcome::Rebuilt);
}

#[test]
fn stretched_and_rotated_draws_cover_every_tile() {
    let mut renderer = renderer(HardwareCaps::default());
    let image = translucent(2000, 50);
    let src = Rect::new(0, 0, 2000, 50);
    let params = DrawParams::default();

    let mut sink: Vec<DrawSubmission> = Vec::new();
    let stretch = Stretch {
        position: Vec2::ZERO,
        size: Vec2::new(1000.0, 100.0),
        mirror: true,
    };
    assert_eq!(renderer.draw_image_stretched(&image, &mut sink, src, stretch, &params), 2);
    // the right-hand tile of the image lands at the left of the destination
    let Geometry::Quad { position, size, .. } = sink[1].geometry else {
        panic!("expected a quad");
    };
    assert_eq!((position.x, size.x), (0.0, 488.0));

    sink.clear();
    let rotation = Affine2::from_angle(std::f32::consts::PI);
    assert_eq!(renderer.draw_image_transformed(&image, &mut sink, src, rotation, &params), 2);
    assert!(sink
        .iter()
        .all(|submission| matches!(submission.geometry, Geometry::Triangles(ref v) if v.len() == 6)));
}
