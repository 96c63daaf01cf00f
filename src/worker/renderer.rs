use crate::scheduler::tile::{ImageDetails, Tile, BYTES_PER_PIXEL};

/// Session-wide data a worker receives once per render.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneContext {
    pub scene_data: String,
    pub image: ImageDetails,
}

impl SceneContext {
    /// Used when a tile arrives before (or without) any scene.
    pub fn blank(image: ImageDetails) -> Self {
        Self {
            scene_data: String::new(),
            image,
        }
    }
}

/// Turns a tile description into RGBA8 pixels.
///
/// Must return exactly `tile.rect.pixel_len()` bytes, row-major.
pub trait TileRenderer: Send + Sync + 'static {
    fn render(&self, tile: &Tile, scene: &SceneContext) -> Vec<u8>;
}

/// Placeholder renderer: a gradient over the whole image with a per-tile
/// tint, so tile boundaries are visible in the output.
#[derive(Debug, Clone, Copy, Default)]
pub struct TestPatternRenderer;

impl TileRenderer for TestPatternRenderer {
    fn render(&self, tile: &Tile, scene: &SceneContext) -> Vec<u8> {
        let image = scene.image;
        let width = image.width.max(1) as f32;
        let height = image.height.max(1) as f32;
        let tint = 128 + (tile.id % 8) as u8 * 16;

        let mut pixels = Vec::with_capacity(tile.rect.pixel_len());
        for y in tile.rect.y..tile.rect.y + tile.rect.height {
            for x in tile.rect.x..tile.rect.x + tile.rect.width {
                let r = (x as f32 / width * 255.0) as u8;
                let g = (y as f32 / height * 255.0) as u8;
                pixels.extend_from_slice(&[r, g, tint, 255]);
            }
        }
        debug_assert_eq!(pixels.len(), tile.rect.pixel_len());
        debug_assert_eq!(pixels.len() % BYTES_PER_PIXEL, 0);
        pixels
    }
}
