use serde::Serialize;

use crate::error::{FarmError, Result};
use crate::proto;

/// Bytes per output pixel (RGBA8).
pub const BYTES_PER_PIXEL: usize = 4;

/// Largest accepted image width or height, in pixels.
pub const MAX_IMAGE_DIMENSION: u32 = 16_384;

/// Largest RGBA payload a single tile may carry back in `JobComplete`.
pub const MAX_TILE_BYTES: usize = 64 * 1024 * 1024;

/// Full output image geometry, shared by every tile of a session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ImageDetails {
    pub width: u32,
    pub height: u32,
    pub aspect_ratio: f64,
}

impl ImageDetails {
    /// Derive the image height from a width and aspect ratio.
    pub fn from_width(width: u32, aspect_ratio: f64) -> Result<Self> {
        if width == 0 {
            return Err(FarmError::InvalidArgument(
                "image width must be positive".to_string(),
            ));
        }
        if !aspect_ratio.is_finite() || aspect_ratio <= 0.0 {
            return Err(FarmError::InvalidArgument(format!(
                "invalid aspect ratio {}",
                aspect_ratio
            )));
        }
        if width > MAX_IMAGE_DIMENSION {
            return Err(FarmError::InvalidArgument(format!(
                "image width {} exceeds the {}px limit",
                width, MAX_IMAGE_DIMENSION
            )));
        }
        let height = width as f64 / aspect_ratio;
        if height > MAX_IMAGE_DIMENSION as f64 {
            return Err(FarmError::InvalidArgument(format!(
                "aspect ratio {} gives a height above the {}px limit",
                aspect_ratio, MAX_IMAGE_DIMENSION
            )));
        }
        let height = height as u32;
        if height == 0 {
            return Err(FarmError::InvalidArgument(format!(
                "aspect ratio {} leaves a {}px wide image with no rows",
                aspect_ratio, width
            )));
        }
        Ok(Self {
            width,
            height,
            aspect_ratio,
        })
    }

    pub fn buffer_len(&self) -> usize {
        rgba_len(self.width, self.height)
    }
}

impl From<ImageDetails> for proto::ImageDetails {
    fn from(image: ImageDetails) -> Self {
        Self {
            width: image.width,
            height: image.height,
            aspect_ratio: image.aspect_ratio,
        }
    }
}

impl From<&proto::ImageDetails> for ImageDetails {
    fn from(image: &proto::ImageDetails) -> Self {
        Self {
            width: image.width,
            height: image.height,
            aspect_ratio: image.aspect_ratio,
        }
    }
}

/// A rectangle in output-image pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TileRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl TileRect {
    pub fn pixel_len(&self) -> usize {
        rgba_len(self.width, self.height)
    }
}

/// RGBA byte count for a `width` x `height` region, saturating on overflow.
fn rgba_len(width: u32, height: u32) -> usize {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|px| px.checked_mul(BYTES_PER_PIXEL))
        .unwrap_or(usize::MAX)
}

/// Everything needed to start one render pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderParams {
    pub scene_data: String,
    pub width: u32,
    pub aspect_ratio: f64,
    pub samples_per_pixel: u32,
    pub max_depth: u32,
    pub slice_count: u32,
}

impl RenderParams {
    pub fn image_details(&self) -> Result<ImageDetails> {
        ImageDetails::from_width(self.width, self.aspect_ratio)
    }

    /// Check the request and derive the image geometry.
    ///
    /// Rejects requests whose tallest tile would not fit in a single
    /// `JobComplete` message.
    pub fn validate(&self) -> Result<ImageDetails> {
        if self.slice_count == 0 {
            return Err(FarmError::InvalidArgument(
                "slice count must be positive".to_string(),
            ));
        }
        let image = self.image_details()?;
        let largest = partition(&image, self.slice_count)
            .iter()
            .map(TileRect::pixel_len)
            .max()
            .unwrap_or(0);
        if largest > MAX_TILE_BYTES {
            return Err(FarmError::InvalidArgument(format!(
                "tiles of up to {} bytes exceed the {} byte limit, use more slices",
                largest, MAX_TILE_BYTES
            )));
        }
        Ok(image)
    }
}

impl From<proto::RenderRequest> for RenderParams {
    fn from(req: proto::RenderRequest) -> Self {
        Self {
            scene_data: req.scene_data,
            width: req.width,
            aspect_ratio: req.aspect_ratio,
            samples_per_pixel: req.samples_per_pixel,
            max_depth: req.max_depth,
            slice_count: req.slice_count,
        }
    }
}

/// One unit of work: a region of the output image plus render settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    pub id: u64,
    pub rect: TileRect,
    pub samples_per_pixel: u32,
    pub max_depth: u32,
    pub image: ImageDetails,
}

impl Tile {
    pub fn to_request(&self) -> proto::JobRequest {
        proto::JobRequest {
            id: self.id,
            x: self.rect.x,
            y: self.rect.y,
            width: self.rect.width,
            height: self.rect.height,
            samples_per_pixel: self.samples_per_pixel,
            max_depth: self.max_depth,
            image: Some(self.image.into()),
        }
    }

    pub fn from_request(req: &proto::JobRequest) -> Result<Self> {
        let image = req
            .image
            .as_ref()
            .map(ImageDetails::from)
            .ok_or_else(|| FarmError::InvalidArgument("job is missing image details".into()))?;
        if req.width == 0 || req.height == 0 {
            return Err(FarmError::InvalidArgument(format!(
                "job {} has an empty tile",
                req.id
            )));
        }
        Ok(Self {
            id: req.id,
            rect: TileRect {
                x: req.x,
                y: req.y,
                width: req.width,
                height: req.height,
            },
            samples_per_pixel: req.samples_per_pixel,
            max_depth: req.max_depth,
            image,
        })
    }
}

/// Split the image into `slice_count` full-width horizontal bands.
///
/// Band heights differ by at most one row; the first `height % slices` bands
/// take the extra row. The slice count is capped at the image height so no
/// band is empty.
pub fn partition(image: &ImageDetails, slice_count: u32) -> Vec<TileRect> {
    let slices = slice_count.clamp(1, image.height);
    let base = image.height / slices;
    let extra = image.height % slices;

    let mut rects = Vec::with_capacity(slices as usize);
    let mut y = 0;
    for i in 0..slices {
        let height = base + u32::from(i < extra);
        rects.push(TileRect {
            x: 0,
            y,
            width: image.width,
            height,
        });
        y += height;
    }
    rects
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(width: u32, height: u32) -> ImageDetails {
        ImageDetails {
            width,
            height,
            aspect_ratio: width as f64 / height as f64,
        }
    }

    fn assert_exact_cover(image: &ImageDetails, rects: &[TileRect]) {
        let mut covered = vec![0u8; image.width as usize * image.height as usize];
        for r in rects {
            assert!(r.x + r.width <= image.width);
            assert!(r.y + r.height <= image.height);
            for y in r.y..r.y + r.height {
                for x in r.x..r.x + r.width {
                    covered[(y * image.width + x) as usize] += 1;
                }
            }
        }
        assert!(covered.iter().all(|&c| c == 1), "overlap or gap in partition");
    }

    #[test]
    fn partition_covers_image_exactly() {
        for (w, h) in [(1, 1), (7, 5), (64, 36), (33, 100)] {
            let img = image(w, h);
            for slices in [1, 2, 3, 5, 7, 32, 200] {
                let rects = partition(&img, slices);
                assert_exact_cover(&img, &rects);
            }
        }
    }

    #[test]
    fn partition_produces_requested_slice_count() {
        let img = image(1920, 1080);
        let rects = partition(&img, 32);
        assert_eq!(rects.len(), 32);
        let heights: Vec<u32> = rects.iter().map(|r| r.height).collect();
        assert_eq!(heights.iter().max().unwrap() - heights.iter().min().unwrap(), 1);
        assert_eq!(heights.iter().sum::<u32>(), 1080);
    }

    #[test]
    fn partition_caps_slices_at_image_height() {
        let img = image(10, 3);
        let rects = partition(&img, 8);
        assert_eq!(rects.len(), 3);
        assert!(rects.iter().all(|r| r.height == 1));
    }

    #[test]
    fn image_details_from_width_truncates_height() {
        let img = ImageDetails::from_width(1920, 16.0 / 9.0).unwrap();
        assert_eq!(img.height, 1080);
        let img = ImageDetails::from_width(100, 3.0).unwrap();
        assert_eq!(img.height, 33);
    }

    #[test]
    fn image_details_rejects_degenerate_input() {
        assert!(ImageDetails::from_width(0, 1.0).is_err());
        assert!(ImageDetails::from_width(100, 0.0).is_err());
        assert!(ImageDetails::from_width(100, f64::NAN).is_err());
        assert!(ImageDetails::from_width(2, 10.0).is_err());
    }

    #[test]
    fn image_details_rejects_oversized_dimensions() {
        assert!(ImageDetails::from_width(u32::MAX, 1.0).is_err());
        assert!(ImageDetails::from_width(MAX_IMAGE_DIMENSION + 1, 2.0).is_err());
        assert!(ImageDetails::from_width(1000, 0.01).is_err());
        let img = ImageDetails::from_width(MAX_IMAGE_DIMENSION, 1.0).unwrap();
        assert_eq!(img.buffer_len(), 16_384 * 16_384 * 4);
    }

    #[test]
    fn rgba_len_saturates_instead_of_wrapping() {
        let rect = TileRect {
            x: 0,
            y: 0,
            width: u32::MAX,
            height: u32::MAX,
        };
        assert!(rect.pixel_len() > MAX_TILE_BYTES);
    }

    fn params(width: u32, aspect_ratio: f64, slice_count: u32) -> RenderParams {
        RenderParams {
            scene_data: String::new(),
            width,
            aspect_ratio,
            samples_per_pixel: 1,
            max_depth: 1,
            slice_count,
        }
    }

    #[test]
    fn render_params_reject_tiles_over_message_limit() {
        // 8192 x 4096 RGBA in one band is 128 MiB
        assert!(params(8192, 2.0, 1).validate().is_err());
        // Four bands of 32 MiB fit
        assert!(params(8192, 2.0, 4).validate().is_ok());
    }

    #[test]
    fn render_params_require_slices() {
        let params = RenderParams {
            scene_data: String::new(),
            width: 64,
            aspect_ratio: 1.0,
            samples_per_pixel: 1,
            max_depth: 1,
            slice_count: 0,
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn job_request_conversion_keeps_geometry() {
        let tile = Tile {
            id: 9,
            rect: TileRect {
                x: 0,
                y: 12,
                width: 64,
                height: 4,
            },
            samples_per_pixel: 8,
            max_depth: 3,
            image: image(64, 64),
        };
        let back = Tile::from_request(&tile.to_request()).unwrap();
        assert_eq!(back, tile);
    }

    #[test]
    fn job_request_without_image_is_rejected() {
        let mut req = Tile {
            id: 1,
            rect: TileRect {
                x: 0,
                y: 0,
                width: 1,
                height: 1,
            },
            samples_per_pixel: 1,
            max_depth: 1,
            image: image(1, 1),
        }
        .to_request();
        req.image = None;
        assert!(Tile::from_request(&req).is_err());
    }
}
