//! The cached destination raster and tile composition.

use image::imageops::{self, FilterType};
use image::RgbaImage;

use ogc_common::{BoundingBox, OgcError, OgcResult};

/// The raster a draw call fills, together with the view it represents.
///
/// A new `CachedRender` is created whenever the view parameters change;
/// responses stamped with an older generation never touch it.
#[derive(Debug)]
pub struct CachedRender {
    pub image: RgbaImage,
    pub extent: BoundingBox,
    pub generation: u64,
}

impl CachedRender {
    pub fn new(extent: BoundingBox, width: u32, height: u32, generation: u64) -> Self {
        Self {
            // transparent until responses arrive
            image: RgbaImage::new(width, height),
            extent,
            generation,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// True when this render can be reused for the given view parameters.
    pub fn matches_view(&self, extent: &BoundingBox, width: u32, height: u32) -> bool {
        self.extent == *extent && self.width() == width && self.height() == height
    }

    /// Decode a tile body and blit it at its map-space position.
    ///
    /// The destination rectangle in pixel space is
    /// `((rect.min_x - extent.min_x)/cr, (extent.max_y - rect.max_y)/cr,
    /// rect.width/cr, rect.height/cr)` with `cr` the map units per pixel of
    /// the cached view. The decoded image is scaled into that rectangle,
    /// smoothly when `smooth` is set, and clipped at the raster edges.
    pub fn composite_tile(&mut self, rect: &BoundingBox, body: &[u8], smooth: bool) -> OgcResult<()> {
        let decoded = decode_image(body)?;

        let cr = self.extent.width() / self.width() as f64;
        let dst_x = (rect.min_x - self.extent.min_x) / cr;
        let dst_y = (self.extent.max_y - rect.max_y) / cr;
        let dst_w = (rect.width() / cr).round().max(1.0) as u32;
        let dst_h = (rect.height() / cr).round().max(1.0) as u32;

        let scaled;
        let tile = if decoded.width() == dst_w && decoded.height() == dst_h {
            &decoded
        } else {
            let filter = if smooth {
                FilterType::Triangle
            } else {
                FilterType::Nearest
            };
            scaled = imageops::resize(&decoded, dst_w, dst_h, filter);
            &scaled
        };

        imageops::overlay(&mut self.image, tile, dst_x.round() as i64, dst_y.round() as i64);
        Ok(())
    }

    /// Blit a full-view GetMap response at the origin, unscaled.
    pub fn composite_full(&mut self, body: &[u8]) -> OgcResult<()> {
        let decoded = decode_image(body)?;
        imageops::overlay(&mut self.image, &decoded, 0, 0);
        Ok(())
    }
}

fn decode_image(body: &[u8]) -> OgcResult<RgbaImage> {
    image::load_from_memory(body)
        .map(|img| img.to_rgba8())
        .map_err(|e| OgcError::Content(format!("returned image is flawed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageOutputFormat, Rgba};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32, color: Rgba<u8>) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, color);
        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut out, ImageOutputFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_tile_lands_at_its_map_position() {
        // view covers 0..100 x 0..100 at 100x100 px, cr = 1 map unit/px
        let mut render = CachedRender::new(BoundingBox::new(0.0, 0.0, 100.0, 100.0), 100, 100, 1);

        let red = Rgba([255, 0, 0, 255]);
        let tile = png_bytes(50, 50, red);
        // tile in the lower-left quadrant of the view
        render
            .composite_tile(&BoundingBox::new(0.0, 0.0, 50.0, 50.0), &tile, false)
            .unwrap();

        // lower-left quadrant is pixel rows 50..100
        assert_eq!(*render.image.get_pixel(10, 60), red);
        assert_eq!(*render.image.get_pixel(10, 10), Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn test_tile_is_scaled_into_destination() {
        let mut render = CachedRender::new(BoundingBox::new(0.0, 0.0, 100.0, 100.0), 100, 100, 1);

        let blue = Rgba([0, 0, 255, 255]);
        // a 10x10 source covering the whole view must stretch to 100x100
        let tile = png_bytes(10, 10, blue);
        render
            .composite_tile(&BoundingBox::new(0.0, 0.0, 100.0, 100.0), &tile, true)
            .unwrap();

        assert_eq!(*render.image.get_pixel(99, 99), blue);
        assert_eq!(*render.image.get_pixel(0, 0), blue);
    }

    #[test]
    fn test_tile_outside_view_is_clipped() {
        let mut render = CachedRender::new(BoundingBox::new(0.0, 0.0, 100.0, 100.0), 100, 100, 1);

        let green = Rgba([0, 255, 0, 255]);
        // tile partially left of and above the view
        let tile = png_bytes(50, 50, green);
        render
            .composite_tile(&BoundingBox::new(-25.0, 75.0, 25.0, 125.0), &tile, false)
            .unwrap();

        assert_eq!(*render.image.get_pixel(10, 10), green);
        assert_eq!(*render.image.get_pixel(30, 30), Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn test_flawed_body_is_a_content_error() {
        let mut render = CachedRender::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 10, 10, 1);
        let err = render
            .composite_tile(&BoundingBox::new(0.0, 0.0, 10.0, 10.0), b"not an image", false)
            .unwrap_err();
        assert!(matches!(err, OgcError::Content(_)));
    }

    #[test]
    fn test_matches_view() {
        let render = CachedRender::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 10, 10, 3);
        assert!(render.matches_view(&BoundingBox::new(0.0, 0.0, 10.0, 10.0), 10, 10));
        assert!(!render.matches_view(&BoundingBox::new(0.0, 0.0, 10.0, 10.0), 20, 10));
        assert!(!render.matches_view(&BoundingBox::new(0.0, 0.0, 10.0, 11.0), 10, 10));
    }
}
