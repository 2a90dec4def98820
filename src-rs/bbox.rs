//! Content extent of a raster surface.
//!
//! A pixel counts as drawn content when its alpha channel is non-zero. The
//! scan covers the whole frame every time; it only runs once per submission.

use image::RgbaImage;

use crate::geom::{BoundingBox, Point};

/// Anchor used when there is no drawn content to center results on.
pub const DEFAULT_ANCHOR: Point = Point::new(10.0, 200.0);

/// Tight rectangle around every non-transparent pixel, or `None` when the
/// surface is blank.
pub fn extract(surface: &RgbaImage) -> Option<BoundingBox> {
    let mut minx = u32::MAX;
    let mut miny = u32::MAX;
    let mut maxx = 0u32;
    let mut maxy = 0u32;

    for (x, y, pixel) in surface.enumerate_pixels() {
        if pixel[3] > 0 {
            minx = minx.min(x);
            miny = miny.min(y);
            maxx = maxx.max(x);
            maxy = maxy.max(y);
        }
    }

    if minx == u32::MAX {
        return None;
    }
    Some(BoundingBox {
        min_x: minx,
        min_y: miny,
        max_x: maxx,
        max_y: maxy,
    })
}

/// Center of the content, falling back to `fallback` for a blank surface.
pub fn anchor_or(surface: &RgbaImage, fallback: Point) -> Point {
    extract(surface)
        .map(|bbox| bbox.center())
        .unwrap_or(fallback)
}
