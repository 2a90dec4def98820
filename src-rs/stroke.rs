//! Raster stroke engine.
//!
//! Strokes are composited straight into the surface as they are drawn; no
//! stroke geometry is kept once a segment has been painted.

use image::{Rgba, RgbaImage};
use log::debug;

use crate::geom::Point;
use crate::tool::{ToolMode, ToolState};

/// How a stroke combines with what is already on the surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Composite {
    /// Paint the colour over existing content.
    SourceOver(Rgba<u8>),
    /// Remove existing content under the brush.
    DestinationOut,
}

impl Composite {
    pub fn for_tool(tool: &ToolState) -> Self {
        match tool.mode {
            ToolMode::Pencil => Composite::SourceOver(tool.color),
            ToolMode::Eraser => Composite::DestinationOut,
        }
    }
}

/// Lives from press to release; the tool is captured at press time.
#[derive(Debug, Clone, Copy)]
struct PointerSession {
    last: Point,
    composite: Composite,
    width: f64,
}

#[derive(Debug, Default)]
pub struct StrokeEngine {
    surface: Option<RgbaImage>,
    pointer: Option<PointerSession>,
}

impl StrokeEngine {
    /// Engine without a surface; strokes are ignored until `resize`.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_size(width: u32, height: u32) -> Self {
        let mut engine = Self::new();
        engine.resize(width, height);
        engine
    }

    /// Replaces the surface with a blank one of the given size. Prior content
    /// is dropped and any active stroke ends.
    pub fn resize(&mut self, width: u32, height: u32) {
        debug!("surface resized to {width}x{height}");
        self.surface = Some(RgbaImage::new(width, height));
        self.pointer = None;
    }

    pub fn surface(&self) -> Option<&RgbaImage> {
        self.surface.as_ref()
    }

    /// Owned copy of the current pixels.
    pub fn snapshot(&self) -> Option<RgbaImage> {
        self.surface.clone()
    }

    pub fn is_drawing(&self) -> bool {
        self.pointer.is_some()
    }

    pub fn begin_stroke(&mut self, point: Point, tool: &ToolState) {
        if self.surface.is_none() {
            return;
        }
        let composite = Composite::for_tool(tool);
        debug!(
            "stroke begin at ({:.1}, {:.1}) mode={:?} width={}",
            point.x,
            point.y,
            tool.mode,
            tool.width()
        );
        self.pointer = Some(PointerSession {
            last: point,
            composite,
            width: f64::from(tool.width()),
        });
    }

    pub fn extend_stroke(&mut self, point: Point) {
        let (Some(surface), Some(pointer)) = (self.surface.as_mut(), self.pointer.as_mut()) else {
            return;
        };
        draw_thick_line(surface, pointer.last, point, pointer.composite, pointer.width);
        pointer.last = point;
    }

    pub fn end_stroke(&mut self) {
        if self.pointer.take().is_some() {
            debug!("stroke end");
        }
    }

    /// Makes every pixel transparent.
    pub fn clear(&mut self) {
        if let Some(surface) = self.surface.as_mut() {
            for pixel in surface.pixels_mut() {
                *pixel = Rgba([0, 0, 0, 0]);
            }
        }
    }
}

fn clamp_i32(value: i32, min_value: i32, max_value: i32) -> i32 {
    value.max(min_value).min(max_value)
}

/// Source-over for straight (non-premultiplied) alpha.
pub(crate) fn blend_pixel(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    let sa = f64::from(src[3]) / 255.0;
    if sa <= 0.0 {
        return dst;
    }
    let da = f64::from(dst[3]) / 255.0;
    let out_a = sa + da * (1.0 - sa);
    let channel = |i: usize| {
        let c = (f64::from(src[i]) * sa + f64::from(dst[i]) * da * (1.0 - sa)) / out_a;
        c.round().clamp(0.0, 255.0) as u8
    };
    Rgba([
        channel(0),
        channel(1),
        channel(2),
        (out_a * 255.0).round().clamp(0.0, 255.0) as u8,
    ])
}

fn composite_pixel(img: &mut RgbaImage, x: u32, y: u32, composite: Composite) {
    let dst = *img.get_pixel(x, y);
    let out = match composite {
        Composite::SourceOver(color) => blend_pixel(dst, color),
        Composite::DestinationOut => Rgba([0, 0, 0, 0]),
    };
    img.put_pixel(x, y, out);
}

fn draw_disc(img: &mut RgbaImage, center: Point, radius: f64, composite: Composite) {
    if img.width() == 0 || img.height() == 0 {
        return;
    }
    let (cx, cy) = (center.x, center.y);
    let min_x = clamp_i32((cx - radius).floor() as i32, 0, img.width() as i32 - 1);
    let max_x = clamp_i32((cx + radius).ceil() as i32, 0, img.width() as i32 - 1);
    let min_y = clamp_i32((cy - radius).floor() as i32, 0, img.height() as i32 - 1);
    let max_y = clamp_i32((cy + radius).ceil() as i32, 0, img.height() as i32 - 1);
    let r2 = radius * radius;
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let dx = f64::from(x) - cx;
            let dy = f64::from(y) - cy;
            if dx * dx + dy * dy <= r2 {
                composite_pixel(img, x as u32, y as u32, composite);
            }
        }
    }
}

/// Liang-Barsky clip of `from -> to` against the box `min..=max`.
fn clip_segment(from: Point, to: Point, min: Point, max: Point) -> Option<(Point, Point)> {
    let dx = to.x - from.x;
    let dy = to.y - from.y;
    let (mut t0, mut t1) = (0.0_f64, 1.0_f64);
    for (p, q) in [
        (-dx, from.x - min.x),
        (dx, max.x - from.x),
        (-dy, from.y - min.y),
        (dy, max.y - from.y),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            t0 = t0.max(r);
        } else {
            t1 = t1.min(r);
        }
        if t0 > t1 {
            return None;
        }
    }
    Some((from.offset(dx * t0, dy * t0), from.offset(dx * t1, dy * t1)))
}

/// Round-capped segment: discs stamped at one-pixel intervals. Only the part
/// within `radius` of the surface is stamped.
fn draw_thick_line(img: &mut RgbaImage, from: Point, to: Point, composite: Composite, width: f64) {
    let finite = [from.x, from.y, to.x, to.y].iter().all(|v| v.is_finite());
    if !finite || img.width() == 0 || img.height() == 0 {
        return;
    }
    let radius = (width.max(1.0) / 2.0).max(0.6);
    let min = Point::new(-radius, -radius);
    let max = Point::new(
        f64::from(img.width() - 1) + radius,
        f64::from(img.height() - 1) + radius,
    );
    let Some((from, to)) = clip_segment(from, to, min, max) else {
        return;
    };

    let dx = to.x - from.x;
    let dy = to.y - from.y;
    let distance = (dx * dx + dy * dy).sqrt();
    let steps = distance.max(1.0).ceil() as i32;
    for step in 0..=steps {
        let t = f64::from(step) / f64::from(steps.max(1));
        draw_disc(img, from.offset(dx * t, dy * t), radius, composite);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox;
    use std::time::{Duration, Instant};

    fn pencil(width: u32) -> ToolState {
        let mut tool = ToolState::default();
        tool.set_width(width);
        tool
    }

    fn drawn_pixels(img: &RgbaImage) -> usize {
        img.pixels().filter(|p| p[3] > 0).count()
    }

    #[test]
    fn extend_without_begin_draws_nothing() {
        let mut engine = StrokeEngine::with_size(50, 50);
        engine.extend_stroke(Point::new(5.0, 5.0));
        engine.extend_stroke(Point::new(40.0, 40.0));
        assert_eq!(drawn_pixels(engine.surface().unwrap()), 0);

        engine.begin_stroke(Point::new(5.0, 5.0), &pencil(3));
        engine.end_stroke();
        engine.extend_stroke(Point::new(40.0, 40.0));
        assert_eq!(drawn_pixels(engine.surface().unwrap()), 0);
    }

    #[test]
    fn begin_without_surface_is_noop() {
        let mut engine = StrokeEngine::new();
        engine.begin_stroke(Point::new(1.0, 1.0), &pencil(3));
        assert!(!engine.is_drawing());
        engine.extend_stroke(Point::new(2.0, 2.0));
        assert!(engine.snapshot().is_none());
    }

    #[test]
    fn pencil_segment_covers_both_endpoints() {
        let mut engine = StrokeEngine::with_size(100, 100);
        engine.begin_stroke(Point::new(10.0, 20.0), &pencil(1));
        engine.extend_stroke(Point::new(60.0, 20.0));
        engine.end_stroke();

        let img = engine.surface().unwrap();
        assert_eq!(*img.get_pixel(10, 20), Rgba([255, 255, 255, 255]));
        assert_eq!(*img.get_pixel(60, 20), Rgba([255, 255, 255, 255]));
        let extent = bbox::extract(img).unwrap();
        assert_eq!((extent.min_x, extent.max_x), (10, 60));
        assert_eq!((extent.min_y, extent.max_y), (20, 20));
    }

    #[test]
    fn eraser_removes_content() {
        let mut engine = StrokeEngine::with_size(60, 60);
        engine.begin_stroke(Point::new(10.0, 30.0), &pencil(5));
        engine.extend_stroke(Point::new(50.0, 30.0));
        engine.end_stroke();
        assert!(drawn_pixels(engine.surface().unwrap()) > 0);

        let mut eraser = ToolState::default();
        eraser.mode = ToolMode::Eraser;
        eraser.set_width(30);
        engine.begin_stroke(Point::new(5.0, 30.0), &eraser);
        engine.extend_stroke(Point::new(55.0, 30.0));
        engine.end_stroke();
        assert_eq!(drawn_pixels(engine.surface().unwrap()), 0);
    }

    #[test]
    fn far_move_paints_only_the_visible_part() {
        let mut engine = StrokeEngine::with_size(100, 100);
        engine.begin_stroke(Point::new(50.0, 50.0), &pencil(3));
        let started = Instant::now();
        engine.extend_stroke(Point::new(5.0e7, 50.0));
        assert!(started.elapsed() < Duration::from_secs(1));

        let extent = bbox::extract(engine.surface().unwrap()).unwrap();
        assert_eq!((extent.min_x, extent.max_x), (49, 99));
        assert_eq!((extent.min_y, extent.max_y), (49, 51));
    }

    #[test]
    fn segment_outside_surface_paints_nothing() {
        let mut engine = StrokeEngine::with_size(40, 40);
        engine.begin_stroke(Point::new(-1.0e9, -50.0), &pencil(10));
        engine.extend_stroke(Point::new(1.0e9, -50.0));
        engine.extend_stroke(Point::new(f64::INFINITY, 20.0));
        assert_eq!(drawn_pixels(engine.surface().unwrap()), 0);
    }

    #[test]
    fn clip_keeps_inner_segment_whole() {
        let from = Point::new(2.0, 3.0);
        let to = Point::new(8.0, 9.0);
        let clipped = clip_segment(from, to, Point::new(0.0, 0.0), Point::new(10.0, 10.0));
        assert_eq!(clipped, Some((from, to)));
    }

    #[test]
    fn clear_and_resize_drop_content() {
        let mut engine = StrokeEngine::with_size(30, 30);
        engine.begin_stroke(Point::new(3.0, 3.0), &pencil(4));
        engine.extend_stroke(Point::new(20.0, 20.0));
        engine.clear();
        assert_eq!(bbox::extract(engine.surface().unwrap()), None);
        assert!(engine.is_drawing());

        engine.extend_stroke(Point::new(25.0, 25.0));
        engine.resize(80, 20);
        assert!(!engine.is_drawing());
        let img = engine.surface().unwrap();
        assert_eq!(img.dimensions(), (80, 20));
        assert_eq!(drawn_pixels(img), 0);
    }

    #[test]
    fn blend_onto_transparent_keeps_source() {
        let out = blend_pixel(Rgba([0, 0, 0, 0]), Rgba([10, 20, 30, 255]));
        assert_eq!(out, Rgba([10, 20, 30, 255]));
        let half = blend_pixel(Rgba([0, 0, 0, 0]), Rgba([200, 100, 50, 128]));
        assert_eq!(half, Rgba([200, 100, 50, 128]));
    }
}
