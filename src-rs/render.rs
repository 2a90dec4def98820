//! Typesetting boundary and export compositing.
//!
//! The session only hands annotations to a [`Typesetter`]; what it draws and
//! where is the typesetter's business. [`BitmapTypesetter`] lays results out as
//! 8x8 bitmap text and can composite them over a surface for PNG export.

use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{Rgba, RgbaImage};

use crate::annotation::{Annotation, AnnotationId};
use crate::stroke::blend_pixel;

pub trait Typesetter {
    /// Called with the full, ordered annotation list whenever it changed.
    fn typeset(&mut self, annotations: &[Annotation]);
}

/// One laid-out annotation. `rect` is `(x0, y0, x1, y1)` including padding.
#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub id: AnnotationId,
    pub text: String,
    pub origin: (i32, i32),
    pub rect: (i32, i32, i32, i32),
}

#[derive(Debug, Clone)]
pub struct BitmapTypesetter {
    pub scale: u32,
    pub padding: i32,
    pub text_color: Rgba<u8>,
    pub box_color: Rgba<u8>,
    labels: Vec<Label>,
}

impl Default for BitmapTypesetter {
    fn default() -> Self {
        Self {
            scale: 2,
            padding: 8,
            text_color: Rgba([255, 255, 255, 255]),
            box_color: Rgba([0, 0, 0, 178]),
            labels: Vec::new(),
        }
    }
}

impl Typesetter for BitmapTypesetter {
    fn typeset(&mut self, annotations: &[Annotation]) {
        self.labels = annotations
            .iter()
            .map(|annotation| {
                let text = annotation.plain_text();
                let x = annotation.position.x.round() as i32;
                let y = annotation.position.y.round() as i32;
                let (x0, y0, x1, y1) = text_bbox(x, y, &text, self.scale);
                Label {
                    id: annotation.id,
                    text,
                    origin: (x, y),
                    rect: (
                        x0 - self.padding,
                        y0 - self.padding,
                        x1 + self.padding,
                        y1 + self.padding,
                    ),
                }
            })
            .collect();
    }
}

impl BitmapTypesetter {
    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// Surface over `background` (if any), then every label on top.
    pub fn compose(&self, surface: &RgbaImage, background: Option<Rgba<u8>>) -> RgbaImage {
        let mut out = match background {
            Some(color) => RgbaImage::from_pixel(surface.width(), surface.height(), color),
            None => RgbaImage::new(surface.width(), surface.height()),
        };
        for (dst, src) in out.pixels_mut().zip(surface.pixels()) {
            *dst = blend_pixel(*dst, *src);
        }
        for label in &self.labels {
            let (x0, y0, x1, y1) = label.rect;
            fill_rect_alpha(&mut out, x0, y0, x1, y1, self.box_color);
            draw_bitmap_text(
                &mut out,
                label.origin.0,
                label.origin.1,
                &label.text,
                self.text_color,
                self.scale,
            );
        }
        out
    }
}

fn clamp_i32(value: i32, min_value: i32, max_value: i32) -> i32 {
    value.max(min_value).min(max_value)
}

fn draw_bitmap_text(img: &mut RgbaImage, x: i32, y: i32, text: &str, color: Rgba<u8>, scale: u32) {
    let scale_i = scale.max(1) as i32;
    let mut cursor_x = x;
    let mut cursor_y = y;
    for ch in text.chars() {
        if ch == '\n' {
            cursor_x = x;
            cursor_y += 8 * scale_i;
            continue;
        }
        let glyph = BASIC_FONTS.get(ch).or_else(|| BASIC_FONTS.get('?'));
        let Some(glyph) = glyph else {
            cursor_x += 8 * scale_i;
            continue;
        };
        for (row_idx, row) in glyph.iter().enumerate() {
            for col_idx in 0..8 {
                if (*row >> col_idx) & 1 == 0 {
                    continue;
                }
                let px = cursor_x + col_idx * scale_i;
                let py = cursor_y + row_idx as i32 * scale_i;
                for sy in 0..scale_i {
                    for sx in 0..scale_i {
                        let tx = px + sx;
                        let ty = py + sy;
                        if tx >= 0 && ty >= 0 && tx < img.width() as i32 && ty < img.height() as i32 {
                            let dst = *img.get_pixel(tx as u32, ty as u32);
                            img.put_pixel(tx as u32, ty as u32, blend_pixel(dst, color));
                        }
                    }
                }
            }
        }
        cursor_x += 8 * scale_i;
    }
}

fn text_bbox(x: i32, y: i32, text: &str, scale: u32) -> (i32, i32, i32, i32) {
    let scale_i = scale.max(1) as i32;
    let lines: Vec<&str> = text.split('\n').collect();
    let width_chars = lines
        .iter()
        .map(|line| line.chars().count() as i32)
        .max()
        .unwrap_or(0);
    let line_count = lines.len().max(1) as i32;
    (
        x,
        y,
        x + width_chars * 8 * scale_i,
        y + line_count * 8 * scale_i,
    )
}

fn fill_rect_alpha(img: &mut RgbaImage, x0: i32, y0: i32, x1: i32, y1: i32, color: Rgba<u8>) {
    if img.width() == 0 || img.height() == 0 {
        return;
    }
    // fully off-canvas rectangles would otherwise clamp onto the border
    if x0.max(x1) < 0 || y0.max(y1) < 0 || x0.min(x1) >= img.width() as i32 || y0.min(y1) >= img.height() as i32 {
        return;
    }
    let min_x = clamp_i32(x0.min(x1), 0, img.width() as i32 - 1);
    let max_x = clamp_i32(x0.max(x1), 0, img.width() as i32 - 1);
    let min_y = clamp_i32(y0.min(y1), 0, img.height() as i32 - 1);
    let max_y = clamp_i32(y0.max(y1), 0, img.height() as i32 - 1);
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let dst = *img.get_pixel(x as u32, y as u32);
            img.put_pixel(x as u32, y as u32, blend_pixel(dst, color));
        }
    }
}
