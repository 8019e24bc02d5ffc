//! Raster helpers shared by scenes and overlays.
//!
//! Surfaces are plain [`RgbaImage`]s. [`Canvas`] lets `embedded-graphics`
//! primitives and mono fonts draw into them; everything else (blending,
//! tinting, scaling text) works on the image buffer directly.

use std::convert::Infallible;

use embedded_graphics::{
    mono_font::{ascii::FONT_10X20, MonoTextStyle},
    pixelcolor::Rgb888,
    prelude::*,
    primitives::{Circle, Line, PrimitiveStyle, Rectangle, RoundedRectangle, Triangle},
    text::{Baseline, Text},
};
use image::{imageops, Rgba, RgbaImage};

pub const BLACK: Rgb888 = Rgb888::new(0, 0, 0);
pub const WHITE: Rgb888 = Rgb888::new(255, 255, 255);
pub const GREY: Rgb888 = Rgb888::new(0xaa, 0xaa, 0xaa);
pub const RED: Rgb888 = Rgb888::new(0xcc, 0, 0);

const FONT_WIDTH: u32 = 10;
const FONT_HEIGHT: u32 = 20;

/// `embedded-graphics` draw target over an RGBA image. Drawn pixels are
/// fully opaque; pixels outside the image are clipped.
pub struct Canvas<'a> {
    image: &'a mut RgbaImage,
}

impl<'a> Canvas<'a> {
    pub fn new(image: &'a mut RgbaImage) -> Self {
        Self { image }
    }
}

impl OriginDimensions for Canvas<'_> {
    fn size(&self) -> Size {
        Size::new(self.image.width(), self.image.height())
    }
}

impl DrawTarget for Canvas<'_> {
    type Color = Rgb888;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        let (width, height) = self.image.dimensions();
        for Pixel(point, color) in pixels {
            if point.x < 0 || point.y < 0 {
                continue;
            }
            let (x, y) = (point.x as u32, point.y as u32);
            if x < width && y < height {
                self.image.put_pixel(x, y, opaque(color));
            }
        }
        Ok(())
    }
}

pub fn opaque(color: Rgb888) -> Rgba<u8> {
    Rgba([color.r(), color.g(), color.b(), 255])
}

/// New surface filled with `color`.
pub fn filled(width: u32, height: u32, color: Rgb888) -> RgbaImage {
    RgbaImage::from_pixel(width, height, opaque(color))
}

/// New fully transparent surface.
pub fn transparent(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0]))
}

/// Blends `top` into `base` with weight `opacity` on every channel:
/// `base * (1 - opacity) + top * opacity`. Only the overlapping area is
/// touched.
pub fn blend(base: &mut RgbaImage, top: &RgbaImage, opacity: f32) {
    let t = opacity.clamp(0.0, 1.0);
    if t == 0.0 {
        return;
    }
    let width = base.width().min(top.width());
    let height = base.height().min(top.height());
    for y in 0..height {
        for x in 0..width {
            let above = top.get_pixel(x, y);
            let below = base.get_pixel_mut(x, y);
            for channel in 0..4 {
                let mixed = below.0[channel] as f32 * (1.0 - t) + above.0[channel] as f32 * t;
                below.0[channel] = mixed.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

/// Recolours an image while keeping its luminosity and alpha.
pub fn tint(source: &RgbaImage, color: Rgb888) -> RgbaImage {
    let tint_luma = luma(color.r(), color.g(), color.b()).max(1.0);
    let scale = [
        color.r() as f32 / tint_luma,
        color.g() as f32 / tint_luma,
        color.b() as f32 / tint_luma,
    ];
    let mut out = source.clone();
    for pixel in out.pixels_mut() {
        let [r, g, b, a] = pixel.0;
        let l = luma(r, g, b);
        *pixel = Rgba([
            (l * scale[0]).round().min(255.0) as u8,
            (l * scale[1]).round().min(255.0) as u8,
            (l * scale[2]).round().min(255.0) as u8,
            a,
        ]);
    }
    out
}

fn luma(r: u8, g: u8, b: u8) -> f32 {
    (r as f32 * 299.0 + g as f32 * 587.0 + b as f32 * 114.0) / 1000.0
}

/// Draws `text` as large as fits inside the rectangle at (`x`, `y`) of
/// `width` x `height`, centred, by integer-scaling the 10x20 mono font.
/// Returns the scale used, 0 if nothing fit.
pub fn text_in_rect(
    target: &mut RgbaImage,
    text: &str,
    color: Rgb888,
    (x, y, width, height): (i64, i64, u32, u32),
) -> u32 {
    let chars = text.chars().count() as u32;
    if chars == 0 {
        return 0;
    }
    let native_width = chars * FONT_WIDTH;
    let scale = (width / native_width).min(height / FONT_HEIGHT);
    if scale == 0 {
        return 0;
    }

    let mut glyphs = transparent(native_width, FONT_HEIGHT);
    let style = MonoTextStyle::new(&FONT_10X20, color);
    let _ = Text::with_baseline(text, Point::zero(), style, Baseline::Top)
        .draw(&mut Canvas::new(&mut glyphs));

    let scaled = imageops::resize(
        &glyphs,
        native_width * scale,
        FONT_HEIGHT * scale,
        imageops::FilterType::Nearest,
    );
    let left = x + (width as i64 - scaled.width() as i64) / 2;
    let top = y + (height as i64 - scaled.height() as i64) / 2;
    imageops::overlay(target, &scaled, left, top);
    scale
}

/// Single line of native-size text; clipped, not scaled.
pub fn text_line(target: &mut RgbaImage, text: &str, color: Rgb888, x: i32, y: i32) {
    let style = MonoTextStyle::new(&FONT_10X20, color);
    let _ = Text::with_baseline(text, Point::new(x, y), style, Baseline::Top)
        .draw(&mut Canvas::new(target));
}

/// Characters of the 10x20 font that fit on a line of `width` pixels.
pub fn chars_per_line(width: u32) -> usize {
    (width / FONT_WIDTH) as usize
}

/// Truncates `text` to `max` characters, marking the cut with `~`.
pub fn ellipsize(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('~');
    out
}

pub fn fill_rect(target: &mut RgbaImage, color: Rgb888, x: i32, y: i32, width: u32, height: u32) {
    let _ = Rectangle::new(Point::new(x, y), Size::new(width, height))
        .into_styled(PrimitiveStyle::with_fill(color))
        .draw(&mut Canvas::new(target));
}

pub fn stroke_rect(target: &mut RgbaImage, color: Rgb888, x: i32, y: i32, width: u32, height: u32) {
    let _ = Rectangle::new(Point::new(x, y), Size::new(width, height))
        .into_styled(PrimitiveStyle::with_stroke(color, 1))
        .draw(&mut Canvas::new(target));
}

/// Pictograms for button feedback and error overlays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Glyph {
    Play,
    Pause,
    Next,
    Previous,
    VolumeDown,
    VolumeUp,
    Unsupported,
}

/// Draws `glyph` in white on a transparent square tile of `size` pixels.
pub fn glyph_tile(glyph: Glyph, size: u32) -> RgbaImage {
    let mut tile = transparent(size, size);
    let mut canvas = Canvas::new(&mut tile);
    let s = size as i32;
    let u = (s / 8).max(1);
    let fill = PrimitiveStyle::with_fill(WHITE);
    let at = |x: i32, y: i32| Point::new(x, y);

    match glyph {
        Glyph::Play => {
            let _ = Triangle::new(at(2 * u, u), at(2 * u, s - u), at(s - u, s / 2))
                .into_styled(fill)
                .draw(&mut canvas);
        }
        Glyph::Pause => {
            for left in [2 * u, 5 * u] {
                let _ = Rectangle::new(at(left, u), Size::new(u as u32, (s - 2 * u) as u32))
                    .into_styled(fill)
                    .draw(&mut canvas);
            }
        }
        Glyph::Next | Glyph::Previous => {
            let (tip, base, bar) = if glyph == Glyph::Next {
                (s - 2 * u, u, s - 2 * u)
            } else {
                (2 * u, s - u, u)
            };
            let _ = Triangle::new(at(base, u), at(base, s - u), at(tip, s / 2))
                .into_styled(fill)
                .draw(&mut canvas);
            let _ = Rectangle::new(at(bar, u), Size::new(u as u32, (s - 2 * u) as u32))
                .into_styled(fill)
                .draw(&mut canvas);
        }
        Glyph::VolumeDown | Glyph::VolumeUp => {
            let _ = Rectangle::new(at(u, 3 * u), Size::new(u as u32, 2 * u as u32))
                .into_styled(fill)
                .draw(&mut canvas);
            let _ = Triangle::new(at(u, s / 2), at(4 * u, u), at(4 * u, s - u))
                .into_styled(fill)
                .draw(&mut canvas);
            let stroke = PrimitiveStyle::with_stroke(WHITE, (u / 2).max(1) as u32);
            let _ = Line::new(at(5 * u, s / 2), at(7 * u, s / 2))
                .into_styled(stroke)
                .draw(&mut canvas);
            if glyph == Glyph::VolumeUp {
                let _ = Line::new(at(6 * u, 3 * u), at(6 * u, 5 * u))
                    .into_styled(stroke)
                    .draw(&mut canvas);
            }
        }
        Glyph::Unsupported => {
            let stroke = PrimitiveStyle::with_stroke(WHITE, (u / 2).max(1) as u32);
            let _ = Circle::with_center(at(s / 2, s / 2), (s - 2 * u) as u32)
                .into_styled(stroke)
                .draw(&mut canvas);
            let _ = Line::new(at(2 * u, 2 * u), at(s - 2 * u, s - 2 * u))
                .into_styled(stroke)
                .draw(&mut canvas);
        }
    }
    tile
}

/// Badge tile: rounded outline with `label` centred inside.
pub fn label_tile(label: &str, size: u32) -> RgbaImage {
    let mut tile = transparent(size, size);
    let inset = (size / 16).max(1);
    let radius = size / 6;
    let frame = Rectangle::new(
        Point::new(inset as i32, inset as i32),
        Size::new(size - 2 * inset, size - 2 * inset),
    );
    let _ = RoundedRectangle::with_equal_corners(frame, Size::new(radius, radius))
        .into_styled(PrimitiveStyle::with_stroke(WHITE, inset))
        .draw(&mut Canvas::new(&mut tile));
    let pad = 3 * inset;
    text_in_rect(
        &mut tile,
        label,
        WHITE,
        (pad as i64, pad as i64, size - 2 * pad, size - 2 * pad),
    );
    tile
}

/// Places a square `tile` on a full-frame background the way feedback
/// overlays are laid out: the tile covers the central two thirds.
pub fn framed_tile(tile: &RgbaImage, width: u32, height: u32, background: Rgb888) -> RgbaImage {
    let mut frame = filled(width, height, background);
    let side = (width.min(height) * 2 / 3).max(1);
    let scaled = imageops::resize(tile, side, side, imageops::FilterType::Triangle);
    let left = (width as i64 - side as i64) / 2;
    let top = (height as i64 - side as i64) / 2;
    imageops::overlay(&mut frame, &scaled, left, top);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canvas_clips_out_of_bounds_pixels() {
        let mut image = filled(4, 4, BLACK);
        let _ = Rectangle::new(Point::new(-2, -2), Size::new(4, 4))
            .into_styled(PrimitiveStyle::with_fill(WHITE))
            .draw(&mut Canvas::new(&mut image));
        assert_eq!(image.get_pixel(0, 0), &opaque(WHITE));
        assert_eq!(image.get_pixel(2, 2), &opaque(BLACK));
    }

    #[test]
    fn blend_weights_channels() {
        let mut base = filled(2, 2, BLACK);
        let top = filled(2, 2, WHITE);
        blend(&mut base, &top, 0.5);
        assert_eq!(base.get_pixel(1, 1).0, [128, 128, 128, 255]);

        let mut untouched = filled(2, 2, BLACK);
        blend(&mut untouched, &top, 0.0);
        assert_eq!(untouched.get_pixel(0, 0), &opaque(BLACK));
    }

    #[test]
    fn tint_keeps_alpha_and_maps_white_to_tint() {
        let mut source = transparent(1, 2);
        source.put_pixel(0, 0, opaque(WHITE));
        let tinted = tint(&source, RED);
        let pixel = tinted.get_pixel(0, 0).0;
        assert!(pixel[0] > 200 && pixel[1] == 0 && pixel[2] == 0);
        assert_eq!(tinted.get_pixel(0, 1).0[3], 0);
    }

    #[test]
    fn text_scales_to_fit() {
        let mut image = filled(240, 240, BLACK);
        let scale = text_in_rect(&mut image, "Bye!", WHITE, (0, 0, 240, 240));
        assert_eq!(scale, 6);
        assert!(image.pixels().any(|pixel| pixel == &opaque(WHITE)));
        assert_eq!(text_in_rect(&mut image, "far too long", WHITE, (0, 0, 20, 20)), 0);
    }

    #[test]
    fn glyphs_draw_something() {
        for glyph in [
            Glyph::Play,
            Glyph::Pause,
            Glyph::Next,
            Glyph::Previous,
            Glyph::VolumeDown,
            Glyph::VolumeUp,
            Glyph::Unsupported,
        ] {
            let tile = glyph_tile(glyph, 64);
            assert!(tile.pixels().any(|pixel| pixel.0[3] == 255), "{glyph:?} is empty");
        }
    }

    #[test]
    fn ellipsize_marks_cut() {
        assert_eq!(ellipsize("short", 10), "short");
        assert_eq!(ellipsize("a rather long title", 8), "a rathe~");
    }
}
