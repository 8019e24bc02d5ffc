use std::time::Duration;

use embedded_graphics::{
    prelude::*,
    primitives::{PrimitiveStyle, Rectangle, RoundedRectangle, Triangle},
};
use image::RgbaImage;
use tracing::warn;

use super::{Scene, SceneContext, SceneKind};
use crate::{
    audio::Mixer,
    draw::{self, Canvas, BLACK, WHITE},
    timeline::{ramp, round2, Stopwatch},
};

const DURATION: Duration = Duration::from_secs(6);
const ANIM_DURATION: Duration = Duration::from_secs(4);
/// Mixer level while the start-up animation plays.
const INTRO_VOLUME: u8 = 30;

/// Start-up animation: a speaker logo revealed in inverted colours by a
/// disc growing out of the top-left corner.
pub struct IntroScene {
    original: RgbaImage,
    inverted: RgbaImage,
    surface: RgbaImage,
    factor: Option<f32>,
    watch: Stopwatch,
    saved_volume: Option<u8>,
    alive: bool,
}

impl IntroScene {
    pub fn new(width: u32, height: u32) -> Self {
        let mut original = draw::filled(width, height, WHITE);
        draw_logo(&mut original);

        let mut inverted = original.clone();
        for pixel in inverted.pixels_mut() {
            for channel in 0..3 {
                pixel.0[channel] = 255 - pixel.0[channel];
            }
        }
        let (x, y, w, h) = logo_text_rect(width, height);
        draw::text_in_rect(&mut inverted, "Hello!", BLACK, (x, y, w, h));

        Self {
            surface: original.clone(),
            original,
            inverted,
            factor: None,
            watch: Stopwatch::new(),
            saved_volume: None,
            alive: true,
        }
    }

    /// Reveal progress last drawn, in `[0, 1]`.
    pub fn factor(&self) -> Option<f32> {
        self.factor
    }

    fn begin(&mut self, mixer: &mut dyn Mixer) {
        match mixer.volume() {
            Ok(volume) => {
                self.saved_volume = Some(volume);
                if let Err(err) = mixer.set_volume(INTRO_VOLUME) {
                    warn!(error = %err, "could not lower volume for intro");
                }
            }
            Err(err) => warn!(error = %err, "could not read mixer volume"),
        }
    }

    fn restore_volume(&mut self, mixer: &mut dyn Mixer) {
        if let Some(volume) = self.saved_volume.take() {
            if let Err(err) = mixer.set_volume(volume) {
                warn!(error = %err, "could not restore volume after intro");
            }
        }
    }

    fn compose(&mut self, factor: f32) {
        let radius = 2.0 * self.original.width() as f32 * factor;
        let radius_sq = radius * radius;
        for (x, y, pixel) in self.surface.enumerate_pixels_mut() {
            let (fx, fy) = (x as f32, y as f32);
            *pixel = if radius > 0.0 && fx * fx + fy * fy <= radius_sq {
                *self.inverted.get_pixel(x, y)
            } else {
                *self.original.get_pixel(x, y)
            };
        }
    }
}

impl Scene for IntroScene {
    fn kind(&self) -> SceneKind {
        SceneKind::Intro
    }

    fn is_alive(&self) -> bool {
        self.alive
    }

    fn use_overlay(&self) -> bool {
        false
    }

    fn update(&mut self, ctx: &mut SceneContext<'_>) -> bool {
        if !self.alive {
            return false;
        }
        if self.watch.start_at(ctx.now) {
            self.begin(ctx.mixer);
        }

        let elapsed = self.watch.elapsed(ctx.now);
        let factor = round2(ramp(elapsed.as_secs_f32(), ANIM_DURATION.as_secs_f32()));
        let redraw = self.factor != Some(factor);
        if redraw {
            self.compose(factor);
            self.factor = Some(factor);
        }

        if elapsed > DURATION {
            self.restore_volume(ctx.mixer);
            self.alive = false;
        }
        redraw
    }

    fn surface(&self) -> &RgbaImage {
        &self.surface
    }

    fn leave(&mut self, mixer: &mut dyn Mixer) {
        self.restore_volume(mixer);
    }
}

/// Logo geometry: `(x, y, body width, body height)` of the outer body.
fn logo_body(width: u32, height: u32) -> (i32, i32, u32, u32) {
    let unit = width as f32 * 0.8 / 4.0;
    let (body_w, body_h) = (unit * 4.0, unit * 2.0);
    let x = (width as f32 - body_w) / 2.0;
    let y = (height as f32 - body_h) / 2.0;
    (x as i32, y as i32, body_w as u32, body_h as u32)
}

fn logo_text_rect(width: u32, height: u32) -> (i64, i64, u32, u32) {
    let (x, y, w, h) = logo_body(width, height);
    let quarter = h / 4;
    (
        (x + quarter as i32) as i64,
        y as i64,
        w.saturating_sub(2 * quarter),
        h,
    )
}

fn draw_logo(image: &mut RgbaImage) {
    let (x, y, w, h) = logo_body(image.width(), image.height());
    let line = (image.height() / 100).max(1);
    let mut canvas = Canvas::new(image);

    let outer = Rectangle::new(Point::new(x, y), Size::new(w, h));
    let _ = RoundedRectangle::with_equal_corners(outer, Size::new(h / 2, h / 2))
        .into_styled(PrimitiveStyle::with_stroke(BLACK, line))
        .draw(&mut canvas);

    let inset = (h / 10).max(1);
    let inner = Rectangle::new(
        Point::new(x + inset as i32, y + inset as i32),
        Size::new(w.saturating_sub(2 * inset), h.saturating_sub(2 * inset)),
    );
    let inner_radius = h.saturating_sub(2 * inset) / 2;
    let _ = RoundedRectangle::with_equal_corners(inner, Size::new(inner_radius, inner_radius))
        .into_styled(PrimitiveStyle::with_fill(BLACK))
        .draw(&mut canvas);

    let foot = (h / 5).max(1) as i32;
    let half = foot / 2;
    let base_y = y + h as i32;
    for left in [x + h as i32 / 2, x + h as i32 / 2 + h as i32 - foot] {
        let corners = [
            Point::new(left, base_y),
            Point::new(left + foot, base_y),
            Point::new(left + foot + half, base_y + foot),
            Point::new(left - half, base_y + foot),
        ];
        for triangle in [
            Triangle::new(corners[0], corners[1], corners[2]),
            Triangle::new(corners[0], corners[2], corners[3]),
        ] {
            let _ = triangle
                .into_styled(PrimitiveStyle::with_fill(BLACK))
                .draw(&mut canvas);
        }
    }
}
