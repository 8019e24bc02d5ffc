//! Transient, time-boxed layers blended over the current scene.

use std::time::Instant;

use embedded_graphics::pixelcolor::Rgb888;
use image::RgbaImage;
use tracing::debug;

use crate::{
    assets::{AssetStore, SheetKind},
    draw::{self, Glyph},
    source::SourceKind,
    timeline::{round2, Stopwatch},
};

/// Side length tiles are drawn at before being scaled onto the frame.
const TILE_SIZE: u32 = 160;

/// Feedback shown after a button press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonFeedback {
    Play,
    Pause,
    Next,
    Previous,
    VolumeDown,
    VolumeUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayKind {
    /// Logo of a source that just became (or stopped being) current.
    SourceBadge(SourceKind),
    Button(ButtonFeedback),
    /// A button was pressed while no source could handle it.
    Unsupported,
}

impl OverlayKind {
    fn sprite(self) -> Option<(SheetKind, usize)> {
        match self {
            OverlayKind::Unsupported => Some((SheetKind::Buttons, 0)),
            OverlayKind::Button(feedback) => Some((
                SheetKind::Buttons,
                match feedback {
                    ButtonFeedback::Play => 1,
                    ButtonFeedback::Pause => 2,
                    ButtonFeedback::VolumeDown => 3,
                    ButtonFeedback::VolumeUp => 4,
                    ButtonFeedback::Previous => 5,
                    ButtonFeedback::Next => 6,
                },
            )),
            OverlayKind::SourceBadge(SourceKind::Snapcast) => Some((SheetKind::Icons, 0)),
            OverlayKind::SourceBadge(SourceKind::Bluetooth) => Some((SheetKind::Icons, 1)),
            OverlayKind::SourceBadge(SourceKind::AirPlay) => Some((SheetKind::Icons, 2)),
            OverlayKind::SourceBadge(SourceKind::Other) => None,
        }
    }

    fn drawn_tile(self) -> RgbaImage {
        match self {
            OverlayKind::Unsupported => draw::glyph_tile(Glyph::Unsupported, TILE_SIZE),
            OverlayKind::Button(feedback) => draw::glyph_tile(
                match feedback {
                    ButtonFeedback::Play => Glyph::Play,
                    ButtonFeedback::Pause => Glyph::Pause,
                    ButtonFeedback::Next => Glyph::Next,
                    ButtonFeedback::Previous => Glyph::Previous,
                    ButtonFeedback::VolumeDown => Glyph::VolumeDown,
                    ButtonFeedback::VolumeUp => Glyph::VolumeUp,
                },
                TILE_SIZE,
            ),
            OverlayKind::SourceBadge(kind) => draw::label_tile(kind.label(), TILE_SIZE),
        }
    }
}

/// Everything needed to create an overlay. Durations are in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlaySpec {
    pub kind: OverlayKind,
    pub duration: f32,
    /// Zero derives the fade from `duration`: half of it when fading both
    /// ways, all of it for a single fade.
    pub fade_duration: f32,
    pub fade_in: bool,
    pub fade_out: bool,
    /// Opacity ceiling reached outside the fades.
    pub opacity: f32,
    pub tint: Option<Rgb888>,
}

impl OverlaySpec {
    pub fn new(kind: OverlayKind, duration: f32) -> Self {
        Self {
            kind,
            duration,
            fade_duration: 0.0,
            fade_in: false,
            fade_out: false,
            opacity: 1.0,
            tint: None,
        }
    }

    /// Badge of a source that just became current.
    pub fn source_appeared(kind: SourceKind) -> Self {
        Self {
            fade_duration: 1.0,
            fade_out: true,
            ..Self::new(OverlayKind::SourceBadge(kind), 4.0)
        }
    }

    /// Greyed badge of the source that just went away.
    pub fn source_lost(kind: SourceKind) -> Self {
        Self {
            fade_duration: 1.0,
            fade_out: true,
            opacity: 0.5,
            tint: Some(draw::GREY),
            ..Self::new(OverlayKind::SourceBadge(kind), 2.0)
        }
    }

    pub fn button(feedback: ButtonFeedback) -> Self {
        Self {
            fade_duration: 0.5,
            fade_out: true,
            opacity: 0.9,
            tint: Some(draw::WHITE),
            ..Self::new(OverlayKind::Button(feedback), 1.0)
        }
    }

    pub fn unsupported() -> Self {
        Self {
            fade_duration: 0.5,
            fade_out: true,
            opacity: 0.9,
            tint: Some(draw::RED),
            ..Self::new(OverlayKind::Unsupported, 1.0)
        }
    }

    pub fn with_fade_in(mut self) -> Self {
        self.fade_in = true;
        self
    }

    /// Effective `(fade, total)` durations.
    fn timing(&self) -> (f32, f32) {
        let duration = self.duration.max(0.0);
        let fade = self.fade_duration.max(0.0);
        match (self.fade_in, self.fade_out) {
            (true, true) => {
                let fade = if fade == 0.0 { duration / 2.0 } else { fade };
                (fade, duration.max(fade * 2.0))
            }
            (true, false) | (false, true) => {
                let fade = if fade == 0.0 { duration } else { fade };
                (fade, duration.max(fade))
            }
            (false, false) => (0.0, duration),
        }
    }
}

/// A live overlay. Its clock starts on the first [`Overlay::update`]; once
/// inactive it never comes back.
#[derive(Debug)]
pub struct Overlay {
    kind: OverlayKind,
    surface: RgbaImage,
    opacity: f32,
    src_opacity: f32,
    fade: f32,
    total: f32,
    fade_in: bool,
    fade_out: bool,
    watch: Stopwatch,
    active: bool,
    drawn: bool,
}

impl Overlay {
    /// Builds the overlay surface for a `width` x `height` frame, using a
    /// registered sprite when available.
    pub fn new(spec: &OverlaySpec, width: u32, height: u32, assets: &AssetStore) -> Self {
        let tile = spec
            .kind
            .sprite()
            .and_then(|(sheet, index)| assets.tile(sheet, index))
            .unwrap_or_else(|| spec.kind.drawn_tile());
        let tile = match spec.tint {
            Some(color) => draw::tint(&tile, color),
            None => tile,
        };
        let surface = draw::framed_tile(&tile, width, height, draw::BLACK);
        Self::with_surface(spec, surface)
    }

    /// Overlay around a prepared surface.
    pub fn with_surface(spec: &OverlaySpec, surface: RgbaImage) -> Self {
        let (fade, total) = spec.timing();
        let src_opacity = spec.opacity.clamp(0.0, 1.0);
        debug!(kind = ?spec.kind, total, fade, "overlay created");
        Self {
            kind: spec.kind,
            surface,
            opacity: src_opacity,
            src_opacity,
            fade,
            total,
            fade_in: spec.fade_in,
            fade_out: spec.fade_out,
            watch: Stopwatch::new(),
            active: true,
            drawn: false,
        }
    }

    pub fn kind(&self) -> OverlayKind {
        self.kind
    }

    pub fn surface(&self) -> &RgbaImage {
        &self.surface
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Effective fade length in seconds.
    pub fn fade_duration(&self) -> f32 {
        self.fade
    }

    /// Lifetime in seconds including fades.
    pub fn total_duration(&self) -> f32 {
        self.total
    }

    /// Opacity at `t` seconds after the start, rounded to two digits.
    pub fn opacity_at(&self, t: f32) -> f32 {
        let opacity = if self.fade_in && t < self.fade {
            t / self.fade * self.src_opacity
        } else if self.fade_out && t >= self.total - self.fade {
            if self.fade > 0.0 {
                (self.total - t) / self.fade * self.src_opacity
            } else {
                0.0
            }
        } else {
            self.src_opacity
        };
        round2(opacity.clamp(0.0, self.src_opacity)).min(self.src_opacity)
    }

    /// Advances the fade. Returns `true` when the overlay needs to be
    /// recomposited: first draw, an opacity change, or expiry.
    pub fn update(&mut self, now: Instant) -> bool {
        if !self.active {
            return false;
        }
        self.watch.start_at(now);
        let t = self.watch.elapsed(now).as_secs_f32();

        let opacity = self.opacity_at(t);
        if t >= self.total {
            self.active = false;
        }

        let changed = !self.drawn || opacity != self.opacity || !self.active;
        self.opacity = opacity;
        self.drawn = true;
        changed
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use proptest::prelude::*;

    use super::*;
    use crate::timeline::{Clock, ManualClock};

    fn overlay(spec: &OverlaySpec) -> Overlay {
        Overlay::with_surface(spec, draw::filled(4, 4, draw::WHITE))
    }

    #[test]
    fn derives_half_duration_fades_when_fading_both_ways() {
        let spec = OverlaySpec {
            fade_in: true,
            fade_out: true,
            ..OverlaySpec::new(OverlayKind::Unsupported, 1.0)
        };
        let overlay = overlay(&spec);
        assert_eq!(overlay.fade_duration(), 0.5);
        assert_eq!(overlay.total_duration(), 1.0);
    }

    #[test]
    fn single_fade_defaults_to_whole_duration_and_extends_total() {
        let spec = OverlaySpec {
            fade_out: true,
            ..OverlaySpec::new(OverlayKind::Unsupported, 2.0)
        };
        assert_eq!(overlay(&spec).fade_duration(), 2.0);

        let spec = OverlaySpec {
            fade_in: true,
            fade_duration: 3.0,
            ..OverlaySpec::new(OverlayKind::Unsupported, 1.0)
        };
        assert_eq!(overlay(&spec).total_duration(), 3.0);
    }

    #[test]
    fn deactivates_at_total_duration_never_before() {
        let clock = ManualClock::new();
        let spec = OverlaySpec {
            fade_in: true,
            fade_out: true,
            ..OverlaySpec::new(OverlayKind::Unsupported, 1.0)
        };
        let mut overlay = overlay(&spec);

        assert!(overlay.update(clock.now()));
        assert_eq!(overlay.opacity(), 0.0);
        for _ in 0..9 {
            clock.advance(Duration::from_millis(100));
            overlay.update(clock.now());
            assert!(overlay.is_active());
        }
        clock.advance(Duration::from_millis(100));
        assert!(overlay.update(clock.now()));
        assert!(!overlay.is_active());
        assert!(!overlay.update(clock.now()));
    }

    #[test]
    fn flat_section_reports_no_change() {
        let clock = ManualClock::new();
        let mut overlay = overlay(&OverlaySpec::unsupported());
        assert!(overlay.update(clock.now()));
        clock.advance(Duration::from_millis(200));
        assert!(!overlay.update(clock.now()));
        assert_eq!(overlay.opacity(), 0.9);
        clock.advance(Duration::from_millis(600));
        assert!(overlay.update(clock.now()));
        assert!(overlay.opacity() < 0.9);
    }

    #[test]
    fn rounding_never_lifts_opacity_above_its_ceiling() {
        let spec = OverlaySpec {
            opacity: 0.126,
            fade_out: true,
            fade_duration: 1.0,
            ..OverlaySpec::new(OverlayKind::Unsupported, 2.0)
        };
        let overlay = overlay(&spec);
        assert_eq!(overlay.opacity_at(0.5), 0.126);
        assert!(overlay.opacity_at(1.01) <= 0.126);
    }

    #[test]
    fn preset_surfaces_cover_the_frame() {
        let assets = AssetStore::new();
        let overlay = Overlay::new(&OverlaySpec::source_appeared(SourceKind::AirPlay), 240, 240, &assets);
        assert_eq!(overlay.surface().dimensions(), (240, 240));
        assert_eq!(overlay.opacity(), 1.0);
    }

    proptest! {
        #[test]
        fn opacity_is_monotonic_inside_fades_and_bounded(
            duration in 0.1f32..5.0,
            fade in 0.0f32..2.0,
            ceiling in 0.05f32..1.0,
        ) {
            let spec = OverlaySpec {
                fade_in: true,
                fade_out: true,
                fade_duration: fade,
                opacity: ceiling,
                ..OverlaySpec::new(OverlayKind::Unsupported, duration)
            };
            let overlay = overlay(&spec);
            let (fade, total) = (overlay.fade_duration(), overlay.total_duration());
            let steps = 200;
            let mut previous: Option<(f32, f32)> = None;
            for step in 0..=steps {
                let t = total * step as f32 / steps as f32;
                let opacity = overlay.opacity_at(t);
                prop_assert!(opacity >= 0.0);
                prop_assert!(opacity <= ceiling);
                if let Some((last_t, last)) = previous {
                    if t < fade {
                        prop_assert!(opacity >= last);
                    } else if last_t >= total - fade {
                        prop_assert!(opacity <= last);
                    }
                }
                previous = Some((t, opacity));
            }
        }
    }
}
