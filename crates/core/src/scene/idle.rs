use chrono::{NaiveTime, Timelike};
use image::RgbaImage;

use super::{Scene, SceneContext, SceneKind};
use crate::{
    draw::{self, BLACK, GREY, WHITE},
    source::SourceClient,
};

/// Row height of the source list.
const LINE_HEIGHT: u32 = 24;

/// Shown when nothing is playing: a clock and the known sources. Never
/// finishes on its own.
pub struct IdleScene {
    surface: RgbaImage,
    shown_minute: Option<(u32, u32)>,
    shown_sources: Vec<(String, bool)>,
}

impl IdleScene {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            surface: draw::filled(width, height, BLACK),
            shown_minute: None,
            shown_sources: Vec::new(),
        }
    }

    fn redraw(&mut self, time: NaiveTime) {
        let (width, height) = self.surface.dimensions();
        self.surface = draw::filled(width, height, BLACK);

        let clock = format!("{:02}:{:02}", time.hour(), time.minute());
        let pad = width / 12;
        draw::text_in_rect(
            &mut self.surface,
            &clock,
            WHITE,
            (pad as i64, pad as i64, width.saturating_sub(2 * pad), (height / 2).saturating_sub(pad)),
        );

        let max_chars = draw::chars_per_line(width.saturating_sub(2 * pad));
        let mut y = height / 2 + pad / 2;
        for (name, active) in &self.shown_sources {
            if y + LINE_HEIGHT > height {
                break;
            }
            let (marker, color) = if *active { ('>', WHITE) } else { (' ', GREY) };
            let line = draw::ellipsize(&format!("{marker} {name}"), max_chars);
            draw::text_line(&mut self.surface, &line, color, pad as i32, y as i32);
            y += LINE_HEIGHT;
        }
    }
}

fn summarize(sources: &[SourceClient]) -> Vec<(String, bool)> {
    sources
        .iter()
        .map(|client| (client.name().to_string(), client.is_active()))
        .collect()
}

impl Scene for IdleScene {
    fn kind(&self) -> SceneKind {
        SceneKind::Idle
    }

    fn is_alive(&self) -> bool {
        false
    }

    fn update(&mut self, ctx: &mut SceneContext<'_>) -> bool {
        let minute = (ctx.local_time.hour(), ctx.local_time.minute());
        let sources = summarize(ctx.sources);

        let first = self.shown_minute.is_none();
        let sources_changed = sources != self.shown_sources;
        let minute_changed = self.shown_minute != Some(minute) && !ctx.ramping;
        if !(first || sources_changed || minute_changed) {
            return false;
        }

        self.shown_sources = sources;
        self.shown_minute = Some(minute);
        self.redraw(ctx.local_time);
        true
    }

    fn surface(&self) -> &RgbaImage {
        &self.surface
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::{
        audio::SoftMixer,
        source::{tests::FakeBackend, SourceKind},
    };

    fn update(scene: &mut IdleScene, time: NaiveTime, sources: &[SourceClient], ramping: bool) -> bool {
        let mut mixer = SoftMixer::default();
        scene.update(&mut SceneContext {
            now: Instant::now(),
            local_time: time,
            current: None,
            sources,
            ramping,
            mixer: &mut mixer,
        })
    }

    fn at(hour: u32, minute: u32, second: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, second).unwrap()
    }

    #[test]
    fn redraws_once_per_minute() {
        let mut scene = IdleScene::new(240, 240);
        assert!(update(&mut scene, at(9, 41, 0), &[], false));
        assert!(!update(&mut scene, at(9, 41, 59), &[], false));
        assert!(update(&mut scene, at(9, 42, 0), &[], false));
        assert!(!scene.is_alive());
    }

    #[test]
    fn clock_waits_for_brightness_to_settle() {
        let mut scene = IdleScene::new(240, 240);
        assert!(update(&mut scene, at(9, 41, 0), &[], true));
        assert!(!update(&mut scene, at(9, 42, 0), &[], true));
        assert!(update(&mut scene, at(9, 42, 0), &[], false));
    }

    #[test]
    fn source_list_changes_redraw_immediately() {
        let mut scene = IdleScene::new(240, 240);
        let sources = vec![SourceClient::new(
            "Living room",
            SourceKind::AirPlay,
            Box::new(FakeBackend::default()),
        )];

        assert!(update(&mut scene, at(9, 41, 0), &[], true));
        assert!(update(&mut scene, at(9, 41, 0), &sources, true));
        assert!(scene.surface().pixels().any(|pixel| pixel != &draw::opaque(BLACK)));
    }
}
