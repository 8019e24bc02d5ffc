use std::time::Duration;

use image::RgbaImage;

use super::{Scene, SceneContext, SceneKind};
use crate::{
    draw::{self, BLACK, WHITE},
    timeline::{ramp, round2, Stopwatch},
};

const DURATION: Duration = Duration::from_secs(4);
const ANIM_DURATION: Duration = Duration::from_secs(3);
/// The farewell holds at full strength before fading.
const HOLD: Duration = Duration::from_secs(1);

/// Shutdown animation: "Bye!" fading to black.
pub struct OutroScene {
    text: RgbaImage,
    surface: RgbaImage,
    opacity: Option<f32>,
    watch: Stopwatch,
    alive: bool,
}

impl OutroScene {
    pub fn new(width: u32, height: u32) -> Self {
        let mut text = draw::filled(width, height, BLACK);
        let pad = width / 8;
        draw::text_in_rect(
            &mut text,
            "Bye!",
            WHITE,
            (pad as i64, 0, width.saturating_sub(2 * pad), height),
        );
        Self {
            surface: text.clone(),
            text,
            opacity: None,
            watch: Stopwatch::new(),
            alive: true,
        }
    }

    pub fn opacity(&self) -> Option<f32> {
        self.opacity
    }
}

impl Scene for OutroScene {
    fn kind(&self) -> SceneKind {
        SceneKind::Outro
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
        self.watch.start_at(ctx.now);
        let elapsed = self.watch.elapsed(ctx.now);
        if elapsed >= DURATION {
            self.alive = false;
        }

        let fading = elapsed.saturating_sub(HOLD).as_secs_f32();
        let opacity = 1.0 - round2(ramp(fading, ANIM_DURATION.as_secs_f32()));
        if self.opacity == Some(opacity) {
            return false;
        }
        let (width, height) = self.text.dimensions();
        self.surface = draw::filled(width, height, BLACK);
        draw::blend(&mut self.surface, &self.text, opacity);
        self.opacity = Some(opacity);
        true
    }

    fn surface(&self) -> &RgbaImage {
        &self.surface
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveTime;

    use super::*;
    use crate::{
        audio::SoftMixer,
        timeline::{Clock, ManualClock},
    };

    fn update(scene: &mut OutroScene, clock: &ManualClock) -> bool {
        let mut mixer = SoftMixer::default();
        scene.update(&mut SceneContext {
            now: clock.now(),
            local_time: NaiveTime::from_hms_opt(23, 59, 0).unwrap(),
            current: None,
            sources: &[],
            ramping: false,
            mixer: &mut mixer,
        })
    }

    #[test]
    fn holds_then_fades_to_black() {
        let clock = ManualClock::new();
        let mut scene = OutroScene::new(120, 120);
        assert!(update(&mut scene, &clock));
        assert_eq!(scene.opacity(), Some(1.0));

        clock.advance(Duration::from_millis(900));
        assert!(!update(&mut scene, &clock));

        clock.advance(Duration::from_millis(1600));
        assert!(update(&mut scene, &clock));
        assert_eq!(scene.opacity(), Some(0.5));
        assert!(scene.is_alive());

        clock.advance(Duration::from_millis(1500));
        update(&mut scene, &clock);
        assert_eq!(scene.opacity(), Some(0.0));
        assert!(!scene.is_alive());
        assert!(scene.surface().pixels().all(|pixel| pixel == &draw::opaque(BLACK)));
    }
}
