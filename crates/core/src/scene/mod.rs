//! Mutually exclusive full-screen display modes and the policy that picks
//! between them.

use std::time::Instant;

use chrono::NaiveTime;
use image::RgbaImage;

use crate::{
    assets::ArtCache,
    audio::Mixer,
    config::SceneConfig,
    source::{SourceClient, SourceId, SourceInfo, SourceKind},
};

mod active;
mod idle;
mod intro;
mod outro;

pub use active::ActiveSourceScene;
pub use idle::IdleScene;
pub use intro::IntroScene;
pub use outro::OutroScene;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneKind {
    Intro,
    Idle,
    /// Now-playing screen bound to one source.
    ActiveSource(SourceId),
    Outro,
}

impl SceneKind {
    /// Intro and outro own the screen: no overlays, no user-driven activity.
    pub fn is_exclusive(self) -> bool {
        matches!(self, SceneKind::Intro | SceneKind::Outro)
    }
}

/// Read-only view of the current source handed to scenes.
#[derive(Debug, Clone, Copy)]
pub struct SourceView<'a> {
    pub id: SourceId,
    pub kind: SourceKind,
    pub name: &'a str,
    pub info: Option<&'a SourceInfo>,
}

impl<'a> SourceView<'a> {
    pub fn of(id: SourceId, client: &'a SourceClient) -> Self {
        Self {
            id,
            kind: client.kind(),
            name: client.name(),
            info: client.info(),
        }
    }
}

/// Everything a scene may look at during one update.
pub struct SceneContext<'a> {
    /// Monotonic time of this tick.
    pub now: Instant,
    /// Local wall-clock time, for clock faces.
    pub local_time: NaiveTime,
    pub current: Option<SourceView<'a>>,
    pub sources: &'a [SourceClient],
    /// The backlight is still moving toward its target; periodic redraws
    /// hold off until it settles.
    pub ramping: bool,
    pub mixer: &'a mut dyn Mixer,
}

/// One full-screen display mode.
pub trait Scene: Send {
    fn kind(&self) -> SceneKind;

    /// `false` once the scene's content or animation has run its course.
    fn is_alive(&self) -> bool;

    fn use_overlay(&self) -> bool {
        true
    }

    /// Advances internal state. Returns `true` when the surface changed.
    fn update(&mut self, ctx: &mut SceneContext<'_>) -> bool;

    fn surface(&self) -> &RgbaImage;

    /// Called once when the scene is replaced, before it is dropped.
    fn leave(&mut self, _mixer: &mut dyn Mixer) {}
}

/// Life-cycle stage of the hub as seen by the scene policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    ShuttingDown,
}

/// State of the scene currently on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneState {
    pub kind: SceneKind,
    pub alive: bool,
}

/// Decides which scene should replace the current one, if any.
///
/// A now-playing scene whose source is no longer current counts as
/// finished even before it noticed itself.
pub fn next_scene(
    current: Option<SceneState>,
    current_source: Option<SourceId>,
    phase: Phase,
    config: &SceneConfig,
) -> Option<SceneKind> {
    if phase == Phase::ShuttingDown {
        let showing_outro = matches!(current, Some(SceneState { kind: SceneKind::Outro, .. }));
        return (config.outro && !showing_outro).then_some(SceneKind::Outro);
    }

    let Some(current) = current else {
        return Some(if config.intro {
            SceneKind::Intro
        } else {
            SceneKind::Idle
        });
    };

    let stale = matches!(current.kind, SceneKind::ActiveSource(id) if Some(id) != current_source);
    if current.alive && !stale {
        return None;
    }

    let target = match current_source {
        Some(id) => SceneKind::ActiveSource(id),
        None => SceneKind::Idle,
    };
    (target != current.kind).then_some(target)
}

/// Builds the scene for `kind` on a `width` x `height` surface.
pub fn create(
    kind: SceneKind,
    width: u32,
    height: u32,
    sources: &[SourceClient],
    art_cache: &ArtCache,
) -> Box<dyn Scene> {
    match kind {
        SceneKind::Intro => Box::new(IntroScene::new(width, height)),
        SceneKind::Idle => Box::new(IdleScene::new(width, height)),
        SceneKind::ActiveSource(id) => {
            let (source_kind, name) = sources
                .get(id.0)
                .map(|client| (client.kind(), client.name().to_string()))
                .unwrap_or((SourceKind::Other, String::from("Audio")));
            Box::new(ActiveSourceScene::new(
                id,
                source_kind,
                name,
                art_cache.clone(),
                width,
                height,
            ))
        }
        SceneKind::Outro => Box::new(OutroScene::new(width, height)),
    }
}
