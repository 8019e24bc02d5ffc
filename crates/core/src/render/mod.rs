use image::RgbaImage;
use tracing::debug;

use crate::{
    assets::AssetStore,
    draw::{self, BLACK},
    overlay::{Overlay, OverlayKind, OverlaySpec},
    scene::{Scene, SceneContext, SceneKind, SceneState},
};

/// Owns the current scene and overlay and flattens them into the frame
/// that goes to the display.
pub struct Compositor {
    width: u32,
    height: u32,
    scene: Option<Box<dyn Scene>>,
    overlay: Option<Overlay>,
    frame: RgbaImage,
    dirty: bool,
    assets: AssetStore,
}

impl Compositor {
    pub fn new(width: u32, height: u32, assets: AssetStore) -> Self {
        Self {
            width,
            height,
            scene: None,
            overlay: None,
            frame: draw::filled(width, height, BLACK),
            dirty: true,
            assets,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Artwork used for overlays created from now on.
    pub fn set_assets(&mut self, assets: AssetStore) {
        self.assets = assets;
    }

    /// Installs `scene` and hands back the one it replaces.
    pub fn set_scene(&mut self, scene: Box<dyn Scene>) -> Option<Box<dyn Scene>> {
        debug!(kind = ?scene.kind(), "scene installed");
        self.dirty = true;
        self.scene.replace(scene)
    }

    pub fn take_scene(&mut self) -> Option<Box<dyn Scene>> {
        self.dirty = true;
        self.scene.take()
    }

    pub fn scene_kind(&self) -> Option<SceneKind> {
        self.scene.as_ref().map(|scene| scene.kind())
    }

    pub fn scene_state(&self) -> Option<SceneState> {
        self.scene.as_ref().map(|scene| SceneState {
            kind: scene.kind(),
            alive: scene.is_alive(),
        })
    }

    /// Replaces any overlay on screen with a fresh one.
    pub fn set_overlay(&mut self, spec: &OverlaySpec) {
        self.overlay = Some(Overlay::new(spec, self.width, self.height, &self.assets));
        self.dirty = true;
    }

    pub fn overlay(&self) -> Option<&Overlay> {
        self.overlay.as_ref()
    }

    pub fn overlay_kind(&self) -> Option<OverlayKind> {
        self.overlay.as_ref().map(Overlay::kind)
    }

    fn overlay_permitted(&self) -> bool {
        self.scene.as_ref().is_some_and(|scene| scene.use_overlay())
    }

    /// Advances overlay and scene. Returns `true` when the frame changed.
    ///
    /// Overlays only age while the scene lets them be shown; an expired
    /// overlay is dropped in the same tick.
    pub fn tick(&mut self, ctx: &mut SceneContext<'_>) -> bool {
        let permitted = self.overlay_permitted();
        let mut changed = std::mem::take(&mut self.dirty);

        if permitted {
            if let Some(overlay) = self.overlay.as_mut() {
                changed |= overlay.update(ctx.now);
                if !overlay.is_active() {
                    debug!(kind = ?overlay.kind(), "overlay expired");
                    self.overlay = None;
                }
            }
        }

        if let Some(scene) = self.scene.as_mut() {
            changed |= scene.update(ctx);
        }

        if changed {
            self.compose(permitted);
        }
        changed
    }

    fn compose(&mut self, permitted: bool) {
        match &self.scene {
            Some(scene) => self.frame.clone_from(scene.surface()),
            None => self.frame = draw::filled(self.width, self.height, BLACK),
        }
        if !permitted {
            return;
        }
        if let Some(overlay) = &self.overlay {
            draw::blend(&mut self.frame, overlay.surface(), overlay.opacity());
        }
    }

    pub fn frame(&self) -> &RgbaImage {
        &self.frame
    }
}
