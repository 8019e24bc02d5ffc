use std::{
    path::PathBuf,
    time::{Duration, Instant},
};

use image::{imageops, RgbaImage};
use tracing::debug;

use super::{Scene, SceneContext, SceneKind};
use crate::{
    assets::ArtCache,
    draw::{self, Glyph, BLACK, GREY, WHITE},
    source::{SourceId, SourceInfo, SourceKind},
};

/// Progress bar refresh period while playing.
const PROGRESS_REFRESH: Duration = Duration::from_secs(1);
const LINE_HEIGHT: i32 = 24;

/// Now-playing screen for one source. Stays alive for as long as that
/// source is the current one.
pub struct ActiveSourceScene {
    id: SourceId,
    kind: SourceKind,
    name: String,
    surface: RgbaImage,
    /// Last drawn metadata, position stripped.
    shown: Option<SourceInfo>,
    drawn: bool,
    last_refresh: Option<Instant>,
    art_cache: ArtCache,
    /// Thumbnail of the last cover shown.
    art: Option<(PathBuf, RgbaImage)>,
    alive: bool,
}

impl ActiveSourceScene {
    pub fn new(
        id: SourceId,
        kind: SourceKind,
        name: String,
        art_cache: ArtCache,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            id,
            kind,
            name,
            surface: draw::filled(width, height, BLACK),
            shown: None,
            drawn: false,
            last_refresh: None,
            art_cache,
            art: None,
            alive: true,
        }
    }

    pub fn source(&self) -> SourceId {
        self.id
    }

    fn art_size(&self) -> u32 {
        self.surface.width() / 3
    }

    /// Scales the cover once per path. Art the cache has not decoded yet
    /// is looked up again on the next redraw.
    fn album_art(&mut self, path: Option<&PathBuf>) -> Option<&RgbaImage> {
        let Some(path) = path else {
            self.art = None;
            return None;
        };
        let cached = matches!(&self.art, Some((cached, _)) if cached == path);
        if !cached {
            self.art = self
                .art_cache
                .thumbnail(path, self.art_size())
                .map(|thumb| (path.clone(), thumb));
            if self.art.is_none() {
                debug!(path = %path.display(), "album art not in cache");
            }
        }
        self.art.as_ref().map(|(_, thumb)| thumb)
    }

    fn redraw(&mut self, info: Option<&SourceInfo>) {
        let (width, height) = self.surface.dimensions();
        let mut surface = draw::filled(width, height, BLACK);
        let pad = (width / 24) as i32;
        let max_chars = draw::chars_per_line(width.saturating_sub(2 * pad as u32));

        let header = format!("{} - {}", self.kind.label(), self.name);
        draw::text_line(&mut surface, &draw::ellipsize(&header, max_chars), GREY, pad, pad);

        let art_size = self.art_size();
        if let Some(art) = self.album_art(info.and_then(|info| info.album_art.as_ref())) {
            let left = width as i64 - art_size as i64 - pad as i64;
            imageops::overlay(&mut surface, art, left, (pad + LINE_HEIGHT) as i64);
        }

        let Some(info) = info else {
            draw::text_in_rect(
                &mut surface,
                "No info",
                GREY,
                (0, 0, width, height),
            );
            self.surface = surface;
            return;
        };

        let mut y = pad + LINE_HEIGHT + art_size as i32 + pad;
        let title = info.title.as_deref().unwrap_or("Unknown title");
        draw::text_line(&mut surface, &draw::ellipsize(title, max_chars), WHITE, pad, y);
        y += LINE_HEIGHT;
        for line in [info.artist.as_deref(), info.album.as_deref()].into_iter().flatten() {
            draw::text_line(&mut surface, &draw::ellipsize(line, max_chars), GREY, pad, y);
            y += LINE_HEIGHT;
        }

        let glyph_size = LINE_HEIGHT as u32;
        let bottom = height as i32 - pad - glyph_size as i32;
        let glyph = if info.is_playing() {
            Glyph::Play
        } else {
            Glyph::Pause
        };
        imageops::overlay(
            &mut surface,
            &draw::glyph_tile(glyph, glyph_size),
            pad as i64,
            bottom as i64,
        );

        if let Some(progress) = info.progress() {
            let left = pad + glyph_size as i32 + pad;
            let bar_width = (width as i32 - left - pad).max(0) as u32;
            let bar_height = (glyph_size / 3).max(1);
            let top = bottom + (glyph_size - bar_height) as i32 / 2;
            draw::stroke_rect(&mut surface, GREY, left, top, bar_width, bar_height);
            let filled = (bar_width as f32 * progress).round() as u32;
            if filled > 0 {
                draw::fill_rect(&mut surface, WHITE, left, top, filled, bar_height);
            }
        }
        self.surface = surface;
    }
}

fn without_position(info: &SourceInfo) -> SourceInfo {
    SourceInfo {
        position_secs: None,
        ..info.clone()
    }
}

impl Scene for ActiveSourceScene {
    fn kind(&self) -> SceneKind {
        SceneKind::ActiveSource(self.id)
    }

    fn is_alive(&self) -> bool {
        self.alive
    }

    fn update(&mut self, ctx: &mut SceneContext<'_>) -> bool {
        let current = ctx.current.filter(|view| view.id == self.id);
        self.alive = current.is_some();
        let Some(view) = current else {
            return false;
        };

        let info = view.info;
        let stripped = info.map(without_position);
        let metadata_changed = !self.drawn || stripped != self.shown;
        let refresh_due = info.is_some_and(SourceInfo::is_playing)
            && !ctx.ramping
            && self
                .last_refresh
                .map(|last| ctx.now.saturating_duration_since(last) >= PROGRESS_REFRESH)
                .unwrap_or(true);
        if !(metadata_changed || refresh_due) {
            return false;
        }

        self.redraw(info);
        self.shown = stripped;
        self.drawn = true;
        self.last_refresh = Some(ctx.now);
        true
    }

    fn surface(&self) -> &RgbaImage {
        &self.surface
    }
}
