use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use image::{imageops, RgbaImage};
use tracing::{debug, warn};

use crate::{HubError, Result};

/// Sprite sheets the overlays know how to index into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SheetKind {
    /// Button feedback pictograms.
    Buttons,
    /// Source logos.
    Icons,
}

/// Horizontal strip of square tiles; the tile size is the sheet height.
#[derive(Debug, Clone)]
pub struct SpriteSheet {
    image: RgbaImage,
}

impl SpriteSheet {
    pub fn new(image: RgbaImage) -> Self {
        Self { image }
    }

    pub fn tile_size(&self) -> u32 {
        self.image.height()
    }

    pub fn len(&self) -> usize {
        match self.tile_size() {
            0 => 0,
            size => (self.image.width() / size) as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tile(&self, index: usize) -> Option<RgbaImage> {
        if index >= self.len() {
            return None;
        }
        let size = self.tile_size();
        let left = index as u32 * size;
        Some(imageops::crop_imm(&self.image, left, 0, size, size).to_image())
    }
}

/// Registry for caller-loaded artwork. Loading files is the caller's job;
/// the hub only indexes what was registered and falls back to drawn
/// glyphs for anything missing.
#[derive(Debug, Default, Clone)]
pub struct AssetStore {
    sheets: HashMap<SheetKind, SpriteSheet>,
}

impl AssetStore {
    pub fn new() -> Self {
        Self {
            sheets: HashMap::new(),
        }
    }

    pub fn register_sheet(&mut self, kind: SheetKind, sheet: SpriteSheet) {
        debug!(?kind, tiles = sheet.len(), "registered sprite sheet");
        self.sheets.insert(kind, sheet);
    }

    pub fn tile(&self, kind: SheetKind, index: usize) -> Option<RgbaImage> {
        self.sheets.get(&kind).and_then(|sheet| sheet.tile(index))
    }
}

/// Album art kept on disk under the configured cache directory, with the
/// decoded images held in memory. Clones share the decoded images.
///
/// Decoding happens where art enters the cache (a source or script thread),
/// so scenes only ever resize images that are already in memory.
#[derive(Clone)]
pub struct ArtCache {
    dir: PathBuf,
    decoded: Arc<Mutex<HashMap<PathBuf, Arc<RgbaImage>>>>,
}

impl ArtCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            decoded: Arc::default(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Decodes image bytes, writes them as `<key>` inside the cache
    /// directory (created when needed) and returns the file path.
    pub fn store(&self, key: &str, bytes: &[u8]) -> Result<PathBuf> {
        let file_name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        if file_name.chars().all(|c| c == '.') {
            return Err(HubError::msg(format!("`{key}` is not a usable art cache key")));
        }

        let art = image::load_from_memory(bytes)?.to_rgba8();
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(file_name);
        fs::write(&path, bytes)?;
        self.insert(path.clone(), art)?;
        Ok(path)
    }

    /// Decodes an art file that already sits on disk.
    pub fn load(&self, path: &Path) -> Result<()> {
        let art = image::open(path)?.to_rgba8();
        self.insert(path.to_path_buf(), art)
    }

    /// Square thumbnail of previously stored or loaded art. Never touches
    /// the file system.
    pub fn thumbnail(&self, path: &Path, size: u32) -> Option<RgbaImage> {
        let art = match self.decoded.lock() {
            Ok(decoded) => decoded.get(path).cloned(),
            Err(_) => {
                warn!("album art cache poisoned");
                None
            }
        }?;
        Some(imageops::resize(art.as_ref(), size, size, imageops::FilterType::Triangle))
    }

    fn insert(&self, path: PathBuf, art: RgbaImage) -> Result<()> {
        let mut decoded = self
            .decoded
            .lock()
            .map_err(|_| HubError::Poisoned("album art cache"))?;
        debug!(path = %path.display(), "album art decoded");
        decoded.insert(path, Arc::new(art));
        Ok(())
    }
}

impl std::fmt::Debug for ArtCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtCache").field("dir", &self.dir).finish()
    }
}

#[cfg(test)]
mod tests {
    use image::{ImageFormat, Rgba};

    use super::*;

    fn strip(tiles: u32, size: u32) -> RgbaImage {
        RgbaImage::from_fn(tiles * size, size, |x, _| Rgba([(x / size) as u8, 0, 0, 255]))
    }

    #[test]
    fn resolves_registered_tiles() {
        let mut store = AssetStore::new();
        store.register_sheet(SheetKind::Icons, SpriteSheet::new(strip(3, 8)));

        let tile = store.tile(SheetKind::Icons, 2).expect("third tile exists");
        assert_eq!(tile.dimensions(), (8, 8));
        assert_eq!(tile.get_pixel(0, 0).0[0], 2);
    }

    #[test]
    fn missing_sheets_and_indices_yield_none() {
        let mut store = AssetStore::new();
        assert!(store.tile(SheetKind::Buttons, 0).is_none());
        store.register_sheet(SheetKind::Buttons, SpriteSheet::new(strip(2, 8)));
        assert!(store.tile(SheetKind::Buttons, 2).is_none());
    }

    fn png(size: u32) -> Vec<u8> {
        let mut encoded = std::io::Cursor::new(Vec::new());
        strip(1, size)
            .write_to(&mut encoded, ImageFormat::Png)
            .unwrap();
        encoded.into_inner()
    }

    #[test]
    fn stores_album_art_and_serves_thumbnails_from_memory() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtCache::new(dir.path().join("art"));

        let path = cache.store("cover/1.png", &png(16)).unwrap();
        assert!(path.starts_with(cache.dir()));
        assert_eq!(path.file_name().unwrap(), "cover_1.png");

        fs::remove_file(&path).unwrap();
        let thumb = cache.clone().thumbnail(&path, 4).expect("decoded at store time");
        assert_eq!(thumb.dimensions(), (4, 4));
        assert!(cache.thumbnail(&dir.path().join("other.png"), 4).is_none());
    }

    #[test]
    fn loads_art_already_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cover.png");
        fs::write(&path, png(8)).unwrap();

        let cache = ArtCache::new(dir.path());
        assert!(cache.thumbnail(&path, 2).is_none());
        cache.load(&path).unwrap();
        assert!(cache.thumbnail(&path, 2).is_some());
    }

    #[test]
    fn rejects_keys_that_name_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtCache::new(dir.path().join("art"));
        for key in ["", ".", ".."] {
            assert!(cache.store(key, &png(4)).is_err(), "key {key:?} accepted");
        }
        assert!(cache.store("..cover", &png(4)).is_ok());
    }

    #[test]
    fn undecodable_bytes_are_not_stored() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtCache::new(dir.path().join("art"));
        assert!(cache.store("cover.png", b"not an image").is_err());
        assert!(!dir.path().join("art/cover.png").exists());
    }
}
