use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use image::{Rgba, RgbaImage};

use crate::design::{DesignSnapshot, ImageRef};
use crate::error::ProductionError;
use crate::raster;

/// Placeholder layers are generated at this size before canvas fitting.
const PLACEHOLDER_SIZE: (u32, u32) = (825, 1125);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AssetKind {
    BackgroundSnapshot,
    PlayerSnapshot,
    FrameSnapshot,
    TextSnapshot,
    Background,
    Hero,
    Frame,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::BackgroundSnapshot => "background_snapshot",
            AssetKind::PlayerSnapshot => "player_snapshot",
            AssetKind::FrameSnapshot => "frame_snapshot",
            AssetKind::TextSnapshot => "text_snapshot",
            AssetKind::Background => "background",
            AssetKind::Hero => "hero",
            AssetKind::Frame => "frame",
        }
    }

    pub fn from_str(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "background_snapshot" => Some(AssetKind::BackgroundSnapshot),
            "player_snapshot" => Some(AssetKind::PlayerSnapshot),
            "frame_snapshot" => Some(AssetKind::FrameSnapshot),
            "text_snapshot" => Some(AssetKind::TextSnapshot),
            "background" => Some(AssetKind::Background),
            "hero" => Some(AssetKind::Hero),
            "frame" => Some(AssetKind::Frame),
            _ => None,
        }
    }

    fn snapshot_layer(&self) -> Option<&'static str> {
        match self {
            AssetKind::BackgroundSnapshot => Some("background"),
            AssetKind::PlayerSnapshot => Some("player"),
            AssetKind::FrameSnapshot => Some("frame"),
            AssetKind::TextSnapshot => Some("text"),
            _ => None,
        }
    }

    fn reference<'a>(&self, design: &'a DesignSnapshot) -> Option<&'a str> {
        match self {
            AssetKind::Background => design.background_ref(),
            AssetKind::Hero => design.hero_ref(),
            AssetKind::Frame => design.frame_ref(),
            other => other.snapshot_layer().and_then(|l| design.snapshot_ref(l)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetOrigin {
    Inline,
    Store(String),
    Placeholder,
    Derived,
}

#[derive(Debug, Clone)]
pub struct Asset {
    pub kind: AssetKind,
    pub image: RgbaImage,
    pub origin: AssetOrigin,
}

impl Asset {
    pub fn new(kind: AssetKind, image: RgbaImage, origin: AssetOrigin) -> Self {
        Self {
            kind,
            image,
            origin,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.origin, AssetOrigin::Placeholder | AssetOrigin::Derived)
    }
}

/// Decoded images resolved for one card.
#[derive(Debug, Clone, Default)]
pub struct AssetBundle {
    assets: BTreeMap<AssetKind, Asset>,
}

impl AssetBundle {
    pub fn add(&mut self, asset: Asset) {
        self.assets.insert(asset.kind, asset);
    }

    pub fn get(&self, kind: AssetKind) -> Option<&Asset> {
        self.assets.get(&kind)
    }

    pub fn image(&self, kind: AssetKind) -> Option<&RgbaImage> {
        self.get(kind).map(|asset| &asset.image)
    }

    pub fn contains(&self, kind: AssetKind) -> bool {
        self.assets.contains_key(&kind)
    }

    pub fn has_snapshots(&self) -> bool {
        [
            AssetKind::BackgroundSnapshot,
            AssetKind::PlayerSnapshot,
            AssetKind::FrameSnapshot,
        ]
        .iter()
        .all(|kind| self.contains(*kind))
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

/// Raw bytes for a stored reference (URL or path).
pub trait AssetStore: Send + Sync {
    fn fetch(&self, reference: &str) -> Result<Vec<u8>, ProductionError>;
}

/// Local mirror of the asset bucket.
///
/// `http(s)://host/a/b.png` resolves to `<root>/host/a/b.png`; relative paths
/// resolve under `root`; absolute paths are read directly.
#[derive(Debug, Clone)]
pub struct DirAssetStore {
    root: PathBuf,
}

impl DirAssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn resolve(&self, reference: &str) -> Option<PathBuf> {
        let reference = reference.trim();
        let stripped = reference
            .strip_prefix("https://")
            .or_else(|| reference.strip_prefix("http://"));
        let relative = match stripped {
            Some(rest) => rest.split(['?', '#']).next().unwrap_or(rest),
            None => {
                let path = Path::new(reference);
                if path.is_absolute() {
                    return Some(path.to_path_buf());
                }
                reference
            }
        };
        let relative = Path::new(relative);
        // keep lookups inside the mirror root
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return None;
        }
        Some(self.root.join(relative))
    }
}

impl AssetStore for DirAssetStore {
    fn fetch(&self, reference: &str) -> Result<Vec<u8>, ProductionError> {
        let path = self.resolve(reference).ok_or_else(|| {
            ProductionError::MissingAsset(format!("unresolvable reference '{reference}'"))
        })?;
        std::fs::read(&path).map_err(|err| {
            ProductionError::MissingAsset(format!("{} ({})", reference, err))
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryAssetStore {
    entries: BTreeMap<String, Vec<u8>>,
}

impl MemoryAssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, reference: impl Into<String>, data: Vec<u8>) {
        self.entries.insert(reference.into(), data);
    }
}

impl AssetStore for MemoryAssetStore {
    fn fetch(&self, reference: &str) -> Result<Vec<u8>, ProductionError> {
        self.entries
            .get(reference)
            .cloned()
            .ok_or_else(|| ProductionError::MissingAsset(format!("unknown reference '{reference}'")))
    }
}

fn load(kind: AssetKind, raw: &str, store: &dyn AssetStore) -> Result<Asset, ProductionError> {
    let (data, origin) = match ImageRef::parse(raw)? {
        ImageRef::Inline { data, .. } => (data, AssetOrigin::Inline),
        ImageRef::Stored(reference) => (store.fetch(&reference)?, AssetOrigin::Store(reference)),
    };
    let image = raster::decode_image(&data)
        .map_err(|err| ProductionError::MissingAsset(format!("{}: {}", kind.as_str(), err)))?
        .to_rgba8();
    Ok(Asset::new(kind, image, origin))
}

/// Resolves every image a design references.
///
/// Snapshot images are best-effort: a failure is logged and the raw path
/// takes over. A raw reference that is present but cannot be loaded is a
/// `MissingAsset`, as is a design with no image source at all.
pub fn fetch_design_assets(
    design: &DesignSnapshot,
    store: &dyn AssetStore,
    backdrop_mix: f32,
) -> Result<AssetBundle, ProductionError> {
    let mut bundle = AssetBundle::default();
    for kind in [
        AssetKind::BackgroundSnapshot,
        AssetKind::PlayerSnapshot,
        AssetKind::FrameSnapshot,
        AssetKind::TextSnapshot,
    ] {
        let Some(raw) = kind.reference(design) else {
            continue;
        };
        match load(kind, raw, store) {
            Ok(asset) => bundle.add(asset),
            Err(err) => log::warn!("{} unavailable, falling back: {}", kind.as_str(), err),
        }
    }

    if bundle.has_snapshots() {
        if let Some(raw) = AssetKind::Hero.reference(design) {
            match load(AssetKind::Hero, raw, store) {
                Ok(asset) => bundle.add(asset),
                Err(err) => log::warn!("raw hero unavailable, using player snapshot: {}", err),
            }
        }
        return Ok(bundle);
    }

    let raw_refs = [AssetKind::Hero, AssetKind::Frame, AssetKind::Background]
        .map(|kind| (kind, kind.reference(design)));
    if raw_refs.iter().all(|(_, r)| r.is_none()) && bundle.is_empty() {
        return Err(ProductionError::MissingAsset(
            "design has no image source".to_string(),
        ));
    }
    for (kind, raw) in raw_refs {
        if let Some(raw) = raw {
            bundle.add(load(kind, raw, store)?);
        }
    }

    let (pw, ph) = PLACEHOLDER_SIZE;
    if !bundle.contains(AssetKind::Hero) {
        log::debug!("no hero reference, using white placeholder");
        bundle.add(Asset::new(
            AssetKind::Hero,
            RgbaImage::from_pixel(pw, ph, Rgba([255, 255, 255, 255])),
            AssetOrigin::Placeholder,
        ));
    }
    if !bundle.contains(AssetKind::Frame) {
        bundle.add(Asset::new(
            AssetKind::Frame,
            RgbaImage::new(pw, ph),
            AssetOrigin::Placeholder,
        ));
    }
    if !bundle.contains(AssetKind::Background) {
        let hero = bundle
            .image(AssetKind::Hero)
            .cloned()
            .unwrap_or_else(|| RgbaImage::new(pw, ph));
        let mut backdrop = raster::soft_backdrop(&hero, pw, ph);
        if let Some(color) = design.primary_color() {
            raster::blend_tint(&mut backdrop, color, backdrop_mix);
        }
        bundle.add(Asset::new(
            AssetKind::Background,
            backdrop,
            AssetOrigin::Derived,
        ));
    }
    Ok(bundle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn png(w: u32, h: u32, px: [u8; 4]) -> Vec<u8> {
        raster::encode_png(&RgbaImage::from_pixel(w, h, Rgba(px))).expect("png")
    }

    fn design(value: serde_json::Value) -> DesignSnapshot {
        serde_json::from_value(value).expect("design")
    }

    #[test]
    fn kind_names_round_trip() {
        for kind in [AssetKind::Hero, AssetKind::TextSnapshot, AssetKind::Background] {
            assert_eq!(AssetKind::from_str(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn dir_store_mirrors_urls_and_refuses_escapes() {
        let store = DirAssetStore::new("/mirror");
        assert_eq!(
            store.resolve("https://cdn.example.com/cards/a.png?v=2"),
            Some(PathBuf::from("/mirror/cdn.example.com/cards/a.png"))
        );
        assert_eq!(
            store.resolve("cards/b.png"),
            Some(PathBuf::from("/mirror/cards/b.png"))
        );
        assert_eq!(store.resolve("../etc/passwd"), None);
    }

    #[test]
    fn dir_store_reads_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("hero.png"), png(2, 2, [1, 2, 3, 255])).expect("write");
        let store = DirAssetStore::new(dir.path());
        assert!(store.fetch("hero.png").is_ok());
        assert!(matches!(
            store.fetch("nope.png"),
            Err(ProductionError::MissingAsset(_))
        ));
    }

    #[test]
    fn complete_snapshots_skip_raw_placeholders() {
        let mut store = MemoryAssetStore::new();
        for name in ["bg", "player", "frame"] {
            store.insert(name, png(4, 4, [9, 9, 9, 255]));
        }
        let d = design(json!({
            "background_snapshot_url": "bg",
            "player_snapshot_url": "player",
            "frame_snapshot_url": "frame",
        }));
        let bundle = fetch_design_assets(&d, &store, 0.4).expect("bundle");
        assert!(bundle.has_snapshots());
        assert!(!bundle.contains(AssetKind::Background));
        assert_eq!(bundle.len(), 3);
    }

    #[test]
    fn broken_snapshot_falls_back_to_raw_assets() {
        let mut store = MemoryAssetStore::new();
        store.insert("bg", png(4, 4, [9, 9, 9, 255]));
        store.insert("hero", png(4, 4, [200, 0, 0, 255]));
        let d = design(json!({
            "background_snapshot_url": "bg",
            "player_snapshot_url": "missing",
            "frame_snapshot_url": "bg",
            "hero_url": "hero",
        }));
        let bundle = fetch_design_assets(&d, &store, 0.4).expect("bundle");
        assert!(!bundle.has_snapshots());
        assert_eq!(
            bundle.get(AssetKind::Hero).map(|a| a.origin.clone()),
            Some(AssetOrigin::Store("hero".to_string()))
        );
        assert!(bundle.get(AssetKind::Frame).map(Asset::is_placeholder).unwrap_or(false));
        assert_eq!(
            bundle.get(AssetKind::Background).map(|a| a.origin.clone()),
            Some(AssetOrigin::Derived)
        );
    }

    #[test]
    fn present_but_broken_raw_reference_is_fatal() {
        let store = MemoryAssetStore::new();
        let d = design(json!({"hero_url": "gone.png"}));
        assert!(matches!(
            fetch_design_assets(&d, &store, 0.4),
            Err(ProductionError::MissingAsset(_))
        ));
    }

    #[test]
    fn design_without_images_is_fatal() {
        let store = MemoryAssetStore::new();
        let d = design(json!({"playerName": "Nobody"}));
        let err = fetch_design_assets(&d, &store, 0.4).expect_err("no sources");
        assert!(err.to_string().contains("no image source"));
    }
}
