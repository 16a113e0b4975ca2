use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use image::RgbaImage;
use tiny_skia::{FillRule, Paint, Path as SkPath, PathBuilder, Pixmap, Transform};
use ttf_parser::{Face, OutlineBuilder};

use crate::error::ProductionError;

static DISCOVERY_CACHE: OnceLock<Mutex<HashMap<Vec<PathBuf>, Option<Arc<Vec<u8>>>>>> =
    OnceLock::new();

/// Sans-serif faces tried in order when no font is configured.
const FALLBACK_FONT_FILES: &[&str] = &[
    "arial.ttf",
    "Arial.ttf",
    "Supplemental/Arial.ttf",
    "DejaVuSans.ttf",
    "truetype/dejavu/DejaVuSans.ttf",
    "dejavu/DejaVuSans.ttf",
    "TTF/DejaVuSans.ttf",
    "LiberationSans-Regular.ttf",
    "truetype/liberation/LiberationSans-Regular.ttf",
    "liberation/LiberationSans-Regular.ttf",
    "truetype/noto/NotoSans-Regular.ttf",
    "noto/NotoSans-Regular.ttf",
    "Helvetica.ttc",
];

/// Ink box of a laid-out string, relative to its ascender-line origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InkBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl InkBox {
    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }
}

#[derive(Clone)]
pub struct CardFont {
    data: Arc<Vec<u8>>,
}

impl std::fmt::Debug for CardFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardFont")
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl CardFont {
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, ProductionError> {
        Face::parse(&data, 0).map_err(|err| {
            ProductionError::InvalidConfiguration(format!("unreadable font: {err}"))
        })?;
        Ok(Self {
            data: Arc::new(data),
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ProductionError> {
        Self::from_bytes(std::fs::read(path.as_ref())?)
    }

    /// Best-effort lookup across platform font dirs plus `extra_dirs`.
    pub fn discover(extra_dirs: &[PathBuf]) -> Option<Self> {
        let cache = DISCOVERY_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
        let key = extra_dirs.to_vec();
        if let Ok(guard) = cache.lock() {
            if let Some(hit) = guard.get(&key) {
                return hit.clone().map(|data| Self { data });
            }
        }
        let mut dirs = extra_dirs.to_vec();
        dirs.extend(system_font_dirs());
        let loaded = dirs.iter().find_map(|dir| {
            FALLBACK_FONT_FILES.iter().find_map(|name| {
                let data = std::fs::read(dir.join(name)).ok()?;
                Face::parse(&data, 0).ok()?;
                log::debug!("text font resolved to {}", dir.join(name).display());
                Some(Arc::new(data))
            })
        });
        if let Ok(mut guard) = cache.lock() {
            guard.insert(key, loaded.clone());
        }
        loaded.map(|data| Self { data })
    }

    fn face(&self) -> Option<Face<'_>> {
        Face::parse(&self.data, 0).ok()
    }

    /// Ink bounds of `text` at `size_px`, anchored at the left ascender line.
    pub fn measure(&self, text: &str, size_px: f32) -> Option<InkBox> {
        let face = self.face()?;
        let scale = size_px / face.units_per_em() as f32;
        let ascent = face.ascender() as f32 * scale;
        let mut pen = 0.0f32;
        let mut bounds: Option<InkBox> = None;
        for ch in text.chars() {
            let Some(gid) = face.glyph_index(ch) else {
                continue;
            };
            if let Some(bbox) = face.glyph_bounding_box(gid) {
                let glyph = InkBox {
                    left: pen + bbox.x_min as f32 * scale,
                    top: ascent - bbox.y_max as f32 * scale,
                    right: pen + bbox.x_max as f32 * scale,
                    bottom: ascent - bbox.y_min as f32 * scale,
                };
                bounds = Some(match bounds {
                    None => glyph,
                    Some(b) => InkBox {
                        left: b.left.min(glyph.left),
                        top: b.top.min(glyph.top),
                        right: b.right.max(glyph.right),
                        bottom: b.bottom.max(glyph.bottom),
                    },
                });
            }
            pen += face.glyph_hor_advance(gid).unwrap_or(0) as f32 * scale;
        }
        bounds
    }

    fn outline(&self, text: &str, size_px: f32, x: f32, y: f32) -> Option<SkPath> {
        let face = self.face()?;
        let scale = size_px / face.units_per_em() as f32;
        let baseline = y + face.ascender() as f32 * scale;
        let mut builder = GlyphPathBuilder::new(PathBuilder::new(), x, baseline, scale);
        for ch in text.chars() {
            let Some(gid) = face.glyph_index(ch) else {
                continue;
            };
            face.outline_glyph(gid, &mut builder);
            builder.origin_x += face.glyph_hor_advance(gid).unwrap_or(0) as f32 * scale;
        }
        builder.builder.finish()
    }

    /// Fills `text` onto `target` with its ascender-line origin at (x, y).
    pub fn draw(
        &self,
        target: &mut RgbaImage,
        text: &str,
        size_px: f32,
        x: f32,
        y: f32,
        color: [u8; 3],
    ) -> bool {
        let Some(path) = self.outline(text, size_px, x, y) else {
            return false;
        };
        let Some(mut pixmap) = Pixmap::new(target.width(), target.height()) else {
            return false;
        };
        let mut paint = Paint::default();
        paint.set_color_rgba8(color[0], color[1], color[2], 255);
        paint.anti_alias = true;
        pixmap.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
        composite_pixmap(target, &pixmap);
        true
    }
}

fn composite_pixmap(target: &mut RgbaImage, pixmap: &Pixmap) {
    for (src, dst) in pixmap.pixels().iter().zip(target.pixels_mut()) {
        let a = src.alpha();
        if a == 0 {
            continue;
        }
        let c = src.demultiply();
        let sa = a as u32;
        let inv = 255 - sa;
        let blend = |s: u8, d: u8| ((s as u32 * sa + d as u32 * inv + 127) / 255) as u8;
        dst.0[0] = blend(c.red(), dst.0[0]);
        dst.0[1] = blend(c.green(), dst.0[1]);
        dst.0[2] = blend(c.blue(), dst.0[2]);
        dst.0[3] = (sa + (dst.0[3] as u32 * inv + 127) / 255).min(255) as u8;
    }
}

struct GlyphPathBuilder {
    builder: PathBuilder,
    origin_x: f32,
    origin_y: f32,
    scale: f32,
}

impl GlyphPathBuilder {
    fn new(builder: PathBuilder, origin_x: f32, origin_y: f32, scale: f32) -> Self {
        Self {
            builder,
            origin_x,
            origin_y,
            scale,
        }
    }

    // Font units are y-up; raster rows are y-down.
    fn map(&self, x: f32, y: f32) -> (f32, f32) {
        (self.origin_x + x * self.scale, self.origin_y - y * self.scale)
    }
}

impl OutlineBuilder for GlyphPathBuilder {
    fn move_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.builder.move_to(x, y);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.builder.line_to(x, y);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x, y) = self.map(x, y);
        self.builder.quad_to(x1, y1, x, y);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x2, y2) = self.map(x2, y2);
        let (x, y) = self.map(x, y);
        self.builder.cubic_to(x1, y1, x2, y2, x, y);
    }

    fn close(&mut self) {
        self.builder.close();
    }
}

fn system_font_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    #[cfg(target_os = "windows")]
    {
        dirs.push(PathBuf::from(r"C:\Windows\Fonts"));
        if let Ok(windir) = std::env::var("WINDIR") {
            dirs.push(PathBuf::from(windir).join("Fonts"));
        }
    }

    #[cfg(target_os = "linux")]
    {
        dirs.push(PathBuf::from("/usr/share/fonts"));
        dirs.push(PathBuf::from("/usr/local/share/fonts"));
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(PathBuf::from(home).join(".fonts"));
        }
    }

    #[cfg(target_os = "macos")]
    {
        dirs.push(PathBuf::from("/System/Library/Fonts"));
        dirs.push(PathBuf::from("/Library/Fonts"));
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(PathBuf::from(home).join("Library/Fonts"));
        }
    }

    dirs
}
