use std::path::{Path, PathBuf};

use image::RgbaImage;

use crate::assets::{AssetBundle, AssetKind};
use crate::config::ProductionConfig;
use crate::design::{DesignFields, DesignSnapshot, PlayerTransform};
use crate::error::ProductionError;
use crate::font::CardFont;
use crate::raster;

pub const BACKGROUND_FILE: &str = "print_layer_1_bg.png";
pub const HERO_FILE: &str = "print_layer_2_hero.png";
pub const FRAME_FILE: &str = "print_layer_3_frame.png";
pub const FOREGROUND_FILE: &str = "print_foreground.png";
pub const HERO_FRAME_FILE: &str = "print_hero_frame.png";
pub const FRAME_TEXT_FILE: &str = "print_layer_3_frame_text.png";

/// Where a card's pixels come from, decided once per card.
#[derive(Debug, Clone)]
pub enum RenderSource {
    /// Pre-rendered artwork: scaled and cropped only.
    Snapshots {
        background: RgbaImage,
        player: RgbaImage,
        frame: RgbaImage,
        raw_hero: Option<RgbaImage>,
        text: Option<RgbaImage>,
        transform: Option<PlayerTransform>,
    },
    /// Raw uploads: tinted, lettered and hardened here.
    RawAssets {
        background: RgbaImage,
        hero: RgbaImage,
        frame: RgbaImage,
        text: Option<RgbaImage>,
        fields: DesignFields,
    },
}

impl RenderSource {
    pub fn resolve(
        bundle: &AssetBundle,
        design: &DesignSnapshot,
    ) -> Result<RenderSource, ProductionError> {
        let text = bundle.image(AssetKind::TextSnapshot).cloned();
        if bundle.has_snapshots() {
            let take = |kind: AssetKind| {
                bundle.image(kind).cloned().ok_or_else(|| {
                    ProductionError::MissingAsset(kind.as_str().to_string())
                })
            };
            return Ok(RenderSource::Snapshots {
                background: take(AssetKind::BackgroundSnapshot)?,
                player: take(AssetKind::PlayerSnapshot)?,
                frame: take(AssetKind::FrameSnapshot)?,
                raw_hero: bundle.image(AssetKind::Hero).cloned(),
                text,
                transform: design.player_transform(),
            });
        }
        let take = |kind: AssetKind| {
            bundle
                .image(kind)
                .cloned()
                .ok_or_else(|| ProductionError::MissingAsset(kind.as_str().to_string()))
        };
        Ok(RenderSource::RawAssets {
            background: take(AssetKind::Background)?,
            hero: take(AssetKind::Hero)?,
            frame: take(AssetKind::Frame)?,
            text,
            fields: design.fields(),
        })
    }

    pub fn is_snapshots(&self) -> bool {
        matches!(self, RenderSource::Snapshots { .. })
    }
}

/// Every raster the pipeline keeps for one card. Base layers are canvas
/// sized; composites carry the extra foreground bleed.
#[derive(Debug, Clone)]
pub struct CardLayers {
    pub background: RgbaImage,
    pub hero: RgbaImage,
    pub frame: RgbaImage,
    pub foreground: RgbaImage,
    pub hero_frame: RgbaImage,
    pub frame_text: RgbaImage,
    pub from_snapshots: bool,
}

impl CardLayers {
    fn files(&self) -> [(&'static str, &RgbaImage); 6] {
        [
            (BACKGROUND_FILE, &self.background),
            (HERO_FILE, &self.hero),
            (FRAME_FILE, &self.frame),
            (FOREGROUND_FILE, &self.foreground),
            (HERO_FRAME_FILE, &self.hero_frame),
            (FRAME_TEXT_FILE, &self.frame_text),
        ]
    }

    /// Writes the six layer PNGs into `dir`.
    pub fn write_to(&self, dir: &Path) -> Result<Vec<PathBuf>, ProductionError> {
        std::fs::create_dir_all(dir)?;
        let mut written = Vec::with_capacity(6);
        for (name, image) in self.files() {
            let path = dir.join(name);
            std::fs::write(&path, raster::encode_png(image)?)?;
            written.push(path);
        }
        Ok(written)
    }
}

#[derive(Debug, Clone)]
pub struct LayerRenderer {
    canvas: (u32, u32),
    safe_zone: (u32, u32),
    bleed_px: u32,
    alpha_threshold: u8,
    tint_mix: f32,
    name_px: f32,
    team_px: f32,
    name_bottom: u32,
    team_bottom: u32,
    font: Option<CardFont>,
}

impl LayerRenderer {
    /// Font lookup is best-effort; without one the raw path renders no text.
    pub fn new(config: &ProductionConfig) -> Self {
        let configured = config.font_path.as_ref().and_then(|path| {
            CardFont::from_file(path)
                .map_err(|err| log::warn!("font {} unusable: {}", path.display(), err))
                .ok()
        });
        let font = configured.or_else(|| CardFont::discover(&config.font_dirs));
        if font.is_none() {
            log::warn!("no text font found; player and team names will be skipped");
        }
        Self::with_font(config, font)
    }

    pub fn with_font(config: &ProductionConfig, font: Option<CardFont>) -> Self {
        Self {
            canvas: config.canvas_px(),
            safe_zone: config.hero_safe_px(),
            bleed_px: config.foreground_bleed_px,
            alpha_threshold: config.alpha_threshold,
            tint_mix: config.tint_mix,
            name_px: config.name_font_px,
            team_px: config.team_font_px,
            name_bottom: config.name_bottom_px,
            team_bottom: config.team_bottom_px,
            font,
        }
    }

    pub fn canvas(&self) -> (u32, u32) {
        self.canvas
    }

    pub fn render(&self, source: &RenderSource) -> CardLayers {
        let (w, h) = self.canvas;
        let (background, hero, frame, text) = match source {
            RenderSource::Snapshots {
                background,
                player,
                frame,
                raw_hero,
                text,
                transform,
            } => {
                let hero = match raw_hero {
                    Some(raw) => {
                        let placement = transform.unwrap_or(PlayerTransform {
                            left_ratio: 0.5,
                            top_ratio: 0.5,
                            scale_ratio: 1.0,
                        });
                        self.place_transformed(raw, placement)
                    }
                    None => self.place_centered(player, (w, h)),
                };
                (
                    raster::cover_crop(background, w, h),
                    hero,
                    raster::cover_crop(frame, w, h),
                    text,
                )
            }
            RenderSource::RawAssets {
                background,
                hero,
                frame,
                text,
                fields,
            } => {
                let mut bg = raster::cover_crop(background, w, h);
                if let Some(tint) = fields.tint {
                    raster::blend_tint(&mut bg, tint, self.tint_mix);
                }
                self.draw_names(&mut bg, fields);
                let hero = match fields.transform {
                    Some(t) => self.place_transformed(hero, t),
                    None => self.place_centered(hero, self.safe_zone),
                };
                let mut frame = raster::cover_crop(frame, w, h);
                raster::harden_alpha(&mut frame, self.alpha_threshold);
                (bg, hero, frame, text)
            }
        };

        let text = text.as_ref().map(|t| raster::cover_crop(t, w, h));
        let foreground = self.composite(&[&hero, &frame], text.as_ref());
        let hero_frame = self.composite(&[&hero, &frame], None);
        let frame_text = self.composite(&[&frame], text.as_ref());
        CardLayers {
            background,
            hero,
            frame,
            foreground,
            hero_frame,
            frame_text,
            from_snapshots: source.is_snapshots(),
        }
    }

    fn place_centered(&self, img: &RgbaImage, bound: (u32, u32)) -> RgbaImage {
        let (w, h) = self.canvas;
        let mut layer = RgbaImage::new(w, h);
        let fitted = raster::fit_within(img, bound.0, bound.1, 1.0);
        raster::paste_centered(&mut layer, &fitted, w as f64 / 2.0, h as f64 / 2.0);
        layer
    }

    fn place_transformed(&self, img: &RgbaImage, t: PlayerTransform) -> RgbaImage {
        let (w, h) = self.canvas;
        let mut layer = RgbaImage::new(w, h);
        let scale = if t.scale_ratio > 0.0 { t.scale_ratio } else { 1.0 };
        let fitted = raster::fit_within(img, w, h, scale);
        raster::paste_centered(
            &mut layer,
            &fitted,
            t.left_ratio * w as f64,
            t.top_ratio * h as f64,
        );
        layer
    }

    fn draw_names(&self, target: &mut RgbaImage, fields: &DesignFields) {
        let Some(font) = &self.font else {
            return;
        };
        let lines = [
            (fields.player_name.as_deref(), self.name_px, self.name_bottom),
            (fields.team_name.as_deref(), self.team_px, self.team_bottom),
        ];
        for (text, size, bottom) in lines {
            let Some(text) = text else {
                continue;
            };
            let Some(ink) = font.measure(text, size) else {
                continue;
            };
            let x = (target.width() as f32 - ink.width()) / 2.0;
            let y = target.height() as f32 - bottom as f32 - ink.height();
            if !font.draw(target, text, size, x, y, fields.text_color) {
                log::warn!("could not draw '{text}'");
            }
        }
    }

    fn composite(&self, layers: &[&RgbaImage], text: Option<&RgbaImage>) -> RgbaImage {
        let (w, h) = self.canvas;
        let mut out = RgbaImage::new(w, h);
        for layer in layers.iter().copied().chain(text) {
            image::imageops::overlay(&mut out, layer, 0, 0);
        }
        raster::pad_transparent(&out, self.bleed_px)
    }
}
