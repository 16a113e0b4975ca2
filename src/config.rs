use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ProductionError;
use crate::types::ColorSpace;

const MM_PER_INCH: f64 = 25.4;

/// What to do with islands nested inside holes (contour depth >= 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NestedContours {
    Promote,
    Skip,
}

/// Physical and device calibration for one card type and cutter stack.
///
/// Every measurement the pipeline uses lives here; nothing downstream
/// hardcodes a card size, inset or tolerance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductionConfig {
    pub card_width_in: f64,
    pub card_height_in: f64,
    pub bleed_in: f64,
    pub print_dpi: u32,
    pub output_dpi: u32,
    pub hero_safe_width_in: f64,
    pub hero_safe_height_in: f64,
    pub foreground_bleed_px: u32,
    pub spacer_inset_mm: f64,
    pub outer_border_tolerance_px: u32,
    pub alpha_threshold: u8,
    pub tint_mix: f32,
    pub derived_background_mix: f32,
    pub name_font_px: f32,
    pub team_font_px: f32,
    pub name_bottom_px: u32,
    pub team_bottom_px: u32,
    pub crop_mark_inset_in: f64,
    pub registration_offset_in: f64,
    pub registration_mark_in: f64,
    pub ganged_column_pitch_in: f64,
    pub mark_color_space: ColorSpace,
    pub nested_contours: NestedContours,
    pub skip_failed_cards: bool,
    pub font_path: Option<PathBuf>,
    pub font_dirs: Vec<PathBuf>,
    pub perf_log: Option<PathBuf>,
}

impl Default for ProductionConfig {
    fn default() -> Self {
        Self {
            card_width_in: 2.5,
            card_height_in: 3.5,
            bleed_in: 0.0625,
            print_dpi: 300,
            output_dpi: 72,
            hero_safe_width_in: 2.25,
            hero_safe_height_in: 3.25,
            foreground_bleed_px: 2,
            spacer_inset_mm: 0.5,
            outer_border_tolerance_px: 5,
            alpha_threshold: 128,
            tint_mix: 0.35,
            derived_background_mix: 0.4,
            name_font_px: 42.0,
            team_font_px: 24.0,
            name_bottom_px: 80,
            team_bottom_px: 36,
            crop_mark_inset_in: 0.25,
            registration_offset_in: 0.5,
            registration_mark_in: 0.2,
            ganged_column_pitch_in: 3.5,
            mark_color_space: ColorSpace::Rgb,
            nested_contours: NestedContours::Promote,
            skip_failed_cards: false,
            font_path: None,
            font_dirs: Vec::new(),
            perf_log: None,
        }
    }
}

impl ProductionConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ProductionError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: ProductionConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `SHADOWBOX_FONT` and `SHADOWBOX_FONT_DIR` when set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(path) = std::env::var("SHADOWBOX_FONT") {
            if !path.trim().is_empty() {
                self.font_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(dir) = std::env::var("SHADOWBOX_FONT_DIR") {
            if !dir.trim().is_empty() {
                self.font_dirs.push(PathBuf::from(dir));
            }
        }
        self
    }

    pub fn validate(&self) -> Result<(), ProductionError> {
        let positive = [
            ("card_width_in", self.card_width_in),
            ("card_height_in", self.card_height_in),
            ("hero_safe_width_in", self.hero_safe_width_in),
            ("hero_safe_height_in", self.hero_safe_height_in),
            ("ganged_column_pitch_in", self.ganged_column_pitch_in),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(ProductionError::InvalidConfiguration(format!(
                    "{name} must be > 0 (got {value})"
                )));
            }
        }
        if !self.bleed_in.is_finite() || self.bleed_in < 0.0 {
            return Err(ProductionError::InvalidConfiguration(
                "bleed_in must be >= 0".to_string(),
            ));
        }
        if self.print_dpi == 0 || self.output_dpi == 0 {
            return Err(ProductionError::InvalidConfiguration(
                "print_dpi and output_dpi must be > 0".to_string(),
            ));
        }
        if self.alpha_threshold == 0 {
            return Err(ProductionError::InvalidConfiguration(
                "alpha_threshold must be > 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.tint_mix) || !(0.0..=1.0).contains(&self.derived_background_mix)
        {
            return Err(ProductionError::InvalidConfiguration(
                "tint mixes must lie in 0..=1".to_string(),
            ));
        }
        let (w, h) = self.canvas_px();
        let inset = self.trim_inset_px();
        if w <= inset * 2 || h <= inset * 2 {
            return Err(ProductionError::InvalidConfiguration(format!(
                "bleed of {inset}px leaves no trim area on a {w}x{h} canvas"
            )));
        }
        if self.ganged_column_pitch_in < self.cell_width_in() {
            return Err(ProductionError::InvalidConfiguration(
                "ganged_column_pitch_in is narrower than one card cell".to_string(),
            ));
        }
        Ok(())
    }

    pub fn cell_width_in(&self) -> f64 {
        self.card_width_in + 2.0 * self.bleed_in
    }

    pub fn cell_height_in(&self) -> f64 {
        self.card_height_in + 2.0 * self.bleed_in
    }

    /// Canvas size in print pixels. Truncates like the artwork templates do,
    /// so a 2.625in x 3.625in canvas at 300 dpi is 787 x 1087.
    pub fn canvas_px(&self) -> (u32, u32) {
        let dpi = self.print_dpi as f64;
        (
            (self.cell_width_in() * dpi) as u32,
            (self.cell_height_in() * dpi) as u32,
        )
    }

    pub fn hero_safe_px(&self) -> (u32, u32) {
        let dpi = self.print_dpi as f64;
        (
            (self.hero_safe_width_in * dpi) as u32,
            (self.hero_safe_height_in * dpi) as u32,
        )
    }

    pub fn trim_inset_px(&self) -> u32 {
        (self.bleed_in * self.print_dpi as f64).round() as u32
    }

    pub fn spacer_inset_px(&self) -> u32 {
        (self.spacer_inset_mm / MM_PER_INCH * self.print_dpi as f64).round() as u32
    }

    /// Pixel to vector-unit factor.
    pub fn vector_scale(&self) -> f64 {
        self.output_dpi as f64 / self.print_dpi as f64
    }

    pub fn vector_canvas(&self) -> (u32, u32) {
        let (w, h) = self.canvas_px();
        let scale = self.vector_scale();
        (
            (w as f64 * scale).round() as u32,
            (h as f64 * scale).round() as u32,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_sizes_match_card_templates() {
        let config = ProductionConfig::default();
        assert_eq!(config.canvas_px(), (787, 1087));
        assert_eq!(config.hero_safe_px(), (675, 975));
        assert_eq!(config.trim_inset_px(), 19);
        assert_eq!(config.spacer_inset_px(), 6);
        assert_eq!(config.vector_canvas(), (189, 261));
        assert!((config.vector_scale() - 0.24).abs() < 1e-12);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: ProductionConfig =
            serde_json::from_str(r#"{"spacer_inset_mm": 1.0, "mark_color_space": "cmyk"}"#)
                .expect("parse");
        assert_eq!(config.spacer_inset_px(), 12);
        assert_eq!(config.mark_color_space, ColorSpace::Cmyk);
        assert_eq!(config.canvas_px(), (787, 1087));
        assert_eq!(config.nested_contours, NestedContours::Promote);
    }

    #[test]
    fn validate_rejects_degenerate_values() {
        assert!(ProductionConfig::default().validate().is_ok());
        let config = ProductionConfig {
            alpha_threshold: 0,
            ..ProductionConfig::default()
        };
        assert!(config.validate().is_err());
        let config = ProductionConfig {
            card_width_in: 0.0,
            ..ProductionConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ProductionError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"outer_border_tolerance_px": 8}"#).expect("write");
        let config = ProductionConfig::from_json_file(&path).expect("load");
        assert_eq!(config.outer_border_tolerance_px, 8);
    }
}
