use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProductionError;

/// Read-only design record for one card, as handed over by the order system.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DesignSnapshot {
    fields: Map<String, Value>,
}

/// Where an image comes from: decoded inline or fetched through an asset store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    Inline { media_type: String, data: Vec<u8> },
    Stored(String),
}

/// Normalized hero placement against the full canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerTransform {
    pub left_ratio: f64,
    pub top_ratio: f64,
    pub scale_ratio: f64,
}

impl Default for PlayerTransform {
    fn default() -> Self {
        Self {
            left_ratio: 0.5,
            top_ratio: 0.55,
            scale_ratio: 1.0,
        }
    }
}

/// Text and colour fields that only matter on the raw-asset path.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignFields {
    pub player_name: Option<String>,
    pub team_name: Option<String>,
    pub tint: Option<[u8; 3]>,
    pub text_color: [u8; 3],
    pub transform: Option<PlayerTransform>,
}

const HERO_KEYS: &[&str] = &["hero_url", "playerImageUrl", "player_image_url"];
const FRAME_KEYS: &[&str] = &[
    "frame_url",
    "frameImageUrl",
    "frame_image_url",
    "overlay_url",
    "logoDataUrl",
];
const BACKGROUND_KEYS: &[&str] = &[
    "background_url",
    "backgroundImageUrl",
    "background_image_url",
];

impl DesignSnapshot {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn from_json_str(text: &str) -> Result<Self, ProductionError> {
        let value: Value = serde_json::from_str(text)?;
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            _ => Err(ProductionError::InvalidConfiguration(
                "design record must be a JSON object".to_string(),
            )),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// First non-blank string among `keys`.
    pub fn text(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|key| {
            self.fields
                .get(*key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|v| !v.is_empty())
        })
    }

    pub fn snapshot_ref(&self, layer: &str) -> Option<&str> {
        let data_key = format!("{layer}_snapshot_data_url");
        let url_key = format!("{layer}_snapshot_url");
        self.text(&[data_key.as_str(), url_key.as_str()])
    }

    pub fn hero_ref(&self) -> Option<&str> {
        self.text(HERO_KEYS)
    }

    pub fn frame_ref(&self) -> Option<&str> {
        self.text(FRAME_KEYS)
    }

    pub fn background_ref(&self) -> Option<&str> {
        self.text(BACKGROUND_KEYS)
    }

    pub fn primary_color(&self) -> Option<[u8; 3]> {
        self.text(&["primaryColor"]).and_then(parse_hex_color)
    }

    pub fn player_transform(&self) -> Option<PlayerTransform> {
        let raw = self.fields.get("playerTransform")?.as_object()?;
        let defaults = PlayerTransform::default();
        let read = |key: &str, fallback: f64| {
            raw.get(key)
                .and_then(number_like)
                .filter(|v| v.is_finite())
                .unwrap_or(fallback)
        };
        Some(PlayerTransform {
            left_ratio: read("leftRatio", defaults.left_ratio),
            top_ratio: read("topRatio", defaults.top_ratio),
            scale_ratio: read("scaleRatio", defaults.scale_ratio),
        })
    }

    pub fn fields(&self) -> DesignFields {
        let primary = self.primary_color();
        let secondary = self.text(&["secondaryColor"]).and_then(parse_hex_color);
        let frame = self.text(&["frame_color"]).and_then(parse_hex_color);
        DesignFields {
            player_name: self
                .text(&["playerName", "player_name"])
                .map(str::to_string),
            team_name: self.text(&["teamName", "team_name"]).map(str::to_string),
            tint: frame.or(primary),
            text_color: primary.or(secondary).unwrap_or([255, 255, 255]),
            transform: self.player_transform(),
        }
    }
}

fn number_like(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Parses `#RRGGBB` (the leading `#` is optional).
pub fn parse_hex_color(raw: &str) -> Option<[u8; 3]> {
    let hex = raw.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some([channel(0)?, channel(2)?, channel(4)?])
}

impl ImageRef {
    /// Classifies a design value. Inline payloads must be base64 image data.
    pub fn parse(raw: &str) -> Result<ImageRef, ProductionError> {
        let raw = raw.trim();
        if !raw.starts_with("data:") {
            return Ok(ImageRef::Stored(raw.to_string()));
        }
        let Some((header, payload)) = raw.split_once(',') else {
            return Err(ProductionError::MissingAsset(
                "malformed data URL".to_string(),
            ));
        };
        let media_type = header
            .trim_start_matches("data:")
            .split(';')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        if !media_type.starts_with("image/") || !header.contains(";base64") {
            return Err(ProductionError::MissingAsset(format!(
                "unsupported inline payload '{}'",
                header
            )));
        }
        let data = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|err| ProductionError::MissingAsset(format!("bad base64 payload: {err}")))?;
        Ok(ImageRef::Inline { media_type, data })
    }
}
