use fixed::types::I32F32;

/// Device points per physical inch. Sheet layout works in inches and converts
/// through this at draw time.
pub const POINTS_PER_INCH: f64 = 72.0;

/// Device-space length in points. Values snap to 1/1000 pt on the way in so
/// sheet positions print identically on every run.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Pt(I32F32);

impl Pt {
    pub const ZERO: Pt = Pt(I32F32::ZERO);

    pub fn from_milli(milli: i64) -> Pt {
        Pt(I32F32::saturating_from_num(milli as f64 / 1000.0))
    }

    /// Non-finite input collapses to zero.
    pub fn from_f64(value: f64) -> Pt {
        if value.is_finite() {
            Pt::from_milli((value * 1000.0).round() as i64)
        } else {
            Pt::ZERO
        }
    }

    pub fn from_f32(value: f32) -> Pt {
        Pt::from_f64(value as f64)
    }

    pub fn from_inches(inches: f64) -> Pt {
        Pt::from_f64(inches * POINTS_PER_INCH)
    }

    pub fn to_milli(self) -> i64 {
        self.0.saturating_mul_int(1000).round().saturating_to_num()
    }
}

impl std::ops::Add for Pt {
    type Output = Pt;
    fn add(self, rhs: Pt) -> Pt {
        Pt::from_milli(self.to_milli().saturating_add(rhs.to_milli()))
    }
}

impl std::ops::Sub for Pt {
    type Output = Pt;
    fn sub(self, rhs: Pt) -> Pt {
        Pt::from_milli(self.to_milli().saturating_sub(rhs.to_milli()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: Pt,
    pub height: Pt,
}

impl Size {
    pub fn letter() -> Self {
        Size::from_inches(8.5, 11.0)
    }

    pub fn from_inches(width_in: f64, height_in: f64) -> Self {
        Self {
            width: Pt::from_inches(width_in),
            height: Pt::from_inches(height_in),
        }
    }
}

/// Top-left-origin rectangle in device points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: Pt,
    pub y: Pt,
    pub width: Pt,
    pub height: Pt,
}

impl Rect {
    pub fn from_inches(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x: Pt::from_inches(x),
            y: Pt::from_inches(y),
            width: Pt::from_inches(width),
            height: Pt::from_inches(height),
        }
    }

    /// Bottom edge for PDF placement: `page_height - (y + height)`.
    pub fn flipped_y(&self, page_height: Pt) -> Pt {
        page_height - (self.y + self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const BLACK: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
    };

    pub fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    pub fn gray(level: f32) -> Self {
        Self::rgb(level, level, level)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorSpace {
    Rgb,
    Cmyk,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inches_convert_at_seventy_two() {
        assert_eq!(Pt::from_inches(8.5).to_milli(), 612_000);
        assert_eq!(Pt::from_inches(2.625).to_milli(), 189_000);
        assert_eq!(Size::letter().height.to_milli(), 792_000);
        assert_eq!(Pt::from_f64(0.0004).to_milli(), 0);
        assert_eq!(Pt::from_f64(f64::NAN), Pt::ZERO);
    }

    #[test]
    fn flip_uses_bottom_edge() {
        let rect = Rect::from_inches(1.0, 0.5, 2.0, 3.0);
        let page = Pt::from_inches(11.0);
        // 792 - (36 + 216)
        assert_eq!(rect.flipped_y(page).to_milli(), 540_000);
    }
}
