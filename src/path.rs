use std::fmt::Write as _;
use std::path::Path;

use crate::config::ProductionConfig;
use crate::error::ProductionError;
use crate::geometry::{GeometrySet, Ring};

const SVG_NS: &str = "http://www.w3.org/2000/svg";
pub(crate) const CUT_STROKE_WIDTH: &str = "0.5";

/// Scales pixel-space rings into vector path data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathEmitter {
    scale: f64,
}

impl PathEmitter {
    pub fn new(input_dpi: u32, output_dpi: u32) -> Self {
        Self {
            scale: output_dpi as f64 / input_dpi.max(1) as f64,
        }
    }

    pub fn from_config(config: &ProductionConfig) -> Self {
        Self::new(config.print_dpi, config.output_dpi)
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// `M x y L x y ... Z`, every stored point including the closing one.
    pub fn ring_data(&self, ring: &Ring) -> String {
        let mut out = String::new();
        for (i, p) in ring.points().iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            let cmd = if i == 0 { 'M' } else { 'L' };
            let _ = write!(
                out,
                "{} {:.4} {:.4}",
                cmd,
                p.x as f64 * self.scale,
                p.y as f64 * self.scale
            );
        }
        out.push_str(" Z");
        out
    }

    /// One subpath per ring; holes follow their exterior.
    pub fn path_data(&self, geometry: &GeometrySet) -> String {
        geometry
            .polygons()
            .iter()
            .flat_map(|poly| poly.rings())
            .map(|ring| self.ring_data(ring))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn emit(&self, name: &str, geometry: &GeometrySet, canvas_px: (u32, u32)) -> CutPath {
        let width = (canvas_px.0 as f64 * self.scale).round() as u32;
        let height = (canvas_px.1 as f64 * self.scale).round() as u32;
        let data = self.path_data(geometry);
        CutPath {
            name: name.to_string(),
            data: if data.is_empty() { None } else { Some(data) },
            width,
            height,
        }
    }
}

/// Named vector artifact: path data plus the vector canvas it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CutPath {
    pub name: String,
    pub data: Option<String>,
    pub width: u32,
    pub height: u32,
}

impl CutPath {
    pub fn is_empty(&self) -> bool {
        self.data.is_none()
    }

    pub fn file_name(&self) -> String {
        format!("{}.svg", self.name)
    }

    /// Standalone document. Empty geometry still yields a complete document.
    pub fn to_svg(&self) -> String {
        let mut out = String::new();
        out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\" ?>\n");
        let _ = write!(
            out,
            "<svg xmlns=\"{}\" version=\"1.1\" baseProfile=\"full\" width=\"{}\" height=\"{}\" viewBox=\"0 0 {} {}\"><defs />",
            SVG_NS, self.width, self.height, self.width, self.height
        );
        if let Some(data) = &self.data {
            out.push_str(&path_element(data));
        }
        out.push_str("</svg>\n");
        out
    }

    pub fn write_to(&self, dir: &Path) -> Result<std::path::PathBuf, ProductionError> {
        let path = dir.join(self.file_name());
        std::fs::write(&path, self.to_svg())?;
        Ok(path)
    }

    /// Reads back a per-card document written by `to_svg`.
    pub fn parse_svg(name: &str, text: &str) -> Result<CutPath, ProductionError> {
        let doc = roxmltree::Document::parse(text)
            .map_err(|err| ProductionError::Svg(format!("{name}: {err}")))?;
        let root = doc.root_element();
        if root.tag_name().name() != "svg" {
            return Err(ProductionError::Svg(format!("{name}: root is not <svg>")));
        }
        let dimension = |attr: &str| -> Result<u32, ProductionError> {
            root.attribute(attr)
                .and_then(|v| v.trim().parse::<f64>().ok())
                .map(|v| v.round() as u32)
                .ok_or_else(|| ProductionError::Svg(format!("{name}: bad {attr}")))
        };
        let data: Vec<&str> = root
            .descendants()
            .filter(|n| n.has_tag_name("path"))
            .filter_map(|n| n.attribute("d"))
            .filter(|d| !d.trim().is_empty())
            .collect();
        Ok(CutPath {
            name: name.to_string(),
            data: if data.is_empty() {
                None
            } else {
                Some(data.join(" "))
            },
            width: dimension("width")?,
            height: dimension("height")?,
        })
    }

    pub fn read_from(name: &str, path: &Path) -> Result<CutPath, ProductionError> {
        let text = std::fs::read_to_string(path)?;
        CutPath::parse_svg(name, &text)
    }
}

pub(crate) fn path_element(data: &str) -> String {
    format!(
        "<path d=\"{}\" fill=\"none\" stroke=\"black\" stroke-width=\"{}\" />",
        data, CUT_STROKE_WIDTH
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{GeometrySet, Point, Polygon, Variant};

    fn parse_coords(data: &str) -> Vec<Vec<(f64, f64)>> {
        let mut rings = Vec::new();
        let mut current = Vec::new();
        let tokens: Vec<&str> = data.split_whitespace().collect();
        let mut i = 0;
        while i < tokens.len() {
            match tokens[i] {
                "M" | "L" => {
                    let x: f64 = tokens[i + 1].parse().expect("x");
                    let y: f64 = tokens[i + 2].parse().expect("y");
                    current.push((x, y));
                    i += 3;
                }
                "Z" => {
                    rings.push(std::mem::take(&mut current));
                    i += 1;
                }
                other => panic!("unexpected token {other}"),
            }
        }
        rings
    }

    fn square_with_hole() -> GeometrySet {
        let outer = Ring::rectangle(19, 19, 768, 1068);
        let hole = Ring::from_points(vec![
            Point::new(100, 101),
            Point::new(100, 500),
            Point::new(687, 500),
            Point::new(687, 101),
        ]);
        GeometrySet::new(Variant::Cut, vec![Polygon::new(outer, vec![hole])])
    }

    #[test]
    fn coordinates_scale_by_output_over_input() {
        let emitter = PathEmitter::new(300, 72);
        let geometry = square_with_hole();
        let rings = parse_coords(&emitter.path_data(&geometry));
        assert_eq!(rings.len(), 2);
        let source: Vec<&Ring> = geometry.polygons()[0].rings().collect();
        for (emitted, ring) in rings.iter().zip(source) {
            assert_eq!(emitted.len(), ring.points().len());
            for ((x, y), p) in emitted.iter().zip(ring.points()) {
                assert!((x - p.x as f64 * 0.24).abs() < 5e-5);
                assert!((y - p.y as f64 * 0.24).abs() < 5e-5);
            }
        }
    }

    #[test]
    fn every_ring_closes_on_its_first_point() {
        let emitter = PathEmitter::new(300, 72);
        for ring in parse_coords(&emitter.path_data(&square_with_hole())) {
            assert_eq!(ring.first(), ring.last());
        }
        assert!(emitter
            .ring_data(&Ring::rectangle(0, 0, 1, 1))
            .starts_with("M 0.0000 0.0000 L 0.2400 0.0000"));
    }

    #[test]
    fn empty_geometry_is_still_a_document() {
        let emitter = PathEmitter::new(300, 72);
        let cut = emitter.emit("hero_cut", &GeometrySet::empty(Variant::Cut), (787, 1087));
        assert!(cut.is_empty());
        let svg = cut.to_svg();
        assert!(svg.contains("width=\"189\""));
        assert!(svg.contains("viewBox=\"0 0 189 261\""));
        assert!(!svg.contains("<path"));
        let back = CutPath::parse_svg("hero_cut", &svg).expect("parse");
        assert_eq!(back, cut);
    }

    #[test]
    fn svg_reads_back_path_data() {
        let emitter = PathEmitter::new(300, 72);
        let cut = emitter.emit("frame_cut", &square_with_hole(), (787, 1087));
        let svg = cut.to_svg();
        assert!(svg.contains("fill=\"none\" stroke=\"black\" stroke-width=\"0.5\""));
        let back = CutPath::parse_svg("frame_cut", &svg).expect("parse");
        assert_eq!(back, cut);
    }

    #[test]
    fn malformed_svg_is_an_error() {
        assert!(matches!(
            CutPath::parse_svg("x", "<svg"),
            Err(ProductionError::Svg(_))
        ));
    }
}
