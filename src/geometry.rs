use crate::config::ProductionConfig;
use crate::error::GeometryWarning;
use crate::mask::Mask;
use crate::trace::ContourTracer;

/// Integer vertex on the pixel-corner grid of a canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Point {
    pub x: i64,
    pub y: i64,
}

impl Point {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub min_x: i64,
    pub min_y: i64,
    pub max_x: i64,
    pub max_y: i64,
}

impl Bounds {
    pub fn contains(&self, other: &Bounds) -> bool {
        self.min_x <= other.min_x
            && self.min_y <= other.min_y
            && self.max_x >= other.max_x
            && self.max_y >= other.max_y
    }

    /// True when every edge lies within `reach` of the matching canvas edge.
    pub fn spans(&self, width: u32, height: u32, reach: i64) -> bool {
        self.min_x <= reach
            && self.min_y <= reach
            && self.max_x >= width as i64 - reach
            && self.max_y >= height as i64 - reach
    }
}

/// Closed vertex loop; the first point is repeated at the end.
///
/// Exteriors run clockwise on screen (positive area in y-down coordinates),
/// holes counter-clockwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ring {
    points: Vec<Point>,
}

impl Ring {
    /// Closes `points` if needed. Callers pass at least one point.
    pub fn from_points(mut points: Vec<Point>) -> Self {
        if let (Some(first), Some(last)) = (points.first().copied(), points.last().copied()) {
            if first != last {
                points.push(first);
            }
        }
        Self { points }
    }

    /// Axis-aligned exterior ring from (x0, y0) to (x1, y1), clockwise.
    pub fn rectangle(x0: i64, y0: i64, x1: i64, y1: i64) -> Self {
        Ring::from_points(vec![
            Point::new(x0, y0),
            Point::new(x1, y0),
            Point::new(x1, y1),
            Point::new(x0, y1),
        ])
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn is_closed(&self) -> bool {
        self.points.len() >= 2 && self.points.first() == self.points.last()
    }

    /// Twice the signed area; positive for clockwise-on-screen rings.
    pub fn signed_area2(&self) -> i64 {
        self.points
            .windows(2)
            .map(|w| w[0].x * w[1].y - w[1].x * w[0].y)
            .sum()
    }

    pub fn area(&self) -> f64 {
        self.signed_area2().abs() as f64 / 2.0
    }

    pub fn bounds(&self) -> Bounds {
        let mut b = Bounds {
            min_x: i64::MAX,
            min_y: i64::MAX,
            max_x: i64::MIN,
            max_y: i64::MIN,
        };
        for p in &self.points {
            b.min_x = b.min_x.min(p.x);
            b.min_y = b.min_y.min(p.y);
            b.max_x = b.max_x.max(p.x);
            b.max_y = b.max_y.max(p.y);
        }
        b
    }

    pub fn reversed(&self) -> Ring {
        let mut points = self.points.clone();
        points.reverse();
        Ring { points }
    }

    /// Even-odd point test.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let mut inside = false;
        for w in self.points.windows(2) {
            let (a, b) = (w[0], w[1]);
            let (ay, by) = (a.y as f64, b.y as f64);
            if (ay > y) != (by > y) {
                let cross = a.x as f64 + (y - ay) / (by - ay) * (b.x as f64 - a.x as f64);
                if x < cross {
                    inside = !inside;
                }
            }
        }
        inside
    }

    /// A pixel centre strictly inside the area this ring encloses.
    pub fn interior_sample(&self) -> Option<(f64, f64)> {
        let a = *self.points.first()?;
        let b = *self.points.get(1)?;
        let dx = (b.x - a.x).signum() as f64;
        let dy = (b.y - a.y).signum() as f64;
        // right-hand normal in y-down space
        let (mut nx, mut ny) = (-dy, dx);
        if self.signed_area2() < 0 {
            nx = -nx;
            ny = -ny;
        }
        Some((
            a.x as f64 + 0.5 * dx + 0.5 * nx,
            a.y as f64 + 0.5 * dy + 0.5 * ny,
        ))
    }
}

/// Exterior ring plus holes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Polygon {
    exterior: Ring,
    holes: Vec<Ring>,
}

impl Polygon {
    pub fn new(exterior: Ring, holes: Vec<Ring>) -> Self {
        Self { exterior, holes }
    }

    pub fn exterior(&self) -> &Ring {
        &self.exterior
    }

    pub fn holes(&self) -> &[Ring] {
        &self.holes
    }

    pub fn rings(&self) -> impl Iterator<Item = &Ring> {
        std::iter::once(&self.exterior).chain(self.holes.iter())
    }

    pub fn bounds(&self) -> Bounds {
        self.exterior.bounds()
    }

    pub fn area(&self) -> f64 {
        self.exterior.area() - self.holes.iter().map(Ring::area).sum::<f64>()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Traced,
    Cut,
    Spacer,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Traced => "traced",
            Variant::Cut => "cut",
            Variant::Spacer => "spacer",
        }
    }
}

/// All polygons for one layer, tagged by variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeometrySet {
    variant: Variant,
    polygons: Vec<Polygon>,
}

impl GeometrySet {
    pub fn new(variant: Variant, polygons: Vec<Polygon>) -> Self {
        Self { variant, polygons }
    }

    pub fn empty(variant: Variant) -> Self {
        Self::new(variant, Vec::new())
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn polygons(&self) -> &[Polygon] {
        &self.polygons
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    pub fn ring_count(&self) -> usize {
        self.polygons.iter().map(|p| 1 + p.holes().len()).sum()
    }
}

#[derive(Debug, Clone)]
pub struct ProcessedGeometry {
    pub cut: GeometrySet,
    pub spacer: GeometrySet,
    pub warnings: Vec<GeometryWarning>,
}

/// Turns traced layer geometry into the cut and spacer variants.
#[derive(Debug, Clone)]
pub struct GeometryProcessor {
    width: u32,
    height: u32,
    trim_inset: u32,
    spacer_inset: u32,
    tolerance: u32,
    tracer: ContourTracer,
}

impl GeometryProcessor {
    pub fn new(
        canvas: (u32, u32),
        trim_inset: u32,
        spacer_inset: u32,
        tolerance: u32,
        tracer: ContourTracer,
    ) -> Self {
        Self {
            width: canvas.0,
            height: canvas.1,
            trim_inset,
            spacer_inset,
            tolerance,
            tracer,
        }
    }

    pub fn from_config(config: &ProductionConfig) -> Self {
        Self::new(
            config.canvas_px(),
            config.trim_inset_px(),
            config.spacer_inset_px(),
            config.outer_border_tolerance_px,
            ContourTracer::from_config(config),
        )
    }

    pub fn trim_ring(&self) -> Ring {
        let i = self.trim_inset as i64;
        Ring::rectangle(i, i, self.width as i64 - i, self.height as i64 - i)
    }

    /// Spans the canvas edge to edge, whatever its area.
    pub fn is_outer_border(&self, polygon: &Polygon) -> bool {
        polygon
            .bounds()
            .spans(self.width, self.height, self.tolerance as i64)
    }

    fn is_trim_border(&self, polygon: &Polygon) -> bool {
        polygon.bounds().spans(
            self.width,
            self.height,
            (self.trim_inset + self.tolerance) as i64,
        )
    }

    /// Outer borders become the trim rectangle, keeping their holes.
    pub fn cut(&self, traced: &GeometrySet) -> GeometrySet {
        let polygons = traced
            .polygons()
            .iter()
            .map(|poly| {
                if self.is_outer_border(poly) {
                    Polygon::new(self.trim_ring(), poly.holes().to_vec())
                } else {
                    poly.clone()
                }
            })
            .collect();
        GeometrySet::new(Variant::Cut, polygons)
    }

    /// Flush border with grown holes, shrunk interior shapes, re-merged.
    /// Shapes that merely come close to the canvas edges stay shrunk.
    pub fn spacer(&self, cut: &GeometrySet, warnings: &mut Vec<GeometryWarning>) -> GeometrySet {
        let (w, h) = (self.width, self.height);
        let trim = self.trim_ring();
        let mut merged = Mask::new(w, h);
        let mut has_border = false;
        for (index, poly) in cut.polygons().iter().enumerate() {
            if poly.exterior() == &trim {
                has_border = true;
                let mut shape = Mask::from_polygons(w, h, [&Polygon::new(trim.clone(), Vec::new())]);
                if !poly.holes().is_empty() {
                    let windows: Vec<Polygon> = poly
                        .holes()
                        .iter()
                        .map(|hole| Polygon::new(hole.reversed(), Vec::new()))
                        .collect();
                    shape.subtract(&Mask::from_polygons(w, h, &windows).dilate(self.spacer_inset));
                }
                merged.union_with(&shape);
                continue;
            }
            let shrunk = Mask::from_polygons(w, h, [poly]).erode(self.spacer_inset);
            if shrunk.is_empty() {
                let warning = GeometryWarning::CollapsedSpacerShape { polygon: index };
                log::warn!("{}", warning);
                warnings.push(warning);
                continue;
            }
            merged.union_with(&shrunk);
        }

        let traced = self.tracer.trace_mask(&merged);
        warnings.extend(traced.warnings);
        // only the region that grew from the trim border snaps back to it
        let corner = trim.interior_sample();
        let is_border_region = |poly: &Polygon| {
            has_border
                && self.is_trim_border(poly)
                && corner.is_some_and(|(x, y)| poly.exterior().contains(x, y))
        };
        let polygons = traced
            .geometry
            .polygons()
            .iter()
            .map(|poly| {
                if is_border_region(poly) {
                    Polygon::new(trim.clone(), poly.holes().to_vec())
                } else {
                    poly.clone()
                }
            })
            .collect();
        GeometrySet::new(Variant::Spacer, polygons)
    }

    pub fn process(&self, traced: &GeometrySet, layer: &str) -> ProcessedGeometry {
        let mut warnings = Vec::new();
        let cut = self.cut(traced);
        if cut.is_empty() {
            let warning = GeometryWarning::EmptyGeometry {
                layer: layer.to_string(),
            };
            log::warn!("{}", warning);
            warnings.push(warning);
        }
        let spacer = self.spacer(&cut, &mut warnings);
        log::debug!(
            "{}: {} cut rings, {} spacer rings",
            layer,
            cut.ring_count(),
            spacer.ring_count()
        );
        ProcessedGeometry {
            cut,
            spacer,
            warnings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NestedContours;

    const W: u32 = 120;
    const H: u32 = 160;

    fn processor() -> GeometryProcessor {
        GeometryProcessor::new((W, H), 10, 4, 5, ContourTracer::new(128, NestedContours::Promote))
    }

    fn fill(mask: &mut Mask, x0: u32, y0: u32, x1: u32, y1: u32, on: bool) {
        for y in y0..y1 {
            for x in x0..x1 {
                mask.set(x, y, on);
            }
        }
    }

    fn traced(mask: &Mask) -> GeometrySet {
        processor().tracer.trace_mask(mask).geometry
    }

    #[test]
    fn ring_area_sign_tracks_orientation() {
        let ring = Ring::rectangle(0, 0, 4, 3);
        assert_eq!(ring.signed_area2(), 24);
        assert_eq!(ring.reversed().signed_area2(), -24);
        assert!(ring.is_closed());
        assert!(ring.contains(1.5, 1.5));
        assert!(!ring.contains(4.5, 1.5));
    }

    #[test]
    fn interior_sample_lands_inside_either_orientation() {
        let ring = Ring::rectangle(3, 3, 9, 9);
        let (x, y) = ring.interior_sample().expect("sample");
        assert!(ring.contains(x, y));
        let hole = ring.reversed();
        let (x, y) = hole.interior_sample().expect("sample");
        assert!(hole.contains(x, y));
    }

    #[test]
    fn frame_with_window_becomes_trim_rect_with_window() {
        let mut mask = Mask::new(W, H);
        fill(&mut mask, 0, 0, W, H, true);
        fill(&mut mask, 30, 40, 90, 120, false);
        // ragged outline must not leak into the cut
        fill(&mut mask, 0, 0, 3, 7, false);

        let p = processor();
        let cut = p.cut(&traced(&mask));
        assert_eq!(cut.polygons().len(), 1);
        let frame = &cut.polygons()[0];
        assert_eq!(frame.exterior(), &p.trim_ring());
        assert_eq!(frame.holes().len(), 1);
        assert_eq!(frame.holes()[0].bounds(), Bounds { min_x: 30, min_y: 40, max_x: 90, max_y: 120 });
    }

    #[test]
    fn interior_shapes_pass_through_cut_unchanged() {
        let mut mask = Mask::new(W, H);
        fill(&mut mask, 40, 50, 70, 90, true);
        let traced = traced(&mask);
        let cut = processor().cut(&traced);
        assert_eq!(cut.polygons(), traced.polygons());
        assert_eq!(cut.variant(), Variant::Cut);
    }

    #[test]
    fn spacer_keeps_border_flush_and_grows_windows() {
        let mut mask = Mask::new(W, H);
        fill(&mut mask, 0, 0, W, H, true);
        fill(&mut mask, 30, 40, 90, 120, false);
        let p = processor();
        let cut = p.cut(&traced(&mask));
        let mut warnings = Vec::new();
        let spacer = p.spacer(&cut, &mut warnings);
        assert!(warnings.is_empty());
        assert_eq!(spacer.polygons().len(), 1);
        assert_eq!(spacer.polygons()[0].exterior(), cut.polygons()[0].exterior());
        let window = spacer.polygons()[0].holes()[0].bounds();
        assert_eq!(window, Bounds { min_x: 26, min_y: 36, max_x: 94, max_y: 124 });
    }

    #[test]
    fn spacer_shrinks_interior_and_drops_collapsed() {
        let mut mask = Mask::new(W, H);
        fill(&mut mask, 40, 50, 70, 90, true);
        fill(&mut mask, 100, 20, 105, 25, true);
        let p = processor();
        let cut = p.cut(&traced(&mask));
        assert_eq!(cut.polygons().len(), 2);
        let mut warnings = Vec::new();
        let spacer = p.spacer(&cut, &mut warnings);
        assert_eq!(spacer.polygons().len(), 1);
        assert_eq!(
            spacer.polygons()[0].bounds(),
            Bounds { min_x: 44, min_y: 54, max_x: 66, max_y: 86 }
        );
        assert!(warnings
            .iter()
            .any(|w| matches!(w, GeometryWarning::CollapsedSpacerShape { .. })));
    }

    #[test]
    fn near_edge_shape_stays_inside_its_cut() {
        // ellipse spanning 8..112 x 8..152: inside the trim reach, not a border
        let mut mask = Mask::new(W, H);
        for y in 0..H {
            for x in 0..W {
                let dx = (x as f64 + 0.5 - 60.0) / 52.0;
                let dy = (y as f64 + 0.5 - 80.0) / 72.0;
                if dx * dx + dy * dy <= 1.0 {
                    mask.set(x, y, true);
                }
            }
        }
        let p = processor();
        let cut = p.cut(&traced(&mask));
        assert_eq!(cut.polygons().len(), 1);
        assert!(!p.is_outer_border(&cut.polygons()[0]));

        let mut warnings = Vec::new();
        let spacer = p.spacer(&cut, &mut warnings);
        assert_eq!(spacer.polygons().len(), 1);
        assert_ne!(spacer.polygons()[0].exterior(), &p.trim_ring());

        let cut_px = Mask::from_polygons(W, H, cut.polygons());
        let spacer_px = Mask::from_polygons(W, H, spacer.polygons());
        assert!(!spacer_px.get(12, 12));
        for y in 0..H as i64 {
            for x in 0..W as i64 {
                assert!(!spacer_px.get(x, y) || cut_px.get(x, y), "({x}, {y})");
            }
        }
    }

    #[test]
    fn empty_layer_reports_warning_and_stays_empty() {
        let processed = processor().process(&traced(&Mask::new(W, H)), "hero");
        assert!(processed.cut.is_empty());
        assert!(processed.spacer.is_empty());
        assert_eq!(
            processed.warnings,
            vec![GeometryWarning::EmptyGeometry { layer: "hero".to_string() }]
        );
    }
}
