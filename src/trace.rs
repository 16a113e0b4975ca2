use std::collections::{BTreeSet, HashMap, VecDeque};

use image::RgbaImage;

use crate::config::{NestedContours, ProductionConfig};
use crate::error::GeometryWarning;
use crate::geometry::{GeometrySet, Point, Polygon, Ring, Variant};
use crate::mask::Mask;

// Direction order E, S, W, N: clockwise on screen.
const DX: [i64; 4] = [1, 0, -1, 0];
const DY: [i64; 4] = [0, 1, 0, -1];
const EAST: usize = 0;
const WEST: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContourKind {
    Exterior,
    Hole,
}

#[derive(Debug, Clone)]
pub struct ContourNode {
    pub ring: Ring,
    pub kind: ContourKind,
    pub depth: usize,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

/// Containment tree of traced rings, stored as a flat arena.
#[derive(Debug, Clone, Default)]
pub struct ContourTree {
    nodes: Vec<ContourNode>,
    roots: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct TraceResult {
    pub geometry: GeometrySet,
    pub warnings: Vec<GeometryWarning>,
}

/// Extracts boundary rings from a thresholded alpha channel.
///
/// Foreground is 8-connected and background 4-connected, so every boundary
/// is a single closed loop on the pixel-corner grid.
#[derive(Debug, Clone, Copy)]
pub struct ContourTracer {
    threshold: u8,
    nested: NestedContours,
}

impl ContourTracer {
    pub fn new(threshold: u8, nested: NestedContours) -> Self {
        Self { threshold, nested }
    }

    pub fn from_config(config: &ProductionConfig) -> Self {
        Self::new(config.alpha_threshold, config.nested_contours)
    }

    pub fn mask(&self, layer: &RgbaImage) -> Mask {
        Mask::from_alpha(layer, self.threshold)
    }

    pub fn trace(&self, layer: &RgbaImage) -> TraceResult {
        self.trace_mask(&self.mask(layer))
    }

    /// Traces the logical OR of several same-sized layers.
    pub fn trace_union(&self, layers: &[&RgbaImage]) -> TraceResult {
        let Some(first) = layers.first() else {
            return TraceResult {
                geometry: GeometrySet::empty(Variant::Traced),
                warnings: Vec::new(),
            };
        };
        let mut merged = self.mask(first);
        for layer in &layers[1..] {
            merged.union_with(&self.mask(layer));
        }
        self.trace_mask(&merged)
    }

    pub fn trace_mask(&self, mask: &Mask) -> TraceResult {
        let mut warnings = Vec::new();
        let tree = ContourTree::build(mask, &mut warnings);
        let polygons = tree.polygons(self.nested, &mut warnings);
        TraceResult {
            geometry: GeometrySet::new(Variant::Traced, polygons),
            warnings,
        }
    }
}

struct Regions {
    fg: Vec<bool>,
    seeds: Vec<(i64, i64)>,
    parent: Vec<Option<usize>>,
    depth: Vec<usize>,
    children: Vec<Vec<usize>>,
    order: Vec<usize>,
}

/// Labels connected regions on a grid padded by one clear pixel and links
/// them into their adjacency tree, rooted at the outside background.
fn label_regions(mask: &Mask) -> Regions {
    let pw = mask.width() as usize + 2;
    let ph = mask.height() as usize + 2;
    let is_fg = |x: usize, y: usize| mask.get(x as i64 - 1, y as i64 - 1);
    let mut labels = vec![usize::MAX; pw * ph];
    let mut fg = Vec::new();
    let mut seeds = Vec::new();
    let mut stack = Vec::new();

    for y in 0..ph {
        for x in 0..pw {
            if labels[y * pw + x] != usize::MAX {
                continue;
            }
            let id = fg.len();
            let on = is_fg(x, y);
            fg.push(on);
            seeds.push((x as i64 - 1, y as i64 - 1));
            labels[y * pw + x] = id;
            stack.push((x, y));
            while let Some((cx, cy)) = stack.pop() {
                for (ox, oy) in neighbours(on) {
                    let nx = cx as i64 + ox;
                    let ny = cy as i64 + oy;
                    if nx < 0 || ny < 0 || nx >= pw as i64 || ny >= ph as i64 {
                        continue;
                    }
                    let (nx, ny) = (nx as usize, ny as usize);
                    let slot = ny * pw + nx;
                    if labels[slot] == usize::MAX && is_fg(nx, ny) == on {
                        labels[slot] = id;
                        stack.push((nx, ny));
                    }
                }
            }
        }
    }

    let count = fg.len();
    let mut edges = BTreeSet::new();
    for y in 0..ph {
        for x in 0..pw {
            let here = labels[y * pw + x];
            if x + 1 < pw {
                let right = labels[y * pw + x + 1];
                if fg[here] != fg[right] {
                    edges.insert((here.min(right), here.max(right)));
                }
            }
            if y + 1 < ph {
                let below = labels[(y + 1) * pw + x];
                if fg[here] != fg[below] {
                    edges.insert((here.min(below), here.max(below)));
                }
            }
        }
    }
    let mut adjacent = vec![Vec::new(); count];
    for (a, b) in edges {
        adjacent[a].push(b);
        adjacent[b].push(a);
    }

    let mut parent = vec![None; count];
    let mut depth = vec![0usize; count];
    let mut children = vec![Vec::new(); count];
    let mut visited = vec![false; count];
    let mut order = Vec::with_capacity(count);
    let mut queue = VecDeque::new();
    if count > 0 {
        visited[0] = true;
        queue.push_back(0usize);
    }
    while let Some(region) = queue.pop_front() {
        order.push(region);
        for &next in &adjacent[region] {
            if visited[next] {
                continue;
            }
            visited[next] = true;
            parent[next] = Some(region);
            depth[next] = depth[region] + 1;
            children[region].push(next);
            queue.push_back(next);
        }
    }

    Regions {
        fg,
        seeds,
        parent,
        depth,
        children,
        order,
    }
}

fn neighbours(foreground: bool) -> &'static [(i64, i64)] {
    const FOUR: [(i64, i64); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];
    const EIGHT: [(i64, i64); 8] = [
        (1, 0),
        (-1, 0),
        (0, 1),
        (0, -1),
        (1, 1),
        (1, -1),
        (-1, 1),
        (-1, -1),
    ];
    if foreground { &EIGHT } else { &FOUR }
}

/// Pixels ahead-left and ahead-right of the unit edge leaving (x, y) in `dir`.
fn side_pixels(x: i64, y: i64, dir: usize) -> ((i64, i64), (i64, i64)) {
    match dir {
        0 => ((x, y - 1), (x, y)),
        1 => ((x, y), (x - 1, y)),
        2 => ((x - 1, y), (x - 1, y - 1)),
        _ => ((x - 1, y - 1), (x, y - 1)),
    }
}

fn next_direction(mask: &Mask, x: i64, y: i64, dir: usize) -> usize {
    let ((lx, ly), (rx, ry)) = side_pixels(x, y, dir);
    if mask.get(lx, ly) {
        (dir + 3) % 4
    } else if mask.get(rx, ry) {
        dir
    } else {
        (dir + 1) % 4
    }
}

/// Walks one boundary with foreground on the right, recording corners.
fn follow_boundary(mask: &Mask, start: Point, start_dir: usize) -> Vec<Point> {
    let mut corners = vec![start];
    let (mut x, mut y, mut dir) = (start.x, start.y, start_dir);
    let limit = 4 * (mask.width() as usize + 2) * (mask.height() as usize + 2);
    for _ in 0..limit {
        x += DX[dir];
        y += DY[dir];
        let next = next_direction(mask, x, y, dir);
        if x == start.x && y == start.y && next == start_dir {
            return corners;
        }
        if next != dir {
            corners.push(Point::new(x, y));
        }
        dir = next;
    }
    log::warn!("boundary walk from {:?} did not close", start);
    corners
}

/// Splits a loop that revisits a vertex into simple loops.
fn split_pinches(points: Vec<Point>) -> Vec<Vec<Point>> {
    let mut loops = Vec::new();
    let mut stack: Vec<Point> = Vec::with_capacity(points.len());
    let mut seen: HashMap<Point, usize> = HashMap::new();
    for p in points {
        if let Some(&at) = seen.get(&p) {
            let tail: Vec<Point> = stack.drain(at + 1..).collect();
            for q in &tail {
                seen.remove(q);
            }
            let mut piece = Vec::with_capacity(tail.len() + 1);
            piece.push(p);
            piece.extend(tail);
            loops.push(piece);
        } else {
            seen.insert(p, stack.len());
            stack.push(p);
        }
    }
    loops.push(stack);
    loops
}

/// Drops repeated, collinear and spike vertices from an open loop.
fn simplify(mut points: Vec<Point>) -> Vec<Point> {
    points.dedup();
    while points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    loop {
        let n = points.len();
        if n < 3 {
            return points;
        }
        let keep: Vec<bool> = (0..n)
            .map(|i| {
                let a = points[(i + n - 1) % n];
                let b = points[i];
                let c = points[(i + 1) % n];
                let cross = (b.x - a.x) * (c.y - b.y) - (b.y - a.y) * (c.x - b.x);
                cross != 0
            })
            .collect();
        if keep.iter().all(|k| *k) {
            return points;
        }
        points = points
            .into_iter()
            .zip(keep)
            .filter_map(|(p, k)| k.then_some(p))
            .collect();
        points.dedup();
    }
}

/// Starts the loop at its top-most, left-most vertex.
fn canonical(points: Vec<Point>) -> Vec<Point> {
    let Some(start) = points
        .iter()
        .enumerate()
        .min_by_key(|(_, p)| (p.y, p.x))
        .map(|(i, _)| i)
    else {
        return points;
    };
    let mut rotated = points[start..].to_vec();
    rotated.extend_from_slice(&points[..start]);
    rotated
}

/// Repairs a raw boundary into valid rings of the expected orientation.
fn repair(raw: Vec<Point>, kind: ContourKind, warnings: &mut Vec<GeometryWarning>) -> Vec<Ring> {
    let mut rings = Vec::new();
    for piece in split_pinches(raw) {
        let cleaned = simplify(piece);
        if cleaned.len() < 3 {
            if !cleaned.is_empty() {
                let warning = GeometryWarning::InvalidPolygonRepair {
                    detail: format!("{} vertices left", cleaned.len()),
                };
                log::warn!("{}", warning);
                warnings.push(warning);
            }
            continue;
        }
        let ring = Ring::from_points(canonical(cleaned));
        let area2 = ring.signed_area2();
        let expected = match kind {
            ContourKind::Exterior => area2 > 0,
            ContourKind::Hole => area2 < 0,
        };
        if area2 == 0 || !expected || ring.points().len() < 4 {
            let warning = GeometryWarning::InvalidPolygonRepair {
                detail: format!("{:?} ring with twice-area {}", kind, area2),
            };
            log::warn!("{}", warning);
            warnings.push(warning);
            continue;
        }
        rings.push(ring);
    }
    rings
}

impl ContourTree {
    pub fn build(mask: &Mask, warnings: &mut Vec<GeometryWarning>) -> ContourTree {
        let regions = label_regions(mask);
        let mut tree = ContourTree::default();
        // hole node indices per background region
        let mut hole_nodes: HashMap<usize, Vec<usize>> = HashMap::new();

        for &region in &regions.order {
            if !regions.fg[region] {
                continue;
            }
            let (sx, sy) = regions.seeds[region];
            let outer = follow_boundary(mask, Point::new(sx, sy), EAST);
            let enclosing = regions
                .parent[region]
                .and_then(|p| hole_nodes.get(&p))
                .cloned()
                .unwrap_or_default();
            let mut exteriors = Vec::new();
            for ring in repair(outer, ContourKind::Exterior, warnings) {
                let parent = tree.enclosing(&enclosing, &ring);
                exteriors.push(tree.push(ring, ContourKind::Exterior, parent));
            }
            if exteriors.is_empty() {
                continue;
            }

            for &child in &regions.children[region] {
                let (bx, by) = regions.seeds[child];
                let raw = follow_boundary(mask, Point::new(bx + 1, by), WEST);
                for ring in repair(raw, ContourKind::Hole, warnings) {
                    let parent = tree.enclosing(&exteriors, &ring).or(exteriors.first().copied());
                    let node = tree.push(ring, ContourKind::Hole, parent);
                    hole_nodes.entry(child).or_default().push(node);
                }
            }
        }
        log::trace!(
            "contour tree: {} nodes over {} regions (max depth {})",
            tree.nodes.len(),
            regions.order.len(),
            regions.depth.iter().max().copied().unwrap_or(0)
        );
        tree
    }

    fn push(&mut self, ring: Ring, kind: ContourKind, parent: Option<usize>) -> usize {
        let index = self.nodes.len();
        let depth = parent.map(|p| self.nodes[p].depth + 1).unwrap_or(0);
        self.nodes.push(ContourNode {
            ring,
            kind,
            depth,
            parent,
            children: Vec::new(),
        });
        match parent {
            Some(p) => self.nodes[p].children.push(index),
            None => self.roots.push(index),
        }
        index
    }

    fn enclosing(&self, candidates: &[usize], ring: &Ring) -> Option<usize> {
        let (x, y) = ring.interior_sample()?;
        candidates
            .iter()
            .copied()
            .find(|&c| self.nodes[c].ring.contains(x, y))
    }

    pub fn nodes(&self) -> &[ContourNode] {
        &self.nodes
    }

    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// One polygon per exterior with its direct hole children. Islands
    /// inside holes are promoted or skipped per `nested`.
    pub fn polygons(&self, nested: NestedContours, warnings: &mut Vec<GeometryWarning>) -> Vec<Polygon> {
        let mut out = Vec::new();
        for node in &self.nodes {
            if node.kind != ContourKind::Exterior {
                continue;
            }
            if node.depth > 0 {
                let promoted = nested == NestedContours::Promote;
                let warning = GeometryWarning::NestedIsland {
                    depth: node.depth,
                    promoted,
                };
                log::warn!("{}", warning);
                warnings.push(warning);
                if !promoted {
                    continue;
                }
            }
            let holes = node
                .children
                .iter()
                .map(|&c| &self.nodes[c])
                .filter(|child| child.kind == ContourKind::Hole)
                .map(|child| child.ring.clone())
                .collect();
            out.push(Polygon::new(node.ring.clone(), holes));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Bounds;

    fn mask_from(rows: &[&str]) -> Mask {
        let mut m = Mask::new(rows[0].len() as u32, rows.len() as u32);
        for (y, row) in rows.iter().enumerate() {
            for (x, c) in row.chars().enumerate() {
                m.set(x as u32, y as u32, c == '#');
            }
        }
        m
    }

    fn tracer() -> ContourTracer {
        ContourTracer::new(128, NestedContours::Promote)
    }

    fn pts(ring: &Ring) -> Vec<(i64, i64)> {
        ring.points().iter().map(|p| (p.x, p.y)).collect()
    }

    #[test]
    fn single_block_traces_clockwise_from_top_left() {
        let m = mask_from(&["....", ".##.", ".##.", "...."]);
        let result = tracer().trace_mask(&m);
        let polys = result.geometry.polygons();
        assert_eq!(polys.len(), 1);
        assert_eq!(
            pts(polys[0].exterior()),
            vec![(1, 1), (3, 1), (3, 3), (1, 3), (1, 1)]
        );
        assert!(polys[0].holes().is_empty());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn ring_shape_produces_counter_clockwise_hole() {
        let m = mask_from(&["#####", "#...#", "#...#", "#####"]);
        let polys = tracer().trace_mask(&m).geometry;
        let poly = &polys.polygons()[0];
        assert_eq!(poly.holes().len(), 1);
        let hole = &poly.holes()[0];
        assert_eq!(pts(hole), vec![(1, 1), (1, 3), (4, 3), (4, 1), (1, 1)]);
        assert!(hole.signed_area2() < 0);
        let outer = poly.exterior().bounds();
        let inner = hole.bounds();
        assert!(outer.contains(&inner));
        assert!(inner.min_x > outer.min_x && inner.max_y < outer.max_y);
    }

    #[test]
    fn diagonal_touch_is_one_region_split_into_simple_rings() {
        let m = mask_from(&["#..", ".#.", "..."]);
        let result = tracer().trace_mask(&m);
        let polys = result.geometry.polygons();
        assert_eq!(polys.len(), 2);
        let mut areas: Vec<f64> = polys.iter().map(|p| p.area()).collect();
        areas.sort_by(|a, b| a.total_cmp(b));
        assert_eq!(areas, vec![1.0, 1.0]);
        assert!(polys.iter().all(|p| p.exterior().is_closed()));
    }

    #[test]
    fn staircase_keeps_only_corners() {
        let m = mask_from(&["#...", "##..", "###.", "####"]);
        let polys = tracer().trace_mask(&m).geometry;
        let ring = polys.polygons()[0].exterior();
        // ten corners plus the closing point
        assert_eq!(ring.points().len(), 11);
        assert_eq!(ring.area(), 10.0);
    }

    #[test]
    fn islands_are_promoted_or_skipped() {
        let rows = [
            "#######",
            "#.....#",
            "#..#..#",
            "#.....#",
            "#######",
        ];
        let m = mask_from(&rows);
        let mut warnings = Vec::new();
        let tree = ContourTree::build(&m, &mut warnings);
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.roots().len(), 1);
        let island = tree
            .nodes()
            .iter()
            .find(|n| n.depth == 2)
            .expect("island node");
        assert_eq!(island.kind, ContourKind::Exterior);
        let hole = island.parent.expect("parent");
        assert_eq!(tree.nodes()[hole].kind, ContourKind::Hole);
        assert!(tree.nodes()[hole].children.contains(&2));

        let promoted = tree.polygons(NestedContours::Promote, &mut warnings);
        assert_eq!(promoted.len(), 2);
        let skipped = tree.polygons(NestedContours::Skip, &mut warnings);
        assert_eq!(skipped.len(), 1);
        assert!(warnings
            .iter()
            .any(|w| matches!(w, GeometryWarning::NestedIsland { promoted: false, .. })));
    }

    #[test]
    fn touching_canvas_edges_is_bounded_by_canvas() {
        let m = mask_from(&["###", "###"]);
        let polys = tracer().trace_mask(&m).geometry;
        assert_eq!(
            polys.polygons()[0].bounds(),
            Bounds { min_x: 0, min_y: 0, max_x: 3, max_y: 2 }
        );
    }

    #[test]
    fn union_merges_overlapping_layers() {
        let mut a = RgbaImage::new(10, 10);
        let mut b = RgbaImage::new(10, 10);
        for y in 2..6 {
            for x in 2..6 {
                a.put_pixel(x, y, image::Rgba([0, 0, 0, 255]));
                b.put_pixel(x + 2, y + 2, image::Rgba([0, 0, 0, 200]));
            }
        }
        let result = tracer().trace_union(&[&a, &b]);
        assert_eq!(result.geometry.polygons().len(), 1);
        assert_eq!(result.geometry.polygons()[0].area(), 28.0);
    }

    #[test]
    fn soft_alpha_below_threshold_is_ignored() {
        let mut img = RgbaImage::new(6, 6);
        img.put_pixel(1, 1, image::Rgba([0, 0, 0, 127]));
        img.put_pixel(4, 4, image::Rgba([0, 0, 0, 128]));
        let result = tracer().trace(&img);
        assert_eq!(result.geometry.polygons().len(), 1);
        assert_eq!(result.geometry.polygons()[0].bounds().min_x, 4);
    }
}
