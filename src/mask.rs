use image::RgbaImage;

use crate::geometry::Polygon;

/// Binary coverage grid in canvas pixels. Reads outside the grid are clear.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

impl Mask {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bits: vec![false; width as usize * height as usize],
        }
    }

    /// Opaque where alpha >= `threshold`.
    pub fn from_alpha(img: &RgbaImage, threshold: u8) -> Self {
        let bits = img.pixels().map(|p| p.0[3] >= threshold).collect();
        Self {
            width: img.width(),
            height: img.height(),
            bits,
        }
    }

    /// Pixel-centre, even-odd fill of polygon rings.
    pub fn from_polygons<'a>(
        width: u32,
        height: u32,
        polygons: impl IntoIterator<Item = &'a Polygon>,
    ) -> Self {
        let mut mask = Mask::new(width, height);
        let rings: Vec<&[crate::geometry::Point]> = polygons
            .into_iter()
            .flat_map(|poly| poly.rings())
            .map(|ring| ring.points())
            .collect();
        let mut crossings: Vec<f64> = Vec::new();
        for y in 0..height {
            let sy = y as f64 + 0.5;
            crossings.clear();
            for ring in &rings {
                for edge in ring.windows(2) {
                    let (a, b) = (edge[0], edge[1]);
                    let (ay, by) = (a.y as f64, b.y as f64);
                    if (ay <= sy) == (by <= sy) {
                        continue;
                    }
                    let t = (sy - ay) / (by - ay);
                    crossings.push(a.x as f64 + t * (b.x as f64 - a.x as f64));
                }
            }
            crossings.sort_by(|a, b| a.total_cmp(b));
            for pair in crossings.chunks_exact(2) {
                // centres x + 0.5 inside [pair0, pair1)
                let start = (pair[0] - 0.5).ceil().max(0.0) as i64;
                let end = (pair[1] - 0.5).ceil().min(width as f64) as i64;
                for x in start..end {
                    let idx = mask.index(x as u32, y);
                    mask.bits[idx] = !mask.bits[idx];
                }
            }
        }
        mask
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    pub fn get(&self, x: i64, y: i64) -> bool {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return false;
        }
        self.bits[self.index(x as u32, y as u32)]
    }

    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        if x < self.width && y < self.height {
            let idx = self.index(x, y);
            self.bits[idx] = value;
        }
    }

    pub fn count(&self) -> usize {
        self.bits.iter().filter(|b| **b).count()
    }

    pub fn is_empty(&self) -> bool {
        !self.bits.iter().any(|b| *b)
    }

    pub fn union_with(&mut self, other: &Mask) {
        for (a, b) in self.bits.iter_mut().zip(&other.bits) {
            *a |= *b;
        }
    }

    pub fn subtract(&mut self, other: &Mask) {
        for (a, b) in self.bits.iter_mut().zip(&other.bits) {
            *a &= !*b;
        }
    }

    /// Grows coverage by a Euclidean disk of `radius` pixels.
    pub fn dilate(&self, radius: u32) -> Mask {
        if radius == 0 {
            return self.clone();
        }
        let limit = disk_limit(radius);
        let dist = squared_distance_to(self.width, self.height, 0, |x, y| self.get(x, y));
        let bits = dist.iter().map(|d| *d <= limit).collect();
        Mask {
            width: self.width,
            height: self.height,
            bits,
        }
    }

    /// Shrinks coverage by a Euclidean disk; pixels beyond the edge count
    /// as clear.
    pub fn erode(&self, radius: u32) -> Mask {
        if radius == 0 {
            return self.clone();
        }
        let limit = disk_limit(radius);
        let dist = squared_distance_to(self.width, self.height, 1, |x, y| !self.get(x, y));
        let bits = self
            .bits
            .iter()
            .zip(&dist)
            .map(|(on, d)| *on && *d > limit)
            .collect();
        Mask {
            width: self.width,
            height: self.height,
            bits,
        }
    }
}

/// Squared centre distance still inside an offset of `radius`. Boundaries sit
/// half a pixel from centres, hence (r + 0.5)^2 floored.
fn disk_limit(radius: u32) -> u64 {
    let r = radius as u64;
    r * r + r
}

const FAR: f64 = 1e18;

/// Exact squared Euclidean distance from every canvas pixel to the nearest
/// pixel where `source` holds, scanning `pad` extra pixels around the canvas.
fn squared_distance_to(
    width: u32,
    height: u32,
    pad: u32,
    source: impl Fn(i64, i64) -> bool,
) -> Vec<u64> {
    let pw = (width + pad * 2) as usize;
    let ph = (height + pad * 2) as usize;
    let mut grid = vec![FAR; pw * ph];
    for y in 0..ph {
        for x in 0..pw {
            if source(x as i64 - pad as i64, y as i64 - pad as i64) {
                grid[y * pw + x] = 0.0;
            }
        }
    }

    let mut f = vec![0.0; pw.max(ph)];
    let mut d = vec![0.0; pw.max(ph)];
    let mut v = vec![0usize; pw.max(ph)];
    let mut z = vec![0.0; pw.max(ph) + 1];
    for x in 0..pw {
        for y in 0..ph {
            f[y] = grid[y * pw + x];
        }
        lower_envelope(&f[..ph], &mut d[..ph], &mut v, &mut z);
        for y in 0..ph {
            grid[y * pw + x] = d[y];
        }
    }
    for y in 0..ph {
        f[..pw].copy_from_slice(&grid[y * pw..(y + 1) * pw]);
        lower_envelope(&f[..pw], &mut d[..pw], &mut v, &mut z);
        grid[y * pw..(y + 1) * pw].copy_from_slice(&d[..pw]);
    }

    let mut out = Vec::with_capacity(width as usize * height as usize);
    for y in 0..height as usize {
        for x in 0..width as usize {
            let value = grid[(y + pad as usize) * pw + x + pad as usize];
            out.push(if value >= FAR { u64::MAX } else { value as u64 });
        }
    }
    out
}

// Felzenszwalb & Huttenlocher 1-D squared distance pass.
fn lower_envelope(f: &[f64], d: &mut [f64], v: &mut [usize], z: &mut [f64]) {
    let n = f.len();
    if n == 0 {
        return;
    }
    let Some(first) = f.iter().position(|value| *value < FAR) else {
        d.fill(FAR);
        return;
    };
    let mut k = 0usize;
    v[0] = first;
    z[0] = f64::NEG_INFINITY;
    z[1] = f64::INFINITY;
    for q in first + 1..n {
        if f[q] >= FAR {
            continue;
        }
        let qf = q as f64;
        loop {
            let p = v[k] as f64;
            let s = ((f[q] + qf * qf) - (f[v[k]] + p * p)) / (2.0 * qf - 2.0 * p);
            // z[0] is -inf, so this never pops past the first parabola
            if s <= z[k] && k > 0 {
                k -= 1;
                continue;
            }
            k += 1;
            v[k] = q;
            z[k] = s;
            z[k + 1] = f64::INFINITY;
            break;
        }
    }
    k = 0;
    for (q, out) in d.iter_mut().enumerate().take(n) {
        let qf = q as f64;
        while z[k + 1] < qf {
            k += 1;
        }
        let p = v[k] as f64;
        *out = (qf - p) * (qf - p) + f[v[k]];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Ring;

    fn rect_mask(w: u32, h: u32, x0: u32, y0: u32, x1: u32, y1: u32) -> Mask {
        let mut m = Mask::new(w, h);
        for y in y0..y1 {
            for x in x0..x1 {
                m.set(x, y, true);
            }
        }
        m
    }

    #[test]
    fn dilate_and_erode_move_straight_edges_by_radius() {
        let m = rect_mask(60, 60, 20, 20, 40, 40);
        let grown = m.dilate(6);
        assert!(grown.get(14, 30));
        assert!(!grown.get(13, 30));
        assert!(grown.get(45, 30));
        assert!(!grown.get(46, 30));

        let shrunk = m.erode(6);
        assert!(!shrunk.get(25, 30));
        assert!(shrunk.get(26, 30));
        assert!(shrunk.get(33, 30));
        assert!(!shrunk.get(34, 30));
    }

    #[test]
    fn erode_treats_outside_as_clear() {
        let m = rect_mask(20, 20, 0, 0, 20, 20);
        let shrunk = m.erode(3);
        assert!(!shrunk.get(2, 10));
        assert!(shrunk.get(3, 10));
        assert_eq!(shrunk.count(), 14 * 14);
    }

    #[test]
    fn erode_can_collapse_to_empty() {
        let m = rect_mask(30, 30, 10, 10, 18, 18);
        assert!(m.erode(6).is_empty());
    }

    #[test]
    fn dilated_corners_are_round() {
        let m = rect_mask(40, 40, 20, 20, 21, 21);
        let grown = m.dilate(6);
        // (6,0) offset is inside, (5,5) has d^2 = 50 > 42
        assert!(grown.get(26, 20));
        assert!(!grown.get(25, 25));
        assert!(grown.get(24, 24));
    }

    #[test]
    fn polygon_fill_respects_holes() {
        let outer = Ring::rectangle(2, 2, 12, 12);
        let hole = Ring::rectangle(5, 5, 8, 8).reversed();
        let poly = crate::geometry::Polygon::new(outer, vec![hole]);
        let m = Mask::from_polygons(16, 16, [&poly]);
        assert_eq!(m.count(), 100 - 9);
        assert!(m.get(2, 2));
        assert!(!m.get(12, 12));
        assert!(!m.get(6, 6));
    }
}
