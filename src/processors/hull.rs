//! Three-dimensional convex hull by quickhull.
//!
//! The hull is built in f64 over the sorted, de-duplicated input so the
//! result does not depend on input order. Facets are kept counter-clockwise
//! when seen from outside, and a directed-edge map links every facet to its
//! three neighbours.
//!
//! # Algorithm
//!
//! 1. **Initial simplex**: the farthest pair among the axis extremes, the point
//!    farthest from their line, and the point farthest from that plane
//! 2. **Outside sets**: every other point is attached to the first facet it
//!    lies in front of by more than the tolerance
//! 3. **Expansion**: the farthest outside point of a pending facet is the eye.
//!    The facets it sees are flooded through the edge map. They are removed
//!    and the horizon is re-capped with new facets meeting at the eye
//! 4. **Volume**: signed tetrahedra from each facet to an interior point
//!
//! Inputs with no 3D extent (fewer than four distinct points, or all points
//! coincident, collinear or coplanar within tolerance) produce an empty,
//! zero-volume hull rather than an error.

use std::collections::{HashMap, HashSet};

use log::trace;
use thiserror::Error;

/// Errors raised when the hull cannot be built from finite geometry.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum HullError {
    #[error("non-finite coordinate at input point {index}")]
    NonFinite { index: usize },

    #[error("hull construction did not converge after {iterations} iterations")]
    NoConvergence { iterations: usize },

    #[error("hull topology broken: {0}")]
    Topology(String),

    #[error("hull volume is not finite")]
    NonFiniteVolume,

    #[error("hull volume {hull} exceeds bounding-box volume {bbox}")]
    ExceedsBoundingBox { hull: f64, bbox: f64 },
}

/// Result type for hull operations.
pub type Result<T> = std::result::Result<T, HullError>;

type Vec3 = [f64; 3];

#[inline]
fn sub(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
fn dot(a: Vec3, b: Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
fn cross(a: Vec3, b: Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[inline]
fn norm(a: Vec3) -> f64 {
    dot(a, a).sqrt()
}

/// A closed convex hull.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvexHull {
    /// Hull vertices, in sorted input order.
    pub vertices: Vec<Vec3>,
    /// Triangles indexing `vertices`, counter-clockwise from outside.
    pub faces: Vec<[usize; 3]>,
    /// Enclosed volume, in input units cubed.
    pub volume: f64,
}

impl ConvexHull {
    fn degenerate() -> Self {
        Self {
            vertices: Vec::new(),
            faces: Vec::new(),
            volume: 0.0,
        }
    }

    /// True when the input had no 3D extent.
    pub fn is_degenerate(&self) -> bool {
        self.faces.is_empty()
    }
}

struct Face {
    v: [usize; 3],
    normal: Vec3,
    offset: f64,
    outside: Vec<usize>,
    alive: bool,
}

impl Face {
    fn new(points: &[Vec3], v: [usize; 3]) -> Self {
        let [a, b, c] = v.map(|i| points[i]);
        let n = cross(sub(b, a), sub(c, a));
        let len = norm(n);
        let normal = if len > 0.0 {
            [n[0] / len, n[1] / len, n[2] / len]
        } else {
            [0.0; 3]
        };
        Self {
            v,
            normal,
            offset: dot(normal, a),
            outside: Vec::new(),
            alive: true,
        }
    }

    #[inline]
    fn distance(&self, p: Vec3) -> f64 {
        dot(self.normal, p) - self.offset
    }

    fn edges(&self) -> [(usize, usize); 3] {
        let [a, b, c] = self.v;
        [(a, b), (b, c), (c, a)]
    }
}

/// Sort, normalise signed zeros and drop duplicate points.
fn canonical_points(points: &[Vec3]) -> Result<Vec<Vec3>> {
    let mut pts = Vec::with_capacity(points.len());
    for (index, p) in points.iter().enumerate() {
        if !p.iter().all(|c| c.is_finite()) {
            return Err(HullError::NonFinite { index });
        }
        pts.push([p[0] + 0.0, p[1] + 0.0, p[2] + 0.0]);
    }

    pts.sort_by(|a, b| {
        a[0].total_cmp(&b[0])
            .then(a[1].total_cmp(&b[1]))
            .then(a[2].total_cmp(&b[2]))
    });
    pts.dedup();
    Ok(pts)
}

/// Pick four affinely independent points, or `None` for flat input.
fn initial_simplex(pts: &[Vec3], eps: f64) -> Option<[usize; 4]> {
    let mut extremes = [0usize; 6];
    for axis in 0..3 {
        let (mut lo, mut hi) = (0, 0);
        for (i, p) in pts.iter().enumerate() {
            if p[axis] < pts[lo][axis] {
                lo = i;
            }
            if p[axis] > pts[hi][axis] {
                hi = i;
            }
        }
        extremes[2 * axis] = lo;
        extremes[2 * axis + 1] = hi;
    }

    let (mut a, mut b, mut best) = (0, 0, -1.0);
    for (k, &i) in extremes.iter().enumerate() {
        for &j in &extremes[k + 1..] {
            let d = norm(sub(pts[i], pts[j]));
            if d > best {
                best = d;
                a = i;
                b = j;
            }
        }
    }
    if best <= eps {
        return None;
    }

    let ab = sub(pts[b], pts[a]);
    let ab_len = norm(ab);
    let (mut c, mut best) = (0, -1.0);
    for (i, &p) in pts.iter().enumerate() {
        let d = norm(cross(sub(p, pts[a]), ab)) / ab_len;
        if d > best {
            best = d;
            c = i;
        }
    }
    if best <= eps {
        return None;
    }

    let plane = Face::new(pts, [a, b, c]);
    let (mut d, mut best) = (0, -1.0);
    for (i, &p) in pts.iter().enumerate() {
        let dist = plane.distance(p).abs();
        if dist > best {
            best = dist;
            d = i;
        }
    }
    if best <= eps {
        return None;
    }

    Some([a, b, c, d])
}

struct HullBuilder<'a> {
    pts: &'a [Vec3],
    eps: f64,
    faces: Vec<Face>,
    edges: HashMap<(usize, usize), usize>,
    pending: Vec<usize>,
}

impl<'a> HullBuilder<'a> {
    fn add_face(&mut self, v: [usize; 3]) -> Result<usize> {
        let face = Face::new(self.pts, v);
        let idx = self.faces.len();
        for edge in face.edges() {
            if self.edges.insert(edge, idx).is_some() {
                return Err(HullError::Topology(format!(
                    "edge {:?} shared by more than two facets",
                    edge
                )));
            }
        }
        self.faces.push(face);
        Ok(idx)
    }

    /// Attach `p` to the first of `candidates` it lies in front of.
    fn assign(&mut self, p: usize, candidates: &[usize]) {
        let point = self.pts[p];
        for &f in candidates {
            if self.faces[f].distance(point) > self.eps {
                if self.faces[f].outside.is_empty() {
                    self.pending.push(f);
                }
                self.faces[f].outside.push(p);
                return;
            }
        }
    }

    fn neighbour(&self, a: usize, b: usize) -> Result<usize> {
        self.edges
            .get(&(b, a))
            .copied()
            .ok_or_else(|| HullError::Topology(format!("edge ({}, {}) has no twin", a, b)))
    }

    /// Add the farthest outside point of `seed` to the hull.
    fn expand(&mut self, seed: usize) -> Result<()> {
        let eye = {
            let face = &self.faces[seed];
            let mut best = face.outside[0];
            let mut best_dist = face.distance(self.pts[best]);
            for &p in &face.outside[1..] {
                let d = face.distance(self.pts[p]);
                if d > best_dist {
                    best = p;
                    best_dist = d;
                }
            }
            best
        };
        let eye_point = self.pts[eye];

        let mut visible = vec![seed];
        let mut seen: HashSet<usize> = HashSet::from([seed]);
        let mut stack = vec![seed];
        let mut horizon = Vec::new();

        while let Some(f) = stack.pop() {
            for (a, b) in self.faces[f].edges() {
                let nb = self.neighbour(a, b)?;
                if seen.contains(&nb) {
                    continue;
                }
                if self.faces[nb].distance(eye_point) > self.eps {
                    seen.insert(nb);
                    visible.push(nb);
                    stack.push(nb);
                } else {
                    horizon.push((a, b));
                }
            }
        }

        let mut orphans = Vec::new();
        for &f in &visible {
            let face = &mut self.faces[f];
            face.alive = false;
            orphans.append(&mut face.outside);
            for edge in face.edges() {
                self.edges.remove(&edge);
            }
        }

        let mut created = Vec::with_capacity(horizon.len());
        for (a, b) in horizon {
            created.push(self.add_face([a, b, eye])?);
        }

        trace!(
            "quickhull: eye {} removed {} facets, added {}",
            eye,
            visible.len(),
            created.len()
        );

        for p in orphans {
            if p != eye {
                self.assign(p, &created);
            }
        }
        Ok(())
    }
}

/// Build the convex hull of `points`.
///
/// `epsilon` is relative: it is multiplied by the largest axis extent of the
/// input to give the point-to-plane tolerance.
///
/// # Errors
///
/// Returns an error for non-finite coordinates or a numerical breakdown.
/// Flat or tiny inputs are not errors; they yield a zero-volume hull.
///
/// # Example
///
/// ```
/// use splat_volume::processors::hull::convex_hull;
///
/// let tetra = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
/// let hull = convex_hull(&tetra, 1e-9).unwrap();
/// assert!((hull.volume - 1.0 / 6.0).abs() < 1e-12);
/// ```
pub fn convex_hull(points: &[Vec3], epsilon: f64) -> Result<ConvexHull> {
    let pts = canonical_points(points)?;
    if pts.len() < 4 {
        return Ok(ConvexHull::degenerate());
    }

    let mut extent: f64 = 0.0;
    for axis in 0..3 {
        let (lo, hi) = pts.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
            (lo.min(p[axis]), hi.max(p[axis]))
        });
        extent = extent.max(hi - lo);
    }
    if !extent.is_finite() {
        return Err(HullError::NonFiniteVolume);
    }
    let eps = epsilon * extent;

    let Some(simplex) = initial_simplex(&pts, eps) else {
        return Ok(ConvexHull::degenerate());
    };

    let centroid = {
        let mut c = [0.0; 3];
        for &i in &simplex {
            for axis in 0..3 {
                c[axis] += pts[i][axis] / 4.0;
            }
        }
        c
    };

    let mut builder = HullBuilder {
        pts: &pts,
        eps,
        faces: Vec::new(),
        edges: HashMap::new(),
        pending: Vec::new(),
    };

    let [a, b, c, d] = simplex;
    for tri in [[a, b, c], [a, d, b], [a, c, d], [b, d, c]] {
        let oriented = if Face::new(&pts, tri).distance(centroid) > 0.0 {
            [tri[0], tri[2], tri[1]]
        } else {
            tri
        };
        builder.add_face(oriented)?;
    }

    let initial: Vec<usize> = (0..4).collect();
    for p in 0..pts.len() {
        if !simplex.contains(&p) {
            builder.assign(p, &initial);
        }
    }

    let max_iterations = pts.len() + 1;
    let mut iterations = 0;
    while let Some(f) = builder.pending.pop() {
        if !builder.faces[f].alive || builder.faces[f].outside.is_empty() {
            continue;
        }
        iterations += 1;
        if iterations > max_iterations {
            return Err(HullError::NoConvergence { iterations });
        }
        builder.expand(f)?;
    }

    // Facets with a vanishing normal add nothing but rounding noise.
    let min_area2 = eps * eps;
    let mut volume = 0.0;
    let mut used: Vec<usize> = Vec::new();
    let mut faces = Vec::new();
    for face in builder.faces.iter().filter(|f| f.alive) {
        let [pa, pb, pc] = face.v.map(|i| pts[i]);
        faces.push(face.v);
        used.extend_from_slice(&face.v);
        if norm(cross(sub(pb, pa), sub(pc, pa))) <= min_area2 {
            continue;
        }
        volume += dot(sub(pa, centroid), cross(sub(pb, centroid), sub(pc, centroid))) / 6.0;
    }

    if !volume.is_finite() {
        return Err(HullError::NonFiniteVolume);
    }

    used.sort_unstable();
    used.dedup();
    let remap: HashMap<usize, usize> = used.iter().enumerate().map(|(new, &old)| (old, new)).collect();

    Ok(ConvexHull {
        vertices: used.iter().map(|&i| pts[i]).collect(),
        faces: faces.into_iter().map(|f| f.map(|i| remap[&i])).collect(),
        volume: volume.max(0.0),
    })
}
