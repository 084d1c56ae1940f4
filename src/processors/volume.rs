//! Volume estimation for filtered splat sets.
//!
//! Two estimates are produced from the same points:
//! - the convex hull volume, a tight upper bound on the enclosed solid
//! - the axis-aligned bounding box volume, a coarser upper bound
//!
//! Units are whatever the scan's coordinate units are, cubed. No physical
//! scale is applied.

use log::debug;
use serde::Serialize;

use super::filtering::FilteredPointSet;
use super::hull::{convex_hull, HullError, Result};

/// Relative slack allowed when checking `hull <= bbox`.
const BBOX_TOLERANCE: f64 = 1e-9;

/// Volume measurements of one filtered point set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VolumeReport {
    /// Convex hull volume; 0 when the points have no 3D extent
    pub hull_volume: f64,
    /// Product of the per-axis extents; 0 for an empty set
    pub bbox_volume: f64,
    /// Number of points that survived filtering
    pub point_count: usize,
    pub hull_vertex_count: usize,
    pub hull_face_count: usize,
}

/// Axis-aligned bounding box volume of a set of positions.
///
/// Returns 0 for an empty slice.
pub fn bounding_box_volume(coords: &[[f64; 3]]) -> f64 {
    if coords.is_empty() {
        return 0.0;
    }

    let mut min = [f64::INFINITY; 3];
    let mut max = [f64::NEG_INFINITY; 3];
    for p in coords {
        for axis in 0..3 {
            min[axis] = min[axis].min(p[axis]);
            max[axis] = max[axis].max(p[axis]);
        }
    }

    (0..3).map(|axis| max[axis] - min[axis]).product()
}

/// Estimate the hull and bounding-box volumes of a filtered set.
///
/// # Arguments
///
/// * `set` - Points that passed the density filter
/// * `epsilon` - Relative hull tolerance (see [`convex_hull`])
///
/// # Returns
///
/// A [`VolumeReport`]. Empty, flat and tiny sets report a hull volume of 0.
///
/// # Errors
///
/// Returns a [`HullError`] when the geometry is not finite, the hull cannot
/// be closed, or the hull volume exceeds the bounding box.
pub fn estimate(set: &FilteredPointSet, epsilon: f64) -> Result<VolumeReport> {
    let points = set.points();
    let coords: Vec<[f64; 3]> = (0..points.len())
        .map(|i| {
            let [x, y, z] = points.position(i);
            [x as f64, y as f64, z as f64]
        })
        .collect();

    let hull = convex_hull(&coords, epsilon)?;
    let bbox_volume = bounding_box_volume(&coords);

    if hull.volume > bbox_volume * (1.0 + BBOX_TOLERANCE) {
        return Err(HullError::ExceedsBoundingBox {
            hull: hull.volume,
            bbox: bbox_volume,
        });
    }

    debug!(
        "Estimated volume of {} splats: hull {:.6} ({} vertices, {} faces), bbox {:.6}",
        coords.len(),
        hull.volume,
        hull.vertices.len(),
        hull.faces.len(),
        bbox_volume
    );

    Ok(VolumeReport {
        hull_volume: hull.volume,
        bbox_volume,
        point_count: coords.len(),
        hull_vertex_count: hull.vertices.len(),
        hull_face_count: hull.faces.len(),
    })
}
