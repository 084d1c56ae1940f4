//! Density filtering of splat scans.
//!
//! Two stages isolate the structure of interest from background splats:
//! - an opacity threshold, which drops faint splats
//! - statistical outlier removal, which drops isolated splats whose mean
//!   distance to their neighbours is far above the scan's norm
//!
//! Both stages return new sets and never reorder the survivors.

use std::num::NonZeroUsize;

use kiddo::{ImmutableKdTree, SquaredEuclidean};
use log::{debug, warn};
use rayon::prelude::*;

use crate::core::loaders::PointSet;

/// A point set whose members all have `opacity >= threshold`.
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredPointSet {
    points: PointSet,
    threshold: f32,
}

impl FilteredPointSet {
    /// Threshold every member satisfies.
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn points(&self) -> &PointSet {
        &self.points
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn into_inner(self) -> PointSet {
        self.points
    }
}

/// Keep the splats whose opacity is at least `threshold`.
///
/// A splat exactly at the threshold is kept. NaN opacities never pass.
/// Thresholds above 1 are accepted and yield an empty set.
///
/// # Example
///
/// ```
/// use splat_volume::core::loaders::{PointSet, Splat};
/// use splat_volume::processors::filtering::filter_by_opacity;
///
/// let set: PointSet = vec![Splat::new([0.0; 3], 0.1), Splat::new([1.0; 3], 0.2)]
///     .into_iter()
///     .collect();
/// assert_eq!(filter_by_opacity(&set, 0.2).len(), 1);
/// ```
pub fn filter_by_opacity(set: &PointSet, threshold: f32) -> FilteredPointSet {
    let kept: Vec<usize> = set
        .opacities()
        .iter()
        .enumerate()
        .filter(|(_, &opacity)| opacity >= threshold)
        .map(|(i, _)| i)
        .collect();

    debug!(
        "Opacity filter at {}: kept {} of {} splats",
        threshold,
        kept.len(),
        set.len()
    );

    FilteredPointSet {
        points: set.select(&kept),
        threshold,
    }
}

/// Mean distance from each point to its `k` nearest neighbours, itself included.
///
/// The query point is its own first hit at distance 0 and counts towards the
/// mean, so `k` results are averaged. `k` is clamped to the number of points.
/// Uses a kiddo KD-tree in f64 and parallel queries.
pub fn mean_neighbor_distances(coords: &[[f64; 3]], k: usize) -> Vec<f64> {
    if coords.len() < 2 || k == 0 {
        return vec![0.0; coords.len()];
    }

    let k = k.min(coords.len());
    let tree: ImmutableKdTree<f64, 3> = ImmutableKdTree::new_from_slice(coords);
    let max_qty = NonZeroUsize::MIN.saturating_add(k - 1);

    coords
        .par_iter()
        .map(|coord| {
            let neighbours = tree.nearest_n::<SquaredEuclidean>(coord, max_qty);
            let sum: f64 = neighbours.iter().map(|nn| nn.distance.sqrt()).sum();
            sum / neighbours.len().max(1) as f64
        })
        .collect()
}

/// Distance cutoff `mean + std_ratio * sigma` over per-point mean distances.
///
/// Sigma is the sample standard deviation (n - 1). Returns `None` for fewer
/// than two values or when the statistics are not finite.
pub fn statistical_cutoff(distances: &[f64], std_ratio: f64) -> Option<f64> {
    if distances.len() < 2 {
        return None;
    }

    let n = distances.len() as f64;
    let mean = distances.iter().sum::<f64>() / n;
    let variance = distances
        .iter()
        .map(|&d| {
            let diff = d - mean;
            diff * diff
        })
        .sum::<f64>()
        / (n - 1.0);
    let cutoff = mean + std_ratio * variance.sqrt();

    cutoff.is_finite().then_some(cutoff)
}

/// Remove splats whose mean neighbour distance exceeds `mean + std_ratio * sigma`.
///
/// `nb_neighbors` counts the point itself and is clamped to the set size.
/// Sets with fewer than two points, or `nb_neighbors == 0`, come back
/// unchanged. So do sets with non-finite positions or statistics: removal
/// never empties a set because the numbers broke down, and the estimator
/// reports the bad geometry instead.
pub fn remove_statistical_outliers(
    set: &FilteredPointSet,
    nb_neighbors: usize,
    std_ratio: f32,
) -> FilteredPointSet {
    if set.len() < 2 || nb_neighbors == 0 {
        return set.clone();
    }

    let coords: Vec<[f64; 3]> = set
        .points
        .to_coords()
        .into_iter()
        .map(|p| p.map(f64::from))
        .collect();
    if coords.iter().flatten().any(|c| !c.is_finite()) {
        warn!("Skipping outlier removal: set contains non-finite positions");
        return set.clone();
    }

    let distances = mean_neighbor_distances(&coords, nb_neighbors);
    let Some(cutoff) = statistical_cutoff(&distances, std_ratio as f64) else {
        warn!("Skipping outlier removal: neighbour distance statistics are not finite");
        return set.clone();
    };

    let kept: Vec<usize> = distances
        .iter()
        .enumerate()
        .filter(|(_, &d)| d <= cutoff)
        .map(|(i, _)| i)
        .collect();

    debug!(
        "Outlier removal (k={}, ratio={}, cutoff={}): kept {} of {} splats",
        nb_neighbors,
        std_ratio,
        cutoff,
        kept.len(),
        set.len()
    );

    FilteredPointSet {
        points: set.points.select(&kept),
        threshold: set.threshold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::loaders::Splat;

    fn set_with_opacities(opacities: &[f32]) -> PointSet {
        opacities
            .iter()
            .enumerate()
            .map(|(i, &o)| Splat::new([i as f32, 0.0, 0.0], o))
            .collect()
    }

    fn grid_with_outlier() -> PointSet {
        let mut splats = Vec::new();
        for i in 0..5 {
            for j in 0..5 {
                for k in 0..5 {
                    splats.push(Splat::new([i as f32, j as f32, k as f32], 1.0));
                }
            }
        }
        splats.push(Splat::new([100.0, 100.0, 100.0], 1.0));
        splats.into_iter().collect()
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let set = set_with_opacities(&[0.1, 0.2, 0.3]);
        let filtered = filter_by_opacity(&set, 0.2);
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered.points().opacities(), &[0.2, 0.3]);
        assert_eq!(filtered.threshold(), 0.2);
    }

    #[test]
    fn test_zero_threshold_keeps_everything() {
        let set = set_with_opacities(&[0.0, 0.5, 1.0]);
        assert_eq!(filter_by_opacity(&set, 0.0).len(), 3);
    }

    #[test]
    fn test_threshold_above_one_is_empty() {
        let set = set_with_opacities(&[0.0, 0.5, 1.0]);
        assert!(filter_by_opacity(&set, 1.01).is_empty());
    }

    #[test]
    fn test_nan_opacity_is_dropped() {
        let set = set_with_opacities(&[f32::NAN, 0.9]);
        assert_eq!(filter_by_opacity(&set, 0.0).len(), 1);
    }

    #[test]
    fn test_threshold_monotonicity() {
        let opacities: Vec<f32> = (0..50).map(|i| (i as f32 * 0.37) % 1.0).collect();
        let set = set_with_opacities(&opacities);

        let mut previous = usize::MAX;
        for step in 0..=20 {
            let count = filter_by_opacity(&set, step as f32 * 0.05).len();
            assert!(count <= previous);
            previous = count;
        }
    }

    #[test]
    fn test_filter_is_deterministic_and_order_preserving() {
        let set = set_with_opacities(&[0.9, 0.1, 0.8, 0.7]);
        let a = filter_by_opacity(&set, 0.5);
        let b = filter_by_opacity(&set, 0.5);
        assert_eq!(a, b);
        assert_eq!(a.points().x(), &[0.0, 2.0, 3.0]);
    }

    #[test]
    fn test_empty_input() {
        let filtered = filter_by_opacity(&PointSet::new(), 0.2);
        assert!(filtered.is_empty());
        assert!(remove_statistical_outliers(&filtered, 20, 2.0).is_empty());
    }

    #[test]
    fn test_outlier_removal_drops_far_point() {
        let filtered = filter_by_opacity(&grid_with_outlier(), 0.0);
        let cleaned = remove_statistical_outliers(&filtered, 20, 2.0);

        assert_eq!(cleaned.len(), 125);
        assert!(cleaned.points().x().iter().all(|&x| x < 10.0));
    }

    #[test]
    fn test_outlier_removal_keeps_uniform_corners() {
        let corners: PointSet = (0..8)
            .map(|i| {
                Splat::new(
                    [(i & 1) as f32 * 2.0, ((i >> 1) & 1) as f32 * 3.0, ((i >> 2) & 1) as f32 * 4.0],
                    1.0,
                )
            })
            .collect();
        let filtered = filter_by_opacity(&corners, 0.0);
        // k is clamped to 8, so every corner sees the same neighbourhood.
        let cleaned = remove_statistical_outliers(&filtered, 20, 2.0);
        assert_eq!(cleaned.len(), 8);
    }

    #[test]
    fn test_mean_neighbor_distances_count_the_point_itself() {
        let coords = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [3.0, 0.0, 0.0]];
        let d = mean_neighbor_distances(&coords, 2);
        assert_eq!(d, vec![0.5, 0.5, 1.0]);

        // k beyond the set size averages over every point.
        let d = mean_neighbor_distances(&coords, 20);
        assert_eq!(d, vec![4.0 / 3.0, 1.0, 5.0 / 3.0]);
    }

    #[test]
    fn test_statistical_cutoff_uses_sample_deviation() {
        // mean 2, squared deviations 1 + 1 + 1 + 9 over n - 1 = 3 gives sigma 2
        assert_eq!(statistical_cutoff(&[1.0, 1.0, 1.0, 5.0], 1.0), Some(4.0));
        assert_eq!(statistical_cutoff(&[1.0, 1.0, 1.0, 5.0], 2.0), Some(6.0));
        assert_eq!(statistical_cutoff(&[3.0], 2.0), None);
        assert_eq!(statistical_cutoff(&[1.0, f64::INFINITY], 2.0), None);
    }

    #[test]
    fn test_far_finite_splat_is_removed_without_losing_the_scan() {
        let mut splats = Vec::new();
        for i in 0..10 {
            for j in 0..10 {
                for k in 0..10 {
                    splats.push(Splat::new([i as f32, j as f32, k as f32], 1.0));
                }
            }
        }
        splats.push(Splat::new([1e30, 0.0, 0.0], 1.0));
        let set: PointSet = splats.into_iter().collect();

        let cleaned = remove_statistical_outliers(&filter_by_opacity(&set, 0.0), 20, 2.0);
        assert_eq!(cleaned.len(), 1000);
        assert!(cleaned.points().x().iter().all(|&x| x < 10.0));
    }

    #[test]
    fn test_non_finite_position_skips_removal() {
        let mut splats: Vec<Splat> = (0..30).map(|i| Splat::new([i as f32, 0.0, 1.0], 1.0)).collect();
        splats.push(Splat::new([f32::INFINITY, 0.0, 0.0], 1.0));
        let set: PointSet = splats.into_iter().collect();

        let filtered = filter_by_opacity(&set, 0.0);
        let cleaned = remove_statistical_outliers(&filtered, 20, 2.0);
        assert_eq!(cleaned, filtered);
    }
}
