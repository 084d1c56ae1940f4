//! Growth comparison between a baseline scan and a follow-up scan.
//!
//! Growth is a percentage of the baseline, not a ratio: going from 100 to 150
//! is +50%, while the reverse, 150 to 100, is about -33.3%. The sign always
//! flips with the direction of the comparison; the magnitude does not.

use serde::Serialize;
use thiserror::Error;

use super::volume::VolumeReport;

/// Errors raised by the growth comparator.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GrowthError {
    /// The baseline hull has zero volume, so no percentage is defined.
    #[error("baseline scan has zero hull volume; growth percentage is undefined")]
    DegenerateBaseline,

    #[error("growth percentage is not finite ({volume_a} -> {volume_b})")]
    NonFinite { volume_a: f64, volume_b: f64 },
}

/// Result type for growth comparison.
pub type Result<T> = std::result::Result<T, GrowthError>;

/// Signed change between two volume reports.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GrowthReport {
    /// Baseline hull volume
    pub volume_a: f64,
    /// Follow-up hull volume
    pub volume_b: f64,
    /// `(volume_b - volume_a) / volume_a * 100`
    pub growth_percentage: f64,
    /// The same metric over bounding-box volumes; `None` when the baseline box is flat
    pub bbox_growth_percentage: Option<f64>,
}

#[inline]
fn percentage_change(from: f64, to: f64) -> f64 {
    (to - from) / from * 100.0
}

/// Compare a baseline report against a follow-up report.
///
/// Hull volume is the growth signal. The bounding-box change is carried
/// alongside and never used in its place.
///
/// # Errors
///
/// [`GrowthError::DegenerateBaseline`] when the baseline hull volume is 0.
///
/// # Example
///
/// ```
/// use splat_volume::processors::growth::compare;
/// use splat_volume::processors::volume::VolumeReport;
///
/// let report = |v: f64| VolumeReport {
///     hull_volume: v,
///     bbox_volume: v * 2.0,
///     point_count: 100,
///     hull_vertex_count: 20,
///     hull_face_count: 36,
/// };
/// let growth = compare(&report(100.0), &report(150.0)).unwrap();
/// assert_eq!(growth.growth_percentage, 50.0);
/// ```
pub fn compare(baseline: &VolumeReport, follow_up: &VolumeReport) -> Result<GrowthReport> {
    let volume_a = baseline.hull_volume;
    let volume_b = follow_up.hull_volume;

    if volume_a == 0.0 {
        return Err(GrowthError::DegenerateBaseline);
    }

    let growth_percentage = percentage_change(volume_a, volume_b);
    if !growth_percentage.is_finite() {
        return Err(GrowthError::NonFinite { volume_a, volume_b });
    }

    let bbox_growth_percentage = if baseline.bbox_volume > 0.0 {
        Some(percentage_change(baseline.bbox_volume, follow_up.bbox_volume))
            .filter(|g| g.is_finite())
    } else {
        None
    };

    Ok(GrowthReport {
        volume_a,
        volume_b,
        growth_percentage,
        bbox_growth_percentage,
    })
}
