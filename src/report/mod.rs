//! Response shapes for analysis results.
//!
//! Every response is a plain serde struct built from the numeric reports.
//! Rounding happens here and nowhere else: the reports keep full precision,
//! and `decimals` only affects the values copied into a response.

use serde::{Deserialize, Serialize};

use crate::pipeline::{AnalysisError, ErrorKind};
use crate::processors::growth::GrowthReport;
use crate::processors::volume::VolumeReport;

/// Round `value` to `decimals` places, or return it unchanged for `None`.
///
/// Non-finite values and precisions that would overflow pass through as is.
pub fn round_to(value: f64, decimals: Option<u32>) -> f64 {
    let Some(places) = decimals else {
        return value;
    };
    let factor = 10f64.powi(places.min(i32::MAX as u32) as i32);
    if !value.is_finite() || !factor.is_finite() {
        return value;
    }
    let scaled = value * factor;
    if !scaled.is_finite() {
        return value;
    }
    scaled.round() / factor
}

/// Response for a single-scan analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResponse {
    pub file: String,
    pub volume_hull_units: f64,
    pub volume_bbox_units: f64,
    pub point_count: usize,
}

impl ScanResponse {
    pub fn from_report(file: &str, report: &VolumeReport, decimals: Option<u32>) -> Self {
        Self {
            file: file.to_string(),
            volume_hull_units: round_to(report.hull_volume, decimals),
            volume_bbox_units: round_to(report.bbox_volume, decimals),
            point_count: report.point_count,
        }
    }
}

/// Response for a two-scan growth analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowthResponse {
    pub file1: String,
    pub volume1: f64,
    pub file2: String,
    pub volume2: f64,
    pub growth_percentage: f64,
    /// Bounding-box volumes, for cross-checking the hull signal
    pub bbox_volume1: f64,
    pub bbox_volume2: f64,
}

impl GrowthResponse {
    pub fn from_reports(
        file1: &str,
        baseline: &VolumeReport,
        file2: &str,
        follow_up: &VolumeReport,
        growth: &GrowthReport,
        decimals: Option<u32>,
    ) -> Self {
        Self {
            file1: file1.to_string(),
            volume1: round_to(growth.volume_a, decimals),
            file2: file2.to_string(),
            volume2: round_to(growth.volume_b, decimals),
            growth_percentage: round_to(growth.growth_percentage, decimals),
            bbox_volume1: round_to(baseline.bbox_volume, decimals),
            bbox_volume2: round_to(follow_up.bbox_volume, decimals),
        }
    }
}

/// Machine-readable failure response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&AnalysisError> for ErrorResponse {
    fn from(err: &AnalysisError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// One CSV row of a batch run.
///
/// Failed scans keep their row, with empty numbers and the error kind set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchRow {
    pub file: String,
    pub volume_hull_units: Option<f64>,
    pub volume_bbox_units: Option<f64>,
    pub point_count: Option<usize>,
    pub error: Option<ErrorKind>,
}

impl BatchRow {
    pub fn from_result(
        file: &str,
        result: &Result<VolumeReport, AnalysisError>,
        decimals: Option<u32>,
    ) -> Self {
        match result {
            Ok(report) => {
                let response = ScanResponse::from_report(file, report, decimals);
                Self {
                    file: response.file,
                    volume_hull_units: Some(response.volume_hull_units),
                    volume_bbox_units: Some(response.volume_bbox_units),
                    point_count: Some(response.point_count),
                    error: None,
                }
            }
            Err(e) => Self {
                file: file.to_string(),
                volume_hull_units: None,
                volume_bbox_units: None,
                point_count: None,
                error: Some(e.kind()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::growth::compare;

    fn report(hull: f64, bbox: f64, points: usize) -> VolumeReport {
        VolumeReport {
            hull_volume: hull,
            bbox_volume: bbox,
            point_count: points,
            hull_vertex_count: 8,
            hull_face_count: 12,
        }
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(1.23456, Some(2)), 1.23);
        assert_eq!(round_to(-1.235, Some(0)), -1.0);
        assert_eq!(round_to(1.23456, None), 1.23456);
        assert!(round_to(f64::NAN, Some(2)).is_nan());
        assert_eq!(round_to(1e300, Some(20)), 1e300);
    }

    #[test]
    fn test_scan_response_shape() {
        let response = ScanResponse::from_report("day1.ply", &report(1.0 / 3.0, 2.0, 42), None);
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["file"], "day1.ply");
        assert_eq!(json["point_count"], 42);
        assert_eq!(json["volume_bbox_units"], 2.0);
        assert_eq!(json["volume_hull_units"].as_f64().unwrap(), 1.0 / 3.0);
    }

    #[test]
    fn test_rounding_leaves_report_untouched() {
        let r = report(1.0 / 3.0, 2.0, 42);
        let response = ScanResponse::from_report("a.ply", &r, Some(3));
        assert_eq!(response.volume_hull_units, 0.333);
        assert_eq!(r.hull_volume, 1.0 / 3.0);
    }

    #[test]
    fn test_growth_response_shape() {
        let a = report(100.0, 120.0, 10);
        let b = report(150.0, 180.0, 12);
        let growth = compare(&a, &b).unwrap();
        let response = GrowthResponse::from_reports("a.ply", &a, "b.ply", &b, &growth, None);
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["volume1"], 100.0);
        assert_eq!(json["volume2"], 150.0);
        assert_eq!(json["growth_percentage"], 50.0);
        assert_eq!(json["bbox_volume2"], 180.0);
    }

    #[test]
    fn test_error_response_kind() {
        let err = AnalysisError::DegenerateBaseline {
            file: "a.ply".to_string(),
        };
        let json = serde_json::to_value(ErrorResponse::from(&err)).unwrap();
        assert_eq!(json["kind"], "degenerate_baseline");
        assert!(json["message"].as_str().unwrap().contains("a.ply"));
    }

    #[test]
    fn test_batch_row_for_failure() {
        let failed: Result<VolumeReport, AnalysisError> =
            Err(AnalysisError::NotFound("gone.ply".to_string()));
        let row = BatchRow::from_result("gone.ply", &failed, None);
        assert_eq!(row.error, Some(ErrorKind::NotFound));
        assert!(row.volume_hull_units.is_none());

        let ok: Result<VolumeReport, AnalysisError> = Ok(report(2.0, 3.0, 9));
        let row = BatchRow::from_result("ok.ply", &ok, None);
        assert_eq!(row.point_count, Some(9));
        assert!(row.error.is_none());
    }
}
