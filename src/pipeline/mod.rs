//! Request handling over the analysis core.
//!
//! The [`Analyzer`] owns the explicit pieces of state a request needs: the
//! scan store, the configuration and the parsed-scan cache. Requests are
//! typed and validated before any scan is read, and every failure maps to
//! one [`ErrorKind`] that callers can match on.
//!
//! # Example
//!
//! ```no_run
//! use splat_volume::config::PipelineConfig;
//! use splat_volume::pipeline::{Analyzer, GrowthRequest};
//!
//! let analyzer = Analyzer::new(PipelineConfig::default());
//! let response = analyzer
//!     .analyze_growth(&GrowthRequest {
//!         file1: "day1.ply".to_string(),
//!         file2: "day7.ply".to_string(),
//!         threshold: Some(0.5),
//!     })
//!     .unwrap();
//! println!("growth: {:.2}%", response.growth_percentage);
//! ```

use std::path::Path;
use std::sync::Arc;

use log::{debug, error, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::PipelineConfig;
use crate::core::cache::ScanCache;
use crate::core::loaders::{parse_scan, LoaderError, PointSet, ScanFormat};
use crate::core::store::{ScanStore, StoreError};
use crate::core::writers::{write_ply, write_splat, WriteError};
use crate::processors::filtering::{filter_by_opacity, remove_statistical_outliers, FilteredPointSet};
use crate::processors::growth::{compare, GrowthError};
use crate::processors::hull::HullError;
use crate::processors::volume::{estimate, VolumeReport};
use crate::report::{GrowthResponse, ScanResponse};

/// Stable, machine-readable failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    ParseError,
    DegenerateBaseline,
    ComputationError,
    InvalidRequest,
    StorageError,
}

impl ErrorKind {
    /// The serialized name, e.g. `not_found`.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::ParseError => "parse_error",
            ErrorKind::DegenerateBaseline => "degenerate_baseline",
            ErrorKind::ComputationError => "computation_error",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::StorageError => "storage_error",
        }
    }

    /// Process exit code used by the CLI for this kind.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::NotFound => 2,
            ErrorKind::ParseError => 3,
            ErrorKind::DegenerateBaseline => 4,
            ErrorKind::ComputationError => 5,
            ErrorKind::InvalidRequest => 6,
            ErrorKind::StorageError => 7,
        }
    }
}

/// Errors surfaced by analysis requests.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Scan not found: {0}")]
    NotFound(String),

    #[error("Failed to parse scan '{file}': {source}")]
    Parse {
        file: String,
        #[source]
        source: LoaderError,
    },

    #[error("Baseline scan '{file}' has zero hull volume; growth percentage is undefined")]
    DegenerateBaseline { file: String },

    #[error("Volume computation failed for '{file}': {reason}")]
    Computation { file: String, reason: String },

    #[error("Growth computation failed for '{file1}' -> '{file2}': {reason}")]
    GrowthComputation {
        file1: String,
        file2: String,
        reason: String,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl AnalysisError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalysisError::NotFound(_) => ErrorKind::NotFound,
            AnalysisError::Parse { .. } => ErrorKind::ParseError,
            AnalysisError::DegenerateBaseline { .. } => ErrorKind::DegenerateBaseline,
            AnalysisError::Computation { .. } | AnalysisError::GrowthComputation { .. } => {
                ErrorKind::ComputationError
            }
            AnalysisError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            AnalysisError::Storage(_) => ErrorKind::StorageError,
        }
    }

    fn computation(file: &str, err: &HullError) -> Self {
        error!("Hull computation failed for {}: {}", file, err);
        AnalysisError::Computation {
            file: file.to_string(),
            reason: err.to_string(),
        }
    }

    fn from_growth(request: &GrowthRequest, err: GrowthError) -> Self {
        match err {
            GrowthError::DegenerateBaseline => AnalysisError::DegenerateBaseline {
                file: request.file1.clone(),
            },
            other => {
                error!(
                    "Growth computation failed for {} -> {}: {}",
                    request.file1, request.file2, other
                );
                AnalysisError::GrowthComputation {
                    file1: request.file1.clone(),
                    file2: request.file2.clone(),
                    reason: other.to_string(),
                }
            }
        }
    }
}

impl From<StoreError> for AnalysisError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => AnalysisError::NotFound(id),
            StoreError::InvalidIdentifier(id) => {
                AnalysisError::InvalidRequest(format!("invalid scan identifier '{}'", id))
            }
            other => AnalysisError::Storage(other.to_string()),
        }
    }
}

impl From<WriteError> for AnalysisError {
    fn from(err: WriteError) -> Self {
        AnalysisError::Storage(err.to_string())
    }
}

/// Result type for analysis requests.
pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Single-scan analysis request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScanRequest {
    pub file: String,
    /// Opacity threshold; `filter.opacity_threshold` when absent
    #[serde(default)]
    pub threshold: Option<f32>,
}

/// Two-scan growth request. `file1` is the baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GrowthRequest {
    pub file1: String,
    pub file2: String,
    /// Opacity threshold; `filter.growth_threshold` when absent
    #[serde(default)]
    pub threshold: Option<f32>,
}

fn validate_identifier(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AnalysisError::InvalidRequest(format!("{} must not be empty", field)));
    }
    Ok(())
}

fn validate_threshold(threshold: Option<f32>) -> Result<()> {
    match threshold {
        Some(t) if !(t.is_finite() && (0.0..=1.0).contains(&t)) => Err(
            AnalysisError::InvalidRequest(format!("threshold must be within [0, 1], got {}", t)),
        ),
        _ => Ok(()),
    }
}

impl ScanRequest {
    pub fn validate(&self) -> Result<()> {
        validate_identifier("file", &self.file)?;
        validate_threshold(self.threshold)
    }
}

impl GrowthRequest {
    pub fn validate(&self) -> Result<()> {
        validate_identifier("file1", &self.file1)?;
        validate_identifier("file2", &self.file2)?;
        validate_threshold(self.threshold)
    }
}

/// Which request shape a JSON body carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Scan,
    Growth,
}

/// File layout of an exported point set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportFormat {
    /// ASCII PLY with opacity and optional RGB
    #[default]
    Ply,
    /// Headerless 32-byte `.splat` records
    Splat,
}

/// Runs analysis requests against one scan store.
pub struct Analyzer {
    store: ScanStore,
    config: PipelineConfig,
    cache: ScanCache,
}

impl Analyzer {
    /// Analyzer over `config.storage.scan_dir`.
    pub fn new(config: PipelineConfig) -> Self {
        let store = ScanStore::new(config.storage.scan_dir.clone());
        Self::with_store(store, config)
    }

    pub fn with_store(store: ScanStore, config: PipelineConfig) -> Self {
        let cache = ScanCache::new(config.cache.max_entries);
        Self {
            store,
            config,
            cache,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &ScanStore {
        &self.store
    }

    pub fn cache(&self) -> &ScanCache {
        &self.cache
    }

    /// Read and parse a stored scan, reusing a cached parse of identical bytes.
    pub fn load(&self, file: &str) -> Result<Arc<PointSet>> {
        let (path, bytes) = self.store.read(file)?;
        let encoding = self.config.filter.opacity_encoding;
        let parse_err = |source: LoaderError| AnalysisError::Parse {
            file: file.to_string(),
            source,
        };

        let format = ScanFormat::detect(Some(&path), &bytes).map_err(parse_err)?;
        let key = ScanCache::key(&bytes, format, encoding);

        self.cache.get_or_load(&key, || {
            let set = parse_scan(&bytes, format, encoding).map_err(parse_err)?;
            debug!("Parsed {} splats from {}", set.len(), path.display());
            Ok(set)
        })
    }

    /// Load a scan and apply the density filter, then outlier removal if enabled.
    ///
    /// # Errors
    ///
    /// `Computation` when any splat of the scan has a non-finite position,
    /// checked before filtering so a broken scan is never measured as empty.
    pub fn filtered(&self, file: &str, threshold: f32) -> Result<FilteredPointSet> {
        let scan = self.load(file)?;
        let non_finite =
            (0..scan.len()).find(|&i| scan.position(i).iter().any(|c| !c.is_finite()));
        if let Some(index) = non_finite {
            return Err(AnalysisError::computation(file, &HullError::NonFinite { index }));
        }
        let filtered = filter_by_opacity(&scan, threshold);

        let outliers = &self.config.outliers;
        if outliers.enabled {
            Ok(remove_statistical_outliers(
                &filtered,
                outliers.nb_neighbors,
                outliers.std_ratio,
            ))
        } else {
            Ok(filtered)
        }
    }

    /// Volume report for one stored scan at `threshold`.
    pub fn estimate_file(&self, file: &str, threshold: f32) -> Result<VolumeReport> {
        let filtered = self.filtered(file, threshold)?;
        estimate(&filtered, self.config.hull.epsilon)
            .map_err(|e| AnalysisError::computation(file, &e))
    }

    /// Single-scan analysis.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` for a bad threshold or identifier, `NotFound` and
    /// `Parse` for the artifact, `Computation` for a numerical failure.
    pub fn analyze_scan(&self, request: &ScanRequest) -> Result<ScanResponse> {
        request.validate()?;
        let threshold = request
            .threshold
            .unwrap_or(self.config.filter.opacity_threshold);

        info!("Analyzing {} at opacity threshold {}", request.file, threshold);
        let report = self.estimate_file(&request.file, threshold)?;

        Ok(ScanResponse::from_report(
            &request.file,
            &report,
            self.config.report.decimals,
        ))
    }

    /// Two-scan growth analysis. Both scans are estimated in parallel.
    ///
    /// # Errors
    ///
    /// As [`Analyzer::analyze_scan`], plus `DegenerateBaseline` when `file1`
    /// has zero hull volume after filtering.
    pub fn analyze_growth(&self, request: &GrowthRequest) -> Result<GrowthResponse> {
        request.validate()?;
        let threshold = request
            .threshold
            .unwrap_or(self.config.filter.growth_threshold);

        info!(
            "Comparing {} -> {} at opacity threshold {}",
            request.file1, request.file2, threshold
        );

        let (baseline, follow_up) = rayon::join(
            || self.estimate_file(&request.file1, threshold),
            || self.estimate_file(&request.file2, threshold),
        );
        let (baseline, follow_up) = (baseline?, follow_up?);

        let growth =
            compare(&baseline, &follow_up).map_err(|e| AnalysisError::from_growth(request, e))?;

        Ok(GrowthResponse::from_reports(
            &request.file1,
            &baseline,
            &request.file2,
            &follow_up,
            &growth,
            self.config.report.decimals,
        ))
    }

    /// Estimate many scans in parallel; one result per identifier, in input order.
    pub fn analyze_batch(
        &self,
        files: &[String],
        threshold: Option<f32>,
    ) -> Result<Vec<(String, Result<VolumeReport>)>> {
        validate_threshold(threshold)?;
        let threshold = threshold.unwrap_or(self.config.filter.opacity_threshold);

        info!("Batch analysis of {} scans at threshold {}", files.len(), threshold);

        Ok(files
            .par_iter()
            .map(|file| (file.clone(), self.estimate_file(file, threshold)))
            .collect())
    }

    /// Write the filtered splats of a stored scan to `out` in `format`.
    ///
    /// Returns the number of splats written.
    pub fn export_filtered(
        &self,
        file: &str,
        threshold: Option<f32>,
        out: &Path,
        format: ExportFormat,
    ) -> Result<usize> {
        validate_identifier("file", file)?;
        validate_threshold(threshold)?;
        let threshold = threshold.unwrap_or(self.config.filter.opacity_threshold);

        let filtered = self.filtered(file, threshold)?;
        match format {
            ExportFormat::Ply => write_ply(out, filtered.points())?,
            ExportFormat::Splat => write_splat(out, filtered.points())?,
        }

        info!("Exported {} splats of {} to {}", filtered.len(), file, out.display());
        Ok(filtered.len())
    }

    /// Handle a JSON request body and return the JSON response value.
    pub fn handle_json(&self, endpoint: Endpoint, body: &str) -> Result<serde_json::Value> {
        let invalid = |e: serde_json::Error| AnalysisError::InvalidRequest(e.to_string());

        let value = match endpoint {
            Endpoint::Scan => {
                let request: ScanRequest = serde_json::from_str(body).map_err(invalid)?;
                serde_json::to_value(self.analyze_scan(&request)?)
            }
            Endpoint::Growth => {
                let request: GrowthRequest = serde_json::from_str(body).map_err(invalid)?;
                serde_json::to_value(self.analyze_growth(&request)?)
            }
        };

        value.map_err(|e| AnalysisError::Storage(format!("failed to encode response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::loaders::{load_scan, Splat};
    use approx::assert_relative_eq;
    use std::fs;
    use tempfile::TempDir;

    fn box_scan(dz: f32) -> PointSet {
        let mut splats: Vec<Splat> = (0..8)
            .map(|i| {
                Splat::new(
                    [
                        (i & 1) as f32 * 2.0,
                        ((i >> 1) & 1) as f32 * 3.0,
                        ((i >> 2) & 1) as f32 * dz,
                    ],
                    1.0,
                )
            })
            .collect();
        // Faint background splat far outside the box.
        splats.push(Splat::new([50.0, 50.0, 50.0], 0.1));
        splats.into_iter().collect()
    }

    fn flat_scan() -> PointSet {
        [[0.0, 0.0, 1.0], [1.0, 0.0, 1.0], [0.0, 1.0, 1.0], [1.0, 1.0, 1.0]]
            .iter()
            .map(|&p| Splat::new(p, 1.0))
            .collect()
    }

    fn analyzer() -> (TempDir, Analyzer) {
        let dir = TempDir::new().unwrap();
        write_ply(&dir.path().join("day1.ply"), &box_scan(4.0)).unwrap();
        write_ply(&dir.path().join("day7.ply"), &box_scan(6.0)).unwrap();
        write_ply(&dir.path().join("flat.ply"), &flat_scan()).unwrap();
        fs::write(dir.path().join("broken.ply"), b"not a scan").unwrap();

        let analyzer = Analyzer::with_store(ScanStore::new(dir.path()), PipelineConfig::default());
        (dir, analyzer)
    }

    fn scan(file: &str, threshold: Option<f32>) -> ScanRequest {
        ScanRequest {
            file: file.to_string(),
            threshold,
        }
    }

    fn growth(file1: &str, file2: &str) -> GrowthRequest {
        GrowthRequest {
            file1: file1.to_string(),
            file2: file2.to_string(),
            threshold: None,
        }
    }

    #[test]
    fn test_analyze_scan() {
        let (_dir, analyzer) = analyzer();
        let response = analyzer.analyze_scan(&scan("day1.ply", None)).unwrap();

        assert_eq!(response.point_count, 8);
        assert_relative_eq!(response.volume_hull_units, 24.0, epsilon = 1e-6);
        assert_relative_eq!(response.volume_bbox_units, 24.0, epsilon = 1e-6);
    }

    #[test]
    fn test_zero_threshold_keeps_faint_splat() {
        let (_dir, mut analyzer) = analyzer();
        analyzer.config.outliers.enabled = false;
        let response = analyzer.analyze_scan(&scan("day1.ply", Some(0.0))).unwrap();
        assert_eq!(response.point_count, 9);
        assert!(response.volume_hull_units > 24.0);
    }

    #[test]
    fn test_analyze_growth() {
        let (_dir, analyzer) = analyzer();
        let response = analyzer.analyze_growth(&growth("day1.ply", "day7.ply")).unwrap();

        assert_relative_eq!(response.volume1, 24.0, epsilon = 1e-6);
        assert_relative_eq!(response.volume2, 36.0, epsilon = 1e-6);
        assert_relative_eq!(response.growth_percentage, 50.0, epsilon = 1e-6);

        let reverse = analyzer.analyze_growth(&growth("day7.ply", "day1.ply")).unwrap();
        assert!(reverse.growth_percentage < 0.0);
    }

    #[test]
    fn test_degenerate_baseline() {
        let (_dir, analyzer) = analyzer();
        let err = analyzer.analyze_growth(&growth("flat.ply", "day1.ply")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DegenerateBaseline);
    }

    #[test]
    fn test_flat_scan_is_not_an_error() {
        let (_dir, analyzer) = analyzer();
        let response = analyzer.analyze_scan(&scan("flat.ply", None)).unwrap();
        assert_eq!(response.volume_hull_units, 0.0);
        assert_eq!(response.point_count, 4);
    }

    #[test]
    fn test_error_kinds() {
        let (_dir, analyzer) = analyzer();
        let kind = |request: ScanRequest| analyzer.analyze_scan(&request).unwrap_err().kind();

        assert_eq!(kind(scan("missing.ply", None)), ErrorKind::NotFound);
        assert_eq!(kind(scan("broken.ply", None)), ErrorKind::ParseError);
        assert_eq!(kind(scan("../day1.ply", None)), ErrorKind::InvalidRequest);
        assert_eq!(kind(scan("", None)), ErrorKind::InvalidRequest);
        assert_eq!(kind(scan("day1.ply", Some(1.5))), ErrorKind::InvalidRequest);
        assert_eq!(kind(scan("day1.ply", Some(f32::NAN))), ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_missing_follow_up_is_not_found() {
        let (_dir, analyzer) = analyzer();
        let err = analyzer.analyze_growth(&growth("day1.ply", "nope.ply")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_exit_codes_are_distinct() {
        let kinds = [
            ErrorKind::NotFound,
            ErrorKind::ParseError,
            ErrorKind::DegenerateBaseline,
            ErrorKind::ComputationError,
            ErrorKind::InvalidRequest,
            ErrorKind::StorageError,
        ];
        let mut codes: Vec<i32> = kinds.iter().map(|k| k.exit_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
        assert!(!codes.contains(&0) && !codes.contains(&1));
    }

    #[test]
    fn test_repeat_analysis_uses_cache() {
        let (_dir, analyzer) = analyzer();
        let first = analyzer.analyze_scan(&scan("day1.ply", None)).unwrap();
        let second = analyzer.analyze_scan(&scan("day1.ply", None)).unwrap();
        assert_eq!(first, second);
        assert_eq!(analyzer.cache().len(), 1);
    }

    #[test]
    fn test_analyze_batch_keeps_order_and_failures() {
        let (_dir, analyzer) = analyzer();
        let files = vec![
            "day7.ply".to_string(),
            "missing.ply".to_string(),
            "day1.ply".to_string(),
        ];
        let results = analyzer.analyze_batch(&files, None).unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].0, "day7.ply");
        assert!(results[0].1.is_ok());
        assert!(matches!(results[1].1, Err(AnalysisError::NotFound(_))));
        assert_eq!(results[2].1.as_ref().unwrap().point_count, 8);
    }

    #[test]
    fn test_export_filtered() {
        let (dir, analyzer) = analyzer();
        let out = dir.path().join("out").join("day1_filtered.ply");
        let written = analyzer
            .export_filtered("day1.ply", None, &out, ExportFormat::Ply)
            .unwrap();

        assert_eq!(written, 8);
        assert_eq!(load_scan(&out).unwrap().len(), 8);
    }

    #[test]
    fn test_export_splat_measures_the_same() {
        let (dir, analyzer) = analyzer();
        let out = dir.path().join("day1.splat");
        analyzer
            .export_filtered("day1.ply", None, &out, ExportFormat::Splat)
            .unwrap();

        let response = analyzer.analyze_scan(&scan("day1.splat", None)).unwrap();
        assert_eq!(response.point_count, 8);
        assert_relative_eq!(response.volume_hull_units, 24.0, epsilon = 1e-9);
    }

    fn grid_with(extra: [f32; 3]) -> PointSet {
        let mut splats = Vec::new();
        for i in 0..10 {
            for j in 0..10 {
                for k in 0..10 {
                    splats.push(Splat::new([i as f32, j as f32, k as f32], 1.0));
                }
            }
        }
        splats.push(Splat::new(extra, 1.0));
        splats.into_iter().collect()
    }

    #[test]
    fn test_infinite_position_is_a_computation_error() {
        let (dir, analyzer) = analyzer();
        write_ply(&dir.path().join("inf.ply"), &grid_with([f32::INFINITY, 0.0, 0.0])).unwrap();

        let err = analyzer.analyze_scan(&scan("inf.ply", None)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ComputationError);

        let err = analyzer.analyze_growth(&growth("inf.ply", "day1.ply")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ComputationError);
    }

    #[test]
    fn test_far_finite_splat_does_not_empty_the_scan() {
        let (dir, analyzer) = analyzer();
        write_ply(&dir.path().join("far.ply"), &grid_with([1e30, 0.0, 0.0])).unwrap();

        let response = analyzer.analyze_scan(&scan("far.ply", None)).unwrap();
        assert_eq!(response.point_count, 1000);
        assert_relative_eq!(response.volume_hull_units, 729.0, epsilon = 1e-6);
    }

    #[test]
    fn test_growth_failure_names_both_scans() {
        let request = growth("a.ply", "b.ply");
        let err = AnalysisError::from_growth(
            &request,
            GrowthError::NonFinite {
                volume_a: 1e-300,
                volume_b: 1e300,
            },
        );
        assert_eq!(err.kind(), ErrorKind::ComputationError);
        let message = err.to_string();
        assert!(message.contains("a.ply") && message.contains("b.ply"));

        let err = AnalysisError::from_growth(&request, GrowthError::DegenerateBaseline);
        assert!(matches!(err, AnalysisError::DegenerateBaseline { file } if file == "a.ply"));
    }

    #[test]
    fn test_handle_json() {
        let (_dir, analyzer) = analyzer();
        let value = analyzer
            .handle_json(Endpoint::Growth, r#"{"file1": "day1.ply", "file2": "day7.ply", "threshold": 0.5}"#)
            .unwrap();
        assert_relative_eq!(value["growth_percentage"].as_f64().unwrap(), 50.0, epsilon = 1e-6);

        let value = analyzer
            .handle_json(Endpoint::Scan, r#"{"file": "day1.ply"}"#)
            .unwrap();
        assert_eq!(value["point_count"], 8);
    }

    #[test]
    fn test_handle_json_rejects_unknown_fields() {
        let (_dir, analyzer) = analyzer();
        let err = analyzer
            .handle_json(Endpoint::Scan, r#"{"file": "day1.ply", "voxel": 2}"#)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }
}
