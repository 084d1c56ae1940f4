//! Volumetric analysis of Gaussian splat scans.
//!
//! This crate provides tools for:
//! - Loading PLY and `.splat` scan artifacts into point sets
//! - Filtering low-opacity splats and statistical outliers
//! - Estimating enclosed volume via a 3D convex hull and a bounding box
//! - Comparing two scans of the same subject as a percentage growth
//!
//! # Example
//!
//! ```no_run
//! use splat_volume::core::loaders::load_scan;
//! use splat_volume::processors::{filtering::filter_by_opacity, volume::estimate};
//!
//! let scan = load_scan("day1.ply").unwrap();
//! let filtered = filter_by_opacity(&scan, 0.2);
//! let report = estimate(&filtered, 1e-9).unwrap();
//! println!("hull volume: {}", report.hull_volume);
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod pipeline;
pub mod processors;
pub mod report;

pub use config::{
    CacheConfig, FilterConfig, HullConfig, OpacityEncoding, OutlierConfig, PipelineConfig,
    ReportConfig, StorageConfig,
};
pub use core::loaders::{PointSet, Splat};
pub use pipeline::{AnalysisError, Analyzer, ErrorKind, ExportFormat, GrowthRequest, ScanRequest};
pub use processors::filtering::FilteredPointSet;
pub use processors::growth::GrowthReport;
pub use processors::volume::VolumeReport;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
