//! Core data types and I/O operations.

pub mod cache;
pub mod loaders;
pub mod store;
pub mod writers;

pub use cache::ScanCache;
pub use loaders::{load_scan, parse_scan, LoaderError, PointSet, ScanFormat, Splat};
pub use store::{ScanEntry, ScanStore, StoreError};
pub use writers::{write_ply, write_rows_csv, WriteError};
