//! Data writers for PLY and CSV formats.
//!
//! This module provides functions for writing analysis output:
//! - ASCII PLY of a (filtered) point set, with opacity and optional RGB
//! - `.splat` records of a point set, the 32-byte layout the loader reads
//! - CSV of serializable report rows, one row per analysed scan

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

use super::loaders::{PointSet, SPLAT_RECORD_SIZE};

/// Scale written for splats that carry none.
const DEFAULT_SPLAT_SCALE: f32 = 0.01;

/// Mid-grey written for splats that carry no color.
const DEFAULT_SPLAT_COLOR: u8 = 127;

/// Errors that can occur during write operations.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Failed to create parent directories.
    #[error("failed to create parent directories for '{path}': {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or open file for writing.
    #[error("failed to create file '{path}': {source}")]
    CreateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write data to file.
    #[error("failed to write to file '{path}': {source}")]
    WriteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// CSV writing error.
    #[error("CSV write error for '{path}': {source}")]
    CsvError {
        path: String,
        #[source]
        source: csv::Error,
    },
}

/// Result type for write operations.
pub type Result<T> = std::result::Result<T, WriteError>;

/// Creates parent directories for a file path if they don't exist.
fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| WriteError::CreateDirectory {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
    }
    Ok(())
}

/// Creates a buffered writer for the given path.
fn create_buffered_writer(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).map_err(|e| WriteError::CreateFile {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(BufWriter::new(file))
}

fn write_ply_body<W: Write>(writer: &mut W, set: &PointSet) -> std::io::Result<()> {
    let colors = set.colors();

    writeln!(writer, "ply")?;
    writeln!(writer, "format ascii 1.0")?;
    writeln!(writer, "element vertex {}", set.len())?;
    writeln!(writer, "property float x")?;
    writeln!(writer, "property float y")?;
    writeln!(writer, "property float z")?;
    writeln!(writer, "property float opacity")?;
    if colors.is_some() {
        writeln!(writer, "property uchar red")?;
        writeln!(writer, "property uchar green")?;
        writeln!(writer, "property uchar blue")?;
    }
    writeln!(writer, "end_header")?;

    for i in 0..set.len() {
        let [x, y, z] = set.position(i);
        write!(writer, "{} {} {} {}", x, y, z, set.opacities()[i])?;
        if let Some(colors) = colors {
            let [r, g, b] = colors[i];
            write!(writer, " {} {} {}", r, g, b)?;
        }
        writeln!(writer)?;
    }

    writer.flush()
}

/// Write a point set to an ASCII PLY file.
///
/// Opacity is written linearly, so the file reloads with identical values.
/// Positions use Rust's shortest round-trip float formatting.
///
/// # Errors
///
/// Returns an error if parent directories or the file cannot be created or written.
///
/// # Example
///
/// ```no_run
/// use splat_volume::core::loaders::PointSet;
/// use splat_volume::core::writers::write_ply;
/// use std::path::Path;
///
/// let set = PointSet::default();
/// write_ply(Path::new("filtered.ply"), &set).unwrap();
/// ```
pub fn write_ply(path: &Path, set: &PointSet) -> Result<()> {
    ensure_parent_dirs(path)?;
    let mut writer = create_buffered_writer(path)?;

    write_ply_body(&mut writer, set).map_err(|e| WriteError::WriteFile {
        path: path.display().to_string(),
        source: e,
    })
}

fn splat_record(set: &PointSet, i: usize) -> [u8; SPLAT_RECORD_SIZE] {
    let mut record = [0u8; SPLAT_RECORD_SIZE];
    let scale = set
        .scales()
        .map(|s| s[i])
        .unwrap_or([DEFAULT_SPLAT_SCALE; 3]);
    let color = set
        .colors()
        .map(|c| c[i])
        .unwrap_or([DEFAULT_SPLAT_COLOR; 3]);

    for (slot, value) in set.position(i).iter().chain(scale.iter()).enumerate() {
        record[slot * 4..slot * 4 + 4].copy_from_slice(&value.to_le_bytes());
    }
    record[24..27].copy_from_slice(&color);
    // NaN clamps to NaN and casts to 0.
    record[27] = (set.opacities()[i].clamp(0.0, 1.0) * 255.0).round() as u8;
    // Identity rotation quaternion, quantised to i8.
    record[28] = 127i8 as u8;

    record
}

/// Write a point set as headerless `.splat` records.
///
/// Splats without scale get 0.01 per axis and splats without color get
/// mid-grey. Opacity is rounded to the nearest alpha byte, so it reloads
/// within 1/510 of the original value.
///
/// # Errors
///
/// Returns an error if parent directories or the file cannot be created or written.
pub fn write_splat(path: &Path, set: &PointSet) -> Result<()> {
    ensure_parent_dirs(path)?;
    let mut writer = create_buffered_writer(path)?;

    let io_error = |e| WriteError::WriteFile {
        path: path.display().to_string(),
        source: e,
    };
    for i in 0..set.len() {
        writer.write_all(&splat_record(set, i)).map_err(io_error)?;
    }
    writer.flush().map_err(io_error)
}

/// Write serializable rows to a CSV file with a header derived from field names.
pub fn write_rows_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    ensure_parent_dirs(path)?;
    let writer = create_buffered_writer(path)?;
    let mut csv_writer = csv::Writer::from_writer(writer);

    let path_str = path.display().to_string();

    for row in rows {
        csv_writer
            .serialize(row)
            .map_err(|e| WriteError::CsvError {
                path: path_str.clone(),
                source: e,
            })?;
    }

    csv_writer.flush().map_err(|e| WriteError::WriteFile {
        path: path_str,
        source: e,
    })?;

    Ok(())
}
