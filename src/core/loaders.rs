//! Loaders for Gaussian splat scan artifacts.
//!
//! This module provides parsers for:
//! - PLY point-splat files (ASCII, binary little endian, binary big endian)
//! - Headerless `.splat` files (32 bytes per splat)
//!
//! Only the position and opacity of each splat feed the volume analysis.
//! Scale and color are kept when present; every other property is skipped.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::OpacityEncoding;

/// Zeroth-order spherical harmonic constant, used to recover base color.
const SH_C0: f32 = 0.282_094_8;

/// Bytes per record in the `.splat` format.
pub const SPLAT_RECORD_SIZE: usize = 32;

/// Errors that can occur while loading a scan.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unrecognized scan header: {0}")]
    UnrecognizedHeader(String),

    #[error("Invalid PLY header: {0}")]
    InvalidHeader(String),

    #[error("Missing required property: {0}")]
    MissingProperty(String),

    #[error("Truncated payload: {0}")]
    Truncated(String),

    #[error("Payload length mismatch: {0}")]
    LengthMismatch(String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// On-disk layout of a scan artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanFormat {
    /// PLY with a vertex element carrying x, y, z
    Ply,
    /// Headerless 32-byte records: position, scale, RGBA, rotation
    Splat,
}

impl ScanFormat {
    /// Detect the format from the PLY magic line, falling back to the file extension.
    pub fn detect(path: Option<&Path>, bytes: &[u8]) -> Result<Self> {
        if bytes.starts_with(b"ply\n") || bytes.starts_with(b"ply\r\n") {
            return Ok(ScanFormat::Ply);
        }

        let is_splat = path
            .and_then(|p| p.extension())
            .map(|ext| ext.eq_ignore_ascii_case("splat"))
            .unwrap_or(false);

        if is_splat {
            return Ok(ScanFormat::Splat);
        }

        let preview: String = bytes
            .iter()
            .take(16)
            .map(|&b| if b.is_ascii_graphic() { b as char } else { '.' })
            .collect();
        Err(LoaderError::UnrecognizedHeader(format!(
            "expected PLY magic or .splat extension, found '{}'",
            preview
        )))
    }
}

/// One weighted sample of a scan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Splat {
    /// Center position in scan units.
    pub position: [f32; 3],
    /// Opacity in [0, 1].
    pub opacity: f32,
    /// Per-axis scale, if the artifact carries one.
    pub scale: Option<[f32; 3]>,
    /// Base RGB color, if the artifact carries one.
    pub color: Option<[u8; 3]>,
}

impl Splat {
    /// A splat with only position and opacity.
    pub fn new(position: [f32; 3], opacity: f32) -> Self {
        Self {
            position,
            opacity,
            scale: None,
            color: None,
        }
    }
}

/// Collection of splats read from one scan artifact.
///
/// Stored column-wise. The optional scale and color columns are decided by the
/// first splat added; later splats without them get zeroed defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointSet {
    x: Vec<f32>,
    y: Vec<f32>,
    z: Vec<f32>,
    opacity: Vec<f32>,
    scales: Option<Vec<[f32; 3]>>,
    colors: Option<Vec<[u8; 3]>>,
}

impl PointSet {
    /// Creates a new empty point set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new point set with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            x: Vec::with_capacity(capacity),
            y: Vec::with_capacity(capacity),
            z: Vec::with_capacity(capacity),
            opacity: Vec::with_capacity(capacity),
            scales: None,
            colors: None,
        }
    }

    /// Returns the number of splats.
    #[inline]
    pub fn len(&self) -> usize {
        self.x.len()
    }

    /// Returns true if the set holds no splats.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    #[inline]
    pub fn x(&self) -> &[f32] {
        &self.x
    }

    #[inline]
    pub fn y(&self) -> &[f32] {
        &self.y
    }

    #[inline]
    pub fn z(&self) -> &[f32] {
        &self.z
    }

    /// Opacity of every splat, in [0, 1].
    #[inline]
    pub fn opacities(&self) -> &[f32] {
        &self.opacity
    }

    pub fn scales(&self) -> Option<&[[f32; 3]]> {
        self.scales.as_deref()
    }

    pub fn colors(&self) -> Option<&[[u8; 3]]> {
        self.colors.as_deref()
    }

    /// Position of splat `i`.
    #[inline]
    pub fn position(&self, i: usize) -> [f32; 3] {
        [self.x[i], self.y[i], self.z[i]]
    }

    /// Reassemble splat `i` from the columns.
    pub fn splat(&self, i: usize) -> Splat {
        Splat {
            position: self.position(i),
            opacity: self.opacity[i],
            scale: self.scales.as_ref().map(|s| s[i]),
            color: self.colors.as_ref().map(|c| c[i]),
        }
    }

    /// Iterate over all splats in load order.
    pub fn iter(&self) -> impl Iterator<Item = Splat> + '_ {
        (0..self.len()).map(move |i| self.splat(i))
    }

    /// Converts the set to a vector of [x, y, z] coordinate arrays.
    pub fn to_coords(&self) -> Vec<[f32; 3]> {
        (0..self.len()).map(|i| self.position(i)).collect()
    }

    /// Build a new set from the splats at `indices`, in the given order.
    pub fn select(&self, indices: &[usize]) -> PointSet {
        let mut out = PointSet::with_capacity(indices.len());
        out.scales = self.scales.as_ref().map(|_| Vec::with_capacity(indices.len()));
        out.colors = self.colors.as_ref().map(|_| Vec::with_capacity(indices.len()));
        for &i in indices {
            out.push(self.splat(i));
        }
        out
    }

    pub(crate) fn push(&mut self, splat: Splat) {
        if self.is_empty() {
            if splat.scale.is_some() && self.scales.is_none() {
                self.scales = Some(Vec::with_capacity(self.x.capacity()));
            }
            if splat.color.is_some() && self.colors.is_none() {
                self.colors = Some(Vec::with_capacity(self.x.capacity()));
            }
        }

        let [x, y, z] = splat.position;
        self.x.push(x);
        self.y.push(y);
        self.z.push(z);
        self.opacity.push(splat.opacity);

        if let Some(ref mut scales) = self.scales {
            scales.push(splat.scale.unwrap_or([0.0; 3]));
        }
        if let Some(ref mut colors) = self.colors {
            colors.push(splat.color.unwrap_or([0; 3]));
        }
    }
}

impl FromIterator<Splat> for PointSet {
    fn from_iter<I: IntoIterator<Item = Splat>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut set = PointSet::with_capacity(iter.size_hint().0);
        for splat in iter {
            set.push(splat);
        }
        set
    }
}

/// Logistic sigmoid, mapping raw opacity logits to [0, 1].
#[inline]
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Load a scan from disk, detecting the format from its contents and extension.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a valid scan.
pub fn load_scan<P: AsRef<Path>>(path: P) -> Result<PointSet> {
    load_scan_with(path, OpacityEncoding::Auto)
}

/// Load a scan from disk with an explicit PLY opacity encoding.
pub fn load_scan_with<P: AsRef<Path>>(path: P, encoding: OpacityEncoding) -> Result<PointSet> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    let format = ScanFormat::detect(Some(path), &bytes)?;
    parse_scan(&bytes, format, encoding)
}

/// Parse scan bytes that are already in memory.
pub fn parse_scan(bytes: &[u8], format: ScanFormat, encoding: OpacityEncoding) -> Result<PointSet> {
    match format {
        ScanFormat::Ply => parse_ply(bytes, encoding),
        ScanFormat::Splat => parse_splat(bytes),
    }
}

/// Parse the headerless `.splat` layout.
///
/// Each record is 32 bytes, little endian: position 3×f32, scale 3×f32,
/// RGBA 4×u8, rotation 4×i8. Opacity is the alpha byte over 255.
pub fn parse_splat(bytes: &[u8]) -> Result<PointSet> {
    if bytes.len() % SPLAT_RECORD_SIZE != 0 {
        return Err(LoaderError::LengthMismatch(format!(
            "{} bytes is not a multiple of the {}-byte splat record",
            bytes.len(),
            SPLAT_RECORD_SIZE
        )));
    }

    let count = bytes.len() / SPLAT_RECORD_SIZE;
    let mut set = PointSet::with_capacity(count);

    for record in bytes.chunks_exact(SPLAT_RECORD_SIZE) {
        let f = |offset: usize| {
            f32::from_le_bytes([
                record[offset],
                record[offset + 1],
                record[offset + 2],
                record[offset + 3],
            ])
        };

        set.push(Splat {
            position: [f(0), f(4), f(8)],
            scale: Some([f(12), f(16), f(20)]),
            color: Some([record[24], record[25], record[26]]),
            opacity: record[27] as f32 / 255.0,
        });
    }

    Ok(set)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlyEncoding {
    Ascii,
    BinaryLittleEndian,
    BinaryBigEndian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScalarType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl ScalarType {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "char" | "int8" => ScalarType::I8,
            "uchar" | "uint8" => ScalarType::U8,
            "short" | "int16" => ScalarType::I16,
            "ushort" | "uint16" => ScalarType::U16,
            "int" | "int32" => ScalarType::I32,
            "uint" | "uint32" => ScalarType::U32,
            "float" | "float32" => ScalarType::F32,
            "double" | "float64" => ScalarType::F64,
            _ => return None,
        })
    }

    fn size(self) -> usize {
        match self {
            ScalarType::I8 | ScalarType::U8 => 1,
            ScalarType::I16 | ScalarType::U16 => 2,
            ScalarType::I32 | ScalarType::U32 | ScalarType::F32 => 4,
            ScalarType::F64 => 8,
        }
    }

    /// Largest representable value for integer types.
    fn integer_max(self) -> Option<f64> {
        match self {
            ScalarType::I8 => Some(i8::MAX as f64),
            ScalarType::U8 => Some(u8::MAX as f64),
            ScalarType::I16 => Some(i16::MAX as f64),
            ScalarType::U16 => Some(u16::MAX as f64),
            ScalarType::I32 => Some(i32::MAX as f64),
            ScalarType::U32 => Some(u32::MAX as f64),
            ScalarType::F32 | ScalarType::F64 => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum PropertyKind {
    Scalar(ScalarType),
    List { count: ScalarType, item: ScalarType },
}

#[derive(Debug, Clone)]
struct PlyProperty {
    name: String,
    kind: PropertyKind,
}

#[derive(Debug, Clone)]
struct PlyElement {
    name: String,
    count: usize,
    properties: Vec<PlyProperty>,
}

impl PlyElement {
    /// Smallest possible binary record, used to reject impossible counts early.
    fn min_record_size(&self) -> usize {
        self.properties
            .iter()
            .map(|p| match p.kind {
                PropertyKind::Scalar(ty) => ty.size(),
                PropertyKind::List { count, .. } => count.size(),
            })
            .sum()
    }

    fn scalar_index(&self, name: &str) -> Option<(usize, ScalarType)> {
        self.properties
            .iter()
            .enumerate()
            .find_map(|(i, p)| match p.kind {
                PropertyKind::Scalar(ty) if p.name == name => Some((i, ty)),
                _ => None,
            })
    }
}

#[derive(Debug)]
struct PlyHeader {
    encoding: PlyEncoding,
    elements: Vec<PlyElement>,
    body_offset: usize,
}

fn parse_ply_header(bytes: &[u8]) -> Result<PlyHeader> {
    let mut offset = 0;
    let mut encoding = None;
    let mut elements: Vec<PlyElement> = Vec::new();
    let mut first = true;

    loop {
        let rest = &bytes[offset..];
        let line_len = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| LoaderError::InvalidHeader("missing end_header".to_string()))?;
        let raw_line = &rest[..line_len];
        offset += line_len + 1;

        let line = std::str::from_utf8(raw_line)
            .map_err(|_| LoaderError::InvalidHeader("header is not valid UTF-8".to_string()))?
            .trim();

        if first {
            if line != "ply" {
                return Err(LoaderError::UnrecognizedHeader(format!(
                    "expected 'ply', found '{}'",
                    line
                )));
            }
            first = false;
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.first().copied() {
            None | Some("comment") | Some("obj_info") => {}
            Some("format") => {
                encoding = Some(match parts.get(1).copied() {
                    Some("ascii") => PlyEncoding::Ascii,
                    Some("binary_little_endian") => PlyEncoding::BinaryLittleEndian,
                    Some("binary_big_endian") => PlyEncoding::BinaryBigEndian,
                    other => {
                        return Err(LoaderError::UnrecognizedHeader(format!(
                            "unknown PLY format '{}'",
                            other.unwrap_or("")
                        )))
                    }
                });
            }
            Some("element") => {
                if parts.len() != 3 {
                    return Err(LoaderError::InvalidHeader(format!("malformed line '{}'", line)));
                }
                let count = parts[2].parse::<usize>().map_err(|_| {
                    LoaderError::InvalidHeader(format!("invalid element count '{}'", parts[2]))
                })?;
                elements.push(PlyElement {
                    name: parts[1].to_string(),
                    count,
                    properties: Vec::new(),
                });
            }
            Some("property") => {
                let element = elements.last_mut().ok_or_else(|| {
                    LoaderError::InvalidHeader("property declared before any element".to_string())
                })?;
                let scalar = |name: &str| {
                    ScalarType::parse(name).ok_or_else(|| {
                        LoaderError::InvalidHeader(format!("unknown property type '{}'", name))
                    })
                };
                let property = match parts.as_slice() {
                    ["property", "list", count, item, name] => PlyProperty {
                        name: name.to_string(),
                        kind: PropertyKind::List {
                            count: scalar(count)?,
                            item: scalar(item)?,
                        },
                    },
                    ["property", ty, name] => PlyProperty {
                        name: name.to_string(),
                        kind: PropertyKind::Scalar(scalar(ty)?),
                    },
                    _ => {
                        return Err(LoaderError::InvalidHeader(format!(
                            "malformed line '{}'",
                            line
                        )))
                    }
                };
                element.properties.push(property);
            }
            Some("end_header") => break,
            Some(other) => {
                return Err(LoaderError::InvalidHeader(format!(
                    "unexpected keyword '{}'",
                    other
                )))
            }
        }
    }

    let encoding =
        encoding.ok_or_else(|| LoaderError::InvalidHeader("missing format line".to_string()))?;

    Ok(PlyHeader {
        encoding,
        elements,
        body_offset: offset,
    })
}

/// Source of property values for one PLY body encoding.
trait ValueReader {
    /// Read one value of type `ty`; `None` when the payload is exhausted.
    fn read(&mut self, ty: ScalarType) -> Result<Option<f64>>;
    /// Called before each record.
    fn begin_record(&mut self) -> Result<bool>;
    /// Called after each record.
    fn end_record(&mut self) -> Result<()>;
    /// Bytes or tokens left over once every element is consumed.
    fn trailing(&mut self) -> Option<String>;
    /// Upper bound on how many records could still be read.
    fn capacity_hint(&self, element: &PlyElement) -> usize;
}

struct BinaryReader<'a> {
    data: &'a [u8],
    pos: usize,
    big_endian: bool,
}

impl BinaryReader<'_> {
    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let end = self.pos.checked_add(N)?;
        let slice = self.data.get(self.pos..end)?;
        self.pos = end;
        let mut buf = [0u8; N];
        buf.copy_from_slice(slice);
        if self.big_endian {
            buf.reverse();
        }
        Some(buf)
    }
}

impl ValueReader for BinaryReader<'_> {
    fn read(&mut self, ty: ScalarType) -> Result<Option<f64>> {
        let value = match ty {
            ScalarType::I8 => self.take::<1>().map(|b| i8::from_le_bytes(b) as f64),
            ScalarType::U8 => self.take::<1>().map(|b| b[0] as f64),
            ScalarType::I16 => self.take::<2>().map(|b| i16::from_le_bytes(b) as f64),
            ScalarType::U16 => self.take::<2>().map(|b| u16::from_le_bytes(b) as f64),
            ScalarType::I32 => self.take::<4>().map(|b| i32::from_le_bytes(b) as f64),
            ScalarType::U32 => self.take::<4>().map(|b| u32::from_le_bytes(b) as f64),
            ScalarType::F32 => self.take::<4>().map(|b| f32::from_le_bytes(b) as f64),
            ScalarType::F64 => self.take::<8>().map(f64::from_le_bytes),
        };
        Ok(value)
    }

    fn begin_record(&mut self) -> Result<bool> {
        Ok(self.pos < self.data.len())
    }

    fn end_record(&mut self) -> Result<()> {
        Ok(())
    }

    fn trailing(&mut self) -> Option<String> {
        let left = self.data.len() - self.pos;
        (left > 0).then(|| format!("{} trailing bytes after the declared elements", left))
    }

    fn capacity_hint(&self, element: &PlyElement) -> usize {
        let remaining = self.data.len() - self.pos;
        match element.min_record_size() {
            0 => element.count,
            size => element.count.min(remaining / size),
        }
    }
}

struct AsciiReader<'a> {
    lines: std::iter::Peekable<std::str::Lines<'a>>,
    tokens: std::str::SplitWhitespace<'a>,
    line_no: usize,
    remaining_len: usize,
}

impl<'a> AsciiReader<'a> {
    fn new(body: &'a str) -> Self {
        Self {
            lines: body.lines().peekable(),
            tokens: "".split_whitespace(),
            line_no: 0,
            remaining_len: body.len(),
        }
    }
}

impl ValueReader for AsciiReader<'_> {
    fn read(&mut self, _ty: ScalarType) -> Result<Option<f64>> {
        let token = self.tokens.next().ok_or_else(|| {
            LoaderError::ParseError(format!("too few values on body line {}", self.line_no))
        })?;
        token.parse::<f64>().map(Some).map_err(|_| {
            LoaderError::ParseError(format!(
                "invalid value '{}' on body line {}",
                token, self.line_no
            ))
        })
    }

    fn begin_record(&mut self) -> Result<bool> {
        for line in self.lines.by_ref() {
            self.line_no += 1;
            self.remaining_len = self.remaining_len.saturating_sub(line.len() + 1);
            if !line.trim().is_empty() {
                self.tokens = line.split_whitespace();
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn end_record(&mut self) -> Result<()> {
        if self.tokens.next().is_some() {
            return Err(LoaderError::LengthMismatch(format!(
                "more values than declared properties on body line {}",
                self.line_no
            )));
        }
        Ok(())
    }

    fn trailing(&mut self) -> Option<String> {
        let extra = self.lines.by_ref().filter(|l| !l.trim().is_empty()).count();
        (extra > 0).then(|| format!("{} lines after the declared elements", extra))
    }

    fn capacity_hint(&self, element: &PlyElement) -> usize {
        // Every record needs at least one character and a newline.
        element.count.min(self.remaining_len / 2 + 1)
    }
}

/// Column positions of the vertex properties the analysis cares about.
struct VertexLayout {
    xyz: [usize; 3],
    opacity: Option<usize>,
    alpha: Option<(usize, ScalarType)>,
    scale: Option<[usize; 3]>,
    rgb: Option<([usize; 3], ScalarType)>,
    f_dc: Option<[usize; 3]>,
}

impl VertexLayout {
    fn from_element(element: &PlyElement) -> Result<Self> {
        let require = |name: &str| {
            element
                .scalar_index(name)
                .map(|(i, _)| i)
                .ok_or_else(|| LoaderError::MissingProperty(name.to_string()))
        };
        let optional3 = |names: [&str; 3]| -> Option<[usize; 3]> {
            Some([
                element.scalar_index(names[0])?.0,
                element.scalar_index(names[1])?.0,
                element.scalar_index(names[2])?.0,
            ])
        };

        let rgb = optional3(["red", "green", "blue"]).and_then(|idx| {
            element
                .scalar_index("red")
                .map(|(_, ty)| (idx, ty))
        });

        Ok(Self {
            xyz: [require("x")?, require("y")?, require("z")?],
            opacity: element.scalar_index("opacity").map(|(i, _)| i),
            alpha: element.scalar_index("alpha"),
            scale: optional3(["scale_0", "scale_1", "scale_2"]),
            rgb,
            f_dc: optional3(["f_dc_0", "f_dc_1", "f_dc_2"]),
        })
    }

    fn color(&self, values: &[f64]) -> Option<[u8; 3]> {
        if let Some((idx, ty)) = self.rgb {
            let to_byte = |v: f64| match ty.integer_max() {
                Some(max) => (v / max * 255.0).round().clamp(0.0, 255.0) as u8,
                None => (v * 255.0).round().clamp(0.0, 255.0) as u8,
            };
            return Some(idx.map(|i| to_byte(values[i])));
        }
        self.f_dc.map(|idx| {
            idx.map(|i| ((0.5 + SH_C0 * values[i] as f32).clamp(0.0, 1.0) * 255.0).round() as u8)
        })
    }
}

fn parse_ply(bytes: &[u8], encoding: OpacityEncoding) -> Result<PointSet> {
    let header = parse_ply_header(bytes)?;
    let body = &bytes[header.body_offset..];

    if !header.elements.iter().any(|e| e.name == "vertex") {
        return Err(LoaderError::MissingProperty("vertex element".to_string()));
    }

    match header.encoding {
        PlyEncoding::Ascii => {
            let text = std::str::from_utf8(body)
                .map_err(|_| LoaderError::ParseError("ASCII body is not valid UTF-8".to_string()))?;
            read_ply_body(&header, AsciiReader::new(text), encoding)
        }
        PlyEncoding::BinaryLittleEndian | PlyEncoding::BinaryBigEndian => {
            let reader = BinaryReader {
                data: body,
                pos: 0,
                big_endian: header.encoding == PlyEncoding::BinaryBigEndian,
            };
            read_ply_body(&header, reader, encoding)
        }
    }
}

fn read_ply_body<R: ValueReader>(
    header: &PlyHeader,
    mut reader: R,
    encoding: OpacityEncoding,
) -> Result<PointSet> {
    let mut vertices: Option<PointSet> = None;

    for element in &header.elements {
        let is_vertex = element.name == "vertex" && vertices.is_none();

        if reader.capacity_hint(element) < element.count
            && element.min_record_size() > 0
            && !matches!(header.encoding, PlyEncoding::Ascii)
        {
            return Err(LoaderError::Truncated(format!(
                "element '{}' declares {} records but the payload is too short",
                element.name, element.count
            )));
        }

        let layout = if is_vertex {
            Some(VertexLayout::from_element(element)?)
        } else {
            None
        };

        let capacity = reader.capacity_hint(element);
        let mut values = vec![0.0f64; element.properties.len()];
        let mut positions: Vec<[f32; 3]> = Vec::with_capacity(if is_vertex { capacity } else { 0 });
        let mut raw_opacity: Vec<f32> = Vec::with_capacity(if is_vertex { capacity } else { 0 });
        let mut extras: Vec<(Option<[f32; 3]>, Option<[u8; 3]>)> =
            Vec::with_capacity(if is_vertex { capacity } else { 0 });

        for record in 0..element.count {
            let truncated = || {
                LoaderError::Truncated(format!(
                    "element '{}' ends at record {} of {}",
                    element.name, record, element.count
                ))
            };

            if !reader.begin_record()? {
                return Err(truncated());
            }

            for (slot, property) in values.iter_mut().zip(&element.properties) {
                match property.kind {
                    PropertyKind::Scalar(ty) => {
                        *slot = reader.read(ty)?.ok_or_else(truncated)?;
                    }
                    PropertyKind::List { count, item } => {
                        let n = reader.read(count)?.ok_or_else(truncated)?;
                        if n < 0.0 || n.fract() != 0.0 {
                            return Err(LoaderError::ParseError(format!(
                                "invalid list length {} in element '{}'",
                                n, element.name
                            )));
                        }
                        for _ in 0..n as usize {
                            reader.read(item)?.ok_or_else(truncated)?;
                        }
                        *slot = f64::NAN;
                    }
                }
            }
            reader.end_record()?;

            if let Some(layout) = &layout {
                positions.push(layout.xyz.map(|i| values[i] as f32));
                raw_opacity.push(match (layout.opacity, layout.alpha) {
                    (Some(i), _) => values[i] as f32,
                    (None, Some((i, ty))) => match ty.integer_max() {
                        Some(max) => (values[i] / max) as f32,
                        None => values[i] as f32,
                    },
                    (None, None) => 1.0,
                });
                let scale = layout.scale.map(|idx| idx.map(|i| (values[i] as f32).exp()));
                extras.push((scale, layout.color(&values)));
            }
        }

        if let Some(layout) = layout {
            let opacity = decode_opacity(raw_opacity, layout.opacity.is_some(), encoding);
            let mut set = PointSet::with_capacity(positions.len());
            for ((position, opacity), (scale, color)) in positions.into_iter().zip(opacity).zip(extras)
            {
                set.push(Splat {
                    position,
                    opacity,
                    scale,
                    color,
                });
            }
            vertices = Some(set);
        }
    }

    if let Some(trailing) = reader.trailing() {
        return Err(LoaderError::LengthMismatch(trailing));
    }

    vertices.ok_or_else(|| LoaderError::MissingProperty("vertex element".to_string()))
}

/// Map the raw opacity column into [0, 1].
///
/// Only a PLY `opacity` column is subject to `encoding`; `alpha` and the
/// implicit full opacity are already linear.
fn decode_opacity(raw: Vec<f32>, from_opacity_column: bool, encoding: OpacityEncoding) -> Vec<f32> {
    if !from_opacity_column {
        return raw;
    }

    let logits = match encoding {
        OpacityEncoding::Logit => true,
        OpacityEncoding::Linear => false,
        OpacityEncoding::Auto => raw.iter().any(|&v| v < 0.0),
    };

    if logits {
        raw.into_iter().map(sigmoid).collect()
    } else {
        raw
    }
}
