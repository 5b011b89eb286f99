//! Trace ingestion: heterogeneous availability history → one boolean per epoch
//!
//! Each region gets one raw trace source. Sources may be:
//!
//! - JSON arrays or objects of `0/1`, booleans, strings, `[timestamp, value]`
//!   pairs, or `{ "available": .. }` records
//! - Delimited text (comma, tab, semicolon, whitespace), with optional header
//!   rows
//! - Either of the above, LZ4 compressed
//!
//! Decoding returns an explicit `Result`. Ingestion never fails: a region whose
//! trace cannot be decoded becomes all-unavailable and the failure is recorded
//! in its [`IngestReport`].
//!
//! ## Resampling
//!
//! Native sample `i` covers `[i * sample_seconds, (i + 1) * sample_seconds)`.
//! The ratio `gap_seconds / sample_seconds` (native samples per epoch) is
//! reported for every region. [`Resample::Hold`] gives epoch `t` the sample
//! covering its start; [`Resample::AllOf`] marks the epoch available only if
//! every overlapping sample is. Epochs past the end of the data are
//! unavailable.

use std::borrow::Cow;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use skyhop_core::{EpochGrid, SkyhopError};
use thiserror::Error;
use tracing::{debug, warn};

/// LZ4 frame format magic number (little-endian 0x184D2204)
const LZ4_FRAME_MAGIC: [u8; 4] = [0x04, 0x22, 0x4D, 0x18];

/// Field names that hold availability, in lookup order
const AVAILABILITY_KEYS: &[&str] = &[
    "availability",
    "available",
    "data",
    "trace",
    "values",
    "spot",
];

const RESAMPLE_EPSILON: f64 = 1e-9;

/// Errors from decoding a single trace
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("LZ4 decompression failed: {0}")]
    Decompress(String),

    #[error("trace is not valid UTF-8")]
    Encoding,

    #[error("trace is empty")]
    Empty,

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("JSON trace has no availability array")]
    NoArray,

    #[error("unrecognized value {value:?} at sample {index}")]
    BadValue { index: usize, value: String },
}

/// Where a region's raw trace comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TraceSource {
    /// File on disk (`.lz4` extension hints at block compression)
    Path(PathBuf),
    /// Raw encoded bytes
    Bytes(Vec<u8>),
    /// Already-decoded samples
    Samples(Vec<bool>),
}

/// Meaning of a `true` sample, declared by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Polarity {
    /// `true` means spot is available
    #[default]
    AvailableIsTrue,
    /// `true` means spot is unavailable (e.g. a preemption log)
    AvailableIsFalse,
}

/// How native samples map onto epochs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Resample {
    /// Epoch takes the sample covering its start
    #[default]
    Hold,
    /// Epoch is available only if every overlapping sample is
    AllOf,
}

/// One region's trace input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSpec {
    pub source: TraceSource,
    /// Native sample period; `None` means one sample per epoch
    pub sample_seconds: Option<f64>,
    pub polarity: Polarity,
    pub resample: Resample,
}

impl TraceSpec {
    pub fn new(source: TraceSource) -> Self {
        Self {
            source,
            sample_seconds: None,
            polarity: Polarity::default(),
            resample: Resample::default(),
        }
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::new(TraceSource::Path(path.into()))
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(TraceSource::Bytes(bytes.into()))
    }

    pub fn from_samples(samples: Vec<bool>) -> Self {
        Self::new(TraceSource::Samples(samples))
    }

    /// Set the native sample period
    pub fn with_sample_seconds(mut self, seconds: f64) -> Self {
        self.sample_seconds = Some(seconds);
        self
    }

    /// Declare trace polarity
    pub fn with_polarity(mut self, polarity: Polarity) -> Self {
        self.polarity = polarity;
        self
    }

    /// Set the resampling mode
    pub fn with_resample(mut self, resample: Resample) -> Self {
        self.resample = resample;
        self
    }
}

/// Outcome of ingesting one region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IngestStatus {
    Loaded { samples: usize },
    Degraded { reason: String },
}

/// Per-region ingestion summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub region: usize,
    pub status: IngestStatus,
    /// Native samples per epoch (`gap_seconds / sample_seconds`)
    pub resample_ratio: f64,
    pub available_epochs: usize,
}

impl IngestReport {
    pub fn is_degraded(&self) -> bool {
        matches!(self.status, IngestStatus::Degraded { .. })
    }
}

/// Normalizes raw traces onto the epoch grid
#[derive(Debug, Clone, Copy)]
pub struct TraceIngestor {
    grid: EpochGrid,
    horizon: usize,
}

impl TraceIngestor {
    /// Create an ingestor producing arrays of length `horizon`
    pub fn new(grid: EpochGrid, horizon: usize) -> Self {
        Self { grid, horizon }
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    /// Ingest one region; never fails
    pub fn ingest_region(&self, region: usize, spec: &TraceSpec) -> (Vec<bool>, IngestReport) {
        let sample_seconds = spec
            .sample_seconds
            .filter(|s| s.is_finite() && *s > 0.0)
            .unwrap_or(self.grid.gap_seconds);
        let resample_ratio = self.grid.gap_seconds / sample_seconds;

        let (availability, status) = match load_samples(&spec.source) {
            Ok(mut samples) => {
                if spec.polarity == Polarity::AvailableIsFalse {
                    samples.iter_mut().for_each(|s| *s = !*s);
                }
                let count = samples.len();
                let epochs = resample(
                    &samples,
                    sample_seconds,
                    self.grid.gap_seconds,
                    self.horizon,
                    spec.resample,
                );
                (epochs, IngestStatus::Loaded { samples: count })
            }
            Err(e) => {
                let err = SkyhopError::trace_parse(region, e.to_string());
                warn!(error = %err, "Trace unusable, treating region as never available");
                (
                    vec![false; self.horizon],
                    IngestStatus::Degraded {
                        reason: e.to_string(),
                    },
                )
            }
        };

        let available_epochs = availability.iter().filter(|a| **a).count();
        debug!(
            region,
            resample_ratio,
            available_epochs,
            horizon = self.horizon,
            "Ingested trace"
        );

        (
            availability,
            IngestReport {
                region,
                status,
                resample_ratio,
                available_epochs,
            },
        )
    }

    /// Ingest every region in order
    pub fn ingest_all(&self, specs: &[TraceSpec]) -> (Vec<Vec<bool>>, Vec<IngestReport>) {
        specs
            .iter()
            .enumerate()
            .map(|(region, spec)| self.ingest_region(region, spec))
            .unzip()
    }
}

/// Load raw samples (before polarity and resampling)
pub fn load_samples(source: &TraceSource) -> Result<Vec<bool>, TraceError> {
    match source {
        TraceSource::Samples(samples) if samples.is_empty() => Err(TraceError::Empty),
        TraceSource::Samples(samples) => Ok(samples.clone()),
        TraceSource::Bytes(bytes) => decode_trace(bytes, false),
        TraceSource::Path(path) => {
            let bytes = std::fs::read(path).map_err(|source| TraceError::Io {
                path: path.clone(),
                source,
            })?;
            decode_trace(&bytes, has_lz4_extension(path))
        }
    }
}

fn has_lz4_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("lz4"))
}

/// Decode an encoded trace into raw samples.
///
/// `block_lz4` requests size-prepended LZ4 block decoding when the bytes do
/// not start with an LZ4 frame header.
pub fn decode_trace(bytes: &[u8], block_lz4: bool) -> Result<Vec<bool>, TraceError> {
    let raw = decompress(bytes, block_lz4)?;
    let text = std::str::from_utf8(&raw).map_err(|_| TraceError::Encoding)?;
    let text = text.trim_start_matches('\u{feff}').trim();
    if text.is_empty() {
        return Err(TraceError::Empty);
    }

    let samples = if text.starts_with('[') || text.starts_with('{') {
        let root: Value = serde_json::from_str(text)?;
        json_samples(&root)?
    } else {
        delimited_samples(text)?
    };

    if samples.is_empty() {
        return Err(TraceError::Empty);
    }
    Ok(samples)
}

fn decompress(bytes: &[u8], block_lz4: bool) -> Result<Cow<'_, [u8]>, TraceError> {
    if bytes.starts_with(&LZ4_FRAME_MAGIC) {
        let mut out = Vec::new();
        lz4_flex::frame::FrameDecoder::new(bytes)
            .read_to_end(&mut out)
            .map_err(|e| TraceError::Decompress(e.to_string()))?;
        return Ok(Cow::Owned(out));
    }
    if block_lz4 {
        return lz4_flex::decompress_size_prepended(bytes)
            .map(Cow::Owned)
            .map_err(|e| TraceError::Decompress(e.to_string()));
    }
    Ok(Cow::Borrowed(bytes))
}

fn parse_token(token: &str) -> Option<bool> {
    let token = token.trim().trim_matches(|c| c == '"' || c == '\'');
    match token.to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" | "available" | "up" => Some(true),
        "0" | "false" | "f" | "no" | "n" | "unavailable" | "down" => Some(false),
        other => other
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(|v| v != 0.0),
    }
}

fn json_value(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        Value::String(s) => parse_token(s),
        // [timestamp, value] pairs
        Value::Array(items) => items.last().and_then(json_value),
        Value::Object(map) => AVAILABILITY_KEYS
            .iter()
            .find_map(|k| map.get(*k))
            .and_then(json_value),
        Value::Null => None,
    }
}

fn json_samples(root: &Value) -> Result<Vec<bool>, TraceError> {
    let items = match root {
        Value::Array(items) => items,
        Value::Object(map) => AVAILABILITY_KEYS
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_array))
            .or_else(|| map.values().find_map(Value::as_array))
            .ok_or(TraceError::NoArray)?,
        _ => return Err(TraceError::NoArray),
    };

    items
        .iter()
        .enumerate()
        .map(|(index, v)| {
            json_value(v).ok_or_else(|| TraceError::BadValue {
                index,
                value: v.to_string(),
            })
        })
        .collect()
}

fn delimited_samples(text: &str) -> Result<Vec<bool>, TraceError> {
    let rows: Vec<Vec<&str>> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            line.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
        })
        .filter(|row| !row.is_empty())
        .collect();

    match rows.as_slice() {
        [] => Err(TraceError::Empty),
        // One line of many values
        [row] => row
            .iter()
            .enumerate()
            .map(|(index, token)| {
                parse_token(token).ok_or_else(|| TraceError::BadValue {
                    index,
                    value: token.to_string(),
                })
            })
            .collect(),
        // One sample per line, value in the last column
        _ => {
            let start = header_rows(&rows);
            if start == rows.len() {
                return Err(TraceError::Empty);
            }
            rows[start..]
                .iter()
                .enumerate()
                .map(|(index, row)| {
                    let token = row.last().copied().unwrap_or_default();
                    parse_token(token).ok_or_else(|| TraceError::BadValue {
                        index,
                        value: token.to_string(),
                    })
                })
                .collect()
        }
    }
}

/// Number of leading header rows.
///
/// A leading row without a numeric token is a header if it holds a token
/// that is not a sample value, or if numbers appear further down. The latter
/// catches headers such as `t,up` whose words happen to parse as samples.
fn header_rows(rows: &[Vec<&str>]) -> usize {
    let numeric_body = rows.iter().any(|row| has_numeric(row));
    rows.iter()
        .take_while(|row| {
            !has_numeric(row)
                && (numeric_body || row.iter().any(|t| parse_token(t).is_none()))
        })
        .count()
}

fn has_numeric(row: &[&str]) -> bool {
    row.iter().any(|t| t.trim().parse::<f64>().is_ok())
}

/// Map native samples onto `len` epochs of `gap_seconds`
pub fn resample(
    samples: &[bool],
    sample_seconds: f64,
    gap_seconds: f64,
    len: usize,
    mode: Resample,
) -> Vec<bool> {
    let valid = |v: f64| v.is_finite() && v > 0.0;
    if samples.is_empty() || !valid(sample_seconds) || !valid(gap_seconds) {
        return vec![false; len];
    }

    // Native samples per epoch
    let ratio = gap_seconds / sample_seconds;

    (0..len)
        .map(|t| {
            let first = (t as f64 * ratio + RESAMPLE_EPSILON).floor() as usize;
            match mode {
                Resample::Hold => samples.get(first).copied().unwrap_or(false),
                Resample::AllOf => {
                    let end = ((t + 1) as f64 * ratio - RESAMPLE_EPSILON).ceil() as usize;
                    let end = end.max(first + 1);
                    end <= samples.len() && samples[first..end].iter().all(|a| *a)
                }
            }
        })
        .collect()
}
