//! Wire and in-process data types shared across the pipeline.
//!
//! Kept dependency-free apart from `serde`/`ndarray`, the way `lithos-events`
//! holds only the types that cross the broadcast bus and nothing else.

mod calibration;
mod errors;
mod event;
mod peak;
mod value;

pub use calibration::{CalibrationConstants, GainStage};
pub use errors::DataExtractionError;
pub use event::{Event, ExtractedData};
pub use peak::{Peak, Peakfinder8Info, PeakList, ShapeMismatch as PeakShapeMismatch};
pub use value::Value;

/// 2D array of fractional pixel distance from the detector center, same
/// shape as the frame it corresponds to.
pub type RadiusMap = ndarray::Array2<f32>;

/// 2D mask, same shape as the frame: `0` excludes a pixel from the peak
/// search, `1` includes it.
pub type BadPixelMap = ndarray::Array2<u8>;

/// Calibrated detector frame (`f32`), same shape as the raw frame.
pub type Frame = ndarray::Array2<f32>;

/// Raw, uncalibrated 16-bit detector frame.
pub type RawFrame = ndarray::Array2<u16>;

/// Mapping from string key to scalar / peak list / small array, produced by
/// `Processor::process_data` and consumed by the collector.
///
/// Must always contain a `"timestamp"` entry (spec invariant).
pub type ProcessedResult = std::collections::BTreeMap<String, Value>;

/// Mapping from target-worker-rank to a sub-dictionary of values. Rank `0`
/// means "broadcast to all workers."
pub type FeedbackDict = std::collections::BTreeMap<u32, std::collections::BTreeMap<String, Value>>;
