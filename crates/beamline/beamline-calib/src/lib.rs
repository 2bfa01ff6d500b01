//! Jungfrau 1M gain-switched calibration engine (spec component C3).

use beamline_events::{CalibrationConstants, Frame, GainStage, RawFrame};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum CalibError {
    #[error("cannot read calibration constants file '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("calibration constants file '{path}' has {found} bytes, expected {expected}")]
    SizeMismatch {
        path: String,
        found: usize,
        expected: usize,
    },
    #[error("raw frame shape {actual:?} does not match calibration constants shape {expected:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },
}

/// Paths to the six raw constants files (dark/gain for each of 3 gain
/// stages), all stored as flat, row-major, little-endian buffers of shape
/// `(rows, cols)`.
///
/// Reading these is not an HDF5/geometry concern — they are opaque raw
/// buffers, not facility file formats — so a plain `std::fs::read` is used
/// rather than pulling in an HDF5 dependency here (that stays confined to
/// `beamline-writer`'s output side).
pub struct CalibrationFilePaths {
    pub dark: [PathBuf; 3],
    pub gain: [PathBuf; 3],
}

fn read_f32_array(path: &Path, rows: usize, cols: usize) -> Result<ndarray::Array2<f32>, CalibError> {
    let bytes = std::fs::read(path).map_err(|source| CalibError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let expected = rows * cols * 4;
    if bytes.len() != expected {
        return Err(CalibError::SizeMismatch {
            path: path.display().to_string(),
            found: bytes.len(),
            expected,
        });
    }
    let values: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(ndarray::Array2::from_shape_vec((rows, cols), values).expect("shape checked above"))
}

fn read_f64_array(path: &Path, rows: usize, cols: usize) -> Result<ndarray::Array2<f64>, CalibError> {
    let bytes = std::fs::read(path).map_err(|source| CalibError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let expected = rows * cols * 8;
    if bytes.len() != expected {
        return Err(CalibError::SizeMismatch {
            path: path.display().to_string(),
            found: bytes.len(),
            expected,
        });
    }
    let values: Vec<f64> = bytes
        .chunks_exact(8)
        .map(|c| f64::from_le_bytes(c.try_into().unwrap()))
        .collect();
    Ok(ndarray::Array2::from_shape_vec((rows, cols), values).expect("shape checked above"))
}

/// Per-frame pixel-wise correction for gain-switched detectors.
///
/// Construction either succeeds with a fully-populated set of constants or
/// fails outright — there is no partially-initialized state (spec: "if any
/// constants file is unreadable, construction fails").
pub struct CalibrationEngine {
    constants: CalibrationConstants,
}

impl CalibrationEngine {
    pub fn new(constants: CalibrationConstants) -> Self {
        Self { constants }
    }

    pub fn from_raw_files(
        paths: &CalibrationFilePaths,
        rows: usize,
        cols: usize,
        photon_energy_kev: f64,
    ) -> Result<Self, CalibError> {
        let dark = [
            read_f32_array(&paths.dark[0], rows, cols)?,
            read_f32_array(&paths.dark[1], rows, cols)?,
            read_f32_array(&paths.dark[2], rows, cols)?,
        ];
        let gain = [
            read_f64_array(&paths.gain[0], rows, cols)?,
            read_f64_array(&paths.gain[1], rows, cols)?,
            read_f64_array(&paths.gain[2], rows, cols)?,
        ];
        Ok(Self::new(CalibrationConstants {
            dark,
            gain,
            photon_energy_kev,
        }))
    }

    pub fn shape(&self) -> (usize, usize) {
        self.constants.shape()
    }

    /// Applies the calibration to a raw frame, writing into `out` (reused
    /// across events on the hot path rather than freshly allocated).
    ///
    /// Pixels are grouped by decoded gain stage first, then each group is
    /// corrected in a single pass with no per-pixel branch on gain — the
    /// three gain regions are disjoint pixel sets processed independently.
    pub fn calibrate_into(&self, raw: &RawFrame, out: &mut Frame) -> Result<(), CalibError> {
        let expected = self.shape();
        let actual = raw.dim();
        if actual != expected {
            return Err(CalibError::ShapeMismatch { expected, actual });
        }
        if out.dim() != actual {
            *out = Frame::zeros(actual);
        }

        let n = raw.len();
        let mut groups: [Vec<usize>; 3] = [Vec::new(), Vec::new(), Vec::new()];
        let raw_flat = raw.as_slice().expect("raw frame must be contiguous");
        for (idx, &v) in raw_flat.iter().enumerate() {
            let g = GainStage::decode(v) as usize;
            groups[g].push(idx);
        }

        let dark_flat: [&[f32]; 3] = [
            self.constants.dark[0].as_slice().unwrap(),
            self.constants.dark[1].as_slice().unwrap(),
            self.constants.dark[2].as_slice().unwrap(),
        ];
        let gain_flat: [&[f64]; 3] = [
            self.constants.gain[0].as_slice().unwrap(),
            self.constants.gain[1].as_slice().unwrap(),
            self.constants.gain[2].as_slice().unwrap(),
        ];
        let out_flat = out.as_slice_mut().expect("output frame must be contiguous");

        debug_assert_eq!(
            groups[0].len() + groups[1].len() + groups[2].len(),
            n,
            "every pixel must be claimed by exactly one gain region"
        );

        for g in 0..3 {
            let d = dark_flat[g];
            let gn = gain_flat[g];
            let denom_scale = self.constants.photon_energy_kev;
            for &idx in &groups[g] {
                let v = (raw_flat[idx] & 0x3FFF) as f32;
                out_flat[idx] = (v - d[idx]) / (gn[idx] as f32 * denom_scale as f32);
            }
        }

        Ok(())
    }

    pub fn calibrate(&self, raw: &RawFrame) -> Result<Frame, CalibError> {
        let mut out = Frame::zeros(raw.dim());
        self.calibrate_into(raw, &mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn single_pixel_constants(dark0: f32, gain0: f64) -> CalibrationConstants {
        CalibrationConstants {
            dark: [array![[dark0]], array![[0.0f32]], array![[200.0f32]]],
            gain: [array![[gain0]], array![[1.0f64]], array![[1.0f64]]],
            photon_energy_kev: 10.0,
        }
    }

    /// S2: calibration of one gain-0 pixel.
    #[test]
    fn gain0_pixel_calibration() {
        let constants = single_pixel_constants(500.0, 2.0);
        let engine = CalibrationEngine::new(CalibrationConstants {
            photon_energy_kev: 10.0,
            ..constants
        });
        let raw = array![[1500u16]];
        let calibrated = engine.calibrate(&raw).unwrap();
        assert!((calibrated[[0, 0]] - 50.0).abs() < 1e-5);
    }

    /// S3: calibration of a gain-2 pixel (bit 15 set).
    #[test]
    fn gain2_pixel_calibration() {
        let constants = CalibrationConstants {
            dark: [array![[0.0f32]], array![[0.0f32]], array![[200.0f32]]],
            gain: [array![[1.0f64]], array![[1.0f64]], array![[1.0f64]]],
            photon_energy_kev: 8.0,
        };
        let engine = CalibrationEngine::new(constants);
        let raw = array![[0x8000u16 | 4000u16]];
        let calibrated = engine.calibrate(&raw).unwrap();
        assert!((calibrated[[0, 0]] - 475.0).abs() < 1e-3);
    }

    /// Property 4: every pixel is claimed by exactly one gain region.
    #[test]
    fn gain_decode_partitions_all_values() {
        for raw in [0u16, 0x4000, 0x8000, 0xC000, 0x1234, 0x7FFF] {
            let g = GainStage::decode(raw);
            let bit14 = raw & 0x4000 != 0;
            let bit15 = raw & 0x8000 != 0;
            match g {
                GainStage::G0 => assert!(!bit14 && !bit15),
                GainStage::G1 => assert!(bit14 && !bit15),
                GainStage::G2 => assert!(bit15),
            }
        }
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let constants = single_pixel_constants(0.0, 1.0);
        let engine = CalibrationEngine::new(constants);
        let raw = array![[1u16, 2u16]];
        assert!(matches!(
            engine.calibrate(&raw),
            Err(CalibError::ShapeMismatch { .. })
        ));
    }
}
