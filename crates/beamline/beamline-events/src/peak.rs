use serde::{Deserialize, Serialize};

/// A single detected Bragg peak.
///
/// `fs`/`ss` are fractional sub-pixel coordinates in the panel's fast/slow
/// scan axes. Plain-old-data and `Copy`, the way `lithos-events::TopOfBook`
/// is kept small and bitwise-copyable for cheap passing through the
/// pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    pub fs: f32,
    pub ss: f32,
    pub intensity: f32,
    pub num_pixels: u32,
    pub max_pixel_intensity: f32,
    pub snr: f32,
}

/// Bounded list of peaks found in one frame.
///
/// `num_peaks() <= max_num_peaks` is an invariant enforced by `push`: once
/// the list is full, further peaks are silently dropped rather than
/// reallocating past the configured bound (spec: "If num_peaks >
/// max_num_peaks, truncate, keep insertion order").
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PeakList {
    max_num_peaks: usize,
    peaks: Vec<Peak>,
}

impl PeakList {
    pub fn new(max_num_peaks: usize) -> Self {
        Self {
            max_num_peaks,
            peaks: Vec::new(),
        }
    }

    /// Appends a peak if the list has not yet reached `max_num_peaks`.
    /// Returns `false` if the peak was dropped for being over the bound.
    pub fn push(&mut self, peak: Peak) -> bool {
        if self.peaks.len() >= self.max_num_peaks {
            return false;
        }
        self.peaks.push(peak);
        true
    }

    pub fn num_peaks(&self) -> u32 {
        self.peaks.len() as u32
    }

    pub fn max_num_peaks(&self) -> usize {
        self.max_num_peaks
    }

    pub fn peaks(&self) -> &[Peak] {
        &self.peaks
    }

    pub fn is_full(&self) -> bool {
        self.peaks.len() >= self.max_num_peaks
    }
}

/// Fixed panel geometry for a detector: a frame of `(nasics_y*asic_ny) x
/// (nasics_x*asic_nx)` pixels, logically tiled into `nasics_y x nasics_x`
/// equally sized panels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peakfinder8Info {
    pub asic_nx: u32,
    pub asic_ny: u32,
    pub nasics_x: u32,
    pub nasics_y: u32,
}

impl Peakfinder8Info {
    pub fn frame_rows(&self) -> u32 {
        self.nasics_y * self.asic_ny
    }

    pub fn frame_cols(&self) -> u32 {
        self.nasics_x * self.asic_nx
    }

    /// Validates that a frame of the given shape matches this panel
    /// geometry. Violating this is a `Bug` per the error taxonomy: the
    /// caller passed a frame that doesn't match the detector it configured.
    pub fn validate_shape(&self, rows: usize, cols: usize) -> Result<(), ShapeMismatch> {
        if rows as u32 != self.frame_rows() || cols as u32 != self.frame_cols() {
            return Err(ShapeMismatch {
                expected: (self.frame_rows() as usize, self.frame_cols() as usize),
                actual: (rows, cols),
            });
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("frame shape {actual:?} does not match peakfinder8 info (expected {expected:?})")]
pub struct ShapeMismatch {
    pub expected: (usize, usize),
    pub actual: (usize, usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_list_caps_at_max() {
        let mut list = PeakList::new(2);
        assert!(list.push(Peak::default()));
        assert!(list.push(Peak::default()));
        assert!(!list.push(Peak::default()));
        assert_eq!(list.num_peaks(), 2);
        assert!(list.is_full());
    }

    #[test]
    fn shape_validation() {
        let info = Peakfinder8Info {
            asic_nx: 2,
            asic_ny: 2,
            nasics_x: 3,
            nasics_y: 4,
        };
        assert_eq!(info.frame_rows(), 8);
        assert_eq!(info.frame_cols(), 6);
        assert!(info.validate_shape(8, 6).is_ok());
        assert!(info.validate_shape(8, 7).is_err());
    }
}
