//! Per-worker HDF5 output file (spec component C8 / spec.md §6).
//!
//! HDF5 is feature-gated behind `writer`, the way `easternanemone-rudaq`
//! gates its `storage_hdf5` backend behind `dep:hdf5` — a native HDF5
//! toolchain isn't always available, so the default build has no hard
//! dependency on it.

use beamline_events::{Frame, PeakList};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    /// Returned by every operation when the `writer` feature is off.
    #[error("HDF5 output support was not compiled in (enable the `writer` feature)")]
    Unavailable,
    #[error("cannot create output file '{path}'")]
    Create {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("HDF5 operation failed: {0}")]
    Hdf5(String),
}

/// Scalar per-frame metadata (spec.md §6's five scalar datasets).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameMeta {
    pub timestamp: f64,
    pub beam_energy: f64,
    pub detector_distance: f64,
    pub event_id: u64,
    pub pixel_size: f64,
}

/// Where to create the file and how to lay out its datasets.
#[derive(Clone, Debug)]
pub struct WriterConfig {
    /// Output file is `{prefix}{rank}{extension}`.
    pub path_prefix: PathBuf,
    pub rank: u32,
    pub extension: String,
    pub rows: usize,
    pub cols: usize,
    pub max_num_peaks: usize,
    /// `None` disables compression; `Some(level)` applies gzip at that
    /// level (0-9).
    pub gzip_level: Option<u8>,
}

impl WriterConfig {
    pub fn output_path(&self) -> PathBuf {
        let mut name = self.path_prefix.clone().into_os_string();
        name.push(self.rank.to_string());
        name.push(&self.extension);
        PathBuf::from(name)
    }
}

#[cfg(feature = "writer")]
mod hdf5_backend {
    use super::*;
    use ndarray::Array1;

    /// One open per-worker output file, appended to one frame at a time.
    ///
    /// Every dataset is resizable along axis 0 so frames can be appended
    /// without knowing the final event count up front.
    pub struct FrameWriter {
        file: hdf5::File,
        data: hdf5::Dataset,
        n_peaks: hdf5::Dataset,
        peak_x: hdf5::Dataset,
        peak_y: hdf5::Dataset,
        peak_intensity: hdf5::Dataset,
        peak_num_pixels: hdf5::Dataset,
        peak_max: hdf5::Dataset,
        peak_snr: hdf5::Dataset,
        timestamp: hdf5::Dataset,
        beam_energy: hdf5::Dataset,
        detector_distance: hdf5::Dataset,
        event_id: hdf5::Dataset,
        pixel_size: hdf5::Dataset,
        max_num_peaks: usize,
        count: u64,
    }

    fn resizable_1d<T: hdf5::H5Type>(
        group: &hdf5::Group,
        name: &str,
        gzip: Option<u8>,
    ) -> Result<hdf5::Dataset, WriterError> {
        let mut builder = group.new_dataset::<T>().shape((0..,)).chunk((1024,));
        if let Some(level) = gzip {
            builder = builder.deflate(level as u32);
        }
        builder
            .create(name)
            .map_err(|e| WriterError::Hdf5(e.to_string()))
    }

    fn resizable_2d<T: hdf5::H5Type>(
        group: &hdf5::Group,
        name: &str,
        width: usize,
        gzip: Option<u8>,
    ) -> Result<hdf5::Dataset, WriterError> {
        let mut builder = group
            .new_dataset::<T>()
            .shape((0.., width))
            .chunk((1, width));
        if let Some(level) = gzip {
            builder = builder.deflate(level as u32);
        }
        builder
            .create(name)
            .map_err(|e| WriterError::Hdf5(e.to_string()))
    }

    impl FrameWriter {
        pub fn create(config: &WriterConfig) -> Result<Self, WriterError> {
            let path = config.output_path();
            let file = hdf5::File::create(&path).map_err(|e| WriterError::Create {
                path: path.display().to_string(),
                source: std::io::Error::other(e.to_string()),
            })?;
            let entry = file
                .create_group("/entry/data")
                .map_err(|e| WriterError::Hdf5(e.to_string()))?;

            let mut data_builder = entry
                .new_dataset::<f32>()
                .shape((0.., config.rows, config.cols))
                .chunk((1, config.rows, config.cols));
            if let Some(level) = config.gzip_level {
                data_builder = data_builder.deflate(level as u32);
            }
            let data = data_builder
                .create("data")
                .map_err(|e| WriterError::Hdf5(e.to_string()))?;

            let peaks = file
                .create_group("/entry/data/peaks")
                .map_err(|e| WriterError::Hdf5(e.to_string()))?;
            let n = config.max_num_peaks;
            let n_peaks = resizable_1d::<u32>(&peaks, "nPeaks", config.gzip_level)?;
            let peak_x = resizable_2d::<f32>(&peaks, "peakXPosRaw", n, config.gzip_level)?;
            let peak_y = resizable_2d::<f32>(&peaks, "peakYPosRaw", n, config.gzip_level)?;
            let peak_intensity =
                resizable_2d::<f32>(&peaks, "peakTotalIntensity", n, config.gzip_level)?;
            let peak_num_pixels =
                resizable_2d::<u32>(&peaks, "peakNPixels", n, config.gzip_level)?;
            let peak_max = resizable_2d::<f32>(&peaks, "peakMaximumValue", n, config.gzip_level)?;
            let peak_snr = resizable_2d::<f32>(&peaks, "peakSNR", n, config.gzip_level)?;

            let timestamp = resizable_1d::<f64>(&entry, "timestamp", config.gzip_level)?;
            let beam_energy = resizable_1d::<f64>(&entry, "beam_energy", config.gzip_level)?;
            let detector_distance =
                resizable_1d::<f64>(&entry, "detector_distance", config.gzip_level)?;
            let event_id = resizable_1d::<u64>(&entry, "event_id", config.gzip_level)?;
            let pixel_size = resizable_1d::<f64>(&entry, "pixel_size", config.gzip_level)?;

            Ok(Self {
                file,
                data,
                n_peaks,
                peak_x,
                peak_y,
                peak_intensity,
                peak_num_pixels,
                peak_max,
                peak_snr,
                timestamp,
                beam_energy,
                detector_distance,
                event_id,
                pixel_size,
                max_num_peaks: config.max_num_peaks,
                count: 0,
            })
        }

        /// Appends one frame, its peak list (zero-padded to
        /// `max_num_peaks`), and its scalar metadata.
        pub fn append(
            &mut self,
            frame: &Frame,
            peaks: &PeakList,
            meta: FrameMeta,
        ) -> Result<(), WriterError> {
            let idx = self.count as usize;
            let next = self.count + 1;

            self.data
                .resize((next as usize, frame.nrows(), frame.ncols()))
                .map_err(|e| WriterError::Hdf5(e.to_string()))?;
            self.data
                .write_slice(frame, (idx, .., ..))
                .map_err(|e| WriterError::Hdf5(e.to_string()))?;

            let n = self.max_num_peaks;
            let mut xs = Array1::<f32>::zeros(n);
            let mut ys = Array1::<f32>::zeros(n);
            let mut intensity = Array1::<f32>::zeros(n);
            let mut num_pixels = Array1::<u32>::zeros(n);
            let mut max_val = Array1::<f32>::zeros(n);
            let mut snr = Array1::<f32>::zeros(n);
            for (i, p) in peaks.peaks().iter().take(n).enumerate() {
                xs[i] = p.fs;
                ys[i] = p.ss;
                intensity[i] = p.intensity;
                num_pixels[i] = p.num_pixels;
                max_val[i] = p.max_pixel_intensity;
                snr[i] = p.snr;
            }

            self.n_peaks
                .resize(next as usize)
                .map_err(|e| WriterError::Hdf5(e.to_string()))?;
            self.n_peaks
                .write_slice(&Array1::from_elem(1, peaks.num_peaks()), idx..idx + 1)
                .map_err(|e| WriterError::Hdf5(e.to_string()))?;

            for (ds, values) in [
                (&self.peak_x, &xs),
                (&self.peak_y, &ys),
                (&self.peak_intensity, &intensity),
            ] {
                ds.resize((next as usize, n))
                    .map_err(|e| WriterError::Hdf5(e.to_string()))?;
                ds.write_slice(values, (idx, ..))
                    .map_err(|e| WriterError::Hdf5(e.to_string()))?;
            }
            self.peak_num_pixels
                .resize((next as usize, n))
                .map_err(|e| WriterError::Hdf5(e.to_string()))?;
            self.peak_num_pixels
                .write_slice(&num_pixels, (idx, ..))
                .map_err(|e| WriterError::Hdf5(e.to_string()))?;
            self.peak_max
                .resize((next as usize, n))
                .map_err(|e| WriterError::Hdf5(e.to_string()))?;
            self.peak_max
                .write_slice(&max_val, (idx, ..))
                .map_err(|e| WriterError::Hdf5(e.to_string()))?;
            self.peak_snr
                .resize((next as usize, n))
                .map_err(|e| WriterError::Hdf5(e.to_string()))?;
            self.peak_snr
                .write_slice(&snr, (idx, ..))
                .map_err(|e| WriterError::Hdf5(e.to_string()))?;

            Self::append_scalar(&self.timestamp, idx, next, meta.timestamp)?;
            Self::append_scalar(&self.beam_energy, idx, next, meta.beam_energy)?;
            Self::append_scalar(&self.detector_distance, idx, next, meta.detector_distance)?;
            Self::append_scalar(&self.event_id, idx, next, meta.event_id)?;
            Self::append_scalar(&self.pixel_size, idx, next, meta.pixel_size)?;

            self.count = next;
            Ok(())
        }

        fn append_scalar<T: hdf5::H5Type>(
            ds: &hdf5::Dataset,
            idx: usize,
            next: u64,
            value: T,
        ) -> Result<(), WriterError> {
            ds.resize(next as usize)
                .map_err(|e| WriterError::Hdf5(e.to_string()))?;
            ds.write_slice(&Array1::from_elem(1, value), idx..idx + 1)
                .map_err(|e| WriterError::Hdf5(e.to_string()))?;
            Ok(())
        }

        pub fn num_frames(&self) -> u64 {
            self.count
        }

        pub fn close(self) -> Result<(), WriterError> {
            self.file.close().map_err(|e| WriterError::Hdf5(e.to_string()))
        }
    }
}

#[cfg(feature = "writer")]
pub use hdf5_backend::FrameWriter;

/// No-op stand-in used when the `writer` feature is disabled: every
/// operation reports `WriterError::Unavailable` rather than silently
/// discarding frames.
#[cfg(not(feature = "writer"))]
pub struct FrameWriter;

#[cfg(not(feature = "writer"))]
impl FrameWriter {
    pub fn create(_config: &WriterConfig) -> Result<Self, WriterError> {
        Err(WriterError::Unavailable)
    }

    pub fn append(&mut self, _frame: &Frame, _peaks: &PeakList, _meta: FrameMeta) -> Result<(), WriterError> {
        Err(WriterError::Unavailable)
    }

    pub fn num_frames(&self) -> u64 {
        0
    }

    pub fn close(self) -> Result<(), WriterError> {
        Err(WriterError::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &Path) -> WriterConfig {
        WriterConfig {
            path_prefix: dir.join("run-"),
            rank: 1,
            extension: ".h5".to_string(),
            rows: 4,
            cols: 4,
            max_num_peaks: 8,
            gzip_level: None,
        }
    }

    #[test]
    fn output_path_combines_prefix_rank_extension() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        assert_eq!(cfg.output_path(), dir.path().join("run-1.h5"));
    }

    #[cfg(not(feature = "writer"))]
    #[test]
    fn stub_reports_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        assert!(matches!(FrameWriter::create(&cfg), Err(WriterError::Unavailable)));
    }
}
