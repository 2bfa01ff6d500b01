//! Crystallography hit-finding `Processor`: wires calibration (C3),
//! peakfinder8 (C4), the radial profile engine (C5), and the broadcast
//! governor (C7) into the five-method contract of C6.

use crate::{Processor, ProcessorError};
use beamline_calib::{CalibrationEngine, CalibrationFilePaths};
use beamline_events::{
    BadPixelMap, DataExtractionError, ExtractedData, FeedbackDict, Peakfinder8Info,
    ProcessedResult, RadiusMap, RawFrame, Value,
};
use beamline_governor::{BroadcastGovernor, GovernorParams};
use beamline_peakfinder::{find_peaks, Peakfinder8Params};
use beamline_radial::{AcceptanceMode, RadialAggregator};
use beamline_writer::{FrameMeta, FrameWriter, WriterConfig};
use std::path::{Path, PathBuf};

/// Everything the processor needs to build its per-node state, supplied at
/// construction time (rank/pool_size aren't known until `init_worker`/
/// `init_collector` run).
pub struct CrystallographyParams {
    pub calibration_paths: CalibrationFilePaths,
    pub photon_energy_kev: f64,
    pub bad_pixel_map_path: PathBuf,
    pub radius_map_path: PathBuf,
    pub peakfinder_info: Peakfinder8Info,
    pub peakfinder_params: Peakfinder8Params,
    /// An event with at least this many peaks is classified a hit.
    pub hit_min_peaks: u32,
    pub radial_ring_capacity: usize,
    pub radial_mode: AcceptanceMode,
    pub governor: GovernorParams,
    /// `None` disables the per-worker HDF5 output file entirely.
    pub writer_config: Option<WriterConfig>,
}

fn read_bad_pixel_map(path: &Path, rows: usize, cols: usize) -> Result<BadPixelMap, ProcessorError> {
    let bytes = std::fs::read(path)
        .map_err(|e| ProcessorError::Fatal(format!("bad pixel map {}: {e}", path.display())))?;
    if bytes.len() != rows * cols {
        return Err(ProcessorError::Fatal(format!(
            "bad pixel map {} has {} bytes, expected {}",
            path.display(),
            bytes.len(),
            rows * cols
        )));
    }
    ndarray::Array2::from_shape_vec((rows, cols), bytes)
        .map_err(|e| ProcessorError::Fatal(e.to_string()))
}

fn read_radius_map(path: &Path, rows: usize, cols: usize) -> Result<RadiusMap, ProcessorError> {
    let bytes = std::fs::read(path)
        .map_err(|e| ProcessorError::Fatal(format!("radius map {}: {e}", path.display())))?;
    let expected = rows * cols * 4;
    if bytes.len() != expected {
        return Err(ProcessorError::Fatal(format!(
            "radius map {} has {} bytes, expected {}",
            path.display(),
            bytes.len(),
            expected
        )));
    }
    let values: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    ndarray::Array2::from_shape_vec((rows, cols), values)
        .map_err(|e| ProcessorError::Fatal(e.to_string()))
}

/// Per-integer-radius-bin mean intensity of unmasked pixels — the azimuthal
/// integration that feeds the radial profile engine (C5).
fn azimuthal_profile(frame: &ndarray::Array2<f32>, mask: &BadPixelMap, radius: &RadiusMap) -> Vec<f32> {
    let max_r = radius
        .iter()
        .zip(mask.iter())
        .filter(|(_, &m)| m != 0)
        .map(|(&r, _)| r)
        .fold(0.0f32, f32::max);
    let nbins = max_r.ceil() as usize + 1;
    let mut sum = vec![0.0f64; nbins];
    let mut n = vec![0u32; nbins];
    for ((idx, &v), &m) in frame.indexed_iter().zip(mask.iter()) {
        if m == 0 {
            continue;
        }
        let b = (radius[idx].floor() as usize).min(nbins - 1);
        sum[b] += v as f64;
        n[b] += 1;
    }
    sum.iter()
        .zip(n.iter())
        .map(|(&s, &c)| if c > 0 { (s / c as f64) as f32 } else { 0.0 })
        .collect()
}

/// Worker-side state: built in `init_worker`, never touched by the
/// collector methods on the same instance.
struct WorkerState {
    calib: CalibrationEngine,
    mask: BadPixelMap,
    radius: RadiusMap,
    writer: Option<FrameWriter>,
}

/// Collector-side state: built in `init_collector`.
struct CollectorState {
    governor: BroadcastGovernor,
    radial: RadialAggregator,
}

/// Classifies each event as hit/non-hit via peakfinder8 and aggregates a
/// running radial profile and hit rate on the collector.
///
/// One instance is constructed identically on every node; `init_worker`
/// populates `worker`, `init_collector` populates `collector` — exactly one
/// of the two is `Some` for the lifetime of a running node.
pub struct CrystallographyProcessor {
    params: CrystallographyParams,
    worker: Option<WorkerState>,
    collector: Option<CollectorState>,
}

impl CrystallographyProcessor {
    pub fn new(params: CrystallographyParams) -> Self {
        Self {
            params,
            worker: None,
            collector: None,
        }
    }
}

impl Processor for CrystallographyProcessor {
    fn init_worker(&mut self, rank: u32, _pool_size: u32) -> Result<(), ProcessorError> {
        let (rows, cols) = (
            self.params.peakfinder_info.frame_rows() as usize,
            self.params.peakfinder_info.frame_cols() as usize,
        );
        let calib = CalibrationEngine::from_raw_files(
            &self.params.calibration_paths,
            rows,
            cols,
            self.params.photon_energy_kev,
        )
        .map_err(|e| ProcessorError::Fatal(e.to_string()))?;
        let mask = read_bad_pixel_map(&self.params.bad_pixel_map_path, rows, cols)?;
        let radius = read_radius_map(&self.params.radius_map_path, rows, cols)?;
        let writer = match &self.params.writer_config {
            Some(cfg) => {
                Some(FrameWriter::create(cfg).map_err(|e| ProcessorError::Fatal(e.to_string()))?)
            }
            None => None,
        };
        tracing::info!(rank, "crystallography worker initialized");
        self.worker = Some(WorkerState { calib, mask, radius, writer });
        Ok(())
    }

    fn init_collector(&mut self, rank: u32, pool_size: u32) -> Result<(), ProcessorError> {
        let governor = BroadcastGovernor::new(self.params.governor, pool_size);
        let radial = RadialAggregator::new(self.params.radial_ring_capacity, self.params.radial_mode);
        tracing::info!(rank, "crystallography collector initialized");
        self.collector = Some(CollectorState { governor, radial });
        Ok(())
    }

    fn process_data(
        &mut self,
        rank: u32,
        _pool_size: u32,
        data: ExtractedData,
    ) -> Result<(ProcessedResult, u32), ProcessorError> {
        let state = self
            .worker
            .as_mut()
            .ok_or_else(|| ProcessorError::Fatal("process_data called before init_worker".to_string()))?;

        let (shape, raw_values) = match data.get("raw_frame") {
            Some(Value::Array2 { shape, data }) => (*shape, data),
            _ => return Err(DataExtractionError("missing 'raw_frame' source".to_string()).into()),
        };
        let (rows, cols) = state.calib.shape();
        if shape != (rows, cols) {
            return Err(DataExtractionError(format!(
                "raw_frame shape {shape:?} does not match detector shape {:?}",
                (rows, cols)
            ))
            .into());
        }
        let raw: RawFrame = ndarray::Array2::from_shape_vec(shape, raw_values.iter().map(|&v| v.round() as u16).collect())
            .map_err(|e| ProcessorError::Fatal(e.to_string()))?;

        let frame = state
            .calib
            .calibrate(&raw)
            .map_err(|e| DataExtractionError(e.to_string()))?;

        let peaks = find_peaks(
            &frame,
            &state.mask,
            &state.radius,
            &self.params.peakfinder_info,
            &self.params.peakfinder_params,
        )
        .map_err(|e| DataExtractionError(e.to_string()))?;

        let is_hit = peaks.num_peaks() >= self.params.hit_min_peaks;
        let profile = azimuthal_profile(&frame, &state.mask, &state.radius);

        if let Some(writer) = state.writer.as_mut() {
            let meta = FrameMeta {
                timestamp: data.timestamp(),
                beam_energy: 0.0,
                detector_distance: 0.0,
                event_id: 0,
                pixel_size: 0.0,
            };
            writer
                .append(&frame, &peaks, meta)
                .map_err(|e| ProcessorError::Fatal(e.to_string()))?;
        }

        let mut result = ProcessedResult::new();
        result.insert("timestamp".to_string(), Value::Float(data.timestamp()));
        result.insert("hit".to_string(), Value::Bool(is_hit));
        result.insert("peaks".to_string(), Value::from(peaks));
        result.insert("radial_profile".to_string(), Value::from(profile));

        if let Some(Value::Bool(true)) = data.get("send_frame") {
            result.insert(
                "frame".to_string(),
                Value::Array2 {
                    shape: frame.dim(),
                    data: frame.iter().copied().collect(),
                },
            );
        }

        Ok((result, rank))
    }

    fn collect_data(
        &mut self,
        _rank: u32,
        _pool_size: u32,
        processed: (ProcessedResult, u32),
    ) -> Option<FeedbackDict> {
        let state = self
            .collector
            .as_mut()
            .expect("collect_data called before init_collector");
        let (result, _sender_rank) = processed;

        let is_hit = matches!(result.get("hit"), Some(Value::Bool(true)));
        let profile = match result.get("radial_profile") {
            Some(Value::FloatArray(v)) => v.clone(),
            _ => Vec::new(),
        };

        state.governor.record_event(is_hit);
        let update = state.radial.update(&profile, &profile);

        let mut feedback: FeedbackDict = FeedbackDict::new();

        if state.governor.should_broadcast() {
            let mut payload = std::collections::BTreeMap::new();
            payload.insert("n_events".to_string(), Value::Int(state.governor.n_events() as i64));
            payload.insert("n_hits".to_string(), Value::Int(state.governor.n_hits() as i64));
            payload.insert("radial_percent_accepted".to_string(), Value::Float(update.percent));
            payload.insert("radial_sum".to_string(), Value::from(update.sum_));
            feedback.insert(0, payload);
        }

        if is_hit && state.governor.should_send_hit_frame() {
            let target = state.governor.next_sample_source();
            let mut payload = std::collections::BTreeMap::new();
            payload.insert("send_frame".to_string(), Value::Bool(true));
            feedback.insert(target, payload);
        } else if !is_hit && state.governor.should_send_non_hit_frame() {
            let target = state.governor.next_sample_source();
            let mut payload = std::collections::BTreeMap::new();
            payload.insert("send_frame".to_string(), Value::Bool(true));
            feedback.insert(target, payload);
        }

        if feedback.is_empty() {
            None
        } else {
            Some(feedback)
        }
    }

    fn wait_for_data(&mut self, _rank: u32, _pool_size: u32) {
        if let Some(state) = self.collector.as_mut() {
            if state.governor.should_report_speed() {
                let (events, elapsed, hz) = state.governor.speed_report();
                tracing::info!(events, ?elapsed, hz, "processed");
            }
        }
    }

    fn finalize_worker(&mut self, rank: u32, _pool_size: u32) -> Option<ProcessedResult> {
        tracing::info!(rank, "crystallography worker finalized");
        None
    }

    fn finalize_collector(&mut self, rank: u32, _pool_size: u32) -> Option<ProcessedResult> {
        let state = self.collector.as_ref()?;
        let mut result = ProcessedResult::new();
        result.insert("timestamp".to_string(), Value::Float(0.0));
        result.insert("n_events".to_string(), Value::Int(state.governor.n_events() as i64));
        result.insert("n_hits".to_string(), Value::Int(state.governor.n_hits() as i64));
        tracing::info!(rank, n_events = state.governor.n_events(), "crystallography collector finalized");
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_f32_file(path: &Path, rows: usize, cols: usize, value: f32) {
        let mut f = std::fs::File::create(path).unwrap();
        for _ in 0..(rows * cols) {
            f.write_all(&value.to_le_bytes()).unwrap();
        }
    }

    fn write_f64_file(path: &Path, rows: usize, cols: usize, value: f64) {
        let mut f = std::fs::File::create(path).unwrap();
        for _ in 0..(rows * cols) {
            f.write_all(&value.to_le_bytes()).unwrap();
        }
    }

    fn small_info() -> Peakfinder8Info {
        Peakfinder8Info {
            asic_nx: 8,
            asic_ny: 8,
            nasics_x: 1,
            nasics_y: 1,
        }
    }

    fn build_params(dir: &std::path::Path) -> CrystallographyParams {
        let info = small_info();
        let (rows, cols) = (info.frame_rows() as usize, info.frame_cols() as usize);

        let dark_paths = [
            dir.join("dark0.bin"),
            dir.join("dark1.bin"),
            dir.join("dark2.bin"),
        ];
        let gain_paths = [
            dir.join("gain0.bin"),
            dir.join("gain1.bin"),
            dir.join("gain2.bin"),
        ];
        for p in &dark_paths {
            write_f32_file(p, rows, cols, 0.0);
        }
        for p in &gain_paths {
            write_f64_file(p, rows, cols, 1.0);
        }

        let mask_path = dir.join("mask.bin");
        std::fs::write(&mask_path, vec![1u8; rows * cols]).unwrap();

        let radius_path = dir.join("radius.bin");
        let mut radius_bytes = Vec::with_capacity(rows * cols * 4);
        for r in 0..rows {
            for c in 0..cols {
                let dr = r as f32 - rows as f32 / 2.0;
                let dc = c as f32 - cols as f32 / 2.0;
                radius_bytes.extend_from_slice(&(dr * dr + dc * dc).sqrt().to_le_bytes());
            }
        }
        std::fs::write(&radius_path, radius_bytes).unwrap();

        CrystallographyParams {
            calibration_paths: CalibrationFilePaths {
                dark: dark_paths,
                gain: gain_paths,
            },
            photon_energy_kev: 1.0,
            bad_pixel_map_path: mask_path,
            radius_map_path: radius_path,
            peakfinder_info: info,
            peakfinder_params: Peakfinder8Params {
                adc_thresh: 100.0,
                min_snr: 3.0,
                min_pix_count: 1,
                max_pix_count: 10,
                local_bg_radius: 3.0,
                max_num_peaks: 10,
                radial_stats_iterations: 5,
            },
            hit_min_peaks: 1,
            radial_ring_capacity: 4,
            radial_mode: AcceptanceMode::NoFilter,
            governor: GovernorParams {
                speed_report_interval: beamline_governor::Cadence::Disabled,
                data_broadcast_interval: beamline_governor::Cadence::Every(1),
                hit_frame_interval: beamline_governor::Cadence::Every(1),
                non_hit_frame_interval: beamline_governor::Cadence::Disabled,
            },
            writer_config: None,
        }
    }

    fn raw_frame_event(rows: usize, cols: usize, hot_pixel: Option<(usize, usize)>) -> ExtractedData {
        let mut values = vec![10.0f32; rows * cols];
        if let Some((r, c)) = hot_pixel {
            values[r * cols + c] = 5000.0;
        }
        let mut data = ExtractedData::new(1.0);
        data.insert(
            "raw_frame",
            Value::Array2 {
                shape: (rows, cols),
                data: values,
            },
        );
        data
    }

    #[test]
    fn worker_flags_a_hot_pixel_frame_as_a_hit() {
        let dir = tempfile::tempdir().unwrap();
        let params = build_params(dir.path());
        let (rows, cols) = (
            params.peakfinder_info.frame_rows() as usize,
            params.peakfinder_info.frame_cols() as usize,
        );
        let mut proc = CrystallographyProcessor::new(params);
        proc.init_worker(1, 3).unwrap();

        let data = raw_frame_event(rows, cols, Some((4, 4)));
        let (result, sender) = proc.process_data(1, 3, data).unwrap();
        assert_eq!(sender, 1);
        assert_eq!(result.get("hit"), Some(&Value::Bool(true)));
    }

    #[test]
    fn worker_rejects_mismatched_frame_shape_as_data_extraction_error() {
        let dir = tempfile::tempdir().unwrap();
        let params = build_params(dir.path());
        let mut proc = CrystallographyProcessor::new(params);
        proc.init_worker(1, 3).unwrap();

        let data = raw_frame_event(2, 2, None);
        let err = proc.process_data(1, 3, data).unwrap_err();
        assert!(matches!(err, ProcessorError::DataExtraction(_)));
    }

    #[test]
    fn collector_broadcasts_on_every_event_with_interval_one() {
        let dir = tempfile::tempdir().unwrap();
        let params = build_params(dir.path());
        let mut proc = CrystallographyProcessor::new(params);
        proc.init_collector(0, 3).unwrap();

        let mut result = ProcessedResult::new();
        result.insert("timestamp".to_string(), Value::Float(1.0));
        result.insert("hit".to_string(), Value::Bool(false));
        result.insert("radial_profile".to_string(), Value::FloatArray(vec![1.0, 2.0]));

        let feedback = proc.collect_data(0, 3, (result, 1)).unwrap();
        assert!(feedback.contains_key(&0));
    }
}
