//! Translates the loaded `om`/`data_retrieval_layer`/`crystallography`/
//! `writer` parameter groups into the concrete types
//! `beamline-source`/`beamline-processor` need to run.

use anyhow::Context;
use beamline_calib::CalibrationFilePaths;
use beamline_config::ParameterStore;
use beamline_events::Peakfinder8Info;
use beamline_governor::{Cadence, GovernorParams};
use beamline_peakfinder::Peakfinder8Params;
use beamline_processor::CrystallographyParams;
use beamline_radial::AcceptanceMode;
use beamline_writer::WriterConfig;
use std::path::PathBuf;

const GROUP: &str = "crystallography";

fn cadence(store: &ParameterStore, key: &str) -> anyhow::Result<Cadence> {
    let interval: u32 = store.get_or(GROUP, key, 0)?;
    Ok(if interval == 0 {
        Cadence::Disabled
    } else {
        Cadence::Every(interval)
    })
}

/// Reads `(rows, cols)` from the `data_retrieval_layer` group — the frame
/// shape `beamline-source`'s file-list adapter expects each listed file to
/// contain.
pub fn detector_shape(store: &ParameterStore) -> anyhow::Result<(usize, usize)> {
    let rows: usize = store.get_required("data_retrieval_layer", "rows")?;
    let cols: usize = store.get_required("data_retrieval_layer", "cols")?;
    Ok((rows, cols))
}

fn radial_mode(store: &ParameterStore) -> anyhow::Result<AcceptanceMode> {
    let mode: String = store.get_or(GROUP, "radial_mode", "no_filter".to_string())?;
    Ok(match mode.as_str() {
        "no_filter" => AcceptanceMode::NoFilter,
        "total_intensity" => AcceptanceMode::TotalIntensity {
            sigma_threshold: store.get_or(GROUP, "radial_sigma_threshold", 3.0)?,
        },
        "per_bin_scale_region" => AcceptanceMode::PerBinScaleRegion {
            sigma_threshold: store.get_or(GROUP, "radial_sigma_threshold", 3.0)?,
            min_radial_bin: store.get_required(GROUP, "radial_min_bin")?,
            max_radial_bin: store.get_required(GROUP, "radial_max_bin")?,
        },
        other => anyhow::bail!("unknown radial_mode '{other}' in group '{GROUP}'"),
    })
}

fn writer_config(store: &ParameterStore, rows: usize, cols: usize) -> anyhow::Result<Option<WriterConfig>> {
    let enabled: bool = store.get_or("writer", "enabled", false)?;
    if !enabled {
        return Ok(None);
    }
    let path_prefix: String = store.get_required("writer", "path_prefix")?;
    Ok(Some(WriterConfig {
        path_prefix: PathBuf::from(path_prefix),
        rank: 0, // overwritten by the caller once the worker's rank is known
        extension: store.get_or("writer", "extension", ".h5".to_string())?,
        rows,
        cols,
        max_num_peaks: store.get_or(GROUP, "max_num_peaks", 1024usize)?,
        gzip_level: store.get_or("writer", "gzip_level", None::<u8>)?,
    }))
}

/// Builds the crystallography processor's parameters for worker `rank`.
/// Every worker parses the same configuration file; only the writer's
/// output file name differs per rank.
pub fn crystallography_params(store: &ParameterStore, rank: u32) -> anyhow::Result<CrystallographyParams> {
    let (rows, cols) = detector_shape(store)?;

    let peakfinder_info = Peakfinder8Info {
        asic_nx: store.get_required(GROUP, "asic_nx")?,
        asic_ny: store.get_required(GROUP, "asic_ny")?,
        nasics_x: store.get_required(GROUP, "nasics_x")?,
        nasics_y: store.get_required(GROUP, "nasics_y")?,
    };
    anyhow::ensure!(
        peakfinder_info.frame_rows() as usize == rows && peakfinder_info.frame_cols() as usize == cols,
        "panel geometry (asic_nx/asic_ny/nasics_x/nasics_y) does not match configured detector shape ({rows}, {cols})"
    );

    let calibration_paths = CalibrationFilePaths {
        dark: [
            PathBuf::from(store.get_required::<String>(GROUP, "dark0")?),
            PathBuf::from(store.get_required::<String>(GROUP, "dark1")?),
            PathBuf::from(store.get_required::<String>(GROUP, "dark2")?),
        ],
        gain: [
            PathBuf::from(store.get_required::<String>(GROUP, "gain0")?),
            PathBuf::from(store.get_required::<String>(GROUP, "gain1")?),
            PathBuf::from(store.get_required::<String>(GROUP, "gain2")?),
        ],
    };

    let peakfinder_params = Peakfinder8Params {
        adc_thresh: store.get_required(GROUP, "adc_thresh")?,
        min_snr: store.get_required(GROUP, "min_snr")?,
        min_pix_count: store.get_required(GROUP, "min_pix_count")?,
        max_pix_count: store.get_required(GROUP, "max_pix_count")?,
        local_bg_radius: store.get_required(GROUP, "local_bg_radius")?,
        max_num_peaks: store.get_or(GROUP, "max_num_peaks", 1024usize)?,
        radial_stats_iterations: store.get_or(GROUP, "radial_stats_iterations", 5usize)?,
    };

    let governor = GovernorParams {
        speed_report_interval: cadence(store, "speed_report_interval")?,
        data_broadcast_interval: cadence(store, "data_broadcast_interval")?,
        hit_frame_interval: cadence(store, "hit_frame_interval")?,
        non_hit_frame_interval: cadence(store, "non_hit_frame_interval")?,
    };

    let mut writer = writer_config(store, rows, cols).context("loading writer configuration")?;
    if let Some(cfg) = writer.as_mut() {
        cfg.rank = rank;
    }

    Ok(CrystallographyParams {
        calibration_paths,
        photon_energy_kev: store.get_required(GROUP, "photon_energy_kev")?,
        bad_pixel_map_path: PathBuf::from(store.get_required::<String>(GROUP, "bad_pixel_map")?),
        radius_map_path: PathBuf::from(store.get_required::<String>(GROUP, "radius_map")?),
        peakfinder_info,
        peakfinder_params,
        hit_min_peaks: store.get_required(GROUP, "hit_min_peaks")?,
        radial_ring_capacity: store.get_or(GROUP, "radial_ring_capacity", 50usize)?,
        radial_mode: radial_mode(store)?,
        governor,
        writer_config: writer,
    })
}
