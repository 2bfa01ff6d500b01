//! Hot-path benchmark: peakfinder8 over a synthetic multi-panel frame.

use beamline_events::Peakfinder8Info;
use beamline_peakfinder::{Peakfinder8Params, find_peaks};
use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use ndarray::Array2;

fn synthetic_frame(info: &Peakfinder8Info, num_peaks: usize) -> (Array2<f32>, Array2<u8>, Array2<f32>) {
    let rows = info.frame_rows() as usize;
    let cols = info.frame_cols() as usize;
    let mut frame = Array2::from_elem((rows, cols), 20.0f32);
    let mask = Array2::from_elem((rows, cols), 1u8);

    let mut radius = Array2::zeros((rows, cols));
    let cr = rows as f32 / 2.0;
    let cc = cols as f32 / 2.0;
    for r in 0..rows {
        for c in 0..cols {
            let dr = r as f32 - cr;
            let dc = c as f32 - cc;
            radius[[r, c]] = (dr * dr + dc * dc).sqrt();
        }
    }

    let stride = (rows * cols / num_peaks.max(1)).max(1);
    for k in 0..num_peaks {
        let flat = (k * stride) % (rows * cols);
        frame[[flat / cols, flat % cols]] = 8000.0;
    }

    (frame, mask, radius)
}

fn bench_peakfinder8(c: &mut Criterion) {
    let info = Peakfinder8Info {
        asic_nx: 256,
        asic_ny: 256,
        nasics_x: 4,
        nasics_y: 4,
    };
    let params = Peakfinder8Params {
        adc_thresh: 500.0,
        ..Peakfinder8Params::default()
    };

    let mut group = c.benchmark_group("peakfinder8");
    group.throughput(Throughput::Elements(1));

    for &num_peaks in &[8usize, 64, 256] {
        let (frame, mask, radius) = synthetic_frame(&info, num_peaks);
        group.bench_function(format!("find_peaks/{num_peaks}_seeds"), |b| {
            b.iter(|| {
                let peaks =
                    find_peaks(black_box(&frame), &mask, &radius, &info, &params).unwrap();
                black_box(peaks.num_peaks())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_peakfinder8);
criterion_main!(benches);
