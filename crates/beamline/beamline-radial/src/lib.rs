//! Radial profile engine with filtered running averaging (spec component C5).
//!
//! Splits incoming profiles into a "proposed" window (`ring_std`, used only
//! to judge whether the next profile looks like an outlier) and a
//! "committed" window (`ring_avg`, masked by `used_flags`) that feeds the
//! running mean returned to callers. Keeping the two separate means a
//! rejected profile can neither poison the acceptance statistics nor distort
//! the running average.

/// One radial profile: per-bin value, bin 0 nearest the detector center.
pub type RadialProfile = Vec<f32>;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AcceptanceMode {
    /// Filter by total intensity: accept iff `|sum(u) - mean| <= k * std`.
    TotalIntensity { sigma_threshold: f64 },
    /// Filter by per-bin intensity within `[min_radial_bin, max_radial_bin)`.
    PerBinScaleRegion {
        sigma_threshold: f64,
        min_radial_bin: usize,
        max_radial_bin: usize,
    },
    /// No filtering; every profile is accepted.
    NoFilter,
}

/// Outcome of feeding one pair of profiles through the aggregator.
#[derive(Clone, Debug, PartialEq)]
pub struct UpdateResult {
    pub accepted: bool,
    /// Running mean of accepted (scaled) profiles, same shape as `s`.
    pub sum_: RadialProfile,
    /// Cumulative accepted-fraction, as a percentage in `[0, 100]`.
    pub percent: f64,
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Running radial-profile aggregator. One instance is owned by whichever
/// process computes a given statistic (a worker for per-worker profiles, the
/// collector for aggregate ones) — it is never shared across threads.
pub struct RadialAggregator {
    capacity: usize,
    mode: AcceptanceMode,
    ring_std: Vec<RadialProfile>,
    ring_avg: Vec<RadialProfile>,
    used_flags: Vec<bool>,
    /// Ring-local event index, used only to pick the next slot and to bound
    /// the warm-up statistics window.
    ring_count: u64,
    /// All-time counters backing `percent` — the accepted fraction is a
    /// cumulative hit-rate style statistic, not windowed to ring capacity
    /// (see DESIGN.md's Open Question resolution for this component).
    n_total: u64,
    n_accepted: u64,
}

impl RadialAggregator {
    pub fn new(capacity: usize, mode: AcceptanceMode) -> Self {
        assert!(capacity > 0, "ring capacity must be positive");
        Self {
            capacity,
            mode,
            ring_std: vec![Vec::new(); capacity],
            ring_avg: vec![Vec::new(); capacity],
            used_flags: vec![false; capacity],
            ring_count: 0,
            n_total: 0,
            n_accepted: 0,
        }
    }

    fn valid_len(&self) -> usize {
        self.ring_count.min(self.capacity as u64) as usize
    }

    fn decide(&self, u: &[f32]) -> bool {
        let valid_len = self.valid_len();
        if valid_len == 0 {
            return true;
        }
        match self.mode {
            AcceptanceMode::NoFilter => true,
            AcceptanceMode::TotalIntensity { sigma_threshold } => {
                let totals: Vec<f64> = self.ring_std[..valid_len]
                    .iter()
                    .map(|p| p.iter().map(|&x| x as f64).sum())
                    .collect();
                let (mean_i, std_i) = mean_std(&totals);
                let i_total: f64 = u.iter().map(|&x| x as f64).sum();
                (i_total - mean_i).abs() <= sigma_threshold * std_i
            }
            AcceptanceMode::PerBinScaleRegion {
                sigma_threshold,
                min_radial_bin,
                max_radial_bin,
            } => (min_radial_bin..max_radial_bin).all(|r| {
                let vals: Vec<f64> = self.ring_std[..valid_len]
                    .iter()
                    .filter_map(|p| p.get(r).map(|&v| v as f64))
                    .collect();
                let (mean_r, std_r) = mean_std(&vals);
                let u_r = u.get(r).copied().unwrap_or(0.0) as f64;
                (u_r - mean_r).abs() <= sigma_threshold * std_r
            }),
        }
    }

    /// Feeds one unscaled profile `u` (used for the acceptance statistics)
    /// and scaled profile `s` (what actually accumulates into the running
    /// average) through the aggregator.
    pub fn update(&mut self, u: &[f32], s: &[f32]) -> UpdateResult {
        let accepted = self.decide(u);

        let slot = (self.ring_count % self.capacity as u64) as usize;
        self.ring_std[slot] = u.to_vec();
        if accepted {
            self.ring_avg[slot] = s.to_vec();
        }
        self.used_flags[slot] = accepted;
        self.ring_count += 1;
        self.n_total += 1;
        if accepted {
            self.n_accepted += 1;
        }

        let valid_len = self.valid_len();
        let used_count = self.used_flags[..valid_len].iter().filter(|f| **f).count();
        let width = s.len();
        let sum_ = if used_count == 0 {
            vec![0.0f32; width]
        } else {
            let mut acc = vec![0.0f64; width];
            for i in 0..valid_len {
                if self.used_flags[i] {
                    for (b, v) in self.ring_avg[i].iter().enumerate() {
                        if b < width {
                            acc[b] += *v as f64;
                        }
                    }
                }
            }
            acc.iter().map(|&v| (v / used_count as f64) as f32).collect()
        };

        let percent = if self.n_total == 0 {
            0.0
        } else {
            100.0 * self.n_accepted as f64 / self.n_total as f64
        };

        UpdateResult {
            accepted,
            sum_,
            percent,
        }
    }
}
