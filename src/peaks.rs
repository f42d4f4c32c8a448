use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

use crate::error::{AnalysisError, Result};
use crate::series::Series;
use crate::trigger::EventFeatures;

/// Peak picking on deviation from a (running) mean.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeakParams {
    /// Standard deviations above the mean a peak must exceed.
    pub k: f64,
    /// Centred window for the running mean and deviation; `None` uses the
    /// whole series.
    pub window: Option<usize>,
    /// Minimum samples between accepted peaks.
    pub min_separation: usize,
}

impl PeakParams {
    pub fn new(k: f64, min_separation: usize) -> Self {
        Self {
            k,
            window: None,
            min_separation,
        }
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = Some(window);
        self
    }

    fn validate(&self) -> Result<()> {
        if !(self.k.is_finite() && self.k >= 0.0) {
            return Err(AnalysisError::parameter("k", format!("must be >= 0, got {}", self.k)));
        }
        if let Some(w) = self.window {
            if w < 2 {
                return Err(AnalysisError::parameter(
                    "window",
                    format!("running window needs at least 2 samples, got {}", w),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    pub index: usize,
    pub time: f64,
    /// Sample value at the peak (signed).
    pub value: f64,
    /// Absolute deviation from the local mean.
    pub prominence: f64,
    /// Deviation the peak had to exceed.
    pub threshold: f64,
}

/// Mean and standard deviation for every sample, over a centred window
/// truncated at the series ends.
fn running_stats(x: &[f64], window: usize) -> (Vec<f64>, Vec<f64>) {
    let n = x.len();
    let mut s1 = vec![0.0; n + 1];
    let mut s2 = vec![0.0; n + 1];
    for (i, &v) in x.iter().enumerate() {
        s1[i + 1] = s1[i] + v;
        s2[i + 1] = s2[i] + v * v;
    }
    let half = window / 2;
    let mut means = Vec::with_capacity(n);
    let mut stds = Vec::with_capacity(n);
    for i in 0..n {
        let lo = i.saturating_sub(half);
        let hi = (i + half + 1).min(n);
        let count = (hi - lo) as f64;
        let mean = (s1[hi] - s1[lo]) / count;
        let var = ((s2[hi] - s2[lo]) / count - mean * mean).max(0.0);
        means.push(mean);
        stds.push(var.sqrt());
    }
    (means, stds)
}

/// Local maxima of `|x - mean|` exceeding `k` standard deviations, accepted
/// from the largest down so that no two are closer than `min_separation`.
pub fn pick_peaks(series: &Series, params: &PeakParams) -> Result<Vec<Peak>> {
    params.validate()?;
    let x = series.samples();
    let n = x.len();

    let (means, stds) = match params.window {
        Some(w) => running_stats(x, w),
        None => {
            let stats = series.statistics();
            (vec![stats.mean; n], vec![stats.std; n])
        }
    };

    let deviation: Vec<f64> = x.iter().zip(means.iter()).map(|(v, m)| (v - m).abs()).collect();
    let mut candidates: Vec<usize> = (1..n.saturating_sub(1))
        .filter(|&i| {
            deviation[i] > deviation[i - 1]
                && deviation[i] >= deviation[i + 1]
                && deviation[i] > params.k * stds[i]
        })
        .collect();
    candidates.sort_by(|&a, &b| deviation[b].total_cmp(&deviation[a]).then(a.cmp(&b)));

    let mut accepted = BTreeSet::new();
    for i in candidates {
        if params.min_separation == 0 {
            accepted.insert(i);
            continue;
        }
        // nearest accepted neighbours only
        let lo = i.saturating_sub(params.min_separation - 1);
        if accepted.range(lo..i + params.min_separation).next().is_none() {
            accepted.insert(i);
        }
    }

    debug!("Picked {} peak(s) at k={}", accepted.len(), params.k);
    Ok(accepted
        .into_iter()
        .map(|i| Peak {
            index: i,
            time: series.time_of(i),
            value: x[i],
            prominence: deviation[i],
            threshold: params.k * stds[i],
        })
        .collect())
}

/// Amplitude features of the `window_secs` seconds centred on `centre`.
pub fn event_features(series: &Series, centre: usize, window_secs: f64) -> Result<EventFeatures> {
    let n = series.len();
    if centre >= n {
        return Err(AnalysisError::parameter(
            "centre",
            format!("index {} outside series of {} samples", centre, n),
        ));
    }
    if !(window_secs.is_finite() && window_secs > 0.0) {
        return Err(AnalysisError::parameter(
            "window",
            format!("must be > 0 s, got {}", window_secs),
        ));
    }
    let half = ((window_secs * series.sampling_rate()).round() as usize / 2).max(1);
    let start = centre.saturating_sub(half);
    let end = (centre + half).min(n);
    Ok(EventFeatures::measure(&series.samples()[start..end], series.dt()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::Quantity;
    use crate::synth;

    fn spiky() -> Series {
        let mut x = synth::white_noise(1000, 0.1, 17);
        x[200] = 5.0;
        x[205] = 4.0;
        x[600] = -6.0;
        Series::from_rate(x, 100.0, Quantity::Acceleration).unwrap()
    }

    #[test]
    fn test_global_threshold() {
        let peaks = pick_peaks(&spiky(), &PeakParams::new(3.0, 20)).unwrap();
        let idx: Vec<usize> = peaks.iter().map(|p| p.index).collect();
        assert_eq!(idx, vec![200, 600]);
        assert!((peaks[1].value + 6.0).abs() < 1e-12);
        assert!((peaks[0].time - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_running_threshold() {
        let peaks = pick_peaks(&spiky(), &PeakParams::new(3.0, 20).with_window(101)).unwrap();
        let idx: Vec<usize> = peaks.iter().map(|p| p.index).collect();
        assert_eq!(idx, vec![200, 600]);
    }

    #[test]
    fn test_separation_zero_keeps_neighbours() {
        let peaks = pick_peaks(&spiky(), &PeakParams::new(3.0, 0)).unwrap();
        let idx: Vec<usize> = peaks.iter().map(|p| p.index).collect();
        assert_eq!(idx, vec![200, 205, 600]);
    }

    #[test]
    fn test_dense_candidates_on_long_record() {
        let x = synth::white_noise(200_000, 1.0, 5);
        let s = Series::from_rate(x, 100.0, Quantity::Acceleration).unwrap();

        let all = pick_peaks(&s, &PeakParams::new(0.0, 0)).unwrap();
        assert!(all.len() > 10_000);
        assert!(all.windows(2).all(|w| w[0].index < w[1].index));

        let spaced = pick_peaks(&s, &PeakParams::new(0.0, 25)).unwrap();
        assert!(!spaced.is_empty());
        assert!(spaced.windows(2).all(|w| w[1].index - w[0].index >= 25));
        // the largest excursion always survives
        let top = all.iter().map(|p| p.prominence).fold(0.0, f64::max);
        assert!(spaced.iter().any(|p| p.prominence == top));
    }

    #[test]
    fn test_rejects_bad_params() {
        assert!(pick_peaks(&spiky(), &PeakParams::new(-1.0, 0)).is_err());
        assert!(pick_peaks(&spiky(), &PeakParams::new(3.0, 0).with_window(1)).is_err());
    }

    #[test]
    fn test_event_features_window() {
        let x: Vec<f64> = (0..1000).map(|i| if (495..505).contains(&i) { 2.0 } else { 0.0 }).collect();
        let s = Series::from_rate(x, 100.0, Quantity::Acceleration).unwrap();
        let f = event_features(&s, 500, 1.0).unwrap();
        assert!((f.duration - 1.0).abs() < 1e-9);
        assert!((f.energy - 40.0).abs() < 1e-12);
        assert!((f.peak_amplitude - 2.0).abs() < 1e-12);

        // truncated at the start
        let edge = event_features(&s, 10, 1.0).unwrap();
        assert!((edge.duration - 0.6).abs() < 1e-9);
        assert!(event_features(&s, 1000, 1.0).is_err());
    }
}
