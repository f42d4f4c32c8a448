//! Deterministic synthetic signals for tests and the demo binary.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::error::{AnalysisError, Result};
use crate::series::{Quantity, Series};

/// Linear congruential generator (Knuth's MMIX constants).
#[derive(Debug, Clone)]
pub struct Lcg {
    state: u64,
}

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed ^ 0x5DEE_CE66_D1CE_4E5B,
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.state
    }

    /// Uniform in [-1, 1).
    pub fn next_uniform(&mut self) -> f64 {
        // top 53 bits
        let unit = (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64;
        2.0 * unit - 1.0
    }
}

/// `amplitude * sin(2π f t)` sampled for `duration` seconds.
pub fn sinusoid(frequency: f64, amplitude: f64, sampling_rate: f64, duration: f64) -> Vec<f64> {
    let n = (duration * sampling_rate).round() as usize;
    (0..n)
        .map(|i| amplitude * (2.0 * PI * frequency * i as f64 / sampling_rate).sin())
        .collect()
}

/// Uniform white noise with the given RMS.
pub fn white_noise(n: usize, rms: f64, seed: u64) -> Vec<f64> {
    let mut rng = Lcg::new(seed);
    let scale = rms * 3f64.sqrt();
    (0..n).map(|_| scale * rng.next_uniform()).collect()
}

/// Sum of equal-amplitude cosines, non-zero only for `start <= t < end`.
///
/// With `m` tones of amplitude `a` the burst RMS is `a * sqrt(m / 2)`.
pub fn multitone_burst(
    frequencies: &[f64],
    amplitude: f64,
    sampling_rate: f64,
    start: f64,
    end: f64,
    n: usize,
) -> Vec<f64> {
    (0..n)
        .map(|i| {
            let t = i as f64 / sampling_rate;
            if t < start || t >= end {
                return 0.0;
            }
            let tau = t - start;
            frequencies
                .iter()
                .map(|&f| amplitude * (2.0 * PI * f * tau).cos())
                .sum()
        })
        .collect()
}

/// Band-limited burst embedded in white background noise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurstScenario {
    pub sampling_rate: f64,
    pub duration: f64,
    pub burst_start: f64,
    pub burst_end: f64,
    pub band_low: f64,
    pub band_high: f64,
    /// Burst RMS over background RMS.
    pub amplitude_ratio: f64,
    pub noise_rms: f64,
    pub seed: u64,
}

impl Default for BurstScenario {
    fn default() -> Self {
        Self {
            sampling_rate: 100.0,
            duration: 10.0,
            burst_start: 4.0,
            burst_end: 5.0,
            band_low: 2.0,
            band_high: 8.0,
            amplitude_ratio: 5.0,
            noise_rms: 0.01,
            seed: 42,
        }
    }
}

impl BurstScenario {
    /// Tone frequencies: every 2 Hz across the band, both edges included.
    pub fn tones(&self) -> Vec<f64> {
        let mut tones = Vec::new();
        let mut f = self.band_low;
        while f <= self.band_high + 1e-9 {
            tones.push(f);
            f += 2.0;
        }
        tones
    }

    pub fn samples(&self) -> usize {
        (self.duration * self.sampling_rate).round() as usize
    }

    /// Acceleration record with the burst added to the background noise.
    pub fn build(&self) -> Result<Series> {
        if !(self.burst_start >= 0.0 && self.burst_start < self.burst_end && self.burst_end <= self.duration) {
            return Err(AnalysisError::parameter(
                "burst",
                format!(
                    "window {}-{} s must lie inside the {} s record",
                    self.burst_start, self.burst_end, self.duration
                ),
            ));
        }
        let tones = self.tones();
        if tones.is_empty() {
            return Err(AnalysisError::parameter(
                "band",
                format!("no tones between {} and {} Hz", self.band_low, self.band_high),
            ));
        }
        let n = self.samples();
        let burst_rms = self.amplitude_ratio * self.noise_rms;
        let amplitude = burst_rms / (tones.len() as f64 / 2.0).sqrt();
        let burst = multitone_burst(&tones, amplitude, self.sampling_rate, self.burst_start, self.burst_end, n);
        let noise = white_noise(n, self.noise_rms, self.seed);
        let samples = noise.iter().zip(burst.iter()).map(|(a, b)| a + b).collect();
        Series::from_rate(samples, self.sampling_rate, Quantity::Acceleration)
    }
}
