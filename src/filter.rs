use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::error::{AnalysisError, Result};
use crate::series::Series;

/// Highest Butterworth order accepted by [`design`].
pub const MAX_ORDER: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    Lowpass,
    Highpass,
    Bandpass,
}

impl FromStr for FilterKind {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "lowpass" | "low" => Ok(FilterKind::Lowpass),
            "highpass" | "high" => Ok(FilterKind::Highpass),
            "bandpass" | "band" => Ok(FilterKind::Bandpass),
            other => Err(AnalysisError::parameter(
                "filter_kind",
                format!("unknown filter kind '{}'", other),
            )),
        }
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FilterKind::Lowpass => "lowpass",
            FilterKind::Highpass => "highpass",
            FilterKind::Bandpass => "bandpass",
        };
        write!(f, "{}", name)
    }
}

/// Cutoff frequencies in Hz.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Cutoff {
    Single(f64),
    Band { low: f64, high: f64 },
}

/// Butterworth filter request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub kind: FilterKind,
    pub cutoff: Cutoff,
    pub order: usize,
    pub sampling_rate: f64,
}

impl FilterSpec {
    pub fn lowpass(cutoff: f64, order: usize, sampling_rate: f64) -> Self {
        Self {
            kind: FilterKind::Lowpass,
            cutoff: Cutoff::Single(cutoff),
            order,
            sampling_rate,
        }
    }

    pub fn highpass(cutoff: f64, order: usize, sampling_rate: f64) -> Self {
        Self {
            kind: FilterKind::Highpass,
            cutoff: Cutoff::Single(cutoff),
            order,
            sampling_rate,
        }
    }

    pub fn bandpass(low: f64, high: f64, order: usize, sampling_rate: f64) -> Self {
        Self {
            kind: FilterKind::Bandpass,
            cutoff: Cutoff::Band { low, high },
            order,
            sampling_rate,
        }
    }

    pub fn nyquist(&self) -> f64 {
        self.sampling_rate / 2.0
    }

    fn validate(&self) -> Result<()> {
        if !self.sampling_rate.is_finite() || self.sampling_rate <= 0.0 {
            return Err(AnalysisError::InvalidFilterSpec(format!(
                "sampling rate must be > 0, got {}",
                self.sampling_rate
            )));
        }
        if self.order == 0 || self.order > MAX_ORDER {
            return Err(AnalysisError::InvalidFilterSpec(format!(
                "order must be in 1..={}, got {}",
                MAX_ORDER, self.order
            )));
        }
        let nyq = self.nyquist();
        let in_range = |f: f64| f.is_finite() && f > 0.0 && f < nyq;
        match (self.kind, self.cutoff) {
            (FilterKind::Lowpass | FilterKind::Highpass, Cutoff::Single(fc)) => {
                if !in_range(fc) {
                    return Err(AnalysisError::InvalidFilterSpec(format!(
                        "cutoff {} Hz outside (0, {}) Hz",
                        fc, nyq
                    )));
                }
            }
            (FilterKind::Bandpass, Cutoff::Band { low, high }) => {
                if !in_range(low) || !in_range(high) {
                    return Err(AnalysisError::InvalidFilterSpec(format!(
                        "band {}-{} Hz outside (0, {}) Hz",
                        low, high, nyq
                    )));
                }
                if low >= high {
                    return Err(AnalysisError::InvalidFilterSpec(format!(
                        "low cutoff {} Hz must be below high cutoff {} Hz",
                        low, high
                    )));
                }
            }
            (kind, cutoff) => {
                return Err(AnalysisError::InvalidFilterSpec(format!(
                    "{} filter cannot use cutoff {:?}",
                    kind, cutoff
                )));
            }
        }
        Ok(())
    }
}

/// Second-order section in transposed direct form II.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Biquad {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
    s1: f64,
    s2: f64,
}

impl Biquad {
    pub fn new(b0: f64, b1: f64, b2: f64, a1: f64, a2: f64) -> Self {
        Self { b0, b1, b2, a1, a2, s1: 0.0, s2: 0.0 }
    }

    pub fn process(&mut self, x: f64) -> f64 {
        let y = self.b0 * x + self.s1;
        self.s1 = self.b1 * x - self.a1 * y + self.s2;
        self.s2 = self.b2 * x - self.a2 * y;
        y
    }

    /// DC gain of the section.
    fn dc_gain(&self) -> f64 {
        let den = 1.0 + self.a1 + self.a2;
        if den.abs() < f64::EPSILON {
            0.0
        } else {
            (self.b0 + self.b1 + self.b2) / den
        }
    }

    /// Load the state a constant input `x` would settle to.
    fn settle(&mut self, x: f64) -> f64 {
        let y = self.dc_gain() * x;
        self.s2 = self.b2 * x - self.a2 * y;
        self.s1 = self.b1 * x - self.a1 * y + self.s2;
        y
    }

    fn response(&self, z: Complex64) -> Complex64 {
        let zi = z.inv();
        let zi2 = zi * zi;
        (self.b0 + self.b1 * zi + self.b2 * zi2) / (1.0 + self.a1 * zi + self.a2 * zi2)
    }

    /// Roots of `z^2 + a1 z + a2`, recomputed from the stored coefficients.
    fn poles(&self) -> [Complex64; 2] {
        let a1 = Complex64::new(self.a1, 0.0);
        let disc = (a1 * a1 - 4.0 * self.a2).sqrt();
        [(-a1 + disc) / 2.0, (-a1 - disc) / 2.0]
    }
}

/// Cascade of biquads produced by [`design`].
#[derive(Debug, Clone, PartialEq)]
pub struct BiquadChain {
    sections: Vec<Biquad>,
}

impl BiquadChain {
    pub fn new(sections: Vec<Biquad>) -> Self {
        Self { sections }
    }

    pub fn sections(&self) -> &[Biquad] {
        &self.sections
    }

    pub fn process(&mut self, x: f64) -> f64 {
        let mut val = x;
        for section in &mut self.sections {
            val = section.process(val);
        }
        val
    }

    /// Single forward pass over a slice.
    pub fn process_vec(&mut self, samples: &[f64]) -> Vec<f64> {
        samples.iter().map(|&s| self.process(s)).collect()
    }

    pub fn reset(&mut self) {
        for section in &mut self.sections {
            section.s1 = 0.0;
            section.s2 = 0.0;
        }
    }

    fn settle(&mut self, x: f64) {
        let mut val = x;
        for section in &mut self.sections {
            val = section.settle(val);
        }
    }

    /// Zero-phase (forward-backward) filtering.
    ///
    /// The signal is extended at both ends by odd reflection and each pass
    /// starts from the steady state of its first sample, which keeps edge
    /// transients small.
    pub fn filtfilt(&mut self, samples: &[f64]) -> Vec<f64> {
        let n = samples.len();
        if n < 2 {
            return samples.to_vec();
        }

        let pad_len = (3 * (2 * self.sections.len() + 1)).min(n - 1);

        let mut extended = Vec::with_capacity(n + 2 * pad_len);
        for i in (1..=pad_len).rev() {
            extended.push(2.0 * samples[0] - samples[i]);
        }
        extended.extend_from_slice(samples);
        for i in 1..=pad_len {
            extended.push(2.0 * samples[n - 1] - samples[n - 1 - i]);
        }

        self.reset();
        self.settle(extended[0]);
        let mut forward: Vec<f64> = extended.iter().map(|&s| self.process(s)).collect();

        forward.reverse();

        self.reset();
        self.settle(forward[0]);
        let mut backward: Vec<f64> = forward.iter().map(|&s| self.process(s)).collect();

        backward.reverse();
        self.reset();

        backward[pad_len..pad_len + n].to_vec()
    }

    /// Complex response at normalised angular frequency `w` (rad/sample).
    pub fn response_at(&self, w: f64) -> Complex64 {
        let z = Complex64::from_polar(1.0, w);
        self.sections
            .iter()
            .fold(Complex64::new(1.0, 0.0), |acc, s| acc * s.response(z))
    }
}

/// Designed Butterworth filter: its spec and the biquad cascade.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignedFilter {
    pub spec: FilterSpec,
    pub chain: BiquadChain,
}

fn prewarp(freq: f64, fs: f64) -> f64 {
    2.0 * fs * (PI * freq / fs).tan()
}

/// Analog poles of the Butterworth prototype moved to the requested band,
/// with the number of zeros at s = 0 and the digital frequency (rad/sample)
/// where the gain is normalised to one.
fn analog_poles(spec: &FilterSpec) -> (Vec<Complex64>, usize, f64) {
    let fs = spec.sampling_rate;
    let n = spec.order;
    let prototype: Vec<Complex64> = (0..n)
        .map(|k| {
            let theta = PI * (2 * k + n + 1) as f64 / (2 * n) as f64;
            Complex64::from_polar(1.0, theta)
        })
        .collect();

    match spec.cutoff {
        Cutoff::Single(fc) => {
            let wc = prewarp(fc, fs);
            match spec.kind {
                FilterKind::Highpass => (prototype.iter().map(|&p| wc / p).collect(), n, PI),
                _ => (prototype.iter().map(|&p| p * wc).collect(), 0, 0.0),
            }
        }
        Cutoff::Band { low, high } => {
            let w_low = prewarp(low, fs);
            let w_high = prewarp(high, fs);
            let w0 = (w_low * w_high).sqrt();
            let bw = w_high - w_low;
            // s^2 - p*bw*s + w0^2 = 0 for each prototype pole
            let mut poles = Vec::with_capacity(2 * n);
            for p in prototype {
                let pbw = p * bw;
                let disc = (pbw * pbw - 4.0 * w0 * w0).sqrt();
                poles.push((pbw + disc) / 2.0);
                poles.push((pbw - disc) / 2.0);
            }
            let center = 2.0 * (w0 / (2.0 * fs)).atan();
            (poles, n, center)
        }
    }
}

fn is_real(z: Complex64) -> bool {
    z.im.abs() <= 1e-12 * z.norm().max(1.0)
}

/// Group digital poles into second-order sections: conjugate pairs first,
/// then real poles two at a time, with a first-order section for a leftover.
fn pole_sections(poles: &[Complex64]) -> Vec<(f64, f64)> {
    let mut sections = Vec::new();
    let mut reals = Vec::new();
    for &p in poles {
        if is_real(p) {
            reals.push(p.re);
        } else if p.im > 0.0 {
            sections.push((-2.0 * p.re, p.norm_sqr()));
        }
    }
    reals.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    for pair in reals.chunks(2) {
        match pair {
            [r1, r2] => sections.push((-(r1 + r2), r1 * r2)),
            [r] => sections.push((-r, 0.0)),
            _ => {}
        }
    }
    sections
}

/// Design a Butterworth IIR filter as a cascade of second-order sections,
/// via the bilinear transform with pre-warped cutoffs.
///
/// Fails with `InvalidFilterSpec` for cutoffs outside (0, Nyquist), inverted
/// band edges or an unsupported order, and with `UnstableFilter` when any
/// section's poles, recomputed from its rounded coefficients, are not strictly
/// inside the unit circle.
pub fn design(spec: &FilterSpec) -> Result<DesignedFilter> {
    spec.validate()?;
    let fs = spec.sampling_rate;
    let (analog, zeros_at_dc, norm_w) = analog_poles(spec);

    let two_fs = 2.0 * fs;
    let digital: Vec<Complex64> = analog
        .iter()
        .map(|&s| (two_fs + s) / (two_fs - s))
        .collect();

    if let Some(p) = digital.iter().find(|p| !(p.norm() < 1.0) || !p.is_finite()) {
        return Err(AnalysisError::UnstableFilter(format!(
            "pole {:.6}{:+.6}i on or outside the unit circle (order {}, fs {} Hz)",
            p.re, p.im, spec.order, fs
        )));
    }

    let dens = pole_sections(&digital);
    let total_poles = digital.len();
    // Analog zeros at s=0 map to z=+1, zeros at infinity to z=-1.
    let mut ones_left = zeros_at_dc;
    let mut minus_ones_left = total_poles - zeros_at_dc;
    let mut sections = Vec::with_capacity(dens.len());
    for &(a1, a2) in &dens {
        let second_order = a2 != 0.0 || dens.len() * 2 <= total_poles;
        let want = if second_order { 2 } else { 1 };
        let mut poly = vec![1.0];
        for _ in 0..want {
            let root = if spec.kind == FilterKind::Bandpass {
                // one zero of each kind per band-pass section
                if ones_left >= minus_ones_left && ones_left > 0 {
                    ones_left -= 1;
                    1.0
                } else {
                    minus_ones_left = minus_ones_left.saturating_sub(1);
                    -1.0
                }
            } else if ones_left > 0 {
                ones_left -= 1;
                1.0
            } else {
                minus_ones_left = minus_ones_left.saturating_sub(1);
                -1.0
            };
            poly = multiply_root(&poly, root);
        }
        poly.resize(3, 0.0);
        sections.push(Biquad::new(poly[0], poly[1], poly[2], a1, a2));
    }

    for (i, section) in sections.iter().enumerate() {
        let stable = section.a1.is_finite()
            && section.a2.is_finite()
            && section.poles().iter().all(|p| p.norm() < 1.0);
        if !stable {
            return Err(AnalysisError::UnstableFilter(format!(
                "section {} (a1={}, a2={}) has a pole on or outside the unit circle",
                i, section.a1, section.a2
            )));
        }
    }

    let mut chain = BiquadChain::new(sections);
    let gain = chain.response_at(norm_w).norm();
    if !(gain.is_finite() && gain > 1e-300) {
        return Err(AnalysisError::UnstableFilter(format!(
            "reference gain {} cannot be normalised",
            gain
        )));
    }
    let per_section = gain.powf(1.0 / chain.sections.len() as f64);
    for s in &mut chain.sections {
        s.b0 /= per_section;
        s.b1 /= per_section;
        s.b2 /= per_section;
    }

    debug!(
        "Designed {} Butterworth order {} ({:?}) at {} Hz: {} sections",
        spec.kind,
        spec.order,
        spec.cutoff,
        fs,
        chain.sections.len()
    );
    Ok(DesignedFilter { spec: *spec, chain })
}

/// Multiply polynomial `poly` (in z^-1, leading term first) by `(1 - root z^-1)`.
fn multiply_root(poly: &[f64], root: f64) -> Vec<f64> {
    let mut out = vec![0.0; poly.len() + 1];
    for (i, &c) in poly.iter().enumerate() {
        out[i] += c;
        out[i + 1] -= root * c;
    }
    out
}

/// Zero-phase filter `series` with the Butterworth filter described by `spec`.
pub fn apply(series: &Series, spec: &FilterSpec) -> Result<Series> {
    let fs = series.sampling_rate();
    if ((spec.sampling_rate - fs) / fs).abs() > 1e-6 {
        return Err(AnalysisError::InvalidFilterSpec(format!(
            "filter designed for {} Hz applied to a {} Hz series",
            spec.sampling_rate, fs
        )));
    }
    let mut filter = design(spec)?;
    let filtered = filter.chain.filtfilt(series.samples());
    series.with_samples(filtered)
}

/// Frequency grid spacing for [`frequency_response`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FrequencyScale {
    /// From 0 Hz to Nyquist.
    Linear,
    /// From `min_frequency` to Nyquist.
    Log { min_frequency: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyResponse {
    pub frequencies: Vec<f64>,
    pub magnitude: Vec<f64>,
    /// Radians, wrapped to (-pi, pi].
    pub phase: Vec<f64>,
}

impl FrequencyResponse {
    pub fn magnitude_db(&self) -> Vec<f64> {
        self.magnitude.iter().map(|&m| 20.0 * m.max(1e-300).log10()).collect()
    }
}

/// Magnitude and phase of the single-pass filter over `n_points` frequencies.
pub fn frequency_response(spec: &FilterSpec, n_points: usize, scale: FrequencyScale) -> Result<FrequencyResponse> {
    if n_points < 2 {
        return Err(AnalysisError::parameter(
            "n_points",
            format!("need at least 2 points, got {}", n_points),
        ));
    }
    let filter = design(spec)?;
    let nyq = spec.nyquist();
    let step = (n_points - 1) as f64;
    let frequencies: Vec<f64> = match scale {
        FrequencyScale::Linear => (0..n_points).map(|i| nyq * i as f64 / step).collect(),
        FrequencyScale::Log { min_frequency } => {
            if !(min_frequency > 0.0 && min_frequency < nyq) {
                return Err(AnalysisError::parameter(
                    "min_frequency",
                    format!("must be in (0, {}), got {}", nyq, min_frequency),
                ));
            }
            let (lo, hi) = (min_frequency.log10(), nyq.log10());
            (0..n_points)
                .map(|i| 10f64.powf(lo + (hi - lo) * i as f64 / step))
                .collect()
        }
    };

    let mut magnitude = Vec::with_capacity(n_points);
    let mut phase = Vec::with_capacity(n_points);
    for &f in &frequencies {
        let h = filter.chain.response_at(2.0 * PI * f / spec.sampling_rate);
        magnitude.push(h.norm());
        phase.push(h.arg());
    }
    Ok(FrequencyResponse {
        frequencies,
        magnitude,
        phase,
    })
}
