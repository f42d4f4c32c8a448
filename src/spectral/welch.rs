use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

use super::window::Window;
use crate::error::{AnalysisError, Result};
use crate::series::Series;

/// Relative power below which a coherence bin is reported as undefined.
const COHERENCE_FLOOR: f64 = 1e-12;

/// Trend removed from every segment before windowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Detrend {
    None,
    #[default]
    Mean,
    Linear,
}

impl FromStr for Detrend {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(Detrend::None),
            "mean" | "constant" => Ok(Detrend::Mean),
            "linear" => Ok(Detrend::Linear),
            other => Err(AnalysisError::parameter(
                "detrend",
                format!("unknown detrend mode '{}'", other),
            )),
        }
    }
}

impl fmt::Display for Detrend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Detrend::None => "none",
            Detrend::Mean => "mean",
            Detrend::Linear => "linear",
        };
        write!(f, "{}", name)
    }
}

/// Segmentation used by every Welch-style estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WelchParams {
    pub window: Window,
    pub segment_length: usize,
    /// Samples shared by consecutive segments.
    pub overlap: usize,
    pub detrend: Detrend,
}

impl WelchParams {
    pub fn new(window: Window, segment_length: usize, overlap: usize) -> Self {
        Self {
            window,
            segment_length,
            overlap,
            detrend: Detrend::default(),
        }
    }

    pub fn with_detrend(mut self, detrend: Detrend) -> Self {
        self.detrend = detrend;
        self
    }

    /// Half-overlapping segments of `segment_length` samples.
    pub fn half_overlap(window: Window, segment_length: usize) -> Self {
        Self::new(window, segment_length, segment_length / 2)
    }

    fn validate(&self, n: usize) -> Result<()> {
        if self.segment_length < 2 {
            return Err(AnalysisError::parameter(
                "segment_length",
                format!("must be at least 2, got {}", self.segment_length),
            ));
        }
        if self.segment_length > n {
            return Err(AnalysisError::parameter(
                "segment_length",
                format!("{} exceeds series length {}", self.segment_length, n),
            ));
        }
        if self.overlap >= self.segment_length {
            return Err(AnalysisError::parameter(
                "overlap",
                format!(
                    "{} must be smaller than segment length {}",
                    self.overlap, self.segment_length
                ),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerSpectrum {
    pub frequencies: Vec<f64>,
    /// One-sided power spectral density, units²/Hz.
    pub density: Vec<f64>,
    pub segments: usize,
    pub segment_length: usize,
    pub window: Window,
}

impl PowerSpectrum {
    pub fn resolution(&self) -> f64 {
        self.frequencies.get(1).copied().unwrap_or(0.0)
    }

    /// Integral of the density over frequency (the signal variance).
    pub fn total_power(&self) -> f64 {
        self.density.iter().sum::<f64>() * self.resolution()
    }

    pub fn peak_frequency(&self) -> f64 {
        let mut best = 0;
        for (i, &p) in self.density.iter().enumerate() {
            if p > self.density[best] {
                best = i;
            }
        }
        self.frequencies.get(best).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossSpectrum {
    pub frequencies: Vec<f64>,
    /// One-sided cross spectral density `conj(A) * B`.
    pub values: Vec<Complex64>,
    pub segments: usize,
}

impl CrossSpectrum {
    pub fn magnitude(&self) -> Vec<f64> {
        self.values.iter().map(|c| c.norm()).collect()
    }

    pub fn phase(&self) -> Vec<f64> {
        self.values.iter().map(|c| c.arg()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coherence {
    pub frequencies: Vec<f64>,
    /// Magnitude-squared coherence in [0, 1]; NaN where either channel has no power.
    pub values: Vec<f64>,
    pub undefined_bins: usize,
}

/// Windowed one-sided FFTs of every segment of a signal.
struct Segments {
    window: Vec<f64>,
    window_power: f64,
    starts: Vec<usize>,
    fft: Arc<dyn Fft<f64>>,
    params: WelchParams,
}

impl Segments {
    fn new(n: usize, params: &WelchParams) -> Result<Self> {
        params.validate(n)?;
        let len = params.segment_length;
        let step = len - params.overlap;
        let starts: Vec<usize> = (0..=n - len).step_by(step).collect();
        let window = params.window.coefficients(len);
        let window_power = window.iter().map(|w| w * w).sum();
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(len);
        Ok(Self {
            window,
            window_power,
            starts,
            fft,
            params: *params,
        })
    }

    fn bins(&self) -> usize {
        self.params.segment_length / 2 + 1
    }

    fn frequencies(&self, fs: f64) -> Vec<f64> {
        let len = self.params.segment_length as f64;
        (0..self.bins()).map(|k| k as f64 * fs / len).collect()
    }

    /// Density scale for bin `k`: one-sided bins other than DC and an even
    /// Nyquist bin carry the power of their negative-frequency twin.
    fn scale(&self, fs: f64, k: usize) -> f64 {
        let len = self.params.segment_length;
        let doubled = k > 0 && !(len % 2 == 0 && k == len / 2);
        let base = 1.0 / (fs * self.window_power);
        if doubled {
            2.0 * base
        } else {
            base
        }
    }

    fn spectra(&self, samples: &[f64]) -> Vec<Vec<Complex64>> {
        let len = self.params.segment_length;
        let bins = self.bins();
        self.starts
            .iter()
            .map(|&start| {
                let mut chunk = samples[start..start + len].to_vec();
                detrend(&mut chunk, self.params.detrend);
                let mut buffer: Vec<Complex64> = chunk
                    .iter()
                    .zip(self.window.iter())
                    .map(|(&s, &w)| Complex64::new(s * w, 0.0))
                    .collect();
                self.fft.process(&mut buffer);
                buffer.truncate(bins);
                buffer
            })
            .collect()
    }
}

pub(crate) fn detrend(chunk: &mut [f64], mode: Detrend) {
    let n = chunk.len();
    if n == 0 {
        return;
    }
    match mode {
        Detrend::None => {}
        Detrend::Mean => {
            let mean = chunk.iter().sum::<f64>() / n as f64;
            chunk.iter_mut().for_each(|v| *v -= mean);
        }
        Detrend::Linear => {
            let mean = chunk.iter().sum::<f64>() / n as f64;
            let center = (n - 1) as f64 / 2.0;
            let mut sxy = 0.0;
            let mut sxx = 0.0;
            for (i, &v) in chunk.iter().enumerate() {
                let x = i as f64 - center;
                sxy += x * (v - mean);
                sxx += x * x;
            }
            let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
            for (i, v) in chunk.iter_mut().enumerate() {
                *v -= mean + slope * (i as f64 - center);
            }
        }
    }
}

/// Welch power spectral density: windowed periodograms of overlapping
/// segments, averaged.
///
/// Density scaling makes `total_power()` match the signal variance whatever
/// the segment length.
pub fn power_spectrum(series: &Series, params: &WelchParams) -> Result<PowerSpectrum> {
    let segments = Segments::new(series.len(), params)?;
    let fs = series.sampling_rate();
    let spectra = segments.spectra(series.samples());
    let count = spectra.len() as f64;

    let mut density = vec![0.0; segments.bins()];
    for spectrum in &spectra {
        for (acc, c) in density.iter_mut().zip(spectrum.iter()) {
            *acc += c.norm_sqr();
        }
    }
    for (k, p) in density.iter_mut().enumerate() {
        *p *= segments.scale(fs, k) / count;
    }

    debug!(
        "Welch PSD: {} segments of {} samples ({} window), {} bins",
        spectra.len(),
        params.segment_length,
        params.window,
        density.len()
    );

    Ok(PowerSpectrum {
        frequencies: segments.frequencies(fs),
        density,
        segments: spectra.len(),
        segment_length: params.segment_length,
        window: params.window,
    })
}

/// Averaged cross spectral density `conj(FFT(a)) * FFT(b)`.
pub fn cross_spectrum(a: &Series, b: &Series, params: &WelchParams) -> Result<CrossSpectrum> {
    a.require_same_grid(b)?;
    let segments = Segments::new(a.len(), params)?;
    let fs = a.sampling_rate();
    let spectra_a = segments.spectra(a.samples());
    let spectra_b = segments.spectra(b.samples());
    let count = spectra_a.len() as f64;

    let mut values = vec![Complex64::new(0.0, 0.0); segments.bins()];
    for (sa, sb) in spectra_a.iter().zip(spectra_b.iter()) {
        for ((acc, xa), xb) in values.iter_mut().zip(sa.iter()).zip(sb.iter()) {
            *acc += xa.conj() * xb;
        }
    }
    for (k, v) in values.iter_mut().enumerate() {
        *v *= segments.scale(fs, k) / count;
    }

    debug!(
        "Cross spectrum: {} segments, {} bins",
        spectra_a.len(),
        values.len()
    );

    Ok(CrossSpectrum {
        frequencies: segments.frequencies(fs),
        values,
        segments: spectra_a.len(),
    })
}

/// Magnitude-squared coherence `|Pab|² / (Paa * Pbb)`.
pub fn coherence(a: &Series, b: &Series, params: &WelchParams) -> Result<Coherence> {
    let pab = cross_spectrum(a, b, params)?;
    let paa = power_spectrum(a, params)?;
    let pbb = power_spectrum(b, params)?;

    let floor = |p: &PowerSpectrum| {
        let max = p.density.iter().cloned().fold(0.0_f64, f64::max);
        (COHERENCE_FLOOR * max).max(f64::MIN_POSITIVE)
    };
    let (floor_a, floor_b) = (floor(&paa), floor(&pbb));

    let mut undefined_bins = 0;
    let values: Vec<f64> = pab
        .values
        .iter()
        .zip(paa.density.iter().zip(pbb.density.iter()))
        .map(|(cross, (&pa, &pb))| {
            if pa <= floor_a || pb <= floor_b {
                undefined_bins += 1;
                f64::NAN
            } else {
                (cross.norm_sqr() / (pa * pb)).clamp(0.0, 1.0)
            }
        })
        .collect();

    if undefined_bins > 0 {
        warn!(
            "Coherence undefined in {} of {} bins (no power on one channel)",
            undefined_bins,
            values.len()
        );
    }

    Ok(Coherence {
        frequencies: pab.frequencies,
        values,
        undefined_bins,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AveragedSpectrum {
    pub frequencies: Vec<f64>,
    pub magnitude: Vec<f64>,
    pub phase: Vec<f64>,
    pub segments: usize,
}

/// Complex FFT averaged over consecutive non-overlapping windowed segments.
///
/// A series shorter than `segment_length` is treated as one segment.
pub fn averaged_spectrum(series: &Series, window: Window, segment_length: usize) -> Result<AveragedSpectrum> {
    if segment_length < 2 {
        return Err(AnalysisError::parameter(
            "segment_length",
            format!("must be at least 2, got {}", segment_length),
        ));
    }
    let len = segment_length.min(series.len());
    let params = WelchParams::new(window, len, 0).with_detrend(Detrend::None);
    let segments = Segments::new(series.len(), &params)?;
    let spectra = segments.spectra(series.samples());
    let count = spectra.len() as f64;

    let mut avg = vec![Complex64::new(0.0, 0.0); segments.bins()];
    for spectrum in &spectra {
        for (acc, c) in avg.iter_mut().zip(spectrum.iter()) {
            *acc += c;
        }
    }
    avg.iter_mut().for_each(|c| *c /= count);

    Ok(AveragedSpectrum {
        frequencies: segments.frequencies(series.sampling_rate()),
        magnitude: avg.iter().map(|c| c.norm()).collect(),
        phase: avg.iter().map(|c| c.arg()).collect(),
        segments: spectra.len(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spectrogram {
    pub frequencies: Vec<f64>,
    /// Centre time of each segment, seconds from the first sample.
    pub times: Vec<f64>,
    pub data: Vec<Vec<f64>>, // [time][frequency]
}

/// Short-time power spectral density, one column per segment.
pub fn spectrogram(series: &Series, params: &WelchParams) -> Result<Spectrogram> {
    let segments = Segments::new(series.len(), params)?;
    let fs = series.sampling_rate();
    let time_offset = (params.segment_length as f64 / 2.0) / fs;

    let data: Vec<Vec<f64>> = segments
        .spectra(series.samples())
        .iter()
        .map(|spectrum| {
            spectrum
                .iter()
                .enumerate()
                .map(|(k, c)| c.norm_sqr() * segments.scale(fs, k))
                .collect()
        })
        .collect();
    let times = segments
        .starts
        .iter()
        .map(|&i| i as f64 / fs + time_offset)
        .collect();

    Ok(Spectrogram {
        frequencies: segments.frequencies(fs),
        times,
        data,
    })
}
