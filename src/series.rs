use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AnalysisError, Result};

/// Physical quantity carried by a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quantity {
    Acceleration,
    Velocity,
    Displacement,
}

impl Quantity {
    /// The quantity obtained by integrating once over time.
    pub fn integrated(self) -> Option<Quantity> {
        match self {
            Quantity::Acceleration => Some(Quantity::Velocity),
            Quantity::Velocity => Some(Quantity::Displacement),
            Quantity::Displacement => None,
        }
    }

    pub fn default_units(self) -> &'static str {
        match self {
            Quantity::Acceleration => "m/s²",
            Quantity::Velocity => "m/s",
            Quantity::Displacement => "m",
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Quantity::Acceleration => "acceleration",
            Quantity::Velocity => "velocity",
            Quantity::Displacement => "displacement",
        };
        write!(f, "{}", name)
    }
}

/// Unit label after one time integration ("cm/s²" -> "cm/s" -> "cm").
pub fn integrated_units(units: &str) -> String {
    if let Some(base) = units.strip_suffix("/s²").or_else(|| units.strip_suffix("/s^2")) {
        format!("{}/s", base)
    } else if let Some(base) = units.strip_suffix("/s") {
        base.to_string()
    } else {
        format!("{}·s", units)
    }
}

#[derive(Deserialize)]
struct RawSeries {
    samples: Vec<f64>,
    dt: f64,
    quantity: Quantity,
    units: String,
    #[serde(default)]
    start_time: Option<DateTime<Utc>>,
}

/// Uniformly sampled, immutable time series.
///
/// Construction rejects fewer than two samples, a non-positive or non-finite
/// `dt`, and any NaN/Inf sample, so every `&Series` handed to an engine is
/// already valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSeries")]
pub struct Series {
    samples: Vec<f64>,
    dt: f64,
    quantity: Quantity,
    units: String,
    start_time: Option<DateTime<Utc>>,
}

impl TryFrom<RawSeries> for Series {
    type Error = AnalysisError;

    fn try_from(raw: RawSeries) -> Result<Self> {
        let series = Series::new(raw.samples, raw.dt, raw.quantity, raw.units)?;
        Ok(match raw.start_time {
            Some(t) => series.with_start_time(t),
            None => series,
        })
    }
}

impl Series {
    pub fn new(samples: Vec<f64>, dt: f64, quantity: Quantity, units: impl Into<String>) -> Result<Self> {
        if samples.len() < 2 {
            return Err(AnalysisError::InvalidInput(format!(
                "series needs at least 2 samples, got {}",
                samples.len()
            )));
        }
        if !dt.is_finite() || dt <= 0.0 {
            return Err(AnalysisError::InvalidInput(format!(
                "sampling interval must be finite and > 0, got {}",
                dt
            )));
        }
        if let Some(i) = samples.iter().position(|x| !x.is_finite()) {
            return Err(AnalysisError::InvalidInput(format!(
                "non-finite sample {} at index {}",
                samples[i], i
            )));
        }
        Ok(Self {
            samples,
            dt,
            quantity,
            units: units.into(),
            start_time: None,
        })
    }

    /// Build a series from a sampling rate in Hz, with the quantity's SI units.
    pub fn from_rate(samples: Vec<f64>, sampling_rate: f64, quantity: Quantity) -> Result<Self> {
        if !sampling_rate.is_finite() || sampling_rate <= 0.0 {
            return Err(AnalysisError::InvalidInput(format!(
                "sampling rate must be finite and > 0, got {}",
                sampling_rate
            )));
        }
        Self::new(samples, 1.0 / sampling_rate, quantity, quantity.default_units())
    }

    pub fn with_start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = Some(start_time);
        self
    }

    /// New series sharing this one's sampling, quantity, units and start time.
    pub fn with_samples(&self, samples: Vec<f64>) -> Result<Self> {
        let mut out = Series::new(samples, self.dt, self.quantity, self.units.clone())?;
        out.start_time = self.start_time;
        Ok(out)
    }

    pub(crate) fn with_quantity(&self, samples: Vec<f64>, quantity: Quantity, units: String) -> Result<Self> {
        let mut out = Series::new(samples, self.dt, quantity, units)?;
        out.start_time = self.start_time;
        Ok(out)
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Always false: a valid series holds at least two samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn sampling_rate(&self) -> f64 {
        1.0 / self.dt
    }

    pub fn nyquist(&self) -> f64 {
        0.5 / self.dt
    }

    pub fn duration(&self) -> f64 {
        (self.samples.len() - 1) as f64 * self.dt
    }

    pub fn quantity(&self) -> Quantity {
        self.quantity
    }

    pub fn units(&self) -> &str {
        &self.units
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    /// Seconds from the first sample to `index`.
    pub fn time_of(&self, index: usize) -> f64 {
        index as f64 * self.dt
    }

    /// Absolute timestamp of `index`, when the start time is known and the
    /// result is representable.
    pub fn timestamp_of(&self, index: usize) -> Option<DateTime<Utc>> {
        let offset = Duration::nanoseconds((self.time_of(index) * 1e9).round() as i64);
        self.start_time.and_then(|t| t.checked_add_signed(offset))
    }

    pub fn times(&self) -> Vec<f64> {
        (0..self.samples.len()).map(|i| self.time_of(i)).collect()
    }

    pub fn mean(&self) -> f64 {
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    pub fn peak_abs(&self) -> f64 {
        self.samples.iter().fold(0.0_f64, |m, &x| m.max(x.abs()))
    }

    pub fn statistics(&self) -> SignalStatistics {
        SignalStatistics::from_samples(&self.samples)
    }

    /// Fails with `ChannelMismatch` unless both series share `dt` and length.
    pub fn require_same_grid(&self, other: &Series) -> Result<()> {
        let dt_tol = 1e-9 * self.dt.max(other.dt);
        if (self.dt - other.dt).abs() > dt_tol {
            return Err(AnalysisError::mismatch(
                format!("dt={}", self.dt),
                format!("dt={}", other.dt),
            ));
        }
        if self.len() != other.len() {
            return Err(AnalysisError::mismatch(
                format!("length={}", self.len()),
                format!("length={}", other.len()),
            ));
        }
        Ok(())
    }
}

/// Summary statistics of a sample array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalStatistics {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
    pub rms: f64,
    pub peak_to_peak: f64,
    pub abs_max: f64,
}

impl SignalStatistics {
    pub(crate) fn from_samples(samples: &[f64]) -> Self {
        let n = samples.len().max(1) as f64;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        for &x in samples {
            min = min.min(x);
            max = max.max(x);
            sum += x;
            sum_sq += x * x;
        }
        let mean = sum / n;
        let var = samples.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / n;
        Self {
            min,
            max,
            mean,
            std: var.sqrt(),
            rms: (sum_sq / n).sqrt(),
            peak_to_peak: max - min,
            abs_max: min.abs().max(max.abs()),
        }
    }
}

/// Seismometer component label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Component {
    North,
    East,
    Vertical,
    Other(String),
}

impl Component {
    /// Map a channel code or label to a component using its last character
    /// (`HNZ` -> vertical, `N` -> north, `1`/`2` stay as other).
    pub fn from_code(code: &str) -> Self {
        match code.trim().chars().last().map(|c| c.to_ascii_uppercase()) {
            Some('N') => Component::North,
            Some('E') => Component::East,
            Some('Z') => Component::Vertical,
            _ => Component::Other(code.trim().to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Component::North => "N",
            Component::East => "E",
            Component::Vertical => "Z",
            Component::Other(s) => s,
        }
    }
}

/// Calibration data attached by the format reader; sample values are already
/// in physical units when they reach this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMetadata {
    pub station: String,
    pub sensitivity: f64,
    pub gain: f64,
}

impl Default for ChannelMetadata {
    fn default() -> Self {
        Self {
            station: String::new(),
            sensitivity: 1.0,
            gain: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub component: Component,
    pub series: Series,
    pub metadata: ChannelMetadata,
}

impl Channel {
    pub fn new(component: Component, series: Series) -> Self {
        Self {
            component,
            series,
            metadata: ChannelMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: ChannelMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Station and component, e.g. `STN01.Z`.
    pub fn id(&self) -> String {
        if self.metadata.station.is_empty() {
            self.component.label().to_string()
        } else {
            format!("{}.{}", self.metadata.station, self.component.label())
        }
    }
}

/// Linear-interpolation resampling onto a `1 / target_rate` grid covering the
/// same time span.
pub fn resample(series: &Series, target_rate: f64) -> Result<Series> {
    if !target_rate.is_finite() || target_rate <= 0.0 {
        return Err(AnalysisError::parameter(
            "target_rate",
            format!("must be finite and > 0, got {}", target_rate),
        ));
    }
    if ((series.sampling_rate() - target_rate) / target_rate).abs() < 1e-12 {
        return Ok(series.clone());
    }
    let x = series.samples();
    let dt_out = 1.0 / target_rate;
    // The output grid starts on the first sample and never extrapolates past the last.
    let n_out = (series.duration() / dt_out + 1e-9).floor() as usize + 1;
    if n_out < 2 {
        return Err(AnalysisError::parameter(
            "target_rate",
            format!("{} Hz leaves fewer than 2 samples", target_rate),
        ));
    }
    let samples: Vec<f64> = (0..n_out)
        .map(|j| {
            let pos = j as f64 * dt_out / series.dt();
            let i = (pos.floor() as usize).min(x.len() - 2);
            let frac = pos - i as f64;
            x[i] + (x[i + 1] - x[i]) * frac
        })
        .collect();
    let mut out = Series::new(samples, dt_out, series.quantity(), series.units())?;
    out.start_time = series.start_time();
    Ok(out)
}
