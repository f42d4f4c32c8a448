//! Elastic response spectra of single-degree-of-freedom oscillators.

mod sdof;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, warn};

use crate::error::{AnalysisError, Result};
use crate::series::{Quantity, Series};
use sdof::Oscillator;

pub use sdof::{MAX_SUBSTEPS, MIN_STEPS_PER_PERIOD};

/// Peak response of one oscillator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResponsePoint {
    pub period: f64,
    /// Pseudo-spectral acceleration.
    pub sa: f64,
    /// Pseudo-spectral velocity.
    pub sv: f64,
    /// Peak relative displacement.
    pub sd: f64,
    /// Integration steps per input sample; above 1 when the period was too
    /// short for the native sampling interval.
    pub substeps: usize,
    /// False when the oscillator was too stiff to integrate and the rigid
    /// limit `PGA/ω²` was reported instead.
    pub reliable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSpectrum {
    pub damping: f64,
    pub points: Vec<ResponsePoint>,
}

impl ResponseSpectrum {
    pub fn periods(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.period).collect()
    }

    pub fn sa(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.sa).collect()
    }

    pub fn sv(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.sv).collect()
    }

    pub fn sd(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.sd).collect()
    }

    /// Point with the largest pseudo-acceleration.
    pub fn peak(&self) -> Option<&ResponsePoint> {
        self.points.iter().fold(None, |best: Option<&ResponsePoint>, p| match best {
            Some(b) if b.sa >= p.sa => Some(b),
            _ => Some(p),
        })
    }

    /// Number of periods that needed sub-stepping.
    pub fn substepped(&self) -> usize {
        self.points.iter().filter(|p| p.substeps > 1).count()
    }
}

/// `n` log-spaced periods from `min` to `max` seconds, both included.
pub fn log_periods(min: f64, max: f64, n: usize) -> Result<Vec<f64>> {
    if !(min > 0.0 && min.is_finite() && max.is_finite() && max > min) {
        return Err(AnalysisError::parameter(
            "periods",
            format!("need 0 < min < max, got {} and {}", min, max),
        ));
    }
    if n < 2 {
        return Err(AnalysisError::parameter(
            "periods",
            format!("need at least 2 periods, got {}", n),
        ));
    }
    let (lo, hi) = (min.log10(), max.log10());
    let step = (hi - lo) / (n - 1) as f64;
    let mut periods: Vec<f64> = (0..n).map(|i| 10f64.powf(lo + step * i as f64)).collect();
    periods[0] = min;
    periods[n - 1] = max;
    Ok(periods)
}

/// 100 log-spaced periods between 0.01 s and 10 s.
pub fn default_periods() -> Vec<f64> {
    let (lo, hi) = (-2.0_f64, 1.0_f64);
    (0..100)
        .map(|i| 10f64.powf(lo + (hi - lo) * i as f64 / 99.0))
        .collect()
}

fn validate_periods(periods: &[f64]) -> Result<()> {
    if periods.is_empty() {
        return Err(AnalysisError::parameter("periods", "period grid is empty"));
    }
    if let Some(p) = periods.iter().find(|p| !(p.is_finite() && **p > 0.0)) {
        return Err(AnalysisError::parameter(
            "periods",
            format!("periods must be finite and > 0, got {}", p),
        ));
    }
    if let Some(w) = periods.windows(2).find(|w| w[1] <= w[0]) {
        return Err(AnalysisError::parameter(
            "periods",
            format!("periods must be strictly increasing ({} then {})", w[0], w[1]),
        ));
    }
    Ok(())
}

/// Peak response of damped SDOF oscillators to a ground acceleration record.
///
/// Each period is integrated independently with the piecewise-exact
/// recurrence (exact for ground acceleration varying linearly between
/// samples). Periods shorter than ten sampling intervals are sub-stepped and
/// report their step count in [`ResponsePoint::substeps`].
pub fn compute_response_spectrum(ground: &Series, periods: &[f64], damping: f64) -> Result<ResponseSpectrum> {
    if ground.quantity() != Quantity::Acceleration {
        return Err(AnalysisError::parameter(
            "ground",
            format!("expected acceleration, got {}", ground.quantity()),
        ));
    }
    if !(damping.is_finite() && (0.0..1.0).contains(&damping)) {
        return Err(AnalysisError::parameter(
            "damping",
            format!("damping ratio must be in [0, 1), got {}", damping),
        ));
    }
    validate_periods(periods)?;

    let dt = ground.dt();
    let samples = ground.samples();
    let pga = ground.peak_abs();
    let points: Vec<ResponsePoint> = periods
        .par_iter()
        .map(|&period| {
            let osc = Oscillator::new(period, damping, dt);
            let sd = if osc.rigid {
                pga / (osc.omega * osc.omega)
            } else {
                osc.peak_displacement(samples)
            };
            ResponsePoint {
                period,
                sa: sd * osc.omega * osc.omega,
                sv: sd * osc.omega,
                sd,
                substeps: osc.substeps,
                reliable: !osc.rigid,
            }
        })
        .collect();

    let spectrum = ResponseSpectrum { damping, points };
    let substepped = spectrum.substepped();
    if substepped > 0 {
        warn!(
            "{} of {} periods shorter than {} samples were sub-stepped",
            substepped,
            periods.len(),
            MIN_STEPS_PER_PERIOD
        );
    }
    let rigid = spectrum.points.iter().filter(|p| !p.reliable).count();
    if rigid > 0 {
        warn!(
            "{} period(s) need more than {} steps per sample; reporting the rigid limit",
            rigid, MAX_SUBSTEPS
        );
    }
    debug!(
        "Response spectrum: {} periods, damping {}, {} samples at dt={}",
        periods.len(),
        damping,
        samples.len(),
        dt
    );
    Ok(spectrum)
}

/// Rule for combining the spectra of orthogonal components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CombinationMethod {
    /// Square root of the sum of squares.
    #[default]
    Srss,
    /// Largest of 100 % of one component plus 30 % of each other.
    Percent30,
}

impl FromStr for CombinationMethod {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "srss" => Ok(CombinationMethod::Srss),
            "percent30" | "30%" | "100-30" => Ok(CombinationMethod::Percent30),
            other => Err(AnalysisError::parameter(
                "combination",
                format!("unknown combination rule '{}'", other),
            )),
        }
    }
}

fn combine(values: &[f64], method: CombinationMethod) -> f64 {
    match method {
        CombinationMethod::Srss => values.iter().map(|v| v * v).sum::<f64>().sqrt(),
        CombinationMethod::Percent30 => {
            let total: f64 = values.iter().map(|v| v.abs()).sum();
            values
                .iter()
                .map(|v| v.abs() + 0.3 * (total - v.abs()))
                .fold(0.0, f64::max)
        }
    }
}

/// Combine the spectra of up to three components computed on the same
/// period grid and damping.
pub fn combine_response(components: &[&ResponseSpectrum], method: CombinationMethod) -> Result<ResponseSpectrum> {
    let first = match components.first() {
        Some(first) if components.len() <= 3 => *first,
        _ => {
            return Err(AnalysisError::parameter(
                "components",
                format!("need 1 to 3 spectra, got {}", components.len()),
            ))
        }
    };
    for other in &components[1..] {
        if (other.damping - first.damping).abs() > 1e-12 {
            return Err(AnalysisError::mismatch(
                format!("damping={}", first.damping),
                format!("damping={}", other.damping),
            ));
        }
        let same_grid = other.points.len() == first.points.len()
            && other
                .points
                .iter()
                .zip(first.points.iter())
                .all(|(a, b)| (a.period - b.period).abs() <= 1e-12 * b.period);
        if !same_grid {
            return Err(AnalysisError::mismatch(
                format!("{} periods", first.points.len()),
                format!("{} periods on a different grid", other.points.len()),
            ));
        }
    }

    let points = (0..first.points.len())
        .map(|i| {
            let pick = |f: fn(&ResponsePoint) -> f64| -> Vec<f64> { components.iter().map(|c| f(&c.points[i])).collect() };
            ResponsePoint {
                period: first.points[i].period,
                sa: combine(&pick(|p| p.sa), method),
                sv: combine(&pick(|p| p.sv), method),
                sd: combine(&pick(|p| p.sd), method),
                substeps: components.iter().map(|c| c.points[i].substeps).max().unwrap_or(1),
                reliable: components.iter().all(|c| c.points[i].reliable),
            }
        })
        .collect();

    Ok(ResponseSpectrum {
        damping: first.damping,
        points,
    })
}
