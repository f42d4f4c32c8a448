use num_complex::Complex64;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::debug;

use crate::error::{AnalysisError, Result};
use crate::series::Series;

/// How correlation sums are evaluated. Both give the same values to
/// floating-point tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationMethod {
    Direct,
    #[default]
    Fft,
}

impl FromStr for CorrelationMethod {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "direct" => Ok(CorrelationMethod::Direct),
            "fft" => Ok(CorrelationMethod::Fft),
            other => Err(AnalysisError::parameter(
                "correlation_method",
                format!("unknown correlation method '{}'", other),
            )),
        }
    }
}

/// Normalised correlation for lags `-max_lag..=max_lag`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
    pub lags: Vec<i64>,
    /// Lags in seconds.
    pub lag_times: Vec<f64>,
    pub values: Vec<f64>,
}

impl Correlation {
    pub fn at_lag(&self, lag: i64) -> Option<f64> {
        let max_lag = (self.lags.len() / 2) as i64;
        if lag.abs() > max_lag {
            return None;
        }
        self.values.get((lag + max_lag) as usize).copied()
    }

    /// Lag with the largest absolute correlation.
    pub fn peak_lag(&self) -> i64 {
        let mut best = 0;
        for (i, v) in self.values.iter().enumerate() {
            if v.abs() > self.values[best].abs() {
                best = i;
            }
        }
        self.lags.get(best).copied().unwrap_or(0)
    }
}

fn centered(series: &Series, label: &str) -> Result<(Vec<f64>, f64)> {
    let mean = series.mean();
    let x: Vec<f64> = series.samples().iter().map(|v| v - mean).collect();
    let energy: f64 = x.iter().map(|v| v * v).sum();
    if energy <= f64::MIN_POSITIVE {
        return Err(AnalysisError::InvalidInput(format!(
            "{} has zero variance; correlation is undefined",
            label
        )));
    }
    Ok((x, energy))
}

/// `r[k] = sum_i x[i] * y[i + k]` for `k` in `-max_lag..=max_lag`.
fn direct(x: &[f64], y: &[f64], max_lag: usize) -> Vec<f64> {
    let n = x.len() as i64;
    let max_lag = max_lag as i64;
    (-max_lag..=max_lag)
        .map(|k| {
            let lo = 0.max(-k);
            let hi = n.min(n - k);
            (lo..hi).map(|i| x[i as usize] * y[(i + k) as usize]).sum()
        })
        .collect()
}

fn via_fft(x: &[f64], y: &[f64], max_lag: usize) -> Vec<f64> {
    let n = x.len();
    // Zero padding to n + max_lag keeps the wrapped products at zero.
    let size = (n + max_lag).next_power_of_two();
    let mut planner = FftPlanner::new();
    let forward = planner.plan_fft_forward(size);
    let inverse = planner.plan_fft_inverse(size);

    let pad = |v: &[f64]| {
        let mut buf: Vec<Complex64> = v.iter().map(|&s| Complex64::new(s, 0.0)).collect();
        buf.resize(size, Complex64::new(0.0, 0.0));
        buf
    };
    let mut fx = pad(x);
    let mut fy = pad(y);
    forward.process(&mut fx);
    forward.process(&mut fy);

    let mut prod: Vec<Complex64> = fx.iter().zip(fy.iter()).map(|(a, b)| a.conj() * b).collect();
    inverse.process(&mut prod);

    let scale = 1.0 / size as f64;
    let mut out = Vec::with_capacity(2 * max_lag + 1);
    for k in (1..=max_lag).rev() {
        out.push(prod[size - k].re * scale);
    }
    for k in 0..=max_lag {
        out.push(prod[k].re * scale);
    }
    out
}

fn correlate(a: &Series, b: &Series, max_lag: usize, method: CorrelationMethod) -> Result<Correlation> {
    a.require_same_grid(b)?;
    if max_lag >= a.len() {
        return Err(AnalysisError::parameter(
            "max_lag",
            format!("{} must be smaller than series length {}", max_lag, a.len()),
        ));
    }
    let (x, ex) = centered(a, "first series")?;
    let (y, ey) = centered(b, "second series")?;
    let norm = (ex * ey).sqrt();

    let raw = match method {
        CorrelationMethod::Direct => direct(&x, &y, max_lag),
        CorrelationMethod::Fft => via_fft(&x, &y, max_lag),
    };
    debug!("Correlation over ±{} lags ({:?})", max_lag, method);

    let lags: Vec<i64> = (-(max_lag as i64)..=max_lag as i64).collect();
    let lag_times = lags.iter().map(|&k| k as f64 * a.dt()).collect();
    Ok(Correlation {
        lags,
        lag_times,
        values: raw.into_iter().map(|v| v / norm).collect(),
    })
}

/// Mean-removed autocorrelation normalised to 1 at zero lag.
pub fn autocorrelation(series: &Series, max_lag: usize, method: CorrelationMethod) -> Result<Correlation> {
    correlate(series, series, max_lag, method)
}

/// Mean-removed cross-correlation normalised by both signal energies.
/// A positive peak lag means `b` lags behind `a`.
pub fn cross_correlation(a: &Series, b: &Series, max_lag: usize, method: CorrelationMethod) -> Result<Correlation> {
    correlate(a, b, max_lag, method)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::Quantity;
    use crate::synth;

    fn series(samples: Vec<f64>) -> Series {
        Series::from_rate(samples, 100.0, Quantity::Acceleration).unwrap()
    }

    #[test]
    fn test_zero_lag_is_one() {
        let s = series(synth::white_noise(500, 2.0, 4));
        for method in [CorrelationMethod::Direct, CorrelationMethod::Fft] {
            let r = autocorrelation(&s, 50, method).unwrap();
            assert_eq!(r.values.len(), 101);
            assert!((r.at_lag(0).unwrap() - 1.0).abs() < 1e-12);
            assert!(r.values.iter().all(|v| v.abs() <= 1.0 + 1e-12));
            for k in 1..=50 {
                assert!((r.at_lag(k).unwrap() - r.at_lag(-k).unwrap()).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_methods_agree() {
        let a = series(synth::white_noise(300, 1.0, 8));
        let b = series(synth::white_noise(300, 1.0, 9));
        let d = cross_correlation(&a, &b, 299, CorrelationMethod::Direct).unwrap();
        let f = cross_correlation(&a, &b, 299, CorrelationMethod::Fft).unwrap();
        for (x, y) in d.values.iter().zip(f.values.iter()) {
            assert!((x - y).abs() < 1e-10);
        }
    }

    #[test]
    fn test_cross_with_self_matches_auto() {
        let s = series(synth::white_noise(256, 1.0, 12));
        let auto = autocorrelation(&s, 30, CorrelationMethod::Fft).unwrap();
        let cross = cross_correlation(&s, &s, 30, CorrelationMethod::Fft).unwrap();
        assert_eq!(auto, cross);
    }

    #[test]
    fn test_delay_shows_as_peak_lag() {
        let x = synth::white_noise(400, 1.0, 21);
        let mut y = vec![0.0; 400];
        y[5..].copy_from_slice(&x[..395]);
        let r = cross_correlation(&series(x), &series(y), 20, CorrelationMethod::Direct).unwrap();
        assert_eq!(r.peak_lag(), 5);
        assert!((r.lag_times[25] - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_constant_and_long_lag() {
        let flat = series(vec![3.0; 100]);
        assert!(matches!(
            autocorrelation(&flat, 10, CorrelationMethod::Direct),
            Err(AnalysisError::InvalidInput(_))
        ));
        let s = series(synth::white_noise(100, 1.0, 2));
        assert!(matches!(
            autocorrelation(&s, 100, CorrelationMethod::Fft),
            Err(AnalysisError::InvalidParameter { .. })
        ));
    }
}
