use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, warn};

use crate::error::{AnalysisError, Result};
use crate::filter::{self, FilterSpec};
use crate::series::{integrated_units, Quantity, Series};

/// Highest polynomial order accepted for baseline fitting.
pub const MAX_BASELINE_ORDER: usize = 10;

/// Trend removed by [`remove_baseline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaselineMode {
    Mean,
    Linear,
    Polynomial(usize),
}

impl BaselineMode {
    pub fn order(self) -> usize {
        match self {
            BaselineMode::Mean => 0,
            BaselineMode::Linear => 1,
            BaselineMode::Polynomial(order) => order,
        }
    }

    /// Lower the order so the fit keeps at least one residual degree of
    /// freedom per coefficient on a series of `n` samples.
    pub fn fit_to_length(self, n: usize) -> Self {
        let limit = n.saturating_sub(1) / 2;
        if self.order() <= limit {
            return self;
        }
        match limit {
            0 => BaselineMode::Mean,
            1 => BaselineMode::Linear,
            order => BaselineMode::Polynomial(order),
        }
    }
}

impl Default for BaselineMode {
    fn default() -> Self {
        BaselineMode::Polynomial(3)
    }
}

impl FromStr for BaselineMode {
    type Err = AnalysisError;

    /// `mean`, `linear`, or `polynomial:<order>`.
    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_lowercase();
        match lower.as_str() {
            "mean" => return Ok(BaselineMode::Mean),
            "linear" => return Ok(BaselineMode::Linear),
            _ => {}
        }
        if let Some(order) = lower.strip_prefix("polynomial:") {
            return order
                .trim()
                .parse::<usize>()
                .map(BaselineMode::Polynomial)
                .map_err(|e| AnalysisError::parameter("baseline", format!("bad order '{}': {}", order, e)));
        }
        Err(AnalysisError::parameter(
            "baseline",
            format!("unknown baseline mode '{}'", s),
        ))
    }
}

/// Least-squares polynomial trend of `samples` evaluated at every sample.
///
/// The fit uses Legendre polynomials over time normalised to [-1, 1], which
/// keeps the normal equations well conditioned up to the maximum order.
fn polynomial_trend(samples: &[f64], order: usize) -> Vec<f64> {
    let n = samples.len();
    let terms = order + 1;
    let span = (n - 1).max(1) as f64;

    let basis = |u: f64| {
        let mut p = Vec::with_capacity(terms);
        p.push(1.0);
        if terms > 1 {
            p.push(u);
        }
        for k in 1..terms.saturating_sub(1) {
            let kf = k as f64;
            let next = ((2.0 * kf + 1.0) * u * p[k] - kf * p[k - 1]) / (kf + 1.0);
            p.push(next);
        }
        p
    };

    let mut gram = vec![vec![0.0; terms]; terms];
    let mut rhs = vec![0.0; terms];
    let rows: Vec<Vec<f64>> = (0..n).map(|i| basis(2.0 * i as f64 / span - 1.0)).collect();
    for (row, &y) in rows.iter().zip(samples.iter()) {
        for j in 0..terms {
            rhs[j] += row[j] * y;
            for k in j..terms {
                gram[j][k] += row[j] * row[k];
            }
        }
    }
    for j in 0..terms {
        for k in 0..j {
            gram[j][k] = gram[k][j];
        }
    }

    let coeffs = solve(gram, rhs);
    rows.iter()
        .map(|row| row.iter().zip(coeffs.iter()).map(|(p, c)| p * c).sum())
        .collect()
}

/// Gaussian elimination with partial pivoting. Singular pivots contribute zero.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Vec<f64> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        a.swap(col, pivot);
        b.swap(col, pivot);
        let p = a[col][col];
        if p.abs() < 1e-300 {
            continue;
        }
        for row in col + 1..n {
            let factor = a[row][col] / p;
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for col in (0..n).rev() {
        let p = a[col][col];
        if p.abs() < 1e-300 {
            continue;
        }
        let tail: f64 = (col + 1..n).map(|k| a[col][k] * x[k]).sum();
        x[col] = (b[col] - tail) / p;
    }
    x
}

/// Subtract the mean or a fitted polynomial trend from every sample.
pub fn remove_baseline(series: &Series, mode: BaselineMode) -> Result<Series> {
    let n = series.len();
    let order = mode.order();
    if order > MAX_BASELINE_ORDER {
        return Err(AnalysisError::parameter(
            "baseline",
            format!("polynomial order {} above maximum {}", order, MAX_BASELINE_ORDER),
        ));
    }
    if order >= n {
        return Err(AnalysisError::parameter(
            "baseline",
            format!("polynomial order {} needs more than {} samples", order, n),
        ));
    }
    if n < 4 * (order + 1) {
        warn!(
            "Baseline polynomial of order {} fitted to only {} samples",
            order, n
        );
    }

    let corrected = if order == 0 {
        let mean = series.mean();
        series.samples().iter().map(|v| v - mean).collect()
    } else {
        let trend = polynomial_trend(series.samples(), order);
        series
            .samples()
            .iter()
            .zip(trend.iter())
            .map(|(v, t)| v - t)
            .collect()
    };
    series.with_samples(corrected)
}

/// Zero-phase high-pass applied before an integration pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Highpass {
    pub cutoff: f64,
    pub order: usize,
}

/// Corrections around one trapezoidal integration pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntegrationOptions {
    /// Trend removed from the integrated series; `None` keeps the raw sum.
    pub baseline_after: Option<BaselineMode>,
    /// Drift-suppression filter applied to the input before integrating.
    pub highpass: Option<Highpass>,
}

impl Default for IntegrationOptions {
    fn default() -> Self {
        Self {
            baseline_after: Some(BaselineMode::default()),
            highpass: None,
        }
    }
}

impl IntegrationOptions {
    /// Plain trapezoidal integration with no correction.
    pub fn raw() -> Self {
        Self {
            baseline_after: None,
            highpass: None,
        }
    }

    pub fn with_highpass(mut self, cutoff: f64, order: usize) -> Self {
        self.highpass = Some(Highpass { cutoff, order });
        self
    }
}

/// Trapezoidal integral with `y[0] = 0`.
fn trapezoid(samples: &[f64], dt: f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(samples.len());
    let mut acc = 0.0;
    out.push(acc);
    for pair in samples.windows(2) {
        // halves summed separately so samples near f64::MAX cannot overflow
        acc += 0.5 * dt * pair[0] + 0.5 * dt * pair[1];
        out.push(acc);
    }
    out
}

/// Integrate acceleration to velocity or velocity to displacement.
pub fn integrate(series: &Series, options: &IntegrationOptions) -> Result<Series> {
    let quantity = series.quantity().integrated().ok_or_else(|| {
        AnalysisError::parameter(
            "quantity",
            format!("{} cannot be integrated further", series.quantity()),
        )
    })?;

    let n = series.len();
    let baseline_after = options.baseline_after.map(|mode| mode.fit_to_length(n));
    if baseline_after != options.baseline_after {
        debug!(
            "Baseline {:?} lowered to {:?} for {} samples",
            options.baseline_after, baseline_after, n
        );
    }

    let input = match options.highpass {
        Some(hp) => {
            let detrended = remove_baseline(series, baseline_after.unwrap_or(BaselineMode::Mean))?;
            let spec = FilterSpec::highpass(hp.cutoff, hp.order, series.sampling_rate());
            filter::apply(&detrended, &spec)?
        }
        None => series.clone(),
    };

    let summed = trapezoid(input.samples(), input.dt());
    let integrated = series.with_quantity(summed, quantity, integrated_units(series.units()))?;

    debug!(
        "Integrated {} -> {} ({} samples, baseline {:?}, highpass {:?})",
        series.quantity(),
        quantity,
        series.len(),
        baseline_after,
        options.highpass
    );

    match baseline_after {
        Some(mode) => remove_baseline(&integrated, mode),
        None => Ok(integrated),
    }
}

/// Corrections used by [`process_acceleration`]. A cutoff of zero disables
/// the corresponding high-pass stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KinematicsConfig {
    pub baseline: BaselineMode,
    pub acceleration_highpass: f64,
    pub velocity_highpass: f64,
    pub filter_order: usize,
}

impl Default for KinematicsConfig {
    fn default() -> Self {
        Self {
            baseline: BaselineMode::Polynomial(3),
            acceleration_highpass: 0.1,
            velocity_highpass: 0.05,
            filter_order: 4,
        }
    }
}

impl KinematicsConfig {
    fn pass(&self, cutoff: f64) -> IntegrationOptions {
        let options = IntegrationOptions {
            baseline_after: Some(self.baseline),
            highpass: None,
        };
        if cutoff > 0.0 {
            options.with_highpass(cutoff, self.filter_order)
        } else {
            options
        }
    }
}

/// Acceleration with its corrected velocity and displacement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundMotion {
    pub acceleration: Series,
    pub velocity: Series,
    pub displacement: Series,
    pub pga: f64,
    pub pgv: f64,
    pub pgd: f64,
}

/// Double integration of an acceleration record with drift correction.
pub fn process_acceleration(acceleration: &Series, config: &KinematicsConfig) -> Result<GroundMotion> {
    if acceleration.quantity() != Quantity::Acceleration {
        return Err(AnalysisError::parameter(
            "quantity",
            format!("expected acceleration, got {}", acceleration.quantity()),
        ));
    }
    let velocity = integrate(acceleration, &config.pass(config.acceleration_highpass))?;
    let displacement = integrate(&velocity, &config.pass(config.velocity_highpass))?;

    let motion = GroundMotion {
        pga: acceleration.peak_abs(),
        pgv: velocity.peak_abs(),
        pgd: displacement.peak_abs(),
        acceleration: acceleration.clone(),
        velocity,
        displacement,
    };
    debug!(
        "PGA {:.4} {}, PGV {:.4} {}, PGD {:.4} {}",
        motion.pga,
        motion.acceleration.units(),
        motion.pgv,
        motion.velocity.units(),
        motion.pgd,
        motion.displacement.units()
    );
    Ok(motion)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn accel(samples: Vec<f64>) -> Series {
        Series::from_rate(samples, 100.0, Quantity::Acceleration).unwrap()
    }

    /// Acceleration whose exact displacement is `D sin²(πt/T) sin(ωt)` with
    /// `D = 1/ω²` and a 1 Hz carrier, plus a constant offset.
    fn enveloped_sine(seconds: f64, offset: f64) -> Vec<f64> {
        let fs = 100.0;
        let n = (seconds * fs) as usize;
        let w = 2.0 * PI;
        let d = 1.0 / (w * w);
        let k = PI / seconds;
        (0..n)
            .map(|i| {
                let t = i as f64 / fs;
                let env = (k * t).sin().powi(2);
                let env1 = k * (2.0 * k * t).sin();
                let env2 = 2.0 * k * k * (2.0 * k * t).cos();
                let (s, c) = (w * t).sin_cos();
                offset + d * (env2 * s + 2.0 * env1 * w * c - env * w * w * s)
            })
            .collect()
    }

    #[test]
    fn test_remove_baseline_zero_mean() {
        let x: Vec<f64> = (0..500).map(|i| 0.3 + 0.01 * i as f64 + (i as f64 * 0.37).sin()).collect();
        let s = accel(x);
        for mode in [BaselineMode::Mean, BaselineMode::Linear, BaselineMode::Polynomial(3), BaselineMode::Polynomial(10)] {
            let out = remove_baseline(&s, mode).unwrap();
            assert!(out.mean().abs() < 1e-9, "{:?}: mean {}", mode, out.mean());
        }
    }

    #[test]
    fn test_polynomial_trend_removed_exactly() {
        let x: Vec<f64> = (0..200)
            .map(|i| {
                let t = i as f64 / 100.0;
                1.0 - 2.0 * t + 0.5 * t * t - 0.25 * t * t * t
            })
            .collect();
        let out = remove_baseline(&accel(x), BaselineMode::Polynomial(3)).unwrap();
        assert!(out.peak_abs() < 1e-9, "residual {}", out.peak_abs());
    }

    #[test]
    fn test_baseline_order_limits() {
        let s = accel(vec![1.0, 2.0, 3.0]);
        assert!(matches!(
            remove_baseline(&s, BaselineMode::Polynomial(3)),
            Err(AnalysisError::InvalidParameter { .. })
        ));
        let long = accel(vec![0.5; 100]);
        assert!(remove_baseline(&long, BaselineMode::Polynomial(MAX_BASELINE_ORDER + 1)).is_err());
    }

    #[test]
    fn test_integrate_zero_is_zero() {
        let v = integrate(&accel(vec![0.0; 300]), &IntegrationOptions::default()).unwrap();
        assert_eq!(v.quantity(), Quantity::Velocity);
        assert_eq!(v.units(), "m/s");
        assert!(v.samples().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_trapezoid_raw() {
        let v = integrate(&accel(vec![1.0, 3.0, 5.0]), &IntegrationOptions::raw()).unwrap();
        let expected = [0.0, 0.02, 0.06];
        for (got, want) in v.samples().iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-12);
        }
    }

    #[test]
    fn test_sine_integrates_to_shifted_cosine() {
        let a = 2.0;
        let w = 2.0 * PI;
        let x: Vec<f64> = (0..1000).map(|i| a * (w * i as f64 / 100.0).sin()).collect();
        let raw = integrate(&accel(x.clone()), &IntegrationOptions::raw()).unwrap();
        for (i, v) in raw.samples().iter().enumerate() {
            let t = i as f64 / 100.0;
            assert!((v - a / w * (1.0 - (w * t).cos())).abs() < 1e-3 * a / w);
        }

        let corrected = integrate(&accel(x), &IntegrationOptions::default()).unwrap();
        for (i, v) in corrected.samples().iter().enumerate().skip(100).take(800) {
            let t = i as f64 / 100.0;
            let expected = -a / w * (w * t).cos();
            assert!((v - expected).abs() < 0.05 * a / w, "t={} v={} expected={}", t, v, expected);
        }
    }

    #[test]
    fn test_shortest_series_integrate_with_default_correction() {
        for x in [vec![1.0, 2.0], vec![1.0, 2.0, 3.0], vec![0.5, -1.0, 2.0, 0.0, 1.0]] {
            let n = x.len();
            let v = integrate(&accel(x), &IntegrationOptions::default()).unwrap();
            assert_eq!(v.len(), n);
            assert!(v.mean().abs() < 1e-12, "n={} mean {}", n, v.mean());
        }
        assert_eq!(BaselineMode::Polynomial(3).fit_to_length(2), BaselineMode::Mean);
        assert_eq!(BaselineMode::Polynomial(3).fit_to_length(3), BaselineMode::Linear);
        assert_eq!(BaselineMode::Polynomial(3).fit_to_length(5), BaselineMode::Polynomial(2));
        assert_eq!(BaselineMode::Polynomial(3).fit_to_length(7), BaselineMode::Polynomial(3));
    }

    #[test]
    fn test_extreme_amplitude_stays_finite() {
        let raw = integrate(&accel(vec![1e308; 10]), &IntegrationOptions::raw()).unwrap();
        assert!((raw.samples()[1] - 1e306).abs() < 1e292);
        assert!((raw.samples()[9] - 9e306).abs() < 1e293);

        let corrected = integrate(&accel(vec![1e300; 10]), &IntegrationOptions::default()).unwrap();
        assert!(corrected.samples().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_displacement_cannot_be_integrated() {
        let d = Series::from_rate(vec![0.0, 1.0], 100.0, Quantity::Displacement).unwrap();
        assert!(matches!(
            integrate(&d, &IntegrationOptions::raw()),
            Err(AnalysisError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_process_acceleration_suppresses_drift() {
        let s = accel(enveloped_sine(20.0, 0.01));

        let raw_v = integrate(&s, &IntegrationOptions::raw()).unwrap();
        let raw_d = integrate(&raw_v, &IntegrationOptions::raw()).unwrap();
        assert!(raw_d.peak_abs() > 1.0);

        let motion = process_acceleration(&s, &KinematicsConfig::default()).unwrap();
        let w = 2.0 * PI;
        assert_eq!(motion.pga, s.peak_abs());
        assert!((motion.pgv - 1.0 / w).abs() < 0.1 / w, "pgv {}", motion.pgv);
        assert!((motion.pgd - 1.0 / (w * w)).abs() < 0.15 / (w * w), "pgd {}", motion.pgd);
        assert_eq!(motion.displacement.units(), "m");
    }

    #[test]
    fn test_process_rejects_velocity() {
        let v = Series::from_rate(vec![0.0; 10], 100.0, Quantity::Velocity).unwrap();
        assert!(process_acceleration(&v, &KinematicsConfig::default()).is_err());
    }

    #[test]
    fn test_parse_baseline() {
        assert_eq!("polynomial:5".parse::<BaselineMode>().unwrap(), BaselineMode::Polynomial(5));
        assert_eq!("Linear".parse::<BaselineMode>().unwrap(), BaselineMode::Linear);
        assert!("spline".parse::<BaselineMode>().is_err());
    }
}
