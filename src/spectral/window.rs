use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use crate::error::AnalysisError;

/// Tapering window applied to each segment before the FFT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Window {
    Rectangular,
    #[default]
    Hann,
    Hamming,
    Blackman,
}

impl Window {
    /// Symmetric window of length `n`.
    pub fn coefficients(self, n: usize) -> Vec<f64> {
        if n == 0 {
            return Vec::new();
        }
        if n == 1 {
            return vec![1.0];
        }
        let denom = (n - 1) as f64;
        (0..n)
            .map(|i| {
                let x = 2.0 * PI * i as f64 / denom;
                match self {
                    Window::Rectangular => 1.0,
                    Window::Hann => 0.5 - 0.5 * x.cos(),
                    Window::Hamming => 0.54 - 0.46 * x.cos(),
                    Window::Blackman => 0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos(),
                }
            })
            .collect()
    }
}

impl FromStr for Window {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "rectangular" | "boxcar" | "none" => Ok(Window::Rectangular),
            "hann" | "hanning" => Ok(Window::Hann),
            "hamming" => Ok(Window::Hamming),
            "blackman" => Ok(Window::Blackman),
            other => Err(AnalysisError::parameter(
                "window",
                format!("unknown window '{}'", other),
            )),
        }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Window::Rectangular => "rectangular",
            Window::Hann => "hann",
            Window::Hamming => "hamming",
            Window::Blackman => "blackman",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hann_is_symmetric_and_zero_at_edges() {
        let w = Window::Hann.coefficients(9);
        assert!(w[0].abs() < 1e-15);
        assert!(w[8].abs() < 1e-15);
        assert!((w[4] - 1.0).abs() < 1e-15);
        for i in 0..9 {
            assert!((w[i] - w[8 - i]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_window_edges() {
        let b = Window::Blackman.coefficients(11);
        assert!(b[0].abs() < 1e-12);
        assert!((b[5] - 1.0).abs() < 1e-12);
        let h = Window::Hamming.coefficients(11);
        assert!((h[0] - 0.08).abs() < 1e-12);
        assert_eq!(Window::Rectangular.coefficients(4), vec![1.0; 4]);
        assert_eq!(Window::Hann.coefficients(1), vec![1.0]);
    }

    #[test]
    fn test_parse_window() {
        assert_eq!("Hanning".parse::<Window>().unwrap(), Window::Hann);
        assert_eq!("boxcar".parse::<Window>().unwrap(), Window::Rectangular);
        assert!("kaiser".parse::<Window>().is_err());
    }
}
