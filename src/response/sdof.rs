use std::f64::consts::PI;

/// Periods shorter than this many samples are integrated on a finer grid.
pub const MIN_STEPS_PER_PERIOD: f64 = 10.0;

/// Most integration steps taken per input sample. Oscillators that would need
/// more are treated as rigid.
pub const MAX_SUBSTEPS: usize = 1000;

/// Exact state transition of a damped linear oscillator
/// `u'' + 2ζωu' + ω²u = -a(t)` over one step with `a` varying linearly
/// between the step ends.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Oscillator {
    a11: f64,
    a12: f64,
    a21: f64,
    a22: f64,
    b11: f64,
    b12: f64,
    b21: f64,
    b22: f64,
    pub omega: f64,
    /// Steps taken per input sample.
    pub substeps: usize,
    /// Too stiff to integrate within [`MAX_SUBSTEPS`]; its response is the
    /// rigid limit `-a/ω²`.
    pub rigid: bool,
}

impl Oscillator {
    pub fn new(period: f64, damping: f64, dt: f64) -> Self {
        let needed = if period < MIN_STEPS_PER_PERIOD * dt {
            (MIN_STEPS_PER_PERIOD * dt / period).ceil()
        } else {
            1.0
        };
        let rigid = needed > MAX_SUBSTEPS as f64;
        let substeps = if rigid { MAX_SUBSTEPS } else { needed as usize };
        let h = dt / substeps as f64;

        let w = 2.0 * PI / period;
        let z = damping;
        let root = (1.0 - z * z).sqrt();
        let wd = w * root;
        let e = (-z * w * h).exp();
        let (s, c) = (wd * h).sin_cos();
        let zr = z / root;

        let w2 = w * w;
        let w3 = w2 * w;
        let k1 = (2.0 * z * z - 1.0) / (w2 * h);
        let k2 = 2.0 * z / (w3 * h);

        let a11 = e * (zr * s + c);
        let a12 = e * s / wd;
        let a21 = -w / root * e * s;
        let a22 = e * (c - zr * s);

        let b11 = e * ((k1 + z / w) * s / wd + (k2 + 1.0 / w2) * c) - k2;
        let b12 = -e * (k1 * s / wd + k2 * c) - 1.0 / w2 + k2;
        let b21 = e * ((k1 + z / w) * (c - zr * s) - (k2 + 1.0 / w2) * (wd * s + z * w * c)) + 1.0 / (w2 * h);
        let b22 = -e * (k1 * (c - zr * s) - k2 * (wd * s + z * w * c)) - 1.0 / (w2 * h);

        Self {
            a11,
            a12,
            a21,
            a22,
            b11,
            b12,
            b21,
            b22,
            omega: w,
            substeps,
            rigid,
        }
    }

    /// Peak absolute relative displacement under ground acceleration `ground`,
    /// starting from rest.
    pub fn peak_displacement(&self, ground: &[f64]) -> f64 {
        let mut u = 0.0_f64;
        let mut v = 0.0_f64;
        let mut peak = 0.0_f64;
        let m = self.substeps as f64;
        for pair in ground.windows(2) {
            let (g0, g1) = (pair[0], pair[1]);
            let slope = (g1 - g0) / m;
            for j in 0..self.substeps {
                let p0 = g0 + slope * j as f64;
                let p1 = g0 + slope * (j + 1) as f64;
                let un = self.a11 * u + self.a12 * v + self.b11 * p0 + self.b12 * p1;
                let vn = self.a21 * u + self.a22 * v + self.b21 * p0 + self.b22 * p1;
                u = un;
                v = vn;
                peak = peak.max(u.abs());
            }
        }
        peak
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_forcing_settles_to_static_offset() {
        // u = -a/ω² is a fixed point of the recurrence.
        let osc = Oscillator::new(0.5, 0.05, 0.01);
        let w2 = osc.omega * osc.omega;
        let u0 = -1.0 / w2;
        let u1 = osc.a11 * u0 + osc.b11 + osc.b12;
        let v1 = osc.a21 * u0 + osc.b21 + osc.b22;
        assert!((u1 - u0).abs() < 1e-12);
        assert!(v1.abs() < 1e-10);
    }

    #[test]
    fn test_free_vibration_decay() {
        let osc = Oscillator::new(1.0, 0.1, 0.01);
        let mut u = 1.0;
        let mut v = 0.0;
        // one damped period
        let steps = (1.0 / (1.0 - 0.01_f64).sqrt() / 0.01).round() as usize;
        for _ in 0..steps {
            let un = osc.a11 * u + osc.a12 * v;
            v = osc.a21 * u + osc.a22 * v;
            u = un;
        }
        let expected = (-0.1 * 2.0 * PI / (1.0 - 0.01_f64).sqrt()).exp();
        assert!((u - expected).abs() < 1e-2, "u={} expected={}", u, expected);
    }

    #[test]
    fn test_substep_count() {
        assert_eq!(Oscillator::new(1.0, 0.05, 0.01).substeps, 1);
        assert_eq!(Oscillator::new(0.2, 0.05, 0.01).substeps, 1);
        assert!(Oscillator::new(0.02, 0.05, 0.01).substeps >= 5);
        assert!(!Oscillator::new(1e-3, 0.05, 0.01).rigid);

        let stiff = Oscillator::new(1e-12, 0.05, 0.01);
        assert!(stiff.rigid);
        assert_eq!(stiff.substeps, MAX_SUBSTEPS);
    }
}
