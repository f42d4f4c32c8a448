use std::f64::consts::PI;
use strongmotion::response::{compute_response_spectrum, default_periods};
use strongmotion::series::{Quantity, Series};
use strongmotion::synth::{self, BurstScenario};

#[test]
fn test_short_period_tracks_ground_acceleration() {
    let ground = Series::from_rate(synth::sinusoid(1.0, 1.0, 100.0, 10.0), 100.0, Quantity::Acceleration).unwrap();
    let spectrum = compute_response_spectrum(&ground, &[0.01], 0.05).unwrap();
    let point = spectrum.points[0];
    let pga = ground.peak_abs();
    assert!(point.substeps > 1);
    assert!((point.sa - pga).abs() / pga < 0.02, "Sa {} vs PGA {}", point.sa, pga);
}

#[test]
fn test_long_period_tracks_ground_displacement() {
    // One-cycle pulse that moves the ground by `d` and leaves it at rest.
    let d = 0.1;
    let tau = 1.0;
    let fs = 100.0;
    let samples: Vec<f64> = (0..400)
        .map(|i| {
            let t = i as f64 / fs;
            if t <= tau {
                d * 2.0 * PI / (tau * tau) * (2.0 * PI * t / tau).sin()
            } else {
                0.0
            }
        })
        .collect();
    let ground = Series::from_rate(samples, fs, Quantity::Acceleration).unwrap();
    let spectrum = compute_response_spectrum(&ground, &[50.0], 0.0).unwrap();
    let sd = spectrum.points[0].sd;
    assert!((sd - d).abs() / d < 0.05, "Sd {} vs {}", sd, d);
}

#[test]
fn test_pseudo_spectral_relations_hold_everywhere() {
    let ground = BurstScenario::default().build().unwrap();
    let spectrum = compute_response_spectrum(&ground, &default_periods(), 0.05).unwrap();
    assert_eq!(spectrum.points.len(), 100);
    for p in &spectrum.points {
        let w = 2.0 * PI / p.period;
        assert!((p.sa - p.sd * w * w).abs() <= 1e-9 * p.sa.max(1e-12));
        assert!((p.sv - p.sd * w).abs() <= 1e-9 * p.sv.max(1e-12));
        assert!(p.sd >= 0.0);
    }
}

#[test]
fn test_velocity_input_is_rejected() {
    let v = Series::from_rate(vec![0.0, 1.0, 0.0, -1.0], 100.0, Quantity::Velocity).unwrap();
    assert!(compute_response_spectrum(&v, &[1.0], 0.05).is_err());
}
