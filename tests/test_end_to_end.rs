use strongmotion::peaks::{pick_peaks, PeakParams};
use strongmotion::spectral::{power_spectrum, WelchParams, Window};
use strongmotion::synth::BurstScenario;
use strongmotion::trigger::{detect, EventEnd, StaLtaParams, TriggerParams};

#[test]
fn test_burst_in_noise_gives_single_event() {
    let record = BurstScenario::default().build().unwrap();
    assert_eq!(record.len(), 1000);

    let sta_lta = StaLtaParams::from_seconds(0.5, 5.0, 100.0).unwrap();
    let trigger = TriggerParams::from_seconds(3.0, 1.5, 1.0, 0.0, 100.0).unwrap();
    let (ratio, result) = detect(&record, &sta_lta, &trigger).unwrap();

    assert_eq!(ratio.len(), record.len());
    assert_eq!(result.len(), 1, "events: {:?}", result.events);

    let event = &result.events[0];
    assert!((event.onset_time - 4.0).abs() < 0.1, "onset at {}", event.onset_time);
    assert_eq!(event.ended_by, EventEnd::Detrigger);
    assert!(event.end_index > 500 && event.end_index < 600, "end at {}", event.end_index);
    assert!(event.peak_ratio >= 3.0);
    assert!(event.features.peak_amplitude > 5.0 * 0.01);
}

#[test]
fn test_quiet_record_gives_no_event() {
    let scenario = BurstScenario {
        amplitude_ratio: 0.5,
        ..BurstScenario::default()
    };
    let record = scenario.build().unwrap();
    let sta_lta = StaLtaParams::from_seconds(0.5, 5.0, 100.0).unwrap();
    let trigger = TriggerParams::from_seconds(3.0, 1.5, 1.0, 0.0, 100.0).unwrap();
    let (_, result) = detect(&record, &sta_lta, &trigger).unwrap();
    assert!(result.is_empty());
}

#[test]
fn test_burst_dominates_spectrum_and_peaks() {
    let record = BurstScenario::default().build().unwrap();

    let psd = power_spectrum(&record, &WelchParams::half_overlap(Window::Hann, 256)).unwrap();
    let f = psd.peak_frequency();
    assert!((1.5..=8.5).contains(&f), "dominant frequency {}", f);

    let peaks = pick_peaks(&record, &PeakParams::new(3.0, 50)).unwrap();
    assert!(!peaks.is_empty());
    for p in &peaks {
        assert!((3.99..5.0).contains(&p.time), "peak at {} s", p.time);
    }
}
