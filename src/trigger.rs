use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::error::{AnalysisError, Result};
use crate::series::Series;

/// Amplitude averaged by the short and long windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AmplitudeMeasure {
    /// Squared amplitude.
    #[default]
    Energy,
    Absolute,
}

impl AmplitudeMeasure {
    fn apply(self, x: f64) -> f64 {
        match self {
            AmplitudeMeasure::Energy => x * x,
            AmplitudeMeasure::Absolute => x.abs(),
        }
    }
}

impl FromStr for AmplitudeMeasure {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "energy" | "squared" => Ok(AmplitudeMeasure::Energy),
            "absolute" | "abs" => Ok(AmplitudeMeasure::Absolute),
            other => Err(AnalysisError::parameter(
                "measure",
                format!("unknown amplitude measure '{}'", other),
            )),
        }
    }
}

/// Ratio at indices where the long window reaches before the first sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EdgePolicy {
    /// Both windows cover only the samples seen so far.
    #[default]
    Shrinking,
    /// Ratio is 0 until the long window is full.
    Mute,
}

impl FromStr for EdgePolicy {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "shrinking" => Ok(EdgePolicy::Shrinking),
            "mute" => Ok(EdgePolicy::Mute),
            other => Err(AnalysisError::parameter(
                "edge_policy",
                format!("unknown edge policy '{}'", other),
            )),
        }
    }
}

/// Window lengths in samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StaLtaParams {
    pub sta_len: usize,
    pub lta_len: usize,
    pub measure: AmplitudeMeasure,
    pub edge: EdgePolicy,
}

impl StaLtaParams {
    pub fn new(sta_len: usize, lta_len: usize) -> Self {
        Self {
            sta_len,
            lta_len,
            measure: AmplitudeMeasure::default(),
            edge: EdgePolicy::default(),
        }
    }

    pub fn from_seconds(sta_secs: f64, lta_secs: f64, sampling_rate: f64) -> Result<Self> {
        let params = Self::new(
            seconds_to_samples("sta", sta_secs, sampling_rate)?,
            seconds_to_samples("lta", lta_secs, sampling_rate)?,
        );
        params.validate()?;
        Ok(params)
    }

    pub fn with_measure(mut self, measure: AmplitudeMeasure) -> Self {
        self.measure = measure;
        self
    }

    pub fn with_edge(mut self, edge: EdgePolicy) -> Self {
        self.edge = edge;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.sta_len == 0 {
            return Err(AnalysisError::parameter("sta", "short window must hold at least one sample"));
        }
        if self.sta_len >= self.lta_len {
            return Err(AnalysisError::parameter(
                "lta",
                format!(
                    "long window ({} samples) must be longer than short window ({} samples)",
                    self.lta_len, self.sta_len
                ),
            ));
        }
        Ok(())
    }
}

fn seconds_to_samples(name: &'static str, secs: f64, sampling_rate: f64) -> Result<usize> {
    if !(secs.is_finite() && secs > 0.0) {
        return Err(AnalysisError::parameter(name, format!("window must be > 0 s, got {}", secs)));
    }
    Ok((secs * sampling_rate).round().max(1.0) as usize)
}

/// Running sum of a sliding window with Neumaier compensation. Once large
/// terms have left the window the small ones still in it are resolved.
#[derive(Debug, Default)]
struct WindowSum {
    sum: f64,
    compensation: f64,
}

impl WindowSum {
    fn add(&mut self, x: f64) {
        let t = self.sum + x;
        if self.sum.abs() >= x.abs() {
            self.compensation += (self.sum - t) + x;
        } else {
            self.compensation += (x - t) + self.sum;
        }
        self.sum = t;
    }

    /// Measures are non-negative, so a negative residue is rounding.
    fn value(&self) -> f64 {
        (self.sum + self.compensation).max(0.0)
    }
}

/// Classic STA/LTA over trailing windows, one ratio per sample.
pub fn sta_lta(series: &Series, params: &StaLtaParams) -> Result<Vec<f64>> {
    params.validate()?;
    let n = series.len();
    if params.lta_len > n {
        warn!(
            "Long window ({} samples) is longer than the series ({} samples)",
            params.lta_len, n
        );
    }

    let measured: Vec<f64> = series.samples().iter().map(|&x| params.measure.apply(x)).collect();
    let mut sta = WindowSum::default();
    let mut lta = WindowSum::default();
    let mut ratio = Vec::with_capacity(n);
    for (i, &m) in measured.iter().enumerate() {
        sta.add(m);
        lta.add(m);
        if i >= params.sta_len {
            sta.add(-measured[i - params.sta_len]);
        }
        if i >= params.lta_len {
            lta.add(-measured[i - params.lta_len]);
        }
        if params.edge == EdgePolicy::Mute && i + 1 < params.lta_len {
            ratio.push(0.0);
            continue;
        }
        let lta_mean = lta.value() / (i + 1).min(params.lta_len) as f64;
        if lta_mean <= f64::MIN_POSITIVE {
            ratio.push(0.0);
            continue;
        }
        let sta_mean = sta.value() / (i + 1).min(params.sta_len) as f64;
        ratio.push(sta_mean / lta_mean);
    }

    debug!(
        "STA/LTA over {} samples (sta={}, lta={}, {:?}, {:?})",
        n, params.sta_len, params.lta_len, params.measure, params.edge
    );
    Ok(ratio)
}

/// Recursive STA/LTA for streaming use.
///
/// Formula:
/// ```text
/// sta += (m - sta) / nsta
/// lta += (m - lta) / nlta
/// ratio = sta / lta
/// ```
/// where `m` is the amplitude measure of the new sample. The ratio is 0 for
/// the first `nlta` samples.
#[derive(Debug, Clone)]
pub struct RecursiveStaLta {
    csta: f64,
    clta: f64,
    sta: f64,
    lta: f64,
    measure: AmplitudeMeasure,
    count: usize,
    nlta_len: usize,
}

impl RecursiveStaLta {
    pub fn new(nsta: usize, nlta: usize) -> Self {
        Self {
            csta: 1.0 / nsta.max(1) as f64,
            clta: 1.0 / nlta.max(1) as f64,
            sta: 0.0,
            lta: 0.0,
            measure: AmplitudeMeasure::Energy,
            count: 0,
            nlta_len: nlta,
        }
    }

    pub fn with_measure(mut self, measure: AmplitudeMeasure) -> Self {
        self.measure = measure;
        self
    }

    /// Process a single sample and return the current ratio.
    ///
    /// Non-finite samples leave the state untouched and return 0.0.
    pub fn process(&mut self, sample: f64) -> f64 {
        if !sample.is_finite() {
            return 0.0;
        }

        let m = self.measure.apply(sample);
        self.sta += (m - self.sta) * self.csta;
        self.lta += (m - self.lta) * self.clta;

        if self.lta < 1e-99 {
            self.sta = 0.0;
            self.lta = 1e-99;
        }

        self.count += 1;
        if self.count <= self.nlta_len {
            return 0.0;
        }

        self.sta / self.lta
    }

    pub fn process_chunk(&mut self, data: &[f64]) -> Vec<f64> {
        data.iter().map(|&x| self.process(x)).collect()
    }

    pub fn reset(&mut self) {
        self.sta = 0.0;
        self.lta = 0.0;
        self.count = 0;
    }
}

/// Recursive STA/LTA over a whole series.
pub fn recursive_sta_lta(series: &Series, params: &StaLtaParams) -> Result<Vec<f64>> {
    params.validate()?;
    let mut filter = RecursiveStaLta::new(params.sta_len, params.lta_len).with_measure(params.measure);
    Ok(filter.process_chunk(series.samples()))
}

/// Thresholds of the IDLE/TRIGGERED state machine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TriggerParams {
    /// Ratio above which an event starts.
    pub threshold: f64,
    /// Ratio below which an event ends; at most `threshold`.
    pub detrigger: f64,
    /// Minimum samples between consecutive onsets.
    pub min_separation: usize,
    /// Longest event in samples.
    pub max_duration: Option<usize>,
}

impl TriggerParams {
    pub fn new(threshold: f64, detrigger: f64, min_separation: usize) -> Self {
        Self {
            threshold,
            detrigger,
            min_separation,
            max_duration: None,
        }
    }

    /// Build from durations in seconds; a non-positive `max_duration` means
    /// no cap.
    pub fn from_seconds(
        threshold: f64,
        detrigger: f64,
        min_separation: f64,
        max_duration: f64,
        sampling_rate: f64,
    ) -> Result<Self> {
        if !(min_separation.is_finite() && min_separation >= 0.0) {
            return Err(AnalysisError::parameter(
                "min_separation",
                format!("must be >= 0 s, got {}", min_separation),
            ));
        }
        let params = Self {
            threshold,
            detrigger,
            min_separation: (min_separation * sampling_rate).round() as usize,
            max_duration: if max_duration > 0.0 {
                Some(seconds_to_samples("max_duration", max_duration, sampling_rate)?)
            } else {
                None
            },
        };
        params.validate()?;
        Ok(params)
    }

    fn validate(&self) -> Result<()> {
        if !(self.threshold.is_finite() && self.threshold > 0.0) {
            return Err(AnalysisError::parameter(
                "threshold",
                format!("must be > 0, got {}", self.threshold),
            ));
        }
        if !(self.detrigger.is_finite() && self.detrigger > 0.0 && self.detrigger <= self.threshold) {
            return Err(AnalysisError::parameter(
                "detrigger",
                format!("must be in (0, {}], got {}", self.threshold, self.detrigger),
            ));
        }
        if self.max_duration == Some(0) {
            return Err(AnalysisError::parameter("max_duration", "must be at least one sample"));
        }
        Ok(())
    }
}

/// Amplitude descriptors of a stretch of samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EventFeatures {
    pub peak_amplitude: f64,
    pub rms: f64,
    /// Sum of squared samples.
    pub energy: f64,
    /// Seconds covered by the samples.
    pub duration: f64,
    pub zero_crossings: usize,
}

impl EventFeatures {
    pub fn measure(samples: &[f64], dt: f64) -> Self {
        let energy: f64 = samples.iter().map(|x| x * x).sum();
        let rms = if samples.is_empty() {
            0.0
        } else {
            (energy / samples.len() as f64).sqrt()
        };
        Self {
            peak_amplitude: samples.iter().fold(0.0, |m, x| m.max(x.abs())),
            rms,
            energy,
            duration: samples.len() as f64 * dt,
            zero_crossings: samples
                .windows(2)
                .filter(|w| w[0].is_sign_negative() != w[1].is_sign_negative())
                .count(),
        }
    }
}

/// Why a triggered event ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventEnd {
    Detrigger,
    MaxDuration,
    EndOfData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub onset_index: usize,
    /// First sample after the event.
    pub end_index: usize,
    /// Seconds from the first sample.
    pub onset_time: f64,
    pub onset_timestamp: Option<DateTime<Utc>>,
    pub peak_ratio: f64,
    pub ended_by: EventEnd,
    pub features: EventFeatures,
}

impl Event {
    pub fn duration(&self) -> f64 {
        self.features.duration
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "event at {:.2} s ({} samples, peak ratio {:.2}, peak amplitude {:.4})",
            self.onset_time,
            self.end_index - self.onset_index,
            self.peak_ratio,
            self.features.peak_amplitude
        )
    }
}

/// Time-ordered, non-overlapping events.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DetectionResult {
    pub events: Vec<Event>,
}

impl DetectionResult {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

enum TriggerState {
    Idle,
    Triggered { onset: usize, peak_ratio: f64 },
}

/// Scan a ratio series with the IDLE/TRIGGERED state machine.
///
/// An event starts when the ratio rises above `threshold` while idle, at
/// least `min_separation` samples after the previous onset, and ends when the
/// ratio drops below `detrigger` or the event reaches `max_duration`. After a
/// forced end the detector re-arms only once the ratio has dropped below
/// `detrigger`.
pub fn detect_events(series: &Series, ratio: &[f64], params: &TriggerParams) -> Result<DetectionResult> {
    params.validate()?;
    if ratio.len() != series.len() {
        return Err(AnalysisError::mismatch(
            format!("series of {} samples", series.len()),
            format!("ratio of {} samples", ratio.len()),
        ));
    }

    let mut events = Vec::new();
    let mut state = TriggerState::Idle;
    let mut armed = true;
    let mut last_onset: Option<usize> = None;

    let close = |onset: usize, end: usize, peak_ratio: f64, ended_by: EventEnd, events: &mut Vec<Event>| {
        events.push(Event {
            onset_index: onset,
            end_index: end,
            onset_time: series.time_of(onset),
            onset_timestamp: series.timestamp_of(onset),
            peak_ratio,
            ended_by,
            features: EventFeatures::measure(&series.samples()[onset..end], series.dt()),
        });
    };

    for (i, &r) in ratio.iter().enumerate() {
        state = match state {
            TriggerState::Idle => {
                if !armed {
                    armed = r < params.detrigger;
                    TriggerState::Idle
                } else if r > params.threshold {
                    let separated = last_onset.map_or(true, |last| i - last >= params.min_separation);
                    if separated {
                        last_onset = Some(i);
                        TriggerState::Triggered { onset: i, peak_ratio: r }
                    } else {
                        TriggerState::Idle
                    }
                } else {
                    TriggerState::Idle
                }
            }
            TriggerState::Triggered { onset, peak_ratio } => {
                if r < params.detrigger {
                    close(onset, i, peak_ratio, EventEnd::Detrigger, &mut events);
                    TriggerState::Idle
                } else if params.max_duration.map_or(false, |max| i + 1 - onset >= max) {
                    close(onset, i + 1, peak_ratio.max(r), EventEnd::MaxDuration, &mut events);
                    armed = false;
                    TriggerState::Idle
                } else {
                    TriggerState::Triggered {
                        onset,
                        peak_ratio: peak_ratio.max(r),
                    }
                }
            }
        };
    }
    if let TriggerState::Triggered { onset, peak_ratio } = state {
        close(onset, ratio.len(), peak_ratio, EventEnd::EndOfData, &mut events);
    }

    info!(
        "Detected {} event(s) (threshold {}, detrigger {})",
        events.len(),
        params.threshold,
        params.detrigger
    );
    Ok(DetectionResult { events })
}

/// STA/LTA ratio followed by event detection.
pub fn detect(series: &Series, sta_lta_params: &StaLtaParams, trigger: &TriggerParams) -> Result<(Vec<f64>, DetectionResult)> {
    let ratio = sta_lta(series, sta_lta_params)?;
    let result = detect_events(series, &ratio, trigger)?;
    Ok((ratio, result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::Quantity;
    use std::f64::consts::PI;

    fn series(samples: Vec<f64>) -> Series {
        Series::from_rate(samples, 100.0, Quantity::Acceleration).unwrap()
    }

    fn step(n: usize, at: usize) -> Vec<f64> {
        (0..n).map(|i| if i < at { 1.0 } else { 10.0 }).collect()
    }

    #[test]
    fn test_constant_series_ratio_is_one() {
        let s = series(vec![0.3; 1000]);
        for measure in [AmplitudeMeasure::Energy, AmplitudeMeasure::Absolute] {
            let ratio = sta_lta(&s, &StaLtaParams::new(10, 100).with_measure(measure)).unwrap();
            assert_eq!(ratio.len(), 1000);
            assert!(ratio.iter().all(|r| (r - 1.0).abs() < 1e-9));
            let events = detect_events(&s, &ratio, &TriggerParams::new(3.0, 1.5, 50)).unwrap();
            assert!(events.is_empty());
        }
    }

    #[test]
    fn test_quiet_tail_after_strong_event() {
        // 140 dB between the event and the background.
        let mut x: Vec<f64> = (0..1000).map(|i| 1e4 * (2.0 * PI * i as f64 / 20.0).sin()).collect();
        x.extend((0..10_000).map(|i| if i % 2 == 0 { 1e-3 } else { -1e-3 }));
        for v in &mut x[6000..6200] {
            *v *= 10.0;
        }
        let s = series(x);
        let ratio = sta_lta(&s, &StaLtaParams::new(50, 500)).unwrap();
        for (i, r) in ratio.iter().enumerate().skip(1500).take(4500) {
            assert!((r - 1.0).abs() < 1e-6, "ratio {} at {}", r, i);
        }

        let result = detect_events(&s, &ratio, &TriggerParams::new(3.0, 1.5, 100)).unwrap();
        assert_eq!(result.len(), 1, "events: {:?}", result.events);
        assert!((6000..6005).contains(&result.events[0].onset_index));
    }

    #[test]
    fn test_mute_policy() {
        let s = series(vec![1.0; 300]);
        let ratio = sta_lta(&s, &StaLtaParams::new(10, 100).with_edge(EdgePolicy::Mute)).unwrap();
        assert!(ratio[..99].iter().all(|&r| r == 0.0));
        assert!((ratio[99] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_step_gives_single_event_at_onset() {
        let s = series(step(2000, 500));
        let ratio = sta_lta(&s, &StaLtaParams::new(10, 100)).unwrap();
        assert!((ratio[499] - 1.0).abs() < 1e-9);
        assert!(ratio[500] > 3.0);

        let result = detect_events(&s, &ratio, &TriggerParams::new(3.0, 1.5, 200)).unwrap();
        assert_eq!(result.len(), 1);
        let event = &result.events[0];
        assert_eq!(event.onset_index, 500);
        assert!((event.onset_time - 5.0).abs() < 1e-9);
        assert_eq!(event.ended_by, EventEnd::Detrigger);
        assert!((560..575).contains(&event.end_index), "end {}", event.end_index);
        assert!((event.features.peak_amplitude - 10.0).abs() < 1e-12);
        assert!(event.peak_ratio > 5.0);
    }

    #[test]
    fn test_min_separation_suppresses_chatter() {
        let ratio: Vec<f64> = (0..100)
            .map(|i| if (10..15).contains(&i) || (20..25).contains(&i) || (60..65).contains(&i) { 5.0 } else { 1.0 })
            .collect();
        let s = series(vec![1.0; 100]);
        let result = detect_events(&s, &ratio, &TriggerParams::new(3.0, 1.5, 30)).unwrap();
        let onsets: Vec<usize> = result.events.iter().map(|e| e.onset_index).collect();
        assert_eq!(onsets, vec![10, 60]);
        assert!(result.events.windows(2).all(|w| w[0].end_index <= w[1].onset_index));
    }

    #[test]
    fn test_hysteresis_and_max_duration() {
        let ratio: Vec<f64> = (0..100).map(|i| if (10..80).contains(&i) { 4.0 } else { 1.0 }).collect();
        let s = series(vec![1.0; 100]);
        let mut params = TriggerParams::new(3.0, 1.5, 0);
        params.max_duration = Some(20);
        let result = detect_events(&s, &ratio, &params).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.events[0].end_index, 30);
        assert_eq!(result.events[0].ended_by, EventEnd::MaxDuration);
    }

    #[test]
    fn test_event_open_at_end_of_data() {
        let s = series(step(700, 640));
        let (_, result) = detect(&s, &StaLtaParams::new(10, 100), &TriggerParams::new(3.0, 1.5, 0)).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.events[0].end_index, 700);
        assert_eq!(result.events[0].ended_by, EventEnd::EndOfData);
    }

    #[test]
    fn test_features() {
        let f = EventFeatures::measure(&[1.0, -2.0, 2.0, 0.5, -0.5], 0.01);
        assert_eq!(f.zero_crossings, 3);
        assert!((f.energy - 9.5).abs() < 1e-12);
        assert!((f.peak_amplitude - 2.0).abs() < 1e-12);
        assert!((f.duration - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_parameters() {
        let s = series(vec![1.0; 100]);
        assert!(sta_lta(&s, &StaLtaParams::new(0, 10)).is_err());
        assert!(sta_lta(&s, &StaLtaParams::new(10, 10)).is_err());
        let ratio = vec![1.0; 100];
        assert!(detect_events(&s, &ratio, &TriggerParams::new(3.0, 4.0, 0)).is_err());
        assert!(detect_events(&s, &ratio, &TriggerParams::new(-1.0, 0.5, 0)).is_err());
        assert!(matches!(
            detect_events(&s, &ratio[..50], &TriggerParams::new(3.0, 1.5, 0)),
            Err(AnalysisError::ChannelMismatch { .. })
        ));
    }

    #[test]
    fn test_recursive_nan_handling() {
        let mut stalta = RecursiveStaLta::new(10, 100);
        assert_eq!(stalta.process(f64::NAN), 0.0);
        assert_eq!(stalta.process(f64::INFINITY), 0.0);
    }

    #[test]
    fn test_recursive_mutes_then_converges() {
        let s = series(vec![2.0; 3000]);
        let ratio = recursive_sta_lta(&s, &StaLtaParams::new(50, 200)).unwrap();
        assert!(ratio[..200].iter().all(|&r| r == 0.0));
        assert!((ratio[2999] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_recursive_chunking_matches_continuous() {
        let samples: Vec<f64> = (0..500).map(|i| if (300..350).contains(&i) { 100.0 } else { (i as f64).sin() }).collect();
        let mut continuous = RecursiveStaLta::new(10, 100);
        let expected = continuous.process_chunk(&samples);
        let mut chunked = RecursiveStaLta::new(10, 100);
        let mut got = Vec::new();
        for chunk in samples.chunks(25) {
            got.extend(chunked.process_chunk(chunk));
        }
        assert_eq!(expected, got);
    }

    #[test]
    fn test_from_seconds() {
        let p = StaLtaParams::from_seconds(0.5, 5.0, 100.0).unwrap();
        assert_eq!((p.sta_len, p.lta_len), (50, 500));
        let t = TriggerParams::from_seconds(3.0, 1.5, 1.0, 0.0, 100.0).unwrap();
        assert_eq!(t.min_separation, 100);
        assert_eq!(t.max_duration, None);
        assert!(StaLtaParams::from_seconds(5.0, 0.5, 100.0).is_err());
    }
}
