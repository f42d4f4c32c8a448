use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

use crate::error::Result;
use crate::filter::{FilterKind, FilterSpec};
use crate::kinematics::{BaselineMode, KinematicsConfig};
use crate::peaks::PeakParams;
use crate::response::{log_periods, CombinationMethod};
use crate::spectral::{CorrelationMethod, Detrend, WelchParams, Window};
use crate::trigger::{AmplitudeMeasure, EdgePolicy, StaLtaParams, TriggerParams};

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub struct Settings {
    #[serde(alias = "INTEGRATION")]
    pub integration: IntegrationSettings,
    #[serde(alias = "FILTER")]
    pub filter: FilterSettings,
    #[serde(alias = "SPECTRAL")]
    pub spectral: SpectralSettings,
    #[serde(alias = "RESPONSE")]
    pub response: ResponseSettings,
    #[serde(alias = "DETECTION")]
    pub detection: DetectionSettings,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "lowercase")]
pub struct IntegrationSettings {
    /// 0 removes the mean, 1 a line, higher orders a polynomial.
    #[serde(alias = "BASELINE_ORDER")]
    pub baseline_order: usize,
    /// Hz; 0 disables the filter.
    #[serde(alias = "ACCELERATION_HIGHPASS")]
    pub acceleration_highpass: f64,
    /// Hz; 0 disables the filter.
    #[serde(alias = "VELOCITY_HIGHPASS")]
    pub velocity_highpass: f64,
    #[serde(alias = "FILTER_ORDER")]
    pub filter_order: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "lowercase")]
pub struct FilterSettings {
    #[serde(alias = "KIND")]
    pub kind: String,
    /// Low-pass or high-pass cutoff, Hz.
    #[serde(alias = "CUTOFF")]
    pub cutoff: f64,
    /// Band-pass edges, Hz.
    #[serde(alias = "LOW")]
    pub low: f64,
    #[serde(alias = "HIGH")]
    pub high: f64,
    #[serde(alias = "ORDER")]
    pub order: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "lowercase")]
pub struct SpectralSettings {
    #[serde(alias = "WINDOW")]
    pub window: String,
    #[serde(alias = "SEGMENT_LENGTH")]
    pub segment_length: usize,
    #[serde(alias = "OVERLAP")]
    pub overlap: usize,
    #[serde(alias = "DETREND")]
    pub detrend: String,
    #[serde(alias = "CORRELATION")]
    pub correlation: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "lowercase")]
pub struct ResponseSettings {
    #[serde(alias = "DAMPING")]
    pub damping: f64,
    #[serde(alias = "MIN_PERIOD")]
    pub min_period: f64,
    #[serde(alias = "MAX_PERIOD")]
    pub max_period: f64,
    #[serde(alias = "PERIODS")]
    pub periods: usize,
    #[serde(alias = "COMBINATION")]
    pub combination: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "lowercase")]
pub struct DetectionSettings {
    /// Seconds.
    #[serde(alias = "STA")]
    pub sta: f64,
    /// Seconds.
    #[serde(alias = "LTA")]
    pub lta: f64,
    #[serde(alias = "THRESHOLD")]
    pub threshold: f64,
    #[serde(alias = "DETRIGGER")]
    pub detrigger: f64,
    /// Seconds between onsets.
    #[serde(alias = "MIN_SEPARATION")]
    pub min_separation: f64,
    /// Seconds; 0 means no cap.
    #[serde(alias = "MAX_DURATION")]
    pub max_duration: f64,
    #[serde(alias = "MEASURE")]
    pub measure: String,
    #[serde(alias = "EDGE")]
    pub edge: String,
    #[serde(alias = "PEAK_K")]
    pub peak_k: f64,
    /// Seconds; 0 uses whole-series statistics.
    #[serde(alias = "PEAK_WINDOW")]
    pub peak_window: f64,
}

impl Default for IntegrationSettings {
    fn default() -> Self {
        Self {
            baseline_order: 3,
            acceleration_highpass: 0.1,
            velocity_highpass: 0.05,
            filter_order: 4,
        }
    }
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            kind: "lowpass".to_string(),
            cutoff: 10.0,
            low: 0.1,
            high: 10.0,
            order: 4,
        }
    }
}

impl Default for SpectralSettings {
    fn default() -> Self {
        Self {
            window: "hann".to_string(),
            segment_length: 1024,
            overlap: 512,
            detrend: "mean".to_string(),
            correlation: "fft".to_string(),
        }
    }
}

impl Default for ResponseSettings {
    fn default() -> Self {
        Self {
            damping: 0.05,
            min_period: 0.01,
            max_period: 10.0,
            periods: 100,
            combination: "srss".to_string(),
        }
    }
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            sta: 1.0,
            lta: 10.0,
            threshold: 3.0,
            detrigger: 1.5,
            min_separation: 0.5,
            max_duration: 0.0,
            measure: "energy".to_string(),
            edge: "shrinking".to_string(),
            peak_k: 3.0,
            peak_window: 0.0,
        }
    }
}

impl IntegrationSettings {
    pub fn to_config(&self) -> Result<KinematicsConfig> {
        let baseline = match self.baseline_order {
            0 => BaselineMode::Mean,
            1 => BaselineMode::Linear,
            order => BaselineMode::Polynomial(order),
        };
        Ok(KinematicsConfig {
            baseline,
            acceleration_highpass: self.acceleration_highpass,
            velocity_highpass: self.velocity_highpass,
            filter_order: self.filter_order,
        })
    }
}

impl FilterSettings {
    pub fn to_spec(&self, sampling_rate: f64) -> Result<FilterSpec> {
        let spec = match self.kind.parse::<FilterKind>()? {
            FilterKind::Lowpass => FilterSpec::lowpass(self.cutoff, self.order, sampling_rate),
            FilterKind::Highpass => FilterSpec::highpass(self.cutoff, self.order, sampling_rate),
            FilterKind::Bandpass => FilterSpec::bandpass(self.low, self.high, self.order, sampling_rate),
        };
        Ok(spec)
    }
}

impl SpectralSettings {
    /// Welch parameters, with the segment shortened to fit `n_samples`.
    pub fn to_params(&self, n_samples: usize) -> Result<WelchParams> {
        let window = self.window.parse::<Window>()?;
        let detrend = self.detrend.parse::<Detrend>()?;
        let segment_length = self.segment_length.min(n_samples);
        let overlap = if segment_length < self.segment_length {
            // keep the configured overlap fraction
            self.overlap * segment_length / self.segment_length.max(1)
        } else {
            self.overlap
        };
        Ok(WelchParams::new(window, segment_length, overlap).with_detrend(detrend))
    }

    pub fn correlation_method(&self) -> Result<CorrelationMethod> {
        self.correlation.parse()
    }
}

impl ResponseSettings {
    pub fn period_grid(&self) -> Result<Vec<f64>> {
        log_periods(self.min_period, self.max_period, self.periods)
    }

    pub fn combination_method(&self) -> Result<CombinationMethod> {
        self.combination.parse()
    }
}

impl DetectionSettings {
    pub fn sta_lta(&self, sampling_rate: f64) -> Result<StaLtaParams> {
        Ok(StaLtaParams::from_seconds(self.sta, self.lta, sampling_rate)?
            .with_measure(self.measure.parse::<AmplitudeMeasure>()?)
            .with_edge(self.edge.parse::<EdgePolicy>()?))
    }

    pub fn trigger(&self, sampling_rate: f64) -> Result<TriggerParams> {
        TriggerParams::from_seconds(
            self.threshold,
            self.detrigger,
            self.min_separation,
            self.max_duration,
            sampling_rate,
        )
    }

    pub fn peaks(&self, sampling_rate: f64) -> PeakParams {
        let params = PeakParams::new(self.peak_k, (self.min_separation * sampling_rate).round() as usize);
        if self.peak_window > 0.0 {
            params.with_window((self.peak_window * sampling_rate).round() as usize)
        } else {
            params
        }
    }
}

impl Settings {
    pub fn new(config_path: Option<PathBuf>) -> std::result::Result<Self, ConfigError> {
        let mut builder = Config::builder();

        // 1. Load defaults
        let default_settings = Settings::default();
        builder = builder.add_source(config::Config::try_from(&default_settings)?);

        // 2. Load from file if specified
        if let Some(path) = config_path {
            if path.exists() {
                builder = builder.add_source(File::from(path));
            } else {
                warn!("Configuration file not found: {:?}", path);
            }
        } else if let Some(home) = dirs::home_dir() {
            let toml_path = home.join(".strongmotion").join("settings.toml");
            let yaml_path = home.join(".strongmotion").join("settings.yaml");

            if toml_path.exists() {
                builder = builder.add_source(File::from(toml_path));
            } else if yaml_path.exists() {
                builder = builder.add_source(File::from(yaml_path));
            }
        }

        // 3. Environment variables
        builder = builder.add_source(
            Environment::with_prefix("STRONGMOTION")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;

        if let Ok(table) = config.clone().try_deserialize::<serde_json::Value>() {
            if let Some(map) = table.as_object() {
                let known_sections = ["integration", "filter", "spectral", "response", "detection"];
                for key in map.keys() {
                    let lower_key = key.to_lowercase();
                    if !known_sections.contains(&lower_key.as_str()) {
                        warn!("Unknown configuration section: {}", key);
                    }
                }
            }
        }

        config.try_deserialize()
    }

    pub fn dump(&self, format: &str) -> std::result::Result<String, Box<dyn std::error::Error>> {
        match format.to_lowercase().as_str() {
            "toml" => Ok(toml::to_string_pretty(self)?),
            "yaml" | "yml" => Ok(serde_yaml::to_string(self)?),
            _ => Err("Unsupported format".into()),
        }
    }
}
