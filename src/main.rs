use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use strongmotion::filter;
use strongmotion::kinematics::process_acceleration;
use strongmotion::peaks::{pick_peaks, Peak};
use strongmotion::response::compute_response_spectrum;
use strongmotion::settings::Settings;
use strongmotion::spectral::power_spectrum;
use strongmotion::synth::BurstScenario;
use strongmotion::trigger::{detect, Event};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Settings file (TOML or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the effective settings to this path and exit
    #[arg(long)]
    dump_config: Option<PathBuf>,

    /// Format for --dump-config
    #[arg(long, default_value = "toml")]
    format: String,

    /// Noise generator seed
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Burst RMS over background RMS
    #[arg(long, default_value_t = 5.0)]
    ratio: f64,

    /// Sampling rate of the synthetic record (Hz)
    #[arg(long, default_value_t = 100.0)]
    rate: f64,
}

#[derive(Serialize)]
struct Summary {
    samples: usize,
    sampling_rate: f64,
    pga: f64,
    pgv: f64,
    pgd: f64,
    filtered_peak: f64,
    dominant_frequency: f64,
    spectral_segments: usize,
    peak_period: Option<f64>,
    peak_sa: Option<f64>,
    substepped_periods: usize,
    events: Vec<Event>,
    peaks: Vec<Peak>,
}

fn run(settings: &Settings, scenario: &BurstScenario) -> Result<Summary, Box<dyn std::error::Error>> {
    let record = scenario.build()?;
    let fs = record.sampling_rate();
    tracing::info!("Synthetic record: {} samples at {} Hz", record.len(), fs);

    let motion = process_acceleration(&record, &settings.integration.to_config()?)?;
    let filtered = filter::apply(&record, &settings.filter.to_spec(fs)?)?;
    let psd = power_spectrum(&record, &settings.spectral.to_params(record.len())?)?;
    let periods = settings.response.period_grid()?;
    let response = compute_response_spectrum(&record, &periods, settings.response.damping)?;
    let (_, detection) = detect(
        &record,
        &settings.detection.sta_lta(fs)?,
        &settings.detection.trigger(fs)?,
    )?;
    let peaks = pick_peaks(&filtered, &settings.detection.peaks(fs))?;

    for event in &detection.events {
        tracing::info!("{}", event);
    }

    let peak = response.peak();
    Ok(Summary {
        samples: record.len(),
        sampling_rate: fs,
        pga: motion.pga,
        pgv: motion.pgv,
        pgd: motion.pgd,
        filtered_peak: filtered.peak_abs(),
        dominant_frequency: psd.peak_frequency(),
        spectral_segments: psd.segments,
        peak_period: peak.map(|p| p.period),
        peak_sa: peak.map(|p| p.sa),
        substepped_periods: response.substepped(),
        events: detection.events,
        peaks,
    })
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let settings = match Settings::new(args.config.clone()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to load settings: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(path) = &args.dump_config {
        let written = settings
            .dump(&args.format)
            .and_then(|text| std::fs::write(path, text).map_err(Into::into));
        match written {
            Ok(()) => {
                tracing::info!("Settings written to {:?}", path);
                return;
            }
            Err(e) => {
                tracing::error!("Failed to dump settings: {}", e);
                std::process::exit(1);
            }
        }
    }

    let scenario = BurstScenario {
        seed: args.seed,
        amplitude_ratio: args.ratio,
        sampling_rate: args.rate,
        ..BurstScenario::default()
    };

    match run(&settings, &scenario) {
        Ok(summary) => match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                tracing::error!("Failed to render summary: {}", e);
                std::process::exit(1);
            }
        },
        Err(e) => {
            tracing::error!("Analysis failed: {}", e);
            std::process::exit(1);
        }
    }
}
