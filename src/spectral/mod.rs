//! Frequency-domain estimates: Welch power and cross spectra, coherence,
//! spectrograms and lag-domain correlation.

pub mod correlation;
pub mod welch;
pub mod window;

pub use correlation::{autocorrelation, cross_correlation, Correlation, CorrelationMethod};
pub use welch::{
    averaged_spectrum, coherence, cross_spectrum, power_spectrum, spectrogram, AveragedSpectrum, Coherence,
    CrossSpectrum, Detrend, PowerSpectrum, Spectrogram, WelchParams,
};
pub use window::Window;
