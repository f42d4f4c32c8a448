pub mod error;
pub mod filter;
pub mod kinematics;
pub mod peaks;
pub mod response;
pub mod series;
pub mod settings;
pub mod spectral;
pub mod synth;
pub mod trigger;

pub use error::{AnalysisError, Result};
pub use series::{Quantity, Series};
