//! Retinal image disease detection with Grad-CAM explanations and
//! cardiovascular risk scoring.
//!
//! Uses structured logging via [`tracing`]. Set the `RUST_LOG` environment
//! variable to control log verbosity (e.g., `RUST_LOG=eye2heart=debug`).

pub mod config;
pub mod error;
pub mod imaging;
pub mod model;
pub mod prediction;
pub mod risk;
pub mod saliency;
pub mod server;

pub use error::{Error, Result};
pub use prediction::{ClinicalFields, PredictionResult, Predictor};
