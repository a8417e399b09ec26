//! Narrow interfaces over the pretrained artifacts.
//!
//! The pipeline only ever talks to these traits; concrete runtimes live in the
//! submodules and tests substitute deterministic stubs.

pub mod onnx;
pub mod tabular;

pub use onnx::OnnxClassifier;
pub use tabular::{FeatureNames, SoftmaxRiskModel, StandardScaler};

use crate::{Error, Result};
use ndarray::Array4;

/// Activation of an internal layer together with the gradient of one output
/// channel with respect to it. Both tensors are NHWC.
#[derive(Debug, Clone)]
pub struct LayerGradient {
    pub activation: Array4<f32>,
    pub gradient: Array4<f32>,
}

/// Convolutional image classifier.
///
/// Implementations are shared across requests behind an `Arc`; callers that
/// cannot rely on the runtime being reentrant serialize calls themselves.
pub trait Classifier: Send + Sync {
    /// Run a forward pass and return the flattened output scores.
    fn forward(&self, input: &Array4<f32>) -> Result<Vec<f32>>;

    /// Capture `layer`'s activation and the gradient of output channel `target`
    /// with respect to it.
    ///
    /// `Ok(None)` means the runtime cannot provide a gradient for this layer.
    /// Any recording state must not outlive the call.
    fn layer_gradient(
        &self,
        layer: &str,
        input: &Array4<f32>,
        target: usize,
    ) -> Result<Option<LayerGradient>>;

    /// Forward scores plus the `layer` capture for the top-scoring channel.
    ///
    /// The default runs [`forward`](Self::forward) and then
    /// [`layer_gradient`](Self::layer_gradient). Runtimes that produce scores
    /// and gradients from the same pass override it.
    fn forward_with_gradient(
        &self,
        layer: &str,
        input: &Array4<f32>,
    ) -> Result<(Vec<f32>, Option<LayerGradient>)> {
        let scores = self.forward(input)?;
        let target = select_target(&scores)
            .ok_or_else(|| Error::inference("classifier produced an empty score vector"))?;
        let capture = self.layer_gradient(layer, input, target)?;
        Ok((scores, capture))
    }
}

/// Index of the highest score; ties go to the lowest index.
pub fn select_target(scores: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, &score) in scores.iter().enumerate() {
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((idx, score)),
        }
    }
    best.map(|(idx, _)| idx)
}

/// Pretrained affine transform applied to raw clinical features.
pub trait TabularScaler: Send + Sync {
    fn transform(&self, features: &[f64]) -> Result<Vec<f64>>;
}

/// Pretrained 3-class probabilistic classifier over scaled features.
pub trait TabularClassifier: Send + Sync {
    fn predict_proba(&self, features: &[f64]) -> Result<Vec<f64>>;
}
