use eye2heart::{
    Error, Result,
    model::{Classifier, LayerGradient, TabularClassifier, TabularScaler},
};
use mockall::mock;
use ndarray::Array4;
use std::sync::{
    Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

/// Classifier returning fixed scores and, optionally, a fixed layer capture.
#[derive(Debug)]
pub struct StubClassifier {
    pub scores: Vec<f32>,
    pub layer: String,
    pub capture: Option<LayerGradient>,
    pub forward_calls: AtomicUsize,
    pub gradient_targets: Mutex<Vec<usize>>,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl StubClassifier {
    pub fn new(probability: f32) -> Self {
        Self::with_scores(vec![probability])
    }

    pub fn with_scores(scores: Vec<f32>) -> Self {
        Self {
            scores,
            layer: "stub_conv".to_string(),
            capture: None,
            forward_calls: AtomicUsize::new(0),
            gradient_targets: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_capture(mut self, capture: LayerGradient) -> Self {
        self.capture = Some(capture);
        self
    }

    pub fn with_layer(mut self, layer: &str) -> Self {
        self.layer = layer.to_string();
        self
    }

    pub fn forward_calls(&self) -> usize {
        self.forward_calls.load(Ordering::SeqCst)
    }

    pub fn gradient_targets(&self) -> Vec<usize> {
        self.gradient_targets.lock().unwrap().clone()
    }
}

impl Classifier for StubClassifier {
    fn forward(&self, _input: &Array4<f32>) -> Result<Vec<f32>> {
        self.forward_calls.fetch_add(1, Ordering::SeqCst);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(std::time::Duration::from_millis(5));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        Ok(self.scores.clone())
    }

    fn layer_gradient(
        &self,
        layer: &str,
        _input: &Array4<f32>,
        target: usize,
    ) -> Result<Option<LayerGradient>> {
        self.gradient_targets.lock().unwrap().push(target);
        if layer != self.layer {
            return Ok(None);
        }
        Ok(self.capture.clone())
    }
}

/// Classifier whose runtime fails outright.
#[derive(Debug, Default)]
pub struct FailingClassifier;

impl Classifier for FailingClassifier {
    fn forward(&self, _input: &Array4<f32>) -> Result<Vec<f32>> {
        Err(Error::inference("runtime unavailable"))
    }

    fn layer_gradient(
        &self,
        _layer: &str,
        _input: &Array4<f32>,
        _target: usize,
    ) -> Result<Option<LayerGradient>> {
        Err(Error::inference("runtime unavailable"))
    }
}

/// Classifier that panics on its first forward pass and then behaves like
/// a single-output model.
#[derive(Debug)]
pub struct PanicOnceClassifier {
    pub probability: f32,
    pub panicked: AtomicBool,
}

impl PanicOnceClassifier {
    pub fn new(probability: f32) -> Self {
        Self {
            probability,
            panicked: AtomicBool::new(false),
        }
    }
}

impl Classifier for PanicOnceClassifier {
    fn forward(&self, _input: &Array4<f32>) -> Result<Vec<f32>> {
        if !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("runtime fault inside forward pass");
        }
        Ok(vec![self.probability])
    }

    fn layer_gradient(
        &self,
        _layer: &str,
        _input: &Array4<f32>,
        _target: usize,
    ) -> Result<Option<LayerGradient>> {
        Ok(None)
    }
}

#[derive(Debug, Default)]
pub struct IdentityScaler;

impl TabularScaler for IdentityScaler {
    fn transform(&self, features: &[f64]) -> Result<Vec<f64>> {
        Ok(features.to_vec())
    }
}

/// Tabular model that ignores its input.
#[derive(Debug)]
pub struct FixedRiskModel {
    pub probabilities: Vec<f64>,
}

impl FixedRiskModel {
    pub fn new(low: f64, medium: f64, high: f64) -> Self {
        Self {
            probabilities: vec![low, medium, high],
        }
    }
}

impl TabularClassifier for FixedRiskModel {
    fn predict_proba(&self, _features: &[f64]) -> Result<Vec<f64>> {
        Ok(self.probabilities.clone())
    }
}

mock! {
    pub Scaler {}

    impl TabularScaler for Scaler {
        fn transform(&self, features: &[f64]) -> Result<Vec<f64>>;
    }
}

mock! {
    pub RiskModel {}

    impl TabularClassifier for RiskModel {
        fn predict_proba(&self, features: &[f64]) -> Result<Vec<f64>>;
    }
}
