//! Orchestrates one prediction: image branch and clinical branch merged into a
//! single [`PredictionResult`].

mod types;

pub use types::*;

use crate::{
    Error, Result,
    config::{Config, ModelConfig},
    imaging::{ImageNormalizer, NormalizedImage, encode_png_base64},
    model::{Classifier, FeatureNames, OnnxClassifier, SoftmaxRiskModel, StandardScaler},
    risk::{RiskScorer, round2},
    saliency::{SaliencyMap, SaliencyMapper},
};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PredictorSettings {
    pub image_size: u32,
    pub target_layer: String,
    pub threshold: f64,
    pub serialize_inference: bool,
}

impl From<&ModelConfig> for PredictorSettings {
    fn from(config: &ModelConfig) -> Self {
        Self {
            image_size: config.image_size,
            target_layer: config.target_layer.clone(),
            threshold: config.threshold,
            serialize_inference: config.serialize_inference,
        }
    }
}

/// `probability >= threshold`; the boundary counts as detected.
pub fn is_disease_detected(probability: f64, threshold: f64) -> bool {
    probability >= threshold
}

/// Confidence is the raw classifier probability in percent, whichever side of
/// the threshold it falls on.
pub fn confidence(probability: f64) -> f64 {
    round2(probability * 100.0)
}

/// Shared, read-only inference context built once at startup.
pub struct Predictor {
    settings: PredictorSettings,
    normalizer: ImageNormalizer,
    mapper: SaliencyMapper,
    classifier: Arc<dyn Classifier>,
    risk: RiskScorer,
    inference_lock: Mutex<()>,
}

impl Predictor {
    pub fn new(
        settings: PredictorSettings,
        classifier: Arc<dyn Classifier>,
        risk: RiskScorer,
    ) -> Self {
        Self {
            normalizer: ImageNormalizer::new(settings.image_size),
            mapper: SaliencyMapper::new(settings.image_size),
            settings,
            classifier,
            risk,
            inference_lock: Mutex::new(()),
        }
    }

    /// Load every artifact named in the configuration.
    pub fn load(config: &Config) -> Result<Self> {
        let feature_names = FeatureNames::load(&config.risk.feature_names_path)?;
        let scaler = StandardScaler::load(&config.risk.scaler_path)?;
        let risk_model = SoftmaxRiskModel::load(&config.risk.model_path)?;

        if scaler.dim() != feature_names.len() {
            return Err(Error::model_load(
                &config.risk.scaler_path,
                format!(
                    "scaler has {} features, feature list has {}",
                    scaler.dim(),
                    feature_names.len()
                ),
            ));
        }
        if risk_model.dim() != feature_names.len() {
            return Err(Error::model_load(
                &config.risk.model_path,
                format!(
                    "risk model has {} inputs, feature list has {}",
                    risk_model.dim(),
                    feature_names.len()
                ),
            ));
        }

        let classifier = OnnxClassifier::load(&config.model)?;
        let risk = RiskScorer::new(feature_names, Arc::new(scaler), Arc::new(risk_model));

        Ok(Self::new(PredictorSettings::from(&config.model), Arc::new(classifier), risk))
    }

    pub fn settings(&self) -> &PredictorSettings {
        &self.settings
    }

    pub fn predict(&self, image_bytes: &[u8], fields: &ClinicalFields) -> Result<PredictionResult> {
        let request_id = Uuid::new_v4();
        let _span = info_span!("predict", %request_id).entered();

        let (probabilities, risk) = self.risk.score(fields)?;

        let normalized = self.normalizer.normalize(image_bytes)?;
        let original_image = encode_png_base64(&normalized.display)?;

        let (dl_probability, saliency) = self.classify(&normalized)?;

        let gradcam_image = match saliency {
            Some(map) => {
                let overlay = self.mapper.overlay(&normalized.display, &map)?;
                Some(encode_png_base64(&overlay)?)
            }
            None => {
                warn!(
                    "Saliency unavailable for layer '{}', omitting overlay",
                    self.settings.target_layer
                );
                None
            }
        };

        let result = PredictionResult {
            disease_detected: is_disease_detected(dl_probability, self.settings.threshold),
            dl_probability,
            risk,
            confidence: confidence(dl_probability),
            heart_rate: fields.heart_rate(),
            gradcam_image,
            original_image,
            probabilities,
            gradcam_legend: GRADCAM_LEGEND,
        };

        info!(
            "Prediction complete: disease_detected={} probability={:.4} risk={} ({}%)",
            result.disease_detected, result.dl_probability, result.risk.level, result.risk.percent
        );

        Ok(result)
    }

    fn classify(&self, normalized: &NormalizedImage) -> Result<(f64, Option<SaliencyMap>)> {
        let layer = &self.settings.target_layer;
        let (scores, capture) = {
            let _guard = self.inference_guard();
            self.classifier.forward_with_gradient(layer, &normalized.tensor)?
        };

        let probability = scores
            .first()
            .map(|&p| f64::from(p))
            .ok_or_else(|| Error::inference("classifier produced an empty score vector"))?;
        if !probability.is_finite() || !(0.0..=1.0).contains(&probability) {
            return Err(Error::inference(format!(
                "classifier probability {probability} outside [0, 1]"
            )));
        }
        debug!("Classifier probability: {}", probability);

        let saliency = self.mapper.map_capture(layer, capture)?;

        Ok((probability, saliency))
    }

    /// The lock guards no data, so a panic in an earlier call leaves nothing
    /// to protect and the poison flag is cleared.
    fn inference_guard(&self) -> Option<MutexGuard<'_, ()>> {
        if !self.settings.serialize_inference {
            return None;
        }
        let guard = self.inference_lock.lock().unwrap_or_else(|poisoned| {
            warn!("Recovering inference lock after a panic in a previous request");
            self.inference_lock.clear_poison();
            poisoned.into_inner()
        });
        Some(guard)
    }
}
