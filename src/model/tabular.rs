//! JSON-serialized tabular artifacts: feature list, standard scaler and a
//! multinomial linear risk model.

use super::{TabularClassifier, TabularScaler};
use crate::{Error, Result};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{collections::HashSet, path::Path};
use tracing::info;

pub const RISK_CLASSES: usize = 3;

fn read_artifact<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let display = path.display().to_string();
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::model_load(&display, e.to_string()))?;
    serde_json::from_str(&raw).map_err(|e| Error::model_load(&display, e.to_string()))
}

/// Ordered list of clinical feature names the scaler and model were fitted on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct FeatureNames(Vec<String>);

impl TryFrom<Vec<String>> for FeatureNames {
    type Error = Error;

    fn try_from(names: Vec<String>) -> Result<Self> {
        Self::new(names)
    }
}

impl From<FeatureNames> for Vec<String> {
    fn from(names: FeatureNames) -> Self {
        names.0
    }
}

impl FeatureNames {
    pub fn new(names: Vec<String>) -> Result<Self> {
        if names.is_empty() {
            return Err(Error::config("feature name list is empty"));
        }
        {
            let mut seen = HashSet::new();
            if let Some(dup) = names.iter().find(|name| !seen.insert(name.as_str())) {
                return Err(Error::config(format!("duplicate feature name '{dup}'")));
            }
        }
        Ok(Self(names))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let names: Self = read_artifact(path)?;
        info!("Loaded {} feature names from {}", names.len(), path.display());
        Ok(names)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// `(x - mean) / scale`, the transform of a fitted standardization step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "ScalerArtifact")]
pub struct StandardScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

#[derive(Deserialize)]
struct ScalerArtifact {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl TryFrom<ScalerArtifact> for StandardScaler {
    type Error = Error;

    fn try_from(raw: ScalerArtifact) -> Result<Self> {
        Self::new(raw.mean, raw.scale)
    }
}

impl StandardScaler {
    pub fn new(mean: Vec<f64>, scale: Vec<f64>) -> Result<Self> {
        if mean.is_empty() {
            return Err(Error::config("scaler has no features"));
        }
        if mean.len() != scale.len() {
            return Err(Error::config(format!(
                "scaler mean has {} entries but scale has {}",
                mean.len(),
                scale.len()
            )));
        }
        Ok(Self { mean, scale })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let scaler: Self = read_artifact(path)?;
        info!(
            "Loaded scaler with {} features from {}",
            scaler.dim(),
            path.display()
        );
        Ok(scaler)
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }
}

impl TabularScaler for StandardScaler {
    fn transform(&self, features: &[f64]) -> Result<Vec<f64>> {
        if features.len() != self.dim() {
            return Err(Error::inference(format!(
                "scaler expects {} features, got {}",
                self.dim(),
                features.len()
            )));
        }
        Ok(features
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(x, (mean, scale))| {
                // Constant features were fitted with zero variance.
                let scale = if *scale == 0.0 { 1.0 } else { *scale };
                (x - mean) / scale
            })
            .collect())
    }
}

/// Softmax over `W x + b` with one row per risk class.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RiskModelArtifact")]
pub struct SoftmaxRiskModel {
    coefficients: Vec<Vec<f64>>,
    intercepts: Vec<f64>,
}

#[derive(Deserialize)]
struct RiskModelArtifact {
    coefficients: Vec<Vec<f64>>,
    intercepts: Vec<f64>,
}

impl TryFrom<RiskModelArtifact> for SoftmaxRiskModel {
    type Error = Error;

    fn try_from(raw: RiskModelArtifact) -> Result<Self> {
        Self::new(raw.coefficients, raw.intercepts)
    }
}

impl SoftmaxRiskModel {
    pub fn new(coefficients: Vec<Vec<f64>>, intercepts: Vec<f64>) -> Result<Self> {
        if coefficients.len() != RISK_CLASSES || intercepts.len() != RISK_CLASSES {
            return Err(Error::config(format!(
                "risk model needs {} classes, got {} coefficient rows and {} intercepts",
                RISK_CLASSES,
                coefficients.len(),
                intercepts.len()
            )));
        }
        let width = coefficients[0].len();
        if width == 0 {
            return Err(Error::config("risk model has no inputs"));
        }
        if coefficients.iter().any(|row| row.len() != width) {
            return Err(Error::config("risk model coefficient rows differ in length"));
        }
        Ok(Self {
            coefficients,
            intercepts,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let model: Self = read_artifact(path)?;
        info!(
            "Loaded risk model with {} inputs from {}",
            model.dim(),
            path.display()
        );
        Ok(model)
    }

    pub fn dim(&self) -> usize {
        self.coefficients.first().map_or(0, Vec::len)
    }
}

impl TabularClassifier for SoftmaxRiskModel {
    fn predict_proba(&self, features: &[f64]) -> Result<Vec<f64>> {
        if features.len() != self.dim() {
            return Err(Error::inference(format!(
                "risk model expects {} features, got {}",
                self.dim(),
                features.len()
            )));
        }

        let logits: Vec<f64> = self
            .coefficients
            .iter()
            .zip(&self.intercepts)
            .map(|(row, b)| row.iter().zip(features).map(|(w, x)| w * x).sum::<f64>() + b)
            .collect();

        let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exp: Vec<f64> = logits.iter().map(|z| (z - max).exp()).collect();
        let total: f64 = exp.iter().sum();

        Ok(exp.into_iter().map(|e| e / total).collect())
    }
}
