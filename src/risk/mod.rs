//! Cardiovascular risk tier from clinical measurements.

use crate::{
    Error, Result,
    model::{FeatureNames, TabularClassifier, TabularScaler},
    prediction::ClinicalFields,
};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use tracing::debug;

/// Severity weight of each class in the blended risk percentage.
pub const LOW_WEIGHT: f64 = 0.2;
pub const MEDIUM_WEIGHT: f64 = 0.6;
pub const HIGH_WEIGHT: f64 = 1.0;

const PROBABILITY_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn from_index(idx: usize) -> Self {
        match idx {
            0 => Self::Low,
            1 => Self::Medium,
            _ => Self::High,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }

    /// Ten-year outlook sentence shown alongside the tier.
    pub fn message(&self) -> &'static str {
        match self {
            Self::Low => "Low probability of developing heart disease in next 10 years",
            Self::Medium => "Moderate probability of developing heart disease in next 10 years",
            Self::High => "High probability of developing heart disease in next 10 years",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Class probabilities of the tabular model, in Low/Medium/High order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbabilityTriple {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
}

impl ProbabilityTriple {
    pub fn new(low: f64, medium: f64, high: f64) -> Result<Self> {
        let triple = Self { low, medium, high };
        let values = triple.to_array();
        let bounds = -PROBABILITY_TOLERANCE..=1.0 + PROBABILITY_TOLERANCE;
        if values.iter().any(|p| !p.is_finite() || !bounds.contains(p)) {
            return Err(Error::inference(format!("invalid class probabilities {values:?}")));
        }
        let total: f64 = values.iter().sum();
        if (total - 1.0).abs() > 1e-3 {
            return Err(Error::inference(format!(
                "class probabilities {values:?} sum to {total}, expected 1"
            )));
        }
        Ok(triple)
    }

    pub fn from_slice(probs: &[f64]) -> Result<Self> {
        match probs {
            [low, medium, high] => Self::new(*low, *medium, *high),
            _ => Err(Error::inference(format!(
                "risk model returned {} probabilities, expected 3",
                probs.len()
            ))),
        }
    }

    pub fn to_array(&self) -> [f64; 3] {
        [self.low, self.medium, self.high]
    }

    /// Most probable tier; ties resolve to the lower tier.
    pub fn level(&self) -> RiskLevel {
        let values = self.to_array();
        let mut best = 0;
        for (idx, &p) in values.iter().enumerate().skip(1) {
            if p > values[best] {
                best = idx;
            }
        }
        RiskLevel::from_index(best)
    }

    /// Severity-weighted risk in percent, rounded to two decimals.
    pub fn risk_percent(&self) -> f64 {
        let blended = self.low * LOW_WEIGHT + self.medium * MEDIUM_WEIGHT + self.high * HIGH_WEIGHT;
        round2(blended * 100.0)
    }

    pub fn assess(&self) -> RiskAssessment {
        let level = self.level();
        RiskAssessment {
            level,
            percent: self.risk_percent(),
            message: level.message().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    #[serde(rename = "risk_level")]
    pub level: RiskLevel,
    #[serde(rename = "risk_percent")]
    pub percent: f64,
    #[serde(rename = "ten_year_chd_prediction")]
    pub message: String,
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub struct RiskScorer {
    feature_names: FeatureNames,
    scaler: Arc<dyn TabularScaler>,
    classifier: Arc<dyn TabularClassifier>,
}

impl RiskScorer {
    pub fn new(
        feature_names: FeatureNames,
        scaler: Arc<dyn TabularScaler>,
        classifier: Arc<dyn TabularClassifier>,
    ) -> Self {
        Self {
            feature_names,
            scaler,
            classifier,
        }
    }

    pub fn feature_names(&self) -> &FeatureNames {
        &self.feature_names
    }

    /// Raw feature vector in model order; absent features are 0.0.
    pub fn feature_vector(&self, fields: &ClinicalFields) -> Result<Vec<f64>> {
        self.feature_names
            .iter()
            .map(|name| Ok(fields.numeric(name)?.unwrap_or(0.0)))
            .collect()
    }

    pub fn score(&self, fields: &ClinicalFields) -> Result<(ProbabilityTriple, RiskAssessment)> {
        let raw = self.feature_vector(fields)?;
        let scaled = self.scaler.transform(&raw)?;
        let probs = ProbabilityTriple::from_slice(&self.classifier.predict_proba(&scaled)?)?;
        let assessment = probs.assess();

        debug!(
            "Risk probabilities {:?} -> {} ({}%)",
            probs.to_array(),
            assessment.level,
            assessment.percent
        );

        Ok((probs, assessment))
    }
}
