use crate::{
    Error, Result,
    risk::{ProbabilityTriple, RiskAssessment},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Form field carrying the optional heart rate.
pub const HEART_RATE_FIELD: &str = "heartRate";

/// Raw clinical form fields as submitted by the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClinicalFields(BTreeMap<String, String>);

impl ClinicalFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Numeric value of `name`, `None` when absent or blank.
    pub fn numeric(&self, name: &str) -> Result<Option<f64>> {
        let Some(raw) = self.get(name).map(str::trim).filter(|v| !v.is_empty()) else {
            return Ok(None);
        };
        match raw.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(Some(value)),
            _ => Err(Error::InvalidFeature {
                name: name.to_string(),
                value: raw.to_string(),
            }),
        }
    }

    /// Heart rate as an integer when present and parseable.
    pub fn heart_rate(&self) -> Option<i64> {
        self.get(HEART_RATE_FIELD)?.trim().parse().ok()
    }
}

impl From<BTreeMap<String, String>> for ClinicalFields {
    fn from(fields: BTreeMap<String, String>) -> Self {
        Self(fields)
    }
}

impl From<HashMap<String, String>> for ClinicalFields {
    fn from(fields: HashMap<String, String>) -> Self {
        Self(fields.into_iter().collect())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ClinicalFields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Meaning of the overlay colors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GradcamLegend {
    pub blue: &'static str,
    pub green: &'static str,
    pub red: &'static str,
}

pub const GRADCAM_LEGEND: GradcamLegend = GradcamLegend {
    blue: "Low importance (model paying little attention)",
    green: "Medium importance (moderate attention)",
    red: "High importance (strong model focus area)",
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub disease_detected: bool,
    pub dl_probability: f64,
    #[serde(flatten)]
    pub risk: RiskAssessment,
    pub confidence: f64,
    pub heart_rate: Option<i64>,
    /// Base64 PNG of the saliency overlay; `None` when no gradient was available.
    pub gradcam_image: Option<String>,
    /// Base64 PNG of the resized input.
    pub original_image: String,
    pub probabilities: ProbabilityTriple,
    pub gradcam_legend: GradcamLegend,
}
