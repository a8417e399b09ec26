use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub risk: RiskConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub logs: LogsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Image classifier artifact and saliency settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub classifier_path: String,
    /// Square input resolution expected by the classifier.
    #[serde(default = "default_image_size")]
    pub image_size: u32,
    pub target_layer: String,
    #[serde(default = "default_gradient_suffix")]
    pub gradient_suffix: String,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_serialize_inference")]
    pub serialize_inference: bool,
}

/// Tabular risk model artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    pub scaler_path: String,
    pub model_path: String,
    pub feature_names_path: String,
}

impl Config {
    pub fn validate(&self) -> crate::Result<()> {
        self.model.validate()
    }
}

impl ModelConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.image_size == 0 {
            return Err(crate::Error::config("model.image_size must be positive"));
        }
        if !self.threshold.is_finite() || !(0.0..=1.0).contains(&self.threshold) {
            return Err(crate::Error::config(format!(
                "model.threshold must be within [0, 1], got {}",
                self.threshold
            )));
        }
        if self.target_layer.trim().is_empty() {
            return Err(crate::Error::config("model.target_layer must not be empty"));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            logs: LogsConfig::default(),
        }
    }
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_image_size() -> u32 {
    256
}

fn default_gradient_suffix() -> String {
    "_grad".to_string()
}

fn default_threshold() -> f64 {
    0.5
}

fn default_serialize_inference() -> bool {
    true
}
