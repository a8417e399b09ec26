use super::mocks::{FixedRiskModel, IdentityScaler, StubClassifier};
use eye2heart::{
    Predictor,
    model::{FeatureNames, LayerGradient, TabularClassifier, TabularScaler},
    prediction::PredictorSettings,
    risk::RiskScorer,
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use ndarray::Array4;
use std::{io::Cursor, path::PathBuf, sync::Arc};
use tempfile::TempDir;

pub const TEST_IMAGE_SIZE: u32 = 32;
pub const TEST_LAYER: &str = "stub_conv";
pub const TEST_FEATURES: [&str; 3] = ["age", "sysBP", "BMI"];

pub fn create_test_settings() -> PredictorSettings {
    PredictorSettings {
        image_size: TEST_IMAGE_SIZE,
        target_layer: TEST_LAYER.to_string(),
        threshold: 0.5,
        serialize_inference: true,
    }
}

pub fn test_feature_names() -> FeatureNames {
    FeatureNames::new(TEST_FEATURES.iter().map(|s| s.to_string()).collect()).unwrap()
}

pub fn create_risk_scorer(
    scaler: Arc<dyn TabularScaler>,
    classifier: Arc<dyn TabularClassifier>,
) -> RiskScorer {
    RiskScorer::new(test_feature_names(), scaler, classifier)
}

/// Predictor around a stub classifier and a fixed risk triple.
pub fn create_test_predictor(classifier: Arc<StubClassifier>, risk: [f64; 3]) -> Predictor {
    let scorer = create_risk_scorer(
        Arc::new(IdentityScaler),
        Arc::new(FixedRiskModel::new(risk[0], risk[1], risk[2])),
    );
    Predictor::new(create_test_settings(), classifier, scorer)
}

pub fn png_bytes(image: &RgbImage) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image.clone())
        .write_to(&mut buffer, ImageFormat::Png)
        .expect("Failed to encode test PNG");
    buffer.into_inner()
}

pub fn uniform_png(size: u32, color: [u8; 3]) -> Vec<u8> {
    png_bytes(&RgbImage::from_pixel(size, size, Rgb(color)))
}

/// 1x4x4x2 capture whose positive evidence sits in the right half.
///
/// Channel 0 is active on columns 2..4 with gradient +1; channel 1 is active
/// everywhere with gradient -1, so only the right half survives the ReLU.
pub fn right_half_capture() -> LayerGradient {
    let mut activation = Array4::<f32>::zeros((1, 4, 4, 2));
    let mut gradient = Array4::<f32>::zeros((1, 4, 4, 2));
    for y in 0..4 {
        for x in 0..4 {
            activation[[0, y, x, 0]] = if x >= 2 { 3.0 } else { 0.0 };
            activation[[0, y, x, 1]] = 1.0;
            gradient[[0, y, x, 0]] = 1.0;
            gradient[[0, y, x, 1]] = -1.0;
        }
    }
    LayerGradient {
        activation,
        gradient,
    }
}

/// Capture with an all-zero gradient.
pub fn flat_capture() -> LayerGradient {
    LayerGradient {
        activation: Array4::from_elem((1, 4, 4, 2), 2.0),
        gradient: Array4::zeros((1, 4, 4, 2)),
    }
}

pub struct RiskArtifacts {
    pub dir: TempDir,
    pub feature_names: PathBuf,
    pub scaler: PathBuf,
    pub model: PathBuf,
}

/// Write a consistent set of tabular artifacts for the test features.
pub fn write_risk_artifacts() -> RiskArtifacts {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let feature_names = dir.path().join("feature_names.json");
    let scaler = dir.path().join("scaler.json");
    let model = dir.path().join("risk_model.json");

    std::fs::write(&feature_names, r#"["age", "sysBP", "BMI"]"#).unwrap();
    std::fs::write(
        &scaler,
        r#"{"mean": [50.0, 130.0, 26.0], "scale": [10.0, 20.0, 4.0]}"#,
    )
    .unwrap();
    std::fs::write(
        &model,
        r#"{
            "coefficients": [[-1.0, -1.0, -0.5], [0.0, 0.0, 0.0], [1.0, 1.0, 0.5]],
            "intercepts": [0.5, 0.0, -0.5]
        }"#,
    )
    .unwrap();

    RiskArtifacts {
        dir,
        feature_names,
        scaler,
        model,
    }
}

pub fn config_yaml(artifacts: &RiskArtifacts, classifier_path: &str) -> String {
    format!(
        r#"
server:
  host: "127.0.0.1"
  port: 5050
  logs:
    level: "debug"

model:
  classifier_path: "{classifier}"
  image_size: 64
  target_layer: "convnext_tiny_stage_3_block_2_depthwise_conv"

risk:
  scaler_path: "{scaler}"
  model_path: "{model}"
  feature_names_path: "{names}"
"#,
        classifier = classifier_path,
        scaler = artifacts.scaler.display(),
        model = artifacts.model.display(),
        names = artifacts.feature_names.display(),
    )
}

pub const MULTIPART_BOUNDARY: &str = "eye2heart-test-boundary";

/// Build a `multipart/form-data` body with an optional image part.
pub fn multipart_body(image: Option<&[u8]>, fields: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
        );
        body.extend_from_slice(value.as_bytes());
        body.extend_from_slice(b"\r\n");
    }
    if let Some(image) = image {
        body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            b"Content-Disposition: form-data; name=\"image\"; filename=\"fundus.png\"\r\n",
        );
        body.extend_from_slice(b"Content-Type: image/png\r\n\r\n");
        body.extend_from_slice(image);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}--\r\n").as_bytes());
    body
}
