use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use eye2heart::server::router;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt; // for `oneshot`

mod common;
use common::{
    mocks::StubClassifier,
    test_utils::{
        MULTIPART_BOUNDARY, create_test_predictor, multipart_body, right_half_capture, uniform_png,
    },
};

fn create_test_app(probability: f32) -> Router {
    let classifier =
        Arc::new(StubClassifier::new(probability).with_capture(right_half_capture()));
    router(Arc::new(create_test_predictor(classifier, [0.1, 0.8, 0.1])))
}

fn predict_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/predict")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_status_endpoint() {
    let app = create_test_app(0.7);

    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["message"], "Eye2Heart backend running");
}

#[tokio::test]
async fn test_predict_endpoint_valid_request() {
    let app = create_test_app(0.7);
    let image = uniform_png(40, [120, 60, 30]);
    let body = multipart_body(
        Some(&image),
        &[("age", "63"), ("sysBP", "150"), ("heartRate", "81")],
    );

    let response = app.oneshot(predict_request(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["disease_detected"], true);
    assert_eq!(body["confidence"], 70.0);
    assert_eq!(body["heart_rate"], 81);
    assert_eq!(body["risk_level"], "Medium");
    assert_eq!(body["risk_percent"], 60.0);
    assert_eq!(
        body["ten_year_chd_prediction"],
        "Moderate probability of developing heart disease in next 10 years"
    );
    assert!(body["gradcam_image"].is_string());
    assert!(body["original_image"].is_string());
    assert_eq!(
        body["gradcam_legend"]["blue"],
        "Low importance (model paying little attention)"
    );
}

#[tokio::test]
async fn test_predict_endpoint_missing_image() {
    let app = create_test_app(0.7);
    let body = multipart_body(None, &[("age", "63")]);

    let response = app.oneshot(predict_request(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "No image uploaded");
}

#[tokio::test]
async fn test_predict_endpoint_undecodable_image() {
    let app = create_test_app(0.7);
    let body = multipart_body(Some(b"this is not a png"), &[]);

    let response = app.oneshot(predict_request(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().starts_with("Image decode error"));
}

#[tokio::test]
async fn test_predict_endpoint_invalid_feature() {
    let app = create_test_app(0.7);
    let image = uniform_png(40, [120, 60, 30]);
    let body = multipart_body(Some(&image), &[("BMI", "heavy")]);

    let response = app.oneshot(predict_request(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().contains("'BMI'"));
}

#[tokio::test]
async fn test_predict_endpoint_requires_multipart() {
    let app = create_test_app(0.7);

    let request = Request::builder()
        .method("POST")
        .uri("/api/predict")
        .header("content-type", "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert!(response.status().is_client_error());
}
