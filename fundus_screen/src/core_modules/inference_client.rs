// THEORY:
// The `InferenceClient` is the boundary between this crate and the remote
// classification/segmentation service. Everything on the far side of the HTTP call is
// someone else's problem; everything on this side must come back as a
// `PredictionResult`, whatever happened on the wire.
//
// Key architectural principles:
// 1.  **One Shape Out**: Success, HTTP errors, timeouts, refused connections and garbage
//     bodies all return a `PredictionResult`. The caller never sees a transport error
//     type, so a batch can never be torn down by one bad sample.
// 2.  **Single Attempt**: No retries and no backoff. A sample gets exactly one request.
// 3.  **Pooled Connections**: The `reqwest::Client` is built once and reused, so a batch
//     of sequential uploads shares keep-alive connections to the service.
// 4.  **Substitutable**: The `Classifier` trait is the seam the evaluator depends on.
//     Tests and alternative transports implement it without touching the batch logic.

use crate::core_modules::prediction::PredictionResult;
use reqwest::multipart::{Form, Part};
use reqwest::{StatusCode, Url};
use std::error::Error as StdError;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:5000/predict";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Multipart field that carries the image.
pub const IMAGE_FIELD: &str = "image";
pub const IMAGE_CONTENT_TYPE: &str = "image/jpeg";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid endpoint `{endpoint}`: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Anything that can turn image bytes into a `PredictionResult`.
pub trait Classifier {
    fn classify(
        &self,
        image: Vec<u8>,
        filename: &str,
        timeout: Duration,
    ) -> impl Future<Output = PredictionResult> + Send;
}

/// HTTP client for the `/predict` endpoint.
#[derive(Debug, Clone)]
pub struct InferenceClient {
    http: reqwest::Client,
    endpoint: Url,
}

impl InferenceClient {
    pub fn new(endpoint: &str) -> Result<Self, ClientError> {
        let url = Url::parse(endpoint).map_err(|e| ClientError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ClientError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                reason: format!("unsupported scheme `{}`", url.scheme()),
            });
        }

        let http = reqwest::Client::builder()
            .user_agent(concat!("fundus_screen/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            endpoint: url,
        })
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }

    /// Uploads one image and interprets the response. Never fails: every error is
    /// folded into a `PredictionResult` with `validation: false`.
    pub async fn classify(&self, image: Vec<u8>, filename: &str, timeout: Duration) -> PredictionResult {
        let size = image.len();
        let part = match Part::bytes(image)
            .file_name(filename.to_string())
            .mime_str(IMAGE_CONTENT_TYPE)
        {
            Ok(part) => part,
            Err(err) => return PredictionResult::connection_error(error_chain(&err)),
        };
        let form = Form::new().part(IMAGE_FIELD, part);

        debug!(endpoint = %self.endpoint, filename, size, ?timeout, "sending classification request");
        let response = match self
            .http
            .post(self.endpoint.clone())
            .multipart(form)
            .timeout(timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => return PredictionResult::connection_error(error_chain(&err)),
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => return PredictionResult::connection_error(error_chain(&err)),
        };

        if status != StatusCode::OK {
            debug!(filename, status = status.as_u16(), "classifier returned an error status");
            return PredictionResult::http_error(status.as_u16(), &body);
        }

        PredictionResult::from_json(&body).unwrap_or_else(|err| {
            PredictionResult::connection_error(format!("invalid response body: {err}"))
        })
    }
}

impl Classifier for InferenceClient {
    async fn classify(&self, image: Vec<u8>, filename: &str, timeout: Duration) -> PredictionResult {
        InferenceClient::classify(self, image, filename, timeout).await
    }
}

/// `reqwest` hides the interesting part ("connection refused", "timed out") in the
/// source chain.
fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::prediction::FailureKind;
    use axum::extract::{Multipart, State};
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    struct Upload {
        field: String,
        file_name: String,
        content_type: String,
        len: usize,
    }

    type Uploads = Arc<Mutex<Vec<Upload>>>;

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/predict")
    }

    async fn record_upload(State(uploads): State<Uploads>, mut multipart: Multipart) -> Json<serde_json::Value> {
        while let Some(field) = multipart.next_field().await.unwrap() {
            let upload = Upload {
                field: field.name().unwrap_or_default().to_string(),
                file_name: field.file_name().unwrap_or_default().to_string(),
                content_type: field.content_type().unwrap_or_default().to_string(),
                len: field.bytes().await.unwrap().len(),
            };
            uploads.lock().unwrap().push(upload);
        }
        Json(json!({
            "validation": true,
            "prediction": "Glaucoma",
            "probability": 0.93,
            "cdr": { "vertical": 0.68, "area": 0.47 },
        }))
    }

    #[tokio::test]
    async fn uploads_image_field_and_parses_response() {
        let uploads: Uploads = Arc::default();
        let app = Router::new()
            .route("/predict", post(record_upload))
            .with_state(uploads.clone());
        let client = InferenceClient::new(&spawn(app).await).unwrap();

        let result = client
            .classify(vec![7u8; 1024], "g001.jpg", Duration::from_secs(5))
            .await;

        assert!(result.validation, "unexpected failure: {:?}", result.error);
        assert_eq!(result.predicted_label, "Glaucoma");
        assert_eq!(result.cdr.unwrap().vertical, 0.68);
        assert_eq!(
            uploads.lock().unwrap().as_slice(),
            [Upload {
                field: "image".to_string(),
                file_name: "g001.jpg".to_string(),
                content_type: "image/jpeg".to_string(),
                len: 1024,
            }]
        );
    }

    #[tokio::test]
    async fn non_200_becomes_api_error() {
        let app = Router::new().route(
            "/predict",
            post(|| async { (AxumStatus::INTERNAL_SERVER_ERROR, "model not loaded") }),
        );
        let client = InferenceClient::new(&spawn(app).await).unwrap();

        let result = client.classify(vec![1, 2, 3], "x.jpg", Duration::from_secs(5)).await;
        assert!(!result.validation);
        assert_eq!(result.error.as_deref(), Some("API Error: 500 - model not loaded"));
        assert_eq!(result.failure, Some(FailureKind::Http { status: 500 }));
    }

    #[tokio::test]
    async fn malformed_body_becomes_connection_error() {
        let app = Router::new().route("/predict", post(|| async { "<html>oops</html>" }));
        let client = InferenceClient::new(&spawn(app).await).unwrap();

        let result = client.classify(vec![1], "x.jpg", Duration::from_secs(5)).await;
        assert!(!result.validation);
        assert!(result.error.unwrap().starts_with("Connection Error: invalid response body"));
        assert_eq!(result.failure, Some(FailureKind::Transport));
    }

    #[tokio::test]
    async fn refused_connection_becomes_connection_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = InferenceClient::new(&format!("http://{addr}/predict")).unwrap();
        let result = client.classify(vec![1], "x.jpg", Duration::from_secs(5)).await;
        assert!(!result.validation);
        assert!(result.error.unwrap().starts_with("Connection Error: "));
        assert_eq!(result.failure, Some(FailureKind::Transport));
    }

    #[tokio::test]
    async fn slow_service_times_out() {
        let app = Router::new().route(
            "/predict",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                Json(json!({ "validation": true }))
            }),
        );
        let client = InferenceClient::new(&spawn(app).await).unwrap();

        let result = client.classify(vec![1], "x.jpg", Duration::from_millis(100)).await;
        assert!(!result.validation);
        assert!(result.error.unwrap().starts_with("Connection Error: "));
    }

    #[test]
    fn rejects_bad_endpoints() {
        assert!(matches!(
            InferenceClient::new("not a url"),
            Err(ClientError::InvalidEndpoint { .. })
        ));
        assert!(matches!(
            InferenceClient::new("ftp://localhost/predict"),
            Err(ClientError::InvalidEndpoint { .. })
        ));
        assert_eq!(
            InferenceClient::new(DEFAULT_ENDPOINT).unwrap().endpoint(),
            DEFAULT_ENDPOINT
        );
    }
}
