use std::collections::HashMap;
use std::time::Duration;

use log::{info, warn};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

/// Hard bound on a single detection call. The countdown never waits on this;
/// a timed-out sample is discarded, not retried.
pub const DETECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("detection request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("detection service rejected the sample: {0}")]
    Rejected(String),

    #[error("malformed detection response: {0}")]
    Malformed(String),
}

/// Normalized result of one classification call.
#[derive(Debug, Clone)]
pub struct Detection {
    pub detected: bool,
    pub action: Option<String>,
    pub confidence: Option<f64>,
    pub probabilities: Option<HashMap<String, f64>>,
}

/// Raw bridge payload. Everything past `success` is optional; the bridge
/// omits fields on negative detections.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct DetectionResponse {
    success: bool,
    detected: bool,
    action: Option<String>,
    confidence: Option<f64>,
    probabilities: Option<HashMap<String, f64>>,
    #[allow(dead_code)]
    landmarks: Option<serde_json::Value>,
    error: Option<String>,
}

impl Default for DetectionResponse {
    fn default() -> Self {
        Self {
            success: false,
            detected: false,
            action: None,
            confidence: None,
            probabilities: None,
            landmarks: None,
            error: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TriggerResponse {
    success: bool,
}

/// Stateless request/response boundary to the external classification bridge.
///
/// One outstanding call per sample producer; no queueing, no retries. Failures
/// surface as `GatewayError` and the caller drops the sample.
#[derive(Clone)]
pub struct HttpDetectionGateway {
    client: Client,
    base_url: String,
}

impl HttpDetectionGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Send one encoded frame for classification.
    pub async fn detect(&self, frame: &str, threshold: f64) -> Result<Detection, GatewayError> {
        let response = self
            .client
            .post(self.url("/process_frame"))
            .timeout(DETECT_TIMEOUT)
            .json(&json!({ "frame": frame, "threshold": threshold }))
            .send()
            .await?;

        let payload: DetectionResponse = response
            .json()
            .await
            .map_err(|err| GatewayError::Malformed(err.to_string()))?;

        if !payload.success {
            return Err(GatewayError::Rejected(
                payload.error.unwrap_or_else(|| "unspecified error".to_string()),
            ));
        }

        Ok(Detection {
            detected: payload.detected,
            action: payload.action,
            confidence: payload.confidence,
            probabilities: payload.probabilities,
        })
    }

    /// Probe the bridge. A failure here means the engine runs in degraded
    /// mode: timer only, no detection.
    pub async fn ensure_ready(&self) -> Result<(), GatewayError> {
        let response = self
            .client
            .get(self.url("/health"))
            .timeout(DETECT_TIMEOUT)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(GatewayError::Rejected(format!(
                "health check returned HTTP {}",
                response.status()
            )))
        }
    }

    /// Fire-and-forget companion action (the hardware nudge the bridge drives
    /// on detection). The result is only logged.
    pub fn trigger_action(&self, action: &str) {
        let client = self.client.clone();
        let url = self.url("/trigger_arduino");
        let action = action.to_string();

        tokio::spawn(async move {
            let result = client
                .post(&url)
                .timeout(DETECT_TIMEOUT)
                .json(&json!({ "action": action }))
                .send()
                .await;

            match result {
                Ok(response) => match response.json::<TriggerResponse>().await {
                    Ok(body) if body.success => info!("companion trigger '{action}' delivered"),
                    Ok(_) => warn!("companion trigger '{action}' reported failure"),
                    Err(err) => warn!("companion trigger '{action}' returned junk: {err}"),
                },
                Err(err) => warn!("companion trigger '{action}' failed: {err}"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn detect_parses_a_positive_detection() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/process_frame")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"success": true, "detected": true, "action": "doomscrolling",
                    "confidence": 0.93, "probabilities": {"doomscrolling": 0.93, "nothing": 0.07}}"#,
            )
            .create_async()
            .await;

        let gateway = HttpDetectionGateway::new(server.url());
        let detection = gateway.detect("frame-bytes", 0.8).await.unwrap();

        assert!(detection.detected);
        assert_eq!(detection.action.as_deref(), Some("doomscrolling"));
        assert_eq!(detection.confidence, Some(0.93));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn detect_handles_a_negative_detection() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/process_frame")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success": true, "detected": false}"#)
            .create_async()
            .await;

        let gateway = HttpDetectionGateway::new(server.url());
        let detection = gateway.detect("frame-bytes", 0.8).await.unwrap();

        assert!(!detection.detected);
        assert!(detection.action.is_none());
    }

    #[tokio::test]
    async fn non_success_payload_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/process_frame")
            .with_status(500)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success": false, "error": "Model processor not initialized"}"#)
            .create_async()
            .await;

        let gateway = HttpDetectionGateway::new(server.url());
        let err = gateway.detect("frame-bytes", 0.8).await.unwrap_err();
        assert!(matches!(err, GatewayError::Rejected(_)));
    }

    #[tokio::test]
    async fn malformed_payload_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/process_frame")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("not json at all")
            .create_async()
            .await;

        let gateway = HttpDetectionGateway::new(server.url());
        let err = gateway.detect("frame-bytes", 0.8).await.unwrap_err();
        assert!(matches!(err, GatewayError::Malformed(_)));
    }

    #[tokio::test]
    async fn ensure_ready_reflects_bridge_health() {
        let mut server = mockito::Server::new_async().await;
        let healthy = server
            .mock("GET", "/health")
            .with_status(200)
            .with_body(r#"{"status": "ok"}"#)
            .create_async()
            .await;

        let gateway = HttpDetectionGateway::new(server.url());
        assert!(gateway.ensure_ready().await.is_ok());
        healthy.assert_async().await;

        server
            .mock("GET", "/health")
            .with_status(503)
            .create_async()
            .await;
        assert!(gateway.ensure_ready().await.is_err());
    }
}
