//! Client for the external OCR service.
//!
//! The service exposes `GET /health` and `POST /extract`. Images travel as PNG
//! data URLs; the service answers with recognized players or, for the
//! castle-name crop, a single string.

use anyhow::{Context, Result, bail};
use base64::{Engine as _, engine::general_purpose};
use image::{DynamicImage, ImageFormat};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::time::Duration;
use tracing::{debug, info, warn};

const MAX_RETRIES: u32 = 2;
const RETRY_DELAY_MS: u64 = 500;
const TIMEOUT_SECS: u64 = 30;
const HEALTH_TIMEOUT_SECS: u64 = 5;

// *************** Request/Response Types ***************

/// What the image shows; selects the recognizer on the service side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureKind {
    CastleRush,
    Advent,
    CastleName,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExtractRequest<'a> {
    image: String,
    member_names: &'a [String],
    capture_type: CaptureKind,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ExtractedPlayer {
    #[serde(rename = "playerName")]
    pub player_name: String,
    #[serde(default)]
    pub score: i64,
}

#[derive(Debug, Default, Deserialize)]
struct ExtractResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    players: Vec<ExtractedPlayer>,
    #[serde(default)]
    castle_name: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

enum Failure {
    /// Network trouble or a 5xx; worth another attempt.
    Transient(anyhow::Error),
    Fatal(anyhow::Error),
}

// *************** Public API ***************

/// What the capture session needs from a recognizer. [`OcrClient`] is the
/// real one.
pub trait Recognizer {
    fn base_url(&self) -> &str;
    async fn health(&self) -> bool;
    async fn extract_castle_name(&self, image: &DynamicImage) -> Result<Option<String>>;
    async fn extract_players(
        &self,
        image: &DynamicImage,
        member_names: &[String],
        kind: CaptureKind,
    ) -> Result<Vec<ExtractedPlayer>>;
}

/// Encodes an image as a `data:image/png;base64,...` URL.
pub fn png_data_url(image: &DynamicImage) -> Result<String> {
    let mut png = Cursor::new(Vec::new());
    image
        .write_to(&mut png, ImageFormat::Png)
        .context("Failed to encode PNG")?;
    Ok(format!(
        "data:image/png;base64,{}",
        general_purpose::STANDARD.encode(png.into_inner())
    ))
}

#[derive(Clone, Debug)]
pub struct OcrClient {
    client: Client,
    base_url: String,
}

impl OcrClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            bail!("OCR service URL is empty");
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// True when `/health` answers 2xx. Never errors; offline is `false`.
    pub async fn health(&self) -> bool {
        let request = self
            .client
            .get(format!("{}/health", self.base_url))
            .timeout(Duration::from_secs(HEALTH_TIMEOUT_SECS));
        match request.send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "OCR health check failed");
                false
            }
        }
    }

    /// Recognizes player names and scores on a results screen.
    pub async fn extract_players(
        &self,
        image: &DynamicImage,
        member_names: &[String],
        kind: CaptureKind,
    ) -> Result<Vec<ExtractedPlayer>> {
        let request = ExtractRequest {
            image: png_data_url(image)?,
            member_names,
            capture_type: kind,
        };
        let response = self.extract_with_retry(&request).await?;
        if !response.success {
            bail!("OCR service returned success=false");
        }
        debug!(count = response.players.len(), "players recognized");
        Ok(response.players)
    }

    /// Reads the castle banner. Empty text comes back as `None`.
    pub async fn extract_castle_name(&self, image: &DynamicImage) -> Result<Option<String>> {
        let request = ExtractRequest {
            image: png_data_url(image)?,
            member_names: &[],
            capture_type: CaptureKind::CastleName,
        };
        let response = self.extract_with_retry(&request).await?;
        Ok(response
            .castle_name
            .filter(|_| response.success)
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty()))
    }

    /// Pings `/health` every `every` so a sleeping host stays up. Runs
    /// `pings` times, or forever when `None`.
    pub async fn warm(&self, every: Duration, pings: Option<u32>) {
        info!(url = %self.base_url, every_secs = every.as_secs(), "keeping OCR service warm");
        let mut ticker = tokio::time::interval(every);
        let mut sent = 0u32;
        loop {
            ticker.tick().await;
            if self.health().await {
                info!("OCR service is warm");
            } else {
                warn!("OCR service did not answer");
            }
            sent += 1;
            if pings.is_some_and(|n| sent >= n) {
                break;
            }
        }
    }

    // *************** Internal Functions ***************

    async fn extract_with_retry(&self, request: &ExtractRequest<'_>) -> Result<ExtractResponse> {
        let mut last_error = None;

        for attempt in 1..=MAX_RETRIES + 1 {
            match self.extract_once(request).await {
                Ok(response) => return Ok(response),
                Err(Failure::Fatal(e)) => return Err(e),
                Err(Failure::Transient(e)) => {
                    warn!(attempt, max = MAX_RETRIES + 1, error = %e, "OCR request failed");
                    last_error = Some(e);
                    if attempt <= MAX_RETRIES {
                        tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS)).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("OCR request failed")))
    }

    async fn extract_once(&self, request: &ExtractRequest<'_>) -> std::result::Result<ExtractResponse, Failure> {
        let response = self
            .client
            .post(format!("{}/extract", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(|e| Failure::Transient(anyhow::Error::new(e).context("Failed to reach OCR service")))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let parsed: ExtractResponse = serde_json::from_str(&body).unwrap_or_default();

        if !status.is_success() {
            let message = parsed.error.unwrap_or(body);
            let err = anyhow::anyhow!("OCR service error {}: {}", status, message);
            return Err(if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                Failure::Transient(err)
            } else {
                Failure::Fatal(err)
            });
        }
        if let Some(error) = parsed.error {
            return Err(Failure::Fatal(anyhow::anyhow!("OCR service error: {}", error)));
        }
        Ok(parsed)
    }
}

impl Recognizer for OcrClient {
    fn base_url(&self) -> &str {
        OcrClient::base_url(self)
    }

    async fn health(&self) -> bool {
        OcrClient::health(self).await
    }

    async fn extract_castle_name(&self, image: &DynamicImage) -> Result<Option<String>> {
        OcrClient::extract_castle_name(self, image).await
    }

    async fn extract_players(
        &self,
        image: &DynamicImage,
        member_names: &[String],
        kind: CaptureKind,
    ) -> Result<Vec<ExtractedPlayer>> {
        OcrClient::extract_players(self, image, member_names, kind).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn test_request_uses_service_field_names() {
        let names = vec!["Aria".to_string()];
        let request = ExtractRequest {
            image: "data:image/png;base64,AAAA".into(),
            member_names: &names,
            capture_type: CaptureKind::CastleName,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["captureType"], "castle-name");
        assert_eq!(json["memberNames"][0], "Aria");
        assert!(json["image"].as_str().unwrap().starts_with("data:image/png;base64,"));

        let kind = serde_json::to_value(CaptureKind::CastleRush).unwrap();
        assert_eq!(kind, "castle-rush");
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{"success": true, "players": [{"playerName": "Aria", "score": 1200000, "match_ratio": 0.9}], "count": 1}"#;
        let parsed: ExtractResponse = serde_json::from_str(body).unwrap();
        assert!(parsed.success);
        assert_eq!(parsed.players[0], ExtractedPlayer { player_name: "Aria".into(), score: 1_200_000 });

        let castle: ExtractResponse = serde_json::from_str(r#"{"success": true, "castle_name": "Fodina"}"#).unwrap();
        assert_eq!(castle.castle_name.as_deref(), Some("Fodina"));

        let failed: ExtractResponse = serde_json::from_str(r#"{"error": "No image provided"}"#).unwrap();
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("No image provided"));
    }

    #[test]
    fn test_png_data_url() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(4, 2));
        let url = png_data_url(&image).unwrap();
        let encoded = url.strip_prefix("data:image/png;base64,").unwrap();
        let bytes = general_purpose::STANDARD.decode(encoded).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }

    #[test]
    fn test_new_trims_trailing_slash() {
        let client = OcrClient::new("http://127.0.0.1:5000/").unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:5000");
        assert!(OcrClient::new("  ").is_err());
    }

    #[tokio::test]
    async fn test_health_is_false_when_unreachable() {
        let client = OcrClient::new("http://127.0.0.1:9").unwrap();
        assert!(!client.health().await);
    }

    #[tokio::test]
    #[ignore = "requires a running OCR service on 127.0.0.1:5000"]
    async fn test_live_health() {
        let client = OcrClient::new("http://127.0.0.1:5000").unwrap();
        assert!(client.health().await);
    }
}
