use image::GenericImageView;
use serde::{Deserialize, Deserializer};
use tracing::{debug, info};

use super::annotate::ImageAnnotator;
use super::DetectionStrategy;
use crate::config::RemoteApiConfig;
use crate::error::{DetectionError, Result};
use crate::models::{BoundingBox, DetectedTile, DetectionResult, RawImage};

/// Remote predictions below this confidence are discarded
pub const MIN_REMOTE_CONFIDENCE: f32 = 0.85;

#[derive(Debug, Clone, Deserialize)]
pub struct RemotePrediction {
    /// Box center
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    #[serde(rename = "class")]
    pub class_name: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RemoteImageSize {
    #[serde(deserialize_with = "number_or_string")]
    pub width: f32,
    #[serde(deserialize_with = "number_or_string")]
    pub height: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteResponse {
    #[serde(default)]
    pub predictions: Vec<RemotePrediction>,
    pub image: Option<RemoteImageSize>,
}

// The hosted API reports image sizes either as numbers or as numeric strings
fn number_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<f32, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n
            .as_f64()
            .map(|v| v as f32)
            .ok_or_else(|| serde::de::Error::custom("image size out of range")),
        serde_json::Value::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
        other => Err(serde::de::Error::custom(format!("expected image size, got {}", other))),
    }
}

/// `"pip-<N>"` class names carry the pip count of one half
pub fn parse_pip_class(class_name: &str) -> Option<u32> {
    class_name.trim().strip_prefix("pip-")?.parse().ok()
}

/// Turn a remote response into single-half tiles in source-image pixels.
///
/// Each prediction is one domino half: `right_pips` stays 0.
pub fn tiles_from_response(response: &RemoteResponse, source_width: u32, source_height: u32) -> Vec<DetectedTile> {
    // Predictions are relative to the size the service saw
    let (sx, sy) = match response.image {
        Some(size) if size.width > 0.0 && size.height > 0.0 => (
            source_width as f32 / size.width,
            source_height as f32 / size.height,
        ),
        _ => (1.0, 1.0),
    };

    response
        .predictions
        .iter()
        .filter(|p| p.confidence >= MIN_REMOTE_CONFIDENCE)
        .filter_map(|p| {
            let bbox = BoundingBox::from_center(p.x * sx, p.y * sy, p.width * sx, p.height * sy)?;
            let rotation = if bbox.is_portrait() { 90.0 } else { 0.0 };
            let pips = parse_pip_class(&p.class_name).unwrap_or(0);
            Some(
                DetectedTile::new(bbox.with_rotation(rotation), p.confidence)
                    .with_pips(pips, 0),
            )
        })
        .collect()
}

/// Sends the photo to a hosted inference service
pub struct RemoteApiStrategy {
    config: RemoteApiConfig,
    annotator: ImageAnnotator,
}

impl RemoteApiStrategy {
    pub fn new(config: RemoteApiConfig) -> Result<Self> {
        Ok(Self {
            config,
            annotator: ImageAnnotator::new()?,
        })
    }

    fn request(&self, payload: &str) -> Result<RemoteResponse> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| DetectionError::InferenceFailed("remote API key is not configured".to_string()))?;

        let url = self.config.url();
        debug!(%url, payload_bytes = payload.len(), "Posting image to remote API");

        let response = ureq::post(&url)
            .query("api_key", api_key)
            .set("Content-Type", "application/x-www-form-urlencoded")
            .timeout(self.config.timeout)
            .send_string(payload);

        match response {
            Ok(response) => response
                .into_json::<RemoteResponse>()
                .map_err(|e| DetectionError::InferenceFailed(format!("malformed remote response: {}", e))),
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                Err(DetectionError::InferenceFailed(format!(
                    "remote API returned {}: {}",
                    code,
                    body.trim()
                )))
            }
            Err(e) => Err(DetectionError::InferenceFailed(format!("remote API unreachable: {}", e))),
        }
    }
}

impl DetectionStrategy for RemoteApiStrategy {
    fn detect_and_annotate(&self, image: &RawImage) -> Result<DetectionResult> {
        let decoded = image.decode()?;
        let (width, height) = decoded.dimensions();

        let payload = image.to_base64()?;
        let response = self.request(&payload)?;
        let tiles = tiles_from_response(&response, width, height);
        info!(
            predictions = response.predictions.len(),
            tiles = tiles.len(),
            "Remote API detection finished"
        );

        let total = crate::models::total_score(&tiles);
        let annotated = self
            .annotator
            .annotate_image_with_summary(&decoded, &tiles, total)?;
        Ok(DetectionResult::from_tiles(tiles, annotated))
    }

    fn preload(&self) -> Result<()> {
        // Nothing to load locally; just check that a request could be made
        match &self.config.api_key {
            Some(key) if !key.is_empty() => Ok(()),
            _ => Err(DetectionError::InferenceFailed("remote API key is not configured".to_string())),
        }
    }

    fn name(&self) -> &str {
        "Remote API"
    }
}
