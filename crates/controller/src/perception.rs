//! Perception service adapter
//!
//! Sends a screenshot to the vision service and converts its raw
//! detections into usable `UiElement`s. Coordinates arrive normalized
//! to 0..1 and are denormalized against the screenshot's own pixel
//! dimensions; a fixed resolution is only the fallback when the image
//! cannot be decoded.

use base64::{engine::general_purpose, Engine as _};
use playtest_common::{Error, Result, UiElement};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

const PARSE_TIMEOUT: Duration = Duration::from_secs(60);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolution assumed when the screenshot cannot be decoded.
const FALLBACK_RESOLUTION: (u32, u32) = (1920, 1080);

/// Element types always kept even without text or interactivity.
const VISUAL_ELEMENT_TYPES: &[&str] = &["icon", "image", "graphic", "button"];

/// Minimum denormalized size for keeping an otherwise-anonymous element.
const MIN_WIDTH_PX: i32 = 30;
const MIN_HEIGHT_PX: i32 = 15;

#[derive(Serialize)]
struct ParseRequest {
    base64_image: String,
}

#[derive(Debug, Deserialize)]
struct ParseResponse {
    #[serde(default)]
    parsed_content_list: Vec<RawElement>,
    som_image_base64: Option<String>,
    latency: Option<f64>,
}

/// One raw detection as the service reports it.
#[derive(Debug, Clone, Deserialize)]
pub struct RawElement {
    /// Normalized [x1, y1, x2, y2] in 0..1.
    pub bbox: Option<[f64; 4]>,
    #[serde(default)]
    pub interactivity: bool,
    #[serde(rename = "type", default = "unknown_type")]
    pub element_type: String,
    #[serde(default)]
    pub content: String,
}

fn unknown_type() -> String {
    "unknown".to_string()
}

/// A completed detection pass over one screenshot.
#[derive(Debug)]
pub struct Detection {
    /// Usable elements in the service's return order.
    pub elements: Vec<UiElement>,
    /// Server-side annotated screenshot, when provided.
    pub annotated_png: Option<Vec<u8>>,
    /// Server-reported processing time in seconds.
    pub latency: Option<f64>,
    /// Response JSON with the base64 annotation stripped, for artifacts.
    pub raw: serde_json::Value,
}

/// Client for the perception (vision model) HTTP service.
pub struct PerceptionClient {
    http: reqwest::Client,
    base_url: String,
}

impl PerceptionClient {
    /// Create a client and probe the service.
    ///
    /// The probe is advisory: perception being down at startup is worth
    /// a warning, but the first detection call will surface it anyway.
    pub async fn connect(base_url: &str) -> Self {
        let client = Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        };
        match client
            .http
            .get(format!("{}/probe", client.base_url))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(r) if r.status().is_success() => {
                info!("Connected to perception service at {}", client.base_url)
            }
            Ok(r) => warn!("Perception probe returned {}", r.status()),
            Err(e) => warn!("Perception service not reachable yet: {}", e),
        }
        client
    }

    /// Detect UI elements on a PNG screenshot.
    pub async fn detect(&self, screenshot_png: &[u8]) -> Result<Detection> {
        let (width, height) = match image::load_from_memory(screenshot_png) {
            Ok(img) => (img.width(), img.height()),
            Err(e) => {
                warn!(
                    "Cannot decode screenshot ({}); assuming {}x{}",
                    e, FALLBACK_RESOLUTION.0, FALLBACK_RESOLUTION.1
                );
                FALLBACK_RESOLUTION
            }
        };

        let request = ParseRequest {
            base64_image: general_purpose::STANDARD.encode(screenshot_png),
        };
        let response = self
            .http
            .post(format!("{}/parse/", self.base_url))
            .timeout(PARSE_TIMEOUT)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    Error::Connectivity(format!("perception service: {}", e))
                } else {
                    Error::Perception(e.to_string())
                }
            })?;
        if !response.status().is_success() {
            return Err(Error::Perception(format!(
                "parse request failed: {}",
                response.status()
            )));
        }

        let mut raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Perception(format!("invalid response: {}", e)))?;
        let parsed: ParseResponse = serde_json::from_value(raw.clone())
            .map_err(|e| Error::Perception(format!("invalid response shape: {}", e)))?;

        if let Some(latency) = parsed.latency {
            info!("Perception processing time: {:.2}s", latency);
        }

        let elements = filter_elements(&parsed.parsed_content_list, width, height);
        info!(
            "Perception returned {} items, {} usable elements",
            parsed.parsed_content_list.len(),
            elements.len()
        );
        for (i, e) in elements.iter().enumerate() {
            debug!(
                "  [{}] {} at ({},{},{}x{}): '{}'",
                i + 1,
                e.element_type,
                e.x,
                e.y,
                e.width,
                e.height,
                e.element_text
            );
        }

        let annotated_png = parsed
            .som_image_base64
            .as_deref()
            .and_then(|b64| match general_purpose::STANDARD.decode(b64) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!("Cannot decode server annotation: {}", e);
                    None
                }
            });

        // Strip the heavyweight annotation payload from the saved copy.
        if let Some(map) = raw.as_object_mut() {
            if map.remove("som_image_base64").is_some() {
                map.insert("som_image_base64_present".to_string(), true.into());
            }
        }

        Ok(Detection {
            elements,
            annotated_png,
            latency: parsed.latency,
            raw,
        })
    }
}

/// Inclusion filter over raw detections.
///
/// Keep an element if it is interactive, OR carries text content, OR is
/// a visual element type, OR its denormalized geometry is big enough to
/// matter; everything else is dropped.
pub fn filter_elements(raw: &[RawElement], width: u32, height: u32) -> Vec<UiElement> {
    let mut elements = Vec::new();
    for element in raw {
        let Some([x1, y1, x2, y2]) = element.bbox else {
            continue;
        };
        let abs_x1 = (x1 * width as f64) as i32;
        let abs_y1 = (y1 * height as f64) as i32;
        let abs_x2 = (x2 * width as f64) as i32;
        let abs_y2 = (y2 * height as f64) as i32;
        let (w, h) = (abs_x2 - abs_x1, abs_y2 - abs_y1);

        let content = element.content.trim();
        let include = element.interactivity
            || !content.is_empty()
            || VISUAL_ELEMENT_TYPES.contains(&element.element_type.as_str())
            || (w > MIN_WIDTH_PX && h > MIN_HEIGHT_PX);
        if !include {
            continue;
        }

        elements.push(UiElement {
            x: abs_x1,
            y: abs_y1,
            width: w,
            height: h,
            confidence: 1.0,
            element_type: element.element_type.clone(),
            element_text: content.to_string(),
        });
    }
    elements
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(
        bbox: [f64; 4],
        interactivity: bool,
        element_type: &str,
        content: &str,
    ) -> RawElement {
        RawElement {
            bbox: Some(bbox),
            interactivity,
            element_type: element_type.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_interactive_without_text_included() {
        let elements = filter_elements(
            &[raw([0.0, 0.0, 0.01, 0.01], true, "unknown", "")],
            1920,
            1080,
        );
        assert_eq!(elements.len(), 1);
    }

    #[test]
    fn test_small_silent_label_excluded() {
        // 10x10 px, no interactivity, no content, not a visual type.
        let bbox = [0.0, 0.0, 10.0 / 1920.0, 10.0 / 1080.0];
        let elements = filter_elements(&[raw(bbox, false, "label", "")], 1920, 1080);
        assert!(elements.is_empty());
    }

    #[test]
    fn test_visual_type_included_without_text() {
        let elements = filter_elements(
            &[raw([0.0, 0.0, 0.01, 0.01], false, "icon", "")],
            1920,
            1080,
        );
        assert_eq!(elements.len(), 1);
    }

    #[test]
    fn test_large_anonymous_element_included() {
        // 40x20 px exceeds the 30x15 size threshold.
        let bbox = [0.0, 0.0, 40.0 / 1920.0, 20.0 / 1080.0];
        let elements = filter_elements(&[raw(bbox, false, "container", "")], 1920, 1080);
        assert_eq!(elements.len(), 1);
    }

    #[test]
    fn test_missing_bbox_skipped() {
        let element = RawElement {
            bbox: None,
            interactivity: true,
            element_type: "button".to_string(),
            content: "Play".to_string(),
        };
        assert!(filter_elements(&[element], 1920, 1080).is_empty());
    }

    #[test]
    fn test_denormalization_and_center() {
        let elements = filter_elements(
            &[raw([0.4, 0.4, 0.5, 0.45], true, "button", "Play")],
            1920,
            1080,
        );
        assert_eq!(elements.len(), 1);
        let e = &elements[0];
        assert_eq!((e.x, e.y, e.width, e.height), (768, 432, 192, 54));
        assert_eq!(e.center(), (864, 459));
    }

    #[test]
    fn test_order_preserved() {
        let elements = filter_elements(
            &[
                raw([0.0, 0.0, 0.1, 0.1], true, "button", "Second"),
                raw([0.5, 0.5, 0.6, 0.6], true, "button", "First"),
            ],
            1000,
            1000,
        );
        assert_eq!(elements[0].element_text, "Second");
        assert_eq!(elements[1].element_text, "First");
    }
}
