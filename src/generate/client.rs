//! Text-to-image backend client.
//!
//! [`GenerationClient`] maps a [`GenerateConfig`] onto the backend's
//! `txt2img` call and decodes the base64 images it returns.

use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::error::GenerationError;
use crate::download::RetryHttpClient;
use crate::task::GenerateConfig;

/// Path of the batch generation endpoint.
const TXT2IMG_PATH: &str = "/sdapi/v1/txt2img";

#[derive(Debug, Serialize)]
struct Txt2ImgRequest<'a> {
    prompt: String,
    negative_prompt: &'a str,
    steps: u32,
    cfg_scale: f64,
    width: u32,
    height: u32,
    seed: i64,
    sampler_name: &'a str,
    batch_size: u32,
    n_iter: u32,
    enable_hr: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    override_settings: Option<OverrideSettings<'a>>,
}

#[derive(Debug, Serialize)]
struct OverrideSettings<'a> {
    sd_model_checkpoint: &'a str,
}

#[derive(Debug, Deserialize)]
struct Txt2ImgResponse {
    #[serde(default)]
    images: Vec<String>,
    #[serde(default)]
    info: serde_json::Value,
}

/// Decoded result of one generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedBatch {
    /// Encoded image files (PNG from the backend), in batch order.
    pub images: Vec<Vec<u8>>,
    /// Backend metadata (seeds, parameters) as returned.
    pub info: serde_json::Value,
}

/// Client for one generation backend.
#[derive(Clone)]
pub struct GenerationClient {
    http: RetryHttpClient,
    base_url: String,
}

impl std::fmt::Debug for GenerationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GenerationClient {
    /// Creates a client for the backend at `base_url`.
    #[must_use]
    pub fn new(http: RetryHttpClient, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    /// Runs one batch.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError::Request`] on transport failure,
    /// [`GenerationError::HttpStatus`] on a non-2xx answer, and
    /// [`GenerationError::Decode`] or [`GenerationError::InvalidImage`] when
    /// the response cannot be decoded.
    #[instrument(skip(self, config), fields(steps = config.steps, batch_size = config.batch_size))]
    pub async fn generate(&self, config: &GenerateConfig) -> Result<GeneratedBatch, GenerationError> {
        let url = format!("{}{TXT2IMG_PATH}", self.base_url);
        let payload = build_request(config);
        let request = self.http.create_json_request(&url, &payload)?;
        let response = self.http.execute_with_retry(request).await?;

        let status = response.status();
        let text = response.text().await.map_err(|e| GenerationError::Decode {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        if !status.is_success() {
            return Err(GenerationError::http_status(&url, status.as_u16(), &text));
        }

        let parsed: Txt2ImgResponse =
            serde_json::from_str(&text).map_err(|e| GenerationError::Decode {
                url: url.clone(),
                reason: e.to_string(),
            })?;
        let images = parsed
            .images
            .iter()
            .enumerate()
            .map(|(index, encoded)| decode_image(index, encoded))
            .collect::<Result<Vec<_>, _>>()?;
        info!(images = images.len(), "generation batch received");

        Ok(GeneratedBatch {
            images,
            info: normalize_info(parsed.info),
        })
    }
}

/// Writes each image as `gen_{index}.png` under `dir`, creating it if needed.
///
/// # Errors
///
/// Returns [`GenerationError::Io`] naming the path that could not be written.
pub async fn save_images(images: &[Vec<u8>], dir: &Path) -> Result<Vec<PathBuf>, GenerationError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| GenerationError::io(dir, e))?;

    let mut saved = Vec::with_capacity(images.len());
    for (index, bytes) in images.iter().enumerate() {
        let path = dir.join(format!("gen_{index}.png"));
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| GenerationError::io(&path, e))?;
        debug!(path = %path.display(), bytes = bytes.len(), "image saved");
        saved.push(path);
    }
    Ok(saved)
}

/// Prompt with each LoRA overlay appended as `<lora:name:weight>`.
#[must_use]
pub fn render_prompt(config: &GenerateConfig) -> String {
    let mut prompt = config.prompt.trim().to_string();
    for lora in &config.loras {
        prompt.push_str(&format!(" <lora:{}:{}>", lora.name.trim(), lora.weight));
    }
    prompt
}

fn build_request(config: &GenerateConfig) -> Txt2ImgRequest<'_> {
    let model = config.model.trim();
    Txt2ImgRequest {
        prompt: render_prompt(config),
        negative_prompt: &config.negative_prompt,
        steps: config.steps,
        cfg_scale: config.cfg_scale,
        width: config.width,
        height: config.height,
        seed: config.seed,
        sampler_name: &config.sampler,
        batch_size: config.batch_size,
        n_iter: 1,
        enable_hr: config.enable_hr,
        override_settings: (!model.is_empty()).then_some(OverrideSettings {
            sd_model_checkpoint: model,
        }),
    }
}

fn decode_image(index: usize, encoded: &str) -> Result<Vec<u8>, GenerationError> {
    // Some backends prefix a data URL header.
    let data = encoded
        .split_once("base64,")
        .map_or(encoded, |(_, data)| data);
    STANDARD
        .decode(data.trim())
        .map_err(|e| GenerationError::InvalidImage {
            index,
            reason: e.to_string(),
        })
}

/// The backend sends `info` as a JSON document inside a string.
fn normalize_info(info: serde_json::Value) -> serde_json::Value {
    match info {
        serde_json::Value::String(raw) => {
            serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw))
        }
        other => other,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::task::LoraOverlay;

    fn config() -> GenerateConfig {
        serde_json::from_value(serde_json::json!({"prompt": "a lighthouse"})).unwrap()
    }

    #[test]
    fn test_render_prompt_appends_loras() {
        let mut config = config();
        config.loras = vec![
            LoraOverlay {
                name: "watercolor".into(),
                weight: 0.8,
            },
            LoraOverlay {
                name: "detail".into(),
                weight: 1.0,
            },
        ];
        assert_eq!(
            render_prompt(&config),
            "a lighthouse <lora:watercolor:0.8> <lora:detail:1>"
        );
    }

    #[test]
    fn test_request_payload_fields() {
        let mut config = config();
        let json = serde_json::to_value(build_request(&config)).unwrap();
        assert_eq!(json["steps"], 20);
        assert_eq!(json["sampler_name"], "Euler a");
        assert_eq!(json["seed"], -1);
        assert!(json.get("override_settings").is_none());

        config.model = "sdxl_base.safetensors".into();
        let json = serde_json::to_value(build_request(&config)).unwrap();
        assert_eq!(
            json["override_settings"]["sd_model_checkpoint"],
            "sdxl_base.safetensors"
        );
    }

    #[test]
    fn test_decode_image_accepts_data_url() {
        let encoded = STANDARD.encode(b"\x89PNG");
        assert_eq!(decode_image(0, &encoded).unwrap(), b"\x89PNG");
        let data_url = format!("data:image/png;base64,{encoded}");
        assert_eq!(decode_image(0, &data_url).unwrap(), b"\x89PNG");
        assert!(matches!(
            decode_image(3, "not base64!!"),
            Err(GenerationError::InvalidImage { index: 3, .. })
        ));
    }

    #[test]
    fn test_normalize_info_parses_embedded_json() {
        let info = normalize_info(serde_json::Value::String(r#"{"seed": 42}"#.into()));
        assert_eq!(info["seed"], 42);
        let opaque = normalize_info(serde_json::Value::String("plain".into()));
        assert_eq!(opaque, "plain");
    }

    #[tokio::test]
    async fn test_save_images_names_by_index() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("task_t1");
        let saved = save_images(&[b"a".to_vec(), b"b".to_vec()], &target)
            .await
            .unwrap();
        assert_eq!(saved, vec![target.join("gen_0.png"), target.join("gen_1.png")]);
        assert_eq!(std::fs::read(&saved[1]).unwrap(), b"b");
    }
}
