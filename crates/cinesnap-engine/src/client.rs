use std::env;
use std::io::Cursor;

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use reqwest::blocking::{Client as HttpClient, Request as HttpRequest, Response as HttpResponse};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::artifacts::{encode_data_uri, IMAGE_MIME_TYPE};

pub const IMAGEN_MODEL: &str = "imagen-4.0-generate-001";
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

const API_KEY_HEADER: &str = "x-goog-api-key";
const ERROR_BODY_MAX_CHARS: usize = 512;

/// Failure from the image service, before it is mapped to a user-facing outcome.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{provider} request failed ({status}): {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },
    #[error("{0} returned no images")]
    EmptyResult(String),
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

impl ClientError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Full message text including nested causes.
    pub fn message(&self) -> String {
        match self {
            Self::Transport(err) => error_chain_text(err, ERROR_BODY_MAX_CHARS),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
}

impl GeneratedImage {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Always labelled `image/jpeg`.
    pub fn to_data_uri(&self) -> String {
        encode_data_uri(IMAGE_MIME_TYPE, &self.bytes)
    }
}

pub trait ImageClient: Send + Sync {
    fn name(&self) -> &str;

    fn requires_api_key(&self) -> bool {
        true
    }

    /// One call, first image only. An empty `aspect_ratio` leaves the choice to the service.
    fn generate(
        &self,
        prompt: &str,
        api_key: &str,
        aspect_ratio: &str,
    ) -> Result<GeneratedImage, ClientError>;
}

impl<T: ImageClient + ?Sized> ImageClient for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn requires_api_key(&self) -> bool {
        (**self).requires_api_key()
    }

    fn generate(
        &self,
        prompt: &str,
        api_key: &str,
        aspect_ratio: &str,
    ) -> Result<GeneratedImage, ClientError> {
        (**self).generate(prompt, api_key, aspect_ratio)
    }
}

pub struct ImagenClient {
    api_base: String,
    model: String,
    http: HttpClient,
}

impl ImagenClient {
    pub fn new() -> Self {
        Self::with_api_base(api_base_from_env())
    }

    pub fn with_api_base(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into().trim().trim_end_matches('/').to_string(),
            model: IMAGEN_MODEL.to_string(),
            http: HttpClient::new(),
        }
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn endpoint(&self) -> String {
        format!("{}/models/{}:predict", self.api_base, self.model)
    }

    /// The key travels in a header so it never appears in a URL or in error text.
    fn predict_request(
        &self,
        prompt: &str,
        api_key: &str,
        aspect_ratio: &str,
    ) -> reqwest::Result<HttpRequest> {
        self.http
            .post(self.endpoint())
            .header(API_KEY_HEADER, api_key)
            .json(&Value::Object(build_predict_payload(prompt, aspect_ratio)))
            .build()
    }
}

impl Default for ImagenClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageClient for ImagenClient {
    fn name(&self) -> &str {
        "imagen"
    }

    fn generate(
        &self,
        prompt: &str,
        api_key: &str,
        aspect_ratio: &str,
    ) -> Result<GeneratedImage, ClientError> {
        let endpoint = self.endpoint();
        let request = self
            .predict_request(prompt, api_key, aspect_ratio)
            .map_err(reqwest::Error::without_url)
            .context("Imagen request build failed")?;
        tracing::debug!(%endpoint, aspect_ratio, "sending Imagen predict request");
        let response = self
            .http
            .execute(request)
            .map_err(reqwest::Error::without_url)
            .with_context(|| format!("Imagen request failed ({endpoint})"))?;
        let response_payload = response_json_or_error("Imagen", response)?;
        let images = extract_images(&response_payload)?;
        images
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::EmptyResult("Imagen".to_string()))
    }
}

/// Offline client: a solid-colour JPEG derived from the prompt hash.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryrunClient;

impl ImageClient for DryrunClient {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn requires_api_key(&self) -> bool {
        false
    }

    fn generate(
        &self,
        prompt: &str,
        _api_key: &str,
        aspect_ratio: &str,
    ) -> Result<GeneratedImage, ClientError> {
        let (width, height) = dims_for_aspect_ratio(aspect_ratio, 256);
        let (r, g, b) = color_from_prompt(prompt);
        let mut canvas = RgbImage::new(width, height);
        for pixel in canvas.pixels_mut() {
            *pixel = Rgb([r, g, b]);
        }
        let mut encoded = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(canvas)
            .write_to(&mut encoded, ImageFormat::Jpeg)
            .context("dryrun jpeg encode failed")?;
        Ok(GeneratedImage::new(encoded.into_inner()))
    }
}

pub fn api_base_from_env() -> String {
    non_empty_env("CINESNAP_API_BASE")
        .or_else(|| non_empty_env("GEMINI_API_BASE"))
        .map(|value| value.trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
}

pub fn build_predict_payload(prompt: &str, aspect_ratio: &str) -> Map<String, Value> {
    let mut parameters = Map::new();
    parameters.insert("sampleCount".to_string(), Value::Number(1.into()));
    parameters.insert(
        "outputMimeType".to_string(),
        Value::String(IMAGE_MIME_TYPE.to_string()),
    );
    let aspect_ratio = aspect_ratio.trim();
    if !aspect_ratio.is_empty() {
        parameters.insert(
            "aspectRatio".to_string(),
            Value::String(aspect_ratio.to_string()),
        );
    }
    map_object(json!({
        "instances": [{
            "prompt": prompt,
        }],
        "parameters": parameters,
    }))
}

/// Accepts both the REST `predictions` shape and the SDK-style `generatedImages` shape.
pub fn extract_images(response_payload: &Value) -> Result<Vec<GeneratedImage>, ClientError> {
    let mut out = Vec::new();
    let predictions = response_payload
        .get("predictions")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for row in predictions {
        let Some(encoded) = row
            .get("bytesBase64Encoded")
            .or_else(|| row.get("bytes_base64_encoded"))
            .and_then(Value::as_str)
        else {
            continue;
        };
        let bytes = BASE64
            .decode(encoded.as_bytes())
            .context("Imagen image base64 decode failed")?;
        out.push(GeneratedImage::new(bytes));
    }

    let generated = response_payload
        .get("generatedImages")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for row in generated {
        let Some(encoded) = row
            .get("image")
            .and_then(|image| image.get("imageBytes"))
            .and_then(Value::as_str)
        else {
            continue;
        };
        let bytes = BASE64
            .decode(encoded.as_bytes())
            .context("Imagen generated image base64 decode failed")?;
        out.push(GeneratedImage::new(bytes));
    }
    Ok(out)
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value, ClientError> {
    let status = response.status();
    let body = response
        .text()
        .map_err(reqwest::Error::without_url)
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        return Err(ClientError::Status {
            provider: provider.to_string(),
            status: status.as_u16(),
            body: truncate_text(&body, ERROR_BODY_MAX_CHARS),
        });
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn dims_for_aspect_ratio(aspect_ratio: &str, long_side: u32) -> (u32, u32) {
    let parsed = aspect_ratio.trim().split_once(':').and_then(|(w, h)| {
        let w = w.trim().parse::<u32>().ok().filter(|value| *value > 0)?;
        let h = h.trim().parse::<u32>().ok().filter(|value| *value > 0)?;
        Some((w, h))
    });
    let Some((w, h)) = parsed else {
        return (long_side, long_side);
    };
    if w >= h {
        (long_side, (long_side * h / w).max(1))
    } else {
        ((long_side * w / h).max(1), long_side)
    }
}

fn color_from_prompt(prompt: &str) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

pub fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts.last().is_some_and(|existing| existing == trimmed) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use base64::Engine as _;
    use serde_json::json;

    use super::{
        build_predict_payload, dims_for_aspect_ratio, error_chain_text, extract_images,
        ClientError, DryrunClient, GeneratedImage, ImageClient, ImagenClient, API_KEY_HEADER,
        BASE64,
    };

    #[test]
    fn api_key_is_sent_as_header_not_query() -> anyhow::Result<()> {
        let client = ImagenClient::with_api_base("https://example.test/v1beta");
        let request = client.predict_request("a cat", "SECRET-KEY-123", "1:1")?;
        assert_eq!(request.url().query(), None);
        assert!(!request.url().as_str().contains("SECRET-KEY-123"));
        assert_eq!(
            request
                .headers()
                .get(API_KEY_HEADER)
                .and_then(|value| value.to_str().ok()),
            Some("SECRET-KEY-123")
        );
        Ok(())
    }

    #[test]
    fn connection_failure_does_not_reveal_api_key() {
        let client = ImagenClient::with_api_base("http://127.0.0.1:1/v1beta");
        let Err(err) = client.generate("a cat", "SECRET-KEY-123", "16:9") else {
            panic!("closed port should fail");
        };
        let message = err.message();
        assert!(!message.contains("SECRET-KEY-123"), "leaked key: {message}");
        assert!(message.contains("Imagen request failed"));
    }

    #[test]
    fn payload_includes_aspect_ratio_only_when_given() {
        let with_ratio = build_predict_payload("a cat", "9:16");
        assert_eq!(with_ratio["instances"][0]["prompt"], json!("a cat"));
        assert_eq!(with_ratio["parameters"]["aspectRatio"], json!("9:16"));
        assert_eq!(with_ratio["parameters"]["sampleCount"], json!(1));
        assert_eq!(
            with_ratio["parameters"]["outputMimeType"],
            json!("image/jpeg")
        );

        let without = build_predict_payload("a cat", "  ");
        assert!(without["parameters"].get("aspectRatio").is_none());
    }

    #[test]
    fn extract_reads_predictions_and_generated_images() -> anyhow::Result<()> {
        let payload = json!({
            "predictions": [
                {"bytesBase64Encoded": BASE64.encode(b"first"), "mimeType": "image/jpeg"},
                {"raiFilteredReason": "blocked"}
            ],
            "generatedImages": [
                {"image": {"imageBytes": BASE64.encode(b"second")}}
            ]
        });
        let images = extract_images(&payload)?;
        assert_eq!(
            images,
            vec![
                GeneratedImage::new(b"first".to_vec()),
                GeneratedImage::new(b"second".to_vec())
            ]
        );
        Ok(())
    }

    #[test]
    fn extract_from_filtered_response_is_empty() -> anyhow::Result<()> {
        let images = extract_images(&json!({"predictions": []}))?;
        assert!(images.is_empty());
        let images = extract_images(&json!({}))?;
        assert!(images.is_empty());
        Ok(())
    }

    #[test]
    fn extract_rejects_invalid_base64() {
        let err = extract_images(&json!({"predictions": [{"bytesBase64Encoded": "***"}]}))
            .err()
            .map(|err| err.message())
            .unwrap_or_default();
        assert!(err.contains("base64 decode failed"), "{err}");
    }

    #[test]
    fn data_uri_uses_jpeg_mime() {
        let image = GeneratedImage::new(vec![1, 2, 3]);
        assert_eq!(image.to_data_uri(), "data:image/jpeg;base64,AQID");
    }

    #[test]
    fn endpoint_uses_fixed_model_and_trimmed_base() {
        let client = ImagenClient::with_api_base("https://example.test/v1beta/");
        assert_eq!(
            client.endpoint(),
            "https://example.test/v1beta/models/imagen-4.0-generate-001:predict"
        );
    }

    #[test]
    fn status_error_reports_code_and_body() {
        let err = ClientError::Status {
            provider: "Imagen".to_string(),
            status: 400,
            body: "API key not valid. reason: API_KEY_INVALID".to_string(),
        };
        assert_eq!(err.status_code(), Some(400));
        assert_eq!(
            err.message(),
            "Imagen request failed (400): API key not valid. reason: API_KEY_INVALID"
        );
    }

    #[test]
    fn transport_message_includes_causes() {
        let err = ClientError::from(
            anyhow::anyhow!("connection reset").context("Imagen request failed (x)"),
        );
        assert_eq!(
            err.message(),
            "Imagen request failed (x) | caused by: connection reset"
        );
        let nested = anyhow::anyhow!("inner").context("outer");
        assert_eq!(error_chain_text(&nested, 8), "outer | …");
    }

    #[test]
    fn dryrun_produces_decodable_jpeg_with_ratio() -> anyhow::Result<()> {
        let image = DryrunClient.generate("a cat", "", "16:9")?;
        let decoded = image::load_from_memory(&image.bytes)?;
        assert_eq!((decoded.width(), decoded.height()), (256, 144));
        assert!(!DryrunClient.requires_api_key());
        Ok(())
    }

    #[test]
    fn aspect_ratio_dimensions() {
        assert_eq!(dims_for_aspect_ratio("1:1", 256), (256, 256));
        assert_eq!(dims_for_aspect_ratio("9:16", 256), (144, 256));
        assert_eq!(dims_for_aspect_ratio("", 256), (256, 256));
        assert_eq!(dims_for_aspect_ratio("0:3", 256), (256, 256));
    }
}
