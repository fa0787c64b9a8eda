use crate::error::{ImageGenError, Result};
use crate::models::Backend;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;

/// Request parameters actually applied by a backend, keyed by parameter name.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "16:9")]
    Ratio16x9,
    #[serde(rename = "3:2")]
    Ratio3x2,
    #[serde(rename = "1:1")]
    Ratio1x1,
    #[serde(rename = "2:3")]
    Ratio2x3,
    #[serde(rename = "9:16")]
    Ratio9x16,
    #[serde(rename = "4:3")]
    Ratio4x3,
    #[serde(rename = "3:4")]
    Ratio3x4,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Ratio16x9 => "16:9",
            AspectRatio::Ratio3x2 => "3:2",
            AspectRatio::Ratio1x1 => "1:1",
            AspectRatio::Ratio2x3 => "2:3",
            AspectRatio::Ratio9x16 => "9:16",
            AspectRatio::Ratio4x3 => "4:3",
            AspectRatio::Ratio3x4 => "3:4",
        }
    }

    /// Ratios each backend accepts, in presentation order.
    pub fn supported_by(backend: Backend) -> &'static [AspectRatio] {
        match backend {
            Backend::Replicate => &[
                AspectRatio::Ratio16x9,
                AspectRatio::Ratio3x2,
                AspectRatio::Ratio1x1,
                AspectRatio::Ratio2x3,
            ],
            Backend::Vertex => &[
                AspectRatio::Ratio16x9,
                AspectRatio::Ratio1x1,
                AspectRatio::Ratio9x16,
                AspectRatio::Ratio4x3,
                AspectRatio::Ratio3x4,
            ],
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = ImageGenError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "16:9" => Ok(AspectRatio::Ratio16x9),
            "3:2" => Ok(AspectRatio::Ratio3x2),
            "1:1" => Ok(AspectRatio::Ratio1x1),
            "2:3" => Ok(AspectRatio::Ratio2x3),
            "9:16" => Ok(AspectRatio::Ratio9x16),
            "4:3" => Ok(AspectRatio::Ratio4x3),
            "3:4" => Ok(AspectRatio::Ratio3x4),
            other => Err(ImageGenError::InvalidRequest(format!(
                "unknown aspect ratio '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Png,
    Jpg,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpg => "jpg",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpg => "image/jpeg",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = ImageGenError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(OutputFormat::Png),
            "jpg" | "jpeg" => Ok(OutputFormat::Jpg),
            other => Err(ImageGenError::InvalidRequest(format!(
                "unsupported output format '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicateParams {
    pub aspect_ratio: AspectRatio,
    pub output_format: OutputFormat,
    /// 0 (strict) to 3 (permissive), forwarded as `safety_tolerance`.
    pub safety_tolerance: u8,
    pub image_prompt_strength: f64,
    pub raw: bool,
}

impl Default for ReplicateParams {
    fn default() -> Self {
        Self {
            aspect_ratio: AspectRatio::Ratio16x9,
            output_format: OutputFormat::Png,
            safety_tolerance: 2,
            image_prompt_strength: 0.1,
            raw: false,
        }
    }
}

impl ReplicateParams {
    pub fn with_aspect_ratio(mut self, aspect_ratio: AspectRatio) -> Self {
        self.aspect_ratio = aspect_ratio;
        self
    }

    pub fn with_output_format(mut self, output_format: OutputFormat) -> Self {
        self.output_format = output_format;
        self
    }

    pub fn with_safety_tolerance(mut self, safety_tolerance: u8) -> Self {
        self.safety_tolerance = safety_tolerance;
        self
    }

    pub fn with_image_prompt_strength(mut self, strength: f64) -> Self {
        self.image_prompt_strength = strength;
        self
    }

    pub fn with_raw(mut self, raw: bool) -> Self {
        self.raw = raw;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VertexParams {
    pub aspect_ratio: AspectRatio,
    /// Upper bound is model specific and left to the backend.
    pub number_of_images: u32,
}

impl Default for VertexParams {
    fn default() -> Self {
        Self {
            aspect_ratio: AspectRatio::Ratio16x9,
            number_of_images: 1,
        }
    }
}

impl VertexParams {
    pub fn with_aspect_ratio(mut self, aspect_ratio: AspectRatio) -> Self {
        self.aspect_ratio = aspect_ratio;
        self
    }

    pub fn with_number_of_images(mut self, number_of_images: u32) -> Self {
        self.number_of_images = number_of_images;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum BackendParams {
    Replicate(ReplicateParams),
    Vertex(VertexParams),
}

impl BackendParams {
    pub fn backend(&self) -> Backend {
        match self {
            BackendParams::Replicate(_) => Backend::Replicate,
            BackendParams::Vertex(_) => Backend::Vertex,
        }
    }

    pub fn aspect_ratio(&self) -> AspectRatio {
        match self {
            BackendParams::Replicate(p) => p.aspect_ratio,
            BackendParams::Vertex(p) => p.aspect_ratio,
        }
    }
}

/// A validated prompt plus the parameters for exactly one backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    prompt: String,
    model_path: String,
    params: BackendParams,
}

impl GenerationRequest {
    pub fn replicate(
        prompt: impl Into<String>,
        model_path: impl Into<String>,
        params: ReplicateParams,
    ) -> Result<Self> {
        Self::new(prompt, model_path, BackendParams::Replicate(params))
    }

    pub fn vertex(
        prompt: impl Into<String>,
        model_path: impl Into<String>,
        params: VertexParams,
    ) -> Result<Self> {
        Self::new(prompt, model_path, BackendParams::Vertex(params))
    }

    pub fn new(
        prompt: impl Into<String>,
        model_path: impl Into<String>,
        params: BackendParams,
    ) -> Result<Self> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(ImageGenError::InvalidRequest("prompt must not be empty".into()));
        }

        let backend = params.backend();
        let aspect_ratio = params.aspect_ratio();
        if !AspectRatio::supported_by(backend).contains(&aspect_ratio) {
            return Err(ImageGenError::InvalidRequest(format!(
                "aspect ratio {} is not supported by {}",
                aspect_ratio, backend
            )));
        }

        match &params {
            BackendParams::Replicate(p) => {
                if p.safety_tolerance > 3 {
                    return Err(ImageGenError::InvalidRequest(format!(
                        "safety tolerance must be between 0 and 3, got {}",
                        p.safety_tolerance
                    )));
                }
                if !(0.0..=1.0).contains(&p.image_prompt_strength) {
                    return Err(ImageGenError::InvalidRequest(format!(
                        "image prompt strength must be between 0 and 1, got {}",
                        p.image_prompt_strength
                    )));
                }
            }
            BackendParams::Vertex(p) => {
                if p.number_of_images == 0 {
                    return Err(ImageGenError::InvalidRequest(
                        "number of images must be at least 1".into(),
                    ));
                }
            }
        }

        Ok(Self {
            prompt,
            model_path: model_path.into(),
            params,
        })
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn model_path(&self) -> &str {
        &self.model_path
    }

    pub fn params(&self) -> &BackendParams {
        &self.params
    }

    pub fn backend(&self) -> Backend {
        self.params.backend()
    }

    /// The prompt and parameters as they are sent, keyed the way results report them.
    pub fn metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("prompt".into(), json!(self.prompt));
        metadata.insert("aspect_ratio".into(), json!(self.params.aspect_ratio().as_str()));
        match &self.params {
            BackendParams::Replicate(p) => {
                metadata.insert("output_format".into(), json!(p.output_format.as_str()));
                metadata.insert("safety_tolerance".into(), json!(p.safety_tolerance));
                metadata.insert("image_prompt_strength".into(), json!(p.image_prompt_strength));
            }
            BackendParams::Vertex(p) => {
                metadata.insert("number_of_images".into(), json!(p.number_of_images));
                metadata.insert("model".into(), json!(self.model_path));
            }
        }
        metadata
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub status: GenerationStatus,
    pub images: Vec<ImageArtifact>,
    pub model_path: String,
    pub metadata: Metadata,
}

impl GenerationResult {
    /// A successful result always carries at least one image.
    pub fn success(
        backend: Backend,
        model_path: impl Into<String>,
        images: Vec<ImageArtifact>,
        metadata: Metadata,
    ) -> Result<Self> {
        if images.is_empty() {
            return Err(ImageGenError::backend(backend, "No images generated"));
        }
        Ok(Self {
            status: GenerationStatus::Success,
            images,
            model_path: model_path.into(),
            metadata,
        })
    }

    pub fn failure(model_path: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            status: GenerationStatus::Failure,
            images: Vec::new(),
            model_path: model_path.into(),
            metadata,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == GenerationStatus::Success
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactEncoding {
    RemoteUrl,
    InlineBase64,
}

/// One generated image exactly as the backend delivered it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageArtifact {
    pub encoding: ArtifactEncoding,
    pub payload: String,
    pub mime_format: OutputFormat,
}

impl ImageArtifact {
    pub fn remote(url: impl Into<String>, format: OutputFormat) -> Self {
        Self {
            encoding: ArtifactEncoding::RemoteUrl,
            payload: url.into(),
            mime_format: format,
        }
    }

    pub fn inline(bytes: &[u8], format: OutputFormat) -> Self {
        Self {
            encoding: ArtifactEncoding::InlineBase64,
            payload: STANDARD.encode(bytes),
            mime_format: format,
        }
    }

    pub fn is_remote(&self) -> bool {
        self.encoding == ArtifactEncoding::RemoteUrl
    }

    /// Decodes an inline payload. Remote artifacts must be fetched instead.
    pub fn decode_inline(&self) -> Result<Vec<u8>> {
        match self.encoding {
            ArtifactEncoding::InlineBase64 => STANDARD
                .decode(self.payload.trim())
                .map_err(|e| ImageGenError::Download(format!("malformed base64 payload: {}", e))),
            ArtifactEncoding::RemoteUrl => Err(ImageGenError::Download(
                "remote artifacts have no inline payload".into(),
            )),
        }
    }

    /// Something an image widget can display directly.
    pub fn display_source(&self) -> String {
        match self.encoding {
            ArtifactEncoding::RemoteUrl => self.payload.clone(),
            ArtifactEncoding::InlineBase64 => {
                format!("data:{};base64,{}", self.mime_type(), self.payload)
            }
        }
    }

    pub fn mime_type(&self) -> &'static str {
        self.mime_format.mime_type()
    }

    pub fn file_name(&self, index: usize) -> String {
        format!("teams_background_{}.{}", index + 1, self.mime_format)
    }
}
