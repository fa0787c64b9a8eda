use crate::{
    config::ReplicateConfig,
    error::{ImageGenError, Result},
    logger,
    models::{
        AspectRatio, Backend, BackendParams, GenerationRequest, GenerationResult, ImageArtifact,
        OutputFormat, ReplicateParams,
    },
    providers::ImageBackend,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Flat options bag sent as the prediction `input`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplicateInput {
    pub prompt: String,
    pub raw: bool,
    pub aspect_ratio: AspectRatio,
    pub output_format: OutputFormat,
    pub safety_tolerance: u8,
    pub image_prompt_strength: f64,
}

impl ReplicateInput {
    pub fn new(prompt: &str, params: &ReplicateParams) -> Self {
        Self {
            prompt: prompt.to_string(),
            raw: params.raw,
            aspect_ratio: params.aspect_ratio,
            output_format: params.output_format,
            safety_tolerance: params.safety_tolerance,
            image_prompt_strength: params.image_prompt_strength,
        }
    }
}

/// Marketplace prediction endpoint, abstracted so adapters can run without network.
#[async_trait]
pub trait PredictionApi: Send + Sync {
    /// Runs a prediction to completion and returns its raw `output` value.
    async fn run(&self, model_path: &str, input: &ReplicateInput) -> Result<Value>;

    async fn list_models(&self) -> Result<()>;
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FileRef {
    Url(String),
    Object { url: String },
}

impl FileRef {
    fn into_url(self) -> String {
        match self {
            FileRef::Url(url) | FileRef::Object { url } => url,
        }
    }
}

/// Prediction output shapes the adapter accepts.
#[derive(Debug)]
enum PredictionOutput {
    Single(FileRef),
    Many(Vec<FileRef>),
}

impl PredictionOutput {
    fn decode(value: Value) -> Result<Self> {
        if let Ok(single) = serde_json::from_value::<FileRef>(value.clone()) {
            return Ok(PredictionOutput::Single(single));
        }
        if let Ok(many) = serde_json::from_value::<Vec<FileRef>>(value) {
            return Ok(PredictionOutput::Many(many));
        }
        Err(ImageGenError::backend(
            Backend::Replicate,
            "Unexpected output format",
        ))
    }

    fn into_urls(self) -> Vec<String> {
        match self {
            PredictionOutput::Single(file) => vec![file.into_url()],
            PredictionOutput::Many(files) => files.into_iter().map(FileRef::into_url).collect(),
        }
    }
}

#[derive(Clone)]
pub struct ReplicateAdapter {
    api: Arc<dyn PredictionApi>,
}

impl ReplicateAdapter {
    pub fn new(api: Arc<dyn PredictionApi>) -> Self {
        Self { api }
    }

    pub fn from_config(config: &ReplicateConfig, http: reqwest::Client) -> Result<Self> {
        let api = HttpPredictionApi::new(config, http)?;
        Ok(Self::new(Arc::new(api)))
    }
}

#[async_trait]
impl ImageBackend for ReplicateAdapter {
    fn backend(&self) -> Backend {
        Backend::Replicate
    }

    async fn generate_image(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let params = match request.params() {
            BackendParams::Replicate(params) => params,
            other => {
                return Err(ImageGenError::InvalidRequest(format!(
                    "{} parameters sent to the replicate adapter",
                    other.backend()
                )))
            }
        };

        let _timer = logger::timer("replicate generate_image");
        let input = ReplicateInput::new(request.prompt(), params);
        log::info!("Generating image with Replicate model: {}", request.model_path());

        let output = self
            .api
            .run(request.model_path(), &input)
            .await
            .map_err(into_backend_error)?;

        let images = PredictionOutput::decode(output)?
            .into_urls()
            .into_iter()
            .map(|url| ImageArtifact::remote(url, params.output_format))
            .collect::<Vec<_>>();
        log::debug!("Replicate returned {} image(s)", images.len());

        GenerationResult::success(
            Backend::Replicate,
            request.model_path(),
            images,
            request.metadata(),
        )
    }

    async fn validate_connection(&self) -> bool {
        match self.api.list_models().await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Replicate connection check failed: {}", e);
                false
            }
        }
    }
}

fn into_backend_error(err: ImageGenError) -> ImageGenError {
    match err {
        err @ ImageGenError::Backend { .. } => err,
        other => ImageGenError::backend(Backend::Replicate, other.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct Prediction {
    #[serde(default)]
    id: Option<String>,
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    urls: Option<PredictionUrls>,
}

#[derive(Debug, Deserialize)]
struct PredictionUrls {
    #[serde(default)]
    get: Option<String>,
}

/// `owner/name` runs the model's latest deployment, `owner/name:version` pins a version.
fn prediction_request(api_base: &str, model_path: &str, input: &ReplicateInput) -> (String, Value) {
    match model_path.split_once(':') {
        Some((_, version)) => (
            format!("{}/predictions", api_base),
            json!({ "version": version, "input": input }),
        ),
        None => (
            format!("{}/models/{}/predictions", api_base, model_path),
            json!({ "input": input }),
        ),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{}...", head)
}

/// Replicate REST client.
pub struct HttpPredictionApi {
    http: reqwest::Client,
    api_base: String,
    api_token: String,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl HttpPredictionApi {
    pub fn new(config: &ReplicateConfig, http: reqwest::Client) -> Result<Self> {
        let api_token = config
            .api_token
            .clone()
            .ok_or_else(|| ImageGenError::Config("Replicate API token is required".into()))?;
        Ok(Self {
            http,
            api_base: config.api_base(),
            api_token,
            poll_interval: Duration::from_secs(1),
            poll_timeout: config.poll_timeout(),
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    async fn read_prediction(&self, response: reqwest::Response) -> Result<Prediction> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.get("detail").and_then(Value::as_str).map(str::to_string))
                .unwrap_or(body);
            return Err(ImageGenError::backend(
                Backend::Replicate,
                format!("HTTP {}: {}", status, truncate(&detail, 512)),
            ));
        }
        response.json::<Prediction>().await.map_err(|e| {
            ImageGenError::backend(Backend::Replicate, format!("invalid prediction payload: {}", e))
        })
    }
}

#[async_trait]
impl PredictionApi for HttpPredictionApi {
    async fn run(&self, model_path: &str, input: &ReplicateInput) -> Result<Value> {
        let (endpoint, body) = prediction_request(&self.api_base, model_path, input);
        log::debug!("POST {}", endpoint);

        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.api_token)
            .header("Prefer", "wait")
            .json(&body)
            .send()
            .await
            .map_err(|e| ImageGenError::backend(Backend::Replicate, e.to_string()))?;
        let mut prediction = self.read_prediction(response).await?;

        let started = Instant::now();
        loop {
            match prediction.status.as_str() {
                "succeeded" => return Ok(prediction.output.unwrap_or(Value::Null)),
                "failed" | "canceled" => {
                    let reason = prediction
                        .error
                        .map(|e| match e {
                            Value::String(s) => s,
                            other => other.to_string(),
                        })
                        .unwrap_or_else(|| "no error message".to_string());
                    return Err(ImageGenError::backend(
                        Backend::Replicate,
                        format!(
                            "prediction {} {}: {}",
                            prediction.id.as_deref().unwrap_or("?"),
                            prediction.status,
                            reason
                        ),
                    ));
                }
                _ => {}
            }

            if started.elapsed() >= self.poll_timeout {
                return Err(ImageGenError::backend(
                    Backend::Replicate,
                    format!(
                        "prediction did not finish within {:?}",
                        self.poll_timeout
                    ),
                ));
            }

            let poll_url = prediction
                .urls
                .as_ref()
                .and_then(|urls| urls.get.clone())
                .ok_or_else(|| {
                    ImageGenError::backend(Backend::Replicate, "prediction missing poll URL")
                })?;

            tokio::time::sleep(self.poll_interval).await;
            log::debug!("Polling prediction status: {}", poll_url);
            let response = self
                .http
                .get(&poll_url)
                .bearer_auth(&self.api_token)
                .send()
                .await
                .map_err(|e| ImageGenError::backend(Backend::Replicate, e.to_string()))?;
            prediction = self.read_prediction(response).await?;
        }
    }

    async fn list_models(&self) -> Result<()> {
        let response = self
            .http
            .get(format!("{}/models", self.api_base))
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| ImageGenError::backend(Backend::Replicate, e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ImageGenError::backend(
                Backend::Replicate,
                format!("model listing returned HTTP {}", response.status()),
            ))
        }
    }
}
