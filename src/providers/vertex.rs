use crate::{
    catalog::DEFAULT_VERTEX_MODEL,
    config::VertexConfig,
    error::{ImageGenError, Result},
    logger,
    models::{
        AspectRatio, Backend, BackendParams, GenerationRequest, GenerationResult, ImageArtifact,
        OutputFormat, VertexParams,
    },
    providers::{auth::TokenSource, ImageBackend},
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

/// Filter strictness applied to every request, whatever safety level was asked for.
pub const SAFETY_FILTER_LEVEL: &str = "block_only_high";
pub const PROMPT_LANGUAGE: &str = "en";

/// Generation parameters in the shape of the Imagen `predict` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagenOptions {
    pub sample_count: u32,
    pub language: &'static str,
    pub aspect_ratio: AspectRatio,
    pub safety_setting: &'static str,
}

impl ImagenOptions {
    pub fn new(params: &VertexParams) -> Self {
        Self {
            sample_count: params.number_of_images,
            language: PROMPT_LANGUAGE,
            aspect_ratio: params.aspect_ratio,
            safety_setting: SAFETY_FILTER_LEVEL,
        }
    }
}

/// A loaded image-generation model.
#[async_trait]
pub trait VisionModel: Send + Sync {
    fn model_id(&self) -> &str;

    /// Raw bytes of each generated image, in backend order.
    async fn generate_images(&self, prompt: &str, options: &ImagenOptions) -> Result<Vec<Vec<u8>>>;
}

#[async_trait]
pub trait VisionModelLoader: Send + Sync {
    async fn load(&self, model_id: &str) -> Result<Box<dyn VisionModel>>;
}

pub struct VertexAdapter {
    loader: Arc<dyn VisionModelLoader>,
    // Held across reload and generation so concurrent callers cannot interleave.
    model: Mutex<Option<Box<dyn VisionModel>>>,
    // Id of the handle in `model`, readable while a generation holds the lock.
    loaded: RwLock<Option<String>>,
}

impl VertexAdapter {
    /// Creates the adapter with the default model already loaded.
    pub async fn new(loader: Arc<dyn VisionModelLoader>) -> Result<Self> {
        let model = loader
            .load(DEFAULT_VERTEX_MODEL)
            .await
            .map_err(into_backend_error)?;
        let loaded = RwLock::new(Some(model.model_id().to_string()));
        Ok(Self {
            loader,
            model: Mutex::new(Some(model)),
            loaded,
        })
    }

    /// Creates the adapter without loading anything; the first request loads its model.
    pub fn lazy(loader: Arc<dyn VisionModelLoader>) -> Self {
        Self {
            loader,
            model: Mutex::new(None),
            loaded: RwLock::new(None),
        }
    }

    pub async fn from_config(config: &VertexConfig, http: reqwest::Client) -> Result<Self> {
        let key = config.load_credentials()?;
        let project_id = config
            .project_id
            .clone()
            .or_else(|| key.project_id.clone())
            .ok_or_else(|| ImageGenError::Config("Google Cloud project id is required".into()))?;
        let tokens = TokenSource::new(http.clone(), &key)?;
        log::debug!(
            "Vertex AI credentials loaded for {} (project {})",
            key.client_email,
            project_id
        );

        let loader = HttpVisionLoader {
            http,
            api_base: config.api_base(),
            project_id,
            location: config.location().to_string(),
            tokens: Arc::new(tokens),
        };
        Self::new(Arc::new(loader)).await
    }

    /// Never waits on an in-flight generation.
    pub fn loaded_model_id(&self) -> Option<String> {
        match self.loaded.read() {
            Ok(loaded) => loaded.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_loaded(&self, model_id: &str) {
        let mut loaded = match self.loaded.write() {
            Ok(loaded) => loaded,
            Err(poisoned) => poisoned.into_inner(),
        };
        *loaded = Some(model_id.to_string());
    }
}

#[async_trait]
impl ImageBackend for VertexAdapter {
    fn backend(&self) -> Backend {
        Backend::Vertex
    }

    async fn generate_image(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let params = match request.params() {
            BackendParams::Vertex(params) => params,
            other => {
                return Err(ImageGenError::InvalidRequest(format!(
                    "{} parameters sent to the vertex adapter",
                    other.backend()
                )))
            }
        };

        let _timer = logger::timer("vertex generate_image");
        let model_path = request.model_path();
        let mut slot = self.model.lock().await;

        if slot.as_ref().map(|model| model.model_id()) != Some(model_path) {
            log::info!("Loading Vertex AI model: {}", model_path);
            let loaded = self
                .loader
                .load(model_path)
                .await
                .map_err(into_backend_error)?;
            *slot = Some(loaded);
            self.set_loaded(model_path);
        }
        let model = slot.as_ref().ok_or_else(|| {
            ImageGenError::backend(Backend::Vertex, "model handle is not loaded")
        })?;

        let options = ImagenOptions::new(params);
        log::info!("Generating image with Vertex AI model: {}", model_path);
        let images = model
            .generate_images(request.prompt(), &options)
            .await
            .map_err(into_backend_error)?;
        log::debug!("Vertex AI returned {} image(s)", images.len());

        // Imagen always emits PNG.
        let artifacts = images
            .iter()
            .map(|bytes| ImageArtifact::inline(bytes, OutputFormat::Png))
            .collect::<Vec<_>>();

        let mut metadata = request.metadata();
        metadata.insert("safety_filter".into(), json!(options.safety_setting));
        metadata.insert("language".into(), json!(options.language));

        GenerationResult::success(Backend::Vertex, model_path, artifacts, metadata)
    }

    /// Reports whether a model handle is loaded. No network round trip.
    async fn validate_connection(&self) -> bool {
        self.loaded_model_id().is_some()
    }
}

fn into_backend_error(err: ImageGenError) -> ImageGenError {
    match err {
        err @ ImageGenError::Backend { .. } => err,
        other => ImageGenError::backend(Backend::Vertex, other.to_string()),
    }
}

/// Resolves model ids to Vertex AI publisher model endpoints.
pub struct HttpVisionLoader {
    http: reqwest::Client,
    api_base: String,
    project_id: String,
    location: String,
    tokens: Arc<TokenSource>,
}

#[async_trait]
impl VisionModelLoader for HttpVisionLoader {
    async fn load(&self, model_id: &str) -> Result<Box<dyn VisionModel>> {
        if model_id.trim().is_empty() {
            return Err(ImageGenError::backend(Backend::Vertex, "empty model id"));
        }
        Ok(Box::new(ImagenModel {
            http: self.http.clone(),
            endpoint: predict_endpoint(&self.api_base, &self.project_id, &self.location, model_id),
            model_id: model_id.to_string(),
            tokens: self.tokens.clone(),
        }))
    }
}

fn predict_endpoint(api_base: &str, project_id: &str, location: &str, model_id: &str) -> String {
    format!(
        "{}/projects/{}/locations/{}/publishers/google/models/{}:predict",
        api_base, project_id, location, model_id
    )
}

struct ImagenModel {
    http: reqwest::Client,
    endpoint: String,
    model_id: String,
    tokens: Arc<TokenSource>,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<ImagenPrediction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImagenPrediction {
    #[serde(default)]
    bytes_base64_encoded: Option<String>,
    #[serde(default)]
    rai_filtered_reason: Option<String>,
}

fn decode_predictions(response: PredictResponse) -> Result<Vec<Vec<u8>>> {
    let mut images = Vec::with_capacity(response.predictions.len());
    for prediction in response.predictions {
        match prediction.bytes_base64_encoded {
            Some(encoded) => {
                let bytes = STANDARD.decode(encoded.as_bytes()).map_err(|e| {
                    ImageGenError::backend(Backend::Vertex, format!("image base64 decode failed: {}", e))
                })?;
                images.push(bytes);
            }
            None => log::warn!(
                "Vertex AI dropped an image: {}",
                prediction
                    .rai_filtered_reason
                    .as_deref()
                    .unwrap_or("no reason given")
            ),
        }
    }
    Ok(images)
}

#[async_trait]
impl VisionModel for ImagenModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn generate_images(&self, prompt: &str, options: &ImagenOptions) -> Result<Vec<Vec<u8>>> {
        let token = self.tokens.access_token().await?;
        let body = json!({
            "instances": [{ "prompt": prompt }],
            "parameters": options,
        });

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ImageGenError::backend(Backend::Vertex, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| {
                    v.pointer("/error/message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or(text);
            return Err(ImageGenError::backend(
                Backend::Vertex,
                format!("HTTP {}: {}", status, message),
            ));
        }

        let payload: PredictResponse = response.json().await.map_err(|e| {
            ImageGenError::backend(Backend::Vertex, format!("invalid predict payload: {}", e))
        })?;
        decode_predictions(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_server::{self, TestServer};
    use std::time::Duration;
    use tokio::sync::Notify;
    use crate::models::ArtifactEncoding;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockLoader {
        loads: AtomicUsize,
        images_per_call: usize,
        fail_generation: bool,
    }

    impl MockLoader {
        fn new(images_per_call: usize) -> Arc<Self> {
            Arc::new(Self {
                loads: AtomicUsize::new(0),
                images_per_call,
                fail_generation: false,
            })
        }

        fn loads(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }
    }

    struct MockModel {
        id: String,
        images_per_call: usize,
        fail_generation: bool,
    }

    #[async_trait]
    impl VisionModel for MockModel {
        fn model_id(&self) -> &str {
            &self.id
        }

        async fn generate_images(
            &self,
            prompt: &str,
            options: &ImagenOptions,
        ) -> Result<Vec<Vec<u8>>> {
            if self.fail_generation {
                return Err(ImageGenError::InvalidRequest("quota exceeded".into()));
            }
            assert_eq!(options.safety_setting, SAFETY_FILTER_LEVEL);
            tokio::task::yield_now().await;
            Ok((0..self.images_per_call)
                .map(|i| format!("{}|{}|{}", self.id, prompt, i).into_bytes())
                .collect())
        }
    }

    #[async_trait]
    impl VisionModelLoader for MockLoader {
        async fn load(&self, model_id: &str) -> Result<Box<dyn VisionModel>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockModel {
                id: model_id.to_string(),
                images_per_call: self.images_per_call,
                fail_generation: self.fail_generation,
            }))
        }
    }

    fn request(model_path: &str, params: VertexParams) -> GenerationRequest {
        GenerationRequest::vertex("a minimal office", model_path, params).unwrap()
    }

    #[tokio::test]
    async fn test_inline_base64_artifacts() {
        let loader = MockLoader::new(3);
        let adapter = VertexAdapter::new(loader.clone()).await.unwrap();
        let params = VertexParams::default().with_number_of_images(3);

        let result = adapter
            .generate_image(&request(DEFAULT_VERTEX_MODEL, params))
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(result.images.len(), 3);
        for (i, artifact) in result.images.iter().enumerate() {
            let expected = format!("{}|a minimal office|{}", DEFAULT_VERTEX_MODEL, i);
            assert_eq!(artifact.encoding, ArtifactEncoding::InlineBase64);
            assert_eq!(artifact.mime_format, OutputFormat::Png);
            assert_eq!(artifact.payload, STANDARD.encode(expected.as_bytes()));
        }
        assert_eq!(result.metadata["safety_filter"], json!("block_only_high"));
        assert_eq!(result.metadata["language"], json!("en"));
        assert_eq!(result.metadata["number_of_images"], json!(3));
        assert_eq!(result.metadata["model"], json!(DEFAULT_VERTEX_MODEL));
    }

    #[tokio::test]
    async fn test_model_handle_cache() {
        let loader = MockLoader::new(1);
        let adapter = VertexAdapter::new(loader.clone()).await.unwrap();
        assert_eq!(loader.loads(), 1);

        let default = request(DEFAULT_VERTEX_MODEL, VertexParams::default());
        adapter.generate_image(&default).await.unwrap();
        adapter.generate_image(&default).await.unwrap();
        assert_eq!(loader.loads(), 1);

        let fast = request("imagen-3.0-fast-generate-001", VertexParams::default());
        adapter.generate_image(&fast).await.unwrap();
        assert_eq!(loader.loads(), 2);
        adapter.generate_image(&fast).await.unwrap();
        assert_eq!(loader.loads(), 2);
        assert_eq!(
            adapter.loaded_model_id().as_deref(),
            Some("imagen-3.0-fast-generate-001")
        );
    }

    #[tokio::test]
    async fn test_repeat_calls_are_identical() {
        let loader = MockLoader::new(2);
        let adapter = VertexAdapter::new(loader.clone()).await.unwrap();
        let req = request(DEFAULT_VERTEX_MODEL, VertexParams::default().with_number_of_images(2));

        let first = adapter.generate_image(&req).await.unwrap();
        let second = adapter.generate_image(&req).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(loader.loads(), 1);
    }

    struct StalledModel {
        started: Arc<Notify>,
    }

    #[async_trait]
    impl VisionModel for StalledModel {
        fn model_id(&self) -> &str {
            DEFAULT_VERTEX_MODEL
        }

        async fn generate_images(
            &self,
            _prompt: &str,
            _options: &ImagenOptions,
        ) -> Result<Vec<Vec<u8>>> {
            self.started.notify_one();
            std::future::pending().await
        }
    }

    struct StalledLoader {
        started: Arc<Notify>,
    }

    #[async_trait]
    impl VisionModelLoader for StalledLoader {
        async fn load(&self, _model_id: &str) -> Result<Box<dyn VisionModel>> {
            Ok(Box::new(StalledModel {
                started: self.started.clone(),
            }))
        }
    }

    #[tokio::test]
    async fn test_health_check_does_not_wait_on_generation() {
        let started = Arc::new(Notify::new());
        let loader = Arc::new(StalledLoader {
            started: started.clone(),
        });
        let adapter = Arc::new(VertexAdapter::new(loader).await.unwrap());

        let worker = adapter.clone();
        let generation = tokio::spawn(async move {
            worker
                .generate_image(&request(DEFAULT_VERTEX_MODEL, VertexParams::default()))
                .await
        });
        started.notified().await;

        let healthy = tokio::time::timeout(Duration::from_secs(1), adapter.validate_connection()).await;
        assert!(matches!(healthy, Ok(true)));
        assert_eq!(adapter.loaded_model_id().as_deref(), Some(DEFAULT_VERTEX_MODEL));
        generation.abort();
    }

    #[tokio::test]
    async fn test_concurrent_callers_do_not_interleave() {
        let loader = MockLoader::new(1);
        let adapter = Arc::new(VertexAdapter::new(loader.clone()).await.unwrap());

        let mut handles = Vec::new();
        for i in 0..8 {
            let adapter = adapter.clone();
            let model = if i % 2 == 0 {
                DEFAULT_VERTEX_MODEL
            } else {
                "imagen-3.0-fast-generate-001"
            };
            handles.push(tokio::spawn(async move {
                let result = adapter
                    .generate_image(&request(model, VertexParams::default()))
                    .await
                    .unwrap();
                (model, result)
            }));
        }

        for handle in handles {
            let (model, result) = handle.await.unwrap();
            let bytes = result.images[0].decode_inline().unwrap();
            let text = String::from_utf8(bytes).unwrap();
            assert!(text.starts_with(model));
        }
    }

    #[tokio::test]
    async fn test_generation_failure_is_backend_error() {
        let loader = Arc::new(MockLoader {
            loads: AtomicUsize::new(0),
            images_per_call: 1,
            fail_generation: true,
        });
        let adapter = VertexAdapter::new(loader).await.unwrap();
        let err = adapter
            .generate_image(&request(DEFAULT_VERTEX_MODEL, VertexParams::default()))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Vertex AI API error: Invalid request: quota exceeded"
        );
        // A failed call leaves the adapter usable.
        assert!(adapter.validate_connection().await);
    }

    #[tokio::test]
    async fn test_no_images_is_backend_error() {
        let adapter = VertexAdapter::new(MockLoader::new(0)).await.unwrap();
        let err = adapter
            .generate_image(&request(DEFAULT_VERTEX_MODEL, VertexParams::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, ImageGenError::Backend { backend: Backend::Vertex, .. }));
    }

    #[tokio::test]
    async fn test_validate_connection_reflects_handle() {
        let loader = MockLoader::new(1);
        let adapter = VertexAdapter::lazy(loader.clone());
        assert!(!adapter.validate_connection().await);
        assert_eq!(loader.loads(), 0);

        adapter
            .generate_image(&request(DEFAULT_VERTEX_MODEL, VertexParams::default()))
            .await
            .unwrap();
        assert!(adapter.validate_connection().await);
    }

    #[tokio::test]
    async fn test_rejects_replicate_params() {
        let adapter = VertexAdapter::new(MockLoader::new(1)).await.unwrap();
        let req =
            GenerationRequest::replicate("office", "luma/photon", Default::default()).unwrap();
        assert!(matches!(
            adapter.generate_image(&req).await,
            Err(ImageGenError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_from_config_without_project() {
        let config = VertexConfig::new().with_credentials(
            r#"{"client_email":"svc@demo.iam.gserviceaccount.com","private_key":"x"}"#,
        );
        let err = VertexAdapter::from_config(&config, reqwest::Client::new())
            .await
            .err()
            .unwrap();
        assert!(err.is_config());
    }

    #[test]
    fn test_options_wire_shape() {
        let options = ImagenOptions::new(&VertexParams::default().with_number_of_images(2));
        assert_eq!(
            serde_json::to_value(&options).unwrap(),
            json!({
                "sampleCount": 2,
                "language": "en",
                "aspectRatio": "16:9",
                "safetySetting": "block_only_high"
            })
        );
        assert_eq!(
            predict_endpoint(
                "https://us-central1-aiplatform.googleapis.com/v1",
                "demo",
                "us-central1",
                "imagen-3.0-generate-001"
            ),
            "https://us-central1-aiplatform.googleapis.com/v1/projects/demo/locations/us-central1/publishers/google/models/imagen-3.0-generate-001:predict"
        );
    }

    #[test]
    fn test_decode_predictions_skips_filtered() {
        let response: PredictResponse = serde_json::from_value(json!({
            "predictions": [
                { "bytesBase64Encoded": STANDARD.encode(b"png-bytes"), "mimeType": "image/png" },
                { "raiFilteredReason": "blocked" }
            ]
        }))
        .unwrap();
        assert_eq!(decode_predictions(response).unwrap(), vec![b"png-bytes".to_vec()]);
    }

    fn credentials(token_uri: &str) -> String {
        json!({
            "type": "service_account",
            "project_id": "key-project",
            "client_email": "svc@demo.iam.gserviceaccount.com",
            "private_key": include_str!("testdata/service_account_key.pem"),
            "token_uri": token_uri,
        })
        .to_string()
    }

    async fn http_adapter(server: &TestServer) -> VertexAdapter {
        let config = VertexConfig::new()
            .with_project("demo")
            .with_api_base(server.base.clone())
            .with_credentials(credentials(&format!("{}/token", server.base)));
        VertexAdapter::from_config(&config, test_server::client())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_http_predict_round_trip() {
        let server = TestServer::bind().await;
        let adapter = http_adapter(&server).await;
        let recorded = server.serve(vec![
            (200, json!({ "access_token": "ya29.test", "expires_in": 3600 }).to_string()),
            (
                200,
                json!({
                    "predictions": [
                        { "bytesBase64Encoded": STANDARD.encode(b"png-1"), "mimeType": "image/png" }
                    ]
                })
                .to_string(),
            ),
        ]);

        let result = adapter
            .generate_image(&request(DEFAULT_VERTEX_MODEL, VertexParams::default()))
            .await
            .unwrap();
        assert_eq!(result.images[0].decode_inline().unwrap(), b"png-1".to_vec());

        let requests = recorded.lock().unwrap().clone();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].path, "/token");
        assert!(requests[0].body.contains("assertion="));
        assert_eq!(requests[1].method, "POST");
        assert_eq!(
            requests[1].path,
            "/projects/demo/locations/us-central1/publishers/google/models/imagen-3.0-generate-001:predict"
        );
        assert!(requests[1].headers.contains("authorization: bearer ya29.test"));
        let body: Value = serde_json::from_str(&requests[1].body).unwrap();
        assert_eq!(body["instances"][0]["prompt"], json!("a minimal office"));
        assert_eq!(body["parameters"]["sampleCount"], json!(1));
        assert_eq!(body["parameters"]["safetySetting"], json!("block_only_high"));
    }

    #[tokio::test]
    async fn test_http_error_message_extracted() {
        let server = TestServer::bind().await;
        let adapter = http_adapter(&server).await;
        server.serve(vec![
            (200, json!({ "access_token": "ya29.test", "expires_in": 3600 }).to_string()),
            (
                400,
                json!({
                    "error": { "code": 400, "message": "Quota exceeded for imagen", "status": "INVALID_ARGUMENT" }
                })
                .to_string(),
            ),
        ]);

        let err = adapter
            .generate_image(&request(DEFAULT_VERTEX_MODEL, VertexParams::default()))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Vertex AI API error: HTTP 400 Bad Request: Quota exceeded for imagen"
        );
    }
}
