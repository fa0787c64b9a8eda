use crate::{
    catalog::CatalogEntry,
    error::{ImageGenError, Result},
    models::{
        AspectRatio, Backend, GenerationRequest, GenerationResult, ImageArtifact, Metadata,
        OutputFormat, ReplicateParams, VertexParams,
    },
    providers::ImageGenClient,
};
use indexmap::IndexMap;
use serde_json::json;

/// Every setting the user can touch, before it is narrowed to one backend.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitOptions {
    pub aspect_ratio: AspectRatio,
    pub output_format: OutputFormat,
    pub safety_tolerance: u8,
    pub image_prompt_strength: f64,
    pub raw: bool,
    pub number_of_images: u32,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            aspect_ratio: AspectRatio::Ratio16x9,
            output_format: OutputFormat::Png,
            safety_tolerance: 2,
            image_prompt_strength: 0.1,
            raw: false,
            number_of_images: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub artifact: ImageArtifact,
    pub backend: Backend,
    pub metadata: Metadata,
}

/// State of one interactive session. Owned by the loop driving it.
#[derive(Debug, Clone)]
pub struct SessionContext {
    catalog: IndexMap<String, CatalogEntry>,
    selected: Option<String>,
    generated: Vec<GeneratedImage>,
    last_result: Option<GenerationResult>,
    last_error: Option<String>,
}

impl SessionContext {
    /// Starts with the first catalog entry selected.
    pub fn new(catalog: IndexMap<String, CatalogEntry>) -> Self {
        let selected = catalog.keys().next().cloned();
        Self {
            catalog,
            selected,
            generated: Vec::new(),
            last_result: None,
            last_error: None,
        }
    }

    pub fn catalog(&self) -> &IndexMap<String, CatalogEntry> {
        &self.catalog
    }

    pub fn select_model(&mut self, name: &str) -> Result<&CatalogEntry> {
        let (key, entry) = self
            .catalog
            .get_key_value(name)
            .ok_or_else(|| ImageGenError::UnknownModel(name.to_string()))?;
        self.selected = Some(key.clone());
        Ok(entry)
    }

    pub fn selected(&self) -> Option<(&str, &CatalogEntry)> {
        let name = self.selected.as_deref()?;
        self.catalog
            .get_key_value(name)
            .map(|(key, entry)| (key.as_str(), entry))
    }

    pub fn selected_backend(&self) -> Option<Backend> {
        self.selected().map(|(_, entry)| entry.backend)
    }

    pub fn generated(&self) -> &[GeneratedImage] {
        &self.generated
    }

    pub fn last_result(&self) -> Option<&GenerationResult> {
        self.last_result.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Narrows the options to the selected model's backend.
    pub fn build_request(&self, prompt: &str, options: &SubmitOptions) -> Result<GenerationRequest> {
        let (name, entry) = self
            .selected()
            .ok_or_else(|| ImageGenError::UnknownModel("no model selected".into()))?;
        log::debug!("Building {} request for {}", entry.backend, name);

        match entry.backend {
            Backend::Replicate => GenerationRequest::replicate(
                prompt,
                entry.path.as_str(),
                ReplicateParams {
                    aspect_ratio: options.aspect_ratio,
                    output_format: options.output_format,
                    safety_tolerance: options.safety_tolerance,
                    image_prompt_strength: options.image_prompt_strength,
                    raw: options.raw,
                },
            ),
            Backend::Vertex => GenerationRequest::vertex(
                prompt,
                entry.path.as_str(),
                VertexParams {
                    aspect_ratio: options.aspect_ratio,
                    number_of_images: options.number_of_images,
                },
            ),
        }
    }

    /// Runs one generation. On failure the previous images stay and the error is kept.
    pub async fn submit(
        &mut self,
        client: &ImageGenClient,
        prompt: &str,
        options: &SubmitOptions,
    ) -> Result<&[GeneratedImage]> {
        let request = match self.build_request(prompt, options) {
            Ok(request) => request,
            Err(e) => {
                let model_path = self
                    .selected()
                    .map(|(_, entry)| entry.path.clone())
                    .unwrap_or_default();
                let mut metadata = Metadata::new();
                metadata.insert("prompt".into(), json!(prompt));
                return Err(self.record_failure(model_path, metadata, e));
            }
        };
        let backend = request.backend();

        match client.generate(&request).await {
            Ok(result) => {
                self.generated = result
                    .images
                    .iter()
                    .map(|artifact| GeneratedImage {
                        artifact: artifact.clone(),
                        backend,
                        metadata: result.metadata.clone(),
                    })
                    .collect();
                self.last_result = Some(result);
                self.last_error = None;
                Ok(&self.generated)
            }
            Err(e) => Err(self.record_failure(
                request.model_path().to_string(),
                request.metadata(),
                e,
            )),
        }
    }

    fn record_failure(
        &mut self,
        model_path: String,
        metadata: Metadata,
        err: ImageGenError,
    ) -> ImageGenError {
        log::error!("Generation failed: {}", err);
        self.last_result = Some(GenerationResult::failure(model_path, metadata));
        self.last_error = Some(err.to_string());
        err
    }
}
