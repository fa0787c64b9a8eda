pub mod auth;
pub mod replicate;
pub mod vertex;

#[cfg(test)]
mod test_server;

use crate::{
    catalog::{self, CatalogEntry},
    config::Config,
    error::Result,
    models::{Backend, GenerationRequest, GenerationResult, ModelDescriptor},
};
use async_trait::async_trait;
use indexmap::IndexMap;
use std::sync::Arc;

pub use replicate::{HttpPredictionApi, PredictionApi, ReplicateAdapter};
pub use vertex::{HttpVisionLoader, VertexAdapter, VisionModel, VisionModelLoader};

/// Normalizes one vendor's image-generation call into the common contract.
#[async_trait]
pub trait ImageBackend: Send + Sync {
    fn backend(&self) -> Backend;

    fn list_models(&self) -> Vec<ModelDescriptor> {
        catalog::list_models(self.backend())
    }

    async fn generate_image(&self, request: &GenerationRequest) -> Result<GenerationResult>;

    /// Best-effort health check. Never errors.
    async fn validate_connection(&self) -> bool;
}

/// Owns one adapter per backend and routes requests between them.
#[derive(Clone)]
pub struct ImageGenClient {
    replicate: Arc<dyn ImageBackend>,
    vertex: Arc<dyn ImageBackend>,
}

impl ImageGenClient {
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let http = config.http_client()?;

        let replicate = ReplicateAdapter::from_config(&config.replicate, http.clone())?;
        log::info!("Replicate adapter ready ({})", config.replicate.api_base());

        let vertex = VertexAdapter::from_config(&config.vertex, http).await?;
        log::info!(
            "Vertex AI adapter ready (location {})",
            config.vertex.location()
        );

        Ok(Self::from_adapters(Arc::new(replicate), Arc::new(vertex)))
    }

    pub fn from_adapters(replicate: Arc<dyn ImageBackend>, vertex: Arc<dyn ImageBackend>) -> Self {
        Self { replicate, vertex }
    }

    pub fn adapter(&self, backend: Backend) -> &Arc<dyn ImageBackend> {
        match backend {
            Backend::Replicate => &self.replicate,
            Backend::Vertex => &self.vertex,
        }
    }

    pub fn replicate(&self) -> &Arc<dyn ImageBackend> {
        &self.replicate
    }

    pub fn vertex(&self) -> &Arc<dyn ImageBackend> {
        &self.vertex
    }

    /// Every adapter's models merged for presentation, keyed by display name.
    pub fn catalog(&self) -> IndexMap<String, CatalogEntry> {
        catalog::merge_catalogs(
            Backend::ALL
                .iter()
                .map(|backend| (*backend, self.adapter(*backend).list_models())),
        )
    }

    pub async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        self.adapter(request.backend())
            .generate_image(request)
            .await
    }

    pub async fn validate_connections(&self) -> Vec<(Backend, bool)> {
        let mut report = Vec::with_capacity(Backend::ALL.len());
        for backend in Backend::ALL {
            report.push((backend, self.adapter(backend).validate_connection().await));
        }
        report
    }
}
