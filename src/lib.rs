//! Text-to-image generation through Replicate or Vertex AI Imagen behind one
//! adapter contract, plus the session and download plumbing around it.

pub mod catalog;
pub mod config;
pub mod download;
pub mod error;
pub mod logger;
pub mod models;
pub mod providers;
pub mod session;

pub use catalog::{default_catalog, list_models, merge_catalogs, CatalogEntry};
pub use config::{Config, ReplicateConfig, VertexConfig};
pub use download::ArtifactFetcher;
pub use error::{ImageGenError, Result};
pub use models::*;
pub use providers::{
    HttpPredictionApi, HttpVisionLoader, ImageBackend, ImageGenClient, PredictionApi,
    ReplicateAdapter, VertexAdapter, VisionModel, VisionModelLoader,
};
pub use session::{GeneratedImage, SessionContext, SubmitOptions};
