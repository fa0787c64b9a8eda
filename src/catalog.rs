use crate::models::{Backend, ModelDescriptor};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

const REPLICATE_MODELS: &[(&str, &str, &str)] = &[
    (
        "Flux 1.1 Pro",
        "black-forest-labs/flux-1.1-pro",
        "High quality image generation",
    ),
    (
        "Flux Schnell LoRA",
        "black-forest-labs/flux-schnell-lora",
        "Fast image generation with LoRA",
    ),
    (
        "Flux 1.1 Pro Ultra",
        "black-forest-labs/flux-1.1-pro-ultra",
        "Ultra high quality image generation",
    ),
    (
        "Flux Dev LoRA",
        "black-forest-labs/flux-dev-lora",
        "Development version with LoRA",
    ),
    (
        "Photon",
        "luma/photon",
        "High-quality image generation model optimized for creative professional workflows and ultra-high fidelity outputs",
    ),
    (
        "Ideogram-v2",
        "ideogram-ai/ideogram-v2",
        "An excellent image model with state of the art inpainting, prompt comprehension and text rendering",
    ),
];

const VERTEX_MODELS: &[(&str, &str, &str)] = &[
    (
        "Imagen 3",
        "imagen-3.0-generate-001",
        "High quality image generation",
    ),
    (
        "Imagen 3 Fast",
        "imagen-3.0-fast-generate-001",
        "Fast image generation",
    ),
];

/// Model the Vertex adapter loads before the first request.
pub const DEFAULT_VERTEX_MODEL: &str = "imagen-3.0-generate-001";

/// Static registry for one backend. Never empty.
pub fn list_models(backend: Backend) -> Vec<ModelDescriptor> {
    let table = match backend {
        Backend::Replicate => REPLICATE_MODELS,
        Backend::Vertex => VERTEX_MODELS,
    };
    table
        .iter()
        .map(|(name, path, description)| ModelDescriptor::new(*name, *path, *description))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub backend: Backend,
    pub path: String,
    pub description: String,
}

/// Flattens per-backend catalogs into one list keyed by display name.
///
/// When two backends register the same display name the one merged later
/// replaces the earlier entry's value, keeping the earlier position.
pub fn merge_catalogs<I>(catalogs: I) -> IndexMap<String, CatalogEntry>
where
    I: IntoIterator<Item = (Backend, Vec<ModelDescriptor>)>,
{
    let mut merged = IndexMap::new();
    for (backend, models) in catalogs {
        for model in models {
            if let Some(previous) = merged.insert(
                model.name.clone(),
                CatalogEntry {
                    backend,
                    path: model.path,
                    description: model.description,
                },
            ) {
                log::warn!(
                    "Model name '{}' registered twice, {} entry replaced by {}",
                    model.name,
                    previous.backend,
                    backend
                );
            }
        }
    }
    merged
}

/// Merged catalog of every backend's static registry.
pub fn default_catalog() -> IndexMap<String, CatalogEntry> {
    merge_catalogs(
        Backend::ALL
            .iter()
            .map(|backend| (*backend, list_models(*backend))),
    )
}
