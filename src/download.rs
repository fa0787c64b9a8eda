use crate::{
    error::{ImageGenError, Result},
    models::{ArtifactEncoding, ImageArtifact},
};
use std::path::{Path, PathBuf};

/// Turns artifacts into raw image bytes, whatever encoding the backend used.
#[derive(Clone, Default)]
pub struct ArtifactFetcher {
    http: reqwest::Client,
}

impl ArtifactFetcher {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    pub async fn fetch(&self, artifact: &ImageArtifact) -> Result<Vec<u8>> {
        match artifact.encoding {
            ArtifactEncoding::InlineBase64 => artifact.decode_inline(),
            ArtifactEncoding::RemoteUrl => self.get(&artifact.payload).await,
        }
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>> {
        log::debug!("Downloading image from {}", url);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ImageGenError::Download(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ImageGenError::Download(format!(
                "{} returned HTTP {}",
                url, status
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ImageGenError::Download(format!("reading {} failed: {}", url, e)))?;
        Ok(bytes.to_vec())
    }

    /// Writes one artifact into `dir` under its suggested file name.
    pub async fn save(&self, artifact: &ImageArtifact, index: usize, dir: &Path) -> Result<PathBuf> {
        let bytes = self.fetch(artifact).await?;
        let path = dir.join(artifact.file_name(index));
        tokio::fs::write(&path, &bytes).await.map_err(|e| {
            ImageGenError::Download(format!("writing {} failed: {}", path.display(), e))
        })?;
        log::info!("💾 Saved {} ({} bytes)", path.display(), bytes.len());
        Ok(path)
    }
}
