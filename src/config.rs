use crate::error::{ImageGenError, Result};
use crate::providers::auth::ServiceAccountKey;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const REPLICATE_API_TOKEN: &str = "REPLICATE_API_TOKEN";
pub const REPLICATE_API_BASE: &str = "REPLICATE_API_BASE";
pub const REPLICATE_POLL_TIMEOUT_SECS: &str = "REPLICATE_POLL_TIMEOUT_SECS";
pub const GOOGLE_PROJECT_ID: &str = "GOOGLE_PROJECT_ID";
pub const GOOGLE_LOCATION: &str = "GOOGLE_LOCATION";
pub const GOOGLE_APPLICATION_CREDENTIALS: &str = "GOOGLE_APPLICATION_CREDENTIALS";
pub const VERTEX_API_BASE: &str = "VERTEX_API_BASE";
pub const IMAGEGEN_REQUEST_TIMEOUT_SECS: &str = "IMAGEGEN_REQUEST_TIMEOUT_SECS";

pub const DEFAULT_LOCATION: &str = "us-central1";
pub const DEFAULT_REPLICATE_API_BASE: &str = "https://api.replicate.com/v1";
pub const DEFAULT_POLL_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Default)]
pub struct ReplicateConfig {
    pub api_token: Option<String>,
    pub api_base: Option<String>,
    pub poll_timeout: Option<Duration>,
}

impl ReplicateConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_api_token(mut self, api_token: impl Into<String>) -> Self {
        self.api_token = Some(api_token.into());
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = Some(api_base.into());
        self
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = Some(poll_timeout);
        self
    }

    pub fn api_base(&self) -> String {
        self.api_base
            .as_deref()
            .unwrap_or(DEFAULT_REPLICATE_API_BASE)
            .trim_end_matches('/')
            .to_string()
    }

    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
            .unwrap_or(Duration::from_secs(DEFAULT_POLL_TIMEOUT_SECS))
    }
}

#[derive(Debug, Clone, Default)]
pub struct VertexConfig {
    pub project_id: Option<String>,
    pub location: Option<String>,
    /// Inline JSON, base64-encoded JSON, or a path to a key file.
    pub credentials: Option<String>,
    pub api_base: Option<String>,
}

/// Where the service account key bundle comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialsSource {
    Inline(String),
    File(PathBuf),
}

impl CredentialsSource {
    pub fn classify(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.starts_with('{') {
            return CredentialsSource::Inline(trimmed.to_string());
        }
        if let Some(json) = STANDARD
            .decode(trimmed)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .filter(|text| text.trim_start().starts_with('{'))
        {
            return CredentialsSource::Inline(json);
        }
        CredentialsSource::File(PathBuf::from(trimmed))
    }
}

impl VertexConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_credentials(mut self, credentials: impl Into<String>) -> Self {
        self.credentials = Some(credentials.into());
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = Some(api_base.into());
        self
    }

    pub fn location(&self) -> &str {
        self.location.as_deref().unwrap_or(DEFAULT_LOCATION)
    }

    pub fn api_base(&self) -> String {
        match &self.api_base {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("https://{}-aiplatform.googleapis.com/v1", self.location()),
        }
    }

    pub fn credentials_source(&self) -> Result<CredentialsSource> {
        let raw = self.credentials.as_deref().ok_or_else(|| {
            ImageGenError::Config(format!("{} is required", GOOGLE_APPLICATION_CREDENTIALS))
        })?;
        let source = CredentialsSource::classify(raw);
        if let CredentialsSource::File(path) = &source {
            if !path.exists() {
                return Err(ImageGenError::Config(format!(
                    "Google Cloud credentials file not found at: {}",
                    path.display()
                )));
            }
        }
        Ok(source)
    }

    pub fn load_credentials(&self) -> Result<ServiceAccountKey> {
        match self.credentials_source()? {
            CredentialsSource::Inline(json) => ServiceAccountKey::from_json(&json),
            CredentialsSource::File(path) => read_key_file(&path),
        }
    }
}

fn read_key_file(path: &Path) -> Result<ServiceAccountKey> {
    let json = std::fs::read_to_string(path).map_err(|e| {
        ImageGenError::Config(format!(
            "Failed to read credentials file {}: {}",
            path.display(),
            e
        ))
    })?;
    ServiceAccountKey::from_json(&json)
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub replicate: ReplicateConfig,
    pub vertex: VertexConfig,
    /// Per-request HTTP timeout. `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let secs = |key: &str| {
            get(key)
                .and_then(|value| value.parse::<u64>().ok())
                .map(Duration::from_secs)
        };

        Config {
            replicate: ReplicateConfig {
                api_token: get(REPLICATE_API_TOKEN),
                api_base: get(REPLICATE_API_BASE),
                poll_timeout: secs(REPLICATE_POLL_TIMEOUT_SECS),
            },
            vertex: VertexConfig {
                project_id: get(GOOGLE_PROJECT_ID),
                location: get(GOOGLE_LOCATION),
                credentials: get(GOOGLE_APPLICATION_CREDENTIALS),
                api_base: get(VERTEX_API_BASE),
            },
            request_timeout: secs(IMAGEGEN_REQUEST_TIMEOUT_SECS),
        }
    }

    pub fn with_replicate(mut self, config: ReplicateConfig) -> Self {
        self.replicate = config;
        self
    }

    pub fn with_vertex(mut self, config: VertexConfig) -> Self {
        self.vertex = config;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Names of required variables that are unset, in declaration order.
    pub fn missing_vars(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.replicate.api_token.is_none() {
            missing.push(REPLICATE_API_TOKEN);
        }
        if self.vertex.project_id.is_none() {
            missing.push(GOOGLE_PROJECT_ID);
        }
        if self.vertex.credentials.is_none() {
            missing.push(GOOGLE_APPLICATION_CREDENTIALS);
        }
        missing
    }

    pub fn validate(&self) -> Result<()> {
        let missing = self.missing_vars();
        if !missing.is_empty() {
            return Err(ImageGenError::Config(format!(
                "Missing required environment variables: {}",
                missing.join(", ")
            )));
        }
        self.vertex.credentials_source()?;
        Ok(())
    }

    pub(crate) fn http_client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = self.request_timeout {
            builder = builder.timeout(timeout);
        }
        builder
            .build()
            .map_err(|e| ImageGenError::Config(format!("Failed to build HTTP client: {}", e)))
    }
}
