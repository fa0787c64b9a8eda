use serde::{Deserialize, Serialize};
use std::fmt;

/// Third-party image-generation provider an adapter talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Hosted model marketplace, returns remote URLs.
    Replicate,
    /// Cloud vision model API, returns inline image bytes.
    Vertex,
}

impl Backend {
    pub const ALL: [Backend; 2] = [Backend::Replicate, Backend::Vertex];

    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Replicate => "replicate",
            Backend::Vertex => "vertex",
        }
    }

    pub fn vendor_name(&self) -> &'static str {
        match self {
            Backend::Replicate => "Replicate",
            Backend::Vertex => "Vertex AI",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    /// Opaque identifier forwarded to the backend.
    pub path: String,
    pub description: String,
}

impl ModelDescriptor {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            description: description.into(),
        }
    }
}
