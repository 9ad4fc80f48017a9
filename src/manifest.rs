//! Project manifest flags.
//!
//! The manifest is the project's `package.json`. Only a handful of keys are
//! consumed; everything else in the file is ignored.

use std::fs;

use camino::Utf8Path;
use serde::Deserialize;

use crate::error::ConfigError;

/// Flags and metadata read once at startup.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Manifest {
    /// Use the Magento theme layout.
    pub magento: bool,
    /// Use the Websphere store layout.
    pub websphere: bool,
    /// Emit inline source maps where the tools support it.
    pub debug: bool,
    /// Minify harder and report sizes.
    pub production: bool,
    /// Report failures in the console instead of desktop notifications.
    pub notify_via_console: bool,
    /// Treat the session as interactive even without a live server.
    pub enable_sync: bool,
    pub name: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
}

impl Manifest {
    /// Reads the manifest at `path`. A missing file yields the default
    /// manifest, a malformed one is a configuration error.
    pub fn load(path: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(%path, "manifest not found, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::ManifestRead {
                    path: path.to_owned(),
                    source,
                });
            }
        };

        Self::parse(&text).map_err(|source| ConfigError::ManifestParse {
            path: path.to_owned(),
            source,
        })
    }

    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Identifier used to namespace the service worker cache.
    pub fn cache_id(&self) -> &str {
        self.name
            .as_deref()
            .or(self.description.as_deref())
            .unwrap_or("gantry")
    }

    pub(crate) fn project_name(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed project")
    }
}
