use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::idp::metadata::IdpSettings;
use crate::parsers::sp_metadata::{self, SpMetadata};

/// Run configuration loaded from a `spconform.toml` file.
///
/// Relative paths in the file resolve against the file's directory.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub idp: IdpConfig,
    pub sp: SpConfig,
    pub timeouts: Timeouts,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct IdpConfig {
    #[serde(flatten)]
    pub settings: IdpSettings,
    /// PEM certificate; an ephemeral pair is generated when unset.
    pub certificate: Option<PathBuf>,
    pub private_key: Option<PathBuf>,
}

/// What the tester knows about the SP besides its messages.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpConfig {
    pub metadata: Option<PathBuf>,
    /// Page that makes the SP send an AuthnRequest.
    pub login_url: Option<String>,
    /// Overrides the ACS taken from the request or the metadata.
    pub acs_url: Option<String>,
    /// HTTP status of the page the SP answers a successful login with.
    pub login_status_code: u16,
    /// Text that page must contain.
    pub login_content: Option<String>,
    pub attributes: Vec<SamlAttribute>,
}

impl Default for SpConfig {
    fn default() -> Self {
        Self {
            metadata: None,
            login_url: None,
            acs_url: None,
            login_status_code: 200,
            login_content: None,
            attributes: Vec::new(),
        }
    }
}

/// An attribute the SP expects, released verbatim in every Assertion.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SamlAttribute {
    pub name: String,
    pub name_format: Option<String>,
    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub login_seconds: u64,
    pub metadata_fetch_seconds: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            login_seconds: 30,
            metadata_fetch_seconds: 10,
        }
    }
}

impl Timeouts {
    pub fn login(&self) -> Duration {
        Duration::from_secs(self.login_seconds)
    }

    pub fn metadata_fetch(&self) -> Duration {
        Duration::from_secs(self.metadata_fetch_seconds)
    }
}

impl RunConfig {
    /// Load the configuration file, or the defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(RunConfig::default());
        };

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let mut config: RunConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_paths(base_dir);
        Ok(config)
    }

    fn resolve_paths(&mut self, base_dir: &Path) {
        for p in [
            &mut self.sp.metadata,
            &mut self.idp.certificate,
            &mut self.idp.private_key,
        ] {
            if let Some(path) = p.as_mut() {
                if path.is_relative() {
                    *path = base_dir.join(&*path);
                }
            }
        }
    }
}

impl SpConfig {
    /// The SP metadata, or `None` when it is not configured, unreadable or
    /// not well-formed. The metadata checks report on the absence.
    pub fn load_metadata(&self) -> Option<SpMetadata> {
        let path = self.metadata.as_ref()?;
        match sp_metadata::parse_file(path) {
            Ok(metadata) => {
                tracing::info!(path = %path.display(), "Loaded SP metadata");
                Some(metadata)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %format!("{:#}", e), "SP metadata unavailable");
                None
            }
        }
    }
}
