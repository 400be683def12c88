use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArkivConfig {
    /// Offer store root directory.
    pub root: PathBuf,
    /// Digest algorithm for writes and audits (blake3, sha256).
    pub digest_algorithm: String,
    pub validator_pool_size: usize,
    pub cursor_page_size: usize,
    /// Reconstruction checkpoint file, relative to `root` unless absolute.
    pub offsets_file: PathBuf,
    pub rebuild: RebuildSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RebuildSection {
    pub bulk_size: usize,
    pub retry_budget: usize,
    pub backoff_max_ms: u64,
}

impl Default for ArkivConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./arkiv-data"),
            digest_algorithm: "blake3".to_string(),
            validator_pool_size: 4,
            cursor_page_size: 100,
            offsets_file: PathBuf::from("offsets.json"),
            rebuild: RebuildSection::default(),
        }
    }
}

impl Default for RebuildSection {
    fn default() -> Self {
        Self {
            bulk_size: 16,
            retry_budget: 1000,
            backoff_max_ms: 50,
        }
    }
}

impl ArkivConfig {
    /// Load from `path`, or fall back to the built-in defaults when no path
    /// is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                toml::from_str(&text)
                    .with_context(|| format!("parsing config {}", path.display()))
            }
            None => Ok(Self::default()),
        }
    }

    pub fn offsets_path(&self) -> PathBuf {
        if self.offsets_file.is_absolute() {
            self.offsets_file.clone()
        } else {
            self.root.join(&self.offsets_file)
        }
    }
}
