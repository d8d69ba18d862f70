//! Local mirror of remote voice assets.
//!
//! Remote references (`hf://owner/repo/path@rev`, `http(s)://.../file`) map to
//! files under a local assets root. Nothing is fetched here; a reference
//! whose file is missing is reported as not found.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, TtsError};
use crate::voice::predefined_voice_url;

/// Maps a voice reference to a file on local disk.
pub trait AssetStore: Send + Sync {
    fn locate(&self, reference: &str) -> Result<PathBuf>;
}

#[derive(Debug, Clone)]
pub struct LocalAssetStore {
    root: PathBuf,
}

impl LocalAssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative path of a reference below the assets root.
    pub fn relative_path(reference: &str) -> Option<PathBuf> {
        if let Some(rest) = reference.strip_prefix("hf://") {
            let without_rev = rest.split_once('@').map_or(rest, |(path, _)| path);
            let parts: Vec<&str> = without_rev.split('/').filter(|p| !p.is_empty()).collect();
            return match parts.as_slice() {
                // owner/file
                [_, file] => Some(PathBuf::from(file)),
                // owner/repo/path...
                [_, _, path @ ..] if !path.is_empty() => Some(path.iter().collect()),
                _ => None,
            };
        }

        let rest = reference
            .strip_prefix("https://")
            .or_else(|| reference.strip_prefix("http://"))?;
        let path = rest.split(['?', '#']).next().unwrap_or(rest);
        path.rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .map(PathBuf::from)
    }
}

impl AssetStore for LocalAssetStore {
    fn locate(&self, reference: &str) -> Result<PathBuf> {
        let reference = predefined_voice_url(reference).unwrap_or_else(|| reference.to_string());

        let relative = Self::relative_path(&reference).ok_or_else(|| {
            TtsError::Validation(format!("Unsupported voice reference '{reference}'"))
        })?;
        if relative.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
            return Err(TtsError::Validation(format!(
                "Unsupported voice reference '{reference}'"
            )));
        }

        let local = self.root.join(&relative);
        debug!(reference = %reference, path = %local.display(), "Locating voice asset");
        if local.is_file() {
            Ok(local)
        } else {
            Err(TtsError::NotFound(format!(
                "Voice asset '{reference}' is not available locally at '{}'",
                local.display()
            )))
        }
    }
}
