//! Personas: named bundles of generation overrides plus a default voice.
//!
//! A persona lives in `<dir>/<name>.md` as Markdown with a YAML frontmatter
//! block. Files are read again on every lookup so edits apply to the next
//! request without a restart.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::config::GenerationOverrides;
use crate::error::{Result, TtsError};

const PERSONA_EXTENSION: &str = "md";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PersonaDescriptor {
    #[serde(default)]
    pub name: Option<String>,
    /// Voice token used when the request does not name one.
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(flatten)]
    pub overrides: GenerationOverrides,
}

/// Persisted persona collection.
pub trait PersonaStore: Send + Sync {
    /// Load one persona; `TtsError::NotFound` when it does not exist.
    fn load(&self, name: &str) -> Result<PersonaDescriptor>;

    /// Persona names in sorted order.
    fn list(&self) -> Result<Vec<String>>;
}

/// Personas stored as Markdown files in a single directory.
#[derive(Debug, Clone)]
pub struct FsPersonaStore {
    dir: PathBuf,
}

impl FsPersonaStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl PersonaStore for FsPersonaStore {
    fn load(&self, name: &str) -> Result<PersonaDescriptor> {
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            return Err(TtsError::NotFound(format!("Persona '{name}' not found")));
        }

        let file = self.dir.join(format!("{name}.{PERSONA_EXTENSION}"));
        if !file.is_file() {
            return Err(TtsError::NotFound(format!(
                "Persona '{name}' not found at '{}'",
                file.display()
            )));
        }

        let text = fs::read_to_string(&file)?;
        debug!(persona = name, path = %file.display(), "Loaded persona file");
        parse_persona(&text)
            .map_err(|e| TtsError::Validation(format!("Persona '{name}' is malformed: {e}")))
    }

    fn list(&self) -> Result<Vec<String>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == PERSONA_EXTENSION) {
                if let Some(stem) = path.file_stem() {
                    names.push(stem.to_string_lossy().to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Parse the frontmatter of a persona document. No frontmatter means an
/// empty persona, not an error.
pub fn parse_persona(text: &str) -> std::result::Result<PersonaDescriptor, serde_yaml::Error> {
    let Some(frontmatter) = split_frontmatter(text) else {
        return Ok(PersonaDescriptor::default());
    };

    let value: serde_yaml::Value = serde_yaml::from_str(frontmatter)?;
    if value.is_null() {
        return Ok(PersonaDescriptor::default());
    }
    serde_yaml::from_value(value)
}

/// The YAML between a leading `---` line and the next line starting with `---`.
fn split_frontmatter(text: &str) -> Option<&str> {
    let rest = text.strip_prefix("---")?;
    let newline = rest.find('\n')?;
    if !rest[..newline].trim().is_empty() {
        return None;
    }
    let body = &rest[newline + 1..];
    let end = body.find("\n---")?;
    Some(&body[..end])
}
