use thiserror::Error;

/// Errors surfaced by voice resolution, conditioning and generation.
#[derive(Debug, Error)]
pub enum TtsError {
    /// Empty, conflicting or otherwise unusable input.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// A persona, voice file or asset that is not present locally.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The generation routine (or the conditioning step feeding it) failed.
    #[error("Generation failed: {0:#}")]
    Generation(#[from] anyhow::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TtsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_error_keeps_context_chain() {
        let err = anyhow::anyhow!("exit status 1").context("pocket-tts generate");
        let msg = TtsError::from(err).to_string();
        assert!(msg.contains("pocket-tts generate"));
        assert!(msg.contains("exit status 1"));
    }
}
