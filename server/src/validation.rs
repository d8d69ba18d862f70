use crate::error::ApiError;

/// Only WAV is produced; `None` means the default.
const SUPPORTED_RESPONSE_FORMATS: [&str; 1] = ["wav"];

/// Validate the text to synthesize
pub fn validate_text(text: &str) -> Result<(), ApiError> {
    if text.trim().is_empty() {
        return Err(ApiError::InvalidInput("Text cannot be empty".to_string()));
    }
    Ok(())
}

/// A request may name a voice or upload one, not both.
pub fn validate_voice_inputs(voice: Option<&str>, has_upload: bool) -> Result<(), ApiError> {
    if voice.is_some() && has_upload {
        return Err(ApiError::InvalidInput(
            "Cannot provide both voice_url and voice_wav. Please choose one.".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_response_format(format: Option<&str>) -> Result<(), ApiError> {
    match format {
        None => Ok(()),
        Some(f) if SUPPORTED_RESPONSE_FORMATS.contains(&f.to_ascii_lowercase().as_str()) => Ok(()),
        Some(f) => Err(ApiError::InvalidInput(format!(
            "Unsupported response_format '{f}'. Supported: {}",
            SUPPORTED_RESPONSE_FORMATS.join(", ")
        ))),
    }
}
