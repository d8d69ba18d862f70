use axum::{
    body::Body,
    extract::{Multipart, State},
    http::{header, StatusCode},
    response::Response,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};
use tts_core::{
    voice::PREDEFINED_VOICES, GenerationConfig, GenerationOverrides, StreamSession, VoiceRequest,
    VoiceUpload,
};

use crate::error::ApiError;
use crate::state::AppState;
use crate::validation::{validate_response_format, validate_text, validate_voice_inputs};

const AUDIO_MEDIA_TYPE: &str = "audio/wav";
const ATTACHMENT_DISPOSITION: &str = "attachment; filename=generated_speech.wav";

fn default_model() -> String {
    "pocket-tts".to_string()
}

/// OpenAI-compatible speech request.
#[derive(Debug, Deserialize)]
pub struct SpeechRequest {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub persona: Option<String>,
    #[serde(default)]
    pub response_format: Option<String>,
    #[serde(default)]
    pub speed: Option<f32>,
}

/// Blank form fields and JSON strings count as absent.
fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

pub async fn list_personas(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.personas.list()?))
}

pub async fn list_voices() -> Json<Vec<String>> {
    Json(PREDEFINED_VOICES.iter().map(|v| v.to_string()).collect())
}

pub async fn openai_speech(
    State(state): State<AppState>,
    Json(req): Json<SpeechRequest>,
) -> Result<Response, ApiError> {
    validate_text(&req.input)?;
    validate_response_format(non_empty(req.response_format.as_deref()))?;

    let persona = state.load_persona(non_empty(req.persona.as_deref()))?;
    let voice = state.voices.resolve(VoiceRequest {
        voice: non_empty(req.voice.as_deref()),
        persona_voice: persona.voice.as_deref(),
        upload: None,
    })?;

    let request_overrides = GenerationOverrides {
        speed: req.speed,
        ..Default::default()
    };
    let config = GenerationConfig::resolve(&request_overrides, &persona.overrides, &state.defaults);
    info!(
        model = %req.model,
        voice = %voice.requested,
        chars = req.input.len(),
        "Speech request"
    );

    let conditioning = state.conditioning_for(&voice).await?;
    let session = state.start_stream(conditioning, req.input, config);
    Ok(audio_response(session, false))
}

pub async fn tts(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut text = None;
    let mut voice_url = None;
    let mut persona_name = None;
    let mut upload = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "text" => text = Some(field.text().await?),
            "voice_url" => voice_url = Some(field.text().await?),
            "persona" => persona_name = Some(field.text().await?),
            "voice_wav" => {
                let filename = field.file_name().map(str::to_string);
                let data = field.bytes().await?;
                // Browsers send an empty part for an untouched file input.
                if !data.is_empty() {
                    upload = Some(VoiceUpload { filename, data });
                }
            }
            other => debug!("Ignoring multipart field '{other}'"),
        }
    }

    let text = text.unwrap_or_default();
    validate_text(&text)?;
    let voice_url = non_empty(voice_url.as_deref());
    validate_voice_inputs(voice_url, upload.is_some())?;

    let persona = state.load_persona(non_empty(persona_name.as_deref()))?;
    let persona_voice = non_empty(persona.voice.as_deref());

    let voice = if voice_url.is_none() && upload.is_none() && persona_voice.is_none() {
        state.voices.resolve_default()?
    } else {
        state.voices.resolve(VoiceRequest {
            voice: voice_url,
            persona_voice,
            upload,
        })?
    };

    let config = GenerationConfig::resolve(
        &GenerationOverrides::default(),
        &persona.overrides,
        &state.defaults,
    );
    info!(voice = %voice.requested, chars = text.len(), "TTS request");

    let conditioning = state.conditioning_for(&voice).await?;
    let session = state.start_stream(conditioning, text, config);
    Ok(audio_response(session, true))
}

/// Chunked `audio/wav` response fed by the stream session.
fn audio_response(session: StreamSession, attachment: bool) -> Response {
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, AUDIO_MEDIA_TYPE);
    if attachment {
        builder = builder.header(header::CONTENT_DISPOSITION, ATTACHMENT_DISPOSITION);
    }
    builder
        .body(Body::from_stream(session.into_body_stream()))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}
