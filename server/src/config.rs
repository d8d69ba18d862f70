// Configuration for the speech server, read from the environment

use std::num::NonZeroUsize;
use std::path::PathBuf;

use tts_core::config::DEFAULT_DEVICE;
use tts_core::voice::FALLBACK_VOICE;

pub const DEFAULT_STREAM_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_allowed_origins: Option<Vec<String>>,
    /// Local voice files and mirrored remote assets.
    pub voices_dir: PathBuf,
    pub personas_dir: PathBuf,
    /// Last-used-voice marker written by other tooling.
    pub current_voice_file: PathBuf,
    pub default_voice: String,
    pub pocket_bin: PathBuf,
    pub model_config: Option<PathBuf>,
    pub device: String,
    /// Where exported voice embeddings are kept.
    pub voice_cache_dir: PathBuf,
    /// `None` keeps every conditioning state for the process lifetime.
    pub voice_cache_capacity: Option<NonZeroUsize>,
    /// Chunks buffered per stream; 0 means unbounded.
    pub stream_channel_capacity: usize,
    /// `None` serializes generation only on CUDA devices.
    pub serialize_generation: Option<bool>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_allowed_origins: None,
            voices_dir: PathBuf::from("tts-voices"),
            personas_dir: PathBuf::from("./personas"),
            current_voice_file: PathBuf::from(".current_voice"),
            default_voice: FALLBACK_VOICE.to_string(),
            pocket_bin: PathBuf::from("pocket-tts"),
            model_config: None,
            device: DEFAULT_DEVICE.to_string(),
            voice_cache_dir: std::env::temp_dir().join("tts-server-voices"),
            voice_cache_capacity: None,
            stream_channel_capacity: DEFAULT_STREAM_CHANNEL_CAPACITY,
            serialize_generation: None,
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let host = env_string("HOST").unwrap_or(defaults.host);

        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port);

        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .ok()
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            });

        let personas_dir = env_string("PERSONAS_DIR")
            .or_else(|| env_string("POCKET_TTS_PERSONAS_DIR"))
            .map(PathBuf::from)
            .unwrap_or(defaults.personas_dir);

        let voice_cache_capacity = std::env::var("VOICE_CACHE_CAPACITY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .and_then(NonZeroUsize::new);

        let stream_channel_capacity = std::env::var("STREAM_CHANNEL_CAPACITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.stream_channel_capacity);

        let serialize_generation = env_string("SERIALIZE_GENERATION")
            .as_deref()
            .and_then(parse_bool);

        Self {
            host,
            port,
            cors_allowed_origins,
            voices_dir: env_string("VOICES_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.voices_dir),
            personas_dir,
            current_voice_file: env_string("CURRENT_VOICE_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.current_voice_file),
            default_voice: env_string("DEFAULT_VOICE").unwrap_or(defaults.default_voice),
            pocket_bin: env_string("POCKET_TTS_BIN")
                .map(PathBuf::from)
                .unwrap_or(defaults.pocket_bin),
            model_config: env_string("POCKET_TTS_CONFIG").map(PathBuf::from),
            device: env_string("TTS_DEVICE").unwrap_or(defaults.device),
            voice_cache_dir: env_string("VOICE_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.voice_cache_dir),
            voice_cache_capacity,
            stream_channel_capacity,
            serialize_generation,
        }
    }
}
