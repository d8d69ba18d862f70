//! Generation parameters and their three-layer resolution.
//!
//! Every field resolves on its own: the request value wins, then the
//! persona value, then the compiled default. A persona that only sets
//! `temperature` still lets the request pick `speed`.

use serde::{Deserialize, Serialize};

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_LSD_DECODE_STEPS: u32 = 1;
pub const DEFAULT_EOS_THRESHOLD: f32 = -4.0;
pub const DEFAULT_SPEED: f32 = 1.0;
pub const DEFAULT_DEVICE: &str = "cpu";
pub const MAX_TOKENS_PER_CHUNK: u32 = 50;

/// Fully resolved parameters handed to the generation engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub lsd_decode_steps: u32,
    /// `None` leaves the sampling noise unclamped.
    pub noise_clamp: Option<f32>,
    pub eos_threshold: f32,
    /// `None` lets the engine decide how long to run past end-of-speech.
    pub frames_after_eos: Option<u32>,
    pub speed: f32,
    pub device: String,
    pub max_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            lsd_decode_steps: DEFAULT_LSD_DECODE_STEPS,
            noise_clamp: None,
            eos_threshold: DEFAULT_EOS_THRESHOLD,
            frames_after_eos: None,
            speed: DEFAULT_SPEED,
            device: DEFAULT_DEVICE.to_string(),
            max_tokens: MAX_TOKENS_PER_CHUNK,
        }
    }
}

/// One layer of optional overrides (a request, or a persona file).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GenerationOverrides {
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub lsd_decode_steps: Option<u32>,
    #[serde(default)]
    pub noise_clamp: Option<f32>,
    #[serde(default)]
    pub eos_threshold: Option<f32>,
    #[serde(default)]
    pub frames_after_eos: Option<u32>,
    #[serde(default)]
    pub speed: Option<f32>,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl GenerationConfig {
    /// Merge `request` over `persona` over `defaults`, field by field.
    pub fn resolve(
        request: &GenerationOverrides,
        persona: &GenerationOverrides,
        defaults: &GenerationConfig,
    ) -> Self {
        Self {
            temperature: request
                .temperature
                .or(persona.temperature)
                .unwrap_or(defaults.temperature),
            lsd_decode_steps: request
                .lsd_decode_steps
                .or(persona.lsd_decode_steps)
                .unwrap_or(defaults.lsd_decode_steps),
            noise_clamp: request
                .noise_clamp
                .or(persona.noise_clamp)
                .or(defaults.noise_clamp),
            eos_threshold: request
                .eos_threshold
                .or(persona.eos_threshold)
                .unwrap_or(defaults.eos_threshold),
            frames_after_eos: request
                .frames_after_eos
                .or(persona.frames_after_eos)
                .or(defaults.frames_after_eos),
            speed: request.speed.or(persona.speed).unwrap_or(defaults.speed),
            device: request
                .device
                .clone()
                .or_else(|| persona.device.clone())
                .unwrap_or_else(|| defaults.device.clone()),
            max_tokens: request
                .max_tokens
                .or(persona.max_tokens)
                .unwrap_or(defaults.max_tokens),
        }
    }

    /// CUDA graph capture does not tolerate concurrent multi-threaded calls.
    pub fn uses_cuda(&self) -> bool {
        self.device.contains("cuda")
    }
}
