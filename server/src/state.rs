use std::sync::Arc;

use tracing::{debug, info};
use tts_core::{
    wav, AssetStore, ConditioningState, ConditioningStateCache, FsPersonaStore,
    GenerationConfig, GenerationEngine, GenerationGate, LocalAssetStore, LocalFs,
    PersonaDescriptor, PersonaStore, PocketCliEngine, ResolvedVoice, StateCache, StreamSession,
    TtsError, VoiceResolver,
};

use crate::config::{ServerConfig, DEFAULT_STREAM_CHANNEL_CAPACITY};
use crate::error::ApiError;

/// Everything a request handler needs, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<dyn GenerationEngine>,
    pub voices: Arc<VoiceResolver>,
    pub personas: Arc<dyn PersonaStore>,
    pub states: Arc<ConditioningStateCache>,
    pub defaults: GenerationConfig,
    pub gate: GenerationGate,
    pub stream_capacity: usize,
}

impl AppState {
    /// Unbounded state cache, generation serialized only on CUDA devices.
    pub fn new(
        engine: Arc<dyn GenerationEngine>,
        voices: VoiceResolver,
        personas: Arc<dyn PersonaStore>,
        defaults: GenerationConfig,
    ) -> Self {
        let gate = if defaults.uses_cuda() {
            GenerationGate::serialized()
        } else {
            GenerationGate::concurrent()
        };
        Self {
            engine,
            voices: Arc::new(voices),
            personas,
            states: Arc::new(StateCache::unbounded()),
            defaults,
            gate,
            stream_capacity: DEFAULT_STREAM_CHANNEL_CAPACITY,
        }
    }

    pub fn with_state_cache(mut self, states: ConditioningStateCache) -> Self {
        self.states = Arc::new(states);
        self
    }

    pub fn with_gate(mut self, gate: GenerationGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_stream_capacity(mut self, capacity: usize) -> Self {
        self.stream_capacity = capacity;
        self
    }

    /// Wire up the pocket-tts engine and file-backed collaborators.
    pub fn from_config(config: &ServerConfig) -> Self {
        let assets: Arc<dyn AssetStore> = Arc::new(LocalAssetStore::new(&config.voices_dir));
        let engine = PocketCliEngine::new(&config.pocket_bin, assets, &config.voice_cache_dir)
            .with_model_config(config.model_config.clone());

        let voices = VoiceResolver::new(Arc::new(LocalFs), &config.voices_dir)
            .with_current_voice_marker(&config.current_voice_file)
            .with_default_voice(&config.default_voice);

        let defaults = GenerationConfig {
            device: config.device.clone(),
            ..GenerationConfig::default()
        };

        let mut state = Self::new(
            Arc::new(engine),
            voices,
            Arc::new(FsPersonaStore::new(&config.personas_dir)),
            defaults,
        )
        .with_stream_capacity(config.stream_channel_capacity);

        if let Some(capacity) = config.voice_cache_capacity {
            state = state.with_state_cache(StateCache::new(capacity));
        }
        if let Some(serialize) = config.serialize_generation {
            state = state.with_gate(if serialize {
                GenerationGate::serialized()
            } else {
                GenerationGate::concurrent()
            });
        }
        state
    }

    /// A named persona that does not exist is a client error.
    pub fn load_persona(&self, name: Option<&str>) -> Result<PersonaDescriptor, ApiError> {
        let Some(name) = name else {
            return Ok(PersonaDescriptor::default());
        };
        match self.personas.load(name) {
            Ok(persona) => {
                debug!(persona = name, "Using persona");
                Ok(persona)
            }
            Err(TtsError::NotFound(_)) => Err(ApiError::InvalidInput(format!(
                "Persona '{name}' not found."
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Conditioning state for a resolved voice. Voices with an identity go
    /// through the shared cache; uploads are conditioned for this request only.
    pub async fn conditioning_for(
        &self,
        voice: &ResolvedVoice,
    ) -> Result<Arc<ConditioningState>, ApiError> {
        let engine = self.engine.clone();
        let specifier = voice.specifier.clone();
        let compute = move || async move {
            match tokio::task::spawn_blocking(move || engine.condition(&specifier)).await {
                Ok(result) => result,
                Err(e) => Err(TtsError::Generation(anyhow::anyhow!(
                    "conditioning task failed: {e}"
                ))),
            }
        };

        match voice.identity() {
            Some(key) => Ok(self.states.get_or_compute(&key, compute).await?),
            None => Ok(Arc::new(compute().await?)),
        }
    }

    /// Condition the configured default voice so the first request does not pay for it.
    pub async fn preload_default_voice(&self) -> Result<Arc<ConditioningState>, ApiError> {
        let voice = self.voices.resolve_default()?;
        let state = self.conditioning_for(&voice).await?;
        info!(
            "Default voice '{}' loaded ({:.2} MB)",
            voice.requested,
            state.size_bytes() as f64 / (1024.0 * 1024.0)
        );
        Ok(state)
    }

    /// Start streaming `text` as WAV on a blocking worker.
    pub fn start_stream(
        &self,
        state: Arc<ConditioningState>,
        text: String,
        config: GenerationConfig,
    ) -> StreamSession {
        let engine = self.engine.clone();
        let gate = self.gate.clone();
        StreamSession::spawn(self.stream_capacity, move |sink| {
            let _turn = gate.enter();
            let sample_rate = engine.sample_rate();
            let chunks = engine.generate(&state, &text, &config)?;
            wav::stream_wav(sink, sample_rate, chunks)
        })
    }
}
