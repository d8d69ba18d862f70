//! The seam between the server and whatever actually produces audio.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::GenerationConfig;
use crate::voice::VoiceSpecifier;

/// Precomputed voice conditioning, opaque to everything but the engine that
/// produced it. Immutable once built, so one state can back many concurrent
/// generations.
pub struct ConditioningState {
    voice: String,
    size_bytes: u64,
    inner: Box<dyn Any + Send + Sync>,
}

impl ConditioningState {
    pub fn new<T: Any + Send + Sync>(voice: impl Into<String>, inner: T) -> Self {
        Self {
            voice: voice.into(),
            size_bytes: 0,
            inner: Box::new(inner),
        }
    }

    /// Record the in-memory footprint, reported when the default voice is preloaded.
    pub fn with_size(mut self, size_bytes: u64) -> Self {
        self.size_bytes = size_bytes;
        self
    }

    pub fn voice(&self) -> &str {
        &self.voice
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

impl fmt::Debug for ConditioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditioningState")
            .field("voice", &self.voice)
            .field("size_bytes", &self.size_bytes)
            .finish_non_exhaustive()
    }
}

/// Lazily produced mono f32 chunks, in playback order.
pub type AudioChunks<'a> = Box<dyn Iterator<Item = anyhow::Result<Vec<f32>>> + Send + 'a>;

/// A voice-cloning TTS model. Both calls block and are run off the async runtime.
pub trait GenerationEngine: Send + Sync {
    fn sample_rate(&self) -> u32;

    /// Build the conditioning state for a voice. Expensive; callers cache it.
    fn condition(&self, voice: &VoiceSpecifier) -> crate::Result<ConditioningState>;

    /// Start generating `text` in the given voice.
    fn generate<'a>(
        &'a self,
        state: &'a ConditioningState,
        text: &'a str,
        config: &'a GenerationConfig,
    ) -> anyhow::Result<AudioChunks<'a>>;
}

/// Optional process-wide lock around generation, for backends that cannot run
/// two generations at once.
#[derive(Clone, Default)]
pub struct GenerationGate(Option<Arc<Mutex<()>>>);

impl GenerationGate {
    pub fn serialized() -> Self {
        Self(Some(Arc::new(Mutex::new(()))))
    }

    pub fn concurrent() -> Self {
        Self(None)
    }

    pub fn is_serialized(&self) -> bool {
        self.0.is_some()
    }

    /// Blocks until this caller may generate. The guard releases on drop.
    pub fn enter(&self) -> Option<MutexGuard<'_, ()>> {
        self.0
            .as_ref()
            .map(|lock| lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }
}

impl fmt::Debug for GenerationGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GenerationGate")
            .field(&self.is_serialized())
            .finish()
    }
}
