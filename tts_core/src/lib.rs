//! Voice-cloned streaming text-to-speech core: voice resolution, personas,
//! conditioning cache and the blocking-to-async audio bridge.

pub mod assets;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod persona;
pub mod pocket;
pub mod stream;
pub mod voice;
pub mod wav;

pub use assets::{AssetStore, LocalAssetStore};
pub use cache::{ConditioningStateCache, StateCache};
pub use config::{GenerationConfig, GenerationOverrides};
pub use engine::{AudioChunks, ConditioningState, GenerationEngine, GenerationGate};
pub use error::{Result, TtsError};
pub use persona::{FsPersonaStore, PersonaDescriptor, PersonaStore};
pub use pocket::{PocketCliEngine, POCKET_SAMPLE_RATE};
pub use stream::{ChunkSink, StreamItem, StreamSession};
pub use voice::{
    LocalFs, ResolvedVoice, VoiceFs, VoiceRequest, VoiceResolver, VoiceSpecifier, VoiceUpload,
};
