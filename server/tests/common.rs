//! Common utilities for integration tests
#![allow(dead_code)]

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::{body::Body, http::Request, Router};
use tempfile::TempDir;
use tts_core::{
    AudioChunks, ConditioningState, FsPersonaStore, GenerationConfig, GenerationEngine, LocalFs,
    VoiceResolver, VoiceSpecifier,
};

use server::{build_router, AppState, ServerConfig};

pub const CHUNK_SAMPLES: usize = 240;
pub const CHUNKS: usize = 3;

/// Engine that records what it was asked to do and returns a fixed tone.
#[derive(Default)]
pub struct FakeEngine {
    condition_calls: AtomicUsize,
    conditioned: Mutex<Vec<VoiceSpecifier>>,
    configs: Mutex<Vec<GenerationConfig>>,
    fail_generation: bool,
}

impl FakeEngine {
    pub fn failing() -> Self {
        Self {
            fail_generation: true,
            ..Default::default()
        }
    }

    pub fn condition_calls(&self) -> usize {
        self.condition_calls.load(Ordering::SeqCst)
    }

    pub fn conditioned(&self) -> Vec<VoiceSpecifier> {
        self.conditioned.lock().unwrap().clone()
    }

    pub fn last_config(&self) -> Option<GenerationConfig> {
        self.configs.lock().unwrap().last().cloned()
    }
}

impl GenerationEngine for FakeEngine {
    fn sample_rate(&self) -> u32 {
        24_000
    }

    fn condition(&self, voice: &VoiceSpecifier) -> tts_core::Result<ConditioningState> {
        self.condition_calls.fetch_add(1, Ordering::SeqCst);
        self.conditioned.lock().unwrap().push(voice.clone());
        let name = voice.identity().unwrap_or_else(|| "upload".to_string());
        Ok(ConditioningState::new(name, ()).with_size(1024))
    }

    fn generate<'a>(
        &'a self,
        _state: &'a ConditioningState,
        _text: &'a str,
        config: &'a GenerationConfig,
    ) -> anyhow::Result<AudioChunks<'a>> {
        self.configs.lock().unwrap().push(config.clone());
        if self.fail_generation {
            return Ok(Box::new(
                vec![
                    Ok(vec![0.1f32; CHUNK_SAMPLES]),
                    Err(anyhow::anyhow!("fake engine failure")),
                ]
                .into_iter(),
            ));
        }
        Ok(Box::new((0..CHUNKS).map(|_| Ok(vec![0.25f32; CHUNK_SAMPLES]))))
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub engine: Arc<FakeEngine>,
    pub dir: TempDir,
}

impl TestApp {
    pub fn voices_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("voices")
    }
}

const NARRATOR_PERSONA: &str = "---
name: Narrator
temperature: 0.9
speed: 0.8
---
Calm, slow storytelling voice.
";

const ALICE_PERSONA: &str = "---
name: Alice
voice: alice
---
";

/// App backed by a fake engine, two personas and a small voices directory.
pub fn create_test_app() -> TestApp {
    create_test_app_with(FakeEngine::default())
}

pub fn create_test_app_with(engine: FakeEngine) -> TestApp {
    let dir = tempfile::tempdir().unwrap();

    let personas = dir.path().join("personas");
    fs::create_dir_all(&personas).unwrap();
    fs::write(personas.join("narrator.md"), NARRATOR_PERSONA).unwrap();
    fs::write(personas.join("alice.md"), ALICE_PERSONA).unwrap();

    let voices = dir.path().join("voices");
    fs::create_dir_all(voices.join("lfs-only")).unwrap();
    fs::write(voices.join("alice.wav"), vec![0u8; 2000]).unwrap();
    // Git LFS pointer sized file, too small to be a real voice.
    fs::write(voices.join("lfs-only").join("a.wav"), vec![0u8; 500]).unwrap();

    let resolver = VoiceResolver::new(Arc::new(LocalFs), &voices)
        .with_current_voice_marker(dir.path().join(".current_voice"));

    let engine = Arc::new(engine);
    let state = AppState::new(
        engine.clone(),
        resolver,
        Arc::new(FsPersonaStore::new(&personas)),
        GenerationConfig::default(),
    );
    let router = build_router(state.clone(), &ServerConfig::default());

    TestApp {
        router,
        state,
        engine,
        dir,
    }
}

pub fn json_request(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a [u8]),
}

const BOUNDARY: &str = "X-TTS-TEST-BOUNDARY";

pub fn multipart_request(uri: &str, parts: &[Part<'_>]) -> Request<Body> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                        .as_bytes(),
                );
            }
            Part::File(name, filename, data) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
                body.extend_from_slice(b"\r\n");
            }
        }
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

/// Size of a successful fake-engine response body.
pub fn expected_wav_len() -> usize {
    44 + CHUNKS * CHUNK_SAMPLES * 2
}
