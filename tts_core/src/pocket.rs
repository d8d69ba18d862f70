//! [`GenerationEngine`] that drives the `pocket-tts` command line tool.
//!
//! Conditioning exports a voice prompt to a `.safetensors` embedding once;
//! generation spawns `pocket-tts generate --output-path -` and streams the
//! WAV it writes to stdout.

use std::fs;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::Arc;

use anyhow::{bail, Context};
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::assets::AssetStore;
use crate::config::GenerationConfig;
use crate::engine::{AudioChunks, ConditioningState, GenerationEngine};
use crate::error::{Result, TtsError};
use crate::voice::{VoiceSpecifier, EMBEDDING_EXTENSION};

/// Output rate of the Mimi codec behind pocket-tts.
pub const POCKET_SAMPLE_RATE: u32 = 24_000;

/// Samples handed downstream per chunk (80 ms at 24 kHz).
const SAMPLES_PER_CHUNK: usize = 1920;

/// Conditioning state produced by [`PocketCliEngine`]: an exported voice embedding.
#[derive(Debug)]
pub struct PromptEmbedding {
    path: PathBuf,
    // Keeps an upload's scratch directory alive as long as the state.
    _scratch: Option<TempDir>,
}

impl PromptEmbedding {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub struct PocketCliEngine {
    program: PathBuf,
    model_config: Option<PathBuf>,
    assets: Arc<dyn AssetStore>,
    export_dir: PathBuf,
}

impl PocketCliEngine {
    pub fn new(
        program: impl Into<PathBuf>,
        assets: Arc<dyn AssetStore>,
        export_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            model_config: None,
            assets,
            export_dir: export_dir.into(),
        }
    }

    /// Model config file or variant name passed through as `--config`.
    pub fn with_model_config(mut self, config: Option<PathBuf>) -> Self {
        self.model_config = config;
        self
    }

    fn command(&self, subcommand: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg(subcommand);
        if let Some(config) = &self.model_config {
            cmd.arg("--config").arg(config);
        }
        cmd
    }

    /// Run `pocket-tts export-voice` and return the embedding path.
    fn export_voice(&self, input: &Path, output: &Path, truncate: bool) -> anyhow::Result<()> {
        let mut cmd = self.command("export-voice");
        cmd.arg(input).arg(output).arg("-q");
        if truncate {
            cmd.arg("--truncate");
        }
        debug!(input = %input.display(), output = %output.display(), "Exporting voice embedding");

        let out = cmd
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to run {}", self.program.display()))?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            bail!(
                "export-voice for '{}' exited with {}: {}",
                input.display(),
                out.status,
                stderr.trim()
            );
        }
        if !output.is_file() {
            bail!("export-voice did not produce '{}'", output.display());
        }
        Ok(())
    }

    /// Export a local audio file into the shared export directory, keyed by
    /// content so the same prompt is only exported once.
    fn embedding_for_file(&self, input: &Path) -> Result<PathBuf> {
        if input.extension().is_some_and(|ext| ext == EMBEDDING_EXTENSION) {
            return Ok(input.to_path_buf());
        }

        let data = fs::read(input)?;
        let digest = hex::encode(Sha256::digest(&data));
        let output = self
            .export_dir
            .join(format!("{}.{EMBEDDING_EXTENSION}", &digest[..16]));
        if output.is_file() {
            debug!(path = %output.display(), "Reusing exported voice embedding");
            return Ok(output);
        }

        fs::create_dir_all(&self.export_dir)?;
        self.export_voice(input, &output, false)?;
        Ok(output)
    }

    fn state(voice: String, path: PathBuf, scratch: Option<TempDir>) -> ConditioningState {
        let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        ConditioningState::new(
            voice,
            PromptEmbedding {
                path,
                _scratch: scratch,
            },
        )
        .with_size(size)
    }
}

impl GenerationEngine for PocketCliEngine {
    fn sample_rate(&self) -> u32 {
        POCKET_SAMPLE_RATE
    }

    fn condition(&self, voice: &VoiceSpecifier) -> Result<ConditioningState> {
        match voice {
            VoiceSpecifier::RemoteUrl(reference) | VoiceSpecifier::PredefinedName(reference) => {
                let local = self.assets.locate(reference)?;
                let embedding = self.embedding_for_file(&local)?;
                Ok(Self::state(reference.clone(), embedding, None))
            }
            VoiceSpecifier::LocalFilePath(path)
            | VoiceSpecifier::LocalDirectory { selected: path, .. } => {
                let embedding = self.embedding_for_file(path)?;
                Ok(Self::state(path.display().to_string(), embedding, None))
            }
            VoiceSpecifier::UploadedBlob(upload) => {
                let scratch = tempfile::Builder::new().prefix("voice-upload").tempdir()?;
                let input = scratch.path().join(format!("prompt{}", upload.suffix()));
                fs::write(&input, &upload.data)?;
                let output = scratch.path().join(format!("prompt.{EMBEDDING_EXTENSION}"));
                self.export_voice(&input, &output, true)?;
                info!(bytes = upload.data.len(), "Conditioned uploaded voice");
                Ok(Self::state("upload".to_string(), output, Some(scratch)))
            }
        }
    }

    fn generate<'a>(
        &'a self,
        state: &'a ConditioningState,
        text: &'a str,
        config: &'a GenerationConfig,
    ) -> anyhow::Result<AudioChunks<'a>> {
        let embedding = state.downcast_ref::<PromptEmbedding>().ok_or_else(|| {
            anyhow::anyhow!(
                "conditioning state for '{}' was not built by pocket-tts",
                state.voice()
            )
        })?;

        let mut cmd = self.command("generate");
        cmd.arg("--text")
            .arg(text)
            .arg("--voice")
            .arg(embedding.path())
            .arg("--output-path")
            .arg("-")
            .arg("-q")
            .arg("--temperature")
            .arg(config.temperature.to_string())
            .arg("--lsd-decode-steps")
            .arg(config.lsd_decode_steps.to_string())
            .arg("--eos-threshold")
            .arg(config.eos_threshold.to_string())
            .arg("--speed")
            .arg(config.speed.to_string())
            .arg("--device")
            .arg(&config.device)
            .arg("--max-tokens")
            .arg(config.max_tokens.to_string());
        if let Some(clamp) = config.noise_clamp {
            cmd.arg("--noise-clamp").arg(clamp.to_string());
        }
        if let Some(frames) = config.frames_after_eos {
            cmd.arg("--frames-after-eos").arg(frames.to_string());
        }
        if config.uses_cuda() {
            // CUDA graph capture breaks under concurrent callers.
            cmd.env("NO_CUDA_GRAPH", "1");
        }

        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.program.display()))?;
        let stdout = child
            .stdout
            .take()
            .context("pocket-tts stdout was not captured")?;

        let pcm = match open_pcm_stream(stdout) {
            Ok(pcm) => pcm,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        };

        Ok(Box::new(CliAudioStream {
            child: Some(child),
            pcm,
        }))
    }
}

/// Parse the WAV header on stdout and return a reader positioned at the PCM
/// payload. Only mono 16-bit integer output is accepted.
fn open_pcm_stream(stdout: ChildStdout) -> anyhow::Result<BufReader<ChildStdout>> {
    let reader = hound::WavReader::new(BufReader::new(stdout))
        .context("pocket-tts did not produce a WAV stream")?;
    let spec = reader.spec();
    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        bail!(
            "unsupported pocket-tts output format: {:?} {} bit",
            spec.sample_format,
            spec.bits_per_sample
        );
    }
    if spec.channels != 1 {
        bail!("expected mono output, got {} channels", spec.channels);
    }
    if spec.sample_rate != POCKET_SAMPLE_RATE {
        warn!(
            sample_rate = spec.sample_rate,
            "pocket-tts reported an unexpected sample rate"
        );
    }
    // The header of a stream written to a pipe carries a placeholder length,
    // so PCM is read until EOF rather than up to the declared size.
    Ok(reader.into_inner())
}

struct CliAudioStream {
    child: Option<Child>,
    pcm: BufReader<ChildStdout>,
}

impl CliAudioStream {
    fn read_chunk(&mut self) -> io::Result<Vec<f32>> {
        let mut buf = vec![0u8; SAMPLES_PER_CHUNK * 2];
        let mut filled = 0;
        while filled < buf.len() {
            match self.pcm.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        // A trailing odd byte is not a sample.
        buf.truncate(filled - filled % 2);
        Ok(buf
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
            .collect())
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child.wait().context("failed to wait for pocket-tts")?;
        if !status.success() {
            bail!("pocket-tts generate exited with {status}");
        }
        Ok(())
    }
}

impl Iterator for CliAudioStream {
    type Item = anyhow::Result<Vec<f32>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.child.as_ref()?;
        match self.read_chunk() {
            Ok(samples) if !samples.is_empty() => Some(Ok(samples)),
            Ok(_) => self.finish().err().map(Err),
            Err(e) => {
                self.finish().ok();
                Some(Err(anyhow::Error::new(e).context("reading pocket-tts output")))
            }
        }
    }
}

impl Drop for CliAudioStream {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            // Consumer stopped early; do not leave the generator running.
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
