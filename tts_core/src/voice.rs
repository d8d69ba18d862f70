//! Voice resolution: turn whatever the caller handed us into one canonical
//! conditioning source.
//!
//! Resolution order is uploaded blob, explicit voice, persona voice, the
//! last-used-voice marker, then the built-in default. File probing goes
//! through [`VoiceFs`] so the rules can be exercised without touching disk.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{Result, TtsError};

/// Voices bundled with the upstream model, addressable by bare name.
pub const PREDEFINED_VOICES: [&str; 8] = [
    "alba", "marius", "javert", "jean", "fantine", "cosette", "eponine", "azelma",
];

const PREDEFINED_REPO: &str = "kyutai/pocket-tts-without-voice-cloning";
const PREDEFINED_REVISION: &str = "d4fdd22ae8c8e1cb3634e150ebeff1dab2d16df3";

/// Used when neither configuration nor the marker names a voice.
pub const FALLBACK_VOICE: &str = "azelma";

/// Raw audio extensions, in lookup priority order.
pub const AUDIO_EXTENSIONS: [&str; 5] = ["wav", "mp3", "flac", "ogg", "aiff"];

/// Precomputed conditioning embeddings.
pub const EMBEDDING_EXTENSION: &str = "safetensors";

/// Files at or below this size are unfetched LFS pointers, not voices.
pub const MIN_VOICE_FILE_BYTES: u64 = 1000;

const URL_SCHEMES: [&str; 3] = ["http://", "https://", "hf://"];

pub fn is_voice_url(token: &str) -> bool {
    URL_SCHEMES.iter().any(|scheme| token.starts_with(scheme))
}

pub fn is_predefined_voice(token: &str) -> bool {
    PREDEFINED_VOICES.contains(&token)
}

/// Remote location of a predefined voice embedding.
pub fn predefined_voice_url(name: &str) -> Option<String> {
    is_predefined_voice(name).then(|| {
        format!("hf://{PREDEFINED_REPO}/embeddings/{name}.{EMBEDDING_EXTENSION}@{PREDEFINED_REVISION}")
    })
}

/// A voice file uploaded with the request.
#[derive(Clone, PartialEq)]
pub struct VoiceUpload {
    pub filename: Option<String>,
    pub data: Bytes,
}

impl VoiceUpload {
    /// File suffix (with the dot) used when the upload has to be spooled to disk.
    pub fn suffix(&self) -> String {
        self.filename
            .as_deref()
            .and_then(|name| Path::new(name).extension())
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_else(|| ".wav".to_string())
    }
}

impl fmt::Debug for VoiceUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoiceUpload")
            .field("filename", &self.filename)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VoiceSpecifier {
    RemoteUrl(String),
    PredefinedName(String),
    LocalFilePath(PathBuf),
    /// A directory, together with the voice file picked from it.
    LocalDirectory { dir: PathBuf, selected: PathBuf },
    UploadedBlob(VoiceUpload),
}

impl VoiceSpecifier {
    /// Canonical identity used as the conditioning cache key. Uploads have
    /// none: they are conditioned once and never shared.
    pub fn identity(&self) -> Option<String> {
        match self {
            VoiceSpecifier::RemoteUrl(url) => Some(url.clone()),
            VoiceSpecifier::PredefinedName(name) => Some(name.clone()),
            VoiceSpecifier::LocalFilePath(path) => Some(path.display().to_string()),
            VoiceSpecifier::LocalDirectory { selected, .. } => Some(selected.display().to_string()),
            VoiceSpecifier::UploadedBlob(_) => None,
        }
    }

    /// Local file that conditions the voice, when there is one.
    pub fn local_file(&self) -> Option<&Path> {
        match self {
            VoiceSpecifier::LocalFilePath(path) => Some(path),
            VoiceSpecifier::LocalDirectory { selected, .. } => Some(selected),
            _ => None,
        }
    }
}

/// Outcome of resolution: the token that was picked and what it resolved to.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedVoice {
    pub requested: String,
    pub specifier: VoiceSpecifier,
}

impl ResolvedVoice {
    pub fn identity(&self) -> Option<String> {
        self.specifier.identity()
    }
}

/// The voice-related inputs of one request.
#[derive(Debug, Clone, Default)]
pub struct VoiceRequest<'a> {
    pub voice: Option<&'a str>,
    pub persona_voice: Option<&'a str>,
    pub upload: Option<VoiceUpload>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub len: u64,
}

impl FileEntry {
    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    fn has_extension(&self, ext: &str) -> bool {
        self.path.extension().is_some_and(|e| e == ext)
    }

    fn is_usable(&self) -> bool {
        self.len > MIN_VOICE_FILE_BYTES
    }
}

/// File-system view used by the resolver.
pub trait VoiceFs: Send + Sync {
    fn is_dir(&self, path: &Path) -> bool;
    fn is_file(&self, path: &Path) -> bool;
    /// Regular files directly inside `dir`.
    fn list_dir(&self, dir: &Path) -> Vec<FileEntry>;
    /// Regular files anywhere below `dir`.
    fn walk(&self, dir: &Path) -> Vec<FileEntry>;
    fn canonicalize(&self, path: &Path) -> PathBuf;
    fn read_to_string(&self, path: &Path) -> Option<String>;
}

/// [`VoiceFs`] backed by the real file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl VoiceFs for LocalFs {
    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn list_dir(&self, dir: &Path) -> Vec<FileEntry> {
        files_below(WalkDir::new(dir).max_depth(1))
    }

    fn walk(&self, dir: &Path) -> Vec<FileEntry> {
        files_below(WalkDir::new(dir))
    }

    fn canonicalize(&self, path: &Path) -> PathBuf {
        fs::canonicalize(path).unwrap_or_else(|_| {
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                std::env::current_dir()
                    .map(|cwd| cwd.join(path))
                    .unwrap_or_else(|_| path.to_path_buf())
            }
        })
    }

    fn read_to_string(&self, path: &Path) -> Option<String> {
        fs::read_to_string(path).ok()
    }
}

/// Regular files under a walk, following symlinks (snapshot caches are all links).
fn files_below(walk: WalkDir) -> Vec<FileEntry> {
    walk.min_depth(1)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let meta = entry.metadata().ok()?;
            meta.is_file().then(|| FileEntry {
                path: entry.into_path(),
                len: meta.len(),
            })
        })
        .collect()
}

pub struct VoiceResolver {
    fs: Arc<dyn VoiceFs>,
    voices_root: PathBuf,
    current_voice_marker: Option<PathBuf>,
    default_voice: String,
}

impl VoiceResolver {
    pub fn new(fs: Arc<dyn VoiceFs>, voices_root: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            voices_root: voices_root.into(),
            current_voice_marker: None,
            default_voice: FALLBACK_VOICE.to_string(),
        }
    }

    /// File holding the last voice picked by other tooling; read, never written.
    pub fn with_current_voice_marker(mut self, marker: impl Into<PathBuf>) -> Self {
        self.current_voice_marker = Some(marker.into());
        self
    }

    pub fn with_default_voice(mut self, voice: impl Into<String>) -> Self {
        let voice = voice.into();
        if !voice.trim().is_empty() {
            self.default_voice = voice;
        }
        self
    }

    pub fn voices_root(&self) -> &Path {
        &self.voices_root
    }

    pub fn default_voice(&self) -> &str {
        &self.default_voice
    }

    pub fn resolve(&self, request: VoiceRequest<'_>) -> Result<ResolvedVoice> {
        if let Some(upload) = request.upload {
            return Ok(ResolvedVoice {
                requested: upload.filename.clone().unwrap_or_else(|| "upload".to_string()),
                specifier: VoiceSpecifier::UploadedBlob(upload),
            });
        }

        let marker = self
            .current_voice_marker
            .as_deref()
            .and_then(|path| self.fs.read_to_string(path));

        let token = [request.voice, request.persona_voice, marker.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|token| !token.is_empty())
            .unwrap_or(self.default_voice.as_str());

        self.resolve_token(token)
    }

    /// The configured default voice, ignoring the marker.
    pub fn resolve_default(&self) -> Result<ResolvedVoice> {
        self.resolve_token(&self.default_voice)
    }

    /// Resolve a single voice token (name, path, directory or URL).
    pub fn resolve_token(&self, token: &str) -> Result<ResolvedVoice> {
        if token.is_empty() {
            return Err(TtsError::Validation("Voice cannot be empty".to_string()));
        }

        if is_voice_url(token) {
            return Ok(self.resolved(token, VoiceSpecifier::RemoteUrl(token.to_string())));
        }

        let mut path = PathBuf::from(token);
        let mut found_by_name = false;
        if !token.contains(['/', '\\']) {
            if let Some(found) = self.find_named_voice(token) {
                info!("Found voice file '{}'", found.display());
                path = found;
                found_by_name = true;
            }
        }

        if self.fs.is_dir(&path) {
            debug!("'{}' is a directory, searching for voice file", path.display());
            let selected = self.pick_from_directory(&path).ok_or_else(|| {
                TtsError::NotFound(format!(
                    "No supported voice file found in directory '{token}' (found files may be Git LFS pointers)"
                ))
            })?;
            info!("Found voice file '{}'", selected.display());
            return Ok(self.resolved(
                token,
                VoiceSpecifier::LocalDirectory {
                    dir: self.fs.canonicalize(&path),
                    selected: self.canonical_file(&selected),
                },
            ));
        }

        if !found_by_name && is_predefined_voice(token) {
            return Ok(self.resolved(token, VoiceSpecifier::PredefinedName(token.to_string())));
        }

        if self.fs.is_file(&path) {
            return Ok(self.resolved(
                token,
                VoiceSpecifier::LocalFilePath(self.canonical_file(&path)),
            ));
        }

        Err(TtsError::Validation(format!(
            "Voice '{token}' not found. It must be a valid URL, a predefined voice name, a local file path, or a directory containing a voice file."
        )))
    }

    fn resolved(&self, token: &str, specifier: VoiceSpecifier) -> ResolvedVoice {
        ResolvedVoice {
            requested: token.to_string(),
            specifier,
        }
    }

    /// Absolute path that keeps the file's own name, so a symlinked voice
    /// still carries its extension.
    fn canonical_file(&self, path: &Path) -> PathBuf {
        match (path.parent(), path.file_name()) {
            (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => {
                self.fs.canonicalize(parent).join(name)
            }
            (Some(_), Some(name)) => self.fs.canonicalize(Path::new(".")).join(name),
            _ => self.fs.canonicalize(path),
        }
    }

    /// Search the voices root for `<name>*.safetensors`, then `<name>.<audio ext>`.
    fn find_named_voice(&self, name: &str) -> Option<PathBuf> {
        let mut files: Vec<FileEntry> = self
            .fs
            .walk(&self.voices_root)
            .into_iter()
            .filter(FileEntry::is_usable)
            .collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));

        if let Some(embedding) = files
            .iter()
            .find(|f| f.has_extension(EMBEDDING_EXTENSION) && f.file_name().starts_with(name))
        {
            return Some(embedding.path.clone());
        }

        AUDIO_EXTENSIONS.iter().find_map(|ext| {
            let wanted = format!("{name}.{ext}");
            files
                .iter()
                .find(|f| f.file_name() == wanted)
                .map(|f| f.path.clone())
        })
    }

    /// First audio file by sorted name, else the first embedding.
    fn pick_from_directory(&self, dir: &Path) -> Option<PathBuf> {
        let mut files: Vec<FileEntry> = self
            .fs
            .list_dir(dir)
            .into_iter()
            .filter(FileEntry::is_usable)
            .collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));

        AUDIO_EXTENSIONS
            .iter()
            .chain(std::iter::once(&EMBEDDING_EXTENSION))
            .find_map(|ext| files.iter().find(|f| f.has_extension(ext)))
            .map(|f| f.path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    /// In-memory file tree: path -> size. Directories are implied by paths.
    #[derive(Default)]
    struct MemFs {
        files: BTreeMap<PathBuf, u64>,
        texts: BTreeMap<PathBuf, String>,
    }

    impl MemFs {
        fn with_file(mut self, path: &str, len: u64) -> Self {
            self.files.insert(PathBuf::from(path), len);
            self
        }

        fn with_text(mut self, path: &str, text: &str) -> Self {
            self.texts.insert(PathBuf::from(path), text.to_string());
            self
        }
    }

    impl VoiceFs for MemFs {
        fn is_dir(&self, path: &Path) -> bool {
            self.files.keys().any(|f| f != path && f.starts_with(path))
        }

        fn is_file(&self, path: &Path) -> bool {
            self.files.contains_key(path)
        }

        fn list_dir(&self, dir: &Path) -> Vec<FileEntry> {
            self.files
                .iter()
                .filter(|(f, _)| f.parent() == Some(dir))
                .map(|(f, len)| FileEntry { path: f.clone(), len: *len })
                .collect()
        }

        fn walk(&self, dir: &Path) -> Vec<FileEntry> {
            self.files
                .iter()
                .filter(|(f, _)| f.starts_with(dir))
                .map(|(f, len)| FileEntry { path: f.clone(), len: *len })
                .collect()
        }

        fn canonicalize(&self, path: &Path) -> PathBuf {
            Path::new("/").join(path)
        }

        fn read_to_string(&self, path: &Path) -> Option<String> {
            self.texts.get(path).cloned()
        }
    }

    fn resolver(fs: MemFs) -> VoiceResolver {
        VoiceResolver::new(Arc::new(fs), "voices")
    }

    #[test]
    fn test_directory_picks_first_audio_by_name() {
        let r = resolver(
            MemFs::default()
                .with_file("dir/b.wav", 2000)
                .with_file("dir/a.wav", 2000),
        );
        let resolved = r.resolve_token("dir").unwrap();
        assert_eq!(resolved.identity().as_deref(), Some("/dir/a.wav"));
        assert!(matches!(resolved.specifier, VoiceSpecifier::LocalDirectory { .. }));
    }

    #[test]
    fn test_directory_with_only_placeholder_is_not_found() {
        let r = resolver(MemFs::default().with_file("dir/a.wav", 500));
        assert!(matches!(r.resolve_token("dir"), Err(TtsError::NotFound(_))));
    }

    #[test]
    fn test_directory_prefers_audio_then_embedding() {
        let r = resolver(
            MemFs::default()
                .with_file("dir/a.safetensors", 5000)
                .with_file("dir/z.flac", 5000),
        );
        assert_eq!(r.resolve_token("dir").unwrap().identity().as_deref(), Some("/dir/z.flac"));

        let r = resolver(MemFs::default().with_file("dir/a.safetensors", 5000));
        assert_eq!(
            r.resolve_token("dir").unwrap().identity().as_deref(),
            Some("/dir/a.safetensors")
        );
    }

    #[test]
    fn test_short_name_prefers_embedding_over_audio() {
        let r = resolver(
            MemFs::default()
                .with_file("voices/expresso/ex01.wav", 4000)
                .with_file("voices/embeddings/ex01_happy.safetensors", 4000),
        );
        let resolved = r.resolve_token("ex01").unwrap();
        assert_eq!(
            resolved.specifier,
            VoiceSpecifier::LocalFilePath(PathBuf::from("/voices/embeddings/ex01_happy.safetensors"))
        );
        assert_eq!(resolved.requested, "ex01");
    }

    #[test]
    fn test_short_name_skips_placeholders() {
        let r = resolver(
            MemFs::default()
                .with_file("voices/embeddings/ex01.safetensors", 130)
                .with_file("voices/ex01.mp3", 4000),
        );
        assert_eq!(
            r.resolve_token("ex01").unwrap().identity().as_deref(),
            Some("/voices/ex01.mp3")
        );
    }

    #[test]
    fn test_predefined_name_without_local_copy() {
        let r = resolver(MemFs::default());
        assert_eq!(
            r.resolve_token("alba").unwrap().specifier,
            VoiceSpecifier::PredefinedName("alba".into())
        );
    }

    #[test]
    fn test_url_is_kept_verbatim() {
        let r = resolver(MemFs::default());
        let url = "hf://kyutai/tts-voices/alba-mackenna/casual.wav";
        assert_eq!(r.resolve_token(url).unwrap().identity().as_deref(), Some(url));
    }

    #[test]
    fn test_unknown_token_fails_validation() {
        let r = resolver(MemFs::default());
        assert!(matches!(
            r.resolve_token("nowhere/voice.wav"),
            Err(TtsError::Validation(_))
        ));
    }

    #[test]
    fn test_resolution_order() {
        let fs = MemFs::default()
            .with_file("voices/a.wav", 2000)
            .with_file("voices/b.wav", 2000)
            .with_file("voices/c.wav", 2000)
            .with_text(".current_voice", "c\n");
        let r = resolver(fs).with_current_voice_marker(".current_voice");

        let pick = |voice, persona_voice| {
            r.resolve(VoiceRequest {
                voice,
                persona_voice,
                upload: None,
            })
            .unwrap()
            .identity()
            .unwrap()
        };

        assert_eq!(pick(Some("a"), Some("b")), "/voices/a.wav");
        assert_eq!(pick(None, Some("b")), "/voices/b.wav");
        assert_eq!(pick(Some("  "), None), "/voices/c.wav");
        assert_eq!(pick(None, None), "/voices/c.wav");
    }

    #[test]
    fn test_default_voice_when_nothing_else_set() {
        let r = resolver(MemFs::default());
        let resolved = r.resolve(VoiceRequest::default()).unwrap();
        assert_eq!(resolved.specifier, VoiceSpecifier::PredefinedName(FALLBACK_VOICE.into()));
    }

    #[test]
    fn test_upload_wins_and_has_no_identity() {
        let r = resolver(MemFs::default().with_file("voices/a.wav", 2000));
        let upload = VoiceUpload {
            filename: Some("me.flac".into()),
            data: Bytes::from_static(b"fLaC"),
        };
        let resolved = r
            .resolve(VoiceRequest {
                voice: Some("a"),
                persona_voice: None,
                upload: Some(upload.clone()),
            })
            .unwrap();
        assert_eq!(resolved.specifier, VoiceSpecifier::UploadedBlob(upload.clone()));
        assert_eq!(resolved.identity(), None);
        assert_eq!(upload.suffix(), ".flac");
    }

    #[test]
    fn test_predefined_voice_url() {
        let url = predefined_voice_url("jean").unwrap();
        assert!(url.starts_with("hf://kyutai/pocket-tts-without-voice-cloning/embeddings/jean.safetensors@"));
        assert!(predefined_voice_url("nobody").is_none());
    }

    #[test]
    fn test_local_fs_directory_resolution() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.wav"), vec![0u8; 1500]).unwrap();
        fs::write(dir.path().join("b.wav"), vec![0u8; 1500]).unwrap();

        let r = VoiceResolver::new(Arc::new(LocalFs), dir.path());
        let resolved = r.resolve_token(dir.path().to_str().unwrap()).unwrap();
        let selected = resolved.specifier.local_file().unwrap();
        assert_eq!(selected.file_name().unwrap(), "a.wav");
        assert!(selected.is_absolute());
    }

    #[test]
    fn test_local_fs_small_file_directory_not_found() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.wav"), vec![0u8; 500]).unwrap();

        let r = VoiceResolver::new(Arc::new(LocalFs), dir.path());
        assert!(matches!(
            r.resolve_token(dir.path().to_str().unwrap()),
            Err(TtsError::NotFound(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_local_fs_follows_symlinked_voices() {
        use std::os::unix::fs::symlink;

        let dir = tempfile::tempdir().unwrap();
        let blobs = dir.path().join("blobs");
        let snapshot = dir.path().join("snapshot");
        fs::create_dir_all(&blobs).unwrap();
        fs::create_dir_all(&snapshot).unwrap();
        fs::write(blobs.join("9f2c1e"), vec![0u8; 4000]).unwrap();
        symlink(blobs.join("9f2c1e"), snapshot.join("a.wav")).unwrap();

        let r = VoiceResolver::new(Arc::new(LocalFs), dir.path());

        let resolved = r.resolve_token(snapshot.to_str().unwrap()).unwrap();
        let selected = resolved.specifier.local_file().unwrap();
        assert_eq!(selected.file_name().unwrap(), "a.wav");

        let by_name = r.resolve_token("a").unwrap();
        assert!(matches!(by_name.specifier, VoiceSpecifier::LocalFilePath(_)));
        assert_eq!(by_name.specifier.local_file().unwrap().file_name().unwrap(), "a.wav");
    }
}
