//! Persistent embedding index.
//!
//! An index is a directory holding `entries.jsonl` (one [`IndexEntry`] per
//! line, insertion order) and `manifest.json`. Every write goes to a fresh
//! staging directory next to the index and is published with a rename, so a
//! reader sees either the previous complete index or the new one. The
//! manifest is written last and carries the entry count and a SHA-256 of the
//! entries file; `load` rejects anything that does not match.

use crate::embeddings::Embedder;
use crate::error::IndexError;
use crate::models::{Chunk, IndexEntry, IndexManifest, IndexStats, RetrievalHit, RetrievalResult};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const ENTRIES_FILE: &str = "entries.jsonl";
const FORMAT_VERSION: u32 = 1;
const STAGING_MARKER: &str = ".staging-";
const RETIRED_MARKER: &str = ".retired-";

/// Location of a persisted index plus the operations that change it.
#[derive(Debug, Clone)]
pub struct IndexStore {
    root: PathBuf,
}

impl IndexStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn exists(&self) -> bool {
        self.root.exists()
    }

    /// Opens the index for querying with `embedder`, which must be the
    /// embedding model the index was built with.
    pub fn load(&self, embedder: &dyn Embedder) -> Result<VectorIndex, IndexError> {
        let index = self.open()?;
        ensure_same_model(&index.manifest, embedder)?;
        Ok(index)
    }

    /// Opens the index without checking the embedding model.
    pub fn open(&self) -> Result<VectorIndex, IndexError> {
        if !self.root.exists() {
            return Err(IndexError::NotFound(self.root.display().to_string()));
        }
        let index = read_index(&self.root)?;
        debug!(
            path = %self.root.display(),
            entries = index.entries.len(),
            model = %index.manifest.embedding_model,
            "index loaded"
        );
        Ok(index)
    }

    /// Embeds `chunks` and persists them. With `reset` the current index is
    /// discarded first; otherwise the chunks are appended to it.
    pub fn build(
        &self,
        chunks: &[Chunk],
        reset: bool,
        embedder: &dyn Embedder,
    ) -> Result<VectorIndex, IndexError> {
        let _lock = BuildLock::acquire(self.lock_path())?;
        self.sweep_leftovers()?;

        if reset && chunks.is_empty() {
            return Err(IndexError::EmptyBuild);
        }

        let existing = if reset {
            if remove_dir_if_exists(&self.root)? {
                info!(path = %self.root.display(), "existing index discarded");
            }
            None
        } else if self.root.exists() {
            let current = read_index(&self.root)?;
            ensure_same_model(&current.manifest, embedder)?;
            Some(current)
        } else {
            None
        };

        if chunks.is_empty() {
            return existing.ok_or(IndexError::EmptyBuild);
        }

        let fresh = embed_chunks(chunks, embedder)?;
        let now = Utc::now();
        let (created_at, mut entries) = match existing {
            Some(current) => (current.manifest.created_at, current.entries),
            None => (now, Vec::with_capacity(fresh.len())),
        };
        let appended = fresh.len();
        entries.extend(fresh);

        let encoded = encode_entries(&entries)?;
        let manifest = IndexManifest {
            format_version: FORMAT_VERSION,
            embedding_model: embedder.model_id(),
            dimensions: embedder.dimensions(),
            entry_count: entries.len(),
            entries_sha256: sha256_hex(&encoded),
            created_at,
            updated_at: now,
        };

        self.publish(&encoded, &manifest)?;
        info!(
            path = %self.root.display(),
            appended,
            total = entries.len(),
            model = %manifest.embedding_model,
            "index written"
        );

        Ok(VectorIndex { manifest, entries })
    }

    /// Discards the persisted index. Returns whether anything was removed.
    pub fn reset(&self) -> Result<bool, IndexError> {
        let _lock = BuildLock::acquire(self.lock_path())?;
        self.sweep_leftovers()?;
        let removed = remove_dir_if_exists(&self.root)?;
        if removed {
            info!(path = %self.root.display(), "index reset");
        }
        Ok(removed)
    }

    fn lock_path(&self) -> PathBuf {
        self.sibling(".lock")
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .root
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| "index".into());
        name.push(suffix);
        self.root.with_file_name(name)
    }

    fn parent_dir(&self) -> PathBuf {
        match self.root.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn publish(&self, encoded: &[u8], manifest: &IndexManifest) -> Result<(), IndexError> {
        let staging = self.sibling(&format!("{STAGING_MARKER}{}", Uuid::new_v4()));
        let written = write_staging(&staging, encoded, manifest);
        if let Err(error) = written {
            let _ = fs::remove_dir_all(&staging);
            return Err(error);
        }

        let retired = self.sibling(&format!("{RETIRED_MARKER}{}", Uuid::new_v4()));
        let had_previous = self.root.exists();
        if had_previous {
            fs::rename(&self.root, &retired)?;
        }
        fs::rename(&staging, &self.root)?;
        if had_previous {
            fs::remove_dir_all(&retired)?;
        }
        Ok(())
    }

    /// Removes staging and retired directories left by an interrupted build.
    fn sweep_leftovers(&self) -> Result<(), IndexError> {
        let parent = self.parent_dir();
        if !parent.exists() {
            return Ok(());
        }
        let Some(name) = self.root.file_name().and_then(|name| name.to_str()) else {
            return Ok(());
        };
        let staging_prefix = format!("{name}{STAGING_MARKER}");
        let retired_prefix = format!("{name}{RETIRED_MARKER}");

        for entry in fs::read_dir(&parent)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if file_name.starts_with(&staging_prefix) || file_name.starts_with(&retired_prefix) {
                warn!(path = %entry.path().display(), "removing leftover from interrupted build");
                fs::remove_dir_all(entry.path())?;
            }
        }
        Ok(())
    }
}

/// An immutable, fully loaded index. Safe to share across threads for
/// concurrent queries.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    manifest: IndexManifest,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Top-`k` entries by cosine similarity, most similar first. Equal scores
    /// keep insertion order.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<RetrievalResult, IndexError> {
        if k == 0 {
            return Err(IndexError::InvalidArgument(
                "k must be a positive integer".to_string(),
            ));
        }
        if vector.len() != self.manifest.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.manifest.dimensions,
                actual: vector.len(),
            });
        }

        let mut scored = self
            .entries
            .iter()
            .map(|entry| (cosine_similarity(vector, &entry.vector), entry))
            .collect::<Vec<_>>();
        // Stable sort: ties stay in insertion order.
        scored.sort_by(|left, right| right.0.total_cmp(&left.0));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(score, entry)| RetrievalHit {
                chunk: entry.chunk.clone(),
                score,
            })
            .collect())
    }

    pub fn stats(&self) -> IndexStats {
        let sources = self
            .entries
            .iter()
            .map(|entry| entry.chunk.source.as_str())
            .collect::<HashSet<_>>();
        IndexStats {
            embedding_model: self.manifest.embedding_model.clone(),
            dimensions: self.manifest.dimensions,
            entries: self.entries.len(),
            sources: sources.len(),
        }
    }
}

struct BuildLock {
    path: PathBuf,
}

impl BuildLock {
    fn acquire(path: PathBuf) -> Result<Self, IndexError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                Ok(Self { path })
            }
            Err(error) if error.kind() == ErrorKind::AlreadyExists => Err(IndexError::Busy {
                holder: lock_holder(&path),
                path: path.display().to_string(),
            }),
            Err(error) => Err(IndexError::Io(error)),
        }
    }
}

/// Describes the process named in an existing lock file.
fn lock_holder(path: &Path) -> String {
    fs::read_to_string(path)
        .ok()
        .and_then(|contents| contents.trim().parse::<u32>().ok())
        .map(|pid| format!("process {pid}"))
        .unwrap_or_else(|| "an unknown process".to_string())
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        if let Err(error) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), %error, "failed to release index lock");
        }
    }
}

fn ensure_same_model(manifest: &IndexManifest, embedder: &dyn Embedder) -> Result<(), IndexError> {
    let configured = embedder.model_id();
    if manifest.embedding_model != configured || manifest.dimensions != embedder.dimensions() {
        return Err(IndexError::EmbeddingMismatch {
            indexed: manifest.embedding_model.clone(),
            configured,
        });
    }
    Ok(())
}

fn embed_chunks(chunks: &[Chunk], embedder: &dyn Embedder) -> Result<Vec<IndexEntry>, IndexError> {
    let texts = chunks.iter().map(|chunk| chunk.text.as_str()).collect::<Vec<_>>();
    let vectors = embedder.embed_batch(&texts)?;
    if vectors.len() != chunks.len() {
        return Err(IndexError::InvalidArgument(format!(
            "embedding count {} doesn't match chunk count {}",
            vectors.len(),
            chunks.len()
        )));
    }

    let dimensions = embedder.dimensions();
    chunks
        .iter()
        .zip(vectors)
        .map(|(chunk, vector)| {
            if vector.len() != dimensions {
                return Err(IndexError::DimensionMismatch {
                    expected: dimensions,
                    actual: vector.len(),
                });
            }
            Ok(IndexEntry {
                id: make_entry_id(chunk),
                chunk: chunk.clone(),
                vector,
            })
        })
        .collect()
}

fn make_entry_id(chunk: &Chunk) -> String {
    let mut hasher = Sha256::new();
    hasher.update(chunk.source.as_bytes());
    hasher.update(chunk.page.to_le_bytes());
    hasher.update((chunk.chunk_index as u64).to_le_bytes());
    hasher.update(chunk.text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn encode_entries(entries: &[IndexEntry]) -> Result<Vec<u8>, IndexError> {
    let mut encoded = Vec::new();
    for entry in entries {
        serde_json::to_writer(&mut encoded, entry)?;
        encoded.push(b'\n');
    }
    Ok(encoded)
}

fn write_staging(staging: &Path, encoded: &[u8], manifest: &IndexManifest) -> Result<(), IndexError> {
    fs::create_dir_all(staging)?;
    write_synced(&staging.join(ENTRIES_FILE), encoded)?;
    write_synced(&staging.join(MANIFEST_FILE), &serde_json::to_vec_pretty(manifest)?)?;
    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), IndexError> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

fn read_index(root: &Path) -> Result<VectorIndex, IndexError> {
    let corrupt = |details: String| IndexError::Corrupt {
        path: root.display().to_string(),
        details,
    };

    let manifest_bytes = match fs::read(root.join(MANIFEST_FILE)) {
        Ok(bytes) => bytes,
        Err(error) if error.kind() == ErrorKind::NotFound => {
            return Err(corrupt("manifest is missing".to_string()))
        }
        Err(error) => return Err(IndexError::Io(error)),
    };
    let manifest: IndexManifest = serde_json::from_slice(&manifest_bytes)
        .map_err(|error| corrupt(format!("manifest is unreadable: {error}")))?;
    if manifest.format_version != FORMAT_VERSION {
        return Err(corrupt(format!(
            "unsupported format version {}",
            manifest.format_version
        )));
    }

    let encoded = match fs::read(root.join(ENTRIES_FILE)) {
        Ok(bytes) => bytes,
        Err(error) if error.kind() == ErrorKind::NotFound => {
            return Err(corrupt("entries file is missing".to_string()))
        }
        Err(error) => return Err(IndexError::Io(error)),
    };
    if sha256_hex(&encoded) != manifest.entries_sha256 {
        return Err(corrupt("entries checksum does not match manifest".to_string()));
    }

    let mut entries = Vec::with_capacity(manifest.entry_count);
    for (line_no, line) in encoded.split(|byte| *byte == b'\n').enumerate() {
        if line.is_empty() {
            continue;
        }
        let entry: IndexEntry = serde_json::from_slice(line)
            .map_err(|error| corrupt(format!("entry {}: {error}", line_no + 1)))?;
        if entry.vector.len() != manifest.dimensions {
            return Err(corrupt(format!(
                "entry {} has {} dimensions, expected {}",
                line_no + 1,
                entry.vector.len(),
                manifest.dimensions
            )));
        }
        entries.push(entry);
    }

    if entries.len() != manifest.entry_count {
        return Err(corrupt(format!(
            "manifest lists {} entries but {} were read",
            manifest.entry_count,
            entries.len()
        )));
    }

    Ok(VectorIndex { manifest, entries })
}

fn remove_dir_if_exists(path: &Path) -> Result<bool, IndexError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
        Err(error) => Err(IndexError::Io(error)),
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}
