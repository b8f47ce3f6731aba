use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use walkdir::WalkDir;

use common::constants::{CHUNK_DIR_NAME, MANIFEST_DIR_NAME, MANIFEST_EXT, TMP_DIR_NAME};
use common::error::ApiError;
use common::file_utils::{chunk_path, hash_hex, manifest_path, tmp_path};
use common::key_utils::Key;
use common::time_utils::utc_now_ms;

#[derive(thiserror::Error, Debug)]
pub enum ChunkError {
    #[error("no manifest for {0}")]
    ManifestNotFound(String),
    #[error("integrity check failed: {0}")]
    Integrity(String),
    #[error("failed to write chunk {chunk_id}: {source}")]
    Write {
        chunk_id: String,
        #[source]
        source: io::Error,
    },
    #[error("chunk size must be positive")]
    InvalidChunkSize,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("bad manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

impl From<ChunkError> for ApiError {
    fn from(e: ChunkError) -> Self {
        match e {
            ChunkError::ManifestNotFound(name) => ApiError::ManifestNotFound(name),
            ChunkError::Integrity(msg) => ApiError::ChunkIntegrity(msg),
            ChunkError::Write { .. } => ApiError::ChunkWrite(e.to_string()),
            ChunkError::InvalidChunkSize => ApiError::InvalidRequest(e.to_string()),
            ChunkError::Io(e) => ApiError::Io(e),
            ChunkError::Manifest(e) => ApiError::Any(anyhow!(e)),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkRef {
    pub index: u32,
    pub id: String,
    pub size: u64,
    pub hash: String, // blake3 hex of the chunk bytes
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    pub filename: String,
    pub original_size: u64,
    pub chunk_size: u64,
    pub chunk_count: u32,
    pub chunks: Vec<ChunkRef>,
    pub created_ms: i128,
    #[serde(default)]
    pub reassembled: bool,
    #[serde(default)]
    pub reassembled_ms: Option<i128>,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreStats {
    pub chunk_count: u64,
    pub chunk_bytes: u64,
    pub manifest_count: u64,
    /// Sum of original sizes over all manifests.
    pub total_bytes: u64,
}

/// Chunk id: blake3 over the encoded filename, the index and the chunk hash.
/// Splitting identical content twice yields identical ids.
pub fn chunk_id(key: &Key, index: u32, hash: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(key.enc().as_bytes());
    hasher.update(b":");
    hasher.update(&index.to_be_bytes());
    hasher.update(b":");
    hasher.update(hash.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// On-disk chunk store rooted at a node's data directory:
/// `chunks/<aa>/<id>`, `manifests/<name>.json` and `tmp/` for staging.
///
/// All methods do blocking file IO; async callers go through `spawn_blocking`.
pub struct ChunkStore {
    root: PathBuf,
    // ids written by splits whose manifest is not on disk yet
    inflight: Mutex<HashSet<String>>,
}

impl ChunkStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ChunkError> {
        let root = root.into();
        for dir in [CHUNK_DIR_NAME, MANIFEST_DIR_NAME, TMP_DIR_NAME] {
            fs::create_dir_all(root.join(dir))?;
        }
        Ok(Self {
            root,
            inflight: Mutex::new(HashSet::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock_inflight(&self) -> MutexGuard<'_, HashSet<String>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Splits `source` into `chunk_size` pieces and records them under `key`.
    /// The manifest is only written once every chunk is on disk.
    pub fn split(&self, source: &Path, key: &Key, chunk_size: u64) -> Result<Manifest, ChunkError> {
        if chunk_size == 0 {
            return Err(ChunkError::InvalidChunkSize);
        }
        let chunk_len = usize::try_from(chunk_size).map_err(|_| ChunkError::InvalidChunkSize)?;

        let mut file = File::open(source)?;
        let original_size = file.metadata()?.len();

        let mut guard = InflightGuard::new(self);
        let mut chunks = Vec::new();
        let mut buf = vec![0u8; chunk_len];
        let mut index: u32 = 0;

        loop {
            let n = read_full(&mut file, &mut buf)?;
            if n == 0 {
                break;
            }

            let data = &buf[..n];
            let hash = hash_hex(data);
            let id = chunk_id(key, index, &hash);

            guard.register(&id);
            self.write_chunk(&id, data)
                .map_err(|source| ChunkError::Write {
                    chunk_id: id.clone(),
                    source,
                })?;

            chunks.push(ChunkRef {
                index,
                id,
                size: n as u64,
                hash,
            });

            if n < chunk_len {
                break;
            }
            index = index
                .checked_add(1)
                .ok_or_else(|| ChunkError::Integrity("too many chunks".into()))?;
        }

        let total: u64 = chunks.iter().map(|c| c.size).sum();
        if total != original_size {
            return Err(ChunkError::Integrity(format!(
                "{} changed while splitting: expected {original_size} bytes, read {total}",
                source.display()
            )));
        }

        let manifest = Manifest {
            filename: key.name().to_string(),
            original_size,
            chunk_size,
            chunk_count: chunks.len() as u32,
            chunks,
            created_ms: utc_now_ms(),
            reassembled: false,
            reassembled_ms: None,
        };
        self.write_manifest(key, &manifest)?;

        drop(guard);
        Ok(manifest)
    }

    /// Rebuilds the file for `key` at `output`, verifying every chunk. On any
    /// failure nothing is left at `output`.
    pub fn reassemble(&self, key: &Key, output: &Path) -> Result<Manifest, ChunkError> {
        let mut manifest = self.manifest(key)?;

        let mut chunks = manifest.chunks.clone();
        chunks.sort_by_key(|c| c.index);

        let parent = output.parent().unwrap_or_else(|| Path::new("."));
        let partial = parent.join(format!(".{}.partial", Uuid::new_v4()));

        if let Err(e) = self.write_reassembled(&chunks, &partial, manifest.original_size) {
            let _ = fs::remove_file(&partial);
            return Err(e);
        }
        fs::rename(&partial, output)?;

        manifest.reassembled = true;
        manifest.reassembled_ms = Some(utc_now_ms());
        self.write_manifest(key, &manifest)?;

        Ok(manifest)
    }

    fn write_reassembled(
        &self,
        chunks: &[ChunkRef],
        partial: &Path,
        expected_size: u64,
    ) -> Result<(), ChunkError> {
        let mut out = File::create(partial)?;
        let mut total: u64 = 0;

        for chunk in chunks {
            let data = match fs::read(chunk_path(&self.root, &chunk.id)) {
                Ok(data) => data,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(ChunkError::Integrity(format!(
                        "chunk {} ({}) is missing",
                        chunk.index, chunk.id
                    )));
                }
                Err(e) => return Err(e.into()),
            };

            let actual = hash_hex(&data);
            if actual != chunk.hash {
                return Err(ChunkError::Integrity(format!(
                    "chunk {} hash mismatch: expected {}, got {actual}",
                    chunk.index, chunk.hash
                )));
            }

            out.write_all(&data)?;
            total += data.len() as u64;
        }

        if total != expected_size {
            return Err(ChunkError::Integrity(format!(
                "size mismatch: expected {expected_size}, got {total}"
            )));
        }

        out.sync_all()?;
        Ok(())
    }

    pub fn manifest(&self, key: &Key) -> Result<Manifest, ChunkError> {
        match fs::read(manifest_path(&self.root, key)) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(ChunkError::ManifestNotFound(key.name().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Every manifest on disk, ordered by filename.
    pub fn manifests(&self) -> Result<Vec<Manifest>, ChunkError> {
        let mut manifests = Vec::new();
        for entry in fs::read_dir(self.root.join(MANIFEST_DIR_NAME))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(MANIFEST_EXT) {
                continue;
            }
            manifests.push(serde_json::from_slice::<Manifest>(&fs::read(&path)?)?);
        }
        manifests.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(manifests)
    }

    /// Drops the manifest for `key`. Its chunks go on the next cleanup.
    pub fn remove(&self, key: &Key) -> Result<bool, ChunkError> {
        match fs::remove_file(manifest_path(&self.root, key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes chunks no manifest references and no running split owns.
    /// Returns how many were removed.
    pub fn cleanup(&self) -> Result<u64, ChunkError> {
        let inflight = self.lock_inflight();

        let mut live = inflight.clone();
        for manifest in self.manifests()? {
            live.extend(manifest.chunks.into_iter().map(|c| c.id));
        }

        let mut removed = 0;
        for entry in WalkDir::new(self.root.join(CHUNK_DIR_NAME))
            .min_depth(2)
            .max_depth(2)
        {
            let entry = match entry {
                Ok(e) if e.file_type().is_file() => e,
                _ => continue,
            };
            if live.contains(entry.file_name().to_string_lossy().as_ref()) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        drop(inflight);
        Ok(removed)
    }

    pub fn stats(&self) -> Result<StoreStats, ChunkError> {
        let mut stats = StoreStats::default();

        for entry in WalkDir::new(self.root.join(CHUNK_DIR_NAME))
            .min_depth(2)
            .max_depth(2)
        {
            let entry = match entry {
                Ok(e) if e.file_type().is_file() => e,
                _ => continue,
            };
            stats.chunk_count += 1;
            stats.chunk_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }

        for manifest in self.manifests()? {
            stats.manifest_count += 1;
            stats.total_bytes += manifest.original_size;
        }

        Ok(stats)
    }

    fn write_chunk(&self, id: &str, data: &[u8]) -> io::Result<()> {
        let dest = chunk_path(&self.root, id);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        self.write_atomic(&dest, data)
    }

    fn write_manifest(&self, key: &Key, manifest: &Manifest) -> Result<(), ChunkError> {
        let bytes = serde_json::to_vec_pretty(manifest)?;
        self.write_atomic(&manifest_path(&self.root, key), &bytes)?;
        Ok(())
    }

    // Staged in tmp/ and renamed, so readers never see a partial file.
    fn write_atomic(&self, dest: &Path, data: &[u8]) -> io::Result<()> {
        let staging = tmp_path(&self.root, &Uuid::new_v4().to_string());
        let res = (|| {
            let mut f = File::create(&staging)?;
            f.write_all(data)?;
            f.sync_all()?;
            fs::rename(&staging, dest)
        })();
        if res.is_err() {
            let _ = fs::remove_file(&staging);
        }
        res
    }
}

/// Keeps a split's chunk ids visible to `cleanup` until dropped.
struct InflightGuard<'a> {
    store: &'a ChunkStore,
    ids: Vec<String>,
}

impl<'a> InflightGuard<'a> {
    fn new(store: &'a ChunkStore) -> Self {
        Self {
            store,
            ids: Vec::new(),
        }
    }

    fn register(&mut self, id: &str) {
        if self.store.lock_inflight().insert(id.to_string()) {
            self.ids.push(id.to_string());
        }
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        let mut inflight = self.store.lock_inflight();
        for id in &self.ids {
            inflight.remove(id);
        }
    }
}

fn read_full(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
