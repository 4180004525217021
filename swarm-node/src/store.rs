//! On-disk piece store: `<root>/<file_hash>/piece_<index>`.
//!
//! Pieces are immutable once written. Writes land in a uniquely named temp file and are
//! linked into place without clobbering, so readers never observe a half-written piece and
//! the first complete copy is the one that stays.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use swarm_core::{Error, FileHash, PieceIndex};
use tempfile::NamedTempFile;
use tokio::fs;

#[derive(Debug, thiserror::Error)]
pub enum PieceStoreError {
    #[error("piece not found")]
    NotFound,
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl From<PieceStoreError> for Error {
    fn from(e: PieceStoreError) -> Self {
        match e {
            PieceStoreError::NotFound => Error::Remote(e.to_string()),
            PieceStoreError::Io { path, source } => Error::local_io(path, source),
        }
    }
}

/// Pieces held by one registered node.
#[derive(Debug, Clone)]
pub struct PieceStore {
    root: PathBuf,
}

impl PieceStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, PieceStoreError> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(io(&root))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn piece_path(&self, file_hash: &FileHash, index: PieceIndex) -> PathBuf {
        self.root
            .join(file_hash.as_str())
            .join(format!("piece_{index}"))
    }

    /// Store a piece. Returns false if it was already present; the existing copy is kept.
    /// Concurrent writers of the same piece each stage a private temp file and only the first
    /// one to link it into place wins.
    pub async fn put(
        &self,
        file_hash: &FileHash,
        index: PieceIndex,
        data: &[u8],
    ) -> Result<bool, PieceStoreError> {
        let path = self.piece_path(file_hash, index);
        if fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(false);
        }
        let dir = path.parent().unwrap_or(&self.root).to_path_buf();
        fs::create_dir_all(&dir).await.map_err(io(&dir))?;
        let data = data.to_vec();
        let staged = path.clone();
        tokio::task::spawn_blocking(move || persist_new(&dir, &staged, &data))
            .await
            .map_err(|e| io(&path)(std::io::Error::other(e)))?
    }

    /// Read a stored piece.
    pub async fn get(
        &self,
        file_hash: &FileHash,
        index: PieceIndex,
    ) -> Result<Vec<u8>, PieceStoreError> {
        let path = self.piece_path(file_hash, index);
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(PieceStoreError::NotFound),
            Err(e) => Err(io(&path)(e)),
        }
    }
}

/// Write `data` to a fresh temp file in `dir` and link it to `path` unless something is
/// already there.
fn persist_new(dir: &Path, path: &Path, data: &[u8]) -> Result<bool, PieceStoreError> {
    let mut tmp = NamedTempFile::new_in(dir).map_err(io(dir))?;
    tmp.write_all(data).map_err(io(tmp.path()))?;
    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(io(path)(e.error)),
    }
}

fn io(path: &Path) -> impl FnOnce(std::io::Error) -> PieceStoreError {
    let path = path.to_path_buf();
    move |source| PieceStoreError::Io { path, source }
}
