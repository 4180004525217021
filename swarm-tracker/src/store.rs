//! Durable tracker state: node registry, file registry and one metadata record per hash.
//!
//! Layout under the data directory:
//!
//! * `nodes.json` - `{next_node_id, nodes: {id: {ip_address, port}}}`
//! * `files.json` - `{file_name: file_hash}`
//! * `metadata/<file_hash>.json` - one [`FileMetadata`] per uploaded content hash
//!
//! The node and file tables are each behind their own async mutex, held across local disk
//! writes only. Metadata records are serialized per hash so unrelated uploads do not
//! contend. Every write goes to a temp file and is renamed into place.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use swarm_core::{ActiveNodes, Error, FileHash, FileMetadata, NodeAddress, NodeId};
use tokio::fs;
use tokio::sync::{Mutex, OwnedMutexGuard};

const NODES_FILE: &str = "nodes.json";
const FILES_FILE: &str = "files.json";
const METADATA_DIR: &str = "metadata";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{}: corrupt record: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Io { path, source } => Error::local_io(path, source),
            StoreError::Corrupt { path, source } => Error::local_io(
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidData, source),
            ),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeTable {
    /// Next id to hand out. Persisted so ids are never reused across restarts.
    next_node_id: NodeId,
    #[serde(with = "swarm_core::protocol::keyed")]
    nodes: ActiveNodes,
}

impl NodeTable {
    fn fresh() -> Self {
        Self {
            next_node_id: 1,
            nodes: ActiveNodes::new(),
        }
    }
}

/// One async lock per key, created on first use.
struct KeyedLocks<K> {
    locks: StdMutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    fn new() -> Self {
        Self {
            locks: StdMutex::new(HashMap::new()),
        }
    }

    async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(key.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Owned tracker state. Constructed once at startup and shared by the request handlers.
pub struct TrackerStore {
    root: PathBuf,
    nodes: Mutex<NodeTable>,
    files: Mutex<BTreeMap<String, FileHash>>,
    metadata_locks: KeyedLocks<FileHash>,
}

impl TrackerStore {
    /// Open (or create) the store under `root`, loading any persisted tables.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        let metadata_dir = root.join(METADATA_DIR);
        fs::create_dir_all(&metadata_dir)
            .await
            .map_err(|e| StoreError::io(&metadata_dir, e))?;
        let mut nodes: NodeTable = read_json(&root.join(NODES_FILE))
            .await?
            .unwrap_or_else(NodeTable::fresh);
        // Guard against a hand-edited table whose counter lags its entries.
        let floor = nodes.nodes.keys().next_back().map_or(1, |max| max + 1);
        nodes.next_node_id = nodes.next_node_id.max(floor);
        let files = read_json(&root.join(FILES_FILE)).await?.unwrap_or_default();
        Ok(Self {
            root,
            nodes: Mutex::new(nodes),
            files: Mutex::new(files),
            metadata_locks: KeyedLocks::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocate the next node id and record the node. The counter only advances once the
    /// table is durable.
    pub async fn insert_node(&self, addr: NodeAddress) -> Result<NodeId, StoreError> {
        let mut table = self.nodes.lock().await;
        let node_id = table.next_node_id;
        table.nodes.insert(node_id, addr);
        table.next_node_id = node_id + 1;
        if let Err(e) = write_json(&self.root.join(NODES_FILE), &*table).await {
            table.nodes.remove(&node_id);
            table.next_node_id = node_id;
            return Err(e);
        }
        Ok(node_id)
    }

    /// Remove a node. Returns whether it was present.
    pub async fn remove_node(&self, node_id: NodeId) -> Result<bool, StoreError> {
        let mut table = self.nodes.lock().await;
        let Some(addr) = table.nodes.remove(&node_id) else {
            return Ok(false);
        };
        if let Err(e) = write_json(&self.root.join(NODES_FILE), &*table).await {
            table.nodes.insert(node_id, addr);
            return Err(e);
        }
        Ok(true)
    }

    pub async fn contains_node(&self, node_id: NodeId) -> bool {
        self.nodes.lock().await.nodes.contains_key(&node_id)
    }

    pub async fn active_nodes(&self) -> ActiveNodes {
        self.nodes.lock().await.nodes.clone()
    }

    /// Write the metadata record for `meta.placement.file_hash` unless a readable one exists.
    /// Records are immutable once written; returns whether this call wrote it.
    pub async fn put_metadata(&self, meta: &FileMetadata) -> Result<bool, StoreError> {
        let hash = &meta.placement.file_hash;
        let _guard = self.metadata_locks.lock(hash).await;
        let path = self.metadata_path(hash);
        match read_json::<FileMetadata>(&path).await {
            Ok(Some(_)) => return Ok(false),
            Ok(None) | Err(StoreError::Corrupt { .. }) => {}
            Err(e) => return Err(e),
        }
        write_json(&path, meta).await?;
        Ok(true)
    }

    pub async fn metadata(&self, hash: &FileHash) -> Result<Option<FileMetadata>, StoreError> {
        let _guard = self.metadata_locks.lock(hash).await;
        read_json(&self.metadata_path(hash)).await
    }

    /// Point `file_name` at `hash`, replacing any earlier upload under that name.
    pub async fn set_file(&self, file_name: &str, hash: FileHash) -> Result<(), StoreError> {
        let mut files = self.files.lock().await;
        let previous = files.insert(file_name.to_string(), hash);
        if let Err(e) = write_json(&self.root.join(FILES_FILE), &*files).await {
            match previous {
                Some(old) => files.insert(file_name.to_string(), old),
                None => files.remove(file_name),
            };
            return Err(e);
        }
        Ok(())
    }

    pub async fn file_hash(&self, file_name: &str) -> Option<FileHash> {
        self.files.lock().await.get(file_name).cloned()
    }

    fn metadata_path(&self, hash: &FileHash) -> PathBuf {
        self.root
            .join(METADATA_DIR)
            .join(format!("{}.json", hash.as_str()))
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                path: path.to_path_buf(),
                source,
            }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, &bytes)
        .await
        .map_err(|e| StoreError::io(&tmp, e))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| StoreError::io(path, e))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use swarm_core::FilePlacement;

    use super::*;

    fn addr(port: u16) -> NodeAddress {
        NodeAddress::new("127.0.0.1", port)
    }

    fn meta(name: &str, content: &[u8]) -> FileMetadata {
        FileMetadata {
            file_name: name.to_string(),
            owning_node_id: 1,
            placement: FilePlacement {
                file_hash: FileHash::of_bytes(content),
                total_pieces: 1,
                piece_distribution: [(0, vec![1, 1])].into_iter().collect(),
            },
        }
    }

    #[tokio::test]
    async fn ids_start_at_one_and_are_never_reused() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrackerStore::open(dir.path()).await.unwrap();
        assert_eq!(store.insert_node(addr(1)).await.unwrap(), 1);
        assert_eq!(store.insert_node(addr(2)).await.unwrap(), 2);
        assert!(store.remove_node(2).await.unwrap());
        assert!(!store.remove_node(2).await.unwrap());
        assert_eq!(store.insert_node(addr(3)).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let m = meta("f.bin", b"content");
        {
            let store = TrackerStore::open(dir.path()).await.unwrap();
            store.insert_node(addr(10)).await.unwrap();
            store.insert_node(addr(11)).await.unwrap();
            store.remove_node(2).await.unwrap();
            store.put_metadata(&m).await.unwrap();
            store
                .set_file("f.bin", m.placement.file_hash.clone())
                .await
                .unwrap();
        }
        let store = TrackerStore::open(dir.path()).await.unwrap();
        let nodes = store.active_nodes().await;
        assert_eq!(nodes.keys().copied().collect::<Vec<_>>(), vec![1]);
        assert_eq!(nodes[&1], addr(10));
        assert_eq!(store.insert_node(addr(12)).await.unwrap(), 3);
        let hash = store.file_hash("f.bin").await.unwrap();
        assert_eq!(store.metadata(&hash).await.unwrap(), Some(m));
    }

    #[tokio::test]
    async fn same_name_upload_is_last_writer_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrackerStore::open(dir.path()).await.unwrap();
        let first = meta("f.bin", b"v1");
        let second = meta("f.bin", b"v2");
        for m in [&first, &second] {
            store.put_metadata(m).await.unwrap();
            store
                .set_file("f.bin", m.placement.file_hash.clone())
                .await
                .unwrap();
        }
        assert_eq!(
            store.file_hash("f.bin").await,
            Some(second.placement.file_hash.clone())
        );
        // Earlier metadata stays addressable by its own hash.
        assert_eq!(
            store.metadata(&first.placement.file_hash).await.unwrap(),
            Some(first)
        );
    }

    #[tokio::test]
    async fn metadata_record_is_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrackerStore::open(dir.path()).await.unwrap();
        let first = meta("a.bin", b"same bytes");
        let mut second = meta("b.bin", b"same bytes");
        second.owning_node_id = 2;
        assert!(store.put_metadata(&first).await.unwrap());
        assert!(!store.put_metadata(&second).await.unwrap());
        assert_eq!(
            store.metadata(&first.placement.file_hash).await.unwrap(),
            Some(first)
        );
    }

    #[tokio::test]
    async fn unknown_metadata_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrackerStore::open(dir.path()).await.unwrap();
        let hash = FileHash::of_bytes(b"never uploaded");
        assert_eq!(store.metadata(&hash).await.unwrap(), None);
    }

    #[tokio::test]
    async fn corrupt_table_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(NODES_FILE), b"{oops").unwrap();
        let result = TrackerStore::open(dir.path()).await;
        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_inserts_get_distinct_contiguous_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TrackerStore::open(dir.path()).await.unwrap());
        let mut tasks = Vec::new();
        for port in 0..32u16 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.insert_node(addr(5000 + port)).await.unwrap()
            }));
        }
        let mut ids = BTreeSet::new();
        for t in tasks {
            ids.insert(t.await.unwrap());
        }
        assert_eq!(ids, (1..=32).collect::<BTreeSet<NodeId>>());
    }
}
