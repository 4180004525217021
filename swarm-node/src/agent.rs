//! Node lifecycle: bind, register, serve pieces, upload, download, disconnect.

use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use swarm_core::{
    magnet_link, placement, retrieval, ActiveNodes, ChunkedFile, Error, FileHash, FilePlacement,
    NodeAddress, NodeId, PieceIndex,
};
use tempfile::NamedTempFile;
use tokio::fs;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::peer::{run_peer_listener, TcpPeers};
use crate::store::PieceStore;
use crate::tracker_client::TrackerClient;

/// A running node: registered with the tracker and serving its piece store.
pub struct Node {
    id: NodeId,
    addr: NodeAddress,
    tracker: TrackerClient,
    peers: TcpPeers,
    store: PieceStore,
    piece_size: usize,
    download_dir: PathBuf,
    registered: AtomicBool,
    stop: Mutex<Option<oneshot::Sender<()>>>,
    listener: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Result of a completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub file_name: String,
    pub file_hash: FileHash,
    pub size: usize,
    pub total_pieces: u32,
    pub placement: FilePlacement,
    /// Pushes that failed; those pieces have fewer live copies than recorded.
    pub failed_pushes: Vec<(PieceIndex, NodeId)>,
}

impl UploadReport {
    pub fn magnet_link(&self) -> String {
        magnet_link(&self.file_hash, &self.file_name)
    }
}

impl fmt::Display for UploadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "uploaded {} ({} bytes, {} pieces) {}",
            self.file_name,
            self.size,
            self.total_pieces,
            self.magnet_link()
        )?;
        if !self.failed_pushes.is_empty() {
            write!(f, " ({} piece copies failed to place)", self.failed_pushes.len())?;
        }
        Ok(())
    }
}

/// Result of a completed download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub file_name: String,
    pub path: PathBuf,
    pub size: usize,
}

impl fmt::Display for DownloadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "downloaded {} ({} bytes) to {}",
            self.file_name,
            self.size,
            self.path.display()
        )
    }
}

impl Node {
    /// Bind the peer listener, register with the tracker, open the piece store and start
    /// serving.
    pub async fn start(config: &Config) -> Result<Self, Error> {
        config
            .validate()
            .map_err(|e| Error::InvalidRequest(e.to_string()))?;
        let listener = TcpListener::bind((config.listen_ip.as_str(), config.listen_port))
            .await
            .map_err(|e| {
                Error::connection(format!(
                    "bind {}:{}: {e}",
                    config.listen_ip, config.listen_port
                ))
            })?;
        let port = listener
            .local_addr()
            .map_err(|e| Error::connection(format!("listener address: {e}")))?
            .port();
        let addr = NodeAddress::new(config.listen_ip.clone(), port);

        let tracker = TrackerClient::new(config.tracker(), config.request_timeout());
        let id = tracker.register(&addr).await?;
        let store = match PieceStore::open(config.store_dir.join(format!("node_{id}"))).await {
            Ok(store) => store,
            Err(e) => {
                if let Err(de) = tracker.disconnect(id).await {
                    tracing::warn!(node_id = id, error = %de, "deregister after failed start");
                }
                return Err(e.into());
            }
        };

        let (stop, stopped) = oneshot::channel();
        let listener = tokio::spawn(run_peer_listener(listener, store.clone(), async move {
            let _ = stopped.await;
        }));
        tracing::info!(node_id = id, %addr, tracker = %tracker.addr(), store = %store.root().display(), "node started");

        Ok(Self {
            id,
            addr,
            tracker,
            peers: TcpPeers::new(config.request_timeout()),
            store,
            piece_size: config.piece_size,
            download_dir: config.download_dir.clone(),
            registered: AtomicBool::new(true),
            stop: Mutex::new(Some(stop)),
            listener: tokio::sync::Mutex::new(Some(listener)),
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn addr(&self) -> &NodeAddress {
        &self.addr
    }

    pub fn store(&self) -> &PieceStore {
        &self.store
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    fn ensure_registered(&self) -> Result<(), Error> {
        if self.is_registered() {
            Ok(())
        } else {
            Err(Error::NotRegistered)
        }
    }

    /// Every node the tracker currently lists.
    pub async fn active_nodes(&self) -> Result<ActiveNodes, Error> {
        self.ensure_registered()?;
        self.tracker.get_nodes().await
    }

    /// Split a local file into pieces, place two copies of each across the active nodes and
    /// record the placement with the tracker under `file_name`.
    pub async fn upload(&self, path: &Path, file_name: &str) -> Result<UploadReport, Error> {
        self.ensure_registered()?;
        let data = read_local_file(path).await?;
        let file = ChunkedFile::new(data, self.piece_size);
        tracing::info!(node_id = self.id, file_name, file_hash = %file.hash(), total_pieces = file.total_pieces(), "upload started");

        let active = self.tracker.get_nodes().await?;
        let report = placement::distribute(&self.peers, self.id, &file, &active).await?;
        let placement = FilePlacement {
            file_hash: file.hash().clone(),
            total_pieces: file.total_pieces(),
            piece_distribution: report.distribution,
        };
        self.tracker.upload(self.id, file_name, &placement).await?;
        if !report.failed_pushes.is_empty() {
            tracing::warn!(file_name, failed = report.failed_pushes.len(), "upload is under-replicated");
        }
        tracing::info!(node_id = self.id, file_name, file_hash = %placement.file_hash, "upload complete");
        Ok(UploadReport {
            file_name: file_name.to_string(),
            file_hash: placement.file_hash.clone(),
            size: file.len(),
            total_pieces: placement.total_pieces,
            placement,
            failed_pushes: report.failed_pushes,
        })
    }

    /// Fetch `file_name` from its replicas and write it into the download directory. Nothing
    /// appears at the destination unless every piece arrived.
    pub async fn download(&self, file_name: &str) -> Result<DownloadReport, Error> {
        self.ensure_registered()?;
        let target = output_path(&self.download_dir, file_name)?;
        let placement = self.tracker.download(file_name, self.id).await?;
        let active = self.tracker.get_nodes().await?;
        tracing::info!(node_id = self.id, file_name, file_hash = %placement.file_hash, total_pieces = placement.total_pieces, "download started");
        let bytes = retrieval::retrieve(&self.peers, &placement, &active).await?;
        let size = bytes.len();
        write_atomically(&target, bytes).await?;
        tracing::info!(node_id = self.id, file_name, path = %target.display(), bytes = size, "download complete");
        Ok(DownloadReport {
            file_name: file_name.to_string(),
            path: target,
            size,
        })
    }

    /// Leave the swarm: tell the tracker, stop accepting peer connections and wait for
    /// in-flight ones. Later calls do nothing.
    pub async fn disconnect(&self) -> Result<(), Error> {
        if !self.registered.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let notified = self.tracker.disconnect(self.id).await;
        if let Err(e) = &notified {
            tracing::warn!(node_id = self.id, error = %e, "tracker disconnect failed");
        }
        let stop = self.stop.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(stop) = stop {
            let _ = stop.send(());
        }
        if let Some(task) = self.listener.lock().await.take() {
            if let Err(e) = task.await {
                tracing::error!(node_id = self.id, error = %e, "peer listener panicked");
            }
        }
        tracing::info!(node_id = self.id, "node disconnected");
        notified
    }
}

/// Read an upload's source, rejecting anything that is not a regular file.
async fn read_local_file(path: &Path) -> Result<Vec<u8>, Error> {
    let meta = fs::metadata(path)
        .await
        .map_err(|e| Error::local_io(path, e))?;
    if !meta.is_file() {
        return Err(Error::local_io(
            path,
            io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
        ));
    }
    fs::read(path).await.map_err(|e| Error::local_io(path, e))
}

/// Destination for a download: the final component of `file_name` under `dir`.
fn output_path(dir: &Path, file_name: &str) -> Result<PathBuf, Error> {
    let name = Path::new(file_name)
        .file_name()
        .ok_or_else(|| Error::InvalidRequest(format!("'{file_name}' has no usable file name")))?;
    Ok(dir.join(name))
}

/// Stage `bytes` in a uniquely named temp file beside `target`, then rename it over
/// `target`. Concurrent writers of the same target never share a staging file.
async fn write_atomically(target: &Path, bytes: Vec<u8>) -> Result<(), Error> {
    let dir = target.parent().unwrap_or(Path::new(".")).to_path_buf();
    fs::create_dir_all(&dir)
        .await
        .map_err(|e| Error::local_io(&dir, e))?;
    let dest = target.to_path_buf();
    let target = dest.clone();
    tokio::task::spawn_blocking(move || {
        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| Error::local_io(&dir, e))?;
        tmp.write_all(&bytes)
            .map_err(|e| Error::local_io(tmp.path(), e))?;
        tmp.persist(&target)
            .map_err(|e| Error::local_io(&target, e.error))?;
        Ok::<(), Error>(())
    })
    .await
    .map_err(|e| Error::local_io(dest, io::Error::other(e)))?
}
