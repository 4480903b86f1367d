//! pf_bb_config log forwarding
//!
//! Each vfio-pci PF gets one task following `/var/log/pf_bb_cfg_<pci>.log`
//! and re-emitting its lines through tracing. Tailers outlive reconciles and
//! are tracked per PCI address so repeated applies never start a second one.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Default)]
pub struct TailerRegistry {
    tailers: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl TailerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tailing `path` for `pci` unless a live tailer already exists
    ///
    /// Returns whether a new tailer was started.
    pub fn ensure(&self, pci: &str, path: PathBuf, token: &CancellationToken) -> bool {
        let Ok(mut tailers) = self.tailers.lock() else {
            return false;
        };
        if tailers.get(pci).is_some_and(|handle| !handle.is_finished()) {
            return false;
        }

        debug!(pci, log = %path.display(), "Starting pf_bb_config log tailer");
        let handle = tokio::spawn(tail(pci.to_string(), path, token.child_token()));
        tailers.insert(pci.to_string(), handle);
        true
    }

    pub fn is_tailing(&self, pci: &str) -> bool {
        self.tailers
            .lock()
            .map(|tailers| tailers.get(pci).is_some_and(|handle| !handle.is_finished()))
            .unwrap_or(false)
    }
}

async fn open(path: &Path, token: &CancellationToken) -> Option<File> {
    loop {
        match File::open(path).await {
            Ok(file) => return Some(file),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(log = %path.display(), "Failed to open log: {}", e),
        }
        tokio::select! {
            _ = token.cancelled() => return None,
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }
}

/// Bytes kept from just before the read position to recognize the same log
const ANCHOR_LEN: usize = 64;

/// Where a tailer is in its log
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct ReadMark {
    inode: u64,
    position: u64,
    /// The last bytes read, ending at `position`
    anchor: Vec<u8>,
}

impl ReadMark {
    fn new(inode: u64) -> Self {
        Self {
            inode,
            ..Self::default()
        }
    }

    fn advance(&mut self, bytes: &[u8]) {
        self.position += bytes.len() as u64;
        self.anchor.extend_from_slice(bytes);
        let excess = self.anchor.len().saturating_sub(ANCHOR_LEN);
        self.anchor.drain(..excess);
    }
}

/// Whether the log at `path` no longer continues what `mark` has read
///
/// Catches replacement, truncation and a clear followed by regrowth past the
/// read position.
async fn log_rewritten(path: &Path, mark: &ReadMark) -> bool {
    let Ok(meta) = tokio::fs::metadata(path).await else {
        return false;
    };
    if meta.ino() != mark.inode || meta.len() < mark.position {
        return true;
    }
    if mark.anchor.is_empty() {
        return false;
    }

    let Ok(mut file) = File::open(path).await else {
        return false;
    };
    let start = mark.position - mark.anchor.len() as u64;
    let mut current = vec![0u8; mark.anchor.len()];
    if file.seek(SeekFrom::Start(start)).await.is_err() || file.read_exact(&mut current).await.is_err() {
        return true;
    }
    current != mark.anchor
}

async fn tail(pci: String, path: PathBuf, token: CancellationToken) {
    let Some(file) = open(&path, &token).await else {
        return;
    };
    let inode = file.metadata().await.map(|meta| meta.ino()).unwrap_or_default();
    let mut reader = BufReader::new(file);
    let mut mark = ReadMark::new(inode);
    let mut line = String::new();

    loop {
        line.clear();
        let read = tokio::select! {
            _ = token.cancelled() => return,
            read = reader.read_line(&mut line) => read,
        };

        match read {
            Ok(0) => {
                if log_rewritten(&path, &mark).await {
                    debug!(pci = %pci, "pf_bb_config log rewritten, reading from the start");
                    let Some(file) = open(&path, &token).await else {
                        return;
                    };
                    let inode = file.metadata().await.map(|meta| meta.ino()).unwrap_or_default();
                    reader = BufReader::new(file);
                    mark = ReadMark::new(inode);
                    continue;
                }
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(POLL_INTERVAL) => {}
                }
            }
            Ok(_) => {
                mark.advance(line.as_bytes());
                let text = line.trim_end();
                if !text.is_empty() {
                    info!(target: "pf_bb_config", pci = %pci, "{}", text);
                }
            }
            Err(e) => {
                warn!(pci = %pci, "Stopped tailing pf_bb_config log: {}", e);
                return;
            }
        }
    }
}
