use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};

use tracing::{debug, warn};

use super::{StateObserver, TableSnapshot};
use crate::error::Result;

/// Snapshots waiting for the writer thread. Older ones are not worth keeping
/// once the viewer falls behind.
const QUEUE_DEPTH: usize = 16;

/// Streams snapshots as newline-delimited JSON to a viewer.
///
/// Serialization and I/O happen on a background thread. `observe` only
/// enqueues, and drops the snapshot when the queue is full or the viewer
/// has gone away.
pub struct SocketObserver {
    tx: SyncSender<TableSnapshot>,
    dropped: AtomicU64,
}

impl SocketObserver {
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        let _ = stream.set_nodelay(true);
        Self::with_writer(stream)
    }

    /// Stream to an arbitrary writer.
    pub fn with_writer<W: Write + Send + 'static>(mut writer: W) -> Result<Self> {
        let (tx, rx) = mpsc::sync_channel::<TableSnapshot>(QUEUE_DEPTH);

        std::thread::Builder::new()
            .name("memfs-observer".to_string())
            .spawn(move || {
                debug!("Observer thread started");
                for snapshot in rx {
                    let sent = serde_json::to_writer(&mut writer, &snapshot)
                        .map_err(std::io::Error::from)
                        .and_then(|_| writer.write_all(b"\n"))
                        .and_then(|_| writer.flush());
                    if let Err(e) = sent {
                        warn!("Observer connection lost: {}", e);
                        break;
                    }
                }
                debug!("Observer thread shutting down");
            })?;

        Ok(Self {
            tx,
            dropped: AtomicU64::new(0),
        })
    }

    /// Snapshots discarded because the viewer was slow or gone.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl StateObserver for SocketObserver {
    fn observe(&self, snapshot: TableSnapshot) {
        match self.tx.try_send(snapshot) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
