// ── Development bus harness ──
//
// Stand-in for the core bus process. Listens on a Unix socket, relays
// every frame a client sends to all *other* clients (never back to the
// sender), and records each relayed event so tests can observe traffic.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnixListenerStream;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::codec::EventCodec;
use crate::error::Error;
use crate::event::Event;
use crate::topic::TopicPattern;

const RECORD_CHANNEL_CAPACITY: usize = 1024;

/// Id used as the "sender" for events injected by the harness itself.
const HARNESS_PEER: u64 = 0;

// ── Harness ──────────────────────────────────────────────────────────

pub struct Harness {
    path: PathBuf,
    inner: Arc<HarnessInner>,
    cancel: CancellationToken,
    accept: JoinHandle<()>,
}

struct HarnessInner {
    peers: DashMap<u64, mpsc::UnboundedSender<Event>>,
    next_peer: AtomicU64,
    clients: watch::Sender<usize>,
    record: broadcast::Sender<Event>,
}

impl Harness {
    /// Bind `path` (replacing a stale socket file) and start accepting.
    pub fn start(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "removed stale socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io(e)),
        }
        let listener = UnixListener::bind(&path)?;

        let (clients, _) = watch::channel(0);
        let (record, _) = broadcast::channel(RECORD_CHANNEL_CAPACITY);
        let inner = Arc::new(HarnessInner {
            peers: DashMap::new(),
            next_peer: AtomicU64::new(HARNESS_PEER + 1),
            clients,
            record,
        });
        let cancel = CancellationToken::new();
        let accept = tokio::spawn(accept_loop(
            UnixListenerStream::new(listener),
            Arc::clone(&inner),
            cancel.clone(),
        ));

        debug!(path = %path.display(), "harness listening");
        Ok(Self {
            path,
            inner,
            cancel,
            accept,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Observe every event relayed from now on.
    pub fn recorder(&self) -> Recorder {
        Recorder {
            rx: self.inner.record.subscribe(),
        }
    }

    /// Send an event to every connected client, as if the core published it.
    pub fn inject(&self, event: Event) {
        self.inner.relay(HARNESS_PEER, event);
    }

    pub fn client_count(&self) -> usize {
        *self.inner.clients.borrow()
    }

    /// Wait until at least `n` clients are connected.
    pub async fn wait_for_clients(&self, n: usize, timeout: Duration) -> bool {
        let mut rx = self.inner.clients.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|count| *count >= n))
            .await
            .is_ok_and(|r| r.is_ok())
    }

    /// Stop accepting, drop all clients, remove the socket file.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        let _ = (&mut self.accept).await;
        let _ = std::fs::remove_file(&self.path);
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl HarnessInner {
    fn relay(&self, from: u64, event: Event) {
        let _ = self.record.send(event.clone());
        for peer in &self.peers {
            if *peer.key() == from {
                continue;
            }
            let _ = peer.value().send(event.clone());
        }
    }
}

// ── Recorder ─────────────────────────────────────────────────────────

/// Receiving side of the harness traffic log.
pub struct Recorder {
    rx: broadcast::Receiver<Event>,
}

impl Recorder {
    /// Next relayed event whose topic matches `pattern`, skipping others.
    /// `None` on timeout.
    pub async fn next_matching(
        &mut self,
        pattern: impl Into<TopicPattern>,
        timeout: Duration,
    ) -> Option<Event> {
        let pattern = pattern.into();
        tokio::time::timeout(timeout, async {
            loop {
                match self.rx.recv().await {
                    Ok(event) if pattern.matches(&event.topic) => return Some(event),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "recorder lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .await
        .ok()
        .flatten()
    }

    /// Next relayed event matching both topic pattern and type.
    pub async fn next_of_kind(
        &mut self,
        pattern: impl Into<TopicPattern>,
        kind: &str,
        timeout: Duration,
    ) -> Option<Event> {
        let pattern = pattern.into();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            let event = self.next_matching(pattern.clone(), left).await?;
            if event.kind == kind {
                return Some(event);
            }
        }
    }
}

// ── Connection handling ──────────────────────────────────────────────

async fn accept_loop(
    mut incoming: UnixListenerStream,
    inner: Arc<HarnessInner>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            conn = incoming.next() => {
                match conn {
                    Some(Ok(stream)) => {
                        let id = inner.next_peer.fetch_add(1, Ordering::Relaxed);
                        tokio::spawn(serve_peer(id, stream, Arc::clone(&inner), cancel.clone()));
                    }
                    Some(Err(e)) => warn!(error = %e, "harness accept failed"),
                    None => break,
                }
            }
        }
    }
}

async fn serve_peer(
    id: u64,
    stream: UnixStream,
    inner: Arc<HarnessInner>,
    cancel: CancellationToken,
) {
    let (read_half, write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
    inner.peers.insert(id, tx);
    inner.clients.send_modify(|n| *n += 1);
    debug!(peer = id, "harness client connected");

    let writer_cancel = cancel.clone();
    let writer = tokio::spawn(async move {
        let mut sink = FramedWrite::new(write_half, EventCodec::new());
        loop {
            tokio::select! {
                biased;
                _ = writer_cancel.cancelled() => break,
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    if sink.send(event).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut frames = FramedRead::new(read_half, EventCodec::new());
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = frames.next() => {
                match frame {
                    Some(Ok(Ok(event))) => inner.relay(id, event),
                    Some(Ok(Err(e))) => warn!(peer = id, error = %e, "harness skipped undecodable frame"),
                    Some(Err(_)) | None => break,
                }
            }
        }
    }

    inner.peers.remove(&id);
    inner.clients.send_modify(|n| *n = n.saturating_sub(1));
    let _ = writer.await;
    debug!(peer = id, "harness client disconnected");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::event::Payload;
    use crate::transport::BusClient;

    const WAIT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn relays_to_others_but_not_sender() {
        let dir = tempfile::tempdir().unwrap();
        let harness = Harness::start(dir.path().join("bus.sock")).unwrap();

        let a = BusClient::connect(harness.path(), "a").await.unwrap();
        let b = BusClient::connect(harness.path(), "b").await.unwrap();
        assert!(harness.wait_for_clients(2, WAIT).await);

        let mut a_sub = a.subscribe("*");
        let mut b_sub = b.subscribe("*");
        let mut recorder = harness.recorder();

        a.publish("state/x", "state", Payload::new()).unwrap();

        let seen = recorder.next_matching("state/*", WAIT).await.unwrap();
        assert_eq!(seen.source.as_deref(), Some("a"));

        let got = tokio::time::timeout(WAIT, b_sub.recv()).await.unwrap().unwrap();
        assert_eq!(got.topic, "state/x");
        assert!(a_sub.try_recv().is_none());

        a.close().await;
        b.close().await;
        harness.shutdown().await;
    }

    #[tokio::test]
    async fn inject_reaches_every_client() {
        let dir = tempfile::tempdir().unwrap();
        let harness = Harness::start(dir.path().join("bus.sock")).unwrap();
        let a = BusClient::connect(harness.path(), "a").await.unwrap();
        let mut sub = a.subscribe("commands/a");
        assert!(harness.wait_for_clients(1, WAIT).await);

        harness.inject(Event::new("commands/a", "get_instances"));
        let got = tokio::time::timeout(WAIT, sub.recv()).await.unwrap().unwrap();
        assert_eq!(got.kind, "get_instances");

        a.close().await;
        assert!(
            tokio::time::timeout(WAIT, async {
                while harness.client_count() > 0 {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await
            .is_ok()
        );
        harness.shutdown().await;
    }

    #[tokio::test]
    async fn start_replaces_stale_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus.sock");
        std::fs::write(&path, b"stale").unwrap();
        let harness = Harness::start(&path).unwrap();
        assert!(BusClient::connect(&path, "a").await.is_ok());
        harness.shutdown().await;
        assert!(!path.exists());
    }
}
