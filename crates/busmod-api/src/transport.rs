//! Unix socket bus client.
//!
//! [`BusClient::connect`] opens exactly one connection and spawns two
//! background tasks: a writer that drains an outbound queue in FIFO
//! order, and a reader that decodes frames and hands them to the
//! [`EventRouter`]. There is no reconnection; once the peer hangs up the
//! client is closed for good and [`BusClient::closed`] resolves.
//!
//! ```rust,ignore
//! let bus = BusClient::connect("/run/core/bus.sock", "hue").await?;
//! let mut commands = bus.subscribe("commands/hue");
//! bus.publish("sys/register", "register", payload)?;
//! while let Some(event) = commands.recv().await { /* ... */ }
//! bus.close().await;
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::codec::EventCodec;
use crate::error::Error;
use crate::event::{Event, Payload};
use crate::router::{EventRouter, Subscription};
use crate::topic::TopicPattern;

// ── BusClient ────────────────────────────────────────────────────────

/// Handle to the single bus connection.
///
/// Cheaply cloneable via `Arc<BusInner>`. Publishing is synchronous
/// (it only enqueues); ordering on the wire follows call order.
#[derive(Clone)]
pub struct BusClient {
    inner: Arc<BusInner>,
}

struct BusInner {
    endpoint: PathBuf,
    source: String,
    router: Arc<EventRouter>,
    outbound: mpsc::UnboundedSender<Event>,
    /// Cancelled when the connection is gone, for whatever reason.
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl BusClient {
    /// Connect to the bus endpoint. Every event this client publishes is
    /// stamped with `source`.
    pub async fn connect(
        endpoint: impl AsRef<Path>,
        source: impl Into<String>,
    ) -> Result<Self, Error> {
        let endpoint = endpoint.as_ref().to_path_buf();
        let stream = UnixStream::connect(&endpoint)
            .await
            .map_err(|source| Error::Connect {
                endpoint: endpoint.display().to_string(),
                source,
            })?;

        let (read_half, write_half) = stream.into_split();
        let router = Arc::new(EventRouter::new());
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let reader = tokio::spawn(read_loop(
            FramedRead::new(read_half, EventCodec::new()),
            Arc::clone(&router),
            cancel.clone(),
        ));
        let writer = tokio::spawn(write_loop(
            FramedWrite::new(write_half, EventCodec::new()),
            outbound_rx,
            cancel.clone(),
        ));

        info!(endpoint = %endpoint.display(), "connected to bus");

        Ok(Self {
            inner: Arc::new(BusInner {
                endpoint,
                source: source.into(),
                router,
                outbound,
                cancel,
                task_handles: Mutex::new(vec![reader, writer]),
            }),
        })
    }

    pub fn endpoint(&self) -> &Path {
        &self.inner.endpoint
    }

    /// Module id stamped on outbound events.
    pub fn source(&self) -> &str {
        &self.inner.source
    }

    // ── Publish / subscribe ──────────────────────────────────────────

    /// Build an event from parts and publish it.
    pub fn publish(
        &self,
        topic: impl Into<String>,
        kind: impl Into<String>,
        data: Payload,
    ) -> Result<(), Error> {
        self.send(Event::new(topic, kind).with_data(data))
    }

    /// Publish a prepared event. A missing `source` is filled in.
    ///
    /// The bus is not assumed to echo, so local subscribers do not see
    /// their own publishes.
    pub fn send(&self, mut event: Event) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        if event.source.is_none() {
            event.source = Some(self.inner.source.clone());
        }
        trace!(topic = %event.topic, kind = %event.kind, "publishing");
        self.inner.outbound.send(event).map_err(|_| Error::Closed)
    }

    /// Register a topic pattern. See [`crate::matches`] for the rule.
    pub fn subscribe(&self, pattern: impl Into<TopicPattern>) -> Subscription {
        self.inner.router.subscribe(pattern)
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.inner.router
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Resolves once the connection is gone.
    pub async fn closed(&self) {
        self.inner.cancel.cancelled().await;
    }

    /// Tear the connection down.
    ///
    /// Events already queued are still written before the socket is shut.
    /// Subscriptions end once their queues drain.
    pub async fn close(&self) {
        self.inner.cancel.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        debug!(endpoint = %self.inner.endpoint.display(), "bus client closed");
    }
}

impl std::fmt::Debug for BusClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusClient")
            .field("endpoint", &self.inner.endpoint)
            .field("source", &self.inner.source)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

// ── Background loops ─────────────────────────────────────────────────

/// Decode inbound frames and route them until EOF, a fatal read error,
/// or cancellation. Bad frames are logged and skipped.
async fn read_loop(
    mut frames: FramedRead<OwnedReadHalf, EventCodec>,
    router: Arc<EventRouter>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = frames.next() => {
                match frame {
                    Some(Ok(Ok(event))) => {
                        router.route(&event);
                    }
                    Some(Ok(Err(e))) => {
                        warn!(error = %e, "skipping undecodable bus frame");
                    }
                    Some(Err(e)) => {
                        debug!(error = %e, "bus read failed");
                        break;
                    }
                    None => {
                        info!("bus connection closed by peer");
                        break;
                    }
                }
            }
        }
    }

    cancel.cancel();
    router.clear();
}

/// Write queued events in order. On cancellation, whatever is already
/// queued is flushed before the write half is shut down.
async fn write_loop(
    mut sink: FramedWrite<OwnedWriteHalf, EventCodec>,
    mut queue: mpsc::UnboundedReceiver<Event>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = queue.recv() => {
                let Some(event) = event else { break };
                if let Err(e) = sink.send(event).await {
                    warn!(error = %e, "bus write failed");
                    cancel.cancel();
                    return;
                }
            }
        }
    }

    queue.close();
    while let Ok(event) = queue.try_recv() {
        if let Err(e) = sink.send(event).await {
            debug!(error = %e, "dropping queued events, bus write failed during close");
            break;
        }
    }
    let _ = sink.close().await;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn connect_to_missing_socket_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = BusClient::connect(dir.path().join("nope.sock"), "m")
            .await
            .unwrap_err();
        assert!(err.is_connect());
    }

    #[tokio::test]
    async fn publishes_arrive_in_order_with_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let bus = BusClient::connect(&path, "mod-a").await.unwrap();
        let (peer, _) = listener.accept().await.unwrap();

        for i in 0..5 {
            bus.publish(format!("t/{i}"), "x", Payload::new()).unwrap();
        }
        bus.close().await;

        let mut lines = BufReader::new(peer).lines();
        for i in 0..5 {
            let line = lines.next_line().await.unwrap().unwrap();
            let event = crate::codec::decode(line.as_bytes()).unwrap();
            assert_eq!(event.topic, format!("t/{i}"));
            assert_eq!(event.source.as_deref(), Some("mod-a"));
        }
        assert!(lines.next_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn garbage_frame_is_skipped_and_stream_continues() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let bus = BusClient::connect(&path, "mod-a").await.unwrap();
        let mut sub = bus.subscribe("commands/*");
        let (mut peer, _) = listener.accept().await.unwrap();

        peer.write_all(b"this is not json\n").await.unwrap();
        peer.write_all(b"{\"topic\":\"commands/mod-a\",\"type\":\"get_instances\"}\n")
            .await
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, "get_instances");
        bus.close().await;
    }

    #[tokio::test]
    async fn peer_hangup_closes_client() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let bus = BusClient::connect(&path, "mod-a").await.unwrap();
        let mut sub = bus.subscribe("*");
        let (peer, _) = listener.accept().await.unwrap();
        drop(peer);

        tokio::time::timeout(Duration::from_secs(2), bus.closed())
            .await
            .unwrap();
        assert!(bus.is_closed());
        assert!(bus.publish("t", "x", Payload::new()).unwrap_err().is_closed());
        assert!(sub.recv().await.is_none());
    }
}
