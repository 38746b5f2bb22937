// Live-update broadcast hub.
//
// A single owner task holds the subscriber set privately and serializes all
// mutations: register, unregister and broadcast arrive as commands over one
// mpsc channel, so no two mutations can interleave. A write failure during a
// broadcast evicts that connection immediately without aborting delivery to
// the rest. A periodic keepalive pushes a literal heartbeat through the same
// path to flush out dead connections.
//
// Writes within one broadcast round are sequential inside the owner; a slow
// subscriber delays the rest of that round (set mutation stays serialized
// either way).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{info, warn};

/// Fixed heartbeat payload; carries no meaning beyond liveness.
pub const KEEPALIVE_PAYLOAD: &[u8] = b"ping";

/// Default keepalive interval.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Subscriber seam
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
#[error("subscriber transport error: {0}")]
pub struct TransportError(pub String);

/// A live subscriber connection, owned exclusively by the hub task. The hub
/// only needs to write payloads and release the transport.
#[async_trait]
pub trait Subscriber: Send {
    async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError>;
    async fn close(&mut self);
}

/// Opaque handle identifying a registered subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

// ---------------------------------------------------------------------------
// Hub commands and handle
// ---------------------------------------------------------------------------

enum Command {
    Register {
        id: SubscriberId,
        conn: Box<dyn Subscriber>,
    },
    Unregister {
        id: SubscriberId,
    },
    Broadcast {
        payload: Vec<u8>,
    },
    /// Number of live subscribers. Also serves as a synchronization point:
    /// the reply proves every earlier command has been applied.
    Count {
        reply: oneshot::Sender<usize>,
    },
}

/// Cloneable front of the hub owner task.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<Command>,
    next_id: Arc<AtomicU64>,
}

impl HubHandle {
    /// Hand a connection to the hub. Returns the id to unregister with.
    pub async fn register(&self, conn: Box<dyn Subscriber>) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let _ = self.tx.send(Command::Register { id, conn }).await;
        id
    }

    /// Remove and release a connection. Safe no-op if already removed.
    pub async fn unregister(&self, id: SubscriberId) {
        let _ = self.tx.send(Command::Unregister { id }).await;
    }

    /// Deliver `payload` to every live subscriber.
    pub async fn broadcast(&self, payload: Vec<u8>) {
        let _ = self.tx.send(Command::Broadcast { payload }).await;
    }

    /// Current number of live subscribers (0 if the hub has shut down).
    pub async fn subscriber_count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Count { reply }).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the hub owner task and return its handle.
pub fn spawn() -> HubHandle {
    let (tx, rx) = mpsc::channel(256);
    tokio::spawn(run(rx));
    HubHandle {
        tx,
        next_id: Arc::new(AtomicU64::new(1)),
    }
}

/// The owner loop. Exits when every handle has been dropped.
async fn run(mut rx: mpsc::Receiver<Command>) {
    let mut subscribers: HashMap<SubscriberId, Box<dyn Subscriber>> = HashMap::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Register { id, conn } => {
                // A replaced entry (same id re-registered) is closed first so
                // double registration cannot leak or corrupt the set.
                if let Some(mut old) = subscribers.insert(id, conn) {
                    old.close().await;
                }
                info!(online = subscribers.len(), "subscriber registered");
            }
            Command::Unregister { id } => {
                if let Some(mut conn) = subscribers.remove(&id) {
                    conn.close().await;
                    info!(online = subscribers.len(), "subscriber unregistered");
                }
            }
            Command::Broadcast { payload } => {
                let mut dead = Vec::new();
                for (id, conn) in subscribers.iter_mut() {
                    if let Err(e) = conn.send(&payload).await {
                        warn!(error = %e, "subscriber write failed, evicting");
                        dead.push(*id);
                    }
                }
                for id in dead {
                    if let Some(mut conn) = subscribers.remove(&id) {
                        conn.close().await;
                    }
                }
            }
            Command::Count { reply } => {
                let _ = reply.send(subscribers.len());
            }
        }
    }

    for (_, mut conn) in subscribers.drain() {
        conn.close().await;
    }
}

/// Broadcast the heartbeat payload on a fixed interval until the hub goes
/// away. Dead connections are pruned by the normal eviction path.
pub async fn run_keepalive(hub: HubHandle, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so the heartbeat is periodic.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if hub.is_closed() {
            return;
        }
        hub.broadcast(KEEPALIVE_PAYLOAD.to_vec()).await;
    }
}

// ---------------------------------------------------------------------------
// WebSocket transport
// ---------------------------------------------------------------------------

/// The write half of an accepted WebSocket connection.
pub struct WsSubscriber {
    sink: SplitSink<WebSocketStream<TcpStream>, Message>,
}

#[async_trait]
impl Subscriber for WsSubscriber {
    async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let text = String::from_utf8_lossy(payload).into_owned();
        self.sink
            .send(Message::text(text))
            .await
            .map_err(|e| TransportError(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.sink.send(Message::Close(None)).await;
        let _ = self.sink.close().await;
    }
}

/// Accept WebSocket upgrades on `listener` and register each connection
/// with the hub. The read half of every connection is drained in its own
/// task, which unregisters the subscriber on close or error.
pub async fn run_ws_listener(listener: TcpListener, hub: HubHandle) -> anyhow::Result<()> {
    let local_addr = listener.local_addr()?;
    info!("subscriber endpoint listening on {local_addr}");

    loop {
        let (stream, addr) = listener.accept().await?;
        let hub = hub.clone();

        tokio::spawn(async move {
            let ws = match tokio_tungstenite::accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!("WebSocket handshake failed for {addr}: {e}");
                    return;
                }
            };

            let (sink, mut read) = ws.split();
            let id = hub.register(Box::new(WsSubscriber { sink })).await;

            // Inbound frames carry no commands; drain until the peer goes away.
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            hub.unregister(id).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;

    /// Subscriber double: records payloads, can be told to fail writes.
    #[derive(Clone)]
    struct MockConn {
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
        closed: Arc<AtomicBool>,
        fail: Arc<AtomicBool>,
    }

    impl MockConn {
        fn new() -> Self {
            Self {
                sent: Arc::new(Mutex::new(Vec::new())),
                closed: Arc::new(AtomicBool::new(false)),
                fail: Arc::new(AtomicBool::new(false)),
            }
        }

        fn failing() -> Self {
            let conn = Self::new();
            conn.fail.store(true, Ordering::SeqCst);
            conn
        }

        fn sent(&self) -> Vec<Vec<u8>> {
            self.sent.lock().unwrap().clone()
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Subscriber for MockConn {
        async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(TransportError("mock write failure".to_string()));
            }
            self.sent.lock().unwrap().push(payload.to_vec());
            Ok(())
        }

        async fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_all_subscribers() {
        let hub = spawn();
        let a = MockConn::new();
        let b = MockConn::new();
        hub.register(Box::new(a.clone())).await;
        hub.register(Box::new(b.clone())).await;

        hub.broadcast(b"hello".to_vec()).await;
        assert_eq!(hub.subscriber_count().await, 2);

        assert_eq!(a.sent(), vec![b"hello".to_vec()]);
        assert_eq!(b.sent(), vec![b"hello".to_vec()]);
    }

    #[tokio::test]
    async fn unregister_twice_is_a_noop() {
        let hub = spawn();
        let a = MockConn::new();
        let id = hub.register(Box::new(a.clone())).await;
        assert_eq!(hub.subscriber_count().await, 1);

        hub.unregister(id).await;
        assert_eq!(hub.subscriber_count().await, 0);
        assert!(a.is_closed());

        // Second unregister must not disturb anything.
        hub.unregister(id).await;
        assert_eq!(hub.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn unregister_releases_only_that_connection() {
        let hub = spawn();
        let a = MockConn::new();
        let b = MockConn::new();
        let id_a = hub.register(Box::new(a.clone())).await;
        hub.register(Box::new(b.clone())).await;

        hub.unregister(id_a).await;
        hub.broadcast(b"x".to_vec()).await;
        assert_eq!(hub.subscriber_count().await, 1);

        assert!(a.sent().is_empty());
        assert_eq!(b.sent().len(), 1);
    }

    #[tokio::test]
    async fn failing_subscriber_is_evicted_others_still_served() {
        let hub = spawn();
        let a = MockConn::new();
        let b = MockConn::failing();
        let c = MockConn::new();
        hub.register(Box::new(a.clone())).await;
        hub.register(Box::new(b.clone())).await;
        hub.register(Box::new(c.clone())).await;

        hub.broadcast(b"first".to_vec()).await;
        assert_eq!(hub.subscriber_count().await, 2);
        assert!(b.is_closed());
        assert_eq!(a.sent(), vec![b"first".to_vec()]);
        assert_eq!(c.sent(), vec![b"first".to_vec()]);

        // Later broadcasts never target the evicted connection.
        hub.broadcast(b"second".to_vec()).await;
        assert_eq!(hub.subscriber_count().await, 2);
        assert_eq!(a.sent().len(), 2);
        assert_eq!(c.sent().len(), 2);
        assert!(b.sent().is_empty());
    }

    #[tokio::test]
    async fn keepalive_sends_heartbeat_payload() {
        let hub = spawn();
        let a = MockConn::new();
        hub.register(Box::new(a.clone())).await;

        let ka = tokio::spawn(run_keepalive(hub.clone(), Duration::from_millis(10)));

        for _ in 0..50 {
            if !a.sent().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        ka.abort();

        let sent = a.sent();
        assert!(!sent.is_empty(), "no heartbeat observed");
        assert!(sent.iter().all(|p| p == KEEPALIVE_PAYLOAD));
    }

    #[tokio::test]
    async fn keepalive_prunes_dead_connections() {
        let hub = spawn();
        let live = MockConn::new();
        let dead = MockConn::failing();
        hub.register(Box::new(live.clone())).await;
        hub.register(Box::new(dead.clone())).await;
        assert_eq!(hub.subscriber_count().await, 2);

        let ka = tokio::spawn(run_keepalive(hub.clone(), Duration::from_millis(10)));

        for _ in 0..50 {
            if hub.subscriber_count().await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        ka.abort();

        assert_eq!(hub.subscriber_count().await, 1);
        assert!(dead.is_closed());
        assert!(!live.is_closed());
    }

    #[tokio::test]
    async fn end_to_end_websocket_subscriber() {
        let hub = spawn();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(run_ws_listener(listener, hub.clone()));

        let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .expect("client should connect");

        // Wait until the hub has registered the connection.
        for _ in 0..50 {
            if hub.subscriber_count().await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(hub.subscriber_count().await, 1);

        hub.broadcast(b"{\"code\":\"510300\"}".to_vec()).await;

        let msg = client.next().await.expect("frame expected").unwrap();
        assert_eq!(msg.into_text().unwrap().as_str(), "{\"code\":\"510300\"}");

        // Client disconnect unregisters the subscriber.
        client.close(None).await.unwrap();
        for _ in 0..50 {
            if hub.subscriber_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(hub.subscriber_count().await, 0);

        server.abort();
    }
}
