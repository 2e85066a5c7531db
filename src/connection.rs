use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::Rng;
use rand::distributions::Alphanumeric;
use thiserror::Error;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot};
use tokio_tungstenite::tungstenite::http::HeaderMap;
use tokio_tungstenite::tungstenite::http::header::{self, HeaderName, HeaderValue};
use tracing::{debug, warn};
use url::Url;

use crate::codec::{self, CodecError, encode_frame};
use crate::frame::{Command, Frame};
use crate::subscription::Subscription;
use crate::transport::{Transport, TransportReader, TransportWriter};

/// `accept-version` sent in CONNECT.
const ACCEPT_VERSION: &str = "1.1,1.0";
/// Versions we accept back in CONNECTED.
const SUPPORTED_VERSIONS: &[&str] = &["1.0", "1.1"];
/// Capacity of the outbound writer request channel.
const OUTBOUND_CAPACITY: usize = 32;
/// Capacity of each subscription's delivery channel.
const SUBSCRIPTION_CAPACITY: usize = 16;

/// Errors returned by `StompClient` operations.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The target URL does not use `ws` or `wss`. Raised before any I/O.
    #[error("unsupported url scheme '{0}': expected ws or wss")]
    UnsupportedScheme(String),
    /// Dial failure, or the CONNECT/CONNECTED exchange did not complete.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),
    /// An inbound message violated the envelope or frame grammar.
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] CodecError),
    /// Transport-level failure after the session was established.
    #[error("transport error: {0}")]
    Transport(String),
    /// The server reported a protocol-level error.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// No RECEIPT arrived for a graceful disconnect within the bound.
    #[error("disconnect timeout: no RECEIPT received for '{0}' within timeout")]
    DisconnectTimeout(String),
    /// A second disconnect was attempted while one was already in flight.
    #[error("a graceful disconnect is already in progress")]
    DisconnectInProgress,
}

/// Connection parameters beyond the URL.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// `heart-beat` header values sent in CONNECT, in milliseconds.
    pub heartbeat: (u64, u64),
    /// Bound on the RECEIPT wait in `disconnect`.
    pub disconnect_timeout: Duration,
    /// Extra request headers for the websocket handshake.
    pub headers: Vec<(String, String)>,
    /// Bearer token attached as an `Authorization` header.
    pub token: Option<String>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            heartbeat: (10_000, 10_000),
            disconnect_timeout: Duration::from_secs(10),
            headers: Vec::new(),
            token: None,
        }
    }
}

/// Parse the STOMP `heart-beat` header value (format: "cx,cy").
///
/// The values represent milliseconds; missing or invalid fields default
/// to `0` (disabled).
pub fn parse_heartbeat_header(header: &str) -> (u64, u64) {
    let mut parts = header.split(',');
    let cx = parts
        .next()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    let cy = parts
        .next()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    (cx, cy)
}

/// Negotiate heartbeat intervals between client and server.
///
/// Returns `(outgoing, incoming)` where each element is `Some(Duration)`
/// if heartbeats are enabled in that direction, or `None` if disabled.
/// The negotiated interval uses the STOMP rule of taking the maximum of
/// the corresponding client and server values.
pub fn negotiate_heartbeats(
    client_out: u64,
    client_in: u64,
    server_out: u64,
    server_in: u64,
) -> (Option<Duration>, Option<Duration>) {
    let negotiated_out_ms = std::cmp::max(client_out, server_in);
    let negotiated_in_ms = std::cmp::max(client_in, server_out);

    let outgoing = if negotiated_out_ms == 0 {
        None
    } else {
        Some(Duration::from_millis(negotiated_out_ms))
    };
    let incoming = if negotiated_in_ms == 0 {
        None
    } else {
        Some(Duration::from_millis(negotiated_in_ms))
    };
    (outgoing, incoming)
}

/// Map a websocket scheme to its HTTP counterpart for handshake metadata.
/// Any other scheme is rejected before any network I/O happens.
fn handshake_scheme(url: &Url) -> Result<&'static str, ClientError> {
    match url.scheme() {
        "ws" => Ok("http"),
        "wss" => Ok("https"),
        other => Err(ClientError::UnsupportedScheme(other.to_string())),
    }
}

/// The `Origin` value for the handshake request: the HTTP-shaped
/// counterpart of the websocket URL. The dial itself keeps the original
/// `ws`/`wss` URL.
fn handshake_origin(url: &Url) -> Result<String, ClientError> {
    let scheme = handshake_scheme(url)?;
    let host = url
        .host_str()
        .ok_or_else(|| ClientError::HandshakeFailed("url has no host".to_string()))?;
    Ok(match url.port() {
        Some(port) => format!("{scheme}://{host}:{port}"),
        None => format!("{scheme}://{host}"),
    })
}

/// Append the SockJS session suffix `/<server-id>/<session-id>/websocket`
/// to the endpoint path.
fn sockjs_session_url(base: &Url) -> Url {
    let mut url = base.clone();
    let path = format!(
        "{}/{}/{}/websocket",
        base.path().trim_end_matches('/'),
        random_digits(999),
        random_string()
    );
    url.set_path(&path);
    url
}

/// Random decimal string zero-padded to the width of `max`.
fn random_digits(max: u32) -> String {
    let width = max.to_string().len();
    let n = rand::thread_rng().gen_range(0..=max);
    format!("{n:0width$}")
}

/// 16 random alphanumeric characters. Unique enough within one session's
/// lifetime; not a security primitive.
fn random_string() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

/// Build the synthesized ERROR frame used for session-wide failure
/// broadcasts.
fn error_frame(message: &str) -> Frame {
    Frame::new(Command::Error).header("message", message)
}

/// Deliver one ERROR frame carrying `message` to every channel in the
/// registry snapshot. An empty registry is a no-op.
async fn send_error(channels: &HashMap<String, mpsc::Sender<Frame>>, message: &str) {
    for (id, tx) in channels {
        if tx.send(error_frame(message)).await.is_err() {
            debug!(subscription = %id, "subscriber gone during error broadcast");
        }
    }
}

/// One outbound frame queued for the writer loop, with an optional
/// completion signal fired after the frame hits the transport.
pub(crate) struct WriteRequest {
    pub(crate) frame: Frame,
    pub(crate) done: Option<oneshot::Sender<()>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Active,
    Disconnecting,
    Terminated,
}

struct PendingReceipt {
    id: String,
    notify: oneshot::Sender<()>,
}

/// State shared between the caller-facing client handles and the two
/// session loops.
struct Shared {
    /// subscription id -> delivery channel. Mutated by subscribe and
    /// unsubscribe on caller tasks, read by the reader loop.
    subscriptions: Mutex<HashMap<String, mpsc::Sender<Frame>>>,
    /// The single outstanding disconnect receipt.
    pending_receipt: Mutex<Option<PendingReceipt>>,
    state: Mutex<SessionState>,
}

impl Shared {
    fn new() -> Self {
        Self {
            subscriptions: Mutex::new(HashMap::new()),
            pending_receipt: Mutex::new(None),
            state: Mutex::new(SessionState::Active),
        }
    }

    /// Route a MESSAGE frame to its subscription's channel. Frames with no
    /// `subscription` header or an unregistered id are dropped.
    async fn dispatch_message(&self, frame: Frame) {
        let Some(sub_id) = frame.get_header("subscription").map(str::to_string) else {
            debug!("MESSAGE without subscription header dropped");
            return;
        };
        let sender = self.subscriptions.lock().await.get(&sub_id).cloned();
        match sender {
            // Delivery may block on a full subscriber channel. There is one
            // shared dispatch loop, so a slow subscriber stalls dispatch
            // for every subscription.
            Some(tx) => {
                if tx.send(frame).await.is_err() {
                    debug!(subscription = %sub_id, "receiver dropped; message discarded");
                }
            }
            None => debug!(subscription = %sub_id, "no subscription registered; message dropped"),
        }
    }

    /// Signal the pending disconnect if this RECEIPT matches it. Returns
    /// true when the receipt completed a graceful disconnect.
    async fn complete_receipt(&self, frame: &Frame) -> bool {
        let Some(receipt_id) = frame.get_header("receipt-id") else {
            debug!("RECEIPT without receipt-id ignored");
            return false;
        };
        let mut pending = self.pending_receipt.lock().await;
        match pending.take() {
            Some(p) if p.id == receipt_id => {
                let _ = p.notify.send(());
                true
            }
            other => {
                // a stale receipt keeps any non-matching pending entry
                *pending = other;
                debug!(receipt = receipt_id, "unmatched RECEIPT ignored");
                false
            }
        }
    }

    /// Terminate the session. With a reason, a synthesized ERROR frame is
    /// broadcast to every registered subscription; without one (graceful
    /// shutdown) the channels just close. Idempotent: only the first
    /// caller broadcasts.
    async fn terminate(&self, reason: Option<&str>) {
        if !self.mark_terminated().await {
            return;
        }
        let mut subs = self.subscriptions.lock().await;
        if let Some(reason) = reason {
            warn!(reason, "session terminated");
            send_error(&subs, reason).await;
        }
        subs.clear();
    }

    /// Terminate after a server ERROR frame, forwarding the frame itself
    /// to every registered subscription.
    async fn terminate_with_frame(&self, frame: Frame) {
        if !self.mark_terminated().await {
            return;
        }
        warn!(
            message = frame.get_header("message").unwrap_or(""),
            "server sent ERROR frame"
        );
        let mut subs = self.subscriptions.lock().await;
        for tx in subs.values() {
            let _ = tx.send(frame.clone()).await;
        }
        subs.clear();
    }

    /// Transition to Terminated. Returns false if the session was already
    /// terminated. Dropping the pending receipt sender short-circuits a
    /// disconnect still waiting on it.
    async fn mark_terminated(&self) -> bool {
        let mut state = self.state.lock().await;
        if *state == SessionState::Terminated {
            return false;
        }
        *state = SessionState::Terminated;
        drop(state);
        self.pending_receipt.lock().await.take();
        true
    }
}

/// A live STOMP session over a SockJS websocket.
///
/// Cheap to clone; all clones share the same session. The session is
/// terminal: once disconnected or failed it cannot be reused; reconnect
/// by creating a new client.
#[derive(Clone)]
pub struct StompClient {
    write_tx: mpsc::Sender<WriteRequest>,
    shared: Arc<Shared>,
    sub_id_counter: Arc<AtomicU64>,
    shutdown_tx: broadcast::Sender<()>,
    heartbeat: (Option<Duration>, Option<Duration>),
    disconnect_timeout: Duration,
}

impl fmt::Debug for StompClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StompClient")
            .field("heartbeat", &self.heartbeat)
            .field("disconnect_timeout", &self.disconnect_timeout)
            .finish_non_exhaustive()
    }
}

impl StompClient {
    /// Connect with default options.
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        Self::connect_with_options(url, ConnectOptions::default()).await
    }

    /// Connect, authenticating with a bearer token carried in the
    /// websocket handshake's `Authorization` header.
    pub async fn connect_with_token(url: &str, token: &str) -> Result<Self, ClientError> {
        Self::connect_with_options(
            url,
            ConnectOptions {
                token: Some(token.to_string()),
                ..ConnectOptions::default()
            },
        )
        .await
    }

    /// Establish a session: validate the URL, dial the websocket, perform
    /// the CONNECT/CONNECTED exchange, then start the writer and reader
    /// loops. Handshake errors are returned synchronously; no partial
    /// session is ever exposed.
    pub async fn connect_with_options(
        url: &str,
        options: ConnectOptions,
    ) -> Result<Self, ClientError> {
        let base = Url::parse(url)
            .map_err(|e| ClientError::HandshakeFailed(format!("invalid url: {e}")))?;
        // scheme gate comes first: anything but ws/wss fails before I/O
        let origin = handshake_origin(&base)?;
        let session_url = sockjs_session_url(&base);

        let mut headers = HeaderMap::new();
        headers.insert(
            header::ORIGIN,
            HeaderValue::from_str(&origin)
                .map_err(|_| ClientError::HandshakeFailed("invalid origin header".to_string()))?,
        );
        if let Some(token) = &options.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                ClientError::HandshakeFailed("token is not a valid header value".to_string())
            })?;
            headers.insert(header::AUTHORIZATION, value);
        }
        for (k, v) in &options.headers {
            let name: HeaderName = k.parse().map_err(|_| {
                ClientError::HandshakeFailed(format!("invalid header name '{k}'"))
            })?;
            let value = HeaderValue::from_str(v).map_err(|_| {
                ClientError::HandshakeFailed(format!("invalid value for header '{k}'"))
            })?;
            headers.append(name, value);
        }

        let mut transport = Transport::dial(&session_url, headers)
            .await
            .map_err(|e| ClientError::HandshakeFailed(format!("dial: {e}")))?;

        let connect = Frame::new(Command::Connect)
            .header("accept-version", ACCEPT_VERSION)
            .header(
                "heart-beat",
                format!("{},{}", options.heartbeat.0, options.heartbeat.1),
            );
        if let Err(e) = transport.write_message(encode_frame(&connect)).await {
            return Err(ClientError::HandshakeFailed(format!("send CONNECT: {e}")));
        }

        // one required read: the transport's own open/ready probe
        match transport.read_message().await {
            Ok(Some(_probe)) => {}
            Ok(None) => {
                return Err(ClientError::HandshakeFailed(
                    "connection closed before the open probe".to_string(),
                ));
            }
            Err(e) => {
                return Err(ClientError::HandshakeFailed(format!("read open probe: {e}")));
            }
        }

        // the next message must carry CONNECTED
        let msg = match transport.read_message().await {
            Ok(Some(msg)) => msg,
            Ok(None) => {
                return Err(ClientError::HandshakeFailed(
                    "connection closed before CONNECTED".to_string(),
                ));
            }
            Err(e) => {
                return Err(ClientError::HandshakeFailed(format!("read CONNECTED: {e}")));
            }
        };
        let connected = match codec::decode_message(&msg) {
            Ok(frames) => match frames.into_iter().next() {
                Some(f) if f.command == Command::Connected => f,
                Some(f) => {
                    let _ = transport.close().await;
                    return Err(ClientError::HandshakeFailed(format!(
                        "expected CONNECTED, got {}",
                        f.command
                    )));
                }
                None => {
                    let _ = transport.close().await;
                    return Err(ClientError::HandshakeFailed(
                        "empty envelope instead of CONNECTED".to_string(),
                    ));
                }
            },
            Err(e) => {
                let _ = transport.close().await;
                return Err(ClientError::HandshakeFailed(format!("decode CONNECTED: {e}")));
            }
        };
        if let Some(version) = connected.get_header("version") {
            if !SUPPORTED_VERSIONS.contains(&version) {
                let _ = transport.close().await;
                return Err(ClientError::HandshakeFailed(format!(
                    "unsupported protocol version '{version}'"
                )));
            }
        }

        let (sx, sy) = parse_heartbeat_header(connected.get_header("heart-beat").unwrap_or("0,0"));
        let heartbeat =
            negotiate_heartbeats(options.heartbeat.0, options.heartbeat.1, sx, sy);
        debug!(?heartbeat, "session established");

        let (write_tx, write_rx) = mpsc::channel::<WriteRequest>(OUTBOUND_CAPACITY);
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let shared = Arc::new(Shared::new());
        let (writer, reader) = transport.split();

        tokio::spawn(write_loop(
            write_rx,
            writer,
            shared.clone(),
            shutdown_tx.clone(),
        ));
        tokio::spawn(read_loop(reader, shared.clone(), shutdown_tx.clone()));

        Ok(StompClient {
            write_tx,
            shared,
            sub_id_counter: Arc::new(AtomicU64::new(1)),
            shutdown_tx,
            heartbeat,
            disconnect_timeout: options.disconnect_timeout,
        })
    }

    /// The negotiated heartbeat intervals `(outgoing, incoming)`, `None`
    /// when disabled in that direction.
    pub fn heartbeat(&self) -> (Option<Duration>, Option<Duration>) {
        self.heartbeat
    }

    /// Subscribe to a topic.
    ///
    /// Registers a fresh delivery channel, enqueues a SUBSCRIBE frame and
    /// returns immediately (STOMP has no acknowledgment for SUBSCRIBE).
    /// Fails only when the session has terminated.
    pub async fn subscribe(&self, topic: &str) -> Result<Subscription, ClientError> {
        let id = format!("sub-{}", self.sub_id_counter.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = mpsc::channel::<Frame>(SUBSCRIPTION_CAPACITY);
        self.shared
            .subscriptions
            .lock()
            .await
            .insert(id.clone(), tx);

        let frame = Frame::new(Command::Subscribe)
            .header("id", &id)
            .header("destination", topic);
        if let Err(e) = self.enqueue(frame).await {
            // session already dead: leave no orphan registration behind
            self.shared.subscriptions.lock().await.remove(&id);
            return Err(e);
        }
        Ok(Subscription::new(id, topic.to_string(), rx, self.clone()))
    }

    /// Unsubscribe by subscription id. Later MESSAGE frames for this id
    /// are dropped by the dispatch loop.
    pub async fn unsubscribe(&self, subscription_id: &str) -> Result<(), ClientError> {
        let frame = Frame::new(Command::Unsubscribe).header("id", subscription_id);
        self.enqueue(frame).await?;
        self.shared.subscriptions.lock().await.remove(subscription_id);
        Ok(())
    }

    /// Send a message body to a destination.
    pub async fn send(
        &self,
        destination: &str,
        body: impl Into<Vec<u8>>,
    ) -> Result<(), ClientError> {
        let frame = Frame::new(Command::Send)
            .header("destination", destination)
            .set_body(body);
        self.enqueue(frame).await
    }

    /// Gracefully disconnect, waiting up to the configured timeout for the
    /// server's RECEIPT.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.disconnect_with_timeout(self.disconnect_timeout).await
    }

    /// Gracefully disconnect with an explicit receipt timeout.
    ///
    /// Enqueues a DISCONNECT frame carrying a `receipt` header and blocks
    /// until the reader loop observes the matching RECEIPT. One disconnect
    /// may be in flight at a time; a concurrent second call is rejected
    /// with [`ClientError::DisconnectInProgress`].
    pub async fn disconnect_with_timeout(&self, timeout: Duration) -> Result<(), ClientError> {
        {
            let mut state = self.shared.state.lock().await;
            match *state {
                SessionState::Active => *state = SessionState::Disconnecting,
                SessionState::Disconnecting => return Err(ClientError::DisconnectInProgress),
                SessionState::Terminated => {
                    return Err(ClientError::Transport(
                        "session already terminated".to_string(),
                    ));
                }
            }
        }

        let receipt_id = format!("receipt-{}", random_string());
        let (notify, confirmed) = oneshot::channel();
        *self.shared.pending_receipt.lock().await = Some(PendingReceipt {
            id: receipt_id.clone(),
            notify,
        });

        let frame = Frame::new(Command::Disconnect).header("receipt", &receipt_id);
        let (written_tx, written_rx) = oneshot::channel();
        let request = WriteRequest {
            frame,
            done: Some(written_tx),
        };
        if self.write_tx.send(request).await.is_err() {
            self.shared.pending_receipt.lock().await.take();
            return Err(ClientError::Protocol("write channel closed".to_string()));
        }
        // the receipt clock starts once the frame is actually on the wire
        if written_rx.await.is_err() {
            self.shared.pending_receipt.lock().await.take();
            return Err(ClientError::Transport(
                "session terminated before DISCONNECT was written".to_string(),
            ));
        }

        match tokio::time::timeout(timeout, confirmed).await {
            // the reader loop has seen the RECEIPT; it terminates the
            // session and the writer closes the transport on shutdown
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ClientError::Transport(
                "session terminated before the receipt arrived".to_string(),
            )),
            Err(_) => {
                self.shared.pending_receipt.lock().await.take();
                self.shared.terminate(None).await;
                let _ = self.shutdown_tx.send(());
                Err(ClientError::DisconnectTimeout(receipt_id))
            }
        }
    }

    async fn enqueue(&self, frame: Frame) -> Result<(), ClientError> {
        self.write_tx
            .send(WriteRequest { frame, done: None })
            .await
            .map_err(|_| ClientError::Protocol("write channel closed".to_string()))
    }
}

/// Writer loop: the only task allowed to touch the transport's write
/// half. Requests are written in strict arrival order, so concurrent
/// callers can never interleave partial frames on the wire.
async fn write_loop(
    mut requests: mpsc::Receiver<WriteRequest>,
    mut writer: TransportWriter,
    shared: Arc<Shared>,
    shutdown_tx: broadcast::Sender<()>,
) {
    let mut shutdown = shutdown_tx.subscribe();
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                let _ = writer.close().await;
                break;
            }
            req = requests.recv() => match req {
                Some(WriteRequest { frame, done }) => {
                    let command = frame.command;
                    if let Err(e) = writer.write_message(encode_frame(&frame)).await {
                        shared
                            .terminate(Some(&format!("transport write failed: {e}")))
                            .await;
                        let _ = shutdown_tx.send(());
                        break;
                    }
                    debug!(command = %command, "frame written");
                    if let Some(done) = done {
                        let _ = done.send(());
                    }
                }
                None => {
                    let _ = writer.close().await;
                    break;
                }
            }
        }
    }
}

/// Reader/dispatch loop: the only task allowed to touch the transport's
/// read half. Decodes each inbound message and routes every frame:
/// MESSAGE to its subscription, RECEIPT to the waiting disconnect, ERROR
/// to everyone.
async fn read_loop(
    mut reader: TransportReader,
    shared: Arc<Shared>,
    shutdown_tx: broadcast::Sender<()>,
) {
    let mut shutdown = shutdown_tx.subscribe();
    'session: loop {
        tokio::select! {
            _ = shutdown.recv() => break 'session,
            msg = reader.read_message() => match msg {
                Ok(Some(text)) => {
                    if !codec::is_envelope(&text) {
                        // transport control payload: open probe and
                        // heartbeats are noise, a close payload ends the
                        // session
                        if text.starts_with('c') {
                            shared.terminate(Some("transport closed by server")).await;
                            let _ = shutdown_tx.send(());
                            break 'session;
                        }
                        continue;
                    }
                    let frames = match codec::decode_message(&text) {
                        Ok(frames) => frames,
                        Err(e) => {
                            shared.terminate(Some(&format!("malformed frame: {e}"))).await;
                            let _ = shutdown_tx.send(());
                            break 'session;
                        }
                    };
                    for frame in frames {
                        match frame.command {
                            Command::Message => shared.dispatch_message(frame).await,
                            Command::Receipt => {
                                if shared.complete_receipt(&frame).await {
                                    shared.terminate(None).await;
                                    let _ = shutdown_tx.send(());
                                    break 'session;
                                }
                            }
                            Command::Error => {
                                shared.terminate_with_frame(frame).await;
                                let _ = shutdown_tx.send(());
                                break 'session;
                            }
                            other => debug!(command = %other, "ignoring inbound frame"),
                        }
                    }
                }
                Ok(None) => {
                    shared.terminate(Some("connection closed unexpectedly")).await;
                    let _ = shutdown_tx.send(());
                    break 'session;
                }
                Err(e) => {
                    shared.terminate(Some(&format!("transport read failed: {e}"))).await;
                    let _ = shutdown_tx.send(());
                    break 'session;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> (StompClient, mpsc::Receiver<WriteRequest>) {
        let (write_tx, write_rx) = mpsc::channel::<WriteRequest>(8);
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let client = StompClient {
            write_tx,
            shared: Arc::new(Shared::new()),
            sub_id_counter: Arc::new(AtomicU64::new(1)),
            shutdown_tx,
            heartbeat: (None, None),
            disconnect_timeout: Duration::from_secs(1),
        };
        (client, write_rx)
    }

    fn make_message(sub_id: &str, body: &str) -> Frame {
        Frame::new(Command::Message)
            .header("subscription", sub_id)
            .header("destination", "/topic/test")
            .set_body(body.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn subscribe_then_unsubscribe_orders_frames_with_one_id() {
        let (client, mut write_rx) = test_client();

        let sub = client.subscribe("/topic/test").await.expect("subscribe failed");
        assert_eq!(sub.topic(), "/topic/test");
        let id = sub.id().to_string();

        sub.unsubscribe().await.expect("unsubscribe failed");

        let first = write_rx.recv().await.expect("missing SUBSCRIBE request");
        assert_eq!(first.frame.command, Command::Subscribe);
        assert_eq!(first.frame.get_header("id"), Some(id.as_str()));
        assert_eq!(first.frame.get_header("destination"), Some("/topic/test"));

        let second = write_rx.recv().await.expect("missing UNSUBSCRIBE request");
        assert_eq!(second.frame.command, Command::Unsubscribe);
        assert_eq!(second.frame.get_header("id"), Some(id.as_str()));

        // exactly two requests were enqueued
        assert!(write_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn message_dispatch_routes_by_subscription_id() {
        let (client, _write_rx) = test_client();

        let mut sub_a = client.subscribe("/topic/a").await.expect("subscribe a");
        let mut sub_b = client.subscribe("/topic/b").await.expect("subscribe b");

        client
            .shared
            .dispatch_message(make_message(sub_a.id(), "for-a"))
            .await;
        // a frame for an unregistered id is dropped without any effect
        client
            .shared
            .dispatch_message(make_message("sub-999", "lost"))
            .await;

        let got = sub_a.recv().await.expect("sub_a should receive");
        assert_eq!(got.body, b"for-a");
        assert!(sub_b.try_recv().is_none());
    }

    #[tokio::test]
    async fn unsubscribed_id_no_longer_receives() {
        let (client, _write_rx) = test_client();

        let sub = client.subscribe("/topic/gone").await.expect("subscribe");
        let id = sub.id().to_string();
        sub.unsubscribe().await.expect("unsubscribe");

        // must not panic, must not linger in the registry
        client.shared.dispatch_message(make_message(&id, "late")).await;
        assert!(client.shared.subscriptions.lock().await.is_empty());
    }

    #[tokio::test]
    async fn send_error_reaches_every_channel_once() {
        let mut channels = HashMap::new();
        let mut receivers = Vec::new();
        for i in 0..3 {
            let (tx, rx) = mpsc::channel::<Frame>(4);
            channels.insert(format!("sub-{i}"), tx);
            receivers.push(rx);
        }

        send_error(&channels, "test error message").await;

        for rx in &mut receivers {
            let frame = rx.try_recv().expect("each channel gets the error");
            assert_eq!(frame.command, Command::Error);
            assert_eq!(frame.get_header("message"), Some("test error message"));
            assert!(rx.try_recv().is_err(), "exactly one frame per channel");
        }
    }

    #[tokio::test]
    async fn send_error_with_empty_registry_is_a_noop() {
        let channels = HashMap::new();
        send_error(&channels, "test error message").await;
    }

    #[tokio::test]
    async fn terminate_broadcasts_and_clears_registry() {
        let (client, _write_rx) = test_client();
        let mut sub_a = client.subscribe("/topic/a").await.expect("subscribe a");
        let mut sub_b = client.subscribe("/topic/b").await.expect("subscribe b");

        client.shared.terminate(Some("connection lost")).await;

        for sub in [&mut sub_a, &mut sub_b] {
            let frame = sub.recv().await.expect("error frame expected");
            assert_eq!(frame.command, Command::Error);
            assert_eq!(frame.get_header("message"), Some("connection lost"));
        }
        assert!(client.shared.subscriptions.lock().await.is_empty());
        assert_eq!(
            *client.shared.state.lock().await,
            SessionState::Terminated
        );
    }

    #[tokio::test]
    async fn second_disconnect_is_rejected_while_first_is_in_flight() {
        let (client, mut write_rx) = test_client();
        let racer = client.clone();

        let first = tokio::spawn(async move {
            racer
                .disconnect_with_timeout(Duration::from_millis(500))
                .await
        });

        // wait until the DISCONNECT frame is enqueued, then race a second call
        let req = write_rx.recv().await.expect("DISCONNECT expected");
        assert_eq!(req.frame.command, Command::Disconnect);
        assert!(req.frame.get_header("receipt").is_some());
        if let Some(done) = req.done {
            let _ = done.send(());
        }

        let second = client.disconnect_with_timeout(Duration::from_secs(1)).await;
        assert!(matches!(second, Err(ClientError::DisconnectInProgress)));

        // no receipt ever arrives: the first call times out
        let first = first.await.expect("task panicked");
        assert!(matches!(first, Err(ClientError::DisconnectTimeout(_))));
        assert_eq!(
            *client.shared.state.lock().await,
            SessionState::Terminated
        );
    }

    #[tokio::test]
    async fn receipt_completion_wakes_disconnect() {
        let (client, mut write_rx) = test_client();

        let waiter = client.clone();
        let task = tokio::spawn(async move {
            waiter.disconnect_with_timeout(Duration::from_secs(2)).await
        });

        let req = write_rx.recv().await.expect("DISCONNECT expected");
        let receipt_id = req.frame.get_header("receipt").expect("receipt header").to_string();
        if let Some(done) = req.done {
            let _ = done.send(());
        }

        let receipt = Frame::new(Command::Receipt).header("receipt-id", &receipt_id);
        assert!(client.shared.complete_receipt(&receipt).await);
        client.shared.terminate(None).await;

        assert!(task.await.expect("task panicked").is_ok());
    }

    #[tokio::test]
    async fn mismatched_receipt_is_ignored() {
        let (client, mut write_rx) = test_client();

        let waiter = client.clone();
        let task = tokio::spawn(async move {
            waiter
                .disconnect_with_timeout(Duration::from_millis(200))
                .await
        });
        let req = write_rx.recv().await.expect("DISCONNECT expected");
        if let Some(done) = req.done {
            let _ = done.send(());
        }

        let stale = Frame::new(Command::Receipt).header("receipt-id", "someone-else");
        assert!(!client.shared.complete_receipt(&stale).await);

        // pending entry survives the stale receipt; the call times out
        assert!(matches!(
            task.await.expect("task panicked"),
            Err(ClientError::DisconnectTimeout(_))
        ));
    }

    #[test]
    fn scheme_rewrite_table() {
        let ws = Url::parse("ws://example.com/stomp").unwrap();
        let wss = Url::parse("wss://example.com/stomp").unwrap();
        let http = Url::parse("http://example.com/stomp").unwrap();

        assert_eq!(handshake_scheme(&ws).unwrap(), "http");
        assert_eq!(handshake_scheme(&wss).unwrap(), "https");
        assert!(matches!(
            handshake_scheme(&http),
            Err(ClientError::UnsupportedScheme(s)) if s == "http"
        ));
    }

    #[test]
    fn session_url_carries_sockjs_suffix() {
        let base = Url::parse("ws://localhost:8080/stomp").unwrap();
        let url = sockjs_session_url(&base);
        let segments: Vec<&str> = url.path().trim_start_matches('/').split('/').collect();
        assert_eq!(segments.len(), 4);
        assert_eq!(segments[0], "stomp");
        assert_eq!(segments[1].len(), 3);
        assert!(segments[1].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(segments[2].len(), 16);
        assert!(segments[2].chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(segments[3], "websocket");
        assert_eq!(url.scheme(), "ws");
    }

    #[test]
    fn random_digit_width_follows_max() {
        for (max, width) in [(9u32, 1usize), (99, 2), (999, 3)] {
            let s = random_digits(max);
            assert_eq!(s.len(), width);
            assert!(s.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn random_string_is_sixteen_alphanumerics() {
        let s = random_string();
        assert_eq!(s.len(), 16);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(random_string(), random_string());
    }

    #[test]
    fn heartbeat_header_parsing_defaults_to_zero() {
        assert_eq!(parse_heartbeat_header("10000,5000"), (10_000, 5_000));
        assert_eq!(parse_heartbeat_header(" 200 , 300 "), (200, 300));
        assert_eq!(parse_heartbeat_header("garbage"), (0, 0));
        assert_eq!(parse_heartbeat_header(""), (0, 0));
    }

    #[test]
    fn heartbeat_negotiation_takes_the_maximum() {
        let (out, inc) = negotiate_heartbeats(10_000, 10_000, 5_000, 20_000);
        assert_eq!(out, Some(Duration::from_millis(20_000)));
        assert_eq!(inc, Some(Duration::from_millis(10_000)));

        let (out, inc) = negotiate_heartbeats(0, 0, 0, 0);
        assert_eq!(out, None);
        assert_eq!(inc, None);
    }
}
