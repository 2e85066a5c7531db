//! WebSocket transport adapter.
//!
//! Wraps a `tokio-tungstenite` stream behind a small message-oriented
//! surface: dial with extra handshake headers, write one text message,
//! read one text message, close. The adapter owns no protocol knowledge
//! (envelope decoding and frame dispatch happen above it) and websocket
//! control frames (ping/pong) never surface to callers.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderMap;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A live websocket connection, used whole during the handshake phase and
/// split into halves once the session loops start.
pub struct Transport {
    inner: WsStream,
}

/// Exclusive write half. Owned by the writer loop once the session starts.
pub struct TransportWriter {
    sink: SplitSink<WsStream, Message>,
}

/// Exclusive read half. Owned by the reader loop once the session starts.
pub struct TransportReader {
    stream: SplitStream<WsStream>,
}

impl Transport {
    /// Dial `url` and perform the websocket handshake, attaching the given
    /// extra request headers (authorization, origin, caller extras).
    pub async fn dial(url: &Url, headers: HeaderMap) -> Result<Self, WsError> {
        let mut request = url.as_str().into_client_request()?;
        request.headers_mut().extend(headers);
        let (inner, _response) = connect_async(request).await?;
        Ok(Self { inner })
    }

    /// Send one text message.
    pub async fn write_message(&mut self, text: String) -> Result<(), WsError> {
        self.inner.send(Message::text(text)).await
    }

    /// Receive the next text message. `Ok(None)` means the peer closed the
    /// connection.
    pub async fn read_message(&mut self) -> Result<Option<String>, WsError> {
        loop {
            match self.inner.next().await {
                Some(Ok(msg)) => match text_payload(msg) {
                    Payload::Text(text) => return Ok(Some(text)),
                    Payload::Closed => return Ok(None),
                    Payload::Skip => continue,
                },
                Some(Err(e)) => return Err(e),
                None => return Ok(None),
            }
        }
    }

    /// Close the websocket.
    pub async fn close(&mut self) -> Result<(), WsError> {
        self.inner.close(None).await
    }

    /// Split into exclusively-owned write and read halves for the session
    /// loops.
    pub fn split(self) -> (TransportWriter, TransportReader) {
        let (sink, stream) = self.inner.split();
        (TransportWriter { sink }, TransportReader { stream })
    }
}

impl TransportWriter {
    /// Send one text message.
    pub async fn write_message(&mut self, text: String) -> Result<(), WsError> {
        self.sink.send(Message::text(text)).await
    }

    /// Send a close frame and flush the sink.
    pub async fn close(&mut self) -> Result<(), WsError> {
        self.sink.close().await
    }
}

impl TransportReader {
    /// Receive the next text message. `Ok(None)` means the peer closed the
    /// connection (close frame or end of stream).
    pub async fn read_message(&mut self) -> Result<Option<String>, WsError> {
        loop {
            match self.stream.next().await {
                Some(Ok(msg)) => match text_payload(msg) {
                    Payload::Text(text) => return Ok(Some(text)),
                    Payload::Closed => return Ok(None),
                    Payload::Skip => continue,
                },
                Some(Err(e)) => return Err(e),
                None => return Ok(None),
            }
        }
    }
}

enum Payload {
    Text(String),
    Closed,
    /// Ping/pong/binary: nothing for the protocol layer.
    Skip,
}

fn text_payload(msg: Message) -> Payload {
    match msg {
        Message::Text(text) => Payload::Text(text.to_string()),
        Message::Close(_) => Payload::Closed,
        _ => Payload::Skip,
    }
}
