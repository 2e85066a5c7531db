//! Async STOMP client over a SockJS WebSocket transport.
//!
//! One websocket connection carries one logical STOMP session. Frames
//! travel inside the SockJS text envelope (`a["..."]` arrays of escaped
//! strings); the client demultiplexes inbound MESSAGE frames to
//! per-subscription channels and supports a receipt-confirmed graceful
//! disconnect.
//!
//! ```no_run
//! use sockjs_stomp::StompClient;
//!
//! # async fn run() -> Result<(), sockjs_stomp::ClientError> {
//! let client = StompClient::connect_with_token("wss://broker.example/stomp", "token").await?;
//! let mut prices = client.subscribe("/topic/prices").await?;
//! while let Some(frame) = prices.recv().await {
//!     println!("{}", String::from_utf8_lossy(&frame.body));
//! }
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod connection;
pub mod frame;
mod parser;
pub mod subscription;
pub mod transport;

pub use codec::{CodecError, decode_message, encode_frame, is_envelope};
pub use connection::{
    ClientError, ConnectOptions, StompClient, negotiate_heartbeats, parse_heartbeat_header,
};
pub use frame::{Command, Frame};
pub use subscription::Subscription;
