//! End-to-end smoke test against an in-process SockJS/STOMP broker:
//! connect, subscribe, publish, receive, receipt-confirmed disconnect.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use sockjs_stomp::{Command, StompClient};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

const CONNECTED: &str = "a[\"CONNECTED\\nversion:1.1\\nheart-beat:0,0\\n\\n\\u0000\"]";

fn extract_value(raw: &str, key: &str) -> Option<String> {
    let pattern = format!("{key}:");
    let idx = raw.find(&pattern)? + pattern.len();
    let rest = &raw[idx..];
    let end = rest.find(['\\', '"']).unwrap_or(rest.len());
    Some(rest[..end].to_string())
}

#[tokio::test]
async fn full_session_lifecycle() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let (done_tx, done_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut ws = accept_async(stream).await.expect("websocket accept");

        // handshake: CONNECT in, probe + CONNECTED out
        let connect = ws.next().await.expect("CONNECT").expect("frame");
        if let Message::Text(text) = &connect {
            assert!(text.to_string().contains("CONNECT"));
        } else {
            panic!("expected a text CONNECT message");
        }
        ws.send(Message::text("o")).await.expect("probe");
        ws.send(Message::text(CONNECTED)).await.expect("CONNECTED");

        while let Some(Ok(msg)) = ws.next().await {
            let Message::Text(text) = msg else { continue };
            let raw = text.to_string();
            if raw.contains("SUBSCRIBE") {
                let id = extract_value(&raw, "id").expect("id header");
                let dest = extract_value(&raw, "destination").expect("destination header");
                let reply = format!(
                    "a[\"MESSAGE\\nsubscription:{id}\\ndestination:{dest}\\nmessage-id:m-1\\n\\ngreetings\\u0000\"]"
                );
                ws.send(Message::text(reply)).await.expect("MESSAGE");
            } else if raw.contains("SEND") {
                // published bodies come back on the same topic
                assert!(raw.contains("echo me"));
            } else if raw.contains("DISCONNECT") {
                let receipt = extract_value(&raw, "receipt").expect("receipt header");
                let reply = format!("a[\"RECEIPT\\nreceipt-id:{receipt}\\n\\n\\u0000\"]");
                ws.send(Message::text(reply)).await.expect("RECEIPT");
            }
        }
        let _ = done_tx.send(());
    });

    let client = StompClient::connect(&format!("ws://{addr}/stomp"))
        .await
        .expect("connect");

    let mut sub = client.subscribe("/topic/greetings").await.expect("subscribe");
    let frame = sub.recv().await.expect("message");
    assert_eq!(frame.command, Command::Message);
    assert_eq!(frame.get_header("subscription"), Some(sub.id()));
    assert_eq!(frame.get_header("destination"), Some("/topic/greetings"));
    assert_eq!(frame.body, b"greetings");

    client
        .send("/topic/greetings", b"echo me".to_vec())
        .await
        .expect("send");

    client.disconnect().await.expect("disconnect");

    // the broker observes the transport close after the receipt exchange
    tokio::time::timeout(Duration::from_secs(2), done_rx)
        .await
        .expect("server should observe the close")
        .expect("server task alive");
}
