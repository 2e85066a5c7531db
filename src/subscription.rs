use tokio::sync::mpsc;

use crate::connection::{ClientError, StompClient};
use crate::frame::Frame;

/// A lightweight handle returned from `StompClient::subscribe` that
/// packages the subscription id, topic, and the receiving side of the
/// delivery channel.
///
/// MESSAGE frames for this subscription arrive on the channel in server
/// order; when the session terminates abnormally, the last frame is an
/// ERROR frame and the channel closes.
pub struct Subscription {
    id: String,
    topic: String,
    receiver: mpsc::Receiver<Frame>,
    client: StompClient,
}

impl Subscription {
    pub(crate) fn new(
        id: String,
        topic: String,
        receiver: mpsc::Receiver<Frame>,
        client: StompClient,
    ) -> Self {
        Self {
            id,
            topic,
            receiver,
            client,
        }
    }

    /// The subscription id, unique within this session.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The topic this subscription listens to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Receive the next frame delivered to this subscription. `None` once
    /// the subscription or session is gone.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv): `None` when nothing
    /// is buffered right now.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.receiver.try_recv().ok()
    }

    /// Consume the `Subscription` and return the underlying receiver so
    /// the caller can drive message handling directly.
    pub fn into_receiver(self) -> mpsc::Receiver<Frame> {
        self.receiver
    }

    /// Stop this subscription: sends UNSUBSCRIBE and removes the delivery
    /// channel from the session's registry. Frames already queued stay
    /// readable on the receiver returned by `into_receiver` until dropped.
    pub async fn unsubscribe(self) -> Result<(), ClientError> {
        self.client.unsubscribe(&self.id).await
    }
}
