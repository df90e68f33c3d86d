use inquest_engine::{CallbackMessage, ProviderCallback};
use tokio::sync::mpsc;
use tracing::warn;

/// Callback message tagged with the connection it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub connection: u32,
    pub message: CallbackMessage,
}

/// Forwards callback messages into a bounded channel.
///
/// A full or closed channel drops the message instead of blocking the resolver.
#[derive(Debug, Clone)]
pub struct ChannelCallback {
    sender: mpsc::Sender<Envelope>,
}

impl ChannelCallback {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

impl ProviderCallback for ChannelCallback {
    fn collect(&self, connection_id: u32, message: CallbackMessage) {
        let envelope = Envelope {
            connection: connection_id,
            message,
        };
        if let Err(error) = self.sender.try_send(envelope) {
            warn!(connection_id, error = %error, "dropping callback message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_channels_drop_messages() {
        let (callback, mut receiver) = ChannelCallback::new(1);
        callback.collect(1, CallbackMessage::Log { message: "first".into() });
        callback.collect(1, CallbackMessage::Log { message: "second".into() });

        let first = receiver.recv().await.expect("first message");
        assert_eq!(first.message, CallbackMessage::Log { message: "first".into() });
        assert!(receiver.try_recv().is_err());
    }
}
