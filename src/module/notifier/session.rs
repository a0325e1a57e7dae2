use crate::library::communication::BroadcastSubscriber;
use futures::{Sink, SinkExt, Stream, StreamExt};
use hyper_tungstenite::tungstenite::Message;
use serde::Deserialize;
use tracing::{debug, warn};

const ERROR_PARSING: &str = r#"{"error":"Error parsing WebSocketRequest"}"#;
const ERROR_NO_CHANNELS: &str = r#"{"error":"no channels"}"#;

/// First frame a client sends after the upgrade
#[derive(Debug, Deserialize)]
struct SubscribeRequest {
    /// Accepted untouched; token validation is the auth layer's concern
    #[serde(default)]
    #[allow(dead_code)]
    token: String,

    #[serde(default)]
    channels: Vec<String>,
}

/// Drives one client subscription over a frame transport
///
/// Reads the handshake frame, subscribes to the requested channels and then
/// copies every broadcast payload to the client as a text frame. Inbound
/// frames are read solely to detect peer closure; when either direction
/// fails, the subscription and the transport are torn down together.
pub(super) async fn serve_subscription<T, E, S>(transport: T, subscriber: &S)
where
    T: Stream<Item = Result<Message, E>> + Sink<Message> + Send + Unpin,
    S: BroadcastSubscriber + Send + Sync,
{
    let (mut sink, mut inbound) = transport.split();

    let frame = match inbound.next().await {
        Some(Ok(frame)) => frame,
        _ => return,
    };

    let data = match frame {
        Message::Text(text) => text.into_bytes(),
        Message::Binary(data) => data,
        _ => {
            sink.send(Message::Text(ERROR_PARSING.into())).await.ok();
            return;
        }
    };

    let request: SubscribeRequest = match serde_json::from_slice(&data) {
        Ok(request) => request,
        Err(error) => {
            warn!(?error, "Error parsing WebSocketRequest");
            sink.send(Message::Text(ERROR_PARSING.into())).await.ok();
            return;
        }
    };

    if request.channels.is_empty() {
        sink.send(Message::Text(ERROR_NO_CHANNELS.into())).await.ok();
        return;
    }

    let mut live = match subscriber.subscribe(&request.channels).await {
        Ok(live) => live,
        Err(error) => {
            warn!(?error, "failed to subscribe to channels");
            return;
        }
    };

    debug!(channels = ?request.channels, "subscription established");

    loop {
        tokio::select! {
            update = live.next() => match update {
                Some(Ok(message)) => {
                    let text = String::from_utf8_lossy(&message.payload).into_owned();
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                // Broadcast backend went away, drop the client so it reconnects
                _ => break,
            },
            frame = inbound.next() => match frame {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // Inbound frames are only read to detect closure
                Some(Ok(_)) => {}
            },
        }
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::library::communication::implementation::mock::MemoryBroadcast;
    use crate::library::communication::BroadcastPublisher;
    use futures::channel::mpsc;
    use pretty_assertions::assert_eq;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;

    #[derive(Debug)]
    struct TransportClosed;

    /// Client end simulated through a pair of in-memory channels
    struct TestTransport {
        inbound: mpsc::UnboundedReceiver<Result<Message, TransportClosed>>,
        outbound: mpsc::UnboundedSender<Message>,
    }

    fn transport() -> (
        TestTransport,
        mpsc::UnboundedSender<Result<Message, TransportClosed>>,
        mpsc::UnboundedReceiver<Message>,
    ) {
        let (client_tx, inbound) = mpsc::unbounded();
        let (outbound, client_rx) = mpsc::unbounded();

        (TestTransport { inbound, outbound }, client_tx, client_rx)
    }

    impl Stream for TestTransport {
        type Item = Result<Message, TransportClosed>;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            Pin::new(&mut self.inbound).poll_next(cx)
        }
    }

    impl Sink<Message> for TestTransport {
        type Error = mpsc::SendError;

        fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Pin::new(&mut self.outbound).poll_ready(cx)
        }

        fn start_send(mut self: Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
            Pin::new(&mut self.outbound).start_send(item)
        }

        fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Pin::new(&mut self.outbound).poll_flush(cx)
        }

        fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Pin::new(&mut self.outbound).poll_close(cx)
        }
    }

    #[tokio::test]
    async fn reject_malformed_handshakes() {
        let (transport, client_tx, mut client_rx) = transport();
        let broadcast = MemoryBroadcast::new();

        client_tx
            .unbounded_send(Ok(Message::Text("not json".into())))
            .unwrap();

        serve_subscription(transport, &broadcast).await;

        let reply = client_rx.next().await.unwrap();
        assert_eq!(
            reply,
            Message::Text(r#"{"error":"Error parsing WebSocketRequest"}"#.into())
        );
    }

    #[tokio::test]
    async fn reject_handshakes_without_channels() {
        let (transport, client_tx, mut client_rx) = transport();
        let broadcast = MemoryBroadcast::new();

        client_tx
            .unbounded_send(Ok(Message::Text(
                r#"{"token":"t","channels":[]}"#.into(),
            )))
            .unwrap();

        serve_subscription(transport, &broadcast).await;

        let reply = client_rx.next().await.unwrap();
        assert_eq!(reply, Message::Text(r#"{"error":"no channels"}"#.into()));
    }

    #[tokio::test]
    async fn forward_live_payloads_until_the_peer_disconnects() {
        let (transport, client_tx, mut client_rx) = transport();
        let broadcast = MemoryBroadcast::new();

        client_tx
            .unbounded_send(Ok(Message::Text(
                r#"{"token":"t","channels":["conversation:c1"]}"#.into(),
            )))
            .unwrap();

        let serving = {
            let broadcast = broadcast.clone();
            tokio::spawn(async move { serve_subscription(transport, &broadcast).await })
        };

        // Wait for the subscription to come alive, then the payload counts
        let payload = br#"{"user":"a","message":"hi"}"#;
        loop {
            if broadcast.broadcast("conversation:c1", payload).await.unwrap() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let delivered = client_rx.next().await.unwrap();
        assert_eq!(
            delivered,
            Message::Text(String::from_utf8_lossy(payload).into_owned())
        );

        // Peer disconnect tears the subscription down
        drop(client_tx);
        serving.await.unwrap();

        assert_eq!(broadcast.broadcast("conversation:c1", payload).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn tear_down_when_the_peer_sends_a_close_frame() {
        let (transport, client_tx, _client_rx) = transport();
        let broadcast = MemoryBroadcast::new();

        client_tx
            .unbounded_send(Ok(Message::Text(
                r#"{"token":"t","channels":["conversation:c1"]}"#.into(),
            )))
            .unwrap();
        client_tx.unbounded_send(Ok(Message::Close(None))).unwrap();

        serve_subscription(transport, &broadcast).await;
    }
}
