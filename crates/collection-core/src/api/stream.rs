//! WebSocket client for a marketplace event stream.

use crate::config::StreamConfig;
use crate::{Error, Result};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration as StdDuration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

pub type WsConnection = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection lifecycle and payloads forwarded to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Handshake completed.
    Connected,
    /// A text frame from the feed.
    Message(String),
    /// The connection ended; a reconnect is scheduled after `delay`.
    Backoff { attempt: u32, delay: StdDuration },
    /// Reconnect attempts are used up. No further events follow.
    Exhausted,
}

/// How a session ended.
#[derive(Debug)]
pub struct SessionEnd {
    /// Frames read from the server, close frames excluded.
    pub frames_received: u64,
    /// `Ok(())` on a clean close or a dropped receiver.
    pub result: Result<()>,
}

/// Single-connection WebSocket client. Reconnection is driven by the caller.
#[derive(Debug, Clone)]
pub struct StreamClient {
    url: String,
    subscribe_message: Option<String>,
    handshake_timeout: StdDuration,
    ping_interval: StdDuration,
    read_timeout: StdDuration,
}

impl StreamClient {
    pub fn new(url: String, config: &StreamConfig) -> Self {
        Self {
            url,
            subscribe_message: config.subscribe_message.clone(),
            handshake_timeout: StdDuration::from_secs(config.handshake_timeout_secs),
            ping_interval: StdDuration::from_secs(config.ping_interval_secs.max(1)),
            read_timeout: StdDuration::from_secs(config.read_timeout_secs.max(1)),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Open a connection. A handshake slower than the configured timeout is an error.
    pub async fn connect(&self) -> Result<WsConnection> {
        let handshake = connect_async(self.url.as_str());
        let (ws_stream, _) = tokio::time::timeout(self.handshake_timeout, handshake)
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "WebSocket handshake did not complete within {}s",
                    self.handshake_timeout.as_secs()
                ))
            })??;

        info!(url = %self.url, "Connected to stream");
        Ok(ws_stream)
    }

    /// Pump one open connection until it closes.
    ///
    /// Read timeouts and transport failures end the session with an error.
    pub async fn run_session(
        &self,
        ws_stream: WsConnection,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> SessionEnd {
        let mut frames_received = 0;
        let result = self.pump(ws_stream, tx, &mut frames_received).await;
        SessionEnd {
            frames_received,
            result,
        }
    }

    async fn pump(
        &self,
        ws_stream: WsConnection,
        tx: &mpsc::Sender<StreamEvent>,
        frames_received: &mut u64,
    ) -> Result<()> {
        let (mut write, mut read) = ws_stream.split();

        if let Some(subscribe) = &self.subscribe_message {
            write.send(Message::Text(subscribe.clone())).await?;
            info!(url = %self.url, "Sent stream subscription");
        }

        let mut ping_tick = tokio::time::interval(self.ping_interval);
        ping_tick.tick().await;

        // Only received frames push the deadline out; pings do not.
        let read_deadline = tokio::time::sleep(self.read_timeout);
        tokio::pin!(read_deadline);

        loop {
            tokio::select! {
                _ = ping_tick.tick() => {
                    write.send(Message::Ping(Vec::new())).await?;
                }
                _ = &mut read_deadline => {
                    warn!(
                        timeout_secs = self.read_timeout.as_secs(),
                        "Stream read timed out without messages"
                    );
                    return Err(Error::Timeout(format!(
                        "no stream frames for {}s",
                        self.read_timeout.as_secs()
                    )));
                }
                msg = read.next() => {
                    read_deadline.as_mut().reset(tokio::time::Instant::now() + self.read_timeout);

                    let msg = match msg {
                        Some(msg) => msg,
                        None => {
                            warn!("Stream ended");
                            return Ok(());
                        }
                    };

                    if matches!(msg, Ok(ref m) if !m.is_close()) {
                        *frames_received += 1;
                    }

                    match msg {
                        Ok(Message::Text(text)) => {
                            if tx.send(StreamEvent::Message(text)).await.is_err() {
                                warn!("Receiver dropped, closing stream");
                                return Ok(());
                            }
                        }
                        Ok(Message::Ping(data)) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Ok(Message::Pong(_)) => {
                            debug!("Received stream pong");
                        }
                        Ok(Message::Close(_)) => {
                            info!("Stream closed by server");
                            return Ok(());
                        }
                        Err(e) => {
                            warn!("Stream receive error: {}", e);
                            return Err(e.into());
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn client_for(port: u16, handshake_secs: u64, read_secs: u64) -> StreamClient {
        let config = StreamConfig {
            handshake_timeout_secs: handshake_secs,
            read_timeout_secs: read_secs,
            ..StreamConfig::default()
        };
        StreamClient::new(format!("ws://127.0.0.1:{}", port), &config)
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            // Accept the socket but never answer the upgrade request.
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(StdDuration::from_secs(5)).await;
        });

        let err = client_for(port, 1, 120).connect().await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_session_forwards_text_and_counts_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            ws.send(Message::Text("{\"tokenId\":\"1\"}".to_string()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        });

        let client = client_for(port, 5, 120);
        let (tx, mut rx) = mpsc::channel(8);
        let ws = client.connect().await.unwrap();
        let end = client.run_session(ws, &tx).await;

        assert!(end.result.is_ok());
        assert_eq!(end.frames_received, 1);
        assert_eq!(
            rx.recv().await,
            Some(StreamEvent::Message("{\"tokenId\":\"1\"}".to_string()))
        );
    }

    #[tokio::test]
    async fn test_silent_session_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let _ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            tokio::time::sleep(StdDuration::from_secs(5)).await;
        });

        let client = client_for(port, 5, 1);
        let (tx, _rx) = mpsc::channel(8);
        let ws = client.connect().await.unwrap();
        let end = client.run_session(ws, &tx).await;

        assert!(matches!(end.result, Err(Error::Timeout(_))));
        assert_eq!(end.frames_received, 0);
    }
}
