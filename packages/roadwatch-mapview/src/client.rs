// WebSocket subscriber for the hub broadcast stream
//
// Every text frame from the hub is one batch: a JSON array of classified
// records. Decoded batches are forwarded in arrival order, each connection
// announced by a `FeedEvent::Connected` ahead of its first batch.

use crate::error::{MapviewError, MapviewResult};
use futures_util::StreamExt;
use roadwatch_hub::ClassifiedRecord;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{error, info, warn};

const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// What the subscriber forwards downstream
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// A (re)connection was established; batches before it are not
    /// contiguous with batches after it
    Connected,
    Batch(Vec<ClassifiedRecord>),
}

/// Decode one broadcast frame
pub fn decode_batch(text: &str) -> MapviewResult<Vec<ClassifiedRecord>> {
    Ok(serde_json::from_str(text)?)
}

pub struct HubSubscriber {
    url: String,
    reconnect: bool,
    reconnect_delay: Duration,
}

impl HubSubscriber {
    pub fn new(url: impl Into<String>, reconnect: bool) -> Self {
        Self {
            url: url.into(),
            reconnect,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Follow the stream, sending each decoded batch to `sender`.
    ///
    /// Returns when the receiver is dropped, or when the connection ends and
    /// reconnecting is disabled. Only the first connection failure is an
    /// error; later ones are retried when reconnecting is enabled.
    pub async fn run(&self, sender: mpsc::Sender<FeedEvent>) -> MapviewResult<()> {
        let mut connected_once = false;

        loop {
            info!("Connecting to hub: {}", self.url);
            match connect_async(self.url.as_str()).await {
                Ok((ws_stream, _)) => {
                    connected_once = true;
                    info!("Subscribed to hub stream");
                    if sender.send(FeedEvent::Connected).await.is_err() {
                        warn!("Batch receiver closed");
                        return Ok(());
                    }

                    let (_write, mut read) = ws_stream.split();
                    while let Some(message) = read.next().await {
                        match message {
                            Ok(Message::Text(text)) => match decode_batch(text.as_str()) {
                                Ok(batch) => {
                                    if sender.send(FeedEvent::Batch(batch)).await.is_err() {
                                        warn!("Batch receiver closed");
                                        return Ok(());
                                    }
                                }
                                Err(e) => {
                                    // Skip the frame, keep the stream
                                    error!("{}", e);
                                }
                            },
                            Ok(Message::Binary(_)) => {
                                warn!("Ignoring binary frame from hub");
                            }
                            Ok(Message::Close(_)) => {
                                info!("Hub closed the stream");
                                break;
                            }
                            Ok(_) => {}
                            Err(e) => {
                                error!("WebSocket error: {}", e);
                                break;
                            }
                        }
                    }
                }
                Err(e) if !connected_once => {
                    return Err(MapviewError::WebSocket(format!("Connection failed: {}", e)));
                }
                Err(e) => {
                    warn!("Reconnect failed: {}", e);
                }
            }

            if !self.reconnect {
                info!("Disconnected from hub, reconnect disabled");
                return Ok(());
            }

            info!(
                "Disconnected from hub, reconnecting in {:?}...",
                self.reconnect_delay
            );
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }
}
