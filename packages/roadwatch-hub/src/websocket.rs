use crate::distributor::Distributor;
use crate::pipeline::Ingestor;
use crate::registry::{Subscription, SubscriberRegistry};
use crate::traits::RecordStore;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct HubState {
    pub registry: SubscriberRegistry,
    pub store: Arc<dyn RecordStore>,
    pub ingestor: Ingestor,
    pub distributor: Distributor,
}

/// Handle WebSocket upgrade
pub async fn handle_websocket(ws: WebSocketUpgrade, State(state): State<HubState>) -> Response {
    // Only the registry goes into the socket task; a held `Ingestor` would keep
    // the pipeline input open past shutdown.
    let registry = state.registry;
    ws.on_upgrade(move |socket| handle_socket(socket, registry))
}

/// Serve one subscriber: forward broadcast batches until either side goes away
async fn handle_socket(socket: WebSocket, registry: SubscriberRegistry) {
    let (mut sender, mut receiver) = socket.split();

    let Subscription {
        handle,
        receiver: mut batches,
    } = match registry.register() {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!("Rejecting subscriber: {}", e);
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    info!(
        "Subscriber {} connected ({} active)",
        handle,
        registry.connection_count()
    );

    let mut forward = tokio::spawn(async move {
        while let Some(message) = batches.recv().await {
            if let Err(e) = sender.send(Message::Text(message.to_string().into())).await {
                warn!("Failed to send batch to {}: {}", handle, e);
                break;
            }
        }
    });

    // Client frames carry nothing we act on; this loop only watches for close
    let mut watch = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => {
                    info!("Subscriber {} closed the connection", handle);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("WebSocket error on {}: {}", handle, e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut forward => watch.abort(),
        _ = &mut watch => forward.abort(),
    }

    registry.unregister(handle);
    info!(
        "Subscriber {} disconnected ({} active)",
        handle,
        registry.connection_count()
    );
}
