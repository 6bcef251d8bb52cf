//! axum WebSocket glue for the broadcaster

use std::borrow::Cow;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tracing::{debug, warn};

use super::broadcaster::{Broadcaster, Outbound};

/// Drive one viewer socket until either side closes it
///
/// The read loop runs on the calling task; a spawned writer drains the
/// connection's outbound queue into the socket.
pub async fn serve_connection(socket: WebSocket, broadcaster: Arc<Broadcaster>) {
    let (client, mut outbound) = broadcaster.connect().await;
    let (mut sink, mut stream) = socket.split();

    let writer_client = client.clone();
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let (message, last) = match frame {
                Outbound::Text(text) => (Message::Text(text.to_string()), false),
                Outbound::Ping => (Message::Ping(Vec::new()), false),
                Outbound::Close { code, reason } => (
                    Message::Close(Some(CloseFrame {
                        code,
                        reason: Cow::Borrowed(reason),
                    })),
                    true,
                ),
            };
            if let Err(e) = sink.send(message).await {
                debug!("Write to {} failed: {}", writer_client, e);
                break;
            }
            if last {
                break;
            }
        }
    });

    broadcaster.open(&client).await;

    loop {
        tokio::select! {
            _ = &mut writer => break,
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => broadcaster.handle_text(&client, &text).await,
                Some(Ok(Message::Pong(_))) => broadcaster.record_pong(&client).await,
                Some(Ok(Message::Close(frame))) => {
                    debug!("{} closed the connection: {:?}", client, frame);
                    break;
                }
                // pings are answered by the protocol layer; binary frames are ignored
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket error for {}: {}", client, e);
                    broadcaster.record_error();
                    break;
                }
                None => break,
            },
        }
    }

    broadcaster.disconnect(&client).await;
    writer.abort();
}
