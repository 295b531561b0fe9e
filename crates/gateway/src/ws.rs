use {
    axum::extract::ws::{CloseFrame, Message, WebSocket},
    futures::{SinkExt, StreamExt},
    tracing::{debug, trace},
};

use crate::transport::{OutboundFrame, TransportChannel, TransportEvent, TransportMeta};

/// Close frame payloads are 125 bytes, two of which hold the status code.
const MAX_CLOSE_REASON: usize = 123;

/// Longest prefix of `reason` that fits a close frame without splitting a
/// UTF-8 sequence.
fn truncate_reason(reason: &str) -> &str {
    let mut end = reason.len().min(MAX_CLOSE_REASON);
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}

/// Attach an upgraded socket to a [`TransportChannel`].
///
/// Spawns a writer task draining outbound frames into the socket and a reader
/// task turning socket messages into [`TransportEvent`]s. Both stop once the
/// controller drops its end or a close frame goes out.
pub fn bridge(socket: WebSocket, meta: TransportMeta) -> TransportChannel {
    let conn_id = meta.conn_id;
    let (mut sink, mut stream) = socket.split();
    let (channel, remote) = TransportChannel::pair(meta);
    let events = remote.events;
    let mut frames = remote.frames;

    let reader = tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            let event = match msg {
                Ok(Message::Text(text)) => TransportEvent::Message(text.as_str().to_owned()),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => TransportEvent::Message(text),
                    Err(e) => {
                        debug!(conn_id = %conn_id, error = %e, "dropping non-utf8 binary frame");
                        continue;
                    },
                },
                Ok(Message::Ping(_) | Message::Pong(_)) => continue,
                Ok(Message::Close(frame)) => {
                    let reason = frame
                        .map(|f| f.reason.as_str().to_owned())
                        .filter(|r| !r.is_empty());
                    let _ = events.send(TransportEvent::Closed { reason });
                    return;
                },
                Err(e) => {
                    let _ = events.send(TransportEvent::Error(e.to_string()));
                    return;
                },
            };
            if events.send(event).is_err() {
                return;
            }
        }
        let _ = events.send(TransportEvent::Closed { reason: None });
    });

    tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            let (msg, last) = match frame {
                OutboundFrame::Text(text) => (Message::Text(text.into()), false),
                OutboundFrame::Ping => (Message::Ping(Default::default()), false),
                OutboundFrame::Close { code, reason } => {
                    let frame = CloseFrame {
                        code,
                        reason: truncate_reason(&reason).to_owned().into(),
                    };
                    (Message::Close(Some(frame)), true)
                },
            };
            if sink.send(msg).await.is_err() || last {
                break;
            }
        }
        let _ = sink.close().await;
        reader.abort();
        trace!(conn_id = %conn_id, "socket writer finished");
    });

    channel
}
