use super::message::OutboundFrame;
use crate::ws::WsSink;
use flume::Receiver;
use tracing::{debug, instrument, trace};

/// Drains queued control frames onto the socket, in order.
///
/// This is the only writer of a session's socket. It exits after sending a close
/// frame, on any send error, or once every queue handle has been dropped.
#[instrument(skip(sink, rx))]
pub(crate) async fn runner(mut sink: WsSink, rx: Receiver<OutboundFrame>) {
    trace!("WS send task started.");

    while let Ok(frame) = rx.recv_async().await {
        let sent = match frame {
            OutboundFrame::Json(ev) => sink.send_json(&ev).await,
            OutboundFrame::Close(code) => {
                if let Err(e) = sink.close(code).await {
                    debug!("Failed to send close frame: {e}.");
                }
                break;
            },
        };

        if let Err(e) = sent {
            debug!("Failed to send control frame: {e}.");
            break;
        }
    }

    trace!("WS send task finished.");
}
