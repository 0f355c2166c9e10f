use super::message::*;
use crate::model::{payload::Heartbeat, Event as GatewayEvent};
use flume::Sender;
use rand::random;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    select,
    time::{sleep_until, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{instrument, trace, warn};

/// Acknowledgement state shared between a session's receive loop and its heartbeat timer.
#[derive(Debug)]
pub(crate) struct HeartbeatState {
    acked: AtomicBool,
    nonce: AtomicU64,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self {
            acked: AtomicBool::new(true),
            nonce: AtomicU64::new(0),
        }
    }
}

impl HeartbeatState {
    pub(crate) fn ack(&self, nonce: u64) {
        let expected = self.nonce.load(Ordering::Acquire);
        if nonce == expected {
            trace!("Heartbeat ACK received.");
        } else {
            warn!("Heartbeat nonce mismatch! Expected {expected}, saw {nonce}.");
        }

        self.acked.store(true, Ordering::Release);
    }
}

/// Sends a heartbeat every `interval` until cancelled, or until one goes unacknowledged.
///
/// The first beat is sent one full interval after starting.
#[instrument(skip(state, outbox, inbox, cancel))]
pub(crate) async fn runner(
    interval: Duration,
    state: Arc<HeartbeatState>,
    outbox: Sender<OutboundFrame>,
    inbox: Sender<WsMessage>,
    cancel: CancellationToken,
) {
    trace!("Heartbeat task started.");
    let mut deadline = Instant::now() + interval;

    loop {
        select! {
            () = cancel.cancelled() => break,
            () = sleep_until(deadline) => {},
        }

        deadline += interval;

        if !state.acked.swap(false, Ordering::AcqRel) {
            warn!("Heartbeat went unacknowledged; closing connection.");
            drop(inbox.send(WsMessage::HeartbeatMissed));
            break;
        }

        let nonce = random::<u64>();
        state.nonce.store(nonce, Ordering::Release);

        trace!("Sent heartbeat {nonce}.");

        let out = GatewayEvent::from(Heartbeat { nonce });
        if outbox.send(OutboundFrame::Json(out)).is_err() {
            break;
        }
    }

    trace!("Heartbeat task finished.");
}

#[cfg(test)]
mod test {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(41_250);

    fn spawn_beat() -> (
        Arc<HeartbeatState>,
        flume::Receiver<OutboundFrame>,
        flume::Receiver<WsMessage>,
        CancellationToken,
        tokio::task::JoinHandle<()>,
    ) {
        let state = Arc::new(HeartbeatState::default());
        let (out_tx, out_rx) = flume::unbounded();
        let (in_tx, in_rx) = flume::unbounded();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(runner(
            INTERVAL,
            state.clone(),
            out_tx,
            in_tx,
            cancel.clone(),
        ));

        (state, out_rx, in_rx, cancel, handle)
    }

    fn beat_nonce(frame: OutboundFrame) -> u64 {
        match frame {
            OutboundFrame::Json(GatewayEvent::Heartbeat(Heartbeat { nonce })) => nonce,
            other => panic!("expected heartbeat, saw {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn acked_heartbeats_keep_running() {
        let (state, out_rx, in_rx, cancel, handle) = spawn_beat();

        for _ in 0..6 {
            let nonce = beat_nonce(out_rx.recv_async().await.unwrap());
            state.ack(nonce);
        }

        assert!(in_rx.is_empty());
        assert!(!handle.is_finished());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn missed_ack_signals_receive_loop() {
        let (_state, out_rx, in_rx, _cancel, handle) = spawn_beat();

        // First beat goes out, then is never acknowledged.
        beat_nonce(out_rx.recv_async().await.unwrap());

        assert!(matches!(
            in_rx.recv_async().await.unwrap(),
            WsMessage::HeartbeatMissed
        ));
        handle.await.unwrap();
        assert!(out_rx.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn beats_are_spaced_by_interval() {
        let (state, out_rx, _in_rx, cancel, _handle) = spawn_beat();
        let start = Instant::now();

        for i in 1..=3u32 {
            let nonce = beat_nonce(out_rx.recv_async().await.unwrap());
            let elapsed = Instant::now() - start;
            assert!(elapsed >= INTERVAL * i);
            assert!(elapsed < INTERVAL * i + Duration::from_millis(5));
            state.ack(nonce);
        }

        cancel.cancel();
    }
}
