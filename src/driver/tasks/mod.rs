#![allow(missing_docs)]

pub mod error;
pub(crate) mod heartbeat;
pub mod message;
pub(crate) mod outbound;
pub(crate) mod sender;
pub(crate) mod ws;

use super::{
    codec::CodecError,
    connection::{error::Error as ConnectionError, Connection},
    transport::VoiceTransport,
};
use crate::{
    events::{ConnectData, DisconnectData, DisconnectKind, DisconnectReason, DriverEvent},
    Config,
    ConnectionInfo,
};
use flume::{Receiver, RecvError, Sender};
use message::*;
use std::{collections::VecDeque, future::Future};
use tokio::{select, spawn, time::sleep};
use tracing::{debug, error, info, instrument, trace};

pub(crate) fn start(
    config: Config,
    rx: Receiver<CoreMessage>,
    tx: Sender<CoreMessage>,
    events: Sender<DriverEvent>,
) {
    spawn(async move {
        trace!("Driver started.");
        runner(config, rx, tx, events).await;
        trace!("Driver finished.");
    });
}

/// State owned by the central task: the live session, and handles to every other task.
struct Core {
    config: Config,
    interconnect: Interconnect,
    connection: Option<Connection>,
    attempt_idx: usize,
    /// Held until the frame sender has an encoder to run with.
    pending_sender: Option<Receiver<SenderMessage>>,
    /// Session messages which arrived during a reconnect, in order.
    deferred: VecDeque<CoreMessage>,
}

impl Core {
    fn new(config: Config, core: Sender<CoreMessage>, events: Sender<DriverEvent>) -> Self {
        let (sender_tx, sender_rx) = flume::unbounded();

        let mut out = Self {
            config,
            interconnect: Interconnect {
                core,
                events,
                sender: sender_tx,
            },
            connection: None,
            attempt_idx: 0,
            pending_sender: Some(sender_rx),
            deferred: VecDeque::new(),
        };

        if let Err(e) = out.ensure_sender() {
            error!("Failed to build Opus encoder: {e}.");
        }

        out
    }

    /// Starts the frame sender thread, unless it is already running.
    fn ensure_sender(&mut self) -> Result<(), CodecError> {
        let Some(rx) = self.pending_sender.take() else {
            return Ok(());
        };

        match VoiceTransport::new(&self.config) {
            Ok(transport) => {
                let ic = self.interconnect.clone();
                let config = self.config.clone();
                std::thread::spawn(move || {
                    trace!("Frame sender started.");
                    sender::runner(ic, rx, transport, config);
                    trace!("Frame sender finished.");
                });
                Ok(())
            },
            Err(e) => {
                self.pending_sender = Some(rx);
                Err(e)
            },
        }
    }

    fn next_attempt(&mut self) -> usize {
        self.attempt_idx = self.attempt_idx.wrapping_add(1);
        self.attempt_idx
    }

    fn is_current(&self, idx: usize) -> bool {
        self.connection.as_ref().map(|c| c.attempt_idx) == Some(idx)
    }

    fn to_sender(&self, msg: SenderMessage) {
        // The sender only hangs up during shutdown.
        drop(self.interconnect.sender.send(msg));
    }

    async fn connect(&mut self, info: ConnectionInfo, tx: Sender<Result<(), ConnectionError>>) {
        if self.connection.take().is_some() {
            self.to_sender(SenderMessage::DropConn);
        }

        if let Err(e) = self.ensure_sender() {
            // The other side may not be listening: this is fine.
            drop(tx.send(Err(ConnectionError::Codec(e))));
            self.interconnect.fire(DriverEvent::Disconnect(DisconnectData::new(
                DisconnectKind::Connect,
                Some(DisconnectReason::Internal),
                &info,
            )));
            return;
        }

        let idx = self.next_attempt();
        match Connection::new(info.clone(), &self.interconnect, &self.config, idx, None).await {
            Ok(conn) => {
                self.interconnect
                    .fire(DriverEvent::Connect(ConnectData::new(&conn.info, conn.ssrc)));
                drop(tx.send(Ok(())));
                self.connection = Some(conn);
            },
            Err(e) => {
                self.interconnect.fire(DriverEvent::Disconnect(DisconnectData::new(
                    DisconnectKind::Connect,
                    Some(DisconnectReason::from(&e)),
                    &info,
                )));
                drop(tx.send(Err(e)));
            },
        }
    }

    /// Resumes a lost session, falling back to a fresh identify once retries are spent.
    ///
    /// A `Disconnect`, new connection request or shutdown which arrives meanwhile
    /// abandons the attempt, and is handed back to be processed next.
    #[instrument(skip(self, rx))]
    async fn reconnect(&mut self, idx: usize, rx: &Receiver<CoreMessage>) -> Option<CoreMessage> {
        if !self.is_current(idx) {
            debug!("Ignoring reconnect request from stale session {idx}.");
            return None;
        }

        let old = self.connection.take()?;
        let info = old.info.clone();
        let ssrc = old.ssrc;
        drop(old);

        match self.resume_or_identify(&info, ssrc, rx).await {
            Ok(Ok(c)) => {
                self.interconnect
                    .fire(DriverEvent::Reconnect(ConnectData::new(&c.info, c.ssrc)));
                self.connection = Some(c);
                None
            },
            Ok(Err(e)) => {
                error!("Catastrophic connection failure. Stopping. {:?}", e);
                self.to_sender(SenderMessage::DropConn);
                self.interconnect.fire(DriverEvent::Disconnect(DisconnectData::new(
                    DisconnectKind::Reconnect,
                    Some(DisconnectReason::from(&e)),
                    &info,
                )));
                None
            },
            Err(msg) => {
                info!("Reconnect abandoned.");
                self.to_sender(SenderMessage::DropConn);
                self.interconnect.fire(DriverEvent::Disconnect(DisconnectData::new(
                    DisconnectKind::Reconnect,
                    None,
                    &info,
                )));
                Some(msg)
            },
        }
    }

    async fn resume_or_identify(
        &mut self,
        info: &ConnectionInfo,
        ssrc: u32,
        rx: &Receiver<CoreMessage>,
    ) -> Result<Result<Connection, ConnectionError>, CoreMessage> {
        // The old transport stays installed: a resumed session keeps its key and SSRC.
        for wait in self.config.driver_retry.delays() {
            interruptible(&self.interconnect, &mut self.deferred, rx, sleep(wait)).await?;

            let idx = self.next_attempt();
            let attempt =
                Connection::new(info.clone(), &self.interconnect, &self.config, idx, Some(ssrc));

            match interruptible(&self.interconnect, &mut self.deferred, rx, attempt).await? {
                Ok(c) => return Ok(Ok(c)),
                Err(ConnectionError::Ws(e)) if !ws::ws_error_is_not_final(&e) => {
                    debug!("Session can no longer be resumed: {e}.");
                    break;
                },
                Err(e) => debug!("Resume attempt failed: {e}."),
            }
        }

        info!("Resume failed, identifying afresh.");
        let idx = self.next_attempt();
        let attempt = Connection::new(info.clone(), &self.interconnect, &self.config, idx, None);
        interruptible(&self.interconnect, &mut self.deferred, rx, attempt).await
    }

    /// Tears down the live session, reporting it as lost at runtime.
    fn end_session(&mut self, reason: Option<DisconnectReason>) {
        if let Some(conn) = self.connection.take() {
            self.to_sender(SenderMessage::DropConn);
            self.interconnect.fire(DriverEvent::Disconnect(DisconnectData::new(
                DisconnectKind::Runtime,
                reason,
                &conn.info,
            )));
        }
    }
}

#[instrument(skip(rx, tx, events))]
async fn runner(
    config: Config,
    rx: Receiver<CoreMessage>,
    tx: Sender<CoreMessage>,
    events: Sender<DriverEvent>,
) {
    let mut core = Core::new(config, tx, events);

    loop {
        let msg = match core.deferred.pop_front() {
            Some(msg) => Ok(msg),
            None => rx.recv_async().await,
        };

        match msg {
            Ok(CoreMessage::ConnectWithResult(info, tx)) => core.connect(info, tx).await,
            Ok(CoreMessage::Disconnect) => core.end_session(None),
            Ok(CoreMessage::SetTrack(t)) => core.to_sender(SenderMessage::SetTrack(t)),
            Ok(CoreMessage::SetBitrate(b)) => core.to_sender(SenderMessage::SetBitrate(b)),
            Ok(CoreMessage::Mute(m)) => core.to_sender(SenderMessage::SetMute(m)),
            Ok(CoreMessage::Speaking(s)) =>
                if let Some(conn) = &core.connection {
                    drop(conn.ws.send(WsMessage::Speaking(s)));
                },
            Ok(CoreMessage::Reconnect(idx)) =>
                if let Some(msg) = core.reconnect(idx, &rx).await {
                    core.deferred.push_back(msg);
                },
            Ok(CoreMessage::SignalWsClosure(idx, reason)) =>
                if core.is_current(idx) {
                    core.end_session(reason);
                },
            Ok(CoreMessage::SenderFailed) => core.end_session(Some(DisconnectReason::Internal)),
            Err(RecvError::Disconnected) | Ok(CoreMessage::Poison) => break,
        }
    }

    trace!("Main thread exited");
    core.connection = None;
    core.interconnect.poison_all();
}

/// Waits on `fut` during a reconnect, applying playback controls as they arrive.
///
/// Session messages are queued in `deferred`. Returns `Err` with the message if
/// one arrives which ends the reconnect.
async fn interruptible<T>(
    interconnect: &Interconnect,
    deferred: &mut VecDeque<CoreMessage>,
    rx: &Receiver<CoreMessage>,
    fut: impl Future<Output = T>,
) -> Result<T, CoreMessage> {
    tokio::pin!(fut);

    loop {
        select! {
            out = &mut fut => return Ok(out),
            msg = rx.recv_async() => {
                let to_sender = |m| drop(interconnect.sender.send(m));
                match msg {
                    Ok(CoreMessage::SetTrack(t)) => to_sender(SenderMessage::SetTrack(t)),
                    Ok(CoreMessage::SetBitrate(b)) => to_sender(SenderMessage::SetBitrate(b)),
                    Ok(CoreMessage::Mute(m)) => to_sender(SenderMessage::SetMute(m)),
                    Ok(
                        msg @ (CoreMessage::Disconnect
                        | CoreMessage::ConnectWithResult(..)
                        | CoreMessage::Poison),
                    ) => return Err(msg),
                    Ok(msg) => deferred.push_back(msg),
                    Err(RecvError::Disconnected) => return Err(CoreMessage::Poison),
                }
            },
        }
    }
}
