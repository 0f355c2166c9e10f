use super::{
    heartbeat::{self, HeartbeatState},
    message::*,
};
use crate::{
    driver::{
        connection::{
            discovery,
            error::{Error as ConnectionError, Result},
        },
        transport::TransportConnection,
        CryptoMode,
    },
    events::DisconnectReason,
    model::{
        payload::{Identify, ProtocolData, Ready, Resume, SelectProtocol, SessionDescription, Speaking},
        CloseCode as VoiceCloseCode,
        Event as GatewayEvent,
        SpeakingState,
    },
    ws::{Error as WsError, WsReader},
    Config,
    ConnectionInfo,
};
use flume::{Receiver, Sender};
use std::{
    net::{IpAddr, UdpSocket as StdUdpSocket},
    sync::Arc,
    time::Duration,
};
use tokio::{net::UdpSocket, select, spawn};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use xsalsa20poly1305::{aead::KeyInit, XSalsa20Poly1305 as Cipher};
use tracing::{debug, info, instrument, trace, warn};

/// Close code sent when the relay stops acknowledging heartbeats.
///
/// Anything other than a normal closure leaves the session resumable.
const HEARTBEAT_CLOSE: CloseCode = CloseCode::Library(4000);

/// Why a session's receive loop stopped.
#[derive(Debug)]
enum Exit {
    /// The driver asked for the session to end.
    Stopped,
    /// The relay stopped acknowledging heartbeats.
    HeartbeatMissed,
    /// The socket or handshake failed.
    Failed(ConnectionError),
}

/// Per-connection control-plane state machine, owning the socket's read half.
pub(crate) struct AuxNetwork {
    info: ConnectionInfo,
    crypto_mode: CryptoMode,
    discovery_timeout: Duration,
    interconnect: Interconnect,

    reader: WsReader,
    outbox: Sender<OutboundFrame>,
    rx: Receiver<WsMessage>,
    tx: Sender<WsMessage>,
    cancel: CancellationToken,

    ready: Option<Sender<Result<u32>>>,
    should_resume: bool,
    attempt_idx: usize,

    ssrc: Option<u32>,
    udp: Option<StdUdpSocket>,
    speaking: SpeakingState,

    heartbeat: Arc<HeartbeatState>,
    heartbeat_cancel: Option<CancellationToken>,
}

impl AuxNetwork {
    /// Creates the receive loop for one connection attempt.
    ///
    /// When `prior_ssrc` is set, the relay is asked to resume that session rather
    /// than start a new one.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        info: ConnectionInfo,
        config: &Config,
        interconnect: Interconnect,
        reader: WsReader,
        outbox: Sender<OutboundFrame>,
        (tx, rx): (Sender<WsMessage>, Receiver<WsMessage>),
        cancel: CancellationToken,
        ready: Sender<Result<u32>>,
        attempt_idx: usize,
        prior_ssrc: Option<u32>,
    ) -> Self {
        Self {
            info,
            crypto_mode: config.crypto_mode,
            discovery_timeout: config.discovery_timeout,
            interconnect,

            reader,
            outbox,
            rx,
            tx,
            cancel,

            ready: Some(ready),
            should_resume: prior_ssrc.is_some(),
            attempt_idx,

            ssrc: prior_ssrc,
            udp: None,
            speaking: SpeakingState::empty(),

            heartbeat: Arc::default(),
            heartbeat_cancel: None,
        }
    }

    #[instrument(skip(self))]
    async fn run(&mut self) -> Exit {
        loop {
            select! {
                () = self.cancel.cancelled() => {
                    drop(self.outbox.send(OutboundFrame::Close(CloseCode::Normal)));
                    return Exit::Stopped;
                },
                ws_msg = self.reader.recv_json() => {
                    let out = match ws_msg {
                        Ok(Some(msg)) => self.process_ws(msg).await,
                        Ok(None) => Ok(()),
                        Err(e) => Err(e.into()),
                    };

                    if let Err(e) = out {
                        return Exit::Failed(e);
                    }
                },
                inner_msg = self.rx.recv_async() => {
                    // We hold a sender ourselves, so this can never disconnect.
                    let Ok(inner_msg) = inner_msg else {
                        return Exit::Stopped;
                    };

                    match inner_msg {
                        WsMessage::Speaking(is_speaking) => {
                            if let Err(e) = self.set_speaking(is_speaking) {
                                return Exit::Failed(e);
                            }
                        },
                        WsMessage::HeartbeatMissed => {
                            drop(self.outbox.send(OutboundFrame::Close(HEARTBEAT_CLOSE)));
                            return Exit::HeartbeatMissed;
                        },
                    }
                },
            }
        }
    }

    fn send(&self, event: impl Into<GatewayEvent>) -> Result<()> {
        self.outbox
            .send(OutboundFrame::Json(event.into()))
            .map_err(Into::into)
    }

    async fn process_ws(&mut self, value: GatewayEvent) -> Result<()> {
        match value {
            GatewayEvent::Hello(h) => {
                let interval = Duration::try_from_secs_f64(h.heartbeat_interval / 1000.0)
                    .ok()
                    .filter(|d| !d.is_zero())
                    .ok_or(ConnectionError::IllegalHello)?;

                info!("WS heartbeat duration {}ms.", h.heartbeat_interval);
                self.start_heartbeat(interval);

                if self.should_resume {
                    self.send(Resume {
                        server_id: self.info.guild_id,
                        session_id: self.info.session_id.clone(),
                        token: self.info.token.clone(),
                    })
                } else {
                    self.send(Identify {
                        server_id: self.info.guild_id,
                        session_id: self.info.session_id.clone(),
                        token: self.info.token.clone(),
                        user_id: self.info.user_id,
                    })
                }
            },
            GatewayEvent::Ready(r) => self.on_ready(r).await,
            GatewayEvent::SessionDescription(desc) => self.on_session_description(desc),
            GatewayEvent::HeartbeatAck(ev) => {
                self.heartbeat.ack(ev.nonce);
                Ok(())
            },
            GatewayEvent::Resumed => {
                info!("Resumed session with: {}", self.info.endpoint);
                self.interconnect
                    .sender
                    .send(SenderMessage::Ws(Some(self.tx.clone())))?;
                self.handshake_complete();
                Ok(())
            },
            GatewayEvent::Speaking(ev) => {
                trace!("Speaking update: {:?}", ev);
                Ok(())
            },
            GatewayEvent::ClientDisconnect(ev) => {
                trace!("Client disconnected: {:?}", ev);
                Ok(())
            },
            other => {
                trace!("Received other websocket data: {:?}", other);
                Ok(())
            },
        }
    }

    fn start_heartbeat(&mut self, interval: Duration) {
        if let Some(old) = self.heartbeat_cancel.take() {
            old.cancel();
        }

        let cancel = self.cancel.child_token();
        self.heartbeat = Arc::default();
        self.heartbeat_cancel = Some(cancel.clone());

        spawn(heartbeat::runner(
            interval,
            self.heartbeat.clone(),
            self.outbox.clone(),
            self.tx.clone(),
            cancel,
        ));
    }

    async fn on_ready(&mut self, ready: Ready) -> Result<()> {
        if !ready.modes.is_empty() && !has_valid_mode(&ready.modes, self.crypto_mode) {
            return Err(ConnectionError::CryptoModeUnavailable);
        }

        self.ssrc = Some(ready.ssrc);

        let bind_addr = match ready.ip {
            IpAddr::V4(_) => "0.0.0.0:0",
            IpAddr::V6(_) => "[::]:0",
        };

        let udp = UdpSocket::bind(bind_addr).await?;
        udp.connect((ready.ip, ready.port)).await?;

        // Follow the relay's IP discovery procedure, in case NAT tunnelling is needed.
        let (address, port) = discovery::discover(&udp, ready.ssrc, self.discovery_timeout).await?;

        // The frame sender performs blocking sends from its own thread.
        let udp = udp.into_std()?;
        udp.set_nonblocking(false)?;
        self.udp = Some(udp);

        self.send(SelectProtocol {
            protocol: "udp".into(),
            data: ProtocolData {
                address,
                mode: self.crypto_mode.to_request_str().into(),
                port,
            },
        })
    }

    fn on_session_description(&mut self, desc: SessionDescription) -> Result<()> {
        if desc.mode != self.crypto_mode.to_request_str() {
            return Err(ConnectionError::CryptoModeInvalid);
        }

        let (Some(ssrc), Some(udp)) = (self.ssrc, &self.udp) else {
            debug!("Ignoring session description received before IP discovery.");
            return Ok(());
        };

        let cipher =
            Cipher::new_from_slice(&desc.secret_key).map_err(|_| ConnectionError::CryptoInvalidLength)?;
        let conn = TransportConnection::new(cipher, self.crypto_mode, ssrc, udp.try_clone()?);

        self.interconnect.sender.send(SenderMessage::SetConn(conn))?;
        self.interconnect
            .sender
            .send(SenderMessage::Ws(Some(self.tx.clone())))?;

        info!("Connected to: {}", self.info.endpoint);
        self.handshake_complete();

        Ok(())
    }

    /// Marks the session as live, resolving the connection attempt if it is still waiting.
    fn handshake_complete(&mut self) {
        self.should_resume = true;

        if let Some(ready) = self.ready.take() {
            // The other side may have timed out and hung up: this is fine.
            drop(ready.send(Ok(self.ssrc.unwrap_or_default())));
        }
    }

    fn set_speaking(&mut self, is_speaking: bool) -> Result<()> {
        let Some(ssrc) = self.ssrc else {
            return Ok(());
        };

        if self.ready.is_some() || self.speaking.contains(SpeakingState::MICROPHONE) == is_speaking {
            return Ok(());
        }

        self.speaking.set(SpeakingState::MICROPHONE, is_speaking);
        debug!("Changing to {:?}", self.speaking);

        self.send(Speaking {
            delay: Some(0),
            speaking: self.speaking,
            ssrc,
            user_id: None,
        })
    }

    /// Reports how the session ended, to either the pending connection attempt or the core task.
    fn finish(&mut self, exit: Exit) {
        if let Some(cancel) = self.heartbeat_cancel.take() {
            cancel.cancel();
        }

        if let Some(ready) = self.ready.take() {
            let err = match exit {
                Exit::Stopped => ConnectionError::AttemptDiscarded,
                Exit::HeartbeatMissed => ConnectionError::TimedOut,
                Exit::Failed(e) => e,
            };
            drop(ready.send(Err(err)));
            return;
        }

        let (resumable, reason) = match &exit {
            Exit::Stopped => return,
            Exit::HeartbeatMissed => (true, DisconnectReason::TimedOut),
            Exit::Failed(e) => (error_is_not_final(e), DisconnectReason::from(e)),
        };

        if resumable && self.should_resume {
            warn!("Voice session lost ({:?}); attempting to resume.", exit);
            drop(self.interconnect.core.send(CoreMessage::Reconnect(self.attempt_idx)));
        } else {
            warn!("Voice session closed ({:?}).", exit);
            drop(
                self.interconnect
                    .core
                    .send(CoreMessage::SignalWsClosure(self.attempt_idx, Some(reason))),
            );
        }
    }
}

#[instrument(skip(aux))]
pub(crate) async fn runner(mut aux: AuxNetwork) {
    trace!("WS thread started.");
    let exit = aux.run().await;
    aux.finish(exit);
    trace!("WS thread finished.");
}

fn error_is_not_final(err: &ConnectionError) -> bool {
    match err {
        ConnectionError::Ws(e) => ws_error_is_not_final(e),
        ConnectionError::Io(_) | ConnectionError::TimedOut => true,
        _ => false,
    }
}

pub(crate) fn ws_error_is_not_final(err: &WsError) -> bool {
    match err {
        WsError::WsClosed(Some(frame)) => match frame.code {
            CloseCode::Library(l) => VoiceCloseCode::from_u16(l).map_or(true, VoiceCloseCode::should_resume),
            CloseCode::Normal => false,
            _ => true,
        },
        e => {
            debug!("Error sending/receiving ws {:?}.", e);
            true
        },
    }
}

#[inline]
fn has_valid_mode<T, It>(modes: It, mode: CryptoMode) -> bool
where
    T: for<'a> PartialEq<&'a str>,
    It: IntoIterator<Item = T>,
{
    modes.into_iter().any(|s| s == mode.to_request_str())
}
