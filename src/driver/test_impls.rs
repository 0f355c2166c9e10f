//! A scripted stand-in for a voice relay, and plumbing for driving tasks in isolation.

#![allow(missing_docs)]

use super::{
    connection::{discovery, error::Result as ConnectionResult},
    tasks::{message::*, outbound, ws::AuxNetwork},
    CryptoMode,
};
use crate::{
    constants::{IP_DISCOVERY_LEN, RTP_VERSION_BYTE},
    events::DriverEvent,
    model::{
        payload::{Hello, Ready, SessionDescription},
        Event as GatewayEvent,
    },
    ws::WsStream,
    Config,
    ConnectionInfo,
};
use flume::{Receiver, Sender};
use futures::{SinkExt, StreamExt};
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    net::{TcpListener, TcpStream, UdpSocket},
    task::JoinHandle,
};
use tokio_tungstenite::{
    tungstenite::{
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
    WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Secret key handed out by every scripted handshake.
pub(crate) const RELAY_KEY: [u8; 32] = [7; 32];

/// Receiving ends of every channel in a mocked [`Interconnect`].
pub(crate) struct Listeners {
    pub core: Receiver<CoreMessage>,
    pub events: Receiver<DriverEvent>,
    pub sender: Receiver<SenderMessage>,
}

impl Interconnect {
    pub(crate) fn mock() -> (Self, Listeners) {
        let (core_tx, core_rx) = flume::unbounded();
        let (events_tx, events_rx) = flume::unbounded();
        let (sender_tx, sender_rx) = flume::unbounded();

        (
            Interconnect {
                core: core_tx,
                events: events_tx,
                sender: sender_tx,
            },
            Listeners {
                core: core_rx,
                events: events_rx,
                sender: sender_rx,
            },
        )
    }
}

pub(crate) fn hello(interval_ms: f64) -> GatewayEvent {
    GatewayEvent::from(Hello {
        heartbeat_interval: interval_ms,
    })
}

#[derive(Clone)]
pub(crate) struct FakeRelay(Arc<RelayInner>);

struct RelayInner {
    ws_addr: SocketAddr,
    udp_addr: SocketAddr,
    conns: Receiver<RelayConn>,
    packets: Receiver<Vec<u8>>,
}

impl FakeRelay {
    /// Binds a WebSocket listener and a UDP endpoint on loopback.
    ///
    /// The UDP endpoint answers IP discovery, and queues every other datagram
    /// for inspection.
    pub(crate) async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let ws_addr = listener.local_addr().unwrap();
        let udp_addr = udp.local_addr().unwrap();

        let (conn_tx, conn_rx) = flume::unbounded();
        let (pkt_tx, pkt_rx) = flume::unbounded();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                if conn_tx.send(RelayConn(ws)).is_err() {
                    break;
                }
            }
        });

        tokio::spawn(udp_responder(udp, pkt_tx));

        Self(Arc::new(RelayInner {
            ws_addr,
            udp_addr,
            conns: conn_rx,
            packets: pkt_rx,
        }))
    }

    pub(crate) fn udp_addr(&self) -> SocketAddr {
        self.0.udp_addr
    }

    pub(crate) fn url(&self) -> Url {
        Url::parse(&format!("ws://{}/?v=4", self.0.ws_addr)).unwrap()
    }

    pub(crate) fn info(&self) -> ConnectionInfo {
        ConnectionInfo::new(1_u64, 2_u64, "session", "token", self.0.ws_addr.to_string())
    }

    pub(crate) fn config(&self) -> Config {
        Config::default().plaintext_ws(true)
    }

    /// Waits for the next client to complete its WebSocket handshake.
    pub(crate) async fn accept(&self) -> RelayConn {
        self.0.conns.recv_async().await.unwrap()
    }

    /// Waits for the next non-discovery datagram.
    pub(crate) async fn packet(&self) -> Vec<u8> {
        self.0.packets.recv_async().await.unwrap()
    }
}

async fn udp_responder(udp: UdpSocket, packets: Sender<Vec<u8>>) {
    let mut buf = [0u8; 2048];

    while let Ok((len, peer)) = udp.recv_from(&mut buf).await {
        if len == IP_DISCOVERY_LEN && buf[0] != RTP_VERSION_BYTE {
            let reply = discovery::response(&peer.ip().to_string(), peer.port());
            let _ = udp.send_to(&reply, peer).await;
        } else if packets.send(buf[..len].to_vec()).is_err() {
            break;
        }
    }
}

/// One frame seen by the relay.
#[derive(Debug)]
pub(crate) enum RelayFrame {
    Event(GatewayEvent),
    Close(Option<CloseFrame<'static>>),
}

/// The relay's end of one client's control connection.
pub(crate) struct RelayConn(WebSocketStream<TcpStream>);

impl RelayConn {
    pub(crate) async fn send(&mut self, event: GatewayEvent) {
        let text = serde_json::to_string(&event).unwrap();
        // The client may have hung up already.
        let _ = self.0.send(Message::Text(text)).await;
    }

    pub(crate) async fn close(&mut self, code: CloseCode) {
        let frame = CloseFrame {
            code,
            reason: "".into(),
        };
        let _ = self.0.send(Message::Close(Some(frame))).await;
    }

    pub(crate) async fn recv_frame(&mut self) -> RelayFrame {
        loop {
            match self.0.next().await {
                Some(Ok(Message::Text(t))) =>
                    return RelayFrame::Event(serde_json::from_str(&t).unwrap()),
                Some(Ok(Message::Close(f))) => return RelayFrame::Close(f),
                Some(Ok(_)) => {},
                Some(Err(_)) | None => return RelayFrame::Close(None),
            }
        }
    }

    /// Returns the next event, or `None` once the client has closed the socket.
    pub(crate) async fn recv(&mut self) -> Option<GatewayEvent> {
        match self.recv_frame().await {
            RelayFrame::Event(e) => Some(e),
            RelayFrame::Close(_) => None,
        }
    }

    async fn recv_skipping_heartbeats(&mut self) -> GatewayEvent {
        loop {
            match self.recv().await {
                Some(GatewayEvent::Heartbeat(_)) => {},
                Some(e) => return e,
                None => panic!("client hung up during handshake"),
            }
        }
    }

    /// Plays the relay's side of a full session handshake, with a long heartbeat interval.
    pub(crate) async fn handshake(&mut self, relay: &FakeRelay, ssrc: u32, mode: CryptoMode) {
        self.handshake_with(relay, ssrc, mode, 60_000.0).await;
    }

    pub(crate) async fn handshake_with(
        &mut self,
        relay: &FakeRelay,
        ssrc: u32,
        mode: CryptoMode,
        interval_ms: f64,
    ) {
        self.send(hello(interval_ms)).await;

        match self.recv_skipping_heartbeats().await {
            GatewayEvent::Identify(_) | GatewayEvent::Resume(_) => {},
            other => panic!("expected identify, saw {other:?}"),
        }

        self.send(GatewayEvent::Ready(Ready {
            ssrc,
            ip: relay.udp_addr().ip(),
            port: relay.udp_addr().port(),
            modes: [CryptoMode::Normal, CryptoMode::Suffix, CryptoMode::Lite]
                .iter()
                .map(|m| m.to_request_str().to_string())
                .collect(),
        }))
        .await;

        match self.recv_skipping_heartbeats().await {
            GatewayEvent::SelectProtocol(sp) => {
                assert_eq!(sp.protocol, "udp");
                assert_eq!(sp.data.mode, mode.to_request_str());
                assert_eq!(sp.data.address, relay.udp_addr().ip());
            },
            other => panic!("expected protocol selection, saw {other:?}"),
        }

        self.send(GatewayEvent::SessionDescription(SessionDescription {
            mode: mode.to_request_str().into(),
            secret_key: RELAY_KEY.to_vec(),
        }))
        .await;
    }
}

/// A session receive loop running against a [`FakeRelay`], with every channel exposed.
pub(crate) struct SessionHarness {
    pub cancel: CancellationToken,
    pub ready: Receiver<ConnectionResult<u32>>,
    pub core_rx: Receiver<CoreMessage>,
    pub sender_rx: Receiver<SenderMessage>,
    pub ws_tx: Sender<WsMessage>,
    pub task: JoinHandle<()>,
}

impl SessionHarness {
    pub(crate) async fn start(relay: &FakeRelay, prior_ssrc: Option<u32>) -> Self {
        let (interconnect, listeners) = Interconnect::mock();
        let (sink, reader) = WsStream::connect(&relay.url()).await.unwrap().split();

        let (out_tx, out_rx) = flume::unbounded();
        tokio::spawn(outbound::runner(sink, out_rx));

        let (ws_tx, ws_rx) = flume::unbounded();
        let (ready_tx, ready_rx) = flume::bounded(1);
        let cancel = CancellationToken::new();

        let aux = AuxNetwork::new(
            relay.info(),
            &relay.config(),
            interconnect,
            reader,
            out_tx,
            (ws_tx.clone(), ws_rx),
            cancel.clone(),
            ready_tx,
            0,
            prior_ssrc,
        );

        let task = tokio::spawn(super::tasks::ws::runner(aux));

        Self {
            cancel,
            ready: ready_rx,
            core_rx: listeners.core,
            sender_rx: listeners.sender,
            ws_tx,
            task,
        }
    }
}
