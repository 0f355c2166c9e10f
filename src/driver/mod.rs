//! Runner for a voice connection.
//!
//! The driver is a mixed-sync system, using:
//!  * Asynchronous session management: the control socket, heartbeats, and resumption.
//!  * Synchronous packet generation: encoding, encryption, and paced UDP sends.
//!
//! This splits up work according to its IO/compute bound nature, preventing packet
//! generation from being slowed down past its deadline, or from affecting other
//! asynchronous tasks your application must handle.

pub mod codec;
pub(crate) mod connection;
pub mod crypto;
mod mix_mode;
pub mod retry;
mod sample_format;
pub(crate) mod tasks;
#[cfg(test)]
pub(crate) mod test_impls;
pub mod transport;

use connection::error::{Error, Result};
pub use crypto::CryptoMode;
pub use mix_mode::MixMode;
pub use sample_format::SampleFormat;

use crate::{
    events::DriverEvent,
    input::{buffer_async, ring::ring, FillOptions, PlaybackHandle},
    Config,
    ConnectionInfo,
};
use audiopus::Bitrate;
use core::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use flume::{r#async::RecvFut, Receiver, SendError, Sender};
use std::io::Read;
use tasks::message::CoreMessage;
use tokio_util::sync::CancellationToken;
use tracing::{error, instrument};

/// The control object for one voice session, handling connection, encoding,
/// encryption, pacing, and event generation.
///
/// Background tasks are spawned onto the current tokio runtime, so a driver must be
/// created from within one.
#[derive(Debug)]
pub struct Driver {
    config: Config,
    self_mute: bool,
    sender: Sender<CoreMessage>,
    events_tx: Sender<DriverEvent>,
    events_rx: Receiver<DriverEvent>,
    playback: Option<CancellationToken>,
}

impl Driver {
    /// Creates a new voice driver.
    ///
    /// This will create the core voice tasks in the background.
    #[inline]
    #[must_use]
    pub fn new(config: Config) -> Self {
        let (events_tx, events_rx) = flume::unbounded();
        let sender = Self::start_inner(config.clone(), events_tx.clone());

        Driver {
            config,
            self_mute: false,
            sender,
            events_tx,
            events_rx,
            playback: None,
        }
    }

    fn start_inner(config: Config, events: Sender<DriverEvent>) -> Sender<CoreMessage> {
        let (tx, rx) = flume::unbounded();

        tasks::start(config, rx, tx.clone(), events);

        tx
    }

    fn restart_inner(&mut self) {
        self.sender = Self::start_inner(self.config.clone(), self.events_tx.clone());

        self.mute(self.self_mute);
    }

    /// Connects to a voice relay using the details handed out by the main gateway.
    ///
    /// This method instantly contacts the driver tasks, and it does not need to be
    /// `await`ed to start the actual connection. Any existing session is ended first.
    #[instrument(skip(self))]
    pub fn connect(&mut self, info: ConnectionInfo) -> Connect {
        let (tx, rx) = flume::bounded(1);

        self.send(CoreMessage::ConnectWithResult(info, tx));

        Connect {
            inner: rx.into_recv_async(),
        }
    }

    /// Leaves the current session, closing its control socket normally.
    ///
    /// Any playback is stopped as by [`stop`], and a reconnect in progress is
    /// abandoned. Settings such as self-mute are kept for the next session.
    /// Calling this without a live session only stops playback.
    ///
    /// [`stop`]: Self::stop
    #[instrument(skip(self))]
    pub fn leave(&mut self) {
        self.stop();
        self.send(CoreMessage::Disconnect);
    }

    /// Sets whether the current connection is to be muted.
    ///
    /// Audio is still pulled from the active playback while muted, but is not sent.
    /// If there is no live voice connection, then this only acts as a settings
    /// update for future connections.
    #[instrument(skip(self))]
    pub fn mute(&mut self, mute: bool) {
        self.self_mute = mute;
        self.send(CoreMessage::Mute(mute));
    }

    /// Returns whether the driver is muted.
    #[must_use]
    pub fn is_mute(&self) -> bool {
        self.self_mute
    }

    /// Announces to the relay whether this client is transmitting audio.
    ///
    /// The driver sets this automatically around playback; an update is only sent
    /// when the state changes.
    #[instrument(skip(self))]
    pub fn speaking(&mut self, speaking: bool) {
        self.send(CoreMessage::Speaking(speaking));
    }

    /// Plays raw PCM from `source`, replacing any current playback.
    ///
    /// The source must produce little-endian samples in the configured
    /// [`SampleFormat`] and [`MixMode`], at 48kHz. It is read on tokio's
    /// blocking pool until it returns `Ok(0)` or an error, or until playback
    /// is stopped or the driver leaves its session.
    #[instrument(skip(self, source))]
    pub fn play<R>(&mut self, source: R) -> PlaybackHandle
    where
        R: Read + Send + 'static,
    {
        self.stop();

        // The sender only ever takes whole frames.
        let frame_len = self.config.sample_format.frame_len(self.config.mix_mode);
        let (writer, reader) = ring(self.config.ring_buffer_capacity.max(frame_len));
        let cancel = CancellationToken::new();
        let buffer = buffer_async(
            source,
            writer,
            FillOptions::from(&self.config),
            cancel.clone(),
        );

        self.send(CoreMessage::SetTrack(Some(reader)));
        self.playback = Some(cancel.clone());

        PlaybackHandle::new(buffer, cancel)
    }

    /// Stops the current playback, discarding any audio which has not yet been sent.
    #[instrument(skip(self))]
    pub fn stop(&mut self) {
        if let Some(cancel) = self.playback.take() {
            cancel.cancel();
        }

        self.send(CoreMessage::SetTrack(None));
    }

    /// Sets the bitrate for encoding Opus packets sent along
    /// the channel being managed.
    ///
    /// The default rate is 128 kbps.
    /// Sensible values range between `Bits(512)` and `Bits(512_000)`
    /// bits per second.
    /// Alternatively, `Auto` and `Max` remain available.
    #[instrument(skip(self))]
    pub fn set_bitrate(&mut self, bitrate: Bitrate) {
        self.send(CoreMessage::SetBitrate(bitrate));
    }

    /// Returns a receiver of this driver's session events.
    ///
    /// Every clone of the receiver shares one queue, so each event is seen once.
    #[must_use]
    pub fn events(&self) -> Receiver<DriverEvent> {
        self.events_rx.clone()
    }

    /// Returns the driver's configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Sends a message to the inner tasks, restarting it if necessary.
    fn send(&mut self, status: CoreMessage) {
        // Restart thread if it errored.
        if let Err(SendError(status)) = self.sender.send(status) {
            self.restart_inner();

            if self.sender.send(status).is_err() {
                error!("Driver tasks failed to restart.");
            }
        }
    }
}

impl Default for Driver {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Drop for Driver {
    /// Leaves the current session, if there is one, and shuts down all
    /// background tasks.
    fn drop(&mut self) {
        if let Some(cancel) = self.playback.take() {
            cancel.cancel();
        }

        drop(self.sender.send(CoreMessage::Disconnect));
        drop(self.sender.send(CoreMessage::Poison));
    }
}

/// Future for a call to [`Driver::connect`].
///
/// This future awaits the *result* of a connection; the driver
/// is messaged at the time of the call.
///
/// [`Driver::connect`]: Driver::connect
pub struct Connect {
    inner: RecvFut<'static, Result<()>>,
}

impl Future for Connect {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.inner).poll(cx) {
            Poll::Ready(r) => Poll::Ready(r.map_err(|_| Error::AttemptDiscarded).and_then(|x| x)),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        constants::*,
        events::{DisconnectKind, DisconnectReason},
        model::{CloseCode as VoiceCloseCode, Event as GatewayEvent, SpeakingState},
    };
    use byteorder::{ByteOrder, NetworkEndian};
    use retry::{Retry, Strategy};
    use std::{io::Cursor, time::Duration};
    use test_impls::*;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use xsalsa20poly1305::{aead::KeyInit, XSalsa20Poly1305 as Cipher};

    const WAIT: Duration = Duration::from_secs(5);

    fn config(relay: &FakeRelay) -> Config {
        relay
            .config()
            .sample_format(SampleFormat::I16)
            .driver_retry(Retry {
                strategy: Strategy::Every(Duration::from_millis(10)),
                retry_limit: Some(3),
            })
    }

    fn noise(frames: usize) -> Cursor<Vec<u8>> {
        let samples = frames * STEREO_FRAME_SIZE;
        let bytes = (0..samples)
            .flat_map(|i| (((i * 7919) % 20_000) as i16 - 10_000).to_le_bytes())
            .collect();
        Cursor::new(bytes)
    }

    /// Returns the sequence number, timestamp and Opus payload of a relayed packet.
    fn open_packet(mut pkt: Vec<u8>) -> (u16, u32, Vec<u8>) {
        let cipher = Cipher::new_from_slice(&RELAY_KEY).unwrap();
        let seq = NetworkEndian::read_u16(&pkt[2..4]);
        let ts = NetworkEndian::read_u32(&pkt[4..8]);
        let range = CryptoMode::Lite.decrypt_in_place(&mut pkt, &cipher).unwrap();
        (seq, ts, pkt[range].to_vec())
    }

    async fn next_packet(relay: &FakeRelay) -> (u16, u32, Vec<u8>) {
        open_packet(timeout(WAIT, relay.packet()).await.unwrap())
    }

    async fn next_event(driver: &Driver) -> DriverEvent {
        timeout(WAIT, driver.events().recv_async())
            .await
            .unwrap()
            .unwrap()
    }

    async fn connected(relay: &FakeRelay, ssrc: u32) -> (Driver, RelayConn) {
        connected_with(relay, ssrc, config(relay)).await
    }

    async fn connected_with(relay: &FakeRelay, ssrc: u32, config: Config) -> (Driver, RelayConn) {
        let mut driver = Driver::new(config);

        let relay_side = {
            let relay = relay.clone();
            tokio::spawn(async move {
                let mut conn = relay.accept().await;
                conn.handshake(&relay, ssrc, CryptoMode::Lite).await;
                conn
            })
        };

        driver.connect(relay.info()).await.unwrap();
        let conn = relay_side.await.unwrap();

        match next_event(&driver).await {
            DriverEvent::Connect(data) => assert_eq!(data.ssrc, ssrc),
            other => panic!("expected connect, saw {other:?}"),
        }

        (driver, conn)
    }

    fn assert_consecutive(packets: &[(u16, u32, Vec<u8>)]) {
        for pair in packets.windows(2) {
            assert_eq!(pair[1].0, pair[0].0.wrapping_add(1));
            assert_eq!(pair[1].1, pair[0].1.wrapping_add(MONO_FRAME_SIZE as u32));
        }
    }

    #[tokio::test]
    async fn playback_is_sent_as_sequenced_packets() {
        let relay = FakeRelay::bind().await;
        let (mut driver, _conn) = connected(&relay, 11).await;

        let handle = driver.play(noise(4));
        timeout(WAIT, handle.ready()).await.unwrap();

        let mut packets = vec![];
        for _ in 0..9 {
            packets.push(next_packet(&relay).await);
        }

        assert_consecutive(&packets);
        assert!(packets[..4].iter().all(|(_, _, opus)| opus[..] != SILENT_FRAME));
        assert!(packets[4..].iter().all(|(_, _, opus)| opus[..] == SILENT_FRAME));
        assert_eq!(
            handle.finished().await.unwrap(),
            (4 * STEREO_FRAME_SIZE * 2) as u64
        );
    }

    #[tokio::test]
    async fn playback_announces_speaking() {
        let relay = FakeRelay::bind().await;
        let (mut driver, mut conn) = connected(&relay, 12).await;

        let _handle = driver.play(noise(2));

        let mut states = vec![];
        while states.len() < 2 {
            if let Some(GatewayEvent::Speaking(s)) = timeout(WAIT, conn.recv()).await.unwrap() {
                assert_eq!(s.ssrc, 12);
                states.push(s.speaking.contains(SpeakingState::MICROPHONE));
            }
        }

        assert_eq!(states, [true, false]);
    }

    #[tokio::test]
    async fn resumed_session_keeps_counters() {
        let relay = FakeRelay::bind().await;
        let (mut driver, mut conn) = connected(&relay, 13).await;

        let _handle = driver.play(noise(100));

        let mut packets = vec![];
        for _ in 0..3 {
            packets.push(next_packet(&relay).await);
        }

        conn.close(CloseCode::Library(4015)).await;

        let mut conn = timeout(WAIT, relay.accept()).await.unwrap();
        conn.send(hello(60_000.0)).await;
        match timeout(WAIT, conn.recv()).await.unwrap() {
            Some(GatewayEvent::Resume(r)) => assert_eq!(r.session_id, "session"),
            other => panic!("expected resume, saw {other:?}"),
        }
        conn.send(GatewayEvent::Resumed).await;

        match next_event(&driver).await {
            DriverEvent::Reconnect(data) => assert_eq!(data.ssrc, 13),
            other => panic!("expected reconnect, saw {other:?}"),
        }

        for _ in 0..5 {
            packets.push(next_packet(&relay).await);
        }

        assert_consecutive(&packets);
    }

    #[tokio::test]
    async fn fatal_close_ends_session() {
        let relay = FakeRelay::bind().await;
        let (driver, mut conn) = connected(&relay, 14).await;

        conn.close(CloseCode::Library(4014)).await;

        match next_event(&driver).await {
            DriverEvent::Disconnect(data) => {
                assert_eq!(data.kind, DisconnectKind::Runtime);
                assert_eq!(
                    data.reason,
                    Some(DisconnectReason::WsClosed(Some(VoiceCloseCode::Disconnected)))
                );
            },
            other => panic!("expected disconnect, saw {other:?}"),
        }
    }

    #[tokio::test]
    async fn leave_closes_normally_once() {
        let relay = FakeRelay::bind().await;
        let (mut driver, mut conn) = connected(&relay, 15).await;

        driver.leave();
        driver.leave();

        match next_event(&driver).await {
            DriverEvent::Disconnect(data) => {
                assert_eq!(data.kind, DisconnectKind::Runtime);
                assert_eq!(data.reason, None);
            },
            other => panic!("expected disconnect, saw {other:?}"),
        }

        loop {
            match timeout(WAIT, conn.recv_frame()).await.unwrap() {
                RelayFrame::Event(_) => {},
                RelayFrame::Close(frame) => {
                    assert_eq!(frame.map(|f| f.code), Some(CloseCode::Normal));
                    break;
                },
            }
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(driver.events().is_empty());
    }

    #[tokio::test]
    async fn failed_connect_reports_error_and_event() {
        let mut driver = Driver::new(
            Config::default()
                .plaintext_ws(true)
                .driver_timeout(Some(Duration::from_secs(2))),
        );

        let info = ConnectionInfo::new(1_u64, 2_u64, "session", "token", "127.0.0.1:1");
        assert!(driver.connect(info).await.is_err());

        match next_event(&driver).await {
            DriverEvent::Disconnect(data) => assert_eq!(data.kind, DisconnectKind::Connect),
            other => panic!("expected disconnect, saw {other:?}"),
        }
    }

    #[tokio::test]
    async fn muted_driver_sends_no_audio() {
        let relay = FakeRelay::bind().await;
        let (mut driver, _conn) = connected(&relay, 16).await;

        driver.mute(true);
        assert!(driver.is_mute());

        let handle = driver.play(noise(3));
        assert!(timeout(WAIT, handle.finished()).await.unwrap().is_ok());

        assert!(timeout(Duration::from_millis(200), relay.packet()).await.is_err());
    }

    #[tokio::test]
    async fn leave_stops_playback() {
        let relay = FakeRelay::bind().await;
        let (mut driver, _conn) = connected(&relay, 17).await;

        let handle = driver.play(std::io::repeat(1));
        timeout(WAIT, handle.ready()).await.unwrap();

        driver.leave();
        assert!(matches!(
            next_event(&driver).await,
            DriverEvent::Disconnect(_)
        ));

        // An endless source only ends once its fill loop is cancelled.
        assert!(timeout(WAIT, handle.finished()).await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn ring_smaller_than_a_frame_still_plays() {
        let relay = FakeRelay::bind().await;
        let config = config(&relay).ring_buffer_capacity(16);
        let (mut driver, _conn) = connected_with(&relay, 18, config).await;

        let handle = driver.play(noise(2));

        let packets = [next_packet(&relay).await, next_packet(&relay).await];
        assert!(packets.iter().all(|(_, _, opus)| opus[..] != SILENT_FRAME));
        assert_eq!(
            timeout(WAIT, handle.finished()).await.unwrap().unwrap(),
            (2 * STEREO_FRAME_SIZE * 2) as u64
        );
    }

    #[tokio::test]
    async fn leave_abandons_slow_reconnect() {
        let relay = FakeRelay::bind().await;
        let config = config(&relay).driver_retry(Retry {
            strategy: Strategy::Every(Duration::from_secs(30)),
            retry_limit: Some(3),
        });
        let (mut driver, mut conn) = connected_with(&relay, 19, config).await;

        conn.close(CloseCode::Library(4015)).await;
        // Let the core begin waiting out its first backoff.
        tokio::time::sleep(Duration::from_millis(200)).await;

        driver.leave();

        match next_event(&driver).await {
            DriverEvent::Disconnect(data) => {
                assert_eq!(data.kind, DisconnectKind::Reconnect);
                assert_eq!(data.reason, None);
            },
            other => panic!("expected disconnect, saw {other:?}"),
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(driver.events().is_empty());
    }
}
