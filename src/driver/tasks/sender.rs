use super::{
    error::{Error, Result},
    message::*,
};
use crate::{
    constants::*,
    driver::{codec::EncoderParam, transport::VoiceTransport},
    input::ring::RingReader,
    Config,
};
use flume::{Receiver, Sender, TryRecvError};
use std::time::{Duration, Instant};
use tracing::{debug, error, instrument, trace, warn};

/// What the sender produced for one 20ms slot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Pulled {
    /// A full frame of PCM is waiting in the frame buffer.
    Frame,
    /// No audio was available in time.
    Underrun,
}

/// Paces audio from the active track onto the voice transport, one frame every 20ms.
///
/// This runs on its own thread: encoding, encryption and UDP sends are all blocking.
pub(crate) struct FrameSender {
    config: Config,
    interconnect: Interconnect,
    rx: Receiver<SenderMessage>,
    transport: VoiceTransport,

    track: Option<RingReader>,
    frame: Vec<u8>,

    muted: bool,
    silence_frames: u8,
    speaking: bool,
    ws: Option<Sender<WsMessage>>,

    deadline: Instant,
}

impl FrameSender {
    pub(crate) fn new(
        config: Config,
        transport: VoiceTransport,
        interconnect: Interconnect,
        rx: Receiver<SenderMessage>,
    ) -> Self {
        let frame = vec![0u8; transport.frame_len()];

        Self {
            config,
            interconnect,
            rx,
            transport,

            track: None,
            frame,

            muted: false,
            silence_frames: 0,
            speaking: false,
            ws: None,

            deadline: Instant::now(),
        }
    }

    fn run(&mut self) {
        let mut conn_failure = false;

        'runner: loop {
            if self.transport.is_connected() {
                loop {
                    match self.rx.try_recv() {
                        Ok(m) =>
                            if self.handle_message(m) {
                                break 'runner;
                            },
                        Err(TryRecvError::Disconnected) => break 'runner,
                        Err(TryRecvError::Empty) => break,
                    }
                }

                // The above may have removed the connection.
                if self.transport.is_connected() {
                    if let Err(e) = self.cycle().or_else(Error::disarm_would_block) {
                        conn_failure |= e.should_end_session();
                        debug!("Frame sender cycle: {:?}", e);
                    }
                }
            } else {
                match self.rx.recv() {
                    Ok(m) =>
                        if self.handle_message(m) {
                            break 'runner;
                        },
                    Err(_) => break 'runner,
                }
            }

            if conn_failure {
                conn_failure = false;
                self.transport.drop_connection();
                self.speaking = false;

                if self.interconnect.core.send(CoreMessage::SenderFailed).is_err() {
                    break;
                }
            }
        }
    }

    /// Applies one control message, returning whether the thread should exit.
    fn handle_message(&mut self, msg: SenderMessage) -> bool {
        match msg {
            SenderMessage::SetTrack(t) => {
                self.track = t;
            },
            SenderMessage::SetBitrate(b) =>
                if let Err(e) = self.transport.set_encoder_param(EncoderParam::Bitrate(b)) {
                    error!("Failed to update bitrate {:?}", e);
                },
            SenderMessage::SetMute(m) => {
                self.muted = m;
            },
            SenderMessage::SetConn(conn) => {
                self.transport.set_connection(conn);
                self.silence_frames = 0;
                self.deadline = Instant::now();
            },
            SenderMessage::Ws(ws) => {
                self.ws = ws;
                self.speaking = false;
            },
            SenderMessage::DropConn => {
                self.transport.drop_connection();
                self.ws = None;
                self.speaking = false;
            },
            SenderMessage::Poison => return true,
        }

        false
    }

    /// Moves the next frame of the active track into the frame buffer.
    ///
    /// A track whose writer has stopped is drained, with its last partial frame
    /// padded out with silence, and then removed.
    fn pull_frame(&mut self) -> Pulled {
        let Some(track) = self.track.as_mut() else {
            return Pulled::Underrun;
        };

        // Check for stop before length, so a final write is never missed.
        let stopped = track.is_stopped();
        let available = track.content_len();
        let frame_len = self.frame.len();

        if available >= frame_len {
            track.read(&mut self.frame[..]);
            return Pulled::Frame;
        }

        if !stopped {
            trace!("Track underrun: {available}B of {frame_len}B buffered.");
            return Pulled::Underrun;
        }

        let read = track.read(&mut self.frame[..available]);
        self.frame[read..].fill(0);
        self.track = None;
        debug!("Track finished.");

        if read > 0 {
            Pulled::Frame
        } else {
            Pulled::Underrun
        }
    }

    pub(crate) fn cycle(&mut self) -> Result<()> {
        let mut pulled = self.pull_frame();

        if self.muted {
            pulled = Pulled::Underrun;
        }

        match pulled {
            Pulled::Frame => {
                self.silence_frames = self.config.silence_frames;
                self.set_speaking(true);

                self.march_deadline();
                self.transport.send_pcm_frame(&self.frame)?;
            },
            Pulled::Underrun if self.silence_frames > 0 => {
                self.silence_frames -= 1;

                self.march_deadline();
                self.transport.send_opus_frame(&SILENT_FRAME)?;
            },
            Pulled::Underrun => {
                // Silence has been flushed out: only now do we stop speaking.
                self.set_speaking(false);
                self.march_deadline();
            },
        }

        Ok(())
    }

    fn set_speaking(&mut self, speaking: bool) {
        if self.speaking == speaking {
            return;
        }

        if let Some(ws) = &self.ws {
            // A dead session task is cleaned up by the core, which hands us a new channel.
            if ws.send(WsMessage::Speaking(speaking)).is_ok() {
                self.speaking = speaking;
            }
        }
    }

    fn march_deadline(&mut self) {
        let now = Instant::now();

        if let Some(wait) = self.deadline.checked_duration_since(now) {
            std::thread::sleep(wait);
        } else {
            let missed = frames_behind(now - self.deadline);
            if missed > 0 {
                warn!("Frame sender fell {missed} frame(s) behind; skipping ahead.");
                self.deadline += TIMESTEP_LENGTH * missed;
            }
        }

        self.deadline += TIMESTEP_LENGTH;
    }
}

fn frames_behind(lateness: Duration) -> u32 {
    u32::try_from(lateness.as_nanos() / TIMESTEP_LENGTH.as_nanos()).unwrap_or(u32::MAX)
}

/// The frame sender is a synchronous context, owing to its blocking sends and fixed cadence.
#[instrument(skip(interconnect, rx, transport))]
pub(crate) fn runner(
    interconnect: Interconnect,
    rx: Receiver<SenderMessage>,
    transport: VoiceTransport,
    config: Config,
) {
    let mut sender = FrameSender::new(config, transport, interconnect, rx);

    sender.run();
}
