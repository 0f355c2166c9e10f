#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
//! Warbler is an async client for sending real-time voice to a voice relay server.
//!
//! Given the session details handed out by an application's main gateway
//! (a [`ConnectionInfo`]), a [`Driver`]:
//!  * opens the relay's WebSocket control channel, identifies or resumes a
//!  session, keeps it alive with heartbeats, and negotiates encryption;
//!  * discovers its external address over UDP, then sends Opus-encoded,
//!  secretbox-encrypted RTP packets every 20ms;
//!  * buffers raw PCM from any [`Read`] source through a lock-free ring buffer,
//!  so that slow sources never stall packet pacing.
//!
//! Session changes are reported as [`DriverEvent`]s. Lost sessions are resumed
//! automatically according to [`Config::driver_retry`].
//!
//! ```no_run
//! use warbler::{Config, ConnectionInfo, Driver};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut driver = Driver::new(Config::default());
//! let info = ConnectionInfo::new(
//!     1_234_u64,
//!     5_678_u64,
//!     "session-id",
//!     "voice-token",
//!     "relay.example.com",
//! );
//!
//! driver.connect(info).await?;
//!
//! let source = warbler::input::ffmpeg("song.flac")?;
//! let playback = driver.play(source);
//! playback.finished().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Codec support
//! Opus encoding is provided by [audiopus] (an FFI wrapper for libopus). Sources
//! must already be decoded to 48kHz PCM; [`input::ffmpeg`] spawns an external
//! transcoder for anything else.
//!
//! [`Read`]: std::io::Read
//! [audiopus]: https://github.com/lakelezz/audiopus

#![warn(clippy::pedantic)]
#![allow(
    // Allowed as they are too pedantic
    clippy::module_name_repetitions,
    clippy::wildcard_imports,
    clippy::too_many_lines,
    clippy::cast_lossless,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    // TODO: would require significant rewriting of all existing docs
    clippy::missing_errors_doc,
)]

mod config;
pub mod constants;
pub mod driver;
pub mod error;
pub mod events;
pub mod id;
pub(crate) mod info;
pub mod input;
pub mod model;
mod ws;

pub use crate::{driver::Driver, events::DriverEvent};

pub use config::Config;
pub use info::ConnectionInfo;
