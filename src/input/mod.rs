//! Raw PCM audio sources, and their buffering ahead of the frame sender.
//!
//! Any [`Read`] type producing little-endian PCM in the driver's configured
//! [`SampleFormat`] and [`MixMode`] can be played. Bytes are pulled into a
//! fixed-size [`ring`] by a fill loop on tokio's blocking thread pool, so that a
//! slow source never stalls packet transmission. [`ffmpeg`] spawns a transcoder
//! whose output is such a source.
//!
//! [`Read`]: std::io::Read
//! [`SampleFormat`]: crate::driver::SampleFormat
//! [`MixMode`]: crate::driver::MixMode

mod buffered;
mod child;
pub mod ring;

pub use self::{
    buffered::{buffer_async, BufferError, BufferHandle, FillOptions},
    child::{ffmpeg, ffmpeg_with, ChildContainer},
};

use tokio_util::sync::CancellationToken;

/// Control handle for one playback started by [`Driver::play`].
///
/// Dropping this handle does not stop playback.
///
/// [`Driver::play`]: crate::Driver::play
#[derive(Debug)]
pub struct PlaybackHandle {
    buffer: BufferHandle,
    cancel: CancellationToken,
}

impl PlaybackHandle {
    pub(crate) fn new(buffer: BufferHandle, cancel: CancellationToken) -> Self {
        Self { buffer, cancel }
    }

    /// Waits until the first audio has been buffered, or the source has ended.
    pub async fn ready(&self) {
        self.buffer.ready().await;
    }

    /// Stops pulling from the source.
    ///
    /// Audio which has already been buffered is still sent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Returns whether the source has been fully read, has failed, or was stopped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.buffer.is_finished()
    }

    /// Waits for the source to be exhausted, returning the number of bytes buffered
    /// or the error which ended it.
    pub async fn finished(self) -> Result<u64, BufferError> {
        self.buffer.finished().await
    }
}
