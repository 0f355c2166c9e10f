use super::ring::RingWriter;
use crate::{constants::*, Config};
use std::{
    error::Error as StdError,
    fmt,
    io::{Error as IoError, ErrorKind, Read},
    time::Duration,
};
use tokio::task::{self, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, trace};

/// Errors which end a fill loop early.
#[derive(Debug)]
#[non_exhaustive]
pub enum BufferError {
    /// The audio source failed to produce data.
    Source(IoError),
    /// The fill loop's task panicked or was aborted.
    TaskFailed,
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to buffer audio: ")?;
        match self {
            Self::Source(e) => write!(f, "source error ({e})"),
            Self::TaskFailed => write!(f, "fill task did not complete"),
        }
    }
}

impl StdError for BufferError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Source(e) => Some(e),
            Self::TaskFailed => None,
        }
    }
}

/// Tuning of a fill loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FillOptions {
    /// Number of bytes requested from the source per read.
    ///
    /// This is clamped to the ring's capacity.
    pub chunk_size: usize,
    /// Delay between checks for free space when the ring is full.
    pub poll_interval: Duration,
}

impl Default for FillOptions {
    fn default() -> Self {
        Self {
            chunk_size: STEREO_FRAME_SIZE * 4,
            poll_interval: FILL_POLL_INTERVAL,
        }
    }
}

impl From<&Config> for FillOptions {
    fn from(config: &Config) -> Self {
        Self {
            chunk_size: config.fill_chunk_size,
            poll_interval: config.fill_poll_interval,
        }
    }
}

/// Handle to a running fill loop.
#[derive(Debug)]
pub struct BufferHandle {
    ready: flume::Receiver<()>,
    task: JoinHandle<Result<u64, BufferError>>,
}

impl BufferHandle {
    /// Waits until any data has been buffered, or until buffering has ended.
    pub async fn ready(&self) {
        // The sender is dropped when the loop exits, so this never hangs.
        let _ = self.ready.recv_async().await;
    }

    /// Returns whether the fill loop has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the fill loop to exit, yielding the number of bytes buffered.
    pub async fn finished(self) -> Result<u64, BufferError> {
        self.task.await.map_err(|_| BufferError::TaskFailed)?
    }
}

/// Starts copying PCM bytes from `source` into a ring on the blocking thread pool.
///
/// The loop reads one chunk at a time, then waits for room to write all of it.
/// It exits on end-of-stream (`Ok(0)`), a source error, cancellation, or once the
/// ring is stopped. The writer is dropped on exit, which stops the ring.
///
/// This must be called from within a tokio runtime.
pub fn buffer_async<R>(
    source: R,
    writer: RingWriter,
    options: FillOptions,
    cancel: CancellationToken,
) -> BufferHandle
where
    R: Read + Send + 'static,
{
    let (ready_tx, ready_rx) = flume::bounded(1);

    let task = task::spawn_blocking(move || {
        trace!("Fill loop started.");
        let out = fill(source, writer, options, &cancel, ready_tx);
        trace!("Fill loop finished.");
        out
    });

    BufferHandle {
        ready: ready_rx,
        task,
    }
}

#[instrument(skip_all)]
fn fill<R: Read>(
    mut source: R,
    mut writer: RingWriter,
    options: FillOptions,
    cancel: &CancellationToken,
    ready: flume::Sender<()>,
) -> Result<u64, BufferError> {
    let chunk_size = options.chunk_size.clamp(1, writer.capacity());
    let mut chunk = vec![0u8; chunk_size];
    let mut ready = Some(ready);
    let mut total = 0u64;

    let should_exit = |writer: &RingWriter| cancel.is_cancelled() || writer.is_stopped();

    loop {
        if should_exit(&writer) {
            debug!("Fill loop stopped after {total}B.");
            return Ok(total);
        }

        let len = match source.read(&mut chunk) {
            Ok(0) => {
                debug!("Source finished after {total}B.");
                return Ok(total);
            },
            Ok(len) => len,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                error!("Audio source failed: {e:?}");
                return Err(BufferError::Source(e));
            },
        };

        while writer.free_space() < len {
            if should_exit(&writer) {
                debug!("Fill loop stopped after {total}B.");
                return Ok(total);
            }
            std::thread::sleep(options.poll_interval);
        }

        let written = writer.write(&chunk[..len]);
        total += written as u64;

        if let Some(tx) = ready.take() {
            let _ = tx.send(());
        }
    }
}
