use crate::{
    constants::SAMPLE_RATE_RAW,
    driver::{MixMode, SampleFormat},
};
use std::{
    ffi::OsStr,
    io::{Error as IoError, ErrorKind, Read, Result as IoResult},
    mem,
    process::{Child, Command, Stdio},
};
use tokio::runtime::Handle;
use tracing::debug;

/// Handle for a child process which ensures that any subprocesses are properly closed
/// on drop.
///
/// # Warning
/// To allow proper cleanup of child processes, if you create a process chain you must
/// make sure to use `From<Vec<Child>>`. Here, the *last* process in the `Vec` will be
/// used as the audio byte source.
#[derive(Debug)]
pub struct ChildContainer(Vec<Child>);

impl ChildContainer {
    /// Create a new [`ChildContainer`] from a chain of child processes.
    #[must_use]
    pub fn new(children: Vec<Child>) -> Self {
        Self(children)
    }
}

impl From<Child> for ChildContainer {
    fn from(container: Child) -> Self {
        Self(vec![container])
    }
}

impl From<Vec<Child>> for ChildContainer {
    fn from(container: Vec<Child>) -> Self {
        Self(container)
    }
}

impl Read for ChildContainer {
    fn read(&mut self, buffer: &mut [u8]) -> IoResult<usize> {
        match self.0.last_mut() {
            Some(child) => match child.stdout.as_mut() {
                Some(stdout) => stdout.read(buffer),
                None => Err(IoError::new(
                    ErrorKind::BrokenPipe,
                    "child process has no piped stdout",
                )),
            },
            None => Ok(0),
        }
    }
}

impl Drop for ChildContainer {
    fn drop(&mut self) {
        let children = mem::take(&mut self.0);

        if let Ok(handle) = Handle::try_current() {
            handle.spawn_blocking(move || {
                cleanup_child_processes(children);
            });
        } else {
            cleanup_child_processes(children);
        }
    }
}

fn cleanup_child_processes(mut children: Vec<Child>) {
    let attempt = if let Some(child) = children.last_mut() {
        child.kill()
    } else {
        return;
    };

    let attempt = attempt.and_then(|()| {
        children
            .iter_mut()
            .rev()
            .try_for_each(|child| child.wait().map(|_| ()))
    });

    if let Err(e) = attempt {
        debug!("Error awaiting child process: {:?}", e);
    }
}

/// Opens an audio file through `ffmpeg`, producing stereo `f32` PCM at 48kHz.
///
/// This matches the driver's default [`Config`].
///
/// [`Config`]: crate::Config
pub fn ffmpeg<P: AsRef<OsStr>>(path: P) -> IoResult<ChildContainer> {
    ffmpeg_with(path, SampleFormat::F32, MixMode::Stereo)
}

/// Opens an audio file through `ffmpeg`, producing raw PCM in the given layout at 48kHz.
pub fn ffmpeg_with<P: AsRef<OsStr>>(
    path: P,
    format: SampleFormat,
    mix_mode: MixMode,
) -> IoResult<ChildContainer> {
    let channels = mix_mode.channels().to_string();
    let rate = SAMPLE_RATE_RAW.to_string();

    let command = Command::new("ffmpeg")
        .args(["-nostdin", "-i"])
        .arg(path)
        .args([
            "-vn",
            "-f",
            format.ffmpeg_name(),
            "-ac",
            &channels,
            "-ar",
            &rate,
            "-acodec",
            &format!("pcm_{}", format.ffmpeg_name()),
            "-",
        ])
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .stdout(Stdio::piped())
        .spawn()?;

    Ok(command.into())
}
