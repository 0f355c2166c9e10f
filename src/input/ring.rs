//! Fixed-capacity single-producer, single-consumer byte ring.
//!
//! Positions are free-running counters: `write - read` is always the number of
//! buffered bytes, so the whole capacity is usable without an empty/full
//! ambiguity. Each side owns one counter, publishing it with a release store
//! after copying data and reading the other side's with an acquire load. A stale
//! view can therefore only cause a short read or a short write.

use std::{
    cell::UnsafeCell,
    ptr,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

struct Shared {
    buf: Box<[UnsafeCell<u8>]>,
    read: AtomicUsize,
    write: AtomicUsize,
    stopped: AtomicBool,
}

// SAFETY: the writer only touches bytes outside `read..write`, and the reader
// only bytes inside it. Each region changes hands via the release/acquire pair
// on the owning side's counter.
unsafe impl Sync for Shared {}

impl Shared {
    fn capacity(&self) -> usize {
        self.buf.len()
    }

    fn base(&self) -> *mut u8 {
        UnsafeCell::raw_get(self.buf.as_ptr())
    }

    fn content_len(&self) -> usize {
        let write = self.write.load(Ordering::Acquire);
        let read = self.read.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }
}

/// Creates a ring holding up to `capacity` bytes, split into its two halves.
///
/// A capacity of zero is raised to one byte.
#[must_use]
pub fn ring(capacity: usize) -> (RingWriter, RingReader) {
    let shared = Arc::new(Shared {
        buf: (0..capacity.max(1)).map(|_| UnsafeCell::new(0)).collect(),
        read: AtomicUsize::new(0),
        write: AtomicUsize::new(0),
        stopped: AtomicBool::new(false),
    });

    (
        RingWriter {
            shared: shared.clone(),
        },
        RingReader { shared },
    )
}

/// Producer half of a ring.
///
/// Dropping the writer stops the ring: no more data will arrive, and the reader
/// may drain whatever remains.
pub struct RingWriter {
    shared: Arc<Shared>,
}

impl RingWriter {
    /// Copies as much of `data` as fits into the ring, returning the number
    /// of bytes written.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let shared = &*self.shared;
        let cap = shared.capacity();
        let write = shared.write.load(Ordering::Relaxed);
        let read = shared.read.load(Ordering::Acquire);

        let free = cap - write.wrapping_sub(read);
        let len = data.len().min(free);
        let start = write % cap;
        let first = len.min(cap - start);

        // SAFETY: `start..start + first` and `0..len - first` lie within the free
        // region, which the reader will not touch until `write` is published.
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), shared.base().add(start), first);
            ptr::copy_nonoverlapping(data.as_ptr().add(first), shared.base(), len - first);
        }

        shared.write.store(write.wrapping_add(len), Ordering::Release);

        len
    }

    /// Returns the number of bytes which can currently be written.
    #[must_use]
    pub fn free_space(&self) -> usize {
        self.shared.capacity() - self.shared.content_len()
    }

    /// Returns the total size of the ring.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    /// Returns whether the reader has asked for filling to stop.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }
}

impl Drop for RingWriter {
    fn drop(&mut self) {
        self.shared.stopped.store(true, Ordering::Release);
    }
}

/// Consumer half of a ring.
pub struct RingReader {
    shared: Arc<Shared>,
}

impl RingReader {
    /// Copies up to `out.len()` buffered bytes into `out`, returning the number read.
    ///
    /// A return of `0` means the ring is empty *right now*: check [`is_stopped`]
    /// to learn whether more data may follow.
    ///
    /// [`is_stopped`]: Self::is_stopped
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let shared = &*self.shared;
        let cap = shared.capacity();
        let read = shared.read.load(Ordering::Relaxed);
        let write = shared.write.load(Ordering::Acquire);

        let len = out.len().min(write.wrapping_sub(read));
        let start = read % cap;
        let first = len.min(cap - start);

        // SAFETY: `start..start + first` and `0..len - first` lie within the
        // published region, which the writer will not touch until `read` moves on.
        unsafe {
            ptr::copy_nonoverlapping(shared.base().add(start), out.as_mut_ptr(), first);
            ptr::copy_nonoverlapping(shared.base(), out.as_mut_ptr().add(first), len - first);
        }

        shared.read.store(read.wrapping_add(len), Ordering::Release);

        len
    }

    /// Returns the number of bytes which can currently be read.
    #[must_use]
    pub fn content_len(&self) -> usize {
        self.shared.content_len()
    }

    /// Returns the number of bytes the writer can currently add.
    #[must_use]
    pub fn free_space(&self) -> usize {
        self.shared.capacity() - self.shared.content_len()
    }

    /// Returns the total size of the ring.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    /// Signals that no more data is wanted. Reads still drain what remains.
    ///
    /// This cannot be undone, other than by [`reset`].
    ///
    /// [`reset`]: Self::reset
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::Release);
    }

    /// Returns whether the ring has been stopped, by either half.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    /// Empties and rewinds the ring for reuse, returning a fresh writer.
    ///
    /// Returns `None` while the previous writer is still alive.
    pub fn reset(&mut self) -> Option<RingWriter> {
        let shared = Arc::get_mut(&mut self.shared)?;

        *shared.read.get_mut() = 0;
        *shared.write.get_mut() = 0;
        *shared.stopped.get_mut() = false;

        Some(RingWriter {
            shared: self.shared.clone(),
        })
    }
}
