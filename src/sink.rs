//! Deferred log output.
//!
//! A [`LogSink`] sits between arbitrary log producers and the terminal. Writes are queued
//! instead of printed, and the render loop drains the queue at frame boundaries so log
//! lines always land above the bars and never in the middle of a frame.
//!
//! # Backpressure
//!
//! The queue is bounded. When it is full, a producer's write blocks until the render loop
//! drains it: slow drains stall producers rather than lose lines. The one exception is the
//! render loop's own thread, which is the only drainer and therefore must never block on
//! its own queue; writes issued from that thread are dropped when the queue is full.
//!
//! # After the render loop stops
//!
//! Once a render loop shuts down, its sink switches to pass-through: anything still queued
//! is flushed and further writes go straight to standard output, so producers that keep
//! logging never block on a queue nobody drains. Starting a loop switches it back.
//!
//! # Logging integration
//!
//! `LogSink` implements [`std::io::Write`] and [`MakeWriter`], so it can be handed to
//! anything that logs through a writer:
//!
//! ```no_run
//! use nested_progress::ProgressBar;
//!
//! let root = ProgressBar::new("build");
//! tracing_subscriber::fmt().with_writer(root.sink()).init();
//! ```

use std::{
    cell::Cell,
    fmt,
    io::{self, Write},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, SyncSender, TryRecvError, TrySendError},
    },
};

use parking_lot::Mutex;
use tracing_subscriber::fmt::MakeWriter;

/// Number of pending entries a default sink holds before writers block.
pub const DEFAULT_CAPACITY: usize = 1000;

thread_local! {
    static DRAINER_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// Marks the calling thread as the one that drains sinks.
pub(crate) fn mark_drainer_thread() {
    DRAINER_THREAD.with(|flag| flag.set(true));
}

fn on_drainer_thread() -> bool {
    DRAINER_THREAD.with(Cell::get)
}

/// A bounded, cloneable FIFO of pending log output.
///
/// Every clone refers to the same queue; a bar tree shares a single sink from the root
/// down through all of its descendants.
#[derive(Clone)]
pub struct LogSink {
    tx: SyncSender<Vec<u8>>,
    rx: Arc<Mutex<Receiver<Vec<u8>>>>,
    passthrough: Arc<AtomicBool>,
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSink").finish_non_exhaustive()
    }
}

impl LogSink {
    /// Creates a sink holding up to [`DEFAULT_CAPACITY`] pending entries.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a sink holding up to `capacity` pending entries.
    ///
    /// A capacity of zero turns every write into a rendezvous with the drainer.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, rx) = mpsc::sync_channel(capacity);
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            passthrough: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Queues one entry, blocking while the queue is full.
    ///
    /// In pass-through mode the queue is flushed and the entry written to standard output
    /// instead.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::BrokenPipe`] if the queue has been torn down, or the error
    /// from standard output in pass-through mode.
    pub fn push(&self, entry: impl Into<Vec<u8>>) -> io::Result<()> {
        let entry = entry.into();
        if self.is_passthrough() {
            // Queue before stdout, the same order the render loop drains in.
            let rx = self.rx.lock();
            let mut stdout = io::stdout().lock();
            drain_receiver(&rx, &mut stdout)?;
            stdout.write_all(&entry)?;
            return stdout.flush();
        }
        if on_drainer_thread() {
            return match self.tx.try_send(entry) {
                Ok(()) | Err(TrySendError::Full(_)) => Ok(()),
                Err(TrySendError::Disconnected(_)) => Err(broken_pipe()),
            };
        }
        self.tx.send(entry).map_err(|_| broken_pipe())
    }

    /// Writes every currently queued entry to `out`, oldest first.
    ///
    /// Returns the number of entries written. Never waits for new entries: an empty queue
    /// returns `Ok(0)` immediately.
    ///
    /// # Errors
    ///
    /// Propagates the first write error from `out`. Entries already taken off the queue
    /// before the failure are not re-queued.
    pub fn drain_into<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<usize> {
        drain_receiver(&self.rx.lock(), out)
    }

    /// Switches between deferred (queued) and pass-through output.
    pub(crate) fn set_passthrough(&self, passthrough: bool) {
        self.passthrough.store(passthrough, Ordering::Release);
    }

    /// Returns `true` once writes bypass the queue.
    #[must_use]
    pub fn is_passthrough(&self) -> bool {
        self.passthrough.load(Ordering::Acquire)
    }

    /// Returns `true` if both handles refer to the same queue.
    #[must_use]
    pub fn same_queue(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.rx, &other.rx)
    }
}

fn drain_receiver<W: Write + ?Sized>(rx: &Receiver<Vec<u8>>, out: &mut W) -> io::Result<usize> {
    let mut written = 0;
    loop {
        match rx.try_recv() {
            Ok(entry) => {
                out.write_all(&entry)?;
                written += 1;
            }
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => return Ok(written),
        }
    }
}

fn broken_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "log sink closed")
}

impl Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Write::write(&mut &*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Write for &LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.push(buf)?;
        Ok(buf.len())
    }

    // Queued output is emitted by the render loop, not by the writer.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogSink {
    type Writer = &'a LogSink;

    fn make_writer(&'a self) -> Self::Writer {
        self
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Write as _, thread, time::Duration};

    use super::LogSink;

    /// FIFO Drain
    /// Entries come out in the order they were written.
    #[test]
    fn test_drain_preserves_order() {
        let mut sink = LogSink::new();
        writeln!(sink, "first").unwrap();
        writeln!(sink, "second").unwrap();
        sink.push("third\n").unwrap();

        let mut out = Vec::new();
        assert_eq!(sink.drain_into(&mut out).unwrap(), 3);
        assert_eq!(String::from_utf8(out).unwrap(), "first\nsecond\nthird\n");
    }

    /// Empty Drain
    /// Draining an empty queue returns immediately with nothing written.
    #[test]
    fn test_drain_empty_returns_immediately() {
        let sink = LogSink::new();
        let mut out = Vec::new();
        assert_eq!(sink.drain_into(&mut out).unwrap(), 0);
        assert!(out.is_empty());
    }

    /// Shared Queue
    /// Clones write into and drain from the same queue.
    #[test]
    fn test_clones_share_queue() {
        let sink = LogSink::new();
        let mut clone = sink.clone();
        assert!(sink.same_queue(&clone));
        assert!(!sink.same_queue(&LogSink::new()));

        clone.write_all(b"from clone\n").unwrap();

        let mut out = Vec::new();
        sink.drain_into(&mut out).unwrap();
        assert_eq!(out, b"from clone\n");
    }

    /// Backpressure
    /// A writer blocks on a full queue and resumes once it is drained; nothing is lost.
    #[test]
    fn test_full_queue_blocks_writer() {
        let sink = LogSink::with_capacity(1);
        sink.push("a").unwrap();

        let producer = {
            let sink = sink.clone();
            thread::spawn(move || sink.push("b").unwrap())
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!producer.is_finished(), "second write should be blocked");

        let mut out = Vec::new();
        sink.drain_into(&mut out).unwrap();
        producer.join().unwrap();
        sink.drain_into(&mut out).unwrap();

        assert_eq!(out, b"ab");
    }

    /// Drainer Thread
    /// Writes issued from the draining thread drop instead of blocking when full.
    #[test]
    fn test_drainer_thread_never_blocks() {
        let sink = LogSink::with_capacity(1);
        let handle = {
            let sink = sink.clone();
            thread::spawn(move || {
                super::mark_drainer_thread();
                sink.push("kept").unwrap();
                sink.push("dropped").unwrap();
            })
        };
        handle.join().unwrap();

        let mut out = Vec::new();
        sink.drain_into(&mut out).unwrap();
        assert_eq!(out, b"kept");
    }

    /// Pass-through
    /// With no drainer left, a full queue is flushed and writes complete instead of blocking.
    #[test]
    fn test_passthrough_never_blocks() {
        let sink = LogSink::with_capacity(1);
        sink.push("queued before shutdown\n").unwrap();
        sink.set_passthrough(true);
        assert!(sink.is_passthrough());

        let producer = {
            let sink = sink.clone();
            thread::spawn(move || {
                for i in 0..5 {
                    sink.push(format!("after shutdown {i}\n")).unwrap();
                }
            })
        };

        for _ in 0..300 {
            if producer.is_finished() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(producer.is_finished(), "writer blocked in pass-through mode");
        producer.join().unwrap();

        let mut out = Vec::new();
        assert_eq!(sink.drain_into(&mut out).unwrap(), 0, "queue was flushed");

        sink.set_passthrough(false);
        sink.push("deferred again").unwrap();
        sink.drain_into(&mut out).unwrap();
        assert_eq!(out, b"deferred again");
    }

    /// Tracing Integration
    /// A fmt subscriber pointed at the sink queues its events instead of printing them.
    #[test]
    fn test_tracing_writer() {
        let sink = LogSink::new();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(sink.clone())
            .with_ansi(false)
            .without_time()
            .with_target(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("hello from tracing");
        });

        let mut out = Vec::new();
        assert_eq!(sink.drain_into(&mut out).unwrap(), 1);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("hello from tracing"), "got {text:?}");
    }
}
