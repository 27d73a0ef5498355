//! Background repainting of a progress tree.
//!
//! A [`RenderLoop`] owns the terminal writer on a dedicated thread. On every tick it lays
//! out the tree, moves the cursor back over the previous frame, clears to the end of the
//! screen, drains the tree's [`LogSink`] and writes the new frame. Nothing else writes to
//! the terminal while it runs, so log lines always end up above the bars.
//!
//! Only one loop may run per process. Dropping the [`RenderHandle`] detaches the loop,
//! which then runs until the process exits; [`RenderHandle::stop`] shuts it down after a
//! final frame and switches the tree's sink to pass-through so later log writes still
//! reach the terminal.

use std::{
    io::{self, Write},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossterm::{
    cursor::MoveUp,
    queue,
    terminal::{self, Clear, ClearType},
};
use parking_lot::{Condvar, Mutex};
use web_time::Instant;

use crate::{
    bar::ProgressBar,
    error::{Error, Result},
    render::render_tree,
    sink::{self, LogSink},
};

/// Time between frames.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

/// Width assumed when the terminal cannot report its size.
pub const DEFAULT_FALLBACK_WIDTH: u16 = 80;

static ACTIVE: AtomicBool = AtomicBool::new(false);

/// Settings for a [`RenderLoop`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RenderConfig {
    interval: Duration,
    width: Option<u16>,
    fallback_width: u16,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            width: None,
            fallback_width: DEFAULT_FALLBACK_WIDTH,
        }
    }
}

impl RenderConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the time between frames.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Uses a fixed width instead of querying the terminal.
    #[must_use]
    pub const fn with_width(mut self, width: u16) -> Self {
        self.width = Some(width);
        self
    }

    /// Sets the width used when the terminal size is unavailable.
    #[must_use]
    pub const fn with_fallback_width(mut self, width: u16) -> Self {
        self.fallback_width = width;
        self
    }

    /// Returns the time between frames.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Resolves the width to lay frames out for.
    ///
    /// A fixed width wins; otherwise the terminal is queried, and a failed or zero-column
    /// answer falls back to the configured minimum.
    #[must_use]
    pub fn terminal_width(&self) -> usize {
        let detected = self
            .width
            .or_else(|| terminal::size().ok().map(|(columns, _)| columns))
            .filter(|columns| *columns > 0);
        usize::from(detected.unwrap_or(self.fallback_width))
    }
}

/// Paints frames over one another on an ANSI stream.
///
/// Tracks how many rows the last frame used so the next one can overwrite it in place.
pub struct FramePainter<W> {
    out: W,
    rows: usize,
}

impl<W: Write> FramePainter<W> {
    /// Creates a painter that has not drawn anything yet.
    pub const fn new(out: W) -> Self {
        Self { out, rows: 0 }
    }

    /// Rows drawn by the most recent frame.
    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    /// Replaces the previous frame with `lines`, emitting pending log output above them.
    ///
    /// # Errors
    ///
    /// Returns the first I/O error from the underlying writer or the sink drain.
    pub fn paint(&mut self, lines: &[String], sink: &LogSink) -> io::Result<()> {
        if self.rows > 0 {
            let rows = u16::try_from(self.rows).unwrap_or(u16::MAX);
            queue!(self.out, MoveUp(rows))?;
        }
        queue!(self.out, Clear(ClearType::FromCursorDown))?;
        // The old frame is gone; a failed write below must not make the next tick move up
        // over log output.
        self.rows = 0;

        sink.drain_into(&mut self.out)?;

        for line in lines {
            writeln!(self.out, "{line}")?;
        }
        self.rows = lines.len();
        self.out.flush()
    }

    /// Writes pending log output below the last frame without repainting it.
    ///
    /// # Errors
    ///
    /// Returns the first I/O error from the writer.
    pub fn flush_logs(&mut self, sink: &LogSink) -> io::Result<usize> {
        let written = sink.drain_into(&mut self.out)?;
        self.out.flush()?;
        Ok(written)
    }

    /// Consumes the painter, returning the writer.
    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Builder for the background thread that repaints a progress tree.
pub struct RenderLoop<W> {
    root: ProgressBar,
    config: RenderConfig,
    out: W,
}

impl RenderLoop<io::Stdout> {
    /// Creates a loop that draws `root` to standard output.
    #[must_use]
    pub fn new(root: ProgressBar) -> Self {
        Self::with_writer(root, io::stdout())
    }
}

impl<W: Write + Send + 'static> RenderLoop<W> {
    /// Creates a loop that draws `root` to `out`.
    pub fn with_writer(root: ProgressBar, out: W) -> Self {
        Self {
            root,
            config: RenderConfig::default(),
            out,
        }
    }

    /// Replaces the loop's configuration.
    #[must_use]
    pub fn with_config(mut self, config: RenderConfig) -> Self {
        self.config = config;
        self
    }

    /// Starts the loop on a background thread.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyRunning`] if another loop is active in this process, or
    /// [`Error::Spawn`] if the thread could not be created.
    pub fn spawn(self) -> Result<RenderHandle> {
        if ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::AlreadyRunning);
        }

        let stop = Arc::new(StopSignal::default());
        let signal = Arc::clone(&stop);
        let Self { root, config, out } = self;

        let spawned = thread::Builder::new()
            .name("progress-render".into())
            .spawn(move || {
                let _active = ActiveGuard;
                run(&root, config, out, &signal);
            });

        match spawned {
            Ok(join) => Ok(RenderHandle {
                stop,
                join: Some(join),
            }),
            Err(e) => {
                ACTIVE.store(false, Ordering::Release);
                Err(Error::Spawn(e))
            }
        }
    }
}

impl ProgressBar {
    /// Starts the default render loop (stdout, 500 ms) for this tree.
    ///
    /// # Errors
    ///
    /// See [`RenderLoop::spawn`].
    pub fn start_render_loop(&self) -> Result<RenderHandle> {
        RenderLoop::new(self.clone()).spawn()
    }
}

/// Handle to a running render loop.
///
/// Dropping the handle leaves the loop running.
#[derive(Debug)]
pub struct RenderHandle {
    stop: Arc<StopSignal>,
    join: Option<JoinHandle<()>>,
}

impl RenderHandle {
    /// Returns `true` while the render thread is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|join| !join.is_finished())
    }

    /// Stops the loop after one final frame and waits for the thread to exit.
    ///
    /// Afterwards the tree's sink writes straight to standard output instead of queueing.
    pub fn stop(mut self) {
        self.stop.trigger();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                tracing::warn!("render thread panicked");
            }
        }
    }
}

#[derive(Debug, Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    cvar: Condvar,
}

impl StopSignal {
    /// Sleeps up to `timeout`, returning early if stopped. Returns whether stop was requested.
    fn wait(&self, timeout: Duration) -> bool {
        let mut stopped = self.stopped.lock();
        if !*stopped {
            self.cvar.wait_for(&mut stopped, timeout);
        }
        *stopped
    }

    fn trigger(&self) {
        *self.stopped.lock() = true;
        self.cvar.notify_all();
    }
}

/// Releases the process-wide slot when the render thread exits, including by panic.
struct ActiveGuard;

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        ACTIVE.store(false, Ordering::Release);
    }
}

fn run<W: Write>(root: &ProgressBar, config: RenderConfig, out: W, stop: &StopSignal) {
    sink::mark_drainer_thread();
    root.sink().set_passthrough(false);
    tracing::debug!(
        root = root.name(),
        interval = ?config.interval,
        "render loop started"
    );

    let mut painter = FramePainter::new(out);
    loop {
        let stopped = stop.wait(config.interval);
        draw_frame(root, &config, &mut painter);
        if stopped {
            break;
        }
    }

    // Nothing drains the queue from here on; flush what slipped in after the final frame.
    let sink = root.sink();
    sink.set_passthrough(true);
    if let Err(e) = painter.flush_logs(&sink) {
        tracing::warn!(error = %e, "failed to flush log output after final frame");
    }

    tracing::debug!(root = root.name(), "render loop stopped");
}

fn draw_frame<W: Write>(root: &ProgressBar, config: &RenderConfig, painter: &mut FramePainter<W>) {
    let lines = render_tree(
        root,
        root.name().chars().count(),
        config.terminal_width(),
        Instant::now(),
    );
    if let Err(e) = painter.paint(&lines, &root.sink()) {
        tracing::warn!(error = %e, "failed to draw progress frame");
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{self, Write},
        sync::Arc,
        thread,
        time::Duration,
    };

    use parking_lot::Mutex;
    use serial_test::serial;

    use super::{FramePainter, RenderConfig, RenderLoop};
    use crate::{bar::ProgressBar, error::Error, options::BarOptions, sink::LogSink};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().clone()).unwrap()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_owned()).collect()
    }

    /// First Frame
    /// Nothing to move over yet: clear, then the lines.
    #[test]
    fn test_first_frame_has_no_cursor_up() {
        let sink = LogSink::new();
        let mut painter = FramePainter::new(Vec::new());
        painter.paint(&lines(&["a", "b"]), &sink).unwrap();

        assert_eq!(painter.rows(), 2);
        assert_eq!(painter.into_inner(), b"\x1b[Ja\nb\n");
    }

    /// Repaint
    /// Later frames move up by the previous row count, clear, emit logs, then redraw.
    #[test]
    fn test_repaint_moves_up_and_flushes_logs_above() {
        let sink = LogSink::new();
        let mut painter = FramePainter::new(Vec::new());
        painter.paint(&lines(&["a", "b"]), &sink).unwrap();

        sink.push("log 1\n").unwrap();
        sink.push("log 2\n").unwrap();
        painter.paint(&lines(&["a", "b", "c"]), &sink).unwrap();
        painter.paint(&lines(&["a"]), &sink).unwrap();

        let out = String::from_utf8(painter.into_inner()).unwrap();
        assert_eq!(
            out,
            "\x1b[Ja\nb\n\
             \x1b[2A\x1b[Jlog 1\nlog 2\na\nb\nc\n\
             \x1b[3A\x1b[Ja\n"
        );
    }

    /// Empty Frame
    /// An empty frame still clears, and the next frame does not move up.
    #[test]
    fn test_empty_frame() {
        let sink = LogSink::new();
        let mut painter = FramePainter::new(Vec::new());
        painter.paint(&[], &sink).unwrap();
        painter.paint(&lines(&["x"]), &sink).unwrap();

        assert_eq!(painter.into_inner(), b"\x1b[J\x1b[Jx\n");
    }

    /// Width Override
    /// A fixed width wins over detection and the fallback.
    #[test]
    fn test_config_width_override() {
        let config = RenderConfig::new()
            .with_width(33)
            .with_fallback_width(10)
            .with_interval(Duration::from_millis(20));
        assert_eq!(config.terminal_width(), 33);
        assert_eq!(config.interval(), Duration::from_millis(20));
    }

    /// Background Loop
    /// Logs written while the loop runs come out in order, above the final frame.
    #[test]
    #[serial]
    fn test_loop_draws_frames_and_logs() {
        let root = ProgressBar::new("root");
        let child = root.add_sub_bar("child");
        let buf = SharedBuf::default();

        let handle = RenderLoop::with_writer(root.clone(), buf.clone())
            .with_config(
                RenderConfig::new()
                    .with_width(60)
                    .with_interval(Duration::from_millis(10)),
            )
            .spawn()
            .unwrap();
        assert!(handle.is_running());

        let mut sink = root.sink();
        for i in 0..5 {
            writeln!(sink, "log {i}").unwrap();
            child.increment(20);
            thread::sleep(Duration::from_millis(15));
        }
        child.finish();
        handle.stop();

        let out = buf.text();
        let positions: Vec<usize> = (0..5)
            .map(|i| out.find(&format!("log {i}\n")).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));

        let last_frame = &out[out.rfind("\x1b[J").unwrap() + 3..];
        let frame_lines: Vec<&str> = last_frame
            .lines()
            .filter(|l| !l.starts_with("log "))
            .collect();
        assert_eq!(frame_lines.len(), 2, "{last_frame:?}");
        assert!(frame_lines[0].contains(" - root - "));
        assert!(frame_lines[1].starts_with("    ✔"));
        assert!(frame_lines[1].contains("[100%"));
        assert!(frame_lines.iter().all(|l| l.chars().count() == 60));
    }

    /// Failed Frame
    /// A write error after the clear resets the row count, so the next frame does not
    /// move up over log output.
    #[test]
    fn test_failed_frame_resets_rows() {
        struct Flaky {
            buf: Vec<u8>,
            fail_on: &'static [u8],
        }

        impl Write for Flaky {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                if buf.windows(self.fail_on.len()).any(|w| w == self.fail_on) {
                    return Err(io::Error::other("terminal went away"));
                }
                self.buf.extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let sink = LogSink::new();
        let mut painter = FramePainter::new(Flaky {
            buf: Vec::new(),
            fail_on: b"bad log",
        });
        painter.paint(&lines(&["a", "b"]), &sink).unwrap();

        sink.push("bad log\n").unwrap();
        assert!(painter.paint(&lines(&["a", "b"]), &sink).is_err());
        assert_eq!(painter.rows(), 0);

        painter.paint(&lines(&["a"]), &sink).unwrap();
        let out = String::from_utf8(painter.into_inner().buf).unwrap();
        assert_eq!(out, "\x1b[Ja\nb\n\x1b[2A\x1b[J\x1b[Ja\n");
    }

    /// Logging After Stop
    /// Once the loop has stopped, writers keep going past the queue capacity instead of
    /// blocking, and a new loop defers output again.
    #[test]
    #[serial]
    fn test_sink_usable_after_stop() {
        let root = ProgressBar::with_options(
            "root",
            BarOptions::new().with_sink(LogSink::with_capacity(2)),
        );
        let config = RenderConfig::new()
            .with_width(40)
            .with_interval(Duration::from_millis(10));

        let handle = RenderLoop::with_writer(root.clone(), io::sink())
            .with_config(config)
            .spawn()
            .unwrap();
        handle.stop();
        assert!(root.sink().is_passthrough());

        let producer = {
            let mut sink = root.sink();
            thread::spawn(move || {
                for i in 0..5 {
                    writeln!(sink, "after stop {i}").unwrap();
                }
            })
        };
        for _ in 0..300 {
            if producer.is_finished() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(producer.is_finished(), "writer blocked after the loop stopped");
        producer.join().unwrap();

        let handle = RenderLoop::with_writer(root.clone(), io::sink())
            .with_config(config.with_interval(Duration::from_secs(60)))
            .spawn()
            .unwrap();
        for _ in 0..300 {
            if !root.sink().is_passthrough() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!root.sink().is_passthrough());
        handle.stop();
    }

    /// Single Loop
    /// A second loop cannot start while one is active, but can once it stops.
    #[test]
    #[serial]
    fn test_only_one_loop_per_process() {
        let config = RenderConfig::new()
            .with_width(40)
            .with_interval(Duration::from_millis(10));

        let first = RenderLoop::with_writer(ProgressBar::new("one"), io::sink())
            .with_config(config)
            .spawn()
            .unwrap();

        let second = RenderLoop::with_writer(ProgressBar::new("two"), io::sink())
            .with_config(config)
            .spawn();
        assert!(matches!(second, Err(Error::AlreadyRunning)));

        first.stop();

        let third = RenderLoop::with_writer(ProgressBar::new("three"), io::sink())
            .with_config(config)
            .spawn()
            .unwrap();
        third.stop();
    }
}
