//! The progress tree's node type.
//!
//! A [`ProgressBar`] is a named counter that owns an ordered list of child bars and shares
//! one [`LogSink`] with every other node in its tree. Handles are cheap to clone and safe to
//! share across threads; producers mutate them while the render loop reads them.
//!
//! State follows a hot/cold split:
//!
//! * **Hot:** progress, denominator, the finished flag and the spinner index are atomics.
//!   Increments hold only the node's shared guard, so tight producer loops never wait on
//!   the renderer, only on a concurrent `finish` or option update.
//! * **Cold:** finish time, stage mode, depth and the sink sit behind a per-node
//!   [`RwLock`](parking_lot::RwLock). The child list has its own lock, held only while it is
//!   being read or mutated and never across the rendering of descendants.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use compact_str::CompactString;
use parking_lot::RwLock;
use web_time::Instant;

use crate::{
    options::{BarOptions, DEFAULT_MAX_PROGRESS},
    sink::LogSink,
};

/// How long a finished child stays in its parent's list before rendering prunes it.
pub const RETENTION_WINDOW: Duration = Duration::from_secs(10);

/// A thread-safe, cloneable handle to one node of a progress tree.
///
/// Cloning a `ProgressBar` is an Arc bump; every clone points at the same node.
///
/// # Examples
///
/// ```
/// use nested_progress::{BarOptions, ProgressBar};
///
/// let root = ProgressBar::new("release");
/// let upload = root.add_child("upload", BarOptions::new().with_max_progress(4));
///
/// upload.increment(2);
/// assert_eq!(upload.sub_level(), 1);
/// assert!((upload.ratio() - 0.5).abs() < f64::EPSILON);
///
/// upload.finish();
/// assert_eq!(upload.progress(), 4);
/// ```
#[derive(Clone)]
pub struct ProgressBar {
    name: CompactString,
    started_at: Instant,

    cold: Arc<RwLock<Cold>>,
    children: Arc<RwLock<Vec<ProgressBar>>>,

    progress: Arc<AtomicI64>,
    max_progress: Arc<AtomicI64>,
    finished: Arc<AtomicBool>,
    spinner_frame: Arc<AtomicUsize>,
}

struct Cold {
    finished_at: Option<Instant>,
    stage_mode: bool,
    sub_level: usize,
    sink: LogSink,
}

impl fmt::Debug for ProgressBar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressBar")
            .field("name", &self.name)
            .field("progress", &self.progress())
            .field("max_progress", &self.max_progress())
            .field("finished", &self.is_finished())
            .field("children", &self.children.read().len())
            .finish()
    }
}

impl ProgressBar {
    /// Creates a root bar with default settings and a fresh log sink.
    #[must_use]
    pub fn new(name: impl Into<CompactString>) -> Self {
        Self::with_options(name, BarOptions::default())
    }

    /// Creates a bar with `options` merged over the defaults.
    ///
    /// Without a sink in `options`, a new one is allocated.
    #[must_use]
    pub fn with_options(name: impl Into<CompactString>, mut options: BarOptions) -> Self {
        let sink = options.sink.take().unwrap_or_default();
        let bar = Self {
            name: name.into(),
            started_at: Instant::now(),
            cold: Arc::new(RwLock::new(Cold {
                finished_at: None,
                stage_mode: false,
                sub_level: 0,
                sink,
            })),
            children: Arc::new(RwLock::new(Vec::new())),
            progress: Arc::new(AtomicI64::new(0)),
            max_progress: Arc::new(AtomicI64::new(DEFAULT_MAX_PROGRESS)),
            finished: Arc::new(AtomicBool::new(false)),
            spinner_frame: Arc::new(AtomicUsize::new(0)),
        };
        bar.apply_options(options);
        bar
    }

    /// Creates a sub-bar one level deeper, sharing this bar's sink, and appends it.
    ///
    /// Depth and sink are always inherited; any set in `options` are overridden.
    pub fn add_child(&self, name: impl Into<CompactString>, options: BarOptions) -> Self {
        let (sub_level, sink) = {
            let cold = self.cold.read();
            (cold.sub_level + 1, cold.sink.clone())
        };
        let child = Self::with_options(name, options.with_sub_level(sub_level).with_sink(sink));
        self.children.write().push(child.clone());
        child
    }

    /// Shorthand for [`add_child`](Self::add_child) with default options.
    pub fn add_sub_bar(&self, name: impl Into<CompactString>) -> Self {
        self.add_child(name, BarOptions::default())
    }

    /// Applies `options` to the live bar. Unset fields are left as they are.
    ///
    /// A finished bar keeps its progress pinned to the (possibly new) maximum.
    pub fn apply_options(&self, options: BarOptions) {
        let mut cold = self.cold.write();
        if let Some(max_progress) = options.max_progress {
            self.max_progress.store(max_progress, Ordering::Relaxed);
        }
        if let Some(stages) = options.stages {
            cold.stage_mode = true;
            self.max_progress.store(stages, Ordering::Relaxed);
        }
        if let Some(sub_level) = options.sub_level {
            cold.sub_level = sub_level;
        }
        if let Some(sink) = options.sink {
            cold.sink = sink;
        }
        if cold.finished_at.is_some() {
            self.progress
                .store(self.max_progress.load(Ordering::Relaxed), Ordering::Relaxed);
        }
    }

    // ========================================================================
    // Counters
    // ========================================================================

    /// Adds `amount` to the progress counter.
    ///
    /// Any value is accepted, including negatives and values past the maximum; the ratio
    /// is clamped only for display. Ignored once the bar is finished.
    pub fn increment(&self, amount: i64) {
        // Shared guard: serializes against `finish`, which pins progress under the write lock.
        let cold = self.cold.read();
        if cold.finished_at.is_some() {
            return;
        }
        self.progress.fetch_add(amount, Ordering::Relaxed);
    }

    /// Marks the bar finished and pins progress to the maximum.
    ///
    /// The finish time is recorded by the first call only; later calls just re-pin progress.
    pub fn finish(&self) {
        let mut cold = self.cold.write();
        if cold.finished_at.is_none() {
            cold.finished_at = Some(Instant::now());
        }
        self.finished.store(true, Ordering::Release);
        self.progress
            .store(self.max_progress.load(Ordering::Relaxed), Ordering::Relaxed);
    }

    /// Current progress value.
    #[must_use]
    pub fn progress(&self) -> i64 {
        self.progress.load(Ordering::Relaxed)
    }

    /// Current denominator.
    #[must_use]
    pub fn max_progress(&self) -> i64 {
        self.max_progress.load(Ordering::Relaxed)
    }

    /// Completion ratio, clamped to `0.0..=1.0`.
    #[must_use]
    pub fn ratio(&self) -> f64 {
        progress_ratio(self.progress(), self.max_progress())
    }

    /// Checks if [`finish`](Self::finish) has been called.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    /// The display label.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the bar displays `Stage X/Y`.
    #[must_use]
    pub fn is_stage_mode(&self) -> bool {
        self.cold.read().stage_mode
    }

    /// Nesting depth; 0 for a root.
    #[must_use]
    pub fn sub_level(&self) -> usize {
        self.cold.read().sub_level
    }

    /// The log sink shared by this bar's tree.
    ///
    /// Route log output here so it is printed between frames instead of over them.
    #[must_use]
    pub fn sink(&self) -> LogSink {
        self.cold.read().sink.clone()
    }

    /// When the bar was created.
    #[must_use]
    pub const fn started_at(&self) -> Instant {
        self.started_at
    }

    /// When the bar was first finished, if it has been.
    #[must_use]
    pub fn finished_at(&self) -> Option<Instant> {
        self.cold.read().finished_at
    }

    /// Time elapsed as of `now`, or the total running time once finished.
    #[must_use]
    pub fn elapsed_at(&self, now: Instant) -> Duration {
        let end = self.finished_at().unwrap_or(now);
        end.saturating_duration_since(self.started_at)
    }

    // ========================================================================
    // Children
    // ========================================================================

    /// Handles to the current children, in render order.
    #[must_use]
    pub fn children(&self) -> Vec<Self> {
        self.children.read().clone()
    }

    /// Removes children that finished more than [`RETENTION_WINDOW`] before `now`.
    ///
    /// Returns how many were removed.
    pub(crate) fn prune_expired(&self, now: Instant) -> usize {
        let mut children = self.children.write();
        let before = children.len();
        children.retain(|child| !child.expired_at(now));
        before - children.len()
    }

    fn expired_at(&self, now: Instant) -> bool {
        self.finished_at()
            .is_some_and(|finished| now.saturating_duration_since(finished) > RETENTION_WINDOW)
    }

    /// Returns the spinner frame to draw and moves the index on by one.
    pub(crate) fn advance_spinner(&self, frames: usize) -> usize {
        self.spinner_frame.fetch_add(1, Ordering::Relaxed) % frames
    }

    /// Creates an owned, recursive snapshot of this bar and its children.
    #[must_use]
    pub fn snapshot(&self) -> BarSnapshot {
        let now = Instant::now();
        let (finished_at, stage_mode, sub_level) = {
            let cold = self.cold.read();
            (cold.finished_at, cold.stage_mode, cold.sub_level)
        };
        let end = finished_at.unwrap_or(now);

        BarSnapshot {
            name: self.name.clone(),
            elapsed: end.saturating_duration_since(self.started_at),
            progress: self.progress(),
            max_progress: self.max_progress(),
            stage_mode,
            sub_level,
            finished: finished_at.is_some(),
            children: self.children().iter().map(Self::snapshot).collect(),
        }
    }
}

/// Ratio of `progress` to `max_progress`, clamped to `0.0..=1.0`.
///
/// A non-positive denominator yields 0 when nothing has been done and 1 otherwise.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn progress_ratio(progress: i64, max_progress: i64) -> f64 {
    if max_progress <= 0 {
        return if progress <= 0 { 0.0 } else { 1.0 };
    }
    (progress as f64 / max_progress as f64).clamp(0.0, 1.0)
}

/// A plain-data view of a [`ProgressBar`] subtree at one instant.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BarSnapshot {
    name: CompactString,
    elapsed: Duration,
    progress: i64,
    max_progress: i64,
    stage_mode: bool,
    sub_level: usize,
    finished: bool,
    children: Vec<BarSnapshot>,
}

impl BarSnapshot {
    /// Returns the display label.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the elapsed (or total, once finished) running time.
    #[must_use]
    pub const fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Returns the progress value.
    #[must_use]
    pub const fn progress(&self) -> i64 {
        self.progress
    }

    /// Returns the denominator.
    #[must_use]
    pub const fn max_progress(&self) -> i64 {
        self.max_progress
    }

    /// Returns whether the bar was in stage mode.
    #[must_use]
    pub const fn stage_mode(&self) -> bool {
        self.stage_mode
    }

    /// Returns the nesting depth.
    #[must_use]
    pub const fn sub_level(&self) -> usize {
        self.sub_level
    }

    /// Returns whether the bar was finished.
    #[must_use]
    pub const fn finished(&self) -> bool {
        self.finished
    }

    /// Returns the children's snapshots, in render order.
    #[must_use]
    pub fn children(&self) -> &[Self] {
        &self.children
    }

    /// Returns the clamped completion ratio.
    #[must_use]
    pub fn ratio(&self) -> f64 {
        progress_ratio(self.progress, self.max_progress)
    }
}
