//! Configuration for [`ProgressBar`](crate::ProgressBar) instances.
//!
//! [`BarOptions`] enumerates every recognized setting. Each field is optional: an unset
//! field leaves the bar's current value untouched, which lets the same struct serve both
//! creation (merged over the defaults) and live updates via
//! [`ProgressBar::apply_options`](crate::ProgressBar::apply_options).

use crate::sink::LogSink;

/// Denominator used when no `max_progress` or `stages` is configured.
pub const DEFAULT_MAX_PROGRESS: i64 = 100;

/// A set of settings applied to a bar at creation or while it runs.
///
/// # Examples
///
/// ```
/// use nested_progress::{BarOptions, ProgressBar};
///
/// let bar = ProgressBar::with_options("deploy", BarOptions::new().with_stages(5));
/// assert!(bar.is_stage_mode());
/// assert_eq!(bar.max_progress(), 5);
/// ```
#[derive(Clone, Debug, Default)]
pub struct BarOptions {
    pub(crate) max_progress: Option<i64>,
    pub(crate) stages: Option<i64>,
    pub(crate) sub_level: Option<usize>,
    pub(crate) sink: Option<LogSink>,
}

impl BarOptions {
    /// Creates an empty option set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the denominator of the progress ratio.
    #[must_use]
    pub const fn with_max_progress(mut self, max_progress: i64) -> Self {
        self.max_progress = Some(max_progress);
        self
    }

    /// Switches the bar to stage display with `stages` as the denominator.
    ///
    /// Takes precedence over [`with_max_progress`](Self::with_max_progress) when both are set.
    #[must_use]
    pub const fn with_stages(mut self, stages: i64) -> Self {
        self.stages = Some(stages);
        self
    }

    /// Sets the nesting depth used for indentation.
    ///
    /// Sub-bars get this set automatically from their parent.
    #[must_use]
    pub const fn with_sub_level(mut self, sub_level: usize) -> Self {
        self.sub_level = Some(sub_level);
        self
    }

    /// Attaches an existing log sink instead of allocating a fresh one.
    #[must_use]
    pub fn with_sink(mut self, sink: LogSink) -> Self {
        self.sink = Some(sink);
        self
    }
}
