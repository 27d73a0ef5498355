//! # `nested_progress`
//!
//! Nested, live-updating progress bars for ANSI terminals, with log output that never
//! tears a frame.
//!
//! A tree of [`ProgressBar`]s is mutated from any number of threads while a single
//! background [`RenderLoop`] repaints it in place on a fixed tick. Log lines are routed
//! through the tree's [`LogSink`] and printed between frames, above the bars.
//!
//! ```no_run
//! use nested_progress::{BarOptions, ProgressBar};
//!
//! let root = ProgressBar::new("build");
//! tracing_subscriber::fmt().with_writer(root.sink()).init();
//! let handle = root.start_render_loop().expect("no other render loop is running");
//!
//! let compile = root.add_child("compile", BarOptions::new().with_stages(3));
//! for _ in 0..3 {
//!     tracing::info!("stage done");
//!     compile.increment(1);
//! }
//! compile.finish();
//! root.finish();
//! handle.stop();
//! ```
//!
//! ## Modules
//!
//! * [`bar`]: The [`ProgressBar`] tree node and its snapshots.
//! * [`options`]: [`BarOptions`], applied at creation or to a live bar.
//! * [`sink`]: The bounded [`LogSink`] that defers log output to frame boundaries.
//! * [`render`]: Frame layout.
//! * [`render_loop`]: The background repaint thread and its ANSI painter.
//! * [`iter`]: Iterator adapters that drive a bar.
//! * [`format`]: Spinner glyphs, durations and bar fills.
//! * [`error`]: Errors from starting a render loop.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod bar;
pub mod error;
pub mod format;
pub mod iter;
pub mod options;
pub mod render;
pub mod render_loop;
pub mod sink;

pub use bar::{BarSnapshot, ProgressBar, RETENTION_WINDOW};
pub use error::{Error, Result};
pub use iter::{ProgressIter, ProgressIteratorExt};
pub use options::BarOptions;
pub use render::render_tree;
pub use render_loop::{FramePainter, RenderConfig, RenderHandle, RenderLoop};
pub use sink::LogSink;
