//! Frame layout for a progress tree.
//!
//! [`render_tree`] turns a bar and its descendants into the text lines of one frame.
//! Apart from two side effects on the tree it reads (pruning expired children and
//! advancing spinners), it is a pure function of its inputs: the caller supplies the
//! terminal width and the instant the frame represents.
//!
//! Line layout:
//!
//! ```text
//! <indent><glyph>[HH:MM:SS][ Stage P/M] - <name, padded> - [NN% ######      ]
//! ```

use std::fmt::Write as _;

use web_time::Instant;

use crate::{
    bar::{ProgressBar, progress_ratio},
    format::{DONE_GLYPH, SPINNER_FRAMES, bar_fill, hms},
};

const INDENT: &str = "    ";

/// Columns taken by the brackets and percentage around the fill region.
const BAR_CHROME: usize = 6;

/// Renders `root` and all of its descendants, depth-first, parent before children.
///
/// `name_width` pads the root's name column; each level of children is padded to the
/// longest name among its siblings. Widths are measured in `char`s.
#[must_use]
pub fn render_tree(
    root: &ProgressBar,
    name_width: usize,
    term_width: usize,
    now: Instant,
) -> Vec<String> {
    let mut lines = Vec::new();
    render_into(root, name_width, term_width, now, &mut lines);
    lines
}

fn render_into(
    bar: &ProgressBar,
    name_width: usize,
    term_width: usize,
    now: Instant,
    lines: &mut Vec<String>,
) {
    let pruned = bar.prune_expired(now);
    if pruned > 0 {
        tracing::trace!(bar = bar.name(), pruned, "pruned finished sub-bars");
    }

    lines.push(render_line(bar, name_width, term_width, now));

    // Cloned handles: the child list lock is not held while descendants render.
    let children = bar.children();
    let child_width = children
        .iter()
        .map(|child| child.name().chars().count())
        .max()
        .unwrap_or(0);
    for child in &children {
        render_into(child, child_width, term_width, now, lines);
    }

    bar.prune_expired(now);
}

/// Renders a single bar's line, advancing its spinner if it is still running.
#[must_use]
pub fn render_line(bar: &ProgressBar, name_width: usize, term_width: usize, now: Instant) -> String {
    let finished_at = bar.finished_at();
    let progress = bar.progress();
    let max_progress = bar.max_progress();

    let glyph = match finished_at {
        Some(_) => DONE_GLYPH,
        None => SPINNER_FRAMES[bar.advance_spinner(SPINNER_FRAMES.len())],
    };
    let elapsed = finished_at
        .unwrap_or(now)
        .saturating_duration_since(bar.started_at());

    let mut line = INDENT.repeat(bar.sub_level());
    let _ = write!(line, "{glyph}[{}]", hms(elapsed));
    if bar.is_stage_mode() {
        let _ = write!(line, " Stage {progress}/{max_progress}");
    }
    let _ = write!(line, " - {:<name_width$} - ", bar.name());

    let fill_width = term_width.saturating_sub(line.chars().count() + BAR_CHROME);
    line.push_str(&bar_fill(progress_ratio(progress, max_progress), fill_width));
    line
}
