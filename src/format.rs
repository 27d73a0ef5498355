//! Small text helpers used to compose bar lines.

use std::time::Duration;

/// Braille spinner frames, cycled once per render while a bar runs.
pub const SPINNER_FRAMES: [char; 10] = ['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];

/// Glyph shown in place of the spinner once a bar is finished.
pub const DONE_GLYPH: char = '✔';

const FILL_CHAR: char = '#';
const EMPTY_CHAR: char = ' ';

/// Formats `duration` as `HH:MM:SS`. Hours are not wrapped at 24.
#[must_use]
pub fn hms(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Builds `[NN% ####    ]`, with `width` fill columns between the percentage and `]`.
///
/// `ratio` is clamped to `0.0..=1.0`; the percentage and the filled columns are floored.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
#[must_use]
pub fn bar_fill(ratio: f64, width: usize) -> String {
    let ratio = if ratio.is_nan() { 0.0 } else { ratio.clamp(0.0, 1.0) };
    let percent = format!("{}%", (ratio * 100.0).floor() as u8);
    let filled = ((width as f64 * ratio).floor() as usize).min(width);

    let mut out = String::with_capacity(width + 6);
    out.push('[');
    out.push_str(&format!("{percent:<4}"));
    out.extend(std::iter::repeat_n(FILL_CHAR, filled));
    out.extend(std::iter::repeat_n(EMPTY_CHAR, width - filled));
    out.push(']');
    out
}
