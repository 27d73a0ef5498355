//! Iterator adapters that drive a bar.
//!
//! [`ProgressIteratorExt`] adds methods to any [`Iterator`] that increment a
//! [`ProgressBar`] once per item and finish it when the iterator is exhausted.
//!
//! When the adapter creates the bar itself ([`progress_under`](ProgressIteratorExt::progress_under)),
//! the denominator comes from [`Iterator::size_hint`]: an exact bound becomes
//! `max_progress`, anything else keeps the default.
//!
//! # Example
//!
//! ```
//! use nested_progress::{ProgressBar, ProgressIteratorExt};
//!
//! let root = ProgressBar::new("import");
//! let total: u32 = [1, 2, 3].into_iter().progress_under(&root, "rows").sum();
//!
//! assert_eq!(total, 6);
//! assert!(root.children()[0].is_finished());
//! ```

use compact_str::CompactString;

use crate::{bar::ProgressBar, options::BarOptions};

/// An iterator adapter that increments a [`ProgressBar`] on every item.
pub struct ProgressIter<I> {
    iter: I,
    bar: ProgressBar,
}

impl<I> ProgressIter<I> {
    /// Creates a new `ProgressIter`.
    ///
    /// Usually constructed via [`ProgressIteratorExt`] methods.
    pub const fn new(iter: I, bar: ProgressBar) -> Self {
        Self { iter, bar }
    }

    /// The bar this iterator drives.
    pub const fn bar(&self) -> &ProgressBar {
        &self.bar
    }
}

impl<I: Iterator> Iterator for ProgressIter<I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.iter.next();
        match item {
            Some(_) => self.bar.increment(1),
            None => self.bar.finish(),
        }
        item
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}

/// Extension trait attaching progress tracking to any iterator.
pub trait ProgressIteratorExt: Iterator + Sized {
    /// Drives an existing bar.
    fn progress_with(self, bar: ProgressBar) -> ProgressIter<Self> {
        ProgressIter::new(self, bar)
    }

    /// Creates a sub-bar of `parent` named `name`, sized from `size_hint`, and drives it.
    fn progress_under(
        self,
        parent: &ProgressBar,
        name: impl Into<CompactString>,
    ) -> ProgressIter<Self> {
        let mut options = BarOptions::new();
        if let Some(len) = exact_len(&self) {
            options = options.with_max_progress(i64::try_from(len).unwrap_or(i64::MAX));
        }
        let bar = parent.add_child(name, options);
        ProgressIter::new(self, bar)
    }
}

impl<I: Iterator> ProgressIteratorExt for I {}

fn exact_len<I: Iterator>(iter: &I) -> Option<usize> {
    match iter.size_hint() {
        (lower, Some(upper)) if lower == upper => Some(upper),
        _ => None,
    }
}
