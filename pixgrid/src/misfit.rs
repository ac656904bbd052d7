/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use serde::Deserialize;
use serde::Serialize;

use crate::Index2;
use crate::Shape2;
use crate::Window;

/// A half-open pixel-space bounding box, `[low, high)` on each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelBox {
    low: Index2,
    high: Index2,
}

impl PixelBox {
    pub fn new(low: Index2, high: Index2) -> Self {
        Self { low, high }
    }

    /// The smallest box covering all given windows, or `None` if the
    /// iterator is empty.
    pub fn of_windows<'a>(windows: impl IntoIterator<Item = &'a Window>) -> Option<Self> {
        let mut iter = windows.into_iter();
        let mut bounds = iter.next()?.bounds();
        for w in iter {
            bounds.include(w);
        }
        Some(bounds)
    }

    /// Grow the box to cover `window`.
    pub fn include(&mut self, window: &Window) {
        self.low = self.low.min(window.low());
        self.high = self.high.max(window.high());
    }

    pub fn low(&self) -> Index2 {
        self.low
    }

    pub fn high(&self) -> Index2 {
        self.high
    }
}

/// The signed per-axis, per-side distance between a buffer's spatial bounds
/// and the region required to cover a set of windows.
///
/// For a buffer of spatial shape `(H, W)` and a window bounding box:
///
/// ```text
/// low  = -box.low                 (grow below row/col 0)
/// high = box.high - (H, W)        (grow past the last row/col)
/// ```
///
/// A positive component means the buffer must grow on that side; a negative
/// component means it could shrink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Misfit {
    pub low: Index2,
    pub high: Index2,
}

impl Misfit {
    pub fn between(bounds: &PixelBox, frame: Shape2) -> Self {
        Self {
            low: -bounds.low(),
            high: bounds.high() - Index2::new(frame.rows as i64, frame.cols as i64),
        }
    }

    /// Zero out the negative (shrink) components, for pad-only buffers.
    pub fn growth_only(self) -> Self {
        let clamp = |i: Index2| Index2::new(i.row.max(0), i.col.max(0));
        Self {
            low: clamp(self.low),
            high: clamp(self.high),
        }
    }

    pub fn any_positive(&self) -> bool {
        self.low.row > 0 || self.low.col > 0 || self.high.row > 0 || self.high.col > 0
    }

    pub fn any_negative(&self) -> bool {
        self.low.row < 0 || self.low.col < 0 || self.high.row < 0 || self.high.col < 0
    }

    /// The spatial shape after applying both sides of the misfit.
    ///
    /// Clamped at zero per axis; a shrink larger than the buffer leaves an
    /// empty axis rather than wrapping.
    pub fn adjusted(&self, frame: Shape2) -> Shape2 {
        let apply = |dim: usize, low: i64, high: i64| (dim as i64 + low + high).max(0) as usize;
        Shape2::new(
            apply(frame.rows, self.low.row, self.high.row),
            apply(frame.cols, self.low.col, self.high.col),
        )
    }
}
