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
use crate::PixelBox;
use crate::Shape2;
use crate::Vector2;

/// The requested spatial extent of a view.
///
/// `Full` means "the whole frame of the backing buffer" and is resolved
/// against the buffer's current spatial shape every time derived geometry is
/// recomputed, so a full-frame view tracks the buffer through resizes
/// instead of freezing the shape it saw at creation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Extent {
    #[default]
    Full,
    Fixed(Shape2),
}

impl Extent {
    /// The concrete spatial shape, given the current buffer frame.
    pub fn resolve(&self, frame: Shape2) -> Shape2 {
        match self {
            Extent::Full => frame,
            Extent::Fixed(shape) => *shape,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Extent::Full)
    }
}

/// The discrete pixel-space footprint of a view.
///
/// Derived from a continuous pixel-space center and a concrete shape:
///
/// ```text
/// center   = round_half_away(pixel_center)
/// low      = center - shape / 2
/// high     = center + (shape + 1) / 2
/// subpixel = pixel_center - center
/// ```
///
/// Both divisions truncate, so even- and odd-sized windows are centered
/// differently: a window of shape 4 spans `[c-2, c+2)` while a window of
/// shape 5 spans `[c-2, c+3)`. The data lives in `[low, high)` on each axis,
/// and `high - low == shape` always holds. The asymmetric split pairs with
/// away-from-zero rounding of the center to keep the subpixel remainder in
/// `[-0.5, 0.5]` with a consistent sign convention; neither half may be
/// "fixed" independently.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Window {
    shape: Shape2,
    pixel_center: Vector2,
    center: Index2,
    low: Index2,
    high: Index2,
    subpixel: Vector2,
}

impl Window {
    /// Place a window of `shape` at the continuous pixel coordinate
    /// `pixel_center`.
    pub fn locate(pixel_center: Vector2, shape: Shape2) -> Self {
        let center = pixel_center.round_half_away();
        let low = center - shape.half_low();
        let high = center + shape.half_high();
        let subpixel = pixel_center - center.as_vector();
        Self {
            shape,
            pixel_center,
            center,
            low,
            high,
            subpixel,
        }
    }

    /// The resolved spatial shape.
    pub fn shape(&self) -> Shape2 {
        self.shape
    }

    /// The continuous pixel-space center.
    pub fn pixel_center(&self) -> Vector2 {
        self.pixel_center
    }

    /// The discrete pixel-space center.
    pub fn center(&self) -> Index2 {
        self.center
    }

    /// First pixel of the footprint (inclusive).
    pub fn low(&self) -> Index2 {
        self.low
    }

    /// One past the last pixel of the footprint (exclusive).
    pub fn high(&self) -> Index2 {
        self.high
    }

    /// The remainder `pixel_center - center`, for consumers that apply
    /// subpixel interpolation.
    pub fn subpixel(&self) -> Vector2 {
        self.subpixel
    }

    /// The footprint as a bounding box.
    pub fn bounds(&self) -> PixelBox {
        PixelBox::new(self.low, self.high)
    }
}
