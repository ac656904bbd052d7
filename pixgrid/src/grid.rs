/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use serde::Deserialize;
use serde::Serialize;

use crate::Shape2;
use crate::Vector2;

/// The errors that can occur when constructing or mutating a [`PixelGrid`].
#[derive(Debug, thiserror::Error)]
pub enum GridError {
    #[error("pixel size must be positive on both axes, got ({}, {})", .pixel_size.row, .pixel_size.col)]
    NonPositivePixelSize { pixel_size: Vector2 },
}

/// The affine map between physical coordinates and pixel coordinates of one
/// buffer.
///
/// A grid is a scaled translation, no rotation or shear:
///
/// ```text
/// pixel    = (coord - origin) / pixel_size
/// coord    = pixel * pixel_size + origin
/// origin   = -center * pixel_size
/// ```
///
/// `center` is the (continuous) pixel coordinate of the physical origin
/// `(0, 0)`; `origin` is the physical coordinate of pixel `(0, 0)`. The two
/// are mutually derivable through `pixel_size`, and every mutator below
/// re-establishes the identity, so a grid is always internally consistent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PixelGrid {
    pixel_size: Vector2,
    center: Vector2,
    origin: Vector2,
}

impl PixelGrid {
    /// Create a grid for a buffer of spatial shape `frame`.
    ///
    /// The center is bootstrapped to the middle of the frame,
    /// `frame / 2` with truncating division, so physical `(0, 0)` starts
    /// out on the (lower-left-of-)center pixel. An explicit `origin`
    /// overrides the bootstrap.
    pub fn new(
        frame: Shape2,
        pixel_size: Vector2,
        origin: Option<Vector2>,
    ) -> Result<Self, GridError> {
        if !pixel_size.is_positive() {
            return Err(GridError::NonPositivePixelSize { pixel_size });
        }
        let center = frame.half_low().as_vector();
        let mut grid = Self {
            pixel_size,
            center,
            origin: -center * pixel_size,
        };
        if let Some(origin) = origin {
            grid.set_origin(origin);
        }
        Ok(grid)
    }

    /// Physical coordinates to (continuous) pixel coordinates.
    pub fn to_pixel(&self, coord: Vector2) -> Vector2 {
        (coord - self.origin) / self.pixel_size
    }

    /// (Continuous) pixel coordinates to physical coordinates.
    pub fn to_physical(&self, pixel: Vector2) -> Vector2 {
        pixel * self.pixel_size + self.origin
    }

    pub fn pixel_size(&self) -> Vector2 {
        self.pixel_size
    }

    /// The pixel coordinate of the physical origin.
    pub fn center(&self) -> Vector2 {
        self.center
    }

    /// The physical coordinate of pixel `(0, 0)`.
    pub fn origin(&self) -> Vector2 {
        self.origin
    }

    /// Change the pixel size, keeping `center` fixed and recomputing
    /// `origin`.
    pub fn set_pixel_size(&mut self, pixel_size: Vector2) -> Result<(), GridError> {
        if !pixel_size.is_positive() {
            return Err(GridError::NonPositivePixelSize { pixel_size });
        }
        self.pixel_size = pixel_size;
        self.origin = -self.center * self.pixel_size;
        Ok(())
    }

    /// Change the origin, recomputing `center`.
    pub fn set_origin(&mut self, origin: Vector2) {
        self.origin = origin;
        self.center = -origin / self.pixel_size;
    }

    /// Change the center, recomputing `origin`.
    pub fn set_center(&mut self, center: Vector2) {
        self.center = center;
        self.origin = -center * self.pixel_size;
    }
}
