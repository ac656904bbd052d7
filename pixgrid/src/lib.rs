/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Coordinate algebra for pixel buffers.
//!
//! Provides [`PixelGrid`], an affine map between continuous physical
//! coordinates (meters) and fractional pixel indices, together with the
//! window-placement arithmetic built on top of it: [`Window`] snaps a
//! fractional center to integer buffer bounds, [`PixelBox`] accumulates
//! the bounding box of a set of windows, and [`Misfit`] measures how far
//! that box extends past a buffer's spatial frame.
//!
//! This crate holds only the geometry; it knows nothing about buffers,
//! element types, or storage. Higher layers decide what to do when a
//! misfit is non-zero (grow, crop, or reject).

mod vector;
pub use vector::Index2;
pub use vector::Shape2;
pub use vector::Vector2;

mod grid;
pub use grid::GridError;
pub use grid::PixelGrid;

mod window;
pub use window::Extent;
pub use window::Window;

mod misfit;
pub use misfit::Misfit;
pub use misfit::PixelBox;

/// Property-based generators for randomized test input.
#[cfg(test)]
pub mod strategy;
