/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Property-based generators for grids, windows and related types.
//!
//! These strategies are used in `proptest`-based tests to construct
//! randomized coordinate systems and window placements for testing the
//! round-trip, centering and misfit algebra.
//!
//! This module is only included in test builds (`#[cfg(test)]`).

use proptest::prelude::*;

use crate::PixelGrid;
use crate::Shape2;
use crate::Vector2;
use crate::Window;

/// Generates a [`Vector2`] with both components in `[-limit, limit]`.
pub fn gen_vector2(limit: f64) -> impl Strategy<Value = Vector2> {
    (-limit..=limit, -limit..=limit).prop_map(|(row, col)| Vector2::new(row, col))
}

/// Generates a non-degenerate [`Shape2`] with each axis in `1..=max_len`.
pub fn gen_shape2(max_len: usize) -> impl Strategy<Value = Shape2> {
    (1..=max_len, 1..=max_len).prop_map(|(rows, cols)| Shape2::new(rows, cols))
}

/// Generates a valid [`PixelGrid`]: a frame of up to 64 pixels per axis, a
/// pixel size well away from zero, and an occasional explicit origin.
pub fn gen_grid() -> impl Strategy<Value = PixelGrid> {
    (
        gen_shape2(64),
        (0.01f64..=100.0, 0.01f64..=100.0),
        prop::option::of(gen_vector2(100.0)),
    )
        .prop_map(|(frame, (pr, pc), origin)| {
            PixelGrid::new(frame, Vector2::new(pr, pc), origin)
                .expect("generated pixel size is positive")
        })
}

/// Generates a [`Window`] placed anywhere within roughly a 1e4-pixel
/// neighborhood of the buffer origin.
pub fn gen_window(max_len: usize) -> impl Strategy<Value = Window> {
    (gen_vector2(1e4), gen_shape2(max_len))
        .prop_map(|(pixel_center, shape)| Window::locate(pixel_center, shape))
}

#[cfg(test)]
mod tests {
    use proptest::strategy::ValueTree;
    use proptest::test_runner::Config;
    use proptest::test_runner::TestRunner;

    use super::*;

    #[test]
    fn print_some_grids() {
        let mut runner = TestRunner::new(Config::default());

        for _ in 0..64 {
            let strat = gen_grid();
            let value = strat.new_tree(&mut runner).unwrap().current();
            println!("{:?}", value);
        }
    }

    proptest! {
        #[test]
        fn test_window_generation(w in gen_window(32)) {
            prop_assert!(w.shape().area() > 0);
        }
    }
}
