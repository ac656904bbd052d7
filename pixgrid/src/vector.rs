/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Fixed-size 2-vectors in `(row, col)` order.
//!
//! All spatial quantities in this crate are pairs: continuous physical or
//! pixel coordinates ([`Vector2`]), discrete pixel indices ([`Index2`]), and
//! spatial buffer extents ([`Shape2`]). Keeping the row/col convention in the
//! type names avoids the (x, y) ambiguity that plagues image code.

use std::ops::Add;
use std::ops::Div;
use std::ops::Mul;
use std::ops::Neg;
use std::ops::Sub;

use serde::Deserialize;
use serde::Serialize;

/// A continuous 2-vector in `(row, col)` order.
///
/// Used both for physical coordinates (whatever unit the instrument works
/// in) and for fractional pixel coordinates. Arithmetic is elementwise.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vector2 {
    pub row: f64,
    pub col: f64,
}

impl Vector2 {
    pub fn new(row: f64, col: f64) -> Self {
        Self { row, col }
    }

    /// Both components set to `v`.
    pub fn splat(v: f64) -> Self {
        Self { row: v, col: v }
    }

    /// Round each component to the nearest integer, ties away from zero.
    ///
    /// `f64::round` has exactly the required tie-breaking: `0.5 -> 1`,
    /// `-0.5 -> -1`. Window placement depends on this being stable for
    /// half-integer centers, which banker's rounding is not.
    pub fn round_half_away(self) -> Index2 {
        Index2 {
            row: self.row.round() as i64,
            col: self.col.round() as i64,
        }
    }

    /// Approximate elementwise equality with the usual relative/absolute
    /// tolerance mix (`|a - b| <= atol + rtol * |b|`).
    pub fn approx_eq(self, other: Vector2) -> bool {
        const RTOL: f64 = 1e-5;
        const ATOL: f64 = 1e-8;
        let close = |a: f64, b: f64| (a - b).abs() <= ATOL + RTOL * b.abs();
        close(self.row, other.row) && close(self.col, other.col)
    }

    /// True if both components are strictly positive.
    pub fn is_positive(self) -> bool {
        self.row > 0.0 && self.col > 0.0
    }
}

impl Add for Vector2 {
    type Output = Vector2;

    fn add(self, rhs: Vector2) -> Vector2 {
        Vector2::new(self.row + rhs.row, self.col + rhs.col)
    }
}

impl Sub for Vector2 {
    type Output = Vector2;

    fn sub(self, rhs: Vector2) -> Vector2 {
        Vector2::new(self.row - rhs.row, self.col - rhs.col)
    }
}

impl Mul for Vector2 {
    type Output = Vector2;

    fn mul(self, rhs: Vector2) -> Vector2 {
        Vector2::new(self.row * rhs.row, self.col * rhs.col)
    }
}

impl Div for Vector2 {
    type Output = Vector2;

    fn div(self, rhs: Vector2) -> Vector2 {
        Vector2::new(self.row / rhs.row, self.col / rhs.col)
    }
}

impl Mul<f64> for Vector2 {
    type Output = Vector2;

    fn mul(self, rhs: f64) -> Vector2 {
        Vector2::new(self.row * rhs, self.col * rhs)
    }
}

impl Div<f64> for Vector2 {
    type Output = Vector2;

    fn div(self, rhs: f64) -> Vector2 {
        Vector2::new(self.row / rhs, self.col / rhs)
    }
}

impl Neg for Vector2 {
    type Output = Vector2;

    fn neg(self) -> Vector2 {
        Vector2::new(-self.row, -self.col)
    }
}

/// A discrete 2-vector in `(row, col)` order.
///
/// Signed: window bounds can extend below a buffer's first pixel before a
/// reformat brings the buffer to the views.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Index2 {
    pub row: i64,
    pub col: i64,
}

impl Index2 {
    pub fn new(row: i64, col: i64) -> Self {
        Self { row, col }
    }

    pub fn splat(v: i64) -> Self {
        Self { row: v, col: v }
    }

    pub fn as_vector(self) -> Vector2 {
        Vector2::new(self.row as f64, self.col as f64)
    }

    /// Componentwise minimum.
    pub fn min(self, other: Index2) -> Index2 {
        Index2::new(self.row.min(other.row), self.col.min(other.col))
    }

    /// Componentwise maximum.
    pub fn max(self, other: Index2) -> Index2 {
        Index2::new(self.row.max(other.row), self.col.max(other.col))
    }
}

impl Add for Index2 {
    type Output = Index2;

    fn add(self, rhs: Index2) -> Index2 {
        Index2::new(self.row + rhs.row, self.col + rhs.col)
    }
}

impl Sub for Index2 {
    type Output = Index2;

    fn sub(self, rhs: Index2) -> Index2 {
        Index2::new(self.row - rhs.row, self.col - rhs.col)
    }
}

impl Neg for Index2 {
    type Output = Index2;

    fn neg(self) -> Index2 {
        Index2::new(-self.row, -self.col)
    }
}

/// A spatial `(rows, cols)` extent.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape2 {
    pub rows: usize,
    pub cols: usize,
}

impl Shape2 {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    pub fn area(self) -> usize {
        self.rows * self.cols
    }

    /// The low-side half extent, `shape / 2` with truncating division.
    pub fn half_low(self) -> Index2 {
        Index2::new((self.rows / 2) as i64, (self.cols / 2) as i64)
    }

    /// The high-side half extent, `(shape + 1) / 2` with truncating division.
    ///
    /// Note `half_low + half_high == shape` on each axis, but the two halves
    /// differ by one for odd sizes. The asymmetry is deliberate and relied
    /// upon by window placement.
    pub fn half_high(self) -> Index2 {
        Index2::new(((self.rows + 1) / 2) as i64, ((self.cols + 1) / 2) as i64)
    }

    pub fn as_vector(self) -> Vector2 {
        Vector2::new(self.rows as f64, self.cols as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_half_away_from_zero() {
        assert_eq!(Vector2::new(0.5, -0.5).round_half_away(), Index2::new(1, -1));
        assert_eq!(Vector2::new(2.5, -2.5).round_half_away(), Index2::new(3, -3));
        assert_eq!(Vector2::new(1.4, -1.4).round_half_away(), Index2::new(1, -1));
        assert_eq!(Vector2::new(1.6, -1.6).round_half_away(), Index2::new(2, -2));
    }

    #[test]
    fn test_halves_sum_to_shape() {
        for rows in 0..7 {
            for cols in 0..7 {
                let s = Shape2::new(rows, cols);
                let total = s.half_low() + s.half_high();
                assert_eq!(total, Index2::new(rows as i64, cols as i64));
            }
        }
    }

    #[test]
    fn test_halves_asymmetric_for_odd() {
        let s = Shape2::new(5, 4);
        assert_eq!(s.half_low(), Index2::new(2, 2));
        assert_eq!(s.half_high(), Index2::new(3, 2));
    }

    #[test]
    fn test_elementwise_arithmetic() {
        let a = Vector2::new(6.0, 8.0);
        let b = Vector2::new(2.0, 4.0);
        assert_eq!(a * b, Vector2::new(12.0, 32.0));
        assert_eq!(a / b, Vector2::new(3.0, 2.0));
        assert_eq!(a - b, Vector2::new(4.0, 4.0));
        assert_eq!(-a, Vector2::new(-6.0, -8.0));
    }

    #[test]
    fn test_approx_eq_tolerance() {
        let a = Vector2::new(1.0, 1.0);
        assert!(a.approx_eq(Vector2::new(1.0 + 1e-9, 1.0)));
        assert!(!a.approx_eq(Vector2::new(1.1, 1.0)));
    }
}
