/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Element types admitted into storage buffers.
//!
//! Buffers hold one of four numeric element types: real or complex, in
//! single or double precision. The set is closed: [`Element`] is sealed
//! and implemented exactly for `f32`, `f64`, [`Complex32`] and
//! [`Complex64`]. Code generic over `T: Element` therefore covers every
//! buffer this crate can represent.

use std::fmt;

use ndarray::ScalarOperand;
use num_complex::Complex32;
use num_complex::Complex64;
use num_traits::NumAssign;
use serde::Deserialize;
use serde::Serialize;

mod sealed {
    // Implemented only by the element types in this module.
    pub trait Sealed {}
}

/// Runtime tag identifying the element type of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    F32,
    F64,
    /// `Complex<f32>`, 8 bytes per element.
    C32,
    /// `Complex<f64>`, 16 bytes per element.
    C64,
}

impl DType {
    /// Size of one element in bytes.
    pub fn size_bytes(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F64 => 8,
            DType::C32 => 8,
            DType::C64 => 16,
        }
    }

    /// True for the complex-valued types.
    pub fn is_complex(&self) -> bool {
        matches!(self, DType::C32 | DType::C64)
    }

    /// The name used in reports, following the numpy convention
    /// (`"float32"`, `"complex128"`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            DType::F32 => "float32",
            DType::F64 => "float64",
            DType::C32 => "complex64",
            DType::C64 => "complex128",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A numeric type a [`Storage`](crate::Storage) buffer can hold.
///
/// The trait is sealed; the four implementations in this module are the
/// whole set. The bounds cover everything the storage layer needs:
/// elementwise and scalar arithmetic (`NumAssign`, `ScalarOperand`),
/// cheap copies, and a zero default for freshly allocated regions.
pub trait Element:
    Copy
    + Default
    + PartialEq
    + fmt::Debug
    + Send
    + Sync
    + 'static
    + NumAssign
    + ScalarOperand
    + sealed::Sealed
{
    /// The runtime tag for this type.
    const DTYPE: DType;

    /// Embeds a real scalar, mapping onto the real axis for the complex
    /// types.
    fn from_real(value: f64) -> Self;
}

impl sealed::Sealed for f32 {}
impl sealed::Sealed for f64 {}
impl sealed::Sealed for Complex32 {}
impl sealed::Sealed for Complex64 {}

impl Element for f32 {
    const DTYPE: DType = DType::F32;

    fn from_real(value: f64) -> Self {
        value as f32
    }
}

impl Element for f64 {
    const DTYPE: DType = DType::F64;

    fn from_real(value: f64) -> Self {
        value
    }
}

impl Element for Complex32 {
    const DTYPE: DType = DType::C32;

    fn from_real(value: f64) -> Self {
        Complex32::new(value as f32, 0.0)
    }
}

impl Element for Complex64 {
    const DTYPE: DType = DType::C64;

    fn from_real(value: f64) -> Self {
        Complex64::new(value, 0.0)
    }
}
