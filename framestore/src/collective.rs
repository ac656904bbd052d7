/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The collective-reduction seam.
//!
//! Multi-process reconstruction reduces storage buffers across a fixed
//! process group. This crate only iterates buffers and hands each one
//! to a [`Collective`]; the transport (MPI, NCCL, ...) is supplied by
//! the engine. [`SoloComm`] is the single-process implementation where
//! every reduction is the identity.

use serde::Deserialize;
use serde::Serialize;

use crate::element::Element;

/// Elementwise reduction applied across the process group.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReduceOp {
    #[default]
    Sum,
    Prod,
    Min,
    Max,
}

/// A distributed in-place all-reduce over element buffers.
///
/// Implementations reduce `buf` elementwise across every process in the
/// group and leave the result in place on all of them. Callers must
/// issue identical call sequences on every process; a failed reduction
/// is fatal to the group.
pub trait Collective<T: Element>: Send + Sync {
    fn all_reduce(&self, buf: &mut [T], op: ReduceOp) -> anyhow::Result<()>;
}

/// The single-process group: every reduction is the identity.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoloComm;

impl<T: Element> Collective<T> for SoloComm {
    fn all_reduce(&self, _buf: &mut [T], _op: ReduceOp) -> anyhow::Result<()> {
        Ok(())
    }
}
