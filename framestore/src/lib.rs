/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Addressable frame buffers for iterative reconstruction pipelines.
//!
//! The crate separates bulk pixel data from the bookkeeping needed to
//! address it:
//!
//! - [`Container`]: a named collection of [`Storage`]s of one element
//!   type, plus the [`View`]s into them and the ID [`Registry`] naming
//!   all three.
//! - [`Storage`]: a resizable `(layers, rows, cols)` buffer tied to a
//!   physical coordinate system ([`pixgrid::PixelGrid`]).
//! - [`View`]: a windowed, physical-coordinate reference into one
//!   storage; owns no data.
//!
//! Clients declare where views sit in physical space; storages reshape
//! themselves to the views' collective footprint on
//! [`reformat`](Container::reformat). Buffers hold one of the four
//! float element types ([`Element`]), and copies of a container keep
//! storage IDs stable so views resolve against original and copy
//! alike.

/// Collective reduction over replicated buffers.
pub mod collective;
pub use collective::Collective;
pub use collective::ReduceOp;
pub use collective::SoloComm;

/// Containers of storages and views.
pub mod container;
pub use container::Container;
pub use container::ContainerError;
pub use container::ContainerId;

/// The element types buffers can hold.
pub mod element;
pub use element::DType;
pub use element::Element;

/// Identity bookkeeping for containers, storages and views.
pub mod registry;
pub use registry::Kind;
pub use registry::Registered;
pub use registry::Registry;
pub use registry::RegistryError;

mod report;

/// Layered pixel buffers with physical-coordinate geometry.
pub mod storage;
pub use storage::BufferShape;
pub use storage::DEFAULT_PIXEL_SIZE;
pub use storage::DEFAULT_SHAPE;
pub use storage::MAX_MEGAPIXELS;
pub use storage::Storage;
pub use storage::StorageError;
pub use storage::StorageId;
pub use storage::StorageSpec;

/// Views into storages.
pub mod view;
pub use view::AccessRule;
pub use view::View;
pub use view::ViewId;
