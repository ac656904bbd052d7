/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Views: windowed, coordinate-addressed references into a storage.
//!
//! A [`View`] owns no data. It records where a window sits in physical
//! space (`coord`), how large it is ([`Extent`]), which logical layer
//! it addresses, and whether it takes part in bulk operations
//! (`active`). The discrete footprint ([`Window`]) and the resolved
//! buffer layer (`dlayer`) are derived fields, recomputed by the owning
//! storage on update and reformat; mutating the rule fields does not
//! refresh them. Bulk edits followed by a single
//! [`reformat`](crate::Container::reformat) is the intended pattern.

use std::fmt;

use pixgrid::Extent;
use pixgrid::Shape2;
use pixgrid::Vector2;
use pixgrid::Window;
use serde::Deserialize;
use serde::Serialize;

use crate::storage::DEFAULT_PIXEL_SIZE;
use crate::storage::StorageId;

/// Identifier of a [`View`] within its owning container.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize
)]
pub struct ViewId(String);

impl ViewId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ViewId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ViewId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The parameters a view is created from.
///
/// All fields have defaults: an anonymous storage, a full-frame extent,
/// the physical origin, unit pixel size, layer 0, active. A rule whose
/// `storage_id` does not resolve causes the storage to be created on
/// the spot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRule {
    pub storage_id: Option<StorageId>,
    pub extent: Extent,
    pub coord: Vector2,
    pub psize: Option<Vector2>,
    pub layer: usize,
    pub active: bool,
}

impl Default for AccessRule {
    fn default() -> Self {
        Self {
            storage_id: None,
            extent: Extent::Full,
            coord: Vector2::splat(0.0),
            psize: Some(Vector2::splat(DEFAULT_PIXEL_SIZE)),
            layer: 0,
            active: true,
        }
    }
}

/// A windowed reference into one storage, addressed in physical
/// coordinates.
///
/// The rule fields (`extent`, `coord`, `psize`, `layer`, `active`) are
/// freely mutable; the derived geometry (`window`, `dlayer`) is
/// read-only and owned by the update/reformat machinery. A view is tied
/// to one storage ID for its whole life.
#[derive(Debug, Clone)]
pub struct View {
    storage_id: StorageId,
    /// Requested window extent. `Full` re-resolves against the storage
    /// frame on every update.
    pub extent: Extent,
    /// Physical-space center of the window.
    pub coord: Vector2,
    /// Pixel size. Synced from the storage on every update; the
    /// storage is authoritative.
    pub psize: Option<Vector2>,
    /// Logical layer index, translated through the storage layer map.
    pub layer: usize,
    /// Inactive views are skipped by update, reformat and coverage,
    /// but stay valid.
    pub active: bool,
    window: Window,
    dlayer: usize,
}

impl View {
    pub(crate) fn from_rule(storage_id: StorageId, rule: &AccessRule) -> Self {
        Self {
            storage_id,
            extent: rule.extent,
            coord: rule.coord,
            psize: rule.psize,
            layer: rule.layer,
            active: rule.active,
            window: Window::default(),
            dlayer: 0,
        }
    }

    /// The storage this view windows into.
    pub fn storage_id(&self) -> &StorageId {
        &self.storage_id
    }

    /// The discrete pixel-space footprint, as of the last update.
    pub fn window(&self) -> &Window {
        &self.window
    }

    /// The resolved spatial shape, as of the last update.
    pub fn shape(&self) -> Shape2 {
        self.window.shape()
    }

    /// The buffer layer this view resolves to, as assigned by the last
    /// reformat.
    pub fn dlayer(&self) -> usize {
        self.dlayer
    }

    pub(crate) fn set_window(&mut self, window: Window) {
        self.window = window;
    }

    pub(crate) fn set_dlayer(&mut self, dlayer: usize) {
        self.dlayer = dlayer;
    }
}
