/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Containers: named collections of storages sharing one element type.
//!
//! A [`Container`] owns its [`Storage`]s, the [`View`]s into them, and
//! the [`Registry`] that names all three entity kinds. Views address
//! storages by ID, so a view minted against an original container
//! resolves equally well against any [`copy`](Container::copy) of it,
//! which preserves storage IDs. Bulk operations (fill, elementwise
//! arithmetic, collective reduction, reformat) run over every storage
//! in ID order.

use std::collections::BTreeMap;
use std::fmt;

use itertools::Itertools;
use ndarray::Array3;
use ndarray::ArrayView2;
use ndarray::ArrayViewMut2;
use pixgrid::Extent;
use pixgrid::Vector2;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::collective::Collective;
use crate::collective::ReduceOp;
use crate::element::DType;
use crate::element::Element;
use crate::registry::Kind;
use crate::registry::Registry;
use crate::registry::RegistryError;
use crate::report;
use crate::storage::BufferShape;
use crate::storage::DEFAULT_PIXEL_SIZE;
use crate::storage::Storage;
use crate::storage::StorageError;
use crate::storage::StorageId;
use crate::storage::StorageSpec;
use crate::view::AccessRule;
use crate::view::View;
use crate::view::ViewId;

/// Identifier of a [`Container`].
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize
)]
pub struct ContainerId(String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContainerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ContainerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Errors surfaced by container operations.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// `new_storage` refuses to displace a live storage.
    #[error("storage {id} already exists")]
    DuplicateStorageId { id: StorageId },

    #[error("no storage {id}")]
    UnknownStorage { id: StorageId },

    #[error("no view {id}")]
    UnknownView { id: ViewId },

    /// Copy bookkeeping lives on the original container only.
    #[error("container {id} is a copy of {original}")]
    NotOriginal {
        id: ContainerId,
        original: ContainerId,
    },

    /// Elementwise arithmetic requires same-ID storages to agree on
    /// buffer shape.
    #[error("storage {id}: buffer shapes differ, {expected:?} vs {got:?}")]
    ShapeMismatch {
        id: StorageId,
        expected: (usize, usize, usize),
        got: (usize, usize, usize),
    },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Collective(#[from] anyhow::Error),
}

/// A named collection of storages of one element type, the views into
/// them, and the registry naming both.
#[derive(Debug)]
pub struct Container<T: Element> {
    id: ContainerId,
    storages: BTreeMap<StorageId, Storage<T>>,
    views: BTreeMap<ViewId, View>,
    registry: Registry,
    original: ContainerId,
    copies: Vec<ContainerId>,
    copy_count: usize,
}

impl<T: Element> Container<T> {
    /// A container with a lenient registry: ID collisions warn and
    /// overwrite. The name gains the `"C"` prefix unless it already
    /// carries it.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_registry(name.into(), Registry::new())
    }

    /// A container with a strict registry: ID collisions fail instead
    /// of overwriting.
    pub fn new_strict(name: impl Into<String>) -> Self {
        Self::with_registry(name.into(), Registry::strict())
    }

    fn with_registry(name: String, mut registry: Registry) -> Self {
        let id = ContainerId::new(Registry::qualify(Kind::Container, &name));
        registry.adopt(Kind::Container, id.as_str());
        Self {
            id: id.clone(),
            storages: BTreeMap::new(),
            views: BTreeMap::new(),
            registry,
            original: id,
            copies: Vec::new(),
            copy_count: 0,
        }
    }

    pub fn id(&self) -> &ContainerId {
        &self.id
    }

    /// The element type every storage in this container holds.
    pub fn dtype(&self) -> DType {
        T::DTYPE
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The container this one was copied from; an original names
    /// itself.
    pub fn original(&self) -> &ContainerId {
        &self.original
    }

    pub fn is_original(&self) -> bool {
        self.original == self.id
    }

    /// The copies minted from this container, in creation order.
    pub fn copies(&self) -> &[ContainerId] {
        &self.copies
    }

    /// Creates a storage under the given name, or a synthesized
    /// `S%04d` one. Unlike view IDs, a storage ID collision is always
    /// an error: silently displacing a buffer would orphan its views.
    pub fn new_storage(
        &mut self,
        name: Option<&str>,
        spec: StorageSpec<T>,
    ) -> Result<StorageId, ContainerError> {
        let id = match name {
            Some(name) => {
                let id = StorageId::new(Registry::qualify(Kind::Storage, name));
                if self.storages.contains_key(&id) {
                    return Err(ContainerError::DuplicateStorageId { id });
                }
                self.registry.register(Kind::Storage, Some(name))?;
                id
            }
            None => StorageId::new(self.registry.register(Kind::Storage, None)?.id),
        };
        let storage = match Storage::new(id.clone(), spec) {
            Ok(storage) => storage,
            Err(err) => {
                self.registry.release(Kind::Storage, id.as_str());
                return Err(err.into());
            }
        };
        tracing::debug!(container = %self.id, storage = %id, "created storage");
        self.storages.insert(id.clone(), storage);
        Ok(id)
    }

    pub fn storage(&self, id: &StorageId) -> Result<&Storage<T>, ContainerError> {
        self.storages
            .get(id)
            .ok_or_else(|| ContainerError::UnknownStorage { id: id.clone() })
    }

    pub fn storage_mut(&mut self, id: &StorageId) -> Result<&mut Storage<T>, ContainerError> {
        self.storages
            .get_mut(id)
            .ok_or_else(|| ContainerError::UnknownStorage { id: id.clone() })
    }

    /// Storages in ID order.
    pub fn storages(&self) -> impl Iterator<Item = (&StorageId, &Storage<T>)> + '_ {
        self.storages.iter()
    }

    /// Removes a storage and frees its ID for reuse. Views that were
    /// tied to it keep their IDs but no longer resolve.
    pub fn discard_storage(&mut self, id: &StorageId) -> Result<Storage<T>, ContainerError> {
        let storage = self
            .storages
            .remove(id)
            .ok_or_else(|| ContainerError::UnknownStorage { id: id.clone() })?;
        self.registry.release(Kind::Storage, id.as_str());
        Ok(storage)
    }

    /// Creates a view from an access rule.
    ///
    /// A rule naming a storage that does not exist yet causes that
    /// storage to be created on the spot, with the rule's pixel size
    /// and a bootstrap frame sized to the rule's extent. A rule naming
    /// no storage gets a fresh anonymous one. An active view has its
    /// window resolved immediately; its buffer layer is assigned by the
    /// next reformat.
    pub fn new_view(
        &mut self,
        name: Option<&str>,
        rule: AccessRule,
    ) -> Result<ViewId, ContainerError> {
        let storage_id = match &rule.storage_id {
            Some(requested) => {
                let id = StorageId::new(Registry::qualify(Kind::Storage, requested.as_str()));
                if self.storages.contains_key(&id) {
                    id
                } else {
                    self.new_storage(Some(requested.as_str()), Self::bootstrap_spec(&rule))?
                }
            }
            None => self.new_storage(None, Self::bootstrap_spec(&rule))?,
        };
        if let (Some(psize), Some(storage)) = (rule.psize, self.storages.get(&storage_id)) {
            // The storage's pixel size is authoritative; a view cannot
            // impose its own.
            if !psize.approx_eq(storage.pixel_size()) {
                tracing::warn!(
                    storage = %storage_id,
                    requested = ?psize,
                    actual = ?storage.pixel_size(),
                    "view pixel size differs from storage, storage wins"
                );
            }
        }
        let view_id = ViewId::new(self.registry.register(Kind::View, name)?.id);
        let mut view = View::from_rule(storage_id.clone(), &rule);
        if view.active {
            if let Some(storage) = self.storages.get(&storage_id) {
                storage.update_view(&mut view);
            }
        }
        tracing::debug!(container = %self.id, view = %view_id, storage = %storage_id, "created view");
        self.views.insert(view_id.clone(), view);
        Ok(view_id)
    }

    fn bootstrap_spec(rule: &AccessRule) -> StorageSpec<T> {
        StorageSpec {
            shape: match rule.extent {
                Extent::Fixed(shape) => BufferShape::Spatial(shape.rows, shape.cols),
                Extent::Full => BufferShape::default(),
            },
            psize: rule.psize.unwrap_or(Vector2::splat(DEFAULT_PIXEL_SIZE)),
            ..StorageSpec::default()
        }
    }

    pub fn view(&self, id: &ViewId) -> Result<&View, ContainerError> {
        self.views
            .get(id)
            .ok_or_else(|| ContainerError::UnknownView { id: id.clone() })
    }

    pub fn view_mut(&mut self, id: &ViewId) -> Result<&mut View, ContainerError> {
        self.views
            .get_mut(id)
            .ok_or_else(|| ContainerError::UnknownView { id: id.clone() })
    }

    /// Views in ID order.
    pub fn views(&self) -> impl Iterator<Item = (&ViewId, &View)> + '_ {
        self.views.iter()
    }

    /// Removes a view and frees its ID for reuse.
    pub fn remove_view(&mut self, id: &ViewId) -> Result<View, ContainerError> {
        let view = self
            .views
            .remove(id)
            .ok_or_else(|| ContainerError::UnknownView { id: id.clone() })?;
        self.registry.release(Kind::View, id.as_str());
        Ok(view)
    }

    /// The views tied to one storage, optionally restricted to active
    /// ones.
    pub fn views_in_storage(&self, id: &StorageId, active_only: bool) -> Vec<&View> {
        self.views
            .values()
            .filter(|view| view.storage_id() == id && (!active_only || view.active))
            .collect()
    }

    /// Per-pixel count of active views covering each element of a
    /// storage buffer.
    pub fn view_coverage(&self, id: &StorageId) -> Result<Array3<u32>, ContainerError> {
        let storage = self.storage(id)?;
        let views = self.views_in_storage(id, true);
        Ok(storage.view_coverage(&views))
    }

    /// Changes a storage's pixel size, keeping its center pixel, then
    /// refreshes every view tied to it.
    pub fn set_pixel_size(
        &mut self,
        id: &StorageId,
        pixel_size: Vector2,
    ) -> Result<(), ContainerError> {
        self.storages
            .get_mut(id)
            .ok_or_else(|| ContainerError::UnknownStorage { id: id.clone() })?
            .set_pixel_size(pixel_size)
            .map_err(StorageError::from)?;
        self.update(id)
    }

    /// Moves a storage's physical origin, then refreshes its views.
    pub fn set_origin(&mut self, id: &StorageId, origin: Vector2) -> Result<(), ContainerError> {
        self.storages
            .get_mut(id)
            .ok_or_else(|| ContainerError::UnknownStorage { id: id.clone() })?
            .set_origin(origin);
        self.update(id)
    }

    /// Moves a storage's center pixel, then refreshes its views.
    pub fn set_center(&mut self, id: &StorageId, center: Vector2) -> Result<(), ContainerError> {
        self.storages
            .get_mut(id)
            .ok_or_else(|| ContainerError::UnknownStorage { id: id.clone() })?
            .set_center(center);
        self.update(id)
    }

    /// Recomputes the window of every active view tied to a storage.
    /// Buffer layers are only reassigned by reformat.
    pub fn update(&mut self, id: &StorageId) -> Result<(), ContainerError> {
        let storage = self
            .storages
            .get(id)
            .ok_or_else(|| ContainerError::UnknownStorage { id: id.clone() })?;
        for view in self.views.values_mut().filter(|view| view.storage_id() == id) {
            storage.update_view(view);
        }
        Ok(())
    }

    /// The window of buffer data a view addresses.
    pub fn get(&self, view: &View) -> Result<ArrayView2<'_, T>, ContainerError> {
        Ok(self.storage(view.storage_id())?.get(view)?)
    }

    /// Mutable access to the window a view addresses. Views are cheap
    /// to clone; clone one out of the container before writing through
    /// it.
    pub fn get_mut(&mut self, view: &View) -> Result<ArrayViewMut2<'_, T>, ContainerError> {
        Ok(self.storage_mut(view.storage_id())?.get_mut(view)?)
    }

    /// Writes a window of data through a view.
    pub fn set(&mut self, view: &View, data: ArrayView2<'_, T>) -> Result<(), ContainerError> {
        Ok(self.storage_mut(view.storage_id())?.set(view, data)?)
    }

    /// [`get`](Self::get) by view ID.
    pub fn data(&self, id: &ViewId) -> Result<ArrayView2<'_, T>, ContainerError> {
        let view = self.view(id)?;
        self.get(view)
    }

    /// [`get_mut`](Self::get_mut) by view ID.
    pub fn data_mut(&mut self, id: &ViewId) -> Result<ArrayViewMut2<'_, T>, ContainerError> {
        let view = self.view(id)?.clone();
        self.get_mut(&view)
    }

    /// [`set`](Self::set) by view ID.
    pub fn set_data(&mut self, id: &ViewId, data: ArrayView2<'_, T>) -> Result<(), ContainerError> {
        let view = self.view(id)?.clone();
        self.set(&view, data)
    }

    /// Fills every storage buffer with one value.
    pub fn fill(&mut self, value: T) {
        for storage in self.storages.values_mut() {
            storage.fill(value);
        }
    }

    /// Shrinks every buffer to `(layers, 1, 1)` of fill value,
    /// releasing the spatial allocations. Geometry and views survive; a
    /// reformat restores the shapes the views need.
    pub fn clear(&mut self) {
        for storage in self.storages.values_mut() {
            storage.clear();
        }
    }

    fn zip_storages<F>(&mut self, other: &Container<T>, mut apply: F) -> Result<(), ContainerError>
    where
        F: FnMut(&mut Array3<T>, &Array3<T>),
    {
        for (id, storage) in self.storages.iter_mut() {
            // Storages present on only one side are left alone.
            let Some(source) = other.storages.get(id) else {
                continue;
            };
            if source.shape() != storage.shape() {
                return Err(ContainerError::ShapeMismatch {
                    id: id.clone(),
                    expected: storage.shape(),
                    got: source.shape(),
                });
            }
            apply(storage.buffer_mut(), source.buffer());
        }
        Ok(())
    }

    /// `self += other`, storage by storage, matched by ID.
    pub fn add_in_place(&mut self, other: &Container<T>) -> Result<(), ContainerError> {
        self.zip_storages(other, |dst, src| *dst += src)
    }

    /// `self -= other`, storage by storage, matched by ID.
    pub fn sub_in_place(&mut self, other: &Container<T>) -> Result<(), ContainerError> {
        self.zip_storages(other, |dst, src| *dst -= src)
    }

    /// `self *= other`, elementwise, storage by storage, matched by ID.
    pub fn mul_in_place(&mut self, other: &Container<T>) -> Result<(), ContainerError> {
        self.zip_storages(other, |dst, src| *dst *= src)
    }

    /// `self /= other`, elementwise, storage by storage, matched by ID.
    pub fn div_in_place(&mut self, other: &Container<T>) -> Result<(), ContainerError> {
        self.zip_storages(other, |dst, src| *dst /= src)
    }

    /// Overwrites matching storages with `other`'s buffer contents.
    pub fn assign_from(&mut self, other: &Container<T>) -> Result<(), ContainerError> {
        self.zip_storages(other, |dst, src| dst.assign(src))
    }

    /// Adds a scalar to every element of every storage.
    pub fn add_scalar(&mut self, value: T) {
        for storage in self.storages.values_mut() {
            *storage.buffer_mut() += value;
        }
    }

    /// Subtracts a scalar from every element of every storage.
    pub fn sub_scalar(&mut self, value: T) {
        for storage in self.storages.values_mut() {
            *storage.buffer_mut() -= value;
        }
    }

    /// Multiplies every element of every storage by a scalar.
    pub fn mul_scalar(&mut self, value: T) {
        for storage in self.storages.values_mut() {
            *storage.buffer_mut() *= value;
        }
    }

    /// Divides every element of every storage by a scalar.
    pub fn div_scalar(&mut self, value: T) {
        for storage in self.storages.values_mut() {
            *storage.buffer_mut() /= value;
        }
    }

    /// Reduces every storage buffer in place across the communicator's
    /// ranks.
    pub fn all_reduce(
        &mut self,
        comm: &dyn Collective<T>,
        op: ReduceOp,
    ) -> Result<(), ContainerError> {
        for storage in self.storages.values_mut() {
            storage.all_reduce(comm, op)?;
        }
        Ok(())
    }

    /// A deep copy under an auto-generated `{id}_copy{n}` name, with
    /// buffer data duplicated.
    pub fn copy(&mut self) -> Result<Container<T>, ContainerError> {
        let name = format!("{}_copy{}", self.id, self.copy_count);
        self.copy_with(name, None)
    }

    /// A deep copy under an explicit name, optionally with every buffer
    /// set to a fill value instead of duplicating data.
    pub fn copy_as(
        &mut self,
        name: impl Into<String>,
        fill: Option<T>,
    ) -> Result<Container<T>, ContainerError> {
        self.copy_with(name.into(), fill)
    }

    fn copy_with(&mut self, name: String, fill: Option<T>) -> Result<Container<T>, ContainerError> {
        let registered = self.registry.register(Kind::Container, Some(&name))?;
        let id = ContainerId::new(registered.id);
        let mut registry = if self.registry.is_strict() {
            Registry::strict()
        } else {
            Registry::new()
        };
        registry.adopt(Kind::Container, id.as_str());
        // Storage IDs carry over unchanged so that views minted against
        // the original resolve against the copy. Views themselves are
        // not copied.
        let mut storages = BTreeMap::new();
        for (storage_id, storage) in &self.storages {
            registry.adopt(Kind::Storage, storage_id.as_str());
            storages.insert(storage_id.clone(), storage.duplicate(storage_id.clone(), fill));
        }
        self.copies.push(id.clone());
        self.copy_count += 1;
        tracing::debug!(container = %self.id, copy = %id, "copied container");
        Ok(Container {
            id: id.clone(),
            storages,
            views: BTreeMap::new(),
            registry,
            original: self.id.clone(),
            copies: Vec::new(),
            copy_count: 0,
        })
    }

    /// Drops a copy from the tracking list and frees its name. Only the
    /// original tracks copies.
    pub fn forget_copy(&mut self, id: &ContainerId) -> Result<(), ContainerError> {
        if !self.is_original() {
            return Err(ContainerError::NotOriginal {
                id: self.id.clone(),
                original: self.original.clone(),
            });
        }
        self.copies.retain(|copy| copy != id);
        self.registry.release(Kind::Container, id.as_str());
        Ok(())
    }

    /// Reformats every storage against its active views, in ID order.
    pub fn reformat(&mut self) -> Result<(), ContainerError> {
        let ids: Vec<StorageId> = self.storages.keys().cloned().collect();
        for id in &ids {
            self.reformat_storage(id)?;
        }
        Ok(())
    }

    /// Reformats one storage: refreshes its views' windows, then grows,
    /// shrinks and re-layers the buffer to their footprint.
    #[tracing::instrument(level = "debug", skip(self), fields(container = %self.id))]
    pub fn reformat_storage(&mut self, id: &StorageId) -> Result<(), ContainerError> {
        let storage = self
            .storages
            .get_mut(id)
            .ok_or_else(|| ContainerError::UnknownStorage { id: id.clone() })?;
        let mut views: Vec<&mut View> = self
            .views
            .values_mut()
            .filter(|view| view.storage_id() == id)
            .collect();
        storage.reformat(&mut views)?;
        Ok(())
    }

    /// Reformats every storage, then brings the given copies to the
    /// same geometry using this container's views. Copies missing a
    /// storage skip it.
    pub fn reformat_with_copies(
        &mut self,
        copies: &mut [&mut Container<T>],
    ) -> Result<(), ContainerError> {
        let ids: Vec<StorageId> = self.storages.keys().cloned().collect();
        for id in &ids {
            self.reformat_storage(id)?;
            for copy in copies.iter_mut() {
                let Some(storage) = copy.storages.get_mut(id) else {
                    continue;
                };
                let mut views: Vec<&mut View> = self
                    .views
                    .values_mut()
                    .filter(|view| view.storage_id() == id)
                    .collect();
                storage.reformat(&mut views)?;
            }
        }
        Ok(())
    }

    /// Total element count over all storages.
    pub fn total_elements(&self) -> usize {
        self.storages.values().map(|storage| storage.len()).sum()
    }

    /// Total buffer memory in bytes over all storages.
    pub fn total_bytes(&self) -> usize {
        self.storages.values().map(|storage| storage.nbytes()).sum()
    }

    /// A plain-text report of the container and each of its storages.
    pub fn report(&self) -> String {
        let mut info = format!("Containers ID: {}\n", self.id);
        for (id, storage) in &self.storages {
            info += &format!("Storage {}\n", id);
            info += &storage.report(self.views_in_storage(id, true).len());
        }
        info
    }

    /// A fixed-width table: one header, one row for the container, one
    /// row per storage.
    pub fn formatted_report(&self) -> String {
        let rows = self
            .storages
            .iter()
            .map(|(id, storage)| storage.formatted_row(self.views_in_storage(id, true).len()))
            .join("\n");
        let total_mb = self.total_bytes() as f64 / 1e6;
        let mut out = report::header();
        out += &report::container_row(self.id.as_str(), total_mb, T::DTYPE);
        out.push('\n');
        if !rows.is_empty() {
            out += &rows;
            out.push('\n');
        }
        out
    }
}
