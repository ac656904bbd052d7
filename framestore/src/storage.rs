/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Storages: owned, resizable 3D buffers with a physical coordinate
//! system.
//!
//! A [`Storage`] holds one `(layer, row, col)` buffer, the
//! [`PixelGrid`] mapping physical coordinates onto its spatial axes,
//! and a layer map translating sparse logical layer indices (scan frame
//! numbers, say) into dense buffer positions. Views address the buffer
//! through the grid; [`Storage::reformat`] grows or shrinks the buffer
//! to the union of the active views' footprints and renumbers the layer
//! map to exactly the layers in use.

use std::collections::BTreeSet;
use std::fmt;

use anyhow::bail;
use ndarray::Array3;
use ndarray::ArrayD;
use ndarray::ArrayView2;
use ndarray::ArrayViewMut2;
use ndarray::Axis;
use ndarray::Ix3;
use ndarray::s;
use pixgrid::GridError;
use pixgrid::Index2;
use pixgrid::Misfit;
use pixgrid::PixelBox;
use pixgrid::PixelGrid;
use pixgrid::Shape2;
use pixgrid::Vector2;
use pixgrid::Window;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::collective::Collective;
use crate::collective::ReduceOp;
use crate::element::DType;
use crate::element::Element;
use crate::report;
use crate::view::View;

/// Pixel size assumed when a spec omits one.
pub const DEFAULT_PIXEL_SIZE: f64 = 1.0;

/// Buffer shape assumed when a spec omits one.
pub const DEFAULT_SHAPE: (usize, usize, usize) = (1, 1, 1);

/// Ceiling on the element count a reformat may grow a buffer to, in
/// millions.
pub const MAX_MEGAPIXELS: f64 = 20.0;

/// Identifier of a [`Storage`] within its owning container. Storage IDs
/// are preserved by container copies, so a view resolves on any copy.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize
)]
pub struct StorageId(String);

impl StorageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StorageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for StorageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Errors that can occur constructing or operating on a storage.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid buffer shape: expected 2 or 3 dimensions, got {rank}")]
    InvalidShape { rank: usize },

    #[error(
        "arrays larger than {}M elements not supported, requested {megapixels:.2}M",
        MAX_MEGAPIXELS
    )]
    BufferTooLarge { megapixels: f64 },

    #[error("view belongs to storage {got}, not {expected}")]
    ViewNotOwned { expected: StorageId, got: StorageId },

    #[error("window [{low:?}, {high:?}) at layer {layer} outside buffer of shape {shape:?}")]
    WindowOutOfBounds {
        low: Index2,
        high: Index2,
        layer: usize,
        shape: (usize, usize, usize),
    },

    #[error("data of shape {got:?} does not match window of shape {expected:?}")]
    DataShapeMismatch { expected: Shape2, got: Shape2 },

    #[error("layer map with {entries} entries cannot index {layers} buffer layers")]
    InvalidLayerMap { layers: usize, entries: usize },

    #[error(transparent)]
    Grid(#[from] GridError),
}

/// Shape argument for storage construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BufferShape {
    /// One layer of `n` x `n` pixels.
    Square(usize),
    /// One layer of `h` x `w` pixels.
    Spatial(usize, usize),
    /// `l` layers of `h` x `w` pixels.
    Layered(usize, usize, usize),
}

impl BufferShape {
    /// Builds a shape from a dynamic dimension list. Rank 2 is promoted
    /// to a single layer; anything else but rank 3 is rejected.
    pub fn from_dims(dims: &[usize]) -> Result<Self, StorageError> {
        match *dims {
            [h, w] => Ok(BufferShape::Spatial(h, w)),
            [l, h, w] => Ok(BufferShape::Layered(l, h, w)),
            _ => Err(StorageError::InvalidShape { rank: dims.len() }),
        }
    }

    /// The concrete `(layers, rows, cols)` dimensions.
    pub fn dims(&self) -> (usize, usize, usize) {
        match *self {
            BufferShape::Square(n) => (1, n, n),
            BufferShape::Spatial(h, w) => (1, h, w),
            BufferShape::Layered(l, h, w) => (l, h, w),
        }
    }
}

impl Default for BufferShape {
    fn default() -> Self {
        let (l, h, w) = DEFAULT_SHAPE;
        BufferShape::Layered(l, h, w)
    }
}

/// Construction parameters for a storage. Everything defaults: one 1x1
/// layer, no initial data, zero fill, unit pixel size, a center-derived
/// origin, the identity layer map, crop-and-pad reformat.
#[derive(Debug, Clone)]
pub struct StorageSpec<T: Element> {
    pub shape: BufferShape,
    /// Initial buffer contents; overrides `shape`. Rank 2 is promoted
    /// to a single layer.
    pub data: Option<ArrayD<T>>,
    /// Scalar used for new or grown regions.
    pub fill: T,
    pub psize: Vector2,
    /// Physical coordinate of pixel `(0, 0)`; overrides the center
    /// bootstrap.
    pub origin: Option<Vector2>,
    /// Logical layer indices, one per buffer layer, unique. Defaults to
    /// `0..layers`.
    pub layer_map: Option<Vec<usize>>,
    /// Reformat may only grow the buffer, never shrink it.
    pub pad_only: bool,
}

impl<T: Element> Default for StorageSpec<T> {
    fn default() -> Self {
        Self {
            shape: BufferShape::default(),
            data: None,
            fill: T::default(),
            psize: Vector2::splat(DEFAULT_PIXEL_SIZE),
            origin: None,
            layer_map: None,
            pad_only: false,
        }
    }
}

/// An owned, resizable `(layer, row, col)` buffer plus the physical
/// coordinate system over its spatial axes.
///
/// The buffer is always allocated; a storage is born at its spec shape
/// and reshaped exclusively by [`reformat`](Storage::reformat). Identity
/// (the [`StorageId`]) survives every resize, which is why views hold
/// the ID rather than any pointer into the buffer.
#[derive(Debug)]
pub struct Storage<T: Element> {
    id: StorageId,
    buffer: Array3<T>,
    layer_map: Vec<usize>,
    grid: PixelGrid,
    fill_value: T,
    pad_only: bool,
}

impl<T: Element> Storage<T> {
    pub(crate) fn new(id: StorageId, spec: StorageSpec<T>) -> Result<Self, StorageError> {
        let buffer = match spec.data {
            Some(data) => Self::promote(data)?,
            None => {
                let (l, h, w) = spec.shape.dims();
                Array3::from_elem((l, h, w), spec.fill)
            }
        };
        let (layers, rows, cols) = buffer.dim();
        let layer_map = match spec.layer_map {
            Some(map) => {
                if map.len() != layers {
                    return Err(StorageError::InvalidLayerMap {
                        layers,
                        entries: map.len(),
                    });
                }
                let distinct: BTreeSet<usize> = map.iter().copied().collect();
                if distinct.len() != layers {
                    return Err(StorageError::InvalidLayerMap {
                        layers,
                        entries: distinct.len(),
                    });
                }
                map
            }
            None => (0..layers).collect(),
        };
        let grid = PixelGrid::new(Shape2::new(rows, cols), spec.psize, spec.origin)?;
        Ok(Self {
            id,
            buffer,
            layer_map,
            grid,
            fill_value: spec.fill,
            pad_only: spec.pad_only,
        })
    }

    fn promote(data: ArrayD<T>) -> Result<Array3<T>, StorageError> {
        let rank = data.ndim();
        let data = match rank {
            2 => data.insert_axis(Axis(0)),
            3 => data,
            _ => return Err(StorageError::InvalidShape { rank }),
        };
        data.into_dimensionality::<Ix3>()
            .map_err(|_| StorageError::InvalidShape { rank })
    }

    pub fn id(&self) -> &StorageId {
        &self.id
    }

    /// The full `(layers, rows, cols)` shape.
    pub fn shape(&self) -> (usize, usize, usize) {
        self.buffer.dim()
    }

    /// The spatial `(rows, cols)` shape.
    pub fn spatial_shape(&self) -> Shape2 {
        let (_, rows, cols) = self.buffer.dim();
        Shape2::new(rows, cols)
    }

    pub fn layers(&self) -> usize {
        self.buffer.dim().0
    }

    /// Logical layer index per buffer position.
    pub fn layer_map(&self) -> &[usize] {
        &self.layer_map
    }

    pub fn grid(&self) -> &PixelGrid {
        &self.grid
    }

    pub fn pixel_size(&self) -> Vector2 {
        self.grid.pixel_size()
    }

    /// The pixel coordinate of the physical origin.
    pub fn center(&self) -> Vector2 {
        self.grid.center()
    }

    /// The physical coordinate of pixel `(0, 0)`.
    pub fn origin(&self) -> Vector2 {
        self.grid.origin()
    }

    pub fn fill_value(&self) -> T {
        self.fill_value
    }

    pub fn pad_only(&self) -> bool {
        self.pad_only
    }

    pub fn dtype(&self) -> DType {
        T::DTYPE
    }

    pub fn buffer(&self) -> &Array3<T> {
        &self.buffer
    }

    /// Raw mutable access. Callers serialize mutation; one writer per
    /// buffer.
    pub fn buffer_mut(&mut self) -> &mut Array3<T> {
        &mut self.buffer
    }

    /// Total element count.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Total buffer size in bytes.
    pub fn nbytes(&self) -> usize {
        self.buffer.len() * T::DTYPE.size_bytes()
    }

    /// Physical coordinates to continuous pixel coordinates.
    pub fn to_pixel(&self, coord: Vector2) -> Vector2 {
        self.grid.to_pixel(coord)
    }

    /// Continuous pixel coordinates to physical coordinates.
    pub fn to_physical(&self, pixel: Vector2) -> Vector2 {
        self.grid.to_physical(pixel)
    }

    pub(crate) fn set_pixel_size(&mut self, pixel_size: Vector2) -> Result<(), GridError> {
        self.grid.set_pixel_size(pixel_size)
    }

    pub(crate) fn set_origin(&mut self, origin: Vector2) {
        self.grid.set_origin(origin);
    }

    pub(crate) fn set_center(&mut self, center: Vector2) {
        self.grid.set_center(center);
    }

    /// Recomputes the derived geometry of one view against this
    /// storage.
    ///
    /// Syncs the view's pixel size, resolves a full-frame extent
    /// against the current spatial shape (recentering the view's
    /// physical coordinate on the frame), and places the discrete
    /// window. Inactive views are left untouched. `dlayer` is not
    /// touched either; only reformat reassigns it.
    pub fn update_view(&self, view: &mut View) {
        if !view.active {
            return;
        }
        view.psize = Some(self.pixel_size());
        let shape = view.extent.resolve(self.spatial_shape());
        let pixel_center = if view.extent.is_full() {
            let pixel_center =
                Vector2::new(shape.rows as f64 / 2.0, shape.cols as f64 / 2.0);
            view.coord = self.to_physical(pixel_center);
            pixel_center
        } else {
            self.to_pixel(view.coord)
        };
        view.set_window(Window::locate(pixel_center, shape));
    }

    /// Resizes the buffer to the union of the active views' footprints
    /// and renumbers the layer map to exactly the layers in use.
    ///
    /// With no active views this is a no-op. Derived view geometry is
    /// refreshed before the footprints are collected and again after
    /// the new buffer and center are installed, and each active view's
    /// `dlayer` is reassigned against the new layer map. Growing past
    /// [`MAX_MEGAPIXELS`] fails with [`StorageError::BufferTooLarge`]
    /// and leaves the buffer unmodified.
    pub(crate) fn reformat(&mut self, views: &mut [&mut View]) -> Result<(), StorageError> {
        for view in views.iter_mut().filter(|v| v.active) {
            self.update_view(view);
        }
        let bounds = match PixelBox::of_windows(
            views.iter().filter(|v| v.active).map(|v| v.window()),
        ) {
            Some(bounds) => bounds,
            None => return Ok(()),
        };

        let spatial = self.spatial_shape();
        let mut misfit = Misfit::between(&bounds, spatial);
        tracing::debug!(
            storage = %self.id,
            views = views.iter().filter(|v| v.active).count(),
            misfit = ?misfit,
            "reformat"
        );

        let acting = misfit.any_positive() || (misfit.any_negative() && !self.pad_only);
        let mut new_center = self.center();
        let mut new_data: Option<Array3<T>> = None;

        if acting {
            if self.pad_only {
                misfit = misfit.growth_only();
            }
            let new_spatial = misfit.adjusted(spatial);
            let megapixels = (self.layers() * new_spatial.area()) as f64 / 1e6;
            if megapixels > MAX_MEGAPIXELS {
                return Err(StorageError::BufferTooLarge { megapixels });
            }
            new_center = new_center + misfit.low.as_vector();
            new_data = Some(self.crop_pad(&misfit));
            tracing::debug!(
                storage = %self.id,
                from = ?spatial,
                to = ?new_spatial,
                center = ?new_center,
                "reformat crop/pad"
            );
        }

        let mut new_layer_map: Vec<usize> = views
            .iter()
            .filter(|v| v.active)
            .map(|v| v.layer)
            .collect();
        new_layer_map.sort_unstable();
        new_layer_map.dedup();
        if new_layer_map != self.layer_map {
            let source = new_data.as_ref().unwrap_or(&self.buffer);
            let (_, rows, cols) = source.dim();
            let mut relaid =
                Array3::from_elem((new_layer_map.len(), rows, cols), self.fill_value);
            for (position, layer) in new_layer_map.iter().enumerate() {
                if let Some(old) = self.layer_map.iter().position(|l| l == layer) {
                    relaid
                        .index_axis_mut(Axis(0), position)
                        .assign(&source.index_axis(Axis(0), old));
                }
            }
            tracing::debug!(
                storage = %self.id,
                from = ?self.layer_map,
                to = ?new_layer_map,
                "reformat layer remap"
            );
            new_data = Some(relaid);
        }

        if let Some(data) = new_data {
            self.buffer = data;
        }
        self.layer_map = new_layer_map;
        self.grid.set_center(new_center);

        for view in views.iter_mut().filter(|v| v.active) {
            self.update_view(view);
            if let Some(position) = self.layer_map.iter().position(|l| *l == view.layer) {
                view.set_dlayer(position);
            }
        }
        Ok(())
    }

    /// Crops and pads the spatial axes by the signed per-side misfit,
    /// copying the overlapping region and filling the rest.
    fn crop_pad(&self, misfit: &Misfit) -> Array3<T> {
        let (layers, rows, cols) = self.buffer.dim();
        let new_spatial = misfit.adjusted(Shape2::new(rows, cols));
        let mut out = Array3::from_elem(
            (layers, new_spatial.rows, new_spatial.cols),
            self.fill_value,
        );

        let src_row = (-misfit.low.row).max(0) as usize;
        let dst_row = misfit.low.row.max(0) as usize;
        let len_row = rows as i64 + misfit.low.row.min(0) + misfit.high.row.min(0);
        let src_col = (-misfit.low.col).max(0) as usize;
        let dst_col = misfit.low.col.max(0) as usize;
        let len_col = cols as i64 + misfit.low.col.min(0) + misfit.high.col.min(0);
        if len_row > 0 && len_col > 0 {
            let len_row = len_row as usize;
            let len_col = len_col as usize;
            out.slice_mut(s![
                ..,
                dst_row..dst_row + len_row,
                dst_col..dst_col + len_col
            ])
            .assign(&self.buffer.slice(s![
                ..,
                src_row..src_row + len_row,
                src_col..src_col + len_col
            ]));
        }
        out
    }

    /// Broadcasts a scalar over the whole buffer.
    pub fn fill(&mut self, value: T) {
        self.buffer.fill(value);
    }

    /// Fills with the storage's own fill value.
    pub fn fill_default(&mut self) {
        self.buffer.fill(self.fill_value);
    }

    /// Replaces the buffer with `frame` replicated across all layers.
    /// The spatial shape follows the frame.
    pub fn fill_frame(&mut self, frame: ArrayView2<'_, T>) {
        let (rows, cols) = frame.dim();
        let mut buffer = Array3::from_elem((self.layers(), rows, cols), self.fill_value);
        for mut layer in buffer.axis_iter_mut(Axis(0)) {
            layer.assign(&frame);
        }
        self.buffer = buffer;
    }

    /// Shrinks the buffer to `(layers, 1, 1)` of fill value, releasing
    /// the spatial allocation. Geometry is untouched; a later reformat
    /// restores the shape the views need.
    pub(crate) fn clear(&mut self) {
        self.buffer = Array3::from_elem((self.layers(), 1, 1), self.fill_value);
    }

    /// Replaces the whole buffer. The layer count must match the layer
    /// map.
    pub fn fill_buffer(&mut self, data: Array3<T>) -> Result<(), StorageError> {
        let layers = data.dim().0;
        if layers != self.layer_map.len() {
            return Err(StorageError::InvalidLayerMap {
                layers,
                entries: self.layer_map.len(),
            });
        }
        self.buffer = data;
        Ok(())
    }

    /// How often each buffer element is covered by the given views.
    /// Active views only; footprints are clipped to the buffer.
    pub fn view_coverage(&self, views: &[&View]) -> Array3<u32> {
        let (layers, rows, cols) = self.buffer.dim();
        let mut coverage = Array3::zeros((layers, rows, cols));
        for view in views.iter().filter(|v| v.active) {
            let window = view.window();
            let row0 = window.low().row.clamp(0, rows as i64) as usize;
            let row1 = window.high().row.clamp(0, rows as i64) as usize;
            let col0 = window.low().col.clamp(0, cols as i64) as usize;
            let col1 = window.high().col.clamp(0, cols as i64) as usize;
            let layer = view.dlayer();
            if layer >= layers || row0 >= row1 || col0 >= col1 {
                continue;
            }
            coverage
                .slice_mut(s![layer, row0..row1, col0..col1])
                .map_inplace(|count| *count += 1);
        }
        coverage
    }

    fn check_view(&self, view: &View) -> Result<(), StorageError> {
        if view.storage_id() != &self.id {
            return Err(StorageError::ViewNotOwned {
                expected: self.id.clone(),
                got: view.storage_id().clone(),
            });
        }
        Ok(())
    }

    fn resolve_window(
        &self,
        view: &View,
    ) -> Result<(usize, usize, usize, usize, usize), StorageError> {
        let shape = self.buffer.dim();
        let window = view.window();
        let low = window.low();
        let high = window.high();
        let layer = view.dlayer();
        if layer >= shape.0
            || low.row < 0
            || low.col < 0
            || high.row > shape.1 as i64
            || high.col > shape.2 as i64
        {
            return Err(StorageError::WindowOutOfBounds {
                low,
                high,
                layer,
                shape,
            });
        }
        Ok((
            layer,
            low.row as usize,
            high.row as usize,
            low.col as usize,
            high.col as usize,
        ))
    }

    /// The sub-array a view addresses.
    pub fn get(&self, view: &View) -> Result<ArrayView2<'_, T>, StorageError> {
        self.check_view(view)?;
        let (layer, row0, row1, col0, col1) = self.resolve_window(view)?;
        Ok(self.buffer.slice(s![layer, row0..row1, col0..col1]))
    }

    /// Mutable access to the sub-array a view addresses.
    pub fn get_mut(&mut self, view: &View) -> Result<ArrayViewMut2<'_, T>, StorageError> {
        self.check_view(view)?;
        let (layer, row0, row1, col0, col1) = self.resolve_window(view)?;
        Ok(self.buffer.slice_mut(s![layer, row0..row1, col0..col1]))
    }

    /// Writes `data` into the sub-array a view addresses. The data must
    /// have exactly the window's shape.
    pub fn set(&mut self, view: &View, data: ArrayView2<'_, T>) -> Result<(), StorageError> {
        self.check_view(view)?;
        let expected = view.shape();
        let (rows, cols) = data.dim();
        if (rows, cols) != (expected.rows, expected.cols) {
            return Err(StorageError::DataShapeMismatch {
                expected,
                got: Shape2::new(rows, cols),
            });
        }
        let (layer, row0, row1, col0, col1) = self.resolve_window(view)?;
        self.buffer
            .slice_mut(s![layer, row0..row1, col0..col1])
            .assign(&data);
        Ok(())
    }

    /// Per-pixel physical coordinates over the whole buffer, one array
    /// of row coordinates and one of column coordinates.
    pub fn grids(&self) -> (Array3<f64>, Array3<f64>) {
        let (layers, rows, cols) = self.buffer.dim();
        let mut grid_rows = Array3::zeros((layers, rows, cols));
        let mut grid_cols = Array3::zeros((layers, rows, cols));
        for row in 0..rows {
            for col in 0..cols {
                let phys = self.to_physical(Vector2::new(row as f64, col as f64));
                for layer in 0..layers {
                    grid_rows[[layer, row, col]] = phys.row;
                    grid_cols[[layer, row, col]] = phys.col;
                }
            }
        }
        (grid_rows, grid_cols)
    }

    /// A deep copy under a new ID, optionally replacing the data with a
    /// uniform fill. Grid, layer map and reformat policy carry over.
    pub(crate) fn duplicate(&self, id: StorageId, fill: Option<T>) -> Storage<T> {
        let buffer = match fill {
            Some(value) => Array3::from_elem(self.buffer.dim(), value),
            None => self.buffer.clone(),
        };
        Storage {
            id,
            buffer,
            layer_map: self.layer_map.clone(),
            grid: self.grid.clone(),
            fill_value: self.fill_value,
            pad_only: self.pad_only,
        }
    }

    /// Reduces the buffer in place across the process group.
    pub fn all_reduce(&mut self, comm: &dyn Collective<T>, op: ReduceOp) -> anyhow::Result<()> {
        match self.buffer.as_slice_mut() {
            Some(buf) => comm.all_reduce(buf, op),
            None => bail!("storage {} buffer is not contiguous", self.id),
        }
    }

    /// A short human-readable summary: shape, pixel size, physical
    /// dimensions, number of active views.
    pub fn report(&self, views: usize) -> String {
        let (layers, rows, cols) = self.buffer.dim();
        let psize = self.pixel_size();
        let mut info = format!("Shape: ({}, {}, {})\n", layers, rows, cols);
        info += &format!(
            "Pixel size (meters): {} x {}\n",
            report::general(psize.row),
            report::general(psize.col)
        );
        info += &format!(
            "Dimensions (meters): {} x {}\n",
            report::general(psize.row * rows as f64),
            report::general(psize.col * cols as f64)
        );
        info += &format!("Number of views: {}\n", views);
        info
    }

    /// One fixed-width table row, as used by the container report.
    pub fn formatted_row(&self, views: usize) -> String {
        let (layers, rows, cols) = self.buffer.dim();
        let psize = self.pixel_size();
        report::storage_row(
            self.id.as_str(),
            &report::RowInfo {
                memory_mb: self.nbytes() as f64 / 1e6,
                shape: (layers, rows, cols),
                psize: (psize.row, psize.col),
                dimension: (psize.row * rows as f64, psize.col * cols as f64),
                views,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array2;
    use ndarray::arr2;
    use ndarray::arr3;
    use pixgrid::Extent;
    use proptest::prelude::*;

    use super::*;
    use crate::view::AccessRule;

    fn storage(spec: StorageSpec<f64>) -> Storage<f64> {
        Storage::new(StorageId::new("S0000"), spec).unwrap()
    }

    fn view_at(coord: (f64, f64), shape: (usize, usize)) -> View {
        View::from_rule(
            StorageId::new("S0000"),
            &AccessRule {
                extent: Extent::Fixed(Shape2::new(shape.0, shape.1)),
                coord: Vector2::new(coord.0, coord.1),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_default_construction() {
        let s = storage(StorageSpec::default());
        assert_eq!(s.shape(), (1, 1, 1));
        assert_eq!(s.layer_map(), &[0]);
        assert_eq!(s.pixel_size(), Vector2::splat(1.0));
        assert_eq!(s.center(), Vector2::splat(0.0));
        assert_eq!(s.nbytes(), 8);
    }

    #[test]
    fn test_square_shape_bootstraps_center() {
        let s = storage(StorageSpec {
            shape: BufferShape::Square(10),
            ..Default::default()
        });
        assert_eq!(s.shape(), (1, 10, 10));
        assert_eq!(s.center(), Vector2::new(5.0, 5.0));
        assert_eq!(s.origin(), Vector2::new(-5.0, -5.0));
    }

    #[test]
    fn test_initial_data_overrides_shape() {
        let data = arr2(&[[1.0, 2.0], [3.0, 4.0]]).into_dyn();
        let s = storage(StorageSpec {
            shape: BufferShape::Square(64),
            data: Some(data),
            ..Default::default()
        });
        assert_eq!(s.shape(), (1, 2, 2));
        assert_eq!(s.buffer()[[0, 1, 0]], 3.0);
    }

    #[test]
    fn test_wrong_rank_data_rejected() {
        let flat = ArrayD::<f64>::zeros(ndarray::IxDyn(&[4]));
        let err = Storage::new(
            StorageId::new("S0000"),
            StorageSpec {
                data: Some(flat),
                ..Default::default()
            },
        );
        assert!(matches!(err, Err(StorageError::InvalidShape { rank: 1 })));

        assert!(matches!(
            BufferShape::from_dims(&[5]),
            Err(StorageError::InvalidShape { rank: 1 })
        ));
        assert!(matches!(
            BufferShape::from_dims(&[1, 2, 3, 4]),
            Err(StorageError::InvalidShape { rank: 4 })
        ));
    }

    #[test]
    fn test_layer_map_validation() {
        let err = Storage::<f64>::new(
            StorageId::new("S0000"),
            StorageSpec {
                shape: BufferShape::Layered(3, 2, 2),
                layer_map: Some(vec![0, 1]),
                ..Default::default()
            },
        );
        assert!(matches!(err, Err(StorageError::InvalidLayerMap { .. })));

        let err = Storage::<f64>::new(
            StorageId::new("S0000"),
            StorageSpec {
                shape: BufferShape::Layered(3, 2, 2),
                layer_map: Some(vec![0, 1, 1]),
                ..Default::default()
            },
        );
        assert!(matches!(err, Err(StorageError::InvalidLayerMap { .. })));
    }

    #[test]
    fn test_update_view_places_window() {
        let s = storage(StorageSpec {
            shape: BufferShape::Square(10),
            ..Default::default()
        });
        let mut v = view_at((0.0, 0.0), (4, 4));
        s.update_view(&mut v);
        assert_eq!(v.window().center(), Index2::new(5, 5));
        assert_eq!(v.window().low(), Index2::new(3, 3));
        assert_eq!(v.window().high(), Index2::new(7, 7));
        assert_eq!(v.psize, Some(Vector2::splat(1.0)));
    }

    #[test]
    fn test_update_view_resolves_full_frame() {
        let s = storage(StorageSpec {
            shape: BufferShape::Spatial(6, 8),
            ..Default::default()
        });
        let mut v = View::from_rule(StorageId::new("S0000"), &AccessRule::default());
        s.update_view(&mut v);
        assert_eq!(v.shape(), Shape2::new(6, 8));
        assert_eq!(v.window().low(), Index2::new(0, 0));
        assert_eq!(v.window().high(), Index2::new(6, 8));
        // The view's physical coordinate lands on the frame center.
        assert_eq!(v.coord, s.to_physical(Vector2::new(3.0, 4.0)));
    }

    #[test]
    fn test_update_view_skips_inactive() {
        let s = storage(StorageSpec {
            shape: BufferShape::Square(10),
            ..Default::default()
        });
        let mut v = view_at((0.0, 0.0), (4, 4));
        v.active = false;
        s.update_view(&mut v);
        assert_eq!(v.shape(), Shape2::new(0, 0));
    }

    #[test]
    fn test_reformat_without_views_is_noop() {
        let mut s = storage(StorageSpec {
            shape: BufferShape::Square(10),
            ..Default::default()
        });
        s.reformat(&mut []).unwrap();
        assert_eq!(s.shape(), (1, 10, 10));
        assert_eq!(s.center(), Vector2::new(5.0, 5.0));
    }

    #[test]
    fn test_reformat_spanning_view_is_noop() {
        let mut s = storage(StorageSpec {
            shape: BufferShape::Square(10),
            ..Default::default()
        });
        s.fill(7.0);
        let mut v = view_at((0.0, 0.0), (10, 10));
        s.reformat(&mut [&mut v]).unwrap();
        assert_eq!(s.shape(), (1, 10, 10));
        assert_eq!(s.center(), Vector2::new(5.0, 5.0));
        assert_eq!(s.buffer()[[0, 0, 0]], 7.0);
        assert_eq!(v.window().low(), Index2::new(0, 0));
        assert_eq!(v.window().high(), Index2::new(10, 10));
        assert_eq!(v.dlayer(), 0);
    }

    #[test]
    fn test_reformat_shrinks_to_footprint() {
        let mut s = storage(StorageSpec {
            shape: BufferShape::Square(10),
            ..Default::default()
        });
        s.fill(1.0);
        let mut v = view_at((0.0, 0.0), (4, 4));
        s.reformat(&mut [&mut v]).unwrap();

        assert_eq!(s.shape(), (1, 4, 4));
        assert_eq!(s.center(), Vector2::new(2.0, 2.0));
        assert_eq!(v.window().low(), Index2::new(0, 0));
        assert_eq!(v.window().high(), Index2::new(4, 4));
        // The physical coordinate still maps to the window center.
        assert_eq!(s.to_pixel(v.coord), v.window().pixel_center());
    }

    #[test]
    fn test_reformat_grows_and_keeps_data() {
        let mut s = storage(StorageSpec {
            shape: BufferShape::Square(4),
            fill: -1.0,
            ..Default::default()
        });
        s.fill(9.0);
        // A view stretching past the high edge on rows.
        let mut v = view_at((2.0, 0.0), (4, 4));
        s.reformat(&mut [&mut v]).unwrap();

        assert_eq!(s.shape(), (1, 4, 4));
        // Center shifted by the low-side crop: rows misfit low is -2.
        assert_eq!(s.center(), Vector2::new(0.0, 2.0));
        // Kept region retains old data, grown region took the fill.
        assert_eq!(s.buffer()[[0, 0, 0]], 9.0);
        assert_eq!(s.buffer()[[0, 3, 0]], -1.0);
        assert_eq!(s.get(&v).unwrap().dim(), (4, 4));
    }

    #[test]
    fn test_reformat_pad_only_never_shrinks() {
        let mut s = storage(StorageSpec {
            shape: BufferShape::Square(10),
            pad_only: true,
            ..Default::default()
        });
        let mut v = view_at((0.0, 0.0), (4, 4));
        s.reformat(&mut [&mut v]).unwrap();
        assert_eq!(s.shape(), (1, 10, 10));

        // A view past the high edge still grows the buffer.
        let mut far = view_at((7.0, 0.0), (4, 4));
        s.reformat(&mut [&mut far]).unwrap();
        assert_eq!(s.shape(), (1, 14, 10));
    }

    #[test]
    fn test_reformat_too_large_leaves_storage_untouched() {
        let mut s = storage(StorageSpec {
            shape: BufferShape::Square(1000),
            ..Default::default()
        });
        s.fill(3.0);
        // 5000x5000 target: 25M elements, over the 20M ceiling.
        let mut v = view_at((0.0, 0.0), (5000, 5000));
        let err = s.reformat(&mut [&mut v]);
        assert!(matches!(
            err,
            Err(StorageError::BufferTooLarge { megapixels }) if megapixels == 25.0
        ));
        assert_eq!(s.shape(), (1, 1000, 1000));
        assert_eq!(s.center(), Vector2::new(500.0, 500.0));
        assert_eq!(s.buffer()[[0, 0, 0]], 3.0);
    }

    #[test]
    fn test_reformat_renumbers_layers() {
        let mut s = storage(StorageSpec {
            shape: BufferShape::Layered(3, 6, 6),
            layer_map: Some(vec![0, 2, 5]),
            ..Default::default()
        });
        s.buffer_mut().index_axis_mut(Axis(0), 1).fill(2.0);
        s.buffer_mut().index_axis_mut(Axis(0), 2).fill(5.0);

        let mut a = view_at((0.0, 0.0), (6, 6));
        a.layer = 2;
        let mut b = view_at((0.0, 0.0), (6, 6));
        b.layer = 5;
        s.reformat(&mut [&mut a, &mut b]).unwrap();

        assert_eq!(s.layer_map(), &[2, 5]);
        assert_eq!(s.shape(), (2, 6, 6));
        assert_eq!(a.dlayer(), 0);
        assert_eq!(b.dlayer(), 1);
        // Retained layers kept their data.
        assert_eq!(s.buffer()[[0, 0, 0]], 2.0);
        assert_eq!(s.buffer()[[1, 0, 0]], 5.0);
    }

    #[test]
    fn test_reformat_fills_fresh_layers() {
        let mut s = storage(StorageSpec {
            shape: BufferShape::Spatial(4, 4),
            fill: 0.5,
            ..Default::default()
        });
        s.fill(8.0);
        let mut old = view_at((0.0, 0.0), (4, 4));
        let mut fresh = view_at((0.0, 0.0), (4, 4));
        fresh.layer = 7;
        s.reformat(&mut [&mut old, &mut fresh]).unwrap();

        assert_eq!(s.layer_map(), &[0, 7]);
        assert_eq!(old.dlayer(), 0);
        assert_eq!(fresh.dlayer(), 1);
        assert_eq!(s.buffer()[[0, 0, 0]], 8.0);
        assert_eq!(s.buffer()[[1, 0, 0]], 0.5);
    }

    #[test]
    fn test_get_set_roundtrip() {
        let mut s = storage(StorageSpec {
            shape: BufferShape::Square(10),
            ..Default::default()
        });
        let mut v = view_at((0.0, 0.0), (2, 2));
        s.reformat(&mut [&mut v]).unwrap();

        let data = arr2(&[[1.0, 2.0], [3.0, 4.0]]);
        s.set(&v, data.view()).unwrap();
        assert_eq!(s.get(&v).unwrap(), data.view());

        s.get_mut(&v).unwrap().fill(0.0);
        assert_eq!(s.get(&v).unwrap().sum(), 0.0);
    }

    #[test]
    fn test_get_rejects_foreign_view() {
        let s = storage(StorageSpec::default());
        let v = View::from_rule(StorageId::new("Sother"), &AccessRule::default());
        assert!(matches!(
            s.get(&v),
            Err(StorageError::ViewNotOwned { .. })
        ));
    }

    #[test]
    fn test_get_rejects_stale_window() {
        let s = storage(StorageSpec {
            shape: BufferShape::Square(4),
            ..Default::default()
        });
        let mut v = view_at((10.0, 0.0), (4, 4));
        s.update_view(&mut v);
        // Window extends past the frame; without a reformat the access
        // must fail rather than wrap.
        assert!(matches!(
            s.get(&v),
            Err(StorageError::WindowOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_set_rejects_wrong_shape() {
        let mut s = storage(StorageSpec {
            shape: BufferShape::Square(10),
            ..Default::default()
        });
        let mut v = view_at((0.0, 0.0), (2, 2));
        s.reformat(&mut [&mut v]).unwrap();
        let wide = arr2(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        assert!(matches!(
            s.set(&v, wide.view()),
            Err(StorageError::DataShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_view_coverage_counts_overlap() {
        let mut s = storage(StorageSpec {
            shape: BufferShape::Square(10),
            ..Default::default()
        });
        let mut a = view_at((-1.0, -1.0), (4, 4));
        let mut b = view_at((1.0, 1.0), (4, 4));
        s.reformat(&mut [&mut a, &mut b]).unwrap();

        let coverage = s.view_coverage(&[&a, &b]);
        // Both views span 4x4 with centers two pixels apart on each
        // axis, so a 2x2 block is covered twice.
        assert_eq!(coverage.sum(), 32);
        assert_eq!(coverage.iter().filter(|c| **c == 2).count(), 4);
        assert_eq!(coverage.iter().filter(|c| **c == 1).count(), 24);
    }

    #[test]
    fn test_fill_variants() {
        let mut s = storage(StorageSpec {
            shape: BufferShape::Layered(2, 2, 2),
            fill: 4.0,
            ..Default::default()
        });
        s.fill(1.0);
        assert_eq!(s.buffer().sum(), 8.0);
        s.fill_default();
        assert_eq!(s.buffer().sum(), 32.0);

        s.fill_frame(arr2(&[[1.0, 2.0], [3.0, 4.0]]).view());
        assert_eq!(s.buffer()[[0, 1, 0]], 3.0);
        assert_eq!(s.buffer()[[1, 1, 0]], 3.0);

        let err = s.fill_buffer(arr3(&[[[1.0]]]));
        assert!(matches!(err, Err(StorageError::InvalidLayerMap { .. })));
        s.fill_buffer(arr3(&[[[1.0]], [[2.0]]])).unwrap();
        assert_eq!(s.shape(), (2, 1, 1));
    }

    #[test]
    fn test_grids_follow_coordinate_system() {
        let s = storage(StorageSpec {
            shape: BufferShape::Spatial(2, 2),
            psize: Vector2::splat(0.5),
            ..Default::default()
        });
        let (rows, cols) = s.grids();
        // Center is pixel (1, 1), so physical row coords are -0.5, 0.
        assert_eq!(rows[[0, 0, 0]], -0.5);
        assert_eq!(rows[[0, 1, 0]], 0.0);
        assert_eq!(cols[[0, 0, 0]], -0.5);
        assert_eq!(cols[[0, 0, 1]], 0.0);
    }

    #[test]
    fn test_duplicate_is_independent() {
        let mut s = storage(StorageSpec {
            shape: BufferShape::Square(4),
            ..Default::default()
        });
        s.fill(2.0);
        let copy = s.duplicate(StorageId::new("S0001"), None);
        s.fill(9.0);
        assert_eq!(copy.buffer()[[0, 0, 0]], 2.0);
        assert_eq!(copy.center(), s.center());

        let blank = s.duplicate(StorageId::new("S0002"), Some(0.0));
        assert_eq!(blank.shape(), s.shape());
        assert_eq!(blank.buffer().sum(), 0.0);
    }

    #[test]
    fn test_report_mentions_geometry() {
        let s = storage(StorageSpec {
            shape: BufferShape::Square(10),
            psize: Vector2::splat(1e-5),
            ..Default::default()
        });
        let report = s.report(3);
        assert!(report.contains("Shape: (1, 10, 10)"));
        assert!(report.contains("Number of views: 3"));
        assert!(report.contains("Pixel size (meters): 1e-5 x 1e-5"));
    }

    fn gen_buffer_shape() -> impl Strategy<Value = BufferShape> {
        prop_oneof![
            (1usize..16).prop_map(BufferShape::Square),
            (1usize..16, 1usize..16).prop_map(|(h, w)| BufferShape::Spatial(h, w)),
            (1usize..4, 1usize..16, 1usize..16)
                .prop_map(|(l, h, w)| BufferShape::Layered(l, h, w)),
        ]
    }

    proptest! {
        #[test]
        fn test_reformat_window_roundtrip(
            shape in gen_buffer_shape(),
            row in -12.0f64..12.0,
            col in -12.0f64..12.0,
            vh in 1usize..6,
            vw in 1usize..6,
        ) {
            let mut s = storage(StorageSpec { shape, ..Default::default() });
            let mut v = view_at((row, col), (vh, vw));
            s.reformat(&mut [&mut v]).unwrap();

            // Wherever the view landed, reformat made it addressable.
            let data = Array2::from_shape_fn((vh, vw), |(r, c)| (r * vw + c) as f64);
            s.set(&v, data.view()).unwrap();
            prop_assert_eq!(s.get(&v).unwrap(), data.view());
        }
    }
}
