/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Fixed-width report formatting for containers and storages.
//!
//! Display-only; nothing here is a stable contract. The table has a
//! first column of width [`OFFSET`] for the ID, then right-aligned
//! cells for memory, shape, pixel size, physical dimensions and active
//! view count, separated by [`SEPARATOR`].

use crate::element::DType;

pub(crate) const OFFSET: usize = 8;
pub(crate) const SEPARATOR: &str = " : ";

#[derive(Debug, Clone, Copy)]
enum Column {
    Memory,
    Shape,
    Psize,
    Dimension,
    Views,
}

impl Column {
    fn label(&self) -> &'static str {
        match self {
            Column::Memory => "Memory",
            Column::Shape => "Shape",
            Column::Psize => "Pixel size",
            Column::Dimension => "Dimensions",
            Column::Views => "Views",
        }
    }

    fn unit(&self) -> &'static str {
        match self {
            Column::Memory => "(MB)",
            Column::Shape => "(Pixel)",
            Column::Psize => "(meters)",
            Column::Dimension => "(meters)",
            Column::Views => "act.",
        }
    }
}

const TABLE: [(Column, usize); 5] = [
    (Column::Memory, 6),
    (Column::Shape, 16),
    (Column::Psize, 15),
    (Column::Dimension, 15),
    (Column::Views, 5),
];

/// The data behind one storage row.
#[derive(Debug, Clone)]
pub(crate) struct RowInfo {
    pub memory_mb: f64,
    pub shape: (usize, usize, usize),
    pub psize: (f64, f64),
    pub dimension: (f64, f64),
    pub views: usize,
}

/// Two header lines (labels and units) plus a dash rule.
pub(crate) fn header() -> String {
    let mut labels = ljust("(C)ontnr", OFFSET);
    let mut units = ljust("(S)torgs", OFFSET);
    for (column, width) in TABLE {
        labels += SEPARATOR;
        labels += &ljust(column.label(), width);
        units += SEPARATOR;
        units += &ljust(column.unit(), width);
    }
    let rule = "-".repeat(units.len());
    format!("{}\n{}\n{}\n", labels, units, rule)
}

/// One storage line of the table.
pub(crate) fn storage_row(id: &str, info: &RowInfo) -> String {
    let mut row = ljust(id, OFFSET);
    for (column, width) in TABLE {
        let cell = match column {
            Column::Memory => format!("{:.1}", info.memory_mb),
            Column::Shape => {
                format!("{}*{}*{}", info.shape.0, info.shape.1, info.shape.2)
            }
            Column::Psize => exp_pair(info.psize.0, info.psize.1),
            Column::Dimension => exp_pair(info.dimension.0, info.dimension.1),
            Column::Views => info.views.to_string(),
        };
        row += SEPARATOR;
        row += &rjust_clip(&cell, width);
    }
    row
}

/// The container summary line: total memory and element type.
pub(crate) fn container_row(id: &str, memory_mb: f64, dtype: DType) -> String {
    let mut row = ljust(id, OFFSET);
    row += SEPARATOR;
    row += &rjust_clip(&format!("{:.1}", memory_mb), TABLE[0].1);
    row += SEPARATOR;
    row += &rjust(dtype.name(), TABLE[0].1);
    row
}

/// Shortest-form float rendering: plain decimal in the middle range,
/// scientific outside it.
pub(crate) fn general(value: f64) -> String {
    if value != 0.0 && (value.abs() < 1e-4 || value.abs() >= 1e6) {
        format!("{:e}", value)
    } else {
        format!("{}", value)
    }
}

/// Renders `a*b` with two-digit mantissas, keeping only the second
/// exponent. Axis scales rarely differ by orders of magnitude, so one
/// exponent reads better in a narrow cell.
fn exp_pair(first: f64, second: f64) -> String {
    let first = format!("{:.2e}", first);
    let mantissa = first.split('e').next().unwrap_or(&first);
    format!("{}*{:.2e}", mantissa, second)
}

fn ljust(text: &str, width: usize) -> String {
    format!("{:<width$}", text)
}

fn rjust(text: &str, width: usize) -> String {
    format!("{:>width$}", text)
}

/// Right-justify, truncating from the left when the cell is too wide.
fn rjust_clip(text: &str, width: usize) -> String {
    if text.len() > width {
        text[text.len() - width..].to_string()
    } else {
        rjust(text, width)
    }
}
