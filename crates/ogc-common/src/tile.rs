//! WMTS tile matrix and tile matrix set definitions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::BoundingBox;

/// Standard OGC pixel size in meters (0.28 mm).
pub const OGC_PIXEL_SIZE_M: f64 = 0.00028;

/// Map units per pixel, used as the ordering key of a tile matrix set.
///
/// Wraps an `f64` with a total order so matrices can live in a `BTreeMap`
/// keyed by resolution; ascending iteration walks matrices from finest to
/// coarsest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Resolution(f64);

impl Resolution {
    pub fn new(value: f64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl PartialEq for Resolution {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == std::cmp::Ordering::Equal
    }
}

impl Eq for Resolution {}

impl PartialOrd for Resolution {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Resolution {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// A single tile matrix (one resolution level of a set).
///
/// `top_left` is stored in x/y map order; axis correction for inverted
/// CRSes happens at parse time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileMatrix {
    pub identifier: String,
    pub scale_denominator: f64,
    pub top_left: (f64, f64),
    pub tile_width: u32,
    pub tile_height: u32,
    pub matrix_width: u32,
    pub matrix_height: u32,
}

impl TileMatrix {
    /// Map-space rectangle of the tile at (row, col) for resolution `res`.
    pub fn tile_rect(&self, res: f64, row: u32, col: u32) -> BoundingBox {
        let tw = self.tile_width as f64 * res;
        let th = self.tile_height as f64 * res;
        let min_x = self.top_left.0 + col as f64 * tw;
        let max_y = self.top_left.1 - row as f64 * th;
        BoundingBox::new(min_x, max_y - th, min_x + tw, max_y)
    }

    /// Map-space extent of the full matrix for resolution `res`.
    pub fn full_extent(&self, res: f64) -> BoundingBox {
        let width = res * self.tile_width as f64 * self.matrix_width as f64;
        let height = res * self.tile_height as f64 * self.matrix_height as f64;
        BoundingBox::new(
            self.top_left.0,
            self.top_left.1 - height,
            self.top_left.0 + width,
            self.top_left.1,
        )
        .normalized()
    }
}

/// Published row/column bounds of a layer within one matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileMatrixLimits {
    pub min_row: u32,
    pub max_row: u32,
    pub min_col: u32,
    pub max_col: u32,
}

impl TileMatrixLimits {
    /// Limits are accepted only when `0 <= min <= max < matrix bound` on
    /// both axes.
    pub fn valid_for(&self, matrix: &TileMatrix) -> bool {
        self.min_col <= self.max_col
            && self.max_col < matrix.matrix_width
            && self.min_row <= self.max_row
            && self.max_row < matrix.matrix_height
    }
}

/// A CRS-anchored collection of tile matrices, ordered by resolution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TileMatrixSet {
    pub identifier: String,
    pub title: String,
    pub crs: String,
    pub well_known_scale_set: Option<String>,
    tile_matrices: BTreeMap<Resolution, TileMatrix>,
}

impl TileMatrixSet {
    pub fn new(identifier: impl Into<String>, crs: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            crs: crs.into(),
            ..Default::default()
        }
    }

    /// Insert a matrix keyed by its derived resolution.
    ///
    /// Returns `false` without inserting when a matrix with the same
    /// resolution already exists; resolutions within a set must be unique.
    pub fn insert_matrix(&mut self, resolution: f64, matrix: TileMatrix) -> bool {
        let key = Resolution::new(resolution);
        if self.tile_matrices.contains_key(&key) {
            return false;
        }
        self.tile_matrices.insert(key, matrix);
        true
    }

    pub fn is_empty(&self) -> bool {
        self.tile_matrices.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tile_matrices.len()
    }

    /// Matrices in ascending resolution order (finest first).
    pub fn iter(&self) -> impl Iterator<Item = (f64, &TileMatrix)> {
        self.tile_matrices.iter().map(|(r, m)| (r.value(), m))
    }

    /// The matrix with the largest resolution (most coarse).
    pub fn coarsest(&self) -> Option<(f64, &TileMatrix)> {
        self.tile_matrices
            .last_key_value()
            .map(|(r, m)| (r.value(), m))
    }

    /// The matrix with the smallest resolution (most fine).
    pub fn finest(&self) -> Option<(f64, &TileMatrix)> {
        self.tile_matrices
            .first_key_value()
            .map(|(r, m)| (r.value(), m))
    }

    pub fn matrix_by_identifier(&self, identifier: &str) -> Option<(f64, &TileMatrix)> {
        self.iter().find(|(_, m)| m.identifier == identifier)
    }
}
