//! Tile matrix selection and covering-range computation.

use ogc_common::{BoundingBox, OgcError, OgcResult, TileMatrix, TileMatrixLimits, TileMatrixSet};

/// Upper bound on the tiles a single draw may dispatch.
pub const MAX_TILES_PER_DRAW: usize = 100;

/// One tile of a draw plan, in row-major dispatch order.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedTile {
    pub index: usize,
    pub row: u32,
    pub col: u32,
    /// Map-space rectangle the response will be composited into.
    pub rect: BoundingBox,
}

/// The covering tile range for one draw call.
#[derive(Debug, Clone)]
pub struct TilePlan {
    pub matrix_id: String,
    /// Resolution of the chosen matrix in map units per pixel.
    pub resolution: f64,
    pub tile_width: u32,
    pub tile_height: u32,
    pub rows: (u32, u32),
    pub cols: (u32, u32),
    pub tiles: Vec<PlannedTile>,
}

/// Pick the matrix nearest to the view resolution.
///
/// Scans in ascending resolution order and keeps the last matrix finer
/// than `vres`; the first coarser-or-equal matrix wins only when it is at
/// least as close. With every matrix finer than the view the coarsest one
/// is used, and with every matrix coarser the finest.
pub fn select_matrix(set: &TileMatrixSet, vres: f64) -> Option<(f64, &TileMatrix)> {
    let mut finer: Option<(f64, &TileMatrix)> = None;
    let mut coarser: Option<(f64, &TileMatrix)> = None;

    for (resolution, matrix) in set.iter() {
        if resolution < vres {
            finer = Some((resolution, matrix));
        } else {
            coarser = Some((resolution, matrix));
            break;
        }
    }

    match (finer, coarser) {
        (Some(f), Some(c)) => {
            if vres - f.0 < c.0 - vres {
                Some(f)
            } else {
                Some(c)
            }
        }
        (Some(f), None) => Some(f),
        (None, Some(c)) => Some(c),
        (None, None) => None,
    }
}

/// Compute the row-major tile plan covering `view_extent`.
///
/// The range is clamped to the layer's published limits for this matrix,
/// or to the matrix's own bounds when no limits exist. A plan larger than
/// [`MAX_TILES_PER_DRAW`] is refused.
pub fn covering_tiles(
    matrix: &TileMatrix,
    resolution: f64,
    view_extent: &BoundingBox,
    limits: Option<&TileMatrixLimits>,
) -> OgcResult<TilePlan> {
    let tile_span_x = matrix.tile_width as f64 * resolution;
    let tile_span_y = matrix.tile_height as f64 * resolution;

    let (min_col, max_col, min_row, max_row) = match limits {
        Some(l) => (l.min_col, l.max_col, l.min_row, l.max_row),
        None => (
            0,
            matrix.matrix_width.saturating_sub(1),
            0,
            matrix.matrix_height.saturating_sub(1),
        ),
    };

    let clamp = |v: f64, lo: u32, hi: u32| -> u32 {
        (v.floor() as i64).clamp(lo as i64, hi as i64) as u32
    };

    let col0 = clamp(
        (view_extent.min_x - matrix.top_left.0) / tile_span_x,
        min_col,
        max_col,
    );
    let row0 = clamp(
        (matrix.top_left.1 - view_extent.max_y) / tile_span_y,
        min_row,
        max_row,
    );
    let col1 = clamp(
        (view_extent.max_x - matrix.top_left.0) / tile_span_x,
        min_col,
        max_col,
    );
    let row1 = clamp(
        (matrix.top_left.1 - view_extent.min_y) / tile_span_y,
        min_row,
        max_row,
    );

    let count = (col1 - col0 + 1) as usize * (row1 - row0 + 1) as usize;
    if count > MAX_TILES_PER_DRAW {
        return Err(OgcError::TileBudget {
            required: count,
            limit: MAX_TILES_PER_DRAW,
        });
    }

    let mut tiles = Vec::with_capacity(count);
    for row in row0..=row1 {
        for col in col0..=col1 {
            tiles.push(PlannedTile {
                index: tiles.len(),
                row,
                col,
                rect: matrix.tile_rect(resolution, row, col),
            });
        }
    }

    Ok(TilePlan {
        matrix_id: matrix.identifier.clone(),
        resolution,
        tile_width: matrix.tile_width,
        tile_height: matrix.tile_height,
        rows: (row0, row1),
        cols: (col0, col1),
        tiles,
    })
}

/// Synthesise a single virtual matrix for servers that cap the legal image
/// size: the layer extent is carved into `max_width`×`max_height` pieces
/// at the view resolution.
pub fn virtual_matrix(
    layer_extent: &BoundingBox,
    max_width: u32,
    max_height: u32,
    vres: f64,
) -> TileMatrix {
    TileMatrix {
        identifier: String::new(),
        scale_denominator: 0.0,
        top_left: (layer_extent.min_x, layer_extent.max_y),
        tile_width: max_width,
        tile_height: max_height,
        matrix_width: (layer_extent.width() / max_width as f64 / vres).ceil() as u32,
        matrix_height: (layer_extent.height() / max_height as f64 / vres).ceil() as u32,
    }
}
