// Copyright 2025 John Brosnihan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Uniform spatial grid for collision candidate search
//!
//! The world rectangle is split into `rows × cols` equal cells. Each cell
//! keeps a growable list of [`GridEntry`] values: the handle of a live
//! particle plus the position it had when it was inserted.
//!
//! The grid is rebuilt from the pool every step. Entries are a snapshot of
//! that step only; a handle read from the grid must not be used after the
//! pool frees or reuses its slot. Cell storage is never released by
//! [`clear`](SpatialGrid::clear), so steady-state rebuilds do not allocate.

use crate::error::{KernelError, Result};
use crate::pool::{ParticleHandle, ParticlePool};

/// Smallest grid along either axis
pub const MIN_GRID_DIM: usize = 2;

/// Upper bound on the number of cells a grid may own
pub const MAX_CELLS: usize = 1 << 22;

const INITIAL_CELL_CAPACITY: usize = 4;

/// One particle reference stored in a cell
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridEntry {
    /// Pool slot of the particle
    pub handle: ParticleHandle,
    /// Horizontal position at insertion time
    pub x: f32,
    /// Vertical position at insertion time
    pub y: f32,
}

impl Default for GridEntry {
    fn default() -> Self {
        GridEntry {
            handle: ParticleHandle::new(0),
            x: 0.0,
            y: 0.0,
        }
    }
}

#[derive(Debug, Default)]
struct Cell {
    entries: Vec<GridEntry>,
    count: usize,
}

impl Cell {
    fn push(&mut self, entry: GridEntry) -> Result<()> {
        if self.count == self.entries.len() {
            let grown = (self.entries.len() * 2).max(INITIAL_CELL_CAPACITY);
            self.entries
                .try_reserve_exact(grown - self.entries.len())
                .map_err(|e| {
                    KernelError::allocation_failure(format!(
                        "grid cell growth to {} entries: {}",
                        grown, e
                    ))
                })?;
            self.entries.resize(grown, GridEntry::default());
        }
        self.entries[self.count] = entry;
        self.count += 1;
        Ok(())
    }

    fn live(&self) -> &[GridEntry] {
        &self.entries[..self.count]
    }

    fn capacity(&self) -> usize {
        self.entries.len()
    }
}

/// Occupancy summary of a [`SpatialGrid`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridStats {
    /// Total number of cells
    pub cells: usize,
    /// Cells holding at least one entry
    pub occupied_cells: usize,
    /// Cells holding no entry
    pub empty_cells: usize,
    /// Smallest population among occupied cells (0 if none)
    pub min_occupancy: usize,
    /// Largest population of any cell
    pub max_occupancy: usize,
    /// Mean population over occupied cells
    pub avg_occupancy: f64,
    /// Total entries across all cells
    pub entries: usize,
    /// Sum of retained cell capacity
    pub retained_capacity: usize,
}

/// Uniform grid over the world rectangle `[0, width) × [0, height)`
#[derive(Debug)]
pub struct SpatialGrid {
    width: f32,
    height: f32,
    rows: usize,
    cols: usize,
    cell_w: f32,
    cell_h: f32,
    cells: Vec<Cell>,
    len: usize,
}

impl SpatialGrid {
    /// Create a grid covering a `world_w × world_h` world
    ///
    /// The cell count per axis is `ceil(world / target_cell_size)`, never
    /// below [`MIN_GRID_DIM`]; cells are then stretched to tile the world
    /// exactly.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for non-finite or non-positive inputs,
    /// `OutOfResources` if the grid would exceed [`MAX_CELLS`].
    pub fn new(world_w: f32, world_h: f32, target_cell_size: f32) -> Result<Self> {
        for (name, value) in [
            ("world width", world_w),
            ("world height", world_h),
            ("cell size", target_cell_size),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(KernelError::invalid_parameter(format!(
                    "{} must be positive and finite, got {}",
                    name, value
                )));
            }
        }

        let cols = ((world_w / target_cell_size).ceil() as usize).max(MIN_GRID_DIM);
        let rows = ((world_h / target_cell_size).ceil() as usize).max(MIN_GRID_DIM);
        let total = rows
            .checked_mul(cols)
            .filter(|total| *total <= MAX_CELLS)
            .ok_or_else(|| {
                KernelError::out_of_resources(format!(
                    "{}x{} grid exceeds {} cells",
                    rows, cols, MAX_CELLS
                ))
            })?;

        let mut cells = Vec::new();
        cells.try_reserve_exact(total).map_err(|e| {
            KernelError::allocation_failure(format!("grid of {} cells: {}", total, e))
        })?;
        cells.resize_with(total, Cell::default);

        log::debug!(
            "spatial grid {}x{} cells for {}x{} world",
            rows,
            cols,
            world_w,
            world_h
        );

        Ok(SpatialGrid {
            width: world_w,
            height: world_h,
            rows,
            cols,
            cell_w: world_w / cols as f32,
            cell_h: world_h / rows as f32,
            cells,
            len: 0,
        })
    }

    /// Number of cell rows
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of cell columns
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Width of one cell in world units
    pub fn cell_width(&self) -> f32 {
        self.cell_w
    }

    /// Height of one cell in world units
    pub fn cell_height(&self) -> f32 {
        self.cell_h
    }

    /// World size covered by the grid
    pub fn world_size(&self) -> (f32, f32) {
        (self.width, self.height)
    }

    /// Total number of entries currently stored
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the grid holds no entries
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Map a world position to its `(row, col)`, clamped to the grid
    #[inline]
    pub fn cell_of(&self, x: f32, y: f32) -> (usize, usize) {
        (
            clamp_axis(y / self.cell_h, self.rows),
            clamp_axis(x / self.cell_w, self.cols),
        )
    }

    #[inline]
    fn cell_index(&self, row: usize, col: usize) -> usize {
        row * self.cols + col
    }

    /// Entries of one cell, or `None` if the coordinates are off the grid
    pub fn cell_entries(&self, row: usize, col: usize) -> Option<&[GridEntry]> {
        if row < self.rows && col < self.cols {
            Some(self.cells[self.cell_index(row, col)].live())
        } else {
            None
        }
    }

    /// Iterate over every stored entry, cell by cell
    pub fn entries(&self) -> impl Iterator<Item = &GridEntry> + '_ {
        self.cells.iter().flat_map(|cell| cell.live().iter())
    }

    /// Drop all entries, keeping per-cell storage for the next rebuild
    pub fn clear(&mut self) {
        for cell in &mut self.cells {
            cell.count = 0;
        }
        self.len = 0;
    }

    /// Insert a particle reference at `(x, y)`
    ///
    /// Positions outside the world land in the nearest boundary cell.
    ///
    /// # Errors
    ///
    /// `AllocationFailure` if the target cell cannot grow.
    pub fn insert(&mut self, handle: ParticleHandle, x: f32, y: f32) -> Result<()> {
        let (row, col) = self.cell_of(x, y);
        let index = self.cell_index(row, col);
        self.cells[index].push(GridEntry { handle, x, y })?;
        self.len += 1;
        Ok(())
    }

    /// Clear the grid and insert every active particle of `pool`
    pub fn rebuild(&mut self, pool: &ParticlePool) -> Result<()> {
        self.clear();
        for (handle, particle) in pool.iter() {
            self.insert(handle, particle.x, particle.y)?;
        }
        Ok(())
    }

    /// Collect handles from the 3×3 block of cells around `(x, y)`
    ///
    /// Stops once `out` is full and returns the number written. Only the
    /// home cell and its direct neighbours are searched, so interactions
    /// reaching further than one cell are not found.
    pub fn neighbors_3x3(&self, x: f32, y: f32, out: &mut [ParticleHandle]) -> usize {
        let max = out.len();
        if max == 0 {
            return 0;
        }
        let (row, col) = self.cell_of(x, y);
        let mut count = 0;

        for r in row.saturating_sub(1)..=(row + 1).min(self.rows - 1) {
            for c in col.saturating_sub(1)..=(col + 1).min(self.cols - 1) {
                for entry in self.cells[self.cell_index(r, c)].live() {
                    out[count] = entry.handle;
                    count += 1;
                    if count == max {
                        return count;
                    }
                }
            }
        }
        count
    }

    /// Collect handles whose insertion position lies within `radius` of `(x, y)`
    ///
    /// Sweeps `ceil(radius / min(cell_w, cell_h))` rings of cells around the
    /// home cell and filters by exact distance. Stops once `out` is full.
    pub fn query_radius(&self, x: f32, y: f32, radius: f32, out: &mut [ParticleHandle]) -> usize {
        let max = out.len();
        if max == 0 || !(radius >= 0.0) {
            return 0;
        }
        let rings = (radius / self.cell_w.min(self.cell_h)).ceil();
        let rings = if rings.is_finite() {
            (rings as usize).min(self.rows.max(self.cols))
        } else {
            self.rows.max(self.cols)
        };
        let radius_sq = radius * radius;
        let (row, col) = self.cell_of(x, y);
        let mut count = 0;

        for r in row.saturating_sub(rings)..=(row + rings).min(self.rows - 1) {
            for c in col.saturating_sub(rings)..=(col + rings).min(self.cols - 1) {
                for entry in self.cells[self.cell_index(r, c)].live() {
                    let dx = entry.x - x;
                    let dy = entry.y - y;
                    if dx * dx + dy * dy <= radius_sq {
                        out[count] = entry.handle;
                        count += 1;
                        if count == max {
                            return count;
                        }
                    }
                }
            }
        }
        count
    }

    /// Occupancy statistics over all cells
    pub fn stats(&self) -> GridStats {
        let mut stats = GridStats {
            cells: self.cells.len(),
            entries: self.len,
            ..GridStats::default()
        };
        let mut min = usize::MAX;
        for cell in &self.cells {
            stats.retained_capacity += cell.capacity();
            if cell.count == 0 {
                stats.empty_cells += 1;
                continue;
            }
            stats.occupied_cells += 1;
            min = min.min(cell.count);
            stats.max_occupancy = stats.max_occupancy.max(cell.count);
        }
        if stats.occupied_cells > 0 {
            stats.min_occupancy = min;
            stats.avg_occupancy = self.len as f64 / stats.occupied_cells as f64;
        }
        stats
    }
}

#[inline]
fn clamp_axis(scaled: f32, dim: usize) -> usize {
    // NaN and negatives fall into cell 0
    if !(scaled > 0.0) {
        return 0;
    }
    (scaled.floor() as usize).min(dim - 1)
}
