//! Grid sizing and index/coordinate transforms.

use nalgebra::Point3;

use crate::error::{VoxelError, VoxelResult};
use crate::index::GridIndex;

/// Axis-aligned sizing of a dense voxel grid.
///
/// A `GridSizes` pairs per-axis cell extents with per-axis cell counts and
/// provides the transforms between *grid-frame coordinates* (continuous
/// coordinates relative to the grid origin) and [`GridIndex`] values.
///
/// Cells are linearized as `x + nx * (y + ny * z)`: x varies fastest, then
/// y, then z.
///
/// # Example
///
/// ```
/// use voxel_geometry::{GridIndex, GridSizes};
/// use nalgebra::Point3;
///
/// let sizes = GridSizes::new_uniform(0.5, 10, 10, 10).unwrap();
/// assert_eq!(sizes.total_cells(), 1000);
///
/// // Grid-frame point to index uses mathematical floor.
/// assert_eq!(sizes.index_of(&Point3::new(1.2, 0.0, 4.9)), GridIndex::new(2, 0, 9));
///
/// // Cell centers sit half a cell in from the lower corner.
/// assert_eq!(sizes.center_of(GridIndex::new(0, 0, 0)), Point3::new(0.25, 0.25, 0.25));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GridSizes {
    cell_x_size: f64,
    cell_y_size: f64,
    cell_z_size: f64,
    inv_cell_x_size: f64,
    inv_cell_y_size: f64,
    inv_cell_z_size: f64,
    num_x_cells: i64,
    num_y_cells: i64,
    num_z_cells: i64,
}

impl GridSizes {
    /// Creates a sizing with independent per-axis cell extents.
    ///
    /// # Errors
    ///
    /// Returns [`VoxelError::InvalidSizes`] if any extent is non-positive
    /// or non-finite, any count is less than one, or the total cell count
    /// overflows.
    ///
    /// # Example
    ///
    /// ```
    /// use voxel_geometry::GridSizes;
    ///
    /// let sizes = GridSizes::new(1.0, 1.0, 2.0, 4, 4, 2).unwrap();
    /// assert!(!sizes.has_uniform_cell_size());
    /// assert!(GridSizes::new(0.0, 1.0, 1.0, 4, 4, 4).is_err());
    /// ```
    pub fn new(
        cell_x_size: f64,
        cell_y_size: f64,
        cell_z_size: f64,
        num_x_cells: i64,
        num_y_cells: i64,
        num_z_cells: i64,
    ) -> VoxelResult<Self> {
        for (axis, extent) in [("x", cell_x_size), ("y", cell_y_size), ("z", cell_z_size)] {
            if !(extent.is_finite() && extent > 0.0) {
                return Err(VoxelError::InvalidSizes(format!(
                    "cell {axis} size must be positive and finite, got {extent}"
                )));
            }
        }
        for (axis, count) in [("x", num_x_cells), ("y", num_y_cells), ("z", num_z_cells)] {
            if count < 1 {
                return Err(VoxelError::InvalidSizes(format!(
                    "number of {axis} cells must be at least 1, got {count}"
                )));
            }
        }
        num_x_cells
            .checked_mul(num_y_cells)
            .and_then(|xy| xy.checked_mul(num_z_cells))
            .ok_or_else(|| {
                VoxelError::InvalidSizes(format!(
                    "total cell count overflows: {num_x_cells} x {num_y_cells} x {num_z_cells}"
                ))
            })?;
        Ok(Self {
            cell_x_size,
            cell_y_size,
            cell_z_size,
            inv_cell_x_size: 1.0 / cell_x_size,
            inv_cell_y_size: 1.0 / cell_y_size,
            inv_cell_z_size: 1.0 / cell_z_size,
            num_x_cells,
            num_y_cells,
            num_z_cells,
        })
    }

    /// Creates a sizing with the same cell extent on every axis.
    ///
    /// # Errors
    ///
    /// Returns [`VoxelError::InvalidSizes`] under the same conditions as
    /// [`GridSizes::new`].
    ///
    /// # Example
    ///
    /// ```
    /// use voxel_geometry::GridSizes;
    ///
    /// let sizes = GridSizes::new_uniform(0.25, 16, 16, 8).unwrap();
    /// assert!(sizes.has_uniform_cell_size());
    /// assert_eq!(sizes.cell_x_size(), 0.25);
    /// ```
    pub fn new_uniform(
        cell_size: f64,
        num_x_cells: i64,
        num_y_cells: i64,
        num_z_cells: i64,
    ) -> VoxelResult<Self> {
        Self::new(
            cell_size, cell_size, cell_size, num_x_cells, num_y_cells, num_z_cells,
        )
    }

    /// Returns whether the cell extents are the same on every axis.
    #[must_use]
    pub fn has_uniform_cell_size(&self) -> bool {
        self.cell_x_size == self.cell_y_size && self.cell_y_size == self.cell_z_size
    }

    /// Returns whether this sizing describes a non-empty grid.
    ///
    /// Only the zero [`GridSizes::default`] is uninitialized; every sizing
    /// built through the validated constructors is initialized.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.num_x_cells > 0 && self.num_y_cells > 0 && self.num_z_cells > 0
    }

    /// Cell extent along x.
    #[must_use]
    pub const fn cell_x_size(&self) -> f64 {
        self.cell_x_size
    }

    /// Cell extent along y.
    #[must_use]
    pub const fn cell_y_size(&self) -> f64 {
        self.cell_y_size
    }

    /// Cell extent along z.
    #[must_use]
    pub const fn cell_z_size(&self) -> f64 {
        self.cell_z_size
    }

    /// Inverse cell extent along x.
    #[must_use]
    pub const fn inv_cell_x_size(&self) -> f64 {
        self.inv_cell_x_size
    }

    /// Number of cells along x.
    #[must_use]
    pub const fn num_x_cells(&self) -> i64 {
        self.num_x_cells
    }

    /// Number of cells along y.
    #[must_use]
    pub const fn num_y_cells(&self) -> i64 {
        self.num_y_cells
    }

    /// Number of cells along z.
    #[must_use]
    pub const fn num_z_cells(&self) -> i64 {
        self.num_z_cells
    }

    /// Total number of cells in the grid.
    #[must_use]
    pub const fn total_cells(&self) -> i64 {
        self.num_x_cells * self.num_y_cells * self.num_z_cells
    }

    /// Checks whether an index lies inside the grid.
    ///
    /// # Example
    ///
    /// ```
    /// use voxel_geometry::{GridIndex, GridSizes};
    ///
    /// let sizes = GridSizes::new_uniform(1.0, 4, 4, 4).unwrap();
    /// assert!(sizes.contains(GridIndex::new(3, 3, 3)));
    /// assert!(!sizes.contains(GridIndex::new(4, 0, 0)));
    /// assert!(!sizes.contains(GridIndex::new(-1, 0, 0)));
    /// ```
    #[must_use]
    pub const fn contains(&self, index: GridIndex) -> bool {
        index.x >= 0
            && index.x < self.num_x_cells
            && index.y >= 0
            && index.y < self.num_y_cells
            && index.z >= 0
            && index.z < self.num_z_cells
    }

    /// Returns the position of an in-bounds index in the linearized
    /// backing storage, or `None` if the index is out of bounds.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn linear_index(&self, index: GridIndex) -> Option<usize> {
        if !self.contains(index) {
            return None;
        }
        let linear = index.x + self.num_x_cells * (index.y + self.num_y_cells * index.z);
        Some(linear as usize)
    }

    /// Returns the index at a given position in the linearized storage.
    ///
    /// The inverse of [`GridSizes::linear_index`] for in-range positions.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn index_from_linear(&self, linear: usize) -> GridIndex {
        let linear = linear as i64;
        GridIndex::new(
            linear % self.num_x_cells,
            (linear / self.num_x_cells) % self.num_y_cells,
            linear / (self.num_x_cells * self.num_y_cells),
        )
    }

    /// Converts a grid-frame point to the index of its containing cell.
    ///
    /// Uses mathematical floor, so coordinates below the grid origin yield
    /// negative indices (which only ever fail bounds checks).
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn index_of(&self, point: &Point3<f64>) -> GridIndex {
        GridIndex::new(
            (point.x * self.inv_cell_x_size).floor() as i64,
            (point.y * self.inv_cell_y_size).floor() as i64,
            (point.z * self.inv_cell_z_size).floor() as i64,
        )
    }

    /// Returns the grid-frame center of a cell.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn center_of(&self, index: GridIndex) -> Point3<f64> {
        Point3::new(
            (index.x as f64 + 0.5) * self.cell_x_size,
            (index.y as f64 + 0.5) * self.cell_y_size,
            (index.z as f64 + 0.5) * self.cell_z_size,
        )
    }

    /// Returns an iterator over every in-bounds index in linearization
    /// order (x fastest, then y, then z).
    pub fn indices(self) -> impl Iterator<Item = GridIndex> {
        let (nx, ny, nz) = (self.num_x_cells, self.num_y_cells, self.num_z_cells);
        (0..nz).flat_map(move |z| {
            (0..ny).flat_map(move |y| (0..nx).map(move |x| GridIndex::new(x, y, z)))
        })
    }
}

impl Default for GridSizes {
    /// The zero-sized *uninitialized* sizing.
    ///
    /// Used only by [`crate::CollisionMap::default`]; the validated
    /// constructors never produce it.
    fn default() -> Self {
        Self {
            cell_x_size: 0.0,
            cell_y_size: 0.0,
            cell_z_size: 0.0,
            inv_cell_x_size: 0.0,
            inv_cell_y_size: 0.0,
            inv_cell_z_size: 0.0,
            num_x_cells: 0,
            num_y_cells: 0,
            num_z_cells: 0,
        }
    }
}
