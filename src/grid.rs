//! Dense voxel grid storage with an SE(3) placement in world space.

use nalgebra::{Isometry3, Point3};

use crate::error::{VoxelError, VoxelResult};
use crate::index::GridIndex;
use crate::sizes::GridSizes;

/// A dense 3D grid of cells with an affine placement in world space.
///
/// The grid owns a contiguous backing `Vec<T>` of `sizes.total_cells()`
/// cells linearized x-fastest (see [`GridSizes`]), an `origin` rigid
/// transform placing the grid in world space (inverse cached), a default
/// cell value used to initialize storage, and an out-of-bounds sentinel
/// cell returned by immutable reads outside the grid.
///
/// Out-of-bounds *reads* return the sentinel instead of erroring so hot
/// loops stay branch-free at call sites; use [`VoxelGrid::query`] when a
/// distinguishable "not found" is needed. Out-of-bounds *writes* fail
/// with [`VoxelError::InvalidIndex`].
///
/// # Example
///
/// ```
/// use voxel_geometry::{GridIndex, GridSizes, VoxelGrid};
/// use nalgebra::Isometry3;
///
/// let sizes = GridSizes::new_uniform(1.0, 4, 4, 4).unwrap();
/// let mut grid: VoxelGrid<i32> = VoxelGrid::new(Isometry3::identity(), sizes, 0).unwrap();
///
/// grid.set(GridIndex::new(1, 2, 3), 42).unwrap();
/// assert_eq!(*grid.get(GridIndex::new(1, 2, 3)), 42);
///
/// // Reads outside the grid return the out-of-bounds sentinel.
/// assert_eq!(*grid.get(GridIndex::new(-1, 0, 0)), 0);
/// assert_eq!(grid.query(GridIndex::new(-1, 0, 0)), None);
///
/// // Writes outside the grid fail.
/// assert!(grid.set(GridIndex::new(4, 0, 0), 1).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct VoxelGrid<T> {
    origin: Isometry3<f64>,
    inverse_origin: Isometry3<f64>,
    sizes: GridSizes,
    default_value: T,
    oob_value: T,
    data: Vec<T>,
}

impl<T: Clone> VoxelGrid<T> {
    /// Creates a grid with every cell set to `default_value`, which also
    /// serves as the out-of-bounds sentinel.
    ///
    /// # Errors
    ///
    /// Returns [`VoxelError::InvalidSizes`] if `sizes` is uninitialized or
    /// does not fit in memory addressing.
    pub fn new(origin: Isometry3<f64>, sizes: GridSizes, default_value: T) -> VoxelResult<Self> {
        let oob_value = default_value.clone();
        Self::with_oob_value(origin, sizes, default_value, oob_value)
    }

    /// Creates a grid with a distinct out-of-bounds sentinel value.
    ///
    /// # Errors
    ///
    /// Returns [`VoxelError::InvalidSizes`] if `sizes` is uninitialized or
    /// does not fit in memory addressing.
    pub fn with_oob_value(
        origin: Isometry3<f64>,
        sizes: GridSizes,
        default_value: T,
        oob_value: T,
    ) -> VoxelResult<Self> {
        if !sizes.is_initialized() {
            return Err(VoxelError::InvalidSizes(
                "grid sizes are uninitialized".to_owned(),
            ));
        }
        let capacity = usize::try_from(sizes.total_cells()).map_err(|_| {
            VoxelError::InvalidSizes(format!(
                "total cell count {} does not fit in memory addressing",
                sizes.total_cells()
            ))
        })?;
        Ok(Self {
            origin,
            inverse_origin: origin.inverse(),
            sizes,
            default_value: default_value.clone(),
            oob_value,
            data: vec![default_value; capacity],
        })
    }

    /// Creates the zero-cell uninitialized grid.
    pub(crate) fn uninitialized(default_value: T, oob_value: T) -> Self {
        Self {
            origin: Isometry3::identity(),
            inverse_origin: Isometry3::identity(),
            sizes: GridSizes::default(),
            default_value,
            oob_value,
            data: Vec::new(),
        }
    }

    /// Returns the origin transform placing the grid in world space.
    #[must_use]
    pub const fn origin(&self) -> &Isometry3<f64> {
        &self.origin
    }

    /// Returns the cached inverse of the origin transform.
    #[must_use]
    pub const fn inverse_origin(&self) -> &Isometry3<f64> {
        &self.inverse_origin
    }

    /// Returns the grid sizing.
    #[must_use]
    pub const fn sizes(&self) -> &GridSizes {
        &self.sizes
    }

    /// Returns the value cells are initialized with.
    #[must_use]
    pub const fn default_value(&self) -> &T {
        &self.default_value
    }

    /// Returns the out-of-bounds sentinel value.
    #[must_use]
    pub const fn oob_value(&self) -> &T {
        &self.oob_value
    }

    /// Transforms a world-space point into the grid frame.
    #[must_use]
    pub fn world_to_grid_frame(&self, point: &Point3<f64>) -> Point3<f64> {
        self.inverse_origin * point
    }

    /// Transforms a grid-frame point into world space.
    #[must_use]
    pub fn grid_frame_to_world(&self, point: &Point3<f64>) -> Point3<f64> {
        self.origin * point
    }

    /// Returns the index of the cell containing a world-space point.
    ///
    /// The index may be out of bounds; check with [`GridSizes::contains`].
    #[must_use]
    pub fn world_to_index(&self, point: &Point3<f64>) -> GridIndex {
        self.sizes.index_of(&self.world_to_grid_frame(point))
    }

    /// Returns the world-space center of a cell.
    #[must_use]
    pub fn index_to_world_center(&self, index: GridIndex) -> Point3<f64> {
        self.grid_frame_to_world(&self.sizes.center_of(index))
    }

    /// Returns the cell at an index, or the out-of-bounds sentinel.
    #[must_use]
    pub fn get(&self, index: GridIndex) -> &T {
        match self.sizes.linear_index(index) {
            Some(linear) => &self.data[linear],
            None => &self.oob_value,
        }
    }

    /// Returns the cell at an in-bounds index, or `None`.
    #[must_use]
    pub fn query(&self, index: GridIndex) -> Option<&T> {
        self.sizes.linear_index(index).map(|linear| &self.data[linear])
    }

    /// Returns a mutable reference to the cell at an index.
    ///
    /// # Errors
    ///
    /// Returns [`VoxelError::InvalidIndex`] if the index is out of bounds.
    pub fn get_mut(&mut self, index: GridIndex) -> VoxelResult<&mut T> {
        match self.sizes.linear_index(index) {
            Some(linear) => Ok(&mut self.data[linear]),
            None => Err(VoxelError::InvalidIndex { index }),
        }
    }

    /// Writes the cell at an index.
    ///
    /// # Errors
    ///
    /// Returns [`VoxelError::InvalidIndex`] if the index is out of bounds.
    pub fn set(&mut self, index: GridIndex, value: T) -> VoxelResult<()> {
        *self.get_mut(index)? = value;
        Ok(())
    }

    /// Returns the entire backing sequence in linearization order, for
    /// bulk copies (e.g. device upload).
    #[must_use]
    pub fn raw_data(&self) -> &[T] {
        &self.data
    }

    /// Returns the mutable backing sequence in linearization order.
    pub fn raw_data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Iterates cells paired with their indices, in linearization order
    /// (x fastest, then y, then z).
    pub fn iter(&self) -> impl Iterator<Item = (GridIndex, &T)> {
        let sizes = self.sizes;
        self.data
            .iter()
            .enumerate()
            .map(move |(linear, value)| (sizes.index_from_linear(linear), value))
    }
}
