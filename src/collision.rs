//! Collision map: an occupancy voxel grid with labelled components.

use std::collections::{BTreeMap, HashSet};

use nalgebra::{Isometry3, Point3};

use crate::cell::{CollisionCell, ComponentMask};
use crate::components::compute_connected_components;
use crate::error::{VoxelError, VoxelResult};
use crate::grid::VoxelGrid;
use crate::index::GridIndex;
use crate::sizes::GridSizes;
use crate::topology::{self, TopologicalInvariants};

/// A dense occupancy grid with per-cell connected-component labels.
///
/// A `CollisionMap` is a [`VoxelGrid`] of [`CollisionCell`] values plus a
/// frame label, a connected-component count, and a validity flag for the
/// per-cell component ids. Cells must be uniform (the same extent on all
/// three axes); construction fails otherwise.
///
/// Component ids are produced by [`CollisionMap::update_connected_components`]
/// and invalidated by *every* mutating access: an indexed write, an
/// occupancy write, or raw mutable access to the backing cells. Queries
/// that depend on the labels ([`CollisionMap::num_connected_components`],
/// surface extraction, topology) refuse to answer while the labels are
/// invalid.
///
/// # Example
///
/// ```
/// use voxel_geometry::{CollisionCell, CollisionMap, GridIndex, GridSizes};
/// use nalgebra::Isometry3;
///
/// let sizes = GridSizes::new_uniform(1.0, 4, 4, 4).unwrap();
/// let mut map = CollisionMap::new(
///     Isometry3::identity(),
///     "world",
///     sizes,
///     CollisionCell::empty(),
/// )
/// .unwrap();
///
/// map.set_occupancy(GridIndex::new(1, 1, 1), 1.0).unwrap();
/// let components = map.update_connected_components();
/// assert_eq!(components, 2);
/// assert_eq!(map.num_connected_components(), Some(2));
///
/// // Any mutation invalidates the labels.
/// map.set_occupancy(GridIndex::new(0, 0, 0), 1.0).unwrap();
/// assert_eq!(map.num_connected_components(), None);
/// ```
#[derive(Debug, Clone)]
pub struct CollisionMap {
    pub(crate) grid: VoxelGrid<CollisionCell>,
    pub(crate) frame: String,
    pub(crate) number_of_components: u32,
    pub(crate) components_valid: bool,
}

impl CollisionMap {
    /// Creates a collision map with every cell set to `default_cell`,
    /// which also serves as the out-of-bounds sentinel.
    ///
    /// # Errors
    ///
    /// Returns [`VoxelError::InvalidSizes`] if the cells are not uniform
    /// or the sizing is invalid.
    pub fn new(
        origin: Isometry3<f64>,
        frame: impl Into<String>,
        sizes: GridSizes,
        default_cell: CollisionCell,
    ) -> VoxelResult<Self> {
        let oob_cell = default_cell.clone();
        Self::with_oob_cell(origin, frame, sizes, default_cell, oob_cell)
    }

    /// Creates a collision map with a distinct out-of-bounds sentinel.
    ///
    /// # Errors
    ///
    /// Returns [`VoxelError::InvalidSizes`] if the cells are not uniform
    /// or the sizing is invalid.
    pub fn with_oob_cell(
        origin: Isometry3<f64>,
        frame: impl Into<String>,
        sizes: GridSizes,
        default_cell: CollisionCell,
        oob_cell: CollisionCell,
    ) -> VoxelResult<Self> {
        if !sizes.has_uniform_cell_size() {
            return Err(VoxelError::InvalidSizes(
                "collision map cannot have non-uniform cell sizes".to_owned(),
            ));
        }
        Ok(Self {
            grid: VoxelGrid::with_oob_value(origin, sizes, default_cell, oob_cell)?,
            frame: frame.into(),
            number_of_components: 0,
            components_valid: false,
        })
    }

    /// Returns whether this map has been constructed with sizes.
    ///
    /// Only [`CollisionMap::default`] is uninitialized.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.grid.sizes().is_initialized()
    }

    /// Returns the uniform cell extent.
    #[must_use]
    pub fn resolution(&self) -> f64 {
        self.grid.sizes().cell_x_size()
    }

    /// Returns the frame label.
    #[must_use]
    pub fn frame(&self) -> &str {
        &self.frame
    }

    /// Sets the frame label.
    pub fn set_frame(&mut self, frame: impl Into<String>) {
        self.frame = frame.into();
    }

    /// Returns the grid sizing.
    #[must_use]
    pub const fn sizes(&self) -> &GridSizes {
        self.grid.sizes()
    }

    /// Returns the origin transform placing the grid in world space.
    #[must_use]
    pub const fn origin(&self) -> &Isometry3<f64> {
        self.grid.origin()
    }

    /// Returns the cached inverse of the origin transform.
    #[must_use]
    pub const fn inverse_origin(&self) -> &Isometry3<f64> {
        self.grid.inverse_origin()
    }

    /// Returns the index of the cell containing a world-space point.
    #[must_use]
    pub fn world_to_index(&self, point: &Point3<f64>) -> GridIndex {
        self.grid.world_to_index(point)
    }

    /// Returns the world-space center of a cell.
    #[must_use]
    pub fn index_to_world_center(&self, index: GridIndex) -> Point3<f64> {
        self.grid.index_to_world_center(index)
    }

    /// Returns the cell at an index, or the out-of-bounds sentinel.
    #[must_use]
    pub fn get(&self, index: GridIndex) -> &CollisionCell {
        self.grid.get(index)
    }

    /// Returns the cell at an in-bounds index, or `None`.
    #[must_use]
    pub fn query(&self, index: GridIndex) -> Option<&CollisionCell> {
        self.grid.query(index)
    }

    /// Returns the occupancy of the cell at an index, or of the
    /// out-of-bounds sentinel.
    #[must_use]
    pub fn occupancy(&self, index: GridIndex) -> f32 {
        self.grid.get(index).occupancy()
    }

    /// Writes the cell at an index, invalidating components.
    ///
    /// # Errors
    ///
    /// Returns [`VoxelError::InvalidIndex`] if the index is out of bounds.
    pub fn set_cell(&mut self, index: GridIndex, cell: CollisionCell) -> VoxelResult<()> {
        self.grid.set(index, cell)?;
        self.components_valid = false;
        Ok(())
    }

    /// Writes the occupancy of the cell at an index, invalidating
    /// components.
    ///
    /// # Errors
    ///
    /// Returns [`VoxelError::InvalidIndex`] if the index is out of bounds.
    pub fn set_occupancy(&mut self, index: GridIndex, occupancy: f32) -> VoxelResult<()> {
        self.grid.get_mut(index)?.set_occupancy(occupancy);
        self.components_valid = false;
        Ok(())
    }

    /// Returns a mutable reference to the cell at an index, invalidating
    /// components first.
    ///
    /// # Errors
    ///
    /// Returns [`VoxelError::InvalidIndex`] if the index is out of bounds.
    pub fn cell_mut(&mut self, index: GridIndex) -> VoxelResult<&mut CollisionCell> {
        let cell = self.grid.get_mut(index)?;
        self.components_valid = false;
        Ok(cell)
    }

    /// Returns the backing cells in linearization order, for bulk copies.
    #[must_use]
    pub fn cells(&self) -> &[CollisionCell] {
        self.grid.raw_data()
    }

    /// Returns the mutable backing cells, invalidating components first.
    pub fn cells_mut(&mut self) -> &mut [CollisionCell] {
        self.components_valid = false;
        self.grid.raw_data_mut()
    }

    /// Iterates cells paired with their indices, in linearization order.
    pub fn iter(&self) -> impl Iterator<Item = (GridIndex, &CollisionCell)> {
        self.grid.iter()
    }

    /// Returns whether the component labels are currently valid.
    #[must_use]
    pub const fn are_components_valid(&self) -> bool {
        self.components_valid
    }

    /// Marks the component labels valid without recomputing them.
    ///
    /// Use with care: only when the labels are known to still hold, e.g.
    /// after writing nothing but component ids produced by a labelling
    /// pass.
    pub fn force_components_valid(&mut self) {
        self.components_valid = true;
    }

    /// Marks the component labels invalid.
    pub fn force_components_invalid(&mut self) {
        self.components_valid = false;
    }

    /// Labels the 6-connected components of equal occupancy class,
    /// returning the component count.
    ///
    /// Every in-bounds cell receives a component id in `[1, count]`;
    /// the labels are marked valid.
    pub fn update_connected_components(&mut self) -> u32 {
        let grid = &self.grid;
        let count = compute_connected_components(
            *grid.sizes(),
            |a, b| grid.get(a).occupancy_class() == grid.get(b).occupancy_class(),
            |index| grid.get(index).component(),
            |index, component| grid.get(index).store_component(component),
        );
        self.number_of_components = count;
        self.components_valid = true;
        count
    }

    /// Returns the component count, or `None` while the labels are
    /// invalid.
    #[must_use]
    pub const fn num_connected_components(&self) -> Option<u32> {
        if self.components_valid {
            Some(self.number_of_components)
        } else {
            None
        }
    }

    /// Returns whether the cell at an index is on an occupancy-class
    /// surface, or `None` if the index is out of bounds.
    ///
    /// A cell is a surface cell when any of its 6 face neighbors has a
    /// different occupancy class; out-of-bounds neighbors count as a
    /// distinct class.
    #[must_use]
    pub fn is_surface_index(&self, index: GridIndex) -> Option<bool> {
        if !self.grid.sizes().contains(index) {
            return None;
        }
        let class = self.grid.get(index).occupancy_class();
        let on_surface = index.face_neighbors().iter().any(|&neighbor| {
            self.grid
                .query(neighbor)
                .map_or(true, |cell| cell.occupancy_class() != class)
        });
        Some(on_surface)
    }

    /// Returns whether the cell at an index is on a connected-component
    /// surface, or `None` if the index is out of bounds or the labels are
    /// invalid.
    ///
    /// Out-of-bounds neighbors count as component id 0, so the grid
    /// boundary is always a component surface.
    #[must_use]
    pub fn is_connected_component_surface_index(&self, index: GridIndex) -> Option<bool> {
        if !self.components_valid || !self.grid.sizes().contains(index) {
            return None;
        }
        let component = self.grid.get(index).component();
        let on_surface = index
            .face_neighbors()
            .iter()
            .any(|&neighbor| self.component_or_zero(neighbor) != component);
        Some(on_surface)
    }

    /// Returns whether the cell containing a world-space location is a
    /// candidate corner feature, or `None` if the location falls outside
    /// the grid or the labels are invalid.
    #[must_use]
    pub fn check_if_candidate_corner_world(&self, location: &Point3<f64>) -> Option<bool> {
        self.check_if_candidate_corner(self.grid.world_to_index(location))
    }

    /// Returns whether the cell containing a grid-frame location is a
    /// candidate corner feature, or `None` if the location falls outside
    /// the grid or the labels are invalid.
    #[must_use]
    pub fn check_if_candidate_corner_grid_frame(&self, location: &Point3<f64>) -> Option<bool> {
        self.check_if_candidate_corner(self.grid.sizes().index_of(location))
    }

    /// Returns whether the cell at an index is a candidate corner
    /// feature, or `None` if the index is out of bounds or the labels are
    /// invalid.
    ///
    /// A cell qualifies when at least two of its face neighbors belong to
    /// a different component, i.e. the component surface bends across the
    /// cell. Used as a cheap first filter when hunting corner-like
    /// features on component surfaces.
    #[must_use]
    pub fn check_if_candidate_corner(&self, index: GridIndex) -> Option<bool> {
        if !self.components_valid || !self.grid.sizes().contains(index) {
            return None;
        }
        let component = self.grid.get(index).component();
        let differing_neighbors = index
            .face_neighbors()
            .iter()
            .filter(|&&neighbor| self.component_or_zero(neighbor) != component)
            .count();
        Some(differing_neighbors >= 2)
    }

    /// Collects the surface cells of every component whose occupancy
    /// class is selected by `mask`, keyed by component id.
    ///
    /// # Errors
    ///
    /// Returns [`VoxelError::ComponentsInvalid`] while the component
    /// labels are invalid.
    pub fn extract_component_surfaces(
        &self,
        mask: ComponentMask,
    ) -> VoxelResult<BTreeMap<u32, HashSet<GridIndex>>> {
        if !self.components_valid {
            return Err(VoxelError::ComponentsInvalid);
        }
        Ok(topology::extract_component_surfaces(
            *self.grid.sizes(),
            |index| self.component_or_zero(index),
            |index| {
                mask.contains_class(self.grid.get(index).occupancy_class())
                    && self.is_connected_component_surface_index(index) == Some(true)
            },
        ))
    }

    /// Collects the surfaces of filled components.
    ///
    /// # Errors
    ///
    /// Returns [`VoxelError::ComponentsInvalid`] while the component
    /// labels are invalid.
    pub fn extract_filled_component_surfaces(
        &self,
    ) -> VoxelResult<BTreeMap<u32, HashSet<GridIndex>>> {
        self.extract_component_surfaces(ComponentMask::FILLED)
    }

    /// Collects the surfaces of empty components.
    ///
    /// # Errors
    ///
    /// Returns [`VoxelError::ComponentsInvalid`] while the component
    /// labels are invalid.
    pub fn extract_empty_component_surfaces(
        &self,
    ) -> VoxelResult<BTreeMap<u32, HashSet<GridIndex>>> {
        self.extract_component_surfaces(ComponentMask::EMPTY)
    }

    /// Collects the surfaces of unknown components.
    ///
    /// # Errors
    ///
    /// Returns [`VoxelError::ComponentsInvalid`] while the component
    /// labels are invalid.
    pub fn extract_unknown_component_surfaces(
        &self,
    ) -> VoxelResult<BTreeMap<u32, HashSet<GridIndex>>> {
        self.extract_component_surfaces(ComponentMask::UNKNOWN)
    }

    /// Computes holes and voids for every component whose occupancy class
    /// is selected by `mask`.
    ///
    /// # Errors
    ///
    /// Returns [`VoxelError::ComponentsInvalid`] while the component
    /// labels are invalid.
    pub fn compute_component_topology(
        &self,
        mask: ComponentMask,
    ) -> VoxelResult<TopologicalInvariants> {
        let component_surfaces = self.extract_component_surfaces(mask)?;
        let get_component = |index| self.component_or_zero(index);
        Ok(component_surfaces
            .into_iter()
            .map(|(component, surface)| {
                let invariants =
                    topology::compute_holes_and_voids(component, &surface, get_component);
                (component, invariants)
            })
            .collect())
    }

    /// Component id of an in-bounds cell, 0 outside the grid.
    pub(crate) fn component_or_zero(&self, index: GridIndex) -> u32 {
        self.grid.query(index).map_or(0, CollisionCell::component)
    }
}

impl Default for CollisionMap {
    /// The uninitialized collision map: no cells, identity origin, empty
    /// frame. Voxelization rejects it with
    /// [`VoxelError::UninitializedGrid`].
    fn default() -> Self {
        Self {
            grid: VoxelGrid::uninitialized(CollisionCell::empty(), CollisionCell::empty()),
            frame: String::new(),
            number_of_components: 0,
            components_valid: false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    fn empty_map(n: i64) -> CollisionMap {
        let sizes = GridSizes::new_uniform(1.0, n, n, n).unwrap();
        CollisionMap::new(
            Isometry3::identity(),
            "world",
            sizes,
            CollisionCell::empty(),
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_non_uniform_cells() {
        let sizes = GridSizes::new(1.0, 1.0, 2.0, 4, 4, 2).unwrap();
        let result = CollisionMap::new(
            Isometry3::identity(),
            "world",
            sizes,
            CollisionCell::empty(),
        );
        assert!(matches!(result, Err(VoxelError::InvalidSizes(_))));
    }

    #[test]
    fn test_resolution_and_frame() {
        let mut map = empty_map(4);
        assert_eq!(map.resolution(), 1.0);
        assert_eq!(map.frame(), "world");
        map.set_frame("robot");
        assert_eq!(map.frame(), "robot");
    }

    #[test]
    fn test_default_is_uninitialized() {
        let map = CollisionMap::default();
        assert!(!map.is_initialized());
        assert!(map.cells().is_empty());
    }

    #[test]
    fn test_mutation_invalidates_components() {
        let mut map = empty_map(3);
        map.update_connected_components();
        assert!(map.are_components_valid());

        map.set_occupancy(GridIndex::new(0, 0, 0), 1.0).unwrap();
        assert_eq!(map.num_connected_components(), None);

        map.update_connected_components();
        map.set_cell(GridIndex::new(1, 1, 1), CollisionCell::filled())
            .unwrap();
        assert!(!map.are_components_valid());

        map.update_connected_components();
        let _ = map.cells_mut();
        assert!(!map.are_components_valid());

        map.update_connected_components();
        let _ = map.cell_mut(GridIndex::new(0, 0, 0)).unwrap();
        assert!(!map.are_components_valid());
    }

    #[test]
    fn test_failed_write_does_not_invalidate() {
        let mut map = empty_map(3);
        map.update_connected_components();
        assert!(map.set_occupancy(GridIndex::new(9, 9, 9), 1.0).is_err());
        assert!(map.are_components_valid());
    }

    #[test]
    fn test_force_valid_escape_hatch() {
        let mut map = empty_map(3);
        map.set_occupancy(GridIndex::new(0, 0, 0), 1.0).unwrap();
        assert!(!map.are_components_valid());
        map.force_components_valid();
        assert!(map.are_components_valid());
        map.force_components_invalid();
        assert!(!map.are_components_valid());
    }

    #[test]
    fn test_update_labels_every_cell() {
        let mut map = empty_map(3);
        map.set_occupancy(GridIndex::new(1, 1, 1), 1.0).unwrap();
        let count = map.update_connected_components();
        assert_eq!(count, 2);
        for (_, cell) in map.iter() {
            assert!(cell.component() >= 1 && cell.component() <= count);
        }
    }

    #[test]
    fn test_is_surface_index() {
        let mut map = empty_map(5);
        // 3x3x3 filled block centered in the grid.
        for index in map.sizes().indices().collect::<Vec<_>>() {
            if (1..4).contains(&index.x) && (1..4).contains(&index.y) && (1..4).contains(&index.z)
            {
                map.set_occupancy(index, 1.0).unwrap();
            }
        }
        // Block center is interior to the filled class.
        assert_eq!(map.is_surface_index(GridIndex::new(2, 2, 2)), Some(false));
        // Block faces are surface.
        assert_eq!(map.is_surface_index(GridIndex::new(1, 2, 2)), Some(true));
        // Grid-boundary empty cells are surface (out-of-bounds neighbors
        // are a distinct class).
        assert_eq!(map.is_surface_index(GridIndex::new(0, 0, 0)), Some(true));
        // Out-of-bounds query.
        assert_eq!(map.is_surface_index(GridIndex::new(5, 0, 0)), None);
    }

    #[test]
    fn test_component_surface_index_requires_valid_labels() {
        let mut map = empty_map(3);
        assert_eq!(
            map.is_connected_component_surface_index(GridIndex::new(1, 1, 1)),
            None
        );
        map.update_connected_components();
        // Every boundary cell neighbors out-of-bounds id 0.
        assert_eq!(
            map.is_connected_component_surface_index(GridIndex::new(0, 0, 0)),
            Some(true)
        );
        assert_eq!(
            map.is_connected_component_surface_index(GridIndex::new(1, 1, 1)),
            Some(false)
        );
    }

    #[test]
    fn test_candidate_corner() {
        let mut map = empty_map(4);
        map.set_occupancy(GridIndex::new(0, 0, 0), 1.0).unwrap();
        assert_eq!(map.check_if_candidate_corner(GridIndex::new(0, 0, 0)), None);
        map.update_connected_components();

        // The filled cell has three out-of-bounds neighbors (id 0) and
        // three empty-component neighbors.
        assert_eq!(
            map.check_if_candidate_corner(GridIndex::new(0, 0, 0)),
            Some(true)
        );
        // An interior empty cell touches only its own component.
        assert_eq!(
            map.check_if_candidate_corner(GridIndex::new(2, 2, 2)),
            Some(false)
        );
        // World-space variant addresses the same cells.
        assert_eq!(
            map.check_if_candidate_corner_world(&Point3::new(0.5, 0.5, 0.5)),
            Some(true)
        );
        assert_eq!(
            map.check_if_candidate_corner_world(&Point3::new(-1.0, 0.5, 0.5)),
            None
        );
    }

    #[test]
    fn test_extract_surfaces_requires_valid_labels() {
        let map = empty_map(3);
        assert!(matches!(
            map.extract_component_surfaces(ComponentMask::all()),
            Err(VoxelError::ComponentsInvalid)
        ));
        assert!(matches!(
            map.compute_component_topology(ComponentMask::FILLED),
            Err(VoxelError::ComponentsInvalid)
        ));
    }

    #[test]
    fn test_extract_surfaces_masks_classes() {
        let mut map = empty_map(4);
        map.set_occupancy(GridIndex::new(1, 1, 1), 1.0).unwrap();
        map.update_connected_components();

        let filled = map.extract_filled_component_surfaces().unwrap();
        assert_eq!(filled.len(), 1);
        let filled_component = map.get(GridIndex::new(1, 1, 1)).component();
        assert_eq!(
            filled[&filled_component],
            HashSet::from([GridIndex::new(1, 1, 1)])
        );

        let empty = map.extract_empty_component_surfaces().unwrap();
        assert_eq!(empty.len(), 1);
        assert!(map.extract_unknown_component_surfaces().unwrap().is_empty());
    }

    #[test]
    fn test_clone_is_independent() {
        let mut map = empty_map(3);
        map.update_connected_components();
        let mut cloned = map.clone();
        assert!(cloned.are_components_valid());

        cloned.set_occupancy(GridIndex::new(0, 0, 0), 1.0).unwrap();
        assert!(map.are_components_valid());
        assert_eq!(map.occupancy(GridIndex::new(0, 0, 0)), 0.0);
        assert_eq!(cloned.occupancy(GridIndex::new(0, 0, 0)), 1.0);
    }

    #[test]
    fn test_indexed_read_matches_iteration() {
        let mut map = empty_map(3);
        map.set_occupancy(GridIndex::new(2, 1, 0), 1.0).unwrap();
        for (index, cell) in map.iter() {
            assert_eq!(map.get(index), cell);
        }
    }
}
