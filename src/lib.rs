//! Dense voxel occupancy grids for collision mapping, with raycasting
//! voxelization and topological analysis.
//!
//! This crate provides the data structures and algorithms for working
//! with voxelized geometry:
//!
//! - [`VoxelGrid`] - Dense 3D cell storage with an SE(3) placement in
//!   world space
//! - [`GridSizes`] / [`GridIndex`] - Uniform-cell sizing and the
//!   world/index transforms that tie a grid to space
//! - [`CollisionMap`] - An occupancy grid carrying connected-component
//!   labels with automatic invalidation on mutation
//! - [`compute_connected_components`] - Callback-parameterized
//!   6-connected flood fill
//! - [`topology`] - Holes and voids per component from surface-vertex
//!   edge counts and surface-graph connectivity
//! - [`voxelize`] - Multi-camera point-cloud fusion by per-ray traversal
//!   with outlier rejection and cross-camera agreement
//!
//! # Coordinate Systems
//!
//! Three spaces appear throughout:
//!
//! - **World space**: continuous `f64` coordinates; a grid is placed in
//!   world space by its `origin` rigid transform.
//! - **Grid frame**: continuous coordinates relative to the grid origin.
//! - **Grid indices**: discrete `i64` cell indices, linearized
//!   `x + nx * (y + ny * z)` (x fastest, then y, then z).
//!
//! # Occupancy Model
//!
//! Each [`CollisionCell`] stores an occupancy value and a component id in
//! exactly 8 bytes. Occupancy `0.0` is empty, `1.0` is filled, `0.5` is
//! unknown; values classify as filled above `0.5` and empty below it.
//! Both fields are relaxed atomics so parallel voxelization can update
//! shared cells without locks.
//!
//! # Example: label and analyze a map
//!
//! ```
//! use voxel_geometry::{
//!     CollisionCell, CollisionMap, ComponentMask, GridIndex, GridSizes,
//! };
//! use nalgebra::Isometry3;
//!
//! let sizes = GridSizes::new_uniform(1.0, 5, 5, 5).unwrap();
//! let mut map = CollisionMap::new(
//!     Isometry3::identity(),
//!     "world",
//!     sizes,
//!     CollisionCell::empty(),
//! )
//! .unwrap();
//!
//! // Fill a 2x2x2 block.
//! for x in 1..3 {
//!     for y in 1..3 {
//!         for z in 1..3 {
//!             map.set_occupancy(GridIndex::new(x, y, z), 1.0).unwrap();
//!         }
//!     }
//! }
//!
//! // One filled component plus the surrounding empty component.
//! assert_eq!(map.update_connected_components(), 2);
//!
//! // The filled block is a topological ball: no holes, no voids.
//! let invariants = map.compute_component_topology(ComponentMask::FILLED).unwrap();
//! let (&component, holes_and_voids) = invariants.iter().next().unwrap();
//! assert_eq!(holes_and_voids.num_holes(), 0);
//! assert_eq!(holes_and_voids.num_voids(), 0);
//! assert_eq!(map.get(GridIndex::new(1, 1, 1)).component(), component);
//! ```
//!
//! # Example: voxelize point clouds
//!
//! See the [`voxelize`] module for raycasting fusion of camera
//! observations into a [`CollisionMap`].

// Safety: Deny unwrap/expect in library code. Tests may use them.
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod cell;
mod collision;
mod components;
mod error;
mod grid;
mod index;
mod serialize;
mod sizes;
pub mod topology;
pub mod voxelize;

// Re-export core types
pub use cell::{CollisionCell, ComponentMask, OccupancyClass};
pub use collision::CollisionMap;
pub use components::compute_connected_components;
pub use error::{VoxelError, VoxelResult};
pub use grid::VoxelGrid;
pub use index::GridIndex;
pub use sizes::GridSizes;
pub use topology::{HolesAndVoids, TopologicalInvariants};
pub use voxelize::{
    available_backends, best_available_voxelizer, make_voxelizer, AvailableBackend, BackendKind,
    CpuVoxelizer, DeviceOptions, DeviceVoxelizationHelper, DeviceVoxelizer, FilterOptions,
    PointCloud, Voxelizer,
};

// Re-export nalgebra types for convenience
pub use nalgebra::{Isometry3, Point3, Vector3};
