//! Connected-component labelling over dense voxel grids.
//!
//! The labeller is 6-connected (face neighbors only) and is parameterized
//! by three callbacks rather than a concrete cell type, so the same
//! machinery labels occupancy classes (the [`crate::CollisionMap`]
//! default) or any user-defined partition of the grid:
//!
//! - `are_connected(a, b)`: whether two face-adjacent in-bounds cells
//!   belong to the same region,
//! - `get_component(index)`: the current component id of an in-bounds
//!   cell (0 means unmarked),
//! - `mark_component(index, id)`: record a component id for a cell.
//!
//! The labeller performs all bounds checks itself; callbacks only ever
//! see in-bounds indices.

use std::collections::{HashSet, VecDeque};

use crate::index::GridIndex;
use crate::sizes::GridSizes;

/// Divisor for the visited-set capacity hint: connected components tend
/// to cover a fraction of the grid, so start the hash set at 1/32 of the
/// total cell count and let it grow for larger regions.
const VISITED_CAPACITY_DIVISOR: usize = 32;

/// Labels the connected components of a grid, returning the number of
/// components found.
///
/// Two in-bounds cells end up with equal component ids exactly when a
/// face-connected path between them exists whose every edge satisfies
/// `are_connected`. Ids are assigned starting from 1, in linearization
/// order of each component's first cell; every in-bounds cell is marked.
///
/// Runs in O(total cells).
///
/// # Example
///
/// Labelling a user-defined partition (even/odd values in a flat array):
///
/// ```
/// use std::cell::RefCell;
/// use voxel_geometry::{GridSizes, compute_connected_components};
///
/// let sizes = GridSizes::new_uniform(1.0, 4, 1, 1).unwrap();
/// let values = [1, 3, 2, 4]; // odd, odd, even, even
/// let labels = RefCell::new([0u32; 4]);
///
/// let count = compute_connected_components(
///     sizes,
///     |a, b| values[a.x as usize] % 2 == values[b.x as usize] % 2,
///     |index| labels.borrow()[index.x as usize],
///     |index, id| labels.borrow_mut()[index.x as usize] = id,
/// );
///
/// assert_eq!(count, 2);
/// assert_eq!(*labels.borrow(), [1, 1, 2, 2]);
/// ```
pub fn compute_connected_components<Connected, Get, Mark>(
    sizes: GridSizes,
    are_connected: Connected,
    get_component: Get,
    mark_component: Mark,
) -> u32
where
    Connected: Fn(GridIndex, GridIndex) -> bool,
    Get: Fn(GridIndex) -> u32,
    Mark: Fn(GridIndex, u32),
{
    // Reset all marks first.
    for index in sizes.indices() {
        mark_component(index, 0);
    }
    let total_cells = sizes.total_cells();
    let mut marked_cells: i64 = 0;
    let mut connected_components: u32 = 0;
    // Sweep in linearization order, flooding a new component from every
    // still-unmarked cell.
    for index in sizes.indices() {
        if get_component(index) == 0 {
            connected_components += 1;
            marked_cells += mark_connected_component(
                sizes,
                &are_connected,
                &get_component,
                &mark_component,
                index,
                connected_components,
            );
            // Short-circuit once everything is marked.
            if marked_cells == total_cells {
                return connected_components;
            }
        }
    }
    connected_components
}

/// Flood-fills one component from `start_index`, returning the number of
/// cells marked.
fn mark_connected_component<Connected, Get, Mark>(
    sizes: GridSizes,
    are_connected: &Connected,
    get_component: &Get,
    mark_component: &Mark,
    start_index: GridIndex,
    connected_component: u32,
) -> i64
where
    Connected: Fn(GridIndex, GridIndex) -> bool,
    Get: Fn(GridIndex) -> u32,
    Mark: Fn(GridIndex, u32),
{
    let mut working_queue = VecDeque::new();
    // Track queued indices so no cell is enqueued twice.
    let capacity_hint =
        usize::try_from(sizes.total_cells()).unwrap_or(usize::MAX) / VISITED_CAPACITY_DIVISOR;
    let mut queued = HashSet::with_capacity(capacity_hint);
    working_queue.push_back(start_index);
    queued.insert(start_index);

    let mut marked_cells: i64 = 0;
    while let Some(current_index) = working_queue.pop_front() {
        mark_component(current_index, connected_component);
        marked_cells += 1;
        for neighbor_index in current_index.face_neighbors() {
            if !sizes.contains(neighbor_index) || get_component(neighbor_index) != 0 {
                continue;
            }
            if are_connected(current_index, neighbor_index) && queued.insert(neighbor_index) {
                working_queue.push_back(neighbor_index);
            }
        }
    }
    marked_cells
}
