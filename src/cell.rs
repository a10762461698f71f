//! Collision cell type and occupancy classification.

use std::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;

/// Occupancy classification of a cell value.
///
/// Occupancy is stored as an `f32` where `0.0` is empty, `1.0` is filled,
/// and `0.5` is unknown. Intermediate values are admissible and classify
/// as filled above `0.5` and empty below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OccupancyClass {
    /// Occupancy below 0.5.
    Empty,
    /// Occupancy above 0.5.
    Filled,
    /// Occupancy exactly 0.5.
    Unknown,
}

impl OccupancyClass {
    /// Classifies an occupancy value.
    ///
    /// # Example
    ///
    /// ```
    /// use voxel_geometry::OccupancyClass;
    ///
    /// assert_eq!(OccupancyClass::classify(0.0), OccupancyClass::Empty);
    /// assert_eq!(OccupancyClass::classify(0.5), OccupancyClass::Unknown);
    /// assert_eq!(OccupancyClass::classify(0.75), OccupancyClass::Filled);
    /// ```
    #[must_use]
    pub fn classify(occupancy: f32) -> Self {
        if occupancy > 0.5 {
            Self::Filled
        } else if occupancy < 0.5 {
            Self::Empty
        } else {
            Self::Unknown
        }
    }

    /// Returns whether an occupancy value counts as filled.
    ///
    /// With `unknown_is_filled`, an exactly-unknown cell (`0.5`) also
    /// counts as filled. This is the classification consumers such as
    /// signed-distance-field extractors apply to collision cells.
    #[must_use]
    pub fn occupancy_is_filled(occupancy: f32, unknown_is_filled: bool) -> bool {
        occupancy > 0.5 || (unknown_is_filled && occupancy == 0.5)
    }
}

bitflags! {
    /// Selection of occupancy classes for surface extraction and topology.
    ///
    /// # Example
    ///
    /// ```
    /// use voxel_geometry::{ComponentMask, OccupancyClass};
    ///
    /// let mask = ComponentMask::FILLED | ComponentMask::EMPTY;
    /// assert!(mask.contains_class(OccupancyClass::Filled));
    /// assert!(!mask.contains_class(OccupancyClass::Unknown));
    /// ```
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ComponentMask: u8 {
        /// Components of filled cells.
        const FILLED = 0b0000_0001;
        /// Components of empty cells.
        const EMPTY = 0b0000_0010;
        /// Components of unknown cells.
        const UNKNOWN = 0b0000_0100;
    }
}

impl ComponentMask {
    /// Returns whether the mask selects the given occupancy class.
    #[must_use]
    pub const fn contains_class(self, class: OccupancyClass) -> bool {
        match class {
            OccupancyClass::Empty => self.contains(Self::EMPTY),
            OccupancyClass::Filled => self.contains(Self::FILLED),
            OccupancyClass::Unknown => self.contains(Self::UNKNOWN),
        }
    }
}

/// A single voxel record: occupancy value plus connected-component id.
///
/// Both fields are stored as relaxed atomics so that concurrent readers
/// and writers during voxelization fusion are race-free without per-field
/// locks; the cell stays exactly `2 * size_of::<f32>()` bytes so raw bulk
/// copies to and from compute backends interpret it identically.
///
/// In-place mutation through the public API takes `&mut self`; the
/// parallel fusion and labelling paths inside this crate write through
/// shared references with relaxed stores, and results are only read back
/// after the corresponding join.
///
/// # Example
///
/// ```
/// use voxel_geometry::{CollisionCell, OccupancyClass};
///
/// let mut cell = CollisionCell::new(1.0);
/// assert_eq!(cell.occupancy(), 1.0);
/// assert_eq!(cell.component(), 0);
/// assert_eq!(cell.occupancy_class(), OccupancyClass::Filled);
///
/// cell.set_component(3);
/// assert_eq!(cell.component(), 3);
/// ```
#[derive(Debug)]
pub struct CollisionCell {
    occupancy: AtomicU32,
    component: AtomicU32,
}

// Raw bulk copies between host and device memory rely on this layout.
const _: () = assert!(std::mem::size_of::<CollisionCell>() == 2 * std::mem::size_of::<f32>());

impl CollisionCell {
    /// Creates a cell with the given occupancy and component id 0.
    #[must_use]
    pub const fn new(occupancy: f32) -> Self {
        Self::with_component(occupancy, 0)
    }

    /// Creates a cell with the given occupancy and component id.
    #[must_use]
    pub const fn with_component(occupancy: f32, component: u32) -> Self {
        Self {
            occupancy: AtomicU32::new(occupancy.to_bits()),
            component: AtomicU32::new(component),
        }
    }

    /// Creates an empty cell (occupancy 0.0).
    #[must_use]
    pub const fn empty() -> Self {
        Self::new(0.0)
    }

    /// Creates a filled cell (occupancy 1.0).
    #[must_use]
    pub const fn filled() -> Self {
        Self::new(1.0)
    }

    /// Creates an unknown cell (occupancy 0.5).
    #[must_use]
    pub const fn unknown() -> Self {
        Self::new(0.5)
    }

    /// Returns the occupancy value.
    #[must_use]
    pub fn occupancy(&self) -> f32 {
        f32::from_bits(self.occupancy.load(Ordering::Relaxed))
    }

    /// Returns the connected-component id (0 when unlabelled).
    #[must_use]
    pub fn component(&self) -> u32 {
        self.component.load(Ordering::Relaxed)
    }

    /// Sets the occupancy value.
    pub fn set_occupancy(&mut self, occupancy: f32) {
        *self.occupancy.get_mut() = occupancy.to_bits();
    }

    /// Sets the connected-component id.
    pub fn set_component(&mut self, component: u32) {
        *self.component.get_mut() = component;
    }

    /// Returns the occupancy class of this cell.
    #[must_use]
    pub fn occupancy_class(&self) -> OccupancyClass {
        OccupancyClass::classify(self.occupancy())
    }

    /// Relaxed store through a shared reference, for parallel fusion.
    pub(crate) fn store_occupancy(&self, occupancy: f32) {
        self.occupancy.store(occupancy.to_bits(), Ordering::Relaxed);
    }

    /// Relaxed store through a shared reference, for the labeller.
    pub(crate) fn store_component(&self, component: u32) {
        self.component.store(component, Ordering::Relaxed);
    }
}

impl Clone for CollisionCell {
    fn clone(&self) -> Self {
        Self::with_component(self.occupancy(), self.component())
    }
}

impl Default for CollisionCell {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for CollisionCell {
    fn eq(&self, other: &Self) -> bool {
        self.occupancy().to_bits() == other.occupancy().to_bits()
            && self.component() == other.component()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_size_is_two_floats() {
        assert_eq!(
            std::mem::size_of::<CollisionCell>(),
            2 * std::mem::size_of::<f32>()
        );
    }

    #[test]
    fn test_constructors() {
        assert_eq!(CollisionCell::empty().occupancy(), 0.0);
        assert_eq!(CollisionCell::filled().occupancy(), 1.0);
        assert_eq!(CollisionCell::unknown().occupancy(), 0.5);
        let cell = CollisionCell::with_component(0.75, 7);
        assert_eq!(cell.occupancy(), 0.75);
        assert_eq!(cell.component(), 7);
    }

    #[test]
    fn test_setters() {
        let mut cell = CollisionCell::default();
        cell.set_occupancy(1.0);
        cell.set_component(4);
        assert_eq!(cell.occupancy(), 1.0);
        assert_eq!(cell.component(), 4);
    }

    #[test]
    fn test_clone_reads_current_values() {
        let mut cell = CollisionCell::new(0.5);
        cell.set_component(2);
        let cloned = cell.clone();
        assert_eq!(cloned, cell);

        cell.set_occupancy(1.0);
        assert_ne!(cloned, cell);
    }

    #[test]
    fn test_classify() {
        assert_eq!(OccupancyClass::classify(0.0), OccupancyClass::Empty);
        assert_eq!(OccupancyClass::classify(0.49), OccupancyClass::Empty);
        assert_eq!(OccupancyClass::classify(0.5), OccupancyClass::Unknown);
        assert_eq!(OccupancyClass::classify(0.51), OccupancyClass::Filled);
        assert_eq!(OccupancyClass::classify(1.0), OccupancyClass::Filled);
    }

    #[test]
    fn test_occupancy_is_filled() {
        assert!(OccupancyClass::occupancy_is_filled(1.0, false));
        assert!(!OccupancyClass::occupancy_is_filled(0.5, false));
        assert!(OccupancyClass::occupancy_is_filled(0.5, true));
        assert!(!OccupancyClass::occupancy_is_filled(0.0, true));
    }

    #[test]
    fn test_component_mask() {
        let mask = ComponentMask::FILLED | ComponentMask::UNKNOWN;
        assert!(mask.contains_class(OccupancyClass::Filled));
        assert!(mask.contains_class(OccupancyClass::Unknown));
        assert!(!mask.contains_class(OccupancyClass::Empty));
        assert!(ComponentMask::all().contains_class(OccupancyClass::Empty));
    }

    #[test]
    fn test_concurrent_stores_keep_last_value() {
        let cell = CollisionCell::new(0.0);
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..1000 {
                        cell.store_occupancy(1.0);
                        cell.store_component(9);
                    }
                });
            }
        });
        assert_eq!(cell.occupancy(), 1.0);
        assert_eq!(cell.component(), 9);
    }
}
