//! Grid index type.

/// A discrete 3D index into a voxel grid.
///
/// Uses `i64` coordinates so that out-of-range results of coordinate
/// conversion (including negative indices from points below the grid
/// origin) can be represented and rejected by bounds checks rather than
/// wrapping.
///
/// `GridIndex` is both a linearizable dense index and a hash key for
/// sparse maps of grid cells and surface vertices.
///
/// # Example
///
/// ```
/// use voxel_geometry::GridIndex;
///
/// let index = GridIndex::new(1, 2, 3);
/// assert_eq!(index.x, 1);
/// assert_eq!(index.as_tuple(), (1, 2, 3));
///
/// // Negative indices are representable; they only ever fail bounds checks.
/// let below = GridIndex::new(-1, 0, 0);
/// assert_eq!(below.x, -1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GridIndex {
    /// X index (fastest-varying axis of the linearization).
    pub x: i64,
    /// Y index.
    pub y: i64,
    /// Z index (slowest-varying axis of the linearization).
    pub z: i64,
}

impl GridIndex {
    /// Creates a new grid index.
    ///
    /// # Example
    ///
    /// ```
    /// use voxel_geometry::GridIndex;
    ///
    /// let index = GridIndex::new(10, 20, 30);
    /// assert_eq!(index.y, 20);
    /// ```
    #[must_use]
    pub const fn new(x: i64, y: i64, z: i64) -> Self {
        Self { x, y, z }
    }

    /// Creates an index at the origin (0, 0, 0).
    #[must_use]
    pub const fn origin() -> Self {
        Self::new(0, 0, 0)
    }

    /// Returns the index as a tuple.
    #[must_use]
    pub const fn as_tuple(self) -> (i64, i64, i64) {
        (self.x, self.y, self.z)
    }

    /// Returns the index as an array.
    #[must_use]
    pub const fn as_array(self) -> [i64; 3] {
        [self.x, self.y, self.z]
    }

    /// Returns this index displaced by the given per-axis offsets.
    ///
    /// # Example
    ///
    /// ```
    /// use voxel_geometry::GridIndex;
    ///
    /// let index = GridIndex::new(5, 5, 5);
    /// assert_eq!(index.offset(0, 0, -1), GridIndex::new(5, 5, 4));
    /// ```
    #[must_use]
    pub const fn offset(self, dx: i64, dy: i64, dz: i64) -> Self {
        Self::new(
            self.x.wrapping_add(dx),
            self.y.wrapping_add(dy),
            self.z.wrapping_add(dz),
        )
    }

    /// Returns the 6 face-adjacent neighbors (von Neumann neighborhood).
    ///
    /// These are the only neighbors considered connected by the component
    /// labeller and the surface queries.
    ///
    /// # Example
    ///
    /// ```
    /// use voxel_geometry::GridIndex;
    ///
    /// let neighbors = GridIndex::new(0, 0, 0).face_neighbors();
    /// assert_eq!(neighbors.len(), 6);
    /// assert!(neighbors.contains(&GridIndex::new(0, 0, -1)));
    /// ```
    #[must_use]
    pub const fn face_neighbors(self) -> [Self; 6] {
        [
            self.offset(-1, 0, 0),
            self.offset(1, 0, 0),
            self.offset(0, -1, 0),
            self.offset(0, 1, 0),
            self.offset(0, 0, -1),
            self.offset(0, 0, 1),
        ]
    }
}

impl From<(i64, i64, i64)> for GridIndex {
    fn from((x, y, z): (i64, i64, i64)) -> Self {
        Self::new(x, y, z)
    }
}

impl From<[i64; 3]> for GridIndex {
    fn from([x, y, z]: [i64; 3]) -> Self {
        Self::new(x, y, z)
    }
}

impl From<GridIndex> for (i64, i64, i64) {
    fn from(index: GridIndex) -> Self {
        index.as_tuple()
    }
}

impl std::ops::Add for GridIndex {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        self.offset(other.x, other.y, other.z)
    }
}

impl std::ops::Sub for GridIndex {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        self.offset(
            other.x.wrapping_neg(),
            other.y.wrapping_neg(),
            other.z.wrapping_neg(),
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_new() {
        let index = GridIndex::new(1, 2, 3);
        assert_eq!(index.x, 1);
        assert_eq!(index.y, 2);
        assert_eq!(index.z, 3);
    }

    #[test]
    fn test_origin() {
        assert_eq!(GridIndex::origin(), GridIndex::new(0, 0, 0));
    }

    #[test]
    fn test_conversions() {
        let index = GridIndex::new(1, 2, 3);
        assert_eq!(index.as_tuple(), (1, 2, 3));
        assert_eq!(index.as_array(), [1, 2, 3]);

        let from_tuple: GridIndex = (1, 2, 3).into();
        let from_array: GridIndex = [1, 2, 3].into();
        assert_eq!(from_tuple, index);
        assert_eq!(from_array, index);

        let tuple: (i64, i64, i64) = index.into();
        assert_eq!(tuple, (1, 2, 3));
    }

    #[test]
    fn test_offset() {
        let index = GridIndex::new(5, 5, 5);
        assert_eq!(index.offset(1, -2, 3), GridIndex::new(6, 3, 8));
    }

    #[test]
    fn test_face_neighbors() {
        let neighbors = GridIndex::new(5, 5, 5).face_neighbors();
        assert_eq!(neighbors.len(), 6);
        assert!(neighbors.contains(&GridIndex::new(4, 5, 5)));
        assert!(neighbors.contains(&GridIndex::new(6, 5, 5)));
        assert!(neighbors.contains(&GridIndex::new(5, 4, 5)));
        assert!(neighbors.contains(&GridIndex::new(5, 6, 5)));
        assert!(neighbors.contains(&GridIndex::new(5, 5, 4)));
        assert!(neighbors.contains(&GridIndex::new(5, 5, 6)));
    }

    #[test]
    fn test_add_sub_operators() {
        let a = GridIndex::new(1, 2, 3);
        let b = GridIndex::new(4, 5, 6);
        assert_eq!(a + b, GridIndex::new(5, 7, 9));
        assert_eq!(b - a, GridIndex::new(3, 3, 3));
    }

    #[test]
    fn test_hash_key() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(GridIndex::new(1, 2, 3));
        set.insert(GridIndex::new(1, 2, 3));
        set.insert(GridIndex::new(3, 2, 1));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_negative_indices() {
        let index = GridIndex::new(-1, -2, -3);
        assert_eq!(index.offset(1, 2, 3), GridIndex::origin());
    }
}
