//! Error types for voxel grid operations.

use crate::GridIndex;

/// Convenience alias for results in this crate.
pub type VoxelResult<T> = Result<T, VoxelError>;

/// Errors that can occur during voxel grid operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum VoxelError {
    /// The grid sizing is invalid (non-positive extents or counts, or
    /// non-uniform cells where uniform cells are required).
    #[error("invalid grid sizes: {0}")]
    InvalidSizes(String),

    /// A mutable access was attempted at an out-of-range index.
    #[error("index {index:?} is out of grid bounds")]
    InvalidIndex {
        /// The index that was out of bounds.
        index: GridIndex,
    },

    /// The raycast step size multiplier is outside `(0, 1]`.
    #[error("step size multiplier must be in (0, 1], got {0}")]
    InvalidStepSize(f64),

    /// Voxelization was called with a collision map that has no cells.
    #[error("collision map is uninitialized")]
    UninitializedGrid,

    /// A surface or topology query was made while connected components
    /// are invalid.
    #[error("connected components are not valid, call update_connected_components() first")]
    ComponentsInvalid,

    /// A filter option field is outside its valid range.
    #[error("invalid filter options: {0}")]
    InvalidFilterOptions(String),

    /// No working voxelization backend could be constructed.
    #[error("no voxelization backend available")]
    NoBackendAvailable,

    /// A voxelization backend failed to allocate its working buffers.
    #[error("backend allocation failed: {0}")]
    BackendAllocationFailed(String),

    /// A serialized collision map byte stream is malformed.
    #[error("invalid serialized data: {0}")]
    InvalidSerializedData(String),

    /// An I/O error occurred while reading or writing a collision map file.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
