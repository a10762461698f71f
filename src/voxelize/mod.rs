//! Point-cloud voxelization: raycasting fusion of observations into a
//! [`CollisionMap`].
//!
//! Each camera contributes a point cloud (points in the camera frame plus
//! the camera pose in world frame). The voxelizer walks every point's ray
//! through a per-camera tracking grid of seen-free / seen-filled
//! counters, then fuses the tracking grids over a static environment map
//! under an agreement policy: a cell becomes free only when enough
//! cameras saw through it and none saw an obstruction in it, becomes
//! filled when any camera saw enough points in it, and otherwise keeps
//! its static-environment occupancy.
//!
//! Backends implement [`Voxelizer`]; [`make_voxelizer`] selects one by
//! [`BackendKind`], and [`best_available_voxelizer`] probes accelerated
//! backends before falling back to the CPU.
//!
//! # Example
//!
//! ```
//! use voxel_geometry::{
//!     CollisionCell, CollisionMap, CpuVoxelizer, FilterOptions, GridIndex, GridSizes,
//!     PointCloud, Voxelizer,
//! };
//! use nalgebra::{Isometry3, Point3};
//!
//! let sizes = GridSizes::new_uniform(1.0, 8, 8, 8).unwrap();
//! let environment = CollisionMap::new(
//!     Isometry3::identity(),
//!     "world",
//!     sizes,
//!     CollisionCell::unknown(),
//! )
//! .unwrap();
//!
//! let cloud = PointCloud::new(
//!     Isometry3::identity(),
//!     vec![Point3::new(4.5, 4.5, 4.5)],
//! );
//!
//! let voxelizer = CpuVoxelizer::new(&Default::default()).unwrap();
//! let fused = voxelizer
//!     .voxelize_point_clouds(&environment, 0.5, &FilterOptions::default(), &[cloud])
//!     .unwrap();
//!
//! assert_eq!(fused.occupancy(GridIndex::new(4, 4, 4)), 1.0);
//! assert_eq!(fused.occupancy(GridIndex::new(2, 2, 2)), 0.0);
//! ```

mod cpu;
mod device;

use std::collections::BTreeMap;

use nalgebra::{Isometry3, Point3};
use tracing::{debug, warn};

use crate::collision::CollisionMap;
use crate::error::{VoxelError, VoxelResult};

pub use cpu::CpuVoxelizer;
pub use device::{cuda_helpers, opencl_helpers, DeviceVoxelizationHelper, DeviceVoxelizer};

/// Free-form backend options, keyed by name.
///
/// Recognized keys depend on the backend; the CPU backend reads
/// `"num_threads"` (values below 1 select the default pool size), device
/// backends pass the map through to their helper (e.g. device indices).
pub type DeviceOptions = BTreeMap<String, i32>;

/// One camera observation: a point cloud in the camera frame plus the
/// camera pose in world frame.
#[derive(Debug, Clone)]
pub struct PointCloud {
    origin: Isometry3<f64>,
    points: Vec<Point3<f64>>,
}

impl PointCloud {
    /// Creates a point cloud from camera-frame points and the camera pose.
    #[must_use]
    pub const fn new(origin: Isometry3<f64>, points: Vec<Point3<f64>>) -> Self {
        Self { origin, points }
    }

    /// The camera pose in world frame.
    #[must_use]
    pub const fn origin(&self) -> &Isometry3<f64> {
        &self.origin
    }

    /// The points, in the camera frame.
    #[must_use]
    pub fn points(&self) -> &[Point3<f64>] {
        &self.points
    }

    /// Number of points in the cloud.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the cloud has no points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Fusion policy for combining per-camera tracking grids.
///
/// # Example
///
/// ```
/// use voxel_geometry::FilterOptions;
///
/// // Strict default: a cell is freed only when every observation through
/// // it was free and at least one camera saw it.
/// let options = FilterOptions::default();
/// assert_eq!(options.percent_seen_free(), 1.0);
///
/// let lenient = FilterOptions::new(0.8, 2, 2).unwrap();
/// assert_eq!(lenient.num_cameras_seen_free(), 2);
///
/// assert!(FilterOptions::new(1.5, 0, 1).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FilterOptions {
    percent_seen_free: f64,
    outlier_points_threshold: i32,
    num_cameras_seen_free: i32,
}

impl FilterOptions {
    /// Creates validated filter options.
    ///
    /// # Errors
    ///
    /// Returns [`VoxelError::InvalidFilterOptions`] if
    /// `percent_seen_free` is outside `[0, 1]`,
    /// `outlier_points_threshold` is negative, or
    /// `num_cameras_seen_free` is below 1.
    pub fn new(
        percent_seen_free: f64,
        outlier_points_threshold: i32,
        num_cameras_seen_free: i32,
    ) -> VoxelResult<Self> {
        if !(0.0..=1.0).contains(&percent_seen_free) || !percent_seen_free.is_finite() {
            return Err(VoxelError::InvalidFilterOptions(format!(
                "percent_seen_free must be in [0, 1], got {percent_seen_free}"
            )));
        }
        if outlier_points_threshold < 0 {
            return Err(VoxelError::InvalidFilterOptions(format!(
                "outlier_points_threshold must be non-negative, got {outlier_points_threshold}"
            )));
        }
        if num_cameras_seen_free < 1 {
            return Err(VoxelError::InvalidFilterOptions(format!(
                "num_cameras_seen_free must be at least 1, got {num_cameras_seen_free}"
            )));
        }
        Ok(Self {
            percent_seen_free,
            outlier_points_threshold,
            num_cameras_seen_free,
        })
    }

    /// Minimum fraction of free observations for a camera to vote free.
    #[must_use]
    pub const fn percent_seen_free(&self) -> f64 {
        self.percent_seen_free
    }

    /// Number of filled observations a camera tolerates as outliers.
    #[must_use]
    pub const fn outlier_points_threshold(&self) -> i32 {
        self.outlier_points_threshold
    }

    /// Number of agreeing cameras required to free a cell.
    #[must_use]
    pub const fn num_cameras_seen_free(&self) -> i32 {
        self.num_cameras_seen_free
    }
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            percent_seen_free: 1.0,
            outlier_points_threshold: 0,
            num_cameras_seen_free: 1,
        }
    }
}

/// A point-cloud voxelization backend.
pub trait Voxelizer {
    /// Raycasts every point cloud into per-camera tracking grids and
    /// fuses them over the static environment, returning the fused map.
    ///
    /// The fused map shares the static environment's shape, origin, and
    /// frame and always starts with invalid components.
    ///
    /// # Errors
    ///
    /// Returns [`VoxelError::UninitializedGrid`] for a static environment
    /// without cells, [`VoxelError::InvalidStepSize`] for a step size
    /// multiplier outside `(0, 1]`, and backend-specific errors for
    /// allocation or device failures.
    fn voxelize_point_clouds(
        &self,
        static_environment: &CollisionMap,
        step_size_multiplier: f64,
        filter_options: &FilterOptions,
        pointclouds: &[PointCloud],
    ) -> VoxelResult<CollisionMap>;
}

/// Validates the inputs shared by every backend.
pub(crate) fn validate_voxelization_inputs(
    static_environment: &CollisionMap,
    step_size_multiplier: f64,
) -> VoxelResult<()> {
    if !static_environment.is_initialized() {
        return Err(VoxelError::UninitializedGrid);
    }
    if !(step_size_multiplier > 0.0 && step_size_multiplier <= 1.0) {
        return Err(VoxelError::InvalidStepSize(step_size_multiplier));
    }
    Ok(())
}

/// Voxelization backend families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Thread-pool raycasting on the host CPU.
    Cpu,
    /// OpenCL device raycasting.
    OpenCl,
    /// CUDA device raycasting.
    Cuda,
    /// Probe CUDA, then OpenCL, then fall back to the CPU.
    BestAvailable,
}

/// A backend that reported itself usable during enumeration.
#[derive(Debug, Clone)]
pub struct AvailableBackend {
    /// Human-readable device name.
    pub device_name: String,
    /// Backend family.
    pub kind: BackendKind,
    /// Options selecting this device when passed to [`make_voxelizer`].
    pub options: DeviceOptions,
}

/// Enumerates the usable voxelization backends, accelerated devices
/// first.
#[must_use]
pub fn available_backends() -> Vec<AvailableBackend> {
    let mut backends = Vec::new();
    for device_name in cuda_helpers::available_devices() {
        backends.push(AvailableBackend {
            device_name,
            kind: BackendKind::Cuda,
            options: DeviceOptions::new(),
        });
    }
    for device_name in opencl_helpers::available_devices() {
        backends.push(AvailableBackend {
            device_name,
            kind: BackendKind::OpenCl,
            options: DeviceOptions::new(),
        });
    }
    backends.push(AvailableBackend {
        device_name: "CPU".to_owned(),
        kind: BackendKind::Cpu,
        options: DeviceOptions::new(),
    });
    backends
}

/// Constructs a voxelizer for the requested backend.
///
/// # Errors
///
/// Returns [`VoxelError::NoBackendAvailable`] if the requested device
/// backend is unavailable (or, for [`BackendKind::BestAvailable`], if
/// every backend fails) and [`VoxelError::BackendAllocationFailed`] if
/// backend resources cannot be allocated.
pub fn make_voxelizer(
    kind: BackendKind,
    options: &DeviceOptions,
) -> VoxelResult<Box<dyn Voxelizer>> {
    match kind {
        BackendKind::Cpu => Ok(Box::new(CpuVoxelizer::new(options)?)),
        BackendKind::OpenCl => Ok(Box::new(DeviceVoxelizer::opencl(options)?)),
        BackendKind::Cuda => Ok(Box::new(DeviceVoxelizer::cuda(options)?)),
        BackendKind::BestAvailable => best_available_voxelizer(options),
    }
}

/// Probes backends in order of preference (CUDA, OpenCL, CPU) and
/// returns the first that constructs.
///
/// # Errors
///
/// Returns [`VoxelError::NoBackendAvailable`] if every backend fails.
pub fn best_available_voxelizer(options: &DeviceOptions) -> VoxelResult<Box<dyn Voxelizer>> {
    match DeviceVoxelizer::cuda(options) {
        Ok(voxelizer) => {
            debug!("using CUDA voxelizer");
            return Ok(Box::new(voxelizer));
        }
        Err(error) => warn!(%error, "CUDA voxelizer is not available"),
    }
    match DeviceVoxelizer::opencl(options) {
        Ok(voxelizer) => {
            debug!("using OpenCL voxelizer");
            return Ok(Box::new(voxelizer));
        }
        Err(error) => warn!(%error, "OpenCL voxelizer is not available"),
    }
    match CpuVoxelizer::new(options) {
        Ok(voxelizer) => {
            debug!("using CPU voxelizer");
            Ok(Box::new(voxelizer))
        }
        Err(error) => {
            warn!(%error, "CPU voxelizer is not available");
            Err(VoxelError::NoBackendAvailable)
        }
    }
}
