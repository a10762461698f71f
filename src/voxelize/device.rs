//! Device (accelerator) voxelization behind a helper interface.
//!
//! Device backends exchange only tracking-grid buffers, scalar
//! parameters, and the input/output cell arrays with the host; the
//! kernels themselves live behind [`DeviceVoxelizationHelper`]. This
//! build ships no device kernels, so the CUDA and OpenCL helper
//! factories report no devices and [`DeviceVoxelizer`] construction fails
//! with [`VoxelError::NoBackendAvailable`]; linking a kernel
//! implementation only requires providing a helper.

use std::sync::Mutex;

use nalgebra::{Isometry3, Point3};
use tracing::debug;

use crate::cell::CollisionCell;
use crate::collision::CollisionMap;
use crate::error::{VoxelError, VoxelResult};

use super::{
    validate_voxelization_inputs, DeviceOptions, FilterOptions, PointCloud, Voxelizer,
};

/// Capability set a device voxelization backend must provide.
///
/// One voxelization call drives the helper through: allocate tracking
/// grids, raycast each cloud, allocate and fill the filter grid from the
/// static environment, run the fusion filter, retrieve the filtered
/// cells, release device memory. Partial failures release device memory
/// before the error surfaces.
pub trait DeviceVoxelizationHelper: Send {
    /// Whether the device behind this helper is usable.
    fn is_available(&self) -> bool;

    /// Human-readable name of the device.
    fn device_name(&self) -> &str;

    /// Allocates `num_cameras` tracking grids of `num_cells` counter
    /// pairs on the device, returning each grid's buffer offset.
    ///
    /// # Errors
    ///
    /// Returns [`VoxelError::BackendAllocationFailed`] if device memory
    /// cannot be allocated.
    fn prepare_tracking_grids(
        &mut self,
        num_cells: usize,
        num_cameras: usize,
    ) -> VoxelResult<Vec<i64>>;

    /// Raycasts one cloud of camera-frame points into the tracking grid
    /// at `tracking_grid_offset`.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the kernel launch fails.
    #[allow(clippy::too_many_arguments)]
    fn raycast_points(
        &mut self,
        points: &[Point3<f32>],
        cloud_origin: &Isometry3<f32>,
        inverse_grid_origin: &Isometry3<f32>,
        inverse_step_size: f32,
        inverse_cell_size: f32,
        num_x_cells: i32,
        num_y_cells: i32,
        num_z_cells: i32,
        tracking_grid_offset: i64,
    ) -> VoxelResult<()>;

    /// Allocates the device filter grid and uploads the static
    /// environment cells into it.
    ///
    /// # Errors
    ///
    /// Returns [`VoxelError::BackendAllocationFailed`] if device memory
    /// cannot be allocated.
    fn prepare_filter_grid(
        &mut self,
        num_cells: usize,
        static_cells: &[CollisionCell],
    ) -> VoxelResult<()>;

    /// Fuses every tracking grid into the filter grid under the
    /// agreement policy.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the kernel launch fails.
    fn filter_tracking_grids(
        &mut self,
        num_cameras: usize,
        filter_options: &FilterOptions,
    ) -> VoxelResult<()>;

    /// Downloads the filtered cells into `output_cells`.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the transfer fails.
    fn retrieve_filtered_grid(
        &mut self,
        num_cells: usize,
        output_cells: &mut [CollisionCell],
    ) -> VoxelResult<()>;

    /// Releases all device memory held by this helper.
    fn cleanup(&mut self);
}

/// Voxelizer driving a [`DeviceVoxelizationHelper`].
pub struct DeviceVoxelizer {
    helper: Mutex<Box<dyn DeviceVoxelizationHelper>>,
}

impl std::fmt::Debug for DeviceVoxelizer {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("DeviceVoxelizer").finish_non_exhaustive()
    }
}

impl DeviceVoxelizer {
    /// Wraps an available helper.
    ///
    /// # Errors
    ///
    /// Returns [`VoxelError::NoBackendAvailable`] if the helper reports
    /// itself unavailable.
    pub fn new(helper: Box<dyn DeviceVoxelizationHelper>) -> VoxelResult<Self> {
        if !helper.is_available() {
            return Err(VoxelError::NoBackendAvailable);
        }
        debug!(device = helper.device_name(), "built device voxelizer");
        Ok(Self {
            helper: Mutex::new(helper),
        })
    }

    /// Constructs the CUDA-backed voxelizer.
    ///
    /// # Errors
    ///
    /// Returns [`VoxelError::NoBackendAvailable`] when no CUDA helper is
    /// linked into this build.
    pub fn cuda(options: &DeviceOptions) -> VoxelResult<Self> {
        cuda_helpers::make_helper_interface(options)
            .ok_or(VoxelError::NoBackendAvailable)
            .and_then(Self::new)
    }

    /// Constructs the OpenCL-backed voxelizer.
    ///
    /// # Errors
    ///
    /// Returns [`VoxelError::NoBackendAvailable`] when no OpenCL helper
    /// is linked into this build.
    pub fn opencl(options: &DeviceOptions) -> VoxelResult<Self> {
        opencl_helpers::make_helper_interface(options)
            .ok_or(VoxelError::NoBackendAvailable)
            .and_then(Self::new)
    }
}

impl Voxelizer for DeviceVoxelizer {
    fn voxelize_point_clouds(
        &self,
        static_environment: &CollisionMap,
        step_size_multiplier: f64,
        filter_options: &FilterOptions,
        pointclouds: &[PointCloud],
    ) -> VoxelResult<CollisionMap> {
        validate_voxelization_inputs(static_environment, step_size_multiplier)?;
        let mut helper = self
            .helper
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if !helper.is_available() {
            return Err(VoxelError::NoBackendAvailable);
        }
        let result = run_device_voxelization(
            helper.as_mut(),
            static_environment,
            step_size_multiplier,
            filter_options,
            pointclouds,
        );
        // Device memory never outlives one voxelization call, even on
        // partial failure.
        helper.cleanup();
        result
    }
}

#[allow(clippy::cast_possible_truncation)]
fn run_device_voxelization(
    helper: &mut dyn DeviceVoxelizationHelper,
    static_environment: &CollisionMap,
    step_size_multiplier: f64,
    filter_options: &FilterOptions,
    pointclouds: &[PointCloud],
) -> VoxelResult<CollisionMap> {
    let sizes = *static_environment.sizes();
    let num_cells = usize::try_from(sizes.total_cells()).map_err(|_| {
        VoxelError::BackendAllocationFailed("tracking grid exceeds addressable memory".into())
    })?;
    let tracking_grid_offsets = helper.prepare_tracking_grids(num_cells, pointclouds.len())?;
    if tracking_grid_offsets.len() != pointclouds.len() {
        return Err(VoxelError::BackendAllocationFailed(format!(
            "helper allocated {} tracking grids for {} clouds",
            tracking_grid_offsets.len(),
            pointclouds.len()
        )));
    }

    let inverse_grid_origin = static_environment.inverse_origin().cast::<f32>();
    let inverse_step_size =
        (1.0 / (static_environment.resolution() * step_size_multiplier)) as f32;
    let inverse_cell_size = sizes.inv_cell_x_size() as f32;
    for (cloud, &tracking_grid_offset) in pointclouds.iter().zip(&tracking_grid_offsets) {
        let points: Vec<Point3<f32>> = cloud.points().iter().map(|point| point.cast()).collect();
        helper.raycast_points(
            &points,
            &cloud.origin().cast::<f32>(),
            &inverse_grid_origin,
            inverse_step_size,
            inverse_cell_size,
            sizes.num_x_cells() as i32,
            sizes.num_y_cells() as i32,
            sizes.num_z_cells() as i32,
            tracking_grid_offset,
        )?;
    }

    helper.prepare_filter_grid(num_cells, static_environment.cells())?;
    helper.filter_tracking_grids(pointclouds.len(), filter_options)?;

    let mut output = static_environment.clone();
    helper.retrieve_filtered_grid(num_cells, output.cells_mut())?;
    output.force_components_invalid();
    Ok(output)
}

/// CUDA helper discovery.
///
/// This build carries no CUDA kernels; the factory reports no devices.
pub mod cuda_helpers {
    use tracing::debug;

    use super::{DeviceOptions, DeviceVoxelizationHelper};

    /// Names of the usable CUDA devices.
    #[must_use]
    pub fn available_devices() -> Vec<String> {
        Vec::new()
    }

    /// Constructs the CUDA helper, or `None` when unsupported.
    #[must_use]
    pub fn make_helper_interface(
        _options: &DeviceOptions,
    ) -> Option<Box<dyn DeviceVoxelizationHelper>> {
        debug!("built without CUDA voxelization support");
        None
    }
}

/// OpenCL helper discovery.
///
/// This build carries no OpenCL kernels; the factory reports no devices.
pub mod opencl_helpers {
    use tracing::debug;

    use super::{DeviceOptions, DeviceVoxelizationHelper};

    /// Names of the usable OpenCL devices.
    #[must_use]
    pub fn available_devices() -> Vec<String> {
        Vec::new()
    }

    /// Constructs the OpenCL helper, or `None` when unsupported.
    #[must_use]
    pub fn make_helper_interface(
        _options: &DeviceOptions,
    ) -> Option<Box<dyn DeviceVoxelizationHelper>> {
        debug!("built without OpenCL voxelization support");
        None
    }
}
