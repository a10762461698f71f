//! CPU (thread-pool) point-cloud voxelizer.

use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Instant;

use nalgebra::Point3;
use rayon::prelude::*;
use tracing::debug;

use crate::cell::CollisionCell;
use crate::collision::CollisionMap;
use crate::error::{VoxelError, VoxelResult};
use crate::index::GridIndex;
use crate::sizes::GridSizes;

use super::{
    validate_voxelization_inputs, DeviceOptions, FilterOptions, PointCloud, Voxelizer,
};

/// Per-cell, per-camera observation counters.
#[derive(Debug, Default)]
struct TrackingCell {
    seen_free: AtomicI32,
    seen_filled: AtomicI32,
}

/// CPU voxelization backend.
///
/// Rays of one point cloud are partitioned across a fixed worker pool;
/// clouds are processed sequentially so tracking grids never alias
/// between cameras. Counter updates are relaxed atomic adds, and the
/// fused map is only read after the final join.
///
/// The pool size is taken from the `"num_threads"` backend option;
/// values below 1 select the default pool size.
#[derive(Debug)]
pub struct CpuVoxelizer {
    pool: rayon::ThreadPool,
}

impl CpuVoxelizer {
    /// Backend option selecting the worker pool size.
    pub const NUM_THREADS_OPTION: &'static str = "num_threads";

    /// Creates a CPU voxelizer with a worker pool sized from `options`.
    ///
    /// # Errors
    ///
    /// Returns [`VoxelError::BackendAllocationFailed`] if the thread pool
    /// cannot be built.
    pub fn new(options: &DeviceOptions) -> VoxelResult<Self> {
        let requested = options.get(Self::NUM_THREADS_OPTION).copied().unwrap_or(0);
        let mut builder = rayon::ThreadPoolBuilder::new();
        if requested > 0 {
            builder = builder.num_threads(requested.unsigned_abs() as usize);
        }
        let pool = builder
            .build()
            .map_err(|error| VoxelError::BackendAllocationFailed(error.to_string()))?;
        debug!(threads = pool.current_num_threads(), "built CPU voxelizer");
        Ok(Self { pool })
    }
}

impl Voxelizer for CpuVoxelizer {
    fn voxelize_point_clouds(
        &self,
        static_environment: &CollisionMap,
        step_size_multiplier: f64,
        filter_options: &FilterOptions,
        pointclouds: &[PointCloud],
    ) -> VoxelResult<CollisionMap> {
        validate_voxelization_inputs(static_environment, step_size_multiplier)?;
        let sizes = *static_environment.sizes();
        let num_cells = usize::try_from(sizes.total_cells()).map_err(|_| {
            VoxelError::BackendAllocationFailed("tracking grid exceeds addressable memory".into())
        })?;
        let step_size = static_environment.resolution() * step_size_multiplier;

        // Raycast each cloud into its own tracking grid; clouds are
        // processed one at a time, rays in parallel.
        let raycast_start = Instant::now();
        let mut tracking_grids = Vec::with_capacity(pointclouds.len());
        for cloud in pointclouds {
            let tracking_grid: Vec<TrackingCell> =
                (0..num_cells).map(|_| TrackingCell::default()).collect();
            let cloud_to_grid = static_environment.inverse_origin() * cloud.origin();
            let grid_frame_origin = cloud_to_grid * Point3::origin();
            self.pool.install(|| {
                cloud.points().par_iter().for_each(|point| {
                    let grid_frame_point = cloud_to_grid * point;
                    raycast_point(
                        sizes,
                        &grid_frame_origin,
                        &grid_frame_point,
                        step_size,
                        &tracking_grid,
                    );
                });
            });
            tracking_grids.push(tracking_grid);
        }
        let raycast_elapsed = raycast_start.elapsed();

        // Fuse the tracking grids over the static environment.
        let filter_start = Instant::now();
        let output =
            filter_tracking_grids(static_environment, &tracking_grids, filter_options, &self.pool);
        debug!(
            raycast_seconds = raycast_elapsed.as_secs_f64(),
            filter_seconds = filter_start.elapsed().as_secs_f64(),
            cameras = pointclouds.len(),
            "voxelized point clouds"
        );
        Ok(output)
    }
}

/// Walks one ray through the tracking grid.
///
/// Cells crossed before the terminal cell count as seen-free; the
/// terminal cell (the one containing the point) counts as seen-filled.
/// Out-of-bounds stretches contribute nothing, and a point outside the
/// grid leaves only the free-space counts of its in-bounds prefix.
fn raycast_point(
    sizes: GridSizes,
    grid_frame_origin: &Point3<f64>,
    grid_frame_point: &Point3<f64>,
    step_size: f64,
    tracking_grid: &[TrackingCell],
) {
    let ray = grid_frame_point - grid_frame_origin;
    let ray_length = ray.norm();
    let terminal_index = sizes.index_of(grid_frame_point);
    if ray_length > 0.0 {
        #[allow(clippy::cast_possible_truncation)]
        let num_steps = (ray_length / step_size).floor() as i64;
        let mut last_index: Option<GridIndex> = None;
        for step in 0..num_steps {
            #[allow(clippy::cast_precision_loss)]
            let ratio = (step as f64 * step_size) / ray_length;
            let current_point = grid_frame_origin + ray * ratio;
            let current_index = sizes.index_of(&current_point);
            if last_index == Some(current_index) {
                continue;
            }
            last_index = Some(current_index);
            // Free-space counting stops at the cell containing the point.
            if current_index == terminal_index {
                break;
            }
            if let Some(linear) = sizes.linear_index(current_index) {
                tracking_grid[linear].seen_free.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
    if let Some(linear) = sizes.linear_index(terminal_index) {
        tracking_grid[linear]
            .seen_filled
            .fetch_add(1, Ordering::Relaxed);
    }
}

/// Applies the agreement policy to every cell, producing the fused map.
fn filter_tracking_grids(
    static_environment: &CollisionMap,
    tracking_grids: &[Vec<TrackingCell>],
    options: &FilterOptions,
    pool: &rayon::ThreadPool,
) -> CollisionMap {
    let mut output = static_environment.clone();
    {
        let output_cells: &[CollisionCell] = output.cells();
        pool.install(|| {
            output_cells.par_iter().enumerate().for_each(|(linear, cell)| {
                let mut cameras_seen_filled: i32 = 0;
                let mut cameras_seen_free: i32 = 0;
                for tracking_grid in tracking_grids {
                    let seen_free = tracking_grid[linear].seen_free.load(Ordering::Relaxed);
                    let seen_filled = tracking_grid[linear].seen_filled.load(Ordering::Relaxed);
                    if seen_filled > options.outlier_points_threshold() {
                        cameras_seen_filled += 1;
                    } else if seen_free > 0 {
                        let percent_free =
                            f64::from(seen_free) / f64::from(seen_free + seen_filled);
                        if percent_free >= options.percent_seen_free() {
                            cameras_seen_free += 1;
                        }
                    }
                }
                if cameras_seen_filled > 0 {
                    cell.store_occupancy(1.0);
                } else if cameras_seen_free >= options.num_cameras_seen_free() {
                    cell.store_occupancy(0.0);
                }
                // Otherwise the cell keeps its static-environment
                // occupancy, already present in the cloned output.
            });
        });
    }
    output.force_components_invalid();
    output
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use nalgebra::Isometry3;

    fn unknown_map(n: i64) -> CollisionMap {
        let sizes = GridSizes::new_uniform(1.0, n, n, n).unwrap();
        CollisionMap::new(
            Isometry3::identity(),
            "world",
            sizes,
            CollisionCell::unknown(),
        )
        .unwrap()
    }

    fn tracking_for(map: &CollisionMap, cloud: &PointCloud, step_size: f64) -> Vec<TrackingCell> {
        let sizes = *map.sizes();
        let num_cells = usize::try_from(sizes.total_cells()).unwrap();
        let tracking_grid: Vec<TrackingCell> =
            (0..num_cells).map(|_| TrackingCell::default()).collect();
        let cloud_to_grid = map.inverse_origin() * cloud.origin();
        let grid_frame_origin = cloud_to_grid * Point3::origin();
        for point in cloud.points() {
            let grid_frame_point = cloud_to_grid * point;
            raycast_point(
                sizes,
                &grid_frame_origin,
                &grid_frame_point,
                step_size,
                &tracking_grid,
            );
        }
        tracking_grid
    }

    #[test]
    fn test_raycast_marks_free_then_filled() {
        let map = unknown_map(10);
        let cloud = PointCloud::new(Isometry3::identity(), vec![Point3::new(5.5, 5.5, 5.5)]);
        let tracking = tracking_for(&map, &cloud, 0.5);
        let sizes = *map.sizes();
        for along in 0..5 {
            let index = GridIndex::new(along, along, along);
            let linear = sizes.linear_index(index).unwrap();
            assert!(
                tracking[linear].seen_free.load(Ordering::Relaxed) >= 1,
                "cell {index:?} was not seen free"
            );
            assert_eq!(tracking[linear].seen_filled.load(Ordering::Relaxed), 0);
        }
        let terminal = sizes.linear_index(GridIndex::new(5, 5, 5)).unwrap();
        assert_eq!(tracking[terminal].seen_filled.load(Ordering::Relaxed), 1);
        assert_eq!(tracking[terminal].seen_free.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_raycast_out_of_bounds_point_leaves_prefix() {
        let map = unknown_map(4);
        // Point beyond the grid: the in-bounds prefix is seen free, no
        // cell is seen filled.
        let cloud = PointCloud::new(Isometry3::identity(), vec![Point3::new(9.5, 0.5, 0.5)]);
        let tracking = tracking_for(&map, &cloud, 0.5);
        let sizes = *map.sizes();
        for x in 0..4 {
            let linear = sizes.linear_index(GridIndex::new(x, 0, 0)).unwrap();
            assert!(tracking[linear].seen_free.load(Ordering::Relaxed) >= 1);
        }
        let filled_total: i32 = tracking
            .iter()
            .map(|cell| cell.seen_filled.load(Ordering::Relaxed))
            .sum();
        assert_eq!(filled_total, 0);
    }

    #[test]
    fn test_zero_length_ray_marks_only_filled() {
        let map = unknown_map(4);
        let cloud = PointCloud::new(Isometry3::identity(), vec![Point3::new(0.0, 0.0, 0.0)]);
        let tracking = tracking_for(&map, &cloud, 0.5);
        let sizes = *map.sizes();
        let origin = sizes.linear_index(GridIndex::origin()).unwrap();
        assert_eq!(tracking[origin].seen_filled.load(Ordering::Relaxed), 1);
        assert_eq!(tracking[origin].seen_free.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_voxelize_single_point() {
        let map = unknown_map(10);
        let cloud = PointCloud::new(Isometry3::identity(), vec![Point3::new(5.5, 5.5, 5.5)]);
        let voxelizer = CpuVoxelizer::new(&DeviceOptions::new()).unwrap();
        let fused = voxelizer
            .voxelize_point_clouds(&map, 0.5, &FilterOptions::default(), &[cloud])
            .unwrap();

        assert_eq!(fused.occupancy(GridIndex::new(5, 5, 5)), 1.0);
        for along in 0..5 {
            assert_eq!(
                fused.occupancy(GridIndex::new(along, along, along)),
                0.0,
                "traversed cell {along} was not freed"
            );
        }
        // Unobserved cells keep the static occupancy.
        assert_eq!(fused.occupancy(GridIndex::new(9, 0, 0)), 0.5);
        // The fused map starts with invalid components.
        assert!(!fused.are_components_valid());
        assert_eq!(fused.frame(), map.frame());
    }

    #[test]
    fn test_voxelize_validates_inputs() {
        let voxelizer = CpuVoxelizer::new(&DeviceOptions::new()).unwrap();
        let map = unknown_map(4);
        let options = FilterOptions::default();

        assert!(matches!(
            voxelizer.voxelize_point_clouds(&CollisionMap::default(), 0.5, &options, &[]),
            Err(VoxelError::UninitializedGrid)
        ));
        for bad_multiplier in [0.0, -0.5, 1.5, f64::NAN] {
            assert!(matches!(
                voxelizer.voxelize_point_clouds(&map, bad_multiplier, &options, &[]),
                Err(VoxelError::InvalidStepSize(_))
            ));
        }
    }

    #[test]
    fn test_filled_vote_overrides_free_votes() {
        // Two cameras see through a cell, a third sees an obstruction in
        // it: the cell must fill.
        let map = unknown_map(8);
        let through = PointCloud::new(Isometry3::identity(), vec![Point3::new(7.5, 0.5, 0.5)]);
        let obstruction = PointCloud::new(Isometry3::identity(), vec![Point3::new(3.5, 0.5, 0.5)]);
        let voxelizer = CpuVoxelizer::new(&DeviceOptions::new()).unwrap();
        let fused = voxelizer
            .voxelize_point_clouds(
                &map,
                0.5,
                &FilterOptions::default(),
                &[through.clone(), through, obstruction],
            )
            .unwrap();
        assert_eq!(fused.occupancy(GridIndex::new(3, 0, 0)), 1.0);
    }

    #[test]
    fn test_camera_agreement_threshold() {
        // Freeing a cell requires two agreeing cameras; only one saw it.
        let map = unknown_map(8);
        let cloud = PointCloud::new(Isometry3::identity(), vec![Point3::new(7.5, 0.5, 0.5)]);
        let options = FilterOptions::new(1.0, 0, 2).unwrap();
        let voxelizer = CpuVoxelizer::new(&DeviceOptions::new()).unwrap();

        let fused = voxelizer
            .voxelize_point_clouds(&map, 0.5, &options, &[cloud.clone()])
            .unwrap();
        assert_eq!(fused.occupancy(GridIndex::new(2, 0, 0)), 0.5);

        let fused = voxelizer
            .voxelize_point_clouds(&map, 0.5, &options, &[cloud.clone(), cloud])
            .unwrap();
        assert_eq!(fused.occupancy(GridIndex::new(2, 0, 0)), 0.0);
    }

    #[test]
    fn test_outlier_threshold_tolerates_stray_points() {
        // One stray point in a cell, many rays through it: with an
        // outlier threshold of 1 the camera still votes free when enough
        // of its observations were free.
        let map = unknown_map(8);
        let mut points = vec![Point3::new(3.5, 0.5, 0.5)];
        for _ in 0..9 {
            points.push(Point3::new(7.5, 0.5, 0.5));
        }
        let cloud = PointCloud::new(Isometry3::identity(), points);
        let options = FilterOptions::new(0.5, 1, 1).unwrap();
        let voxelizer = CpuVoxelizer::new(&DeviceOptions::new()).unwrap();
        let fused = voxelizer
            .voxelize_point_clouds(&map, 0.5, &options, &[cloud])
            .unwrap();
        assert_eq!(fused.occupancy(GridIndex::new(3, 0, 0)), 0.0);
    }

    #[test]
    fn test_pool_size_option() {
        let mut options = DeviceOptions::new();
        options.insert(CpuVoxelizer::NUM_THREADS_OPTION.to_owned(), 2);
        let voxelizer = CpuVoxelizer::new(&options).unwrap();
        assert_eq!(voxelizer.pool.current_num_threads(), 2);
    }
}
