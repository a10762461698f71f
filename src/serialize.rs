//! Byte-stream serialization of collision maps.
//!
//! The normative persisted form is a little-endian byte stream:
//!
//! ```text
//! F64[12]      – origin transform, row-major top 3x4 of the homogeneous matrix
//! F64[3]       – cell extents (cx, cy, cz)
//! I64[3]       – cell counts (nx, ny, nz)
//! F32, U32     – default cell (occupancy, component)
//! F32, U32     – out-of-bounds cell (occupancy, component)
//! U64, U8[len] – frame string, length-prefixed UTF-8
//! U32          – connected-component count
//! U8           – components-valid flag
//! U64          – cell count
//! foreach cell
//!     F32, U32 – occupancy, component (x-major linearization)
//! end
//! ```
//!
//! The file wrapper prepends a 4-byte magic and a flags byte; bit 0 of the
//! flags selects a zstd-compressed body. The uncompressed stream is the
//! normative form.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use nalgebra::{Isometry3, Matrix3, Rotation3, Translation3, UnitQuaternion, Vector3};

use crate::cell::CollisionCell;
use crate::collision::CollisionMap;
use crate::error::{VoxelError, VoxelResult};
use crate::sizes::GridSizes;

/// Magic bytes of the collision map file wrapper.
const FILE_MAGIC: [u8; 4] = *b"VXCM";

/// Flags bit marking a zstd-compressed body.
const FLAG_COMPRESSED: u8 = 0b0000_0001;

/// zstd compression level for the file wrapper.
const COMPRESSION_LEVEL: i32 = 3;

struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take(&mut self, count: usize) -> VoxelResult<&'a [u8]> {
        let end = self.offset.checked_add(count).ok_or_else(|| {
            VoxelError::InvalidSerializedData("length overflows".to_owned())
        })?;
        if end > self.bytes.len() {
            return Err(VoxelError::InvalidSerializedData(format!(
                "truncated stream: need {end} bytes, have {}",
                self.bytes.len()
            )));
        }
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn read_f64(&mut self) -> VoxelResult<f64> {
        let mut raw = [0_u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(f64::from_le_bytes(raw))
    }

    fn read_i64(&mut self) -> VoxelResult<i64> {
        let mut raw = [0_u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(i64::from_le_bytes(raw))
    }

    fn read_u64(&mut self) -> VoxelResult<u64> {
        let mut raw = [0_u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }

    fn read_f32(&mut self) -> VoxelResult<f32> {
        let mut raw = [0_u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(f32::from_le_bytes(raw))
    }

    fn read_u32(&mut self) -> VoxelResult<u32> {
        let mut raw = [0_u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    fn read_u8(&mut self) -> VoxelResult<u8> {
        Ok(self.take(1)?[0])
    }
}

fn write_cell(buffer: &mut Vec<u8>, cell: &CollisionCell) {
    buffer.extend_from_slice(&cell.occupancy().to_le_bytes());
    buffer.extend_from_slice(&cell.component().to_le_bytes());
}

fn read_cell(cursor: &mut Cursor<'_>) -> VoxelResult<CollisionCell> {
    let occupancy = cursor.read_f32()?;
    let component = cursor.read_u32()?;
    Ok(CollisionCell::with_component(occupancy, component))
}

impl CollisionMap {
    /// Serializes this map into the normative byte stream.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let cells = self.cells();
        let mut buffer = Vec::with_capacity(157 + self.frame.len() + cells.len() * 8);
        // Origin transform, row-major top 3x4.
        let matrix = self.origin().to_homogeneous();
        for row in 0..3 {
            for col in 0..4 {
                buffer.extend_from_slice(&matrix[(row, col)].to_le_bytes());
            }
        }
        // Sizing.
        let sizes = self.sizes();
        buffer.extend_from_slice(&sizes.cell_x_size().to_le_bytes());
        buffer.extend_from_slice(&sizes.cell_y_size().to_le_bytes());
        buffer.extend_from_slice(&sizes.cell_z_size().to_le_bytes());
        buffer.extend_from_slice(&sizes.num_x_cells().to_le_bytes());
        buffer.extend_from_slice(&sizes.num_y_cells().to_le_bytes());
        buffer.extend_from_slice(&sizes.num_z_cells().to_le_bytes());
        // Default and out-of-bounds cells.
        write_cell(&mut buffer, self.grid.default_value());
        write_cell(&mut buffer, self.grid.oob_value());
        // Frame.
        buffer.extend_from_slice(&(self.frame.len() as u64).to_le_bytes());
        buffer.extend_from_slice(self.frame.as_bytes());
        // Component state.
        buffer.extend_from_slice(&self.number_of_components.to_le_bytes());
        buffer.push(u8::from(self.components_valid));
        // Dense cell array.
        buffer.extend_from_slice(&(cells.len() as u64).to_le_bytes());
        for cell in cells {
            write_cell(&mut buffer, cell);
        }
        buffer
    }

    /// Deserializes a map from the normative byte stream.
    ///
    /// # Errors
    ///
    /// Returns [`VoxelError::InvalidSerializedData`] for truncated or
    /// inconsistent streams and [`VoxelError::InvalidSizes`] if the
    /// recorded sizing is invalid.
    pub fn from_bytes(bytes: &[u8]) -> VoxelResult<Self> {
        let mut cursor = Cursor::new(bytes);
        // Origin transform.
        let mut rotation = Matrix3::zeros();
        let mut translation = Vector3::zeros();
        for row in 0..3 {
            for col in 0..3 {
                rotation[(row, col)] = cursor.read_f64()?;
            }
            translation[row] = cursor.read_f64()?;
        }
        let origin = Isometry3::from_parts(
            Translation3::from(translation),
            UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(rotation)),
        );
        // Sizing.
        let cell_x_size = cursor.read_f64()?;
        let cell_y_size = cursor.read_f64()?;
        let cell_z_size = cursor.read_f64()?;
        let num_x_cells = cursor.read_i64()?;
        let num_y_cells = cursor.read_i64()?;
        let num_z_cells = cursor.read_i64()?;
        let sizes = GridSizes::new(
            cell_x_size,
            cell_y_size,
            cell_z_size,
            num_x_cells,
            num_y_cells,
            num_z_cells,
        )?;
        // Default and out-of-bounds cells.
        let default_cell = read_cell(&mut cursor)?;
        let oob_cell = read_cell(&mut cursor)?;
        // Frame.
        let frame_length = usize::try_from(cursor.read_u64()?).map_err(|_| {
            VoxelError::InvalidSerializedData("frame length overflows".to_owned())
        })?;
        let frame = std::str::from_utf8(cursor.take(frame_length)?)
            .map_err(|_| VoxelError::InvalidSerializedData("frame is not UTF-8".to_owned()))?
            .to_owned();
        // Component state.
        let number_of_components = cursor.read_u32()?;
        let components_valid = cursor.read_u8()? != 0;
        // Dense cell array.
        let cell_count = cursor.read_u64()?;
        if i64::try_from(cell_count) != Ok(sizes.total_cells()) {
            return Err(VoxelError::InvalidSerializedData(format!(
                "cell count {cell_count} does not match sizes ({} cells)",
                sizes.total_cells()
            )));
        }
        let mut map = Self::with_oob_cell(origin, frame, sizes, default_cell, oob_cell)?;
        for cell in map.grid.raw_data_mut() {
            *cell = read_cell(&mut cursor)?;
        }
        map.number_of_components = number_of_components;
        map.components_valid = components_valid;
        Ok(map)
    }

    /// Writes this map to a file, optionally compressing the body.
    ///
    /// # Errors
    ///
    /// Returns [`VoxelError::Io`] on write failure.
    pub fn save_to_file(&self, path: impl AsRef<Path>, compress: bool) -> VoxelResult<()> {
        let body = self.to_bytes();
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(&FILE_MAGIC)?;
        if compress {
            writer.write_all(&[FLAG_COMPRESSED])?;
            let compressed = zstd::encode_all(&body[..], COMPRESSION_LEVEL)?;
            writer.write_all(&compressed)?;
        } else {
            writer.write_all(&[0])?;
            writer.write_all(&body)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Reads a map from a file written by [`CollisionMap::save_to_file`].
    ///
    /// # Errors
    ///
    /// Returns [`VoxelError::Io`] on read failure and
    /// [`VoxelError::InvalidSerializedData`] for bad magic, flags, or
    /// body.
    pub fn load_from_file(path: impl AsRef<Path>) -> VoxelResult<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut header = [0_u8; 5];
        reader.read_exact(&mut header)?;
        if header[..4] != FILE_MAGIC {
            return Err(VoxelError::InvalidSerializedData(
                "bad file magic".to_owned(),
            ));
        }
        let flags = header[4];
        if flags & !FLAG_COMPRESSED != 0 {
            return Err(VoxelError::InvalidSerializedData(format!(
                "unsupported flags {flags:#010b}"
            )));
        }
        let mut body = Vec::new();
        reader.read_to_end(&mut body)?;
        if flags & FLAG_COMPRESSED != 0 {
            body = zstd::decode_all(&body[..])?;
        }
        Self::from_bytes(&body)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::index::GridIndex;
    use nalgebra::{Point3, Vector3};

    fn sample_map() -> CollisionMap {
        let sizes = GridSizes::new_uniform(0.5, 3, 4, 5).unwrap();
        let origin = Isometry3::new(
            Vector3::new(1.0, -2.0, 3.0),
            Vector3::new(0.0, 0.0, std::f64::consts::FRAC_PI_4),
        );
        let mut map = CollisionMap::with_oob_cell(
            origin,
            "sensor",
            sizes,
            CollisionCell::unknown(),
            CollisionCell::filled(),
        )
        .unwrap();
        map.set_occupancy(GridIndex::new(1, 2, 3), 1.0).unwrap();
        map.set_occupancy(GridIndex::new(0, 0, 0), 0.0).unwrap();
        map.update_connected_components();
        map
    }

    fn assert_maps_equal(a: &CollisionMap, b: &CollisionMap) {
        assert_eq!(a.sizes(), b.sizes());
        assert_eq!(a.frame(), b.frame());
        assert_eq!(a.are_components_valid(), b.are_components_valid());
        assert_eq!(a.num_connected_components(), b.num_connected_components());
        assert_eq!(a.grid.default_value(), b.grid.default_value());
        assert_eq!(a.grid.oob_value(), b.grid.oob_value());
        assert_eq!(a.cells(), b.cells());
        let delta = (a.origin().to_homogeneous() - b.origin().to_homogeneous()).abs().max();
        assert!(delta < 1e-12, "origin transforms differ by {delta}");
    }

    #[test]
    fn test_byte_roundtrip() {
        let map = sample_map();
        let restored = CollisionMap::from_bytes(&map.to_bytes()).unwrap();
        assert_maps_equal(&map, &restored);
    }

    #[test]
    fn test_roundtrip_preserves_world_queries() {
        let map = sample_map();
        let restored = CollisionMap::from_bytes(&map.to_bytes()).unwrap();
        let probe = Point3::new(1.1, -1.9, 3.1);
        assert_eq!(map.world_to_index(&probe), restored.world_to_index(&probe));
    }

    #[test]
    fn test_truncated_stream_fails() {
        let bytes = sample_map().to_bytes();
        for cut in [0, 12, 95, bytes.len() - 1] {
            assert!(matches!(
                CollisionMap::from_bytes(&bytes[..cut]),
                Err(VoxelError::InvalidSerializedData(_))
            ));
        }
    }

    #[test]
    fn test_cell_count_mismatch_fails() {
        let mut bytes = sample_map().to_bytes();
        // The cell-count field sits right before the cell array.
        let count_offset = bytes.len() - 60 * 8 - 8;
        bytes[count_offset..count_offset + 8].copy_from_slice(&59_u64.to_le_bytes());
        assert!(matches!(
            CollisionMap::from_bytes(&bytes),
            Err(VoxelError::InvalidSerializedData(_))
        ));
    }

    #[test]
    fn test_file_roundtrip_uncompressed() {
        let map = sample_map();
        let path = std::env::temp_dir().join("voxel_geometry_test_uncompressed.vxcm");
        map.save_to_file(&path, false).unwrap();
        let restored = CollisionMap::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_maps_equal(&map, &restored);
    }

    #[test]
    fn test_file_roundtrip_compressed() {
        let map = sample_map();
        let path = std::env::temp_dir().join("voxel_geometry_test_compressed.vxcm");
        map.save_to_file(&path, true).unwrap();
        let restored = CollisionMap::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_maps_equal(&map, &restored);
    }

    #[test]
    fn test_bad_magic_fails() {
        let path = std::env::temp_dir().join("voxel_geometry_test_bad_magic.vxcm");
        std::fs::write(&path, b"NOPE\x00garbage").unwrap();
        let result = CollisionMap::load_from_file(&path);
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(
            result,
            Err(VoxelError::InvalidSerializedData(_))
        ));
    }
}
