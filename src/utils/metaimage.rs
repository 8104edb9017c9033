//! MetaImage (`.mha` / `.mhd`) reading and writing.
//!
//! Supports 3D single-channel images with inline (`ElementDataFile = LOCAL`)
//! or detached voxel data, optionally zlib compressed. MetaImage stores world
//! coordinates in LPS, like [`Geometry`].
//!
//! `TransformMatrix` is stored column by column: entry `i * 3 + j` is
//! `direction[j][i]`.

use super::voxels::{Endianness, decode_voxels, encode_voxels};
use crate::core::{SegError, SegResult};
use crate::domain::{Geometry, ScalarType, Volume};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use ndarray::Array3;
use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

const DATA_FILE_KEY: &str = "ElementDataFile";

/// Maps a MetaImage element type name to a scalar type.
pub fn element_type_from_name(name: &str) -> Option<ScalarType> {
    Some(match name {
        "MET_UCHAR" => ScalarType::U8,
        "MET_CHAR" => ScalarType::I8,
        "MET_USHORT" => ScalarType::U16,
        "MET_SHORT" => ScalarType::I16,
        "MET_UINT" => ScalarType::U32,
        "MET_INT" => ScalarType::I32,
        "MET_FLOAT" => ScalarType::F32,
        "MET_DOUBLE" => ScalarType::F64,
        _ => return None,
    })
}

/// MetaImage element type name of a scalar type.
pub fn element_type_name(scalar_type: ScalarType) -> &'static str {
    match scalar_type {
        ScalarType::U8 => "MET_UCHAR",
        ScalarType::I8 => "MET_CHAR",
        ScalarType::U16 => "MET_USHORT",
        ScalarType::I16 => "MET_SHORT",
        ScalarType::U32 => "MET_UINT",
        ScalarType::I32 => "MET_INT",
        ScalarType::F32 => "MET_FLOAT",
        ScalarType::F64 => "MET_DOUBLE",
    }
}

/// Parsed `Key = Value` header fields.
#[derive(Debug, Default)]
struct Header {
    fields: HashMap<String, String>,
}

impl Header {
    fn get(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .find_map(|k| self.fields.get(*k))
            .map(String::as_str)
    }

    fn flag(&self, keys: &[&str]) -> bool {
        self.get(keys)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    fn floats<const N: usize>(&self, path: &Path, keys: &[&str], default: [f64; N]) -> SegResult<[f64; N]> {
        let Some(raw) = self.get(keys) else {
            return Ok(default);
        };
        let values: Vec<f64> = raw
            .split_whitespace()
            .map(str::parse)
            .collect::<Result<_, _>>()
            .map_err(|_| SegError::format_error(path, format!("invalid {}: '{}'", keys[0], raw)))?;
        values
            .try_into()
            .map_err(|_| SegError::format_error(path, format!("{} needs {} values", keys[0], N)))
    }
}

/// Reads a MetaImage file.
pub fn read_metaimage(path: &Path) -> SegResult<Volume> {
    let bytes = fs::read(path)?;
    let (header, data_start) = parse_header(path, &bytes)?;

    if header
        .get(&["ObjectType"])
        .is_some_and(|v| !v.eq_ignore_ascii_case("image"))
    {
        return Err(SegError::format_error(path, "ObjectType is not Image"));
    }
    let ndims: usize = header
        .get(&["NDims"])
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| SegError::format_error(path, "missing or invalid NDims"))?;
    if ndims != 3 {
        return Err(SegError::format_error(
            path,
            format!("only 3D images are supported, NDims = {}", ndims),
        ));
    }
    if let Some(channels) = header.get(&["ElementNumberOfChannels"])
        && channels != "1"
    {
        return Err(SegError::format_error(
            path,
            format!("only single-channel images are supported, got {}", channels),
        ));
    }

    let dims: [usize; 3] = header
        .floats(path, &["DimSize"], [0.0; 3])?
        .map(|d| d as usize);
    if dims.contains(&0) {
        return Err(SegError::format_error(path, "missing or zero DimSize"));
    }
    let element = header
        .get(&["ElementType"])
        .ok_or_else(|| SegError::format_error(path, "missing ElementType"))?;
    let scalar_type = element_type_from_name(element).ok_or_else(|| {
        SegError::format_error(path, format!("unsupported ElementType {}", element))
    })?;

    let spacing = header.floats(path, &["ElementSpacing", "ElementSize"], [1.0; 3])?;
    let origin = header.floats(path, &["Offset", "Position", "Origin"], [0.0; 3])?;
    let tm = header.floats(
        path,
        &["TransformMatrix", "Rotation", "Orientation"],
        [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
    )?;
    let mut direction = [[0.0; 3]; 3];
    for (i, column) in tm.chunks_exact(3).enumerate() {
        for (j, &value) in column.iter().enumerate() {
            direction[j][i] = value;
        }
    }

    let data_file = header
        .get(&[DATA_FILE_KEY])
        .ok_or_else(|| SegError::format_error(path, "missing ElementDataFile"))?;
    let raw: Vec<u8> = if data_file.eq_ignore_ascii_case("LOCAL") {
        bytes[data_start..].to_vec()
    } else {
        let detached = path
            .parent()
            .map(|p| p.join(data_file))
            .unwrap_or_else(|| data_file.into());
        fs::read(&detached)?
    };

    let raw = if header.flag(&["CompressedData"]) {
        let mut decoded = Vec::new();
        ZlibDecoder::new(raw.as_slice())
            .read_to_end(&mut decoded)
            .map_err(|e| SegError::format_error(path, format!("zlib decode failed: {}", e)))?;
        decoded
    } else {
        raw
    };

    let endianness = if header.flag(&["BinaryDataByteOrderMSB", "ElementByteOrderMSB"]) {
        Endianness::Big
    } else {
        Endianness::Little
    };
    let count = dims.iter().product();
    let values = decode_voxels(&raw, scalar_type, endianness, count)
        .map_err(|e| SegError::format_error(path, e.to_string()))?;
    let data = Array3::from_shape_vec((dims[2], dims[1], dims[0]), values)?;

    let geometry = Geometry {
        spacing,
        origin,
        direction,
    };
    Ok(Volume::new(data, geometry).with_scalar_type(scalar_type))
}

/// Splits the header from the data and returns the offset of the first data byte.
fn parse_header(path: &Path, bytes: &[u8]) -> SegResult<(Header, usize)> {
    let mut header = Header::default();
    let mut pos = 0;
    while pos < bytes.len() {
        let end = bytes[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(bytes.len(), |i| pos + i);
        let line = std::str::from_utf8(&bytes[pos..end])
            .map_err(|_| SegError::format_error(path, "header is not valid text"))?
            .trim();
        pos = (end + 1).min(bytes.len());

        if line.is_empty() {
            continue;
        }
        let (key, value) = line.split_once('=').ok_or_else(|| {
            SegError::format_error(path, format!("malformed header line '{}'", line))
        })?;
        let key = key.trim();
        header.fields.insert(key.to_string(), value.trim().to_string());
        if key == DATA_FILE_KEY {
            return Ok((header, pos));
        }
    }
    Err(SegError::format_error(path, "header has no ElementDataFile entry"))
}

/// Writes `volume` as MetaImage.
///
/// `.mha` files hold the voxels inline; `.mhd` files reference a `.raw`
/// (or `.zraw` when compressed) file next to them.
pub fn write_metaimage(volume: &Volume, path: &Path, compress: bool) -> SegResult<()> {
    let [z, y, x] = volume.shape();
    let geometry = volume.geometry();
    let scalar_type = volume.scalar_type();

    let data = volume.data();
    let raw = match data.as_slice() {
        Some(slice) => encode_voxels(slice.iter(), scalar_type),
        None => encode_voxels(data.iter().collect::<Vec<_>>().into_iter(), scalar_type),
    };
    let payload = if compress {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw)?;
        encoder.finish()?
    } else {
        raw
    };

    let detached = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("mhd"));
    let data_file = if detached {
        let ext = if compress { "zraw" } else { "raw" };
        let name = path
            .with_extension(ext)
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| SegError::invalid_input(format!("invalid output path {}", path.display())))?;
        Some(name)
    } else {
        None
    };

    let fmt3 = |v: &[f64; 3]| format!("{} {} {}", v[0], v[1], v[2]);
    let mut tm = [0.0; 9];
    for i in 0..3 {
        for j in 0..3 {
            tm[i * 3 + j] = geometry.direction[j][i];
        }
    }
    let tm_text = tm.iter().map(f64::to_string).collect::<Vec<_>>().join(" ");

    let mut header = String::new();
    header.push_str("ObjectType = Image\n");
    header.push_str("NDims = 3\n");
    header.push_str("BinaryData = True\n");
    header.push_str("BinaryDataByteOrderMSB = False\n");
    header.push_str(&format!(
        "CompressedData = {}\n",
        if compress { "True" } else { "False" }
    ));
    if compress {
        header.push_str(&format!("CompressedDataSize = {}\n", payload.len()));
    }
    header.push_str(&format!("TransformMatrix = {}\n", tm_text));
    header.push_str(&format!("Offset = {}\n", fmt3(&geometry.origin)));
    header.push_str("CenterOfRotation = 0 0 0\n");
    header.push_str(&format!("ElementSpacing = {}\n", fmt3(&geometry.spacing)));
    header.push_str(&format!("DimSize = {} {} {}\n", x, y, z));
    header.push_str(&format!("ElementType = {}\n", element_type_name(scalar_type)));
    header.push_str(&format!(
        "{} = {}\n",
        DATA_FILE_KEY,
        data_file.as_deref().unwrap_or("LOCAL")
    ));

    match data_file {
        Some(name) => {
            let raw_path = path.with_file_name(name);
            fs::write(&raw_path, &payload)?;
            fs::write(path, header.as_bytes())?;
        }
        None => {
            let mut file = fs::File::create(path)?;
            file.write_all(header.as_bytes())?;
            file.write_all(&payload)?;
            file.flush()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> Volume {
        let data = Array3::from_shape_fn((3, 4, 5), |(z, y, x)| (z * 20 + y * 5 + x) as f32 - 10.0);
        let geometry = Geometry::new([0.8, 0.9, 3.0], [-100.5, 20.25, 7.0]).with_direction([
            [0.0, -1.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0],
        ]);
        Volume::new(data, geometry).with_scalar_type(ScalarType::I16)
    }

    #[test]
    fn test_round_trip_inline_and_compressed() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        for compress in [false, true] {
            let path = dir.path().join(format!("case_{}.mha", compress));
            let volume = sample();
            write_metaimage(&volume, &path, compress)?;
            let loaded = read_metaimage(&path)?;
            assert_eq!(loaded.data(), volume.data());
            assert_eq!(loaded.scalar_type(), ScalarType::I16);
            assert!(loaded.geometry().approx_eq(volume.geometry()));
        }
        Ok(())
    }

    #[test]
    fn test_round_trip_detached() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let path = dir.path().join("case.mhd");
        write_metaimage(&sample(), &path, false)?;
        assert!(dir.path().join("case.raw").exists());
        let loaded = read_metaimage(&path)?;
        assert_eq!(loaded.data(), sample().data());
        Ok(())
    }

    #[test]
    fn test_transform_matrix_is_column_major() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let path = dir.path().join("rotated.mha");
        let mut bytes = b"ObjectType = Image\nNDims = 3\nTransformMatrix = 0 1 0 -1 0 0 0 0 1\n\
DimSize = 1 1 1\nElementType = MET_UCHAR\nElementDataFile = LOCAL\n"
            .to_vec();
        bytes.push(7);
        fs::write(&path, bytes)?;
        let loaded = read_metaimage(&path)?;
        assert_eq!(loaded.geometry().direction[1][0], 1.0);
        assert_eq!(loaded.geometry().direction[0][1], -1.0);
        assert_eq!(loaded.data()[[0, 0, 0]], 7.0);
        Ok(())
    }

    #[test]
    fn test_missing_data_file_key_is_format_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.mha");
        fs::write(&path, "ObjectType = Image\nNDims = 3\n").unwrap();
        assert!(matches!(
            read_metaimage(&path),
            Err(SegError::Format { .. })
        ));
    }
}
