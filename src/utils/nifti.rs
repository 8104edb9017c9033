//! NIfTI-1 (`.nii` / `.nii.gz`) reading and writing.
//!
//! NIfTI world coordinates are RAS; volumes are converted to and from the LPS
//! convention of [`Geometry`] by negating the first two world axes. On read the
//! sform is preferred over the qform; files are written with both set to the
//! same scanner transform.

use super::voxels::{Endianness, decode_voxels, encode_voxels};
use crate::core::{SegError, SegResult};
use crate::domain::{Geometry, ScalarType, Volume};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use ndarray::Array3;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

const HEADER_SIZE: usize = 348;
const DATA_OFFSET: usize = 352;
const NIFTI_XFORM_SCANNER_ANAT: i16 = 1;
/// Millimetres and seconds.
const XYZT_UNITS: u8 = 2 | 8;

/// NIfTI datatype code of a scalar type.
pub fn datatype_code(scalar_type: ScalarType) -> i16 {
    match scalar_type {
        ScalarType::U8 => 2,
        ScalarType::I16 => 4,
        ScalarType::I32 => 8,
        ScalarType::F32 => 16,
        ScalarType::F64 => 64,
        ScalarType::I8 => 256,
        ScalarType::U16 => 512,
        ScalarType::U32 => 768,
    }
}

/// Scalar type of a NIfTI datatype code.
pub fn scalar_type_from_code(code: i16) -> Option<ScalarType> {
    Some(match code {
        2 => ScalarType::U8,
        4 => ScalarType::I16,
        8 => ScalarType::I32,
        16 => ScalarType::F32,
        64 => ScalarType::F64,
        256 => ScalarType::I8,
        512 => ScalarType::U16,
        768 => ScalarType::U32,
        _ => return None,
    })
}

fn is_gzip(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.to_ascii_lowercase().ends_with(".gz"))
}

/// Reads a NIfTI-1 file, decompressing `.gz` files.
pub fn read_nifti(path: &Path) -> SegResult<Volume> {
    let file_bytes = fs::read(path)?;
    let bytes = if is_gzip(path) {
        let mut decoded = Vec::new();
        GzDecoder::new(file_bytes.as_slice())
            .read_to_end(&mut decoded)
            .map_err(|e| SegError::format_error(path, format!("gzip decode failed: {}", e)))?;
        decoded
    } else {
        file_bytes
    };
    if bytes.len() < HEADER_SIZE {
        return Err(SegError::format_error(path, "file shorter than a NIfTI-1 header"));
    }

    if LittleEndian::read_i32(&bytes[0..4]) == HEADER_SIZE as i32 {
        parse::<LittleEndian>(path, &bytes, Endianness::Little)
    } else if BigEndian::read_i32(&bytes[0..4]) == HEADER_SIZE as i32 {
        parse::<BigEndian>(path, &bytes, Endianness::Big)
    } else {
        Err(SegError::format_error(path, "sizeof_hdr is not 348"))
    }
}

fn parse<B: ByteOrder>(path: &Path, bytes: &[u8], endianness: Endianness) -> SegResult<Volume> {
    let magic = &bytes[344..348];
    if magic != b"n+1\0" && magic != b"ni1\0" {
        return Err(SegError::format_error(path, "missing NIfTI-1 magic"));
    }

    let i16_at = |offset: usize| B::read_i16(&bytes[offset..offset + 2]);
    let f32_at = |offset: usize| f64::from(B::read_f32(&bytes[offset..offset + 4]));

    let dim: Vec<i16> = (0..8).map(|i| i16_at(40 + 2 * i)).collect();
    let ndim = dim[0];
    if !(3..=7).contains(&ndim) || dim[4..=ndim as usize].iter().any(|&d| d > 1) {
        return Err(SegError::format_error(
            path,
            format!("only 3D volumes are supported, dim = {:?}", dim),
        ));
    }
    if dim[1..4].iter().any(|&d| d <= 0) {
        return Err(SegError::format_error(path, format!("invalid dim {:?}", dim)));
    }
    let dims = [dim[1] as usize, dim[2] as usize, dim[3] as usize];

    let code = i16_at(70);
    let stored_type = scalar_type_from_code(code)
        .ok_or_else(|| SegError::format_error(path, format!("unsupported datatype {}", code)))?;

    let pixdim: Vec<f64> = (0..8).map(|i| f32_at(76 + 4 * i)).collect();
    let vox_offset = (f32_at(108) as usize).max(DATA_OFFSET);
    if vox_offset > bytes.len() {
        return Err(SegError::format_error(path, "vox_offset beyond end of file"));
    }
    let slope = f32_at(112);
    let inter = f32_at(116);

    let count = dims.iter().product();
    let mut values = decode_voxels(&bytes[vox_offset..], stored_type, endianness, count)
        .map_err(|e| SegError::format_error(path, e.to_string()))?;
    let scaled = slope != 0.0 && slope.is_finite() && (slope != 1.0 || inter != 0.0);
    if scaled {
        values
            .iter_mut()
            .for_each(|v| *v = (f64::from(*v) * slope + inter) as f32);
    }
    let data = Array3::from_shape_vec((dims[2], dims[1], dims[0]), values)?;

    let qform_code = i16_at(252);
    let sform_code = i16_at(254);
    let (spacing, origin, direction_ras) = if sform_code > 0 {
        let srow = |row: usize| -> [f64; 4] {
            [0, 1, 2, 3].map(|c| f32_at(280 + row * 16 + c * 4))
        };
        let rows = [srow(0), srow(1), srow(2)];
        let mut spacing = [0.0; 3];
        let mut direction = [[0.0; 3]; 3];
        for col in 0..3 {
            let norm = (0..3).map(|r| rows[r][col] * rows[r][col]).sum::<f64>().sqrt();
            let norm = if norm > 0.0 { norm } else { 1.0 };
            spacing[col] = norm;
            for r in 0..3 {
                direction[r][col] = rows[r][col] / norm;
            }
        }
        (spacing, [rows[0][3], rows[1][3], rows[2][3]], direction)
    } else if qform_code > 0 {
        let (b, c, d) = (f32_at(256), f32_at(260), f32_at(264));
        let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
        let qfac = if pixdim[0] < 0.0 { -1.0 } else { 1.0 };
        let mut r = [
            [a * a + b * b - c * c - d * d, 2.0 * (b * c - a * d), 2.0 * (b * d + a * c)],
            [2.0 * (b * c + a * d), a * a + c * c - b * b - d * d, 2.0 * (c * d - a * b)],
            [2.0 * (b * d - a * c), 2.0 * (c * d + a * b), a * a + d * d - b * b - c * c],
        ];
        for row in r.iter_mut() {
            row[2] *= qfac;
        }
        let spacing = [1, 2, 3].map(|i| positive_or_one(pixdim[i]));
        (spacing, [f32_at(268), f32_at(272), f32_at(276)], r)
    } else {
        let spacing = [1, 2, 3].map(|i| positive_or_one(pixdim[i]));
        (spacing, [0.0; 3], identity())
    };

    let geometry = Geometry {
        spacing,
        origin: flip_xy(origin),
        direction: flip_rows_xy(direction_ras),
    };
    let scalar_type = if scaled { ScalarType::F32 } else { stored_type };
    Ok(Volume::new(data, geometry).with_scalar_type(scalar_type))
}

fn positive_or_one(v: f64) -> f64 {
    if v > 0.0 && v.is_finite() { v } else { 1.0 }
}

fn identity() -> [[f64; 3]; 3] {
    [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]
}

/// LPS <-> RAS for points.
fn flip_xy(p: [f64; 3]) -> [f64; 3] {
    [-p[0], -p[1], p[2]]
}

/// LPS <-> RAS for direction matrices.
fn flip_rows_xy(m: [[f64; 3]; 3]) -> [[f64; 3]; 3] {
    [m[0].map(|v| -v), m[1].map(|v| -v), m[2]]
}

fn determinant(m: &[[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

/// Quaternion `(b, c, d)` and `qfac` of a rotation (or improper rotation) matrix.
fn quaternion(m: &[[f64; 3]; 3]) -> ([f64; 3], f64) {
    let mut r = *m;
    let qfac = if determinant(&r) < 0.0 {
        for row in r.iter_mut() {
            row[2] = -row[2];
        }
        -1.0
    } else {
        1.0
    };

    let trace = 1.0 + r[0][0] + r[1][1] + r[2][2];
    let a: f64;
    let mut b: f64;
    let mut c: f64;
    let mut d: f64;
    if trace > 0.5 {
        a = 0.5 * trace.sqrt();
        b = 0.25 * (r[2][1] - r[1][2]) / a;
        c = 0.25 * (r[0][2] - r[2][0]) / a;
        d = 0.25 * (r[1][0] - r[0][1]) / a;
    } else {
        let xd = 1.0 + r[0][0] - (r[1][1] + r[2][2]);
        let yd = 1.0 + r[1][1] - (r[0][0] + r[2][2]);
        let zd = 1.0 + r[2][2] - (r[0][0] + r[1][1]);
        if xd > 1.0 {
            b = 0.5 * xd.sqrt();
            c = 0.25 * (r[0][1] + r[1][0]) / b;
            d = 0.25 * (r[0][2] + r[2][0]) / b;
            a = 0.25 * (r[2][1] - r[1][2]) / b;
        } else if yd > 1.0 {
            c = 0.5 * yd.sqrt();
            b = 0.25 * (r[0][1] + r[1][0]) / c;
            d = 0.25 * (r[1][2] + r[2][1]) / c;
            a = 0.25 * (r[0][2] - r[2][0]) / c;
        } else {
            d = 0.5 * zd.sqrt();
            b = 0.25 * (r[0][2] + r[2][0]) / d;
            c = 0.25 * (r[1][2] + r[2][1]) / d;
            a = 0.25 * (r[1][0] - r[0][1]) / d;
        }
        if a < 0.0 {
            b = -b;
            c = -c;
            d = -d;
        }
    }
    ([b, c, d], qfac)
}

/// Writes `volume` as NIfTI-1, gzip-compressing when the name ends in `.gz`.
pub fn write_nifti(volume: &Volume, path: &Path) -> SegResult<()> {
    let [z, y, x] = volume.shape();
    let dims = [x, y, z];
    if dims.iter().any(|&d| d > i16::MAX as usize) {
        return Err(SegError::invalid_input(format!(
            "volume {:?} exceeds the NIfTI-1 dimension limit",
            volume.shape()
        )));
    }
    let geometry = volume.geometry();
    let scalar_type = volume.scalar_type();
    let direction = flip_rows_xy(geometry.direction);
    let origin = flip_xy(geometry.origin);
    let (quat, qfac) = quaternion(&direction);

    let mut header = vec![0u8; DATA_OFFSET];
    LittleEndian::write_i32(&mut header[0..4], HEADER_SIZE as i32);
    header[38] = b'r';
    let dim = [3, x as i16, y as i16, z as i16, 1, 1, 1, 1];
    for (i, d) in dim.iter().enumerate() {
        LittleEndian::write_i16(&mut header[40 + 2 * i..42 + 2 * i], *d);
    }
    LittleEndian::write_i16(&mut header[70..72], datatype_code(scalar_type));
    LittleEndian::write_i16(&mut header[72..74], (scalar_type.size_bytes() * 8) as i16);
    let pixdim = [
        qfac,
        geometry.spacing[0],
        geometry.spacing[1],
        geometry.spacing[2],
        1.0,
        1.0,
        1.0,
        1.0,
    ];
    for (i, p) in pixdim.iter().enumerate() {
        LittleEndian::write_f32(&mut header[76 + 4 * i..80 + 4 * i], *p as f32);
    }
    LittleEndian::write_f32(&mut header[108..112], DATA_OFFSET as f32);
    LittleEndian::write_f32(&mut header[112..116], 1.0);
    LittleEndian::write_f32(&mut header[116..120], 0.0);
    header[123] = XYZT_UNITS;
    LittleEndian::write_i16(&mut header[252..254], NIFTI_XFORM_SCANNER_ANAT);
    LittleEndian::write_i16(&mut header[254..256], NIFTI_XFORM_SCANNER_ANAT);
    for (i, q) in quat.iter().chain(origin.iter()).enumerate() {
        LittleEndian::write_f32(&mut header[256 + 4 * i..260 + 4 * i], *q as f32);
    }
    for row in 0..3 {
        let values = [
            direction[row][0] * geometry.spacing[0],
            direction[row][1] * geometry.spacing[1],
            direction[row][2] * geometry.spacing[2],
            origin[row],
        ];
        for (c, v) in values.iter().enumerate() {
            let offset = 280 + row * 16 + c * 4;
            LittleEndian::write_f32(&mut header[offset..offset + 4], *v as f32);
        }
    }
    header[344..348].copy_from_slice(b"n+1\0");

    let data = volume.data();
    let voxels = match data.as_slice() {
        Some(slice) => encode_voxels(slice.iter(), scalar_type),
        None => encode_voxels(data.iter().collect::<Vec<_>>().into_iter(), scalar_type),
    };

    let file = fs::File::create(path)?;
    if is_gzip(path) {
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(&header)?;
        encoder.write_all(&voxels)?;
        encoder.finish()?.flush()?;
    } else {
        let mut writer = std::io::BufWriter::new(file);
        writer.write_all(&header)?;
        writer.write_all(&voxels)?;
        writer.flush()?;
    }
    Ok(())
}
