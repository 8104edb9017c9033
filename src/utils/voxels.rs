//! Raw voxel buffer encoding shared by the container formats.

use crate::core::{SegError, SegResult};
use crate::domain::ScalarType;
use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Byte order of a raw voxel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

/// Decodes `count` voxels of `scalar_type` from `bytes` into f32.
pub fn decode_voxels(
    bytes: &[u8],
    scalar_type: ScalarType,
    endianness: Endianness,
    count: usize,
) -> SegResult<Vec<f32>> {
    let needed = count
        .checked_mul(scalar_type.size_bytes())
        .ok_or_else(|| SegError::invalid_input("voxel count overflows"))?;
    if bytes.len() < needed {
        return Err(SegError::invalid_input(format!(
            "voxel buffer holds {} bytes, {} needed for {} {:?} voxels",
            bytes.len(),
            needed,
            count,
            scalar_type
        )));
    }
    let bytes = &bytes[..needed];
    Ok(match endianness {
        Endianness::Little => decode_with::<LittleEndian>(bytes, scalar_type),
        Endianness::Big => decode_with::<BigEndian>(bytes, scalar_type),
    })
}

fn decode_with<B: ByteOrder>(bytes: &[u8], scalar_type: ScalarType) -> Vec<f32> {
    let width = scalar_type.size_bytes();
    let chunks = bytes.chunks_exact(width);
    match scalar_type {
        ScalarType::U8 => bytes.iter().map(|&b| f32::from(b)).collect(),
        ScalarType::I8 => bytes.iter().map(|&b| f32::from(b as i8)).collect(),
        ScalarType::U16 => chunks.map(|c| f32::from(B::read_u16(c))).collect(),
        ScalarType::I16 => chunks.map(|c| f32::from(B::read_i16(c))).collect(),
        ScalarType::U32 => chunks.map(|c| B::read_u32(c) as f32).collect(),
        ScalarType::I32 => chunks.map(|c| B::read_i32(c) as f32).collect(),
        ScalarType::F32 => chunks.map(B::read_f32).collect(),
        ScalarType::F64 => chunks.map(|c| B::read_f64(c) as f32).collect(),
    }
}

/// Encodes voxels as little-endian `scalar_type`, rounding and clamping for
/// integer types.
pub fn encode_voxels<'a>(
    values: impl ExactSizeIterator<Item = &'a f32>,
    scalar_type: ScalarType,
) -> Vec<u8> {
    let width = scalar_type.size_bytes();
    let mut out = vec![0u8; values.len() * width];
    for (&v, dst) in values.zip(out.chunks_exact_mut(width)) {
        let q = scalar_type.quantize(v);
        match scalar_type {
            ScalarType::U8 => dst[0] = q as u8,
            ScalarType::I8 => dst[0] = (q as i8) as u8,
            ScalarType::U16 => LittleEndian::write_u16(dst, q as u16),
            ScalarType::I16 => LittleEndian::write_i16(dst, q as i16),
            ScalarType::U32 => LittleEndian::write_u32(dst, q as u32),
            ScalarType::I32 => LittleEndian::write_i32(dst, q as i32),
            ScalarType::F32 => LittleEndian::write_f32(dst, v),
            ScalarType::F64 => LittleEndian::write_f64(dst, f64::from(v)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i16_round_trip() {
        let values = [-1024.0f32, 0.0, 3071.0];
        let bytes = encode_voxels(values.iter(), ScalarType::I16);
        assert_eq!(bytes.len(), 6);
        let decoded = decode_voxels(&bytes, ScalarType::I16, Endianness::Little, 3).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_big_endian_decode() {
        let decoded = decode_voxels(&[0x01, 0x00], ScalarType::U16, Endianness::Big, 1).unwrap();
        assert_eq!(decoded, vec![256.0]);
    }

    #[test]
    fn test_short_buffer_is_rejected() {
        assert!(decode_voxels(&[0u8; 3], ScalarType::F32, Endianness::Little, 1).is_err());
    }

    #[test]
    fn test_u8_encoding_clamps() {
        let bytes = encode_voxels([-3.0f32, 1.4, 400.0].iter(), ScalarType::U8);
        assert_eq!(bytes, vec![0, 1, 255]);
    }
}
