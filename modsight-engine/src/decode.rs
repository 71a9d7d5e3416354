//! Raw register bytes to numeric values.

use crate::def::{DataType, Endianness, MetricDef};
use crate::error::ScrapeError;

/// Decode one definition's bytes into its exposition value.
///
/// The input must be exactly `register_span * 2` bytes, in the byte order the
/// device ships. Multi-byte values are first normalized to big-endian, then
/// interpreted, then scaled by the optional factor. Pure and safe to call
/// from any number of tasks at once.
pub fn parse_value(def: &MetricDef, raw: &[u8]) -> Result<f64, ScrapeError> {
    let expected = usize::from(def.data_type.register_span()) * 2;
    if raw.len() != expected {
        return Err(ScrapeError::InsufficientData {
            data_type: def.data_type,
            expected,
            actual: raw.len(),
        });
    }

    if def.data_type == DataType::Bool {
        let Some(bit) = def.bit_offset else {
            return Err(ScrapeError::MissingBitOffset {
                name: def.name.clone(),
            });
        };
        let word = u32::from(u16::from_be_bytes([raw[0], raw[1]]));
        let set = word.checked_shr(u32::from(bit)).unwrap_or(0) & 1;
        return Ok(f64::from(set));
    }

    let mut buf = [0u8; 8];
    let bytes = reorder(def.endianness, raw, &mut buf);

    let value = match def.data_type {
        DataType::Int16 => f64::from(i16::from_be_bytes([bytes[0], bytes[1]])),
        DataType::Uint16 => f64::from(u16::from_be_bytes([bytes[0], bytes[1]])),
        DataType::Int32 => f64::from(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        DataType::Uint32 => f64::from(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        DataType::Int64 => i64::from_be_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]) as f64,
        DataType::Uint64 => u64::from_be_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]) as f64,
        DataType::Float32 => {
            f64::from(f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
        DataType::Float64 => f64::from_be_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]),
        DataType::Float16 => {
            return Err(ScrapeError::UnimplementedDataType(DataType::Float16));
        }
        // handled above
        DataType::Bool => unreachable!("bool is decoded before byte reordering"),
    };

    Ok(match def.factor {
        Some(factor) => value * factor,
        None => value,
    })
}

/// Reorder `raw` into canonical big-endian order.
///
/// Every permutation is an involution, so the same reordering also maps a
/// big-endian buffer back into the declared layout.
fn reorder<'a>(endianness: Endianness, raw: &'a [u8], buf: &'a mut [u8; 8]) -> &'a [u8] {
    let n = raw.len();
    match endianness {
        Endianness::Big => return raw,
        Endianness::Little => {
            for (i, byte) in raw.iter().rev().enumerate() {
                buf[i] = *byte;
            }
        }
        Endianness::Mixed => {
            // registers stay in place, bytes inside each register swap
            for i in (0..n).step_by(2) {
                buf[i] = raw[i + 1];
                buf[i + 1] = raw[i];
            }
        }
        Endianness::Yolo => {
            // register order reverses, bytes inside each register stay
            for i in (0..n).step_by(2) {
                let j = n - 2 - i;
                buf[i] = raw[j];
                buf[i + 1] = raw[j + 1];
            }
        }
    }
    &buf[..n]
}
