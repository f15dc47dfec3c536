//! Typed optional fields (tags) and their wire codec.
//!
//! On the wire a tag is `(name: 2 bytes)(type: 1 byte)(payload)`. The codec
//! decodes a whole tag blob into an ordered list of owned
//! [TagValue](enum.TagValue.html)s and encodes such a list back, preserving
//! the original integer widths so a decode/encode round trip is exact.

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

/// Alias for a tag name.
pub type TagName = [u8; 2];

/// Biggest allowed array tag length.
pub const MAX_ARRAY_LEN: i32 = 4000;

/// Error produced while decoding optional fields.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum AuxError {
    /// A payload runs past the end of the tag blob.
    #[error("tag payload runs out of bounds")]
    OutOfBounds,
    /// Unknown tag type letter.
    #[error("unexpected tag type {0:#x}")]
    UnknownType(u8),
    /// A string tag (`Z`) has no null terminator.
    #[error("string tag is not null-terminated")]
    NullTerminatedString,
    /// A hex tag (`H`) has no null terminator.
    #[error("hex tag is not null-terminated")]
    NullTerminatedHexarray,
    /// An array tag is longer than [MAX_ARRAY_LEN](constant.MAX_ARRAY_LEN.html).
    #[error("array tag has {0} elements (expected at most {})", MAX_ARRAY_LEN)]
    ArraySize(i32),
    /// A 32-bit length that cannot be non-negative.
    #[error("cannot decode {0:?} as a 32-bit length")]
    WrongInt32([u8; 4]),
}

/// Enum that represents tag type for the cases when a tag contains integer.
///
/// Possible values are `I8` (`c`), `U8` (`C`), `I16` (`s`), `U16` (`S`),
/// `I32` (`i`) and `U32` (`I`).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IntegerType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
}

impl IntegerType {
    /// Returns a letter that represents the integer type. For example, `i8`
    /// corresponds to `c`.
    pub fn letter(self) -> u8 {
        use IntegerType::*;
        match self {
            I8 => b'c',
            U8 => b'C',
            I16 => b's',
            U16 => b'S',
            I32 => b'i',
            U32 => b'I',
        }
    }

    /// Returns IntegerType from a letter, such as `c`.
    pub fn from_letter(ty: u8) -> Option<Self> {
        use IntegerType::*;
        match ty {
            b'c' => Some(I8),
            b'C' => Some(U8),
            b's' => Some(I16),
            b'S' => Some(U16),
            b'i' => Some(I32),
            b'I' => Some(U32),
            _ => None,
        }
    }

    pub fn size_of(self) -> usize {
        use IntegerType::*;
        match self {
            I8 | U8 => 1,
            I16 | U16 => 2,
            I32 | U32 => 4,
        }
    }

    /// Decodes one value of this type from the start of `raw`. The slice must
    /// hold at least [size_of](#method.size_of) bytes.
    fn decode(self, raw: &[u8]) -> i64 {
        use IntegerType::*;
        match self {
            I8 => raw[0] as i8 as i64,
            U8 => raw[0] as i64,
            I16 => LittleEndian::read_i16(raw) as i64,
            U16 => LittleEndian::read_u16(raw) as i64,
            I32 => LittleEndian::read_i32(raw) as i64,
            U32 => LittleEndian::read_u32(raw) as i64,
        }
    }

    /// Appends one value of this type to `out`.
    fn encode(self, value: i64, out: &mut Vec<u8>) {
        use IntegerType::*;
        match self {
            I8 => out.push(value as i8 as u8),
            U8 => out.push(value as u8),
            I16 => out.extend_from_slice(&(value as i16).to_le_bytes()),
            U16 => out.extend_from_slice(&(value as u16).to_le_bytes()),
            I32 => out.extend_from_slice(&(value as i32).to_le_bytes()),
            U32 => out.extend_from_slice(&(value as u32).to_le_bytes()),
        }
    }
}

/// Enum that represents tag type for `String` and `Hex` types (`Z` and `H`).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StringType {
    String,
    Hex,
}

impl StringType {
    /// Returns a letter that represents the string type.
    pub fn letter(self) -> u8 {
        match self {
            StringType::String => b'Z',
            StringType::Hex => b'H',
        }
    }
}

/// Owned value of a single tag.
///
/// # Variants
/// * `Char` - a one-byte character,
/// * `Int(i64, IntegerType)` - an integer in `i64` format to be able to store
/// both `i32` and `u32`. Enum [IntegerType](enum.IntegerType.html) keeps the
/// wire width so re-encoding is exact.
/// * `Float` - a float,
/// * `String(bytes, StringType)` - a string or hex value without the trailing
/// null. Hex digits are emitted in lowercase.
/// * `IntArray` - a typed integer array (values widened to `i64`),
/// * `FloatArray` - a float array.
#[derive(Clone, Debug, PartialEq)]
pub enum TagValue {
    Char(u8),
    Int(i64, IntegerType),
    Float(f32),
    String(Vec<u8>, StringType),
    IntArray(Vec<i64>, IntegerType),
    FloatArray(Vec<f32>),
}

fn split_null_terminated(raw: &[u8], e: AuxError) -> Result<(&[u8], &[u8]), AuxError> {
    match raw.iter().position(|&b| b == 0) {
        Some(i) => Ok((&raw[..i], &raw[i + 1..])),
        None => Err(e),
    }
}

/// Reads the length of an array tag: a signed 32-bit count that must be
/// non-negative and within [MAX_ARRAY_LEN](constant.MAX_ARRAY_LEN.html).
fn read_array_len(raw: &[u8]) -> Result<usize, AuxError> {
    let count = LittleEndian::read_i32(raw);
    if count < 0 {
        Err(AuxError::WrongInt32([raw[0], raw[1], raw[2], raw[3]]))
    } else if count > MAX_ARRAY_LEN {
        Err(AuxError::ArraySize(count))
    } else {
        Ok(count as usize)
    }
}

/// Decodes one tag from the start of `raw`.
/// Returns the tag and the remaining suffix of `raw`.
fn parse_single(raw: &[u8]) -> Result<((TagName, TagValue), &[u8]), AuxError> {
    if raw.len() < 4 {
        return Err(AuxError::OutOfBounds);
    }
    let name = [raw[0], raw[1]];
    let ty = raw[2];
    let payload = &raw[3..];

    if let Some(int_type) = IntegerType::from_letter(ty) {
        let size = int_type.size_of();
        if payload.len() < size {
            return Err(AuxError::OutOfBounds);
        }
        let value = TagValue::Int(int_type.decode(payload), int_type);
        return Ok(((name, value), &payload[size..]));
    }

    match ty {
        b'A' => Ok(((name, TagValue::Char(payload[0])), &payload[1..])),
        b'f' => {
            if payload.len() < 4 {
                return Err(AuxError::OutOfBounds);
            }
            let value = TagValue::Float(LittleEndian::read_f32(payload));
            Ok(((name, value), &payload[4..]))
        }
        b'Z' => {
            let (value, rest) = split_null_terminated(payload, AuxError::NullTerminatedString)?;
            Ok((
                (name, TagValue::String(value.to_vec(), StringType::String)),
                rest,
            ))
        }
        b'H' => {
            let (value, rest) = split_null_terminated(payload, AuxError::NullTerminatedHexarray)?;
            Ok((
                (name, TagValue::String(value.to_vec(), StringType::Hex)),
                rest,
            ))
        }
        b'B' => {
            if payload.len() < 5 {
                return Err(AuxError::OutOfBounds);
            }
            let sub_type = payload[0];
            let count = read_array_len(&payload[1..5])?;
            let elements = &payload[5..];
            if sub_type == b'f' {
                if elements.len() < 4 * count {
                    return Err(AuxError::OutOfBounds);
                }
                let values = (0..count)
                    .map(|i| LittleEndian::read_f32(&elements[4 * i..]))
                    .collect();
                return Ok(((name, TagValue::FloatArray(values)), &elements[4 * count..]));
            }
            let int_type =
                IntegerType::from_letter(sub_type).ok_or(AuxError::UnknownType(sub_type))?;
            let size = int_type.size_of();
            if elements.len() < size * count {
                return Err(AuxError::OutOfBounds);
            }
            let values = (0..count)
                .map(|i| int_type.decode(&elements[size * i..]))
                .collect();
            Ok((
                (name, TagValue::IntArray(values, int_type)),
                &elements[size * count..],
            ))
        }
        _ => Err(AuxError::UnknownType(ty)),
    }
}

/// Decodes a whole tag blob into an ordered tag list.
pub fn parse(mut raw: &[u8]) -> Result<Vec<(TagName, TagValue)>, AuxError> {
    let mut tags = Vec::new();
    while !raw.is_empty() {
        let (tag, rest) = parse_single(raw)?;
        tags.push(tag);
        raw = rest;
    }
    Ok(tags)
}

/// Encodes an ordered tag list back into its wire blob.
pub fn unparse(tags: &[(TagName, TagValue)], out: &mut Vec<u8>) {
    for (name, value) in tags {
        out.extend_from_slice(name);
        match value {
            TagValue::Char(c) => {
                out.push(b'A');
                out.push(*c);
            }
            TagValue::Int(value, int_type) => {
                out.push(int_type.letter());
                int_type.encode(*value, out);
            }
            TagValue::Float(value) => {
                out.push(b'f');
                out.extend_from_slice(&value.to_le_bytes());
            }
            TagValue::String(bytes, str_type) => {
                out.push(str_type.letter());
                match str_type {
                    StringType::String => out.extend_from_slice(bytes),
                    StringType::Hex => out.extend(bytes.iter().map(u8::to_ascii_lowercase)),
                }
                out.push(0);
            }
            TagValue::IntArray(values, int_type) => {
                out.push(b'B');
                out.push(int_type.letter());
                out.extend_from_slice(&(values.len() as i32).to_le_bytes());
                for &value in values {
                    int_type.encode(value, out);
                }
            }
            TagValue::FloatArray(values) => {
                out.push(b'B');
                out.push(b'f');
                out.extend_from_slice(&(values.len() as i32).to_le_bytes());
                for value in values {
                    out.extend_from_slice(&value.to_le_bytes());
                }
            }
        }
    }
}
