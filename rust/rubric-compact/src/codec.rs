//! Integer and string encodings used in table keys and tags.
//!
//! Two families of encodings live here:
//!
//! - **Compact** encodings ([`encode_uint`], [`encode_uint_last`]) used inside
//!   tags, where sort order is irrelevant.
//! - **Sortable** encodings ([`encode_uint_sortable`],
//!   [`encode_string_sortable`]) used inside keys. For these, byte-wise
//!   comparison of the encodings matches the natural order of the values,
//!   and an encoded string is self-delimiting, so the key
//!   `encode_string_sortable(term) ++ encode_uint_sortable(docid)` sorts by
//!   `(term, docid)` and the initial-chunk key `encode_string_sortable(term)`
//!   sorts before all of that term's continuation keys.
//!
//! Decoders take `&mut &[u8]` and advance the slice past the decoded field.
//! Running out of input mid-field is reported as a corruption error.

use rubric_common::{Result, error::Error};

/// Appends the compact encoding of `value`: seven bits per byte, least
/// significant group first, high bit set on every byte but the last.
pub fn encode_uint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let part = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(part);
            return;
        }
        buf.push(part | 0x80);
    }
}

pub fn decode_uint(input: &mut &[u8]) -> Result<u64> {
    let mut result = 0u64;
    let mut shift = 0u32;
    loop {
        let Some((&part, rest)) = input.split_first() else {
            return Err(Error::corrupt("uint", "buffer exhausted"));
        };
        *input = rest;
        let bits = (part & 0x7f) as u64;
        if shift >= 64 || (shift == 63 && bits > 1) {
            return Err(Error::corrupt("uint", "value does not fit in 64 bits"));
        }
        result |= bits << shift;
        if part & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
}

/// Decodes a compact integer that must fit in 32 bits.
pub fn decode_u32(input: &mut &[u8]) -> Result<u32> {
    narrow(decode_uint(input)?, "uint")
}

/// Appends `value` as the final field of a tag: little-endian bytes with no
/// length prefix and no trailing zero bytes. Zero encodes to nothing.
pub fn encode_uint_last(buf: &mut Vec<u8>, mut value: u64) {
    while value != 0 {
        buf.push(value as u8);
        value >>= 8;
    }
}

/// Decodes the final field of a tag, consuming the rest of the input.
pub fn decode_uint_last(input: &mut &[u8]) -> Result<u64> {
    if input.len() > 8 {
        return Err(Error::corrupt(
            "final uint",
            format!("{} bytes do not fit in 64 bits", input.len()),
        ));
    }
    let value = input
        .iter()
        .rev()
        .fold(0u64, |acc, &byte| (acc << 8) | byte as u64);
    *input = &[];
    Ok(value)
}

/// Appends the order-preserving encoding of `value`: one length byte
/// followed by the big-endian bytes of `value` without leading zeros.
pub fn encode_uint_sortable(buf: &mut Vec<u8>, value: u64) {
    let bytes = value.to_be_bytes();
    let skip = (value.leading_zeros() / 8) as usize;
    buf.push((bytes.len() - skip) as u8);
    buf.extend_from_slice(&bytes[skip..]);
}

pub fn decode_uint_sortable(input: &mut &[u8]) -> Result<u64> {
    let Some((&len, rest)) = input.split_first() else {
        return Err(Error::corrupt("sortable uint", "buffer exhausted"));
    };
    let len = len as usize;
    if len > 8 {
        return Err(Error::corrupt(
            "sortable uint",
            format!("length {len} does not fit in 64 bits"),
        ));
    }
    if rest.len() < len {
        return Err(Error::corrupt("sortable uint", "buffer exhausted"));
    }
    let (digits, rest) = rest.split_at(len);
    *input = rest;
    Ok(digits
        .iter()
        .fold(0u64, |acc, &byte| (acc << 8) | byte as u64))
}

/// Appends the order-preserving, self-delimiting encoding of `value`.
///
/// Each zero byte is escaped as `00 FF` and the string is terminated by
/// `00 00`.
pub fn encode_string_sortable(buf: &mut Vec<u8>, value: &[u8]) {
    buf.reserve(value.len() + 2);
    for &byte in value {
        buf.push(byte);
        if byte == 0 {
            buf.push(0xff);
        }
    }
    buf.extend_from_slice(&[0, 0]);
}

pub fn decode_string_sortable(input: &mut &[u8]) -> Result<Vec<u8>> {
    let mut result = Vec::new();
    let mut rest = *input;
    loop {
        let Some(zero) = rest.iter().position(|&b| b == 0) else {
            return Err(Error::corrupt("sortable string", "missing terminator"));
        };
        result.extend_from_slice(&rest[..zero]);
        match rest.get(zero + 1) {
            Some(0) => {
                *input = &rest[zero + 2..];
                return Ok(result);
            }
            Some(0xff) => {
                result.push(0);
                rest = &rest[zero + 2..];
            }
            Some(other) => {
                return Err(Error::corrupt(
                    "sortable string",
                    format!("invalid escape byte {other:#04x}"),
                ));
            }
            None => return Err(Error::corrupt("sortable string", "missing terminator")),
        }
    }
}

/// Converts a decoded 64-bit value to a narrower integer type.
pub fn narrow<T: TryFrom<u64>>(value: u64, element: &str) -> Result<T> {
    T::try_from(value).map_err(|_| Error::corrupt(element, format!("value {value} out of range")))
}

/// Returns a mapper that re-labels a decoding error with the element being decoded,
/// e.g. `"postlist key"`, keeping the original message.
pub(crate) fn in_element(element: &'static str) -> impl Fn(Error) -> Error {
    move |e| match e.kind() {
        rubric_common::error::ErrorKind::Corrupt {
            element: inner,
            message,
        } => Error::corrupt(element, format!("{inner}: {message}")),
        _ => e,
    }
}
