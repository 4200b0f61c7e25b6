//! On-disk structures shared by the table builder and reader.

use byteorder::{LE, ReadBytesExt};
use rubric_common::{Result, error::Error, verify_data};

use crate::{checksum, options::CompressionStrategy};

pub const MAGIC: &[u8; 4] = b"RBTL";
pub const FORMAT_VERSION: u32 = 1;
pub const FOOTER_SIZE: usize = 48;

/// Entry flag: the tag is zstd-compressed.
pub const FLAG_COMPRESSED: u8 = 0x01;

/// Size of the block frame: the payload length prefix and the trailing checksum.
pub const BLOCK_FRAME_SIZE: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Footer {
    pub block_size: u32,
    pub revision: u32,
    pub compression: CompressionStrategy,
    pub entry_count: u64,
    pub index_offset: u64,
    pub index_len: u64,
}

impl Footer {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FOOTER_SIZE);
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf.extend_from_slice(&self.block_size.to_le_bytes());
        buf.extend_from_slice(&self.revision.to_le_bytes());
        buf.extend_from_slice(&self.compression.to_code().to_le_bytes());
        buf.extend_from_slice(&self.entry_count.to_le_bytes());
        buf.extend_from_slice(&self.index_offset.to_le_bytes());
        buf.extend_from_slice(&self.index_len.to_le_bytes());
        let checksum = checksum::compute(&buf);
        buf.extend_from_slice(&checksum.to_le_bytes());
        debug_assert_eq!(buf.len(), FOOTER_SIZE);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Footer> {
        verify_data!(footer, buf.len() == FOOTER_SIZE);
        verify_data!(footer_magic, &buf[0..4] == MAGIC);
        let (body, tail) = buf.split_at(FOOTER_SIZE - 4);
        let mut tail = tail;
        checksum::validate_buffer(body, tail.read_u32::<LE>()?, "table footer")?;

        let mut r = &body[4..];
        let version = r.read_u32::<LE>()?;
        if version != FORMAT_VERSION {
            return Err(Error::corrupt(
                "table footer",
                format!("unsupported format version {version}"),
            ));
        }
        let block_size = r.read_u32::<LE>()?;
        let revision = r.read_u32::<LE>()?;
        let compression = CompressionStrategy::from_code(r.read_u32::<LE>()?)
            .ok_or_else(|| Error::corrupt("table footer", "unknown compression strategy"))?;
        Ok(Footer {
            block_size,
            revision,
            compression,
            entry_count: r.read_u64::<LE>()?,
            index_offset: r.read_u64::<LE>()?,
            index_len: r.read_u64::<LE>()?,
        })
    }
}

/// Location of one data block, as listed in the block index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHandle {
    pub first_key: Vec<u8>,
    pub offset: u64,
    pub length: u32,
    pub entries: u32,
}

pub fn encode_index(handles: &[BlockHandle]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(handles.len() as u32).to_le_bytes());
    for handle in handles {
        buf.extend_from_slice(&(handle.first_key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&handle.first_key);
        buf.extend_from_slice(&handle.offset.to_le_bytes());
        buf.extend_from_slice(&handle.length.to_le_bytes());
        buf.extend_from_slice(&handle.entries.to_le_bytes());
    }
    let checksum = checksum::compute(&buf);
    buf.extend_from_slice(&checksum.to_le_bytes());
    buf
}

pub fn decode_index(buf: &[u8]) -> Result<Vec<BlockHandle>> {
    verify_data!(block_index, buf.len() >= 8);
    let (body, mut tail) = buf.split_at(buf.len() - 4);
    checksum::validate_buffer(body, tail.read_u32::<LE>()?, "block index")?;

    let mut r = body;
    verify_data!(block_index, r.len() >= 4);
    let count = r.read_u32::<LE>()? as usize;
    let mut handles = Vec::with_capacity(count.min(1 << 16));
    for _ in 0..count {
        verify_data!(block_index, r.len() >= 4);
        let key_len = r.read_u32::<LE>()? as usize;
        verify_data!(block_index, r.len() >= key_len + 16);
        let (first_key, rest) = r.split_at(key_len);
        r = rest;
        handles.push(BlockHandle {
            first_key: first_key.to_vec(),
            offset: r.read_u64::<LE>()?,
            length: r.read_u32::<LE>()?,
            entries: r.read_u32::<LE>()?,
        });
    }
    verify_data!(block_index, r.is_empty());
    Ok(handles)
}

/// Number of bytes `push_entry` appends for the given key and tag.
pub fn encoded_entry_size(key: &[u8], tag: &[u8]) -> usize {
    4 + key.len() + 1 + 4 + tag.len()
}

pub fn push_entry(block: &mut Vec<u8>, key: &[u8], tag: &[u8], flags: u8) {
    block.extend_from_slice(&(key.len() as u32).to_le_bytes());
    block.extend_from_slice(key);
    block.push(flags);
    block.extend_from_slice(&(tag.len() as u32).to_le_bytes());
    block.extend_from_slice(tag);
}

/// A decoded entry borrowed from a block payload.
pub struct RawEntry<'a> {
    pub key: &'a [u8],
    pub flags: u8,
    pub tag: &'a [u8],
}

/// Decodes the entry at the start of `input`, advancing it past the entry.
pub fn read_entry<'a>(input: &mut &'a [u8]) -> Result<RawEntry<'a>> {
    let key = read_len_prefixed(input)?;
    verify_data!(block_entry, !input.is_empty());
    let flags = input[0];
    *input = &input[1..];
    let tag = read_len_prefixed(input)?;
    Ok(RawEntry { key, flags, tag })
}

fn read_len_prefixed<'a>(input: &mut &'a [u8]) -> Result<&'a [u8]> {
    let len = input
        .read_u32::<LE>()
        .map_err(|_| Error::corrupt("block entry", "truncated length"))? as usize;
    verify_data!(block_entry, input.len() >= len);
    let (value, rest) = input.split_at(len);
    *input = rest;
    Ok(value)
}

/// Wraps a block payload into its on-disk frame, padded to a multiple of `block_size`.
pub fn frame_block(payload: &[u8], block_size: u32) -> Vec<u8> {
    let framed_len = payload.len() + BLOCK_FRAME_SIZE;
    let block_size = block_size as usize;
    let padded_len = framed_len.div_ceil(block_size) * block_size;
    let mut buf = Vec::with_capacity(padded_len);
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    buf.extend_from_slice(&checksum::compute(payload).to_le_bytes());
    buf.resize(padded_len, 0);
    buf
}

/// Validates a framed block and returns its payload.
pub fn unframe_block(block: &[u8]) -> Result<&[u8]> {
    verify_data!(block, block.len() >= BLOCK_FRAME_SIZE);
    let mut r = block;
    let len = r.read_u32::<LE>()? as usize;
    verify_data!(block, len + BLOCK_FRAME_SIZE <= block.len());
    let payload = &block[4..4 + len];
    let mut stored = &block[4 + len..8 + len];
    checksum::validate_buffer(payload, stored.read_u32::<LE>()?, "data block")?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_footer_roundtrip_and_corruption() {
        let footer = Footer {
            block_size: 8192,
            revision: 1,
            compression: CompressionStrategy::Zstd,
            entry_count: 42,
            index_offset: 16384,
            index_len: 100,
        };
        let mut buf = footer.encode();
        assert_eq!(buf.len(), FOOTER_SIZE);
        assert_eq!(Footer::decode(&buf).unwrap(), footer);

        buf[20] ^= 0xff;
        assert!(Footer::decode(&buf).unwrap_err().is_corruption());
    }

    #[test]
    fn test_block_frame() {
        let mut payload = Vec::new();
        push_entry(&mut payload, b"apple", b"red", 0);
        push_entry(&mut payload, b"banana", b"yellow", FLAG_COMPRESSED);
        let block = frame_block(&payload, 2048);
        assert_eq!(block.len(), 2048);

        let mut input = unframe_block(&block).unwrap();
        let first = read_entry(&mut input).unwrap();
        assert_eq!((first.key, first.tag, first.flags), (&b"apple"[..], &b"red"[..], 0));
        let second = read_entry(&mut input).unwrap();
        assert_eq!(second.key, b"banana");
        assert_eq!(second.flags, FLAG_COMPRESSED);
        assert!(input.is_empty());

        let mut damaged = block.clone();
        damaged[6] ^= 1;
        assert!(unframe_block(&damaged).is_err());
    }

    #[test]
    fn test_oversized_block_spans_multiple_units() {
        let payload = vec![7u8; 5000];
        let block = frame_block(&payload, 2048);
        assert_eq!(block.len(), 6144);
        assert_eq!(unframe_block(&block).unwrap(), &payload[..]);
    }
}
