use rubric_common::{Result, verify_arg};

/// The smallest block size a table accepts.
pub const MIN_BLOCK_SIZE: u32 = 2048;

/// The largest block size a table accepts.
pub const MAX_BLOCK_SIZE: u32 = 65536;

/// How tags are stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionStrategy {
    /// Tags are stored verbatim.
    None,
    /// Tags are zstd-compressed whenever that makes them smaller.
    Zstd,
}

impl CompressionStrategy {
    pub(crate) fn to_code(self) -> u32 {
        match self {
            CompressionStrategy::None => 0,
            CompressionStrategy::Zstd => 1,
        }
    }

    pub(crate) fn from_code(code: u32) -> Option<CompressionStrategy> {
        match code {
            0 => Some(CompressionStrategy::None),
            1 => Some(CompressionStrategy::Zstd),
            _ => None,
        }
    }
}

/// Parameters of a table build session.
#[derive(Debug, Clone)]
pub struct TableOptions {
    /// Size of a data block in bytes. A power of two between 2K and 64K.
    pub block_size: u32,
    /// Tag compression.
    pub compression: CompressionStrategy,
    /// Fill blocks completely instead of leaving a quarter of each block free.
    pub full_compaction: bool,
    /// Minimum number of items a shared block must be able to hold. Items
    /// larger than `block_size / block_capacity` are placed in a block of
    /// their own.
    pub block_capacity: u32,
    /// Create the file only if at least one entry was added.
    pub lazy: bool,
}

impl Default for TableOptions {
    fn default() -> Self {
        TableOptions {
            block_size: 8192,
            compression: CompressionStrategy::None,
            full_compaction: false,
            block_capacity: 4,
            lazy: false,
        }
    }
}

impl TableOptions {
    pub fn validate(&self) -> Result<()> {
        verify_arg!(block_size, self.block_size.is_power_of_two());
        verify_arg!(
            block_size,
            (MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&self.block_size)
        );
        verify_arg!(block_capacity, self.block_capacity >= 1);
        Ok(())
    }

    /// Sets the compaction mode: `full` fills blocks completely.
    pub fn set_full_compaction(&mut self, full: bool) {
        self.full_compaction = full;
    }

    /// Sets the minimum number of items per shared block, bounding the
    /// largest item that shares a block with others. A capacity of `1` lets
    /// an item use an entire block.
    pub fn set_max_item_size(&mut self, block_capacity: u32) {
        self.block_capacity = block_capacity;
    }

    pub fn set_compression_strategy(&mut self, compression: CompressionStrategy) {
        self.compression = compression;
    }

    /// Bytes of a block available for entries (excluding the length prefix
    /// and the trailing checksum).
    pub(crate) fn block_capacity_bytes(&self) -> usize {
        self.block_size as usize - 8
    }

    /// Number of payload bytes after which a block is sealed.
    pub(crate) fn fill_limit(&self) -> usize {
        let capacity = self.block_capacity_bytes();
        if self.full_compaction {
            capacity
        } else {
            capacity * 3 / 4
        }
    }

    /// Largest encoded entry that may share a block with other entries.
    pub(crate) fn max_item_size(&self) -> usize {
        self.block_capacity_bytes() / self.block_capacity.max(1) as usize
    }
}
