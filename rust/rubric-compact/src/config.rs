use rubric_common::{Result, error::Error, verify_arg};
use rubric_table::{MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, TableOptions};
use serde::{Deserialize, Serialize};

use crate::kind::TableKind;

/// How tightly output blocks are packed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compaction {
    /// Blocks are left partly empty, leaving room for later updates.
    Standard,
    /// Blocks are filled completely.
    #[default]
    Full,
    /// Blocks are filled completely and a single item may take a whole block.
    Fuller,
}

/// How the document ids of successive sources are renumbered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetStrategy {
    /// Each source starts right after the previous source's last document
    /// id, dropping unused ids below the source's first document.
    #[default]
    ReclaimLeading,
    /// Each source is shifted by the previous sources' last document id.
    Append,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactorOptions {
    /// Block size of the output tables in bytes.
    pub block_size: u32,
    pub compaction: Compaction,
    /// Merge posting lists through temporary tables when there are more than
    /// `fan_in` sources.
    pub multipass: bool,
    /// Largest number of posting lists merged at once in multipass mode.
    pub fan_in: usize,
    pub offsets: OffsetStrategy,
    /// Re-read and check the merged posting lists after commit.
    pub verify: bool,
}

impl Default for CompactorOptions {
    fn default() -> Self {
        CompactorOptions {
            block_size: 8192,
            compaction: Compaction::Full,
            multipass: false,
            fan_in: 3,
            offsets: OffsetStrategy::ReclaimLeading,
            verify: false,
        }
    }
}

impl CompactorOptions {
    pub fn validate(&self) -> Result<()> {
        validate_block_size(self.block_size)?;
        verify_arg!(fan_in, self.fan_in >= 2);
        Ok(())
    }

    /// Storage settings of the output table of `kind`.
    pub fn table_options(&self, kind: TableKind) -> TableOptions {
        let mut options = TableOptions {
            block_size: self.block_size,
            lazy: kind.is_lazy(),
            ..Default::default()
        };
        options.set_compression_strategy(kind.compression());
        options.set_full_compaction(self.compaction != Compaction::Standard);
        if self.compaction == Compaction::Fuller {
            options.set_max_item_size(1);
        }
        options
    }

    /// Storage settings of the temporary tables of a multipass merge: never
    /// compressed, never lazy, standard packing.
    pub fn temp_table_options(&self) -> TableOptions {
        TableOptions {
            block_size: self.block_size,
            ..Default::default()
        }
    }
}

/// Parses a block size given in bytes (`4096`) or in KiB (`4K`, `4k`).
pub fn parse_block_size(value: &str) -> Result<u32> {
    let value = value.trim();
    let (digits, scale) = match value.strip_suffix(['K', 'k']) {
        Some(digits) => (digits, 1024u32),
        None => (value, 1),
    };
    let bad = || {
        Error::invalid_arg(
            "block_size",
            format!(
                "bad value '{value}', must be a power of 2 between {}K and {}K",
                MIN_BLOCK_SIZE / 1024,
                MAX_BLOCK_SIZE / 1024
            ),
        )
    };
    let count: u32 = digits.parse().map_err(|_| bad())?;
    if scale != 1 && count > 64 {
        return Err(bad());
    }
    let block_size = count * scale;
    validate_block_size(block_size).map_err(|_| bad())?;
    Ok(block_size)
}

fn validate_block_size(block_size: u32) -> Result<()> {
    verify_arg!(block_size, block_size.is_power_of_two());
    verify_arg!(
        block_size,
        (MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&block_size)
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use rubric_table::CompressionStrategy;

    use super::*;

    #[test]
    fn test_parse_block_size() {
        assert_eq!(parse_block_size("4096").unwrap(), 4096);
        assert_eq!(parse_block_size("4K").unwrap(), 4096);
        assert_eq!(parse_block_size("64k").unwrap(), 65536);
        assert_eq!(parse_block_size("2K").unwrap(), 2048);
        for bad in ["1K", "3K", "128K", "65K", "3000", "", "K", "4KB", "-4K", "99999999999"] {
            assert!(parse_block_size(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_validate() {
        assert!(CompactorOptions::default().validate().is_ok());
        let options = CompactorOptions {
            fan_in: 1,
            ..Default::default()
        };
        assert!(options.validate().is_err());
        let options = CompactorOptions {
            block_size: 1000,
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_table_options_per_kind() {
        let options = CompactorOptions {
            compaction: Compaction::Fuller,
            block_size: 4096,
            ..Default::default()
        };
        let postlist = options.table_options(TableKind::Postlist);
        assert_eq!(postlist.compression, CompressionStrategy::None);
        assert!(postlist.full_compaction);
        assert_eq!(postlist.block_capacity, 1);
        assert!(!postlist.lazy);

        let record = options.table_options(TableKind::Record);
        assert_eq!(record.compression, CompressionStrategy::Zstd);
        assert_eq!(record.block_size, 4096);

        let standard = CompactorOptions {
            compaction: Compaction::Standard,
            ..Default::default()
        };
        let spelling = standard.table_options(TableKind::Spelling);
        assert!(spelling.lazy);
        assert!(!spelling.full_compaction);
        assert_eq!(spelling.block_capacity, TableOptions::default().block_capacity);

        let temp = options.temp_table_options();
        assert_eq!(temp.compression, CompressionStrategy::None);
        assert!(!temp.lazy);
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: CompactorOptions =
            serde_json::from_str(r#"{"compaction": "fuller", "multipass": true}"#).unwrap();
        assert_eq!(options.compaction, Compaction::Fuller);
        assert!(options.multipass);
        assert_eq!(options.block_size, 8192);
        assert_eq!(options.offsets, OffsetStrategy::ReclaimLeading);
    }
}
