use std::{
    ffi::OsString,
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use rubric_common::{Result, error::Error};

use crate::{
    format::{self, BlockHandle, FLAG_COMPRESSED, Footer},
    options::{CompressionStrategy, TableOptions},
};

/// Outcome of a committed build session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSummary {
    /// Final location of the table.
    pub path: PathBuf,
    /// Number of entries written.
    pub entry_count: u64,
    /// Size of the committed file, or `None` for a lazy table that received
    /// no entries and therefore has no file.
    pub file_size: Option<u64>,
}

/// Writes a new table in a single pass.
///
/// Keys must be added in strictly increasing byte order. Entries are packed
/// into blocks according to [`TableOptions`]; the file becomes visible under
/// its final name only when [`commit`](TableBuilder::commit) succeeds. A
/// builder dropped without commit removes its temporary file.
pub struct TableBuilder {
    path: PathBuf,
    temp_path: PathBuf,
    options: TableOptions,
    writer: Option<BufWriter<File>>,
    /// Payload of the block being filled.
    block: Vec<u8>,
    block_first_key: Vec<u8>,
    block_entries: u32,
    last_key: Option<Vec<u8>>,
    index: Vec<BlockHandle>,
    /// Current end of the data written so far.
    offset: u64,
    entry_count: u64,
}

impl TableBuilder {
    /// Starts a build session for the table at `path`.
    ///
    /// Non-lazy tables create their temporary file immediately, so an
    /// unwritable destination is reported here rather than at commit time.
    pub fn create(path: impl AsRef<Path>, options: TableOptions) -> Result<TableBuilder> {
        options.validate()?;
        let path = path.as_ref().to_path_buf();
        let mut temp_path = OsString::from(path.as_os_str());
        temp_path.push(".tmp");

        let mut builder = TableBuilder {
            path,
            temp_path: PathBuf::from(temp_path),
            options,
            writer: None,
            block: Vec::new(),
            block_first_key: Vec::new(),
            block_entries: 0,
            last_key: None,
            index: Vec::new(),
            offset: 0,
            entry_count: 0,
        };
        if !builder.options.lazy {
            builder.ensure_writer()?;
        }
        Ok(builder)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &TableOptions {
        &self.options
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Adds an entry, compressing the tag according to the table's strategy.
    pub fn add(&mut self, key: &[u8], tag: &[u8]) -> Result<()> {
        match self.options.compression {
            CompressionStrategy::None => self.add_stored(key, tag, false),
            CompressionStrategy::Zstd => {
                let compressed = zstd::bulk::compress(tag, 0)
                    .map_err(|e| Error::io(self.path.display().to_string(), e))?;
                if compressed.len() < tag.len() {
                    self.add_stored(key, &compressed, true)
                } else {
                    self.add_stored(key, tag, false)
                }
            }
        }
    }

    /// Adds an entry whose tag is already in stored form.
    ///
    /// `compressed` states whether `stored` is a zstd frame; this lets a copy
    /// from another table pass compressed tags through untouched.
    pub fn add_stored(&mut self, key: &[u8], stored: &[u8], compressed: bool) -> Result<()> {
        if let Some(last_key) = &self.last_key {
            if key <= last_key.as_slice() {
                return Err(Error::invalid_operation(format!(
                    "TableBuilder::add: key out of order in {}",
                    self.path.display()
                )));
            }
        }
        self.ensure_writer()?;

        let flags = if compressed { FLAG_COMPRESSED } else { 0 };
        let entry_size = format::encoded_entry_size(key, stored);
        if entry_size > self.options.max_item_size() {
            // Large items get a block of their own.
            self.flush_block()?;
            self.append_to_block(key, stored, flags);
            self.flush_block()?;
        } else {
            if self.block_entries > 0 && self.block.len() + entry_size > self.options.fill_limit()
            {
                self.flush_block()?;
            }
            self.append_to_block(key, stored, flags);
        }

        self.last_key = Some(key.to_vec());
        self.entry_count += 1;
        Ok(())
    }

    /// Finalizes the table under the given revision number and publishes it
    /// atomically under its final path.
    pub fn commit(mut self, revision: u32) -> Result<TableSummary> {
        self.flush_block()?;

        if self.entry_count == 0 && self.options.lazy {
            crate::remove_table(&self.path)?;
            return Ok(TableSummary {
                path: self.path.clone(),
                entry_count: 0,
                file_size: None,
            });
        }

        self.ensure_writer()?;
        let index = format::encode_index(&self.index);
        let footer = Footer {
            block_size: self.options.block_size,
            revision,
            compression: self.options.compression,
            entry_count: self.entry_count,
            index_offset: self.offset,
            index_len: index.len() as u64,
        }
        .encode();

        let mut writer = self
            .writer
            .take()
            .ok_or_else(|| Error::invalid_operation("TableBuilder::commit"))?;
        let context = self.temp_path.display().to_string();
        writer
            .write_all(&index)
            .and_then(|_| writer.write_all(&footer))
            .map_err(|e| Error::io(context.clone(), e))?;
        let file = writer
            .into_inner()
            .map_err(|e| Error::io(context.clone(), e.into_error()))?;
        file.sync_all().map_err(|e| Error::io(context.clone(), e))?;
        drop(file);

        std::fs::rename(&self.temp_path, &self.path)
            .map_err(|e| Error::io(self.path.display().to_string(), e))?;

        let file_size = self.offset + index.len() as u64 + footer.len() as u64;
        log::debug!(
            "committed table {} (revision {revision}, {} entries, {} blocks, {file_size} bytes)",
            self.path.display(),
            self.entry_count,
            self.index.len(),
        );
        Ok(TableSummary {
            path: self.path.clone(),
            entry_count: self.entry_count,
            file_size: Some(file_size),
        })
    }

    fn ensure_writer(&mut self) -> Result<()> {
        if self.writer.is_none() {
            let file = File::create(&self.temp_path)
                .map_err(|e| Error::io(self.temp_path.display().to_string(), e))?;
            self.writer = Some(BufWriter::new(file));
        }
        Ok(())
    }

    fn append_to_block(&mut self, key: &[u8], stored: &[u8], flags: u8) {
        if self.block_entries == 0 {
            self.block_first_key.clear();
            self.block_first_key.extend_from_slice(key);
        }
        format::push_entry(&mut self.block, key, stored, flags);
        self.block_entries += 1;
    }

    fn flush_block(&mut self) -> Result<()> {
        if self.block_entries == 0 {
            return Ok(());
        }
        let framed = format::frame_block(&self.block, self.options.block_size);
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::invalid_operation("TableBuilder::flush_block"))?;
        writer
            .write_all(&framed)
            .map_err(|e| Error::io(self.temp_path.display().to_string(), e))?;

        self.index.push(BlockHandle {
            first_key: std::mem::take(&mut self.block_first_key),
            offset: self.offset,
            length: framed.len() as u32,
            entries: self.block_entries,
        });
        self.offset += framed.len() as u64;
        self.block.clear();
        self.block_entries = 0;
        Ok(())
    }
}

impl Drop for TableBuilder {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            drop(writer);
            if let Err(e) = std::fs::remove_file(&self.temp_path) {
                log::warn!(
                    "failed to remove abandoned table file {}: {e}",
                    self.temp_path.display()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Table;

    fn options(block_size: u32) -> TableOptions {
        TableOptions {
            block_size,
            ..Default::default()
        }
    }

    #[test]
    fn test_rejects_out_of_order_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = TableBuilder::create(dir.path().join("t.db"), options(2048)).unwrap();
        builder.add(b"b", b"1").unwrap();
        let err = builder.add(b"a", b"2").unwrap_err();
        assert!(matches!(
            err.kind(),
            rubric_common::error::ErrorKind::InvalidOperation { .. }
        ));
        assert!(builder.add(b"b", b"3").is_err());
        builder.add(b"c", b"4").unwrap();
        assert_eq!(builder.entry_count(), 2);
    }

    #[test]
    fn test_lazy_table_without_entries_has_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lazy.db");
        std::fs::write(&path, b"stale").unwrap();

        let builder = TableBuilder::create(
            &path,
            TableOptions {
                lazy: true,
                ..options(2048)
            },
        )
        .unwrap();
        let summary = builder.commit(1).unwrap();
        assert_eq!(summary.entry_count, 0);
        assert_eq!(summary.file_size, None);
        assert!(!path.exists());
        assert!(!Table::exists(&path));
    }

    #[test]
    fn test_uncommitted_builder_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.db");
        {
            let mut builder = TableBuilder::create(&path, options(2048)).unwrap();
            builder.add(b"k", b"v").unwrap();
        }
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_full_compaction_produces_smaller_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut sizes = Vec::new();
        for full in [false, true] {
            let path = dir.path().join(format!("t{full}.db"));
            let mut builder = TableBuilder::create(
                &path,
                TableOptions {
                    full_compaction: full,
                    ..options(2048)
                },
            )
            .unwrap();
            for i in 0u32..2000 {
                builder.add(&i.to_be_bytes(), &[i as u8; 24]).unwrap();
            }
            sizes.push(builder.commit(1).unwrap().file_size.unwrap());
        }
        assert!(sizes[1] < sizes[0], "{sizes:?}");
    }
}
