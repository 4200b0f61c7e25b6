use std::{
    fs::File,
    path::{Path, PathBuf},
    sync::Arc,
};

use rubric_common::{Result, error::Error, try_or_ret_some_err, verify_data};

use crate::{
    file,
    format::{self, BlockHandle, FLAG_COMPRESSED, FOOTER_SIZE, Footer},
    options::CompressionStrategy,
};

struct TableInner {
    path: PathBuf,
    file: File,
    file_size: u64,
    footer: Footer,
    index: Vec<BlockHandle>,
}

impl TableInner {
    fn read_block(&self, handle: &BlockHandle) -> Result<Vec<u8>> {
        let block = file::read_range(&self.file, handle.offset, handle.length as usize)
            .map_err(|e| self.io_error(e))?;
        let payload = format::unframe_block(&block)?;
        Ok(payload.to_vec())
    }

    fn io_error(&self, e: std::io::Error) -> Error {
        Error::io(self.path.display().to_string(), e)
    }
}

/// A committed, read-only table.
///
/// Cloning is cheap: clones share the open file. The file is closed when the
/// last `Table` and the last [`TableCursor`] referring to it are dropped.
#[derive(Clone)]
pub struct Table {
    inner: Arc<TableInner>,
}

impl Table {
    /// Opens the table at `path`, validating its footer and block index.
    pub fn open(path: impl AsRef<Path>) -> Result<Table> {
        let path = path.as_ref().to_path_buf();
        let context = path.display().to_string();
        let file = File::open(&path).map_err(|e| Error::io(context.clone(), e))?;
        let file_size = file
            .metadata()
            .map_err(|e| Error::io(context.clone(), e))?
            .len();
        if file_size < FOOTER_SIZE as u64 {
            return Err(Error::corrupt(
                "table file",
                format!("{context} is too small to be a table"),
            ));
        }

        let footer_buf = file::read_range(&file, file_size - FOOTER_SIZE as u64, FOOTER_SIZE)
            .map_err(|e| Error::io(context.clone(), e))?;
        let footer = Footer::decode(&footer_buf)?;
        verify_data!(
            index_range,
            footer.index_offset.checked_add(footer.index_len)
                == Some(file_size - FOOTER_SIZE as u64)
        );
        let index_buf = file::read_range(&file, footer.index_offset, footer.index_len as usize)
            .map_err(|e| Error::io(context.clone(), e))?;
        let index = format::decode_index(&index_buf)?;
        verify_data!(
            block_index,
            index.iter().map(|h| h.entries as u64).sum::<u64>() == footer.entry_count
        );

        Ok(Table {
            inner: Arc::new(TableInner {
                path,
                file,
                file_size,
                footer,
                index,
            }),
        })
    }

    /// Returns `true` if a table file exists at `path`.
    pub fn exists(path: impl AsRef<Path>) -> bool {
        path.as_ref().is_file()
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.footer.entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count() == 0
    }

    pub fn revision(&self) -> u32 {
        self.inner.footer.revision
    }

    pub fn block_size(&self) -> u32 {
        self.inner.footer.block_size
    }

    pub fn compression(&self) -> CompressionStrategy {
        self.inner.footer.compression
    }

    pub fn file_size(&self) -> u64 {
        self.inner.file_size
    }

    pub fn block_count(&self) -> usize {
        self.inner.index.len()
    }

    /// Smallest key in the table.
    pub fn first_key(&self) -> Option<&[u8]> {
        self.inner.index.first().map(|h| h.first_key.as_slice())
    }

    /// Largest key in the table.
    pub fn last_key(&self) -> Result<Option<Vec<u8>>> {
        let Some(handle) = self.inner.index.last() else {
            return Ok(None);
        };
        let payload = self.inner.read_block(handle)?;
        let mut input = payload.as_slice();
        let mut last = None;
        while !input.is_empty() {
            last = Some(format::read_entry(&mut input)?.key.to_vec());
        }
        Ok(last)
    }

    /// Returns a cursor positioned before the first entry.
    pub fn cursor(&self) -> TableCursor {
        TableCursor {
            table: self.clone(),
            next_block: 0,
            block: Vec::new(),
            pos: 0,
            pending: None,
        }
    }

    /// Returns a cursor whose first entry is the first one with a key
    /// greater than or equal to `start_key`.
    pub fn iterate_from(&self, start_key: &[u8]) -> Result<TableCursor> {
        let index = &self.inner.index;
        let after = index.partition_point(|h| h.first_key.as_slice() <= start_key);
        let mut cursor = TableCursor {
            table: self.clone(),
            next_block: after.saturating_sub(1),
            block: Vec::new(),
            pos: 0,
            pending: None,
        };
        while let Some(entry) = cursor.next_entry()? {
            if entry.key.as_slice() >= start_key {
                cursor.pending = Some(entry);
                break;
            }
        }
        Ok(cursor)
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("path", &self.inner.path)
            .field("entry_count", &self.entry_count())
            .field("revision", &self.revision())
            .finish()
    }
}

/// One table entry, with its tag in stored form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    key: Vec<u8>,
    stored: Vec<u8>,
    compressed: bool,
}

impl TableEntry {
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Returns the stored tag bytes and whether they are compressed.
    pub fn stored_tag(&self) -> (&[u8], bool) {
        (&self.stored, self.compressed)
    }

    /// Returns the logical tag, decompressing if necessary.
    pub fn read_tag(&self) -> Result<Vec<u8>> {
        if self.compressed {
            zstd::decode_all(self.stored.as_slice()).map_err(|e| {
                Error::corrupt("compressed tag", format!("cannot decompress: {e}"))
            })
        } else {
            Ok(self.stored.clone())
        }
    }

    /// Consumes the entry, returning its key and logical tag.
    pub fn into_key_and_tag(self) -> Result<(Vec<u8>, Vec<u8>)> {
        if self.compressed {
            let tag = self.read_tag()?;
            Ok((self.key, tag))
        } else {
            Ok((self.key, self.stored))
        }
    }
}

/// Forward cursor over a table in ascending key order.
///
/// The cursor keeps its table open, so it can outlive the [`Table`] handle
/// it was created from.
pub struct TableCursor {
    table: Table,
    next_block: usize,
    block: Vec<u8>,
    pos: usize,
    pending: Option<TableEntry>,
}

impl TableCursor {
    pub fn table(&self) -> &Table {
        &self.table
    }

    /// Advances to the next entry. Returns `None` once the table is exhausted.
    pub fn next_entry(&mut self) -> Result<Option<TableEntry>> {
        if let Some(entry) = self.pending.take() {
            return Ok(Some(entry));
        }
        let inner = &self.table.inner;
        while self.pos >= self.block.len() {
            let Some(handle) = inner.index.get(self.next_block) else {
                return Ok(None);
            };
            self.block = inner.read_block(handle)?;
            self.pos = 0;
            self.next_block += 1;
        }

        let mut input = &self.block[self.pos..];
        let before = input.len();
        let raw = format::read_entry(&mut input)?;
        let entry = TableEntry {
            key: raw.key.to_vec(),
            stored: raw.tag.to_vec(),
            compressed: raw.flags & FLAG_COMPRESSED != 0,
        };
        self.pos += before - input.len();
        Ok(Some(entry))
    }
}

impl Iterator for TableCursor {
    type Item = Result<TableEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        try_or_ret_some_err!(self.next_entry()).map(Ok)
    }
}
