//! First-fit-with-compaction allocator over the file-data region.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::debug;

use crate::directory::DirectoryIndex;
use crate::error::{Error, Result};
use crate::hash_tree::HashTreeEngine;

pub struct Allocator<'a> {
  directory: &'a DirectoryIndex,
  hash_tree: &'a HashTreeEngine,
  file_data_path: &'a Path,
  file_data_size: u64,
}

impl<'a> Allocator<'a> {
  pub fn new(
    directory: &'a DirectoryIndex,
    hash_tree: &'a HashTreeEngine,
    file_data_path: &'a Path,
    file_data_size: u64,
  ) -> Self {
    Allocator { directory, hash_tree, file_data_path, file_data_size }
  }

  /// `size(file-data) - sum(live entry lengths)`.
  pub fn total_free(&self) -> Result<u64> {
    let used: u64 = self.directory.enumerate_live()?.iter().map(|e| e.length as u64).sum();
    Ok(self.file_data_size - used)
  }

  /// Choose an offset for a new allocation of `length` bytes, repacking
  /// first if no existing gap is large enough.
  ///
  /// A gap is only used if it *strictly* exceeds `length` (a
  /// perfectly-sized gap is rejected); this matches the reference
  /// implementation's contract exactly and is preserved deliberately, not
  /// tightened to `>=`.
  pub fn allocate(&self, length: u64) -> Result<u64> {
    let mut entries = self.directory.enumerate_live()?;
    entries.sort_by_key(|e| e.offset);

    let mut next = 0u64;
    for e in &entries {
      let gap = e.offset as u64 - next;
      if gap > length {
        return Ok(next);
      }
      next = e.offset as u64 + e.length as u64;
    }
    let trailing_gap = self.file_data_size - next;
    if trailing_gap > length {
      return Ok(next);
    }

    let cursor = self.repack()?;
    if self.file_data_size - cursor >= length + 1 { Ok(cursor) } else { Err(Error::OutOfSpace) }
  }

  /// Relocate every live entry to a contiguous prefix of file-data,
  /// ascending by current offset, then rebuild the hash tree (cheaper
  /// than patching every moved block individually). Returns the
  /// post-repack cursor (first free byte).
  pub fn repack(&self) -> Result<u64> {
    let mut entries = self.directory.enumerate_live()?;
    entries.sort_by_key(|e| e.offset);

    let mut file = OpenOptions::new().read(true).write(true).open(self.file_data_path)?;
    let mut next = 0u64;
    for e in &entries {
      if next < e.offset as u64 {
        let mut buf = vec![0u8; e.length as usize];
        file.seek(SeekFrom::Start(e.offset as u64))?;
        file.read_exact(&mut buf)?;
        file.seek(SeekFrom::Start(next))?;
        file.write_all(&buf)?;
        self.directory.write_entry(e.slot, &e.name, next as u32, e.length)?;
      }
      next += e.length as u64;
    }
    debug!(cursor = next, entries = entries.len(), "repack complete");

    self.hash_tree.rebuild_all()?;
    Ok(next)
  }
}
