//! The fixed-size directory table: one 72-byte entry per slot, scanned and
//! mutated directly on disk with no in-memory cache.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::geometry::{DIRECTORY_ENTRY_SIZE, MAX_NAME_LEN};

/// A live directory entry as read off disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
  pub slot: u64,
  pub name: Vec<u8>,
  pub offset: u32,
  pub length: u32,
}

/// A thin view over the directory backing file. Every method opens the
/// file, does its work, and lets the handle drop before returning; no
/// descriptor is held across calls.
pub struct DirectoryIndex {
  path: PathBuf,
}

impl DirectoryIndex {
  pub fn new(path: impl AsRef<Path>) -> Self {
    DirectoryIndex { path: path.as_ref().to_path_buf() }
  }

  fn slot_count(&self) -> Result<u64> {
    Ok(crate::util::file_size(&self.path) / DIRECTORY_ENTRY_SIZE)
  }

  fn read_slot(&self, f: &mut std::fs::File, slot: u64) -> Result<([u8; MAX_NAME_LEN], u32, u32)> {
    f.seek(SeekFrom::Start(slot * DIRECTORY_ENTRY_SIZE))?;
    let mut name = [0u8; MAX_NAME_LEN];
    f.read_exact(&mut name)?;
    let offset = f.read_u32::<LittleEndian>()?;
    let length = f.read_u32::<LittleEndian>()?;
    Ok((name, offset, length))
  }

  /// Scan the table for `name`, returning its slot plus offset/length if
  /// found.
  pub fn locate(&self, name: &[u8]) -> Result<Option<DirEntry>> {
    let mut f = OpenOptions::new().read(true).open(&self.path)?;
    let slots = self.slot_count()?;
    for slot in 0..slots {
      let (raw_name, offset, length) = self.read_slot(&mut f, slot)?;
      if !is_live(&raw_name) {
        continue;
      }
      if effective_name(&raw_name) == name {
        return Ok(Some(DirEntry { slot, name: name.to_vec(), offset, length }));
      }
    }
    Ok(None)
  }

  /// All live entries, in slot order (not sorted by offset; callers that
  /// need offset order, e.g. the allocator, sort themselves).
  pub fn enumerate_live(&self) -> Result<Vec<DirEntry>> {
    let mut f = OpenOptions::new().read(true).open(&self.path)?;
    let slots = self.slot_count()?;
    let mut out = Vec::new();
    for slot in 0..slots {
      let (raw_name, offset, length) = self.read_slot(&mut f, slot)?;
      if is_live(&raw_name) {
        out.push(DirEntry { slot, name: effective_name(&raw_name).to_vec(), offset, length });
      }
    }
    Ok(out)
  }

  /// Lowest slot index whose name begins with NUL, if any.
  pub fn find_free_slot(&self) -> Result<Option<u64>> {
    let mut f = OpenOptions::new().read(true).open(&self.path)?;
    let slots = self.slot_count()?;
    for slot in 0..slots {
      let (raw_name, _, _) = self.read_slot(&mut f, slot)?;
      if !is_live(&raw_name) {
        return Ok(Some(slot));
      }
    }
    Ok(None)
  }

  /// Write `name`/`offset`/`length` into `slot`. `name` must be at most 64
  /// bytes; shorter names are NUL-padded (a name of exactly 64 bytes has
  /// no terminator).
  pub fn write_entry(&self, slot: u64, name: &[u8], offset: u32, length: u32) -> Result<()> {
    if name.len() > MAX_NAME_LEN {
      return Err(Error::NameTooLong(String::from_utf8_lossy(name).into_owned()));
    }
    let mut buf = [0u8; MAX_NAME_LEN];
    buf[..name.len()].copy_from_slice(name);

    let mut f = OpenOptions::new().write(true).open(&self.path)?;
    f.seek(SeekFrom::Start(slot * DIRECTORY_ENTRY_SIZE))?;
    f.write_all(&buf)?;
    f.write_u32::<LittleEndian>(offset)?;
    f.write_u32::<LittleEndian>(length)?;
    Ok(())
  }

  /// Zero the name field of `slot`, marking it free. The offset/length
  /// fields are left untouched; they're ignored once the name is
  /// NUL-leading.
  pub fn clear_entry(&self, slot: u64) -> Result<()> {
    let mut f = OpenOptions::new().write(true).open(&self.path)?;
    f.seek(SeekFrom::Start(slot * DIRECTORY_ENTRY_SIZE))?;
    f.write_all(&[0u8; MAX_NAME_LEN])?;
    Ok(())
  }
}

fn is_live(raw_name: &[u8; MAX_NAME_LEN]) -> bool {
  raw_name[0] != 0
}

fn effective_name(raw_name: &[u8; MAX_NAME_LEN]) -> &[u8] {
  let end = raw_name.iter().position(|&b| b == 0).unwrap_or(MAX_NAME_LEN);
  &raw_name[..end]
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs::File;
  use tempfile::NamedTempFile;

  fn fixture(slots: u64) -> NamedTempFile {
    let tf = NamedTempFile::new().unwrap();
    tf.as_file().set_len(slots * DIRECTORY_ENTRY_SIZE).unwrap();
    tf
  }

  #[test]
  fn empty_table_has_no_live_entries_and_a_free_slot_at_zero() {
    let tf = fixture(4);
    let dir = DirectoryIndex::new(tf.path());
    assert!(dir.enumerate_live().unwrap().is_empty());
    assert_eq!(dir.find_free_slot().unwrap(), Some(0));
    assert_eq!(dir.locate(b"a").unwrap(), None);
  }

  #[test]
  fn write_then_locate_round_trips() {
    let tf = fixture(4);
    let dir = DirectoryIndex::new(tf.path());
    dir.write_entry(0, b"a", 0, 200).unwrap();
    dir.write_entry(1, b"b", 200, 200).unwrap();

    let e = dir.locate(b"a").unwrap().unwrap();
    assert_eq!(e.slot, 0);
    assert_eq!(e.offset, 0);
    assert_eq!(e.length, 200);

    let e = dir.locate(b"b").unwrap().unwrap();
    assert_eq!(e.slot, 1);
    assert_eq!(e.offset, 200);

    assert_eq!(dir.find_free_slot().unwrap(), Some(2));
    assert_eq!(dir.enumerate_live().unwrap().len(), 2);
  }

  #[test]
  fn clear_entry_frees_the_slot() {
    let tf = fixture(4);
    let dir = DirectoryIndex::new(tf.path());
    dir.write_entry(0, b"a", 0, 200).unwrap();
    dir.clear_entry(0).unwrap();
    assert_eq!(dir.locate(b"a").unwrap(), None);
    assert_eq!(dir.find_free_slot().unwrap(), Some(0));
  }

  #[test]
  fn a_name_of_exactly_64_bytes_has_no_terminator_but_still_locates() {
    let tf = fixture(1);
    let dir = DirectoryIndex::new(tf.path());
    let name = vec![b'x'; MAX_NAME_LEN];
    dir.write_entry(0, &name, 0, 10).unwrap();
    assert_eq!(dir.locate(&name).unwrap().unwrap().length, 10);
  }

  #[test]
  fn rejects_names_longer_than_64_bytes() {
    let tf = fixture(1);
    let dir = DirectoryIndex::new(tf.path());
    let name = vec![b'x'; MAX_NAME_LEN + 1];
    assert!(matches!(dir.write_entry(0, &name, 0, 10), Err(Error::NameTooLong(_))));
  }

  #[test]
  fn no_in_memory_cache_sees_writes_from_a_second_handle() {
    let tf = fixture(2);
    let a = DirectoryIndex::new(tf.path());
    let b = DirectoryIndex::new(tf.path());
    a.write_entry(0, b"a", 5, 5).unwrap();
    assert_eq!(b.locate(b"a").unwrap().unwrap().offset, 5);
    let _ = File::open(tf.path()).unwrap(); // touch, keep tf alive
  }
}
