//! The handle object tying the directory index, allocator, and hash tree
//! engine together into the store's seven file operations.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{info, instrument};

use crate::allocator::Allocator;
use crate::directory::DirectoryIndex;
use crate::error::{Error, Result};
use crate::geometry::{DIRECTORY_ENTRY_SIZE, Geometry, MAX_NAME_LEN};
use crate::hash_tree::HashTreeEngine;
use crate::util::file_size;

/// An opened store: the three backing-file paths, their measured sizes,
/// and the hash tree geometry derived from them.
///
/// Mirrors `initial_struct`/`init_fs` from the reference C implementation
/// (one handle, opened once, threaded through every call) but as an owned
/// Rust value instead of a `void*` blob; `init` is the constructor and
/// teardown is simply letting the value drop, since no operation holds a
/// file descriptor open between calls (section 5).
pub struct Store {
  file_data_path: PathBuf,
  file_data_size: u64,
  geometry: Geometry,
  directory: DirectoryIndex,
  hash_tree: HashTreeEngine,
}

impl Store {
  /// Open a store over three existing backing files. `num_processors` is
  /// accepted but unused: the cost heuristic in
  /// `HashTreeEngine::update_range` already obviates parallel hashing.
  #[instrument(skip(num_processors))]
  pub fn init(
    file_data_path: impl AsRef<Path>,
    directory_path: impl AsRef<Path>,
    hash_path: impl AsRef<Path>,
    num_processors: usize,
  ) -> Result<Self> {
    let _ = num_processors;
    let file_data_path = file_data_path.as_ref().to_path_buf();
    let directory_path = directory_path.as_ref().to_path_buf();
    let hash_path = hash_path.as_ref().to_path_buf();

    let file_data_size = file_size(&file_data_path);
    let directory_size = file_size(&directory_path);
    let hash_size = file_size(&hash_path);

    let geometry = Geometry::from_file_data_size(file_data_size)?;
    if hash_size != geometry.hash_region_size() {
      return Err(Error::InvalidGeometry);
    }
    if directory_size % DIRECTORY_ENTRY_SIZE != 0 {
      return Err(Error::InvalidGeometry);
    }

    info!(
      file_data_size,
      directory_size,
      hash_size,
      leaves = geometry.leaves,
      height = geometry.height,
      "opened store"
    );

    let directory = DirectoryIndex::new(&directory_path);
    let hash_tree = HashTreeEngine::new(&file_data_path, &hash_path, geometry);

    Ok(Store { file_data_path, file_data_size, geometry, directory, hash_tree })
  }

  fn allocator(&self) -> Allocator<'_> {
    Allocator::new(&self.directory, &self.hash_tree, &self.file_data_path, self.file_data_size)
  }

  fn open_file_data(&self, write: bool) -> Result<std::fs::File> {
    Ok(OpenOptions::new().read(true).write(write).open(&self.file_data_path)?)
  }

  fn zero_fill(&self, offset: u64, length: u64) -> Result<()> {
    if length == 0 {
      return Ok(());
    }
    let mut f = self.open_file_data(true)?;
    f.seek(SeekFrom::Start(offset))?;
    f.write_all(&vec![0u8; length as usize])?;
    Ok(())
  }

  /// Create `name` with `length` zero-filled bytes at a freshly allocated
  /// offset.
  #[instrument(skip(self))]
  pub fn create(&self, name: &[u8], length: u64) -> Result<()> {
    if name.len() > MAX_NAME_LEN {
      return Err(Error::NameTooLong(lossy(name)));
    }
    if self.directory.locate(name)?.is_some() {
      return Err(Error::AlreadyExists(lossy(name)));
    }

    let allocator = self.allocator();
    if allocator.total_free()? < length {
      return Err(Error::OutOfSpace);
    }
    let offset = allocator.allocate(length)?;

    self.zero_fill(offset, length)?;

    // A directory with no free slot can't record the new entry even
    // though file-data had room; the original doesn't separately name
    // this failure mode, so it's folded into out-of-space.
    let slot = self.directory.find_free_slot()?.ok_or(Error::OutOfSpace)?;
    self.directory.write_entry(slot, name, offset as u32, length as u32)?;
    self.hash_tree.update_range(offset, length)?;
    Ok(())
  }

  /// Remove `name`'s directory entry. File-data bytes are left untouched
  /// and unhashed; reads go through the directory, so deleted ranges
  /// never get read back.
  #[instrument(skip(self))]
  pub fn delete(&self, name: &[u8]) -> Result<()> {
    let e = self.directory.locate(name)?.ok_or_else(|| Error::NotFound(lossy(name)))?;
    self.directory.clear_entry(e.slot)?;
    Ok(())
  }

  /// Rename `old` to `new` in place (no file-data movement).
  #[instrument(skip(self))]
  pub fn rename(&self, old: &[u8], new: &[u8]) -> Result<()> {
    if new.len() > MAX_NAME_LEN {
      return Err(Error::NameTooLong(lossy(new)));
    }
    if self.directory.locate(new)?.is_some() {
      return Err(Error::AlreadyExists(lossy(new)));
    }
    let e = self.directory.locate(old)?.ok_or_else(|| Error::NotFound(lossy(old)))?;
    self.directory.write_entry(e.slot, new, e.offset, e.length)?;
    Ok(())
  }

  /// Change `name`'s length, shrinking in place, extending in place when
  /// room allows, or relocating via repack otherwise.
  #[instrument(skip(self))]
  pub fn resize(&self, name: &[u8], new_length: u64) -> Result<()> {
    let e = self.directory.locate(name)?.ok_or_else(|| Error::NotFound(lossy(name)))?;
    let old_length = e.length as u64;

    let allocator = self.allocator();
    if allocator.total_free()? + old_length < new_length {
      return Err(Error::OutOfSpace);
    }

    if new_length <= old_length {
      self.directory.write_entry(e.slot, &e.name, e.offset, new_length as u32)?;
      let freed = old_length - new_length;
      if freed > 0 {
        self.hash_tree.update_range(e.offset as u64 + new_length, freed)?;
      }
      return Ok(());
    }

    let entries = self.directory.enumerate_live()?;
    let next_entry_offset = entries
      .iter()
      .filter(|x| x.offset > e.offset)
      .map(|x| x.offset as u64)
      .min()
      .unwrap_or(self.file_data_size);

    if (e.offset as u64) + new_length <= next_entry_offset {
      // Extend in place.
      self.zero_fill(e.offset as u64 + old_length, new_length - old_length)?;
      self.directory.write_entry(e.slot, &e.name, e.offset, new_length as u32)?;
      self.hash_tree.update_range(e.offset as u64 + old_length, new_length - old_length)?;
      Ok(())
    } else {
      // No room to grow in place: preserve the bytes, delete the
      // entry, repack everything else, then reallocate at the
      // post-repack cursor.
      let mut preserved = vec![0u8; old_length as usize];
      {
        let mut f = self.open_file_data(false)?;
        f.seek(SeekFrom::Start(e.offset as u64))?;
        f.read_exact(&mut preserved)?;
      }

      self.directory.clear_entry(e.slot)?;
      let cursor = self.allocator().repack()?;
      if self.file_data_size - cursor < new_length {
        // Put the entry back the way it was before failing.
        self.directory.write_entry(e.slot, &e.name, e.offset, old_length as u32)?;
        return Err(Error::OutOfSpace);
      }

      {
        let mut f = self.open_file_data(true)?;
        f.seek(SeekFrom::Start(cursor))?;
        f.write_all(&preserved)?;
        f.write_all(&vec![0u8; (new_length - old_length) as usize])?;
      }
      self.directory.write_entry(e.slot, &e.name, cursor as u32, new_length as u32)?;
      self.hash_tree.update_range(cursor, new_length)?;
      Ok(())
    }
  }

  /// Read `count` bytes at `offset` into `buf` after verifying the
  /// touched block range against the stored hash tree.
  #[instrument(skip(self, buf))]
  pub fn read(&self, name: &[u8], offset: u64, count: u64, buf: &mut [u8]) -> Result<()> {
    let e = self.directory.locate(name)?.ok_or_else(|| Error::NotFound(lossy(name)))?;
    if offset + count > e.length as u64 {
      return Err(Error::RangeInvalid { offset, count, length: e.length as u64 });
    }

    if !self.hash_tree.verify_range(e.offset as u64 + offset, count)? {
      return Err(Error::IntegrityViolation);
    }

    let mut f = self.open_file_data(false)?;
    f.seek(SeekFrom::Start(e.offset as u64 + offset))?;
    f.read_exact(&mut buf[..count as usize])?;
    Ok(())
  }

  /// Write `count` bytes from `data` at `offset`, growing the file first
  /// via `resize` if the write extends past the current length.
  #[instrument(skip(self, data))]
  pub fn write(&self, name: &[u8], offset: u64, count: u64, data: &[u8]) -> Result<()> {
    let e = self.directory.locate(name)?.ok_or_else(|| Error::NotFound(lossy(name)))?;
    if offset > e.length as u64 {
      return Err(Error::RangeInvalid { offset, count, length: e.length as u64 });
    }
    if offset + count > e.length as u64 {
      self.resize(name, offset + count)?;
    }

    // The entry may have moved during resize's repack path.
    let e = self.directory.locate(name)?.ok_or_else(|| Error::NotFound(lossy(name)))?;
    let mut f = self.open_file_data(true)?;
    f.seek(SeekFrom::Start(e.offset as u64 + offset))?;
    f.write_all(&data[..count as usize])?;
    self.hash_tree.update_range(e.offset as u64 + offset, count)?;
    Ok(())
  }

  /// `name`'s length, or `None` if it doesn't exist.
  pub fn file_size(&self, name: &[u8]) -> Result<Option<u32>> {
    Ok(self.directory.locate(name)?.map(|e| e.length))
  }

  /// Names of every live file, in directory slot order. Used by the `ls`
  /// subcommand; the core contract has no listing operation of its own.
  pub fn list_names(&self) -> Result<Vec<Vec<u8>>> {
    Ok(self.directory.enumerate_live()?.into_iter().map(|e| e.name).collect())
  }
}

fn lossy(name: &[u8]) -> String {
  String::from_utf8_lossy(name).into_owned()
}
