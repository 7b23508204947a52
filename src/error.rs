use thiserror::Error;

/// Everything a [`crate::Store`] operation can fail with.
///
/// The first five variants map onto the small integer return codes in the
/// specification's operation table; [`Error::as_code`] performs that
/// mapping for callers (chiefly the CLI) that want the legacy contract
/// instead of matching on the enum.
#[derive(Error, Debug)]
pub enum Error {
  #[error("file not found: {0}")]
  NotFound(String),

  #[error("file already exists: {0}")]
  AlreadyExists(String),

  #[error("not enough free space in file-data region")]
  OutOfSpace,

  #[error("range [{offset}, {offset}+{count}) is invalid for a file of length {length}")]
  RangeInvalid { offset: u64, count: u64, length: u64 },

  #[error("stored hash tree does not match file-data contents")]
  IntegrityViolation,

  #[error("name longer than 64 bytes: {0:?}")]
  NameTooLong(String),

  #[error("file-data size is not a power-of-two multiple of 256 bytes")]
  InvalidGeometry,

  #[error(transparent)]
  Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Default return code for every operation except `write`, where
/// out-of-space-after-resize is reported as 3 instead of 2 (the CLI
/// dispatch in `main.rs` applies that one override; every other
/// operation's codes line up with this mapping directly).
///
/// `file_size` is the only operation that doesn't fit this shape (it
/// returns a length or -1), and is left out of this enum; `Store::file_size`
/// returns `Option<u32>` instead.
impl Error {
  pub fn as_code(&self) -> i32 {
    match self {
      Error::NotFound(_) => 1,
      Error::AlreadyExists(_) => 1,
      Error::OutOfSpace => 2,
      Error::RangeInvalid { .. } => 2,
      Error::IntegrityViolation => 3,
      Error::NameTooLong(_) => 1,
      Error::InvalidGeometry => 255,
      Error::Io(_) => 255,
    }
  }
}
