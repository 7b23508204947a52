//! A persistent file store backed by three fixed-size files — a file-data
//! region, a directory table, and a Merkle hash tree over file-data blocks —
//! with every mutation kept consistent with the stored hash tree and every
//! read verified against it before the bytes are returned.
//!
//! See [`Store`] for the operations (`create`, `delete`, `rename`, `resize`,
//! `read`, `write`, `file_size`) and [`Error`] for what can go wrong.

pub mod allocator;
pub mod directory;
pub mod error;
pub mod fletcher;
pub mod geometry;
pub mod hash_tree;
pub mod store;
pub mod util;

pub use error::{Error, Result};
pub use geometry::{BLOCK_SIZE, DIRECTORY_ENTRY_SIZE, Geometry, MAX_NAME_LEN, NODE_SIZE};
pub use store::Store;
pub use util::{file_size, u64_to_rand_bytes};
