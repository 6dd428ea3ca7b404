//! Lumen is a small single-volume file system stored on a flat array of
//! 4 KiB blocks.
//!
//! Lumen's on-disk layout:
//! - Block 0: superblock
//! - Blocks 1..=K: block bitmap, one bit per block, set = free
//! - Everything else: inodes, pointer tables and data, allocated on demand.
//!   An inode occupies a whole block and is named by that block's number.
//!
//! Lumen's layers (from bottom to top):
//! 1. Block Device: read/write whole blocks.                 | User implemented, or `FileDisk`
//! 2. Cache: blocks addressed by number, written back lazily. | Fs implemented
//! 3. Bitmap: block allocation.                               | Fs implemented
//! 4. Inode: records and the direct/indirect/double pointer tree.
//! 5. Directory/Path: entry slots and path walking.
//! 6. File: byte-level reads, writes and resizing.
//! 7. FileSystem: path-based operations for a protocol adapter.

extern crate alloc;

mod bitmap;
mod block_dev;
mod cache;
mod config;
mod directory;
mod error;
mod file;
mod fs;
mod inode;
mod path;
mod structs;
mod superblock;
#[cfg(test)]
mod testutil;

pub use bitmap::{alloc_block, alloc_zeroed_block, block_is_free, count_free, free_block};
pub use block_dev::{BlockDevice, FileDisk};
pub use cache::{Block, BlockCache};
pub use config::*;
pub use directory::*;
pub use error::FsError as Error;
pub use error::Result;
pub use file::*;
pub use fs::*;
pub use inode::*;
pub use path::*;
pub use structs::*;
pub use superblock::*;
