//! Common utilities for tests
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use lumen::{BLOCK_SIZE, BlockDevice, Error, FileSystem, FormatOptions, Result};

pub const ORANGE: &str = "\x1b[38;5;214m";
pub const RESET: &str = "\x1b[0m";

/// Provides a macro for logging messages during tests.
/// e.g. log!("placeholder") -> println!("[test] placeholder");
#[macro_export]
macro_rules! log {
    ($msg:expr) => {
        println!("{}[test] {}{}", crate::common::ORANGE, $msg, crate::common::RESET)
    };
    ($msg:expr, $($arg:tt)*) => {
        println!("{}[test] {}{}", crate::common::ORANGE, format!($msg, $($arg)*), crate::common::RESET)
    };
}

pub struct RamDisk {
    inner: Mutex<Vec<u8>>,
    num_blocks: u32,
}

impl RamDisk {
    /// Creates a zeroed disk of `num_blocks` blocks.
    pub fn new(num_blocks: u32) -> Self {
        RamDisk {
            inner: Mutex::new(vec![0u8; num_blocks as usize * BLOCK_SIZE]),
            num_blocks,
        }
    }
}

impl BlockDevice for RamDisk {
    fn num_blocks(&self) -> u32 {
        self.num_blocks
    }

    fn read_block(&self, block_id: u32, buf: &mut [u8]) -> Result<()> {
        if block_id >= self.num_blocks {
            return Err(Error::InvalidBlockId(block_id));
        }
        if buf.len() != BLOCK_SIZE {
            return Err(Error::InvalidArgument);
        }
        let start = block_id as usize * BLOCK_SIZE;
        let data = self.inner.lock().unwrap();
        buf.copy_from_slice(&data[start..start + BLOCK_SIZE]);
        Ok(())
    }

    fn write_block(&self, block_id: u32, buf: &[u8]) -> Result<()> {
        if block_id >= self.num_blocks {
            return Err(Error::InvalidBlockId(block_id));
        }
        if buf.len() != BLOCK_SIZE {
            return Err(Error::InvalidArgument);
        }
        let start = block_id as usize * BLOCK_SIZE;
        let mut data = self.inner.lock().unwrap();
        data[start..start + BLOCK_SIZE].copy_from_slice(buf);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Formats a fresh RAM disk of `num_blocks` blocks with a fixed timestamp.
pub fn fresh_fs(num_blocks: u32) -> FileSystem<RamDisk> {
    let options = FormatOptions {
        time: 1_000,
        ..FormatOptions::new(num_blocks)
    };
    FileSystem::format(Arc::new(RamDisk::new(num_blocks)), &options).unwrap()
}

/// Creates a regular file owned by root.
pub fn touch(fs: &mut FileSystem<RamDisk>, path: &str) -> u32 {
    fs.mknod(path, lumen::S_IFREG | 0o644, 0, 0, 0).unwrap()
}
