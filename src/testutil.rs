//! In-memory block device shared by the unit tests.
//!
//! Unlike the `RamDisk` under `tests/`, it records which blocks were written
//! and in what order, so cache and bitmap tests can check write-back and
//! write-through. Integration tests cannot reach `cfg(test)` items, hence the
//! two devices.

use std::sync::Mutex;

use crate::block_dev::BlockDevice;
use crate::config::BLOCK_SIZE;
use crate::error::{FsError, Result};

pub struct MemDisk {
    data: Mutex<Vec<u8>>,
    writes: Mutex<Vec<u32>>,
}

impl MemDisk {
    pub fn new(num_blocks: u32) -> Self {
        Self {
            data: Mutex::new(vec![0u8; num_blocks as usize * BLOCK_SIZE]),
            writes: Mutex::new(Vec::new()),
        }
    }

    /// Block numbers written so far, in write order.
    pub fn writes(&self) -> Vec<u32> {
        self.writes.lock().unwrap().clone()
    }

    pub fn byte_at(&self, block_id: u32, offset: usize) -> u8 {
        self.data.lock().unwrap()[block_id as usize * BLOCK_SIZE + offset]
    }
}

impl BlockDevice for MemDisk {
    fn num_blocks(&self) -> u32 {
        (self.data.lock().unwrap().len() / BLOCK_SIZE) as u32
    }

    fn read_block(&self, block_id: u32, buf: &mut [u8]) -> Result<()> {
        if block_id >= self.num_blocks() {
            return Err(FsError::InvalidBlockId(block_id));
        }
        let start = block_id as usize * BLOCK_SIZE;
        buf.copy_from_slice(&self.data.lock().unwrap()[start..start + BLOCK_SIZE]);
        Ok(())
    }

    fn write_block(&self, block_id: u32, buf: &[u8]) -> Result<()> {
        if block_id >= self.num_blocks() {
            return Err(FsError::InvalidBlockId(block_id));
        }
        let start = block_id as usize * BLOCK_SIZE;
        self.data.lock().unwrap()[start..start + BLOCK_SIZE].copy_from_slice(buf);
        self.writes.lock().unwrap().push(block_id);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
