//! The block cache stands between the engine and the block device.
//! Blocks are loaded on first touch and stay resident, so the rest of the crate
//! can treat the volume as an addressable array of blocks. Modified blocks are
//! only written back once they have been scheduled for flushing.

use alloc::boxed::Box;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use log::trace;

use crate::block_dev::BlockDevice;
use crate::config::*;
use crate::error::{FsError, Result};

pub type Block = [u8; BLOCK_SIZE];

pub struct BlockCache<D: BlockDevice> {
    device: Arc<D>,
    num_blocks: u32,
    blocks: BTreeMap<u32, Box<Block>>,
    dirty: BTreeSet<u32>,
}

impl<D: BlockDevice> BlockCache<D> {
    /// `num_blocks` bounds every access; it comes from the superblock.
    pub fn new(device: Arc<D>, num_blocks: u32) -> Self {
        Self {
            device,
            num_blocks,
            blocks: BTreeMap::new(),
            dirty: BTreeSet::new(),
        }
    }

    pub fn num_blocks(&self) -> u32 {
        self.num_blocks
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    fn check(&self, block_id: u32) -> Result<()> {
        // Block 0 is the superblock and doubles as the null block number.
        if block_id == SUPERBLOCK_ID || block_id >= self.num_blocks {
            return Err(FsError::InvalidBlockId(block_id));
        }
        Ok(())
    }

    fn load(&mut self, block_id: u32) -> Result<&mut Box<Block>> {
        self.check(block_id)?;
        match self.blocks.entry(block_id) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let mut buf = Box::new([0u8; BLOCK_SIZE]);
                self.device.read_block(block_id, buf.as_mut_slice())?;
                Ok(entry.insert(buf))
            }
        }
    }

    /// Contents of `block_id`.
    pub fn block(&mut self, block_id: u32) -> Result<&Block> {
        let buf = self.load(block_id)?;
        Ok(&**buf)
    }

    /// Mutable contents of `block_id`. Callers must `schedule_flush` after writing.
    pub fn block_mut(&mut self, block_id: u32) -> Result<&mut Block> {
        let buf = self.load(block_id)?;
        Ok(&mut **buf)
    }

    /// Replaces the cached contents of `block_id` with zeros without reading
    /// the device, and schedules it for flushing.
    pub fn zero(&mut self, block_id: u32) -> Result<()> {
        self.check(block_id)?;
        self.blocks.insert(block_id, Box::new([0u8; BLOCK_SIZE]));
        self.dirty.insert(block_id);
        Ok(())
    }

    /// Marks `block_id` for eventual write-back.
    pub fn schedule_flush(&mut self, block_id: u32) {
        if self.blocks.contains_key(&block_id) {
            self.dirty.insert(block_id);
        }
    }

    pub fn is_dirty(&self, block_id: u32) -> bool {
        self.dirty.contains(&block_id)
    }

    /// Writes `block_id` to the device now if it is dirty.
    pub fn flush_block(&mut self, block_id: u32) -> Result<()> {
        if !self.dirty.remove(&block_id) {
            return Ok(());
        }
        if let Some(buf) = self.blocks.get(&block_id) {
            trace!("flush block {}", block_id);
            self.device.write_block(block_id, buf.as_slice())?;
        }
        Ok(())
    }

    /// Forgets a block that no longer belongs to anything, pending writes included.
    pub fn discard(&mut self, block_id: u32) {
        self.dirty.remove(&block_id);
        self.blocks.remove(&block_id);
    }

    /// Writes every dirty block back in block order and flushes the device.
    pub fn sync(&mut self) -> Result<()> {
        while let Some(block_id) = self.dirty.pop_first() {
            if let Some(buf) = self.blocks.get(&block_id) {
                if let Err(err) = self.device.write_block(block_id, buf.as_slice()) {
                    self.dirty.insert(block_id);
                    return Err(err);
                }
            }
        }
        self.device.flush()
    }

    pub fn num_dirty(&self) -> usize {
        self.dirty.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil::MemDisk;

    #[test]
    fn test_rejects_null_and_out_of_range() {
        let mut cache = BlockCache::new(Arc::new(MemDisk::new(4)), 4);
        assert!(matches!(cache.block(0), Err(FsError::InvalidBlockId(0))));
        assert!(matches!(cache.block_mut(4), Err(FsError::InvalidBlockId(4))));
        assert!(cache.block(3).is_ok());
    }

    #[test]
    fn test_write_back_only_after_schedule() {
        let disk = Arc::new(MemDisk::new(4));
        let mut cache = BlockCache::new(Arc::clone(&disk), 4);
        cache.block_mut(2).unwrap()[0] = 7;
        cache.sync().unwrap();
        assert!(disk.writes().is_empty());

        cache.schedule_flush(2);
        cache.block_mut(1).unwrap()[0] = 1;
        cache.schedule_flush(1);
        assert_eq!(cache.num_dirty(), 2);
        cache.sync().unwrap();
        assert_eq!(disk.writes(), vec![1, 2]);
        assert_eq!(disk.byte_at(2, 0), 7);
    }

    #[test]
    fn test_discard_drops_pending_write() {
        let disk = Arc::new(MemDisk::new(4));
        let mut cache = BlockCache::new(Arc::clone(&disk), 4);
        cache.zero(3).unwrap();
        assert!(cache.is_dirty(3));
        cache.discard(3);
        cache.sync().unwrap();
        assert!(disk.writes().is_empty());
    }
}
