//! Directories are plain inodes whose data blocks hold packed `DirEntry` slots.
//! A slot with an empty name is free. A directory's size is always a whole
//! number of blocks: it only ever grows one block at a time.

use alloc::vec::Vec;

use log::trace;

use crate::block_dev::BlockDevice;
use crate::cache::BlockCache;
use crate::config::*;
use crate::error::{FsError, Result};
use crate::inode::{bmap, get_block};
use crate::structs::{DirEntry, Inode};

/// Location of one directory entry on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirentRef {
    pub block: u32,
    pub index: usize,
}

pub fn read_dirent<D: BlockDevice>(cache: &mut BlockCache<D>, at: DirentRef) -> Result<DirEntry> {
    Ok(DirEntry::decode(cache.block(at.block)?, at.index))
}

pub fn write_dirent<D: BlockDevice>(
    cache: &mut BlockCache<D>,
    at: DirentRef,
    entry: &DirEntry,
) -> Result<()> {
    entry.encode(cache.block_mut(at.block)?, at.index);
    cache.schedule_flush(at.block);
    Ok(())
}

/// Empties the slot at `at` so it can be reused.
pub fn clear_dirent<D: BlockDevice>(cache: &mut BlockCache<D>, at: DirentRef) -> Result<()> {
    write_dirent(cache, at, &DirEntry::NULL)
}

/// Finds the first live entry called `name`, scanning blocks in order and
/// slots in order within each block.
pub fn dir_lookup<D: BlockDevice>(
    cache: &mut BlockCache<D>,
    dir: &mut Inode,
    name: &str,
) -> Result<(DirentRef, u32)> {
    if !dir.is_dir() {
        return Err(FsError::NotDirectory);
    }
    for filebno in 0..dir.num_blocks() {
        // A hole in a directory holds no entries.
        let Some(block) = bmap(cache, dir, filebno)? else {
            continue;
        };
        let buf = cache.block(block)?;
        for index in 0..DIRENTS_PER_BLOCK {
            let entry = DirEntry::decode(buf, index);
            if !entry.is_empty() && entry.name_eq(name) {
                return Ok((DirentRef { block, index }, entry.inum));
            }
        }
    }
    Err(FsError::NotFound)
}

/// Returns a free slot in `dir`, growing the directory by one block when
/// every existing slot is taken. The caller fills in the slot and writes
/// `dir` back.
pub fn dir_alloc_dirent<D: BlockDevice>(
    cache: &mut BlockCache<D>,
    dir: &mut Inode,
) -> Result<DirentRef> {
    if !dir.is_dir() {
        return Err(FsError::NotDirectory);
    }
    let nblocks = dir.num_blocks();
    for filebno in 0..nblocks {
        let block = get_block(cache, dir, filebno)?;
        let buf = cache.block(block)?;
        if let Some(index) = (0..DIRENTS_PER_BLOCK).find(|&i| DirEntry::decode(buf, i).is_empty()) {
            return Ok(DirentRef { block, index });
        }
    }

    let block = get_block(cache, dir, nblocks)?;
    dir.size = (nblocks + 1) * BLOCK_SIZE as u64;
    trace!("directory grew to {} blocks", nblocks + 1);
    Ok(DirentRef { block, index: 0 })
}

/// Adds the entry `name -> inum` to `dir`. Does not touch the link count of
/// `inum`, and does not check for an existing entry of the same name.
pub fn dir_add_entry<D: BlockDevice>(
    cache: &mut BlockCache<D>,
    dir: &mut Inode,
    name: &str,
    inum: u32,
) -> Result<DirentRef> {
    let entry = DirEntry::new(inum, name)?;
    let at = dir_alloc_dirent(cache, dir)?;
    write_dirent(cache, at, &entry)?;
    Ok(at)
}

/// Live entries of `dir` in slot order.
pub fn dir_entries<D: BlockDevice>(
    cache: &mut BlockCache<D>,
    dir: &mut Inode,
) -> Result<Vec<(DirentRef, DirEntry)>> {
    if !dir.is_dir() {
        return Err(FsError::NotDirectory);
    }
    let mut entries = Vec::new();
    for filebno in 0..dir.num_blocks() {
        let Some(block) = bmap(cache, dir, filebno)? else {
            continue;
        };
        let buf = cache.block(block)?;
        for index in 0..DIRENTS_PER_BLOCK {
            let entry = DirEntry::decode(buf, index);
            if !entry.is_empty() {
                entries.push((DirentRef { block, index }, entry));
            }
        }
    }
    Ok(entries)
}

pub fn dir_is_empty<D: BlockDevice>(cache: &mut BlockCache<D>, dir: &mut Inode) -> Result<bool> {
    Ok(dir_entries(cache, dir)?.is_empty())
}
