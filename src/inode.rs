//! Management of reading and writing to inodes, and of the block pointer tree
//! hanging off each inode.
//!
//! Logical block `n` of a file lives in one of three places:
//! - `n < N_DIRECT`: `inode.direct[n]`
//! - the next `N_INDIRECT` blocks: a slot of the indirect block
//! - the next `N_DOUBLE` blocks: a slot of an indirect block referenced from the
//!   double-indirect block
//!
//! All three are handled by one radix walk: a root slot in the inode followed by
//! zero, one or two table levels of `PTRS_PER_BLOCK` entries each.

use alloc::vec::Vec;

use log::{trace, warn};

use crate::bitmap::{alloc_zeroed_block, free_block};
use crate::block_dev::BlockDevice;
use crate::cache::BlockCache;
use crate::config::*;
use crate::error::{FsError, Result};
use crate::structs::{Inode, read_ptr, write_ptr};

pub fn read_inode<D: BlockDevice>(cache: &mut BlockCache<D>, inum: u32) -> Result<Inode> {
    Ok(Inode::decode(cache.block(inum)?))
}

pub fn write_inode<D: BlockDevice>(
    cache: &mut BlockCache<D>,
    inum: u32,
    inode: &Inode,
) -> Result<()> {
    inode.encode(cache.block_mut(inum)?);
    cache.schedule_flush(inum);
    Ok(())
}

/// Allocates a block for a new, all-zero inode. The block number is the inum.
pub fn alloc_inode<D: BlockDevice>(cache: &mut BlockCache<D>) -> Result<u32> {
    alloc_zeroed_block(cache)
}

/// Releases every block of an unlinked inode, then the inode block itself.
///
/// # Panics
/// If the inode still has links: freeing it would leave dangling entries.
pub fn free_inode<D: BlockDevice>(cache: &mut BlockCache<D>, inum: u32) -> Result<()> {
    let mut inode = read_inode(cache, inum)?;
    assert_eq!(inode.nlink, 0, "freeing inode {inum} with live links");
    truncate_blocks(cache, &mut inode, 0)?;
    free_block(cache, inum)
}

/// A place holding a block pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// `inode.direct[i]`
    Direct(usize),
    /// `inode.indirect`
    Indirect,
    /// `inode.double`
    Double,
    /// Entry `index` of the pointer table stored in `block`.
    Table { block: u32, index: usize },
}

pub fn slot_get<D: BlockDevice>(
    cache: &mut BlockCache<D>,
    inode: &Inode,
    slot: Slot,
) -> Result<u32> {
    Ok(match slot {
        Slot::Direct(i) => inode.direct[i],
        Slot::Indirect => inode.indirect,
        Slot::Double => inode.double,
        Slot::Table { block, index } => read_ptr(cache.block(block)?, index),
    })
}

/// Stores `value` in `slot`. Table slots are scheduled for flushing here;
/// inode slots are persisted when the caller writes the inode back.
pub fn slot_set<D: BlockDevice>(
    cache: &mut BlockCache<D>,
    inode: &mut Inode,
    slot: Slot,
    value: u32,
) -> Result<()> {
    match slot {
        Slot::Direct(i) => inode.direct[i] = value,
        Slot::Indirect => inode.indirect = value,
        Slot::Double => inode.double = value,
        Slot::Table { block, index } => {
            write_ptr(cache.block_mut(block)?, index, value);
            cache.schedule_flush(block);
        }
    }
    Ok(())
}

/// Splits a logical block number into its root slot and the table offsets below it.
fn radix(filebno: u64) -> Result<(Slot, [usize; 2], usize)> {
    let mut n = filebno;
    if n < N_DIRECT as u64 {
        return Ok((Slot::Direct(n as usize), [0, 0], 0));
    }
    n -= N_DIRECT as u64;
    if n < N_INDIRECT as u64 {
        return Ok((Slot::Indirect, [n as usize, 0], 1));
    }
    n -= N_INDIRECT as u64;
    if n < N_DOUBLE as u64 {
        let n = n as usize;
        return Ok((Slot::Double, [n / PTRS_PER_BLOCK, n % PTRS_PER_BLOCK], 2));
    }
    Err(FsError::InvalidArgument)
}

fn walk<D: BlockDevice>(
    cache: &mut BlockCache<D>,
    inode: &mut Inode,
    filebno: u64,
    alloc: bool,
    fresh: &mut Vec<Slot>,
) -> Result<Slot> {
    let (mut slot, offsets, depth) = radix(filebno)?;
    for &index in &offsets[..depth] {
        let mut table = slot_get(cache, inode, slot)?;
        if table == 0 {
            if !alloc {
                return Err(FsError::NotFound);
            }
            table = alloc_zeroed_block(cache)?;
            slot_set(cache, inode, slot, table)?;
            fresh.push(slot);
        }
        slot = Slot::Table { block: table, index };
    }
    Ok(slot)
}

fn undo_slot<D: BlockDevice>(
    cache: &mut BlockCache<D>,
    inode: &mut Inode,
    slot: Slot,
) -> Result<()> {
    let block = slot_get(cache, inode, slot)?;
    slot_set(cache, inode, slot, 0)?;
    free_block(cache, block)
}

/// Undoes the allocations recorded by a failed walk, innermost first.
fn rollback<D: BlockDevice>(cache: &mut BlockCache<D>, inode: &mut Inode, fresh: &[Slot]) {
    for &slot in fresh.iter().rev() {
        if let Err(err) = undo_slot(cache, inode, slot) {
            warn!("rollback of {:?} failed: {}", slot, err);
        }
    }
}

/// Finds the slot holding the pointer for logical block `filebno` of `inode`.
///
/// The slot's value may be 0. Missing pointer tables are allocated when
/// `alloc` is set; otherwise the walk fails with `NotFound`. If an allocation
/// fails part way, the tables allocated by this call are released again.
pub fn block_walk<D: BlockDevice>(
    cache: &mut BlockCache<D>,
    inode: &mut Inode,
    filebno: u64,
    alloc: bool,
) -> Result<Slot> {
    let mut fresh = Vec::new();
    let result = walk(cache, inode, filebno, alloc, &mut fresh);
    if result.is_err() {
        rollback(cache, inode, &fresh);
    }
    result
}

/// Looks up the block for `filebno` without allocating anything.
/// Returns `None` for holes.
pub fn bmap<D: BlockDevice>(
    cache: &mut BlockCache<D>,
    inode: &mut Inode,
    filebno: u64,
) -> Result<Option<u32>> {
    match block_walk(cache, inode, filebno, false) {
        Ok(slot) => {
            let block = slot_get(cache, inode, slot)?;
            Ok((block != 0).then_some(block))
        }
        Err(FsError::NotFound) => Ok(None),
        Err(err) => Err(err),
    }
}

/// Returns the block backing `filebno`, allocating a zeroed one (and any
/// pointer tables on the way) if the file has a hole there.
pub fn get_block<D: BlockDevice>(
    cache: &mut BlockCache<D>,
    inode: &mut Inode,
    filebno: u64,
) -> Result<u32> {
    let mut fresh = Vec::new();
    let result = walk(cache, inode, filebno, true, &mut fresh).and_then(|slot| {
        let block = slot_get(cache, inode, slot)?;
        if block != 0 {
            return Ok(block);
        }
        let block = alloc_zeroed_block(cache)?;
        slot_set(cache, inode, slot, block)?;
        trace!("map file block {} -> {}", filebno, block);
        Ok(block)
    });
    if result.is_err() {
        rollback(cache, inode, &fresh);
    }
    result
}

/// Frees the data block at `filebno`, if any.
fn free_file_block<D: BlockDevice>(
    cache: &mut BlockCache<D>,
    inode: &mut Inode,
    filebno: u64,
) -> Result<()> {
    let slot = match block_walk(cache, inode, filebno, false) {
        Ok(slot) => slot,
        Err(FsError::NotFound) => return Ok(()),
        Err(err) => return Err(err),
    };
    let block = slot_get(cache, inode, slot)?;
    if block != 0 {
        free_block(cache, block)?;
        slot_set(cache, inode, slot, 0)?;
    }
    Ok(())
}

/// Frees every block `inode` would not need at `new_size` bytes.
/// Does not change `inode.size`.
pub fn truncate_blocks<D: BlockDevice>(
    cache: &mut BlockCache<D>,
    inode: &mut Inode,
    new_size: u64,
) -> Result<()> {
    let old_nblocks = inode.num_blocks();
    let new_nblocks = new_size.div_ceil(BLOCK_SIZE as u64);

    for filebno in new_nblocks..old_nblocks {
        free_file_block(cache, inode, filebno)?;
    }

    let direct_end = N_DIRECT as u64;
    let single_end = direct_end + N_INDIRECT as u64;

    if new_nblocks <= direct_end && inode.indirect != 0 {
        free_block(cache, inode.indirect)?;
        inode.indirect = 0;
    }

    if inode.double != 0 {
        let table = inode.double;
        // Indirect children whose whole range lies past the new end.
        let first = if new_nblocks <= single_end {
            0
        } else {
            (new_nblocks - single_end).div_ceil(PTRS_PER_BLOCK as u64) as usize
        };
        for index in first..PTRS_PER_BLOCK {
            let child = read_ptr(cache.block(table)?, index);
            if child == 0 {
                continue;
            }
            free_block(cache, child)?;
            write_ptr(cache.block_mut(table)?, index, 0);
            cache.schedule_flush(table);
        }
        if new_nblocks <= single_end {
            free_block(cache, table)?;
            inode.double = 0;
        }
    }

    Ok(())
}

/// Counts the data blocks actually allocated within `inode.size`.
pub fn count_blocks<D: BlockDevice>(cache: &mut BlockCache<D>, inode: &mut Inode) -> Result<u64> {
    let mut nblocks = 0;
    for filebno in 0..inode.num_blocks() {
        if bmap(cache, inode, filebno)?.is_some() {
            nblocks += 1;
        }
    }
    Ok(nblocks)
}

/// Every block owned by `inode`: data blocks first, then pointer tables with
/// children before their parents.
pub fn owned_blocks<D: BlockDevice>(
    cache: &mut BlockCache<D>,
    inode: &mut Inode,
) -> Result<Vec<u32>> {
    let mut blocks = Vec::new();
    for filebno in 0..inode.num_blocks() {
        if let Some(block) = bmap(cache, inode, filebno)? {
            blocks.push(block);
        }
    }
    if inode.indirect != 0 {
        blocks.push(inode.indirect);
    }
    if inode.double != 0 {
        for index in 0..PTRS_PER_BLOCK {
            let child = read_ptr(cache.block(inode.double)?, index);
            if child != 0 {
                blocks.push(child);
            }
        }
        blocks.push(inode.double);
    }
    Ok(blocks)
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::bitmap::{count_free, init_bitmap};
    use crate::testutil::MemDisk;

    fn fresh(num_blocks: u32) -> BlockCache<MemDisk> {
        let mut cache = BlockCache::new(Arc::new(MemDisk::new(num_blocks)), num_blocks);
        init_bitmap(&mut cache, 2).unwrap();
        cache
    }

    #[test]
    fn test_radix() {
        assert_eq!(radix(0).unwrap(), (Slot::Direct(0), [0, 0], 0));
        assert_eq!(radix(9).unwrap(), (Slot::Direct(9), [0, 0], 0));
        assert_eq!(radix(10).unwrap(), (Slot::Indirect, [0, 0], 1));
        assert_eq!(radix(10 + 1023).unwrap(), (Slot::Indirect, [1023, 0], 1));
        assert_eq!(radix(10 + 1024).unwrap(), (Slot::Double, [0, 0], 2));
        assert_eq!(radix(10 + 1024 + 1025).unwrap(), (Slot::Double, [1, 1], 2));
        assert_eq!(
            radix(MAX_FILE_BLOCKS - 1).unwrap(),
            (Slot::Double, [1023, 1023], 2)
        );
        assert!(matches!(radix(MAX_FILE_BLOCKS), Err(FsError::InvalidArgument)));
    }

    #[test]
    fn test_walk_without_alloc() {
        let mut cache = fresh(64);
        let mut inode = Inode::default();
        assert_eq!(block_walk(&mut cache, &mut inode, 3, false).unwrap(), Slot::Direct(3));
        assert!(matches!(
            block_walk(&mut cache, &mut inode, 10, false),
            Err(FsError::NotFound)
        ));
        assert_eq!(inode.indirect, 0);
        assert_eq!(bmap(&mut cache, &mut inode, 2000).unwrap(), None);
    }

    #[test]
    fn test_get_block_allocates_tables() {
        let mut cache = fresh(64);
        let mut inode = Inode::default();
        let free = count_free(&mut cache).unwrap();

        let block = get_block(&mut cache, &mut inode, 10 + 1024 + 5).unwrap();
        assert_ne!(inode.double, 0);
        assert_eq!(inode.indirect, 0);
        // Double table, one indirect child, one data block.
        assert_eq!(count_free(&mut cache).unwrap(), free - 3);
        assert_eq!(get_block(&mut cache, &mut inode, 10 + 1024 + 5).unwrap(), block);
        assert_eq!(bmap(&mut cache, &mut inode, 10 + 1024 + 5).unwrap(), Some(block));
        assert!(cache.block(block).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_get_block_out_of_range() {
        let mut cache = fresh(64);
        let mut inode = Inode::default();
        assert!(matches!(
            get_block(&mut cache, &mut inode, MAX_FILE_BLOCKS),
            Err(FsError::InvalidArgument)
        ));
    }

    #[test]
    fn test_get_block_rolls_back_on_exhaustion() {
        // Blocks 0 and 1 are taken, leaving 2 and 3: not enough for a double
        // table, an indirect child and a data block.
        let mut cache = fresh(4);
        let mut inode = Inode::default();
        assert!(matches!(
            get_block(&mut cache, &mut inode, 10 + 1024),
            Err(FsError::OutOfSpace)
        ));
        assert_eq!(inode.double, 0);
        assert_eq!(count_free(&mut cache).unwrap(), 2);
    }

    #[test]
    fn test_truncate_frees_tables() {
        let mut cache = fresh(64);
        let mut inode = Inode::default();
        let free = count_free(&mut cache).unwrap();

        for filebno in [0, 9, 10, 11, 10 + 1024, 10 + 2048 + 7] {
            get_block(&mut cache, &mut inode, filebno).unwrap();
        }
        inode.size = (10 + 2048 + 8) * BLOCK_SIZE as u64;
        assert_eq!(count_blocks(&mut cache, &mut inode).unwrap(), 6);

        // Keep the single-indirect range, drop everything past it.
        truncate_blocks(&mut cache, &mut inode, 11 * BLOCK_SIZE as u64).unwrap();
        inode.size = 11 * BLOCK_SIZE as u64;
        assert_eq!(inode.double, 0);
        assert_ne!(inode.indirect, 0);
        assert_eq!(count_blocks(&mut cache, &mut inode).unwrap(), 3);

        truncate_blocks(&mut cache, &mut inode, 0).unwrap();
        inode.size = 0;
        assert_eq!(inode.indirect, 0);
        assert_eq!(inode.direct, [0; N_DIRECT]);
        assert_eq!(count_free(&mut cache).unwrap(), free);
    }

    #[test]
    fn test_truncate_inside_double_range() {
        let mut cache = fresh(64);
        let mut inode = Inode::default();
        let base = (N_DIRECT + N_INDIRECT) as u64;
        get_block(&mut cache, &mut inode, base).unwrap();
        get_block(&mut cache, &mut inode, base + PTRS_PER_BLOCK as u64).unwrap();
        inode.size = (base + PTRS_PER_BLOCK as u64 + 1) * BLOCK_SIZE as u64;
        let free = count_free(&mut cache).unwrap();

        // The second indirect child becomes unreachable and goes with its data.
        truncate_blocks(&mut cache, &mut inode, (base + 1) * BLOCK_SIZE as u64).unwrap();
        assert_ne!(inode.double, 0);
        assert_eq!(count_free(&mut cache).unwrap(), free + 2);
        assert_eq!(read_ptr(cache.block(inode.double).unwrap(), 1), 0);
        assert_ne!(read_ptr(cache.block(inode.double).unwrap(), 0), 0);
    }

    #[test]
    fn test_free_inode() {
        let mut cache = fresh(64);
        let free = count_free(&mut cache).unwrap();
        let inum = alloc_inode(&mut cache).unwrap();
        let mut inode = read_inode(&mut cache, inum).unwrap();
        assert_eq!(inode, Inode::default());
        get_block(&mut cache, &mut inode, 12).unwrap();
        inode.size = 13 * BLOCK_SIZE as u64;
        write_inode(&mut cache, inum, &inode).unwrap();
        assert_eq!(owned_blocks(&mut cache, &mut inode).unwrap().len(), 2);

        free_inode(&mut cache, inum).unwrap();
        assert_eq!(count_free(&mut cache).unwrap(), free);
    }

    #[test]
    #[should_panic(expected = "live links")]
    fn test_free_linked_inode_panics() {
        let mut cache = fresh(64);
        let inum = alloc_inode(&mut cache).unwrap();
        let inode = Inode {
            nlink: 1,
            ..Inode::default()
        };
        write_inode(&mut cache, inum, &inode).unwrap();
        let _ = free_inode(&mut cache, inum);
    }
}
