//! Management of the block bitmap.
//! The bitmap starts at block 1 and holds one bit per block of the volume:
//! a set bit means the block is free. Block 0 is the null block number and is
//! never handed out.

use log::{trace, warn};

use crate::block_dev::BlockDevice;
use crate::cache::BlockCache;
use crate::config::*;
use crate::error::{FsError, Result};

/// Locates the bit for `block_id`: (bitmap block, byte offset, bit mask).
fn bit_position(block_id: u32) -> (u32, usize, u8) {
    let bitmap_block = BITMAP_START + block_id / BITS_PER_BLOCK;
    let bit = block_id % BITS_PER_BLOCK;
    (bitmap_block, (bit / 8) as usize, 1 << (bit % 8))
}

/// Checks whether the bitmap marks `block_id` as free.
/// Block 0 and out-of-range block numbers are never free.
pub fn block_is_free<D: BlockDevice>(cache: &mut BlockCache<D>, block_id: u32) -> bool {
    if block_id == 0 || block_id >= cache.num_blocks() {
        return false;
    }
    let (bitmap_block, byte, mask) = bit_position(block_id);
    match cache.block(bitmap_block) {
        Ok(buf) => buf[byte] & mask != 0,
        Err(_) => false,
    }
}

/// Allocates the lowest-numbered free block.
/// The modified bitmap block is written through to the device before returning.
pub fn alloc_block<D: BlockDevice>(cache: &mut BlockCache<D>) -> Result<u32> {
    let num_blocks = cache.num_blocks();
    let bitmap_blocks = num_blocks.div_ceil(BITS_PER_BLOCK);

    for i in 0..bitmap_blocks {
        let bitmap_block = BITMAP_START + i;
        let buf = cache.block_mut(bitmap_block)?;
        let base = i * BITS_PER_BLOCK;

        let Some(byte) = buf.iter().position(|&b| b != 0) else {
            continue;
        };
        let bit = buf[byte].trailing_zeros();
        let block_id = base + byte as u32 * 8 + bit;
        if block_id >= num_blocks {
            // Free bits past the end of the volume are padding.
            break;
        }
        if block_id == 0 {
            // A formatter never leaves block 0 free; refuse to hand it out.
            return Err(FsError::InvalidBlockId(0));
        }
        buf[byte] &= !(1 << bit);
        cache.schedule_flush(bitmap_block);
        cache.flush_block(bitmap_block)?;
        trace!("alloc block {}", block_id);
        return Ok(block_id);
    }

    Err(FsError::OutOfSpace)
}

/// Allocates a block and fills it with zeros.
pub fn alloc_zeroed_block<D: BlockDevice>(cache: &mut BlockCache<D>) -> Result<u32> {
    let block_id = alloc_block(cache)?;
    cache.zero(block_id)?;
    Ok(block_id)
}

/// Marks `block_id` free. Freeing block 0 silently does nothing.
/// Like allocation, the bitmap block is written through immediately.
pub fn free_block<D: BlockDevice>(cache: &mut BlockCache<D>, block_id: u32) -> Result<()> {
    if block_id == 0 {
        return Ok(());
    }
    if block_id >= cache.num_blocks() {
        return Err(FsError::InvalidBlockId(block_id));
    }

    let (bitmap_block, byte, mask) = bit_position(block_id);
    let buf = cache.block_mut(bitmap_block)?;
    if buf[byte] & mask != 0 {
        warn!("block {} freed twice", block_id);
        return Ok(());
    }
    buf[byte] |= mask;
    cache.schedule_flush(bitmap_block);
    cache.flush_block(bitmap_block)?;
    cache.discard(block_id);
    trace!("free block {}", block_id);
    Ok(())
}

/// Counts free blocks across the whole bitmap.
pub fn count_free<D: BlockDevice>(cache: &mut BlockCache<D>) -> Result<u32> {
    let num_blocks = cache.num_blocks();
    let bitmap_blocks = num_blocks.div_ceil(BITS_PER_BLOCK);
    let mut free = 0;

    for i in 0..bitmap_blocks {
        let buf = cache.block(BITMAP_START + i)?;
        let valid = (num_blocks - i * BITS_PER_BLOCK).min(BITS_PER_BLOCK);
        let full_bytes = (valid / 8) as usize;
        free += buf[..full_bytes].iter().map(|b| b.count_ones()).sum::<u32>();
        let rem = valid % 8;
        if rem > 0 {
            free += (buf[full_bytes] & ((1u8 << rem) - 1)).count_ones();
        }
    }

    Ok(free)
}

/// Writes an all-free bitmap for `num_blocks` blocks, then marks blocks
/// `0..used` as allocated. Only called while formatting.
pub(crate) fn init_bitmap<D: BlockDevice>(
    cache: &mut BlockCache<D>,
    used: u32,
) -> Result<()> {
    let bitmap_blocks = cache.num_blocks().div_ceil(BITS_PER_BLOCK);
    for i in 0..bitmap_blocks {
        let block_id = BITMAP_START + i;
        cache.zero(block_id)?;
        cache.block_mut(block_id)?.fill(0xff);
    }
    for block_id in 0..used {
        let (bitmap_block, byte, mask) = bit_position(block_id);
        cache.block_mut(bitmap_block)?[byte] &= !mask;
    }
    for i in 0..bitmap_blocks {
        cache.flush_block(BITMAP_START + i)?;
    }
    Ok(())
}
