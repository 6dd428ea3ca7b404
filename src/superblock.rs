use alloc::boxed::Box;
use std::sync::Arc;

use log::debug;

use crate::bitmap::init_bitmap;
use crate::block_dev::BlockDevice;
use crate::cache::BlockCache;
use crate::config::*;
use crate::error::{FsError, Result};
use crate::inode::write_inode;
use crate::structs::{Inode, SuperBlock};

/// Reads and validates block 0 straight from the device.
pub fn read_superblock<D: BlockDevice>(device: &D) -> Result<SuperBlock> {
    let mut buf = Box::new([0u8; BLOCK_SIZE]);
    device.read_block(SUPERBLOCK_ID, buf.as_mut_slice())?;
    let superblock = SuperBlock::decode(buf.as_slice())?;
    if superblock.num_blocks > device.num_blocks() {
        return Err(FsError::InvalidSuperBlock);
    }
    Ok(superblock)
}

/// Writes block 0 and flushes the device.
pub fn write_superblock<D: BlockDevice>(device: &D, superblock: &SuperBlock) -> Result<()> {
    let mut buf = Box::new([0u8; BLOCK_SIZE]);
    superblock.encode(buf.as_mut_slice());
    device.write_block(SUPERBLOCK_ID, buf.as_slice())?;
    device.flush()
}

/// Lays out an empty volume: superblock, bitmap, and a root directory in the
/// first block after the bitmap. Everything else is left free.
pub fn format_fs<D: BlockDevice>(
    device: Arc<D>,
    options: &FormatOptions,
) -> Result<(SuperBlock, BlockCache<D>)> {
    let num_blocks = options.num_blocks;
    if num_blocks > device.num_blocks() {
        return Err(FsError::InvalidArgument);
    }
    let root = BITMAP_START + SuperBlock::bitmap_blocks(num_blocks);
    if root >= num_blocks {
        return Err(FsError::InvalidArgument);
    }

    let superblock = SuperBlock::new(num_blocks, root);
    write_superblock(&*device, &superblock)?;

    let mut cache = BlockCache::new(device, num_blocks);
    init_bitmap(&mut cache, root + 1)?;

    let root_inode = Inode {
        owner: options.root_owner,
        group: options.root_group,
        mode: S_IFDIR | (options.root_perm & PERM_MASK),
        nlink: 1,
        atime: options.time,
        ctime: options.time,
        mtime: options.time,
        ..Inode::default()
    };
    cache.zero(root)?;
    write_inode(&mut cache, root, &root_inode)?;
    cache.sync()?;

    debug!("formatted {} blocks, root inode {}", num_blocks, root);
    Ok((superblock, cache))
}
