//! Byte-level access to inode contents.

use crate::block_dev::BlockDevice;
use crate::cache::BlockCache;
use crate::config::*;
use crate::error::{FsError, Result};
use crate::inode::{bmap, get_block, truncate_blocks};
use crate::structs::Inode;

/// Reads up to `buf.len()` bytes starting at `offset`, never past `inode.size`.
/// Holes read as zeros. Returns the number of bytes read, 0 at or after EOF.
pub fn inode_read<D: BlockDevice>(
    cache: &mut BlockCache<D>,
    inode: &mut Inode,
    offset: u64,
    buf: &mut [u8],
) -> Result<usize> {
    if offset >= inode.size {
        return Ok(0);
    }
    let count = (buf.len() as u64).min(inode.size - offset) as usize;

    let mut done = 0;
    while done < count {
        let pos = offset + done as u64;
        let block_off = (pos % BLOCK_SIZE as u64) as usize;
        let n = (BLOCK_SIZE - block_off).min(count - done);
        let dst = &mut buf[done..done + n];
        match bmap(cache, inode, pos / BLOCK_SIZE as u64)? {
            Some(block) => dst.copy_from_slice(&cache.block(block)?[block_off..block_off + n]),
            None => dst.fill(0),
        }
        done += n;
    }
    Ok(count)
}

/// Writes `data` at `offset`, growing the file first if the write ends past EOF.
/// Missing blocks are allocated as they are reached.
pub fn inode_write<D: BlockDevice>(
    cache: &mut BlockCache<D>,
    inode: &mut Inode,
    offset: u64,
    data: &[u8],
) -> Result<usize> {
    let end = offset
        .checked_add(data.len() as u64)
        .ok_or(FsError::InvalidArgument)?;
    if end > inode.size {
        set_size(cache, inode, end)?;
    }

    let mut done = 0;
    while done < data.len() {
        let pos = offset + done as u64;
        let block_off = (pos % BLOCK_SIZE as u64) as usize;
        let n = (BLOCK_SIZE - block_off).min(data.len() - done);
        let block = get_block(cache, inode, pos / BLOCK_SIZE as u64)?;
        cache.block_mut(block)?[block_off..block_off + n].copy_from_slice(&data[done..done + n]);
        cache.schedule_flush(block);
        done += n;
    }
    Ok(data.len())
}

/// Sets `inode.size`. Shrinking frees the blocks past the new end; growing
/// allocates nothing, so the new range reads as zeros until written.
pub fn set_size<D: BlockDevice>(
    cache: &mut BlockCache<D>,
    inode: &mut Inode,
    new_size: u64,
) -> Result<()> {
    if new_size > MAX_FILE_SIZE {
        return Err(FsError::InvalidArgument);
    }
    if new_size < inode.size {
        truncate_blocks(cache, inode, new_size)?;
        // Zero the tail of the last kept block so a later extension reads zeros.
        let tail = (new_size % BLOCK_SIZE as u64) as usize;
        if tail != 0 {
            if let Some(block) = bmap(cache, inode, new_size / BLOCK_SIZE as u64)? {
                cache.block_mut(block)?[tail..].fill(0);
                cache.schedule_flush(block);
            }
        }
    }
    inode.size = new_size;
    Ok(())
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::bitmap::init_bitmap;
    use crate::testutil::MemDisk;

    fn fresh() -> (BlockCache<MemDisk>, Inode) {
        let mut cache = BlockCache::new(Arc::new(MemDisk::new(64)), 64);
        init_bitmap(&mut cache, 2).unwrap();
        let inode = Inode {
            mode: S_IFREG | 0o644,
            nlink: 1,
            ..Inode::default()
        };
        (cache, inode)
    }

    #[test]
    fn test_unaligned_write_spans_blocks() {
        let (mut cache, mut inode) = fresh();
        let data: Vec<u8> = (0..BLOCK_SIZE + 100).map(|i| i as u8).collect();
        assert_eq!(inode_write(&mut cache, &mut inode, 4000, &data).unwrap(), data.len());
        assert_eq!(inode.size, 4000 + data.len() as u64);

        let mut buf = vec![0xffu8; data.len() + 50];
        assert_eq!(inode_read(&mut cache, &mut inode, 4000, &mut buf).unwrap(), data.len());
        assert_eq!(&buf[..data.len()], &data[..]);

        // The unwritten prefix of block 0 is zero.
        let mut head = [0xffu8; 16];
        inode_read(&mut cache, &mut inode, 0, &mut head).unwrap();
        assert_eq!(head, [0u8; 16]);
    }

    #[test]
    fn test_read_past_eof() {
        let (mut cache, mut inode) = fresh();
        inode_write(&mut cache, &mut inode, 0, b"abc").unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(inode_read(&mut cache, &mut inode, 3, &mut buf).unwrap(), 0);
        assert_eq!(inode_read(&mut cache, &mut inode, 100, &mut buf).unwrap(), 0);
        assert_eq!(inode_read(&mut cache, &mut inode, 1, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"bc");
    }

    #[test]
    fn test_grow_is_sparse() {
        let (mut cache, mut inode) = fresh();
        set_size(&mut cache, &mut inode, 20 * BLOCK_SIZE as u64).unwrap();
        assert_eq!(inode.direct, [0; N_DIRECT]);
        assert_eq!(inode.indirect, 0);

        let mut buf = vec![0xffu8; 3 * BLOCK_SIZE];
        let n = inode_read(&mut cache, &mut inode, 9 * BLOCK_SIZE as u64, &mut buf).unwrap();
        assert_eq!(n, buf.len());
        assert!(buf.iter().all(|&b| b == 0));
        assert_eq!(inode.indirect, 0);
    }

    #[test]
    fn test_shrink_then_grow_reads_zeros() {
        let (mut cache, mut inode) = fresh();
        inode_write(&mut cache, &mut inode, 0, &[7u8; 100]).unwrap();
        set_size(&mut cache, &mut inode, 10).unwrap();
        set_size(&mut cache, &mut inode, 100).unwrap();
        let mut buf = [0xffu8; 100];
        inode_read(&mut cache, &mut inode, 0, &mut buf).unwrap();
        assert_eq!(&buf[..10], &[7u8; 10]);
        assert!(buf[10..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_size_limit() {
        let (mut cache, mut inode) = fresh();
        assert!(matches!(
            set_size(&mut cache, &mut inode, MAX_FILE_SIZE + 1),
            Err(FsError::InvalidArgument)
        ));
        assert!(matches!(
            inode_write(&mut cache, &mut inode, u64::MAX, b"x"),
            Err(FsError::InvalidArgument)
        ));
        assert_eq!(inode.size, 0);
    }
}
