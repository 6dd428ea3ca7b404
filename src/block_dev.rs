use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use crate::config::BLOCK_SIZE;
use crate::error::{FsError, Result};

pub trait BlockDevice: Send + Sync {
    /// Returns the number of blocks in the block device.
    fn num_blocks(&self) -> u32;

    /// Reads a block of data from the block device.
    /// buf.len() must be equal to BLOCK_SIZE.
    fn read_block(&self, block_id: u32, buf: &mut [u8]) -> Result<()>;

    /// Writes a block of data to the block device.
    /// buf.len() must be equal to BLOCK_SIZE.
    fn write_block(&self, block_id: u32, buf: &[u8]) -> Result<()>;

    /// Flushes any buffered data to stable storage.
    fn flush(&self) -> Result<()>;
}

/// Disk image backed by a regular file, accessed with positional I/O.
#[derive(Debug)]
pub struct FileDisk {
    file: File,
    num_blocks: u32,
}

impl FileDisk {
    /// Creates (or truncates) an image of `num_blocks` zeroed blocks.
    pub fn create(path: impl AsRef<Path>, num_blocks: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        file.set_len(u64::from(num_blocks) * BLOCK_SIZE as u64)?;
        Ok(Self { file, num_blocks })
    }

    /// Opens an existing image. Trailing bytes short of a full block are ignored.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;
        let len = file.metadata()?.len();
        let num_blocks =
            u32::try_from(len / BLOCK_SIZE as u64).map_err(|_| FsError::InvalidArgument)?;
        Ok(Self { file, num_blocks })
    }

    fn offset_of(&self, block_id: u32, len: usize) -> Result<u64> {
        if block_id >= self.num_blocks {
            return Err(FsError::InvalidBlockId(block_id));
        }
        if len != BLOCK_SIZE {
            return Err(FsError::InvalidArgument);
        }
        Ok(u64::from(block_id) * BLOCK_SIZE as u64)
    }
}

impl BlockDevice for FileDisk {
    fn num_blocks(&self) -> u32 {
        self.num_blocks
    }

    fn read_block(&self, block_id: u32, buf: &mut [u8]) -> Result<()> {
        let offset = self.offset_of(block_id, buf.len())?;
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn write_block(&self, block_id: u32, buf: &[u8]) -> Result<()> {
        let offset = self.offset_of(block_id, buf.len())?;
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_file_disk_rw() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.img");
        let disk = FileDisk::create(&path, 4).unwrap();
        assert_eq!(disk.num_blocks(), 4);

        let data = vec![0x5a_u8; BLOCK_SIZE];
        disk.write_block(3, &data).unwrap();
        disk.flush().unwrap();
        drop(disk);

        let disk = FileDisk::open(&path).unwrap();
        let mut buf = vec![0u8; BLOCK_SIZE];
        disk.read_block(3, &mut buf).unwrap();
        assert_eq!(buf, data);
        disk.read_block(2, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_file_disk_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let disk = FileDisk::create(dir.path().join("disk.img"), 2).unwrap();
        let mut buf = vec![0u8; BLOCK_SIZE];
        assert!(matches!(disk.read_block(2, &mut buf), Err(FsError::InvalidBlockId(2))));
        let mut short = vec![0u8; 16];
        assert!(matches!(disk.read_block(0, &mut short), Err(FsError::InvalidArgument)));
    }
}
