//! On-disk records and their little-endian encodings.
//!
//! Superblock (block 0):
//! | offset | field      |
//! |--------|------------|
//! | 0      | magic      |
//! | 4      | num_blocks |
//! | 8      | root       |
//!
//! Inode (offset 0 of its own block):
//! | offset | field        |
//! |--------|--------------|
//! | 0      | owner        |
//! | 4      | group        |
//! | 8      | mode         |
//! | 12     | rdev         |
//! | 16     | nlink (u16)  |
//! | 18     | atime (i64)  |
//! | 26     | ctime (i64)  |
//! | 34     | mtime (i64)  |
//! | 42     | size (u64)   |
//! | 50     | direct[10]   |
//! | 90     | indirect     |
//! | 94     | double       |
//!
//! Directory entry: `inum` (u32) followed by a NUL-padded name of `NAME_MAX` bytes.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::*;
use crate::error::{FsError, Result};

pub const INODE_SIZE: usize = 98;

fn get_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

fn get_u32(buf: &[u8], off: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[off..off + 4]);
    u32::from_le_bytes(b)
}

fn get_u64(buf: &[u8], off: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[off..off + 8]);
    u64::from_le_bytes(b)
}

fn put(buf: &mut [u8], off: usize, bytes: &[u8]) {
    buf[off..off + bytes.len()].copy_from_slice(bytes);
}

/// Seconds since the epoch, saturating to 0 for clocks set before 1970.
pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperBlock {
    pub magic: u32,      // Magic number to identify the filesystem
    pub num_blocks: u32, // Total number of blocks on the volume
    pub root: u32,       // Block number of the root directory inode
}

impl SuperBlock {
    pub fn new(num_blocks: u32, root: u32) -> Self {
        Self {
            magic: MAGIC,
            num_blocks,
            root,
        }
    }

    /// Number of bitmap blocks for a volume of `num_blocks` blocks.
    pub fn bitmap_blocks(num_blocks: u32) -> u32 {
        num_blocks.div_ceil(BITS_PER_BLOCK)
    }

    /// Decodes and validates a superblock.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let sb = Self {
            magic: get_u32(buf, 0),
            num_blocks: get_u32(buf, 4),
            root: get_u32(buf, 8),
        };
        if sb.magic != MAGIC {
            return Err(FsError::InvalidSuperBlock);
        }
        let reserved = BITMAP_START + Self::bitmap_blocks(sb.num_blocks);
        if sb.root < reserved || sb.root >= sb.num_blocks {
            return Err(FsError::InvalidSuperBlock);
        }
        Ok(sb)
    }

    pub fn encode(&self, buf: &mut [u8]) {
        put(buf, 0, &self.magic.to_le_bytes());
        put(buf, 4, &self.num_blocks.to_le_bytes());
        put(buf, 8, &self.root.to_le_bytes());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
    Special, // Devices, fifos and sockets
}

impl FileType {
    pub fn from_mode(mode: u32) -> Option<Self> {
        match mode & S_IFMT {
            S_IFREG => Some(Self::Regular),
            S_IFDIR => Some(Self::Directory),
            S_IFLNK => Some(Self::Symlink),
            S_IFCHR | S_IFBLK | S_IFIFO | S_IFSOCK => Some(Self::Special),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Inode {
    pub owner: u32,
    pub group: u32,
    pub mode: u32,
    pub rdev: u32,
    pub nlink: u16,
    pub atime: i64,
    pub ctime: i64,
    pub mtime: i64,
    pub size: u64,
    // A block is allocated iff its pointer is nonzero.
    pub direct: [u32; N_DIRECT],
    pub indirect: u32,
    pub double: u32,
}

impl Inode {
    pub fn decode(buf: &[u8]) -> Self {
        let mut direct = [0u32; N_DIRECT];
        for (i, ptr) in direct.iter_mut().enumerate() {
            *ptr = get_u32(buf, 50 + i * 4);
        }
        Self {
            owner: get_u32(buf, 0),
            group: get_u32(buf, 4),
            mode: get_u32(buf, 8),
            rdev: get_u32(buf, 12),
            nlink: get_u16(buf, 16),
            atime: get_u64(buf, 18) as i64,
            ctime: get_u64(buf, 26) as i64,
            mtime: get_u64(buf, 34) as i64,
            size: get_u64(buf, 42),
            direct,
            indirect: get_u32(buf, 90),
            double: get_u32(buf, 94),
        }
    }

    pub fn encode(&self, buf: &mut [u8]) {
        put(buf, 0, &self.owner.to_le_bytes());
        put(buf, 4, &self.group.to_le_bytes());
        put(buf, 8, &self.mode.to_le_bytes());
        put(buf, 12, &self.rdev.to_le_bytes());
        put(buf, 16, &self.nlink.to_le_bytes());
        put(buf, 18, &self.atime.to_le_bytes());
        put(buf, 26, &self.ctime.to_le_bytes());
        put(buf, 34, &self.mtime.to_le_bytes());
        put(buf, 42, &self.size.to_le_bytes());
        for (i, ptr) in self.direct.iter().enumerate() {
            put(buf, 50 + i * 4, &ptr.to_le_bytes());
        }
        put(buf, 90, &self.indirect.to_le_bytes());
        put(buf, 94, &self.double.to_le_bytes());
    }

    pub fn file_type(&self) -> Option<FileType> {
        FileType::from_mode(self.mode)
    }

    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    /// Number of logical blocks covered by `size`.
    pub fn num_blocks(&self) -> u64 {
        self.size.div_ceil(BLOCK_SIZE as u64)
    }
}

/// Reads pointer `index` of an indirect or double-indirect block.
pub fn read_ptr(table: &[u8], index: usize) -> u32 {
    get_u32(table, index * 4)
}

pub fn write_ptr(table: &mut [u8], index: usize, value: u32) {
    put(table, index * 4, &value.to_le_bytes());
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub inum: u32,
    pub name: [u8; NAME_MAX],
}

impl DirEntry {
    pub const NULL: Self = Self {
        inum: 0,
        name: [0; NAME_MAX],
    };

    /// Builds an entry; the name must leave room for the NUL terminator.
    pub fn new(inum: u32, name: &str) -> Result<Self> {
        let bytes = name.as_bytes();
        if bytes.len() >= NAME_MAX {
            return Err(FsError::NameTooLong);
        }
        if bytes.is_empty() || bytes.contains(&b'/') || bytes.contains(&0) {
            return Err(FsError::InvalidArgument);
        }
        let mut entry = Self::NULL;
        entry.inum = inum;
        entry.name[..bytes.len()].copy_from_slice(bytes);
        Ok(entry)
    }

    /// Decodes slot `index` of a directory block.
    pub fn decode(block: &[u8], index: usize) -> Self {
        let off = index * DIRENT_SIZE;
        let mut name = [0u8; NAME_MAX];
        name.copy_from_slice(&block[off + 4..off + DIRENT_SIZE]);
        Self {
            inum: get_u32(block, off),
            name,
        }
    }

    pub fn encode(&self, block: &mut [u8], index: usize) {
        let off = index * DIRENT_SIZE;
        put(block, off, &self.inum.to_le_bytes());
        put(block, off + 4, &self.name);
    }

    /// Name bytes up to the first NUL.
    pub fn name_bytes(&self) -> &[u8] {
        let end = self.name.iter().position(|&c| c == 0).unwrap_or(NAME_MAX);
        &self.name[..end]
    }

    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(self.name_bytes()).into_owned()
    }

    /// An entry with an empty name is a free slot.
    pub fn is_empty(&self) -> bool {
        self.name[0] == 0
    }

    pub fn name_eq(&self, name: &str) -> bool {
        self.name_bytes() == name.as_bytes()
    }
}
