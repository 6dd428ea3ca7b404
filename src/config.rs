pub const MAGIC: u32 = 0xC520_2F19;

pub const BLOCK_SIZE: usize = 4096;
pub const BITS_PER_BLOCK: u32 = (BLOCK_SIZE * 8) as u32;
pub const SUPERBLOCK_ID: u32 = 0; // Block ID for the superblock
pub const BITMAP_START: u32 = 1; // First bitmap block

pub const N_DIRECT: usize = 10; // Number of direct pointers in an inode
pub const PTRS_PER_BLOCK: usize = BLOCK_SIZE / 4; // 32-bit pointers
pub const N_INDIRECT: usize = PTRS_PER_BLOCK;
pub const N_DOUBLE: usize = PTRS_PER_BLOCK * N_INDIRECT;
pub const MAX_FILE_BLOCKS: u64 = (N_DIRECT + N_INDIRECT + N_DOUBLE) as u64;
pub const MAX_FILE_SIZE: u64 = MAX_FILE_BLOCKS * BLOCK_SIZE as u64;

pub const NAME_MAX: usize = 124; // Including the NUL terminator
pub const PATH_MAX: usize = 1024; // Including the NUL terminator
pub const DIRENT_SIZE: usize = 4 + NAME_MAX;
pub const DIRENTS_PER_BLOCK: usize = BLOCK_SIZE / DIRENT_SIZE;

// File type bits of `Inode::mode`.
pub const S_IFMT: u32 = 0o170000;
pub const S_IFSOCK: u32 = 0o140000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFBLK: u32 = 0o060000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFCHR: u32 = 0o020000;
pub const S_IFIFO: u32 = 0o010000;
pub const PERM_MASK: u32 = 0o7777;

/// Runtime parameters used when laying out a fresh volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatOptions {
    pub num_blocks: u32,
    pub root_owner: u32,
    pub root_group: u32,
    /// Permission bits of the root directory, the type bits are implied.
    pub root_perm: u32,
    /// Seconds since the epoch stamped on the root inode.
    pub time: i64,
}

impl FormatOptions {
    pub fn new(num_blocks: u32) -> Self {
        Self {
            num_blocks,
            ..Self::default()
        }
    }
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            num_blocks: 1024,
            root_owner: 0,
            root_group: 0,
            root_perm: 0o777,
            time: crate::structs::now(),
        }
    }
}
