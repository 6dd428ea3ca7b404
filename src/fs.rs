use alloc::string::String;
use alloc::vec::Vec;
use std::sync::Arc;

use log::debug;

use crate::bitmap::count_free;
use crate::block_dev::BlockDevice;
use crate::cache::BlockCache;
use crate::config::*;
use crate::directory::{
    DirentRef, clear_dirent, dir_add_entry, dir_alloc_dirent, dir_entries, dir_is_empty,
    write_dirent,
};
use crate::error::{FsError, Result};
use crate::file::{inode_read, inode_write, set_size};
use crate::inode::{alloc_inode, count_blocks, free_inode, owned_blocks, read_inode, write_inode};
use crate::path::{Resolved, passes_through, walk_path};
use crate::structs::{DirEntry, FileType, Inode, SuperBlock, now};
use crate::superblock::{format_fs, read_superblock};

/// Metadata reported for one inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub ino: u32,
    pub mode: u32,
    pub nlink: u16,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub size: u64,
    /// Allocated data blocks; holes are not counted.
    pub blocks: u64,
    pub blksize: u32,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
}

/// Volume-wide usage figures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatFs {
    pub bsize: u32,
    pub blocks: u32,
    pub bfree: u32,
    pub bavail: u32,
    pub namemax: u32,
    pub fsid: u32,
}

/// A mounted volume. Every operation takes `&mut self`; callers that share a
/// volume between threads wrap it in a lock.
pub struct FileSystem<D: BlockDevice> {
    cache: BlockCache<D>,
    superblock: SuperBlock,
}

impl<D: BlockDevice> FileSystem<D> {
    /// Writes an empty volume onto `device` and mounts it.
    pub fn format(device: Arc<D>, options: &FormatOptions) -> Result<Self> {
        let (superblock, cache) = format_fs(device, options)?;
        Ok(Self { cache, superblock })
    }

    pub fn mount(device: Arc<D>) -> Result<Self> {
        let superblock = read_superblock(&*device)?;
        let mut cache = BlockCache::new(device, superblock.num_blocks);
        if !read_inode(&mut cache, superblock.root)?.is_dir() {
            return Err(FsError::InvalidSuperBlock);
        }
        debug!(
            "mounted {} blocks, root inode {}",
            superblock.num_blocks, superblock.root
        );
        Ok(Self { cache, superblock })
    }

    pub fn superblock(&self) -> &SuperBlock {
        &self.superblock
    }

    pub fn root_inum(&self) -> u32 {
        self.superblock.root
    }

    pub fn device(&self) -> Arc<D> {
        Arc::clone(self.cache.device())
    }

    pub fn inode(&mut self, inum: u32) -> Result<Inode> {
        read_inode(&mut self.cache, inum)
    }

    fn store(&mut self, inum: u32, inode: &Inode) -> Result<()> {
        write_inode(&mut self.cache, inum, inode)
    }

    /// Resolves `path` to its inode and, except for the root, its entry.
    fn resolve(&mut self, path: &str) -> Result<(Option<DirentRef>, u32)> {
        match walk_path(&mut self.cache, self.superblock.root, path)? {
            Resolved::Found { inum, dirent, .. } => Ok((dirent, inum)),
            Resolved::Missing { .. } => Err(FsError::NotFound),
        }
    }

    /// Like `resolve`, but refuses the root directory.
    fn resolve_non_root(&mut self, path: &str) -> Result<(DirentRef, u32)> {
        match self.resolve(path)? {
            (Some(at), inum) => Ok((at, inum)),
            (None, _) => Err(FsError::PermissionDenied),
        }
    }

    /// Adds a new, all-zero inode at `path` and returns its number.
    /// The caller fills in type, link count, ownership and times.
    pub fn create(&mut self, path: &str) -> Result<u32> {
        let (parent, name) = match walk_path(&mut self.cache, self.superblock.root, path)? {
            Resolved::Found { .. } => return Err(FsError::AlreadyExists),
            Resolved::Missing { parent, name } => (parent, name),
        };
        // Reject a bad name before anything is allocated.
        DirEntry::new(0, name)?;

        // The inode comes first so a full volume cannot leave the parent grown.
        let inum = alloc_inode(&mut self.cache)?;
        let mut dir = self.inode(parent)?;
        let slot = dir_alloc_dirent(&mut self.cache, &mut dir);
        self.store(parent, &dir)?;
        let at = match slot {
            Ok(at) => at,
            Err(err) => {
                free_inode(&mut self.cache, inum)?;
                return Err(err);
            }
        };
        write_dirent(&mut self.cache, at, &DirEntry::new(inum, name)?)?;
        debug!("create {:?} -> inode {}", path, inum);
        Ok(inum)
    }

    /// Resolves `path` without changing anything.
    pub fn open(&mut self, path: &str) -> Result<u32> {
        walk_path(&mut self.cache, self.superblock.root, path)?.inum()
    }

    /// Reads from `inum` at `offset`. Does not touch any timestamp.
    pub fn read(&mut self, inum: u32, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut inode = self.inode(inum)?;
        inode_read(&mut self.cache, &mut inode, offset, buf)
    }

    /// Writes to `inum` at `offset`, growing it as needed. Does not touch any
    /// timestamp. The inode is written back even if the write fails part way,
    /// so blocks mapped before the failure stay accounted for.
    pub fn write(&mut self, inum: u32, offset: u64, data: &[u8]) -> Result<usize> {
        let mut inode = self.inode(inum)?;
        let written = inode_write(&mut self.cache, &mut inode, offset, data);
        self.store(inum, &inode)?;
        written
    }

    pub fn set_size(&mut self, inum: u32, size: u64) -> Result<()> {
        let mut inode = self.inode(inum)?;
        let resized = set_size(&mut self.cache, &mut inode, size);
        self.store(inum, &inode)?;
        resized
    }

    /// Removes the entry at `path`. The inode and its blocks are released
    /// once its last link is gone.
    pub fn unlink(&mut self, path: &str) -> Result<()> {
        let (at, inum) = self.resolve_non_root(path)?;
        let mut inode = self.inode(inum)?;
        clear_dirent(&mut self.cache, at)?;
        inode.nlink = inode.nlink.saturating_sub(1);
        self.store(inum, &inode)?;
        debug!("unlink {:?}: inode {} has {} links", path, inum, inode.nlink);
        if inode.nlink == 0 {
            free_inode(&mut self.cache, inum)?;
        }
        Ok(())
    }

    /// Adds `dst` as another name for the file at `src`. Directories cannot be
    /// hard linked.
    pub fn link(&mut self, src: &str, dst: &str) -> Result<()> {
        let inum = self.open(src)?;
        let mut inode = self.inode(inum)?;
        if inode.is_dir() {
            return Err(FsError::PermissionDenied);
        }
        inode.ctime = now();
        self.store(inum, &inode)?;
        self.link_inode(inum, dst)
    }

    fn link_inode(&mut self, inum: u32, dst: &str) -> Result<()> {
        let (parent, name) = match walk_path(&mut self.cache, self.superblock.root, dst)? {
            Resolved::Found { .. } => return Err(FsError::AlreadyExists),
            Resolved::Missing { parent, name } => (parent, name),
        };
        let mut inode = self.inode(inum)?;
        if inode.nlink == u16::MAX {
            return Err(FsError::InvalidArgument);
        }

        let mut dir = self.inode(parent)?;
        let added = dir_add_entry(&mut self.cache, &mut dir, name, inum);
        self.store(parent, &dir)?;
        added?;

        inode.nlink += 1;
        self.store(inum, &inode)?;
        debug!("link inode {} as {:?}", inum, dst);
        Ok(())
    }

    pub fn stat(&mut self, inum: u32) -> Result<Stat> {
        let mut inode = self.inode(inum)?;
        let blocks = count_blocks(&mut self.cache, &mut inode)?;
        Ok(Stat {
            ino: inum,
            mode: inode.mode,
            nlink: inode.nlink,
            uid: inode.owner,
            gid: inode.group,
            rdev: inode.rdev,
            size: inode.size,
            blocks,
            blksize: BLOCK_SIZE as u32,
            atime: inode.atime,
            mtime: inode.mtime,
            ctime: inode.ctime,
        })
    }

    /// Creates a node of any type at `path` with one link and fresh timestamps.
    pub fn mknod(&mut self, path: &str, mode: u32, rdev: u32, uid: u32, gid: u32) -> Result<u32> {
        let inum = self.create(path)?;
        let time = now();
        let inode = Inode {
            owner: uid,
            group: gid,
            mode,
            rdev,
            nlink: 1,
            atime: time,
            ctime: time,
            mtime: time,
            ..Inode::default()
        };
        self.store(inum, &inode)?;
        Ok(inum)
    }

    pub fn mkdir(&mut self, path: &str, perm: u32, uid: u32, gid: u32) -> Result<u32> {
        self.mknod(path, S_IFDIR | (perm & 0o777), 0, uid, gid)
    }

    /// Unlinks a non-directory.
    pub fn remove_file(&mut self, path: &str) -> Result<()> {
        let inum = self.open(path)?;
        let mut inode = self.inode(inum)?;
        if inode.is_dir() {
            return Err(FsError::IsDirectory);
        }
        inode.ctime = now();
        self.store(inum, &inode)?;
        self.unlink(path)
    }

    /// Removes an empty directory other than the root.
    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        let (_, inum) = self.resolve_non_root(path)?;
        let mut dir = self.inode(inum)?;
        if !dir.is_dir() {
            return Err(FsError::NotDirectory);
        }
        if !dir_is_empty(&mut self.cache, &mut dir)? {
            return Err(FsError::NotEmpty);
        }
        self.unlink(path)
    }

    /// Moves `src` to `dst`, replacing whatever `dst` names. Renaming an entry
    /// onto itself does nothing. A directory cannot move below itself.
    pub fn rename(&mut self, src: &str, dst: &str) -> Result<()> {
        let (src_at, inum) = self.resolve_non_root(src)?;
        if self.inode(inum)?.is_dir()
            && passes_through(&mut self.cache, self.superblock.root, dst, inum)?
        {
            return Err(FsError::InvalidArgument);
        }
        match self.link_inode(inum, dst) {
            Ok(()) => {}
            Err(FsError::AlreadyExists) => {
                let (dst_at, target) = self.resolve_non_root(dst)?;
                if dst_at == src_at {
                    return Ok(());
                }
                let src_is_dir = self.inode(inum)?.is_dir();
                let mut victim = self.inode(target)?;
                match (src_is_dir, victim.is_dir()) {
                    (false, true) => return Err(FsError::IsDirectory),
                    (true, false) => return Err(FsError::NotDirectory),
                    (true, true) if !dir_is_empty(&mut self.cache, &mut victim)? => {
                        return Err(FsError::NotEmpty);
                    }
                    _ => {}
                }
                self.unlink(dst)?;
                self.link_inode(inum, dst)?;
            }
            Err(err) => return Err(err),
        }
        self.unlink(src)
    }

    /// Creates a symbolic link at `path` whose content is `target`.
    pub fn symlink(&mut self, target: &str, path: &str, uid: u32, gid: u32) -> Result<u32> {
        if target.len() >= PATH_MAX {
            return Err(FsError::NameTooLong);
        }
        let parent = match walk_path(&mut self.cache, self.superblock.root, path)? {
            Resolved::Found { .. } => return Err(FsError::AlreadyExists),
            Resolved::Missing { parent, .. } => parent,
        };
        let dir_size = self.inode(parent)?.size;
        let inum = self.mknod(path, S_IFLNK | 0o777, 0, uid, gid)?;
        if let Err(err) = self.write(inum, 0, target.as_bytes()) {
            self.unlink(path)?;
            // A block the parent grew for this entry now holds no entries.
            self.set_size(parent, dir_size)?;
            return Err(err);
        }
        Ok(inum)
    }

    pub fn readlink(&mut self, path: &str) -> Result<String> {
        let inum = self.open(path)?;
        let mut inode = self.inode(inum)?;
        if inode.file_type() != Some(FileType::Symlink) {
            return Err(FsError::InvalidArgument);
        }
        let mut buf = vec![0u8; inode.size.min(PATH_MAX as u64) as usize];
        let n = inode_read(&mut self.cache, &mut inode, 0, &mut buf)?;
        buf.truncate(n);
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Names and inode numbers of the entries of the directory at `path`, in slot order.
    pub fn readdir(&mut self, path: &str) -> Result<Vec<(String, u32)>> {
        let inum = self.open(path)?;
        let mut dir = self.inode(inum)?;
        let entries = dir_entries(&mut self.cache, &mut dir)?;
        dir.atime = now();
        self.store(inum, &dir)?;
        Ok(entries
            .into_iter()
            .map(|(_, entry)| (entry.name_str(), entry.inum))
            .collect())
    }

    /// Replaces the permission bits; the file type is kept.
    pub fn chmod(&mut self, path: &str, mode: u32) -> Result<()> {
        let (_, inum) = self.resolve_non_root(path)?;
        let mut inode = self.inode(inum)?;
        inode.mode = (inode.mode & S_IFMT) | (mode & PERM_MASK);
        inode.ctime = now();
        self.store(inum, &inode)
    }

    /// `None` leaves the corresponding id unchanged.
    pub fn chown(&mut self, path: &str, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        let (_, inum) = self.resolve_non_root(path)?;
        let mut inode = self.inode(inum)?;
        if let Some(uid) = uid {
            inode.owner = uid;
        }
        if let Some(gid) = gid {
            inode.group = gid;
        }
        inode.ctime = now();
        self.store(inum, &inode)
    }

    pub fn utimens(&mut self, path: &str, atime: Option<i64>, mtime: Option<i64>) -> Result<()> {
        let inum = self.open(path)?;
        let mut inode = self.inode(inum)?;
        if let Some(atime) = atime {
            inode.atime = atime;
        }
        if let Some(mtime) = mtime {
            inode.mtime = mtime;
        }
        inode.ctime = now();
        self.store(inum, &inode)
    }

    pub fn truncate(&mut self, path: &str, size: u64) -> Result<()> {
        let inum = self.open(path)?;
        let mut inode = self.inode(inum)?;
        if inode.is_dir() {
            return Err(FsError::IsDirectory);
        }
        let resized = set_size(&mut self.cache, &mut inode, size);
        let time = now();
        inode.mtime = time;
        inode.ctime = time;
        self.store(inum, &inode)?;
        resized
    }

    /// `read`, refusing directories and bumping the access time.
    pub fn read_at(&mut self, inum: u32, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut inode = self.inode(inum)?;
        if inode.is_dir() {
            return Err(FsError::IsDirectory);
        }
        let n = inode_read(&mut self.cache, &mut inode, offset, buf)?;
        inode.atime = now();
        self.store(inum, &inode)?;
        Ok(n)
    }

    /// `write`, refusing directories and bumping the modification time.
    pub fn write_at(&mut self, inum: u32, offset: u64, data: &[u8]) -> Result<usize> {
        let mut inode = self.inode(inum)?;
        if inode.is_dir() {
            return Err(FsError::IsDirectory);
        }
        let written = inode_write(&mut self.cache, &mut inode, offset, data);
        let time = now();
        inode.mtime = time;
        inode.ctime = time;
        self.store(inum, &inode)?;
        written
    }

    pub fn statfs(&mut self) -> Result<StatFs> {
        let bfree = count_free(&mut self.cache)?;
        Ok(StatFs {
            bsize: BLOCK_SIZE as u32,
            blocks: self.superblock.num_blocks,
            bfree,
            bavail: bfree,
            namemax: (NAME_MAX - 1) as u32,
            fsid: self.superblock.magic,
        })
    }

    /// Writes back one inode's data blocks, pointer tables and the inode itself.
    pub fn fsync(&mut self, inum: u32) -> Result<()> {
        let mut inode = self.inode(inum)?;
        for block in owned_blocks(&mut self.cache, &mut inode)? {
            self.cache.flush_block(block)?;
        }
        self.cache.flush_block(inum)?;
        self.cache.device().flush()
    }

    /// Writes back every modified block.
    pub fn sync(&mut self) -> Result<()> {
        self.cache.sync()
    }
}
