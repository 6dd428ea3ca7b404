//! Path resolution.

use alloc::vec::Vec;

use crate::block_dev::BlockDevice;
use crate::cache::BlockCache;
use crate::config::{NAME_MAX, PATH_MAX};
use crate::directory::{DirentRef, dir_lookup};
use crate::error::{FsError, Result};
use crate::inode::read_inode;

/// Outcome of walking a path from the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolved<'a> {
    /// Every component exists. `parent` and `dirent` are `None` for the root.
    Found {
        parent: Option<u32>,
        inum: u32,
        dirent: Option<DirentRef>,
    },
    /// Everything but the final component exists; `name` would live in `parent`.
    Missing { parent: u32, name: &'a str },
}

impl Resolved<'_> {
    /// The resolved inode, or `NotFound` for a final-component miss.
    pub fn inum(&self) -> Result<u32> {
        match *self {
            Self::Found { inum, .. } => Ok(inum),
            Self::Missing { .. } => Err(FsError::NotFound),
        }
    }
}

/// Splits `path` into its non-empty components, checking length limits.
pub fn components(path: &str) -> Result<Vec<&str>> {
    if path.len() >= PATH_MAX {
        return Err(FsError::NameTooLong);
    }
    let names: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if names.iter().any(|name| name.len() >= NAME_MAX) {
        return Err(FsError::NameTooLong);
    }
    Ok(names)
}

/// Walks `path` from the directory inode `root`.
///
/// A miss on the last component yields `Resolved::Missing`; a miss anywhere
/// else is `NotFound`. Walking through anything but a directory is `NotDirectory`.
pub fn walk_path<'a, D: BlockDevice>(
    cache: &mut BlockCache<D>,
    root: u32,
    path: &'a str,
) -> Result<Resolved<'a>> {
    let names = components(path)?;
    let mut parent = None;
    let mut inum = root;
    let mut dirent = None;

    for (i, &name) in names.iter().enumerate() {
        let mut dir = read_inode(cache, inum)?;
        if !dir.is_dir() {
            return Err(FsError::NotDirectory);
        }
        match dir_lookup(cache, &mut dir, name) {
            Ok((at, child)) => {
                parent = Some(inum);
                inum = child;
                dirent = Some(at);
            }
            Err(FsError::NotFound) if i + 1 == names.len() => {
                return Ok(Resolved::Missing { parent: inum, name });
            }
            Err(err) => return Err(err),
        }
    }

    Ok(Resolved::Found {
        parent,
        inum,
        dirent,
    })
}

/// Whether walking to the parent of `path`'s final component passes through
/// the directory `inum`. Stops with `false` at the first missing component.
pub fn passes_through<D: BlockDevice>(
    cache: &mut BlockCache<D>,
    root: u32,
    path: &str,
    inum: u32,
) -> Result<bool> {
    let names = components(path)?;
    let Some((_, dirs)) = names.split_last() else {
        return Ok(false);
    };
    let mut cur = root;
    for &name in dirs {
        if cur == inum {
            return Ok(true);
        }
        let mut dir = read_inode(cache, cur)?;
        if !dir.is_dir() {
            return Ok(false);
        }
        match dir_lookup(cache, &mut dir, name) {
            Ok((_, child)) => cur = child,
            Err(FsError::NotFound) => return Ok(false),
            Err(err) => return Err(err),
        }
    }
    Ok(cur == inum)
}
