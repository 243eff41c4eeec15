//! Inode numbers handed to the kernel and the paths behind them.

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::sync::{PoisonError, RwLock};

use super::util::{enoent, enomem};

/// Inode number of the mount root.
pub const ROOT_INO: u64 = 1;

#[derive(Debug)]
struct InodeData {
    /// `None` once the name was unlinked or replaced.
    path: Option<OsString>,
    nlookup: u64,
}

/// Maps inode numbers known to the kernel to paths below the root.
///
/// Numbers are the `st_ino` of the source file, so `stat` through the mount
/// reports the host's inode numbers. The root directory is always
/// [`ROOT_INO`]; a source file whose `st_ino` is 1 takes the root's source
/// number in exchange.
///
/// Every entry reply counts one lookup and `forget` takes them back. An inode
/// is dropped when its count reaches zero. The root is never dropped.
#[derive(Debug)]
pub struct InodeTable {
    root_src: u64,
    inodes: RwLock<HashMap<u64, InodeData>>,
}

impl InodeTable {
    /// `root_src` is the source `st_ino` of the root directory.
    pub fn new(root_src: u64) -> Self {
        let mut inodes = HashMap::new();
        inodes.insert(
            ROOT_INO,
            InodeData {
                path: Some(OsString::from("/")),
                nlookup: 1,
            },
        );
        InodeTable {
            root_src,
            inodes: RwLock::new(inodes),
        }
    }

    /// Kernel inode number of a source inode number.
    pub fn remap(&self, src: u64) -> u64 {
        if src == self.root_src {
            ROOT_INO
        } else if src == ROOT_INO {
            self.root_src
        } else {
            src
        }
    }

    /// Path of `ino`, `ENOENT` when it is unknown or its name is gone.
    pub fn path(&self, ino: u64) -> io::Result<OsString> {
        self.inodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&ino)
            .and_then(|data| data.path.clone())
            .ok_or_else(enoent)
    }

    /// Counts one lookup of `ino`, reached through `path`.
    ///
    /// A hard link keeps the most recently looked up name.
    pub fn register(&self, ino: u64, path: &OsStr) -> io::Result<()> {
        if ino == ROOT_INO {
            return Ok(());
        }
        let mut inodes = self.inodes.write().unwrap_or_else(PoisonError::into_inner);
        inodes.try_reserve(1).map_err(|_| enomem())?;
        let data = inodes.entry(ino).or_insert(InodeData {
            path: None,
            nlookup: 0,
        });
        data.path = Some(path.to_os_string());
        data.nlookup += 1;
        Ok(())
    }

    /// Takes back `nlookup` lookups of `ino`.
    pub fn forget(&self, ino: u64, nlookup: u64) {
        if ino == ROOT_INO {
            return;
        }
        let mut inodes = self.inodes.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(data) = inodes.get_mut(&ino) {
            data.nlookup = data.nlookup.saturating_sub(nlookup);
            if data.nlookup == 0 {
                inodes.remove(&ino);
            }
        }
    }

    /// Detaches inodes reached through `path` or a name below it.
    pub fn unlink(&self, path: &OsStr) {
        let mut inodes = self.inodes.write().unwrap_or_else(PoisonError::into_inner);
        for (&ino, data) in inodes.iter_mut() {
            if ino == ROOT_INO {
                continue;
            }
            if data.path.as_deref().is_some_and(|p| is_within(p, path)) {
                data.path = None;
            }
        }
    }

    /// Moves inodes reached through `from`, or below it, to `to`. Whatever
    /// `to` named before is detached.
    pub fn rename(&self, from: &OsStr, to: &OsStr) {
        if from == to {
            return;
        }
        self.unlink(to);
        let mut inodes = self.inodes.write().unwrap_or_else(PoisonError::into_inner);
        for data in inodes.values_mut() {
            let Some(path) = data.path.as_deref() else {
                continue;
            };
            if is_within(path, from) {
                let mut moved = to.as_bytes().to_vec();
                moved.extend_from_slice(&path.as_bytes()[from.len()..]);
                data.path = Some(OsStr::from_bytes(&moved).to_os_string());
            }
        }
    }

    /// Number of inodes known, the root included.
    pub fn len(&self) -> usize {
        self.inodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `path` is `dir` itself or a name below it.
fn is_within(path: &OsStr, dir: &OsStr) -> bool {
    let (path, dir) = (path.as_bytes(), dir.as_bytes());
    path.starts_with(dir) && (path.len() == dir.len() || path[dir.len()] == b'/')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> &OsStr {
        OsStr::new(s)
    }

    #[test]
    fn root_is_always_known() {
        let table = InodeTable::new(2);
        assert_eq!(table.path(ROOT_INO).unwrap(), "/");
        table.forget(ROOT_INO, 100);
        assert_eq!(table.path(ROOT_INO).unwrap(), "/");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn remap_swaps_root_and_one() {
        let table = InodeTable::new(2);
        assert_eq!(table.remap(2), ROOT_INO);
        assert_eq!(table.remap(1), 2);
        assert_eq!(table.remap(77), 77);
    }

    #[test]
    fn lookups_are_counted_until_forgotten() {
        let table = InodeTable::new(2);
        table.register(10, p("/a")).unwrap();
        table.register(10, p("/a")).unwrap();
        table.forget(10, 1);
        assert_eq!(table.path(10).unwrap(), "/a");
        table.forget(10, 1);
        let err = table.path(10).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
        assert_eq!(table.len(), 1);

        // Forgetting more than was looked up, or something unknown, is
        // harmless.
        table.register(11, p("/b")).unwrap();
        table.forget(11, 5);
        table.forget(12, 1);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn rename_moves_the_subtree() {
        let table = InodeTable::new(2);
        table.register(10, p("/d")).unwrap();
        table.register(11, p("/d/f")).unwrap();
        table.register(12, p("/dd")).unwrap();
        table.register(13, p("/e")).unwrap();

        table.rename(p("/d"), p("/e"));
        assert_eq!(table.path(10).unwrap(), "/e");
        assert_eq!(table.path(11).unwrap(), "/e/f");
        // A sibling sharing the prefix stays put.
        assert_eq!(table.path(12).unwrap(), "/dd");
        // The replaced name no longer resolves.
        assert!(table.path(13).is_err());
    }

    #[test]
    fn unlinked_name_detaches_until_looked_up_again() {
        let table = InodeTable::new(2);
        table.register(10, p("/a")).unwrap();
        table.unlink(p("/a"));
        assert!(table.path(10).is_err());

        // A remaining hard link brings it back.
        table.register(10, p("/b")).unwrap();
        assert_eq!(table.path(10).unwrap(), "/b");
    }
}
