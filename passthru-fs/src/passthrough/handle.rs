use std::collections::HashMap;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use super::util::{ebadf, enomem};

/// An open file of the underlying filesystem.
///
/// The descriptor is closed when the last reference goes away, so an
/// operation that is still running keeps it alive across a racing release.
#[derive(Debug)]
pub struct FileHandle {
    fd: OwnedFd,
    flags: u32,
}

impl FileHandle {
    pub fn new(fd: OwnedFd, flags: u32) -> Self {
        FileHandle { fd, flags }
    }

    /// Open flags the file was opened with.
    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub(crate) fn try_clone_fd(&self) -> io::Result<OwnedFd> {
        self.fd.try_clone()
    }
}

impl AsFd for FileHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for FileHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Registry mapping opaque tokens handed to the kernel to open objects.
///
/// Tokens start at 1 and only grow, so a token is never bound to a second
/// object.
pub struct HandleMap<T> {
    next_handle: AtomicU64,
    handles: RwLock<HashMap<u64, Arc<T>>>,
}

impl<T> Default for HandleMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandleMap<T> {
    pub fn new() -> Self {
        HandleMap {
            next_handle: AtomicU64::new(1),
            handles: RwLock::new(HashMap::new()),
        }
    }

    /// Binds `value` to a fresh token.
    ///
    /// Fails with `ENOMEM` when the registry cannot grow; `value` is dropped
    /// in that case.
    pub fn insert(&self, value: T) -> io::Result<u64> {
        let mut handles = self.handles.write().unwrap_or_else(PoisonError::into_inner);
        handles.try_reserve(1).map_err(|_| enomem())?;
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        handles.insert(handle, Arc::new(value));
        Ok(handle)
    }

    pub fn get(&self, handle: u64) -> io::Result<Arc<T>> {
        self.handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle)
            .cloned()
            .ok_or_else(ebadf)
    }

    pub fn remove(&self, handle: u64) -> Option<Arc<T>> {
        self.handles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle)
    }

    pub fn len(&self) -> usize {
        self.handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_never_reused() {
        let map = HandleMap::new();
        let a = map.insert("a").unwrap();
        let b = map.insert("b").unwrap();
        assert_ne!(a, 0);
        assert!(b > a);

        assert_eq!(*map.remove(a).unwrap(), "a");
        let c = map.insert("c").unwrap();
        assert!(c > b);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn unknown_token_is_ebadf() {
        let map: HandleMap<u32> = HandleMap::new();
        let err = map.get(42).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
        assert!(map.remove(42).is_none());
        assert!(map.is_empty());
    }

    #[test]
    fn removed_entry_stays_alive_for_holders() {
        let map = HandleMap::new();
        let h = map.insert(vec![1u8, 2, 3]).unwrap();
        let held = map.get(h).unwrap();
        map.remove(h);
        assert_eq!(*held, vec![1, 2, 3]);
        assert!(map.get(h).is_err());
    }
}
