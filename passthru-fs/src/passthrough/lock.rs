//! Byte-range lock delegation.
//!
//! POSIX record locks belong to a process, so a daemon serving many clients
//! cannot hold them on their behalf with plain `fcntl`. The filesystem hands
//! lock requests to a [`LockCoordinator`] together with the lock owner the
//! kernel reports instead. Without a coordinator the request fails with
//! `ENOSYS`, and the kernel falls back to keeping the locks locally.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use super::handle::FileHandle;

/// Lock command of a byte-range lock request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockCmd {
    /// Test for a conflicting lock (`F_GETLK`).
    Get,
    /// Acquire or release without waiting (`F_SETLK`).
    Set,
    /// Acquire, waiting for conflicting locks to go away (`F_SETLKW`).
    SetWait,
}

/// External coordinator for byte-range locks.
pub trait LockCoordinator: Send + Sync + fmt::Debug {
    /// Runs `cmd` for `owner` against the file behind `file`.
    ///
    /// For [`LockCmd::Get`] the conflicting lock, if any, is written back into
    /// `lock`; otherwise `l_type` becomes `F_UNLCK`.
    fn lock(
        &self,
        file: &FileHandle,
        cmd: LockCmd,
        lock: &mut libc::flock,
        owner: u64,
    ) -> io::Result<()>;

    /// Drops every lock `owner` holds on the file behind `file`. Called when
    /// the owner closes a descriptor of that file.
    fn unlock_owner(&self, file: &FileHandle, owner: u64);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct OwnerKey {
    dev: u64,
    ino: u64,
    owner: u64,
}

/// Coordinator backed by Linux open file description locks.
///
/// Each (file, owner) pair gets a private description, reopened from the
/// handle through `/proc/self/fd`. Owners therefore conflict with each other
/// even when they share a handle, while one owner never conflicts with itself
/// across handles of the same file. The description is closed, and its locks
/// dropped, by [`LockCoordinator::unlock_owner`].
#[derive(Debug, Default)]
pub struct OfdLockCoordinator {
    owners: Mutex<HashMap<OwnerKey, Arc<std::os::fd::OwnedFd>>>,
}

impl OfdLockCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of owners holding a description.
    pub fn owners(&self) -> usize {
        self.owners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn key(file: &FileHandle, owner: u64) -> io::Result<OwnerKey> {
        use std::os::fd::AsRawFd;

        let st = super::util::stat_fd(file.as_raw_fd())?;
        Ok(OwnerKey {
            dev: st.st_dev as u64,
            ino: st.st_ino as u64,
            owner,
        })
    }

    #[cfg(target_os = "linux")]
    fn description(
        &self,
        file: &FileHandle,
        key: OwnerKey,
        create: bool,
    ) -> io::Result<Option<Arc<std::os::fd::OwnedFd>>> {
        use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

        let mut owners = self.owners.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(fd) = owners.get(&key) {
            return Ok(Some(fd.clone()));
        }
        if !create {
            return Ok(None);
        }
        owners.try_reserve(1).map_err(|_| super::util::enomem())?;
        let proc_path = super::util::cstring(std::ffi::OsStr::new(&format!(
            "/proc/self/fd/{}",
            file.as_raw_fd()
        )))?;
        let flags = (file.flags() as libc::c_int & libc::O_ACCMODE) | libc::O_CLOEXEC;
        // SAFETY: `proc_path` is NUL terminated.
        let fd = super::util::cvt(unsafe { libc::open(proc_path.as_ptr(), flags) })?;
        // SAFETY: `fd` was just opened and is owned by nobody else.
        let fd = Arc::new(unsafe { OwnedFd::from_raw_fd(fd) });
        debug!(
            "ofd description for owner {:#x} on {}:{}",
            key.owner, key.dev, key.ino
        );
        owners.insert(key, fd.clone());
        Ok(Some(fd))
    }
}

impl LockCoordinator for OfdLockCoordinator {
    #[cfg(target_os = "linux")]
    fn lock(
        &self,
        file: &FileHandle,
        cmd: LockCmd,
        lock: &mut libc::flock,
        owner: u64,
    ) -> io::Result<()> {
        use std::os::fd::AsRawFd;

        let key = Self::key(file, owner)?;
        // An owner without a description holds nothing to unlock.
        let unlocking = cmd != LockCmd::Get && lock.l_type == libc::F_UNLCK as libc::c_short;
        let Some(fd) = self.description(file, key, !unlocking)? else {
            return Ok(());
        };
        let op = match cmd {
            LockCmd::Get => libc::F_OFD_GETLK,
            LockCmd::Set => libc::F_OFD_SETLK,
            LockCmd::SetWait => libc::F_OFD_SETLKW,
        };
        // OFD locks require l_pid to be zero on input.
        lock.l_pid = 0;
        trace!("ofd lock fd={} cmd={:?} owner={:#x}", fd.as_raw_fd(), cmd, owner);
        // The table lock is not held here, so a waiting SETLKW blocks nobody
        // but its caller.
        // SAFETY: `lock` points to a valid flock structure for the whole call.
        super::util::cvt(unsafe { libc::fcntl(fd.as_raw_fd(), op, lock as *mut libc::flock) })?;
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    fn lock(
        &self,
        _file: &FileHandle,
        _cmd: LockCmd,
        _lock: &mut libc::flock,
        _owner: u64,
    ) -> io::Result<()> {
        Err(super::util::eopnotsupp())
    }

    fn unlock_owner(&self, file: &FileHandle, owner: u64) {
        let key = match Self::key(file, owner) {
            Ok(key) => key,
            Err(e) => {
                warn!("cannot drop locks of owner {owner:#x}: {e}");
                return;
            }
        };
        let dropped = self
            .owners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);
        if dropped.is_some() {
            debug!("dropped locks of owner {owner:#x} on {}:{}", key.dev, key.ino);
        }
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::os::fd::{FromRawFd, OwnedFd};
    use std::os::unix::ffi::OsStrExt;

    fn open(path: &std::path::Path) -> FileHandle {
        let name = CString::new(path.as_os_str().as_bytes()).unwrap();
        let flags = libc::O_RDWR | libc::O_CREAT | libc::O_CLOEXEC;
        let fd = unsafe { libc::open(name.as_ptr(), flags, 0o644 as libc::c_uint) };
        assert!(fd >= 0);
        FileHandle::new(unsafe { OwnedFd::from_raw_fd(fd) }, libc::O_RDWR as u32)
    }

    fn range(l_type: i32, start: i64, len: i64) -> libc::flock {
        let mut lk: libc::flock = unsafe { std::mem::zeroed() };
        lk.l_type = l_type as libc::c_short;
        lk.l_whence = libc::SEEK_SET as libc::c_short;
        lk.l_start = start;
        lk.l_len = len;
        lk
    }

    #[test]
    fn owners_sharing_a_handle_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let file = open(&dir.path().join("f"));
        let locks = OfdLockCoordinator::new();

        let mut lk = range(libc::F_WRLCK, 0, 10);
        locks.lock(&file, LockCmd::Set, &mut lk, 1).unwrap();

        let mut other = range(libc::F_WRLCK, 5, 1);
        let err = locks.lock(&file, LockCmd::Set, &mut other, 2).unwrap_err();
        assert!(matches!(
            err.raw_os_error(),
            Some(libc::EAGAIN) | Some(libc::EACCES)
        ));

        // The holder itself may extend its own range.
        let mut again = range(libc::F_WRLCK, 5, 10);
        locks.lock(&file, LockCmd::Set, &mut again, 1).unwrap();
        assert_eq!(locks.owners(), 2);

        locks.unlock_owner(&file, 1);
        let mut retry = range(libc::F_WRLCK, 5, 1);
        locks.lock(&file, LockCmd::Set, &mut retry, 2).unwrap();
    }

    #[test]
    fn one_owner_across_handles_does_not_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let a = open(&dir.path().join("f"));
        let b = open(&dir.path().join("f"));
        let locks = OfdLockCoordinator::new();

        let mut lk = range(libc::F_WRLCK, 0, 10);
        locks.lock(&a, LockCmd::Set, &mut lk, 7).unwrap();
        let mut same = range(libc::F_WRLCK, 0, 10);
        locks.lock(&b, LockCmd::Set, &mut same, 7).unwrap();
        assert_eq!(locks.owners(), 1);
    }

    #[test]
    fn unlock_without_description_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let file = open(&dir.path().join("f"));
        let locks = OfdLockCoordinator::new();

        let mut lk = range(libc::F_UNLCK, 0, 0);
        locks.lock(&file, LockCmd::Set, &mut lk, 3).unwrap();
        assert_eq!(locks.owners(), 0);

        let mut query = range(libc::F_WRLCK, 0, 0);
        locks.lock(&file, LockCmd::Get, &mut query, 3).unwrap();
        assert_eq!(query.l_type, libc::F_UNLCK as libc::c_short);
    }
}
