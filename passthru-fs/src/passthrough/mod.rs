//! A filesystem that mirrors a directory of the host.
//!
//! Every request is re-issued against the same path below the root directory,
//! or against the descriptor of a file opened earlier, and the result is
//! relayed back unchanged.

use std::ffi::{CString, OsStr, OsString};
use std::io;
use std::ops::ControlFlow;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use nix::sys::stat::Mode;
use nix::sys::statvfs::Statvfs;

pub mod buf;
pub mod config;
pub mod dir;
mod fuse;
pub mod handle;
pub mod inode;
pub mod lock;
pub mod util;

pub use self::buf::{BufSource, FdRegion};
pub use self::config::{Capabilities, Config, LockKind};
pub use self::dir::{DirCursor, DirEntry};
pub use self::handle::{FileHandle, HandleMap};
pub use self::inode::{InodeTable, ROOT_INO};
pub use self::lock::{LockCmd, LockCoordinator, OfdLockCoordinator};

use self::util::{cstring, cvt, einval, enoent, enosys, eopnotsupp, is_fifo, stat_at, stat_fd};

/// Creates a passthrough filesystem mirroring `root`.
///
/// `cfg.root_dir` is replaced by `root`.
pub fn new_passthroughfs(root: impl AsRef<Path>, mut cfg: Config) -> io::Result<PassthroughFs> {
    cfg.root_dir = root.as_ref().to_path_buf();
    PassthroughFs::new(cfg)
}

/// What an operation acts on: an open file, or a path when none is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target<'a> {
    ByHandle(u64),
    ByPath(&'a OsStr),
}

impl<'a> Target<'a> {
    /// Picks the handle when the caller supplied one.
    pub fn new(path: Option<&'a OsStr>, fh: Option<u64>) -> io::Result<Self> {
        match (fh, path) {
            (Some(fh), _) => Ok(Target::ByHandle(fh)),
            (None, Some(path)) => Ok(Target::ByPath(path)),
            (None, None) => Err(enoent()),
        }
    }
}

/// New value of one timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetTime {
    /// Leave it unchanged.
    Omit,
    /// Current time.
    Now,
    At { sec: i64, nsec: u32 },
}

impl SetTime {
    fn to_timespec(self) -> libc::timespec {
        let (sec, nsec) = match self {
            SetTime::Omit => (0, libc::UTIME_OMIT),
            SetTime::Now => (0, libc::UTIME_NOW),
            SetTime::At { sec, nsec } => (sec, nsec as _),
        };
        libc::timespec {
            tv_sec: sec as libc::time_t,
            tv_nsec: nsec,
        }
    }
}

/// The passthrough filesystem.
///
/// Paths handed in are absolute within the mount (`/a/b`) and are resolved
/// below `Config::root_dir`.
pub struct PassthroughFs {
    root: OsString,
    cfg: Config,
    caps: Capabilities,
    handles: HandleMap<FileHandle>,
    dirs: HandleMap<Mutex<DirCursor>>,
    inodes: InodeTable,
}

impl PassthroughFs {
    /// Checks that the root is a directory and probes optional features.
    pub fn new(cfg: Config) -> io::Result<Self> {
        let root = cstring(cfg.root_dir.as_os_str())?;
        let st = nix::sys::stat::stat(root.as_c_str())?;
        if st.st_mode & libc::S_IFMT != libc::S_IFDIR {
            return Err(io::Error::from_raw_os_error(libc::ENOTDIR));
        }
        let caps = Capabilities::probe(&root, &cfg);
        Ok(Self::with_capabilities(cfg, caps))
    }

    /// Builds the filesystem with the given features, skipping the probe.
    pub fn with_capabilities(cfg: Config, caps: Capabilities) -> Self {
        let mut root = cfg.root_dir.as_os_str().as_bytes().to_vec();
        while root.last() == Some(&b'/') {
            root.pop();
        }
        let root_src = std::fs::metadata(&cfg.root_dir)
            .map(|meta| meta.ino())
            .unwrap_or(ROOT_INO);
        info!("passthrough root {:?} (ino {root_src})", cfg.root_dir);
        PassthroughFs {
            root: OsString::from_vec(root),
            cfg,
            caps,
            handles: HandleMap::new(),
            dirs: HandleMap::new(),
            inodes: InodeTable::new(root_src),
        }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    /// Host path of `path`.
    fn real_path(&self, path: &OsStr) -> io::Result<CString> {
        let mut full = Vec::with_capacity(self.root.len() + path.len() + 1);
        full.extend_from_slice(self.root.as_bytes());
        if !path.as_bytes().starts_with(b"/") {
            full.push(b'/');
        }
        full.extend_from_slice(path.as_bytes());
        CString::new(full).map_err(|_| einval())
    }

    fn file(&self, fh: u64) -> io::Result<Arc<FileHandle>> {
        self.handles.get(fh)
    }

    pub fn getattr(&self, target: Target<'_>) -> io::Result<libc::stat> {
        match target {
            Target::ByHandle(fh) => stat_fd(self.file(fh)?.as_raw_fd()),
            Target::ByPath(path) => stat_at(libc::AT_FDCWD, &self.real_path(path)?),
        }
    }

    pub fn access(&self, path: &OsStr, mask: u32) -> io::Result<()> {
        let path = self.real_path(path)?;
        // SAFETY: `path` is NUL terminated.
        cvt(unsafe { libc::access(path.as_ptr(), mask as libc::c_int) })?;
        Ok(())
    }

    /// Reads the target of a symlink into `buf`.
    ///
    /// The target is cut to `buf.len() - 1` bytes and NUL terminated. Returns
    /// the number of bytes before the NUL.
    pub fn readlink(&self, path: &OsStr, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Err(einval());
        }
        let path = self.real_path(path)?;
        let cap = buf.len() - 1;
        // SAFETY: `buf` has room for `cap` bytes.
        let n = cvt(unsafe {
            libc::readlink(path.as_ptr(), buf.as_mut_ptr() as *mut libc::c_char, cap)
        })? as usize;
        buf[n] = 0;
        Ok(n)
    }

    pub fn mknod(&self, path: &OsStr, mode: u32, rdev: u64) -> io::Result<()> {
        let path = self.real_path(path)?;
        if is_fifo(mode) {
            nix::unistd::mkfifo(
                path.as_c_str(),
                Mode::from_bits_truncate((mode & 0o7777) as libc::mode_t),
            )?;
            return Ok(());
        }
        // SAFETY: `path` is NUL terminated.
        cvt(unsafe { libc::mknod(path.as_ptr(), mode as libc::mode_t, rdev as libc::dev_t) })?;
        Ok(())
    }

    pub fn mkdir(&self, path: &OsStr, mode: u32) -> io::Result<()> {
        let path = self.real_path(path)?;
        // SAFETY: `path` is NUL terminated.
        cvt(unsafe { libc::mkdir(path.as_ptr(), mode as libc::mode_t) })?;
        Ok(())
    }

    pub fn unlink(&self, path: &OsStr) -> io::Result<()> {
        let path = self.real_path(path)?;
        // SAFETY: `path` is NUL terminated.
        cvt(unsafe { libc::unlink(path.as_ptr()) })?;
        Ok(())
    }

    pub fn rmdir(&self, path: &OsStr) -> io::Result<()> {
        let path = self.real_path(path)?;
        // SAFETY: `path` is NUL terminated.
        cvt(unsafe { libc::rmdir(path.as_ptr()) })?;
        Ok(())
    }

    /// Creates `link` pointing at `target`. The target is stored as given.
    pub fn symlink(&self, target: &OsStr, link: &OsStr) -> io::Result<()> {
        let target = cstring(target)?;
        let link = self.real_path(link)?;
        // SAFETY: both strings are NUL terminated.
        cvt(unsafe { libc::symlink(target.as_ptr(), link.as_ptr()) })?;
        Ok(())
    }

    /// Renames `from` to `to`. Any rename flag is rejected with `EINVAL`.
    pub fn rename(&self, from: &OsStr, to: &OsStr, flags: u32) -> io::Result<()> {
        if flags != 0 {
            return Err(einval());
        }
        let from = self.real_path(from)?;
        let to = self.real_path(to)?;
        // SAFETY: both paths are NUL terminated.
        cvt(unsafe { libc::rename(from.as_ptr(), to.as_ptr()) })?;
        Ok(())
    }

    pub fn link(&self, from: &OsStr, to: &OsStr) -> io::Result<()> {
        let from = self.real_path(from)?;
        let to = self.real_path(to)?;
        // SAFETY: both paths are NUL terminated.
        cvt(unsafe { libc::link(from.as_ptr(), to.as_ptr()) })?;
        Ok(())
    }

    pub fn chmod(&self, target: Target<'_>, mode: u32) -> io::Result<()> {
        let mode = mode as libc::mode_t;
        match target {
            Target::ByHandle(fh) => {
                let file = self.file(fh)?;
                // SAFETY: the descriptor stays open while `file` is held.
                cvt(unsafe { libc::fchmod(file.as_raw_fd(), mode) })?;
            }
            Target::ByPath(path) => {
                let path = self.real_path(path)?;
                // SAFETY: `path` is NUL terminated.
                cvt(unsafe { libc::chmod(path.as_ptr(), mode) })?;
            }
        }
        Ok(())
    }

    /// Changes ownership; `None` leaves that id unchanged. A path that names
    /// a symlink changes the link itself.
    pub fn chown(&self, target: Target<'_>, uid: Option<u32>, gid: Option<u32>) -> io::Result<()> {
        let uid = uid.unwrap_or(u32::MAX) as libc::uid_t;
        let gid = gid.unwrap_or(u32::MAX) as libc::gid_t;
        match target {
            Target::ByHandle(fh) => {
                let file = self.file(fh)?;
                // SAFETY: the descriptor stays open while `file` is held.
                cvt(unsafe { libc::fchown(file.as_raw_fd(), uid, gid) })?;
            }
            Target::ByPath(path) => {
                let path = self.real_path(path)?;
                // SAFETY: `path` is NUL terminated.
                cvt(unsafe { libc::lchown(path.as_ptr(), uid, gid) })?;
            }
        }
        Ok(())
    }

    pub fn truncate(&self, target: Target<'_>, size: u64) -> io::Result<()> {
        let size = size as libc::off_t;
        match target {
            Target::ByHandle(fh) => {
                let file = self.file(fh)?;
                // SAFETY: the descriptor stays open while `file` is held.
                cvt(unsafe { libc::ftruncate(file.as_raw_fd(), size) })?;
            }
            Target::ByPath(path) => {
                let path = self.real_path(path)?;
                // SAFETY: `path` is NUL terminated.
                cvt(unsafe { libc::truncate(path.as_ptr(), size) })?;
            }
        }
        Ok(())
    }

    /// Sets access and modification times with nanosecond precision. A path
    /// that names a symlink changes the link itself.
    pub fn utimens(&self, target: Target<'_>, atime: SetTime, mtime: SetTime) -> io::Result<()> {
        if !self.caps.utimens {
            return Err(enosys());
        }
        let times = [atime.to_timespec(), mtime.to_timespec()];
        match target {
            Target::ByHandle(fh) => {
                let file = self.file(fh)?;
                // SAFETY: `times` holds two timespecs.
                cvt(unsafe { libc::futimens(file.as_raw_fd(), times.as_ptr()) })?;
            }
            Target::ByPath(path) => {
                let path = self.real_path(path)?;
                // SAFETY: `path` is NUL terminated and `times` holds two
                // timespecs.
                cvt(unsafe {
                    libc::utimensat(
                        libc::AT_FDCWD,
                        path.as_ptr(),
                        times.as_ptr(),
                        libc::AT_SYMLINK_NOFOLLOW,
                    )
                })?;
            }
        }
        Ok(())
    }

    fn open_file(&self, path: &OsStr, flags: u32, mode: u32) -> io::Result<u64> {
        let real = self.real_path(path)?;
        let oflags = flags as libc::c_int | libc::O_CLOEXEC;
        // SAFETY: `real` is NUL terminated.
        let fd = cvt(unsafe { libc::open(real.as_ptr(), oflags, mode as libc::c_uint) })?;
        // SAFETY: `fd` was just opened and is owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        let fh = self.handles.insert(FileHandle::new(fd, flags))?;
        debug!("open {path:?} flags={flags:#o} fh={fh}");
        Ok(fh)
    }

    /// Creates and opens a file, returning its handle.
    pub fn create(&self, path: &OsStr, mode: u32, flags: u32) -> io::Result<u64> {
        self.open_file(path, flags | libc::O_CREAT as u32, mode)
    }

    /// Opens an existing file, returning its handle.
    pub fn open(&self, path: &OsStr, flags: u32) -> io::Result<u64> {
        self.open_file(path, flags, 0)
    }

    /// Positioned read; a short count is not an error.
    pub fn read(&self, fh: u64, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let file = self.file(fh)?;
        buf::pread(file.as_raw_fd(), buf, offset)
    }

    /// Positioned write; a short count is not an error.
    pub fn write(&self, fh: u64, data: &[u8], offset: u64) -> io::Result<usize> {
        let file = self.file(fh)?;
        buf::pwrite(file.as_raw_fd(), data, offset)
    }

    /// Describes `len` bytes at `offset` of an open file without reading them.
    pub fn read_buf(&self, fh: u64, len: usize, offset: u64) -> io::Result<FdRegion> {
        Ok(FdRegion::new(self.file(fh)?, offset, len))
    }

    /// Copies `src` into an open file at `offset`.
    pub fn write_buf(&self, fh: u64, src: &BufSource<'_>, offset: u64) -> io::Result<usize> {
        let file = self.file(fh)?;
        src.copy_to(file.as_raw_fd(), offset)
    }

    pub fn statfs(&self, path: &OsStr) -> io::Result<Statvfs> {
        let path = self.real_path(path)?;
        Ok(nix::sys::statvfs::statvfs(path.as_c_str())?)
    }

    /// Reports pending close errors of an open file without closing it.
    ///
    /// Closing a duplicate descriptor makes filesystems such as NFS flush and
    /// return their deferred write errors. Like a `close(2)`, it also drops
    /// the byte-range locks `lock_owner` holds on the file.
    pub fn flush(&self, fh: u64, lock_owner: u64) -> io::Result<()> {
        let file = self.file(fh)?;
        if let Some(coordinator) = &self.caps.lock {
            coordinator.unlock_owner(&file, lock_owner);
        }
        let dup = file.try_clone_fd()?;
        // SAFETY: `dup` is owned here and closed exactly once.
        cvt(unsafe { libc::close(dup.into_raw_fd()) })?;
        Ok(())
    }

    /// Forgets a handle. The descriptor closes once in-flight operations on
    /// it finish; close errors are dropped.
    pub fn release(&self, fh: u64) {
        match self.handles.remove(fh) {
            Some(_) => debug!("release fh={fh}"),
            None => debug!("release of unknown fh={fh}"),
        }
    }

    pub fn fsync(&self, fh: u64, datasync: bool) -> io::Result<()> {
        let file = self.file(fh)?;
        let fd = file.as_raw_fd();
        // SAFETY: the descriptor stays open while `file` is held.
        #[cfg(target_os = "linux")]
        let res = unsafe {
            if datasync {
                libc::fdatasync(fd)
            } else {
                libc::fsync(fd)
            }
        };
        #[cfg(not(target_os = "linux"))]
        let res = {
            let _ = datasync;
            // SAFETY: as above.
            unsafe { libc::fsync(fd) }
        };
        cvt(res)?;
        Ok(())
    }

    /// Reserves space for `[offset, offset + len)`. Only mode 0 is supported.
    pub fn fallocate(&self, fh: u64, mode: u32, offset: u64, len: u64) -> io::Result<()> {
        if mode != 0 || !self.caps.fallocate {
            return Err(eopnotsupp());
        }
        let file = self.file(fh)?;
        sys::fallocate(file.as_raw_fd(), offset, len)
    }

    fn check_xattr(&self) -> io::Result<()> {
        if self.caps.xattr {
            Ok(())
        } else {
            Err(eopnotsupp())
        }
    }

    #[cfg(target_os = "linux")]
    pub fn setxattr(&self, path: &OsStr, name: &OsStr, value: &[u8], flags: u32) -> io::Result<()> {
        self.check_xattr()?;
        let path = self.real_path(path)?;
        let name = cstring(name)?;
        // SAFETY: strings are NUL terminated and `value` is valid for its
        // length.
        cvt(unsafe {
            libc::lsetxattr(
                path.as_ptr(),
                name.as_ptr(),
                value.as_ptr() as *const libc::c_void,
                value.len(),
                flags as libc::c_int,
            )
        })?;
        Ok(())
    }

    /// Reads an xattr value into `buf`. An empty `buf` only queries the size.
    #[cfg(target_os = "linux")]
    pub fn getxattr(&self, path: &OsStr, name: &OsStr, buf: &mut [u8]) -> io::Result<usize> {
        self.check_xattr()?;
        let path = self.real_path(path)?;
        let name = cstring(name)?;
        // SAFETY: strings are NUL terminated and `buf` is valid for its
        // length.
        let n = cvt(unsafe {
            libc::lgetxattr(
                path.as_ptr(),
                name.as_ptr(),
                xattr_buf(buf),
                buf.len(),
            )
        })?;
        Ok(n as usize)
    }

    /// Lists xattr names into `buf`. An empty `buf` only queries the size.
    #[cfg(target_os = "linux")]
    pub fn listxattr(&self, path: &OsStr, buf: &mut [u8]) -> io::Result<usize> {
        self.check_xattr()?;
        let path = self.real_path(path)?;
        // SAFETY: `path` is NUL terminated and `buf` is valid for its length.
        let n = cvt(unsafe {
            libc::llistxattr(
                path.as_ptr(),
                xattr_buf(buf) as *mut libc::c_char,
                buf.len(),
            )
        })?;
        Ok(n as usize)
    }

    #[cfg(target_os = "linux")]
    pub fn removexattr(&self, path: &OsStr, name: &OsStr) -> io::Result<()> {
        self.check_xattr()?;
        let path = self.real_path(path)?;
        let name = cstring(name)?;
        // SAFETY: both strings are NUL terminated.
        cvt(unsafe { libc::lremovexattr(path.as_ptr(), name.as_ptr()) })?;
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    pub fn setxattr(&self, _: &OsStr, _: &OsStr, _: &[u8], _: u32) -> io::Result<()> {
        self.check_xattr()?;
        Err(eopnotsupp())
    }

    #[cfg(not(target_os = "linux"))]
    pub fn getxattr(&self, _: &OsStr, _: &OsStr, _: &mut [u8]) -> io::Result<usize> {
        self.check_xattr()?;
        Err(eopnotsupp())
    }

    #[cfg(not(target_os = "linux"))]
    pub fn listxattr(&self, _: &OsStr, _: &mut [u8]) -> io::Result<usize> {
        self.check_xattr()?;
        Err(eopnotsupp())
    }

    #[cfg(not(target_os = "linux"))]
    pub fn removexattr(&self, _: &OsStr, _: &OsStr) -> io::Result<()> {
        self.check_xattr()?;
        Err(eopnotsupp())
    }

    /// Runs a byte-range lock request through the configured coordinator.
    ///
    /// Fails with `ENOSYS` when there is none, which makes the kernel keep
    /// the locks itself.
    pub fn lock(
        &self,
        fh: u64,
        cmd: LockCmd,
        lock: &mut libc::flock,
        owner: u64,
    ) -> io::Result<()> {
        let coordinator = self.caps.lock.as_ref().ok_or_else(enosys)?;
        let file = self.file(fh)?;
        coordinator.lock(&file, cmd, lock, owner)
    }

    /// Whole-file advisory lock (`LOCK_SH`, `LOCK_EX`, `LOCK_UN`, optionally
    /// with `LOCK_NB`).
    pub fn flock(&self, fh: u64, op: i32) -> io::Result<()> {
        let file = self.file(fh)?;
        // SAFETY: the descriptor stays open while `file` is held.
        cvt(unsafe { libc::flock(file.as_raw_fd(), op) })?;
        Ok(())
    }

    /// Copies `len` bytes between two open files inside the kernel. Returns
    /// the number of bytes copied, which may be less than `len`.
    pub fn copy_file_range(
        &self,
        fh_in: u64,
        offset_in: u64,
        fh_out: u64,
        offset_out: u64,
        len: u64,
        flags: u64,
    ) -> io::Result<usize> {
        if !self.caps.copy_file_range {
            return Err(eopnotsupp());
        }
        let file_in = self.file(fh_in)?;
        let file_out = self.file(fh_out)?;
        sys::copy_file_range(
            file_in.as_raw_fd(),
            offset_in,
            file_out.as_raw_fd(),
            offset_out,
            len,
            flags,
        )
    }

    /// `lseek(2)` on an open file; `SEEK_DATA` and `SEEK_HOLE` are relayed.
    pub fn lseek(&self, fh: u64, offset: i64, whence: i32) -> io::Result<u64> {
        let file = self.file(fh)?;
        // SAFETY: the descriptor stays open while `file` is held.
        let pos = cvt(unsafe { libc::lseek(file.as_raw_fd(), offset as libc::off_t, whence) })?;
        Ok(pos as u64)
    }

    /// Opens a directory for listing, returning its handle.
    pub fn opendir(&self, path: &OsStr) -> io::Result<u64> {
        let real = self.real_path(path)?;
        let cursor = DirCursor::open(&real)?;
        let fh = self.dirs.insert(Mutex::new(cursor))?;
        debug!("opendir {path:?} fh={fh}");
        Ok(fh)
    }

    /// Lists an open directory from `offset`, see [`DirCursor::read`].
    ///
    /// `plus` only takes effect when the readdirplus capability is on.
    pub fn readdir<F>(&self, fh: u64, offset: i64, plus: bool, sink: F) -> io::Result<()>
    where
        F: FnMut(&DirEntry, i64) -> ControlFlow<()>,
    {
        let cursor = self.dirs.get(fh)?;
        let mut cursor = cursor.lock().unwrap_or_else(PoisonError::into_inner);
        cursor.read(offset, plus && self.caps.readdir_plus, sink)
    }

    pub fn releasedir(&self, fh: u64) {
        match self.dirs.remove(fh) {
            Some(_) => debug!("releasedir fh={fh}"),
            None => debug!("releasedir of unknown fh={fh}"),
        }
    }
}

#[cfg(target_os = "linux")]
mod sys {
    use std::io;
    use std::os::fd::RawFd;

    use super::util::cvt;

    pub(super) fn fallocate(fd: RawFd, offset: u64, len: u64) -> io::Result<()> {
        // posix_fallocate reports failure through its return value.
        // SAFETY: `fd` is an open descriptor owned by the caller.
        let rc = unsafe { libc::posix_fallocate(fd, offset as libc::off_t, len as libc::off_t) };
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
        Ok(())
    }

    pub(super) fn copy_file_range(
        fd_in: RawFd,
        offset_in: u64,
        fd_out: RawFd,
        offset_out: u64,
        len: u64,
        flags: u64,
    ) -> io::Result<usize> {
        let mut off_in = offset_in as libc::loff_t;
        let mut off_out = offset_out as libc::loff_t;
        // SAFETY: both descriptors are open and the offsets point to live
        // locals.
        let n = cvt(unsafe {
            libc::copy_file_range(
                fd_in,
                &mut off_in,
                fd_out,
                &mut off_out,
                len as usize,
                flags as libc::c_uint,
            )
        })?;
        Ok(n as usize)
    }
}

#[cfg(not(target_os = "linux"))]
mod sys {
    use std::io;
    use std::os::fd::RawFd;

    use super::util::eopnotsupp;

    pub(super) fn fallocate(_: RawFd, _: u64, _: u64) -> io::Result<()> {
        Err(eopnotsupp())
    }

    pub(super) fn copy_file_range(
        _: RawFd,
        _: u64,
        _: RawFd,
        _: u64,
        _: u64,
        _: u64,
    ) -> io::Result<usize> {
        Err(eopnotsupp())
    }
}

#[cfg(target_os = "linux")]
fn xattr_buf(buf: &mut [u8]) -> *mut libc::c_void {
    if buf.is_empty() {
        std::ptr::null_mut()
    } else {
        buf.as_mut_ptr() as *mut libc::c_void
    }
}
