use std::ffi::{CStr, CString, OsStr};
use std::io;
use std::mem::MaybeUninit;
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStrExt;

/// Returns a "bad file descriptor" error, used for unknown handle tokens.
pub fn ebadf() -> io::Error {
    io::Error::from_raw_os_error(libc::EBADF)
}

/// Returns an "invalid argument" error.
pub fn einval() -> io::Error {
    io::Error::from_raw_os_error(libc::EINVAL)
}

/// Returns a "function not implemented" error.
pub fn enosys() -> io::Error {
    io::Error::from_raw_os_error(libc::ENOSYS)
}

/// Returns an "out of memory" error.
pub fn enomem() -> io::Error {
    io::Error::from_raw_os_error(libc::ENOMEM)
}

/// Returns a "no such file or directory" error.
pub fn enoent() -> io::Error {
    io::Error::from_raw_os_error(libc::ENOENT)
}

/// Returns an "operation not supported" error.
pub fn eopnotsupp() -> io::Error {
    io::Error::from_raw_os_error(libc::EOPNOTSUPP)
}

pub(crate) trait IsMinusOne {
    fn is_minus_one(&self) -> bool;
}

macro_rules! impl_is_minus_one {
    ($($t:ident)*) => ($(impl IsMinusOne for $t {
        fn is_minus_one(&self) -> bool {
            *self == -1
        }
    })*)
}

impl_is_minus_one! { i32 i64 isize }

/// Turns the `-1`/errno convention of a libc call into an `io::Result`.
pub(crate) fn cvt<T: IsMinusOne>(t: T) -> io::Result<T> {
    if t.is_minus_one() {
        Err(io::Error::last_os_error())
    } else {
        Ok(t)
    }
}

pub(crate) fn cstring(s: &OsStr) -> io::Result<CString> {
    CString::new(s.as_bytes()).map_err(|_| einval())
}

pub(crate) fn stat_fd(fd: RawFd) -> io::Result<libc::stat> {
    let mut st = MaybeUninit::<libc::stat>::zeroed();
    // SAFETY: `st` is a valid buffer for one `struct stat`.
    cvt(unsafe { libc::fstat(fd, st.as_mut_ptr()) })?;
    // SAFETY: fstat succeeded and filled the buffer.
    Ok(unsafe { st.assume_init() })
}

/// `fstatat` relative to `dirfd`, never following a trailing symlink.
pub(crate) fn stat_at(dirfd: RawFd, name: &CStr) -> io::Result<libc::stat> {
    let mut st = MaybeUninit::<libc::stat>::zeroed();
    // SAFETY: `name` is NUL terminated and `st` is a valid buffer.
    cvt(unsafe {
        libc::fstatat(
            dirfd,
            name.as_ptr(),
            st.as_mut_ptr(),
            libc::AT_SYMLINK_NOFOLLOW,
        )
    })?;
    // SAFETY: fstatat succeeded and filled the buffer.
    Ok(unsafe { st.assume_init() })
}

pub(crate) fn is_fifo(mode: u32) -> bool {
    (mode & libc::S_IFMT as u32) == libc::S_IFIFO as u32
}
