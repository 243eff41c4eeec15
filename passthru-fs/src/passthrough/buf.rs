use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;

use bytes::Bytes;

use super::handle::FileHandle;
use super::util::{cvt, enomem};

const COPY_CHUNK: usize = 64 * 1024;

/// A byte range of an open file, described without reading it.
///
/// Returned by vectored reads so the data can be copied straight from the
/// descriptor into its destination.
pub struct FdRegion {
    handle: Arc<FileHandle>,
    pos: u64,
    len: usize,
}

impl FdRegion {
    pub(crate) fn new(handle: Arc<FileHandle>, pos: u64, len: usize) -> Self {
        FdRegion { handle, pos, len }
    }

    pub fn pos(&self) -> u64 {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Reads the region into memory with a single `pread`. A short count is
    /// passed on as is, like the read of an ordinary descriptor.
    pub fn to_bytes(&self) -> io::Result<Bytes> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(self.len).map_err(|_| enomem())?;
        buf.resize(self.len, 0);
        let n = loop {
            match pread(self.handle.as_raw_fd(), &mut buf, self.pos) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                res => break res?,
            }
        };
        buf.truncate(n);
        Ok(Bytes::from(buf))
    }
}

/// Source of a vectored write.
pub enum BufSource<'a> {
    /// Bytes already in memory.
    Memory(&'a [u8]),
    /// A range of another open file.
    Fd(&'a FdRegion),
}

impl BufSource<'_> {
    pub fn len(&self) -> usize {
        match self {
            BufSource::Memory(data) => data.len(),
            BufSource::Fd(region) => region.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies the whole source into `fd` at `offset`.
    ///
    /// Stops early on a short read or write and returns what was copied; an
    /// error is only reported when nothing could be copied.
    pub(crate) fn copy_to(&self, fd: RawFd, offset: u64) -> io::Result<usize> {
        match self {
            BufSource::Memory(data) => copy_loop(data.len(), |done| {
                pwrite(fd, &data[done..], offset + done as u64)
            }),
            BufSource::Fd(region) => {
                let mut chunk = Vec::new();
                chunk
                    .try_reserve_exact(COPY_CHUNK.min(region.len()))
                    .map_err(|_| enomem())?;
                chunk.resize(COPY_CHUNK.min(region.len()), 0);
                copy_loop(region.len(), |done| {
                    let want = chunk.len().min(region.len() - done);
                    let got = pread(
                        region.handle.as_raw_fd(),
                        &mut chunk[..want],
                        region.pos + done as u64,
                    )?;
                    if got == 0 {
                        return Ok(0);
                    }
                    // A short write here ends the copy through copy_loop.
                    pwrite(fd, &chunk[..got], offset + done as u64)
                })
            }
        }
    }
}

pub(crate) fn pread(fd: RawFd, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    // SAFETY: `buf` is valid for `buf.len()` bytes.
    let n = cvt(unsafe {
        libc::pread(
            fd,
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
            offset as libc::off_t,
        )
    })?;
    Ok(n as usize)
}

pub(crate) fn pwrite(fd: RawFd, buf: &[u8], offset: u64) -> io::Result<usize> {
    // SAFETY: `buf` is valid for `buf.len()` bytes.
    let n = cvt(unsafe {
        libc::pwrite(
            fd,
            buf.as_ptr() as *const libc::c_void,
            buf.len(),
            offset as libc::off_t,
        )
    })?;
    Ok(n as usize)
}

// Calls `step` with the number of bytes done so far until `total` is reached
// or a step transfers nothing.
fn copy_loop<F>(total: usize, mut step: F) -> io::Result<usize>
where
    F: FnMut(usize) -> io::Result<usize>,
{
    let mut done = 0;
    while done < total {
        match step(done) {
            Ok(0) => break,
            Ok(n) => done += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if done > 0 => {
                debug!("buffer copy stopped after {done} bytes: {e}");
                break;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(done)
}
