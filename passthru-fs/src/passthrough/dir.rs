//! Resumable directory listing.
//!
//! The kernel pages through a directory with offsets it got back from earlier
//! replies. A [`DirCursor`] keeps one OS directory stream per open directory
//! and translates those offsets into `seekdir` positions.

use std::ffi::{CStr, CString, OsString};
use std::io;
use std::ops::ControlFlow;
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStringExt;
use std::ptr::NonNull;

use nix::errno::Errno;

use super::util::{einval, stat_at};

/// One entry of a directory stream.
#[derive(Clone)]
pub struct DirEntry {
    pub name: OsString,
    pub ino: u64,
    /// `d_type` of the entry, `DT_UNKNOWN` when the filesystem does not say.
    pub kind: u8,
    /// Full attributes, present when the listing asked for them and
    /// `fstatat` succeeded.
    pub stat: Option<libc::stat>,
}

impl DirEntry {
    /// File mode of the entry; only the type bits are set without `stat`.
    pub fn mode(&self) -> u32 {
        match &self.stat {
            Some(st) => st.st_mode as u32,
            None => (self.kind as u32) << 12,
        }
    }
}

/// Owned `DIR*` stream, closed on drop.
pub struct DirStream {
    dir: NonNull<libc::DIR>,
}

// SAFETY: the stream is only used through `&mut self` and a DIR* has no
// thread affinity.
unsafe impl Send for DirStream {}

impl DirStream {
    pub fn open(path: &CStr) -> io::Result<Self> {
        // SAFETY: `path` is NUL terminated.
        let dir = unsafe { libc::opendir(path.as_ptr()) };
        NonNull::new(dir)
            .map(|dir| DirStream { dir })
            .ok_or_else(io::Error::last_os_error)
    }

    /// Next entry of the stream, `None` at the end.
    fn next_entry(&mut self) -> io::Result<Option<DirEntry>> {
        // readdir() reports both end of stream and failure with NULL; only
        // a changed errno tells them apart.
        Errno::clear();
        // SAFETY: `self.dir` is an open stream.
        let ent = unsafe { libc::readdir(self.dir.as_ptr()) };
        if ent.is_null() {
            let err = io::Error::last_os_error();
            return match err.raw_os_error() {
                Some(0) | None => Ok(None),
                Some(_) => Err(err),
            };
        }
        // SAFETY: a non-null dirent stays valid until the next call on the
        // stream; everything needed is copied out here.
        let ent = unsafe { &*ent };
        // SAFETY: d_name is NUL terminated.
        let name = unsafe { CStr::from_ptr(ent.d_name.as_ptr()) };
        Ok(Some(DirEntry {
            name: OsString::from_vec(name.to_bytes().to_vec()),
            ino: ent.d_ino as u64,
            kind: ent.d_type,
            stat: None,
        }))
    }

    fn tell(&self) -> i64 {
        // SAFETY: `self.dir` is an open stream.
        unsafe { libc::telldir(self.dir.as_ptr()) as i64 }
    }

    fn seek(&mut self, pos: i64) {
        // SAFETY: `self.dir` is an open stream; positions come from telldir.
        unsafe { libc::seekdir(self.dir.as_ptr(), pos as libc::c_long) }
    }

    fn rewind(&mut self) {
        // SAFETY: `self.dir` is an open stream.
        unsafe { libc::rewinddir(self.dir.as_ptr()) }
    }

    fn fd(&self) -> RawFd {
        // SAFETY: `self.dir` is an open stream.
        unsafe { libc::dirfd(self.dir.as_ptr()) }
    }

    fn stat_entry(&self, name: &OsString) -> io::Result<libc::stat> {
        let name = CString::new(name.clone().into_vec()).map_err(|_| einval())?;
        stat_at(self.fd(), &name)
    }
}

impl Drop for DirStream {
    fn drop(&mut self) {
        // SAFETY: the stream is open and never used again.
        if unsafe { libc::closedir(self.dir.as_ptr()) } == -1 {
            warn!("closedir failed: {}", io::Error::last_os_error());
        }
    }
}

// telldir() may hand out 0 for a real position, but offset 0 from the kernel
// means "start of the directory". Every position is shifted by one on the
// way out and back on the way in.
fn to_offset(pos: i64) -> i64 {
    pos.wrapping_add(1)
}

fn to_position(offset: i64) -> i64 {
    offset.wrapping_sub(1)
}

/// Iteration state of one open directory.
pub struct DirCursor {
    stream: DirStream,
    /// Entry read from the stream but not delivered yet.
    entry: Option<DirEntry>,
    /// Offset the next entry in the stream resumes from.
    offset: i64,
}

impl DirCursor {
    pub fn open(path: &CStr) -> io::Result<Self> {
        Ok(DirCursor {
            stream: DirStream::open(path)?,
            entry: None,
            offset: 0,
        })
    }

    /// Offset of the last delivered entry, 0 before the first one.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Hands entries starting at `offset` to `sink` until the directory is
    /// exhausted or `sink` breaks.
    ///
    /// `sink` gets each entry with the offset to resume after it. An entry
    /// the sink refuses stays cached, so a following call with the same
    /// offset starts with it. With `plus` set, entries carry `fstatat`
    /// attributes when they can be read.
    pub fn read<F>(&mut self, offset: i64, plus: bool, mut sink: F) -> io::Result<()>
    where
        F: FnMut(&DirEntry, i64) -> ControlFlow<()>,
    {
        if offset != self.offset {
            if offset == 0 {
                self.stream.rewind();
            } else {
                self.stream.seek(to_position(offset));
            }
            self.entry = None;
            self.offset = offset;
        }

        let mut delivered = 0usize;
        loop {
            if self.entry.is_none() {
                match self.stream.next_entry() {
                    Ok(Some(entry)) => self.entry = Some(entry),
                    Ok(None) => break,
                    // Entries already handed over in this call must reach the
                    // kernel; the error shows up again on the next call.
                    Err(e) if delivered > 0 => {
                        warn!("readdir stopped after {delivered} entries: {e}");
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
            let Some(entry) = self.entry.as_mut() else {
                break;
            };

            entry.stat = if plus {
                self.stream.stat_entry(&entry.name).ok()
            } else {
                None
            };

            let next = to_offset(self.stream.tell());
            if sink(entry, next).is_break() {
                break;
            }
            delivered += 1;
            self.entry = None;
            self.offset = next;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::ffi::OsStrExt;
    use tempfile::TempDir;

    fn fixture(names: &[&str]) -> (TempDir, CString) {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            fs::write(dir.path().join(name), name.as_bytes()).unwrap();
        }
        let path = CString::new(dir.path().as_os_str().as_bytes()).unwrap();
        (dir, path)
    }

    fn collect(cursor: &mut DirCursor, offset: i64) -> Vec<(OsString, i64)> {
        let mut out = Vec::new();
        cursor
            .read(offset, false, |entry, next| {
                out.push((entry.name.clone(), next));
                ControlFlow::Continue(())
            })
            .unwrap();
        out
    }

    fn names(entries: &[(OsString, i64)]) -> Vec<OsString> {
        entries.iter().map(|(n, _)| n.clone()).collect()
    }

    #[test]
    fn lists_all_entries_with_nonzero_offsets() {
        let (_dir, path) = fixture(&["a", "b", "c"]);
        let mut cursor = DirCursor::open(&path).unwrap();
        let entries = collect(&mut cursor, 0);

        let mut listed = names(&entries);
        listed.sort();
        assert_eq!(listed, [".", "..", "a", "b", "c"]);
        assert!(entries.iter().all(|(_, off)| *off != 0));
        assert_eq!(cursor.offset(), entries.last().unwrap().1);
    }

    #[test]
    fn stopped_entry_is_delivered_on_resume() {
        let (_dir, path) = fixture(&["a", "b", "c"]);
        let mut cursor = DirCursor::open(&path).unwrap();

        let mut first = Vec::new();
        cursor
            .read(0, false, |entry, next| {
                if first.len() == 1 {
                    return ControlFlow::Break(());
                }
                first.push((entry.name.clone(), next));
                ControlFlow::Continue(())
            })
            .unwrap();
        assert_eq!(first.len(), 1);

        let rest = collect(&mut cursor, first[0].1);
        let mut all = names(&first);
        all.extend(names(&rest));
        assert_eq!(all.len(), 5);
        all.sort();
        all.dedup();
        assert_eq!(all, [".", "..", "a", "b", "c"]);
    }

    #[test]
    fn out_of_order_offset_reseeks() {
        let (_dir, path) = fixture(&["a", "b", "c"]);
        let mut cursor = DirCursor::open(&path).unwrap();
        let full = collect(&mut cursor, 0);

        // Resume right after the second entry of an earlier listing.
        let resumed = collect(&mut cursor, full[1].1);
        assert_eq!(names(&resumed), names(&full[2..]));

        // Offset zero starts over.
        let again = collect(&mut cursor, 0);
        assert_eq!(names(&again), names(&full));
    }

    #[test]
    fn exhausted_stream_is_not_an_error() {
        let (_dir, path) = fixture(&[]);
        let mut cursor = DirCursor::open(&path).unwrap();
        let full = collect(&mut cursor, 0);
        assert_eq!(full.len(), 2);

        let off = cursor.offset();
        let end = collect(&mut cursor, off);
        assert!(end.is_empty());
    }

    #[test]
    fn plus_listing_carries_attributes() {
        let (_dir, path) = fixture(&["hello"]);
        let mut cursor = DirCursor::open(&path).unwrap();
        let mut seen = None;
        cursor
            .read(0, true, |entry, _| {
                if entry.name == "hello" {
                    seen = entry.stat.map(|st| (st.st_size, entry.mode()));
                }
                ControlFlow::Continue(())
            })
            .unwrap();
        let (size, mode) = seen.unwrap();
        assert_eq!(size, 5);
        assert_eq!(mode & libc::S_IFMT as u32, libc::S_IFREG as u32);
    }

    #[test]
    fn plain_listing_synthesizes_type_bits() {
        let (dir, path) = fixture(&[]);
        fs::create_dir(dir.path().join("sub")).unwrap();
        let mut cursor = DirCursor::open(&path).unwrap();
        let mut modes = Vec::new();
        cursor
            .read(0, false, |entry, _| {
                if entry.name == "sub" {
                    assert!(entry.stat.is_none());
                    assert_ne!(entry.ino, 0);
                    modes.push(entry.mode());
                }
                ControlFlow::Continue(())
            })
            .unwrap();
        // tmpfs and ext4 both fill d_type.
        assert_eq!(modes, [libc::S_IFDIR as u32]);
    }

    #[test]
    fn open_missing_directory_fails() {
        let (dir, _) = fixture(&[]);
        let missing = CString::new(dir.path().join("nope").as_os_str().as_bytes()).unwrap();
        let err = DirCursor::open(&missing).err().unwrap();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }

    #[test]
    fn offset_bias_round_trips() {
        for pos in [0i64, 1, 42, i64::MAX] {
            assert_ne!(to_offset(pos), 0);
            assert_eq!(to_position(to_offset(pos)), pos);
        }
    }
}
