//! `Filesystem` implementation for [`PassthroughFs`].
//!
//! Inode numbers are turned into paths through the inode table, then each
//! request becomes a call of the matching inherent operation of
//! `PassthroughFs`; `io::Error`s become `Errno`s through `?`.

use std::ffi::{OsStr, OsString};
use std::num::NonZeroU32;
use std::ops::ControlFlow;
use std::os::unix::ffi::OsStrExt;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{self, Iter};
use rfuse3::raw::Filesystem;
use rfuse3::raw::Request;
use rfuse3::raw::reply::{
    DirectoryEntry, DirectoryEntryPlus, FileAttr, ReplyAttr, ReplyCopyFileRange, ReplyCreated,
    ReplyData, ReplyDirectory, ReplyDirectoryPlus, ReplyEntry, ReplyInit, ReplyLSeek, ReplyLock,
    ReplyOpen, ReplyStatFs, ReplyWrite, ReplyXAttr,
};
use rfuse3::{Errno, FileType, Inode, Result, SetAttr, Timestamp};

use super::dir::DirEntry;
use super::util::enomem;
use super::{BufSource, LockCmd, PassthroughFs, SetTime, Target};
use crate::util::open_options::OpenOptions;

/// Largest lock offset the kernel sends; it means "to the end of file".
const OFFSET_MAX: u64 = i64::MAX as u64;

impl PassthroughFs {
    fn entry_ttl(&self) -> Duration {
        self.config().entry_timeout
    }

    fn attr_ttl(&self) -> Duration {
        self.config().attr_timeout
    }

    fn child_of(&self, parent: Inode, name: &OsStr) -> Result<OsString> {
        Ok(child_path(&self.inodes.path(parent)?, name))
    }

    /// Stats `path` and counts a lookup of its inode.
    fn entry_of(&self, path: &OsStr) -> Result<ReplyEntry> {
        let st = self.getattr(Target::ByPath(path))?;
        let ino = self.inodes.remap(st.st_ino as u64);
        self.inodes.register(ino, path)?;
        Ok(ReplyEntry {
            ttl: self.entry_ttl(),
            attr: attr_from_stat(ino, &st),
            generation: 0,
        })
    }

    fn attr_of(&self, inode: Inode, fh: Option<u64>) -> Result<ReplyAttr> {
        let path = match fh {
            Some(_) => None,
            None => Some(self.inodes.path(inode)?),
        };
        let st = self.getattr(Target::new(path.as_deref(), fh)?)?;
        Ok(ReplyAttr {
            ttl: self.attr_ttl(),
            attr: attr_from_stat(inode, &st),
        })
    }

    fn dir_entry(&self, entry: &DirEntry, offset: i64) -> DirectoryEntry {
        DirectoryEntry {
            inode: self.inodes.remap(entry.ino),
            kind: kind_from_mode(entry.mode()),
            name: entry.name.clone(),
            offset,
        }
    }

    /// Builds a readdirplus entry below `dir`.
    ///
    /// An entry with attributes counts as a lookup. `.`, `..` and entries
    /// that could not be stat'ed carry inode 0, so the kernel neither caches
    /// nor counts them.
    fn dir_entry_plus(
        &self,
        dir: &OsStr,
        entry: &DirEntry,
        offset: i64,
    ) -> Result<DirectoryEntryPlus> {
        let inode = self.inodes.remap(entry.ino);
        let dots = matches!(entry.name.as_bytes(), b"." | b"..");
        let (attr, entry_ttl, attr_ttl) = match &entry.stat {
            Some(st) if !dots => {
                let ino = self.inodes.remap(st.st_ino as u64);
                self.inodes.register(ino, &child_path(dir, &entry.name))?;
                (attr_from_stat(ino, st), self.entry_ttl(), self.attr_ttl())
            }
            _ => (attr_from_mode(entry.mode()), Duration::ZERO, Duration::ZERO),
        };
        Ok(DirectoryEntryPlus {
            inode,
            generation: 0,
            kind: attr.kind,
            name: entry.name.clone(),
            offset,
            attr,
            entry_ttl,
            attr_ttl,
        })
    }

    /// Collects at most `readdir_batch` entries of `fh` from `offset`.
    fn list<T, F>(&self, fh: u64, offset: i64, plus: bool, mut make: F) -> Result<Vec<Result<T>>>
    where
        F: FnMut(&DirEntry, i64) -> Result<T>,
    {
        let limit = self.config().readdir_batch.max(1);
        let mut entries = Vec::new();
        let mut failed = None;
        self.readdir(fh, offset, plus, |entry, next| {
            if entries.len() >= limit {
                return ControlFlow::Break(());
            }
            match make(entry, next) {
                Ok(item) => {
                    entries.push(Ok(item));
                    ControlFlow::Continue(())
                }
                Err(e) => {
                    failed = Some(e);
                    ControlFlow::Break(())
                }
            }
        })?;
        // Entries already made are still worth returning.
        if let Some(e) = failed {
            if entries.is_empty() {
                return Err(e);
            }
            warn!("directory batch cut short after {} entries: {e:?}", entries.len());
        }
        Ok(entries)
    }
}

fn child_path(parent: &OsStr, name: &OsStr) -> OsString {
    let mut path = OsString::with_capacity(parent.len() + name.len() + 1);
    path.push(parent);
    if !parent.as_bytes().ends_with(b"/") {
        path.push("/");
    }
    path.push(name);
    path
}

fn kind_from_mode(mode: u32) -> FileType {
    match mode as libc::mode_t & libc::S_IFMT {
        libc::S_IFDIR => FileType::Directory,
        libc::S_IFLNK => FileType::Symlink,
        libc::S_IFIFO => FileType::NamedPipe,
        libc::S_IFCHR => FileType::CharDevice,
        libc::S_IFBLK => FileType::BlockDevice,
        libc::S_IFSOCK => FileType::Socket,
        _ => FileType::RegularFile,
    }
}

fn attr_from_stat(ino: u64, st: &libc::stat) -> FileAttr {
    FileAttr {
        ino,
        size: st.st_size as u64,
        blocks: st.st_blocks as u64,
        atime: Timestamp::new(st.st_atime, st.st_atime_nsec as u32),
        mtime: Timestamp::new(st.st_mtime, st.st_mtime_nsec as u32),
        ctime: Timestamp::new(st.st_ctime, st.st_ctime_nsec as u32),
        #[cfg(target_os = "macos")]
        crtime: Timestamp::new(0, 0),
        kind: kind_from_mode(st.st_mode as u32),
        perm: (st.st_mode & 0o7777) as u16,
        nlink: st.st_nlink as u32,
        uid: st.st_uid,
        gid: st.st_gid,
        rdev: st.st_rdev as u32,
        #[cfg(target_os = "macos")]
        flags: 0,
        blksize: st.st_blksize as u32,
    }
}

// Attributes of a listed entry that could not be stat'ed: only the type is
// known.
fn attr_from_mode(mode: u32) -> FileAttr {
    let epoch = Timestamp::new(0, 0);
    FileAttr {
        ino: 0,
        size: 0,
        blocks: 0,
        atime: epoch,
        mtime: epoch,
        ctime: epoch,
        #[cfg(target_os = "macos")]
        crtime: epoch,
        kind: kind_from_mode(mode),
        perm: (mode & 0o7777) as u16,
        nlink: 1,
        uid: 0,
        gid: 0,
        rdev: 0,
        #[cfg(target_os = "macos")]
        flags: 0,
        blksize: 0,
    }
}

fn set_time(time: Option<Timestamp>) -> SetTime {
    match time {
        Some(ts) => SetTime::At {
            sec: ts.sec,
            nsec: ts.nsec,
        },
        None => SetTime::Omit,
    }
}

fn flock_from_request(start: u64, end: u64, r#type: u32, pid: u32) -> libc::flock {
    // SAFETY: flock is plain old data; every field used is set below.
    let mut lk: libc::flock = unsafe { std::mem::zeroed() };
    lk.l_type = r#type as libc::c_short;
    lk.l_whence = libc::SEEK_SET as libc::c_short;
    lk.l_start = start as libc::off_t;
    lk.l_len = if end >= OFFSET_MAX {
        0
    } else {
        (end.saturating_sub(start) + 1) as libc::off_t
    };
    lk.l_pid = pid as libc::pid_t;
    lk
}

fn reply_from_flock(lk: &libc::flock) -> ReplyLock {
    let start = lk.l_start as u64;
    let end = if lk.l_len == 0 {
        OFFSET_MAX
    } else {
        start + lk.l_len as u64 - 1
    };
    ReplyLock {
        start,
        end,
        r#type: lk.l_type as u32,
        pid: lk.l_pid as u32,
    }
}

fn xattr_reply<F>(size: u32, fill: F) -> Result<ReplyXAttr>
where
    F: FnOnce(&mut [u8]) -> std::io::Result<usize>,
{
    if size == 0 {
        let n = fill(&mut [])?;
        return Ok(ReplyXAttr::Size(n as u32));
    }
    let mut buf = Vec::new();
    buf.try_reserve_exact(size as usize).map_err(|_| enomem())?;
    buf.resize(size as usize, 0);
    let n = fill(&mut buf)?;
    buf.truncate(n);
    Ok(ReplyXAttr::Data(Bytes::from(buf)))
}

impl Filesystem for PassthroughFs {
    type DirEntryStream<'a>
        = Iter<std::vec::IntoIter<Result<DirectoryEntry>>>
    where
        Self: 'a;
    type DirEntryPlusStream<'a>
        = Iter<std::vec::IntoIter<Result<DirectoryEntryPlus>>>
    where
        Self: 'a;

    async fn init(&self, _req: Request) -> Result<ReplyInit> {
        let max_write =
            NonZeroU32::new(self.config().max_write).ok_or_else(|| Errno::from(libc::EINVAL))?;
        info!("passthrough init, max_write={max_write}");
        Ok(ReplyInit { max_write })
    }

    async fn destroy(&self, _req: Request) {
        info!("passthrough destroyed, {} inodes known", self.inodes.len());
    }

    async fn lookup(&self, _req: Request, parent: Inode, name: &OsStr) -> Result<ReplyEntry> {
        trace!("lookup {parent} {name:?}");
        self.entry_of(&self.child_of(parent, name)?)
    }

    async fn forget(&self, _req: Request, inode: Inode, nlookup: u64) {
        trace!("forget {inode} nlookup={nlookup}");
        self.inodes.forget(inode, nlookup);
    }

    async fn batch_forget(&self, _req: Request, inodes: &[(Inode, u64)]) {
        trace!("batch_forget {} inodes", inodes.len());
        for &(inode, nlookup) in inodes {
            self.inodes.forget(inode, nlookup);
        }
    }

    async fn getattr(
        &self,
        _req: Request,
        inode: Inode,
        fh: Option<u64>,
        _flags: u32,
    ) -> Result<ReplyAttr> {
        trace!("getattr {inode} fh={fh:?}");
        self.attr_of(inode, fh)
    }

    async fn setattr(
        &self,
        _req: Request,
        inode: Inode,
        fh: Option<u64>,
        set_attr: SetAttr,
    ) -> Result<ReplyAttr> {
        trace!("setattr {inode} fh={fh:?}");
        let path = match fh {
            Some(_) => None,
            None => Some(self.inodes.path(inode)?),
        };
        let target = Target::new(path.as_deref(), fh)?;
        if let Some(mode) = set_attr.mode {
            self.chmod(target, mode)?;
        }
        if set_attr.uid.is_some() || set_attr.gid.is_some() {
            self.chown(target, set_attr.uid, set_attr.gid)?;
        }
        if let Some(size) = set_attr.size {
            self.truncate(target, size)?;
        }
        if set_attr.atime.is_some() || set_attr.mtime.is_some() {
            self.utimens(target, set_time(set_attr.atime), set_time(set_attr.mtime))?;
        }
        let st = self.getattr(target)?;
        Ok(ReplyAttr {
            ttl: self.attr_ttl(),
            attr: attr_from_stat(inode, &st),
        })
    }

    async fn readlink(&self, _req: Request, inode: Inode) -> Result<ReplyData> {
        trace!("readlink {inode}");
        let path = self.inodes.path(inode)?;
        let mut buf = vec![0u8; libc::PATH_MAX as usize + 1];
        let n = self.readlink(&path, &mut buf)?;
        buf.truncate(n);
        Ok(ReplyData {
            data: Bytes::from(buf),
        })
    }

    async fn symlink(
        &self,
        _req: Request,
        parent: Inode,
        name: &OsStr,
        link: &OsStr,
    ) -> Result<ReplyEntry> {
        trace!("symlink {parent} {name:?} -> {link:?}");
        let path = self.child_of(parent, name)?;
        self.symlink(link, &path)?;
        self.entry_of(&path)
    }

    async fn mknod(
        &self,
        _req: Request,
        parent: Inode,
        name: &OsStr,
        mode: u32,
        rdev: u32,
    ) -> Result<ReplyEntry> {
        trace!("mknod {parent} {name:?} mode={mode:#o}");
        let path = self.child_of(parent, name)?;
        self.mknod(&path, mode, rdev as u64)?;
        self.entry_of(&path)
    }

    async fn mkdir(
        &self,
        _req: Request,
        parent: Inode,
        name: &OsStr,
        mode: u32,
        _umask: u32,
    ) -> Result<ReplyEntry> {
        trace!("mkdir {parent} {name:?} mode={mode:#o}");
        let path = self.child_of(parent, name)?;
        self.mkdir(&path, mode)?;
        self.entry_of(&path)
    }

    async fn unlink(&self, _req: Request, parent: Inode, name: &OsStr) -> Result<()> {
        trace!("unlink {parent} {name:?}");
        let path = self.child_of(parent, name)?;
        self.unlink(&path)?;
        self.inodes.unlink(&path);
        Ok(())
    }

    async fn rmdir(&self, _req: Request, parent: Inode, name: &OsStr) -> Result<()> {
        trace!("rmdir {parent} {name:?}");
        let path = self.child_of(parent, name)?;
        self.rmdir(&path)?;
        self.inodes.unlink(&path);
        Ok(())
    }

    async fn rename(
        &self,
        req: Request,
        parent: Inode,
        name: &OsStr,
        new_parent: Inode,
        new_name: &OsStr,
    ) -> Result<()> {
        Filesystem::rename2(self, req, parent, name, new_parent, new_name, 0).await
    }

    async fn rename2(
        &self,
        _req: Request,
        parent: Inode,
        name: &OsStr,
        new_parent: Inode,
        new_name: &OsStr,
        flags: u32,
    ) -> Result<()> {
        trace!("rename2 {parent} {name:?} -> {new_parent} {new_name:?} flags={flags:#x}");
        let from = self.child_of(parent, name)?;
        let to = self.child_of(new_parent, new_name)?;
        self.rename(&from, &to, flags)?;
        self.inodes.rename(&from, &to);
        Ok(())
    }

    async fn link(
        &self,
        _req: Request,
        inode: Inode,
        new_parent: Inode,
        new_name: &OsStr,
    ) -> Result<ReplyEntry> {
        trace!("link {inode} -> {new_parent} {new_name:?}");
        let path = self.inodes.path(inode)?;
        let new_path = self.child_of(new_parent, new_name)?;
        self.link(&path, &new_path)?;
        self.entry_of(&new_path)
    }

    async fn open(&self, _req: Request, inode: Inode, flags: u32) -> Result<ReplyOpen> {
        trace!("open {inode} flags={flags:#o}");
        let fh = self.open(&self.inodes.path(inode)?, flags)?;
        Ok(ReplyOpen {
            fh,
            flags: OpenOptions::for_file(self.config()).bits(),
        })
    }

    async fn read(
        &self,
        _req: Request,
        _inode: Inode,
        fh: u64,
        offset: u64,
        size: u32,
    ) -> Result<ReplyData> {
        trace!("read fh={fh} offset={offset} size={size}");
        let region = self.read_buf(fh, size as usize, offset)?;
        Ok(ReplyData {
            data: region.to_bytes()?,
        })
    }

    async fn write(
        &self,
        _req: Request,
        _inode: Inode,
        fh: u64,
        offset: u64,
        data: &[u8],
        _write_flags: u32,
        _flags: u32,
    ) -> Result<ReplyWrite> {
        trace!("write fh={fh} offset={offset} size={}", data.len());
        let written = self.write_buf(fh, &BufSource::Memory(data), offset)?;
        Ok(ReplyWrite {
            written: written as u32,
        })
    }

    async fn statfs(&self, _req: Request, inode: Inode) -> Result<ReplyStatFs> {
        trace!("statfs {inode}");
        let st = self.statfs(&self.inodes.path(inode)?)?;
        Ok(ReplyStatFs {
            blocks: st.blocks() as u64,
            bfree: st.blocks_free() as u64,
            bavail: st.blocks_available() as u64,
            files: st.files() as u64,
            ffree: st.files_free() as u64,
            bsize: st.block_size() as u32,
            namelen: st.name_max() as u32,
            frsize: st.fragment_size() as u32,
        })
    }

    async fn release(
        &self,
        _req: Request,
        _inode: Inode,
        fh: u64,
        _flags: u32,
        lock_owner: u64,
        flush: bool,
    ) -> Result<()> {
        trace!("release fh={fh} flush={flush}");
        if flush {
            if let Err(e) = self.flush(fh, lock_owner) {
                debug!("flush on release fh={fh}: {e}");
            }
        }
        self.release(fh);
        Ok(())
    }

    async fn fsync(&self, _req: Request, _inode: Inode, fh: u64, datasync: bool) -> Result<()> {
        trace!("fsync fh={fh} datasync={datasync}");
        Ok(self.fsync(fh, datasync)?)
    }

    async fn setxattr(
        &self,
        _req: Request,
        inode: Inode,
        name: &OsStr,
        value: &[u8],
        flags: u32,
        _position: u32,
    ) -> Result<()> {
        trace!("setxattr {inode} {name:?}");
        Ok(self.setxattr(&self.inodes.path(inode)?, name, value, flags)?)
    }

    async fn getxattr(
        &self,
        _req: Request,
        inode: Inode,
        name: &OsStr,
        size: u32,
    ) -> Result<ReplyXAttr> {
        trace!("getxattr {inode} {name:?} size={size}");
        let path = self.inodes.path(inode)?;
        xattr_reply(size, |buf| self.getxattr(&path, name, buf))
    }

    async fn listxattr(&self, _req: Request, inode: Inode, size: u32) -> Result<ReplyXAttr> {
        trace!("listxattr {inode} size={size}");
        let path = self.inodes.path(inode)?;
        xattr_reply(size, |buf| self.listxattr(&path, buf))
    }

    async fn removexattr(&self, _req: Request, inode: Inode, name: &OsStr) -> Result<()> {
        trace!("removexattr {inode} {name:?}");
        Ok(self.removexattr(&self.inodes.path(inode)?, name)?)
    }

    async fn flush(&self, _req: Request, _inode: Inode, fh: u64, lock_owner: u64) -> Result<()> {
        trace!("flush fh={fh} owner={lock_owner:#x}");
        Ok(self.flush(fh, lock_owner)?)
    }

    async fn opendir(&self, _req: Request, inode: Inode, _flags: u32) -> Result<ReplyOpen> {
        trace!("opendir {inode}");
        let fh = self.opendir(&self.inodes.path(inode)?)?;
        Ok(ReplyOpen {
            fh,
            flags: OpenOptions::for_dir(self.config()).bits(),
        })
    }

    async fn readdir<'a>(
        &'a self,
        _req: Request,
        parent: Inode,
        fh: u64,
        offset: i64,
    ) -> Result<ReplyDirectory<Self::DirEntryStream<'a>>> {
        trace!("readdir {parent} fh={fh} offset={offset}");
        let entries = self.list(fh, offset, false, |entry, next| {
            Ok(self.dir_entry(entry, next))
        })?;
        Ok(ReplyDirectory {
            entries: stream::iter(entries),
        })
    }

    async fn readdirplus<'a>(
        &'a self,
        _req: Request,
        parent: Inode,
        fh: u64,
        offset: u64,
        _lock_owner: u64,
    ) -> Result<ReplyDirectoryPlus<Self::DirEntryPlusStream<'a>>> {
        trace!("readdirplus {parent} fh={fh} offset={offset}");
        let dir = self.inodes.path(parent)?;
        let entries = self.list(fh, offset as i64, true, |entry, next| {
            self.dir_entry_plus(&dir, entry, next)
        })?;
        Ok(ReplyDirectoryPlus {
            entries: stream::iter(entries),
        })
    }

    async fn releasedir(&self, _req: Request, inode: Inode, fh: u64, _flags: u32) -> Result<()> {
        trace!("releasedir {inode} fh={fh}");
        self.releasedir(fh);
        Ok(())
    }

    async fn fsyncdir(&self, _req: Request, inode: Inode, _fh: u64, _datasync: bool) -> Result<()> {
        trace!("fsyncdir {inode}");
        Ok(())
    }

    async fn access(&self, _req: Request, inode: Inode, mask: u32) -> Result<()> {
        trace!("access {inode} mask={mask:#o}");
        Ok(self.access(&self.inodes.path(inode)?, mask)?)
    }

    async fn create(
        &self,
        _req: Request,
        parent: Inode,
        name: &OsStr,
        mode: u32,
        flags: u32,
    ) -> Result<ReplyCreated> {
        trace!("create {parent} {name:?} mode={mode:#o} flags={flags:#o}");
        let path = self.child_of(parent, name)?;
        let fh = self.create(&path, mode, flags)?;
        let registered = self.getattr(Target::ByHandle(fh)).and_then(|st| {
            let ino = self.inodes.remap(st.st_ino as u64);
            self.inodes.register(ino, &path)?;
            Ok((ino, st))
        });
        let (ino, st) = match registered {
            Ok(found) => found,
            Err(e) => {
                self.release(fh);
                return Err(e.into());
            }
        };
        Ok(ReplyCreated {
            ttl: self.entry_ttl(),
            attr: attr_from_stat(ino, &st),
            generation: 0,
            fh,
            flags: OpenOptions::for_file(self.config()).bits(),
        })
    }

    async fn getlk(
        &self,
        _req: Request,
        _inode: Inode,
        fh: u64,
        lock_owner: u64,
        start: u64,
        end: u64,
        r#type: u32,
        pid: u32,
    ) -> Result<ReplyLock> {
        trace!("getlk fh={fh} owner={lock_owner:#x} {start}..={end} type={}", r#type);
        let mut lk = flock_from_request(start, end, r#type, pid);
        self.lock(fh, LockCmd::Get, &mut lk, lock_owner)?;
        Ok(reply_from_flock(&lk))
    }

    async fn setlk(
        &self,
        _req: Request,
        _inode: Inode,
        fh: u64,
        lock_owner: u64,
        start: u64,
        end: u64,
        r#type: u32,
        pid: u32,
        block: bool,
    ) -> Result<()> {
        trace!(
            "setlk fh={fh} owner={lock_owner:#x} {start}..={end} type={} block={block}",
            r#type
        );
        let cmd = if block { LockCmd::SetWait } else { LockCmd::Set };
        let mut lk = flock_from_request(start, end, r#type, pid);
        Ok(self.lock(fh, cmd, &mut lk, lock_owner)?)
    }

    async fn fallocate(
        &self,
        _req: Request,
        _inode: Inode,
        fh: u64,
        offset: u64,
        length: u64,
        mode: u32,
    ) -> Result<()> {
        trace!("fallocate fh={fh} offset={offset} length={length} mode={mode:#x}");
        Ok(self.fallocate(fh, mode, offset, length)?)
    }

    async fn lseek(
        &self,
        _req: Request,
        _inode: Inode,
        fh: u64,
        offset: u64,
        whence: u32,
    ) -> Result<ReplyLSeek> {
        trace!("lseek fh={fh} offset={offset} whence={whence}");
        let offset = self.lseek(fh, offset as i64, whence as i32)?;
        Ok(ReplyLSeek { offset })
    }

    async fn copy_file_range(
        &self,
        _req: Request,
        _inode: Inode,
        fh_in: u64,
        offset_in: u64,
        _inode_out: Inode,
        fh_out: u64,
        offset_out: u64,
        length: u64,
        flags: u64,
    ) -> Result<ReplyCopyFileRange> {
        trace!("copy_file_range fh_in={fh_in} fh_out={fh_out} length={length}");
        let copied = self.copy_file_range(fh_in, offset_in, fh_out, offset_out, length, flags)?;
        Ok(ReplyCopyFileRange {
            copied: copied as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passthrough::{Config, ROOT_INO, new_passthroughfs};
    use futures_util::StreamExt;
    use std::collections::HashSet;
    use std::os::unix::fs::MetadataExt;

    fn req() -> Request {
        Request {
            unique: 1,
            uid: 0,
            gid: 0,
            pid: 0,
        }
    }

    fn batched(dir: &std::path::Path, readdir_batch: usize) -> PassthroughFs {
        new_passthroughfs(
            dir,
            Config {
                readdir_batch,
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn child_path_joins_once() {
        assert_eq!(child_path(OsStr::new("/"), OsStr::new("a")), "/a");
        assert_eq!(child_path(OsStr::new("/a"), OsStr::new("b")), "/a/b");
    }

    #[test]
    fn kind_follows_type_bits() {
        let cases = [
            (libc::S_IFDIR, FileType::Directory),
            (libc::S_IFLNK, FileType::Symlink),
            (libc::S_IFIFO, FileType::NamedPipe),
            (libc::S_IFCHR, FileType::CharDevice),
            (libc::S_IFBLK, FileType::BlockDevice),
            (libc::S_IFSOCK, FileType::Socket),
            (libc::S_IFREG, FileType::RegularFile),
        ];
        for (bits, kind) in cases {
            assert_eq!(kind_from_mode(bits as u32 | 0o644), kind);
        }
    }

    #[test]
    fn attr_from_stat_copies_fields() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, b"12345").unwrap();
        let name = std::ffi::CString::new(file.as_os_str().as_bytes()).unwrap();
        let st = super::super::util::stat_at(libc::AT_FDCWD, &name).unwrap();

        let attr = attr_from_stat(9, &st);
        assert_eq!(attr.ino, 9);
        assert_eq!(attr.size, 5);
        assert_eq!(attr.kind, FileType::RegularFile);
        assert_eq!(attr.perm as u32, st.st_mode as u32 & 0o7777);
        assert_eq!(attr.nlink, 1);
        assert_eq!(attr.mtime.sec, st.st_mtime);
        assert_eq!(attr.uid, st.st_uid);
    }

    #[test]
    fn attr_from_mode_keeps_type() {
        let attr = attr_from_mode(libc::S_IFDIR as u32);
        assert_eq!(attr.kind, FileType::Directory);
        assert_eq!(attr.size, 0);
        assert_eq!(attr.ino, 0);
    }

    #[test]
    fn lock_ranges_convert_both_ways() {
        let lk = flock_from_request(10, 19, libc::F_WRLCK as u32, 42);
        assert_eq!(lk.l_start, 10);
        assert_eq!(lk.l_len, 10);
        assert_eq!(lk.l_pid, 42);
        let reply = reply_from_flock(&lk);
        assert_eq!((reply.start, reply.end), (10, 19));
        assert_eq!(reply.r#type, libc::F_WRLCK as u32);

        // A range up to OFFSET_MAX covers the rest of the file.
        let lk = flock_from_request(5, OFFSET_MAX, libc::F_RDLCK as u32, 1);
        assert_eq!(lk.l_len, 0);
        assert_eq!(reply_from_flock(&lk).end, OFFSET_MAX);
    }

    #[test]
    fn omitted_times_stay_omitted() {
        assert_eq!(set_time(None), SetTime::Omit);
        assert_eq!(
            set_time(Some(Timestamp::new(7, 9))),
            SetTime::At { sec: 7, nsec: 9 }
        );
    }

    #[tokio::test]
    async fn lookup_reports_source_inode_and_forget_drops_it() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("d")).unwrap();
        std::fs::write(dir.path().join("d/f"), b"abc").unwrap();
        let src_ino = std::fs::metadata(dir.path().join("d/f")).unwrap().ino();
        let fs = batched(dir.path(), 256);

        let d = Filesystem::lookup(&fs, req(), ROOT_INO, OsStr::new("d"))
            .await
            .unwrap();
        let f = Filesystem::lookup(&fs, req(), d.attr.ino, OsStr::new("f"))
            .await
            .unwrap();
        assert_eq!(f.attr.ino, src_ino);
        assert_eq!(f.attr.size, 3);

        let attr = Filesystem::getattr(&fs, req(), f.attr.ino, None, 0)
            .await
            .unwrap();
        assert_eq!(attr.attr.ino, src_ino);

        Filesystem::forget(&fs, req(), f.attr.ino, 1).await;
        let err = Filesystem::getattr(&fs, req(), f.attr.ino, None, 0)
            .await
            .unwrap_err();
        assert_eq!(err, Errno::from(libc::ENOENT));

        let root = Filesystem::getattr(&fs, req(), ROOT_INO, None, 0)
            .await
            .unwrap();
        assert_eq!(root.attr.ino, ROOT_INO);
        assert_eq!(root.attr.kind, FileType::Directory);
    }

    #[tokio::test]
    async fn renamed_directory_keeps_its_children_reachable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();
        std::fs::write(dir.path().join("a/f"), b"x").unwrap();
        let fs = batched(dir.path(), 256);

        let a = Filesystem::lookup(&fs, req(), ROOT_INO, OsStr::new("a"))
            .await
            .unwrap();
        let f = Filesystem::lookup(&fs, req(), a.attr.ino, OsStr::new("f"))
            .await
            .unwrap();
        Filesystem::rename(&fs, req(), ROOT_INO, OsStr::new("a"), ROOT_INO, OsStr::new("b"))
            .await
            .unwrap();

        let attr = Filesystem::getattr(&fs, req(), f.attr.ino, None, 0)
            .await
            .unwrap();
        assert_eq!(attr.attr.size, 1);
        let created = Filesystem::create(
            &fs,
            req(),
            a.attr.ino,
            OsStr::new("g"),
            0o644,
            libc::O_RDWR as u32,
        )
        .await
        .unwrap();
        Filesystem::release(&fs, req(), created.attr.ino, created.fh, 0, 0, false)
            .await
            .unwrap();
        assert!(dir.path().join("b/g").exists());
    }

    async fn read_all(fs: &PassthroughFs, fh: u64) -> (Vec<OsString>, usize) {
        let mut names = Vec::new();
        let mut replies = 0;
        let mut offset = 0;
        loop {
            let reply = Filesystem::readdir(fs, req(), ROOT_INO, fh, offset)
                .await
                .unwrap();
            let batch: Vec<_> = reply.entries.collect().await;
            if batch.is_empty() {
                break;
            }
            replies += 1;
            assert_eq!(batch.len(), 1);
            for entry in batch {
                let entry = entry.unwrap();
                offset = entry.offset;
                names.push(entry.name);
            }
        }
        (names, replies)
    }

    #[tokio::test]
    async fn readdir_in_single_entry_batches_lists_everything_once() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a", "b", "c", "d"] {
            std::fs::write(dir.path().join(name), name).unwrap();
        }
        let fs = batched(dir.path(), 1);
        let open = Filesystem::opendir(&fs, req(), ROOT_INO, 0).await.unwrap();

        let (names, replies) = read_all(&fs, open.fh).await;
        assert_eq!(replies, names.len());
        let unique: HashSet<_> = names.iter().cloned().collect();
        assert_eq!(unique.len(), names.len());
        let expected: HashSet<OsString> = [".", "..", "a", "b", "c", "d"]
            .into_iter()
            .map(OsString::from)
            .collect();
        assert_eq!(unique, expected);

        // Starting over from zero lists the same entries again.
        let (again, _) = read_all(&fs, open.fh).await;
        assert_eq!(again.len(), names.len());
        Filesystem::releasedir(&fs, req(), ROOT_INO, open.fh, 0)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn readdirplus_in_single_entry_batches_lists_everything_once() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a", "b", "c"] {
            std::fs::write(dir.path().join(name), name).unwrap();
        }
        let fs = batched(dir.path(), 1);
        let open = Filesystem::opendir(&fs, req(), ROOT_INO, 0).await.unwrap();

        let mut seen = HashSet::new();
        let mut offset = 0u64;
        loop {
            let reply = Filesystem::readdirplus(&fs, req(), ROOT_INO, open.fh, offset, 0)
                .await
                .unwrap();
            let batch: Vec<_> = reply.entries.collect().await;
            if batch.is_empty() {
                break;
            }
            assert_eq!(batch.len(), 1);
            for entry in batch {
                let entry = entry.unwrap();
                offset = entry.offset as u64;
                if entry.name == "." || entry.name == ".." {
                    // Not counted as a lookup, so not cached either.
                    assert_eq!(entry.attr.ino, 0);
                    assert_eq!(entry.entry_ttl, Duration::ZERO);
                    assert_eq!(entry.attr_ttl, Duration::ZERO);
                } else {
                    assert_eq!(entry.attr.size, 1);
                    assert_ne!(entry.attr.ino, 0);
                    // The listed inode is now known to the table.
                    let attr = Filesystem::getattr(&fs, req(), entry.attr.ino, None, 0)
                        .await
                        .unwrap();
                    assert_eq!(attr.attr.ino, entry.attr.ino);
                }
                assert!(seen.insert(entry.name), "entry listed twice");
            }
        }
        assert_eq!(seen.len(), 5);
        Filesystem::releasedir(&fs, req(), ROOT_INO, open.fh, 0)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn readdirplus_without_attributes_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f"), b"x").unwrap();
        let fs = new_passthroughfs(
            dir.path(),
            Config {
                readdir_plus: false,
                entry_timeout: Duration::from_secs(5),
                attr_timeout: Duration::from_secs(5),
                ..Default::default()
            },
        )
        .unwrap();
        let open = Filesystem::opendir(&fs, req(), ROOT_INO, 0).await.unwrap();
        let reply = Filesystem::readdirplus(&fs, req(), ROOT_INO, open.fh, 0, 0)
            .await
            .unwrap();
        let entries: Vec<_> = reply.entries.collect().await;
        assert_eq!(entries.len(), 3);
        for entry in entries {
            let entry = entry.unwrap();
            assert_eq!(entry.entry_ttl, Duration::ZERO);
            assert_eq!(entry.attr_ttl, Duration::ZERO);
            assert_eq!(entry.attr.ino, 0);
            assert_ne!(entry.inode, 0);
        }
        Filesystem::releasedir(&fs, req(), ROOT_INO, open.fh, 0)
            .await
            .unwrap();
    }
}
