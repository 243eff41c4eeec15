use std::ffi::CStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::lock::{LockCoordinator, OfdLockCoordinator};

/// Which byte-range lock coordinator to install.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LockKind {
    /// No coordinator; lock requests fail with `ENOSYS` and the kernel keeps
    /// the locks itself.
    #[default]
    None,
    /// Open file description locks, one description per lock owner.
    Ofd,
}

/// Options that configure the behavior of the passthrough filesystem.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory mirrored by the filesystem.
    ///
    /// The default is `/`.
    pub root_dir: PathBuf,

    /// How long the kernel may cache a lookup result.
    ///
    /// The default is zero, so changes made directly in `root_dir` are seen
    /// right away. This also keeps `st_nlink` right for hard links, since
    /// the kernel cannot invalidate the inode behind an unlinked name.
    pub entry_timeout: Duration,

    /// How long the kernel may cache file attributes.
    ///
    /// The default is zero.
    pub attr_timeout: Duration,

    /// Relay extended attribute requests.
    ///
    /// The default is `true`. Even when enabled, xattrs are switched off at
    /// start if `root_dir` does not support them.
    pub xattr: bool,

    /// Stat every entry while listing a directory.
    ///
    /// The default is `true`.
    pub readdir_plus: bool,

    /// Maximum number of entries returned by one readdir call.
    ///
    /// The default is 256.
    pub readdir_batch: usize,

    /// Ask the kernel to bypass the page cache for opened files.
    ///
    /// The default is `false`.
    pub direct_io: bool,

    /// Ask the kernel to keep cached file and directory data across opens.
    ///
    /// The default is `false`.
    pub keep_cache: bool,

    /// Largest write request accepted, in bytes.
    ///
    /// The default is 128 KiB.
    pub max_write: u32,

    /// Coordinator for byte-range locks.
    ///
    /// The default is [`LockKind::None`].
    pub lock: LockKind,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            root_dir: PathBuf::from("/"),
            entry_timeout: Duration::ZERO,
            attr_timeout: Duration::ZERO,
            xattr: true,
            readdir_plus: true,
            readdir_batch: 256,
            direct_io: false,
            keep_cache: false,
            max_write: 128 * 1024,
            lock: LockKind::None,
        }
    }
}

/// Optional features, resolved once when the filesystem is created.
#[derive(Debug, Clone)]
pub struct Capabilities {
    /// Extended attribute calls are relayed.
    pub xattr: bool,
    /// `posix_fallocate` is available.
    pub fallocate: bool,
    /// Nanosecond timestamps through `utimensat`/`futimens`.
    pub utimens: bool,
    /// In-kernel `copy_file_range` is available.
    pub copy_file_range: bool,
    /// Directory entries are enriched with `fstatat`.
    pub readdir_plus: bool,
    /// Byte-range lock coordinator.
    pub lock: Option<Arc<dyn LockCoordinator>>,
}

impl Capabilities {
    /// Everything optional switched off.
    pub fn none() -> Self {
        Capabilities {
            xattr: false,
            fallocate: false,
            utimens: false,
            copy_file_range: false,
            readdir_plus: false,
            lock: None,
        }
    }

    /// Probes the host for the features `cfg` asks for.
    pub fn probe(root: &CStr, cfg: &Config) -> Self {
        let caps = Capabilities {
            xattr: cfg.xattr && probe_xattr(root),
            fallocate: cfg!(target_os = "linux"),
            utimens: true,
            copy_file_range: cfg!(target_os = "linux"),
            readdir_plus: cfg.readdir_plus,
            lock: match cfg.lock {
                LockKind::None => None,
                LockKind::Ofd if cfg!(target_os = "linux") => {
                    Some(Arc::new(OfdLockCoordinator::new()) as Arc<dyn LockCoordinator>)
                }
                LockKind::Ofd => {
                    warn!("ofd locks are not available on this platform");
                    None
                }
            },
        };
        debug!("passthrough capabilities: {caps:?}");
        caps
    }
}

#[cfg(target_os = "linux")]
fn probe_xattr(root: &CStr) -> bool {
    // SAFETY: a null buffer with size 0 only queries the list length.
    let res = unsafe { libc::llistxattr(root.as_ptr(), std::ptr::null_mut(), 0) };
    if res >= 0 {
        return true;
    }
    let err = std::io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::ENOTSUP) => {
            info!("xattr not supported by {root:?}, disabling");
            false
        }
        _ => {
            warn!("xattr probe on {root:?} failed: {err}");
            true
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn probe_xattr(_root: &CStr) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[test]
    fn default_config_mirrors_without_caching() {
        let cfg = Config::default();
        assert_eq!(cfg.entry_timeout, Duration::ZERO);
        assert_eq!(cfg.attr_timeout, Duration::ZERO);
        assert_eq!(cfg.lock, LockKind::None);
        assert!(cfg.readdir_batch > 0);
    }

    #[test]
    fn probe_honors_disabled_features() {
        let dir = tempfile::tempdir().unwrap();
        let root = CString::new(dir.path().to_str().unwrap()).unwrap();
        let cfg = Config {
            xattr: false,
            readdir_plus: false,
            ..Default::default()
        };
        let caps = Capabilities::probe(&root, &cfg);
        assert!(!caps.xattr);
        assert!(!caps.readdir_plus);
        assert!(caps.lock.is_none());
        assert!(caps.utimens);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn probe_installs_ofd_coordinator() {
        let dir = tempfile::tempdir().unwrap();
        let root = CString::new(dir.path().to_str().unwrap()).unwrap();
        let cfg = Config {
            lock: LockKind::Ofd,
            ..Default::default()
        };
        let caps = Capabilities::probe(&root, &cfg);
        assert!(caps.lock.is_some());
        assert!(caps.fallocate);
        assert!(caps.copy_file_range);
    }

    #[test]
    fn none_disables_everything() {
        let caps = Capabilities::none();
        assert!(!caps.xattr && !caps.fallocate && !caps.utimens);
        assert!(!caps.copy_file_range && !caps.readdir_plus);
        assert!(caps.lock.is_none());
    }
}
