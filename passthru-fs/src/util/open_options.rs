use bitflags::bitflags;

use crate::passthrough::Config;

// Flags used by the OPEN/OPENDIR reply.
/// Bypass page cache for this open file.
const FOPEN_DIRECT_IO: u32 = 1;

/// Don't invalidate the data cache on open.
const FOPEN_KEEP_CACHE: u32 = 2;

/// allow caching this directory
const FOPEN_CACHE_DIR: u32 = 8;

bitflags! {
    /// Options controlling the behavior of files and directories opened by the
    /// server in response to an open, create or opendir request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenOptions: u32 {
        /// Bypass page cache for this open file.
        const DIRECT_IO = FOPEN_DIRECT_IO;
        /// Don't invalidate the data cache on open.
        const KEEP_CACHE = FOPEN_KEEP_CACHE;
        /// allow caching this directory
        const CACHE_DIR = FOPEN_CACHE_DIR;
    }
}

impl OpenOptions {
    /// Reply flags for a regular file open or create.
    pub fn for_file(cfg: &Config) -> Self {
        let mut opts = OpenOptions::empty();
        if cfg.direct_io {
            opts |= OpenOptions::DIRECT_IO;
        } else if cfg.keep_cache {
            opts |= OpenOptions::KEEP_CACHE;
        }
        opts
    }

    /// Reply flags for opendir.
    pub fn for_dir(cfg: &Config) -> Self {
        if cfg.keep_cache {
            OpenOptions::CACHE_DIR
        } else {
            OpenOptions::empty()
        }
    }
}
