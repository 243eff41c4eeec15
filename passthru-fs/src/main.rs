// Copyright (C) 2024 rk8s authors
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Mounts a directory of the host 1:1 at another place through FUSE.

use std::ffi::OsString;
use std::process;
use std::time::Duration;

use clap::Parser;
use log::{error, info};
use passthru_fs::passthrough::{Config, LockKind, new_passthroughfs};
use passthru_fs::server::mount_filesystem;
use tokio::signal;

#[derive(Parser, Debug)]
#[command(author, version, about = "Passthrough filesystem mirroring a host directory")]
struct Args {
    /// Path to mount point
    #[arg(long)]
    mountpoint: String,
    /// Source directory to expose
    #[arg(long)]
    rootdir: String,
    /// Use privileged mount instead of unprivileged
    #[arg(long, default_value_t = false)]
    privileged: bool,
    /// Do not relay extended attributes
    #[arg(long)]
    no_xattr: bool,
    /// List directories without per-entry attributes
    #[arg(long)]
    no_readdirplus: bool,
    /// Bypass the kernel page cache
    #[arg(long)]
    direct_io: bool,
    /// Keep cached data across opens
    #[arg(long)]
    keep_cache: bool,
    /// Attribute cache timeout in seconds
    #[arg(long, default_value_t = 0.0)]
    attr_timeout: f64,
    /// Entry cache timeout in seconds
    #[arg(long, default_value_t = 0.0)]
    entry_timeout: f64,
    /// Maximum entries per readdir reply
    #[arg(long, default_value_t = 256)]
    readdir_batch: usize,
    /// Serve byte-range locks with open file description locks
    #[arg(long)]
    lock_ofd: bool,
    /// Let other users access the mount
    #[arg(long)]
    allow_other: bool,
}

fn timeout(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or_default()
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    // Both directories are created when missing; a failure shows up below.
    let _ = std::fs::create_dir_all(&args.mountpoint);
    let _ = std::fs::create_dir_all(&args.rootdir);

    let cfg = Config {
        attr_timeout: timeout(args.attr_timeout),
        entry_timeout: timeout(args.entry_timeout),
        xattr: !args.no_xattr,
        readdir_plus: !args.no_readdirplus,
        readdir_batch: args.readdir_batch,
        direct_io: args.direct_io,
        keep_cache: args.keep_cache,
        lock: if args.lock_ofd {
            LockKind::Ofd
        } else {
            LockKind::None
        },
        ..Default::default()
    };

    let fs = match new_passthroughfs(&args.rootdir, cfg) {
        Ok(fs) => fs,
        Err(e) => {
            error!("failed to init passthrough fs on {}: {e}", args.rootdir);
            process::exit(1);
        }
    };

    let mount_path = OsString::from(&args.mountpoint);
    let mut mount_handle =
        match mount_filesystem(fs, &mount_path, !args.privileged, args.allow_other).await {
            Ok(handle) => handle,
            Err(e) => {
                error!("mount on {} failed: {e}", args.mountpoint);
                process::exit(1);
            }
        };
    info!("mounted {} on {}", args.rootdir, args.mountpoint);

    let handle = &mut mount_handle;
    tokio::select! {
        res = handle => {
            if let Err(e) = res {
                error!("session ended with error: {e}");
                process::exit(1);
            }
        }
        _ = signal::ctrl_c() => {
            info!("interrupted, unmounting {}", args.mountpoint);
            if let Err(e) = mount_handle.unmount().await {
                error!("unmount failed: {e}");
                process::exit(1);
            }
        }
    }
}
