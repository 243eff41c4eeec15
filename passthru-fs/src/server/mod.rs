use std::ffi::{OsStr, OsString};
use std::io;

use rfuse3::MountOptions;
use rfuse3::raw::{MountHandle, Session};

use crate::passthrough::PassthroughFs;

/// Mounts `fs` on `mountpoint`.
///
/// Unprivileged mounts go through `fusermount3`. The returned handle
/// resolves when the filesystem is unmounted.
pub async fn mount_filesystem(
    fs: PassthroughFs,
    mountpoint: &OsStr,
    unprivileged: bool,
    allow_other: bool,
) -> io::Result<MountHandle> {
    let mount_path = OsString::from(mountpoint);

    let uid = nix::unistd::getuid().as_raw();
    let gid = nix::unistd::getgid().as_raw();

    let mut mount_options = MountOptions::default();
    mount_options
        .fs_name("passthru-fs")
        .force_readdir_plus(fs.capabilities().readdir_plus)
        .uid(uid)
        .gid(gid);
    if allow_other {
        mount_options.allow_other(true);
    }

    info!(
        "mounting {:?} on {:?} ({})",
        fs.config().root_dir,
        mount_path,
        if unprivileged {
            "unprivileged"
        } else {
            "privileged"
        }
    );
    let session = Session::new(mount_options);
    if unprivileged {
        session.mount_with_unprivileged(fs, mount_path).await
    } else {
        session.mount(fs, mount_path).await
    }
}
