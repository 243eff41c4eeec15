#[macro_use]
extern crate log;

pub mod passthrough;
pub mod server;
mod util;

// Test utilities (only compiled during tests)
#[cfg(test)]
pub mod test_utils {
    /// Macro: unwrap result or skip test when encountering EPERM (Permission denied).
    ///
    /// Behavior:
    /// - On Ok(v): returns v
    /// - On Err(e) where e -> io::Error has raw_os_error()==EPERM (or PermissionDenied):
    ///     * If env RUN_PRIVILEGED_TESTS=1 -> panic (treat as hard failure)
    ///     * Else: print a line indicating skip and `return` from the test.
    /// - On Err(e) other than EPERM -> panic with diagnostic.
    ///
    /// Usage:
    /// let handle = unwrap_or_skip_eperm!(mount_filesystem(fs, &mnt, true, false).await, "mount session");
    #[macro_export]
    macro_rules! unwrap_or_skip_eperm {
        ($expr:expr, $ctx:expr) => {{
            match $expr {
                Ok(v) => v,
                Err(e) => {
                    let ioerr: std::io::Error = e.into();
                    let is_eperm = ioerr.raw_os_error() == Some(libc::EPERM)
                        || ioerr.kind() == std::io::ErrorKind::PermissionDenied;
                    if is_eperm {
                        if std::env::var("RUN_PRIVILEGED_TESTS").ok().as_deref() == Some("1") {
                            panic!(
                                "{} failed with EPERM while RUN_PRIVILEGED_TESTS=1: {:?}",
                                $ctx, ioerr
                            );
                        } else {
                            eprintln!("skip (EPERM) {}: {:?}", $ctx, ioerr);
                            return;
                        }
                    }
                    panic!("{} unexpected error: {:?}", $ctx, ioerr);
                }
            }
        }};
    }
}
