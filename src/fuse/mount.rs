//! Mount lifecycle: stale-endpoint recovery, mounting, unmounting
//!
//! A crashed daemon leaves a dangling FUSE endpoint behind; any stat against
//! it fails with ENOTCONN and a fresh mount is refused. Before mounting we
//! therefore run the detach tooling best-effort: each command fails harmlessly
//! when the path is not a mount.

use fuser::MountOption;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{EdrError, MountError};
use crate::fuse::fs::EdrFs;

type Result<T> = std::result::Result<T, EdrError>;

/// Options for every mount: read-only, reachable by other users (Plex runs
/// as its own user), tagged so mount tables identify the product.
pub fn mount_options() -> Vec<MountOption> {
    vec![
        MountOption::RO,
        MountOption::AllowOther,
        MountOption::FSName("edrmount".to_string()),
        MountOption::Subtype("edrmount".to_string()),
    ]
}

/// The detach attempts, in order. Lazy umount last: it always succeeds in
/// detaching a wedged endpoint even with handles still open.
pub(crate) fn stale_detach_commands(mountpoint: &Path) -> Vec<(&'static str, Vec<String>)> {
    let mp = mountpoint.to_string_lossy().into_owned();
    vec![
        ("fusermount", vec!["-u".to_string(), "-z".to_string(), mp.clone()]),
        ("fusermount3", vec!["-u".to_string(), "-z".to_string(), mp.clone()]),
        ("umount", vec!["-l".to_string(), mp]),
    ]
}

fn detach_stale(mountpoint: &Path) {
    for (cmd, args) in stale_detach_commands(mountpoint) {
        match Command::new(cmd).args(&args).output() {
            Ok(output) if output.status.success() => {
                tracing::info!(mountpoint = %mountpoint.display(), cmd, "detached stale mount");
                return;
            }
            Ok(_) => {} // not mounted, or tool missing the target: expected
            Err(e) => {
                tracing::debug!(cmd, "detach tool unavailable: {}", e);
            }
        }
    }
}

/// An active FUSE mount; dropping it unmounts.
pub struct MountGuard {
    session: Option<fuser::BackgroundSession>,
    mountpoint: PathBuf,
}

impl MountGuard {
    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    /// Explicit unmount, for orderly shutdown logs.
    pub fn unmount(mut self) {
        if let Some(session) = self.session.take() {
            drop(session);
        }
        tracing::info!(mountpoint = %self.mountpoint.display(), "unmounted");
    }
}

impl Drop for MountGuard {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            drop(session);
            tracing::info!(mountpoint = %self.mountpoint.display(), "unmounted");
        }
    }
}

/// Recover the mountpoint if needed, then mount the filesystem on a
/// background session.
pub fn mount(fs: EdrFs, mountpoint: &Path) -> Result<MountGuard> {
    detach_stale(mountpoint);

    std::fs::create_dir_all(mountpoint).map_err(|e| MountError::BadMountpoint {
        path: mountpoint.to_path_buf(),
        reason: e.to_string(),
    })?;

    let session =
        fuser::spawn_mount2(fs, mountpoint, &mount_options()).map_err(|e| {
            MountError::MountFailed {
                path: mountpoint.to_path_buf(),
                source: e,
            }
        })?;

    tracing::info!(mountpoint = %mountpoint.display(), "mounted");
    Ok(MountGuard {
        session: Some(session),
        mountpoint: mountpoint.to_path_buf(),
    })
}
