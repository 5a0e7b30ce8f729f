//! Mount command: connect to etcd and serve the base directory over FUSE.

use std::path::{Path, PathBuf};

use daemonize::Daemonize;
use etcdfs_config::EtcdFsConfig;
use etcdfs_fuse::EtcdFsCore;
use tracing::{error, info};

/// Mount arguments.
pub struct MountArgs {
    /// Mount point path.
    pub mountpoint: PathBuf,
    /// Run in foreground (don't daemonize).
    pub foreground: bool,
}

/// Why the process refuses to mount.
#[derive(Debug, thiserror::Error)]
pub enum MountPointError {
    #[error("Mount point {0:?} does not exist")]
    Missing(PathBuf),
    #[error("Mount point {0:?} is not a directory")]
    NotADirectory(PathBuf),
}

/// The mount point must be an existing directory. Returns its absolute
/// path, since a daemon no longer runs in the caller's directory.
pub fn resolve_mountpoint(path: &Path) -> Result<PathBuf, MountPointError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::canonicalize(path)
            .map_err(|_| MountPointError::Missing(path.to_path_buf())),
        Ok(_) => Err(MountPointError::NotADirectory(path.to_path_buf())),
        Err(_) => Err(MountPointError::Missing(path.to_path_buf())),
    }
}

/// Run the mount command. Blocks until the filesystem is unmounted.
///
/// Everything that can fail on bad input is checked before detaching, so
/// those errors still reach the terminal and the exit status.
pub fn run(config: EtcdFsConfig, args: MountArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mountpoint = match resolve_mountpoint(&args.mountpoint) {
        Ok(path) => path,
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        }
    };

    info!("Connecting to etcd at {}", config.endpoint);
    if let Err(e) = EtcdFsCore::preflight(&config) {
        error!("{}", e);
        return Err(e.into());
    }

    if !args.foreground {
        info!("Detaching; etcdfs keeps serving {:?} in the background", mountpoint);
        Daemonize::new().working_directory("/").start()?;
    }

    let fs = EtcdFsCore::from_config(&config)?;
    fs.mount(&mountpoint, &config.mount)?;

    Ok(())
}
