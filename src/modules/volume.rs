//! Per-volume directory lifecycle and quota management.
//!
//! A volume is a subdirectory under a mount point's plugin-private area;
//! its capacity is the hard quota the master enforces on that directory.
//! Directory existence plus a live quota query are the only source of
//! truth: no metadata is stored elsewhere, so nothing can desynchronize
//! from the filesystem.
//!
//! Mutating operations on the same volume id serialize on a keyed lock,
//! so concurrent create/expand/delete calls from independent RPC threads
//! cannot interleave their directory and quota steps.

use std::collections::HashMap;
use std::fs::{self, DirBuilder};
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;
use std::sync::Arc;

use log::info;
use parking_lot::Mutex;

use super::constants::VOLUME_DIR_MODE;
use super::error::{Error, Result};
use super::master::MasterClient;
use super::mount_point::MountPoint;
use super::quota_tools::QuotaTools;

/// The quota seam: how a directory's hard-size limit is queried and set.
/// The master wire protocol is the default implementation; the cluster's
/// command-line tools are the alternative.
pub trait QuotaBackend: Send + Sync {
    /// Hard-size quota currently effective on `path`.
    fn get_quota(&self, path: &Path) -> Result<u64>;

    /// Request a hard-size quota on `path`; returns the size the cluster
    /// actually acquired.
    fn set_quota(&self, path: &Path, size: u64) -> Result<u64>;
}

impl QuotaBackend for MasterClient {
    fn get_quota(&self, path: &Path) -> Result<u64> {
        MasterClient::get_quota(self, path)
    }

    fn set_quota(&self, path: &Path, size: u64) -> Result<u64> {
        MasterClient::set_quota(self, path, size)
    }
}

impl QuotaBackend for QuotaTools {
    fn get_quota(&self, path: &Path) -> Result<u64> {
        QuotaTools::get_quota(self, path)
    }

    fn set_quota(&self, path: &Path, size: u64) -> Result<u64> {
        QuotaTools::set_quota(self, path, size)
    }
}

/// True when `path` exists; a missing path is not an error, anything else
/// the stat reports is.
pub(crate) fn dir_exists(path: &Path) -> Result<bool> {
    match fs::metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[derive(Default)]
struct VolumeLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl VolumeLocks {
    fn entry(&self, volume_id: &str) -> Arc<Mutex<()>> {
        self.inner
            .lock()
            .entry(volume_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn forget(&self, volume_id: &str) {
        self.inner.lock().remove(volume_id);
    }
}

/// Directory CRUD and quota lifecycle for the volumes under one mount
/// point.
pub struct VolumeManager {
    mount: Arc<MountPoint>,
    quota: Box<dyn QuotaBackend>,
    locks: VolumeLocks,
}

impl VolumeManager {
    /// Manager over the given mount point and quota backend.
    pub fn new(mount: Arc<MountPoint>, quota: Box<dyn QuotaBackend>) -> Self {
        Self {
            mount,
            quota,
            locks: VolumeLocks::default(),
        }
    }

    /// Whether the volume's backing directory exists.
    pub fn exists(&self, volume_id: &str) -> Result<bool> {
        dir_exists(&self.mount.host_path_to_volume(volume_id))
    }

    /// Create the volume's backing directory (idempotent) and, for a
    /// positive size, apply its quota. Returns the acquired size, or 0
    /// when no quota was requested (the create-on-publish case).
    pub fn create(&self, volume_id: &str, size: u64) -> Result<u64> {
        let lock = self.locks.entry(volume_id);
        let _held = lock.lock();
        self.create_locked(volume_id, size)
    }

    fn create_locked(&self, volume_id: &str, size: u64) -> Result<u64> {
        let path = self.mount.host_path_to_volume(volume_id);
        info!(
            "create volume {volume_id} at {} (size {size})",
            path.display()
        );
        DirBuilder::new()
            .recursive(true)
            .mode(VOLUME_DIR_MODE)
            .create(&path)?;
        if size == 0 {
            return Ok(0);
        }
        self.quota.set_quota(&path, size)
    }

    /// Recursively remove the volume's backing directory. A removal
    /// failure may leave the directory partially deleted; that state is
    /// surfaced, not rolled back.
    pub fn delete(&self, volume_id: &str) -> Result<()> {
        let lock = self.locks.entry(volume_id);
        let held = lock.lock();
        let path = self.mount.host_path_to_volume(volume_id);
        info!("delete volume {volume_id} at {}", path.display());
        if let Err(e) = fs::remove_dir_all(&path) {
            if e.kind() != io::ErrorKind::NotFound {
                return Err(Error::Internal(format!(
                    "couldn't remove volume {volume_id} directory {}: {e}",
                    path.display()
                )));
            }
        }
        drop(held);
        self.locks.forget(volume_id);
        Ok(())
    }

    /// Apply a new quota to an existing volume. Whether the new size
    /// grows or shrinks the volume is the master's call.
    pub fn expand(&self, volume_id: &str, size: u64) -> Result<u64> {
        let lock = self.locks.entry(volume_id);
        let _held = lock.lock();
        info!("expand volume {volume_id} to {size}");
        self.quota
            .set_quota(&self.mount.host_path_to_volume(volume_id), size)
    }

    /// Quota currently effective on the volume.
    pub fn get_quota(&self, volume_id: &str) -> Result<u64> {
        self.quota
            .get_quota(&self.mount.host_path_to_volume(volume_id))
    }

    /// The duplicate-create contract: create the volume, or, when its
    /// directory already exists, accept the request only if the current
    /// quota matches the requested capacity exactly. Never touches the
    /// quota of an existing volume.
    pub fn ensure_capacity(&self, volume_id: &str, requested: u64) -> Result<u64> {
        let lock = self.locks.entry(volume_id);
        let _held = lock.lock();
        if dir_exists(&self.mount.host_path_to_volume(volume_id))? {
            let current = self.get_quota(volume_id)?;
            if current != requested {
                return Err(Error::AlreadyExists(format!(
                    "volume {volume_id} already exists with a different capacity (current {current}, requested {requested})"
                )));
            }
            return Ok(current);
        }
        self.create_locked(volume_id, requested)
    }

    /// Create the statically published mount-volume directory.
    pub fn create_mount_volume(&self, volume_id: &str) -> Result<()> {
        let path = self.mount.host_path_to_mount_volume(volume_id);
        DirBuilder::new()
            .recursive(true)
            .mode(VOLUME_DIR_MODE)
            .create(&path)?;
        Ok(())
    }

    /// Whether the statically published mount-volume directory exists.
    pub fn mount_volume_exists(&self, volume_id: &str) -> Result<bool> {
        dir_exists(&self.mount.host_path_to_mount_volume(volume_id))
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::QuotaBackend;
    use crate::modules::error::{Error, Result};

    /// In-memory quota table recording every set call.
    #[derive(Default)]
    pub(crate) struct FakeQuota {
        pub(crate) quotas: Mutex<HashMap<PathBuf, u64>>,
        pub(crate) set_calls: Mutex<Vec<(PathBuf, u64)>>,
    }

    impl QuotaBackend for FakeQuota {
        fn get_quota(&self, path: &Path) -> Result<u64> {
            Ok(*self.quotas.lock().get(path).unwrap_or(&0))
        }

        fn set_quota(&self, path: &Path, size: u64) -> Result<u64> {
            if size == 0 {
                return Err(Error::InvalidArgument(
                    "quota size must be positive".to_string(),
                ));
            }
            self.set_calls.lock().push((path.to_path_buf(), size));
            self.quotas.lock().insert(path.to_path_buf(), size);
            Ok(size)
        }
    }

    impl QuotaBackend for Arc<FakeQuota> {
        fn get_quota(&self, path: &Path) -> Result<u64> {
            self.as_ref().get_quota(path)
        }

        fn set_quota(&self, path: &Path, size: u64) -> Result<u64> {
            self.as_ref().set_quota(path, size)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeQuota;
    use super::*;
    use crate::modules::config::ClusterConfig;
    use crate::modules::mounter::fake::FakeMounter;

    const GIB: u64 = 1 << 30;

    fn manager(base: &Path) -> (Arc<MountPoint>, Arc<FakeQuota>, VolumeManager) {
        let config =
            ClusterConfig::new("mfsmaster", 9421, "/", "csi", "moosefs", "ctl").with_mount_base(base);
        let mount = Arc::new(MountPoint::with_backend(
            &config,
            0,
            1,
            Arc::new(FakeMounter::default()),
        ));
        let quota = Arc::new(FakeQuota::default());
        let volumes = VolumeManager::new(mount.clone(), Box::new(quota.clone()));
        (mount, quota, volumes)
    }

    #[test]
    fn exists_tracks_the_directory() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (_mount, _quota, volumes) = manager(dir.path());
        let volume_id = uuid::Uuid::new_v4().to_string();

        assert!(!volumes.exists(&volume_id)?);
        volumes.create(&volume_id, 0)?;
        assert!(volumes.exists(&volume_id)?);
        Ok(())
    }

    #[test]
    fn create_without_size_sets_no_quota() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (_mount, quota, volumes) = manager(dir.path());
        assert_eq!(volumes.create("pvc-1", 0)?, 0);
        assert!(quota.set_calls.lock().is_empty());
        Ok(())
    }

    #[test]
    fn create_with_size_applies_quota_to_volume_path() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (mount, quota, volumes) = manager(dir.path());
        assert_eq!(volumes.create("pvc-1", 10 * GIB)?, 10 * GIB);
        assert!(mount.host_path_to_volume("pvc-1").is_dir());
        assert_eq!(
            quota.set_calls.lock().as_slice(),
            &[(mount.host_path_to_volume("pvc-1"), 10 * GIB)]
        );
        Ok(())
    }

    #[test]
    fn delete_removes_the_tree_and_tolerates_absence() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (mount, _quota, volumes) = manager(dir.path());
        volumes.create("pvc-1", 0)?;
        fs::write(mount.host_path_to_volume("pvc-1").join("data"), b"x")?;

        volumes.delete("pvc-1")?;
        assert!(!volumes.exists("pvc-1")?);

        // Deleting again is a no-op, not an error.
        volumes.delete("pvc-1")?;
        Ok(())
    }

    #[test]
    fn expand_delegates_to_the_quota_backend() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (_mount, _quota, volumes) = manager(dir.path());
        volumes.create("pvc-1", 10 * GIB)?;
        assert_eq!(volumes.expand("pvc-1", 20 * GIB)?, 20 * GIB);
        assert_eq!(volumes.get_quota("pvc-1")?, 20 * GIB);
        Ok(())
    }

    #[test]
    fn duplicate_create_with_same_capacity_is_accepted() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (_mount, _quota, volumes) = manager(dir.path());
        volumes.ensure_capacity("pvc-1", 10 * GIB)?;
        assert_eq!(volumes.ensure_capacity("pvc-1", 10 * GIB)?, 10 * GIB);
        Ok(())
    }

    #[test]
    fn capacity_conflict_fails_without_touching_quota() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (mount, quota, volumes) = manager(dir.path());

        // Directory provisioned at 10 GiB by an earlier request.
        let path = mount.host_path_to_volume("pvc-1");
        fs::create_dir_all(&path)?;
        quota.quotas.lock().insert(path, 10 * GIB);

        let err = volumes.ensure_capacity("pvc-1", 20 * GIB).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
        assert!(quota.set_calls.lock().is_empty());
        Ok(())
    }

    #[test]
    fn mount_volume_directory_lifecycle() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (_mount, _quota, volumes) = manager(dir.path());
        assert!(!volumes.mount_volume_exists("pvc-9")?);
        volumes.create_mount_volume("pvc-9")?;
        volumes.create_mount_volume("pvc-9")?; // idempotent
        assert!(volumes.mount_volume_exists("pvc-9")?);
        Ok(())
    }
}
