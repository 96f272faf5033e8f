//! Top-level mount of the distributed filesystem on the host.
//!
//! One `MountPoint` owns one host directory where the cluster's remote
//! root is mounted. Nodes may run several in parallel (slot-suffixed
//! paths) to spread bind-mount load; a controller runs exactly one. The
//! mount is established at service startup and survives until shutdown;
//! everything else only joins paths under it, so no locking is needed
//! after construction.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};

use super::config::ClusterConfig;
use super::constants::{MOUNT_VOLUMES_DIR, VOLUMES_DIR};
use super::error::Result;
use super::mounter::{MountBackend, Mounter};

/// One host-side mount of the cluster's remote root.
pub struct MountPoint {
    master_host: String,
    master_port: u16,
    root_dir: String,
    plugin_dir: String,
    fs_type: String,
    mount_options: String,
    host_mount_path: PathBuf,
    backend: Arc<dyn MountBackend>,
}

impl MountPoint {
    /// Mount point for the given slot, backed by the host's mount tools.
    /// Slot 0 of 1 mounts at `<base>/<name>`; parallel slots get a
    /// zero-padded `_NN` suffix.
    pub fn new(config: &ClusterConfig, slot: usize, slot_count: usize) -> Self {
        Self::with_backend(config, slot, slot_count, Arc::new(Mounter::from_config(config)))
    }

    /// Mount point over an explicit [`MountBackend`].
    pub fn with_backend(
        config: &ClusterConfig,
        slot: usize,
        slot_count: usize,
        backend: Arc<dyn MountBackend>,
    ) -> Self {
        let suffix = if slot == 0 && slot_count == 1 {
            String::new()
        } else {
            format!("_{slot:02}")
        };
        Self {
            master_host: config.master_host.clone(),
            master_port: config.master_port,
            root_dir: config.root_dir.clone(),
            plugin_dir: config.plugin_dir.trim_matches('/').to_string(),
            fs_type: config.fs_type.clone(),
            mount_options: config.mount_options.clone(),
            host_mount_path: config.mount_base.join(format!("{}{}", config.name, suffix)),
            backend,
        }
    }

    /// Establish the mount. A live mount at the host path is unmounted
    /// first and the directory recreated, so two calls in a row leave
    /// exactly one mount active.
    pub fn mount(&self) -> Result<()> {
        let source = self.mount_source();
        let options: Vec<String> = if self.mount_options.is_empty() {
            Vec::new()
        } else {
            self.mount_options.split(',').map(str::to_string).collect()
        };
        info!(
            "mounting {} at {} (options {:?})",
            source,
            self.host_mount_path.display(),
            options
        );

        if self.backend.is_mounted(&self.host_mount_path)? {
            warn!(
                "mount found at {}, unmounting",
                self.host_mount_path.display()
            );
            self.backend.unmount(&self.host_mount_path)?;
        }
        remove_tree(&self.host_mount_path)?;
        self.backend
            .mount(&source, &self.host_mount_path, &self.fs_type, &options)?;
        info!(
            "successfully mounted {} at {}",
            source,
            self.host_mount_path.display()
        );
        Ok(())
    }

    /// Unmount the host path if it is currently mounted.
    pub fn unmount(&self) -> Result<()> {
        if self.backend.is_mounted(&self.host_mount_path)? {
            self.backend.unmount(&self.host_mount_path)?;
        }
        Ok(())
    }

    fn mount_source(&self) -> String {
        format!("{}:{}:{}", self.master_host, self.master_port, self.root_dir)
    }

    /// Filesystem type this mount point mounts with.
    pub fn fs_type(&self) -> &str {
        &self.fs_type
    }

    /// Host directory the remote root is mounted at.
    pub fn host_mount_path(&self) -> &Path {
        &self.host_mount_path
    }

    /// Host path of the plugin-private area.
    pub fn host_plugin_path(&self) -> PathBuf {
        self.host_mount_path.join(&self.plugin_dir)
    }

    /// Plugin-private area relative to the remote root.
    pub fn plugin_path(&self) -> &str {
        &self.plugin_dir
    }

    /// Resolve a remote-root-relative path on the host side.
    pub fn host_path_to(&self, sub_path: &Path) -> PathBuf {
        let relative = sub_path.strip_prefix("/").unwrap_or(sub_path);
        self.host_mount_path.join(relative)
    }

    /// Remote-root-relative path of a path inside the plugin-private area.
    pub fn plugin_sub_path(&self, sub_path: &str) -> PathBuf {
        PathBuf::from(&self.plugin_dir).join(sub_path.trim_start_matches('/'))
    }

    /// Remote-root-relative path of a volume's backing directory.
    pub fn volume_sub_path(&self, volume_id: &str) -> PathBuf {
        PathBuf::from(&self.plugin_dir)
            .join(VOLUMES_DIR)
            .join(volume_id)
    }

    /// Host path of a volume's backing directory.
    pub fn host_path_to_volume(&self, volume_id: &str) -> PathBuf {
        self.host_plugin_path().join(VOLUMES_DIR).join(volume_id)
    }

    /// Host path of a statically published mount-volume directory.
    pub fn host_path_to_mount_volume(&self, volume_id: &str) -> PathBuf {
        self.host_plugin_path()
            .join(MOUNT_VOLUMES_DIR)
            .join(volume_id)
    }
}

fn remove_tree(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::mounter::fake::FakeMounter;

    fn test_config(base: &Path) -> ClusterConfig {
        ClusterConfig::new("mfsmaster", 9421, "/", "csi", "moosefs", "node-1")
            .with_mount_base(base)
    }

    #[test]
    fn single_slot_has_no_suffix() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = test_config(dir.path());
        let mount = MountPoint::with_backend(&config, 0, 1, Arc::new(FakeMounter::default()));
        assert_eq!(mount.host_mount_path(), dir.path().join("node-1"));
        Ok(())
    }

    #[test]
    fn parallel_slots_are_zero_padded() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = test_config(dir.path());
        let first = MountPoint::with_backend(&config, 0, 4, Arc::new(FakeMounter::default()));
        let third = MountPoint::with_backend(&config, 2, 4, Arc::new(FakeMounter::default()));
        assert_eq!(first.host_mount_path(), dir.path().join("node-1_00"));
        assert_eq!(third.host_mount_path(), dir.path().join("node-1_02"));
        Ok(())
    }

    #[test]
    fn path_helpers_compose_under_the_mount() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = test_config(dir.path());
        let mount = MountPoint::with_backend(&config, 0, 1, Arc::new(FakeMounter::default()));
        let root = dir.path().join("node-1");

        assert_eq!(mount.host_plugin_path(), root.join("csi"));
        assert_eq!(mount.plugin_path(), "csi");
        assert_eq!(
            mount.host_path_to_volume("pvc-1"),
            root.join("csi/volumes/pvc-1")
        );
        assert_eq!(
            mount.volume_sub_path("pvc-1"),
            PathBuf::from("csi/volumes/pvc-1")
        );
        assert_eq!(
            mount.host_path_to_mount_volume("pvc-1"),
            root.join("csi/mount_volumes/pvc-1")
        );
        assert_eq!(mount.plugin_sub_path("/data/a"), PathBuf::from("csi/data/a"));
        assert_eq!(
            mount.host_path_to(Path::new("/csi/data/a")),
            root.join("csi/data/a")
        );
        Ok(())
    }

    #[test]
    fn mount_is_idempotent() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = test_config(dir.path());
        let backend = Arc::new(FakeMounter::default());
        let mount = MountPoint::with_backend(&config, 0, 1, backend.clone());

        mount.mount()?;
        mount.mount()?;

        // Exactly one live mount after the second call; the remount cycle
        // unmounted the first one.
        assert_eq!(backend.mounted.lock().len(), 1);
        assert!(backend
            .mounted
            .lock()
            .contains(&dir.path().join("node-1")));
        let calls = backend.calls.lock();
        assert_eq!(
            calls
                .iter()
                .filter(|call| call.starts_with("umount"))
                .count(),
            1
        );
        Ok(())
    }

    #[test]
    fn unmount_of_unmounted_path_is_a_noop() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = test_config(dir.path());
        let backend = Arc::new(FakeMounter::default());
        let mount = MountPoint::with_backend(&config, 0, 1, backend.clone());
        mount.unmount()?;
        assert!(backend.calls.lock().is_empty());
        Ok(())
    }
}
