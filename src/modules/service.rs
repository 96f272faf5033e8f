//! Controller and node orchestration over the volume machinery.
//!
//! These are the entry points an RPC dispatcher calls into: plain
//! arguments in, typed errors out. The controller owns exactly one mount
//! of the cluster and runs the provisioning lifecycle; a node owns one or
//! more mount slots and publishes volumes into workload target paths.

use std::path::Path;
use std::sync::Arc;

use libc::{SIGINT, SIGTERM};
use log::{info, warn};
use signal_hook::iterator::Signals;

use super::bind::{BindOrchestrator, SlotPicker};
use super::config::ClusterConfig;
use super::error::{Error, Result};
use super::master::MasterClient;
use super::mount_point::MountPoint;
use super::mounter::{MountBackend, Mounter};
use super::volume::{dir_exists, VolumeManager};

/// Caller-supplied context for publishing a volume.
#[derive(Debug, Clone, Default)]
pub struct PublishContext {
    /// Explicit subdirectory (under the plugin-private root) to expose
    /// instead of the volume's own directory.
    pub sub_dir: Option<String>,
    /// Create the volume's directory, without a quota, if it does not
    /// exist yet.
    pub create_on_publish: bool,
}

/// Provisioning-side service: volume create/delete/expand/validate and
/// the controller half of publishing.
pub struct ControllerService {
    mount: Arc<MountPoint>,
    volumes: VolumeManager,
}

impl ControllerService {
    /// Mount the cluster once and build the volume manager over it, with
    /// quotas spoken to the master directly.
    pub fn new(config: &ClusterConfig) -> Result<Self> {
        let mount = Arc::new(MountPoint::new(config, 0, 1));
        mount.mount()?;
        let volumes = VolumeManager::new(
            mount.clone(),
            Box::new(MasterClient::from_config(config)),
        );
        Ok(Self { mount, volumes })
    }

    /// Service over pre-built parts; nothing is mounted here.
    pub fn with_parts(mount: Arc<MountPoint>, volumes: VolumeManager) -> Self {
        Self { mount, volumes }
    }

    /// The volume manager this service drives.
    pub fn volumes(&self) -> &VolumeManager {
        &self.volumes
    }

    /// Provision a volume of the given capacity. Re-requesting an
    /// existing volume succeeds only if its quota matches the request
    /// exactly. Returns the capacity the cluster acquired.
    pub fn create_volume(&self, volume_id: &str, capacity: u64) -> Result<u64> {
        info!("create volume request - id: {volume_id}, capacity: {capacity}");
        if volume_id.is_empty() {
            return Err(Error::InvalidArgument(
                "create volume: volume id must be provided".to_string(),
            ));
        }
        let acquired = self.volumes.ensure_capacity(volume_id, capacity)?;
        if acquired != capacity {
            warn!("create volume {volume_id}: requested {capacity} bytes, got {acquired}");
        }
        Ok(acquired)
    }

    /// Remove a volume and its data. An absent volume is success.
    pub fn delete_volume(&self, volume_id: &str) -> Result<()> {
        info!("delete volume request - id: {volume_id}");
        if volume_id.is_empty() {
            return Err(Error::InvalidArgument(
                "delete volume: volume id must be provided".to_string(),
            ));
        }
        if !self.volumes.exists(volume_id)? {
            info!("delete volume {volume_id}: already absent");
            return Ok(());
        }
        self.volumes.delete(volume_id)
    }

    /// Apply a new capacity to an existing volume and return what the
    /// cluster acquired.
    pub fn expand_volume(&self, volume_id: &str, capacity: u64) -> Result<u64> {
        info!("expand volume request - id: {volume_id}, capacity: {capacity}");
        if volume_id.is_empty() {
            return Err(Error::InvalidArgument(
                "expand volume: volume id must be provided".to_string(),
            ));
        }
        if !self.volumes.exists(volume_id)? {
            return Err(Error::NotFound(format!(
                "expand volume: volume {volume_id} not found"
            )));
        }
        let acquired = self.volumes.expand(volume_id, capacity)?;
        if acquired != capacity {
            warn!("expand volume {volume_id}: requested {capacity} bytes, got {acquired}");
        }
        Ok(acquired)
    }

    /// Check that a volume exists before a caller relies on it.
    pub fn validate_volume(&self, volume_id: &str) -> Result<()> {
        if volume_id.is_empty() {
            return Err(Error::InvalidArgument(
                "validate volume: volume id must be provided".to_string(),
            ));
        }
        if self.volumes.exists(volume_id)? {
            Ok(())
        } else {
            Err(Error::NotFound(format!(
                "validate volume: volume {volume_id} not found"
            )))
        }
    }

    /// Controller half of publishing: make sure the directory the node
    /// will bind actually exists. A sub-dir and the create directive
    /// together are contradictory and rejected before any side effect.
    pub fn publish_volume(&self, volume_id: &str, context: &PublishContext) -> Result<()> {
        info!("publish volume request - id: {volume_id}, context: {context:?}");
        if volume_id.is_empty() {
            return Err(Error::InvalidArgument(
                "publish volume: volume id must be provided".to_string(),
            ));
        }
        if context.sub_dir.is_some() {
            if context.create_on_publish {
                return Err(Error::InvalidArgument(
                    "publish volume: context carries both a sub-dir and the create directive"
                        .to_string(),
                ));
            }
            return self.volumes.create_mount_volume(volume_id);
        }
        if self.volumes.exists(volume_id)? {
            return Ok(());
        }
        if context.create_on_publish {
            self.volumes.create(volume_id, 0)?;
            return Ok(());
        }
        Err(Error::NotFound(format!(
            "publish volume: volume {volume_id} not found and create-on-publish not set"
        )))
    }

    /// Controller half of unpublishing; nothing to undo on this side.
    pub fn unpublish_volume(&self, volume_id: &str) -> Result<()> {
        info!("unpublish volume request - id: {volume_id}");
        if volume_id.is_empty() {
            return Err(Error::InvalidArgument(
                "unpublish volume: volume id must be provided".to_string(),
            ));
        }
        Ok(())
    }

    /// Unmount the controller's mount point.
    pub fn shutdown(&self) -> Result<()> {
        self.mount.unmount()
    }
}

/// Workload-side service: bind volumes into target paths on this host.
pub struct NodeService {
    slots: Vec<Arc<MountPoint>>,
    bind: BindOrchestrator,
}

impl NodeService {
    /// Mount `slot_count` parallel mounts of the cluster and build the
    /// bind orchestrator over them with the given slot strategy.
    pub fn new(
        config: &ClusterConfig,
        slot_count: usize,
        picker: Box<dyn SlotPicker>,
    ) -> Result<Self> {
        if slot_count == 0 {
            return Err(Error::InvalidArgument(
                "node service: at least one mount slot is required".to_string(),
            ));
        }
        let backend: Arc<dyn MountBackend> = Arc::new(Mounter::from_config(config));
        let mut slots = Vec::with_capacity(slot_count);
        for slot in 0..slot_count {
            let mount = Arc::new(MountPoint::with_backend(
                config,
                slot,
                slot_count,
                backend.clone(),
            ));
            mount.mount()?;
            slots.push(mount);
        }
        let bind = BindOrchestrator::new(slots.clone(), picker, backend)?;
        Ok(Self { slots, bind })
    }

    /// Service over pre-built parts; nothing is mounted here.
    pub fn with_parts(slots: Vec<Arc<MountPoint>>, bind: BindOrchestrator) -> Self {
        Self { slots, bind }
    }

    /// Bind a volume (or an explicit subdirectory) into `target`.
    /// Idempotent: an already-mounted target is left as is.
    pub fn publish(
        &self,
        volume_id: &str,
        target: &Path,
        context: &PublishContext,
        read_only: bool,
        mount_flags: &[String],
    ) -> Result<()> {
        info!(
            "node publish - id: {volume_id}, target: {}, context: {context:?}, read-only: {read_only}",
            target.display()
        );
        if volume_id.is_empty() {
            return Err(Error::InvalidArgument(
                "node publish: volume id must be provided".to_string(),
            ));
        }
        if target.as_os_str().is_empty() {
            return Err(Error::InvalidArgument(
                "node publish: target path must be provided".to_string(),
            ));
        }
        let source = self
            .bind
            .source_sub_path(volume_id, context.sub_dir.as_deref());
        let mut options = mount_flags.to_vec();
        if read_only {
            options.push("ro".to_string());
        }
        self.bind.bind(&source, target, &options)
    }

    /// Undo a publish. Unbinding a target that was never mounted is
    /// success; a volume this node has never heard of is not.
    pub fn unpublish(&self, volume_id: &str, target: &Path) -> Result<()> {
        info!(
            "node unpublish - id: {volume_id}, target: {}",
            target.display()
        );
        if volume_id.is_empty() {
            return Err(Error::InvalidArgument(
                "node unpublish: volume id must be provided".to_string(),
            ));
        }
        if target.as_os_str().is_empty() {
            return Err(Error::InvalidArgument(
                "node unpublish: target path must be provided".to_string(),
            ));
        }
        let primary = &self.slots[0];
        let known = dir_exists(&primary.host_path_to_volume(volume_id))?
            || dir_exists(&primary.host_path_to_mount_volume(volume_id))?;
        if !known {
            return Err(Error::NotFound(format!(
                "node unpublish: volume {volume_id} not found"
            )));
        }
        self.bind.unbind(target)
    }

    /// Unmount every mount slot.
    pub fn shutdown(&self) -> Result<()> {
        for slot in &self.slots {
            slot.unmount()?;
        }
        Ok(())
    }

    /// Block until SIGINT or SIGTERM, then unmount every slot.
    pub fn run_until_signalled(&self) -> Result<()> {
        let mut signals = Signals::new(&[SIGINT, SIGTERM])?;
        for signal in signals.forever() {
            match signal {
                SIGINT | SIGTERM => {
                    info!("received signal {signal}, unmounting");
                    break;
                }
                _ => {}
            }
        }
        self.shutdown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::bind::RoundRobin;
    use crate::modules::mounter::fake::FakeMounter;
    use crate::modules::volume::fake::FakeQuota;
    use std::fs;
    use std::path::PathBuf;

    const GIB: u64 = 1 << 30;

    fn controller(base: &Path) -> (Arc<MountPoint>, Arc<FakeQuota>, ControllerService) {
        let _ = env_logger::builder().is_test(true).try_init();
        let config = ClusterConfig::new("mfsmaster", 9421, "/", "csi", "moosefs", "ctl")
            .with_mount_base(base);
        let mount = Arc::new(MountPoint::with_backend(
            &config,
            0,
            1,
            Arc::new(FakeMounter::default()),
        ));
        let quota = Arc::new(FakeQuota::default());
        let volumes = VolumeManager::new(mount.clone(), Box::new(quota.clone()));
        (mount.clone(), quota, ControllerService::with_parts(mount, volumes))
    }

    fn node(base: &Path) -> (Arc<FakeMounter>, Vec<Arc<MountPoint>>, NodeService) {
        let _ = env_logger::builder().is_test(true).try_init();
        let config = ClusterConfig::new("mfsmaster", 9421, "/", "csi", "moosefs", "node-1")
            .with_mount_base(base);
        let backend = Arc::new(FakeMounter::default());
        let slots: Vec<Arc<MountPoint>> = (0..2)
            .map(|slot| Arc::new(MountPoint::with_backend(&config, slot, 2, backend.clone())))
            .collect();
        let bind =
            BindOrchestrator::new(slots.clone(), Box::new(RoundRobin::new()), backend.clone())
                .unwrap();
        (backend, slots.clone(), NodeService::with_parts(slots, bind))
    }

    #[test]
    fn create_volume_requires_an_id() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (_mount, _quota, service) = controller(dir.path());
        assert!(matches!(
            service.create_volume("", GIB),
            Err(Error::InvalidArgument(_))
        ));
        Ok(())
    }

    #[test]
    fn create_and_recreate_with_matching_capacity() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (_mount, quota, service) = controller(dir.path());
        assert_eq!(service.create_volume("pvc-1", 10 * GIB)?, 10 * GIB);
        assert_eq!(service.create_volume("pvc-1", 10 * GIB)?, 10 * GIB);
        assert_eq!(quota.set_calls.lock().len(), 1);
        Ok(())
    }

    #[test]
    fn recreate_with_other_capacity_is_a_conflict() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (_mount, quota, service) = controller(dir.path());
        service.create_volume("pvc-1", 10 * GIB)?;
        let err = service.create_volume("pvc-1", 20 * GIB).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
        assert_eq!(quota.set_calls.lock().len(), 1);
        Ok(())
    }

    #[test]
    fn delete_volume_is_idempotent() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (_mount, _quota, service) = controller(dir.path());
        service.create_volume("pvc-1", GIB)?;
        service.delete_volume("pvc-1")?;
        service.delete_volume("pvc-1")?;
        Ok(())
    }

    #[test]
    fn expand_of_missing_volume_is_not_found() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (_mount, _quota, service) = controller(dir.path());
        assert!(matches!(
            service.expand_volume("pvc-1", GIB),
            Err(Error::NotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn validate_reports_existence() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (_mount, _quota, service) = controller(dir.path());
        assert!(matches!(
            service.validate_volume("pvc-1"),
            Err(Error::NotFound(_))
        ));
        service.create_volume("pvc-1", GIB)?;
        service.validate_volume("pvc-1")?;
        Ok(())
    }

    #[test]
    fn conflicting_publish_directives_have_no_side_effects() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (mount, _quota, service) = controller(dir.path());
        let context = PublishContext {
            sub_dir: Some("shared/data".to_string()),
            create_on_publish: true,
        };
        let err = service.publish_volume("pvc-1", &context).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(!mount.host_path_to_mount_volume("pvc-1").exists());
        assert!(!mount.host_path_to_volume("pvc-1").exists());
        Ok(())
    }

    #[test]
    fn publish_with_sub_dir_provisions_the_mount_volume_dir() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (mount, _quota, service) = controller(dir.path());
        let context = PublishContext {
            sub_dir: Some("shared/data".to_string()),
            create_on_publish: false,
        };
        service.publish_volume("pvc-1", &context)?;
        assert!(mount.host_path_to_mount_volume("pvc-1").is_dir());
        Ok(())
    }

    #[test]
    fn publish_creates_on_demand_only_when_directed() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (_mount, quota, service) = controller(dir.path());

        let plain = PublishContext::default();
        assert!(matches!(
            service.publish_volume("pvc-1", &plain),
            Err(Error::NotFound(_))
        ));

        let create = PublishContext {
            sub_dir: None,
            create_on_publish: true,
        };
        service.publish_volume("pvc-1", &create)?;
        assert!(service.volumes().exists("pvc-1")?);
        // Created without a quota.
        assert!(quota.set_calls.lock().is_empty());

        // Now that it exists, a plain publish passes too.
        service.publish_volume("pvc-1", &plain)?;
        Ok(())
    }

    #[test]
    fn node_publish_binds_idempotently() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (backend, slots, service) = node(dir.path());
        fs::create_dir_all(slots[0].host_path_to_volume("pvc-1"))?;
        let target = PathBuf::from("/workload/target");

        let context = PublishContext::default();
        service.publish("pvc-1", &target, &context, false, &[])?;
        service.publish("pvc-1", &target, &context, false, &[])?;

        assert!(backend.is_mounted(&target)?);
        let mounts = backend
            .calls
            .lock()
            .iter()
            .filter(|call| call.starts_with("mount"))
            .count();
        assert_eq!(mounts, 1);
        Ok(())
    }

    #[test]
    fn node_publish_read_only_appends_ro() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (backend, _slots, service) = node(dir.path());
        service.publish(
            "pvc-1",
            Path::new("/workload/ro-target"),
            &PublishContext::default(),
            true,
            &["noatime".to_string()],
        )?;
        let calls = backend.calls.lock();
        assert!(calls[0].ends_with("[noatime,ro,bind]"));
        Ok(())
    }

    #[test]
    fn node_unpublish_of_unknown_volume_is_not_found() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (_backend, _slots, service) = node(dir.path());
        assert!(matches!(
            service.unpublish("pvc-404", Path::new("/workload/target")),
            Err(Error::NotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn node_unpublish_of_never_published_target_is_a_noop() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (backend, slots, service) = node(dir.path());
        fs::create_dir_all(slots[0].host_path_to_volume("pvc-1"))?;
        service.unpublish("pvc-1", Path::new("/workload/never-mounted"))?;
        assert!(backend.calls.lock().is_empty());
        Ok(())
    }

    #[test]
    fn node_validations_reject_empty_arguments() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (_backend, _slots, service) = node(dir.path());
        let context = PublishContext::default();
        assert!(matches!(
            service.publish("", Path::new("/t"), &context, false, &[]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            service.publish("pvc-1", Path::new(""), &context, false, &[]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            service.unpublish("", Path::new("/t")),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            service.unpublish("pvc-1", Path::new("")),
            Err(Error::InvalidArgument(_))
        ));
        Ok(())
    }
}
