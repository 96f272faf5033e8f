//! Bind-mounting volume directories into caller-supplied targets.
//!
//! A bind makes a directory that already lives under one of the top-level
//! mounts visible at the path a workload asked for. Both directions are
//! idempotent: binding an already-mounted target and unbinding a
//! never-mounted one are no-ops.
//!
//! When several mount slots exist, each bind is served from one of them,
//! chosen by an injected [`SlotPicker`]. Any slot works, since all slots
//! mount the identical remote root; the strategy only spreads load.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::info;
use rand::Rng;

use super::error::{Error, Result};
use super::mount_point::MountPoint;
use super::mounter::MountBackend;

/// Strategy choosing which mount slot serves the next bind.
pub trait SlotPicker: Send + Sync {
    /// Index in `0..slot_count` of the slot to use.
    fn pick(&self, slot_count: usize) -> usize;
}

/// Deterministic rotation through the slots.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl RoundRobin {
    /// Picker starting at slot 0.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SlotPicker for RoundRobin {
    fn pick(&self, slot_count: usize) -> usize {
        self.cursor.fetch_add(1, Ordering::Relaxed) % slot_count.max(1)
    }
}

/// Uniformly random slot choice.
#[derive(Debug, Default)]
pub struct Random;

impl SlotPicker for Random {
    fn pick(&self, slot_count: usize) -> usize {
        if slot_count <= 1 {
            0
        } else {
            rand::thread_rng().gen_range(0..slot_count)
        }
    }
}

/// Maps volume directories into target paths and back out again.
pub struct BindOrchestrator {
    slots: Vec<Arc<MountPoint>>,
    picker: Box<dyn SlotPicker>,
    backend: Arc<dyn MountBackend>,
}

impl std::fmt::Debug for BindOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindOrchestrator")
            .field("slots", &self.slots.len())
            .finish_non_exhaustive()
    }
}

impl BindOrchestrator {
    /// Orchestrator over the given mount slots. The backend must be the
    /// one the slots mount through, so bind-state checks and the mounts
    /// themselves observe the same mount table.
    pub fn new(
        slots: Vec<Arc<MountPoint>>,
        picker: Box<dyn SlotPicker>,
        backend: Arc<dyn MountBackend>,
    ) -> Result<Self> {
        if slots.is_empty() {
            return Err(Error::Internal(
                "bind orchestration requires at least one mount slot".to_string(),
            ));
        }
        Ok(Self {
            slots,
            picker,
            backend,
        })
    }

    /// Remote-root-relative source for a publish request: an explicit
    /// subdirectory is taken verbatim under the plugin-private root,
    /// otherwise the source derives from the volume identifier.
    pub fn source_sub_path(&self, volume_id: &str, explicit_sub_dir: Option<&str>) -> PathBuf {
        match explicit_sub_dir {
            Some(sub_dir) => self.slots[0].plugin_sub_path(sub_dir),
            None => self.slots[0].volume_sub_path(volume_id),
        }
    }

    /// Bind `source_sub_path` (remote-root-relative) onto `target`. A
    /// target that is already mounted is left untouched.
    pub fn bind(&self, source_sub_path: &Path, target: &Path, options: &[String]) -> Result<()> {
        if self.backend.is_mounted(target)? {
            info!("bind: target {} is already mounted", target.display());
            return Ok(());
        }
        let slot = &self.slots[self.picker.pick(self.slots.len())];
        let source = slot.host_path_to(source_sub_path);
        info!(
            "bind: {} -> {} (options {:?})",
            source.display(),
            target.display(),
            options
        );
        let mut bind_options = options.to_vec();
        bind_options.push("bind".to_string());
        self.backend.mount(
            &source.to_string_lossy(),
            target,
            slot.fs_type(),
            &bind_options,
        )
    }

    /// Unmount `target` if it is mounted; a never-mounted target is
    /// success.
    pub fn unbind(&self, target: &Path) -> Result<()> {
        if self.backend.is_mounted(target)? {
            self.backend.unmount(target)
        } else {
            info!("unbind: target {} was already unmounted", target.display());
            Ok(())
        }
    }
}
