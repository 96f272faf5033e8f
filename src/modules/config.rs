//! Cluster connection and mount configuration.
//!
//! One explicit struct threaded through every constructor; nothing in the
//! crate reads process-wide state.

use std::path::PathBuf;
use std::time::Duration;

use super::constants::MOUNT_BASE;

/// Everything needed to mount a cluster and manage volumes inside it.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Master server host name or address.
    pub master_host: String,
    /// Master server port.
    pub master_port: u16,
    /// Remote root path exported by the cluster.
    pub root_dir: String,
    /// Subpath of `root_dir` reserved for this plugin's data.
    pub plugin_dir: String,
    /// Filesystem type passed to the mount tool.
    pub fs_type: String,
    /// Name used to derive host mount paths; typically the node or
    /// controller identity.
    pub name: String,
    /// Comma-separated extra mount options, empty for none.
    pub mount_options: String,
    /// Base directory under which host mount points are created.
    pub mount_base: PathBuf,
    /// Tolerate mounts whose propagation is not `shared`. Bind mounts made
    /// under such a mount stay invisible to other mount namespaces, so
    /// this is only acceptable in single-namespace test environments.
    pub allow_private_propagation: bool,
    /// Optional bound on master connect/read/write. `None` preserves the
    /// historical behavior of blocking indefinitely on a hung master.
    pub master_timeout: Option<Duration>,
}

impl ClusterConfig {
    /// Configuration for the given master endpoint and remote layout,
    /// with defaults for the host-side knobs.
    pub fn new(
        master_host: impl Into<String>,
        master_port: u16,
        root_dir: impl Into<String>,
        plugin_dir: impl Into<String>,
        fs_type: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            master_host: master_host.into(),
            master_port,
            root_dir: root_dir.into(),
            plugin_dir: plugin_dir.into(),
            fs_type: fs_type.into(),
            name: name.into(),
            mount_options: String::new(),
            mount_base: PathBuf::from(MOUNT_BASE),
            allow_private_propagation: false,
            master_timeout: None,
        }
    }

    /// Replace the extra mount options string.
    pub fn with_mount_options(mut self, options: impl Into<String>) -> Self {
        self.mount_options = options.into();
        self
    }

    /// Replace the host mount base directory.
    pub fn with_mount_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.mount_base = base.into();
        self
    }

    /// Tolerate non-shared mount propagation.
    pub fn with_private_propagation_allowed(mut self) -> Self {
        self.allow_private_propagation = true;
        self
    }

    /// Bound master connect/read/write by the given duration.
    pub fn with_master_timeout(mut self, timeout: Duration) -> Self {
        self.master_timeout = Some(timeout);
        self
    }
}
