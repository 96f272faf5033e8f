#![doc(html_root_url = "https://docs.rs/mountr/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]

//! mountr: volume provisioning for distributed filesystems
//!
//! Exposes an already-running distributed-filesystem cluster as sized
//! volumes: the cluster is mounted on the host, each volume is a
//! subdirectory carved out under a plugin-private area, its capacity is a
//! hard directory quota negotiated with the cluster's master server over
//! its binary control protocol, and workloads see the volume through a
//! bind mount into the target path they asked for.
//!
//! ## Features
//!
//! - Direct master-protocol client for directory quotas (get/set)
//! - Idempotent top-level mounts and bind mounts
//! - Parallel mount slots with pluggable slot selection
//! - Per-volume keyed locking around mutating operations
//! - Quota fallback through the cluster's command-line tools
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mountr::{ClusterConfig, ControllerService};
//!
//! # fn main() -> mountr::Result<()> {
//! let config = ClusterConfig::new("mfsmaster", 9421, "/", "csi", "moosefs", "controller");
//!
//! // Mounts the cluster and provisions a 10 GiB volume.
//! let controller = ControllerService::new(&config)?;
//! let acquired = controller.create_volume("pvc-42", 10 << 30)?;
//! assert!(acquired > 0);
//! # Ok(())
//! # }
//! ```
//!
//! ## Publishing
//!
//! A node service mounts one or more parallel slots of the same cluster
//! and bind-mounts volume directories into workload targets; both the
//! bind and its teardown are idempotent.

pub mod modules;

pub use modules::bind::{BindOrchestrator, Random, RoundRobin, SlotPicker};
pub use modules::config::ClusterConfig;
pub use modules::error::{Error, Result};
pub use modules::master::{MasterClient, SessionInfo};
pub use modules::mount_point::MountPoint;
pub use modules::mounter::{MountBackend, Mounter};
pub use modules::packet::Packet;
pub use modules::quota_tools::QuotaTools;
pub use modules::service::{ControllerService, NodeService, PublishContext};
pub use modules::volume::{QuotaBackend, VolumeManager};
