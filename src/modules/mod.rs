//! Core volume-provisioning modules.
//!
//! This module provides the main components of the provisioner:
//!
//! - `constants`: Wire-protocol constants and filesystem defaults
//! - `packet`: Binary packet framing for the master protocol
//! - `master`: Session handshake and quota exchanges with the master
//! - `mounter`: Mount, unmount and mount-state inspection
//! - `mount_point`: Top-level mounts of the cluster on the host
//! - `bind`: Bind-mounting volumes into workload target paths
//! - `volume`: Per-volume directory and quota lifecycle
//! - `quota_tools`: Quota management through external tool binaries
//! - `service`: Controller and node orchestration entry points

pub mod bind;
pub mod config;
pub mod constants;
pub mod error;
pub mod master;
pub mod mount_point;
pub mod mounter;
pub mod packet;
pub mod quota_tools;
pub mod service;
pub mod volume;
